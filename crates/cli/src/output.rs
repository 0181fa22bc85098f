//! Output formatting for scan results

use anyhow::Result;
use std::time::Duration;
use trishul_common::{Finding, KbSnapshot};
use trishul_orchestrator::ScanSummary;
use trishul_plugins::available_plugins;

/// Print the knowledge base in the specified format. `summary` is absent
/// when the scan was interrupted.
pub fn print_report(kb: &KbSnapshot, summary: Option<&ScanSummary>, format: &str) -> Result<()> {
    let findings = sorted_findings(&kb.findings);
    let format = format.trim().to_lowercase();
    match format.as_str() {
        "json" | "j" => print_json(kb, &findings, summary)?,
        "csv" | "c" => print_csv(&findings),
        "table" | "text" | "t" | "" => print_table(kb, &findings, summary),
        _ => {
            eprintln!("Warning: Unknown format '{}', using default text format", format);
            print_table(kb, &findings, summary);
        }
    }
    Ok(())
}

/// Print the built-in plugins grouped by kind
pub fn print_plugins() {
    println!("\n{:-<80}", "");
    println!("{:<18} {:<16} {:<44}", "PLUGIN", "KIND", "DESCRIPTION");
    println!("{:-<80}", "");
    for plugin in available_plugins() {
        println!("{:<18} {:<16} {:<44}", plugin.name, plugin.kind.as_str(), plugin.description);
    }
    println!("{:-<80}\n", "");
}

/// Most severe first, then by URL
fn sorted_findings(findings: &[Finding]) -> Vec<&Finding> {
    let mut sorted: Vec<&Finding> = findings.iter().collect();
    sorted.sort_by(|a, b| {
        b.severity
            .cmp(&a.severity)
            .then_with(|| a.url.as_str().cmp(b.url.as_str()))
            .then_with(|| a.plugin.cmp(&b.plugin))
    });
    sorted
}

fn print_table(kb: &KbSnapshot, findings: &[&Finding], summary: Option<&ScanSummary>) {
    if findings.is_empty() {
        println!("\nNo findings to display.");
    } else {
        println!("\n{:-<80}", "");
        println!("{:<8} {:<16} {:<54}", "SEVERITY", "PLUGIN", "FINDING");
        println!("{:-<80}", "");
        for finding in findings {
            println!(
                "{:<8} {:<16} {:<54}",
                finding.severity.to_string(),
                finding.plugin,
                truncate(&finding.title, 54)
            );
            println!("{:<25} {}", "", finding.url);
            if !finding.description.is_empty() {
                println!("{:<25} {}", "", truncate(&finding.description, 54));
            }
        }
        println!("{:-<80}", "");
    }

    if !kb.info.is_empty() {
        println!("\nℹ️  Information:");
        for (key, values) in &kb.info {
            for value in values {
                println!("  {}: {}", key, value);
            }
        }
    }

    println!("\n📊 Summary:");
    println!("  Findings: {}", findings.len());
    println!("  Known requests: {}", kb.known_requests);
    match summary {
        Some(summary) => {
            let stages: Vec<&str> = summary.stages.iter().map(|role| role.as_str()).collect();
            println!("  Stages: {}", stages.join(", "));
            println!("  ✓ Items routed: {}", summary.routing.items_routed);
            println!("  ✓ Deliveries: {}", summary.routing.deliveries);
            println!("  ✗ Recoverable failures: {}", summary.failures.len());
            for failure in &summary.failures {
                println!("      {}/{}: {}", failure.stage, failure.plugin.as_deref().unwrap_or("-"), failure.message);
            }
            println!("  ⏱️  Scan duration: {}", format_duration(summary.elapsed));
        }
        None => println!("  ⊘ Scan interrupted before completion"),
    }
    println!();
}

fn print_json(kb: &KbSnapshot, findings: &[&Finding], summary: Option<&ScanSummary>) -> Result<()> {
    use serde_json::json;

    let scan_info = match summary {
        Some(summary) => json!({
            "completed": true,
            "duration_seconds": summary.elapsed.as_secs_f64(),
            "duration_formatted": format_duration(summary.elapsed),
            "stages": summary.stages,
            "items_routed": summary.routing.items_routed,
            "deliveries": summary.routing.deliveries,
            "router_passes": summary.routing.passes,
            "known_requests": summary.known_requests,
            "failures": summary.failures.iter().map(|f| json!({
                "stage": f.stage,
                "plugin": f.plugin,
                "message": f.message,
            })).collect::<Vec<_>>(),
        }),
        None => json!({
            "completed": false,
            "known_requests": kb.known_requests,
        }),
    };

    let output = json!({
        "scan_info": scan_info,
        "findings": findings,
        "info": kb.info,
    });

    println!("{}", serde_json::to_string_pretty(&output)?);
    Ok(())
}

fn print_csv(findings: &[&Finding]) {
    println!("severity,plugin,title,url,description");
    for finding in findings {
        println!(
            "{},{},{},{},{}",
            finding.severity,
            csv_field(&finding.plugin),
            csv_field(&finding.title),
            csv_field(finding.url.as_str()),
            csv_field(&finding.description)
        );
    }
}

fn csv_field(value: &str) -> String {
    let escaped = value.replace('"', "\"\"").replace('\n', " ").replace('\r', "");
    format!("\"{}\"", escaped)
}

fn truncate(value: &str, width: usize) -> String {
    if value.chars().count() > width {
        let cut: String = value.chars().take(width.saturating_sub(3)).collect();
        format!("{}...", cut)
    } else {
        value.to_string()
    }
}

/// Format duration in a human-readable way
fn format_duration(duration: Duration) -> String {
    let total_secs = duration.as_secs();
    let millis = duration.subsec_millis();

    if total_secs == 0 {
        format!("{}ms", millis)
    } else if total_secs < 60 {
        if millis > 0 {
            format!("{}.{:03}s", total_secs, millis)
        } else {
            format!("{}s", total_secs)
        }
    } else {
        let mins = total_secs / 60;
        let secs = total_secs % 60;
        if secs > 0 {
            format!("{}m {}s", mins, secs)
        } else {
            format!("{}m", mins)
        }
    }
}
