// runner.rs
use anyhow::{Context, Result};
use std::sync::Arc;
use tracing::{info, warn};

use crate::args::ScanArgs;
use crate::output::print_report;
use crate::profile::ScanProfile;
use trishul_common::{KnowledgeBase, PluginContext, ScanConfig, TrishulError};
use trishul_fingerprint::NotFoundFingerprint;
use trishul_orchestrator::ScanStrategy;
use trishul_plugins::build_plugins;
use trishul_target_resolver::TargetResolver;
use trishul_transport::HttpTransport;

pub async fn run_scan(args: ScanArgs) -> Result<()> {
    let profile = match &args.profile {
        Some(path) => ScanProfile::load(path)?,
        None => ScanProfile::default(),
    };

    let raw_targets = match &args.targets {
        Some(targets) => targets.clone(),
        None if !profile.targets.is_empty() => profile.targets.join(","),
        None => anyhow::bail!("No targets given: pass --targets or a profile with a targets list"),
    };
    let targets = TargetResolver::resolve_targets(&raw_targets)?;

    let settings = profile.scan.clone().overridden_by(args.settings());
    let config = Arc::new(settings.apply(ScanConfig::new(targets)));
    config.validate()?;

    let selection = profile.plugins.overridden_by(args.plugin_selection()?);
    let plugins = build_plugins(&selection)?;

    if let Some(addr) = args.metrics_addr {
        trishul_telemetry::install_prometheus(addr)?;
    }

    info!("Starting scan...");
    for target in &config.targets {
        info!("Target: {}", target);
    }
    info!("Plugins: {:?}", plugins.names());
    info!("Poll timeout: {:?}, queue capacity: {}", config.poll_timeout, config.queue_capacity);
    if plugins.is_empty() {
        warn!("No plugins enabled; only target reachability will be checked");
    }

    let transport = Arc::new(HttpTransport::from_config(&config)?);
    let kb = KnowledgeBase::new();
    let ctx = PluginContext::new(transport.clone(), kb.clone(), Arc::new(NotFoundFingerprint::new()));

    let mut strategy = ScanStrategy::new(config, plugins, ctx);
    let controller = strategy.controller();
    let interrupt = {
        let transport = transport.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                warn!("Interrupted, stopping the scan");
                controller.stop();
                transport.stop();
            }
        })
    };

    let outcome = strategy.start().await;
    interrupt.abort();

    match outcome {
        Ok(summary) => print_report(&kb.snapshot(), Some(&summary), &args.output_format),
        Err(TrishulError::MustStopByUserRequest) => {
            warn!("Scan stopped by user request; reporting partial results");
            print_report(&kb.snapshot(), None, &args.output_format)
        }
        Err(e) => Err(e).context("Scan aborted"),
    }
}
