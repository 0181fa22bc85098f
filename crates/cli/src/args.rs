use anyhow::{bail, Result};
use clap::{Args, Parser, Subcommand};
use std::net::SocketAddr;
use std::path::PathBuf;

use crate::profile::ScanSettings;
use trishul_plugins::PluginSelection;

#[derive(Parser)]
#[command(name = "trishul")]
#[command(version)]
#[command(about = "A plugin-driven web vulnerability scanner", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Increase verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Emit logs as JSON lines
    #[arg(long, global = true)]
    pub log_json: bool,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Scan one or more web applications
    Scan(ScanArgs),

    /// List the built-in plugins
    Plugins,
}

#[derive(Args, Debug, Default)]
pub struct ScanArgs {
    /// Target URLs, comma separated. Example: http://example.com,https://example.org/app
    #[arg(short = 't', long)]
    pub targets: Option<String>,

    /// TOML scan profile; explicit flags override its values
    #[arg(long)]
    pub profile: Option<PathBuf>,

    /// Crawl plugins, comma separated
    #[arg(long, value_delimiter = ',')]
    pub crawl: Vec<String>,

    /// Infrastructure plugins, comma separated
    #[arg(long, value_delimiter = ',')]
    pub infrastructure: Vec<String>,

    /// Audit plugins, comma separated
    #[arg(long, value_delimiter = ',')]
    pub audit: Vec<String>,

    /// Bruteforce plugins, comma separated
    #[arg(long, value_delimiter = ',')]
    pub bruteforce: Vec<String>,

    /// Auth plugins, comma separated
    #[arg(long, value_delimiter = ',')]
    pub auth: Vec<String>,

    /// Grep plugins, comma separated
    #[arg(long, value_delimiter = ',')]
    pub grep: Vec<String>,

    /// Plugin option, repeatable. Example: -O web_spider.max_links=50
    #[arg(short = 'O', long = "option", value_name = "PLUGIN.KEY=VALUE")]
    pub options: Vec<String>,

    /// Router polling timeout in milliseconds
    #[arg(long)]
    pub poll_timeout: Option<u64>,

    /// Capacity of every stage input queue
    #[arg(long)]
    pub queue_capacity: Option<usize>,

    /// Seconds between session checks of the auth plugins
    #[arg(long)]
    pub auth_interval: Option<u64>,

    /// Stop discovering new URLs after this many seconds
    #[arg(long)]
    pub max_discovery_time: Option<u64>,

    /// HTTP request timeout in milliseconds
    #[arg(long)]
    pub timeout: Option<u64>,

    /// Connection retries per request
    #[arg(long)]
    pub retries: Option<u32>,

    /// User-Agent header sent with every request
    #[arg(long)]
    pub user_agent: Option<String>,

    /// Disable the HTTP response cache
    #[arg(long)]
    pub no_cache: bool,

    /// Output format: text, json, csv
    #[arg(short, long, default_value = "text", value_parser = ["text", "json", "csv"])]
    pub output_format: String,

    /// Serve Prometheus metrics on this address. Example: 127.0.0.1:9000
    #[arg(long)]
    pub metrics_addr: Option<SocketAddr>,
}

impl ScanArgs {
    /// Scan settings given on the command line.
    pub fn settings(&self) -> ScanSettings {
        ScanSettings {
            poll_timeout_ms: self.poll_timeout,
            queue_capacity: self.queue_capacity,
            auth_interval_secs: self.auth_interval,
            max_discovery_time_secs: self.max_discovery_time,
            request_timeout_ms: self.timeout,
            retries: self.retries,
            user_agent: self.user_agent.clone(),
            http_cache: self.no_cache.then_some(false),
        }
    }

    /// Plugins and options given on the command line.
    pub fn plugin_selection(&self) -> Result<PluginSelection> {
        let mut selection = PluginSelection {
            crawl: self.crawl.clone(),
            infrastructure: self.infrastructure.clone(),
            audit: self.audit.clone(),
            bruteforce: self.bruteforce.clone(),
            auth: self.auth.clone(),
            grep: self.grep.clone(),
            ..Default::default()
        };
        for raw in &self.options {
            let (plugin, key, value) = parse_plugin_option(raw)?;
            selection.options.entry(plugin.to_string()).or_default().set(key, value);
        }
        Ok(selection)
    }
}

/// Split `plugin.key=value`.
fn parse_plugin_option(raw: &str) -> Result<(&str, &str, &str)> {
    let Some((path, value)) = raw.split_once('=') else {
        bail!("invalid plugin option '{}': expected PLUGIN.KEY=VALUE", raw);
    };
    let Some((plugin, key)) = path.trim().split_once('.') else {
        bail!("invalid plugin option '{}': missing plugin name", raw);
    };
    if plugin.is_empty() || key.is_empty() {
        bail!("invalid plugin option '{}': empty plugin or key", raw);
    }
    Ok((plugin, key, value))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scan_args(argv: &[&str]) -> ScanArgs {
        let cli = Cli::try_parse_from(argv).unwrap();
        match cli.command {
            Commands::Scan(args) => args,
            Commands::Plugins => panic!("expected the scan command"),
        }
    }

    #[test]
    fn plugin_flags_and_options() {
        let args = scan_args(&[
            "trishul",
            "scan",
            "-t",
            "http://target.test",
            "--crawl",
            "web_spider",
            "--audit",
            "reflected_input",
            "--grep",
            "error_pages",
            "-O",
            "web_spider.max_links=5",
            "-O",
            "web_spider.ignore_regex=a=b",
        ]);
        let selection = args.plugin_selection().unwrap();
        assert_eq!(selection.crawl, vec!["web_spider"]);
        assert_eq!(selection.audit, vec!["reflected_input"]);
        assert_eq!(selection.grep, vec!["error_pages"]);
        let spider = selection.options_for("web_spider");
        assert_eq!(spider.get("max_links"), Some("5"));
        assert_eq!(spider.get("ignore_regex"), Some("a=b"));
    }

    #[test]
    fn comma_separated_plugin_lists() {
        let args = scan_args(&["trishul", "scan", "--crawl", "web_spider,other"]);
        assert_eq!(args.crawl, vec!["web_spider", "other"]);
    }

    #[test]
    fn settings_only_carry_given_flags() {
        let args = scan_args(&["trishul", "scan", "--poll-timeout", "50", "--no-cache"]);
        let settings = args.settings();
        assert_eq!(settings.poll_timeout_ms, Some(50));
        assert_eq!(settings.http_cache, Some(false));
        assert_eq!(settings.queue_capacity, None);

        let settings = scan_args(&["trishul", "scan"]).settings();
        assert_eq!(settings.http_cache, None);
    }

    #[test]
    fn malformed_plugin_options() {
        assert!(parse_plugin_option("max_links=5").is_err());
        assert!(parse_plugin_option("web_spider.max_links").is_err());
        assert!(parse_plugin_option(".key=1").is_err());
        assert_eq!(parse_plugin_option("a.b=").unwrap(), ("a", "b", ""));
    }

    #[test]
    fn global_flags() {
        let cli = Cli::try_parse_from(["trishul", "-vv", "--log-json", "plugins"]).unwrap();
        assert_eq!(cli.verbose, 2);
        assert!(cli.log_json);
        assert!(matches!(cli.command, Commands::Plugins));
    }
}
