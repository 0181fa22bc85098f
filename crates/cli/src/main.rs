mod args;
mod output;
mod profile;
mod runner;

use anyhow::Result;
use clap::Parser;
use tracing_subscriber::{fmt, EnvFilter};

use args::{Cli, Commands};
use output::print_plugins;
use runner::run_scan;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose, cli.log_json);

    match cli.command {
        Commands::Scan(args) => run_scan(args).await?,
        Commands::Plugins => print_plugins(),
    }

    Ok(())
}

fn init_logging(verbose: u8, json: bool) {
    let log_level = match verbose {
        0 => "info",
        1 => "debug",
        _ => "trace",
    };

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(log_level));

    if json {
        fmt().with_env_filter(filter).json().with_writer(std::io::stderr).init();
    } else {
        fmt().with_env_filter(filter).compact().with_writer(std::io::stderr).init();
    }
}
