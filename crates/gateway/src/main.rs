//! Spigot - Syslog ingestion and forwarding gateway
//!
//! # Usage
//!
//! ```bash
//! # Run the gateway (default)
//! spigot
//! spigot --config /etc/spigot/spigot.toml
//!
//! # Validate a configuration file without starting anything
//! spigot check-config --config spigot.toml
//! ```

mod serve;
mod stash;

use anyhow::Result;
use clap::{Parser, Subcommand};

/// Spigot - Syslog ingestion and forwarding gateway
#[derive(Parser, Debug)]
#[command(name = "spigot")]
#[command(version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Option<Command>,

    /// Path to configuration file
    #[arg(short, long, default_value = "spigot.toml", global = true)]
    config: std::path::PathBuf,

    /// Log level override (trace, debug, info, warn, error)
    #[arg(short, long, global = true)]
    log_level: Option<String>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the gateway
    Serve,

    /// Load and validate the configuration, then exit
    CheckConfig,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Some(Command::CheckConfig) => check_config(&cli.config),
        // No subcommand = serve (default behavior)
        Some(Command::Serve) | None => {
            serve::run(serve::ServeArgs {
                config: cli.config,
                log_level: cli.log_level,
            })
            .await
        }
    }
}

fn check_config(path: &std::path::Path) -> Result<()> {
    let config = spigot_config::Config::load(path)?;
    let sources = config.enabled_sources().count();
    let endpoints: usize = config
        .enabled_sources()
        .map(|s| s.ports.len() + usize::from(s.unix_socket_path.is_some()))
        .sum();
    println!(
        "{}: ok ({} relp source(s), {} endpoint(s), {} parser alias(es))",
        path.display(),
        sources,
        endpoints,
        config.parser.len()
    );
    Ok(())
}
