//! The `serve` command: wire the config to a running service

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use spigot_config::{Config, LogFormat};
use spigot_relp::{DirectBinder, RelpService};
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use crate::stash::DownstreamStash;

/// Arguments of the serve command
pub struct ServeArgs {
    /// Configuration file location
    pub config: PathBuf,
    /// CLI log level override; the config decides otherwise
    pub log_level: Option<String>,
}

pub async fn run(args: ServeArgs) -> Result<()> {
    let config = Config::load(&args.config)
        .with_context(|| format!("loading {}", args.config.display()))?;
    init_logging(&config, args.log_level.as_deref())?;

    let stash = Arc::new(DownstreamStash::new(&config.downstream));
    let service = RelpService::new(Arc::clone(&stash) as _, Arc::new(DirectBinder))?;
    service.set_conf(
        config.relp_source.clone(),
        config.parser.clone(),
        config.main.input_queue_size,
        config.main.max_input_message_size,
        config.main.effective_parser_workers(),
    );

    let fatal = service.fatal_error();
    service.start().await;
    tracing::info!(config = %args.config.display(), "spigot gateway running");

    wait_for_shutdown(&fatal).await;

    service.stop().await;
    stash.shutdown().await;
    tracing::info!("spigot gateway stopped");
    Ok(())
}

/// Block until an interrupt, a termination signal, or a fatal error
async fn wait_for_shutdown(fatal: &CancellationToken) {
    #[cfg(unix)]
    {
        let mut sigterm =
            match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
                Ok(signal) => signal,
                Err(e) => {
                    tracing::error!(error = %e, "cannot install SIGTERM handler");
                    fatal.cancelled().await;
                    return;
                }
            };
        tokio::select! {
            _ = tokio::signal::ctrl_c() => tracing::info!("interrupt received, shutting down"),
            _ = sigterm.recv() => tracing::info!("termination requested, shutting down"),
            _ = fatal.cancelled() => tracing::error!("fatal error, shutting down"),
        }
    }
    #[cfg(not(unix))]
    {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => tracing::info!("interrupt received, shutting down"),
            _ = fatal.cancelled() => tracing::error!("fatal error, shutting down"),
        }
    }
}

/// Initialize the tracing subscriber
///
/// The CLI override wins; otherwise the `[log]` section decides.
fn init_logging(config: &Config, override_level: Option<&str>) -> Result<()> {
    let level = override_level.unwrap_or(config.log.level.as_str());
    let filter = EnvFilter::try_new(level)
        .or_else(|_| EnvFilter::try_new("info"))
        .map_err(|e| anyhow::anyhow!("invalid log level: {e}"))?;

    let registry = tracing_subscriber::registry().with(filter);
    match config.log.format {
        LogFormat::Console => registry
            .with(fmt::layer().with_target(true).with_thread_ids(false))
            .init(),
        LogFormat::Json => registry.with(fmt::layer().json()).init(),
    }
    Ok(())
}
