//! GasWatch - Gas leak alert dispatcher
//!
//! Reads detector lines from stdin, mirrors them into the status store and
//! pushes an alert to every registered device when a leak is reported.

use anyhow::Result;
use chrono::Utc;
use clap::Parser;
use gaswatch::{
    app::App,
    bridge,
    cli::Cli,
    config::{Config, LogFormat},
};
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{debug, error, info, warn};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Load configuration by layering sources: defaults, file, environment, and CLI args.
    let config = match Config::load(&cli) {
        Ok(config) => config,
        Err(err) => {
            tracing_subscriber::fmt().init();
            error!("Failed to load configuration: {:#}", err);
            std::process::exit(1);
        }
    };

    init_logging(&config);

    info!("GasWatch starting up...");
    info!(
        status_path = %config.status.path,
        cooldown_seconds = config.alerting.cooldown_seconds,
        max_attempts = config.dispatch.max_attempts,
        max_concurrency = config.dispatch.max_concurrency,
        batch_timeout_seconds = config.dispatch.batch_timeout_seconds,
        transport = %config.transport.kind,
        subscriber_store = ?config.subscribers.store_path,
        metrics_enabled = config.metrics.enabled,
        "Configuration loaded."
    );

    let app = App::builder(config).build().await?;
    let Some(store) = app.status_store().cloned() else {
        anyhow::bail!("the built-in status store is required to read detector input");
    };
    let path = app.status_path().to_string();

    info!("GasWatch initialized. Reading detector lines from stdin...");
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let input_closed = loop {
        tokio::select! {
            biased;
            _ = tokio::signal::ctrl_c() => {
                info!("Shutdown signal received.");
                break false;
            }
            line = lines.next_line() => match line {
                Ok(Some(line)) => {
                    if line.trim().is_empty() {
                        continue;
                    }
                    match bridge::parse_line(&line, Utc::now()) {
                        Ok(value) => {
                            debug!(line = %line, "Detector line accepted.");
                            store.set(&path, value);
                        }
                        Err(e) => warn!(line = %line, error = %e, "Skipping unreadable detector line."),
                    }
                }
                Ok(None) => {
                    info!("Detector input closed.");
                    break true;
                }
                Err(e) => {
                    error!(error = %e, "Failed to read detector input.");
                    break false;
                }
            }
        }
    };

    if input_closed {
        app.drain().await;
    } else {
        app.shutdown().await;
    }
    Ok(())
}

fn init_logging(config: &Config) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.log_level));
    let builder = tracing_subscriber::fmt().with_env_filter(filter).with_target(false);
    match config.log_format {
        LogFormat::Json => builder.json().init(),
        LogFormat::Text => builder.init(),
    }
}
