//! Host temperature monitoring agent.
//!
//! Registers this machine in the sink's `computers` table, then polls the
//! configured sensor source and uploads temperature readings until
//! interrupted. On Ctrl+C the host is marked offline before exit.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use clap::Parser;
use tokio::sync::watch;

use tempwatch_agent::agent::Agent;
use tempwatch_agent::config::AgentConfig;
use tempwatch_agent::registrar::Registrar;
use tempwatch_agent::sink::SinkClient;
use tempwatch_agent::source;
use tempwatch_agent::uploader::Uploader;
use tempwatch_common::config::LoggingConfig;

/// CLI arguments for the agent.
#[derive(Parser, Debug)]
#[command(about = "Host temperature monitoring agent")]
struct AgentArgs {
    /// Path to configuration file.
    #[arg(short, long, default_value = "tempwatch.json5")]
    config: PathBuf,

    /// Override log level (trace, debug, info, warn, error).
    #[arg(long)]
    log_level: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = AgentArgs::parse();

    let config = AgentConfig::load(&args.config).map_err(|e| anyhow::anyhow!("{}", e))?;

    // CLI log level wins over the config file.
    let log_config = match args.log_level {
        Some(level) => LoggingConfig {
            level,
            ..config.logging.clone()
        },
        None => config.logging.clone(),
    };
    tempwatch_common::init_tracing(&log_config).map_err(|e| anyhow::anyhow!("{}", e))?;

    let hostname = config.agent.get_hostname();
    let ip_address = config.agent.get_ip_address();

    tracing::info!(
        version = env!("CARGO_PKG_VERSION"),
        host = %hostname,
        ip = %ip_address,
        interval_secs = config.agent.poll_interval_secs,
        "starting tempwatch agent"
    );

    let sink = Arc::new(SinkClient::new(&config.sink).map_err(|e| anyhow::anyhow!("{}", e))?);
    let agent = Agent::new(
        Registrar::new(sink.clone()),
        Uploader::new(sink),
        source::build(&config.source),
        hostname,
        ip_address,
        Duration::from_secs(config.agent.poll_interval_secs),
    );

    // Ctrl+C flips the shutdown channel; the agent interrupts its sleep,
    // marks the host offline, and returns.
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(async move {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "failed to listen for Ctrl+C");
            return;
        }
        tracing::info!("received shutdown signal");
        let _ = shutdown_tx.send(true);
    });

    agent.run(shutdown_rx).await?;

    tracing::info!("goodbye");
    Ok(())
}
