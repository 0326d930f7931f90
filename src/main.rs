//! Tidemark binary entry point.
//!
//! Wires the full pipeline: store → buffered reporter → engine →
//! scheduler → configured HTTP sources, then waits for a shutdown
//! signal and tears everything down in order.

use std::sync::Arc;

use clap::Parser;
use tidemark::{
    AppConfig, ConsoleReporter, HttpSource, PersistentReporter, ReportingEngine, SampleStore,
    Scheduler,
};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Tidemark - Periodic Sampling Pipeline
#[derive(Parser, Debug)]
#[command(name = "tidemark", version, about, long_about = None)]
struct Cli {
    /// Path to configuration file
    #[arg(
        short,
        long,
        default_value = "configs/tidemark.yaml",
        env = "TIDEMARK_CONFIG"
    )]
    config: String,

    /// Sample database path (overrides config file)
    #[arg(long, env = "TIDEMARK_DB_PATH")]
    db_path: Option<String>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,tidemark=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("Tidemark - Periodic Sampling Pipeline");

    let cli = Cli::parse();

    tracing::info!("Loading configuration from: {}", cli.config);
    let mut config = AppConfig::load(&cli.config)?;
    if let Some(path) = cli.db_path {
        config.database.path = path;
    }

    tracing::info!(
        "Database: {} (flush every {:?}), {} sources",
        config.database.path,
        config.database.flush_interval,
        config.sources.len()
    );

    let store = SampleStore::new(&config.database.path);
    let buffered = PersistentReporter::new(store, config.database.flush_interval);

    let engine = ReportingEngine::new();
    engine
        .register(Arc::new(ConsoleReporter::new(config.console_prefix.clone())))
        .await?;
    // Registration opens the store; a locked or corrupt database file
    // aborts startup here with a non-zero exit.
    engine.register(Arc::new(buffered.clone())).await?;

    let scheduler = Scheduler::new(engine.clone());
    for entry in &config.sources {
        let source = Arc::new(HttpSource::new(entry.clone())?);
        let source_id = scheduler.schedule_source(source).await?;
        tracing::info!(
            source_id = %source_id,
            name = %entry.name,
            url = %entry.url,
            interval = ?entry.interval,
            "source scheduled"
        );
    }

    tracing::info!("Press Ctrl+C to shutdown");
    shutdown_signal().await;

    tracing::info!("Shutting down scheduler...");
    match scheduler.shutdown().await {
        Ok((_, None)) => {}
        Ok((_, Some(e))) => tracing::error!(error = %e, "a job terminated with an error"),
        Err(e) => tracing::error!(error = %e, "scheduler shutdown failed"),
    }

    tracing::info!("Shutting down reporters...");
    if let Err(e) = engine.shutdown().await {
        tracing::error!(error = %e, "reporter shutdown failed");
    }

    tracing::info!("Shutdown complete");
    Ok(())
}

/// Wait for Ctrl+C or SIGTERM.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "failed to install signal handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            tracing::info!("Received Ctrl+C signal");
        }
        _ = terminate => {
            tracing::info!("Received terminate signal");
        }
    }
}
