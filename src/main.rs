//! Cache Sweeper - keeps a file cache directory free of expired records
//!
//! Opens the file driver configured through the environment and runs the
//! expiry sweep until interrupted. Any number of processes may use the same
//! directory meanwhile; the sweep takes the same per-key locks they do.

use std::sync::Arc;

use anyhow::Context;
use tokio::signal;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use cache_engine::{spawn_cleanup_task, CacheConfig, Driver, FileDriver};

/// Main entry point for the cache sweeper.
///
/// # Startup Sequence
/// 1. Initialize tracing subscriber for logging
/// 2. Load configuration from environment variables
/// 3. Open the file driver on the configured directory
/// 4. Run one sweep immediately, then start the periodic sweep task
/// 5. Stop on SIGINT/SIGTERM
#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Defaults to "info" level, can be overridden with RUST_LOG env var
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "cache_engine=info,cache_sweeper=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Starting cache sweeper");

    let config = CacheConfig::from_env();
    info!(
        "Configuration loaded: directory={}, default_ttl={:?}, cleanup_interval={}s",
        config.directory.display(),
        config.default_ttl,
        config.cleanup_interval
    );

    let driver = Arc::new(
        FileDriver::from_config(&config)
            .with_context(|| format!("opening cache at {}", config.directory.display()))?,
    );

    let initial = {
        let driver = Arc::clone(&driver);
        tokio::task::spawn_blocking(move || driver.clean()).await??
    };
    info!(
        "Initial sweep removed {} expired entries, {} remain ({} bytes on disk)",
        initial,
        driver.count()?,
        driver.disk_usage()?
    );

    let cleanup_handle = spawn_cleanup_task(Arc::clone(&driver), config.cleanup_interval);

    shutdown_signal().await;

    cleanup_handle.abort();
    warn!("Sweep task aborted");

    let stats = driver.stats();
    info!(
        "Sweeper shutdown complete: {} entries, {} expirations",
        stats.total_entries, stats.expirations
    );
    Ok(())
}

/// Waits for shutdown signal (Ctrl+C or SIGTERM).
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(err) = signal::ctrl_c().await {
            warn!("Failed to install Ctrl+C handler: {}", err);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(err) => {
                warn!("Failed to install SIGTERM handler: {}", err);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, initiating shutdown...");
        }
        _ = terminate => {
            info!("Received SIGTERM, initiating shutdown...");
        }
    }
}
