//! verge-controller: the revision loop.
//!
//! Loads the policy (objects + dependency declarations) from disk on
//! every tick and runs one revision against the state store. Single
//! writer: one revision at a time advances policy and actual state.

mod config;
mod loader;
mod logging;

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use tokio::sync::watch;
use tracing::{error, info, warn};

use verge_engine::{DriverRegistry, Executor, NoopDriver, RevisionDriver, SqliteStore};
use verge_eventlog::EventLog;

use crate::config::Config;

#[tokio::main]
async fn main() -> Result<()> {
    let config = Config::from_env()?;
    logging::init(&config.log_level);

    info!(
        policy_dir = %config.policy_dir.display(),
        state_db = %config.state_db.display(),
        interval_secs = config.interval_secs,
        parallelism = config.parallelism,
        "Starting controller"
    );

    let store = Arc::new(SqliteStore::open(&config.state_db)?);
    let mut registry = DriverRegistry::new();
    for kind in &config.noop_driver_kinds {
        registry.register(kind.clone(), Arc::new(NoopDriver));
    }

    let executor = if config.parallelism > 1 {
        Executor::parallel(config.parallelism)
    } else {
        Executor::sequential()
    };
    let reconciler = RevisionDriver::new(store, Arc::new(registry), EventLog::new())
        .with_executor(executor);

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            let _ = shutdown_tx.send(true);
        }
    });

    run(&config, &reconciler, shutdown_rx).await;
    info!("Controller stopped");
    Ok(())
}

/// Revision loop: tick, load, reconcile, until shutdown.
async fn run(config: &Config, reconciler: &RevisionDriver, mut shutdown: watch::Receiver<bool>) {
    let mut interval = tokio::time::interval(Duration::from_secs(config.interval_secs.max(1)));

    loop {
        tokio::select! {
            _ = interval.tick() => {
                let policy = match loader::load_policy(config) {
                    Ok(policy) => policy,
                    Err(err) => {
                        warn!(error = %err, "Policy load failed, skipping this tick");
                        continue;
                    }
                };
                match reconciler.run(&policy, Some(shutdown.clone())).await {
                    Ok(summary) => {
                        if summary.resolution.rejected_count() > 0 {
                            warn!(
                                revision = %summary.revision,
                                rejected = summary.resolution.rejected_count(),
                                "Some dependencies were rejected"
                            );
                        }
                        if summary.stats.cancelled {
                            info!(revision = %summary.revision, "Revision cancelled mid-apply");
                        }
                    }
                    Err(err) => {
                        error!(error = %err, "Revision failed");
                    }
                }
            }
            _ = shutdown.changed() => {
                if *shutdown.borrow() {
                    info!("Controller shutting down");
                    break;
                }
            }
        }
    }
}
