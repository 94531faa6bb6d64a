use std::path::PathBuf;

use anyhow::{Context, Result};

#[derive(Debug, Clone)]
pub struct Config {
    /// Directory of policy object YAML files.
    pub policy_dir: PathBuf,
    /// Optional directory of dependency declaration files.
    pub dependencies_dir: Option<PathBuf>,
    /// SQLite state database path.
    pub state_db: PathBuf,
    /// Seconds between revisions.
    pub interval_secs: u64,
    /// Executor worker-pool width; 1 means sequential.
    pub parallelism: usize,
    /// Code kinds served by the built-in noop driver.
    pub noop_driver_kinds: Vec<String>,
    pub log_level: String,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        let policy_dir = std::env::var("VERGE_POLICY_DIR")
            .unwrap_or_else(|_| "./policy".to_string())
            .into();

        let dependencies_dir = std::env::var("VERGE_DEPENDENCIES_DIR")
            .ok()
            .map(PathBuf::from);

        let state_db = std::env::var("VERGE_STATE_DB")
            .unwrap_or_else(|_| "./verge-state.db".to_string())
            .into();

        let interval_secs = match std::env::var("VERGE_INTERVAL") {
            Ok(value) => value
                .parse()
                .with_context(|| format!("invalid VERGE_INTERVAL '{value}'"))?,
            Err(_) => 30,
        };

        let parallelism = match std::env::var("VERGE_PARALLELISM") {
            Ok(value) => value
                .parse()
                .with_context(|| format!("invalid VERGE_PARALLELISM '{value}'"))?,
            Err(_) => 1,
        };

        let noop_driver_kinds = std::env::var("VERGE_NOOP_DRIVER_KINDS")
            .unwrap_or_else(|_| "noop".to_string())
            .split(',')
            .map(|kind| kind.trim().to_string())
            .filter(|kind| !kind.is_empty())
            .collect();

        let log_level = std::env::var("VERGE_LOG_LEVEL").unwrap_or_else(|_| "info".to_string());

        Ok(Self {
            policy_dir,
            dependencies_dir,
            state_db,
            interval_secs,
            parallelism,
            noop_driver_kinds,
            log_level,
        })
    }
}
