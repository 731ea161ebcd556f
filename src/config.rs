use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

use crate::images::ImageDedup;
use crate::orphans::ReclaimPolicy;
use crate::relation::LinkPolicy;

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub db: DbConfig,
    #[serde(default)]
    pub policy: Policy,
    #[serde(default)]
    pub maintenance: MaintenanceConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DbConfig {
    pub path: PathBuf,
    #[serde(default = "default_busy_timeout_secs")]
    pub busy_timeout_secs: u64,
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
}

fn default_busy_timeout_secs() -> u64 {
    5
}
fn default_max_connections() -> u32 {
    5
}

/// Behavioral switches for the places where the legacy store was
/// inconsistent. Passed by value into every write path.
#[derive(Debug, Deserialize, Clone, Copy, Default, PartialEq, Eq)]
pub struct Policy {
    #[serde(default)]
    pub link: LinkPolicy,
    #[serde(default)]
    pub reclaim_on_delete: ReclaimPolicy,
    #[serde(default)]
    pub image_dedup: ImageDedup,
}

#[derive(Debug, Deserialize, Clone, Default)]
pub struct MaintenanceConfig {
    /// Sweep every dimension kind for orphans when the store is opened.
    #[serde(default)]
    pub sweep_on_open: bool,
}

impl Config {
    /// A config pointing at `db_path` with every other setting defaulted.
    pub fn minimal(db_path: impl Into<PathBuf>) -> Self {
        Self {
            db: DbConfig {
                path: db_path.into(),
                busy_timeout_secs: default_busy_timeout_secs(),
                max_connections: default_max_connections(),
            },
            policy: Policy::default(),
            maintenance: MaintenanceConfig::default(),
        }
    }
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    parse_config(&content)
}

pub fn parse_config(content: &str) -> Result<Config> {
    let config: Config = toml::from_str(content).with_context(|| "Failed to parse config file")?;

    if config.db.path.as_os_str().is_empty() {
        anyhow::bail!("db.path must not be empty");
    }

    if config.db.max_connections == 0 {
        anyhow::bail!("db.max_connections must be >= 1");
    }

    Ok(config)
}
