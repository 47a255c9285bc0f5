//! TOML configuration.
//!
//! Resolution order: an explicit `--config` path, then the path in
//! `VANTAGEWATCH_CONFIG`, then `/etc/vantagewatch/vantagewatch.toml`, then
//! compiled-in defaults. Every section and field may be omitted.

use crate::detect::classifier::Thresholds;
use crate::probes::poller::ResultPoller;
use crate::probes::{clean_host, CheckMode};
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, info, warn};

pub const CONFIG_ENV: &str = "VANTAGEWATCH_CONFIG";
pub const SYSTEM_CONFIG_PATH: &str = "/etc/vantagewatch/vantagewatch.toml";

// ---------------------------------------------------------------------------
// Top-level config
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub probing: ProbingConfig,
    #[serde(default)]
    pub poll: PollConfig,
    #[serde(default)]
    pub detection: Thresholds,
    #[serde(default)]
    pub monitor: MonitorConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub api: ApiConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl Config {
    /// Load configuration from a TOML file at `path`.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config file: {}", path.display()))?;
        let config: Self = toml::from_str(&content)
            .with_context(|| format!("failed to parse config file: {}", path.display()))?;
        info!(path = %path.display(), targets = config.monitor.targets.len(), "Loaded configuration");
        Ok(config)
    }

    /// An explicit path must load; the fallbacks only warn.
    pub fn resolve(explicit: Option<&Path>) -> Result<Self> {
        match explicit {
            Some(path) => Self::load(path),
            None => Ok(Self::load_or_default()),
        }
    }

    pub fn load_or_default() -> Self {
        if let Ok(env_path) = std::env::var(CONFIG_ENV) {
            let path = Path::new(&env_path);
            match Self::load(path) {
                Ok(cfg) => return cfg,
                Err(e) => {
                    warn!(
                        path = %path.display(),
                        error = %e,
                        "{} set but file could not be loaded, trying fallback", CONFIG_ENV
                    );
                }
            }
        }

        let system_path = Path::new(SYSTEM_CONFIG_PATH);
        if system_path.exists() {
            match Self::load(system_path) {
                Ok(cfg) => return cfg,
                Err(e) => {
                    warn!(
                        path = %system_path.display(),
                        error = %e,
                        "System config file exists but could not be loaded, using defaults"
                    );
                }
            }
        }

        debug!("No config file found, using compiled-in defaults");
        Self::default()
    }

    pub fn poller(&self) -> ResultPoller {
        ResultPoller::new(
            self.poll.retries,
            Duration::from_millis(self.poll.delay_ms),
            Duration::from_secs(self.probing.request_timeout_secs),
        )
    }
}

// ---------------------------------------------------------------------------
// Probing service
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ProbingConfig {
    pub base_url: String,
    /// Per-call timeout for the probing service.
    pub request_timeout_secs: u64,
    /// Default vantage point count per check.
    pub max_nodes: u32,
}

impl Default for ProbingConfig {
    fn default() -> Self {
        Self {
            base_url: "https://check-host.net".to_string(),
            request_timeout_secs: 15,
            max_nodes: 50,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PollConfig {
    pub retries: u32,
    pub delay_ms: u64,
}

impl Default for PollConfig {
    fn default() -> Self {
        Self {
            retries: 10,
            delay_ms: 2000,
        }
    }
}

// ---------------------------------------------------------------------------
// Monitor
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MonitorConfig {
    pub interval_secs: u64,
    pub targets: Vec<TargetConfig>,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            interval_secs: 600,
            targets: Vec::new(),
        }
    }
}

/// One target checked on every monitoring cycle.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TargetConfig {
    pub host: String,
    pub mode: CheckMode,
    /// TCP only.
    #[serde(default)]
    pub port: Option<u16>,
}

impl TargetConfig {
    pub const DEFAULT_TCP_PORT: u16 = 443;

    pub fn port(&self) -> u16 {
        self.port.unwrap_or(Self::DEFAULT_TCP_PORT)
    }

    /// Normalised target string baselines and check history are keyed by.
    pub fn label(&self) -> String {
        match self.mode {
            CheckMode::Http => self.host.trim().to_string(),
            CheckMode::Ping => clean_host(&self.host),
            CheckMode::Tcp => format!("{}:{}", clean_host(&self.host), self.port()),
        }
    }
}

impl std::fmt::Display for TargetConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.mode {
            CheckMode::Tcp => write!(f, "tcp {}:{}", self.host, self.port()),
            mode => write!(f, "{} {}", mode, self.host),
        }
    }
}

// ---------------------------------------------------------------------------
// Storage, API, logging
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// JSON baseline document.
    pub baseline_path: PathBuf,
    /// SQLite incident and check history ledger.
    pub db_path: PathBuf,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            baseline_path: PathBuf::from("data/baselines.json"),
            db_path: PathBuf::from("data/vantagewatch.db"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ApiConfig {
    pub bind: String,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            bind: "0.0.0.0:8080".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Default filter when `RUST_LOG` is unset.
    pub level: String,
    /// Emit JSON lines instead of human-readable output.
    pub json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: false,
        }
    }
}
