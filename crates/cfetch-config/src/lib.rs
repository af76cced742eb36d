//! # cfetch-config
//!
//! Configuration management for cfetch.
//!
//! Loads configuration from:
//! 1. `~/.cfetch/config.toml` (global)
//! 2. `.cfetch/config.toml` (project-local, overrides global key by key)
//! 3. Environment variables (highest priority)

pub mod logging;
pub mod testing;

use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::{PoisonError, RwLock, RwLockReadGuard};
use tracing::debug;

/// Global config instance
static CONFIG: Lazy<RwLock<Config>> = Lazy::new(|| RwLock::new(Config::load().unwrap_or_default()));

/// Get global config (read-only)
pub fn config() -> RwLockReadGuard<'static, Config> {
    CONFIG.read().unwrap_or_else(PoisonError::into_inner)
}

/// Reload config from disk
pub fn reload() -> Result<(), ConfigError> {
    let new_config = Config::load()?;
    *CONFIG.write().unwrap_or_else(PoisonError::into_inner) = new_config;
    Ok(())
}

/// Project-local config location, relative to the working directory
pub const PROJECT_CONFIG: &str = ".cfetch/config.toml";

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),
    #[error("TOML render error: {0}")]
    Render(#[from] toml::ser::Error),
    #[error("invalid value for {var}: {value}")]
    InvalidEnv { var: &'static str, value: String },
}

/// Main configuration structure
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub engine: EngineSection,
    pub retry: RetrySection,
    pub output: OutputSection,
    pub log: LogSection,
}

impl Config {
    /// Load config from standard locations
    pub fn load() -> Result<Self, ConfigError> {
        let global = Self::global_config_path();
        let mut config = Self::load_from(global.as_deref(), Some(Path::new(PROJECT_CONFIG)))?;
        config.apply_env_overrides()?;
        Ok(config)
    }

    /// Layer the given files over the defaults. Missing files are skipped.
    pub fn load_from(global: Option<&Path>, project: Option<&Path>) -> Result<Self, ConfigError> {
        let mut merged = toml::Value::Table(toml::map::Map::new());
        for path in [global, project].into_iter().flatten() {
            if path.exists() {
                debug!("Loading config from {:?}", path);
                let contents = std::fs::read_to_string(path)?;
                let layer: toml::Value = toml::from_str(&contents)?;
                merge_values(&mut merged, layer);
            }
        }
        Ok(merged.try_into()?)
    }

    /// Global config path: ~/.cfetch/config.toml
    pub fn global_config_path() -> Option<PathBuf> {
        dirs::home_dir().map(|h| h.join(".cfetch/config.toml"))
    }

    /// Apply environment variable overrides
    pub fn apply_env_overrides(&mut self) -> Result<(), ConfigError> {
        self.apply_overrides(|var| std::env::var(var).ok())
    }

    fn apply_overrides<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&'static str) -> Option<String>,
    {
        fn parse<T: std::str::FromStr>(var: &'static str, value: String) -> Result<T, ConfigError> {
            value
                .trim()
                .parse()
                .map_err(|_| ConfigError::InvalidEnv { var, value })
        }

        if let Some(v) = lookup("CFETCH_FETCH_THREADS") {
            self.engine.fetch_threads = Some(parse("CFETCH_FETCH_THREADS", v)?);
        }
        if let Some(v) = lookup("CFETCH_DECODE_THREADS") {
            self.engine.decode_threads = Some(parse("CFETCH_DECODE_THREADS", v)?);
        }
        if let Some(v) = lookup("CFETCH_TIMEOUT_SECS") {
            self.engine.timeout_secs = parse("CFETCH_TIMEOUT_SECS", v)?;
        }
        if let Some(v) = lookup("CFETCH_MAX_RETRIES") {
            self.retry.max_retries = parse("CFETCH_MAX_RETRIES", v)?;
        }
        if let Some(v) = lookup("CFETCH_OUTPUT_DIR") {
            self.output.directory = PathBuf::from(v);
        }
        Ok(())
    }

    /// Generate default config TOML string
    pub fn default_toml() -> Result<String, ConfigError> {
        Ok(toml::to_string_pretty(&Config::default())?)
    }
}

/// Recursively overlay `overlay` onto `base`; tables merge, everything else replaces.
fn merge_values(base: &mut toml::Value, overlay: toml::Value) {
    match (base, overlay) {
        (toml::Value::Table(base), toml::Value::Table(overlay)) => {
            for (key, value) in overlay {
                match base.get_mut(&key) {
                    Some(existing) => merge_values(existing, value),
                    None => {
                        base.insert(key, value);
                    }
                }
            }
        }
        (base, overlay) => *base = overlay,
    }
}

/// Worker pool and run limits
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineSection {
    /// Threads serving the FETCH track (None = auto)
    pub fetch_threads: Option<usize>,
    /// Threads serving the DECODE_WRITE track (None = auto)
    pub decode_threads: Option<usize>,
    /// Wall-clock limit for a whole run
    pub timeout_secs: u64,
    /// FIFO lock hand-off in the scheduler
    pub fair_scheduling: bool,
}

impl Default for EngineSection {
    fn default() -> Self {
        Self {
            fetch_threads: None,
            decode_threads: None,
            timeout_secs: 3600,
            fair_scheduling: false,
        }
    }
}

/// Per-container retry budget
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetrySection {
    /// Retries after the first attempt; a budget of R allows R+1 attempts
    pub max_retries: u32,
    /// Delay before the first re-fetch; doubles per retry
    pub retry_delay_ms: u64,
    pub retry_max_delay_ms: u64,
    /// Unauthorized responses tolerated before the run is aborted (None = never)
    pub unauthorized_limit: Option<u32>,
}

impl Default for RetrySection {
    fn default() -> Self {
        Self {
            max_retries: 3,
            retry_delay_ms: 250,
            retry_max_delay_ms: 5_000,
            unauthorized_limit: None,
        }
    }
}

/// Where restored payloads go
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OutputSection {
    pub directory: PathBuf,
}

impl Default for OutputSection {
    fn default() -> Self {
        Self {
            directory: PathBuf::from("restored"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LogSection {
    /// error | warn | info | debug | trace
    pub level: String,
}

impl Default for LogSection {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}
