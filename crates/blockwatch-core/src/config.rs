//! Monitor configuration.
//!
//! Values come from, in order: built-in defaults, the first config file
//! found (`blockwatch.toml`, `.blockwatch.toml`, then
//! `<config dir>/blockwatch/config.toml`), and environment variables.

use crate::error::BlockError;
use crate::identifier::{DEFAULT_SESSION_HOURS, MAX_SESSION_HOURS};
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::info;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct MonitorConfig {
    pub blocks: BlocksConfig,
    pub live: LiveConfig,
    pub paths: PathsConfig,
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BlocksConfig {
    /// Length of a billing block.
    pub window_hours: f64,
    /// How many days of history the block list shows.
    pub recent_days: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LiveConfig {
    pub poll_interval_secs: u64,
    pub secondary_refresh_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PathsConfig {
    /// Empty means the standard Claude project directories.
    pub data_dirs: Vec<PathBuf>,
    pub secondary_dirs: Vec<PathBuf>,
    pub log_directory: PathBuf,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
    pub format: String,
    pub output: String,
}

impl Default for BlocksConfig {
    fn default() -> Self {
        Self {
            window_hours: DEFAULT_SESSION_HOURS,
            recent_days: 3,
        }
    }
}

impl Default for LiveConfig {
    fn default() -> Self {
        Self {
            poll_interval_secs: 1,
            secondary_refresh_secs: 5,
        }
    }
}

impl Default for PathsConfig {
    fn default() -> Self {
        Self {
            data_dirs: Vec::new(),
            secondary_dirs: Vec::new(),
            log_directory: dirs::data_local_dir()
                .unwrap_or_else(|| PathBuf::from("."))
                .join("blockwatch")
                .join("logs"),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "warn".to_string(),
            format: "pretty".to_string(),
            output: "file".to_string(),
        }
    }
}

impl MonitorConfig {
    pub fn config_candidates() -> Vec<PathBuf> {
        let mut candidates = vec![
            PathBuf::from("blockwatch.toml"),
            PathBuf::from(".blockwatch.toml"),
        ];
        if let Some(dir) = dirs::config_dir() {
            candidates.push(dir.join("blockwatch").join("config.toml"));
        }
        candidates
    }

    pub fn load() -> Result<Self> {
        let mut config = Self::default();

        for path in Self::config_candidates() {
            if path.exists() {
                info!(config_file = %path.display(), "loading configuration from file");
                config = Self::load_from_file(&path)?;
                break;
            }
        }

        config.apply_env_overrides()?;
        config.validate()?;

        Ok(config)
    }

    pub fn load_from_file(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))
    }

    pub fn save_to_file(&self, path: &Path) -> Result<()> {
        let content = toml::to_string_pretty(self).context("Failed to serialize config")?;
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create {}", parent.display()))?;
        }
        fs::write(path, content)
            .with_context(|| format!("Failed to write config file: {}", path.display()))
    }

    pub fn apply_env_overrides(&mut self) -> Result<()> {
        if let Ok(val) = env::var("BLOCKWATCH_WINDOW_HOURS") {
            self.blocks.window_hours = val.parse().context("Invalid BLOCKWATCH_WINDOW_HOURS")?;
        }
        if let Ok(val) = env::var("BLOCKWATCH_RECENT_DAYS") {
            self.blocks.recent_days = val.parse().context("Invalid BLOCKWATCH_RECENT_DAYS")?;
        }
        if let Ok(val) = env::var("BLOCKWATCH_POLL_INTERVAL") {
            self.live.poll_interval_secs =
                val.parse().context("Invalid BLOCKWATCH_POLL_INTERVAL")?;
        }
        if let Ok(val) = env::var("BLOCKWATCH_SECONDARY_REFRESH") {
            self.live.secondary_refresh_secs =
                val.parse().context("Invalid BLOCKWATCH_SECONDARY_REFRESH")?;
        }
        if let Ok(val) = env::var("CLAUDE_CONFIG_DIR") {
            let dirs: Vec<PathBuf> = val
                .split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(|s| PathBuf::from(shellexpand::tilde(s).as_ref()).join("projects"))
                .collect();
            if !dirs.is_empty() {
                self.paths.data_dirs = dirs;
            }
        }

        if let Ok(val) = env::var("LOG_LEVEL") {
            self.logging.level = val;
        }
        if let Ok(val) = env::var("LOG_FORMAT") {
            self.logging.format = val;
        }
        if let Ok(val) = env::var("LOG_OUTPUT") {
            self.logging.output = val;
        }

        Ok(())
    }

    pub fn validate(&self) -> Result<(), BlockError> {
        let hours = self.blocks.window_hours;
        if !hours.is_finite() || hours <= 0.0 {
            return Err(BlockError::InvalidConfiguration(format!(
                "blocks.window_hours must be positive, got {}",
                hours
            )));
        }
        if hours > MAX_SESSION_HOURS {
            return Err(BlockError::InvalidConfiguration(format!(
                "blocks.window_hours must be at most {}, got {}",
                MAX_SESSION_HOURS, hours
            )));
        }
        if self.live.poll_interval_secs == 0 {
            return Err(BlockError::InvalidConfiguration(
                "live.poll_interval_secs must be at least 1".to_string(),
            ));
        }
        if !["pretty", "json"].contains(&self.logging.format.as_str()) {
            return Err(BlockError::InvalidConfiguration(format!(
                "logging.format must be pretty or json, got {}",
                self.logging.format
            )));
        }
        if !["file", "console"].contains(&self.logging.output.as_str()) {
            return Err(BlockError::InvalidConfiguration(format!(
                "logging.output must be file or console, got {}",
                self.logging.output
            )));
        }
        Ok(())
    }

    pub fn window_minutes(&self) -> f64 {
        self.blocks.window_hours * 60.0
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.live.poll_interval_secs)
    }

    pub fn secondary_refresh(&self) -> Duration {
        Duration::from_secs(self.live.secondary_refresh_secs)
    }
}
