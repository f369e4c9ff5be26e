//! Memory relief configuration.
//!
//! Loaded from TOML. Every field has a default, so an empty file is valid.

use crate::eligibility::RECENT_NAVIGATION_WINDOW;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Default hard RSS limit: critical relief starts here (48 MB)
const DEFAULT_HARD_LIMIT: usize = 48 * 1024 * 1024;

/// Default critical RSS limit: still above this after relief means give up (64 MB)
const DEFAULT_CRITICAL_LIMIT: usize = 64 * 1024 * 1024;

/// RSS monitor thresholds
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MonitorConfig {
    /// How often to sample RSS
    pub poll_interval_ms: u64,
    /// Pressure levels are computed relative to this limit
    pub hard_limit_bytes: usize,
    /// RSS above this after a critical pass counts as failed recovery
    pub critical_limit_bytes: usize,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: 500,
            hard_limit_bytes: DEFAULT_HARD_LIMIT,
            critical_limit_bytes: DEFAULT_CRITICAL_LIMIT,
        }
    }
}

/// Complete memory relief configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReliefConfig {
    /// Navigations completed within this window keep the process alive
    pub recent_navigation_window_secs: u64,

    /// A scheduled collection within this interval of the last pass is coalesced
    pub gc_coalesce_interval_ms: u64,

    /// Font data unused for this long is purged by noncritical relief
    pub font_inactivity_secs: u64,

    /// Abort when a critical pass leaves RSS above the critical limit
    pub terminate_on_failed_recovery: bool,

    /// Threads that get their own allocator trim task
    pub dedicated_threads: Vec<String>,

    pub monitor: MonitorConfig,
}

impl Default for ReliefConfig {
    fn default() -> Self {
        Self {
            recent_navigation_window_secs: RECENT_NAVIGATION_WINDOW.as_secs(),
            gc_coalesce_interval_ms: 1000,
            font_inactivity_secs: 60,
            terminate_on_failed_recovery: true,
            dedicated_threads: vec!["scrolling".to_string()],
            monitor: MonitorConfig::default(),
        }
    }
}

impl ReliefConfig {
    /// Read and validate a TOML file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path.as_ref())?;
        Self::from_toml_str(&text)
    }

    /// Parse and validate TOML text.
    pub fn from_toml_str(text: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    pub fn recent_navigation_window(&self) -> Duration {
        Duration::from_secs(self.recent_navigation_window_secs)
    }

    pub fn gc_coalesce_interval(&self) -> Duration {
        Duration::from_millis(self.gc_coalesce_interval_ms)
    }

    pub fn font_inactivity(&self) -> Duration {
        Duration::from_secs(self.font_inactivity_secs)
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.recent_navigation_window_secs == 0 {
            return Err(ConfigError::ZeroNavigationWindow);
        }
        if self.monitor.poll_interval_ms == 0 {
            return Err(ConfigError::ZeroPollInterval);
        }
        if self.monitor.hard_limit_bytes == 0
            || self.monitor.hard_limit_bytes > self.monitor.critical_limit_bytes
        {
            return Err(ConfigError::UnorderedLimits {
                hard: self.monitor.hard_limit_bytes,
                critical: self.monitor.critical_limit_bytes,
            });
        }
        if let Some(name) = self.dedicated_threads.iter().find(|n| n.trim().is_empty()) {
            return Err(ConfigError::InvalidThreadName(name.clone()));
        }
        Ok(())
    }
}

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid TOML: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Recent navigation window must be non-zero")]
    ZeroNavigationWindow,

    #[error("Monitor poll interval must be non-zero")]
    ZeroPollInterval,

    #[error("Hard limit ({hard}) must be non-zero and at most the critical limit ({critical})")]
    UnorderedLimits { hard: usize, critical: usize },

    #[error("Invalid dedicated thread name: {0:?}")]
    InvalidThreadName(String),
}
