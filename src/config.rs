//! Configuration System
//!
//! Handles loading configuration from files and environment variables.
//! Supports TOML config files and environment variable overrides.

use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::model::{Domain, Section};

const ENV_PREFIX: &str = "CAMPUS_PULSE_";

/// Main configuration structure
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub backend: BackendConfig,

    #[serde(default)]
    pub push: PushConfig,

    #[serde(default)]
    pub scheduler: SchedulerConfig,

    #[serde(default)]
    pub history: HistoryConfig,

    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Backend REST API configuration
#[derive(Debug, Clone, Deserialize)]
pub struct BackendConfig {
    #[serde(default = "default_base_url")]
    pub base_url: String,

    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,

    /// Last path segment of the per-entity history endpoint
    #[serde(default = "default_history_segment")]
    pub history_segment: String,
}

fn default_base_url() -> String {
    "http://localhost:5000/api".to_string()
}

fn default_request_timeout() -> u64 {
    10
}

fn default_history_segment() -> String {
    "historique".to_string()
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            request_timeout_secs: default_request_timeout(),
            history_segment: default_history_segment(),
        }
    }
}

impl BackendConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

/// Push channel configuration
#[derive(Debug, Clone, Deserialize)]
pub struct PushConfig {
    #[serde(default = "default_push_enabled")]
    pub enabled: bool,

    #[serde(default = "default_push_url")]
    pub url: String,

    #[serde(default = "default_reconnect_delay")]
    pub reconnect_delay_ms: u64,

    #[serde(default = "default_max_reconnect_delay")]
    pub max_reconnect_delay_ms: u64,
}

fn default_push_enabled() -> bool {
    true
}

fn default_push_url() -> String {
    "ws://localhost:5000/socket.io/?EIO=4&transport=websocket".to_string()
}

fn default_reconnect_delay() -> u64 {
    2000
}

fn default_max_reconnect_delay() -> u64 {
    30_000
}

impl Default for PushConfig {
    fn default() -> Self {
        Self {
            enabled: default_push_enabled(),
            url: default_push_url(),
            reconnect_delay_ms: default_reconnect_delay(),
            max_reconnect_delay_ms: default_max_reconnect_delay(),
        }
    }
}

impl PushConfig {
    pub fn reconnect_delay(&self) -> Duration {
        Duration::from_millis(self.reconnect_delay_ms)
    }

    pub fn max_reconnect_delay(&self) -> Duration {
        Duration::from_millis(self.max_reconnect_delay_ms.max(self.reconnect_delay_ms))
    }
}

/// Refresh scheduling configuration
#[derive(Debug, Clone, Deserialize)]
pub struct SchedulerConfig {
    #[serde(default = "default_poll_interval")]
    pub poll_interval_secs: u64,

    /// Upper bound on the snapshot fetch and on each history request
    #[serde(default = "default_fetch_timeout")]
    pub fetch_timeout_secs: u64,

    #[serde(default)]
    pub initial_section: Section,

    /// Mark inactive domains stale on push instead of fetching right away
    #[serde(default)]
    pub defer_inactive_push: bool,
}

fn default_poll_interval() -> u64 {
    30
}

fn default_fetch_timeout() -> u64 {
    15
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            poll_interval_secs: default_poll_interval(),
            fetch_timeout_secs: default_fetch_timeout(),
            initial_section: Section::default(),
            defer_inactive_push: false,
        }
    }
}

impl SchedulerConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs)
    }

    pub fn fetch_timeout(&self) -> Duration {
        Duration::from_secs(self.fetch_timeout_secs)
    }
}

/// Chart history buffer configuration
#[derive(Debug, Clone, Deserialize)]
pub struct HistoryConfig {
    #[serde(default = "default_history_capacity")]
    pub default_capacity: usize,

    /// Per-domain overrides, keyed by domain name
    #[serde(default)]
    pub capacity: BTreeMap<String, usize>,
}

fn default_history_capacity() -> usize {
    360 // 3 hours at the default 30s poll interval
}

impl Default for HistoryConfig {
    fn default() -> Self {
        Self {
            default_capacity: default_history_capacity(),
            capacity: BTreeMap::new(),
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,

    #[serde(default = "default_log_format")]
    pub format: String,
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "pretty".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
        }
    }
}

impl LoggingConfig {
    pub fn is_json(&self) -> bool {
        self.format.eq_ignore_ascii_case("json")
    }
}

impl Config {
    /// Load configuration from a file
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::Io {
            path: path.to_path_buf(),
            error: e.to_string(),
        })?;

        let config: Config = toml::from_str(&content).map_err(|e| ConfigError::Parse {
            path: path.to_path_buf(),
            error: e.to_string(),
        })?;

        Ok(config)
    }

    /// Load configuration from environment variables only
    pub fn from_env() -> Self {
        let mut config = Config::default();
        config.apply_env_overrides();
        config
    }

    /// Load configuration with environment variable overrides
    pub fn load_with_env(path: &Path) -> Result<Self, ConfigError> {
        let mut config = Self::load(path)?;
        config.apply_env_overrides();
        Ok(config)
    }

    /// Load from default locations or environment
    pub fn load_default() -> Self {
        let config_paths: Vec<PathBuf> = [
            dirs::config_dir().map(|p| p.join("campus-pulse").join("config.toml")),
            Some(PathBuf::from("/etc/campus-pulse/config.toml")),
            Some(PathBuf::from("./campus-pulse.toml")),
        ]
        .into_iter()
        .flatten()
        .collect();

        Self::load_first(&config_paths)
    }

    /// Load the first existing file of `paths` that parses
    ///
    /// Unreadable or malformed files are logged and skipped. Falls back to
    /// defaults with environment overrides.
    pub fn load_first(paths: &[PathBuf]) -> Self {
        for path in paths {
            if path.exists() {
                match Self::load_with_env(path) {
                    Ok(config) => {
                        tracing::info!(path = ?path, "Loaded config");
                        return config;
                    }
                    Err(e) => {
                        tracing::warn!(path = ?path, error = %e, "Failed to load config");
                    }
                }
            }
        }

        tracing::info!("Using default config with environment overrides");
        Self::from_env()
    }

    /// Reject settings that would stall or disable the refresh loop
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.scheduler.poll_interval_secs == 0 {
            return Err(ConfigError::invalid("scheduler.poll_interval_secs", "must be > 0"));
        }
        if self.scheduler.fetch_timeout_secs == 0 {
            return Err(ConfigError::invalid("scheduler.fetch_timeout_secs", "must be > 0"));
        }
        if self.history.default_capacity == 0 {
            return Err(ConfigError::invalid("history.default_capacity", "must be > 0"));
        }
        for (name, capacity) in &self.history.capacity {
            if name.parse::<Domain>().is_err() {
                return Err(ConfigError::invalid(
                    format!("history.capacity.{}", name),
                    "unknown domain",
                ));
            }
            if *capacity == 0 {
                return Err(ConfigError::invalid(
                    format!("history.capacity.{}", name),
                    "must be > 0",
                ));
            }
        }
        Ok(())
    }

    /// Apply environment variable overrides to an existing config
    fn apply_env_overrides(&mut self) {
        self.apply_overrides(|key| std::env::var(format!("{}{}", ENV_PREFIX, key)).ok());
    }

    /// Apply overrides from `lookup`, keyed by variable name without prefix
    ///
    /// Unparsable numeric or boolean values are ignored.
    fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        // Backend overrides
        if let Some(url) = lookup("BACKEND_URL") {
            self.backend.base_url = url;
        }

        // Push overrides
        if let Some(url) = lookup("PUSH_URL") {
            self.push.url = url;
        }
        if let Some(enabled) = lookup("PUSH_ENABLED") {
            if let Ok(b) = enabled.parse() {
                self.push.enabled = b;
            }
        }

        // Scheduler overrides
        if let Some(secs) = lookup("POLL_INTERVAL_SECS") {
            if let Ok(s) = secs.parse() {
                self.scheduler.poll_interval_secs = s;
            }
        }
        if let Some(secs) = lookup("FETCH_TIMEOUT_SECS") {
            if let Ok(s) = secs.parse() {
                self.scheduler.fetch_timeout_secs = s;
            }
        }

        // History overrides
        if let Some(capacity) = lookup("HISTORY_CAPACITY") {
            if let Ok(c) = capacity.parse() {
                self.history.default_capacity = c;
            }
        }

        // Logging overrides
        if let Some(level) = lookup("LOG_LEVEL") {
            self.logging.level = level;
        }
        if let Some(format) = lookup("LOG_FORMAT") {
            self.logging.format = format;
        }
    }
}

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file {path:?}: {error}")]
    Io { path: PathBuf, error: String },

    #[error("Failed to parse config file {path:?}: {error}")]
    Parse { path: PathBuf, error: String },

    #[error("Invalid setting {field}: {reason}")]
    Invalid { field: String, reason: String },
}

impl ConfigError {
    fn invalid(field: impl Into<String>, reason: impl Into<String>) -> Self {
        ConfigError::Invalid {
            field: field.into(),
            reason: reason.into(),
        }
    }
}

/// Generate a default config file content
pub fn generate_default_config() -> String {
    r#"# Campus Pulse Configuration
#
# Environment variables override these settings:
# - CAMPUS_PULSE_BACKEND_URL
# - CAMPUS_PULSE_PUSH_URL
# - CAMPUS_PULSE_PUSH_ENABLED
# - CAMPUS_PULSE_POLL_INTERVAL_SECS
# - CAMPUS_PULSE_FETCH_TIMEOUT_SECS
# - CAMPUS_PULSE_HISTORY_CAPACITY
# - CAMPUS_PULSE_LOG_LEVEL
# - CAMPUS_PULSE_LOG_FORMAT

[backend]
# Base URL of the campus REST API
base_url = "http://localhost:5000/api"

# Per-request timeout in seconds
request_timeout_secs = 10

# Last path segment of /{domain}/{id}/<segment> history requests
history_segment = "historique"

[push]
# Listen for Socket.IO update events
enabled = true

# Socket.IO endpoint (Engine.IO v4 over WebSocket)
url = "ws://localhost:5000/socket.io/?EIO=4&transport=websocket"

# Reconnect delay, doubled after each failure up to the maximum (ms)
reconnect_delay_ms = 2000
max_reconnect_delay_ms = 30000

[scheduler]
# Fallback polling interval in seconds
poll_interval_secs = 30

# A snapshot fetch that takes longer than this fails and is retried next
# tick; each history request gets the same bound but never fails the refresh
fetch_timeout_secs = 15

# Section shown at startup: overview, parking, buildings, wifi, weather, transport
initial_section = "overview"

# When true, push events for domains outside the active section only mark
# them stale; they are fetched on the next tick or when their section opens
defer_inactive_push = false

[history]
# Samples kept per chart series
default_capacity = 360

# Per-domain overrides
# [history.capacity]
# transport-bus = 120

[logging]
# Log level: trace, debug, info, warn, error
level = "info"

# Log format: pretty (for development) or json (for production)
format = "pretty"
"#
    .to_string()
}
