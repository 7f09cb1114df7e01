//! Configuration System
//!
//! Handles loading configuration from files and environment variables.
//! Supports TOML config files and environment variable overrides.

use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Main configuration structure
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub realtime: RealtimeConfig,

    #[serde(default)]
    pub refresh: RefreshConfig,

    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Realtime connection configuration
#[derive(Debug, Clone, Deserialize)]
pub struct RealtimeConfig {
    #[serde(default = "default_url")]
    pub url: String,

    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_ms: u64,

    #[serde(default = "default_reconnect_base_delay")]
    pub reconnect_base_delay_ms: u64,

    #[serde(default = "default_max_reconnect_attempts")]
    pub max_reconnect_attempts: u32,
}

fn default_url() -> String {
    "ws://localhost:5000/ws".to_string()
}

fn default_connect_timeout() -> u64 {
    10_000 // 10 seconds
}

fn default_reconnect_base_delay() -> u64 {
    1_000 // 1 second
}

fn default_max_reconnect_attempts() -> u32 {
    5
}

impl Default for RealtimeConfig {
    fn default() -> Self {
        Self {
            url: default_url(),
            connect_timeout_ms: default_connect_timeout(),
            reconnect_base_delay_ms: default_reconnect_base_delay(),
            max_reconnect_attempts: default_max_reconnect_attempts(),
        }
    }
}

/// Debounced refresh configuration
#[derive(Debug, Clone, Deserialize)]
pub struct RefreshConfig {
    #[serde(default = "default_debounce_window")]
    pub debounce_window_ms: u64,

    /// Endpoint re-fetched after each flush (CLI only)
    pub dashboard_url: Option<String>,
}

fn default_debounce_window() -> u64 {
    500
}

impl RefreshConfig {
    pub fn debounce_window(&self) -> Duration {
        Duration::from_millis(self.debounce_window_ms)
    }
}

impl Default for RefreshConfig {
    fn default() -> Self {
        Self {
            debounce_window_ms: default_debounce_window(),
            dashboard_url: None,
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
        let config_paths = [
            dirs::config_dir().map(|p| p.join("clinic-sync").join("config.toml")),
            Some(PathBuf::from("/etc/clinic-sync/config.toml")),
            Some(PathBuf::from("./config.toml")),
        ];

        for path_opt in config_paths.iter().flatten() {
            if path_opt.exists() {
                match Self::load_with_env(path_opt) {
                    Ok(config) => {
                        tracing::info!("Loaded config from {:?}", path_opt);
                        return config;
                    }
                    Err(e) => {
                        tracing::warn!("Failed to load config from {:?}: {}", path_opt, e);
                    }
                }
            }
        }

        // Fall back to environment-only config
        tracing::info!("Using default config with environment overrides");
        Self::from_env()
    }

    fn apply_env_overrides(&mut self) {
        self.apply_overrides(|key| std::env::var(key).ok());
    }

    /// Apply `CLINIC_SYNC_*` overrides from `lookup`; unparsable numbers are ignored
    fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        // Realtime overrides
        if let Some(url) = lookup("CLINIC_SYNC_URL") {
            self.realtime.url = url;
        }
        if let Some(ms) = lookup("CLINIC_SYNC_CONNECT_TIMEOUT_MS").and_then(|v| v.parse().ok()) {
            self.realtime.connect_timeout_ms = ms;
        }
        if let Some(ms) = lookup("CLINIC_SYNC_RECONNECT_BASE_DELAY_MS").and_then(|v| v.parse().ok()) {
            self.realtime.reconnect_base_delay_ms = ms;
        }
        if let Some(max) = lookup("CLINIC_SYNC_MAX_RECONNECT_ATTEMPTS").and_then(|v| v.parse().ok()) {
            self.realtime.max_reconnect_attempts = max;
        }

        // Refresh overrides
        if let Some(ms) = lookup("CLINIC_SYNC_DEBOUNCE_MS").and_then(|v| v.parse().ok()) {
            self.refresh.debounce_window_ms = ms;
        }
        if let Some(url) = lookup("CLINIC_SYNC_DASHBOARD_URL") {
            self.refresh.dashboard_url = Some(url);
        }

        // Logging overrides
        if let Some(level) = lookup("CLINIC_SYNC_LOG_LEVEL") {
            self.logging.level = level;
        }
        if let Some(format) = lookup("CLINIC_SYNC_LOG_FORMAT") {
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
}

/// Generate a default config file content
pub fn generate_default_config() -> String {
    r#"# Clinic Sync Configuration
#
# Environment variables override these settings:
# - CLINIC_SYNC_URL
# - CLINIC_SYNC_CONNECT_TIMEOUT_MS
# - CLINIC_SYNC_RECONNECT_BASE_DELAY_MS
# - CLINIC_SYNC_MAX_RECONNECT_ATTEMPTS
# - CLINIC_SYNC_DEBOUNCE_MS
# - CLINIC_SYNC_DASHBOARD_URL
# - CLINIC_SYNC_LOG_LEVEL
# - CLINIC_SYNC_LOG_FORMAT

[realtime]
# Realtime server endpoint
url = "ws://localhost:5000/ws"

# Handshake timeout (ms); expiry counts as a failed attempt
connect_timeout_ms = 10000

# First reconnect delay (ms), doubled after each failure
reconnect_base_delay_ms = 1000

# Consecutive failures before giving up until a manual reconnect
max_reconnect_attempts = 5

[refresh]
# Quiet period coalescing an event burst into one refresh (ms)
debounce_window_ms = 500

# Endpoint re-fetched after each flush
# dashboard_url = "http://localhost:5000/api/dashboard/stats"

[logging]
# Log level: trace, debug, info, warn, error
level = "info"

# Log format: pretty (for development) or json (for production)
format = "pretty"
"#
    .to_string()
}
