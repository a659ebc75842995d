//! # Gateway Configuration
//!
//! Configuration management for the gateway runtime.
//!
//! ## Configuration Sources
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                    Configuration Priority                               │
//! │                                                                         │
//! │  1. Environment Variables (highest priority)                           │
//! │     BLEGATE_GATEWAY_HASH=...                                           │
//! │     BLEGATE_API_KEY=...                                                │
//! │                                                                         │
//! │  2. TOML Config File                                                   │
//! │     --config <path>, or                                                │
//! │     ~/.config/blegate/gateway.toml (Linux)                             │
//! │     ~/Library/Application Support/io.blegate.blegate/gateway.toml      │
//! │                                                                         │
//! │  3. Default Values (lowest priority)                                   │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Configuration File Format
//! ```toml
//! [gateway]
//! hash = "0f3c9a..."
//! api_key = "secret"
//!
//! [cloud]
//! base_url = "https://prod114.moeco.io:443"
//!
//! [sync]
//! catalog_refresh_interval_ms = 10000
//! upload_interval_ms = 4000
//!
//! [radio]
//! notify_window_ms = 5000
//! device_backoff_ms = 60000
//! mtu = 500
//!
//! [logging]
//! format = "json"
//! ```

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::error::{GatewayError, GatewayResult};

/// Smallest MTU the link layer allows.
pub const MIN_MTU: u16 = 23;

// =============================================================================
// Log Format
// =============================================================================

/// Output format of the host's log subscriber.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogFormat {
    /// Human-readable, for terminals.
    #[default]
    Pretty,

    /// One JSON object per line, for log shippers.
    Json,
}

impl std::fmt::Display for LogFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LogFormat::Pretty => write!(f, "pretty"),
            LogFormat::Json => write!(f, "json"),
        }
    }
}

impl std::str::FromStr for LogFormat {
    type Err = GatewayError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "pretty" | "text" => Ok(LogFormat::Pretty),
            "json" => Ok(LogFormat::Json),
            other => Err(GatewayError::InvalidConfig(format!(
                "Unknown log format: '{}'. Valid options: pretty, json",
                other
            ))),
        }
    }
}

// =============================================================================
// Sections
// =============================================================================

/// Identity of this gateway towards the backend.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GatewaySettings {
    /// Gateway hash. Also the bearer credential on every request.
    #[serde(default)]
    pub hash: String,

    /// API key exchanged once at startup.
    #[serde(default)]
    pub api_key: String,
}

/// Backend endpoint settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CloudSettings {
    #[serde(default = "default_base_url")]
    pub base_url: String,

    /// Whole-request timeout (seconds).
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,

    /// TCP/TLS connect timeout (seconds).
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_secs: u64,
}

fn default_base_url() -> String {
    "https://prod114.moeco.io:443".to_string()
}
fn default_request_timeout() -> u64 {
    30
}
fn default_connect_timeout() -> u64 {
    10
}

impl Default for CloudSettings {
    fn default() -> Self {
        CloudSettings {
            base_url: default_base_url(),
            request_timeout_secs: default_request_timeout(),
            connect_timeout_secs: default_connect_timeout(),
        }
    }
}

/// Local store settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseSettings {
    /// SQLite file. Defaults to the platform data directory.
    #[serde(default)]
    pub path: Option<PathBuf>,

    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
}

fn default_max_connections() -> u32 {
    5
}

impl Default for DatabaseSettings {
    fn default() -> Self {
        DatabaseSettings {
            path: None,
            max_connections: default_max_connections(),
        }
    }
}

/// Timers of the two sync loops.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncSettings {
    /// Catalog refresh period (milliseconds).
    #[serde(default = "default_catalog_interval")]
    pub catalog_refresh_interval_ms: u64,

    /// Transaction upload period (milliseconds).
    #[serde(default = "default_upload_interval")]
    pub upload_interval_ms: u64,
}

fn default_catalog_interval() -> u64 {
    10_000
}
fn default_upload_interval() -> u64 {
    4_000
}

impl Default for SyncSettings {
    fn default() -> Self {
        SyncSettings {
            catalog_refresh_interval_ms: default_catalog_interval(),
            upload_interval_ms: default_upload_interval(),
        }
    }
}

/// Connection lifecycle settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RadioSettings {
    /// How long to collect notifications after subscribing (milliseconds).
    #[serde(default = "default_notify_window")]
    pub notify_window_ms: u64,

    /// Minimum wait before reconnecting to the same device (milliseconds).
    #[serde(default = "default_device_backoff")]
    pub device_backoff_ms: u64,

    /// Give up on a pending connect after this long (milliseconds).
    #[serde(default = "default_radio_connect_timeout")]
    pub connect_timeout_ms: u64,

    /// MTU requested right after connecting.
    #[serde(default = "default_mtu")]
    pub mtu: u16,

    /// Capacity of the extractor → writer queue.
    #[serde(default = "default_transaction_queue")]
    pub transaction_queue_size: usize,
}

fn default_notify_window() -> u64 {
    5_000
}
fn default_device_backoff() -> u64 {
    60_000
}
fn default_radio_connect_timeout() -> u64 {
    15_000
}
fn default_mtu() -> u16 {
    500
}
fn default_transaction_queue() -> usize {
    50
}

impl Default for RadioSettings {
    fn default() -> Self {
        RadioSettings {
            notify_window_ms: default_notify_window(),
            device_backoff_ms: default_device_backoff(),
            connect_timeout_ms: default_radio_connect_timeout(),
            mtu: default_mtu(),
            transaction_queue_size: default_transaction_queue(),
        }
    }
}

/// Event sink settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventSettings {
    /// Events buffered before new ones are dropped.
    #[serde(default = "default_event_capacity")]
    pub capacity: usize,
}

fn default_event_capacity() -> usize {
    256
}

impl Default for EventSettings {
    fn default() -> Self {
        EventSettings {
            capacity: default_event_capacity(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LoggingSettings {
    #[serde(default)]
    pub format: LogFormat,
}

// =============================================================================
// Main Gateway Configuration
// =============================================================================

/// Complete gateway configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GatewayConfig {
    #[serde(default)]
    pub gateway: GatewaySettings,

    #[serde(default)]
    pub cloud: CloudSettings,

    #[serde(default)]
    pub database: DatabaseSettings,

    #[serde(default)]
    pub sync: SyncSettings,

    #[serde(default)]
    pub radio: RadioSettings,

    #[serde(default)]
    pub events: EventSettings,

    #[serde(default)]
    pub logging: LoggingSettings,
}

impl GatewayConfig {
    /// Loads configuration from file, environment, and defaults.
    ///
    /// ## Load Order (later overrides earlier)
    /// 1. Default values
    /// 2. Config file (`gateway.toml`)
    /// 3. Environment variables
    ///
    /// An explicitly given path must exist; the default path may be absent.
    pub fn load(config_path: Option<PathBuf>) -> GatewayResult<Self> {
        let explicit = config_path.is_some();
        let mut config = Self::default();

        if let Some(path) = config_path.or_else(Self::default_config_path) {
            if path.exists() {
                info!(?path, "Loading gateway config from file");
                let contents = std::fs::read_to_string(&path)?;
                config = toml::from_str(&contents)?;
            } else if explicit {
                return Err(GatewayError::ConfigLoadFailed(format!(
                    "Config file not found: {}",
                    path.display()
                )));
            } else {
                debug!(?path, "Config file not found, using defaults");
            }
        }

        config.apply_env_overrides();
        config.validate()?;

        Ok(config)
    }

    /// Saves configuration to file.
    pub fn save(&self, config_path: Option<PathBuf>) -> GatewayResult<()> {
        let path = config_path
            .or_else(Self::default_config_path)
            .ok_or_else(|| GatewayError::ConfigSaveFailed("No config path available".into()))?;

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| GatewayError::ConfigSaveFailed(e.to_string()))?;
        }

        let contents = toml::to_string_pretty(self)?;
        std::fs::write(&path, contents).map_err(|e| GatewayError::ConfigSaveFailed(e.to_string()))?;

        info!(?path, "Gateway config saved");
        Ok(())
    }

    /// Validates the configuration.
    pub fn validate(&self) -> GatewayResult<()> {
        if self.gateway.hash.trim().is_empty() {
            return Err(GatewayError::InvalidConfig(
                "gateway.hash must be set".into(),
            ));
        }

        if self.gateway.api_key.trim().is_empty() {
            return Err(GatewayError::InvalidConfig(
                "gateway.api_key must be set".into(),
            ));
        }

        let url = &self.cloud.base_url;
        if !url.starts_with("http://") && !url.starts_with("https://") {
            return Err(GatewayError::InvalidUrl(format!(
                "Backend URL must start with http:// or https://, got: {}",
                url
            )));
        }
        url::Url::parse(url).map_err(|e| GatewayError::InvalidUrl(e.to_string()))?;

        let non_zero = [
            ("cloud.request_timeout_secs", self.cloud.request_timeout_secs),
            ("cloud.connect_timeout_secs", self.cloud.connect_timeout_secs),
            ("sync.catalog_refresh_interval_ms", self.sync.catalog_refresh_interval_ms),
            ("sync.upload_interval_ms", self.sync.upload_interval_ms),
            ("radio.notify_window_ms", self.radio.notify_window_ms),
            ("radio.device_backoff_ms", self.radio.device_backoff_ms),
            ("radio.connect_timeout_ms", self.radio.connect_timeout_ms),
            ("radio.transaction_queue_size", self.radio.transaction_queue_size as u64),
            ("events.capacity", self.events.capacity as u64),
            ("database.max_connections", u64::from(self.database.max_connections)),
        ];
        for (key, value) in non_zero {
            if value == 0 {
                return Err(GatewayError::InvalidConfig(format!(
                    "{} must be greater than 0",
                    key
                )));
            }
        }

        if self.radio.mtu < MIN_MTU {
            return Err(GatewayError::InvalidConfig(format!(
                "radio.mtu must be at least {}, got {}",
                MIN_MTU, self.radio.mtu
            )));
        }

        Ok(())
    }

    /// Applies environment variable overrides.
    fn apply_env_overrides(&mut self) {
        self.apply_overrides(|key| std::env::var(key).ok());
    }

    /// Applies overrides from any key lookup (the process environment in
    /// production).
    fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(hash) = lookup("BLEGATE_GATEWAY_HASH") {
            debug!(gateway_hash = %hash, "Overriding gateway hash from environment");
            self.gateway.hash = hash;
        }

        if let Some(key) = lookup("BLEGATE_API_KEY") {
            self.gateway.api_key = key;
        }

        if let Some(url) = lookup("BLEGATE_CLOUD_URL") {
            debug!(url = %url, "Overriding backend URL from environment");
            self.cloud.base_url = url;
        }

        if let Some(path) = lookup("BLEGATE_DB_PATH") {
            self.database.path = Some(PathBuf::from(path));
        }

        if let Some(format) = lookup("BLEGATE_LOG_FORMAT") {
            match format.parse() {
                Ok(parsed) => self.logging.format = parsed,
                Err(_) => warn!(format = %format, "Unknown log format in environment"),
            }
        }

        if let Some(ms) = lookup("BLEGATE_SYNC_INTERVAL_MS") {
            match ms.parse::<u64>() {
                Ok(v) => self.sync.upload_interval_ms = v,
                Err(_) => warn!(value = %ms, "Invalid BLEGATE_SYNC_INTERVAL_MS"),
            }
        }

        if let Some(ms) = lookup("BLEGATE_CATALOG_INTERVAL_MS") {
            match ms.parse::<u64>() {
                Ok(v) => self.sync.catalog_refresh_interval_ms = v,
                Err(_) => warn!(value = %ms, "Invalid BLEGATE_CATALOG_INTERVAL_MS"),
            }
        }
    }

    fn project_dirs() -> Option<directories::ProjectDirs> {
        directories::ProjectDirs::from("io", "blegate", "blegate")
    }

    /// Returns the default config file path.
    fn default_config_path() -> Option<PathBuf> {
        Self::project_dirs().map(|dirs| dirs.config_dir().join("gateway.toml"))
    }

    // =========================================================================
    // Convenience Methods
    // =========================================================================

    /// Returns the SQLite file to open.
    pub fn database_path(&self) -> PathBuf {
        self.database
            .path
            .clone()
            .or_else(|| Self::project_dirs().map(|dirs| dirs.data_dir().join("gateway.db")))
            .unwrap_or_else(|| PathBuf::from("gateway.db"))
    }

    pub fn catalog_refresh_interval(&self) -> Duration {
        Duration::from_millis(self.sync.catalog_refresh_interval_ms)
    }

    pub fn upload_interval(&self) -> Duration {
        Duration::from_millis(self.sync.upload_interval_ms)
    }

    pub fn notify_window(&self) -> Duration {
        Duration::from_millis(self.radio.notify_window_ms)
    }

    pub fn device_backoff(&self) -> Duration {
        Duration::from_millis(self.radio.device_backoff_ms)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.radio.connect_timeout_ms)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.cloud.request_timeout_secs)
    }
}
