//! # Gateway Error Types
//!
//! Error types for the runtime: cloud client, radio seam, and the
//! aggregate `GatewayError` carried by the event sink.
//!
//! ## Error Hierarchy
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                       Gateway Error Categories                          │
//! │                                                                         │
//! │  ┌─────────────────┐  ┌─────────────────┐  ┌─────────────────────────┐ │
//! │  │  Configuration  │  │   ClientError   │  │     RadioError          │ │
//! │  │                 │  │                 │  │                         │ │
//! │  │  InvalidConfig  │  │  Transport      │  │  Unavailable            │ │
//! │  │  InvalidUrl     │  │  Status         │  │  NotConnected           │ │
//! │  │  ConfigLoad/Save│  │  Malformed      │  │  Failed / Timeout       │ │
//! │  └─────────────────┘  │  Backend        │  └─────────────────────────┘ │
//! │                       └─────────────────┘                              │
//! │  ┌─────────────────┐  ┌─────────────────┐  ┌─────────────────────────┐ │
//! │  │     Store       │  │    Catalog      │  │     Extraction          │ │
//! │  │                 │  │                 │  │                         │ │
//! │  │  DbError        │  │  UnknownDevice  │  │  Characteristic         │ │
//! │  │                 │  │  UnknownGroup   │  │  Core (schema/payload)  │ │
//! │  └─────────────────┘  └─────────────────┘  └─────────────────────────┘ │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Severity
//! - Fatal at startup: config, store open, authentication, radio open.
//! - Recoverable: everything reported through the event sink afterwards.

use thiserror::Error;

use blegate_core::CoreError;
use blegate_db::DbError;

/// Result type alias for gateway operations.
pub type GatewayResult<T> = Result<T, GatewayError>;

/// Result type alias for cloud client operations.
pub type ClientResult<T> = Result<T, ClientError>;

/// Result type alias for radio operations.
pub type RadioResult<T> = Result<T, RadioError>;

// =============================================================================
// Cloud Client Errors
// =============================================================================

/// Failures talking to the gateway backend.
///
/// Transport failures and undecodable bodies are both client errors; the
/// sync loops treat every variant the same way (report, retry next tick).
#[derive(Debug, Error)]
pub enum ClientError {
    /// The request never produced a response.
    #[error("HTTP request failed: {0}")]
    Transport(String),

    /// The backend answered with a non-2xx status.
    #[error("Backend returned HTTP {status}: {body}")]
    Status { status: u16, body: String },

    /// The body could not be decoded, or is structurally empty.
    #[error("Malformed response: {0}")]
    MalformedResponse(String),

    /// The envelope carried a non-null `meta.error`.
    #[error("Backend error: {0}")]
    Backend(String),

    /// The configured base URL cannot be joined with an endpoint path.
    #[error("Invalid backend URL: {0}")]
    InvalidUrl(String),

    /// The gateway hash cannot be carried in an HTTP header.
    #[error("Invalid gateway credential: {0}")]
    InvalidCredential(String),
}

impl From<reqwest::Error> for ClientError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_decode() {
            ClientError::MalformedResponse(err.to_string())
        } else {
            ClientError::Transport(err.to_string())
        }
    }
}

impl From<serde_json::Error> for ClientError {
    fn from(err: serde_json::Error) -> Self {
        ClientError::MalformedResponse(err.to_string())
    }
}

impl From<url::ParseError> for ClientError {
    fn from(err: url::ParseError) -> Self {
        ClientError::InvalidUrl(err.to_string())
    }
}

// =============================================================================
// Radio Errors
// =============================================================================

/// Failures reported by the radio transport.
#[derive(Debug, Error)]
pub enum RadioError {
    /// The adapter could not be opened.
    #[error("Radio unavailable: {0}")]
    Unavailable(String),

    /// The peripheral is not (or no longer) connected.
    #[error("Peripheral {0} is not connected")]
    NotConnected(String),

    /// A link-layer operation failed.
    #[error("Radio {operation} failed: {reason}")]
    Failed { operation: String, reason: String },

    /// A link-layer operation did not complete in time.
    #[error("Radio {0} timed out")]
    Timeout(String),
}

impl RadioError {
    /// Creates a Failed error for a named operation.
    pub fn failed(operation: impl Into<String>, reason: impl ToString) -> Self {
        RadioError::Failed {
            operation: operation.into(),
            reason: reason.to_string(),
        }
    }
}

// =============================================================================
// Gateway Error
// =============================================================================

/// Every error the runtime can surface.
///
/// This is the value type carried by the event sink.
#[derive(Debug, Error)]
pub enum GatewayError {
    // =========================================================================
    // Configuration Errors
    // =========================================================================
    /// Invalid gateway configuration.
    #[error("Invalid gateway configuration: {0}")]
    InvalidConfig(String),

    /// Invalid backend URL.
    #[error("Invalid backend URL: {0}")]
    InvalidUrl(String),

    /// Failed to load config file.
    #[error("Failed to load config: {0}")]
    ConfigLoadFailed(String),

    /// Failed to save config file.
    #[error("Failed to save config: {0}")]
    ConfigSaveFailed(String),

    // =========================================================================
    // Component Errors
    // =========================================================================
    /// Store operation failed.
    #[error("Store error: {0}")]
    Store(#[from] DbError),

    /// Backend request failed.
    #[error("Cloud error: {0}")]
    Client(#[from] ClientError),

    /// Initial authentication was rejected or failed.
    #[error("Authentication failed: {0}")]
    AuthenticationFailed(ClientError),

    /// Radio operation failed.
    #[error("Radio error: {0}")]
    Radio(#[from] RadioError),

    /// No radio backend was compiled into this build.
    #[error("No radio backend available")]
    NoRadioBackend,

    /// Schema decoding or payload encoding failed.
    #[error("Domain error: {0}")]
    Core(#[from] CoreError),

    // =========================================================================
    // Catalog / Extraction Errors
    // =========================================================================
    /// A connected peripheral is not in the catalog.
    #[error("Device {0} is not in the catalog")]
    UnknownDevice(String),

    /// A device references a group the catalog does not have.
    #[error("Device {device_hash} references unknown device group {group_id}")]
    UnknownDeviceGroup {
        device_hash: String,
        group_id: String,
    },

    /// Reading or subscribing to one characteristic failed.
    #[error("Characteristic {service}/{characteristic} on {device_hash}: {reason}")]
    Characteristic {
        device_hash: String,
        service: String,
        characteristic: String,
        reason: String,
    },

    // =========================================================================
    // Internal Errors
    // =========================================================================
    /// Gateway is shutting down.
    #[error("Gateway is shutting down")]
    ShuttingDown,

    /// Channel send/receive failed.
    #[error("Channel error: {0}")]
    ChannelError(String),
}

// =============================================================================
// Error Conversions
// =============================================================================

impl From<std::io::Error> for GatewayError {
    fn from(err: std::io::Error) -> Self {
        GatewayError::ConfigLoadFailed(err.to_string())
    }
}

impl From<toml::de::Error> for GatewayError {
    fn from(err: toml::de::Error) -> Self {
        GatewayError::ConfigLoadFailed(err.to_string())
    }
}

impl From<toml::ser::Error> for GatewayError {
    fn from(err: toml::ser::Error) -> Self {
        GatewayError::ConfigSaveFailed(err.to_string())
    }
}

// =============================================================================
// Error Categorization
// =============================================================================

impl GatewayError {
    /// Returns true if this error must abort the process when it happens
    /// during startup.
    pub fn is_fatal_at_startup(&self) -> bool {
        match self {
            GatewayError::AuthenticationFailed(_) | GatewayError::NoRadioBackend => true,
            GatewayError::Radio(RadioError::Unavailable(_)) => true,
            GatewayError::Store(e) => {
                e.is_connection_error() || matches!(e, DbError::MigrationFailed(_))
            }
            other => other.is_config_error(),
        }
    }

    /// Returns true if this error indicates a configuration problem.
    pub fn is_config_error(&self) -> bool {
        matches!(
            self,
            GatewayError::InvalidConfig(_)
                | GatewayError::InvalidUrl(_)
                | GatewayError::ConfigLoadFailed(_)
                | GatewayError::ConfigSaveFailed(_)
        )
    }
}
