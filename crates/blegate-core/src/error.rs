//! # Error Types
//!
//! Domain-specific error types for blegate-core.
//!
//! ## Error Hierarchy
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                         Error Types                                     │
//! │                                                                         │
//! │  blegate-core errors (this file)                                       │
//! │  └── CoreError        - Schema / payload encoding failures             │
//! │                                                                         │
//! │  blegate-db errors (separate crate)                                    │
//! │  └── DbError          - Store operation failures                       │
//! │                                                                         │
//! │  blegate-sync errors                                                   │
//! │  └── GatewayError     - What the event sink carries                    │
//! │                                                                         │
//! │  Flow: CoreError → GatewayError → EventSink → host process             │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use thiserror::Error;

/// Core domain errors.
#[derive(Debug, Error)]
pub enum CoreError {
    /// The schema stored for a device group could not be decoded.
    ///
    /// ## When This Occurs
    /// - The `services` column holds text that is not a JSON service list
    /// - The backend sent a group whose services were not serializable
    #[error("Invalid schema for device group {group_id}: {reason}")]
    InvalidSchema { group_id: String, reason: String },

    /// A collected payload could not be serialized.
    #[error("Payload encoding failed: {0}")]
    PayloadEncoding(String),
}

impl CoreError {
    /// Creates an InvalidSchema error for a given group.
    pub fn invalid_schema(group_id: impl Into<String>, reason: impl ToString) -> Self {
        CoreError::InvalidSchema {
            group_id: group_id.into(),
            reason: reason.to_string(),
        }
    }
}

// =============================================================================
// Result Type Alias
// =============================================================================

/// Convenience type alias for Results with CoreError.
pub type CoreResult<T> = Result<T, CoreError>;
