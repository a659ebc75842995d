//! # blegate-core: Pure Domain Model for the BLE Gateway
//!
//! This crate holds the domain types shared by the store, the sync engine
//! and the connection orchestrator. Nothing in here touches a socket, a
//! file or a radio.
//!
//! ## Architecture Position
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                        blegate Architecture                             │
//! │                                                                         │
//! │  ┌─────────────────────────────────────────────────────────────────┐   │
//! │  │                apps/gateway (host binary)                       │   │
//! │  └─────────────────────────────┬───────────────────────────────────┘   │
//! │                                │                                        │
//! │  ┌─────────────────────────────▼───────────────────────────────────┐   │
//! │  │   blegate-sync: orchestrator, extractor, cloud, sync loops      │   │
//! │  └─────────────────────────────┬───────────────────────────────────┘   │
//! │                                │                                        │
//! │  ┌─────────────────────────────▼───────────────────────────────────┐   │
//! │  │               ★ blegate-core (THIS CRATE) ★                     │   │
//! │  │                                                                 │   │
//! │  │   ┌───────────┐  ┌───────────┐  ┌───────────┐                  │   │
//! │  │   │   types   │  │  schema   │  │  payload  │                  │   │
//! │  │   │  Device   │  │  Service  │  │ svc→char  │                  │   │
//! │  │   │  Group    │  │  Char     │  │  → hex    │                  │   │
//! │  │   │  Tx       │  │  matching │  │           │                  │   │
//! │  │   └───────────┘  └───────────┘  └───────────┘                  │   │
//! │  └─────────────────────────────────────────────────────────────────┘   │
//! │                                │                                        │
//! │  ┌─────────────────────────────▼───────────────────────────────────┐   │
//! │  │               blegate-db (SQLite catalog + log)                 │   │
//! │  └─────────────────────────────────────────────────────────────────┘   │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Modules
//!
//! - [`types`] - Device, DeviceGroup, Transaction
//! - [`schema`] - Device group schema and name normalization
//! - [`payload`] - Telemetry payload collected from one connection
//! - [`error`] - Domain error types

// =============================================================================
// Module Declarations
// =============================================================================

pub mod error;
pub mod payload;
pub mod schema;
pub mod types;

// =============================================================================
// Re-exports for Convenience
// =============================================================================

pub use error::{CoreError, CoreResult};
pub use payload::Payload;
pub use schema::{normalize_name, CharacteristicSchema, Schema, ServiceSchema};
pub use types::*;

// =============================================================================
// Crate-Level Constants
// =============================================================================

/// Status code attached to every uploaded transaction.
///
/// The backend only distinguishes freshly reported transactions (1) from
/// ones it produced itself, so the gateway always sends 1.
pub const TRANSACTION_STATUS_REPORTED: i32 = 1;
