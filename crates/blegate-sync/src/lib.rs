//! # blegate-sync: Gateway Runtime
//!
//! This crate owns every long-running task of the BLE gateway: the
//! connection orchestrator that drives the radio, the extractor that turns
//! one connection into a telemetry payload, the writer that persists it,
//! and the two periodic loops that talk to the backend.
//!
//! ## Architecture Overview
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                        Gateway Runtime                                  │
//! │                                                                         │
//! │  ┌──────────────────────────────────────────────────────────────────┐  │
//! │  │                  GatewayAgent (startup + wiring)                 │  │
//! │  │                                                                  │  │
//! │  │  validate config → authenticate → spawn tasks → GatewayHandle    │  │
//! │  └────────────────────────────┬─────────────────────────────────────┘  │
//! │                               │                                         │
//! │     ┌───────────────┬─────────┴───────┬──────────────────┐             │
//! │     ▼               ▼                 ▼                  ▼              │
//! │  ┌──────────┐  ┌──────────────┐  ┌─────────────┐  ┌──────────────┐    │
//! │  │Orchestr- │  │ Transaction  │  │  Catalog    │  │ Transaction  │    │
//! │  │ator      │  │ Writer       │  │  Refresher  │  │ Uploader     │    │
//! │  │          │  │              │  │             │  │              │    │
//! │  │ scan →   │─►│ queue → tr   │  │ GET devices │  │ unsent → POST│    │
//! │  │ connect →│  │ table        │  │ → upsert    │  │ → mark sent  │    │
//! │  │ extract  │  │              │  │             │  │              │    │
//! │  └────┬─────┘  └──────────────┘  └─────────────┘  └──────────────┘    │
//! │       │                                                                 │
//! │       ▼                                                                 │
//! │  ┌──────────┐        ┌───────────────────────────────────────────┐    │
//! │  │ Radio    │        │ EventSink ──► EventStream (host logs)     │    │
//! │  │ (trait)  │        │ every recoverable failure lands here       │    │
//! │  └──────────┘        └───────────────────────────────────────────┘    │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Module Organization
//!
//! - [`agent`] - `GatewayAgent` startup and `GatewayHandle`
//! - [`config`] - TOML configuration with env overrides
//! - [`error`] - Client, radio and gateway error types
//! - [`events`] - Bounded error event channel
//! - [`cloud`] - `CloudApi` trait and the reqwest client
//! - [`protocol`] - Backend wire types
//! - [`radio`] - `Radio` trait and radio events
//! - [`orchestrator`] - Connection state machine
//! - [`extractor`] - Schema-driven characteristic collection
//! - [`writer`] - Transaction persistence task
//! - [`catalog`] - Periodic catalog refresh
//! - [`uploader`] - Periodic transaction upload
//!
//! ## Usage
//!
//! ```rust,ignore
//! use blegate_sync::{GatewayAgent, GatewayConfig, HttpCloudClient};
//!
//! let config = GatewayConfig::load(None)?;
//! let cloud = Arc::new(HttpCloudClient::new(&config)?);
//! let (handle, mut events) =
//!     GatewayAgent::start(&config, db, cloud, radio, radio_events).await?;
//!
//! while let Some(event) = events.recv().await {
//!     tracing::error!(source = %event.source, error = %event.error, "Gateway error");
//! }
//! handle.shutdown().await;
//! ```

// =============================================================================
// Module Declarations
// =============================================================================

pub mod agent;
pub mod config;
pub mod error;
pub mod events;

pub mod cloud;
pub mod protocol;
pub mod radio;

pub mod catalog;
pub mod extractor;
pub mod orchestrator;
pub mod uploader;
pub mod writer;

#[cfg(test)]
mod testing;

// =============================================================================
// Re-exports
// =============================================================================

pub use agent::{GatewayAgent, GatewayHandle};
pub use config::{GatewayConfig, LogFormat};
pub use error::{
    ClientError, ClientResult, GatewayError, GatewayResult, RadioError, RadioResult,
};
pub use events::{EventSink, EventSource, EventStream, GatewayEvent};

pub use cloud::{CloudApi, HttpCloudClient};
pub use protocol::{CatalogSnapshot, GateInfo, SyncResponse};
pub use radio::{
    AdapterState, CharacteristicInfo, CharacteristicKey, CharacteristicProperties, Notification,
    NotificationSink, Peripheral, Radio, RadioEvent, ServiceInfo,
};

pub use catalog::{CatalogRefresher, RefreshOutcome};
pub use extractor::Extractor;
pub use orchestrator::{ConnectionOrchestrator, LinkState, OrchestratorHandle, OrchestratorSettings};
pub use uploader::{TransactionUploader, UploadOutcome};
pub use writer::TransactionWriter;
