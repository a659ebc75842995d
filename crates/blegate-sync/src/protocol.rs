//! # Backend Wire Protocol
//!
//! JSON shapes exchanged with the gateway backend.
//!
//! ## Endpoints
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                      Gateway Backend API                                │
//! │                                                                         │
//! │  AUTHENTICATE (once, at startup)                                       │
//! │  ───────────────────────────────                                       │
//! │  POST /api/gate/auth        { api_key, gate: { hash } }                │
//! │                        ◄─── { meta, data: [ GateInfo ] }               │
//! │                                                                         │
//! │  CATALOG (every catalog_refresh_interval)                              │
//! │  ────────────────────────────────────────                              │
//! │  GET  /api/gate/v2/devices                                             │
//! │                        ◄─── { meta, data: [ { devices, device_groups } ] }
//! │                                                                         │
//! │  UPLOAD (every upload_interval, when unsent rows exist)                │
//! │  ──────────────────────────────────────────────────────                │
//! │  POST /api/gate/sync?last_sync=<epoch>   { transactions: [...] }       │
//! │                        ◄─── { meta, data: [ { updatedUplink, changed, │
//! │                                               uplink, results } ] }    │
//! │                                                                         │
//! │  Every request: Authorization: Gateway <gateway hash>                  │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Decoding is lenient: absent or `null` collections decode as empty, and
//! unknown fields are ignored.

use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Deserializer, Serialize};

use blegate_core::{
    CoreResult, Device, DeviceGroup, Schema, ServiceSchema, Transaction,
    TRANSACTION_STATUS_REPORTED,
};

fn null_as_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

fn epoch_secs(at: Option<DateTime<Utc>>) -> i64 {
    at.map(|t| t.timestamp()).unwrap_or(0)
}

// =============================================================================
// Envelope
// =============================================================================

/// Paging and error metadata present on every response.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Meta {
    #[serde(default)]
    pub total: i64,
    #[serde(default)]
    pub count: i64,
    #[serde(default)]
    pub offset: i64,
    #[serde(default)]
    pub error: Option<serde_json::Value>,
}

impl Meta {
    /// The backend-reported error, if any.
    pub fn error_message(&self) -> Option<String> {
        match &self.error {
            None | Some(serde_json::Value::Null) => None,
            Some(serde_json::Value::String(s)) => Some(s.clone()),
            Some(other) => Some(other.to_string()),
        }
    }
}

/// `{ meta, data: [...] }`
#[derive(Debug, Clone, Deserialize)]
#[serde(bound(deserialize = "T: Deserialize<'de>"))]
pub struct Envelope<T> {
    #[serde(default)]
    pub meta: Meta,

    #[serde(default = "Vec::new", deserialize_with = "null_as_default")]
    pub data: Vec<T>,
}

// =============================================================================
// Authentication
// =============================================================================

#[derive(Debug, Clone, Serialize)]
pub struct AuthRequest {
    pub api_key: String,
    pub gate: Gate,
}

#[derive(Debug, Clone, Serialize)]
pub struct Gate {
    pub hash: String,
}

/// The gateway record returned by a successful authentication.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct GateInfo {
    #[serde(default)]
    pub id: i64,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub user_id: i64,
    #[serde(default)]
    pub hash: String,
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub updated_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub latitude: Option<f64>,
    #[serde(default)]
    pub longitude: Option<f64>,
}

// =============================================================================
// Catalog
// =============================================================================

/// A device as listed by the backend.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct CatalogDevice {
    #[serde(default)]
    pub hash: String,
    #[serde(default)]
    pub manufacturer: String,
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub updated_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub exonum_id: String,
    #[serde(default)]
    pub device_group_id: String,
    #[serde(default)]
    pub owner_key: String,
}

impl CatalogDevice {
    pub fn into_device(self) -> Device {
        Device {
            id: 0,
            hash: self.hash,
            manufacturer: self.manufacturer,
            created_at: epoch_secs(self.created_at),
            updated_at: epoch_secs(self.updated_at),
            exonum_id: self.exonum_id,
            device_group_id: self.device_group_id,
            owner_key: self.owner_key,
        }
    }
}

/// A device group as listed by the backend.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct CatalogDeviceGroup {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub group_type: i64,
    #[serde(default)]
    pub uplink_lifetime: i64,
    #[serde(default)]
    pub downlink_lifetime: i64,
    #[serde(default, deserialize_with = "null_as_default")]
    pub services: Vec<ServiceSchema>,
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub updated_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub exonum_id: String,
    #[serde(default)]
    pub owner_key: String,
}

impl CatalogDeviceGroup {
    /// Converts to the stored form, serializing the schema as JSON.
    pub fn into_device_group(self) -> CoreResult<DeviceGroup> {
        let services = Schema::new(self.services).to_json()?;

        Ok(DeviceGroup {
            id: 0,
            exonum_id: self.exonum_id,
            name: self.name,
            group_type: self.group_type,
            uplink_lifetime: self.uplink_lifetime,
            downlink_lifetime: self.downlink_lifetime,
            services,
            created_at: epoch_secs(self.created_at),
            updated_at: epoch_secs(self.updated_at),
            owner_key: self.owner_key,
        })
    }
}

/// One catalog envelope entry: the full whitelist.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct CatalogSnapshot {
    #[serde(default, deserialize_with = "null_as_default")]
    pub devices: Vec<CatalogDevice>,

    #[serde(default, deserialize_with = "null_as_default")]
    pub device_groups: Vec<CatalogDeviceGroup>,
}

impl CatalogSnapshot {
    pub fn is_empty(&self) -> bool {
        self.devices.is_empty() && self.device_groups.is_empty()
    }
}

// =============================================================================
// Transaction Upload
// =============================================================================

/// Wire form of one uploaded transaction.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TransactionReq {
    pub id: i64,
    pub device_hash: String,
    /// RFC 3339.
    pub timestamp: DateTime<Utc>,
    pub uplink: bool,
    pub payload: String,
    pub status: i32,
}

impl From<&Transaction> for TransactionReq {
    fn from(tx: &Transaction) -> Self {
        TransactionReq {
            id: tx.id,
            device_hash: tx.device_hash.clone(),
            timestamp: Utc.timestamp_opt(tx.timestamp, 0).single().unwrap_or_default(),
            uplink: tx.uplink,
            payload: tx.payload.clone(),
            status: TRANSACTION_STATUS_REPORTED,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct SyncRequest {
    pub transactions: Vec<TransactionReq>,
}

impl SyncRequest {
    pub fn from_batch(batch: &[Transaction]) -> Self {
        SyncRequest {
            transactions: batch.iter().map(TransactionReq::from).collect(),
        }
    }
}

/// A transaction as echoed back by the backend.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct TransactionRes {
    #[serde(default)]
    pub id: i64,
    #[serde(default)]
    pub device_hash: String,
    #[serde(default)]
    pub gateway_id: i64,
    #[serde(default)]
    pub hash: String,
    #[serde(default)]
    pub timestamp: Option<DateTime<Utc>>,
    #[serde(default)]
    pub status: i32,
    #[serde(default)]
    pub uplink: bool,
    #[serde(default)]
    pub payload: String,
    #[serde(default)]
    pub rejection_reason: Option<String>,
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub updated_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub expire_date: Option<DateTime<Utc>>,
    #[serde(default)]
    pub invoice_id: Option<String>,
}

/// Result of one upload.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct SyncResponse {
    #[serde(default, rename = "updatedUplink", deserialize_with = "null_as_default")]
    pub updated_uplink: Vec<TransactionRes>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub changed: Vec<TransactionRes>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub uplink: Vec<TransactionRes>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub results: Vec<TransactionRes>,
}
