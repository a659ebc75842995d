//! # Domain Types
//!
//! Core domain types used throughout the gateway.
//!
//! ## Type Hierarchy
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                         Domain Types                                    │
//! │                                                                         │
//! │  ┌─────────────────┐   ┌─────────────────┐   ┌─────────────────┐       │
//! │  │  DeviceGroup    │   │     Device      │   │  Transaction    │       │
//! │  │  ─────────────  │   │  ─────────────  │   │  ─────────────  │       │
//! │  │  exonum_id (PK) │◄──│  device_group_id│   │  id (autoinc)   │       │
//! │  │  name           │   │  hash (PK, ci)  │◄──│  device_hash    │       │
//! │  │  services(JSON) │   │  manufacturer   │   │  timestamp      │       │
//! │  └─────────────────┘   └─────────────────┘   │  payload (JSON) │       │
//! │                                              │  sent           │       │
//! │                                              └─────────────────┘       │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Join Keys
//! Devices reference groups through `device_group_id == exonum_id`. The
//! relation is not enforced: a device whose group never arrived is a
//! recoverable condition reported at connect time.

use serde::{Deserialize, Serialize};

use crate::error::CoreResult;
use crate::payload::Payload;
use crate::schema::Schema;

// =============================================================================
// Device
// =============================================================================

/// A whitelisted peripheral the gateway is allowed to connect to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "sqlx", derive(sqlx::FromRow))]
pub struct Device {
    /// Local row id (ignored on upsert).
    pub id: i64,

    /// Radio-level identity. Unique, compared case-insensitively.
    pub hash: String,

    pub manufacturer: String,

    /// Epoch seconds.
    pub created_at: i64,

    /// Epoch seconds.
    pub updated_at: i64,

    pub exonum_id: String,

    /// Foreign key to [`DeviceGroup::exonum_id`].
    pub device_group_id: String,

    pub owner_key: String,
}

// =============================================================================
// Device Group
// =============================================================================

/// A class of devices sharing the same service/characteristic schema.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "sqlx", derive(sqlx::FromRow))]
pub struct DeviceGroup {
    /// Local row id (ignored on upsert).
    pub id: i64,

    /// Backend identity. Unique.
    pub exonum_id: String,

    pub name: String,

    pub group_type: i64,

    pub uplink_lifetime: i64,

    pub downlink_lifetime: i64,

    /// The schema as stored: a JSON array of services.
    pub services: String,

    /// Epoch seconds.
    pub created_at: i64,

    /// Epoch seconds.
    pub updated_at: i64,

    pub owner_key: String,
}

impl DeviceGroup {
    /// Decodes the embedded schema.
    pub fn schema(&self) -> CoreResult<Schema> {
        Schema::from_json(&self.exonum_id, &self.services)
    }
}

// =============================================================================
// Transaction
// =============================================================================

/// A persisted telemetry record.
///
/// Created once per successful collection and never deleted. The only
/// mutation is `sent` flipping from false to true.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "sqlx", derive(sqlx::FromRow))]
pub struct Transaction {
    /// Local autoincrement id.
    pub id: i64,

    /// Backend-assigned hash. Always empty for locally produced records.
    pub hash: String,

    pub device_hash: String,

    /// Epoch seconds.
    pub timestamp: i64,

    /// True for records travelling backend → device.
    pub uplink: bool,

    pub sent: bool,

    /// Serialized [`Payload`].
    pub payload: String,
}

/// A transaction that has not been written to the store yet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewTransaction {
    pub device_hash: String,
    pub timestamp: i64,
    pub uplink: bool,
    pub payload: String,
}

impl NewTransaction {
    /// Builds a downlink record from a collected payload.
    pub fn from_payload(
        device_hash: impl Into<String>,
        payload: &Payload,
        timestamp: i64,
    ) -> CoreResult<Self> {
        Ok(NewTransaction {
            device_hash: device_hash.into(),
            timestamp,
            uplink: false,
            payload: payload.to_json()?,
        })
    }
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_device_group_schema_decoding() {
        let group = DeviceGroup {
            id: 1,
            exonum_id: "grp-1".to_string(),
            name: "thermo".to_string(),
            group_type: 0,
            uplink_lifetime: 0,
            downlink_lifetime: 0,
            services: r#"[{"name":"Device-Info","characteristics":[]}]"#.to_string(),
            created_at: 0,
            updated_at: 0,
            owner_key: String::new(),
        };

        let schema = group.schema().unwrap();
        assert_eq!(schema.services().len(), 1);
        assert_eq!(schema.services()[0].name, "Device-Info");
    }

    #[test]
    fn test_new_transaction_from_empty_payload() {
        let tx = NewTransaction::from_payload("ab:cd", &Payload::new(), 1_700_000_000).unwrap();
        assert_eq!(tx.payload, "{}");
        assert!(!tx.uplink);
        assert_eq!(tx.timestamp, 1_700_000_000);
    }
}
