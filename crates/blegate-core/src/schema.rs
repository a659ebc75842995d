//! # Device Group Schema
//!
//! The expected service/characteristic surface of a class of devices, as
//! fetched from the backend catalog.
//!
//! ## Name Matching
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  Schema name          normalize()        Discovered id                  │
//! │  ─────────────        ───────────        ─────────────                  │
//! │  "Device-Info"   ──►  "deviceinfo"  ◄──  "DeviceInfo" / "deviceinfo"    │
//! │  "0000180A-0000-…" ─► "0000180a0000…" ◄─ "0000180a0000…"                │
//! │                                                                         │
//! │  Hyphens stripped, case folded, on BOTH sides.                          │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use serde::{Deserialize, Serialize};

use crate::error::{CoreError, CoreResult};

/// Normalizes a service or characteristic name for comparison.
pub fn normalize_name(name: &str) -> String {
    name.chars()
        .filter(|c| *c != '-')
        .flat_map(char::to_lowercase)
        .collect()
}

fn names_match(schema_name: &str, discovered: &str) -> bool {
    normalize_name(schema_name) == normalize_name(discovered)
}

// =============================================================================
// Characteristic / Service
// =============================================================================

/// One expected characteristic.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CharacteristicSchema {
    pub name: String,

    /// The characteristic carries the device MAC.
    #[serde(default)]
    pub mac: bool,

    #[serde(default)]
    pub readable: bool,

    #[serde(default)]
    pub writable: bool,

    #[serde(default)]
    pub notifiable: bool,
}

/// One expected service and its characteristics.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceSchema {
    pub name: String,

    #[serde(default)]
    pub characteristics: Vec<CharacteristicSchema>,
}

impl ServiceSchema {
    /// Finds the characteristic whose normalized name equals `discovered`.
    pub fn match_characteristic(&self, discovered: &str) -> Option<&CharacteristicSchema> {
        self.characteristics
            .iter()
            .find(|c| names_match(&c.name, discovered))
    }
}

// =============================================================================
// Schema
// =============================================================================

/// Ordered set of services a device group exposes.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Schema(Vec<ServiceSchema>);

impl Schema {
    pub fn new(services: Vec<ServiceSchema>) -> Self {
        Schema(services)
    }

    /// Decodes the JSON stored in the `device_group.services` column.
    ///
    /// An empty column or a JSON `null` decode to an empty schema; the
    /// backend sends `null` for groups without services.
    pub fn from_json(group_id: &str, json: &str) -> CoreResult<Self> {
        let trimmed = json.trim();
        if trimmed.is_empty() {
            return Ok(Schema::default());
        }

        let services: Option<Vec<ServiceSchema>> = serde_json::from_str(trimmed)
            .map_err(|e| CoreError::invalid_schema(group_id, e))?;

        Ok(Schema(services.unwrap_or_default()))
    }

    /// Encodes the schema for storage.
    pub fn to_json(&self) -> CoreResult<String> {
        serde_json::to_string(&self.0).map_err(|e| CoreError::PayloadEncoding(e.to_string()))
    }

    pub fn services(&self) -> &[ServiceSchema] {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Finds the service whose normalized name equals `discovered`.
    ///
    /// The first match in schema order wins.
    pub fn match_service(&self, discovered: &str) -> Option<&ServiceSchema> {
        self.0.iter().find(|s| names_match(&s.name, discovered))
    }
}
