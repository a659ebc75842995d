//! # Telemetry Payload
//!
//! The structured result of one collection window:
//! `service name → characteristic name → hex value`.
//!
//! Keys are the names as written in the schema (not the discovered ids),
//! so the backend sees the same spelling it published. The maps are
//! ordered, which keeps the serialized payload stable across runs.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::error::{CoreError, CoreResult};

/// Nested service → characteristic → hex-encoded value map.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Payload(BTreeMap<String, BTreeMap<String, String>>);

impl Payload {
    pub fn new() -> Self {
        Self::default()
    }

    /// Stores `value` under `service`/`characteristic`, replacing any
    /// previous reading.
    pub fn record(&mut self, service: &str, characteristic: &str, value: &[u8]) {
        self.0
            .entry(service.to_string())
            .or_default()
            .insert(characteristic.to_string(), hex::encode(value));
    }

    /// Returns the hex value recorded for a characteristic.
    pub fn get(&self, service: &str, characteristic: &str) -> Option<&str> {
        self.0
            .get(service)
            .and_then(|chars| chars.get(characteristic))
            .map(String::as_str)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Number of characteristic readings across all services.
    pub fn reading_count(&self) -> usize {
        self.0.values().map(BTreeMap::len).sum()
    }

    pub fn to_json(&self) -> CoreResult<String> {
        serde_json::to_string(&self.0).map_err(|e| CoreError::PayloadEncoding(e.to_string()))
    }
}
