//! # Radio Transport Seam
//!
//! The link-layer surface the orchestrator and extractor drive. A backend
//! (btleplug in the host binary, a fake in tests) implements [`Radio`] and
//! pushes [`RadioEvent`]s into the orchestrator's event queue.
//!
//! ## Call / Event Split
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                                                                         │
//! │  Orchestrator ──── calls ────►  Radio                                   │
//! │               start_scan / stop_scan / connect / cancel_connection      │
//! │               set_mtu                                                   │
//! │                                                                         │
//! │  Extractor ─────── calls ────►  Radio                                   │
//! │               discover_services / discover_characteristics              │
//! │               discover_descriptors / read_characteristic / subscribe    │
//! │                                                                         │
//! │  Radio ──────── RadioEvent ───► mpsc ───► Orchestrator actor            │
//! │               StateChanged / Discovered / Connected                     │
//! │               ConnectFailed / Disconnected                              │
//! │                                                                         │
//! │  Radio ──── NotificationSink ─► per-collection channel ─► Extractor     │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! `connect` only initiates a connection; the outcome arrives later as a
//! `Connected` or `ConnectFailed` event.

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::error::RadioResult;

// =============================================================================
// Events
// =============================================================================

/// Power state of the local adapter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AdapterState {
    PoweredOn,
    PoweredOff,
    Unknown,
}

/// An advertising peripheral seen during a scan.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Peripheral {
    /// Transport-level id. Compared case-insensitively with device hashes.
    pub id: String,
    pub name: Option<String>,
    pub rssi: Option<i16>,
}

impl Peripheral {
    pub fn new(id: impl Into<String>) -> Self {
        Peripheral {
            id: id.into(),
            name: None,
            rssi: None,
        }
    }
}

/// Link-layer events delivered to the orchestrator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RadioEvent {
    StateChanged(AdapterState),
    Discovered(Peripheral),
    Connected(String),
    ConnectFailed { peripheral: String, reason: String },
    Disconnected(String),
}

// =============================================================================
// GATT Surface
// =============================================================================

/// Device-reported capabilities of a characteristic.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CharacteristicProperties {
    pub read: bool,
    pub write: bool,
    pub notify: bool,
    pub indicate: bool,
}

impl CharacteristicProperties {
    /// True when the characteristic can push values.
    pub fn can_subscribe(&self) -> bool {
        self.notify || self.indicate
    }
}

/// A service discovered on the connected peripheral.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceInfo {
    /// Discovered identifier, usually the UUID without hyphens.
    pub id: String,
}

/// A characteristic discovered within a service.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CharacteristicInfo {
    pub id: String,
    pub properties: CharacteristicProperties,
}

/// Addresses one characteristic of one peripheral.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CharacteristicKey {
    pub peripheral: String,
    pub service: String,
    pub characteristic: String,
}

impl CharacteristicKey {
    pub fn new(
        peripheral: impl Into<String>,
        service: impl Into<String>,
        characteristic: impl Into<String>,
    ) -> Self {
        CharacteristicKey {
            peripheral: peripheral.into(),
            service: service.into(),
            characteristic: characteristic.into(),
        }
    }
}

/// A value pushed by a subscribed characteristic.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notification {
    pub key: CharacteristicKey,
    pub value: Vec<u8>,
}

/// Where a radio backend delivers notification values.
///
/// Delivery never blocks. Once the collection that created the sink has
/// finished, deliveries are discarded.
#[derive(Debug, Clone)]
pub struct NotificationSink {
    tx: mpsc::UnboundedSender<Notification>,
}

impl NotificationSink {
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<Notification>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (NotificationSink { tx }, rx)
    }

    /// Returns false when the collection is no longer listening.
    pub fn deliver(&self, key: CharacteristicKey, value: Vec<u8>) -> bool {
        self.tx.send(Notification { key, value }).is_ok()
    }

    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

// =============================================================================
// Radio Trait
// =============================================================================

/// Operations the runtime needs from the radio stack.
#[async_trait]
pub trait Radio: Send + Sync {
    async fn start_scan(&self) -> RadioResult<()>;

    async fn stop_scan(&self) -> RadioResult<()>;

    /// Initiates a connection. The outcome is reported as a [`RadioEvent`].
    async fn connect(&self, peripheral: &str) -> RadioResult<()>;

    /// Tears down a connection or a pending connection attempt.
    async fn cancel_connection(&self, peripheral: &str) -> RadioResult<()>;

    /// Requests an MTU; returns the negotiated value.
    async fn set_mtu(&self, peripheral: &str, mtu: u16) -> RadioResult<u16>;

    async fn discover_services(&self, peripheral: &str) -> RadioResult<Vec<ServiceInfo>>;

    async fn discover_characteristics(
        &self,
        peripheral: &str,
        service: &str,
    ) -> RadioResult<Vec<CharacteristicInfo>>;

    /// Must be called before [`Radio::subscribe`] on the same characteristic.
    async fn discover_descriptors(&self, key: &CharacteristicKey) -> RadioResult<()>;

    async fn read_characteristic(&self, key: &CharacteristicKey) -> RadioResult<Vec<u8>>;

    /// Enables notifications, delivering every value into `sink`.
    async fn subscribe(&self, key: &CharacteristicKey, sink: NotificationSink) -> RadioResult<()>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_can_subscribe() {
        let mut props = CharacteristicProperties::default();
        assert!(!props.can_subscribe());
        props.indicate = true;
        assert!(props.can_subscribe());
    }

    #[tokio::test]
    async fn test_notification_sink_after_receiver_dropped() {
        let (sink, mut rx) = NotificationSink::channel();
        let key = CharacteristicKey::new("ab:cd", "180f", "2a19");

        assert!(sink.deliver(key.clone(), vec![0x64]));
        assert_eq!(rx.recv().await.unwrap().value, vec![0x64]);

        drop(rx);
        assert!(sink.is_closed());
        assert!(!sink.deliver(key, vec![0x63]));
    }
}
