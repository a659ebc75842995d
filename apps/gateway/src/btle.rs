//! # btleplug Radio Backend
//!
//! [`Radio`] over the host Bluetooth stack.
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  Adapter::events() ──► pump task ──► RadioEvent ──► orchestrator queue  │
//! │                                                                         │
//! │  connect()  ──► spawned Peripheral::connect ──► Connected/ConnectFailed │
//! │  subscribe() ─► Peripheral::notifications   ──► NotificationSink        │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Peripherals are keyed by their Bluetooth address, which is what the
//! backend catalog lists as the device hash. Only the peripheral being
//! connected is held here; it is looked up in the adapter on `connect` and
//! dropped on `cancel_connection`. btleplug has no MTU request, so
//! `set_mtu` always fails; the orchestrator treats that as non-fatal.
//!
//! Services and characteristics are named like the schema names them:
//! SIG-assigned UUIDs by their 16-bit form (`180a`), others by the
//! undashed 128-bit form.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use btleplug::api::bleuuid::BleUuid;
use btleplug::api::{
    Central, CentralEvent, CentralState, Characteristic, Manager as _, Peripheral as _, ScanFilter,
};
use btleplug::platform::{Adapter, Manager, Peripheral as PlatformPeripheral, PeripheralId};
use futures_util::StreamExt;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};
use uuid::Uuid;

use blegate_sync::{
    AdapterState, CharacteristicInfo, CharacteristicKey, CharacteristicProperties,
    NotificationSink, Peripheral, Radio, RadioError, RadioEvent, RadioResult, ServiceInfo,
};

pub struct BtleRadio {
    adapter: Adapter,
    events: mpsc::Sender<RadioEvent>,
    links: Links<PlatformPeripheral>,
}

/// Handles of peripherals between `connect` and `cancel_connection`,
/// keyed by lowercased address.
struct Links<P> {
    map: Mutex<HashMap<String, P>>,
}

impl<P: Clone> Links<P> {
    fn new() -> Self {
        Links {
            map: Mutex::new(HashMap::new()),
        }
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, P>> {
        self.map
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn open(&self, address: &str, peripheral: P) {
        self.lock().insert(address.to_lowercase(), peripheral);
    }

    fn get(&self, address: &str) -> RadioResult<P> {
        self.lock()
            .get(&address.to_lowercase())
            .cloned()
            .ok_or_else(|| RadioError::NotConnected(address.to_string()))
    }

    fn close(&self, address: &str) -> RadioResult<P> {
        self.lock()
            .remove(&address.to_lowercase())
            .ok_or_else(|| RadioError::NotConnected(address.to_string()))
    }

    #[cfg(test)]
    fn len(&self) -> usize {
        self.lock().len()
    }
}

impl BtleRadio {
    /// Opens the first adapter and starts forwarding its events.
    pub async fn open(events: mpsc::Sender<RadioEvent>) -> RadioResult<Arc<Self>> {
        let manager = Manager::new()
            .await
            .map_err(|e| RadioError::Unavailable(e.to_string()))?;
        let adapter = manager
            .adapters()
            .await
            .map_err(|e| RadioError::Unavailable(e.to_string()))?
            .into_iter()
            .next()
            .ok_or_else(|| RadioError::Unavailable("no Bluetooth adapter found".into()))?;

        let stream = adapter
            .events()
            .await
            .map_err(|e| RadioError::Unavailable(e.to_string()))?;

        let state = adapter
            .adapter_state()
            .await
            .map_err(|e| RadioError::Unavailable(e.to_string()))?;

        info!(
            adapter = %adapter.adapter_info().await.unwrap_or_default(),
            ?state,
            "Bluetooth adapter opened"
        );

        let radio = Arc::new(BtleRadio {
            adapter,
            events,
            links: Links::new(),
        });

        // The initial state is delivered like any later change.
        let _ = radio
            .events
            .send(RadioEvent::StateChanged(adapter_state(state)))
            .await;

        let pump = radio.clone();
        tokio::spawn(async move {
            let mut stream = stream;
            while let Some(event) = stream.next().await {
                if !pump.forward(event).await {
                    break;
                }
            }
            debug!("Bluetooth event pump stopped");
        });

        Ok(radio)
    }

    /// Translates one adapter event. Returns false once nobody listens.
    async fn forward(&self, event: CentralEvent) -> bool {
        let event = match event {
            CentralEvent::StateUpdate(state) => Some(RadioEvent::StateChanged(adapter_state(state))),
            CentralEvent::DeviceDiscovered(id) | CentralEvent::DeviceUpdated(id) => {
                self.discovered(&id).await.map(RadioEvent::Discovered)
            }
            CentralEvent::DeviceDisconnected(id) => {
                self.address_of(&id).await.map(RadioEvent::Disconnected)
            }
            _ => None,
        };

        match event {
            Some(event) => self.events.send(event).await.is_ok(),
            None => !self.events.is_closed(),
        }
    }

    async fn discovered(&self, id: &PeripheralId) -> Option<Peripheral> {
        let peripheral = self.adapter.peripheral(id).await.ok()?;
        let address = peripheral.address().to_string();
        let properties = peripheral.properties().await.ok().flatten();

        Some(Peripheral {
            id: address,
            name: properties.as_ref().and_then(|p| p.local_name.clone()),
            rssi: properties.and_then(|p| p.rssi),
        })
    }

    async fn address_of(&self, id: &PeripheralId) -> Option<String> {
        let peripheral = self.adapter.peripheral(id).await.ok()?;
        Some(peripheral.address().to_string())
    }

    /// Finds a peripheral the adapter currently knows by its address.
    async fn resolve(&self, address: &str) -> RadioResult<PlatformPeripheral> {
        self.adapter
            .peripherals()
            .await
            .map_err(|e| RadioError::failed("connect", e))?
            .into_iter()
            .find(|p| p.address().to_string().eq_ignore_ascii_case(address))
            .ok_or_else(|| RadioError::failed("connect", format!("{} is out of range", address)))
    }

    fn characteristic(
        &self,
        key: &CharacteristicKey,
    ) -> RadioResult<(PlatformPeripheral, Characteristic)> {
        let peripheral = self.links.get(&key.peripheral)?;
        let characteristic = peripheral
            .characteristics()
            .into_iter()
            .find(|c| gatt_id(c.uuid) == key.characteristic && gatt_id(c.service_uuid) == key.service)
            .ok_or_else(|| {
                RadioError::failed(
                    "lookup",
                    format!("characteristic {} not discovered", key.characteristic),
                )
            })?;
        Ok((peripheral, characteristic))
    }
}

fn gatt_id(uuid: Uuid) -> String {
    match uuid.to_ble_u16() {
        Some(short) => format!("{:04x}", short),
        None => uuid.simple().to_string(),
    }
}

fn adapter_state(state: CentralState) -> AdapterState {
    match state {
        CentralState::PoweredOn => AdapterState::PoweredOn,
        CentralState::PoweredOff => AdapterState::PoweredOff,
        _ => AdapterState::Unknown,
    }
}

fn properties(c: &Characteristic) -> CharacteristicProperties {
    use btleplug::api::CharPropFlags;

    CharacteristicProperties {
        read: c.properties.contains(CharPropFlags::READ),
        write: c.properties.contains(CharPropFlags::WRITE),
        notify: c.properties.contains(CharPropFlags::NOTIFY),
        indicate: c.properties.contains(CharPropFlags::INDICATE),
    }
}

#[async_trait]
impl Radio for BtleRadio {
    async fn start_scan(&self) -> RadioResult<()> {
        self.adapter
            .start_scan(ScanFilter::default())
            .await
            .map_err(|e| RadioError::failed("start_scan", e))
    }

    async fn stop_scan(&self) -> RadioResult<()> {
        self.adapter
            .stop_scan()
            .await
            .map_err(|e| RadioError::failed("stop_scan", e))
    }

    async fn connect(&self, peripheral: &str) -> RadioResult<()> {
        let handle = self.resolve(peripheral).await?;
        self.links.open(peripheral, handle.clone());
        let events = self.events.clone();
        let id = peripheral.to_string();

        tokio::spawn(async move {
            let event = match handle.connect().await {
                Ok(()) => RadioEvent::Connected(id),
                Err(e) => RadioEvent::ConnectFailed {
                    peripheral: id,
                    reason: e.to_string(),
                },
            };
            let _ = events.send(event).await;
        });
        Ok(())
    }

    async fn cancel_connection(&self, peripheral: &str) -> RadioResult<()> {
        self.links
            .close(peripheral)?
            .disconnect()
            .await
            .map_err(|e| RadioError::failed("disconnect", e))
    }

    async fn set_mtu(&self, _peripheral: &str, _mtu: u16) -> RadioResult<u16> {
        Err(RadioError::failed("set_mtu", "not supported by btleplug"))
    }

    async fn discover_services(&self, peripheral: &str) -> RadioResult<Vec<ServiceInfo>> {
        let handle = self.links.get(peripheral)?;
        handle
            .discover_services()
            .await
            .map_err(|e| RadioError::failed("discover_services", e))?;

        Ok(handle
            .services()
            .into_iter()
            .map(|s| ServiceInfo { id: gatt_id(s.uuid) })
            .collect())
    }

    async fn discover_characteristics(
        &self,
        peripheral: &str,
        service: &str,
    ) -> RadioResult<Vec<CharacteristicInfo>> {
        let handle = self.links.get(peripheral)?;
        let service = handle
            .services()
            .into_iter()
            .find(|s| gatt_id(s.uuid) == service)
            .ok_or_else(|| {
                RadioError::failed("discover_characteristics", format!("unknown service {}", service))
            })?;

        Ok(service
            .characteristics
            .iter()
            .map(|c| CharacteristicInfo {
                id: gatt_id(c.uuid),
                properties: properties(c),
            })
            .collect())
    }

    async fn discover_descriptors(&self, key: &CharacteristicKey) -> RadioResult<()> {
        // btleplug resolves descriptors during service discovery.
        self.characteristic(key).map(|_| ())
    }

    async fn read_characteristic(&self, key: &CharacteristicKey) -> RadioResult<Vec<u8>> {
        let (peripheral, characteristic) = self.characteristic(key)?;
        peripheral
            .read(&characteristic)
            .await
            .map_err(|e| RadioError::failed("read", e))
    }

    async fn subscribe(&self, key: &CharacteristicKey, sink: NotificationSink) -> RadioResult<()> {
        let (peripheral, characteristic) = self.characteristic(key)?;
        let mut notifications = peripheral
            .notifications()
            .await
            .map_err(|e| RadioError::failed("subscribe", e))?;
        peripheral
            .subscribe(&characteristic)
            .await
            .map_err(|e| RadioError::failed("subscribe", e))?;

        let key = key.clone();
        let uuid = characteristic.uuid;
        tokio::spawn(async move {
            while let Some(notification) = notifications.next().await {
                if notification.uuid != uuid {
                    continue;
                }
                if !sink.deliver(key.clone(), notification.value) {
                    break;
                }
            }
            if let Err(e) = peripheral.unsubscribe(&characteristic).await {
                warn!(characteristic = %key.characteristic, error = %e, "Unsubscribe failed");
            }
        });
        Ok(())
    }
}
