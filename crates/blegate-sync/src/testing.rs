//! In-process fakes for the radio and cloud seams, shared by unit tests.

use std::collections::{HashMap, HashSet};
use std::future::Future;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::mpsc;

use blegate_core::{Device, DeviceGroup, Transaction};
use blegate_db::{Database, DbConfig};

use crate::cloud::CloudApi;
use crate::error::{ClientError, ClientResult, RadioError, RadioResult};
use crate::protocol::{CatalogSnapshot, GateInfo, SyncResponse};
use crate::radio::{
    CharacteristicInfo, CharacteristicKey, CharacteristicProperties, NotificationSink, Radio,
    RadioEvent, ServiceInfo,
};

pub(crate) const DEVICE_HASH: &str = "AB:CD:EF:01:02:03";
pub(crate) const GROUP_ID: &str = "grp-1";

pub(crate) const SCHEMA: &str = r#"[
    {"name": "Device-Info", "characteristics": [
        {"name": "Serial-Number", "readable": true},
        {"name": "Battery", "readable": true, "notifiable": true}
    ]}
]"#;

/// Upper bound for anything a test waits on. Tests touching the store run
/// in real time: sqlx drives SQLite from a worker thread, so a paused clock
/// would auto-advance into the pool's acquire timeout.
const PATIENCE: Duration = Duration::from_secs(5);

/// Awaits `fut`, failing the test if it takes longer than [`PATIENCE`].
pub(crate) async fn within<F: Future>(fut: F) -> F::Output {
    tokio::time::timeout(PATIENCE, fut)
        .await
        .expect("timed out waiting")
}

/// Polls `check` every few milliseconds until it holds.
pub(crate) async fn eventually<F, Fut>(mut check: F)
where
    F: FnMut() -> Fut,
    Fut: Future<Output = bool>,
{
    within(async {
        while !check().await {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
}

// =============================================================================
// Catalog fixtures
// =============================================================================

pub(crate) fn device(hash: &str, group_id: &str) -> Device {
    Device {
        id: 0,
        hash: hash.to_string(),
        manufacturer: "acme".to_string(),
        created_at: 1_700_000_000,
        updated_at: 1_700_000_000,
        exonum_id: format!("ex-{}", hash),
        device_group_id: group_id.to_string(),
        owner_key: "owner".to_string(),
    }
}

pub(crate) fn device_group(exonum_id: &str, services: &str) -> DeviceGroup {
    DeviceGroup {
        id: 0,
        exonum_id: exonum_id.to_string(),
        name: "thermo".to_string(),
        group_type: 1,
        uplink_lifetime: 0,
        downlink_lifetime: 0,
        services: services.to_string(),
        created_at: 1_700_000_000,
        updated_at: 1_700_000_000,
        owner_key: "owner".to_string(),
    }
}

/// In-memory store holding one whitelisted device and its group.
pub(crate) async fn seeded_db() -> Arc<Database> {
    let db = Database::new(DbConfig::in_memory()).await.unwrap();
    db.catalog()
        .upsert_device_group(&device_group(GROUP_ID, SCHEMA))
        .await
        .unwrap();
    db.catalog()
        .upsert_device(&device(DEVICE_HASH, GROUP_ID))
        .await
        .unwrap();
    Arc::new(db)
}

// =============================================================================
// Fake Cloud
// =============================================================================

#[derive(Default)]
struct CloudState {
    catalog: CatalogSnapshot,
    catalog_failure: Option<String>,
    upload_failure: Option<String>,
    auth_failure: bool,
    catalog_calls: usize,
    uploads: Vec<(Vec<i64>, i64)>,
}

/// Scriptable [`CloudApi`]; records every upload as `(ids, watermark)`.
#[derive(Default)]
pub(crate) struct FakeCloud {
    state: Mutex<CloudState>,
}

impl FakeCloud {
    pub(crate) fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub(crate) fn set_catalog(&self, catalog: CatalogSnapshot) {
        self.state.lock().unwrap().catalog = catalog;
    }

    pub(crate) fn fail_catalog(&self, reason: Option<&str>) {
        self.state.lock().unwrap().catalog_failure = reason.map(str::to_string);
    }

    pub(crate) fn fail_uploads(&self, reason: Option<&str>) {
        self.state.lock().unwrap().upload_failure = reason.map(str::to_string);
    }

    pub(crate) fn reject_auth(&self) {
        self.state.lock().unwrap().auth_failure = true;
    }

    pub(crate) fn catalog_calls(&self) -> usize {
        self.state.lock().unwrap().catalog_calls
    }

    pub(crate) fn uploads(&self) -> Vec<(Vec<i64>, i64)> {
        self.state.lock().unwrap().uploads.clone()
    }
}

#[async_trait]
impl CloudApi for FakeCloud {
    async fn authenticate(&self) -> ClientResult<Option<GateInfo>> {
        if self.state.lock().unwrap().auth_failure {
            return Err(ClientError::Status {
                status: 401,
                body: "unknown api key".into(),
            });
        }
        Ok(None)
    }

    async fn fetch_catalog(&self) -> ClientResult<CatalogSnapshot> {
        let mut state = self.state.lock().unwrap();
        state.catalog_calls += 1;
        match &state.catalog_failure {
            Some(reason) => Err(ClientError::MalformedResponse(reason.clone())),
            None => Ok(state.catalog.clone()),
        }
    }

    async fn upload_transactions(
        &self,
        batch: &[Transaction],
        watermark: i64,
    ) -> ClientResult<SyncResponse> {
        let mut state = self.state.lock().unwrap();
        if let Some(reason) = &state.upload_failure {
            return Err(ClientError::Transport(reason.clone()));
        }
        state
            .uploads
            .push((batch.iter().map(|t| t.id).collect(), watermark));
        Ok(SyncResponse::default())
    }
}

// =============================================================================
// Fake Radio
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub(crate) enum ConnectMode {
    /// Emit `Connected` immediately.
    #[default]
    Succeed,
    /// Emit `ConnectFailed` immediately.
    Fail,
    /// Emit nothing.
    Silent,
}

#[derive(Default)]
struct RadioState {
    calls: Vec<String>,
    connect_mode: ConnectMode,
    fail_mtu: bool,
    fail_service_discovery: bool,
    services: Vec<(ServiceInfo, Vec<CharacteristicInfo>)>,
    values: HashMap<String, Vec<u8>>,
    failing_reads: HashSet<String>,
    failing_descriptors: HashSet<String>,
    notifications: HashMap<String, Vec<Vec<u8>>>,
}

/// Scriptable [`Radio`]. Connect outcomes and the disconnect that follows
/// `cancel_connection` are pushed into the orchestrator's event queue.
pub(crate) struct FakeRadio {
    events: mpsc::Sender<RadioEvent>,
    state: Mutex<RadioState>,
}

impl FakeRadio {
    pub(crate) fn new() -> (Arc<Self>, mpsc::Receiver<RadioEvent>) {
        let (events, rx) = mpsc::channel(64);
        let radio = FakeRadio {
            events,
            state: Mutex::new(RadioState::default()),
        };
        (Arc::new(radio), rx)
    }

    /// A second handle onto the event queue, for injecting events.
    pub(crate) fn events(&self) -> mpsc::Sender<RadioEvent> {
        self.events.clone()
    }

    pub(crate) fn set_connect_mode(&self, mode: ConnectMode) {
        self.state.lock().unwrap().connect_mode = mode;
    }

    pub(crate) fn fail_mtu(&self) {
        self.state.lock().unwrap().fail_mtu = true;
    }

    pub(crate) fn fail_service_discovery(&self) {
        self.state.lock().unwrap().fail_service_discovery = true;
    }

    pub(crate) fn add_service(&self, service: &str, characteristics: Vec<CharacteristicInfo>) {
        self.state.lock().unwrap().services.push((
            ServiceInfo {
                id: service.to_string(),
            },
            characteristics,
        ));
    }

    pub(crate) fn set_value(&self, characteristic: &str, value: &[u8]) {
        self.state
            .lock()
            .unwrap()
            .values
            .insert(characteristic.to_string(), value.to_vec());
    }

    pub(crate) fn fail_read(&self, characteristic: &str) {
        self.state
            .lock()
            .unwrap()
            .failing_reads
            .insert(characteristic.to_string());
    }

    pub(crate) fn fail_descriptors(&self, characteristic: &str) {
        self.state
            .lock()
            .unwrap()
            .failing_descriptors
            .insert(characteristic.to_string());
    }

    pub(crate) fn notify_on_subscribe(&self, characteristic: &str, values: Vec<Vec<u8>>) {
        self.state
            .lock()
            .unwrap()
            .notifications
            .insert(characteristic.to_string(), values);
    }

    /// Installs the GATT layout matching [`SCHEMA`].
    pub(crate) fn install_device_info(&self) {
        self.add_service(
            "deviceinfo",
            vec![
                characteristic("serialnumber", true, false),
                characteristic("battery", true, true),
                characteristic("firmware", true, false),
            ],
        );
        self.add_service("0000180f00001000800000805f9b34fb", vec![]);
        self.set_value("serialnumber", &[0x12, 0x34]);
        self.set_value("battery", &[0x64]);
        self.set_value("firmware", &[0x01]);
    }

    pub(crate) fn calls(&self) -> Vec<String> {
        self.state.lock().unwrap().calls.clone()
    }

    /// Number of recorded calls starting with `prefix`.
    pub(crate) fn count(&self, prefix: &str) -> usize {
        self.calls().iter().filter(|c| c.starts_with(prefix)).count()
    }

    fn record(&self, call: String) {
        self.state.lock().unwrap().calls.push(call);
    }
}

pub(crate) fn characteristic(id: &str, read: bool, notify: bool) -> CharacteristicInfo {
    CharacteristicInfo {
        id: id.to_string(),
        properties: CharacteristicProperties {
            read,
            write: false,
            notify,
            indicate: false,
        },
    }
}

#[async_trait]
impl Radio for FakeRadio {
    async fn start_scan(&self) -> RadioResult<()> {
        self.record("start_scan".into());
        Ok(())
    }

    async fn stop_scan(&self) -> RadioResult<()> {
        self.record("stop_scan".into());
        Ok(())
    }

    async fn connect(&self, peripheral: &str) -> RadioResult<()> {
        self.record(format!("connect:{}", peripheral));
        let mode = self.state.lock().unwrap().connect_mode;
        let event = match mode {
            ConnectMode::Succeed => Some(RadioEvent::Connected(peripheral.to_string())),
            ConnectMode::Fail => Some(RadioEvent::ConnectFailed {
                peripheral: peripheral.to_string(),
                reason: "page timeout".into(),
            }),
            ConnectMode::Silent => None,
        };
        if let Some(event) = event {
            let _ = self.events.try_send(event);
        }
        Ok(())
    }

    async fn cancel_connection(&self, peripheral: &str) -> RadioResult<()> {
        self.record(format!("cancel:{}", peripheral));
        let _ = self
            .events
            .try_send(RadioEvent::Disconnected(peripheral.to_string()));
        Ok(())
    }

    async fn set_mtu(&self, _peripheral: &str, mtu: u16) -> RadioResult<u16> {
        self.record(format!("mtu:{}", mtu));
        if self.state.lock().unwrap().fail_mtu {
            return Err(RadioError::failed("set_mtu", "not supported"));
        }
        Ok(mtu)
    }

    async fn discover_services(&self, _peripheral: &str) -> RadioResult<Vec<ServiceInfo>> {
        self.record("services".into());
        let state = self.state.lock().unwrap();
        if state.fail_service_discovery {
            return Err(RadioError::failed("discover_services", "att error"));
        }
        Ok(state.services.iter().map(|(s, _)| s.clone()).collect())
    }

    async fn discover_characteristics(
        &self,
        _peripheral: &str,
        service: &str,
    ) -> RadioResult<Vec<CharacteristicInfo>> {
        self.record(format!("characteristics:{}", service));
        let state = self.state.lock().unwrap();
        Ok(state
            .services
            .iter()
            .find(|(s, _)| s.id == service)
            .map(|(_, chars)| chars.clone())
            .unwrap_or_default())
    }

    async fn discover_descriptors(&self, key: &CharacteristicKey) -> RadioResult<()> {
        self.record(format!("descriptors:{}", key.characteristic));
        if self
            .state
            .lock()
            .unwrap()
            .failing_descriptors
            .contains(&key.characteristic)
        {
            return Err(RadioError::failed("discover_descriptors", "att error"));
        }
        Ok(())
    }

    async fn read_characteristic(&self, key: &CharacteristicKey) -> RadioResult<Vec<u8>> {
        self.record(format!("read:{}", key.characteristic));
        let state = self.state.lock().unwrap();
        if state.failing_reads.contains(&key.characteristic) {
            return Err(RadioError::failed("read", "insufficient authentication"));
        }
        state
            .values
            .get(&key.characteristic)
            .cloned()
            .ok_or_else(|| RadioError::NotConnected(key.peripheral.clone()))
    }

    async fn subscribe(&self, key: &CharacteristicKey, sink: NotificationSink) -> RadioResult<()> {
        // Descriptor discovery must have happened first.
        let calls = self.calls();
        let descriptors = format!("descriptors:{}", key.characteristic);
        if !calls.contains(&descriptors) {
            return Err(RadioError::failed("subscribe", "descriptors not discovered"));
        }

        self.record(format!("subscribe:{}", key.characteristic));
        let pending = self
            .state
            .lock()
            .unwrap()
            .notifications
            .get(&key.characteristic)
            .cloned()
            .unwrap_or_default();
        for value in pending {
            sink.deliver(key.clone(), value);
        }
        Ok(())
    }
}
