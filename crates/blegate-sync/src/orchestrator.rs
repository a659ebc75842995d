//! # Connection Orchestrator
//!
//! Actor owning the device connection lifecycle and the per-device backoff
//! map. Radio events and handle commands are its only inputs, so no state
//! is shared with other tasks.
//!
//! ## Lifecycle
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                                                                         │
//! │  ┌──────┐  Discovered (whitelisted,   ┌────────────┐                    │
//! │  │ Idle │──── backoff elapsed) ──────►│ Connecting │──── timeout ───┐   │
//! │  └──────┘     stop_scan + connect     └─────┬──────┘  ConnectFailed │   │
//! │     ▲                                       │ Connected             │   │
//! │     │                                       ▼                       │   │
//! │     │                                 ┌───────────┐ lookup failed   │   │
//! │     │                                 │ Connected │─────────────────┤   │
//! │     │                                 └─────┬─────┘                 │   │
//! │     │                                       │ device + schema       │   │
//! │     │                                       ▼                       │   │
//! │     │                                 ┌────────────┐                │   │
//! │     │                                 │ Extracting │────────────────┤   │
//! │     │                                 └────────────┘                │   │
//! │     │                                                               ▼   │
//! │     │      backoff[id] = now + I       ┌───────────────┐                │
//! │     └───────── resume scan ◄───────────│ Disconnecting │ cancel_connection
//! │                                        └───────────────┘   (once)       │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Only one link is active at a time: discoveries while not `Idle` are
//! ignored, and scanning is paused from connect until release.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::{mpsc, oneshot};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use blegate_core::{Device, NewTransaction, Schema};
use blegate_db::Database;

use crate::config::GatewayConfig;
use crate::error::{GatewayError, GatewayResult, RadioError};
use crate::events::{EventSink, EventSource};
use crate::extractor::Extractor;
use crate::radio::{AdapterState, Peripheral, Radio, RadioEvent};

// =============================================================================
// Link State
// =============================================================================

/// State of the single radio link.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LinkState {
    Idle,
    Connecting { peripheral: String },
    Connected { peripheral: String },
    Extracting { peripheral: String },
    Disconnecting { peripheral: String },
}

impl LinkState {
    pub fn is_idle(&self) -> bool {
        matches!(self, LinkState::Idle)
    }

    /// The peripheral holding the link, if any.
    pub fn peripheral(&self) -> Option<&str> {
        match self {
            LinkState::Idle => None,
            LinkState::Connecting { peripheral }
            | LinkState::Connected { peripheral }
            | LinkState::Extracting { peripheral }
            | LinkState::Disconnecting { peripheral } => Some(peripheral),
        }
    }

    fn is_connecting_to(&self, id: &str) -> bool {
        matches!(self, LinkState::Connecting { peripheral } if peripheral.eq_ignore_ascii_case(id))
    }
}

impl std::fmt::Display for LinkState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LinkState::Idle => write!(f, "idle"),
            LinkState::Connecting { peripheral } => write!(f, "connecting({})", peripheral),
            LinkState::Connected { peripheral } => write!(f, "connected({})", peripheral),
            LinkState::Extracting { peripheral } => write!(f, "extracting({})", peripheral),
            LinkState::Disconnecting { peripheral } => write!(f, "disconnecting({})", peripheral),
        }
    }
}

// =============================================================================
// Settings
// =============================================================================

#[derive(Debug, Clone)]
pub struct OrchestratorSettings {
    /// Minimum wait before reconnecting to the same device.
    pub device_backoff: Duration,

    /// A pending connect without outcome after this long is a failure.
    pub connect_timeout: Duration,

    /// Collection window for notifications.
    pub notify_window: Duration,

    pub mtu: u16,
}

impl From<&GatewayConfig> for OrchestratorSettings {
    fn from(config: &GatewayConfig) -> Self {
        OrchestratorSettings {
            device_backoff: config.device_backoff(),
            connect_timeout: config.connect_timeout(),
            notify_window: config.notify_window(),
            mtu: config.radio.mtu,
        }
    }
}

// =============================================================================
// Handle
// =============================================================================

enum Command {
    State(oneshot::Sender<LinkState>),
    BackoffRemaining {
        peripheral: String,
        reply: oneshot::Sender<Option<Duration>>,
    },
    Shutdown,
}

/// Message-passing access to the orchestrator.
#[derive(Clone)]
pub struct OrchestratorHandle {
    tx: mpsc::Sender<Command>,
}

impl OrchestratorHandle {
    /// Current link state.
    pub async fn state(&self) -> GatewayResult<LinkState> {
        let (reply, rx) = oneshot::channel();
        self.send(Command::State(reply)).await?;
        rx.await
            .map_err(|_| GatewayError::ChannelError("Orchestrator dropped reply".into()))
    }

    /// Time left before `peripheral` may be connected again.
    pub async fn backoff_remaining(&self, peripheral: &str) -> GatewayResult<Option<Duration>> {
        let (reply, rx) = oneshot::channel();
        self.send(Command::BackoffRemaining {
            peripheral: peripheral.to_string(),
            reply,
        })
        .await?;
        rx.await
            .map_err(|_| GatewayError::ChannelError("Orchestrator dropped reply".into()))
    }

    /// Stops the actor, releasing any active link.
    pub async fn shutdown(&self) -> GatewayResult<()> {
        self.send(Command::Shutdown).await
    }

    async fn send(&self, command: Command) -> GatewayResult<()> {
        self.tx
            .send(command)
            .await
            .map_err(|_| GatewayError::ChannelError("Orchestrator stopped".into()))
    }
}

// =============================================================================
// Orchestrator
// =============================================================================

pub struct ConnectionOrchestrator {
    radio: Arc<dyn Radio>,
    db: Arc<Database>,
    extractor: Extractor,
    sink: EventSink,
    transactions: mpsc::Sender<NewTransaction>,
    events: mpsc::Receiver<RadioEvent>,
    commands: mpsc::Receiver<Command>,
    settings: OrchestratorSettings,

    state: LinkState,
    connect_deadline: Option<Instant>,
    /// Lower-cased peripheral id → earliest next connect.
    backoff: HashMap<String, Instant>,
    powered: bool,
}

impl ConnectionOrchestrator {
    pub fn new(
        radio: Arc<dyn Radio>,
        db: Arc<Database>,
        sink: EventSink,
        transactions: mpsc::Sender<NewTransaction>,
        events: mpsc::Receiver<RadioEvent>,
        settings: OrchestratorSettings,
    ) -> (Self, OrchestratorHandle) {
        let (tx, commands) = mpsc::channel(16);
        let extractor = Extractor::new(radio.clone(), sink.clone(), settings.notify_window);

        let orchestrator = ConnectionOrchestrator {
            radio,
            db,
            extractor,
            sink,
            transactions,
            events,
            commands,
            settings,
            state: LinkState::Idle,
            connect_deadline: None,
            backoff: HashMap::new(),
            powered: false,
        };

        (orchestrator, OrchestratorHandle { tx })
    }

    /// Runs the actor until cancelled, shut down, or the radio event
    /// stream ends.
    pub async fn run(mut self, ctx: CancellationToken) {
        info!("Connection orchestrator starting");

        loop {
            let deadline = self.connect_deadline;

            tokio::select! {
                biased;

                _ = ctx.cancelled() => break,

                event = self.events.recv() => match event {
                    Some(event) => self.handle_event(event, &ctx).await,
                    None => {
                        warn!("Radio event stream closed");
                        break;
                    }
                },

                Some(command) = self.commands.recv() => {
                    if !self.handle_command(command) {
                        break;
                    }
                }

                _ = wait_until(deadline) => self.on_connect_timeout().await,
            }
        }

        if let Some(peripheral) = self.state.peripheral().map(str::to_string) {
            self.release(&peripheral).await;
        }
        if let Err(e) = self.radio.stop_scan().await {
            debug!(error = %e, "Stop scan on shutdown failed");
        }

        info!("Connection orchestrator stopped");
    }

    /// Returns false when the actor should stop.
    fn handle_command(&mut self, command: Command) -> bool {
        match command {
            Command::State(reply) => {
                let _ = reply.send(self.state.clone());
            }
            Command::BackoffRemaining { peripheral, reply } => {
                let _ = reply.send(self.backoff_remaining(&peripheral));
            }
            Command::Shutdown => {
                info!("Orchestrator shutdown requested");
                return false;
            }
        }
        true
    }

    async fn handle_event(&mut self, event: RadioEvent, ctx: &CancellationToken) {
        match event {
            RadioEvent::StateChanged(AdapterState::PoweredOn) => {
                info!("Radio powered on");
                self.powered = true;
                if self.state.is_idle() {
                    self.start_scan().await;
                }
            }
            RadioEvent::StateChanged(state) => {
                info!(?state, "Radio not powered");
                self.powered = false;
                if let Err(e) = self.radio.stop_scan().await {
                    warn!(error = %e, "Stop scan failed");
                }
            }
            RadioEvent::Discovered(peripheral) => self.on_discovered(peripheral).await,
            RadioEvent::Connected(peripheral) => self.on_connected(&peripheral, ctx).await,
            RadioEvent::ConnectFailed { peripheral, reason } => {
                if !self.state.is_connecting_to(&peripheral) {
                    debug!(peripheral = %peripheral, "Ignoring connect failure for inactive link");
                    return;
                }
                error!(peripheral = %peripheral, reason = %reason, "Connect failed");
                self.sink.report(
                    EventSource::Orchestrator,
                    RadioError::failed("connect", reason),
                );
                self.finish_session(&peripheral).await;
            }
            RadioEvent::Disconnected(peripheral) => {
                if !self.state.is_connecting_to(&peripheral) {
                    debug!(peripheral = %peripheral, "Ignoring disconnect for finished link");
                    return;
                }
                warn!(peripheral = %peripheral, "Disconnected before connect completed");
                self.sink.report(
                    EventSource::Orchestrator,
                    RadioError::NotConnected(peripheral.clone()),
                );
                self.finish_session(&peripheral).await;
            }
        }
    }

    // =========================================================================
    // Discovery
    // =========================================================================

    async fn on_discovered(&mut self, peripheral: Peripheral) {
        if !self.state.is_idle() {
            debug!(peripheral = %peripheral.id, state = %self.state, "Link busy, ignoring discovery");
            return;
        }

        let device = match self.db.catalog().get_device_by_hash(&peripheral.id).await {
            Ok(Some(device)) => device,
            Ok(None) => {
                debug!(
                    peripheral = %peripheral.id,
                    name = peripheral.name.as_deref().unwrap_or(""),
                    "Peripheral not in whitelist"
                );
                return;
            }
            Err(e) => {
                error!(peripheral = %peripheral.id, error = %e, "Whitelist lookup failed");
                self.sink.report(EventSource::Orchestrator, e);
                return;
            }
        };

        if let Some(remaining) = self.backoff_remaining(&peripheral.id) {
            debug!(
                peripheral = %peripheral.id,
                remaining_ms = remaining.as_millis() as u64,
                "Peripheral in backoff"
            );
            return;
        }

        info!(
            peripheral = %peripheral.id,
            device_hash = %device.hash,
            name = peripheral.name.as_deref().unwrap_or(""),
            rssi = ?peripheral.rssi,
            "Whitelisted peripheral found, connecting"
        );

        if let Err(e) = self.radio.stop_scan().await {
            warn!(error = %e, "Stop scan failed");
        }

        self.state = LinkState::Connecting {
            peripheral: peripheral.id.clone(),
        };
        self.connect_deadline = Some(Instant::now() + self.settings.connect_timeout);

        if let Err(e) = self.radio.connect(&peripheral.id).await {
            error!(peripheral = %peripheral.id, error = %e, "Connect request failed");
            self.sink.report(EventSource::Orchestrator, e);
            self.finish_session(&peripheral.id).await;
        }
    }

    fn backoff_remaining(&self, peripheral: &str) -> Option<Duration> {
        let until = self.backoff.get(&peripheral.to_ascii_lowercase())?;
        let remaining = until.saturating_duration_since(Instant::now());
        (!remaining.is_zero()).then_some(remaining)
    }

    // =========================================================================
    // Session
    // =========================================================================

    async fn on_connected(&mut self, id: &str, ctx: &CancellationToken) {
        let peripheral = match &self.state {
            LinkState::Connecting { peripheral } if peripheral.eq_ignore_ascii_case(id) => {
                peripheral.clone()
            }
            _ => {
                debug!(peripheral = id, state = %self.state, "Ignoring unexpected connect");
                return;
            }
        };

        info!(peripheral = %peripheral, "Connected");
        self.connect_deadline = None;
        self.state = LinkState::Connected {
            peripheral: peripheral.clone(),
        };

        self.run_session(&peripheral, ctx).await;
        self.finish_session(&peripheral).await;
    }

    /// Everything between connect and release. Returns early on any
    /// failure; the caller releases the link.
    async fn run_session(&mut self, peripheral: &str, ctx: &CancellationToken) {
        match self.radio.set_mtu(peripheral, self.settings.mtu).await {
            Ok(mtu) => debug!(peripheral, mtu, "MTU negotiated"),
            Err(e) => warn!(peripheral, error = %e, "MTU negotiation failed"),
        }

        let (device, schema) = match self.resolve(peripheral).await {
            Ok(resolved) => resolved,
            Err(e) => {
                error!(peripheral, error = %e, "Cannot resolve device schema");
                self.sink.report(EventSource::Orchestrator, e);
                return;
            }
        };

        self.state = LinkState::Extracting {
            peripheral: peripheral.to_string(),
        };

        let payload = match self
            .extractor
            .collect(peripheral, &device.hash, &schema, ctx)
            .await
        {
            Ok(payload) => payload,
            Err(GatewayError::ShuttingDown) => {
                debug!(peripheral, "Collection interrupted by shutdown");
                return;
            }
            Err(e) => {
                self.sink.report(EventSource::Extractor, e);
                return;
            }
        };

        let tx = match NewTransaction::from_payload(&device.hash, &payload, Utc::now().timestamp())
        {
            Ok(tx) => tx,
            Err(e) => {
                self.sink.report(EventSource::Extractor, e);
                return;
            }
        };
        debug!(device_hash = %tx.device_hash, payload = %tx.payload, "Transaction collected");

        tokio::select! {
            _ = ctx.cancelled() => warn!(device_hash = %device.hash, "Shutdown before transaction was queued"),
            sent = self.transactions.send(tx) => {
                if sent.is_err() {
                    self.sink.report(
                        EventSource::Orchestrator,
                        GatewayError::ChannelError("Transaction queue closed".into()),
                    );
                }
            }
        }
    }

    /// Looks up the device and its group's schema.
    async fn resolve(&self, peripheral: &str) -> GatewayResult<(Device, Schema)> {
        let catalog = self.db.catalog();

        let device = catalog
            .get_device_by_hash(peripheral)
            .await?
            .ok_or_else(|| GatewayError::UnknownDevice(peripheral.to_string()))?;

        let group = catalog
            .get_device_group_by_id(&device.device_group_id)
            .await?
            .ok_or_else(|| GatewayError::UnknownDeviceGroup {
                device_hash: device.hash.clone(),
                group_id: device.device_group_id.clone(),
            })?;

        let schema = group.schema()?;
        Ok((device, schema))
    }

    async fn on_connect_timeout(&mut self) {
        let LinkState::Connecting { peripheral } = self.state.clone() else {
            self.connect_deadline = None;
            return;
        };

        warn!(
            peripheral = %peripheral,
            timeout_ms = self.settings.connect_timeout.as_millis() as u64,
            "Connect timed out"
        );
        self.sink
            .report(EventSource::Orchestrator, RadioError::Timeout("connect".into()));
        self.finish_session(&peripheral).await;
    }

    // =========================================================================
    // Release
    // =========================================================================

    /// Releases the link and resumes scanning.
    async fn finish_session(&mut self, peripheral: &str) {
        self.release(peripheral).await;
        if self.powered {
            self.start_scan().await;
        }
    }

    /// The single place a link is torn down.
    async fn release(&mut self, peripheral: &str) {
        self.connect_deadline = None;
        self.state = LinkState::Disconnecting {
            peripheral: peripheral.to_string(),
        };

        if let Err(e) = self.radio.cancel_connection(peripheral).await {
            warn!(peripheral, error = %e, "Cancel connection failed");
        }

        let now = Instant::now();
        self.backoff.retain(|_, until| *until > now);
        self.backoff.insert(
            peripheral.to_ascii_lowercase(),
            now + self.settings.device_backoff,
        );

        self.state = LinkState::Idle;
        info!(
            peripheral,
            backoff_ms = self.settings.device_backoff.as_millis() as u64,
            "Disconnected"
        );
    }

    async fn start_scan(&mut self) {
        if let Err(e) = self.radio.start_scan().await {
            error!(error = %e, "Start scan failed");
            self.sink.report(EventSource::Orchestrator, e);
        }
    }
}

async fn wait_until(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use blegate_db::DbConfig;
    use tokio::task::JoinHandle;

    use crate::events::{self, EventStream, GatewayEvent};
    use crate::testing::{
        device, device_group, seeded_db, within, ConnectMode, FakeRadio, DEVICE_HASH, GROUP_ID,
    };

    // Real time throughout: the actor resolves every discovery in SQLite.
    const BACKOFF: Duration = Duration::from_millis(800);
    const CONNECT_TIMEOUT: Duration = Duration::from_millis(100);

    struct Harness {
        handle: OrchestratorHandle,
        radio: Arc<FakeRadio>,
        inject: mpsc::Sender<RadioEvent>,
        transactions: mpsc::Receiver<NewTransaction>,
        stream: EventStream,
        ctx: CancellationToken,
        task: JoinHandle<()>,
    }

    impl Harness {
        async fn send(&self, event: RadioEvent) {
            self.inject.send(event).await.unwrap();
        }

        async fn discover(&self, id: &str) {
            self.send(RadioEvent::Discovered(Peripheral::new(id))).await;
        }

        /// Round trip through the actor; every event sent before it has
        /// been handled once this returns.
        async fn state(&self) -> LinkState {
            within(self.handle.state()).await.unwrap()
        }

        async fn transaction(&mut self) -> NewTransaction {
            within(self.transactions.recv()).await.unwrap()
        }

        async fn event(&mut self) -> GatewayEvent {
            within(self.stream.recv()).await.unwrap()
        }

        async fn backoff_remaining(&self, peripheral: &str) -> Option<Duration> {
            within(self.handle.backoff_remaining(peripheral)).await.unwrap()
        }
    }

    async fn harness(db: Arc<Database>) -> Harness {
        let (radio, radio_events) = FakeRadio::new();
        radio.install_device_info();
        let inject = radio.events();
        let (sink, stream) = events::channel(32);
        let (tx, transactions) = mpsc::channel(8);

        let settings = OrchestratorSettings {
            device_backoff: BACKOFF,
            connect_timeout: CONNECT_TIMEOUT,
            notify_window: Duration::from_millis(20),
            mtu: 500,
        };
        let (orchestrator, handle) =
            ConnectionOrchestrator::new(radio.clone(), db, sink, tx, radio_events, settings);

        let ctx = CancellationToken::new();
        let task = tokio::spawn(orchestrator.run(ctx.clone()));

        let harness = Harness {
            handle,
            radio,
            inject,
            transactions,
            stream,
            ctx,
            task,
        };
        harness
            .send(RadioEvent::StateChanged(AdapterState::PoweredOn))
            .await;
        harness
    }

    #[tokio::test]
    async fn test_whitelisted_discovery_produces_transaction() {
        let mut h = harness(seeded_db().await).await;
        h.discover(&DEVICE_HASH.to_lowercase()).await;

        let tx = h.transaction().await;
        assert_eq!(tx.device_hash, DEVICE_HASH);
        assert!(!tx.uplink);
        assert_eq!(
            tx.payload,
            r#"{"Device-Info":{"Battery":"64","Serial-Number":"1234"}}"#
        );

        assert_eq!(h.state().await, LinkState::Idle);
        assert_eq!(h.radio.count("connect:"), 1);
        assert_eq!(h.radio.count("cancel:"), 1);
        assert_eq!(h.radio.count("mtu:500"), 1);

        // Scanning paused for the connection and resumed after release.
        let calls = h.radio.calls();
        let connect = calls.iter().position(|c| c.starts_with("connect:")).unwrap();
        let stop = calls.iter().position(|c| c == "stop_scan").unwrap();
        let resume = calls.iter().rposition(|c| c == "start_scan").unwrap();
        assert!(stop < connect && connect < resume);
        assert!(h.stream.try_recv().is_none());
    }

    #[tokio::test]
    async fn test_unknown_peripheral_is_ignored() {
        let mut h = harness(seeded_db().await).await;
        h.discover("11:22:33:44:55:66").await;

        assert_eq!(h.state().await, LinkState::Idle);
        assert_eq!(h.radio.count("connect:"), 0);
        assert!(h.transactions.try_recv().is_err());
        assert!(h.stream.try_recv().is_none());
    }

    #[tokio::test]
    async fn test_backoff_is_respected() {
        let mut h = harness(seeded_db().await).await;
        h.discover(DEVICE_HASH).await;
        h.transaction().await;
        assert_eq!(h.state().await, LinkState::Idle);

        let remaining = h.backoff_remaining(DEVICE_HASH).await.unwrap();
        assert!(remaining <= BACKOFF && remaining > BACKOFF / 2);

        // Well inside the window: ignored.
        tokio::time::sleep(BACKOFF / 4).await;
        h.discover(DEVICE_HASH).await;
        assert_eq!(h.state().await, LinkState::Idle);
        assert_eq!(h.radio.count("connect:"), 1);

        // Just past the window: accepted.
        let remaining = h.backoff_remaining(DEVICE_HASH).await.unwrap();
        tokio::time::sleep(remaining + Duration::from_millis(20)).await;
        assert!(h.backoff_remaining(DEVICE_HASH).await.is_none());
        h.discover(DEVICE_HASH).await;
        h.transaction().await;
        assert_eq!(h.radio.count("connect:"), 2);
    }

    #[tokio::test]
    async fn test_unknown_group_produces_no_transaction() {
        let db = Arc::new(Database::new(DbConfig::in_memory()).await.unwrap());
        db.catalog()
            .upsert_device(&device(DEVICE_HASH, "grp-missing"))
            .await
            .unwrap();
        let mut h = harness(db).await;

        h.discover(DEVICE_HASH).await;
        let event = h.event().await;
        assert_eq!(event.source, EventSource::Orchestrator);
        assert!(matches!(
            event.error,
            GatewayError::UnknownDeviceGroup { ref group_id, .. } if group_id == "grp-missing"
        ));

        // The Disconnected event that follows the release is ignored.
        assert_eq!(h.state().await, LinkState::Idle);
        assert_eq!(h.state().await, LinkState::Idle);
        assert_eq!(h.radio.count("cancel:"), 1);
        assert_eq!(h.radio.count("services"), 0);
        assert!(h.transactions.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_invalid_schema_is_reported() {
        let db = Arc::new(Database::new(DbConfig::in_memory()).await.unwrap());
        db.catalog()
            .upsert_device_group(&device_group(GROUP_ID, "{not json"))
            .await
            .unwrap();
        db.catalog()
            .upsert_device(&device(DEVICE_HASH, GROUP_ID))
            .await
            .unwrap();
        let mut h = harness(db).await;

        h.discover(DEVICE_HASH).await;
        let event = h.event().await;
        assert!(matches!(event.error, GatewayError::Core(_)));
        assert_eq!(h.state().await, LinkState::Idle);
        assert_eq!(h.radio.count("cancel:"), 1);
    }

    #[tokio::test]
    async fn test_connect_failure_releases_once_and_backs_off() {
        let mut h = harness(seeded_db().await).await;
        h.radio.set_connect_mode(ConnectMode::Fail);

        h.discover(DEVICE_HASH).await;
        let event = h.event().await;
        assert!(matches!(event.error, GatewayError::Radio(RadioError::Failed { .. })));

        assert_eq!(h.state().await, LinkState::Idle);
        assert_eq!(h.radio.count("cancel:"), 1);
        assert!(h.backoff_remaining(DEVICE_HASH).await.is_some());
        assert!(h.transactions.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_connect_timeout() {
        let mut h = harness(seeded_db().await).await;
        h.radio.set_connect_mode(ConnectMode::Silent);

        h.discover(DEVICE_HASH).await;
        assert_eq!(
            h.state().await,
            LinkState::Connecting {
                peripheral: DEVICE_HASH.to_string()
            }
        );

        // Another device's discovery is ignored while the link is busy.
        h.discover("11:22:33:44:55:66").await;
        assert_eq!(h.radio.count("connect:"), 1);

        let event = h.event().await;
        assert!(matches!(event.error, GatewayError::Radio(RadioError::Timeout(_))));
        assert_eq!(h.state().await, LinkState::Idle);
        assert_eq!(h.radio.count("cancel:"), 1);
        assert!(h.backoff_remaining(DEVICE_HASH).await.is_some());
    }

    #[tokio::test]
    async fn test_mtu_failure_is_not_fatal() {
        let mut h = harness(seeded_db().await).await;
        h.radio.fail_mtu();

        h.discover(DEVICE_HASH).await;
        let tx = h.transaction().await;
        assert!(tx.payload.contains("Serial-Number"));
        assert!(h.stream.try_recv().is_none());
    }

    #[tokio::test]
    async fn test_power_off_stops_scanning() {
        let mut h = harness(seeded_db().await).await;
        assert_eq!(h.state().await, LinkState::Idle);
        assert_eq!(h.radio.count("start_scan"), 1);

        h.send(RadioEvent::StateChanged(AdapterState::PoweredOff))
            .await;
        assert_eq!(h.state().await, LinkState::Idle);
        assert_eq!(h.radio.count("stop_scan"), 1);

        // No scan resumes after a session while powered off.
        h.discover(DEVICE_HASH).await;
        h.transaction().await;
        assert_eq!(h.state().await, LinkState::Idle);
        assert_eq!(h.radio.count("start_scan"), 1);
    }

    #[tokio::test]
    async fn test_shutdown_releases_active_link() {
        let h = harness(seeded_db().await).await;
        h.radio.set_connect_mode(ConnectMode::Silent);
        h.discover(DEVICE_HASH).await;
        assert!(matches!(h.state().await, LinkState::Connecting { .. }));

        within(h.handle.shutdown()).await.unwrap();
        within(h.task).await.unwrap();

        assert_eq!(h.radio.count("cancel:"), 1);
        assert!(h.handle.state().await.is_err());
    }

    #[tokio::test]
    async fn test_cancellation_stops_the_actor() {
        let h = harness(seeded_db().await).await;
        assert_eq!(h.state().await, LinkState::Idle);

        h.ctx.cancel();
        within(h.task).await.unwrap();
        assert_eq!(h.radio.count("cancel:"), 0);
        assert_eq!(h.radio.calls().last().map(String::as_str), Some("stop_scan"));
    }

    #[test]
    fn test_link_state_peripheral() {
        assert_eq!(LinkState::Idle.peripheral(), None);
        let state = LinkState::Extracting {
            peripheral: "ab".into(),
        };
        assert_eq!(state.peripheral(), Some("ab"));
        assert_eq!(state.to_string(), "extracting(ab)");
        assert!(LinkState::Connecting { peripheral: "AB".into() }.is_connecting_to("ab"));
    }
}
