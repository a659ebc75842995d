//! # Event Sink
//!
//! The single fan-in channel through which every background task reports
//! failures to the host process.
//!
//! ## Flow
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                                                                         │
//! │  Orchestrator ──┐                                                       │
//! │  Extractor ─────┤                                                       │
//! │  Writer ────────┼──► EventSink::report() ──► [bounded mpsc] ──► Stream  │
//! │  CatalogRefresh ┤        try_send, never awaits                 (host)  │
//! │  Upload ────────┘        full → drop newest, count, warn                │
//! │                                                                         │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! A producer never blocks: device extraction must not stall because the
//! host is slow to drain events.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::error::GatewayError;

/// The component an event came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventSource {
    Orchestrator,
    Extractor,
    TransactionWriter,
    CatalogRefresh,
    Upload,
}

impl std::fmt::Display for EventSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EventSource::Orchestrator => write!(f, "orchestrator"),
            EventSource::Extractor => write!(f, "extractor"),
            EventSource::TransactionWriter => write!(f, "transaction_writer"),
            EventSource::CatalogRefresh => write!(f, "catalog_refresh"),
            EventSource::Upload => write!(f, "upload"),
        }
    }
}

/// One reported failure.
#[derive(Debug)]
pub struct GatewayEvent {
    pub at: DateTime<Utc>,
    pub source: EventSource,
    pub error: GatewayError,
}

/// Creates a connected sink/stream pair holding at most `capacity` events.
pub fn channel(capacity: usize) -> (EventSink, EventStream) {
    let (tx, rx) = mpsc::channel(capacity.max(1));
    let dropped = Arc::new(AtomicU64::new(0));

    (
        EventSink {
            tx,
            dropped: dropped.clone(),
        },
        EventStream { rx, dropped },
    )
}

// =============================================================================
// Producer
// =============================================================================

/// Cloneable producer side.
#[derive(Debug, Clone)]
pub struct EventSink {
    tx: mpsc::Sender<GatewayEvent>,
    dropped: Arc<AtomicU64>,
}

impl EventSink {
    /// Reports an error without waiting.
    pub fn report(&self, source: EventSource, error: impl Into<GatewayError>) {
        let event = GatewayEvent {
            at: Utc::now(),
            source,
            error: error.into(),
        };

        match self.tx.try_send(event) {
            Ok(()) => {}
            Err(mpsc::error::TrySendError::Full(event)) => {
                let total = self.dropped.fetch_add(1, Ordering::Relaxed) + 1;
                warn!(
                    source = %event.source,
                    error = %event.error,
                    dropped_total = total,
                    "Event sink full, dropping event"
                );
            }
            Err(mpsc::error::TrySendError::Closed(event)) => {
                debug!(source = %event.source, error = %event.error, "Event sink closed");
            }
        }
    }

    /// Number of events dropped because the sink was full.
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}

// =============================================================================
// Consumer
// =============================================================================

/// Single consumer side, owned by the host.
#[derive(Debug)]
pub struct EventStream {
    rx: mpsc::Receiver<GatewayEvent>,
    dropped: Arc<AtomicU64>,
}

impl EventStream {
    /// Waits for the next event. Returns `None` once every sink is gone.
    pub async fn recv(&mut self) -> Option<GatewayEvent> {
        self.rx.recv().await
    }

    /// Returns an event if one is buffered.
    pub fn try_recv(&mut self) -> Option<GatewayEvent> {
        self.rx.try_recv().ok()
    }

    /// Number of events dropped because the sink was full.
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}
