//! # Gateway Agent
//!
//! Wires the runtime together and owns the task lifetimes.
//!
//! ## Agent Architecture
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                        GatewayAgent::start                              │
//! │                                                                         │
//! │  1. cloud.authenticate()          ── failure: AuthenticationFailed      │
//! │  2. spawn tasks sharing one CancellationToken and one EventSink:        │
//! │                                                                         │
//! │  ┌──────────────┐   NewTransaction   ┌───────────────────┐              │
//! │  │ Orchestrator │ ─────────────────► │ TransactionWriter │──► tr table  │
//! │  │ (+Extractor) │   bounded queue    └───────────────────┘              │
//! │  └──────────────┘                                                       │
//! │  ┌──────────────────┐  ┌─────────────────────┐                          │
//! │  │ CatalogRefresher │  │ TransactionUploader │   independent timers     │
//! │  └──────────────────┘  └─────────────────────┘                          │
//! │                                                                         │
//! │  3. return (GatewayHandle, EventStream)                                 │
//! │                                                                         │
//! │  GatewayHandle::shutdown(): cancel token ──► join every task            │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use std::sync::Arc;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use blegate_db::Database;

use crate::catalog::CatalogRefresher;
use crate::cloud::CloudApi;
use crate::config::GatewayConfig;
use crate::error::{GatewayError, GatewayResult};
use crate::events::{self, EventStream};
use crate::orchestrator::{ConnectionOrchestrator, OrchestratorHandle, OrchestratorSettings};
use crate::protocol::GateInfo;
use crate::radio::{Radio, RadioEvent};
use crate::uploader::TransactionUploader;
use crate::writer::{self, TransactionWriter};

/// Entry point of the runtime.
pub struct GatewayAgent;

impl GatewayAgent {
    /// Authenticates, then starts every background task.
    ///
    /// Nothing is spawned when authentication fails.
    pub async fn start(
        config: &GatewayConfig,
        db: Arc<Database>,
        cloud: Arc<dyn CloudApi>,
        radio: Arc<dyn Radio>,
        radio_events: mpsc::Receiver<RadioEvent>,
    ) -> GatewayResult<(GatewayHandle, EventStream)> {
        config.validate()?;

        let gate = cloud
            .authenticate()
            .await
            .map_err(GatewayError::AuthenticationFailed)?;

        let (sink, stream) = events::channel(config.events.capacity);
        let (tx_queue, tx_rx) = writer::queue(config.radio.transaction_queue_size);
        let ctx = CancellationToken::new();
        let mut tasks = Vec::new();

        let writer = TransactionWriter::new(db.clone(), tx_rx, sink.clone());
        tasks.push(("transaction_writer", tokio::spawn(writer.run(ctx.clone()))));

        let refresher = CatalogRefresher::new(
            db.clone(),
            cloud.clone(),
            sink.clone(),
            config.catalog_refresh_interval(),
        );
        tasks.push(("catalog_refresh", tokio::spawn(refresher.run(ctx.clone()))));

        let uploader =
            TransactionUploader::new(db.clone(), cloud, sink.clone(), config.upload_interval());
        tasks.push(("upload", tokio::spawn(uploader.run(ctx.clone()))));

        let (orchestrator, orchestrator_handle) = ConnectionOrchestrator::new(
            radio,
            db,
            sink,
            tx_queue,
            radio_events,
            OrchestratorSettings::from(config),
        );
        tasks.push(("orchestrator", tokio::spawn(orchestrator.run(ctx.clone()))));

        info!(
            gateway = %config.gateway.hash,
            tasks = tasks.len(),
            "Gateway agent started"
        );

        let handle = GatewayHandle {
            ctx,
            orchestrator: orchestrator_handle,
            tasks,
            gate,
        };
        Ok((handle, stream))
    }
}

/// Owns the running tasks.
pub struct GatewayHandle {
    ctx: CancellationToken,
    orchestrator: OrchestratorHandle,
    tasks: Vec<(&'static str, JoinHandle<()>)>,
    gate: Option<GateInfo>,
}

impl GatewayHandle {
    pub fn orchestrator(&self) -> &OrchestratorHandle {
        &self.orchestrator
    }

    /// The gateway record returned at authentication, if any.
    pub fn gate(&self) -> Option<&GateInfo> {
        self.gate.as_ref()
    }

    /// Cancels every task and waits for all of them to finish.
    pub async fn shutdown(self) {
        info!("Gateway agent shutting down");
        self.ctx.cancel();

        for (name, task) in self.tasks {
            if let Err(e) = task.await {
                error!(task = name, error = %e, "Task ended abnormally");
            }
        }

        info!("Gateway agent stopped");
    }
}
