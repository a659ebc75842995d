//! # Transaction Upload Loop
//!
//! Periodically uploads unsent transactions and marks them sent once the
//! backend accepted them.
//!
//! ## Watermark
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  cycle k:   batch = unsent rows                                         │
//! │             upload(batch, last_sync = watermark)        (old value)     │
//! │             mark_sent(batch ids)                                        │
//! │             watermark = max(watermark, max(batch.timestamp))            │
//! │                                                                         │
//! │  Any failure leaves both the sent flags and the watermark untouched;    │
//! │  the same rows are uploaded again next tick (at-least-once).            │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! The watermark lives in memory and starts at 0, which the client omits
//! from the request.

use std::sync::Arc;
use std::time::Duration;

use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use blegate_db::Database;

use crate::cloud::CloudApi;
use crate::error::GatewayResult;
use crate::events::{EventSink, EventSource};

/// Result of one upload cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UploadOutcome {
    /// Nothing was pending.
    Idle,

    /// `count` transactions were accepted and marked sent.
    Uploaded { count: usize, watermark: i64 },
}

pub struct TransactionUploader {
    db: Arc<Database>,
    cloud: Arc<dyn CloudApi>,
    sink: EventSink,
    interval: Duration,
    watermark: i64,
}

impl TransactionUploader {
    pub fn new(
        db: Arc<Database>,
        cloud: Arc<dyn CloudApi>,
        sink: EventSink,
        interval: Duration,
    ) -> Self {
        TransactionUploader {
            db,
            cloud,
            sink,
            interval,
            watermark: 0,
        }
    }

    /// The value sent as `last_sync` by the next cycle.
    pub fn watermark(&self) -> i64 {
        self.watermark
    }

    /// Runs a single upload cycle.
    pub async fn upload_once(&mut self) -> GatewayResult<UploadOutcome> {
        let transactions = self.db.transactions();
        let batch = transactions.list_unsent_transactions().await?;
        if batch.is_empty() {
            return Ok(UploadOutcome::Idle);
        }

        let ids: Vec<i64> = batch.iter().map(|t| t.id).collect();
        let candidate = batch
            .iter()
            .map(|t| t.timestamp)
            .max()
            .unwrap_or(self.watermark);

        let response = self
            .cloud
            .upload_transactions(&batch, self.watermark)
            .await?;
        debug!(
            results = response.results.len(),
            changed = response.changed.len(),
            uplink = response.uplink.len(),
            "Upload accepted"
        );

        transactions.mark_sent(&ids).await?;
        self.watermark = self.watermark.max(candidate);

        Ok(UploadOutcome::Uploaded {
            count: ids.len(),
            watermark: self.watermark,
        })
    }

    /// Uploads every interval until cancelled. The first cycle runs one
    /// interval after start.
    pub async fn run(mut self, ctx: CancellationToken) {
        info!(interval_ms = self.interval.as_millis() as u64, "Transaction upload starting");

        let mut ticker = tokio::time::interval_at(Instant::now() + self.interval, self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                biased;

                _ = ctx.cancelled() => break,

                _ = ticker.tick() => match self.upload_once().await {
                    Ok(UploadOutcome::Idle) => debug!("No unsent transactions"),
                    Ok(UploadOutcome::Uploaded { count, watermark }) => {
                        info!(count, watermark, "Transactions uploaded")
                    }
                    Err(e) => {
                        error!(error = %e, watermark = self.watermark, "Transaction upload failed");
                        self.sink.report(EventSource::Upload, e);
                    }
                },
            }
        }

        info!("Transaction upload stopped");
    }
}
