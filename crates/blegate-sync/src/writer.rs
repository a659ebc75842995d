//! # Transaction Writer
//!
//! Drains completed collections from the extractor queue into the
//! Transaction Store. Insert failures are reported and the record is lost;
//! the queue keeps draining.

use std::sync::Arc;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use blegate_core::NewTransaction;
use blegate_db::Database;

use crate::events::{EventSink, EventSource};

/// Creates the bounded extractor → writer queue.
pub fn queue(capacity: usize) -> (mpsc::Sender<NewTransaction>, mpsc::Receiver<NewTransaction>) {
    mpsc::channel(capacity.max(1))
}

pub struct TransactionWriter {
    db: Arc<Database>,
    rx: mpsc::Receiver<NewTransaction>,
    sink: EventSink,
}

impl TransactionWriter {
    pub fn new(db: Arc<Database>, rx: mpsc::Receiver<NewTransaction>, sink: EventSink) -> Self {
        TransactionWriter { db, rx, sink }
    }

    /// Runs until cancelled or until every producer is gone.
    ///
    /// On cancellation, transactions already queued are still written.
    pub async fn run(mut self, ctx: CancellationToken) {
        info!("Transaction writer starting");

        loop {
            tokio::select! {
                _ = ctx.cancelled() => {
                    self.rx.close();
                    while let Some(tx) = self.rx.recv().await {
                        self.write(tx).await;
                    }
                    break;
                }

                next = self.rx.recv() => match next {
                    Some(tx) => self.write(tx).await,
                    None => break,
                },
            }
        }

        info!("Transaction writer stopped");
    }

    async fn write(&self, tx: NewTransaction) {
        match self.db.transactions().insert_transaction(&tx).await {
            Ok(id) => debug!(
                id,
                device_hash = %tx.device_hash,
                timestamp = tx.timestamp,
                "Transaction stored"
            ),
            Err(e) => {
                error!(device_hash = %tx.device_hash, error = %e, "Insert transaction failed");
                self.sink.report(EventSource::TransactionWriter, e);
            }
        }
    }
}
