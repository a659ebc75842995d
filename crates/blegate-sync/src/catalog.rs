//! # Catalog Refresh Loop
//!
//! Periodically pulls the device whitelist from the backend and upserts it
//! into the Catalog Store.
//!
//! ## Cycle
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  tick ──► fetch_catalog() ──► device groups ──► devices ──► done        │
//! │                │  error           upsert          upsert                │
//! │                ▼                    │ error         │ error             │
//! │           report + wait ◄───────────┴───────────────┘                   │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Groups go first so that a device never lands before the group it
//! references. Devices absent from a refresh are kept.

use std::sync::Arc;
use std::time::Duration;

use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use blegate_core::{CoreResult, Device, DeviceGroup};
use blegate_db::Database;

use crate::cloud::CloudApi;
use crate::error::GatewayResult;
use crate::events::{EventSink, EventSource};
use crate::protocol::CatalogDevice;

/// Rows written by one successful refresh.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RefreshOutcome {
    pub device_groups: usize,
    pub devices: usize,
}

pub struct CatalogRefresher {
    db: Arc<Database>,
    cloud: Arc<dyn CloudApi>,
    sink: EventSink,
    interval: Duration,
}

impl CatalogRefresher {
    pub fn new(
        db: Arc<Database>,
        cloud: Arc<dyn CloudApi>,
        sink: EventSink,
        interval: Duration,
    ) -> Self {
        CatalogRefresher {
            db,
            cloud,
            sink,
            interval,
        }
    }

    /// Runs a single fetch-and-upsert cycle.
    pub async fn refresh_once(&self) -> GatewayResult<RefreshOutcome> {
        let snapshot = self.cloud.fetch_catalog().await?;
        if snapshot.is_empty() {
            debug!("Catalog snapshot is empty, nothing to upsert");
            return Ok(RefreshOutcome::default());
        }

        let groups = snapshot
            .device_groups
            .into_iter()
            .map(|g| g.into_device_group())
            .collect::<CoreResult<Vec<DeviceGroup>>>()?;
        let devices: Vec<Device> = snapshot
            .devices
            .into_iter()
            .map(CatalogDevice::into_device)
            .collect();

        let catalog = self.db.catalog();
        catalog.upsert_device_groups(&groups).await?;
        catalog.upsert_devices(&devices).await?;

        Ok(RefreshOutcome {
            device_groups: groups.len(),
            devices: devices.len(),
        })
    }

    /// Refreshes every interval until cancelled. The first refresh happens
    /// one interval after start.
    pub async fn run(self, ctx: CancellationToken) {
        info!(interval_ms = self.interval.as_millis() as u64, "Catalog refresh starting");

        let mut ticker = tokio::time::interval_at(Instant::now() + self.interval, self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                biased;

                _ = ctx.cancelled() => break,

                _ = ticker.tick() => {
                    debug!("Refreshing catalog");
                    match self.refresh_once().await {
                        Ok(outcome) => info!(
                            device_groups = outcome.device_groups,
                            devices = outcome.devices,
                            "Catalog refreshed"
                        ),
                        Err(e) => {
                            error!(error = %e, "Catalog refresh failed");
                            self.sink.report(EventSource::CatalogRefresh, e);
                        }
                    }
                }
            }
        }

        info!("Catalog refresh stopped");
    }
}
