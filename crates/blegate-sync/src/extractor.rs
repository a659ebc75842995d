//! # Schema-Driven Extractor
//!
//! Collects one payload from a connected peripheral according to its
//! device group's schema.
//!
//! ## Collection
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                                                                         │
//! │  discover_services ─┬─► match_service(id) ── no ──► skip                │
//! │                     │        │ yes                                      │
//! │                     │        ▼                                          │
//! │                     │  discover_characteristics ─► match_characteristic │
//! │                     │        │                                          │
//! │                     │        ├─ read property ──► read ──► payload      │
//! │                     │        │                                          │
//! │                     │        └─ notify/indicate ─► discover_descriptors │
//! │                     │                              └─► subscribe        │
//! │                     ▼                                                   │
//! │              notify window: every notification overwrites its entry     │
//! │                     │                                                   │
//! │                     ▼                                                   │
//! │                  Payload { service → characteristic → hex }            │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Failure Handling
//! - Service or characteristic discovery failure: that branch is skipped.
//! - Read or subscribe failure: reported to the sink, collection continues.
//! - Descriptor discovery failure: logged, the subscription is skipped.
//! - Cancellation during the window: [`GatewayError::ShuttingDown`].

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use blegate_core::{CharacteristicSchema, Payload, Schema, ServiceSchema};

use crate::error::{GatewayError, GatewayResult, RadioError};
use crate::events::{EventSink, EventSource};
use crate::radio::{CharacteristicInfo, CharacteristicKey, NotificationSink, Radio};

/// Reads schema-matched characteristics from a connected peripheral.
#[derive(Clone)]
pub struct Extractor {
    radio: Arc<dyn Radio>,
    sink: EventSink,
    notify_window: Duration,
}

/// Schema spelling of a subscribed characteristic, used as payload keys.
type PayloadSlot = (String, String);

impl Extractor {
    pub fn new(radio: Arc<dyn Radio>, sink: EventSink, notify_window: Duration) -> Self {
        Extractor {
            radio,
            sink,
            notify_window,
        }
    }

    /// Runs one collection against `peripheral`.
    ///
    /// `device_hash` is the catalog spelling, used in reported errors.
    pub async fn collect(
        &self,
        peripheral: &str,
        device_hash: &str,
        schema: &Schema,
        ctx: &CancellationToken,
    ) -> GatewayResult<Payload> {
        let (notify_sink, mut notifications) = NotificationSink::channel();
        let mut payload = Payload::new();
        let mut slots: HashMap<CharacteristicKey, PayloadSlot> = HashMap::new();

        let services = match self.radio.discover_services(peripheral).await {
            Ok(services) => services,
            Err(e) => {
                warn!(peripheral, error = %e, "Service discovery failed");
                Vec::new()
            }
        };

        for service in &services {
            let Some(service_schema) = schema.match_service(&service.id) else {
                debug!(peripheral, service = %service.id, "Service not in schema");
                continue;
            };

            let characteristics = match self
                .radio
                .discover_characteristics(peripheral, &service.id)
                .await
            {
                Ok(characteristics) => characteristics,
                Err(e) => {
                    warn!(
                        peripheral,
                        service = %service_schema.name,
                        error = %e,
                        "Characteristic discovery failed"
                    );
                    continue;
                }
            };

            for characteristic in &characteristics {
                let Some(char_schema) = service_schema.match_characteristic(&characteristic.id)
                else {
                    continue;
                };

                let key = CharacteristicKey::new(peripheral, &service.id, &characteristic.id);
                self.collect_characteristic(
                    &key,
                    device_hash,
                    service_schema,
                    char_schema,
                    characteristic,
                    &notify_sink,
                    &mut payload,
                    &mut slots,
                )
                .await;
            }
        }

        if !slots.is_empty() {
            debug!(
                peripheral,
                subscriptions = slots.len(),
                window_ms = self.notify_window.as_millis() as u64,
                "Waiting for notifications"
            );
        }

        let window = tokio::time::sleep(self.notify_window);
        tokio::pin!(window);

        loop {
            tokio::select! {
                _ = ctx.cancelled() => return Err(GatewayError::ShuttingDown),

                _ = &mut window => break,

                Some(notification) = notifications.recv() => {
                    if let Some((service, characteristic)) = slots.get(&notification.key) {
                        payload.record(service, characteristic, &notification.value);
                    }
                }
            }
        }

        info!(
            peripheral,
            readings = payload.reading_count(),
            "Collection finished"
        );
        Ok(payload)
    }

    #[allow(clippy::too_many_arguments)]
    async fn collect_characteristic(
        &self,
        key: &CharacteristicKey,
        device_hash: &str,
        service: &ServiceSchema,
        characteristic: &CharacteristicSchema,
        info: &CharacteristicInfo,
        notify_sink: &NotificationSink,
        payload: &mut Payload,
        slots: &mut HashMap<CharacteristicKey, PayloadSlot>,
    ) {
        if info.properties.read {
            match self.radio.read_characteristic(key).await {
                Ok(value) => payload.record(&service.name, &characteristic.name, &value),
                Err(e) => self.report(device_hash, service, characteristic, "read", e),
            }
        }

        if !info.properties.can_subscribe() {
            return;
        }

        if let Err(e) = self.radio.discover_descriptors(key).await {
            warn!(
                device_hash,
                service = %service.name,
                characteristic = %characteristic.name,
                error = %e,
                "Descriptor discovery failed, not subscribing"
            );
            return;
        }

        match self.radio.subscribe(key, notify_sink.clone()).await {
            Ok(()) => {
                slots.insert(
                    key.clone(),
                    (service.name.clone(), characteristic.name.clone()),
                );
            }
            Err(e) => self.report(device_hash, service, characteristic, "subscribe", e),
        }
    }

    fn report(
        &self,
        device_hash: &str,
        service: &ServiceSchema,
        characteristic: &CharacteristicSchema,
        operation: &str,
        error: RadioError,
    ) {
        warn!(
            device_hash,
            service = %service.name,
            characteristic = %characteristic.name,
            operation,
            error = %error,
            "Characteristic operation failed"
        );
        self.sink.report(
            EventSource::Extractor,
            GatewayError::Characteristic {
                device_hash: device_hash.to_string(),
                service: service.name.clone(),
                characteristic: characteristic.name.clone(),
                reason: format!("{} failed: {}", operation, error),
            },
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use crate::events;
    use crate::testing::{characteristic, FakeRadio, SCHEMA};

    fn schema() -> Schema {
        Schema::from_json("grp-1", SCHEMA).unwrap()
    }

    fn extractor(radio: Arc<FakeRadio>) -> (Extractor, events::EventStream) {
        let (sink, stream) = events::channel(16);
        (
            Extractor::new(radio, sink, Duration::from_millis(500)),
            stream,
        )
    }

    #[tokio::test(start_paused = true)]
    async fn test_reads_matched_characteristics_only() {
        let (radio, _events) = FakeRadio::new();
        radio.install_device_info();
        let (extractor, mut stream) = extractor(radio.clone());

        let payload = extractor
            .collect("ab:cd", "AB:CD", &schema(), &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(payload.get("Device-Info", "Serial-Number"), Some("1234"));
        assert_eq!(payload.get("Device-Info", "Battery"), Some("64"));
        assert_eq!(payload.reading_count(), 2);
        assert_eq!(radio.count("read:firmware"), 0);
        // Unmatched services are never enumerated.
        assert_eq!(radio.count("characteristics:0000180f"), 0);
        assert!(stream.try_recv().is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_descriptors_precede_subscription() {
        let (radio, _events) = FakeRadio::new();
        radio.install_device_info();
        let (extractor, _stream) = extractor(radio.clone());

        extractor
            .collect("ab:cd", "AB:CD", &schema(), &CancellationToken::new())
            .await
            .unwrap();

        let calls = radio.calls();
        let descriptors = calls.iter().position(|c| c == "descriptors:battery").unwrap();
        let subscribe = calls.iter().position(|c| c == "subscribe:battery").unwrap();
        assert!(descriptors < subscribe);
        assert_eq!(radio.count("descriptors:serialnumber"), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_notifications_overwrite_read_value() {
        let (radio, _events) = FakeRadio::new();
        radio.install_device_info();
        radio.notify_on_subscribe("battery", vec![vec![0x63], vec![0x62]]);
        let (extractor, _stream) = extractor(radio.clone());

        let payload = extractor
            .collect("ab:cd", "AB:CD", &schema(), &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(payload.get("Device-Info", "Battery"), Some("62"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_read_failure_is_reported_and_collection_continues() {
        let (radio, _events) = FakeRadio::new();
        radio.install_device_info();
        radio.fail_read("serialnumber");
        let (extractor, mut stream) = extractor(radio.clone());

        let payload = extractor
            .collect("ab:cd", "AB:CD", &schema(), &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(payload.get("Device-Info", "Serial-Number"), None);
        assert_eq!(payload.get("Device-Info", "Battery"), Some("64"));

        let event = stream.try_recv().unwrap();
        assert_eq!(event.source, EventSource::Extractor);
        assert!(matches!(
            event.error,
            GatewayError::Characteristic { ref characteristic, .. } if characteristic == "Serial-Number"
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_descriptor_failure_skips_subscription_silently() {
        let (radio, _events) = FakeRadio::new();
        radio.install_device_info();
        radio.fail_descriptors("battery");
        radio.notify_on_subscribe("battery", vec![vec![0x10]]);
        let (extractor, mut stream) = extractor(radio.clone());

        let payload = extractor
            .collect("ab:cd", "AB:CD", &schema(), &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(radio.count("subscribe:"), 0);
        assert_eq!(payload.get("Device-Info", "Battery"), Some("64"));
        assert!(stream.try_recv().is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_service_discovery_failure_yields_empty_payload() {
        let (radio, _events) = FakeRadio::new();
        radio.install_device_info();
        radio.fail_service_discovery();
        let (extractor, _stream) = extractor(radio.clone());

        let payload = extractor
            .collect("ab:cd", "AB:CD", &schema(), &CancellationToken::new())
            .await
            .unwrap();
        assert!(payload.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_waits_for_the_notify_window() {
        let (radio, _events) = FakeRadio::new();
        radio.add_service("deviceinfo", vec![characteristic("battery", false, true)]);
        let (extractor, _stream) = extractor(radio.clone());

        let started = tokio::time::Instant::now();
        extractor
            .collect("ab:cd", "AB:CD", &schema(), &CancellationToken::new())
            .await
            .unwrap();
        assert!(started.elapsed() >= Duration::from_millis(500));
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancellation_interrupts_the_window() {
        let (radio, _events) = FakeRadio::new();
        radio.install_device_info();
        let (extractor, _stream) = extractor(radio.clone());

        let ctx = CancellationToken::new();
        ctx.cancel();
        let result = extractor.collect("ab:cd", "AB:CD", &schema(), &ctx).await;
        assert!(matches!(result, Err(GatewayError::ShuttingDown)));
    }
}
