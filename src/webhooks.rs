//! # Webhook relay
//!
//! Inbound webhook bodies are fanned out to the subscribers registered for
//! their hook id plus every catch-all subscriber. Subscriber failures are
//! logged and counted; they never fail the inbound request.

use std::collections::HashMap;
use std::sync::{Arc, LazyLock};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use metrics::counter;
use regex::Regex;
use serde_json::{Value as JsonValue, json};
use tracing::{debug, warn};

use crate::error::PipelineError;
use crate::events::{NewEvent, RequestMetadata};
use crate::repositories::EventRepository;
use crate::sanitize::sanitize;

static HOOK_ID: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Za-z0-9_-]+$").expect("hook id pattern is valid"));

/// Whether `id` is an acceptable hook identifier.
pub fn is_valid_hook_id(id: &str) -> bool {
    HOOK_ID.is_match(id)
}

/// One inbound webhook call.
#[derive(Debug, Clone)]
pub struct WebhookDelivery {
    pub hook_id: String,
    /// Request body; `null` when it was not valid JSON.
    pub body: JsonValue,
    pub meta: RequestMetadata,
    pub received_at: DateTime<Utc>,
}

/// Receiver of relayed webhooks.
#[async_trait]
pub trait WebhookSubscriber: Send + Sync {
    fn name(&self) -> &str;

    async fn handle(&self, delivery: &WebhookDelivery) -> Result<(), PipelineError>;
}

/// Outcome of fanning one delivery out.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DispatchReport {
    pub delivered: usize,
    pub failed: usize,
}

/// Subscribers keyed by hook id, plus catch-alls.
#[derive(Clone, Default)]
pub struct WebhookRegistry {
    by_hook: HashMap<String, Vec<Arc<dyn WebhookSubscriber>>>,
    catch_all: Vec<Arc<dyn WebhookSubscriber>>,
}

impl WebhookRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Deliver webhooks for `hook_id` to `subscriber`.
    pub fn subscribe(&mut self, hook_id: impl Into<String>, subscriber: Arc<dyn WebhookSubscriber>) {
        self.by_hook.entry(hook_id.into()).or_default().push(subscriber);
    }

    /// Deliver every webhook to `subscriber`.
    pub fn subscribe_all(&mut self, subscriber: Arc<dyn WebhookSubscriber>) {
        self.catch_all.push(subscriber);
    }

    pub fn subscriber_count(&self, hook_id: &str) -> usize {
        self.by_hook.get(hook_id).map_or(0, Vec::len) + self.catch_all.len()
    }

    /// Hand `delivery` to each matching subscriber in registration order.
    pub async fn dispatch(&self, delivery: &WebhookDelivery) -> DispatchReport {
        let mut report = DispatchReport::default();
        let targeted = self
            .by_hook
            .get(&delivery.hook_id)
            .into_iter()
            .flatten();

        for subscriber in targeted.chain(self.catch_all.iter()) {
            match subscriber.handle(delivery).await {
                Ok(()) => {
                    report.delivered += 1;
                    counter!("webhook_dispatch_total", "outcome" => "delivered").increment(1);
                }
                Err(err) => {
                    report.failed += 1;
                    counter!("webhook_dispatch_total", "outcome" => "failed").increment(1);
                    warn!(
                        hook_id = %delivery.hook_id,
                        subscriber = subscriber.name(),
                        error = %err,
                        "Webhook subscriber failed"
                    );
                }
            }
        }

        debug!(
            hook_id = %delivery.hook_id,
            delivered = report.delivered,
            failed = report.failed,
            "Webhook dispatched"
        );
        report
    }
}

/// Records each webhook as an analytics event named `webhook_<id>`.
pub struct RecordingSubscriber {
    events: EventRepository,
}

impl RecordingSubscriber {
    pub fn new(events: EventRepository) -> Self {
        Self { events }
    }
}

#[async_trait]
impl WebhookSubscriber for RecordingSubscriber {
    fn name(&self) -> &str {
        "event-recorder"
    }

    async fn handle(&self, delivery: &WebhookDelivery) -> Result<(), PipelineError> {
        let payload = match &delivery.body {
            JsonValue::Object(_) | JsonValue::Array(_) => sanitize(&delivery.body),
            JsonValue::Null => Default::default(),
            scalar => sanitize(&json!({ "value": scalar })),
        };

        self.events
            .insert_at(
                NewEvent {
                    event_type: format!("webhook_{}", delivery.hook_id),
                    payload,
                    meta: delivery.meta.clone(),
                },
                delivery.received_at,
            )
            .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderMap;
    use std::sync::Mutex;

    struct Capture {
        name: &'static str,
        seen: Mutex<Vec<String>>,
        fail: bool,
    }

    impl Capture {
        fn new(name: &'static str, fail: bool) -> Arc<Self> {
            Arc::new(Self {
                name,
                seen: Mutex::new(Vec::new()),
                fail,
            })
        }
    }

    #[async_trait]
    impl WebhookSubscriber for Capture {
        fn name(&self) -> &str {
            self.name
        }

        async fn handle(&self, delivery: &WebhookDelivery) -> Result<(), PipelineError> {
            self.seen.lock().unwrap().push(delivery.hook_id.clone());
            if self.fail {
                Err(PipelineError::validation("boom"))
            } else {
                Ok(())
            }
        }
    }

    fn delivery(hook_id: &str) -> WebhookDelivery {
        WebhookDelivery {
            hook_id: hook_id.to_string(),
            body: json!({"a": 1}),
            meta: RequestMetadata::from_request(&HeaderMap::new(), "/webhook/x", None),
            received_at: Utc::now(),
        }
    }

    #[test]
    fn hook_id_pattern() {
        assert!(is_valid_hook_id("order_paid-2"));
        assert!(!is_valid_hook_id(""));
        assert!(!is_valid_hook_id("bad id"));
        assert!(!is_valid_hook_id("../etc"));
    }

    #[tokio::test]
    async fn dispatch_reaches_targeted_and_catch_all_subscribers() {
        let targeted = Capture::new("targeted", false);
        let other = Capture::new("other", false);
        let all = Capture::new("all", false);

        let mut registry = WebhookRegistry::new();
        registry.subscribe("orders", targeted.clone());
        registry.subscribe("leads", other.clone());
        registry.subscribe_all(all.clone());

        let report = registry.dispatch(&delivery("orders")).await;

        assert_eq!(report, DispatchReport { delivered: 2, failed: 0 });
        assert_eq!(*targeted.seen.lock().unwrap(), vec!["orders".to_string()]);
        assert!(other.seen.lock().unwrap().is_empty());
        assert_eq!(*all.seen.lock().unwrap(), vec!["orders".to_string()]);
        assert_eq!(registry.subscriber_count("orders"), 2);
        assert_eq!(registry.subscriber_count("unknown"), 1);
    }

    #[tokio::test]
    async fn failing_subscriber_does_not_stop_others() {
        let failing = Capture::new("failing", true);
        let healthy = Capture::new("healthy", false);

        let mut registry = WebhookRegistry::new();
        registry.subscribe("orders", failing.clone());
        registry.subscribe("orders", healthy.clone());

        let report = registry.dispatch(&delivery("orders")).await;

        assert_eq!(report, DispatchReport { delivered: 1, failed: 1 });
        assert_eq!(healthy.seen.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn recorder_stamps_rows_with_receipt_time() {
        use migration::{Migrator, MigratorTrait};
        use sea_orm::{ConnectOptions, Database};

        let mut options = ConnectOptions::new("sqlite::memory:");
        options.max_connections(1).sqlx_logging(false);
        let db = Database::connect(options).await.unwrap();
        Migrator::up(&db, None).await.unwrap();
        let events = EventRepository::new(Arc::new(db));

        let mut queued = delivery("orders");
        queued.received_at = Utc::now() - chrono::Duration::minutes(5);
        RecordingSubscriber::new(events.clone())
            .handle(&queued)
            .await
            .unwrap();

        let stored = events.find_by_id(1).await.unwrap().expect("row exists");
        assert_eq!(stored.event_type, "webhook_orders");
        assert_eq!(stored.created_at.timestamp(), queued.received_at.timestamp());
        assert_eq!(stored.payload, json!({"a": 1}));
    }

    #[tokio::test]
    async fn dispatch_without_subscribers_is_a_no_op() {
        let report = WebhookRegistry::new().dispatch(&delivery("nobody")).await;
        assert_eq!(report, DispatchReport::default());
    }
}
