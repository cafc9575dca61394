// SPDX-FileCopyrightText: 2025 Hyperpolymath
// SPDX-License-Identifier: PMPL-1.0-or-later

//! Event routing pipeline.
//!
//! Each inbound request runs the same linear pipeline and stops at the
//! first failing step:
//!
//! 1. load the webhook configuration
//! 2. check the source is enabled
//! 3. count the request against the source's rate limits
//! 4. parse the body as JSON
//! 5. check the payload shape for the source
//! 6. verify the signature when a secret is configured
//! 7. build the sanitized [`InboundEvent`]
//! 8. run the source's transformation
//! 9. persist sync intents
//! 10. notify subscribers
//! 11. record the outcome
//!
//! A business-level transformation failure is still acknowledged with 200
//! so senders do not retry permanently unprocessable events.

use crate::clock::Clock;
use crate::config::ConfigRepository;
use crate::crypto::Crypto;
use crate::error::DispatchError;
use crate::event::{event_id, InboundEvent, Source};
use crate::limiter::{RateLimitResult, RateLimiter};
use crate::metrics::{MetricRecord, MetricsSink};
use crate::notifier::OutboundNotifier;
use crate::signature::{signature_headers, SignatureVerifier, HEADER_SLACK_TIMESTAMP};
use crate::store::KvStore;
use crate::sync_queue::{SyncIntent, SyncQueue};
use crate::transform::transform;
use crate::validator::{sanitize, validate, ValidationResult};
use axum::http::HeaderMap;
use serde::Serialize;
use serde_json::Value;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

/// Sender-supplied delivery id, kept on the event.
pub const HEADER_DELIVERY_ID: &str = "x-delivery-id";

/// Random bytes in an event id suffix (8 hex chars).
const EVENT_ID_RANDOM_BYTES: usize = 4;

/// Body of a 200 response.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DispatchResponse {
    pub received: bool,
    pub processed: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub event_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub task_title: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sync_requests: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Capabilities the dispatcher is built from.
pub struct DispatcherDeps {
    pub store: Arc<dyn KvStore>,
    pub clock: Arc<dyn Clock>,
    pub crypto: Arc<dyn Crypto>,
    pub notifier: OutboundNotifier,
    pub metrics: Arc<dyn MetricsSink>,
    /// Lifetime of persisted sync intents
    pub sync_ttl: Duration,
}

/// Routes verified webhooks through transformation and fan-out.
pub struct Dispatcher {
    configs: ConfigRepository,
    limiter: RateLimiter,
    verifier: SignatureVerifier,
    queue: SyncQueue,
    notifier: OutboundNotifier,
    metrics: Arc<dyn MetricsSink>,
    crypto: Arc<dyn Crypto>,
    clock: Arc<dyn Clock>,
}

fn header_str<'h>(headers: &'h HeaderMap, name: &str) -> Option<&'h str> {
    headers.get(name).and_then(|v| v.to_str().ok())
}

impl Dispatcher {
    pub fn new(deps: DispatcherDeps) -> Self {
        Self {
            configs: ConfigRepository::new(Arc::clone(&deps.store)),
            limiter: RateLimiter::new(Arc::clone(&deps.store), Arc::clone(&deps.clock)),
            verifier: SignatureVerifier::new(Arc::clone(&deps.crypto), Arc::clone(&deps.clock)),
            queue: SyncQueue::new(deps.store, deps.sync_ttl),
            notifier: deps.notifier,
            metrics: deps.metrics,
            crypto: deps.crypto,
            clock: deps.clock,
        }
    }

    pub fn configs(&self) -> &ConfigRepository {
        &self.configs
    }

    pub fn queue(&self) -> &SyncQueue {
        &self.queue
    }

    pub fn metrics(&self) -> &Arc<dyn MetricsSink> {
        &self.metrics
    }

    /// Run the pipeline for one request.
    ///
    /// Internal failures are logged with the event id and recorded as
    /// failed events before being returned; rejections are only logged.
    pub async fn dispatch(
        &self,
        source: Source,
        headers: &HeaderMap,
        body: &[u8],
    ) -> Result<DispatchResponse, DispatchError> {
        let started = Instant::now();
        let id = event_id(
            source,
            self.clock.now_ms(),
            &self.crypto.random_bytes(EVENT_ID_RANDOM_BYTES),
        );

        let outcome = self.process(source, &id, headers, body, started).await;
        match &outcome {
            Err(e) if e.is_internal() => {
                error!(%source, event_id = %id, error = %e, "Webhook processing failed");
                self.metrics.record(&MetricRecord {
                    source,
                    event_type: "unknown".to_string(),
                    event_id: id,
                    success: false,
                    duration: started.elapsed(),
                    error: Some("internal error".to_string()),
                });
            }
            Err(e) => info!(%source, status = e.status_code().as_u16(), error = %e, "Webhook rejected"),
            Ok(_) => {}
        }
        outcome
    }

    async fn process(
        &self,
        source: Source,
        id: &str,
        headers: &HeaderMap,
        body: &[u8],
        started: Instant,
    ) -> Result<DispatchResponse, DispatchError> {
        // 1. Configuration
        let config = self
            .configs
            .load()
            .await?
            .ok_or(DispatchError::ConfigurationMissing)?;

        // 2. Source enabled
        let section = config
            .source(source)
            .filter(|s| s.enabled)
            .ok_or(DispatchError::SourceDisabled(source))?;

        // 3. Rate limit
        let limits = &config.rate_limits;
        if let RateLimitResult::Limited {
            reason,
            reset_minute_ms,
            reset_hour_ms,
        } = self
            .limiter
            .check_and_consume(source, limits.per_minute, limits.per_hour)
            .await?
        {
            return Err(DispatchError::RateLimited {
                reason,
                reset_minute_ms,
                reset_hour_ms,
            });
        }

        // 4. JSON
        let payload: Value =
            serde_json::from_slice(body).map_err(|_| DispatchError::MalformedJson)?;

        // 5. Structure
        if let ValidationResult::Invalid(e) = validate(source, &payload) {
            return Err(DispatchError::InvalidStructure(e));
        }

        // 6. Signature
        let signature = signature_headers(source)
            .iter()
            .find_map(|name| header_str(headers, name));
        if let Some(secret) = section.secret() {
            let timestamp = header_str(headers, HEADER_SLACK_TIMESTAMP);
            if !self
                .verifier
                .verify(source, body, signature, Some(secret), timestamp)
            {
                warn!(%source, event_id = %id, "Signature verification failed");
                return Err(DispatchError::SignatureInvalid);
            }
        }

        // 7. Normalized event
        let handler = source.handler();
        let type_header = handler
            .event_type_header()
            .and_then(|name| header_str(headers, name));
        let event_type = handler.event_type(&payload, type_header);
        let event = InboundEvent::new(id, source, event_type, self.clock.now_utc(), sanitize(payload))
            .with_signature(signature.map(String::from))
            .with_delivery_id(header_str(headers, HEADER_DELIVERY_ID).map(String::from));
        debug!(
            %source,
            event_id = %event.id(),
            event_type = %event.event_type(),
            delivery_id = event.delivery_id().unwrap_or(""),
            "Webhook accepted"
        );

        // 8. Transform
        let result = transform(&event, &config)?;

        // 9 + 10. Sync intents and notifications
        let intents = SyncIntent::from_result(&event, &result, self.clock.now_utc());
        for intent in &intents {
            self.queue.enqueue(intent).await?;
        }
        for intent in &intents {
            let data = serde_json::to_value(intent).map_err(DispatchError::internal)?;
            self.notifier
                .notify(intent.kind.event_kind(), &data, &config.subscribers);
        }

        // 11. Metric
        self.metrics.record(&MetricRecord {
            source,
            event_type: event.event_type().to_string(),
            event_id: event.id().to_string(),
            success: result.success,
            duration: started.elapsed(),
            error: result.error.clone(),
        });

        if !result.success {
            info!(
                %source,
                event_id = %event.id(),
                reason = result.error.as_deref().unwrap_or(""),
                "Webhook acknowledged without processing"
            );
            return Ok(DispatchResponse {
                received: true,
                processed: false,
                event_id: None,
                task_title: None,
                sync_requests: None,
                error: result.error,
            });
        }

        Ok(DispatchResponse {
            received: true,
            processed: true,
            event_id: Some(event.id().to_string()),
            task_title: result.task.map(|t| t.title),
            sync_requests: (source == Source::Sync).then_some(result.sync_requests.len()),
            error: None,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::MockClock;
    use crate::config::{SourceConfig, WebhookConfig};
    use crate::crypto::HmacCrypto;
    use crate::metrics::PrometheusMetrics;
    use crate::notifier::{DeliveryError, QueuedDetach, Transport};
    use crate::config::OutboundSubscriber;
    use crate::notifier::EventKind;
    use crate::store::{ListPage, MemoryStore, StoreError};
    use async_trait::async_trait;
    use axum::http::StatusCode;
    use axum::response::IntoResponse;
    use serde_json::json;

    struct NullTransport;

    #[async_trait]
    impl Transport for NullTransport {
        async fn post_json(&self, _url: &str, _body: Vec<u8>) -> Result<(), DeliveryError> {
            Ok(())
        }
    }

    /// Memory store whose writes under one prefix always fail.
    struct FailingStore {
        inner: MemoryStore,
        failing_prefix: &'static str,
    }

    #[async_trait]
    impl KvStore for FailingStore {
        async fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
            self.inner.get(key).await
        }

        async fn put(
            &self,
            key: &str,
            value: String,
            ttl: Option<Duration>,
        ) -> Result<(), StoreError> {
            if key.starts_with(self.failing_prefix) {
                return Err(StoreError::Backend("disk quota exceeded on shard-7".into()));
            }
            self.inner.put(key, value, ttl).await
        }

        async fn delete(&self, key: &str) -> Result<(), StoreError> {
            self.inner.delete(key).await
        }

        async fn list(
            &self,
            prefix: &str,
            cursor: Option<&str>,
            limit: usize,
        ) -> Result<ListPage, StoreError> {
            self.inner.list(prefix, cursor, limit).await
        }
    }

    struct Fixture {
        dispatcher: Dispatcher,
        metrics: Arc<PrometheusMetrics>,
        detach: Arc<QueuedDetach>,
        clock: MockClock,
    }

    fn fixture() -> Fixture {
        fixture_with(|clock| -> Arc<dyn KvStore> { Arc::new(MemoryStore::new(clock)) })
    }

    fn fixture_with(store: impl FnOnce(Arc<dyn Clock>) -> Arc<dyn KvStore>) -> Fixture {
        let clock = MockClock::new(1_700_000_000_000);
        let clock_dyn: Arc<dyn Clock> = Arc::new(clock.clone());
        let crypto: Arc<dyn Crypto> = Arc::new(HmacCrypto::new());
        let store = store(Arc::clone(&clock_dyn));
        let metrics = Arc::new(PrometheusMetrics::new().unwrap());
        let detach = Arc::new(QueuedDetach::new());
        let notifier = OutboundNotifier::new(
            Arc::new(NullTransport),
            Arc::clone(&crypto),
            Arc::clone(&clock_dyn),
            detach.clone(),
        );
        let dispatcher = Dispatcher::new(DispatcherDeps {
            store,
            clock: clock_dyn,
            crypto,
            notifier,
            metrics: metrics.clone(),
            sync_ttl: Duration::from_secs(3_600),
        });
        Fixture {
            dispatcher,
            metrics,
            detach,
            clock,
        }
    }

    async fn save(fixture: &Fixture, config: WebhookConfig) {
        fixture.dispatcher.configs().save(&config).await.unwrap();
    }

    fn generic_config() -> WebhookConfig {
        let mut config: WebhookConfig = serde_json::from_value(json!({
            "transform_rules": [{
                "name": "alerts",
                "condition": { "field": "type", "operator": "equals", "value": "alert" },
                "transform": { "title": "Alert: {{message}}" }
            }]
        }))
        .unwrap();
        config.sources.insert(
            Source::Generic,
            SourceConfig {
                enabled: true,
                ..Default::default()
            },
        );
        config
    }

    #[tokio::test]
    async fn test_missing_config() {
        let fixture = fixture();
        let err = fixture
            .dispatcher
            .dispatch(Source::Generic, &HeaderMap::new(), b"{}")
            .await
            .unwrap_err();
        assert!(matches!(err, DispatchError::ConfigurationMissing));
    }

    #[tokio::test]
    async fn test_success_enqueues_intent() {
        let fixture = fixture();
        save(&fixture, generic_config()).await;

        let body = br#"{"type":"alert","message":"Server down","token":"t"}"#;
        let response = fixture
            .dispatcher
            .dispatch(Source::Generic, &HeaderMap::new(), body)
            .await
            .unwrap();

        assert!(response.processed);
        assert_eq!(response.task_title.as_deref(), Some("Alert: Server down"));
        let event_id = response.event_id.unwrap();
        assert!(event_id.starts_with("generic-1700000000000-"));
        assert_eq!(event_id.len(), "generic-1700000000000-".len() + 8);

        let page = fixture.dispatcher.queue().list(None, 10).await.unwrap();
        assert_eq!(page.items.len(), 1);
        assert_eq!(page.items[0].intent.event_id, event_id);
    }

    #[tokio::test]
    async fn test_store_failure_is_opaque_500() {
        let fixture = fixture_with(|clock| -> Arc<dyn KvStore> {
            Arc::new(FailingStore {
                inner: MemoryStore::new(clock),
                failing_prefix: "sync:pending:",
            })
        });
        let mut config = generic_config();
        config.subscribers.push(OutboundSubscriber {
            url: "https://hooks.example.com/tasks".to_string(),
            secret: None,
            events: vec![EventKind::TaskCreated],
            enabled: true,
            retry: Default::default(),
        });
        save(&fixture, config).await;

        let err = fixture
            .dispatcher
            .dispatch(
                Source::Generic,
                &HeaderMap::new(),
                br#"{"type":"alert","message":"Server down"}"#,
            )
            .await
            .unwrap_err();
        assert!(err.is_internal());

        let response = err.into_response();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let body: Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(body, json!({ "error": "internal server error" }));
        assert!(!String::from_utf8_lossy(&bytes).contains("shard-7"));

        let text = fixture.metrics.render().unwrap();
        assert!(text
            .lines()
            .any(|l| l.starts_with("webhook_events_processed_total")
                && l.contains("outcome=\"failure\"")
                && l.contains("source=\"generic\"")));
        assert_eq!(fixture.detach.pending(), 0);
    }

    #[tokio::test]
    async fn test_business_failure_is_acknowledged() {
        let fixture = fixture();
        save(&fixture, generic_config()).await;

        let response = fixture
            .dispatcher
            .dispatch(Source::Generic, &HeaderMap::new(), br#"{"type":"deploy"}"#)
            .await
            .unwrap();
        assert!(response.received);
        assert!(!response.processed);
        assert_eq!(response.error.as_deref(), Some("no matching rule"));
        assert!(fixture.dispatcher.queue().list(None, 10).await.unwrap().items.is_empty());

        let text = fixture.metrics.render().unwrap();
        assert!(text.contains("outcome=\"failure\""));
    }

    #[tokio::test]
    async fn test_signature_required_when_secret_set() {
        let fixture = fixture();
        let mut config = generic_config();
        config
            .sources
            .get_mut(&Source::Generic)
            .unwrap()
            .secret = Some("shh".into());
        save(&fixture, config).await;

        let body = br#"{"type":"alert","message":"m"}"#;
        let err = fixture
            .dispatcher
            .dispatch(Source::Generic, &HeaderMap::new(), body)
            .await
            .unwrap_err();
        assert!(matches!(err, DispatchError::SignatureInvalid));

        let signature = HmacCrypto::new().hmac_sha256_hex(b"shh", body);
        let mut headers = HeaderMap::new();
        headers.insert("x-webhook-signature", format!("hmac-sha256={}", signature).parse().unwrap());
        headers.insert(HEADER_DELIVERY_ID, "d-1".parse().unwrap());
        let response = fixture
            .dispatcher
            .dispatch(Source::Generic, &headers, body)
            .await
            .unwrap();
        assert!(response.processed);
    }

    #[tokio::test]
    async fn test_rate_limit_window() {
        let fixture = fixture();
        let mut config = generic_config();
        config.rate_limits.per_minute = 2;
        save(&fixture, config).await;

        let body = br#"{"type":"alert","message":"m"}"#;
        for _ in 0..2 {
            fixture
                .dispatcher
                .dispatch(Source::Generic, &HeaderMap::new(), body)
                .await
                .unwrap();
        }
        let err = fixture
            .dispatcher
            .dispatch(Source::Generic, &HeaderMap::new(), body)
            .await
            .unwrap_err();
        match err {
            DispatchError::RateLimited { reset_minute_ms, .. } => {
                assert_eq!(reset_minute_ms, Some(1_700_000_040_000));
            }
            other => panic!("expected rate limit, got {:?}", other),
        }

        fixture.clock.advance(Duration::from_secs(60));
        assert!(fixture
            .dispatcher
            .dispatch(Source::Generic, &HeaderMap::new(), body)
            .await
            .is_ok());
    }

    #[tokio::test]
    async fn test_sync_source_reports_request_count() {
        let fixture = fixture();
        let mut config = WebhookConfig::default();
        config.sources.insert(
            Source::Sync,
            SourceConfig {
                enabled: true,
                ..Default::default()
            },
        );
        save(&fixture, config).await;

        let body = br#"{"changes":[{"task_id":"a","action":"completed"},{"id":"b","action":"delete"},{"id":"c"}]}"#;
        let response = fixture
            .dispatcher
            .dispatch(Source::Sync, &HeaderMap::new(), body)
            .await
            .unwrap();
        assert!(response.processed);
        assert_eq!(response.sync_requests, Some(2));
        assert_eq!(response.task_title, None);
        assert_eq!(fixture.dispatcher.queue().list(None, 10).await.unwrap().items.len(), 2);
    }
}
