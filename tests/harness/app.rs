// SPDX-FileCopyrightText: 2025 Hyperpolymath
// SPDX-License-Identifier: Apache-2.0

//! In-process application fixture.

use async_trait::async_trait;
use axum::body::{to_bytes, Body};
use axum::http::{HeaderMap, Method, Request, StatusCode};
use axum::Router;
use serde_json::Value;
use std::sync::{Arc, Mutex};
use tower::ServiceExt;
use webhook_dispatcher::{
    clock::{Clock, MockClock},
    config::{Config, ConfigRepository, WebhookConfig},
    crypto::{Crypto, HmacCrypto},
    dispatcher::{Dispatcher, DispatcherDeps},
    handlers::{router, AppState},
    metrics::{MetricsSink, PrometheusMetrics},
    notifier::{DeliveryError, OutboundNotifier, QueuedDetach, Transport},
    store::{KvStore, MemoryStore},
};

/// 2023-11-14T22:13:20Z
pub const START_MS: i64 = 1_700_000_000_000;

/// Transport that records every delivery instead of sending it.
#[derive(Default)]
pub struct RecordingTransport {
    deliveries: Mutex<Vec<Delivery>>,
}

#[derive(Debug, Clone)]
pub struct Delivery {
    pub url: String,
    pub body: Value,
}

impl RecordingTransport {
    pub fn deliveries(&self) -> Vec<Delivery> {
        self.deliveries.lock().unwrap().clone()
    }
}

#[async_trait]
impl Transport for RecordingTransport {
    async fn post_json(&self, url: &str, body: Vec<u8>) -> Result<(), DeliveryError> {
        let body = serde_json::from_slice(&body)?;
        self.deliveries.lock().unwrap().push(Delivery {
            url: url.to_string(),
            body,
        });
        Ok(())
    }
}

/// Response captured from the router.
#[derive(Debug)]
pub struct TestResponse {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: Value,
}

/// Router plus handles on its injected capabilities.
pub struct TestApp {
    pub router: Router,
    pub clock: MockClock,
    pub store: Arc<MemoryStore>,
    pub detach: Arc<QueuedDetach>,
    pub transport: Arc<RecordingTransport>,
    pub crypto: Arc<dyn Crypto>,
}

impl TestApp {
    /// App with `webhook_config` already stored.
    pub async fn new(webhook_config: WebhookConfig) -> Self {
        let app = Self::without_config(Config::default());
        app.store_config(&webhook_config).await;
        app
    }

    /// App whose store holds no webhook configuration yet.
    pub fn without_config(config: Config) -> Self {
        let clock = MockClock::new(START_MS);
        let clock_dyn: Arc<dyn Clock> = Arc::new(clock.clone());
        let crypto: Arc<dyn Crypto> = Arc::new(HmacCrypto::new());
        let store = Arc::new(MemoryStore::new(Arc::clone(&clock_dyn)));
        let detach = Arc::new(QueuedDetach::new());
        let transport = Arc::new(RecordingTransport::default());
        let prometheus = Arc::new(PrometheusMetrics::new().unwrap());

        let notifier = OutboundNotifier::new(
            transport.clone(),
            Arc::clone(&crypto),
            Arc::clone(&clock_dyn),
            detach.clone(),
        );
        let kv: Arc<dyn KvStore> = store.clone();
        let metrics: Arc<dyn MetricsSink> = prometheus.clone();
        let dispatcher = Dispatcher::new(DispatcherDeps {
            store: kv,
            clock: clock_dyn,
            crypto: Arc::clone(&crypto),
            notifier,
            metrics,
            sync_ttl: config.sync_ttl(),
        });

        let state = Arc::new(AppState {
            dispatcher,
            crypto: Arc::clone(&crypto),
            metrics: Some(prometheus),
            config,
        });

        Self {
            router: router(state),
            clock,
            store,
            detach,
            transport,
            crypto,
        }
    }

    pub async fn store_config(&self, webhook_config: &WebhookConfig) {
        let kv: Arc<dyn KvStore> = self.store.clone();
        ConfigRepository::new(kv).save(webhook_config).await.unwrap();
    }

    /// POST raw bytes to `/webhooks/{source}`.
    pub async fn post_webhook(
        &self,
        source: &str,
        body: impl Into<Vec<u8>>,
        headers: &[(&str, String)],
    ) -> TestResponse {
        let mut request = Request::builder()
            .method(Method::POST)
            .uri(format!("/webhooks/{}", source))
            .header("content-type", "application/json");
        for (name, value) in headers {
            request = request.header(*name, value.as_str());
        }
        self.send(request.body(Body::from(body.into())).unwrap()).await
    }

    pub async fn get(&self, uri: &str, headers: &[(&str, String)]) -> TestResponse {
        let mut request = Request::builder().method(Method::GET).uri(uri);
        for (name, value) in headers {
            request = request.header(*name, value.as_str());
        }
        self.send(request.body(Body::empty()).unwrap()).await
    }

    pub async fn delete(&self, uri: &str, headers: &[(&str, String)]) -> TestResponse {
        let mut request = Request::builder().method(Method::DELETE).uri(uri);
        for (name, value) in headers {
            request = request.header(*name, value.as_str());
        }
        self.send(request.body(Body::empty()).unwrap()).await
    }

    /// Raw text body, for non-JSON endpoints.
    pub async fn get_text(&self, uri: &str) -> (StatusCode, String) {
        let request = Request::builder().uri(uri).body(Body::empty()).unwrap();
        let response = self.router.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        (status, String::from_utf8(bytes.to_vec()).unwrap())
    }

    async fn send(&self, request: Request<Body>) -> TestResponse {
        let response = self.router.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let headers = response.headers().clone();
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let body = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap_or_else(|_| {
                Value::String(String::from_utf8_lossy(&bytes).into_owned())
            })
        };
        TestResponse {
            status,
            headers,
            body,
        }
    }

    /// Await every detached delivery.
    pub async fn flush_deliveries(&self) -> usize {
        self.detach.run_all().await
    }
}
