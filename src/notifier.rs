// SPDX-FileCopyrightText: 2025 Hyperpolymath
// SPDX-License-Identifier: PMPL-1.0-or-later

//! Outbound notifications to subscribed endpoints.
//!
//! Features:
//! - Per-subscriber event-kind filtering
//! - Optional HMAC-SHA256 signature over the serialized payload
//! - Fire-and-forget delivery through a pluggable [`Detach`] strategy
//! - Failures logged per subscriber, never propagated to the inbound caller

use crate::clock::Clock;
use crate::config::OutboundSubscriber;
use crate::crypto::Crypto;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use thiserror::Error;
use tokio::sync::Semaphore;
use tracing::{debug, warn};

/// User agent sent with every delivery.
pub const USER_AGENT: &str = concat!("webhook-dispatcher/", env!("CARGO_PKG_VERSION"));

/// Outbound event kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EventKind {
    #[serde(rename = "task.created")]
    TaskCreated,
    #[serde(rename = "task.completed")]
    TaskCompleted,
    #[serde(rename = "task.deleted")]
    TaskDeleted,
}

impl EventKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventKind::TaskCreated => "task.created",
            EventKind::TaskCompleted => "task.completed",
            EventKind::TaskDeleted => "task.deleted",
        }
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Body POSTed to a subscriber.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutboundPayload {
    pub event: EventKind,
    pub timestamp: DateTime<Utc>,
    pub data: Value,
    /// Hex HMAC-SHA256 of the payload serialized without this field
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub signature: Option<String>,
}

impl OutboundPayload {
    pub fn new(event: EventKind, timestamp: DateTime<Utc>, data: Value) -> Self {
        Self {
            event,
            timestamp,
            data,
            signature: None,
        }
    }

    /// Bytes covered by the signature.
    pub fn signing_bytes(&self) -> Result<Vec<u8>, serde_json::Error> {
        let unsigned = OutboundPayload {
            signature: None,
            ..self.clone()
        };
        serde_json::to_vec(&unsigned)
    }
}

/// Delivery failures. Logged, never surfaced to the inbound caller.
#[derive(Debug, Error)]
pub enum DeliveryError {
    #[error("transport error: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("subscriber answered with status {0}")]
    Status(u16),

    #[error("failed to encode payload: {0}")]
    Encode(#[from] serde_json::Error),
}

/// HTTP POST of a JSON body.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn post_json(&self, url: &str, body: Vec<u8>) -> Result<(), DeliveryError>;
}

/// [`Transport`] backed by a shared `reqwest` client.
#[derive(Clone)]
pub struct ReqwestTransport {
    client: reqwest::Client,
}

impl ReqwestTransport {
    pub fn new(timeout: Duration) -> Result<Self, DeliveryError> {
        let client = reqwest::Client::builder()
            .user_agent(USER_AGENT)
            .timeout(timeout)
            .build()?;
        Ok(Self { client })
    }
}

#[async_trait]
impl Transport for ReqwestTransport {
    async fn post_json(&self, url: &str, body: Vec<u8>) -> Result<(), DeliveryError> {
        let response = self
            .client
            .post(url)
            .header(reqwest::header::CONTENT_TYPE, "application/json")
            .body(body)
            .send()
            .await?;

        let status = response.status();
        if status.is_success() {
            Ok(())
        } else {
            Err(DeliveryError::Status(status.as_u16()))
        }
    }
}

/// A detached unit of work.
pub type DetachedTask = Pin<Box<dyn Future<Output = ()> + Send + 'static>>;

/// Strategy for running work the caller does not wait for.
pub trait Detach: Send + Sync {
    fn detach(&self, task: DetachedTask);
}

/// Spawns each task on the runtime, with at most `max_in_flight` running.
pub struct BoundedDetach {
    permits: Arc<Semaphore>,
}

impl BoundedDetach {
    pub fn new(max_in_flight: usize) -> Self {
        Self {
            permits: Arc::new(Semaphore::new(max_in_flight.max(1))),
        }
    }
}

impl Detach for BoundedDetach {
    fn detach(&self, task: DetachedTask) {
        let permits = Arc::clone(&self.permits);
        tokio::spawn(async move {
            let Ok(_permit) = permits.acquire_owned().await else {
                return;
            };
            task.await;
        });
    }
}

/// Holds tasks until [`QueuedDetach::run_all`] is awaited.
#[derive(Default)]
pub struct QueuedDetach {
    queue: Mutex<Vec<DetachedTask>>,
}

impl QueuedDetach {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of tasks waiting to run.
    pub fn pending(&self) -> usize {
        self.lock().len()
    }

    /// Run every queued task to completion, in submission order.
    pub async fn run_all(&self) -> usize {
        let tasks = std::mem::take(&mut *self.lock());
        let ran = tasks.len();
        for task in tasks {
            task.await;
        }
        ran
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Vec<DetachedTask>> {
        self.queue.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl Detach for QueuedDetach {
    fn detach(&self, task: DetachedTask) {
        self.lock().push(task);
    }
}

/// Fans an event out to its subscribers.
#[derive(Clone)]
pub struct OutboundNotifier {
    transport: Arc<dyn Transport>,
    crypto: Arc<dyn Crypto>,
    clock: Arc<dyn Clock>,
    detach: Arc<dyn Detach>,
}

impl OutboundNotifier {
    pub fn new(
        transport: Arc<dyn Transport>,
        crypto: Arc<dyn Crypto>,
        clock: Arc<dyn Clock>,
        detach: Arc<dyn Detach>,
    ) -> Self {
        Self {
            transport,
            crypto,
            clock,
            detach,
        }
    }

    /// Detach one delivery per enabled subscriber of `kind`.
    ///
    /// Returns the number of deliveries handed to the detach strategy.
    pub fn notify(&self, kind: EventKind, data: &Value, subscribers: &[OutboundSubscriber]) -> usize {
        let timestamp = self.clock.now_utc();
        let mut dispatched = 0;

        for subscriber in subscribers
            .iter()
            .filter(|s| s.enabled && s.events.contains(&kind))
        {
            let body = match self.body_for(subscriber, kind, timestamp, data) {
                Ok(body) => body,
                Err(e) => {
                    warn!(url = %subscriber.url, event = %kind, error = %e, "Outbound payload encoding failed");
                    continue;
                }
            };

            let transport = Arc::clone(&self.transport);
            let url = subscriber.url.clone();
            self.detach.detach(Box::pin(async move {
                match transport.post_json(&url, body).await {
                    Ok(()) => debug!(url = %url, event = %kind, "Outbound notification delivered"),
                    Err(e) => warn!(url = %url, event = %kind, error = %e, "Outbound notification failed"),
                }
            }));
            dispatched += 1;
        }

        dispatched
    }

    fn body_for(
        &self,
        subscriber: &OutboundSubscriber,
        kind: EventKind,
        timestamp: DateTime<Utc>,
        data: &Value,
    ) -> Result<Vec<u8>, DeliveryError> {
        let mut payload = OutboundPayload::new(kind, timestamp, data.clone());
        if let Some(secret) = subscriber.secret.as_deref().filter(|s| !s.is_empty()) {
            let signed = payload.signing_bytes()?;
            payload.signature = Some(self.crypto.hmac_sha256_hex(secret.as_bytes(), &signed));
        }
        Ok(serde_json::to_vec(&payload)?)
    }
}
