// SPDX-FileCopyrightText: 2025 Hyperpolymath
// SPDX-License-Identifier: PMPL-1.0-or-later

//! Pending sync intents for the external task-sync agent.
//!
//! Successful transformations are persisted under
//! `sync:pending:{created_ms}:{id}` with a TTL. The agent pages through the
//! queue and acknowledges each record once applied; anything left behind
//! expires on its own.

use crate::event::{InboundEvent, Source};
use crate::notifier::EventKind;
use crate::store::{get_json, put_json, KvStore, StoreError};
use crate::transform::{SyncAction, TaskIntent, TaskMetadata, TransformationResult};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

/// Key prefix of every pending record.
pub const PENDING_PREFIX: &str = "sync:pending:";

/// Page size when the caller gives none.
pub const DEFAULT_PAGE_SIZE: usize = 50;

/// Largest page a caller may request.
pub const MAX_PAGE_SIZE: usize = 200;

/// What the sync agent should do.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SyncIntentKind {
    CreateTask {
        task: TaskIntent,
        metadata: TaskMetadata,
    },
    Complete {
        task_id: String,
    },
    Delete {
        task_id: String,
    },
}

impl SyncIntentKind {
    /// Outbound notification fired for this intent.
    pub fn event_kind(&self) -> EventKind {
        match self {
            SyncIntentKind::CreateTask { .. } => EventKind::TaskCreated,
            SyncIntentKind::Complete { .. } => EventKind::TaskCompleted,
            SyncIntentKind::Delete { .. } => EventKind::TaskDeleted,
        }
    }
}

/// One persisted pending change.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncIntent {
    pub id: String,
    #[serde(flatten)]
    pub kind: SyncIntentKind,
    pub source: Source,
    pub event_id: String,
    pub created_at: DateTime<Utc>,
}

impl SyncIntent {
    /// Intents implied by a successful transformation of `event`.
    ///
    /// A task yields one create intent; each sync request yields a
    /// complete or delete intent. Ids are the event id plus a sequence
    /// number.
    pub fn from_result(
        event: &InboundEvent,
        result: &TransformationResult,
        created_at: DateTime<Utc>,
    ) -> Vec<SyncIntent> {
        if !result.success {
            return Vec::new();
        }

        let mut kinds = Vec::with_capacity(1 + result.sync_requests.len());
        if let (Some(task), Some(metadata)) = (&result.task, &result.metadata) {
            kinds.push(SyncIntentKind::CreateTask {
                task: task.clone(),
                metadata: metadata.clone(),
            });
        }
        kinds.extend(result.sync_requests.iter().map(|req| match req.action {
            SyncAction::Complete => SyncIntentKind::Complete {
                task_id: req.task_id.clone(),
            },
            SyncAction::Delete => SyncIntentKind::Delete {
                task_id: req.task_id.clone(),
            },
        }));

        kinds
            .into_iter()
            .enumerate()
            .map(|(seq, kind)| SyncIntent {
                id: format!("{}-{}", event.id(), seq),
                kind,
                source: event.source(),
                event_id: event.id().to_string(),
                created_at,
            })
            .collect()
    }

    /// Store key; zero-padded so lexical order is creation order.
    pub fn key(&self) -> String {
        format!(
            "{}{:013}:{}",
            PENDING_PREFIX,
            self.created_at.timestamp_millis(),
            self.id
        )
    }
}

/// A listed record and the key to acknowledge it with.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PendingRecord {
    pub key: String,
    pub intent: SyncIntent,
}

/// One page from [`SyncQueue::list`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct PendingPage {
    pub items: Vec<PendingRecord>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cursor: Option<String>,
}

/// Queue of pending sync intents on top of a [`KvStore`].
#[derive(Clone)]
pub struct SyncQueue {
    store: Arc<dyn KvStore>,
    ttl: Duration,
}

impl SyncQueue {
    pub fn new(store: Arc<dyn KvStore>, ttl: Duration) -> Self {
        Self { store, ttl }
    }

    /// Persist `intent`, returning its key.
    pub async fn enqueue(&self, intent: &SyncIntent) -> Result<String, StoreError> {
        let key = intent.key();
        put_json(self.store.as_ref(), &key, intent, Some(self.ttl)).await?;
        debug!(key = %key, event_id = %intent.event_id, "Sync intent enqueued");
        Ok(key)
    }

    /// Page through pending records in creation order.
    ///
    /// Undecodable records are skipped with a warning so one bad entry
    /// cannot wedge the queue.
    pub async fn list(&self, cursor: Option<&str>, limit: usize) -> Result<PendingPage, StoreError> {
        let limit = limit.clamp(1, MAX_PAGE_SIZE);
        let page = self.store.list(PENDING_PREFIX, cursor, limit).await?;

        let mut items = Vec::with_capacity(page.keys.len());
        for key in page.keys {
            match get_json::<SyncIntent>(self.store.as_ref(), &key).await {
                Ok(Some(intent)) => items.push(PendingRecord { key, intent }),
                // Expired between list and get
                Ok(None) => {}
                Err(e) => warn!(key = %key, error = %e, "Skipping unreadable sync intent"),
            }
        }

        Ok(PendingPage {
            items,
            cursor: page.cursor,
        })
    }

    /// Remove an applied record. Returns whether it was still pending.
    pub async fn acknowledge(&self, key: &str) -> Result<bool, StoreError> {
        if !key.starts_with(PENDING_PREFIX) {
            return Ok(false);
        }
        let existed = self.store.get(key).await?.is_some();
        if existed {
            self.store.delete(key).await?;
            debug!(key = %key, "Sync intent acknowledged");
        }
        Ok(existed)
    }
}
