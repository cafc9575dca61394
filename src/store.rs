// SPDX-FileCopyrightText: 2025 Hyperpolymath
// SPDX-License-Identifier: PMPL-1.0-or-later

//! Key-value store port and the in-memory adapter.
//!
//! The dispatcher keeps its dynamic configuration, rate-limit counters and
//! pending sync intents in a store exposing get / put-with-TTL / delete /
//! prefix listing. Production deployments can plug any backend behind
//! [`KvStore`]; [`MemoryStore`] is used by the binary and by tests.

use crate::clock::Clock;
use async_trait::async_trait;
use serde::{de::DeserializeOwned, Serialize};
use std::collections::BTreeMap;
use std::ops::Bound;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::RwLock;
use tracing::debug;

/// Store failures.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("store backend error: {0}")]
    Backend(String),

    #[error("corrupt value under key {key}: {source}")]
    Corrupt {
        key: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("failed to encode value for key {key}: {source}")]
    Encode {
        key: String,
        #[source]
        source: serde_json::Error,
    },
}

/// One page of keys from [`KvStore::list`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ListPage {
    pub keys: Vec<String>,
    /// Pass back to continue listing; `None` once the prefix is exhausted.
    pub cursor: Option<String>,
}

/// Narrow async key-value interface.
#[async_trait]
pub trait KvStore: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<String>, StoreError>;

    /// Store `value`; entries with a TTL disappear once it elapses.
    async fn put(&self, key: &str, value: String, ttl: Option<Duration>) -> Result<(), StoreError>;

    async fn delete(&self, key: &str) -> Result<(), StoreError>;

    /// List keys starting with `prefix` in lexical order, resuming after `cursor`.
    async fn list(
        &self,
        prefix: &str,
        cursor: Option<&str>,
        limit: usize,
    ) -> Result<ListPage, StoreError>;
}

/// Read and decode a JSON value.
pub async fn get_json<T: DeserializeOwned>(
    store: &dyn KvStore,
    key: &str,
) -> Result<Option<T>, StoreError> {
    match store.get(key).await? {
        Some(raw) => serde_json::from_str(&raw)
            .map(Some)
            .map_err(|source| StoreError::Corrupt {
                key: key.to_string(),
                source,
            }),
        None => Ok(None),
    }
}

/// Encode and store a JSON value.
pub async fn put_json<T: Serialize + ?Sized>(
    store: &dyn KvStore,
    key: &str,
    value: &T,
    ttl: Option<Duration>,
) -> Result<(), StoreError> {
    let raw = serde_json::to_string(value).map_err(|source| StoreError::Encode {
        key: key.to_string(),
        source,
    })?;
    store.put(key, raw, ttl).await
}

#[derive(Debug, Clone)]
struct StoredValue {
    value: String,
    expires_at_ms: Option<i64>,
}

impl StoredValue {
    fn is_live(&self, now_ms: i64) -> bool {
        self.expires_at_ms.map_or(true, |at| now_ms < at)
    }
}

/// In-memory store with TTL expiry evaluated against the injected clock.
pub struct MemoryStore {
    entries: RwLock<BTreeMap<String, StoredValue>>,
    clock: Arc<dyn Clock>,
}

impl MemoryStore {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            entries: RwLock::new(BTreeMap::new()),
            clock,
        }
    }

    /// Drop expired entries (should be called periodically).
    pub async fn purge_expired(&self) -> usize {
        let now = self.clock.now_ms();
        let mut entries = self.entries.write().await;
        let before = entries.len();
        entries.retain(|_, v| v.is_live(now));
        let purged = before - entries.len();
        if purged > 0 {
            debug!(purged, "Purged expired store entries");
        }
        purged
    }

    /// Number of live entries.
    pub async fn len(&self) -> usize {
        let now = self.clock.now_ms();
        self.entries
            .read()
            .await
            .values()
            .filter(|v| v.is_live(now))
            .count()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

#[async_trait]
impl KvStore for MemoryStore {
    async fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        let now = self.clock.now_ms();
        let entries = self.entries.read().await;
        Ok(entries
            .get(key)
            .filter(|v| v.is_live(now))
            .map(|v| v.value.clone()))
    }

    async fn put(&self, key: &str, value: String, ttl: Option<Duration>) -> Result<(), StoreError> {
        let expires_at_ms = ttl.map(|ttl| self.clock.now_ms() + ttl.as_millis() as i64);
        self.entries.write().await.insert(
            key.to_string(),
            StoredValue {
                value,
                expires_at_ms,
            },
        );
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<(), StoreError> {
        self.entries.write().await.remove(key);
        Ok(())
    }

    async fn list(
        &self,
        prefix: &str,
        cursor: Option<&str>,
        limit: usize,
    ) -> Result<ListPage, StoreError> {
        let now = self.clock.now_ms();
        let entries = self.entries.read().await;

        // A cursor below the prefix would stop the scan on a foreign key.
        let start = match cursor {
            Some(c) if c >= prefix => Bound::Excluded(c.to_string()),
            _ => Bound::Included(prefix.to_string()),
        };

        let mut keys = Vec::new();
        let mut more = false;
        for (key, value) in entries.range((start, Bound::Unbounded)) {
            if !key.starts_with(prefix) {
                break;
            }
            if !value.is_live(now) {
                continue;
            }
            if keys.len() == limit {
                more = true;
                break;
            }
            keys.push(key.clone());
        }

        let cursor = if more { keys.last().cloned() } else { None };
        Ok(ListPage { keys, cursor })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::MockClock;

    fn store() -> (MemoryStore, MockClock) {
        let clock = MockClock::new(1_700_000_000_000);
        (MemoryStore::new(Arc::new(clock.clone())), clock)
    }

    #[tokio::test]
    async fn test_put_get_delete() {
        let (store, _) = store();
        store.put("a", "1".into(), None).await.unwrap();
        assert_eq!(store.get("a").await.unwrap().as_deref(), Some("1"));

        store.delete("a").await.unwrap();
        assert_eq!(store.get("a").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_ttl_expiry() {
        let (store, clock) = store();
        store
            .put("k", "v".into(), Some(Duration::from_secs(60)))
            .await
            .unwrap();

        clock.advance(Duration::from_secs(59));
        assert!(store.get("k").await.unwrap().is_some());

        clock.advance(Duration::from_secs(1));
        assert!(store.get("k").await.unwrap().is_none());
        assert_eq!(store.purge_expired().await, 1);
        assert!(store.is_empty().await);
    }

    #[tokio::test]
    async fn test_list_with_cursor() {
        let (store, _) = store();
        for key in ["p:1", "p:2", "p:3", "q:1"] {
            store.put(key, String::new(), None).await.unwrap();
        }

        let page = store.list("p:", None, 2).await.unwrap();
        assert_eq!(page.keys, vec!["p:1", "p:2"]);
        assert_eq!(page.cursor.as_deref(), Some("p:2"));

        let page = store.list("p:", page.cursor.as_deref(), 2).await.unwrap();
        assert_eq!(page.keys, vec!["p:3"]);
        assert_eq!(page.cursor, None);
    }

    #[tokio::test]
    async fn test_list_cursor_before_prefix() {
        let (store, _) = store();
        store.put("ratelimit:github", String::new(), None).await.unwrap();
        store.put("sync:pending:0001:a", String::new(), None).await.unwrap();

        let page = store.list("sync:pending:", Some("a"), 10).await.unwrap();
        assert_eq!(page.keys, vec!["sync:pending:0001:a"]);
        assert_eq!(page.cursor, None);

        let page = store.list("sync:pending:", Some("z"), 10).await.unwrap();
        assert!(page.keys.is_empty());
    }

    #[tokio::test]
    async fn test_json_helpers() {
        let (store, _) = store();
        put_json(&store, "n", &vec![1, 2, 3], None).await.unwrap();
        let back: Option<Vec<u32>> = get_json(&store, "n").await.unwrap();
        assert_eq!(back, Some(vec![1, 2, 3]));

        store.put("bad", "{".into(), None).await.unwrap();
        let err = get_json::<Vec<u32>>(&store, "bad").await.unwrap_err();
        assert!(matches!(err, StoreError::Corrupt { .. }));
    }
}
