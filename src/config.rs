// SPDX-FileCopyrightText: 2025 Hyperpolymath
// SPDX-License-Identifier: PMPL-1.0-or-later

//! Configuration for the webhook dispatcher.
//!
//! Two layers:
//! - [`Config`]: process settings read from the environment at start-up.
//! - [`WebhookConfig`]: per-source secrets, filters, rules, limits and
//!   subscribers. Lives in the key-value store so it can change without a
//!   restart; loaded on every request through [`ConfigRepository`].

use crate::event::Source;
use crate::notifier::EventKind;
use crate::store::{get_json, put_json, KvStore, StoreError};
use crate::transform::rules::TransformRule;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use url::Url;

/// Store key holding the serialized [`WebhookConfig`].
pub const CONFIG_KEY: &str = "webhook:config";

/// Process configuration for the dispatcher service.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Server bind address (default: 0.0.0.0:8080)
    #[serde(default = "default_bind_addr")]
    pub bind_addr: String,

    /// Optional JSON file used to seed [`WebhookConfig`] at start-up
    #[serde(default)]
    pub webhook_config_path: Option<String>,

    /// Pending sync-intent queue settings
    #[serde(default)]
    pub sync: SyncQueueConfig,

    /// Outbound delivery settings
    #[serde(default)]
    pub outbound: OutboundConfig,

    /// Metrics configuration
    #[serde(default)]
    pub metrics: MetricsConfig,

    /// Interval between expired-entry sweeps of the in-memory store (default: 60)
    #[serde(default = "default_cleanup_interval_secs")]
    pub cleanup_interval_secs: u64,
}

/// Settings for persisted sync intents.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncQueueConfig {
    /// Lifetime of a pending record in seconds (default: 86400)
    #[serde(default = "default_sync_ttl_secs")]
    pub ttl_secs: u64,

    /// Bearer token required by the queue endpoints; open when unset
    #[serde(default)]
    pub api_token: Option<String>,
}

/// Settings for subscriber fan-out.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutboundConfig {
    /// Maximum deliveries in flight at once (default: 16)
    #[serde(default = "default_max_in_flight")]
    pub max_in_flight: usize,

    /// HTTP client timeout in milliseconds (default: 10000)
    #[serde(default = "default_outbound_timeout_ms")]
    pub timeout_ms: u64,
}

/// Metrics configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricsConfig {
    /// Enable Prometheus metrics endpoint (default: true)
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Metrics endpoint path (default: /metrics)
    #[serde(default = "default_metrics_path")]
    pub path: String,
}

/// Dynamic dispatcher configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct WebhookConfig {
    /// Per-source sections; a missing section counts as disabled
    #[serde(default)]
    pub sources: HashMap<Source, SourceConfig>,

    /// Ordered rules for the generic source
    #[serde(default)]
    pub transform_rules: Vec<TransformRule>,

    /// Global per-source request limits
    #[serde(default)]
    pub rate_limits: RateLimits,

    /// Outbound retry policy (carried, not applied)
    #[serde(default)]
    pub retry: RetryPolicy,

    /// Outbound notification subscribers
    #[serde(default)]
    pub subscribers: Vec<OutboundSubscriber>,
}

/// Settings for a single inbound source.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SourceConfig {
    #[serde(default)]
    pub enabled: bool,

    /// Shared signing secret; verification is enforced whenever this is set
    #[serde(default)]
    pub secret: Option<String>,

    /// Allowed repository / database / channel identifiers (absent = all)
    #[serde(
        default,
        alias = "allowed_repositories",
        alias = "allowed_databases",
        alias = "allowed_channels"
    )]
    pub allowed_ids: Option<Vec<String>>,

    /// Allowed event types (absent = all)
    #[serde(default)]
    pub allowed_events: Option<Vec<String>>,

    /// Project assigned to tasks produced from this source
    #[serde(default)]
    pub project: Option<String>,
}

/// Request budget per source.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RateLimits {
    #[serde(default = "default_per_minute")]
    pub per_minute: u32,

    #[serde(default = "default_per_hour")]
    pub per_hour: u32,
}

/// Retry policy for outbound delivery.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryPolicy {
    #[serde(default)]
    pub enabled: bool,

    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    #[serde(default = "default_backoff_ms")]
    pub backoff_ms: u64,
}

/// External endpoint receiving outbound notifications.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutboundSubscriber {
    pub url: String,

    #[serde(default)]
    pub secret: Option<String>,

    /// Event kinds this subscriber wants
    #[serde(default)]
    pub events: Vec<EventKind>,

    #[serde(default = "default_true")]
    pub enabled: bool,

    #[serde(default)]
    pub retry: RetryPolicy,
}

/// Problems found in a [`WebhookConfig`] before it is stored.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum ConfigError {
    #[error("subscriber URL {url} is invalid: {reason}")]
    InvalidSubscriberUrl { url: String, reason: String },

    #[error("transform rule at position {0} has an empty name")]
    UnnamedRule(usize),

    #[error("transform rule {0} has an empty title template")]
    EmptyTitleTemplate(String),
}

// Default value functions
fn default_bind_addr() -> String {
    "0.0.0.0:8080".to_string()
}

fn default_cleanup_interval_secs() -> u64 {
    60
}

fn default_sync_ttl_secs() -> u64 {
    86_400
}

fn default_max_in_flight() -> usize {
    16
}

fn default_outbound_timeout_ms() -> u64 {
    10_000
}

fn default_true() -> bool {
    true
}

fn default_metrics_path() -> String {
    "/metrics".to_string()
}

fn default_per_minute() -> u32 {
    60
}

fn default_per_hour() -> u32 {
    1_000
}

fn default_max_retries() -> u32 {
    3
}

fn default_backoff_ms() -> u64 {
    1_000
}

impl Default for Config {
    fn default() -> Self {
        Self {
            bind_addr: default_bind_addr(),
            webhook_config_path: None,
            sync: SyncQueueConfig::default(),
            outbound: OutboundConfig::default(),
            metrics: MetricsConfig::default(),
            cleanup_interval_secs: default_cleanup_interval_secs(),
        }
    }
}

impl Default for SyncQueueConfig {
    fn default() -> Self {
        Self {
            ttl_secs: default_sync_ttl_secs(),
            api_token: None,
        }
    }
}

impl Default for OutboundConfig {
    fn default() -> Self {
        Self {
            max_in_flight: default_max_in_flight(),
            timeout_ms: default_outbound_timeout_ms(),
        }
    }
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: default_true(),
            path: default_metrics_path(),
        }
    }
}

impl Default for RateLimits {
    fn default() -> Self {
        Self {
            per_minute: default_per_minute(),
            per_hour: default_per_hour(),
        }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            enabled: false,
            max_retries: default_max_retries(),
            backoff_ms: default_backoff_ms(),
        }
    }
}

impl Config {
    pub fn sync_ttl(&self) -> Duration {
        Duration::from_secs(self.sync.ttl_secs)
    }

    pub fn outbound_timeout(&self) -> Duration {
        Duration::from_millis(self.outbound.timeout_ms)
    }

    pub fn cleanup_interval(&self) -> Duration {
        Duration::from_secs(self.cleanup_interval_secs.max(1))
    }
}

impl WebhookConfig {
    /// Section for `source`, if configured.
    pub fn source(&self, source: Source) -> Option<&SourceConfig> {
        self.sources.get(&source)
    }

    /// Check the parts of the config that would otherwise fail at request time.
    pub fn check(&self) -> Result<(), ConfigError> {
        for (idx, rule) in self.transform_rules.iter().enumerate() {
            if rule.name.trim().is_empty() {
                return Err(ConfigError::UnnamedRule(idx));
            }
            if rule.transform.title.trim().is_empty() {
                return Err(ConfigError::EmptyTitleTemplate(rule.name.clone()));
            }
        }

        for subscriber in &self.subscribers {
            let invalid = |reason: String| ConfigError::InvalidSubscriberUrl {
                url: subscriber.url.clone(),
                reason,
            };
            let parsed = Url::parse(&subscriber.url).map_err(|e| invalid(e.to_string()))?;
            if !matches!(parsed.scheme(), "http" | "https") || parsed.host_str().is_none() {
                return Err(invalid("expected an http(s) URL with a host".to_string()));
            }
        }

        Ok(())
    }
}

impl SourceConfig {
    /// Configured secret, treating an empty string as unset.
    pub fn secret(&self) -> Option<&str> {
        self.secret.as_deref().filter(|s| !s.is_empty())
    }

    /// Identifier allow-list check. With a list configured, a payload lacking
    /// the identifier is rejected.
    pub fn allows_id(&self, id: Option<&str>) -> bool {
        match (&self.allowed_ids, id) {
            (None, _) => true,
            (Some(list), Some(id)) => list.iter().any(|allowed| allowed == id),
            (Some(_), None) => false,
        }
    }

    /// Event-type allow-list check.
    pub fn allows_event(&self, event_type: &str) -> bool {
        self.allowed_events
            .as_ref()
            .map_or(true, |list| list.iter().any(|allowed| allowed == event_type))
    }
}

/// Load/save access to the stored [`WebhookConfig`].
#[derive(Clone)]
pub struct ConfigRepository {
    store: Arc<dyn KvStore>,
}

impl ConfigRepository {
    pub fn new(store: Arc<dyn KvStore>) -> Self {
        Self { store }
    }

    /// Current config, or `None` when nothing has been stored yet.
    pub async fn load(&self) -> Result<Option<WebhookConfig>, StoreError> {
        get_json(self.store.as_ref(), CONFIG_KEY).await
    }

    pub async fn save(&self, config: &WebhookConfig) -> Result<(), StoreError> {
        put_json(self.store.as_ref(), CONFIG_KEY, config, None).await
    }
}
