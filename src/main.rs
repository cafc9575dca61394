// SPDX-FileCopyrightText: 2025 Hyperpolymath
// SPDX-License-Identifier: PMPL-1.0-or-later

//! Webhook Dispatcher Service
//!
//! Accepts webhooks from GitHub, Notion, Slack, generic senders and the task
//! sync agent, verifies and rate-limits them, and turns them into task
//! intents queued for the sync agent and announced to subscribers.
//!
//! ## Configuration
//!
//! Process settings come from environment variables:
//!
//! - `BIND_ADDR`: Server bind address (default: 0.0.0.0:8080)
//! - `WEBHOOK_CONFIG_PATH`: JSON file seeding the webhook configuration
//! - `SYNC_INTENT_TTL_SECS`: Lifetime of pending sync intents (default: 86400)
//! - `SYNC_API_TOKEN`: Bearer token for the sync queue endpoints
//! - `OUTBOUND_MAX_IN_FLIGHT`: Concurrent outbound deliveries (default: 16)
//! - `OUTBOUND_TIMEOUT_MS`: Outbound HTTP timeout (default: 10000)
//! - `METRICS_ENABLED`: Expose `/metrics` (default: true)

use anyhow::Context;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::{info, warn, Level};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use webhook_dispatcher::{
    clock::{Clock, SystemClock},
    config::{Config, ConfigRepository, WebhookConfig},
    crypto::{Crypto, HmacCrypto},
    dispatcher::{Dispatcher, DispatcherDeps},
    handlers::{router, AppState},
    metrics::{LogMetrics, MetricsSink, PrometheusMetrics},
    notifier::{BoundedDetach, OutboundNotifier, ReqwestTransport},
    store::{KvStore, MemoryStore},
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(fmt::layer().json())
        .with(
            EnvFilter::builder()
                .with_default_directive(Level::INFO.into())
                .from_env_lossy(),
        )
        .init();

    // Load configuration
    let config = load_config();
    info!(
        bind_addr = %config.bind_addr,
        sync_ttl_secs = config.sync.ttl_secs,
        max_in_flight = config.outbound.max_in_flight,
        metrics_enabled = config.metrics.enabled,
        "Starting webhook dispatcher"
    );

    // Capabilities
    let clock: Arc<dyn Clock> = Arc::new(SystemClock::new());
    let crypto: Arc<dyn Crypto> = Arc::new(HmacCrypto::new());
    let store = Arc::new(MemoryStore::new(Arc::clone(&clock)));
    let kv: Arc<dyn KvStore> = store.clone();

    if let Some(path) = &config.webhook_config_path {
        seed_webhook_config(&ConfigRepository::new(Arc::clone(&kv)), path).await?;
    } else {
        warn!("WEBHOOK_CONFIG_PATH not set; webhooks fail until a configuration is stored");
    }

    let prometheus = if config.metrics.enabled {
        Some(Arc::new(PrometheusMetrics::new()?))
    } else {
        None
    };
    let metrics: Arc<dyn MetricsSink> = match &prometheus {
        Some(p) => Arc::clone(p) as Arc<dyn MetricsSink>,
        None => Arc::new(LogMetrics),
    };

    let transport = ReqwestTransport::new(config.outbound_timeout())?;
    let notifier = OutboundNotifier::new(
        Arc::new(transport),
        Arc::clone(&crypto),
        Arc::clone(&clock),
        Arc::new(BoundedDetach::new(config.outbound.max_in_flight)),
    );

    let dispatcher = Dispatcher::new(DispatcherDeps {
        store: kv,
        clock,
        crypto: Arc::clone(&crypto),
        notifier,
        metrics,
        sync_ttl: config.sync_ttl(),
    });

    let state = Arc::new(AppState {
        dispatcher,
        crypto,
        metrics: prometheus,
        config: config.clone(),
    });

    // Spawn cleanup task
    let cleanup_store = store.clone();
    let cleanup_interval = config.cleanup_interval();
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(cleanup_interval);
        loop {
            interval.tick().await;
            cleanup_store.purge_expired().await;
        }
    });

    let app = router(state);

    // Start server
    let addr: SocketAddr = config.bind_addr.parse()?;
    let listener = TcpListener::bind(addr).await?;
    info!(addr = %addr, "Server listening");

    axum::serve(listener, app).await?;

    Ok(())
}

/// Load configuration from environment variables.
fn load_config() -> Config {
    let defaults = Config::default();
    Config {
        bind_addr: std::env::var("BIND_ADDR").unwrap_or(defaults.bind_addr),
        webhook_config_path: std::env::var("WEBHOOK_CONFIG_PATH").ok(),
        sync: webhook_dispatcher::config::SyncQueueConfig {
            ttl_secs: env_parse("SYNC_INTENT_TTL_SECS").unwrap_or(defaults.sync.ttl_secs),
            api_token: std::env::var("SYNC_API_TOKEN").ok().filter(|t| !t.is_empty()),
        },
        outbound: webhook_dispatcher::config::OutboundConfig {
            max_in_flight: env_parse("OUTBOUND_MAX_IN_FLIGHT")
                .unwrap_or(defaults.outbound.max_in_flight),
            timeout_ms: env_parse("OUTBOUND_TIMEOUT_MS").unwrap_or(defaults.outbound.timeout_ms),
        },
        metrics: webhook_dispatcher::config::MetricsConfig {
            enabled: env_parse("METRICS_ENABLED").unwrap_or(defaults.metrics.enabled),
            ..defaults.metrics
        },
        ..defaults
    }
}

fn env_parse<T: std::str::FromStr>(name: &str) -> Option<T> {
    std::env::var(name).ok().and_then(|v| v.parse().ok())
}

/// Store the webhook configuration read from `path`.
async fn seed_webhook_config(configs: &ConfigRepository, path: &str) -> anyhow::Result<()> {
    let raw = tokio::fs::read_to_string(path)
        .await
        .with_context(|| format!("reading webhook config {}", path))?;
    let webhook_config: WebhookConfig = serde_json::from_str(&raw)
        .with_context(|| format!("parsing webhook config {}", path))?;
    webhook_config.check()?;
    configs.save(&webhook_config).await?;

    info!(
        path,
        sources = webhook_config.sources.len(),
        rules = webhook_config.transform_rules.len(),
        subscribers = webhook_config.subscribers.len(),
        "Webhook configuration loaded"
    );
    Ok(())
}
