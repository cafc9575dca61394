// SPDX-FileCopyrightText: 2025 Hyperpolymath
// SPDX-License-Identifier: PMPL-1.0-or-later

//! Processing metrics.
//!
//! The dispatcher reports one [`MetricRecord`] per handled event through
//! the [`MetricsSink`] trait. [`PrometheusMetrics`] keeps counters and a
//! latency histogram in its own registry and renders the text exposition
//! format for `GET /metrics`.

use crate::event::Source;
use prometheus::{
    exponential_buckets, Encoder, HistogramOpts, HistogramVec, IntCounter, IntCounterVec, Opts,
    Registry, TextEncoder,
};
use std::time::Duration;
use tracing::info;

/// Outcome of processing one event.
#[derive(Debug, Clone, PartialEq)]
pub struct MetricRecord {
    pub source: Source,
    pub event_type: String,
    pub event_id: String,
    pub success: bool,
    pub duration: Duration,
    pub error: Option<String>,
}

/// Destination for per-event metrics.
pub trait MetricsSink: Send + Sync {
    fn record(&self, record: &MetricRecord);

    /// A request handler panicked before an event could be recorded.
    fn record_panic(&self) {}
}

/// Sink that only logs; used when metrics are disabled.
#[derive(Debug, Default)]
pub struct LogMetrics;

impl MetricsSink for LogMetrics {
    fn record(&self, record: &MetricRecord) {
        info!(
            source = %record.source,
            event_type = %record.event_type,
            event_id = %record.event_id,
            success = record.success,
            duration_ms = record.duration.as_millis() as u64,
            error = record.error.as_deref().unwrap_or(""),
            "Webhook processed"
        );
    }
}

/// Prometheus-backed sink.
pub struct PrometheusMetrics {
    registry: Registry,
    events: IntCounterVec,
    duration: HistogramVec,
    panics: IntCounter,
}

impl PrometheusMetrics {
    pub fn new() -> Result<Self, prometheus::Error> {
        let registry = Registry::new();

        let events = IntCounterVec::new(
            Opts::new(
                "webhook_events_processed_total",
                "Webhook events processed, by source and outcome",
            ),
            &["source", "outcome"],
        )?;
        let duration = HistogramVec::new(
            HistogramOpts::new(
                "webhook_processing_duration_seconds",
                "Time spent processing a webhook event",
            )
            .buckets(exponential_buckets(0.0005, 2.0, 14)?),
            &["source"],
        )?;

        let panics = IntCounter::new(
            "webhook_handler_panics_total",
            "Requests answered with 500 after a handler panic",
        )?;

        registry.register(Box::new(events.clone()))?;
        registry.register(Box::new(duration.clone()))?;
        registry.register(Box::new(panics.clone()))?;

        Ok(Self {
            registry,
            events,
            duration,
            panics,
        })
    }

    /// Text exposition of every registered metric.
    pub fn render(&self) -> Result<String, prometheus::Error> {
        let mut buffer = Vec::new();
        TextEncoder::new().encode(&self.registry.gather(), &mut buffer)?;
        String::from_utf8(buffer).map_err(|e| prometheus::Error::Msg(e.to_string()))
    }
}

impl MetricsSink for PrometheusMetrics {
    fn record(&self, record: &MetricRecord) {
        let outcome = if record.success { "success" } else { "failure" };
        self.events
            .with_label_values(&[record.source.as_str(), outcome])
            .inc();
        self.duration
            .with_label_values(&[record.source.as_str()])
            .observe(record.duration.as_secs_f64());
        LogMetrics.record(record);
    }

    fn record_panic(&self) {
        self.panics.inc();
    }
}
