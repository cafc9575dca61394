// SPDX-FileCopyrightText: 2025 Hyperpolymath
// SPDX-License-Identifier: PMPL-1.0-or-later

//! Fixed-window rate limiter for inbound webhooks.
//!
//! Implements dual-window limiting per source:
//! 1. Requests per epoch-minute
//! 2. Requests per epoch-hour
//!
//! Counters live in the key-value store under `ratelimit:{source}` and are
//! read, adjusted and written back on every request. Two concurrent requests
//! for the same source can both read the same count; the resulting overshoot
//! is accepted rather than serialising requests.

use crate::clock::Clock;
use crate::event::Source;
use crate::store::{get_json, put_json, KvStore, StoreError};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

const MINUTE_MS: i64 = 60_000;
const HOUR_MS: i64 = 3_600_000;

/// State TTL; matches the longer window so idle sources expire.
const STATE_TTL: Duration = Duration::from_secs(3_600);

/// Persisted counters for one source.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RateLimitState {
    pub minute_count: u32,
    pub hour_count: u32,
    /// Epoch-minute the minute counter belongs to
    pub reset_minute: i64,
    /// Epoch-hour the hour counter belongs to
    pub reset_hour: i64,
}

impl RateLimitState {
    /// Zero any counter whose window has passed and adopt the current epoch.
    fn roll_forward(mut self, now_ms: i64) -> Self {
        let minute = now_ms.div_euclid(MINUTE_MS);
        let hour = now_ms.div_euclid(HOUR_MS);

        if self.reset_minute < minute {
            self.minute_count = 0;
            self.reset_minute = minute;
        }
        if self.reset_hour < hour {
            self.hour_count = 0;
            self.reset_hour = hour;
        }
        self
    }
}

/// Result of a rate limit check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RateLimitResult {
    /// Request is allowed and has been counted
    Allowed {
        /// Remaining requests in the current minute
        minute_remaining: u32,
        /// Remaining requests in the current hour
        hour_remaining: u32,
    },
    /// Request is rate limited and was not counted
    Limited {
        reason: RateLimitReason,
        /// Epoch ms at which the minute window reopens, if it was exhausted
        reset_minute_ms: Option<i64>,
        /// Epoch ms at which the hour window reopens, if it was exhausted
        reset_hour_ms: Option<i64>,
    },
}

impl RateLimitResult {
    pub fn is_allowed(&self) -> bool {
        matches!(self, RateLimitResult::Allowed { .. })
    }
}

/// Which window rejected the request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RateLimitReason {
    MinuteLimitExceeded,
    HourLimitExceeded,
    BothLimitsExceeded,
}

impl fmt::Display for RateLimitReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::MinuteLimitExceeded => write!(f, "per-minute limit exceeded"),
            Self::HourLimitExceeded => write!(f, "per-hour limit exceeded"),
            Self::BothLimitsExceeded => write!(f, "per-minute and per-hour limits exceeded"),
        }
    }
}

/// Store-backed rate limiter.
#[derive(Clone)]
pub struct RateLimiter {
    store: Arc<dyn KvStore>,
    clock: Arc<dyn Clock>,
}

impl RateLimiter {
    pub fn new(store: Arc<dyn KvStore>, clock: Arc<dyn Clock>) -> Self {
        Self { store, clock }
    }

    fn key(source: Source) -> String {
        format!("ratelimit:{}", source)
    }

    /// Current counters for `source`, rolled forward to now.
    pub async fn state(&self, source: Source) -> Result<RateLimitState, StoreError> {
        let stored: Option<RateLimitState> =
            get_json(self.store.as_ref(), &Self::key(source)).await?;
        Ok(stored.unwrap_or_default().roll_forward(self.clock.now_ms()))
    }

    /// Count one request against `source`, or reject it without counting.
    pub async fn check_and_consume(
        &self,
        source: Source,
        per_minute: u32,
        per_hour: u32,
    ) -> Result<RateLimitResult, StoreError> {
        let mut state = self.state(source).await?;

        let minute_full = state.minute_count >= per_minute;
        let hour_full = state.hour_count >= per_hour;

        if minute_full || hour_full {
            let reason = match (minute_full, hour_full) {
                (true, true) => RateLimitReason::BothLimitsExceeded,
                (true, false) => RateLimitReason::MinuteLimitExceeded,
                _ => RateLimitReason::HourLimitExceeded,
            };
            let reset_minute_ms = minute_full.then(|| (state.reset_minute + 1) * MINUTE_MS);
            let reset_hour_ms = hour_full.then(|| (state.reset_hour + 1) * HOUR_MS);

            debug!(
                %source,
                %reason,
                minute_count = state.minute_count,
                hour_count = state.hour_count,
                "Source rate limit exceeded"
            );
            return Ok(RateLimitResult::Limited {
                reason,
                reset_minute_ms,
                reset_hour_ms,
            });
        }

        state.minute_count += 1;
        state.hour_count += 1;
        put_json(self.store.as_ref(), &Self::key(source), &state, Some(STATE_TTL)).await?;

        Ok(RateLimitResult::Allowed {
            minute_remaining: per_minute - state.minute_count,
            hour_remaining: per_hour - state.hour_count,
        })
    }
}
