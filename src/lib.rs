// SPDX-FileCopyrightText: 2025 Hyperpolymath
// SPDX-License-Identifier: PMPL-1.0-or-later

//! Webhook Dispatcher
//!
//! Receives signed webhooks from upstream systems, turns them into task
//! intents and fans the results out:
//!
//! - Per-source HMAC signature verification (GitHub, Slack, Notion, generic)
//! - Dual-window (minute + hour) rate limiting per source
//! - Payload shape validation and sanitization
//! - Fixed per-source transformations plus a configurable rule engine
//! - Persisted sync intents for the external task-sync agent
//! - Signed outbound notifications to subscribers

pub mod clock;
pub mod config;
pub mod crypto;
pub mod dispatcher;
pub mod error;
pub mod event;
pub mod handlers;
pub mod limiter;
pub mod metrics;
pub mod notifier;
pub mod signature;
pub mod store;
pub mod sync_queue;
pub mod transform;
pub mod validator;

pub use config::{Config, WebhookConfig};
pub use dispatcher::{DispatchResponse, Dispatcher, DispatcherDeps};
pub use error::DispatchError;
pub use event::{InboundEvent, Source};
pub use limiter::{RateLimitResult, RateLimiter};
pub use signature::SignatureVerifier;
pub use validator::{sanitize, validate, ValidationResult};
