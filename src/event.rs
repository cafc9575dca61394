// SPDX-FileCopyrightText: 2025 Hyperpolymath
// SPDX-License-Identifier: PMPL-1.0-or-later

//! Inbound sources and the normalized event built from a verified request.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::str::FromStr;

/// Upstream system that produced a webhook.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Source {
    /// Issue tracker (GitHub).
    Github,
    /// Wiki / docs workspace (Notion).
    Notion,
    /// Chat workspace (Slack).
    Slack,
    /// Any other sender, handled by configurable rules.
    Generic,
    /// Completion/deletion feed from the task-management side.
    Sync,
}

impl Source {
    pub const ALL: [Source; 5] = [
        Source::Github,
        Source::Notion,
        Source::Slack,
        Source::Generic,
        Source::Sync,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Github => "github",
            Self::Notion => "notion",
            Self::Slack => "slack",
            Self::Generic => "generic",
            Self::Sync => "sync",
        }
    }
}

impl fmt::Display for Source {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Returned when a path segment names no known source.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown webhook source: {0}")]
pub struct UnknownSource(pub String);

impl FromStr for Source {
    type Err = UnknownSource;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Source::ALL
            .into_iter()
            .find(|source| source.as_str().eq_ignore_ascii_case(s))
            .ok_or_else(|| UnknownSource(s.to_string()))
    }
}

/// Normalized inbound event. Built once per accepted request and never mutated.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct InboundEvent {
    id: String,
    source: Source,
    event_type: String,
    timestamp: DateTime<Utc>,
    data: Value,
    signature: Option<String>,
    delivery_id: Option<String>,
}

impl InboundEvent {
    /// `data` must already be sanitized.
    pub fn new(
        id: impl Into<String>,
        source: Source,
        event_type: impl Into<String>,
        timestamp: DateTime<Utc>,
        data: Value,
    ) -> Self {
        Self {
            id: id.into(),
            source,
            event_type: event_type.into(),
            timestamp,
            data,
            signature: None,
            delivery_id: None,
        }
    }

    pub fn with_signature(mut self, signature: Option<String>) -> Self {
        self.signature = signature;
        self
    }

    pub fn with_delivery_id(mut self, delivery_id: Option<String>) -> Self {
        self.delivery_id = delivery_id;
        self
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn source(&self) -> Source {
        self.source
    }

    pub fn event_type(&self) -> &str {
        &self.event_type
    }

    pub fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }

    /// Sanitized payload.
    pub fn data(&self) -> &Value {
        &self.data
    }

    pub fn signature(&self) -> Option<&str> {
        self.signature.as_deref()
    }

    pub fn delivery_id(&self) -> Option<&str> {
        self.delivery_id.as_deref()
    }
}

/// Build a source-prefixed event id: `{source}-{now_ms}-{hex suffix}`.
pub fn event_id(source: Source, now_ms: i64, random: &[u8]) -> String {
    format!("{}-{}-{}", source, now_ms, hex::encode(random))
}
