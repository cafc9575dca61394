// SPDX-FileCopyrightText: 2025 Hyperpolymath
// SPDX-License-Identifier: PMPL-1.0-or-later

//! Transformation engine: turns a normalized event into a task intent.
//!
//! Each [`Source`] has one static handler implementing [`SourceHandler`].
//! The fixed-source handlers (GitHub, Notion, Slack) map known
//! action/type combinations and reject everything else; the generic handler
//! runs the configured rule list; the sync handler emits pending sync
//! requests instead of tasks.

pub mod generic;
pub mod github;
pub mod notion;
pub mod rules;
pub mod slack;
pub mod sync;
pub mod template;

use crate::config::{SourceConfig, WebhookConfig};
use crate::event::{InboundEvent, Source};
use crate::validator::ValidationError;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

/// Task to create in the task-management target.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskIntent {
    pub title: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub due: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub project: Option<String>,
}

/// Where a task came from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskMetadata {
    pub source: Source,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub original_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
}

/// Change reported by the sync source.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SyncAction {
    Complete,
    Delete,
}

/// One pending change for the external sync agent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncRequest {
    pub task_id: String,
    pub action: SyncAction,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
}

/// Outcome of transforming one event.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize)]
pub struct TransformationResult {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub task: Option<TaskIntent>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metadata: Option<TaskMetadata>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub sync_requests: Vec<SyncRequest>,
}

impl TransformationResult {
    pub fn task(task: TaskIntent, metadata: TaskMetadata) -> Self {
        Self {
            success: true,
            task: Some(task),
            metadata: Some(metadata),
            ..Default::default()
        }
    }

    pub fn sync(requests: Vec<SyncRequest>) -> Self {
        Self {
            success: true,
            sync_requests: requests,
            ..Default::default()
        }
    }

    /// Business-level failure: the event is acknowledged but yields nothing.
    pub fn failure(error: impl Into<String>) -> Self {
        Self {
            success: false,
            error: Some(error.into()),
            ..Default::default()
        }
    }
}

/// Unexpected failure inside a handler, surfaced as a 500.
#[derive(Debug, Error)]
pub enum TransformError {
    #[error("{handler} handler failed: {reason}")]
    Internal { handler: Source, reason: String },
}

/// Shared capability of every source handler.
pub trait SourceHandler: Sync {
    /// Minimal shape check run before signature verification.
    fn validate(&self, payload: &Value) -> Result<(), ValidationError>;

    /// Header carrying the event type, if the source uses one.
    fn event_type_header(&self) -> Option<&'static str> {
        None
    }

    /// Event type used for filtering and logging.
    fn event_type(&self, payload: &Value, header: Option<&str>) -> String;

    fn transform(
        &self,
        event: &InboundEvent,
        config: &WebhookConfig,
    ) -> Result<TransformationResult, TransformError>;
}

impl Source {
    /// Static handler lookup.
    pub fn handler(self) -> &'static dyn SourceHandler {
        match self {
            Source::Github => &github::GithubHandler,
            Source::Notion => &notion::NotionHandler,
            Source::Slack => &slack::SlackHandler,
            Source::Generic => &generic::GenericHandler,
            Source::Sync => &sync::SyncHandler,
        }
    }
}

/// Run the handler for the event's source.
pub fn transform(
    event: &InboundEvent,
    config: &WebhookConfig,
) -> Result<TransformationResult, TransformError> {
    event.source().handler().transform(event, config)
}

/// Config section for `source`. The dispatcher rejects events for
/// unconfigured sources, so a missing section here is an internal error.
pub(crate) fn section(
    config: &WebhookConfig,
    source: Source,
) -> Result<&SourceConfig, TransformError> {
    config.source(source).ok_or_else(|| TransformError::Internal {
        handler: source,
        reason: "no configuration section".to_string(),
    })
}

/// Failure result when `id` is outside the section's allow-list.
pub(crate) fn id_filter(
    section: &SourceConfig,
    kind: &str,
    id: Option<&str>,
) -> Option<TransformationResult> {
    (!section.allows_id(id)).then(|| {
        TransformationResult::failure(format!(
            "{} {} is not in the allow-list",
            kind,
            id.unwrap_or("(none)")
        ))
    })
}

/// Failure result when `event_type` is outside the section's allow-list.
pub(crate) fn event_filter(section: &SourceConfig, event_type: &str) -> Option<TransformationResult> {
    (!section.allows_event(event_type)).then(|| {
        TransformationResult::failure(format!(
            "event type {} is not in the allow-list",
            event_type
        ))
    })
}

/// Failure result for an unmapped action/type combination.
pub(crate) fn no_task(event_type: &str, action: Option<&str>) -> TransformationResult {
    match action {
        Some(action) => TransformationResult::failure(format!(
            "no task for this action: {}/{}",
            event_type, action
        )),
        None => TransformationResult::failure(format!("no task for this action: {}", event_type)),
    }
}

/// `Key: value` block used for task notes.
#[derive(Debug, Default)]
pub(crate) struct Notes {
    lines: Vec<String>,
    body: Option<String>,
}

/// Longest excerpt of an issue/page body copied into notes.
const BODY_EXCERPT_CHARS: usize = 500;

impl Notes {
    pub(crate) fn field(mut self, label: &str, value: Option<impl AsRef<str>>) -> Self {
        if let Some(value) = value {
            let value = value.as_ref();
            if !value.is_empty() {
                self.lines.push(format!("{}: {}", label, value));
            }
        }
        self
    }

    pub(crate) fn body(mut self, body: Option<&str>) -> Self {
        self.body = body
            .map(str::trim)
            .filter(|b| !b.is_empty())
            .map(|b| truncate_chars(b, BODY_EXCERPT_CHARS));
        self
    }

    pub(crate) fn build(self) -> Option<String> {
        let mut out = self.lines.join("\n");
        if let Some(body) = self.body {
            if !out.is_empty() {
                out.push_str("\n\n");
            }
            out.push_str(&body);
        }
        (!out.is_empty()).then_some(out)
    }
}

/// Cut `text` to at most `max` characters, marking the cut with `...`.
pub(crate) fn truncate_chars(text: &str, max: usize) -> String {
    if text.chars().count() <= max {
        return text.to_string();
    }
    let kept: String = text.chars().take(max.saturating_sub(3)).collect();
    format!("{}...", kept.trim_end())
}
