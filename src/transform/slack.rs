// SPDX-FileCopyrightText: 2025 Hyperpolymath
// SPDX-License-Identifier: PMPL-1.0-or-later

//! Slack Events API callbacks: mentions and direct messages.

use super::template::{lookup, lookup_string};
use super::{
    event_filter, id_filter, no_task, section, truncate_chars, Notes, SourceHandler, TaskIntent,
    TaskMetadata, TransformError, TransformationResult,
};
use crate::config::WebhookConfig;
use crate::event::{InboundEvent, Source};
use crate::validator::{require_child, require_object, require_str, ValidationError};
use serde_json::Value;

/// Task titles carry at most this much message text.
const TITLE_TEXT_CHARS: usize = 80;

pub struct SlackHandler;

/// Permalink-style archive URL for a message.
fn archive_url(channel: &str, ts: &str) -> String {
    format!("https://slack.com/archives/{}/p{}", channel, ts.replace('.', ""))
}

impl SourceHandler for SlackHandler {
    fn validate(&self, payload: &Value) -> Result<(), ValidationError> {
        let root = require_object(payload)?;
        if require_str(root, "type")? == "event_callback" {
            let inner = require_child(root, "event")?;
            require_str(inner, "type")?;
        }
        Ok(())
    }

    fn event_type(&self, payload: &Value, _header: Option<&str>) -> String {
        let outer = lookup_string(payload, "type");
        match outer.as_deref() {
            Some("event_callback") => {
                lookup_string(payload, "event.type").unwrap_or_else(|| "unknown".to_string())
            }
            _ => outer.unwrap_or_else(|| "unknown".to_string()),
        }
    }

    fn transform(
        &self,
        event: &InboundEvent,
        config: &WebhookConfig,
    ) -> Result<TransformationResult, TransformError> {
        let section = section(config, Source::Slack)?;
        let data = event.data();
        let message = data.get("event").unwrap_or(&Value::Null);
        let channel = lookup(message, "channel").and_then(Value::as_str);

        if let Some(rejected) = id_filter(section, "channel", channel) {
            return Ok(rejected);
        }
        if let Some(rejected) = event_filter(section, event.event_type()) {
            return Ok(rejected);
        }

        // Bot posts and edits carry a subtype; only plain messages count
        let plain = message.get("subtype").is_none() && message.get("bot_id").is_none();
        let channel_type = lookup(message, "channel_type").and_then(Value::as_str);

        let (title_prefix, kind_tag) = match (event.event_type(), channel_type) {
            ("app_mention", _) if plain => ("Slack mention: ", "mention"),
            ("message", Some("im")) if plain => ("Slack message: ", "direct-message"),
            (other, _) => return Ok(no_task(other, None)),
        };

        let text = lookup(message, "text")
            .and_then(Value::as_str)
            .map(|t| t.split_whitespace().collect::<Vec<_>>().join(" "))
            .filter(|t| !t.is_empty())
            .unwrap_or_else(|| "(no text)".to_string());

        let channel = channel.unwrap_or_default();
        let ts = lookup_string(message, "ts");
        let url = ts.as_deref().map(|ts| archive_url(channel, ts));

        let notes = Notes::default()
            .field("Author", lookup_string(message, "user"))
            .field("Channel", Some(channel))
            .field("Link", url.as_deref())
            .body(Some(&text))
            .build();

        let task = TaskIntent {
            title: format!("{}{}", title_prefix, truncate_chars(&text, TITLE_TEXT_CHARS)),
            notes,
            tags: vec![Source::Slack.to_string(), kind_tag.to_string()],
            due: None,
            project: section.project.clone(),
        };
        let metadata = TaskMetadata {
            source: Source::Slack,
            original_id: lookup_string(message, "client_msg_id").or(ts),
            url,
        };

        Ok(TransformationResult::task(task, metadata))
    }
}
