// SPDX-FileCopyrightText: 2025 Hyperpolymath
// SPDX-License-Identifier: PMPL-1.0-or-later

//! Change feed from the task sync agent.
//!
//! The payload carries a `changes` array; each entry naming a task and a
//! recognised action becomes a pending sync request. Entries lacking either
//! are skipped.

use super::template::{lookup_string, value_to_string};
use super::{
    event_filter, section, SourceHandler, SyncAction, SyncRequest, TransformError,
    TransformationResult,
};
use crate::config::WebhookConfig;
use crate::event::{InboundEvent, Source};
use crate::validator::{require_object, ValidationError};
use serde_json::Value;
use tracing::debug;

/// Fields naming the target task, in lookup order.
const TASK_ID_FIELDS: &[&str] = &["task_id", "taskId", "id"];

pub struct SyncHandler;

fn parse_action(action: &str) -> Option<SyncAction> {
    match action {
        "completed" | "complete" => Some(SyncAction::Complete),
        "deleted" | "delete" => Some(SyncAction::Delete),
        _ => None,
    }
}

fn sync_request(change: &Value) -> Option<SyncRequest> {
    let task_id = TASK_ID_FIELDS
        .iter()
        .filter_map(|field| change.get(*field))
        .find_map(|v| match v {
            Value::String(_) | Value::Number(_) => value_to_string(v),
            _ => None,
        })
        .filter(|id| !id.is_empty())?;
    let action = parse_action(change.get("action")?.as_str()?)?;

    Some(SyncRequest {
        task_id,
        action,
        title: lookup_string(change, "title"),
    })
}

impl SourceHandler for SyncHandler {
    fn validate(&self, payload: &Value) -> Result<(), ValidationError> {
        let root = require_object(payload)?;
        match root.get("changes") {
            Some(Value::Array(_)) => Ok(()),
            _ => Err(ValidationError::MissingArray("changes")),
        }
    }

    fn event_type(&self, payload: &Value, _header: Option<&str>) -> String {
        lookup_string(payload, "type").unwrap_or_else(|| Source::Sync.to_string())
    }

    fn transform(
        &self,
        event: &InboundEvent,
        config: &WebhookConfig,
    ) -> Result<TransformationResult, TransformError> {
        let section = section(config, Source::Sync)?;
        if let Some(rejected) = event_filter(section, event.event_type()) {
            return Ok(rejected);
        }

        let changes = event
            .data()
            .get("changes")
            .and_then(Value::as_array)
            .map(Vec::as_slice)
            .unwrap_or_default();
        let requests: Vec<SyncRequest> = changes.iter().filter_map(sync_request).collect();

        let skipped = changes.len() - requests.len();
        if skipped > 0 {
            debug!(event_id = %event.id(), skipped, "Sync entries skipped");
        }

        Ok(TransformationResult::sync(requests))
    }
}
