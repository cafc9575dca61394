// SPDX-FileCopyrightText: 2025 Hyperpolymath
// SPDX-License-Identifier: PMPL-1.0-or-later

//! Rule-driven handler for arbitrary JSON webhooks.

use super::rules::first_match;
use super::template::lookup_string;
use super::{
    event_filter, section, SourceHandler, TaskMetadata, TransformError, TransformationResult,
};
use crate::config::WebhookConfig;
use crate::event::{InboundEvent, Source};
use crate::validator::{require_object, ValidationError};
use serde_json::Value;
use tracing::debug;

/// Header naming the event type when the body has no `type` field.
pub const HEADER_EVENT_TYPE: &str = "x-event-type";

pub struct GenericHandler;

impl SourceHandler for GenericHandler {
    fn validate(&self, payload: &Value) -> Result<(), ValidationError> {
        require_object(payload).map(|_| ())
    }

    fn event_type_header(&self) -> Option<&'static str> {
        Some(HEADER_EVENT_TYPE)
    }

    fn event_type(&self, payload: &Value, header: Option<&str>) -> String {
        lookup_string(payload, "type")
            .or_else(|| header.map(str::trim).filter(|h| !h.is_empty()).map(String::from))
            .unwrap_or_else(|| Source::Generic.to_string())
    }

    fn transform(
        &self,
        event: &InboundEvent,
        config: &WebhookConfig,
    ) -> Result<TransformationResult, TransformError> {
        let section = section(config, Source::Generic)?;
        if let Some(rejected) = event_filter(section, event.event_type()) {
            return Ok(rejected);
        }

        let data = event.data();
        let Some(rule) = first_match(&config.transform_rules, data) else {
            return Ok(TransformationResult::failure("no matching rule"));
        };
        debug!(rule = %rule.name, event_id = %event.id(), "Transform rule matched");

        let mut task = rule.transform.render(data);
        if task.project.is_none() {
            task.project = section.project.clone();
        }
        let metadata = TaskMetadata {
            source: Source::Generic,
            original_id: lookup_string(data, "id"),
            url: lookup_string(data, "url"),
        };

        Ok(TransformationResult::task(task, metadata))
    }
}
