// SPDX-FileCopyrightText: 2025 Hyperpolymath
// SPDX-License-Identifier: PMPL-1.0-or-later

//! GitHub issue and pull request events.

use super::template::{lookup, lookup_string};
use super::{
    event_filter, id_filter, no_task, section, Notes, SourceHandler, TaskIntent, TaskMetadata,
    TransformError, TransformationResult,
};
use crate::config::WebhookConfig;
use crate::event::{InboundEvent, Source};
use crate::validator::{require_child, require_object, require_str, ValidationError};
use serde_json::Value;

/// Header naming the GitHub event type.
pub const HEADER_GITHUB_EVENT: &str = "x-github-event";

pub struct GithubHandler;

/// Which payload object a mapped event reads from and how it is labelled.
struct Mapping {
    item_field: &'static str,
    kind_tag: &'static str,
    title_prefix: &'static str,
    review: bool,
}

fn mapping(event_type: &str, action: &str) -> Option<Mapping> {
    let item = |item_field, kind_tag| Mapping {
        item_field,
        kind_tag,
        title_prefix: "",
        review: false,
    };
    match (event_type, action) {
        ("issues", "opened" | "reopened") => Some(item("issue", "issue")),
        ("pull_request", "opened" | "reopened" | "ready_for_review") => {
            Some(item("pull_request", "pull-request"))
        }
        ("pull_request", "review_requested") => Some(Mapping {
            title_prefix: "Review ",
            review: true,
            ..item("pull_request", "pull-request")
        }),
        _ => None,
    }
}

impl SourceHandler for GithubHandler {
    fn validate(&self, payload: &Value) -> Result<(), ValidationError> {
        let root = require_object(payload)?;
        require_str(root, "action")?;
        let repository = require_child(root, "repository")?;
        require_str(repository, "full_name")?;
        require_str(repository, "html_url")?;
        Ok(())
    }

    fn event_type_header(&self) -> Option<&'static str> {
        Some(HEADER_GITHUB_EVENT)
    }

    fn event_type(&self, _payload: &Value, header: Option<&str>) -> String {
        header
            .map(str::trim)
            .filter(|h| !h.is_empty())
            .unwrap_or("unknown")
            .to_string()
    }

    fn transform(
        &self,
        event: &InboundEvent,
        config: &WebhookConfig,
    ) -> Result<TransformationResult, TransformError> {
        let section = section(config, Source::Github)?;
        let data = event.data();
        let full_name = lookup(data, "repository.full_name").and_then(Value::as_str);

        if let Some(rejected) = id_filter(section, "repository", full_name) {
            return Ok(rejected);
        }
        if let Some(rejected) = event_filter(section, event.event_type()) {
            return Ok(rejected);
        }

        let action = lookup(data, "action").and_then(Value::as_str).unwrap_or("");
        let Some(mapping) = mapping(event.event_type(), action) else {
            return Ok(no_task(event.event_type(), Some(action)));
        };

        let Some(item) = data.get(mapping.item_field).filter(|v| v.is_object()) else {
            return Ok(TransformationResult::failure(format!(
                "payload has no {} object",
                mapping.item_field
            )));
        };

        let repo_name = lookup_string(data, "repository.name")
            .or_else(|| full_name.map(str::to_string))
            .unwrap_or_default();
        let number = lookup_string(item, "number").unwrap_or_else(|| "?".to_string());
        let item_title = lookup_string(item, "title").unwrap_or_default();
        let url = lookup_string(item, "html_url");

        let title = format!(
            "{}{}#{}: {}",
            mapping.title_prefix, repo_name, number, item_title
        );

        let mut tags = vec![Source::Github.to_string(), mapping.kind_tag.to_string()];
        if mapping.review {
            tags.push("review".to_string());
        }
        if let Some(labels) = item.get("labels").and_then(Value::as_array) {
            tags.extend(
                labels
                    .iter()
                    .filter_map(|label| label.get("name").and_then(Value::as_str))
                    .map(str::to_string),
            );
        }

        let notes = Notes::default()
            .field("Author", lookup_string(item, "user.login").map(|l| format!("@{}", l)))
            .field("State", lookup_string(item, "state"))
            .field("Link", url.as_deref())
            .body(lookup(item, "body").and_then(Value::as_str))
            .build();

        let task = TaskIntent {
            title,
            notes,
            tags,
            due: None,
            project: section.project.clone(),
        };
        let metadata = TaskMetadata {
            source: Source::Github,
            original_id: lookup_string(item, "id").or(Some(number)),
            url,
        };

        Ok(TransformationResult::task(task, metadata))
    }
}
