// SPDX-FileCopyrightText: 2025 Hyperpolymath
// SPDX-License-Identifier: PMPL-1.0-or-later

//! Notion page and comment events.

use super::template::{lookup, lookup_string};
use super::{
    event_filter, id_filter, no_task, section, Notes, SourceHandler, TaskIntent, TaskMetadata,
    TransformError, TransformationResult,
};
use crate::config::WebhookConfig;
use crate::event::{InboundEvent, Source};
use crate::validator::{require_child, require_object, require_str, ValidationError};
use serde_json::Value;

pub struct NotionHandler;

/// Public URL of a page or block id.
fn notion_url(id: &str) -> String {
    format!("https://www.notion.so/{}", id.replace('-', ""))
}

impl SourceHandler for NotionHandler {
    fn validate(&self, payload: &Value) -> Result<(), ValidationError> {
        let root = require_object(payload)?;
        require_str(root, "type")?;
        let entity = require_child(root, "entity")?;
        require_str(entity, "id")?;
        Ok(())
    }

    fn event_type(&self, payload: &Value, _header: Option<&str>) -> String {
        lookup_string(payload, "type").unwrap_or_else(|| "unknown".to_string())
    }

    fn transform(
        &self,
        event: &InboundEvent,
        config: &WebhookConfig,
    ) -> Result<TransformationResult, TransformError> {
        let section = section(config, Source::Notion)?;
        let data = event.data();
        let database = lookup(data, "data.parent.id").and_then(Value::as_str);

        if let Some(rejected) = id_filter(section, "database", database) {
            return Ok(rejected);
        }
        if let Some(rejected) = event_filter(section, event.event_type()) {
            return Ok(rejected);
        }

        let (title_prefix, kind_tag) = match event.event_type() {
            "page.created" => ("New page: ", "page"),
            "comment.created" => ("New comment on ", "comment"),
            other => return Ok(no_task(other, None)),
        };

        let entity_id = lookup_string(data, "entity.id").unwrap_or_default();
        // Comments link to the page they were left on
        let page_id = lookup_string(data, "data.page_id").unwrap_or_else(|| entity_id.clone());
        let subject = lookup_string(data, "data.title").unwrap_or_else(|| page_id.clone());
        let url = notion_url(&page_id);

        let notes = Notes::default()
            .field("Author", lookup_string(data, "authors.0.id"))
            .field("Entity", Some(format!("{} {}", kind_tag, entity_id)))
            .field("Link", Some(url.as_str()))
            .build();

        let task = TaskIntent {
            title: format!("{}{}", title_prefix, subject),
            notes,
            tags: vec![Source::Notion.to_string(), kind_tag.to_string()],
            due: None,
            project: section.project.clone(),
        };
        let metadata = TaskMetadata {
            source: Source::Notion,
            original_id: Some(entity_id),
            url: Some(url),
        };

        Ok(TransformationResult::task(task, metadata))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SourceConfig;
    use chrono::Utc;
    use serde_json::json;

    fn config(section: SourceConfig) -> WebhookConfig {
        let mut config = WebhookConfig::default();
        config.sources.insert(Source::Notion, section);
        config
    }

    fn event(event_type: &str, data: Value) -> InboundEvent {
        InboundEvent::new("notion-1-00", Source::Notion, event_type, Utc::now(), data)
    }

    #[test]
    fn test_page_created() {
        let event = event(
            "page.created",
            json!({
                "type": "page.created",
                "entity": { "id": "1a2b-3c4d", "type": "page" },
                "authors": [ { "id": "user-9", "type": "person" } ],
                "data": { "title": "Q3 roadmap", "parent": { "id": "db-1", "type": "database" } }
            }),
        );
        let result = NotionHandler
            .transform(&event, &config(SourceConfig::default()))
            .unwrap();
        let task = result.task.unwrap();
        assert_eq!(task.title, "New page: Q3 roadmap");
        assert_eq!(task.tags, vec!["notion", "page"]);
        let notes = task.notes.unwrap();
        assert!(notes.contains("Author: user-9"));
        assert!(notes.contains("Link: https://www.notion.so/1a2b3c4d"));
        assert_eq!(result.metadata.unwrap().original_id.as_deref(), Some("1a2b-3c4d"));
    }

    #[test]
    fn test_comment_without_title_uses_page_id() {
        let event = event(
            "comment.created",
            json!({
                "type": "comment.created",
                "entity": { "id": "c-1", "type": "comment" },
                "data": { "page_id": "p-1" }
            }),
        );
        let task = NotionHandler
            .transform(&event, &config(SourceConfig::default()))
            .unwrap()
            .task
            .unwrap();
        assert_eq!(task.title, "New comment on p-1");
        assert_eq!(task.tags, vec!["notion", "comment"]);
    }

    #[test]
    fn test_database_filter_and_unmapped_type() {
        let data = json!({
            "type": "page.created",
            "entity": { "id": "p-2" },
            "data": { "parent": { "id": "db-2" } }
        });
        let section = SourceConfig {
            allowed_ids: Some(vec!["db-1".into()]),
            ..Default::default()
        };
        let result = NotionHandler
            .transform(&event("page.created", data), &config(section))
            .unwrap();
        assert_eq!(
            result.error.as_deref(),
            Some("database db-2 is not in the allow-list")
        );

        let result = NotionHandler
            .transform(
                &event("page.deleted", json!({ "entity": { "id": "p-3" } })),
                &config(SourceConfig::default()),
            )
            .unwrap();
        assert_eq!(result.error.as_deref(), Some("no task for this action: page.deleted"));
    }
}
