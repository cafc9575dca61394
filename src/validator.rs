// SPDX-FileCopyrightText: 2025 Hyperpolymath
// SPDX-License-Identifier: PMPL-1.0-or-later

//! Inbound payload validation and sanitization.
//!
//! - Structural validation: the minimal shape each source's handler needs
//! - Sanitization: strip credential-shaped top-level keys and replace
//!   oversized payloads with a truncation marker

use crate::event::Source;
use serde_json::{json, Map, Value};
use thiserror::Error;
use tracing::debug;

/// Payloads serializing beyond this many bytes are replaced by a marker.
pub const MAX_PAYLOAD_BYTES: usize = 50_000;

/// Top-level keys never kept in a normalized event.
pub const SENSITIVE_KEYS: &[&str] = &[
    "token",
    "access_token",
    "refresh_token",
    "secret",
    "client_secret",
    "password",
    "api_key",
    "apiKey",
    "authorization",
    "private_key",
];

/// Validation error types.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ValidationError {
    #[error("payload must be a JSON object")]
    NotAnObject,

    #[error("missing or non-string field: {0}")]
    MissingString(&'static str),

    #[error("missing or non-object field: {0}")]
    MissingObject(&'static str),

    #[error("missing or non-array field: {0}")]
    MissingArray(&'static str),
}

/// Result of validation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ValidationResult {
    /// Payload is valid
    Valid,
    /// Payload is invalid
    Invalid(ValidationError),
}

impl ValidationResult {
    pub fn is_valid(&self) -> bool {
        matches!(self, ValidationResult::Valid)
    }

    pub fn error(&self) -> Option<&ValidationError> {
        match self {
            ValidationResult::Valid => None,
            ValidationResult::Invalid(e) => Some(e),
        }
    }
}

impl From<Result<(), ValidationError>> for ValidationResult {
    fn from(result: Result<(), ValidationError>) -> Self {
        match result {
            Ok(()) => ValidationResult::Valid,
            Err(e) => ValidationResult::Invalid(e),
        }
    }
}

/// Check `payload` has the shape the `source` handler relies on.
pub fn validate(source: Source, payload: &Value) -> ValidationResult {
    let result: ValidationResult = source.handler().validate(payload).into();
    if let ValidationResult::Invalid(err) = &result {
        debug!(%source, error = %err, "Payload structure invalid");
    }
    result
}

/// Strip sensitive keys and cap the payload size.
pub fn sanitize(payload: Value) -> Value {
    let sanitized = match payload {
        Value::Object(map) => Value::Object(
            map.into_iter()
                .filter(|(key, _)| !SENSITIVE_KEYS.contains(&key.as_str()))
                .collect::<Map<String, Value>>(),
        ),
        other => other,
    };

    let size = serde_json::to_vec(&sanitized).map(|v| v.len()).unwrap_or(0);
    if size > MAX_PAYLOAD_BYTES {
        debug!(size, limit = MAX_PAYLOAD_BYTES, "Payload truncated");
        return json!({ "truncated": true, "original_size": size });
    }

    sanitized
}

/// Require `payload` to be an object.
pub(crate) fn require_object(payload: &Value) -> Result<&Map<String, Value>, ValidationError> {
    payload.as_object().ok_or(ValidationError::NotAnObject)
}

/// Require `parent[field]` to be a string.
pub(crate) fn require_str<'a>(
    parent: &'a Map<String, Value>,
    field: &'static str,
) -> Result<&'a str, ValidationError> {
    parent
        .get(field)
        .and_then(Value::as_str)
        .ok_or(ValidationError::MissingString(field))
}

/// Require `parent[field]` to be an object.
pub(crate) fn require_child<'a>(
    parent: &'a Map<String, Value>,
    field: &'static str,
) -> Result<&'a Map<String, Value>, ValidationError> {
    parent
        .get(field)
        .and_then(Value::as_object)
        .ok_or(ValidationError::MissingObject(field))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sensitive_keys_removed() {
        let payload = json!({
            "type": "test",
            "token": "xoxb-123",
            "password": "hunter2",
            "nested": { "token": "kept-because-nested" }
        });
        let sanitized = sanitize(payload);
        assert!(sanitized.get("token").is_none());
        assert!(sanitized.get("password").is_none());
        assert_eq!(sanitized["type"], "test");
        assert_eq!(sanitized["nested"]["token"], "kept-because-nested");
    }

    #[test]
    fn test_oversized_payload_truncated() {
        let big = "x".repeat(MAX_PAYLOAD_BYTES);
        let payload = json!({ "body": big });
        let original_size = serde_json::to_vec(&payload).unwrap().len();

        let sanitized = sanitize(payload);
        assert_eq!(sanitized["truncated"], true);
        assert_eq!(sanitized["original_size"], original_size);
        assert!(sanitized.get("body").is_none());
    }

    #[test]
    fn test_payload_at_limit_kept() {
        // {"b":"..."} adds 8 bytes of framing
        let payload = json!({ "b": "y".repeat(MAX_PAYLOAD_BYTES - 8) });
        assert_eq!(serde_json::to_vec(&payload).unwrap().len(), MAX_PAYLOAD_BYTES);
        assert_eq!(sanitize(payload.clone()), payload);
    }

    #[test]
    fn test_non_object_passes_through() {
        assert_eq!(sanitize(json!([1, 2])), json!([1, 2]));
    }

    #[test]
    fn test_validate_github() {
        let valid = json!({
            "action": "opened",
            "repository": { "full_name": "acme/widgets", "html_url": "https://github.com/acme/widgets" }
        });
        assert!(validate(Source::Github, &valid).is_valid());

        let missing_repo = json!({ "action": "opened" });
        assert_eq!(
            validate(Source::Github, &missing_repo).error(),
            Some(&ValidationError::MissingObject("repository"))
        );

        let missing_url = json!({ "action": "opened", "repository": { "full_name": "acme/widgets" } });
        assert_eq!(
            validate(Source::Github, &missing_url).error(),
            Some(&ValidationError::MissingString("html_url"))
        );
    }

    #[test]
    fn test_validate_other_sources() {
        assert!(validate(Source::Notion, &json!({ "type": "page.created", "entity": { "id": "p1" } })).is_valid());
        assert!(!validate(Source::Notion, &json!({ "type": "page.created" })).is_valid());

        assert!(validate(Source::Slack, &json!({ "type": "event_callback", "event": { "type": "app_mention" } })).is_valid());
        assert!(!validate(Source::Slack, &json!({ "type": "event_callback" })).is_valid());
        assert!(validate(Source::Slack, &json!({ "type": "app_rate_limited" })).is_valid());

        assert!(validate(Source::Generic, &json!({})).is_valid());
        assert!(!validate(Source::Generic, &json!("text")).is_valid());

        assert!(validate(Source::Sync, &json!({ "changes": [] })).is_valid());
        assert_eq!(
            validate(Source::Sync, &json!({ "changes": {} })).error(),
            Some(&ValidationError::MissingArray("changes"))
        );
    }
}
