// SPDX-FileCopyrightText: 2025 Hyperpolymath
// SPDX-License-Identifier: Apache-2.0

//! Payload builders and signing helpers.

use serde_json::{json, Value};
use std::collections::HashMap;
use webhook_dispatcher::config::{SourceConfig, WebhookConfig};
use webhook_dispatcher::crypto::{Crypto, HmacCrypto};
use webhook_dispatcher::Source;

pub const GITHUB_SECRET: &str = "github-test-secret";
pub const SLACK_SECRET: &str = "slack-test-secret";
pub const NOTION_SECRET: &str = "notion-test-secret";
pub const GENERIC_SECRET: &str = "generic-test-secret";

fn hmac_hex(secret: &str, message: &[u8]) -> String {
    HmacCrypto::new().hmac_sha256_hex(secret.as_bytes(), message)
}

/// `X-Hub-Signature-256` value.
pub fn github_signature(secret: &str, body: &[u8]) -> String {
    format!("sha256={}", hmac_hex(secret, body))
}

/// `X-Slack-Signature` value for `timestamp` (epoch seconds).
pub fn slack_signature(secret: &str, timestamp: i64, body: &[u8]) -> String {
    let mut base = format!("v0:{}:", timestamp).into_bytes();
    base.extend_from_slice(body);
    format!("v0={}", hmac_hex(secret, &base))
}

/// `Notion-Signature` value.
pub fn notion_signature(secret: &str, body: &[u8]) -> String {
    hmac_hex(secret, body)
}

/// Generic `X-Signature` value with an optional scheme prefix.
pub fn generic_signature(secret: &str, prefix: &str, body: &[u8]) -> String {
    format!("{}{}", prefix, hmac_hex(secret, body))
}

/// Every source enabled and signed with the test secrets, plus one alert rule.
pub fn full_config() -> WebhookConfig {
    let sections: HashMap<Source, SourceConfig> = [
        (Source::Github, Some(GITHUB_SECRET)),
        (Source::Slack, Some(SLACK_SECRET)),
        (Source::Notion, Some(NOTION_SECRET)),
        (Source::Generic, Some(GENERIC_SECRET)),
        (Source::Sync, None),
    ]
    .into_iter()
    .map(|(source, secret)| {
        (
            source,
            SourceConfig {
                enabled: true,
                secret: secret.map(String::from),
                ..Default::default()
            },
        )
    })
    .collect();

    let mut config: WebhookConfig = serde_json::from_value(json!({
        "transform_rules": [
            {
                "name": "alerts",
                "condition": { "field": "type", "operator": "equals", "value": "alert" },
                "transform": {
                    "title": "Alert: {{message}}",
                    "notes": "Level: {{level}}",
                    "tags": ["alert"]
                }
            }
        ]
    }))
    .unwrap();
    config.sources = sections;
    config
}

/// GitHub `issues` payload.
pub fn github_issue(action: &str, number: u64, title: &str, labels: &[&str]) -> Value {
    json!({
        "action": action,
        "issue": {
            "id": 1_000 + number,
            "number": number,
            "title": title,
            "state": "open",
            "body": "Steps to reproduce",
            "html_url": format!("https://github.com/acme/widgets/issues/{}", number),
            "user": { "login": "octocat" },
            "labels": labels.iter().map(|l| json!({ "name": l })).collect::<Vec<_>>()
        },
        "repository": {
            "name": "widgets",
            "full_name": "acme/widgets",
            "html_url": "https://github.com/acme/widgets"
        },
        "sender": { "login": "octocat" }
    })
}

/// Slack `event_callback` wrapping an `app_mention`.
pub fn slack_mention(channel: &str, text: &str) -> Value {
    json!({
        "type": "event_callback",
        "team_id": "T0001",
        "event": {
            "type": "app_mention",
            "user": "U0001",
            "channel": channel,
            "text": text,
            "ts": "1700000000.000200"
        }
    })
}

/// Notion `page.created` event.
pub fn notion_page(title: &str, parent: &str) -> Value {
    json!({
        "type": "page.created",
        "entity": { "id": "2f1e-77aa", "type": "page" },
        "authors": [ { "id": "user-1", "type": "person" } ],
        "data": { "title": title, "parent": { "id": parent, "type": "database" } }
    })
}

/// Copy of `body` with the byte at `index` changed.
pub fn flip_byte(body: &[u8], index: usize, xor: u8) -> Vec<u8> {
    let mut flipped = body.to_vec();
    flipped[index] ^= xor;
    flipped
}

/// Serialize a payload the way a sender would.
pub fn to_body(payload: &Value) -> Vec<u8> {
    serde_json::to_vec(payload).unwrap()
}
