// SPDX-FileCopyrightText: 2025 Hyperpolymath
// SPDX-License-Identifier: PMPL-1.0-or-later

//! Per-source webhook signature verification.
//!
//! Every scheme is HMAC-SHA256 keyed with the source's shared secret; they
//! differ in header name, prefix and what exactly is signed:
//!
//! | source         | header                         | signed bytes             | compared value   |
//! |----------------|--------------------------------|--------------------------|------------------|
//! | github         | `X-Hub-Signature-256`          | body                     | hex after `sha256=` |
//! | slack          | `X-Slack-Signature` + timestamp| `v0:{timestamp}:{body}`  | `v0=` + hex      |
//! | notion         | `Notion-Signature`             | body                     | bare hex         |
//! | generic / sync | first of several               | body                     | hex, known prefix stripped |
//!
//! Verification never errors: a missing header, missing secret, bad format or
//! stale timestamp all yield `false`.

use crate::clock::Clock;
use crate::crypto::Crypto;
use crate::event::Source;
use std::sync::Arc;
use tracing::debug;

/// GitHub signature header.
pub const HEADER_HUB_SIGNATURE: &str = "x-hub-signature-256";
/// Slack signature header.
pub const HEADER_SLACK_SIGNATURE: &str = "x-slack-signature";
/// Slack request timestamp header (epoch seconds).
pub const HEADER_SLACK_TIMESTAMP: &str = "x-slack-request-timestamp";
/// Notion signature header.
pub const HEADER_NOTION_SIGNATURE: &str = "notion-signature";
/// Preferred header for generic senders.
pub const HEADER_SIGNATURE: &str = "x-signature";
/// Alternate header for generic senders.
pub const HEADER_WEBHOOK_SIGNATURE: &str = "x-webhook-signature";

/// Maximum allowed skew between a Slack timestamp and now.
pub const SLACK_REPLAY_WINDOW_SECS: i64 = 300;

const GITHUB_PREFIX: &str = "sha256=";
const SLACK_VERSION: &str = "v0";
const GENERIC_PREFIXES: &[&str] = &["sha256=", "hmac-sha256=", "v1="];

/// Headers that may carry the signature for `source`, in lookup order.
pub fn signature_headers(source: Source) -> &'static [&'static str] {
    match source {
        Source::Github => &[HEADER_HUB_SIGNATURE],
        Source::Slack => &[HEADER_SLACK_SIGNATURE],
        Source::Notion => &[HEADER_NOTION_SIGNATURE],
        Source::Generic | Source::Sync => &[
            HEADER_SIGNATURE,
            HEADER_HUB_SIGNATURE,
            HEADER_WEBHOOK_SIGNATURE,
        ],
    }
}

/// HMAC verifier with injected crypto and clock.
#[derive(Clone)]
pub struct SignatureVerifier {
    crypto: Arc<dyn Crypto>,
    clock: Arc<dyn Clock>,
}

impl SignatureVerifier {
    pub fn new(crypto: Arc<dyn Crypto>, clock: Arc<dyn Clock>) -> Self {
        Self { crypto, clock }
    }

    /// Verify `signature` over `raw_body` for `source`.
    ///
    /// `timestamp` is only consulted for Slack, where it is mandatory.
    pub fn verify(
        &self,
        source: Source,
        raw_body: &[u8],
        signature: Option<&str>,
        secret: Option<&str>,
        timestamp: Option<&str>,
    ) -> bool {
        let (Some(signature), Some(secret)) = (signature, secret) else {
            debug!(%source, "Missing signature or secret");
            return false;
        };
        let signature = signature.trim();

        match source {
            Source::Github => {
                let Some(provided) = signature.strip_prefix(GITHUB_PREFIX) else {
                    debug!(%source, "Signature lacks sha256= prefix");
                    return false;
                };
                let expected = self.crypto.hmac_sha256_hex(secret.as_bytes(), raw_body);
                self.matches(&expected, provided)
            }
            Source::Slack => self.verify_slack(raw_body, signature, secret, timestamp),
            Source::Notion => {
                let expected = self.crypto.hmac_sha256_hex(secret.as_bytes(), raw_body);
                self.matches(&expected, signature)
            }
            Source::Generic | Source::Sync => {
                let provided = GENERIC_PREFIXES
                    .iter()
                    .find_map(|prefix| signature.strip_prefix(prefix))
                    .unwrap_or(signature);
                let expected = self.crypto.hmac_sha256_hex(secret.as_bytes(), raw_body);
                self.matches(&expected, provided)
            }
        }
    }

    fn verify_slack(
        &self,
        raw_body: &[u8],
        signature: &str,
        secret: &str,
        timestamp: Option<&str>,
    ) -> bool {
        if !signature.starts_with("v0=") {
            debug!("Slack signature lacks version prefix");
            return false;
        }

        let Some(raw_ts) = timestamp.map(str::trim) else {
            debug!("Slack timestamp missing");
            return false;
        };
        let Ok(ts) = raw_ts.parse::<i64>() else {
            debug!("Slack timestamp not an integer");
            return false;
        };

        let skew = (self.clock.now_secs() - ts).abs();
        if skew > SLACK_REPLAY_WINDOW_SECS {
            debug!(skew, "Slack timestamp outside replay window");
            return false;
        }

        // The base string uses the header text as sent.
        let expected = self.slack_signature(raw_body, secret, raw_ts);
        self.matches(&expected, signature)
    }

    fn slack_signature(&self, raw_body: &[u8], secret: &str, timestamp: &str) -> String {
        let mut base = format!("{}:{}:", SLACK_VERSION, timestamp).into_bytes();
        base.extend_from_slice(raw_body);
        format!(
            "{}={}",
            SLACK_VERSION,
            self.crypto.hmac_sha256_hex(secret.as_bytes(), &base)
        )
    }

    fn matches(&self, expected: &str, provided: &str) -> bool {
        self.crypto
            .constant_time_eq(expected.as_bytes(), provided.as_bytes())
    }

    /// Produce the header value a well-behaved sender would attach.
    pub fn sign(&self, source: Source, raw_body: &[u8], secret: &str, timestamp: i64) -> String {
        let hex = self.crypto.hmac_sha256_hex(secret.as_bytes(), raw_body);
        match source {
            Source::Github | Source::Generic | Source::Sync => format!("{}{}", GITHUB_PREFIX, hex),
            Source::Notion => hex,
            Source::Slack => self.slack_signature(raw_body, secret, &timestamp.to_string()),
        }
    }
}
