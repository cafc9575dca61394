// SPDX-FileCopyrightText: 2025 Hyperpolymath
// SPDX-License-Identifier: PMPL-1.0-or-later

//! Dotted-path lookup and `{{path}}` template interpolation.
//!
//! Both are pure functions over a JSON value. A template is tokenized once
//! into literal and placeholder segments and can be rendered against any
//! number of payloads. Placeholders whose path does not resolve, or resolves
//! to `null`, are rendered back as the original token.

use serde_json::Value;

const OPEN: &str = "{{";
const CLOSE: &str = "}}";

/// Resolve `a.b.0.c` against `root`.
///
/// Object segments are keys; array segments are indices. Any missing
/// segment, or an empty path, yields `None`.
pub fn lookup<'a>(root: &'a Value, path: &str) -> Option<&'a Value> {
    if path.is_empty() {
        return None;
    }
    path.split('.').try_fold(root, |current, segment| match current {
        Value::Object(map) => map.get(segment),
        Value::Array(items) => segment.parse::<usize>().ok().and_then(|i| items.get(i)),
        _ => None,
    })
}

/// String form of a resolved value. `null` counts as unresolved.
pub fn value_to_string(value: &Value) -> Option<String> {
    match value {
        Value::Null => None,
        Value::String(s) => Some(s.clone()),
        other => Some(other.to_string()),
    }
}

/// Resolve `path` and convert the result with [`value_to_string`].
pub fn lookup_string(root: &Value, path: &str) -> Option<String> {
    lookup(root, path).and_then(value_to_string)
}

/// One piece of a parsed template.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Segment<'t> {
    Literal(&'t str),
    /// `token` is the full `{{ ... }}` text, `path` its trimmed contents.
    Placeholder { token: &'t str, path: &'t str },
}

/// A tokenized template borrowing from its source text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Template<'t> {
    segments: Vec<Segment<'t>>,
}

impl<'t> Template<'t> {
    /// Tokenize `source`. Never fails: an unterminated `{{` is kept as text.
    pub fn parse(source: &'t str) -> Self {
        let mut segments = Vec::new();
        let mut rest = source;

        while let Some(start) = rest.find(OPEN) {
            let after_open = &rest[start + OPEN.len()..];
            let Some(end) = after_open.find(CLOSE) else {
                break;
            };

            if start > 0 {
                segments.push(Segment::Literal(&rest[..start]));
            }

            let token_len = OPEN.len() + end + CLOSE.len();
            let token = &rest[start..start + token_len];
            let path = after_open[..end].trim();
            if path.is_empty() {
                segments.push(Segment::Literal(token));
            } else {
                segments.push(Segment::Placeholder { token, path });
            }

            rest = &rest[start + token_len..];
        }

        if !rest.is_empty() {
            segments.push(Segment::Literal(rest));
        }

        Self { segments }
    }

    #[cfg(test)]
    fn segments(&self) -> &[Segment<'t>] {
        &self.segments
    }

    /// Paths referenced by this template, in order of appearance.
    #[cfg(test)]
    fn paths(&self) -> impl Iterator<Item = &'t str> + '_ {
        self.segments.iter().filter_map(|s| match s {
            Segment::Placeholder { path, .. } => Some(*path),
            Segment::Literal(_) => None,
        })
    }

    /// Render against `data`.
    pub fn render(&self, data: &Value) -> String {
        let mut out = String::new();
        for segment in &self.segments {
            match segment {
                Segment::Literal(text) => out.push_str(text),
                Segment::Placeholder { token, path } => match lookup_string(data, path) {
                    Some(value) => out.push_str(&value),
                    None => out.push_str(token),
                },
            }
        }
        out
    }
}

/// Parse and render in one step.
pub fn interpolate(template: &str, data: &Value) -> String {
    Template::parse(template).render(data)
}
