// SPDX-FileCopyrightText: 2025 Hyperpolymath
// SPDX-License-Identifier: PMPL-1.0-or-later

//! Configurable rules for the generic source.
//!
//! Rules are evaluated in order against the sanitized payload; the first
//! rule whose condition matches supplies the task template.

use super::template::{interpolate, lookup};
use super::TaskIntent;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A named condition/template pair.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransformRule {
    pub name: String,
    pub condition: RuleCondition,
    #[serde(alias = "transformation")]
    pub transform: RuleTemplate,
}

/// Comparison of one payload field.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RuleCondition {
    /// Dotted path into the payload
    pub field: String,
    pub operator: Operator,
    /// Operand; unused by `exists`
    #[serde(default)]
    pub value: Option<Value>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Operator {
    /// Strict JSON equality
    Equals,
    /// Substring match, strings only
    Contains,
    /// Prefix match, strings only
    #[serde(alias = "startsWith")]
    StartsWith,
    /// Field present and not null
    Exists,
}

/// Task template with `{{path}}` placeholders.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RuleTemplate {
    pub title: String,
    #[serde(default)]
    pub notes: Option<String>,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub project: Option<String>,
}

impl RuleCondition {
    pub fn matches(&self, data: &Value) -> bool {
        let resolved = lookup(data, &self.field);
        match self.operator {
            Operator::Equals => match (resolved, &self.value) {
                (Some(actual), Some(expected)) => actual == expected,
                _ => false,
            },
            Operator::Contains => match Self::strings(resolved, &self.value) {
                Some((actual, expected)) => actual.contains(expected),
                None => false,
            },
            Operator::StartsWith => match Self::strings(resolved, &self.value) {
                Some((actual, expected)) => actual.starts_with(expected),
                None => false,
            },
            Operator::Exists => resolved.is_some_and(|v| !v.is_null()),
        }
    }

    fn strings<'a>(
        resolved: Option<&'a Value>,
        operand: &'a Option<Value>,
    ) -> Option<(&'a str, &'a str)> {
        let actual = resolved?.as_str()?;
        let expected = operand.as_ref()?.as_str()?;
        Some((actual, expected))
    }
}

impl RuleTemplate {
    /// Interpolate every template field against `data`.
    pub fn render(&self, data: &Value) -> TaskIntent {
        TaskIntent {
            title: interpolate(&self.title, data),
            notes: self.notes.as_deref().map(|n| interpolate(n, data)),
            tags: self.tags.iter().map(|t| interpolate(t, data)).collect(),
            due: None,
            project: self.project.as_deref().map(|p| interpolate(p, data)),
        }
    }
}

/// First rule matching `data`, in declaration order.
pub fn first_match<'r>(rules: &'r [TransformRule], data: &Value) -> Option<&'r TransformRule> {
    rules.iter().find(|rule| rule.condition.matches(data))
}
