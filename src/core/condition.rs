//! Declarative stage conditions

use crate::core::stage::{value_text, StateSnapshot};
use regex::Regex;
use serde_json::Value;

/// Pattern for matching a state value (not serializable due to Regex)
#[derive(Debug, Clone)]
pub enum ConditionPattern {
    /// Simple string contains match
    Simple(String),
    /// Regular expression match
    Regex(Regex),
}

impl ConditionPattern {
    /// Check if the pattern matches the given text
    pub fn matches(&self, text: &str) -> bool {
        match self {
            ConditionPattern::Simple(pattern) => text.contains(pattern),
            ConditionPattern::Regex(regex) => regex.is_match(text),
        }
    }
}

/// Guard that requires a shared-state key to be present and, optionally,
/// its value to match a pattern
#[derive(Debug, Clone)]
pub struct StateCondition {
    pub key: String,
    pub pattern: Option<ConditionPattern>,
}

impl StateCondition {
    pub fn exists(key: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            pattern: None,
        }
    }

    pub fn matching(key: impl Into<String>, pattern: ConditionPattern) -> Self {
        Self {
            key: key.into(),
            pattern: Some(pattern),
        }
    }

    /// Null values count as absent
    pub fn evaluate(&self, state: &StateSnapshot) -> bool {
        match state.get(&self.key) {
            None | Some(Value::Null) => false,
            Some(value) => self
                .pattern
                .as_ref()
                .map_or(true, |pattern| pattern.matches(&value_text(value))),
        }
    }
}
