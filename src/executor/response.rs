//! Executor response types

use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;

/// Error types for executor invocations
#[derive(Debug, Clone, Error, PartialEq)]
pub enum ExecutorError {
    #[error("{0}")]
    Failed(String),

    #[error("Timeout after {0:?}")]
    Timeout(Duration),

    #[error("Cancelled")]
    Cancelled,

    #[error("Internal error: {0}")]
    Internal(String),
}

impl ExecutorError {
    /// Convenience constructor for plain failures
    pub fn failed(message: impl Into<String>) -> Self {
        ExecutorError::Failed(message.into())
    }
}

/// Response from an executor
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutorResponse {
    /// The response content, stored verbatim in shared state
    pub content: String,

    /// Spend attributed to this call, in the caller's currency unit
    #[serde(default)]
    pub cost: f64,

    /// Token usage information (if available)
    #[serde(default)]
    pub usage: Option<TokenUsage>,
}

impl ExecutorResponse {
    /// Create a response with no cost attached
    pub fn new(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            cost: 0.0,
            usage: None,
        }
    }

    pub fn with_cost(mut self, cost: f64) -> Self {
        self.cost = cost;
        self
    }

    pub fn with_usage(mut self, usage: TokenUsage) -> Self {
        self.usage = Some(usage);
        self
    }
}

/// Token usage information
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenUsage {
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
    pub total_tokens: u32,
}
