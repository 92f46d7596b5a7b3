//! Stage domain model

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

/// Snapshot of a namespace in shared state (key -> value)
pub type StateSnapshot = HashMap<String, Value>;

/// Builds the task for a stage from the current state and the run input
pub type TaskBuilder = Arc<dyn Fn(&StateSnapshot, &Value) -> TaskSpec + Send + Sync>;

/// Guard deciding whether a stage runs at all
pub type StageGuard = Arc<dyn Fn(&StateSnapshot) -> bool + Send + Sync>;

/// Derives an extra value from a stage's raw output
pub type PostProcessor = Arc<dyn Fn(&str, &StateSnapshot) -> Option<Value> + Send + Sync>;

/// The unit of work handed to an executor
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TaskSpec {
    /// Prompt or instruction text
    pub prompt: String,

    /// Free-form structured data accompanying the prompt
    #[serde(default)]
    pub metadata: Map<String, Value>,
}

impl TaskSpec {
    pub fn new(prompt: impl Into<String>) -> Self {
        Self {
            prompt: prompt.into(),
            metadata: Map::new(),
        }
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }
}

/// A single stage in a pipeline
#[derive(Clone)]
pub struct Stage {
    /// Stage name, unique within a pipeline
    pub name: String,

    /// Executor the stage is bound to
    pub executor_id: String,

    /// Shared-state key the output is stored under
    pub output_key: String,

    /// Whether a failure aborts the run
    pub required: bool,

    /// Whether the stage may run concurrently with adjacent parallel stages
    pub parallel: bool,

    /// Additional attempts after the first failure
    pub retries: usize,

    /// Response format hint passed to the executor
    pub response_format: String,

    /// Per-attempt timeout
    pub timeout: Option<Duration>,

    condition: Option<StageGuard>,
    task: TaskBuilder,
    post_process: Option<PostProcessor>,
}

impl Stage {
    /// Create a required, sequential stage with no retries
    pub fn new<F>(
        name: impl Into<String>,
        executor_id: impl Into<String>,
        output_key: impl Into<String>,
        task: F,
    ) -> Self
    where
        F: Fn(&StateSnapshot, &Value) -> TaskSpec + Send + Sync + 'static,
    {
        Self {
            name: name.into(),
            executor_id: executor_id.into(),
            output_key: output_key.into(),
            required: true,
            parallel: false,
            retries: 0,
            response_format: "text".to_string(),
            timeout: None,
            condition: None,
            task: Arc::new(task),
            post_process: None,
        }
    }

    /// Failures are recorded but do not abort the run
    pub fn optional(mut self) -> Self {
        self.required = false;
        self
    }

    pub fn with_required(mut self, required: bool) -> Self {
        self.required = required;
        self
    }

    pub fn parallel(mut self) -> Self {
        self.parallel = true;
        self
    }

    pub fn with_parallel(mut self, parallel: bool) -> Self {
        self.parallel = parallel;
        self
    }

    pub fn with_retries(mut self, retries: usize) -> Self {
        self.retries = retries;
        self
    }

    pub fn with_response_format(mut self, format: impl Into<String>) -> Self {
        self.response_format = format.into();
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Only run the stage when `guard` holds for the current state
    pub fn when<F>(mut self, guard: F) -> Self
    where
        F: Fn(&StateSnapshot) -> bool + Send + Sync + 'static,
    {
        self.condition = Some(Arc::new(guard));
        self
    }

    pub fn with_post_process<F>(mut self, post_process: F) -> Self
    where
        F: Fn(&str, &StateSnapshot) -> Option<Value> + Send + Sync + 'static,
    {
        self.post_process = Some(Arc::new(post_process));
        self
    }

    /// Build the task for this stage
    pub fn build_task(&self, state: &StateSnapshot, input: &Value) -> TaskSpec {
        (self.task)(state, input)
    }

    /// Evaluate the guard (stages without one always run)
    pub fn should_run(&self, state: &StateSnapshot) -> bool {
        self.condition.as_ref().map_or(true, |guard| guard(state))
    }

    pub fn has_condition(&self) -> bool {
        self.condition.is_some()
    }

    /// Run the post-processing hook, if any
    pub fn post_process(&self, output: &str, state: &StateSnapshot) -> Option<Value> {
        self.post_process
            .as_ref()
            .and_then(|hook| hook(output, state))
    }

    /// Key the post-processed value is stored under
    pub fn processed_key(&self) -> String {
        format!("{}_processed", self.output_key)
    }
}

impl fmt::Debug for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Stage")
            .field("name", &self.name)
            .field("executor_id", &self.executor_id)
            .field("output_key", &self.output_key)
            .field("required", &self.required)
            .field("parallel", &self.parallel)
            .field("retries", &self.retries)
            .field("response_format", &self.response_format)
            .field("timeout", &self.timeout)
            .field("has_condition", &self.condition.is_some())
            .field("has_post_process", &self.post_process.is_some())
            .finish()
    }
}

/// Render a template with `{{ key }}` placeholders.
///
/// The template is scanned once, left to right. A placeholder names a
/// shared-state key, or a run input field via `{{ input.<field> }}`; state
/// keys win when both exist. Strings are inserted as-is, other values as
/// JSON. Substituted text is never scanned again, and unknown placeholders
/// are left untouched.
pub fn render_template(template: &str, state: &StateSnapshot, input: &Value) -> String {
    let mut rendered = String::with_capacity(template.len());
    let mut rest = template;

    while let Some(open) = rest.find("{{") {
        let body_start = open + 2;
        let Some(len) = rest[body_start..].find("}}") else {
            break;
        };
        let body = &rest[body_start..body_start + len];

        // `{{ a {{ b }}`: only the innermost opener starts a placeholder
        if let Some(nested) = body.rfind("{{") {
            rendered.push_str(&rest[..body_start + nested]);
            rest = &rest[body_start + nested..];
            continue;
        }

        let end = body_start + len + 2;
        rendered.push_str(&rest[..open]);
        match lookup_placeholder(body.trim(), state, input) {
            Some(value) => rendered.push_str(&value_text(value)),
            None => rendered.push_str(&rest[open..end]),
        }
        rest = &rest[end..];
    }

    rendered.push_str(rest);
    rendered
}

fn lookup_placeholder<'a>(
    name: &str,
    state: &'a StateSnapshot,
    input: &'a Value,
) -> Option<&'a Value> {
    state
        .get(name)
        .or_else(|| name.strip_prefix("input.").and_then(|field| input.get(field)))
}

/// Textual form of a state value (strings unquoted)
pub fn value_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}
