//! Test utilities for stagehand scenarios

#![allow(dead_code)]

use async_trait::async_trait;
use serde_json::Value;
use stagehand::core::stage::render_template;
use stagehand::persistence::{Checkpoint, CheckpointSummary, SinkError};
use stagehand::{
    CheckpointSink, CheckpointStore, EngineConfig, EventBus, Executor, ExecutorError,
    ExecutorResponse, InMemoryCheckpointSink, Orchestrator, RunResult, RunStatus,
    SharedStateStore, Stage, StageContext, TaskSpec, TokenUsage,
};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// One scripted executor reply
#[derive(Debug, Clone)]
pub enum Reply {
    Ok(String),
    Fail(String),
    Panic,
}

pub fn ok(content: &str) -> Reply {
    Reply::Ok(content.to_string())
}

pub fn fail(message: &str) -> Reply {
    Reply::Fail(message.to_string())
}

/// Mock executor that plays back scripted replies.
///
/// Once the script is exhausted the fallback reply (if any) is used for every
/// further call.
pub struct MockExecutor {
    script: Mutex<VecDeque<Reply>>,
    fallback: Option<Reply>,
    cost: f64,
    usage: Option<TokenUsage>,
    delay: Option<Duration>,
    calls: AtomicUsize,
    prompts: Mutex<Vec<String>>,
}

impl MockExecutor {
    pub fn scripted(replies: Vec<Reply>) -> Self {
        Self {
            script: Mutex::new(replies.into()),
            fallback: None,
            cost: 0.0,
            usage: None,
            delay: None,
            calls: AtomicUsize::new(0),
            prompts: Mutex::new(Vec::new()),
        }
    }

    /// Always succeed with `content`
    pub fn always(content: &str) -> Self {
        Self::scripted(Vec::new()).otherwise(ok(content))
    }

    /// Always fail with `message`
    pub fn failing(message: &str) -> Self {
        Self::scripted(Vec::new()).otherwise(fail(message))
    }

    pub fn otherwise(mut self, reply: Reply) -> Self {
        self.fallback = Some(reply);
        self
    }

    /// Cost reported with every successful reply
    pub fn with_cost(mut self, cost: f64) -> Self {
        self.cost = cost;
        self
    }

    /// Token usage reported with every successful reply
    pub fn with_usage(mut self, prompt_tokens: u32, completion_tokens: u32) -> Self {
        self.usage = Some(TokenUsage {
            prompt_tokens,
            completion_tokens,
            total_tokens: prompt_tokens + completion_tokens,
        });
        self
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn shared(self) -> Arc<Self> {
        Arc::new(self)
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn prompts(&self) -> Vec<String> {
        self.prompts.lock().unwrap().clone()
    }
}

#[async_trait]
impl Executor for MockExecutor {
    async fn execute(
        &self,
        task: &TaskSpec,
        _ctx: &StageContext,
    ) -> Result<ExecutorResponse, ExecutorError> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst);
        self.prompts.lock().unwrap().push(task.prompt.clone());

        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }

        let reply = self
            .script
            .lock()
            .unwrap()
            .pop_front()
            .or_else(|| self.fallback.clone());

        match reply {
            Some(Reply::Ok(content)) => {
                let response = ExecutorResponse::new(content).with_cost(self.cost);
                Ok(match self.usage {
                    Some(usage) => response.with_usage(usage),
                    None => response,
                })
            }
            Some(Reply::Fail(message)) => Err(ExecutorError::failed(message)),
            Some(Reply::Panic) => panic!("mock executor panicked on call {}", call + 1),
            None => Err(ExecutorError::Internal(format!(
                "MockExecutor: no reply for call {}",
                call + 1
            ))),
        }
    }
}

/// Checkpoint sink that remembers every write
pub struct RecordingSink {
    inner: InMemoryCheckpointSink,
    writes: Mutex<Vec<(String, usize)>>,
}

impl RecordingSink {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            inner: InMemoryCheckpointSink::named("recording"),
            writes: Mutex::new(Vec::new()),
        })
    }

    /// Stage indexes written for `namespace`, in order
    pub fn indexes(&self, namespace: &str) -> Vec<usize> {
        self.writes
            .lock()
            .unwrap()
            .iter()
            .filter(|(ns, _)| ns == namespace)
            .map(|(_, index)| *index)
            .collect()
    }

    pub async fn stored(&self, namespace: &str) -> Option<Checkpoint> {
        self.inner.read(namespace).await.unwrap()
    }
}

#[async_trait]
impl CheckpointSink for RecordingSink {
    fn name(&self) -> &str {
        self.inner.name()
    }

    async fn write(&self, checkpoint: &Checkpoint) -> Result<(), SinkError> {
        self.writes
            .lock()
            .unwrap()
            .push((checkpoint.namespace.clone(), checkpoint.stage_index));
        self.inner.write(checkpoint).await
    }

    async fn read(&self, namespace: &str) -> Result<Option<Checkpoint>, SinkError> {
        self.inner.read(namespace).await
    }

    async fn list(&self) -> Result<Vec<CheckpointSummary>, SinkError> {
        self.inner.list().await
    }
}

/// An orchestrator wired to in-memory stores
pub struct Harness {
    pub orchestrator: Orchestrator,
    pub state: Arc<SharedStateStore>,
    pub bus: Arc<EventBus>,
    pub sink: Arc<RecordingSink>,
}

impl Harness {
    pub fn new() -> Self {
        Self::with_sink(RecordingSink::new(), EngineConfig::default())
    }

    pub fn with_config(config: EngineConfig) -> Self {
        Self::with_sink(RecordingSink::new(), config)
    }

    /// Fresh process sharing the durable sink of an earlier one
    pub fn restarted(previous: &Harness) -> Self {
        Self::with_sink(Arc::clone(&previous.sink), EngineConfig::default())
    }

    pub fn with_sink(sink: Arc<RecordingSink>, config: EngineConfig) -> Self {
        let state = Arc::new(SharedStateStore::new());
        let bus = Arc::new(EventBus::new());
        let checkpoints = Arc::new(CheckpointStore::new(Arc::clone(&state)).with_sink(sink.clone()));
        let orchestrator = Orchestrator::new(Arc::clone(&state), checkpoints, Arc::clone(&bus), config);

        Self {
            orchestrator,
            state,
            bus,
            sink,
        }
    }

    pub fn executor(&mut self, id: &str, executor: Arc<MockExecutor>) -> &mut Self {
        self.orchestrator.register_executor(id, executor);
        self
    }
}

/// A stage whose prompt names itself and lists the keys it can see
pub fn stage(name: &str, executor_id: &str) -> Stage {
    let label = name.to_string();
    Stage::new(name, executor_id, name, move |state, _input| {
        let mut keys: Vec<&String> = state.keys().collect();
        keys.sort();
        TaskSpec::new(format!("{} sees {:?}", label, keys))
    })
}

/// A stage driven by a `{{ key }}` template
pub fn template_stage(name: &str, executor_id: &str, template: &str) -> Stage {
    let template = template.to_string();
    Stage::new(name, executor_id, name, move |state, input| {
        TaskSpec::new(render_template(&template, state, input))
    })
}

pub fn text(result: &RunResult, key: &str) -> Option<String> {
    result
        .results
        .get(key)
        .and_then(Value::as_str)
        .map(str::to_string)
}

pub fn assert_status(result: &RunResult, status: RunStatus) {
    assert_eq!(
        result.stats.status, status,
        "unexpected status; errors: {:?}",
        result.stats.errors
    );
}
