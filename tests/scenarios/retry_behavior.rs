//! Test: Retry Behavior - bounded per-invocation retries

use crate::helpers::*;
use serde_json::json;
use stagehand::{
    ExecutorError, PipelineConfig, PipelineDefinition, PipelineError, RunOptions, RunStatus,
};

/// A stage that fails twice and has two retries succeeds on the third call
#[tokio::test]
async fn test_retry_until_success() {
    let mut harness = Harness::new();
    let writer = MockExecutor::scripted(vec![fail("rate limited"), fail("rate limited"), ok("script")])
        .shared();
    harness.executor("writer", writer.clone());
    harness
        .orchestrator
        .register_pipeline(PipelineDefinition::new("video").with_stage(stage("script", "writer").with_retries(2)))
        .unwrap();

    let result = harness
        .orchestrator
        .execute_pipeline("video", json!({}), RunOptions::new())
        .await
        .unwrap();

    assert_status(&result, RunStatus::Completed);
    assert_eq!(writer.calls(), 3);
    assert_eq!(text(&result, "script").as_deref(), Some("script"));
    assert_eq!(result.stats.stage_results["script"].attempts, 3);
    // Retried failures are not recorded as run errors
    assert!(result.stats.errors.is_empty());
}

/// Retries are bounded at N + 1 calls, then a required stage fails the run
#[tokio::test]
async fn test_retry_exhaustion_fails_required_stage() {
    let mut harness = Harness::new();
    let writer = MockExecutor::failing("model offline").shared();
    harness.executor("writer", writer.clone());
    harness
        .orchestrator
        .register_pipeline(PipelineDefinition::new("video").with_stage(stage("script", "writer").with_retries(3)))
        .unwrap();

    let err = harness
        .orchestrator
        .execute_pipeline("video", json!({}), RunOptions::new())
        .await
        .unwrap_err();

    assert_eq!(writer.calls(), 4);
    match err {
        PipelineError::StageFailed {
            pipeline_id,
            stage,
            source,
            summary,
        } => {
            assert!(pipeline_id.starts_with("video_"));
            assert_eq!(stage, "script");
            assert_eq!(source, ExecutorError::failed("model offline"));
            assert_eq!(summary.status, RunStatus::Failed);
            assert_eq!(summary.errors.len(), 1);
        }
        other => panic!("expected StageFailed, got {:?}", other),
    }
}

/// Retry budget is per invocation: a second run gets the full budget again
#[tokio::test]
async fn test_retries_reset_between_runs() {
    let mut harness = Harness::new();
    let writer = MockExecutor::scripted(vec![fail("1"), ok("a"), fail("2"), ok("b")]).shared();
    harness.executor("writer", writer.clone());
    harness
        .orchestrator
        .register_pipeline(PipelineDefinition::new("video").with_stage(stage("script", "writer").with_retries(1)))
        .unwrap();

    for expected in ["a", "b"] {
        let result = harness
            .orchestrator
            .execute_pipeline("video", json!({}), RunOptions::new())
            .await
            .unwrap();
        assert_eq!(text(&result, "script").as_deref(), Some(expected));
    }
    assert_eq!(writer.calls(), 4);
}

/// The task is rebuilt for every attempt
#[tokio::test]
async fn test_task_rebuilt_per_attempt() {
    let mut harness = Harness::new();
    let writer = MockExecutor::scripted(vec![fail("once"), ok("done")]).shared();
    harness.executor("writer", writer.clone());
    harness
        .orchestrator
        .register_pipeline(
            PipelineDefinition::new("video")
                .with_stage(template_stage("script", "writer", "Write about {{ input.topic }}").with_retries(1)),
        )
        .unwrap();

    harness
        .orchestrator
        .execute_pipeline("video", json!({"topic": "tides"}), RunOptions::new())
        .await
        .unwrap();

    assert_eq!(
        writer.prompts(),
        vec!["Write about tides".to_string(), "Write about tides".to_string()]
    );
}

/// The largest retry count a pipeline file accepts still runs normally
#[cfg(target_pointer_width = "64")]
#[tokio::test]
async fn test_max_retries_from_yaml() {
    let yaml = r#"
name: video
stages:
  - name: script
    executor: writer
    prompt: "Write about {{ input.topic }}"
    retries: 18446744073709551615
"#;
    let config = PipelineConfig::from_yaml(yaml).unwrap();
    config.validate().unwrap();

    let mut harness = Harness::new();
    let writer = MockExecutor::scripted(vec![fail("rate limited"), ok("script")]).shared();
    harness.executor("writer", writer.clone());
    harness
        .orchestrator
        .register_pipeline(config.to_definition().unwrap())
        .unwrap();

    let result = harness
        .orchestrator
        .execute_pipeline("video", json!({"topic": "tides"}), RunOptions::new())
        .await
        .unwrap();

    assert_status(&result, RunStatus::Completed);
    assert_eq!(writer.calls(), 2);
    assert_eq!(result.stats.stage_results["script"].attempts, 2);
}
