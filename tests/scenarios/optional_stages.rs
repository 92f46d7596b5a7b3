//! Test: Optional stages - failures are recorded but do not stop the run

use crate::helpers::*;
use serde_json::json;
use stagehand::{PipelineDefinition, PipelineError, RunOptions, RunStatus};

#[tokio::test]
async fn test_optional_failure_is_recorded_and_skipped() {
    let mut harness = Harness::new();
    let writer = MockExecutor::always("script").shared();
    let thumbnails = MockExecutor::failing("renderer offline").shared();
    let uploader = MockExecutor::always("uploaded").shared();
    harness
        .executor("writer", writer.clone())
        .executor("renderer", thumbnails.clone())
        .executor("uploader", uploader.clone());

    harness
        .orchestrator
        .register_pipeline(
            PipelineDefinition::new("video")
                .with_stage(stage("script", "writer"))
                .with_stage(stage("thumbnail", "renderer").optional())
                .with_stage(stage("publish", "uploader")),
        )
        .unwrap();

    let result = harness
        .orchestrator
        .execute_pipeline("video", json!({}), RunOptions::new())
        .await
        .unwrap();

    assert_status(&result, RunStatus::Completed);
    assert_eq!(result.stats.errors.len(), 1);
    assert_eq!(result.stats.errors[0].stage, "thumbnail");
    assert!(result.stats.errors[0].error.contains("renderer offline"));

    // The failed stage never wrote its key; the next stage ran anyway
    assert!(!result.results.contains_key("thumbnail"));
    assert_eq!(text(&result, "publish").as_deref(), Some("uploaded"));
    assert_eq!(uploader.prompts(), vec![r#"publish sees ["input", "script"]"#.to_string()]);

    // Checkpoints only for the stages that completed
    assert_eq!(harness.sink.indexes(&result.pipeline_id), vec![0, 2]);
}

#[tokio::test]
async fn test_optional_stage_retries_before_giving_up() {
    let mut harness = Harness::new();
    let renderer = MockExecutor::failing("still broken").shared();
    harness.executor("renderer", renderer.clone());
    harness
        .orchestrator
        .register_pipeline(
            PipelineDefinition::new("video")
                .with_stage(stage("thumbnail", "renderer").optional().with_retries(2)),
        )
        .unwrap();

    let result = harness
        .orchestrator
        .execute_pipeline("video", json!({}), RunOptions::new())
        .await
        .unwrap();

    assert_status(&result, RunStatus::Completed);
    assert_eq!(renderer.calls(), 3);
    assert_eq!(result.stats.errors.len(), 1);
}

#[tokio::test]
async fn test_required_failure_checkpoints_previous_stage() {
    let mut harness = Harness::new();
    harness
        .executor("writer", MockExecutor::always("script").shared())
        .executor("tts", MockExecutor::failing("tts down").shared());
    harness
        .orchestrator
        .register_pipeline(
            PipelineDefinition::new("video")
                .with_stage(stage("script", "writer"))
                .with_stage(stage("voice", "tts")),
        )
        .unwrap();

    let err = harness
        .orchestrator
        .execute_pipeline("video", json!({}), RunOptions::new())
        .await
        .unwrap_err();

    let pipeline_id = err.pipeline_id().unwrap().to_string();
    assert!(matches!(err, PipelineError::StageFailed { ref stage, .. } if stage == "voice"));

    // Stage 0 checkpointed on success, then again as the resume point
    assert_eq!(harness.sink.indexes(&pipeline_id), vec![0, 0]);
    let stored = harness.sink.stored(&pipeline_id).await.unwrap();
    assert_eq!(stored.stage_name, "script");
}

#[tokio::test]
async fn test_unknown_pipeline_and_executor() {
    let mut harness = Harness::new();
    harness
        .orchestrator
        .register_pipeline(PipelineDefinition::new("video").with_stage(stage("script", "writer")))
        .unwrap();

    let err = harness
        .orchestrator
        .execute_pipeline("podcast", json!({}), RunOptions::new())
        .await
        .unwrap_err();
    assert!(matches!(err, PipelineError::UnknownPipeline(ref name) if name == "podcast"));

    let err = harness
        .orchestrator
        .execute_pipeline("video", json!({}), RunOptions::new())
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        PipelineError::UnknownExecutor { ref executor_id, .. } if executor_id == "writer"
    ));
    // Nothing ran, so nothing was written
    assert!(harness.state.namespaces().await.is_empty());
}

#[tokio::test]
async fn test_invalid_definition_is_rejected() {
    let mut harness = Harness::new();
    let err = harness
        .orchestrator
        .register_pipeline(
            PipelineDefinition::new("video")
                .with_stage(stage("script", "writer"))
                .with_stage(stage("script", "writer")),
        )
        .unwrap_err();

    assert!(matches!(err, PipelineError::InvalidDefinition(_)));
    assert!(harness.orchestrator.pipelines().is_empty());
}
