//! Test: Conditions, templates and post-processing

use crate::helpers::*;
use serde_json::json;
use stagehand::{PipelineConfig, PipelineDefinition, RunOptions, RunStatus};

#[tokio::test]
async fn test_false_guard_skips_stage_without_checkpoint() {
    let mut harness = Harness::new();
    let uploader = MockExecutor::always("uploaded").shared();
    harness
        .executor("writer", MockExecutor::always("script").shared())
        .executor("uploader", uploader.clone())
        .executor("notifier", MockExecutor::always("sent").shared());
    harness
        .orchestrator
        .register_pipeline(
            PipelineDefinition::new("video")
                .with_stage(stage("script", "writer"))
                .with_stage(stage("publish", "uploader").when(|state| state.contains_key("video_file")))
                .with_stage(stage("notify", "notifier")),
        )
        .unwrap();

    let result = harness
        .orchestrator
        .execute_pipeline("video", json!({}), RunOptions::new())
        .await
        .unwrap();

    assert_status(&result, RunStatus::Completed);
    assert_eq!(uploader.calls(), 0);
    assert!(!result.stats.stage_results.contains_key("publish"));
    assert!(result.stats.errors.is_empty());
    assert_eq!(harness.sink.indexes(&result.pipeline_id), vec![0, 2]);
}

#[tokio::test]
async fn test_guard_sees_earlier_outputs() {
    let mut harness = Harness::new();
    let uploader = MockExecutor::always("uploaded").shared();
    harness
        .executor("renderer", MockExecutor::always("video.mp4").shared())
        .executor("uploader", uploader.clone());
    harness
        .orchestrator
        .register_pipeline(
            PipelineDefinition::new("video")
                .with_stage(stage("video_file", "renderer"))
                .with_stage(stage("publish", "uploader").when(|state| state.contains_key("video_file"))),
        )
        .unwrap();

    let result = harness
        .orchestrator
        .execute_pipeline("video", json!({}), RunOptions::new())
        .await
        .unwrap();

    assert_eq!(uploader.calls(), 1);
    assert_eq!(text(&result, "publish").as_deref(), Some("uploaded"));
}

#[tokio::test]
async fn test_post_process_stores_processed_key() {
    let mut harness = Harness::new();
    harness.executor("writer", MockExecutor::always("one two three").shared());
    harness
        .orchestrator
        .register_pipeline(
            PipelineDefinition::new("video").with_stage(stage("script", "writer").with_post_process(
                |output, state| {
                    // The raw output is already in state when the hook runs
                    assert_eq!(state.get("script"), Some(&json!(output)));
                    Some(json!({ "words": output.split_whitespace().count() }))
                },
            )),
        )
        .unwrap();

    let result = harness
        .orchestrator
        .execute_pipeline("video", json!({}), RunOptions::new())
        .await
        .unwrap();

    assert_eq!(text(&result, "script").as_deref(), Some("one two three"));
    assert_eq!(result.results["script_processed"], json!({"words": 3}));
}

#[tokio::test]
async fn test_post_process_returning_none_stores_nothing() {
    let mut harness = Harness::new();
    harness.executor("writer", MockExecutor::always("plain").shared());
    harness
        .orchestrator
        .register_pipeline(
            PipelineDefinition::new("video")
                .with_stage(stage("script", "writer").with_post_process(|_, _| None)),
        )
        .unwrap();

    let result = harness
        .orchestrator
        .execute_pipeline("video", json!({}), RunOptions::new())
        .await
        .unwrap();

    assert!(!result.results.contains_key("script_processed"));
}

#[tokio::test]
async fn test_yaml_pipeline_with_templates_and_conditions() {
    let yaml = r#"
name: video
stages:
  - name: research
    executor: researcher
    prompt: "Research {{ input.topic }}"
  - name: review
    executor: reviewer
    prompt: "Review {{ research }}"
  - name: script
    executor: writer
    prompt: "Write from {{ research }}"
    when:
      key: review
      pattern: "^APPROVED"
      use_regex: true
  - name: rewrite
    executor: writer
    output_key: rewrite_notes
    prompt: "Start over on {{ input.topic }}"
    required: false
    when:
      key: review
      pattern: "REJECTED"
"#;
    let config = PipelineConfig::from_yaml(yaml).unwrap();

    let mut harness = Harness::new();
    let researcher = MockExecutor::always("three facts").shared();
    let reviewer = MockExecutor::always("APPROVED with notes").shared();
    let writer = MockExecutor::always("final script").shared();
    harness
        .executor("researcher", researcher.clone())
        .executor("reviewer", reviewer.clone())
        .executor("writer", writer.clone());
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
    assert_eq!(researcher.prompts(), vec!["Research tides".to_string()]);
    assert_eq!(reviewer.prompts(), vec!["Review three facts".to_string()]);
    assert_eq!(writer.prompts(), vec!["Write from three facts".to_string()]);
    assert!(!result.results.contains_key("rewrite_notes"));
}

#[tokio::test]
async fn test_template_passes_placeholder_text_in_outputs_through() {
    let mut harness = Harness::new();
    let writer = MockExecutor::always("script").shared();
    harness
        .executor(
            "researcher",
            MockExecutor::always("notes on {{ input.topic }} for {{ script }}").shared(),
        )
        .executor("writer", writer.clone());
    harness
        .orchestrator
        .register_pipeline(
            PipelineDefinition::new("video")
                .with_stage(stage("research", "researcher"))
                .with_stage(template_stage(
                    "script",
                    "writer",
                    "Write about {{ input.topic }} from {{ research }}",
                )),
        )
        .unwrap();

    let result = harness
        .orchestrator
        .execute_pipeline("video", json!({"topic": "tides"}), RunOptions::new())
        .await
        .unwrap();

    assert_status(&result, RunStatus::Completed);
    assert_eq!(
        writer.prompts(),
        vec!["Write about tides from notes on {{ input.topic }} for {{ script }}".to_string()]
    );
    assert_eq!(
        text(&result, "research").as_deref(),
        Some("notes on {{ input.topic }} for {{ script }}")
    );
}
