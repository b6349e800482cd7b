//! Synthesis stage behavior.

use std::fs;

use tokio_util::sync::CancellationToken;

use quorum::error::ErrorCategory;
use quorum::exit::{self, AggregateStatus};
use quorum::outcome::Outcome;

use crate::support::{
    orchestrator, test_config, CaptureAudit, MockBehavior, MockProvider, MockSource,
};

#[tokio::test]
async fn synthesis_happy_path_writes_all_three_artifacts() {
    let dir = tempfile::tempdir().expect("tempdir");
    let synth = MockProvider::new(MockBehavior::Reply("C"));
    let source = MockSource::new()
        .with_model("m1", MockProvider::new(MockBehavior::Reply("A")))
        .with_model("m2", MockProvider::new(MockBehavior::Reply("B")))
        .with_model("s", synth.clone());
    let audit = CaptureAudit::new();

    let mut config = test_config(&["m1", "m2"], dir.path());
    config.synthesis_model = Some("s".to_owned());
    config.instructions = "Compare the answers.".to_owned();
    let orch = orchestrator(config, source, audit.clone());
    let summary = orch
        .run("Compare the answers.", "run-1", &CancellationToken::new())
        .await
        .expect("run succeeds");

    assert_eq!(summary.aggregate, AggregateStatus::AllSuccess);
    let run_dir = summary.run_dir.clone().expect("run dir created");
    assert_eq!(fs::read_to_string(run_dir.join("m1.md")).expect("m1"), "A");
    assert_eq!(fs::read_to_string(run_dir.join("m2.md")).expect("m2"), "B");
    assert_eq!(
        fs::read_to_string(run_dir.join("s-synthesis.md")).expect("synthesis"),
        "C"
    );

    // The synthesis prompt labels every successful primary in input order.
    let prompts = synth.recorded_prompts();
    assert_eq!(prompts.len(), 1, "synthesis is attempted exactly once");
    let prompt = &prompts[0];
    assert!(prompt.starts_with("Compare the answers."));
    let a = prompt.find("### m1\nA").expect("m1 block");
    let b = prompt.find("### m2\nB").expect("m2 block");
    assert!(a < b);

    assert!(audit.operations().contains(&"synthesis".to_owned()));
    assert_eq!(
        exit::exit_code(summary.aggregate, false, &summary.failure_categories()),
        0
    );
}

#[tokio::test]
async fn synthesis_only_sees_successful_primaries() {
    let dir = tempfile::tempdir().expect("tempdir");
    let synth = MockProvider::new(MockBehavior::Reply("C"));
    let source = MockSource::new()
        .with_model("m1", MockProvider::new(MockBehavior::Fail(ErrorCategory::Server)))
        .with_model("m2", MockProvider::new(MockBehavior::Reply("B")))
        .with_model("s", synth.clone());
    let audit = CaptureAudit::new();

    let mut config = test_config(&["m1", "m2"], dir.path());
    config.synthesis_model = Some("s".to_owned());
    let orch = orchestrator(config, source, audit);
    let summary = orch
        .run("prompt", "run-1", &CancellationToken::new())
        .await
        .expect("run completes");

    assert_eq!(summary.aggregate, AggregateStatus::PartialSuccess);
    let prompt = synth.recorded_prompts().remove(0);
    assert!(prompt.contains("### m2\nB"));
    assert!(!prompt.contains("### m1"), "failed primaries are excluded");
}

#[tokio::test]
async fn synthesis_is_skipped_when_every_primary_fails() {
    let dir = tempfile::tempdir().expect("tempdir");
    let synth = MockProvider::new(MockBehavior::Reply("never"));
    let source = MockSource::new()
        .with_model("m1", MockProvider::new(MockBehavior::Fail(ErrorCategory::Auth)))
        .with_model("s", synth.clone());
    let audit = CaptureAudit::new();

    let mut config = test_config(&["m1"], dir.path());
    config.synthesis_model = Some("s".to_owned());
    let orch = orchestrator(config, source, audit.clone());
    let summary = orch
        .run("prompt", "run-1", &CancellationToken::new())
        .await
        .expect("run completes");

    assert!(summary.synthesis.is_none());
    assert_eq!(synth.call_count(), 0);
    assert!(!audit.operations().contains(&"synthesis".to_owned()));
}

#[tokio::test]
async fn synthesis_failure_caps_the_aggregate_at_partial() {
    let dir = tempfile::tempdir().expect("tempdir");
    let source = MockSource::new()
        .with_model("m1", MockProvider::new(MockBehavior::Reply("A")))
        .with_model("m2", MockProvider::new(MockBehavior::Reply("B")))
        .with_model("s", MockProvider::new(MockBehavior::Fail(ErrorCategory::Server)));
    let audit = CaptureAudit::new();

    let mut config = test_config(&["m1", "m2"], dir.path());
    config.synthesis_model = Some("s".to_owned());
    let orch = orchestrator(config, source, audit);
    let summary = orch
        .run("prompt", "run-1", &CancellationToken::new())
        .await
        .expect("run completes");

    assert_eq!(summary.aggregate, AggregateStatus::PartialSuccess);
    assert!(summary.results.all_succeeded(), "primaries stay valid");
    match summary.synthesis.as_ref().expect("synthesis attempted") {
        Outcome::Failure(err) => assert_eq!(err.category, ErrorCategory::Server),
        other => panic!("expected a synthesis failure, got {other:?}"),
    }

    assert_eq!(
        exit::exit_code(summary.aggregate, false, &summary.failure_categories()),
        5
    );
    assert_eq!(
        exit::exit_code(summary.aggregate, true, &summary.failure_categories()),
        0,
        "the tolerant flag forgives a synthesis failure"
    );
}

#[tokio::test]
async fn synthesis_reuses_a_primary_model_under_a_distinct_name() {
    let dir = tempfile::tempdir().expect("tempdir");
    let shared = MockProvider::new(MockBehavior::Reply("same"));
    let source = MockSource::new().with_model("m1", shared.clone());
    let audit = CaptureAudit::new();

    let mut config = test_config(&["m1"], dir.path());
    config.synthesis_model = Some("m1".to_owned());
    let orch = orchestrator(config, source, audit);
    let summary = orch
        .run("prompt", "run-1", &CancellationToken::new())
        .await
        .expect("run completes");

    let run_dir = summary.run_dir.clone().expect("run dir created");
    assert!(run_dir.join("m1.md").exists());
    assert!(
        run_dir.join("m1-synthesis.md").exists(),
        "the suffix keeps the synthesis artifact distinct"
    );
    assert_eq!(shared.call_count(), 2);
}
