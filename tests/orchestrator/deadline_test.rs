//! Deadline and cancellation behavior.

use std::time::Duration;

use tokio_util::sync::CancellationToken;

use quorum::error::ErrorCategory;
use quorum::exit::{self, AggregateStatus};
use quorum::outcome::Outcome;

use crate::support::{
    orchestrator, test_config, CaptureAudit, MockBehavior, MockProvider, MockSource,
};

#[tokio::test(start_paused = true)]
async fn deadline_cancels_unfinished_jobs_and_keeps_finished_ones() {
    let dir = tempfile::tempdir().expect("tempdir");
    let source = MockSource::new()
        .with_model("m1", MockProvider::new(MockBehavior::Reply("done")))
        .with_model("m2", MockProvider::new(MockBehavior::Hang));
    let audit = CaptureAudit::new();

    let mut config = test_config(&["m1", "m2"], dir.path());
    config.timeout = Duration::from_secs(5);
    let orch = orchestrator(config, source, audit);
    let summary = orch
        .run("prompt", "run-1", &CancellationToken::new())
        .await
        .expect("run completes at the deadline");

    match summary.results.get("m1").expect("m1 outcome") {
        Outcome::Success { content, .. } => assert_eq!(content, "done"),
        other => panic!("finished outcome must be preserved, got {other:?}"),
    }
    match summary.results.get("m2").expect("m2 outcome") {
        Outcome::Failure(err) => assert_eq!(err.category, ErrorCategory::Cancelled),
        other => panic!("unfinished job must record Cancelled, got {other:?}"),
    }

    assert_eq!(summary.aggregate, AggregateStatus::PartialSuccess);
    assert_eq!(
        exit::exit_code(summary.aggregate, false, &summary.failure_categories()),
        10
    );
}

#[tokio::test(start_paused = true)]
async fn external_cancellation_fails_every_hanging_job() {
    let dir = tempfile::tempdir().expect("tempdir");
    let source = MockSource::new()
        .with_model("m1", MockProvider::new(MockBehavior::Hang))
        .with_model("m2", MockProvider::new(MockBehavior::Hang));
    let audit = CaptureAudit::new();

    let cancel = CancellationToken::new();
    {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(1)).await;
            cancel.cancel();
        });
    }

    let orch = orchestrator(test_config(&["m1", "m2"], dir.path()), source, audit);
    let summary = orch
        .run("prompt", "run-1", &cancel)
        .await
        .expect("run completes after cancellation");

    assert_eq!(summary.aggregate, AggregateStatus::AllFailed);
    for (_, outcome) in summary.results.iter() {
        match outcome {
            Outcome::Failure(err) => assert_eq!(err.category, ErrorCategory::Cancelled),
            other => panic!("expected Cancelled, got {other:?}"),
        }
    }
}

#[tokio::test(start_paused = true)]
async fn cancellation_interrupts_a_limiter_wait() {
    let dir = tempfile::tempdir().expect("tempdir");
    let source = MockSource::new()
        .with_model("m1", MockProvider::new(MockBehavior::Hang))
        .with_model("m2", MockProvider::new(MockBehavior::Reply("queued")));
    let audit = CaptureAudit::new();

    // One slot: m1 takes it and hangs, m2 waits in the limiter.
    let mut config = test_config(&["m1", "m2"], dir.path());
    config.max_concurrent = 1;
    config.timeout = Duration::from_secs(3);
    let orch = orchestrator(config, source, audit);
    let summary = orch
        .run("prompt", "run-1", &CancellationToken::new())
        .await
        .expect("run completes at the deadline");

    assert_eq!(summary.aggregate, AggregateStatus::AllFailed);
    for (_, outcome) in summary.results.iter() {
        match outcome {
            Outcome::Failure(err) => assert_eq!(err.category, ErrorCategory::Cancelled),
            other => panic!("expected Cancelled, got {other:?}"),
        }
    }
}
