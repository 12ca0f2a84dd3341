//! End-to-end pipeline runs against SQLite with scripted collaborators

mod common;

use common::{assert_status, input, stages_of, TestContext};
use content_forge_core::store::TrainingStore;
use content_forge_core::task::{ApprovalStatus, Stage, TaskInput, TaskStatus};
use content_forge_engine::testing::{RecordingPublisher, ScriptedBackend, ScriptedEvaluator, ScriptedReply};
use content_forge_engine::Decision;
use std::sync::Arc;

#[tokio::test]
async fn test_refines_until_threshold_is_met() {
    let ctx = TestContext::builder()
        .backend(ScriptedBackend::new("primary", 0.1))
        .evaluator(ScriptedEvaluator::new([0.6, 0.75, 0.85]))
        .build()
        .await;

    let task = ctx
        .engine
        .orchestrator()
        .create_and_wait(input("heat pumps for older homes"))
        .await
        .unwrap();

    assert_status(&task, TaskStatus::AwaitingApproval);
    assert_eq!(task.refinement_count, 2);
    assert_eq!(task.outputs.evaluations.len(), 3);
    let score = task.quality_score.unwrap();
    assert!((score - 0.85).abs() < 1e-9, "quality score {}", score);
    assert!(task.outputs.feedback.is_empty());
    assert!(task.outputs.formatted.is_some());
    assert_eq!(ctx.evaluator.calls(), 3);

    let history = ctx.history(task.id).await;
    assert_eq!(
        stages_of(&history),
        vec![
            Stage::Research,
            Stage::Draft,
            Stage::QualityReview,
            Stage::Refine,
            Stage::QualityReview,
            Stage::Refine,
            Stage::QualityReview,
            Stage::AssetSelection,
            Stage::Format,
        ]
    );
    // research, draft, two refinements, format
    assert_eq!(ctx.backend("primary").calls(), 5);
    assert!((task.cost_accumulated - 0.5).abs() < 1e-9);
}

#[tokio::test]
async fn test_gives_up_after_max_refinements() {
    let ctx = TestContext::builder()
        .backend(ScriptedBackend::new("primary", 0.1))
        .evaluator(ScriptedEvaluator::always(0.5))
        .build()
        .await;

    let task = ctx
        .engine
        .orchestrator()
        .create_and_wait(input("heat pumps for older homes"))
        .await
        .unwrap();

    assert_status(&task, TaskStatus::FailedQuality);
    assert_eq!(task.refinement_count, 3);
    assert_eq!(ctx.evaluator.calls(), 4);
    assert_eq!(
        task.failure.as_ref().map(|f| f.code()),
        Some("quality_not_met")
    );
    assert!(task.completed_at.is_some());

    let example = ctx
        .storage
        .training()
        .example_for_task(task.id)
        .await
        .unwrap()
        .expect("failed task should be captured");
    assert!(!example.success);
    assert_eq!(example.final_status, TaskStatus::FailedQuality);
    assert_eq!(example.trace.evaluations.len(), 4);
}

#[tokio::test]
async fn test_approval_publishes_exactly_once() {
    let publisher = Arc::new(RecordingPublisher::new());
    let ctx = TestContext::builder()
        .backend(ScriptedBackend::new("primary", 0.1))
        .publisher(publisher.clone())
        .build()
        .await;

    let task = ctx
        .engine
        .orchestrator()
        .create_and_wait(input("heat pumps for older homes"))
        .await
        .unwrap();
    assert_status(&task, TaskStatus::AwaitingApproval);
    assert_eq!(publisher.calls(), 0);

    let decision = Decision::approve("editor-7").with_feedback("Ship it");
    let published = ctx
        .engine
        .approvals()
        .decide(task.id, decision.clone())
        .await
        .unwrap();
    assert_status(&published, TaskStatus::Published);
    assert_eq!(published.approval_status, ApprovalStatus::Approved);
    assert_eq!(published.reviewer_id.as_deref(), Some("editor-7"));
    assert_eq!(published.reviewer_feedback.as_deref(), Some("Ship it"));
    assert!(published.decision_timestamp.is_some());
    let receipt = published.publication.clone().unwrap();
    assert_eq!(receipt.external_id, "post-1");

    let items = publisher.published();
    assert_eq!(items.len(), 1);
    assert_eq!(items[0].metadata.task_id, task.id);
    assert_eq!(items[0].metadata.reviewer_id.as_deref(), Some("editor-7"));

    // A repeated decision is a no-op
    let again = ctx
        .engine
        .approvals()
        .decide(task.id, decision)
        .await
        .unwrap();
    assert_status(&again, TaskStatus::Published);
    assert_eq!(publisher.calls(), 1);

    let example = ctx
        .engine
        .capture()
        .capture(task.id)
        .await
        .unwrap();
    assert!(example.success);
    assert_eq!(example.trace.publication, Some(receipt));
    assert_eq!(ctx.engine.capture().stats().await.unwrap().total, 1);
}

#[tokio::test]
async fn test_budget_ceiling_stops_before_overspending() {
    let ctx = TestContext::builder()
        .backend(ScriptedBackend::new("primary", 0.4))
        .build()
        .await;

    let request = TaskInput::builder()
        .topic("heat pumps for older homes")
        .target_length(600)
        .budget_ceiling(1.0)
        .build()
        .unwrap();
    let task = ctx
        .engine
        .orchestrator()
        .create_and_wait(request)
        .await
        .unwrap();

    assert_status(&task, TaskStatus::FailedError);
    assert_eq!(
        task.failure.as_ref().map(|f| f.code()),
        Some("budget_exceeded")
    );
    // Research and draft ran; the format call was refused before it was made
    assert_eq!(ctx.backend("primary").calls(), 2);
    assert!(task.cost_accumulated <= 1.0 + 1e-9);
    assert!((task.cost_accumulated - 0.8).abs() < 1e-9);

    let history = ctx.history(task.id).await;
    let last = history.last().unwrap();
    assert_eq!(last.stage, Stage::Format);
    assert_eq!(last.status, TaskStatus::FailedError);
}

#[tokio::test]
async fn test_falls_back_when_primary_always_times_out() {
    let ctx = TestContext::builder()
        .backend(ScriptedBackend::new("primary", 0.1).hanging())
        .backend(ScriptedBackend::new("secondary", 0.2))
        .build()
        .await;

    let task = ctx
        .engine
        .orchestrator()
        .create_and_wait(input("heat pumps for older homes"))
        .await
        .unwrap();
    assert_status(&task, TaskStatus::AwaitingApproval);

    let history = ctx.history(task.id).await;
    for stage in [Stage::Research, Stage::Draft, Stage::Format] {
        let entry = history.iter().find(|entry| entry.stage == stage).unwrap();
        assert_eq!(entry.backend_id.as_deref(), Some("secondary"), "{}", stage);
        assert_eq!(
            entry.note.as_deref(),
            Some("served after 2 backend attempts")
        );
    }
    assert_eq!(ctx.backend("primary").calls(), 3);
    assert_eq!(ctx.backend("secondary").calls(), 3);
    // timed-out calls to the primary are charged too
    assert!((task.cost_accumulated - 0.9).abs() < 1e-9);
}

#[tokio::test]
async fn test_recovered_primary_is_preferred_again() {
    let ctx = TestContext::builder()
        .backend(ScriptedBackend::new("primary", 0.1).then(ScriptedReply::Hang))
        .backend(ScriptedBackend::new("secondary", 0.2))
        .build()
        .await;

    let task = ctx
        .engine
        .orchestrator()
        .create_and_wait(input("heat pumps for older homes"))
        .await
        .unwrap();
    assert_status(&task, TaskStatus::AwaitingApproval);

    let history = ctx.history(task.id).await;
    let research = history
        .iter()
        .find(|entry| entry.stage == Stage::Research)
        .unwrap();
    assert_eq!(research.backend_id.as_deref(), Some("secondary"));
    assert!(research.note.as_deref().unwrap().contains("2 backend attempts"));
    assert!((research.cost - 0.3).abs() < 1e-9);

    // Later stages go back to the cheaper backend
    let draft = history
        .iter()
        .find(|entry| entry.stage == Stage::Draft)
        .unwrap();
    assert_eq!(draft.backend_id.as_deref(), Some("primary"));
    assert_eq!(ctx.backend("secondary").calls(), 1);
}
