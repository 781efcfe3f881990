//! End-to-end engine scenarios: completion, pauses, branch pruning,
//! failures, cancellation, and streaming.

mod common;

use std::sync::Arc;
use std::time::Duration;

use serde_json::json;
use stepflow::config::EngineConfig;
use stepflow::engine::EngineError;
use stepflow::executors::{Collaborators, InMemoryRecordStore, RecordStore};
use stepflow::run::{NodeStatus, RunStatus, StoreError};
use stepflow::stream::StreamEvent;

use common::{engine_for, engine_with, linear_graph, onboarding_graph};

#[tokio::test]
async fn linear_run_completes_with_seed_visible_downstream() {
    let engine = engine_for(linear_graph());
    let snapshot = engine
        .start_run("r1", json!({"email": "ada@example.com"}))
        .await
        .unwrap();

    assert_eq!(snapshot.status, RunStatus::Completed);
    assert_eq!(snapshot.nodes["trigger1"].status, NodeStatus::Completed);
    assert_eq!(
        snapshot.nodes["trigger1"].result,
        Some(json!({"email": "ada@example.com"}))
    );
    let message = &snapshot.nodes["notify1"].result.as_ref().unwrap()["message"];
    assert_eq!(message, "started by ada@example.com");
}

#[tokio::test]
async fn duplicate_run_id_rejected() {
    let engine = engine_for(linear_graph());
    engine.start_run("r1", json!({"email": "a"})).await.unwrap();
    let err = engine.start_run("r1", json!({})).await.unwrap_err();
    assert!(matches!(
        err,
        EngineError::Store(StoreError::RunExists { .. })
    ));
}

#[tokio::test]
async fn form_pauses_run_then_resume_takes_true_branch() {
    let records = Arc::new(InMemoryRecordStore::new());
    let collaborators = Collaborators {
        records: Arc::clone(&records) as Arc<dyn RecordStore>,
        ..Collaborators::in_memory()
    };
    let engine = engine_with(onboarding_graph(), collaborators, EngineConfig::default());

    let paused = engine.start_run("r1", json!({})).await.unwrap();
    assert_eq!(paused.status, RunStatus::WaitingUserInput);
    assert_eq!(paused.nodes["form1"].status, NodeStatus::WaitingUserInput);
    assert_eq!(paused.nodes["cond1"].status, NodeStatus::Pending);

    let done = engine
        .resume_node("r1", "form1", json!({"email": "kid@example.com", "age": 20}))
        .await
        .unwrap();

    assert_eq!(done.status, RunStatus::Completed);
    assert_eq!(done.nodes["update1"].status, NodeStatus::Completed);
    assert_eq!(done.nodes["end_yes"].status, NodeStatus::Completed);
    assert_eq!(done.nodes["notify1"].status, NodeStatus::Skipped);
    assert_eq!(done.nodes["end_no"].status, NodeStatus::Skipped);

    assert_eq!(
        records.get("contact", "c-1").unwrap(),
        json!({"status": "qualified", "email": "kid@example.com"})
    );
}

#[tokio::test]
async fn false_branch_prunes_the_other_side() {
    let engine = engine_for(onboarding_graph());
    engine.start_run("r1", json!({})).await.unwrap();
    let done = engine
        .resume_node("r1", "form1", json!({"email": "kid@example.com", "age": 11}))
        .await
        .unwrap();

    assert_eq!(done.status, RunStatus::Completed);
    assert_eq!(done.nodes["notify1"].status, NodeStatus::Completed);
    assert_eq!(done.nodes["end_no"].status, NodeStatus::Completed);
    assert_eq!(done.nodes["update1"].status, NodeStatus::Skipped);
    assert_eq!(done.nodes["end_yes"].status, NodeStatus::Skipped);
}

#[tokio::test]
async fn rejected_resume_keeps_pause_armed() {
    let engine = engine_for(onboarding_graph());
    engine.start_run("r1", json!({})).await.unwrap();

    // Missing required field: rejected, still waiting.
    let err = engine
        .resume_node("r1", "form1", json!({"age": 20}))
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::ResumeRejected { .. }));

    let snapshot = engine.run_snapshot("r1").await.unwrap();
    assert_eq!(snapshot.status, RunStatus::WaitingUserInput);
    assert_eq!(snapshot.nodes["form1"].status, NodeStatus::WaitingUserInput);

    // Corrected input still goes through.
    let done = engine
        .resume_node("r1", "form1", json!({"email": "a@b.c", "age": 20}))
        .await
        .unwrap();
    assert_eq!(done.status, RunStatus::Completed);
}

#[tokio::test]
async fn resume_of_non_waiting_node_is_invalid() {
    let engine = engine_for(onboarding_graph());
    engine.start_run("r1", json!({})).await.unwrap();

    let err = engine
        .resume_node("r1", "cond1", json!({}))
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::InvalidResumeTarget { .. }));

    let err = engine
        .resume_node("r1", "ghost", json!({}))
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::InvalidResumeTarget { .. }));

    let err = engine
        .resume_node("nope", "form1", json!({}))
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        EngineError::Store(StoreError::RunNotFound { .. })
    ));
}

#[tokio::test]
async fn unresolvable_reference_fails_the_run() {
    let engine = engine_for(json!({
        "nodes": [
            {"id": "trigger1", "type": "trigger"},
            {"id": "notify1", "type": "notification", "config": {
                "recipient": "ops@example.com",
                "message": "{{ghost.field}}",
            }},
            {"id": "end1", "type": "end"},
        ],
        "edges": [
            {"source": "trigger1", "target": "notify1"},
            {"source": "notify1", "target": "end1"},
        ],
    }));

    let snapshot = engine.start_run("r1", json!({})).await.unwrap();
    assert_eq!(snapshot.status, RunStatus::Failed);
    let failure = snapshot.failure.unwrap();
    assert_eq!(failure.node_id.as_deref(), Some("notify1"));
    assert_eq!(failure.kind, "resolution");
    // Downstream never ran.
    assert_eq!(snapshot.nodes["end1"].status, NodeStatus::Pending);
}

#[tokio::test]
async fn approval_rejection_flows_through_condition() {
    let engine = engine_for(json!({
        "nodes": [
            {"id": "trigger1", "type": "trigger"},
            {"id": "approve1", "type": "approval"},
            {"id": "cond1", "type": "condition", "config": {
                "left": "{{approve1.decision}}", "operator": "eq", "right": "approved",
            }},
            {"id": "end_yes", "type": "end"},
            {"id": "end_no", "type": "end"},
        ],
        "edges": [
            {"source": "trigger1", "target": "approve1"},
            {"source": "approve1", "target": "cond1"},
            {"source": "cond1", "target": "end_yes", "branch": "true"},
            {"source": "cond1", "target": "end_no", "branch": "false"},
        ],
    }));

    engine.start_run("r1", json!({})).await.unwrap();
    let done = engine
        .resume_node(
            "r1",
            "approve1",
            json!({"decision": "rejected", "actor": "lead@example.com"}),
        )
        .await
        .unwrap();

    // Rejection is a normal completion, not a failure.
    assert_eq!(done.status, RunStatus::Completed);
    assert_eq!(done.nodes["end_no"].status, NodeStatus::Completed);
    assert_eq!(done.nodes["end_yes"].status, NodeStatus::Skipped);
}

#[tokio::test]
async fn delay_resumes_on_its_own_timer() {
    let engine = engine_for(json!({
        "nodes": [
            {"id": "trigger1", "type": "trigger"},
            {"id": "wait1", "type": "delay", "config": {"duration_secs": 0}},
            {"id": "end1", "type": "end"},
        ],
        "edges": [
            {"source": "trigger1", "target": "wait1"},
            {"source": "wait1", "target": "end1"},
        ],
    }));

    let paused = engine.start_run("r1", json!({})).await.unwrap();
    assert_eq!(paused.status, RunStatus::WaitingUserInput);

    // External resume of a timer pause is rejected.
    let err = engine
        .resume_node("r1", "wait1", json!({}))
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::InvalidResumeTarget { .. }));

    let mut status = paused.status;
    for _ in 0..50 {
        tokio::time::sleep(Duration::from_millis(20)).await;
        status = engine.run_snapshot("r1").await.unwrap().status;
        if status == RunStatus::Completed {
            break;
        }
    }
    assert_eq!(status, RunStatus::Completed);
}

#[tokio::test]
async fn first_waiting_passes_over_timer_pauses() {
    let engine = engine_for(json!({
        "nodes": [
            {"id": "trigger1", "type": "trigger"},
            {"id": "wait1", "type": "delay", "config": {"duration_secs": 3600}},
            {"id": "form1", "type": "form", "config": {
                "fields": [{"name": "email", "type": "text", "required": true}],
            }},
            {"id": "end1", "type": "end"},
        ],
        "edges": [
            {"source": "trigger1", "target": "wait1"},
            {"source": "trigger1", "target": "form1"},
            {"source": "wait1", "target": "end1"},
            {"source": "form1", "target": "end1"},
        ],
    }));

    let paused = engine.start_run("r1", json!({})).await.unwrap();
    assert_eq!(paused.status, RunStatus::WaitingUserInput);
    assert_eq!(paused.nodes["wait1"].status, NodeStatus::WaitingUserInput);

    // The delay is declared first but wakes on its own; only the form is
    // a resumable target.
    assert_eq!(
        engine.first_waiting("r1").await.unwrap().as_deref(),
        Some("form1")
    );

    let snapshot = engine
        .resume_node("r1", "form1", json!({"email": "a@b.c"}))
        .await
        .unwrap();
    assert_eq!(snapshot.nodes["form1"].status, NodeStatus::Completed);
    // The timer is still pending, so the run keeps waiting.
    assert_eq!(snapshot.status, RunStatus::WaitingUserInput);
}

#[tokio::test]
async fn resolution_failure_releases_batched_siblings() {
    let engine = engine_for(json!({
        "nodes": [
            {"id": "trigger1", "type": "trigger"},
            {"id": "notify_ok", "type": "notification", "config": {
                "recipient": "ops@example.com", "message": "fine",
            }},
            {"id": "notify_bad", "type": "notification", "config": {
                "recipient": "ops@example.com", "message": "{{ghost.x}}",
            }},
            {"id": "end1", "type": "end"},
        ],
        "edges": [
            {"source": "trigger1", "target": "notify_ok"},
            {"source": "trigger1", "target": "notify_bad"},
            {"source": "notify_ok", "target": "end1"},
            {"source": "notify_bad", "target": "end1"},
        ],
    }));

    let snapshot = engine.start_run("r1", json!({})).await.unwrap();
    assert_eq!(snapshot.status, RunStatus::Failed);
    assert_eq!(
        snapshot.failure.unwrap().node_id.as_deref(),
        Some("notify_bad")
    );
    // The sibling was collected in the same scan but never executed; it
    // must not be reported as in-flight.
    assert_eq!(snapshot.nodes["notify_ok"].status, NodeStatus::Pending);
    assert!(snapshot.nodes["notify_ok"].started_at.is_none());
}

#[tokio::test]
async fn cancel_skips_outstanding_work_and_freezes_the_run() {
    let engine = engine_for(onboarding_graph());
    engine.start_run("r1", json!({})).await.unwrap();

    let cancelled = engine.cancel_run("r1").await.unwrap();
    assert_eq!(cancelled.status, RunStatus::Failed);
    let failure = cancelled.failure.as_ref().unwrap();
    assert_eq!(failure.kind, "cancelled");
    assert_eq!(failure.node_id, None);
    assert_eq!(cancelled.nodes["form1"].status, NodeStatus::Skipped);
    assert_eq!(cancelled.nodes["cond1"].status, NodeStatus::Skipped);
    // Already-completed work keeps its results.
    assert_eq!(cancelled.nodes["trigger1"].status, NodeStatus::Completed);

    assert!(matches!(
        engine.resume_node("r1", "form1", json!({})).await.unwrap_err(),
        EngineError::RunFinished { .. }
    ));
    assert!(matches!(
        engine.cancel_run("r1").await.unwrap_err(),
        EngineError::RunFinished { .. }
    ));
}

#[tokio::test]
async fn prompt_chunks_reach_an_attached_listener() {
    let engine = engine_for(json!({
        "nodes": [
            {"id": "trigger1", "type": "trigger"},
            {"id": "prompt1", "type": "prompt", "config": {"prompt": "three word reply"}},
            {"id": "end1", "type": "end"},
        ],
        "edges": [
            {"source": "trigger1", "target": "prompt1"},
            {"source": "prompt1", "target": "end1"},
        ],
    }));

    let listener = engine.streams().attach("r1");
    let snapshot = engine.start_run("r1", json!({})).await.unwrap();
    assert_eq!(snapshot.status, RunStatus::Completed);
    assert_eq!(
        snapshot.nodes["prompt1"].result.as_ref().unwrap()["text"],
        "three word reply"
    );

    let events = listener.drain();
    assert_eq!(events.first(), Some(&StreamEvent::Start));
    assert_eq!(events.last(), Some(&StreamEvent::End));
    let streamed: String = events
        .into_iter()
        .filter_map(|e| match e {
            StreamEvent::Chunk { content } => Some(content),
            _ => None,
        })
        .collect();
    assert_eq!(streamed, "three word reply");
}

#[tokio::test]
async fn parallel_branches_join_after_both_complete() {
    let engine = engine_for(json!({
        "nodes": [
            {"id": "trigger1", "type": "trigger"},
            {"id": "left", "type": "notification", "config": {
                "recipient": "a@example.com", "message": "left arm",
            }},
            {"id": "right", "type": "notification", "config": {
                "recipient": "b@example.com", "message": "right arm",
            }},
            {"id": "join1", "type": "notification", "config": {
                "recipient": "c@example.com",
                "message": "{{left.message}} + {{right.message}}",
            }},
            {"id": "end1", "type": "end"},
        ],
        "edges": [
            {"source": "trigger1", "target": "left"},
            {"source": "trigger1", "target": "right"},
            {"source": "left", "target": "join1"},
            {"source": "right", "target": "join1"},
            {"source": "join1", "target": "end1"},
        ],
    }));

    let snapshot = engine.start_run("r1", json!({})).await.unwrap();
    assert_eq!(snapshot.status, RunStatus::Completed);
    assert_eq!(snapshot.nodes["left"].status, NodeStatus::Completed);
    assert_eq!(snapshot.nodes["right"].status, NodeStatus::Completed);
    // The join saw both upstream results, so it ran strictly after them.
    assert_eq!(
        snapshot.nodes["join1"].result.as_ref().unwrap()["message"],
        "left arm + right arm"
    );
}

#[tokio::test]
async fn run_without_listener_still_completes() {
    let engine = engine_for(linear_graph());
    let snapshot = engine.start_run("r1", json!({"email": "x"})).await.unwrap();
    assert_eq!(snapshot.status, RunStatus::Completed);
}
