//! Message routing tests against in-memory and on-disk stores.

use taskloom::core::{TaskId, TaskStatus};
use taskloom::message::{MessageType, PayloadStatus, Resolver, Severity};
use taskloom::orchestration::{Delivery, TransitionOutcome};
use taskloom::Error;

use crate::fixtures::{diamond_graph, Harness, MessageBuilder, PRODUCT};

/// Test: Failure report
/// Given a pending task
/// When the orchestrator receives a failure for it
/// Then the task is failed and retryCount rises by exactly one
#[tokio::test]
async fn test_failure_sets_failed_and_counts_once() {
    let harness = Harness::in_memory();
    harness.import(diamond_graph(PRODUCT)).await;

    let msg = MessageBuilder::failure(PRODUCT, "A").build();
    let outcome = harness.router.route(&msg).await.unwrap();
    assert_eq!(
        outcome.transition,
        TransitionOutcome::Applied {
            task_id: TaskId::from("A"),
            status: TaskStatus::Failed
        }
    );

    let task = harness.task(PRODUCT, "A").await;
    assert_eq!(task.status, TaskStatus::Failed);
    assert_eq!(task.retry_count, 1);
    assert!(task.completed_at.is_some());
}

/// Test: Re-delivery is idempotent
/// Given a task_complete already applied
/// When the same message is routed again
/// Then status stays completed and retryCount is unchanged
#[tokio::test]
async fn test_redelivered_completion_changes_nothing() {
    let harness = Harness::in_memory();
    harness.import(diamond_graph(PRODUCT)).await;
    let msg = MessageBuilder::success(PRODUCT, "A").build();

    harness.router.route(&msg).await.unwrap();
    let before = harness.router.graph(PRODUCT).await.unwrap();

    let outcome = harness.router.route(&msg).await.unwrap();
    assert!(outcome.duplicate);
    assert!(matches!(outcome.transition, TransitionOutcome::AlreadyApplied { .. }));

    let after = harness.router.graph(PRODUCT).await.unwrap();
    assert_eq!(before, after);
    assert_eq!(harness.task(PRODUCT, "A").await.retry_count, 0);

    let record = harness.router.performance("backend-dev").await.unwrap().unwrap();
    assert_eq!(record.history.len(), 1);
}

/// Test: A late failure never downgrades a completed task
#[tokio::test]
async fn test_failure_after_completion_is_ignored() {
    let harness = Harness::in_memory();
    harness.import(diamond_graph(PRODUCT)).await;
    harness
        .router
        .route(&MessageBuilder::success(PRODUCT, "A").build())
        .await
        .unwrap();

    let outcome = harness
        .router
        .route(&MessageBuilder::failure(PRODUCT, "A").build())
        .await
        .unwrap();
    assert!(matches!(
        outcome.transition,
        TransitionOutcome::AlreadyApplied {
            status: TaskStatus::Completed,
            ..
        }
    ));
    assert_eq!(harness.task(PRODUCT, "A").await.retry_count, 0);
}

/// Test: Invalid messages are rejected before anything is recorded
#[tokio::test]
async fn test_invalid_message_rejected_without_side_effects() {
    let harness = Harness::in_memory();
    harness.import(diamond_graph(PRODUCT)).await;

    let mut msg = MessageBuilder::success(PRODUCT, "A").build();
    msg.metadata.timestamp = "yesterday".to_string();
    msg.payload.artifacts.as_mut().unwrap()[0].path.clear();

    match harness.router.route(&msg).await {
        Err(Error::InvalidMessage(errors)) => {
            assert_eq!(errors.len(), 2);
            assert!(errors[0].starts_with("metadata.timestamp"));
            assert_eq!(errors[1], "payload.artifacts[0].path is required");
        }
        other => panic!("Expected InvalidMessage, got {:?}", other),
    }
    assert!(harness.router.stores().messages.keys().await.unwrap().is_empty());
    assert_eq!(harness.status(PRODUCT, "A").await, TaskStatus::Pending);
    assert!(harness.router.performance("backend-dev").await.unwrap().is_none());
}

/// Test: Suspicious combinations pass with warnings
#[tokio::test]
async fn test_warnings_do_not_block_routing() {
    let harness = Harness::in_memory();
    harness.import(diamond_graph(PRODUCT)).await;

    let msg = MessageBuilder::report(PRODUCT, "A", PayloadStatus::Success).build();
    let outcome = harness.router.route(&msg).await.unwrap();
    assert_eq!(outcome.warnings, vec!["success reported without artifacts"]);
    assert!(outcome.transition.is_applied());
}

/// Test: Raw ingestion uses the camelCase wire format
#[tokio::test]
async fn test_ingest_wire_format() {
    let harness = Harness::in_memory();
    harness.import(diamond_graph(PRODUCT)).await;

    let raw = r#"{
        "metadata": {
            "from": "architect",
            "to": "orchestrator",
            "timestamp": "2026-03-01T10:15:00Z",
            "messageType": "task_complete",
            "product": "shop",
            "taskId": "A"
        },
        "payload": {
            "status": "success",
            "summary": "Schema designed",
            "artifacts": [{"path": "docs/schema.md", "type": "document"}],
            "metrics": {"durationMinutes": 12, "tokensUsed": 4000, "filesChanged": 3}
        }
    }"#;

    let response = harness.router.ingest(raw).await.unwrap();
    assert!(response.success, "errors: {:?}", response.errors);
    assert!(response.warnings.is_empty());

    let task = harness.task(PRODUCT, "A").await;
    assert_eq!(task.status, TaskStatus::Completed);
    let result = task.result.unwrap();
    assert_eq!(result.artifacts[0].kind, "document");
    let metrics = result.metrics.unwrap();
    assert_eq!(metrics.tokens_used, Some(4000));
    assert_eq!(metrics.extra["filesChanged"], 3);

    let bad = r#"{"metadata": {"from": "x", "messageType": "task_exploded"}, "payload": {}}"#;
    let response = harness.router.ingest(bad).await.unwrap();
    assert!(!response.success);
    assert!(!response.errors.is_empty());
}

/// Test: Missing graph is an expected absence
/// Given no graph for the product
/// When a completion arrives
/// Then the message is still recorded and the outcome says GraphNotFound
#[tokio::test]
async fn test_report_before_graph_exists() {
    let harness = Harness::in_memory();
    let msg = MessageBuilder::success("bootstrap", "setup").build();

    let outcome = harness.router.route(&msg).await.unwrap();
    assert_eq!(
        outcome.transition,
        TransitionOutcome::GraphNotFound {
            product: "bootstrap".to_string()
        }
    );
    assert!(outcome.aux_failures.is_empty());
    assert_eq!(
        harness.router.stores().messages.get(&msg.key()).await.unwrap(),
        Some(msg)
    );
}

/// Test: Blockers are recorded for the operator and do not gate scheduling
#[tokio::test]
async fn test_blockers_recorded() {
    let harness = Harness::in_memory();
    harness.import(diamond_graph(PRODUCT)).await;

    let msg = MessageBuilder::report(PRODUCT, "A", PayloadStatus::Blocked)
        .kind(MessageType::NeedsDecision)
        .blocker("Choose a payment provider", Severity::High, Resolver::CeoDecision)
        .build();
    harness.router.route(&msg).await.unwrap();

    let blockers = harness.router.blockers(PRODUCT).await.unwrap();
    assert_eq!(blockers.len(), 1);
    assert_eq!(blockers[0].blocker.requires, Resolver::CeoDecision);
    assert_eq!(blockers[0].task_id, Some(TaskId::from("A")));
    assert!(harness.router.checkpoints(PRODUCT).await.unwrap().is_empty());
}

/// Test: Peer-to-peer handoff
/// Given a message addressed to another agent
/// Then it lands in that agent's inbox and the graph is untouched
#[tokio::test]
async fn test_handoff_queued_for_agent() {
    let harness = Harness::in_memory();
    harness.import(diamond_graph(PRODUCT)).await;
    let mut events = harness.router.subscribe();

    let msg = MessageBuilder::success(PRODUCT, "A")
        .handoff("qa", "Write API tests")
        .build();
    let outcome = harness.router.route(&msg).await.unwrap();

    assert_eq!(
        outcome.delivery,
        Delivery::Inbox {
            agent: "qa".to_string(),
            queued: true
        }
    );
    assert_eq!(harness.status(PRODUCT, "A").await, TaskStatus::Pending);
    assert!(matches!(
        events.try_recv(),
        Ok(taskloom::orchestration::RouterEvent::HandoffQueued { .. })
    ));

    let again = harness.router.route(&msg).await.unwrap();
    assert!(matches!(again.delivery, Delivery::Inbox { queued: false, .. }));

    let inbox = harness.router.take_inbox("qa").await.unwrap();
    assert_eq!(inbox, vec![msg]);
    assert!(harness.router.inbox("qa").await.unwrap().is_empty());
}

/// Test: On-disk state survives a restart
#[tokio::test]
async fn test_file_store_durability() {
    let harness = Harness::on_disk();
    harness.import(diamond_graph(PRODUCT)).await;

    let done = MessageBuilder::success(PRODUCT, "A").from("architect").build();
    harness.router.route(&done).await.unwrap();
    let gate = MessageBuilder::report(PRODUCT, "B", PayloadStatus::NeedsReview)
        .kind(MessageType::CheckpointReady)
        .build();
    harness.router.route(&gate).await.unwrap();
    let handoff = MessageBuilder::success(PRODUCT, "A").handoff("qa", "Review schema").build();
    harness.router.route(&handoff).await.unwrap();

    let reopened = harness.reopen();
    let graph = reopened.graph(PRODUCT).await.unwrap();
    assert_eq!(
        graph.get_task(&TaskId::from("A")).unwrap().status,
        TaskStatus::Completed
    );
    assert_eq!(reopened.checkpoints(PRODUCT).await.unwrap().len(), 1);
    assert_eq!(reopened.inbox("qa").await.unwrap(), vec![handoff]);
    assert_eq!(reopened.stores().messages.keys().await.unwrap().len(), 3);

    let record = reopened.performance("architect").await.unwrap().unwrap();
    assert_eq!(record.tasks_completed, 1);
    assert!((record.success_rate - 1.0).abs() < f64::EPSILON);

    // Re-delivery after restart is still idempotent.
    let outcome = reopened.route(&done).await.unwrap();
    assert!(outcome.duplicate);
    assert!(matches!(outcome.transition, TransitionOutcome::AlreadyApplied { .. }));
}
