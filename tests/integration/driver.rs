//! Driver loop tests with simulated agents.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use taskloom::core::{TaskId, TaskStatus};
use taskloom::message::{MessageType, PayloadStatus};
use taskloom::orchestration::{ChannelDispatcher, Dispatch, Driver, Router, StopReason};

use crate::fixtures::{diamond_graph, Harness, MessageBuilder, PRODUCT};

/// Spawn an agent pool that answers every dispatched task through the router.
/// Tasks listed in `fail` report failure instead of success.
fn spawn_agents(
    router: Arc<Router>,
    mut rx: mpsc::UnboundedReceiver<(String, Dispatch)>,
    fail: HashSet<&'static str>,
) -> tokio::task::JoinHandle<Vec<Vec<String>>> {
    tokio::spawn(async move {
        let mut seen = Vec::new();
        while let Some((product, batch)) = rx.recv().await {
            let ids: Vec<String> = batch.tasks().iter().map(|t| t.id.to_string()).collect();
            for task in batch.tasks() {
                let msg = if fail.contains(task.id.as_str()) {
                    MessageBuilder::failure(&product, task.id.as_str())
                } else {
                    MessageBuilder::success(&product, task.id.as_str())
                }
                .from(&task.agent)
                .build();
                router.route(&msg).await.expect("agent report should route");
            }
            seen.push(ids);
        }
        seen
    })
}

/// Test: Full diamond run
/// Given the diamond graph and agents that always succeed
/// When the driver runs
/// Then batches arrive as [A], [B, C], [D] and the graph settles complete
#[tokio::test]
async fn test_driver_runs_diamond_to_completion() {
    let harness = Harness::on_disk();
    harness.import(diamond_graph(PRODUCT)).await;

    let (dispatcher, rx) = ChannelDispatcher::new();
    let agents = spawn_agents(harness.router.clone(), rx, HashSet::new());
    let driver = Driver::new(harness.router.clone(), Arc::new(dispatcher), Duration::from_millis(25));

    let summary = driver.run(PRODUCT, CancellationToken::new()).await.unwrap();
    assert_eq!(summary.stop, StopReason::Settled);
    assert_eq!(summary.dispatched, 4);
    assert!(summary.progress.is_complete());

    drop(driver);
    let batches = agents.await.unwrap();
    assert_eq!(
        batches,
        vec![
            vec!["A".to_string()],
            vec!["B".to_string(), "C".to_string()],
            vec!["D".to_string()],
        ]
    );

    let perf = harness.router.performance("backend-dev").await.unwrap().unwrap();
    assert_eq!(perf.tasks_completed, 1);
}

/// Test: Failure stops downstream work
/// Given agents that fail task B
/// Then the driver settles with D never dispatched
#[tokio::test]
async fn test_driver_settles_after_failure() {
    let harness = Harness::in_memory();
    harness.import(diamond_graph(PRODUCT)).await;

    let (dispatcher, rx) = ChannelDispatcher::new();
    let agents = spawn_agents(harness.router.clone(), rx, HashSet::from(["B"]));
    let driver = Driver::new(harness.router.clone(), Arc::new(dispatcher), Duration::from_millis(25));

    let summary = driver.run(PRODUCT, CancellationToken::new()).await.unwrap();
    assert_eq!(summary.stop, StopReason::Settled);
    assert_eq!(summary.dispatched, 3);
    assert_eq!(summary.progress.failed, 1);
    assert_eq!(summary.progress.pending, 1);

    drop(driver);
    agents.await.unwrap();
    assert_eq!(harness.status(PRODUCT, "D").await, TaskStatus::Pending);
    assert_eq!(harness.task(PRODUCT, "B").await.retry_count, 1);
}

/// Test: Checkpoint pauses the driver until resolved
/// Given A asks for review and then completes
/// Then no further batch is dispatched until the checkpoint is resolved
#[tokio::test]
async fn test_driver_waits_on_checkpoint() {
    let harness = Harness::in_memory();
    harness.import(diamond_graph(PRODUCT)).await;

    let (dispatcher, mut rx) = ChannelDispatcher::new();
    let driver = Arc::new(Driver::new(
        harness.router.clone(),
        Arc::new(dispatcher),
        Duration::from_millis(20),
    ));
    let cancel = CancellationToken::new();
    let run = {
        let driver = driver.clone();
        let cancel = cancel.clone();
        tokio::spawn(async move { driver.run(PRODUCT, cancel).await })
    };

    let (_, first) = rx.recv().await.unwrap();
    assert_eq!(first.tasks()[0].id, TaskId::from("A"));
    harness
        .router
        .route(
            &MessageBuilder::report(PRODUCT, "A", PayloadStatus::NeedsReview)
                .kind(MessageType::CheckpointReady)
                .build(),
        )
        .await
        .unwrap();
    harness
        .router
        .route(&MessageBuilder::success(PRODUCT, "A").build())
        .await
        .unwrap();

    // Several poll intervals pass with nothing dispatched.
    let idle = tokio::time::timeout(Duration::from_millis(150), rx.recv()).await;
    assert!(idle.is_err(), "nothing should be dispatched while gated");

    let checkpoint = harness.router.checkpoints(PRODUCT).await.unwrap().remove(0);
    harness
        .router
        .resolve_checkpoint(PRODUCT, checkpoint.id, "approved")
        .await
        .unwrap();

    let (_, next) = tokio::time::timeout(Duration::from_secs(2), rx.recv())
        .await
        .expect("dispatch after checkpoint resolution")
        .unwrap();
    assert!(matches!(next, Dispatch::Parallel { .. }));

    cancel.cancel();
    let summary = run.await.unwrap().unwrap();
    assert_eq!(summary.stop, StopReason::Cancelled);
}

/// Test: Requeued task is dispatched again
#[tokio::test]
async fn test_requeue_redispatches() {
    let harness = Harness::in_memory();
    harness.import(diamond_graph(PRODUCT)).await;

    let (dispatcher, mut rx) = ChannelDispatcher::new();
    let driver = Driver::new(harness.router.clone(), Arc::new(dispatcher), Duration::from_millis(20));

    assert_eq!(driver.run_round(PRODUCT).await.unwrap().task_count(), 1);
    rx.recv().await.unwrap();
    harness
        .router
        .route(&MessageBuilder::report(PRODUCT, "A", PayloadStatus::Failure).error("io", "disk full").build())
        .await
        .unwrap();

    let report = driver.run_round(PRODUCT).await.unwrap();
    assert!(report.dispatched.is_empty());
    assert!(report.progress.is_settled());

    harness
        .router
        .requeue_task(PRODUCT, &TaskId::from("A"))
        .await
        .unwrap();
    let report = driver.run_round(PRODUCT).await.unwrap();
    assert_eq!(report.task_count(), 1);

    let task = harness.task(PRODUCT, "A").await;
    assert_eq!(task.status, TaskStatus::InProgress);
    assert_eq!(task.retry_count, 1);
}
