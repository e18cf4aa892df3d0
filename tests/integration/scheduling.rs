//! Scheduling tests over graphs held by the router.

use taskloom::core::{Task, TaskGraph, TaskId, TaskStatus};
use taskloom::message::{MessageType, PayloadStatus};
use taskloom::orchestration::{
    critical_path, parallel_groups, progress, ready_tasks, sequential_tasks, topological_order,
    validate, GraphError,
};
use taskloom::Error;

use crate::fixtures::{chain_graph, diamond_graph, ids, Harness, MessageBuilder, PRODUCT};

/// Test: Diamond walk-through
/// Given the A -> {B, C} -> D diamond
/// When A completes
/// Then B and C are ready, grouped together, and the critical path is A, B, D
#[tokio::test]
async fn test_diamond_ready_groups_and_critical_path() {
    let harness = Harness::in_memory();
    harness.import(diamond_graph(PRODUCT)).await;

    let graph = harness.router.graph(PRODUCT).await.unwrap();
    assert_eq!(ids(&ready_tasks(&graph, &[])), vec!["A"]);

    harness
        .router
        .route(&MessageBuilder::success(PRODUCT, "A").from("architect").build())
        .await
        .unwrap();

    let graph = harness.router.graph(PRODUCT).await.unwrap();
    let ready = ready_tasks(&graph, &[]);
    assert_eq!(ids(&ready), vec!["B", "C"]);

    let groups = parallel_groups(&ready);
    assert_eq!(groups.len(), 1);
    assert_eq!(ids(&groups[0]), vec!["B", "C"]);
    assert!(sequential_tasks(&ready).is_empty());

    let cp = critical_path(&graph).unwrap();
    assert_eq!(cp.path, vec![TaskId::from("A"), TaskId::from("B"), TaskId::from("D")]);
    assert_eq!(cp.total_minutes, 35);
}

/// Test: Join waits for every dependency
/// Given B completed and C still in progress
/// Then D is not ready
#[tokio::test]
async fn test_join_waits_for_all_dependencies() {
    let harness = Harness::in_memory();
    harness.import(diamond_graph(PRODUCT)).await;
    for task in ["A", "B"] {
        harness
            .router
            .route(&MessageBuilder::success(PRODUCT, task).build())
            .await
            .unwrap();
    }
    harness
        .router
        .begin_task(PRODUCT, &TaskId::from("C"))
        .await
        .unwrap();

    let graph = harness.router.graph(PRODUCT).await.unwrap();
    assert!(ready_tasks(&graph, &[]).is_empty());

    harness
        .router
        .route(&MessageBuilder::success(PRODUCT, "C").build())
        .await
        .unwrap();
    let graph = harness.router.graph(PRODUCT).await.unwrap();
    assert_eq!(ids(&ready_tasks(&graph, &[])), vec!["D"]);
}

/// Test: Checkpoint gate
/// Given otherwise-ready tasks
/// When a checkpoint_ready message arrives
/// Then nothing is ready until the checkpoint is resolved
#[tokio::test]
async fn test_checkpoint_blocks_entire_graph() {
    let harness = Harness::in_memory();
    harness.import(diamond_graph(PRODUCT)).await;

    harness
        .router
        .route(
            &MessageBuilder::report(PRODUCT, "A", PayloadStatus::NeedsReview)
                .kind(MessageType::CheckpointReady)
                .build(),
        )
        .await
        .unwrap();

    let graph = harness.router.graph(PRODUCT).await.unwrap();
    let checkpoints = harness.router.checkpoints(PRODUCT).await.unwrap();
    assert_eq!(checkpoints.len(), 1);
    assert!(ready_tasks(&graph, &checkpoints).is_empty());
    assert_eq!(progress(&graph).runnable, 1);

    harness
        .router
        .resolve_checkpoint(PRODUCT, checkpoints[0].id, "ship it")
        .await
        .unwrap();
    let checkpoints = harness.router.checkpoints(PRODUCT).await.unwrap();
    assert_eq!(checkpoints[0].resolution.as_deref(), Some("ship it"));
    assert_eq!(ids(&ready_tasks(&graph, &checkpoints)), vec!["A"]);
}

/// Test: Checkpoints are per product
#[tokio::test]
async fn test_checkpoint_does_not_gate_other_products() {
    let harness = Harness::in_memory();
    harness.import(diamond_graph("shop")).await;
    harness.import(diamond_graph("blog")).await;

    harness
        .router
        .route(
            &MessageBuilder::report("shop", "A", PayloadStatus::NeedsReview)
                .kind(MessageType::CheckpointReady)
                .build(),
        )
        .await
        .unwrap();

    let blog = harness.router.graph("blog").await.unwrap();
    let checkpoints = harness.router.checkpoints("blog").await.unwrap();
    assert!(checkpoints.is_empty());
    assert_eq!(ids(&ready_tasks(&blog, &checkpoints)), vec!["A"]);
}

/// Test: Validation collects every violation
#[test]
fn test_validate_reports_all_errors() {
    let graph = TaskGraph::from_tasks(
        PRODUCT,
        vec![
            Task::new("a", "A", "dev").depends_on("c"),
            Task::new("b", "B", "dev").depends_on("a").depends_on("ghost"),
            Task::new("c", "C", "dev").depends_on("b").consuming("a", "openapi.yaml"),
            Task::new("d", "D", "dev").consuming("nobody", "thing"),
        ],
    );

    let report = validate(&graph);
    assert!(!report.valid);
    assert!(report.has_cycle());
    assert!(report.errors.contains(&GraphError::DanglingDependency {
        task: TaskId::from("b"),
        missing: TaskId::from("ghost"),
    }));
    assert!(report.errors.contains(&GraphError::MissingArtifact {
        task: TaskId::from("c"),
        producer: TaskId::from("a"),
        artifact: "openapi.yaml".to_string(),
    }));
    assert!(report.errors.contains(&GraphError::DanglingProducer {
        task: TaskId::from("d"),
        producer: TaskId::from("nobody"),
    }));
    assert_eq!(report.errors.len(), 4);
}

/// Test: Invalid graphs never reach the store
#[tokio::test]
async fn test_import_refuses_invalid_graph() {
    let harness = Harness::in_memory();
    let graph = TaskGraph::from_tasks(PRODUCT, vec![Task::new("a", "A", "dev").depends_on("a")]);

    match harness.router.import_graph(graph).await {
        Err(Error::InvalidGraph(errors)) => assert!(matches!(errors[0], GraphError::Cycle { .. })),
        other => panic!("Expected InvalidGraph, got {:?}", other),
    }
    assert!(harness.router.stores().graphs.list_products().await.unwrap().is_empty());
}

/// Test: Long chains do not exhaust the call stack
#[test]
fn test_long_chain_is_handled_iteratively() {
    let graph = chain_graph(PRODUCT, 20_000);

    assert!(validate(&graph).valid);
    let order = topological_order(&graph).unwrap();
    assert_eq!(order.first().unwrap().id, TaskId::from("t0"));
    assert_eq!(order.last().unwrap().id, TaskId::from("t19999"));

    let cp = critical_path(&graph).unwrap();
    assert_eq!(cp.path.len(), 20_000);
    assert_eq!(cp.total_minutes, 20_000);
}

/// Test: Progress tracks the graph to completion
#[tokio::test]
async fn test_progress_settles_when_done() {
    let harness = Harness::in_memory();
    harness.import(chain_graph(PRODUCT, 3)).await;

    for i in 0..3 {
        let graph = harness.router.graph(PRODUCT).await.unwrap();
        let p = progress(&graph);
        assert!(!p.is_settled());
        assert_eq!(p.completed, i);
        harness
            .router
            .route(&MessageBuilder::success(PRODUCT, &format!("t{}", i)).build())
            .await
            .unwrap();
    }

    let graph = harness.router.graph(PRODUCT).await.unwrap();
    let p = progress(&graph);
    assert!(p.is_settled());
    assert!(p.is_complete());
    assert_eq!(harness.status(PRODUCT, "t2").await, TaskStatus::Completed);
}

/// Test: A failed dependency settles the graph without completing it
#[tokio::test]
async fn test_failure_settles_downstream() {
    let harness = Harness::in_memory();
    harness.import(chain_graph(PRODUCT, 3)).await;
    harness
        .router
        .route(&MessageBuilder::failure(PRODUCT, "t0").build())
        .await
        .unwrap();

    let graph = harness.router.graph(PRODUCT).await.unwrap();
    let p = progress(&graph);
    assert!(p.is_settled());
    assert!(!p.is_complete());
    assert_eq!(p.failed, 1);
    assert!(ready_tasks(&graph, &[]).is_empty());
}
