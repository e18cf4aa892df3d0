//! Concurrent routing tests.
//!
//! Many agents report at once; the per-product lock must keep every
//! read-modify-write of a graph intact.

use futures::future::join_all;
use std::time::Duration;

use taskloom::core::TaskStatus;
use taskloom::orchestration::{progress, TransitionOutcome};
use taskloom::store::KeyedLocks;
use taskloom::Error;

use crate::fixtures::{wide_graph, Harness, MessageBuilder};

/// Test: No lost updates on a shared graph
/// Given 32 independent tasks in one product
/// When all completions are routed concurrently
/// Then every task is completed and the version advanced once per task
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_completions_same_product() {
    let harness = Harness::in_memory();
    harness.import(wide_graph("shop", 32)).await;
    let start = harness.router.graph("shop").await.unwrap().version;

    let handles: Vec<_> = (0..32)
        .map(|i| {
            let router = harness.router.clone();
            let msg = MessageBuilder::success("shop", &format!("w{}", i)).build();
            tokio::spawn(async move { router.route(&msg).await })
        })
        .collect();

    for result in join_all(handles).await {
        let outcome = result.unwrap().unwrap();
        assert!(outcome.transition.is_applied());
    }

    let graph = harness.router.graph("shop").await.unwrap();
    assert_eq!(progress(&graph).completed, 32);
    assert_eq!(graph.version, start + 32);
}

/// Test: Same guarantee on the file store
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_completions_on_disk() {
    let harness = Harness::on_disk();
    harness.import(wide_graph("shop", 12)).await;

    let routes = (0..12).map(|i| {
        let router = harness.router.clone();
        async move {
            let msg = MessageBuilder::success("shop", &format!("w{}", i)).build();
            router.route(&msg).await
        }
    });
    for result in join_all(routes).await {
        assert!(result.unwrap().transition.is_applied());
    }

    let graph = harness.reopen().graph("shop").await.unwrap();
    assert_eq!(progress(&graph).completed, 12);
}

/// Test: Products proceed independently
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_products() {
    let harness = Harness::in_memory();
    let products = ["shop", "blog", "crm", "wiki"];
    for product in products {
        harness.import(wide_graph(product, 8)).await;
    }

    let routes = products.iter().flat_map(|product| {
        (0..8).map(move |i| MessageBuilder::success(product, &format!("w{}", i)).build())
    });
    let results = join_all(routes.map(|msg| {
        let router = harness.router.clone();
        async move { router.route(&msg).await }
    }))
    .await;
    assert!(results.iter().all(|r| r.is_ok()));

    for product in products {
        let graph = harness.router.graph(product).await.unwrap();
        assert_eq!(progress(&graph).completed, 8, "product {}", product);
    }
}

/// Test: Concurrent duplicate failures count once
/// Given the same failure message delivered 10 times at once
/// Then retryCount is exactly one
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_redelivery_is_idempotent() {
    let harness = Harness::in_memory();
    harness.import(wide_graph("shop", 1)).await;
    let msg = MessageBuilder::failure("shop", "w0").build();

    let results = join_all((0..10).map(|_| {
        let router = harness.router.clone();
        let msg = msg.clone();
        async move { router.route(&msg).await }
    }))
    .await;

    let applied = results
        .iter()
        .filter(|r| matches!(r, Ok(o) if o.transition.is_applied()))
        .count();
    assert_eq!(applied, 1);
    assert!(results.iter().all(|r| matches!(
        r,
        Ok(o) if matches!(o.transition, TransitionOutcome::Applied { .. } | TransitionOutcome::AlreadyApplied { .. })
    )));

    let task = harness.task("shop", "w0").await;
    assert_eq!(task.status, TaskStatus::Failed);
    assert_eq!(task.retry_count, 1);
}

/// Test: Lock acquisition is bounded
#[tokio::test]
async fn test_lock_timeout_is_bounded() {
    let locks = KeyedLocks::new();
    let _held = locks.acquire("graph:shop", Duration::from_millis(10)).await.unwrap();

    let started = std::time::Instant::now();
    let err = locks
        .acquire("graph:shop", Duration::from_millis(30))
        .await
        .unwrap_err();
    assert!(matches!(err, Error::LockTimeout { .. }));
    assert!(err.is_retryable());
    assert!(started.elapsed() < Duration::from_secs(2));
}

/// Test: Routing succeeds under a short lock timeout when uncontended
#[tokio::test]
async fn test_short_timeout_uncontended() {
    let harness = Harness::with_lock_timeout(Duration::from_millis(50));
    harness.import(wide_graph("shop", 2)).await;
    let outcome = harness
        .router
        .route(&MessageBuilder::success("shop", "w0").build())
        .await
        .unwrap();
    assert!(outcome.transition.is_applied());
}
