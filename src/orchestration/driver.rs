//! Scheduling loop that hands ready work to an external dispatcher.
//!
//! Each round validates the stored graph, computes the ready set, marks
//! every dispatched task `in_progress` through the router and hands the
//! batches to the [`Dispatcher`]. Tasks in a batch the dispatcher rejects
//! go back to pending. Between rounds the driver sleeps until a
//! router event for its product arrives or the poll interval elapses.

use async_trait::async_trait;
use futures::future::join_all;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, mpsc};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::core::{is_gated, Task};
use crate::error::{Error, Result};
use crate::orchestration::router::{Router, RouterEvent, TransitionOutcome};
use crate::orchestration::scheduler::{
    parallel_groups, progress, ready_tasks, sequential_tasks, validate, GraphProgress,
};

/// A unit of work handed to the dispatcher.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Dispatch {
    /// Tasks with identical dependencies that may run concurrently.
    Parallel { tasks: Vec<Task> },
    Single { task: Task },
}

impl Dispatch {
    pub fn tasks(&self) -> &[Task] {
        match self {
            Dispatch::Parallel { tasks } => tasks,
            Dispatch::Single { task } => std::slice::from_ref(task),
        }
    }

    fn from_tasks(mut tasks: Vec<Task>) -> Option<Self> {
        match tasks.len() {
            0 => None,
            1 => tasks.pop().map(|task| Dispatch::Single { task }),
            _ => Some(Dispatch::Parallel { tasks }),
        }
    }
}

/// Starts agents for dispatched work. Results come back as agent messages
/// through [`Router::route`].
#[async_trait]
pub trait Dispatcher: Send + Sync {
    async fn dispatch(&self, product: &str, batch: Dispatch) -> Result<()>;
}

/// Dispatcher that forwards batches over a channel.
#[derive(Debug, Clone)]
pub struct ChannelDispatcher {
    tx: mpsc::UnboundedSender<(String, Dispatch)>,
}

impl ChannelDispatcher {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<(String, Dispatch)>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }
}

#[async_trait]
impl Dispatcher for ChannelDispatcher {
    async fn dispatch(&self, product: &str, batch: Dispatch) -> Result<()> {
        self.tx
            .send((product.to_string(), batch))
            .map_err(|_| Error::Store("dispatch channel closed".into()))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RoundReport {
    pub dispatched: Vec<Dispatch>,
    /// An unresolved checkpoint held scheduling back.
    pub gated: bool,
    pub progress: GraphProgress,
}

impl RoundReport {
    pub fn task_count(&self) -> usize {
        self.dispatched.iter().map(|d| d.tasks().len()).sum()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StopReason {
    /// Nothing is running and nothing else can start.
    Settled,
    Cancelled,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DriveSummary {
    pub rounds: usize,
    pub dispatched: usize,
    pub stop: StopReason,
    pub progress: GraphProgress,
}

pub struct Driver {
    router: Arc<Router>,
    dispatcher: Arc<dyn Dispatcher>,
    poll_interval: Duration,
}

impl Driver {
    pub fn new(router: Arc<Router>, dispatcher: Arc<dyn Dispatcher>, poll_interval: Duration) -> Self {
        Self {
            router,
            dispatcher,
            poll_interval,
        }
    }

    /// One scheduling pass. Fails with [`Error::InvalidGraph`] when the
    /// stored graph does not validate.
    pub async fn run_round(&self, product: &str) -> Result<RoundReport> {
        let graph = self.router.graph(product).await?;
        validate(&graph).into_result()?;

        let checkpoints = self.router.checkpoints(product).await?;
        let gated = is_gated(product, &checkpoints);
        let ready = ready_tasks(&graph, &checkpoints);

        let mut batches: Vec<Vec<Task>> = parallel_groups(&ready)
            .into_iter()
            .map(|group| group.into_iter().cloned().collect())
            .collect();
        batches.extend(sequential_tasks(&ready).into_iter().map(|t| vec![t.clone()]));

        let mut dispatched = Vec::new();
        for batch in batches {
            let mut started = Vec::with_capacity(batch.len());
            for task in batch {
                match self.router.begin_task(product, &task.id).await? {
                    TransitionOutcome::Applied { .. } => started.push(task),
                    other => debug!(product, task_id = %task.id, ?other, "task not started"),
                }
            }
            if let Some(dispatch) = Dispatch::from_tasks(started) {
                let ids: Vec<&str> = dispatch.tasks().iter().map(|t| t.id.as_str()).collect();
                info!(product, tasks = ?ids, "dispatching");
                dispatched.push(dispatch);
            }
        }
        let results = join_all(
            dispatched
                .iter()
                .map(|batch| self.dispatcher.dispatch(product, batch.clone())),
        )
        .await;

        let mut first_err = None;
        for (batch, result) in dispatched.iter().zip(results) {
            let Err(e) = result else { continue };
            warn!(product, error = %e, "dispatch failed, releasing batch");
            for task in batch.tasks() {
                self.router.release_task(product, &task.id).await?;
            }
            first_err.get_or_insert(e);
        }
        if let Some(e) = first_err {
            return Err(e);
        }

        let progress = progress(&self.router.graph(product).await?);
        if gated {
            debug!(product, "scheduling gated by checkpoint");
        }
        Ok(RoundReport {
            dispatched,
            gated,
            progress,
        })
    }

    /// Run rounds until the graph settles or `cancel` fires.
    pub async fn run(&self, product: &str, cancel: CancellationToken) -> Result<DriveSummary> {
        let mut events = self.router.subscribe();
        let mut rounds = 0;
        let mut dispatched = 0;

        loop {
            if cancel.is_cancelled() {
                let progress = progress(&self.router.graph(product).await?);
                return Ok(stop(rounds, dispatched, StopReason::Cancelled, progress));
            }

            let report = self.run_round(product).await?;
            rounds += 1;
            dispatched += report.task_count();

            if report.dispatched.is_empty() && report.progress.is_settled() {
                info!(
                    product,
                    rounds,
                    completed = report.progress.completed,
                    failed = report.progress.failed,
                    "graph settled"
                );
                return Ok(stop(rounds, dispatched, StopReason::Settled, report.progress));
            }

            tokio::select! {
                _ = cancel.cancelled() => {
                    info!(product, rounds, "driver cancelled");
                    return Ok(stop(rounds, dispatched, StopReason::Cancelled, report.progress));
                }
                _ = next_event(&mut events, product) => {}
                _ = tokio::time::sleep(self.poll_interval) => {}
            }
        }
    }
}

impl std::fmt::Debug for Driver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Driver")
            .field("poll_interval", &self.poll_interval)
            .finish_non_exhaustive()
    }
}

fn stop(rounds: usize, dispatched: usize, stop: StopReason, progress: GraphProgress) -> DriveSummary {
    DriveSummary {
        rounds,
        dispatched,
        stop,
        progress,
    }
}

/// Wait for an event concerning `product`.
async fn next_event(events: &mut broadcast::Receiver<RouterEvent>, product: &str) {
    loop {
        match events.recv().await {
            Ok(event) if event.product() == Some(product) => return,
            Ok(_) => continue,
            Err(broadcast::error::RecvError::Lagged(skipped)) => {
                warn!(skipped, "driver lagged behind router events");
                return;
            }
            Err(broadcast::error::RecvError::Closed) => std::future::pending::<()>().await,
        }
    }
}
