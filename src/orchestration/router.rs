//! Message validation and routing.
//!
//! The router is the single writer of orchestration state. Every accepted
//! message is appended to the message log before anything else happens,
//! then its effects are applied:
//!
//! ```text
//! to == orchestrator                      to == <agent>
//! ┌──────────────────────────────┐        ┌──────────────────┐
//! │ task transition  [graph:<p>] │        │ inbox  [inbox:<a>]│
//! │ performance      [perf:<a>]  │        └──────────────────┘
//! │ checkpoint       [ckpt:<p>]  │
//! │ blockers         [blkr:<p>]  │
//! └──────────────────────────────┘
//! ```
//!
//! Each bracketed key is a separate [`KeyedLocks`] entry, so reports for
//! different products proceed in parallel while read-modify-write cycles on
//! the same graph never interleave. The task transition is the only step
//! whose failure is returned to the caller; the auxiliary steps after it are
//! best-effort and reported in [`RouteOutcome::aux_failures`].

use serde::Serialize;
use std::time::Duration;
use tokio::sync::broadcast;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::config::Config;
use crate::core::{
    AgentPerformanceRecord, BlockerRecord, Checkpoint, PerformanceEntry, TaskGraph, TaskId,
    TaskStatus, Transition,
};
use crate::error::{Error, Result};
use crate::message::{validate_message, AgentMessage, MessageKey, MessageType, PayloadStatus};
use crate::orchestration::scheduler::{validate, GraphError};
use crate::store::{KeyedLocks, Stores};

/// Tunables for a [`Router`].
#[derive(Debug, Clone)]
pub struct RouterOptions {
    /// `metadata.to` value that addresses the orchestration core.
    pub orchestrator: String,
    pub lock_timeout: Duration,
    pub event_capacity: usize,
}

impl Default for RouterOptions {
    fn default() -> Self {
        Self::from_config(&Config::default())
    }
}

impl RouterOptions {
    pub fn from_config(config: &Config) -> Self {
        Self {
            orchestrator: config.orchestrator_name.clone(),
            lock_timeout: config.lock_timeout(),
            event_capacity: config.event_capacity,
        }
    }
}

/// Notifications published after state changes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RouterEvent {
    GraphUpdated { product: String, version: u64 },
    CheckpointArmed { product: String, id: Uuid },
    CheckpointResolved { product: String, id: Uuid },
    BlockerRecorded { product: String, id: Uuid },
    HandoffQueued { agent: String, key: MessageKey },
}

impl RouterEvent {
    /// Product the event concerns, if any.
    pub fn product(&self) -> Option<&str> {
        match self {
            RouterEvent::GraphUpdated { product, .. }
            | RouterEvent::CheckpointArmed { product, .. }
            | RouterEvent::CheckpointResolved { product, .. }
            | RouterEvent::BlockerRecorded { product, .. } => Some(product),
            RouterEvent::HandoffQueued { .. } => None,
        }
    }
}

/// What happened to the task a message (or operator call) targeted.
///
/// Absence of the graph or task is an expected condition during bootstrap
/// and is reported here instead of as an error.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum TransitionOutcome {
    Applied { task_id: TaskId, status: TaskStatus },
    /// The task was already in the state the report asks for.
    AlreadyApplied { task_id: TaskId, status: TaskStatus },
    /// The payload status does not map to a task transition.
    NoTransition,
    /// The message carries no product and task id, or is not for the orchestrator.
    NotTargeted,
    GraphNotFound { product: String },
    TaskNotFound { product: String, task_id: TaskId },
    /// The stored graph failed validation; nothing was changed.
    Refused { errors: Vec<GraphError> },
}

impl TransitionOutcome {
    pub fn is_applied(&self) -> bool {
        matches!(self, TransitionOutcome::Applied { .. })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "to", rename_all = "snake_case")]
pub enum Delivery {
    Orchestrator,
    Inbox { agent: String, queued: bool },
}

/// Summary of one [`Router::route`] call.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RouteOutcome {
    pub key: MessageKey,
    /// The message log already held this key.
    pub duplicate: bool,
    pub delivery: Delivery,
    pub transition: TransitionOutcome,
    pub warnings: Vec<String>,
    pub aux_failures: Vec<String>,
}

/// Response to a raw ingestion request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct IngestResponse {
    pub success: bool,
    pub errors: Vec<String>,
    pub warnings: Vec<String>,
}

pub struct Router {
    stores: Stores,
    options: RouterOptions,
    graph_locks: KeyedLocks,
    aux_locks: KeyedLocks,
    events: broadcast::Sender<RouterEvent>,
}

impl Router {
    pub fn new(stores: Stores, options: RouterOptions) -> Self {
        let (events, _) = broadcast::channel(options.event_capacity.max(1));
        Self {
            stores,
            options,
            graph_locks: KeyedLocks::new(),
            aux_locks: KeyedLocks::new(),
            events,
        }
    }

    pub fn from_config(config: &Config) -> Result<Self> {
        Ok(Self::new(
            Stores::from_config(config)?,
            RouterOptions::from_config(config),
        ))
    }

    pub fn stores(&self) -> &Stores {
        &self.stores
    }

    pub fn options(&self) -> &RouterOptions {
        &self.options
    }

    pub fn subscribe(&self) -> broadcast::Receiver<RouterEvent> {
        self.events.subscribe()
    }

    fn emit(&self, event: RouterEvent) {
        debug!(?event, "router event");
        // No subscribers is fine.
        let _ = self.events.send(event);
    }

    /// Validate, record and apply an agent message.
    ///
    /// Fails with [`Error::InvalidMessage`] before any side effect when the
    /// message is malformed, and with [`Error::LockTimeout`] when the graph
    /// lock cannot be taken in time. Re-delivering the same message is safe.
    pub async fn route(&self, message: &AgentMessage) -> Result<RouteOutcome> {
        let report = validate_message(message);
        if !report.valid {
            warn!(from = %message.metadata.from, errors = ?report.errors, "rejected invalid message");
            return Err(Error::InvalidMessage(report.errors));
        }

        let key = message.key();
        let fresh = self.stores.messages.append(&key, message).await?;
        if !fresh {
            debug!(key = %key, "message already recorded, re-applying effects");
        }

        let mut outcome = RouteOutcome {
            key: key.clone(),
            duplicate: !fresh,
            delivery: Delivery::Orchestrator,
            transition: TransitionOutcome::NotTargeted,
            warnings: report.warnings,
            aux_failures: Vec::new(),
        };

        let to = message.metadata.to.as_str();
        if to != self.options.orchestrator {
            let queued = self.deliver(to, &key, message).await?;
            outcome.delivery = Delivery::Inbox {
                agent: to.to_string(),
                queued,
            };
            info!(key = %key, to, queued, "message delivered to agent inbox");
            return Ok(outcome);
        }

        outcome.transition = self.apply_report(message).await?;

        if let Err(e) = self.record_performance(message).await {
            warn!(agent = %message.metadata.from, error = %e, "performance update failed");
            outcome.aux_failures.push(format!("performance: {}", e));
        }

        if message.message_type() == Some(MessageType::CheckpointReady) {
            if let Err(e) = self.record_checkpoint(message).await {
                warn!(key = %key, error = %e, "checkpoint record failed");
                outcome.aux_failures.push(format!("checkpoint: {}", e));
            }
        }

        if !message.blockers().is_empty() {
            if let Err(e) = self.record_blockers(message).await {
                warn!(key = %key, error = %e, "blocker record failed");
                outcome.aux_failures.push(format!("blockers: {}", e));
            }
        }

        info!(
            key = %key,
            from = %message.metadata.from,
            transition = ?outcome.transition,
            aux_failures = outcome.aux_failures.len(),
            "routed message"
        );
        Ok(outcome)
    }

    /// Parse and route a serialized message, answering validation problems
    /// as data.
    pub async fn ingest(&self, raw: &str) -> Result<IngestResponse> {
        let routed = match AgentMessage::parse(raw) {
            Ok(message) => self.route(&message).await,
            Err(e) => Err(e),
        };
        match routed {
            Ok(outcome) => Ok(IngestResponse {
                success: true,
                errors: Vec::new(),
                warnings: outcome.warnings,
            }),
            Err(Error::InvalidMessage(errors)) => Ok(IngestResponse {
                success: false,
                errors,
                warnings: Vec::new(),
            }),
            Err(e) => Err(e),
        }
    }

    /// Store a graph after checking it, replacing any previous version.
    pub async fn import_graph(&self, graph: TaskGraph) -> Result<()> {
        validate(&graph).into_result()?;
        let _guard = self
            .graph_locks
            .acquire(&graph_lock(&graph.product), self.options.lock_timeout)
            .await?;
        self.stores.graphs.save_graph(&graph).await?;
        info!(product = %graph.product, tasks = graph.len(), "imported task graph");
        self.emit(RouterEvent::GraphUpdated {
            product: graph.product.clone(),
            version: graph.version,
        });
        Ok(())
    }

    pub async fn graph(&self, product: &str) -> Result<TaskGraph> {
        self.stores
            .graphs
            .load_graph(product)
            .await?
            .ok_or_else(|| Error::GraphNotFound(product.to_string()))
    }

    /// Mark a dispatched task as in progress.
    pub async fn begin_task(&self, product: &str, task_id: &TaskId) -> Result<TransitionOutcome> {
        self.transition(product, task_id, |graph| graph.begin_task(task_id))
            .await
    }

    /// Return a started task to pending when its dispatch never happened.
    pub async fn release_task(&self, product: &str, task_id: &TaskId) -> Result<TransitionOutcome> {
        self.transition(product, task_id, |graph| graph.unbegin_task(task_id))
            .await
    }

    /// Return a failed task to pending for another attempt.
    pub async fn requeue_task(&self, product: &str, task_id: &TaskId) -> Result<TransitionOutcome> {
        self.transition(product, task_id, |graph| graph.requeue_task(task_id))
            .await
    }

    async fn apply_report(&self, message: &AgentMessage) -> Result<TransitionOutcome> {
        let (Some(product), Some(task_id)) = (&message.metadata.product, &message.metadata.task_id)
        else {
            return Ok(TransitionOutcome::NotTargeted);
        };

        match message.status() {
            Some(PayloadStatus::Success) => {
                let artifacts = message.artifacts().to_vec();
                let metrics = message.payload.metrics.clone();
                self.transition(product, task_id, |graph| {
                    graph.complete_task(task_id, artifacts, metrics)
                })
                .await
            }
            Some(PayloadStatus::Failure) => {
                let error = message.error_details.clone();
                let metrics = message.payload.metrics.clone();
                self.transition(product, task_id, |graph| {
                    graph.fail_task(task_id, error, metrics)
                })
                .await
            }
            _ => Ok(TransitionOutcome::NoTransition),
        }
    }

    /// Load, check, mutate and save one graph under its product lock.
    async fn transition<F>(&self, product: &str, task_id: &TaskId, apply: F) -> Result<TransitionOutcome>
    where
        F: FnOnce(&mut TaskGraph) -> Result<Transition>,
    {
        let _guard = self
            .graph_locks
            .acquire(&graph_lock(product), self.options.lock_timeout)
            .await?;

        let Some(mut graph) = self.stores.graphs.load_graph(product).await? else {
            warn!(product, task_id = %task_id, "no task graph for product");
            return Ok(TransitionOutcome::GraphNotFound {
                product: product.to_string(),
            });
        };

        let report = validate(&graph);
        if !report.valid {
            warn!(product, errors = report.errors.len(), "refusing to mutate invalid graph");
            return Ok(TransitionOutcome::Refused {
                errors: report.errors,
            });
        }

        let transition = match apply(&mut graph) {
            Ok(transition) => transition,
            Err(Error::TaskNotFound { product, task_id }) => {
                warn!(product = %product, task_id = %task_id, "task not in graph");
                return Ok(TransitionOutcome::TaskNotFound { product, task_id });
            }
            Err(e) => return Err(e),
        };

        let status = graph
            .get_task(task_id)
            .map(|t| t.status)
            .unwrap_or_default();

        match transition {
            Transition::Applied => {
                self.stores.graphs.save_graph(&graph).await?;
                info!(product, task_id = %task_id, %status, version = graph.version, "task transitioned");
                self.emit(RouterEvent::GraphUpdated {
                    product: product.to_string(),
                    version: graph.version,
                });
                Ok(TransitionOutcome::Applied {
                    task_id: task_id.clone(),
                    status,
                })
            }
            Transition::Unchanged => {
                debug!(product, task_id = %task_id, %status, "transition already applied");
                Ok(TransitionOutcome::AlreadyApplied {
                    task_id: task_id.clone(),
                    status,
                })
            }
        }
    }

    async fn record_performance(&self, message: &AgentMessage) -> Result<()> {
        let Some(entry) = PerformanceEntry::from_message(message) else {
            return Ok(());
        };
        let agent = message.metadata.from.as_str();
        let _guard = self
            .aux_locks
            .acquire(&format!("performance:{}", agent), self.options.lock_timeout)
            .await?;

        let mut record = self
            .stores
            .performance
            .load_performance(agent)
            .await?
            .unwrap_or_else(|| AgentPerformanceRecord::new(agent));
        if record.record(entry) {
            debug!(agent, success_rate = record.success_rate, "performance entry added");
        }
        self.stores.performance.save_performance(&record).await
    }

    async fn record_checkpoint(&self, message: &AgentMessage) -> Result<()> {
        let product = required_product(message)?;
        let _guard = self
            .aux_locks
            .acquire(&format!("checkpoints:{}", product), self.options.lock_timeout)
            .await?;

        let checkpoint = Checkpoint::from_message(product, message);
        if self.stores.checkpoints.record_checkpoint(&checkpoint).await? {
            info!(product, id = %checkpoint.id, "checkpoint armed, scheduling gated");
            self.emit(RouterEvent::CheckpointArmed {
                product: product.to_string(),
                id: checkpoint.id,
            });
        }
        Ok(())
    }

    async fn record_blockers(&self, message: &AgentMessage) -> Result<()> {
        let product = required_product(message)?;
        let _guard = self
            .aux_locks
            .acquire(&format!("blockers:{}", product), self.options.lock_timeout)
            .await?;

        for blocker in message.blockers() {
            let record = BlockerRecord::new(product, message, blocker.clone());
            if self.stores.blockers.record_blocker(&record).await? {
                info!(
                    product,
                    id = %record.id,
                    severity = ?blocker.severity,
                    "blocker recorded: {}",
                    blocker.description
                );
                self.emit(RouterEvent::BlockerRecorded {
                    product: product.to_string(),
                    id: record.id,
                });
            }
        }
        Ok(())
    }

    async fn deliver(&self, agent: &str, key: &MessageKey, message: &AgentMessage) -> Result<bool> {
        let _guard = self
            .aux_locks
            .acquire(&inbox_lock(agent), self.options.lock_timeout)
            .await?;
        let queued = self.stores.inboxes.deliver(agent, key, message).await?;
        if queued {
            self.emit(RouterEvent::HandoffQueued {
                agent: agent.to_string(),
                key: key.clone(),
            });
        }
        Ok(queued)
    }

    pub async fn checkpoints(&self, product: &str) -> Result<Vec<Checkpoint>> {
        self.stores.checkpoints.checkpoints(product).await
    }

    /// Clear a checkpoint gate. Resolving twice keeps the first resolution.
    pub async fn resolve_checkpoint(&self, product: &str, id: Uuid, resolution: &str) -> Result<Checkpoint> {
        let _guard = self
            .aux_locks
            .acquire(&format!("checkpoints:{}", product), self.options.lock_timeout)
            .await?;
        let checkpoint = self
            .stores
            .checkpoints
            .resolve_checkpoint(product, id, resolution)
            .await?;
        info!(product, id = %id, "checkpoint resolved");
        self.emit(RouterEvent::CheckpointResolved {
            product: product.to_string(),
            id,
        });
        Ok(checkpoint)
    }

    pub async fn blockers(&self, product: &str) -> Result<Vec<BlockerRecord>> {
        self.stores.blockers.blockers(product).await
    }

    pub async fn resolve_blocker(&self, product: &str, id: Uuid) -> Result<BlockerRecord> {
        let _guard = self
            .aux_locks
            .acquire(&format!("blockers:{}", product), self.options.lock_timeout)
            .await?;
        let blocker = self.stores.blockers.resolve_blocker(product, id).await?;
        info!(product, id = %id, "blocker resolved");
        Ok(blocker)
    }

    pub async fn performance(&self, agent: &str) -> Result<Option<AgentPerformanceRecord>> {
        self.stores.performance.load_performance(agent).await
    }

    pub async fn inbox(&self, agent: &str) -> Result<Vec<AgentMessage>> {
        self.stores.inboxes.inbox(agent).await
    }

    pub async fn take_inbox(&self, agent: &str) -> Result<Vec<AgentMessage>> {
        let _guard = self
            .aux_locks
            .acquire(&inbox_lock(agent), self.options.lock_timeout)
            .await?;
        self.stores.inboxes.take_inbox(agent).await
    }
}

impl std::fmt::Debug for Router {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Router")
            .field("options", &self.options)
            .field("graph_locks", &self.graph_locks)
            .finish_non_exhaustive()
    }
}

fn graph_lock(product: &str) -> String {
    format!("graph:{}", product)
}

fn inbox_lock(agent: &str) -> String {
    format!("inbox:{}", agent)
}

fn required_product(message: &AgentMessage) -> Result<&str> {
    message
        .metadata
        .product
        .as_deref()
        .ok_or_else(|| Error::Validation("metadata.product is required to record this message".into()))
}
