//! Task data model for the product task graph.
//!
//! Tasks are the atomic units of work handed to agents. Each task tracks
//! its dependencies, the artifacts it produces and consumes, its lifecycle
//! status, and the result reported back by the agent that ran it.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

use crate::message::{Artifact, ErrorDetails, Metrics};

/// Identifier for a task, unique within its graph.
///
/// Ids are authored alongside the graph (e.g. `"design-schema"`), so they
/// are kept as plain strings rather than generated.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TaskId(pub String);

impl TaskId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for TaskId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for TaskId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl std::fmt::Display for TaskId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl std::str::FromStr for TaskId {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        Ok(Self(s.to_string()))
    }
}

/// Task status in its lifecycle.
///
/// `pending -> ready -> in_progress -> {completed | failed | blocked}`.
/// `Ready` is derived by the scheduler and never persisted; a stored graph
/// carrying it fails validation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    /// Task authored but not yet dispatched.
    #[default]
    Pending,
    /// Dependencies satisfied (computed, not stored).
    Ready,
    /// Dispatched to an agent.
    InProgress,
    /// Agent reported success.
    Completed,
    /// Agent reported failure.
    Failed,
    /// Task cannot proceed without outside help.
    Blocked,
}

impl TaskStatus {
    /// Completed and failed tasks are terminal until an external retry
    /// policy requeues a failure.
    pub fn is_terminal(&self) -> bool {
        matches!(self, TaskStatus::Completed | TaskStatus::Failed)
    }
}

impl std::fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TaskStatus::Pending => write!(f, "pending"),
            TaskStatus::Ready => write!(f, "ready"),
            TaskStatus::InProgress => write!(f, "in_progress"),
            TaskStatus::Completed => write!(f, "completed"),
            TaskStatus::Failed => write!(f, "failed"),
            TaskStatus::Blocked => write!(f, "blocked"),
        }
    }
}

/// Scheduling priority hint carried by the task author.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum Priority {
    Critical,
    High,
    #[default]
    Medium,
    Low,
}

/// An artifact a task promises to produce.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ArtifactRef {
    pub name: String,
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

impl ArtifactRef {
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            kind: None,
            description: None,
        }
    }
}

/// An artifact a task needs from another task in the same graph.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConsumedArtifactRef {
    pub artifact: String,
    pub required_from_task: TaskId,
}

/// What the agent reported when the task finished.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskResult {
    #[serde(default)]
    pub artifacts: Vec<Artifact>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metrics: Option<Metrics>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorDetails>,
}

/// Whether a lifecycle operation changed the task.
///
/// Status transitions are monotonic, so re-delivering a report for a task
/// that already reached the reported state yields `Unchanged`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    Applied,
    Unchanged,
}

/// A single task in the product graph.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Task {
    pub id: TaskId,
    pub name: String,
    #[serde(default)]
    pub description: String,
    /// Capability or owner tag of the agent expected to run the task.
    pub agent: String,
    #[serde(default)]
    pub depends_on: BTreeSet<TaskId>,
    #[serde(default)]
    pub produces: Vec<ArtifactRef>,
    #[serde(default)]
    pub consumes: Vec<ConsumedArtifactRef>,
    #[serde(default)]
    pub parallel_ok: bool,
    /// Completion of this task warrants a human review gate.
    #[serde(default)]
    pub checkpoint: bool,
    #[serde(default)]
    pub priority: Priority,
    #[serde(default)]
    pub estimated_duration_minutes: u64,
    #[serde(default)]
    pub status: TaskStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub retry_count: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<TaskResult>,
}

impl Task {
    /// Create a pending task with no dependencies or artifacts.
    pub fn new(id: impl Into<TaskId>, name: &str, agent: &str) -> Self {
        Self {
            id: id.into(),
            name: name.to_string(),
            description: String::new(),
            agent: agent.to_string(),
            depends_on: BTreeSet::new(),
            produces: Vec::new(),
            consumes: Vec::new(),
            parallel_ok: false,
            checkpoint: false,
            priority: Priority::default(),
            estimated_duration_minutes: 0,
            status: TaskStatus::Pending,
            started_at: None,
            completed_at: None,
            retry_count: 0,
            result: None,
        }
    }

    pub fn depends_on(mut self, id: impl Into<TaskId>) -> Self {
        self.depends_on.insert(id.into());
        self
    }

    pub fn with_duration(mut self, minutes: u64) -> Self {
        self.estimated_duration_minutes = minutes;
        self
    }

    pub fn with_priority(mut self, priority: Priority) -> Self {
        self.priority = priority;
        self
    }

    pub fn parallel(mut self) -> Self {
        self.parallel_ok = true;
        self
    }

    pub fn producing(mut self, artifact: &str) -> Self {
        self.produces.push(ArtifactRef::named(artifact));
        self
    }

    pub fn consuming(mut self, from: impl Into<TaskId>, artifact: &str) -> Self {
        self.consumes.push(ConsumedArtifactRef {
            artifact: artifact.to_string(),
            required_from_task: from.into(),
        });
        self
    }

    /// Whether the task promises an artifact with this name.
    pub fn produces_artifact(&self, name: &str) -> bool {
        self.produces.iter().any(|a| a.name == name)
    }

    /// Dispatch the task: pending becomes in_progress.
    pub(crate) fn begin(&mut self) -> Transition {
        if self.status != TaskStatus::Pending {
            return Transition::Unchanged;
        }
        self.status = TaskStatus::InProgress;
        self.started_at = Some(Utc::now());
        Transition::Applied
    }

    /// Undo [`Task::begin`] for work that never reached an agent.
    pub(crate) fn unbegin(&mut self) -> Transition {
        if self.status != TaskStatus::InProgress {
            return Transition::Unchanged;
        }
        self.status = TaskStatus::Pending;
        self.started_at = None;
        Transition::Applied
    }

    /// Record a successful report and its produced artifacts.
    pub(crate) fn complete(&mut self, artifacts: Vec<Artifact>, metrics: Option<Metrics>) -> Transition {
        if self.status == TaskStatus::Completed {
            return Transition::Unchanged;
        }
        self.status = TaskStatus::Completed;
        self.completed_at = Some(Utc::now());
        self.result = Some(TaskResult {
            artifacts,
            metrics,
            error: None,
        });
        Transition::Applied
    }

    /// Record a failure report, counting it against the retry budget.
    ///
    /// A completed task is never downgraded, and a task that is already
    /// failed does not count the same failure twice.
    pub(crate) fn fail(&mut self, error: Option<ErrorDetails>, metrics: Option<Metrics>) -> Transition {
        if self.status.is_terminal() {
            return Transition::Unchanged;
        }
        self.status = TaskStatus::Failed;
        self.retry_count += 1;
        self.completed_at = Some(Utc::now());
        self.result = Some(TaskResult {
            artifacts: Vec::new(),
            metrics,
            error,
        });
        Transition::Applied
    }

    /// Put a failed task back in the queue for another attempt.
    pub(crate) fn requeue(&mut self) -> Transition {
        if self.status != TaskStatus::Failed {
            return Transition::Unchanged;
        }
        self.status = TaskStatus::Pending;
        self.started_at = None;
        self.completed_at = None;
        Transition::Applied
    }

    pub fn is_finished(&self) -> bool {
        self.status.is_terminal()
    }
}
