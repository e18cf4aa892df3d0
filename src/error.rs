use std::time::Duration;

use thiserror::Error;

use crate::core::TaskId;
use crate::orchestration::GraphError;

#[derive(Error, Debug)]
pub enum Error {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("TOML parse error: {0}")]
    TomlParse(#[from] toml::de::Error),

    #[error("TOML serialize error: {0}")]
    TomlSerialize(#[from] toml::ser::Error),

    #[error("No home directory")]
    NoHomeDir,

    #[error("Invalid message: {}", .0.join("; "))]
    InvalidMessage(Vec<String>),

    #[error("Task graph not found for product: {0}")]
    GraphNotFound(String),

    #[error("Task {task_id} not found in graph for product {product}")]
    TaskNotFound { product: String, task_id: TaskId },

    #[error("Cycle detected through tasks: {}", format_path(.0))]
    CycleDetected(Vec<TaskId>),

    #[error("Task graph is invalid: {}", format_graph_errors(.0))]
    InvalidGraph(Vec<GraphError>),

    #[error("Timed out after {timeout:?} waiting for lock on {key}")]
    LockTimeout { key: String, timeout: Duration },

    #[error("Checkpoint not found: {0}")]
    CheckpointNotFound(uuid::Uuid),

    #[error("Blocker not found: {0}")]
    BlockerNotFound(uuid::Uuid),

    #[error("Store error: {0}")]
    Store(String),

    #[error("Validation error: {0}")]
    Validation(String),
}

impl Error {
    /// Transient failures the caller may retry by re-delivering the message.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Error::LockTimeout { .. } | Error::Io(_) | Error::Store(_))
    }
}

fn format_path(path: &[TaskId]) -> String {
    path.iter()
        .map(|id| id.as_str())
        .collect::<Vec<_>>()
        .join(" -> ")
}

fn format_graph_errors(errors: &[GraphError]) -> String {
    errors
        .iter()
        .map(|e| e.to_string())
        .collect::<Vec<_>>()
        .join("; ")
}

pub type Result<T> = std::result::Result<T, Error>;
