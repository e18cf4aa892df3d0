//! Per-agent performance history.
//!
//! Every orchestrator-bound report adds one entry to its sender's record.
//! Entries are keyed by message key, so a re-delivered message replaces its
//! earlier entry instead of being counted twice.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::core::TaskId;
use crate::message::{AgentMessage, MessageKey, MessageType, Metrics, PayloadStatus};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PerformanceEntry {
    pub message_key: MessageKey,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub product: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub task_id: Option<TaskId>,
    pub message_type: MessageType,
    pub status: PayloadStatus,
    pub summary: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metrics: Option<Metrics>,
    pub recorded_at: DateTime<Utc>,
}

impl PerformanceEntry {
    /// Build an entry from a validated message.
    ///
    /// Returns `None` when the message lacks a type or status, which
    /// validation rejects before routing ever gets here.
    pub fn from_message(message: &AgentMessage) -> Option<Self> {
        Some(Self {
            message_key: message.key(),
            product: message.metadata.product.clone(),
            task_id: message.metadata.task_id.clone(),
            message_type: message.metadata.message_type?,
            status: message.payload.status?,
            summary: message.payload.summary.clone(),
            metrics: message.payload.metrics.clone(),
            recorded_at: Utc::now(),
        })
    }
}

/// Append-only task history for one agent plus derived aggregates.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentPerformanceRecord {
    pub agent: String,
    #[serde(default)]
    pub history: Vec<PerformanceEntry>,
    /// Reports that finished a task, successfully or not.
    #[serde(default)]
    pub tasks_completed: u32,
    /// Successful share of `tasks_completed`, in `[0.0, 1.0]`.
    #[serde(default)]
    pub success_rate: f64,
    pub updated_at: DateTime<Utc>,
}

impl AgentPerformanceRecord {
    pub fn new(agent: &str) -> Self {
        Self {
            agent: agent.to_string(),
            history: Vec::new(),
            tasks_completed: 0,
            success_rate: 0.0,
            updated_at: Utc::now(),
        }
    }

    /// Append an entry, or replace the entry with the same message key.
    ///
    /// Returns `true` when the entry is new.
    pub fn record(&mut self, entry: PerformanceEntry) -> bool {
        let is_new = match self
            .history
            .iter_mut()
            .find(|e| e.message_key == entry.message_key)
        {
            Some(existing) => {
                *existing = entry;
                false
            }
            None => {
                self.history.push(entry);
                true
            }
        };
        self.recompute();
        is_new
    }

    fn recompute(&mut self) {
        let finished = self
            .history
            .iter()
            .filter(|e| matches!(e.status, PayloadStatus::Success | PayloadStatus::Failure))
            .count() as u32;
        let successes = self
            .history
            .iter()
            .filter(|e| e.status == PayloadStatus::Success)
            .count() as u32;

        self.tasks_completed = finished;
        self.success_rate = if finished == 0 {
            0.0
        } else {
            f64::from(successes) / f64::from(finished)
        };
        self.updated_at = Utc::now();
    }
}
