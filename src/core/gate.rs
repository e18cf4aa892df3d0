//! Human-facing coordination records: checkpoints and blockers.
//!
//! Both are created by the router and cleared only by an outside decision
//! process. An unresolved checkpoint gates scheduling for its whole product;
//! a blocker is informational.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::core::TaskId;
use crate::message::{AgentMessage, Blocker, MessageKey};

/// Durable snapshot of a `checkpoint_ready` message awaiting approval.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Checkpoint {
    pub id: Uuid,
    pub product: String,
    pub message_key: MessageKey,
    pub message: AgentMessage,
    pub created_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resolved_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resolution: Option<String>,
}

impl Checkpoint {
    pub fn from_message(product: &str, message: &AgentMessage) -> Self {
        Self {
            id: Uuid::new_v4(),
            product: product.to_string(),
            message_key: message.key(),
            message: message.clone(),
            created_at: Utc::now(),
            resolved_at: None,
            resolution: None,
        }
    }

    pub fn is_resolved(&self) -> bool {
        self.resolved_at.is_some()
    }

    pub fn resolve(&mut self, resolution: &str) {
        self.resolved_at = Some(Utc::now());
        self.resolution = Some(resolution.to_string());
    }
}

/// Whether any checkpoint for `product` is still waiting on a decision.
pub fn is_gated(product: &str, checkpoints: &[Checkpoint]) -> bool {
    checkpoints
        .iter()
        .any(|c| c.product == product && !c.is_resolved())
}

/// A blocker reported by an agent, as recorded for the operator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BlockerRecord {
    pub id: Uuid,
    pub product: String,
    pub reported_by: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub task_id: Option<TaskId>,
    pub message_key: MessageKey,
    pub blocker: Blocker,
    pub created_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resolved_at: Option<DateTime<Utc>>,
}

impl BlockerRecord {
    pub fn new(product: &str, message: &AgentMessage, blocker: Blocker) -> Self {
        Self {
            id: Uuid::new_v4(),
            product: product.to_string(),
            reported_by: message.metadata.from.clone(),
            task_id: message.metadata.task_id.clone(),
            message_key: message.key(),
            blocker,
            created_at: Utc::now(),
            resolved_at: None,
        }
    }

    pub fn is_resolved(&self) -> bool {
        self.resolved_at.is_some()
    }
}
