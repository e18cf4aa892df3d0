//! Agent message wire types.
//!
//! Messages are authored by agents and never mutated once received. Fields
//! that validation must be able to report as missing are defaulted rather
//! than required at deserialization time.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::core::TaskId;
use crate::error::{Error, Result};

/// What kind of report an agent is sending.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageType {
    TaskComplete,
    TaskFailed,
    NeedsInput,
    NeedsDecision,
    Error,
    CheckpointReady,
    Handoff,
    StatusUpdate,
}

impl MessageType {
    pub fn as_str(&self) -> &'static str {
        match self {
            MessageType::TaskComplete => "task_complete",
            MessageType::TaskFailed => "task_failed",
            MessageType::NeedsInput => "needs_input",
            MessageType::NeedsDecision => "needs_decision",
            MessageType::Error => "error",
            MessageType::CheckpointReady => "checkpoint_ready",
            MessageType::Handoff => "handoff",
            MessageType::StatusUpdate => "status_update",
        }
    }
}

impl std::fmt::Display for MessageType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Outcome the agent reports for its work.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PayloadStatus {
    Success,
    Failure,
    Blocked,
    InProgress,
    NeedsReview,
}

impl std::fmt::Display for PayloadStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PayloadStatus::Success => write!(f, "success"),
            PayloadStatus::Failure => write!(f, "failure"),
            PayloadStatus::Blocked => write!(f, "blocked"),
            PayloadStatus::InProgress => write!(f, "in_progress"),
            PayloadStatus::NeedsReview => write!(f, "needs_review"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Critical,
    High,
    Medium,
    Low,
}

/// Who has to act for a blocker to clear.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Resolver {
    CeoDecision,
    OtherAgent,
    External,
    Investigation,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Blocker {
    pub description: String,
    pub severity: Severity,
    pub requires: Resolver,
}

/// A file, pull request or document produced by an agent.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Artifact {
    #[serde(default)]
    pub path: String,
    #[serde(rename = "type", default)]
    pub kind: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

/// Free-form numeric and textual measurements reported with a message.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Metrics {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration_minutes: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tokens_used: Option<u64>,
    #[serde(flatten)]
    pub extra: BTreeMap<String, serde_json::Value>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageMetadata {
    #[serde(default)]
    pub from: String,
    #[serde(default)]
    pub to: String,
    /// Kept as authored; validation checks its shape.
    #[serde(default)]
    pub timestamp: String,
    #[serde(default)]
    pub message_type: Option<MessageType>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub product: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub task_id: Option<TaskId>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessagePayload {
    #[serde(default)]
    pub status: Option<PayloadStatus>,
    #[serde(default)]
    pub summary: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub artifacts: Option<Vec<Artifact>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub context: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub blockers: Option<Vec<Blocker>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metrics: Option<Metrics>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Handoff {
    pub next_agent: String,
    #[serde(default)]
    pub required_context: Vec<String>,
    #[serde(default)]
    pub suggested_task: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorDetails {
    #[serde(default)]
    pub error_type: String,
    #[serde(default)]
    pub error_message: String,
    #[serde(default)]
    pub attempted_solutions: Vec<String>,
    #[serde(default)]
    pub retry_count: u32,
}

/// A structured progress report from an agent.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentMessage {
    #[serde(default)]
    pub metadata: MessageMetadata,
    #[serde(default)]
    pub payload: MessagePayload,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub handoff: Option<Handoff>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_details: Option<ErrorDetails>,
}

impl AgentMessage {
    /// Parse a serialized message.
    ///
    /// Malformed JSON and unknown enum values are reported as
    /// `InvalidMessage` so ingestion answers with a validation error list.
    pub fn parse(raw: &str) -> Result<Self> {
        serde_json::from_str(raw).map_err(|e| Error::InvalidMessage(vec![e.to_string()]))
    }

    /// Durable log key: timestamp, sender and message type.
    pub fn key(&self) -> MessageKey {
        MessageKey::new(
            &self.metadata.timestamp,
            &self.metadata.from,
            self.metadata
                .message_type
                .map(|t| t.as_str())
                .unwrap_or("unknown"),
        )
    }

    pub fn message_type(&self) -> Option<MessageType> {
        self.metadata.message_type
    }

    pub fn status(&self) -> Option<PayloadStatus> {
        self.payload.status
    }

    pub fn artifacts(&self) -> &[Artifact] {
        self.payload.artifacts.as_deref().unwrap_or(&[])
    }

    pub fn blockers(&self) -> &[Blocker] {
        self.payload.blockers.as_deref().unwrap_or(&[])
    }
}

/// Append-only key of a received message.
///
/// Characters outside `[A-Za-z0-9._-]` are replaced so the key is safe to
/// use as a file name.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MessageKey(String);

impl MessageKey {
    pub fn new(timestamp: &str, from: &str, message_type: &str) -> Self {
        let raw = format!("{}_{}_{}", timestamp, from, message_type);
        let safe = raw
            .chars()
            .map(|c| {
                if c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-') {
                    c
                } else {
                    '-'
                }
            })
            .collect();
        Self(safe)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for MessageKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}
