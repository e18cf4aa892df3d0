//! Structural validation of agent messages.
//!
//! Errors make a message unroutable. Warnings flag legal but suspicious
//! combinations and are passed back to the sender alongside the route
//! result. Validation never touches any store.

use regex::Regex;
use serde::Serialize;
use std::sync::LazyLock;

use super::types::{AgentMessage, MessageType, PayloadStatus};

/// ISO-8601 date-time: `YYYY-MM-DDTHH:MM:SS`, optional fraction, optional offset.
static TIMESTAMP_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^\d{4}-\d{2}-\d{2}T\d{2}:\d{2}:\d{2}(\.\d+)?(Z|[+-]\d{2}:?\d{2})?$")
        .expect("valid regex")
});

/// Result of validating a message.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct MessageValidation {
    pub valid: bool,
    pub errors: Vec<String>,
    pub warnings: Vec<String>,
}

/// Check a message for required fields and suspicious combinations.
pub fn validate_message(message: &AgentMessage) -> MessageValidation {
    let mut errors = Vec::new();
    let mut warnings = Vec::new();
    let meta = &message.metadata;
    let payload = &message.payload;

    if meta.from.trim().is_empty() {
        errors.push("metadata.from is required".to_string());
    }
    if meta.to.trim().is_empty() {
        errors.push("metadata.to is required".to_string());
    }
    if meta.timestamp.trim().is_empty() {
        errors.push("metadata.timestamp is required".to_string());
    } else if !TIMESTAMP_RE.is_match(&meta.timestamp) {
        errors.push(format!(
            "metadata.timestamp must be an ISO-8601 date-time, got {:?}",
            meta.timestamp
        ));
    }
    if meta.message_type.is_none() {
        errors.push("metadata.messageType is required".to_string());
    }

    if payload.status.is_none() {
        errors.push("payload.status is required".to_string());
    }
    if payload.summary.trim().is_empty() {
        errors.push("payload.summary is required".to_string());
    }

    for (i, artifact) in message.artifacts().iter().enumerate() {
        if artifact.path.trim().is_empty() {
            errors.push(format!("payload.artifacts[{}].path is required", i));
        }
        if artifact.kind.trim().is_empty() {
            errors.push(format!("payload.artifacts[{}].type is required", i));
        }
    }

    match payload.status {
        Some(PayloadStatus::Success) if message.artifacts().is_empty() => {
            warnings.push("success reported without artifacts".to_string());
        }
        Some(PayloadStatus::Failure) if message.error_details.is_none() => {
            warnings.push("failure reported without errorDetails".to_string());
        }
        _ => {}
    }
    if meta.message_type == Some(MessageType::Handoff) && message.handoff.is_none() {
        warnings.push("handoff message without a handoff block".to_string());
    }

    MessageValidation {
        valid: errors.is_empty(),
        errors,
        warnings,
    }
}
