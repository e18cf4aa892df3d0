//! Agent message model and validation.
//!
//! Agents report progress as [`AgentMessage`]s. The router validates each
//! one with [`validate_message`] before recording it or applying any effect.

mod types;
mod validate;

pub use types::{
    AgentMessage, Artifact, Blocker, ErrorDetails, Handoff, MessageKey, MessageMetadata,
    MessagePayload, MessageType, Metrics, PayloadStatus, Resolver, Severity,
};
pub use validate::{validate_message, MessageValidation};
