//! Core domain models for task orchestration.
//!
//! This module contains the fundamental data structures shared by the
//! scheduler and the router: tasks, the product task graph, and the
//! coordination records (checkpoints, blockers, agent performance).

pub mod gate;
pub mod graph;
pub mod performance;
pub mod task;

pub use gate::{is_gated, BlockerRecord, Checkpoint};
pub use graph::{GraphIndex, TaskGraph};
pub use performance::{AgentPerformanceRecord, PerformanceEntry};
pub use task::{ArtifactRef, ConsumedArtifactRef, Priority, Task, TaskId, TaskResult, TaskStatus, Transition};
