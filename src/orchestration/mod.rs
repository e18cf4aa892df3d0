//! Coordination layer: pure scheduling over task graphs, the message
//! router that mutates them, and the driver loop that hands ready work to
//! agents.

mod driver;
mod router;
mod scheduler;

pub use driver::{ChannelDispatcher, Dispatch, Dispatcher, DriveSummary, Driver, RoundReport, StopReason};
pub use router::{
    Delivery, IngestResponse, RouteOutcome, Router, RouterEvent, RouterOptions, TransitionOutcome,
};
pub use scheduler::{
    critical_path, parallel_groups, progress, ready_tasks, sequential_tasks, topological_order,
    validate, CriticalPath, GraphError, GraphProgress, GraphValidation,
};
