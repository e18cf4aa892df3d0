//! Integration test suite for taskloom.
//!
//! These tests drive the public API end to end: graphs are imported
//! through the router, agent reports are routed against in-memory and
//! on-disk stores, and the driver loop is run against simulated agents.
//!
//! # Test Categories
//!
//! - `scheduling`: Ready sets, parallel groups, critical path, checkpoint gating
//! - `routing`: Message validation, task transitions, inboxes, durability
//! - `concurrency`: Concurrent routing against shared graphs
//! - `driver`: Dispatch loop with simulated agents
//! - `property`: Property-based checks of the scheduler and router


mod concurrency;
mod driver;
mod routing;
mod scheduling;
