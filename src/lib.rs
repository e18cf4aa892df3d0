pub mod config;
pub mod core;
pub mod error;
pub mod log;
pub mod message;
pub mod orchestration;
pub mod store;

pub use error::{Error, Result};
