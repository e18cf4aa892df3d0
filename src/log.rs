//! Structured logging for taskloom.
//!
//! Log levels:
//! - ERROR: Failures that abort a command
//! - WARN: Refused graphs, lock timeouts, auxiliary store failures
//! - INFO: Routed messages, task transitions, dispatched batches
//! - DEBUG: Store and lock traces
//! - TRACE: Scheduler ready sets and parallel grouping
//!
//! Priority for determining the filter:
//! 1. `--debug` flag
//! 2. `TASKLOOM_LOG` environment variable (an `EnvFilter` directive, e.g. "taskloom=debug")
//! 3. `TASKLOOM_DEBUG=1`
//! 4. default to `info`
//!
//! Output goes to stderr so command output on stdout stays machine-readable.

use tracing_subscriber::{fmt, EnvFilter};

pub const LOG_ENV: &str = "TASKLOOM_LOG";
pub const DEBUG_ENV: &str = "TASKLOOM_DEBUG";

/// Install the global subscriber. Later calls are no-ops.
pub fn init(debug: bool) {
    let filter = resolve_filter(
        debug,
        std::env::var(LOG_ENV).ok(),
        std::env::var(DEBUG_ENV).ok(),
    );

    let _ = fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(true)
        .with_thread_ids(false)
        .try_init();
}

fn resolve_filter(debug: bool, log_env: Option<String>, debug_env: Option<String>) -> EnvFilter {
    if debug {
        return EnvFilter::new("debug");
    }
    if let Some(directive) = log_env.filter(|s| !s.trim().is_empty()) {
        if let Ok(filter) = EnvFilter::try_new(directive.trim()) {
            return filter;
        }
    }
    if debug_env.is_some_and(|v| v == "1" || v.eq_ignore_ascii_case("true")) {
        return EnvFilter::new("debug");
    }
    EnvFilter::new("info")
}
