//! Tracing subscriber setup.
//!
//! Diagnostics are emitted with `tracing` macros and structured fields
//! (`id = %id`, `msg_type = %t`). The binary installs one of the subscribers
//! below at startup; library code never installs a subscriber itself.
//!
//! [`capture_logs`] installs a thread-local capturing subscriber for tests.

pub mod capture;

pub use capture::{CapturedEvent, CapturedLogs, capture_logs};

use tracing_subscriber::EnvFilter;

fn filter(level: &str) -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level))
}

/// Install the global subscriber with compact human-readable output on stderr.
///
/// `RUST_LOG` takes precedence over `level`. Subsequent calls are no-ops.
pub fn init_subscriber(level: &str) {
    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(filter(level))
        .with_target(true)
        .with_thread_names(true)
        .with_writer(std::io::stderr)
        .compact();

    // set_global_default is a no-op if already set
    let _ = subscriber.try_init();
}

/// Install the global subscriber with one JSON object per event on stderr.
pub fn init_json_subscriber(level: &str) {
    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(filter(level))
        .with_target(true)
        .with_thread_names(true)
        .with_writer(std::io::stderr)
        .json();

    let _ = subscriber.try_init();
}
