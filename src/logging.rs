//! Diagnostic logging setup.
//!
//! Events go to stderr so command output on stdout stays pipeable.
//! `RUST_LOG` overrides the default `info` filter.

use tracing_subscriber::EnvFilter;

pub fn init() {
    init_with_default("info");
}

/// Install the global subscriber with `default_filter` when `RUST_LOG` is unset.
///
/// Calling this twice is harmless; the second install is ignored.
pub fn init_with_default(default_filter: &str) {
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));

    let _ = tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .try_init();
}
