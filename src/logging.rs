//! Logging initialisation.
//!
//! Thin wrapper over `tracing-subscriber`; honours `RUST_LOG` and falls back
//! to the given default directive. Plugin script log lines are re-emitted
//! through `tracing` by the host API layer, tagged with `scope/id`.

use tracing_subscriber::{fmt, EnvFilter};

/// Initialise the global tracing subscriber.
///
/// Safe to call more than once; subsequent calls are no-ops.
pub fn init(default_directive: &str) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_directive));

    let _ = fmt()
        .with_env_filter(filter)
        .with_target(true)
        .try_init();
}
