//! Tracing/logging setup shared by the consumer and API binaries.

use tracing_subscriber::EnvFilter;

/// Targets that flood logs at `info` during normal query execution.
const QUIET_TARGETS: [(&str, &str); 5] = [
    ("datafusion", "warn"),
    ("datafusion_optimizer", "warn"),
    ("sqlx", "warn"),
    ("hyper", "warn"),
    ("h2", "warn"),
];

/// Initialize process-wide observability (tracing/logging).
///
/// JSON logs with timestamps, configurable via `RUST_LOG`. Safe to call
/// multiple times; subsequent calls become no-ops.
pub fn init() {
    let mut filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    for (target, level) in QUIET_TARGETS {
        if let Ok(directive) = format!("{target}={level}").parse() {
            filter = filter.add_directive(directive);
        }
    }

    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .json()
        .with_timer(tracing_subscriber::fmt::time::SystemTime)
        .with_target(false)
        .try_init();
}
