//! Tracing/logging initialization.
//!
//! JSON output by default; set `LOG_FORMAT=pretty` for human-readable local
//! logs. Filtering comes from `RUST_LOG`, defaulting to `info` with sqlx
//! query noise turned down.

use tracing_subscriber::EnvFilter;

fn default_filter() -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info,sqlx::query=warn"))
}

/// Initialize tracing/logging for the process.
///
/// Safe to call multiple times (subsequent calls are no-ops).
pub fn init() {
    let pretty = std::env::var("LOG_FORMAT").is_ok_and(|v| v.eq_ignore_ascii_case("pretty"));

    if pretty {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(default_filter())
            .with_target(false)
            .try_init();
    } else {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(default_filter())
            .json()
            .with_timer(tracing_subscriber::fmt::time::SystemTime)
            .with_target(false)
            .try_init();
    }
}
