use tracing_subscriber::{fmt, EnvFilter};

/// Environment variable holding the log filter, e.g. `RWIRE_LOG=rwire_server=debug`.
pub const LOG_ENV: &str = "RWIRE_LOG";

fn env_filter() -> EnvFilter {
    EnvFilter::try_from_env(LOG_ENV).unwrap_or_else(|_| EnvFilter::new("info"))
}

/// Logging for tests: output goes through the libtest capture and repeated
/// calls from several tests in one binary are ignored.
pub fn init_test_logging() {
    let _ = fmt()
        .with_env_filter(env_filter())
        .with_target(true)
        .with_test_writer()
        .try_init();
}
