//! Logging setup for binaries and tests.

/// What the `RUST_LOG` env-var resolves to if it isn't set.
fn default_log_filter() -> String {
    std::env::var("RUST_LOG").unwrap_or_else(|_| "info".to_owned())
}

/// Directs [`log`] calls to stderr.
///
/// Idempotent: binaries call it from `main`, every integration test calls it
/// first thing, and only the first call does anything.
pub fn setup_logging() {
    fn setup() {
        crate::multi_logger::init().expect("Failed to set logger");

        let log_filter = default_log_filter();

        if log_filter.contains("trace") {
            log::set_max_level(log::LevelFilter::Trace);
        } else if log_filter.contains("debug") {
            log::set_max_level(log::LevelFilter::Debug);
        } else {
            log::set_max_level(log::LevelFilter::Info);
        }

        let mut stderr_logger = env_logger::Builder::new();
        stderr_logger.parse_filters(&log_filter);
        crate::add_boxed_logger(Box::new(stderr_logger.build()));
    }

    use std::sync::Once;
    static START: Once = Once::new();
    START.call_once(setup);
}
