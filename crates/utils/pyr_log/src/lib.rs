//! Text logging for the pyrite crates.
//!
//! * `trace`: spammy internals (eviction passes, scheduler decisions)
//! * `debug`: things that might be useful when debugging
//! * `info`: things we want to show to users
//! * `warn`: problems we can recover from (a failed sub-BVH load)
//! * `error`: problems that lead to loss of functionality or data
//!
//! The `warn_once` etc macros are for when you want to suppress repeated
//! logging of the exact same message.

pub use log::{debug, error, info, trace, warn};
pub use log::{Level, LevelFilter};

pub use log_once::{debug_once, error_once, info_once, trace_once, warn_once};

mod multi_logger;

pub use multi_logger::{add_boxed_logger, add_logger};

#[cfg(feature = "setup")]
mod setup;

#[cfg(feature = "setup")]
pub use setup::setup_logging;

/// Format an error together with its chain of sources.
///
/// Always use this when logging an error.
pub fn format_error(error: &dyn std::error::Error) -> String {
    let mut string = error.to_string();
    for source in std::iter::successors(error.source(), |error| error.source()) {
        string.push_str(" -> ");
        string.push_str(&source.to_string());
    }
    string
}

pub trait ResultExt<T> {
    /// Log a warning if there is an `Err`, but only log the exact same message once.
    fn warn_on_err_once(self, msg: impl std::fmt::Display) -> Option<T>;
}

impl<T, E: std::fmt::Display> ResultExt<T> for Result<T, E> {
    fn warn_on_err_once(self, msg: impl std::fmt::Display) -> Option<T> {
        match self {
            Ok(value) => Some(value),
            Err(err) => {
                warn_once!("{msg}: {err}");
                None
            }
        }
    }
}
