use std::sync::atomic::{AtomicU64, Ordering};

/// Scheduler counters, updated while the graph runs.
#[derive(Default)]
pub(crate) struct StatsCounters {
    pub num_kernel_invocations: AtomicU64,
    pub num_items_processed: AtomicU64,
    pub num_kernel_panics: AtomicU64,
}

/// A snapshot of the scheduler counters.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct TaskGraphStats {
    pub num_kernel_invocations: u64,
    pub num_items_processed: u64,
    pub num_kernel_panics: u64,
}

impl StatsCounters {
    pub fn snapshot(&self) -> TaskGraphStats {
        TaskGraphStats {
            num_kernel_invocations: self.num_kernel_invocations.load(Ordering::Relaxed),
            num_items_processed: self.num_items_processed.load(Ordering::Relaxed),
            num_kernel_panics: self.num_kernel_panics.load(Ordering::Relaxed),
        }
    }
}

impl std::fmt::Display for TaskGraphStats {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let Self {
            num_kernel_invocations,
            num_items_processed,
            num_kernel_panics,
        } = *self;
        write!(
            f,
            "{} kernel invocations over {} items ({} panics)",
            pyr_format::format_usize(num_kernel_invocations as _),
            pyr_format::format_usize(num_items_processed as _),
            num_kernel_panics,
        )
    }
}
