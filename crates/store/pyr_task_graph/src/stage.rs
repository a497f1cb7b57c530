use std::sync::{Arc, Weak};

use pyr_stream::DataStream;

use crate::Scratch;

/// What a kernel sees while executing: which worker it is on, scratch space,
/// and per-invocation bookkeeping.
pub struct TaskContext<'a> {
    /// Dense id of the worker thread executing the kernel.
    pub worker_id: usize,

    /// Reusable per-worker scratch buffers.
    pub scratch: &'a mut Scratch,
}

/// A kernel is total: domain errors are encoded into downstream enqueues,
/// never thrown. Panics are caught at the worker boundary.
pub(crate) type Kernel<T> = Box<dyn Fn(Vec<Vec<T>>, &mut TaskContext<'_>) + Send + Sync>;

pub(crate) struct Stage<T> {
    pub name: String,
    pub stream: DataStream<T>,
    pub kernel: Kernel<T>,
}

/// The type-erased face of a [`Stage`], as the scheduler sees it.
pub(crate) trait DynStage: Send + Sync {
    fn name(&self) -> &str;

    /// Approximate buffered item count, staged buffers included.
    fn approx_len(&self) -> usize;

    /// Make all staged items visible to the consumer.
    fn flush_all(&self);

    /// Flush, drain, and run the kernel on whatever was buffered.
    ///
    /// The scheduler guarantees this is never called concurrently for the
    /// same stage. Returns the number of items processed.
    fn execute(&self, ctx: &mut TaskContext<'_>) -> usize;
}

impl<T: Send + Sync + 'static> DynStage for Stage<T> {
    fn name(&self) -> &str {
        &self.name
    }

    fn approx_len(&self) -> usize {
        self.stream.approx_len()
    }

    fn flush_all(&self) {
        self.stream.flush_all();
    }

    fn execute(&self, ctx: &mut TaskContext<'_>) -> usize {
        // Staged items from producers that went idle without flushing would
        // otherwise never surface.
        self.stream.flush_all();

        let chunks = self.stream.drain();
        let num_items = chunks.iter().map(Vec::len).sum();
        if num_items > 0 {
            (self.kernel)(chunks, ctx);
        }
        num_items
    }
}

/// A capability to push work into one registered stage.
///
/// Cheap to clone and safe to hold anywhere, including inside other stages'
/// kernels; handles do not keep the graph alive (self-referential pipelines
/// would otherwise leak it).
pub struct TaskHandle<T> {
    pub(crate) index: usize,
    pub(crate) stage: Weak<Stage<T>>,
}

impl<T> Clone for TaskHandle<T> {
    fn clone(&self) -> Self {
        Self {
            index: self.index,
            stage: self.stage.clone(),
        }
    }
}

impl<T: Send + Sync + 'static> TaskHandle<T> {
    /// Dense index of the stage within its graph.
    #[inline]
    pub fn index(&self) -> usize {
        self.index
    }

    /// Push items onto the stage's input stream (thread-locally staged).
    pub fn enqueue(&self, items: impl IntoIterator<Item = T>) {
        if let Some(stage) = self.stage.upgrade() {
            stage.stream.push(items);
        } else {
            pyr_log::warn_once!("enqueue on a task graph that is already gone");
        }
    }

    #[inline]
    pub fn enqueue_one(&self, item: T) {
        self.enqueue(std::iter::once(item));
    }

    /// Flush the calling thread's staged items so the scheduler can see them.
    ///
    /// Workers do this automatically after every kernel invocation; call it
    /// yourself when pushing from any other thread (seeding, loader threads).
    pub fn flush(&self) {
        if let Some(stage) = self.stage.upgrade() {
            stage.stream.flush_local();
        }
    }

    pub(crate) fn from_stage(index: usize, stage: &Arc<Stage<T>>) -> Self {
        Self {
            index,
            stage: Arc::downgrade(stage),
        }
    }
}
