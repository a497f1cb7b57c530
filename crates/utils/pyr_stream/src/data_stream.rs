use std::sync::atomic::{AtomicUsize, Ordering};

use crossbeam::queue::SegQueue;
use parking_lot::{Mutex, RwLock};

use crate::thread_slot;

/// Each staging buffer is flushed into the shared queue once it holds about
/// this many bytes worth of items.
const CHUNK_SIZE_BYTES: usize = 4 * 1024;

/// An unordered multi-producer, single-consumer stream of `T`.
///
/// Pushes append to a per-thread staging buffer which is flushed into a shared
/// lock-free queue when it overflows [`CHUNK_SIZE_BYTES`], or on an explicit
/// flush. [`DataStream::drain`] snapshots all currently-queued chunks; items
/// pushed afterwards are left for the next drain.
///
/// Semantics: insertion order is irrelevant, and the consumer sees every
/// pushed item exactly once.
pub struct DataStream<T> {
    /// Per-thread staging buffers, indexed by [`thread_slot`].
    ///
    /// The `RwLock` only guards the *vector* (grown when a new thread shows
    /// up); each buffer has its own mutex, uncontended except during
    /// [`DataStream::flush_all`].
    staged: RwLock<Vec<Mutex<Vec<T>>>>,

    /// Full chunks, ready for the consumer.
    chunks: SegQueue<Vec<T>>,

    /// Approximate number of items in the stream (staged + queued).
    ///
    /// "Approximate" because it is read without synchronizing with in-flight
    /// pushes; it is a scheduling heuristic, not an invariant.
    approx_items: AtomicUsize,
}

impl<T> Default for DataStream<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> DataStream<T> {
    pub fn new() -> Self {
        Self {
            staged: RwLock::new(Vec::new()),
            chunks: SegQueue::new(),
            approx_items: AtomicUsize::new(0),
        }
    }

    /// How many items fit in a staging buffer before it is flushed.
    #[inline]
    pub fn chunk_capacity() -> usize {
        (CHUNK_SIZE_BYTES / std::mem::size_of::<T>().max(1)).max(1)
    }

    /// Push a batch of items onto the calling thread's staging buffer.
    ///
    /// Never fails; flushes the buffer into the shared queue on overflow.
    pub fn push(&self, items: impl IntoIterator<Item = T>) {
        let capacity = Self::chunk_capacity();
        let mut num_pushed = 0;

        self.with_staging_buffer(|buffer| {
            for item in items {
                buffer.push(item);
                num_pushed += 1;

                if buffer.len() >= capacity {
                    self.chunks.push(std::mem::take(buffer));
                }
            }
        });

        self.approx_items.fetch_add(num_pushed, Ordering::Relaxed);
    }

    #[inline]
    pub fn push_one(&self, item: T) {
        self.push(std::iter::once(item));
    }

    /// Flush the calling thread's staging buffer into the shared queue.
    pub fn flush_local(&self) {
        self.with_staging_buffer(|buffer| {
            if !buffer.is_empty() {
                self.chunks.push(std::mem::take(buffer));
            }
        });
    }

    /// Flush *every* thread's staging buffer into the shared queue.
    ///
    /// Safe to call concurrently with producers, but only meaningful from the
    /// consumer side, between kernel invocations — items a producer stages
    /// after the flush are (by design) not seen.
    pub fn flush_all(&self) {
        let staged = self.staged.read();
        for buffer in staged.iter() {
            let mut buffer = buffer.lock();
            if !buffer.is_empty() {
                self.chunks.push(std::mem::take(&mut *buffer));
            }
        }
    }

    /// Take all currently-queued chunks.
    ///
    /// Items pushed (or flushed) after the snapshot remain queued for the
    /// next drain.
    pub fn drain(&self) -> Vec<Vec<T>> {
        let mut drained = Vec::new();
        let mut num_items = 0;
        while let Some(chunk) = self.chunks.pop() {
            num_items += chunk.len();
            drained.push(chunk);
        }
        self.approx_items.fetch_sub(num_items, Ordering::Relaxed);
        drained
    }

    /// Approximate number of buffered items, across all producers.
    ///
    /// Used by the scheduler to pick the fullest stage; do not build
    /// invariants on top of it.
    #[inline]
    pub fn approx_len(&self) -> usize {
        self.approx_items.load(Ordering::Relaxed)
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.approx_len() == 0
    }

    /// Run `f` on the calling thread's staging buffer, growing the buffer
    /// table if this thread has never pushed into this stream before.
    fn with_staging_buffer<R>(&self, f: impl FnOnce(&mut Vec<T>) -> R) -> R {
        let slot = thread_slot();
        loop {
            {
                let staged = self.staged.read();
                if let Some(buffer) = staged.get(slot) {
                    return f(&mut buffer.lock());
                }
            }
            let mut staged = self.staged.write();
            while staged.len() <= slot {
                staged.push(Mutex::new(Vec::new()));
            }
        }
    }
}

// ---

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn staged_items_are_invisible_until_flushed() {
        let stream = DataStream::<u32>::new();
        stream.push([1, 2, 3]);

        assert_eq!(stream.approx_len(), 3);
        assert!(stream.drain().is_empty(), "nothing was flushed yet");

        stream.flush_local();
        let chunks = stream.drain();
        assert_eq!(chunks.iter().map(Vec::len).sum::<usize>(), 3);
        assert_eq!(stream.approx_len(), 0);
    }

    #[test]
    fn overflow_flushes_a_chunk() {
        let stream = DataStream::<u64>::new();
        let capacity = DataStream::<u64>::chunk_capacity();

        stream.push(0..capacity as u64);
        let chunks = stream.drain();
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].len(), capacity);
    }

    #[test]
    fn drain_leaves_later_pushes() {
        let stream = DataStream::<u32>::new();
        stream.push([1]);
        stream.flush_local();

        let first = stream.drain();
        assert_eq!(first.iter().map(Vec::len).sum::<usize>(), 1);

        stream.push([2, 3]);
        stream.flush_local();
        let second = stream.drain();
        assert_eq!(second.iter().map(Vec::len).sum::<usize>(), 2);
    }

    #[test]
    fn multi_threaded_item_conservation() {
        use std::sync::Arc;

        const NUM_THREADS: usize = 8;
        const ITEMS_PER_THREAD: usize = 10_000;

        let stream = Arc::new(DataStream::<usize>::new());

        let handles: Vec<_> = (0..NUM_THREADS)
            .map(|t| {
                let stream = stream.clone();
                std::thread::spawn(move || {
                    for i in 0..ITEMS_PER_THREAD {
                        stream.push_one(t * ITEMS_PER_THREAD + i);
                    }
                    stream.flush_local();
                })
            })
            .collect();

        for handle in handles {
            handle.join().unwrap();
        }

        let mut seen = vec![false; NUM_THREADS * ITEMS_PER_THREAD];
        for chunk in stream.drain() {
            for item in chunk {
                assert!(!seen[item], "item {item} delivered twice");
                seen[item] = true;
            }
        }
        assert!(seen.iter().all(|&s| s), "some items were lost");
    }
}
