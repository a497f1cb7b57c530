use crossbeam::channel::{Receiver, Sender};

type Job = Box<dyn FnOnce() + Send + 'static>;

/// A fixed-size pool of threads draining a bounded queue of closures.
///
/// Resource loads are submitted here so that the *task-graph workers* never
/// block on I/O: a worker submits and moves on, a loader thread does the slow
/// part. The queue must be sized to absorb the worst-case number of in-flight
/// loads (one per registered resource is always enough) — `submit` blocks if
/// it ever fills up, and blocking a task-graph worker there can deadlock the
/// graph.
///
/// Dropping the pool drains all pending jobs, then joins the threads.
pub struct LoaderPool {
    sender: Option<Sender<Job>>,
    threads: Vec<std::thread::JoinHandle<()>>,
}

impl LoaderPool {
    pub fn new(thread_count: usize, queue_capacity: usize) -> Self {
        let (sender, receiver) = crossbeam::channel::bounded::<Job>(queue_capacity);

        let threads = (0..thread_count)
            .map(|i| {
                let receiver: Receiver<Job> = receiver.clone();
                std::thread::Builder::new()
                    .name(format!("pyr-loader-{i}"))
                    .spawn(move || {
                        // Runs until the last sender hangs up and the queue is empty.
                        for job in receiver {
                            job();
                        }
                    })
                    .expect("failed to spawn loader thread")
            })
            .collect();

        Self {
            sender: Some(sender),
            threads,
        }
    }

    /// Queue a closure for execution on a loader thread.
    ///
    /// Blocks only if the queue is full (see the type-level docs on sizing).
    pub fn submit(&self, job: impl FnOnce() + Send + 'static) {
        if let Some(sender) = &self.sender {
            sender
                .send(Box::new(job))
                .ok(); // only fails if all receivers are gone, i.e. mid-teardown
        }
    }

    pub fn thread_count(&self) -> usize {
        self.threads.len()
    }
}

impl Drop for LoaderPool {
    fn drop(&mut self) {
        // Hang up; the threads finish whatever is queued and exit.
        self.sender = None;
        for thread in self.threads.drain(..) {
            if thread.join().is_err() {
                pyr_log::error!("a loader thread panicked during shutdown");
            }
        }
    }
}

// ---

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    use super::*;

    #[test]
    fn all_submitted_jobs_run_before_drop_returns() {
        let counter = Arc::new(AtomicUsize::new(0));

        let pool = LoaderPool::new(4, 128);
        for _ in 0..100 {
            let counter = counter.clone();
            pool.submit(move || {
                counter.fetch_add(1, Ordering::Relaxed);
            });
        }
        drop(pool);

        assert_eq!(counter.load(Ordering::Relaxed), 100);
    }

    #[test]
    fn jobs_run_on_loader_threads() {
        let pool = LoaderPool::new(1, 8);
        let (tx, rx) = crossbeam::channel::bounded(1);
        pool.submit(move || {
            let name = std::thread::current().name().unwrap_or_default().to_owned();
            tx.send(name).unwrap();
        });
        assert_eq!(rx.recv().unwrap(), "pyr-loader-0");
    }
}
