use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crossbeam::channel::{bounded, Receiver, RecvTimeoutError, Sender};

use crate::stage::{DynStage, Stage, TaskContext, TaskHandle};
use crate::stats::StatsCounters;
use crate::{Gateway, Scratch, TaskGraphStats};

// ---

#[derive(Clone, Debug)]
pub struct TaskGraphConfig {
    /// Number of worker threads executing kernels.
    ///
    /// The dispatcher runs on the thread that called [`TaskGraph::run`].
    pub num_workers: usize,
}

impl Default for TaskGraphConfig {
    fn default() -> Self {
        let num_workers = std::thread::available_parallelism()
            .map_or(1, |n| n.get().saturating_sub(1))
            .max(1);
        Self { num_workers }
    }
}

// ---

enum Assignment {
    Run(usize),
    Shutdown,
}

/// A set of typed stages and the scheduler that drains them.
///
/// Topology is fixed at construction time: register every stage (and
/// gateway) up front, then call [`TaskGraph::run`] as often as you like —
/// each run executes until quiescence.
pub struct TaskGraph {
    stages: Vec<Arc<dyn DynStage>>,
    gateways: Vec<Arc<AtomicUsize>>,
    stats: StatsCounters,
}

impl Default for TaskGraph {
    fn default() -> Self {
        Self::new()
    }
}

impl TaskGraph {
    pub fn new() -> Self {
        Self {
            stages: Vec::new(),
            gateways: Vec::new(),
            stats: StatsCounters::default(),
        }
    }

    /// Register a stage, materializing its input stream.
    ///
    /// The kernel may enqueue into any [`TaskHandle`] it closes over,
    /// including the stage's own.
    pub fn add_task<T: Send + Sync + 'static>(
        &mut self,
        name: impl Into<String>,
        kernel: impl Fn(Vec<Vec<T>>, &mut TaskContext<'_>) + Send + Sync + 'static,
    ) -> TaskHandle<T> {
        let index = self.stages.len();
        let stage = Arc::new(Stage {
            name: name.into(),
            stream: pyr_stream::DataStream::new(),
            kernel: Box::new(kernel),
        });
        let handle = TaskHandle::from_stage(index, &stage);
        self.stages.push(stage);
        handle
    }

    /// Register an async gateway (see [`Gateway`]); must happen before `run`.
    pub fn register_gateway(&mut self) -> Gateway {
        let pending = Arc::new(AtomicUsize::new(0));
        self.gateways.push(pending.clone());
        Gateway::new(pending)
    }

    pub fn num_stages(&self) -> usize {
        self.stages.len()
    }

    /// Approximate total item count across every stage's input stream.
    ///
    /// Zero after a `run` returns; that is the quiescence condition.
    pub fn approx_num_buffered(&self) -> usize {
        self.stages.iter().map(|stage| stage.approx_len()).sum()
    }

    pub fn stats(&self) -> TaskGraphStats {
        self.stats.snapshot()
    }

    /// Execute until quiescence: every stream empty, no kernel executing, no
    /// gateway reserved.
    pub fn run(&self, config: &TaskGraphConfig) {
        let num_workers = config.num_workers.max(1);

        let (ready_tx, ready_rx) = bounded::<usize>(num_workers);
        let mut assign_txs = Vec::with_capacity(num_workers);
        let mut assign_rxs = Vec::with_capacity(num_workers);
        for _ in 0..num_workers {
            let (tx, rx) = bounded::<Assignment>(1);
            assign_txs.push(tx);
            assign_rxs.push(rx);
        }

        pyr_log::trace!(
            "task graph run: {} stages on {num_workers} workers",
            self.stages.len()
        );

        std::thread::scope(|scope| {
            for (worker_id, assign_rx) in assign_rxs.into_iter().enumerate() {
                let ready_tx = ready_tx.clone();
                std::thread::Builder::new()
                    .name(format!("pyr-worker-{worker_id}"))
                    .spawn_scoped(scope, move || {
                        self.worker_loop(worker_id, &ready_tx, &assign_rx);
                    })
                    .expect("failed to spawn worker thread");
            }
            drop(ready_tx);

            self.dispatcher_loop(num_workers, &ready_rx, &assign_txs);
        });

        pyr_log::trace!("task graph quiesced: {}", self.stats());
    }

    // --- workers ---

    fn worker_loop(&self, worker_id: usize, ready_tx: &Sender<usize>, assign_rx: &Receiver<Assignment>) {
        let mut scratch = Scratch::new();

        loop {
            if ready_tx.send(worker_id).is_err() {
                return; // dispatcher is gone
            }
            match assign_rx.recv() {
                Ok(Assignment::Run(stage_index)) => {
                    self.execute_stage(worker_id, stage_index, &mut scratch);
                }
                Ok(Assignment::Shutdown) | Err(_) => return,
            }
        }
    }

    fn execute_stage(&self, worker_id: usize, stage_index: usize, scratch: &mut Scratch) {
        let stage = &self.stages[stage_index];
        let mut ctx = TaskContext { worker_id, scratch };

        match std::panic::catch_unwind(AssertUnwindSafe(|| stage.execute(&mut ctx))) {
            Ok(num_items) => {
                self.stats.num_kernel_invocations.fetch_add(1, Ordering::Relaxed);
                self.stats
                    .num_items_processed
                    .fetch_add(num_items as u64, Ordering::Relaxed);
            }
            Err(_) => {
                // The drained batch is lost; everything else keeps going.
                self.stats.num_kernel_panics.fetch_add(1, Ordering::Relaxed);
                pyr_log::error!(
                    "kernel of stage {:?} panicked; continuing with the remaining stages",
                    stage.name()
                );
            }
        }

        // Make anything the kernel staged visible before we report back.
        for stage in &self.stages {
            stage.flush_all();
        }
    }

    // --- dispatcher ---

    fn dispatcher_loop(
        &self,
        num_workers: usize,
        ready_rx: &Receiver<usize>,
        assign_txs: &[Sender<Assignment>],
    ) {
        let num_stages = self.stages.len();
        let mut executing = vec![false; num_stages];
        let mut num_executing = 0_usize;
        let mut stage_per_worker: Vec<Option<usize>> = vec![None; num_workers];
        let mut prev_stage_per_worker: Vec<Option<usize>> = vec![None; num_workers];
        let mut parked: Vec<usize> = Vec::new();

        loop {
            // The timeout doubles as the soft-wait for async load completions:
            // those refill streams without any worker reporting in.
            match ready_rx.recv_timeout(Duration::from_millis(1)) {
                Ok(worker_id) => {
                    if let Some(stage_index) = stage_per_worker[worker_id].take() {
                        executing[stage_index] = false;
                        num_executing -= 1;
                        prev_stage_per_worker[worker_id] = Some(stage_index);
                    }
                    parked.push(worker_id);
                }
                Err(RecvTimeoutError::Timeout) => {}
                Err(RecvTimeoutError::Disconnected) => return,
            }

            // Hand work to as many parked workers as there is work for.
            let mut i = 0;
            while i < parked.len() {
                let worker_id = parked[i];
                if let Some(stage_index) =
                    self.pick_stage(&executing, prev_stage_per_worker[worker_id])
                {
                    executing[stage_index] = true;
                    num_executing += 1;
                    stage_per_worker[worker_id] = Some(stage_index);
                    parked.swap_remove(i);
                    assign_txs[worker_id].send(Assignment::Run(stage_index)).ok();
                } else {
                    i += 1;
                }
            }

            if parked.len() == num_workers && num_executing == 0 && self.pending_async() == 0 {
                // approx_len can hide items still sitting in producer staging
                // buffers; force them out and give it one more look.
                for stage in &self.stages {
                    stage.flush_all();
                }
                let all_empty = self.stages.iter().all(|stage| stage.approx_len() == 0);
                if all_empty && self.pending_async() == 0 {
                    for worker_id in parked.drain(..) {
                        assign_txs[worker_id].send(Assignment::Shutdown).ok();
                    }
                    return;
                }
            }
        }
    }

    /// The eligible stage with the most buffered items.
    ///
    /// Eligible = not currently executing (a stage never runs concurrently
    /// with itself) and non-empty. Ties prefer a stage the worker did not
    /// just execute, for cache-locality across *different* stages' data.
    fn pick_stage(&self, executing: &[bool], prev_stage: Option<usize>) -> Option<usize> {
        let mut best: Option<(usize, usize)> = None;

        for (stage_index, stage) in self.stages.iter().enumerate() {
            if executing[stage_index] {
                continue;
            }
            let len = stage.approx_len();
            if len == 0 {
                continue;
            }

            best = match best {
                None => Some((stage_index, len)),
                Some((best_index, best_len)) => {
                    let beats = len > best_len
                        || (len == best_len
                            && Some(best_index) == prev_stage
                            && Some(stage_index) != prev_stage);
                    if beats {
                        Some((stage_index, len))
                    } else {
                        Some((best_index, best_len))
                    }
                }
            };
        }

        best.map(|(stage_index, _)| stage_index)
    }

    fn pending_async(&self) -> usize {
        self.gateways
            .iter()
            .map(|gateway| gateway.load(Ordering::Acquire))
            .sum()
    }
}
