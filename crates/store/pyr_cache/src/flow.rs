use std::sync::Arc;

use pyr_task_graph::{TaskGraph, TaskHandle};

use crate::{CacheVariant, CacheableId, LruCache, VariantMember};

impl<V: CacheVariant> LruCache<V> {
    /// Build the asynchronous access path as a pair of task-graph stages.
    ///
    /// The returned handle is the sub-graph's input; push `(state, id)` pairs
    /// at it. Resident values are forwarded straight to `output`; cold ids
    /// hop to a load stage, which defers the blocking protocol to the loader
    /// pool so no task-graph worker ever waits on a load. Failed loads land
    /// on `failed` with their id (the error itself is logged — factories
    /// either produce a value or a diagnosable error, there is no retry).
    ///
    /// A gateway keeps the graph from quiescing while loader threads still
    /// owe completions.
    pub fn add_access_stages<S, T>(
        self: &Arc<Self>,
        graph: &mut TaskGraph,
        name: &str,
        output: TaskHandle<(S, Arc<T>)>,
        failed: TaskHandle<(S, CacheableId)>,
    ) -> TaskHandle<(S, CacheableId)>
    where
        V: VariantMember<T>,
        S: Send + Sync + 'static,
        T: Send + Sync + 'static,
    {
        let gateway = graph.register_gateway();

        let load: TaskHandle<(S, CacheableId)> = graph.add_task(format!("{name}:load"), {
            let cache = self.clone();
            let output = output.clone();
            let failed = failed.clone();
            move |chunks: Vec<Vec<(S, CacheableId)>>, _ctx| {
                for chunk in chunks {
                    for (state, id) in chunk {
                        gateway.reserve();

                        let job_cache = cache.clone();
                        let output = output.clone();
                        let failed = failed.clone();
                        let gateway = gateway.clone();
                        cache.loader_pool.submit(move || {
                            match job_cache.get::<T>(id) {
                                Ok(value) => {
                                    output.enqueue_one((state, value));
                                    output.flush();
                                }
                                Err(err) => {
                                    pyr_log::warn!(
                                        "async load failed: {}",
                                        pyr_log::format_error(&err)
                                    );
                                    failed.enqueue_one((state, id));
                                    failed.flush();
                                }
                            }
                            // Only after the completion is visible.
                            gateway.release();
                        });
                    }
                }
            }
        });

        graph.add_task(format!("{name}:access"), {
            let cache = self.clone();
            move |chunks: Vec<Vec<(S, CacheableId)>>, _ctx| {
                for chunk in chunks {
                    for (state, id) in chunk {
                        match cache.try_get::<T>(id) {
                            Ok(Some(value)) => output.enqueue_one((state, value)),
                            Ok(None) => load.enqueue_one((state, id)),
                            Err(err) => {
                                pyr_log::warn!(
                                    "async access failed: {}",
                                    pyr_log::format_error(&err)
                                );
                                failed.enqueue_one((state, id));
                            }
                        }
                    }
                }
            }
        })
    }
}
