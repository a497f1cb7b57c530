//! Convenience constructors for the common stage shapes: map an item stream
//! into another stage, or scatter each item to zero-or-one outputs. Anything
//! fancier (fan-out to several types, stateful kernels) is written as a plain
//! [`TaskGraph::add_task`] kernel.

use crate::{TaskGraph, TaskHandle};

impl TaskGraph {
    /// A stage that applies `kernel` to every item and forwards the results.
    pub fn add_transform_task<T, U>(
        &mut self,
        name: impl Into<String>,
        output: TaskHandle<U>,
        kernel: impl Fn(T) -> U + Send + Sync + 'static,
    ) -> TaskHandle<T>
    where
        T: Send + Sync + 'static,
        U: Send + Sync + 'static,
    {
        self.add_task(name, move |chunks: Vec<Vec<T>>, _ctx| {
            for chunk in chunks {
                output.enqueue(chunk.into_iter().map(&kernel));
            }
        })
    }

    /// A stage that scatters every item to zero or one outputs.
    pub fn add_filter_map_task<T, U>(
        &mut self,
        name: impl Into<String>,
        output: TaskHandle<U>,
        kernel: impl Fn(T) -> Option<U> + Send + Sync + 'static,
    ) -> TaskHandle<T>
    where
        T: Send + Sync + 'static,
        U: Send + Sync + 'static,
    {
        self.add_task(name, move |chunks: Vec<Vec<T>>, _ctx| {
            for chunk in chunks {
                output.enqueue(chunk.into_iter().filter_map(&kernel));
            }
        })
    }
}

// ---
