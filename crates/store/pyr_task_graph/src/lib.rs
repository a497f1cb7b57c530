//! The pyrite task graph: typed stages, each owning an unordered input
//! stream, drained by a pool of workers under a single dispatcher.
//!
//! The scheduler's only policy is *drain the fullest stage first*. That is
//! what turns the streams into a backpressure mechanism: rays pile up at
//! batching points while geometry loads, and the stages that are actually
//! runnable (shading, ray generation) get the workers in the meantime.
//!
//! There is no static edge list. A stage's kernel holds [`TaskHandle`]s to
//! whatever stages it feeds, including its own (self-loops are fine).
//!
//! Termination is by quiescence only: `run` returns once every stream is
//! empty, no kernel is executing, and no async gateway (see [`Gateway`])
//! still owes a completion.

mod combinators;
mod gateway;
mod graph;
mod scratch;
mod stage;
mod stats;

pub use gateway::Gateway;
pub use graph::{TaskGraph, TaskGraphConfig};
pub use scratch::Scratch;
pub use stage::{TaskContext, TaskHandle};
pub use stats::TaskGraphStats;
