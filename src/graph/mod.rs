//! The task graph data model (§3, §6 of the spec this crate implements):
//! the static, read-only DAG the front-end compiler hands to the executor,
//! plus the runtime instrument that bundles a voice graph and an FX graph.

pub mod builder;
pub mod instrument;
pub mod task;
pub mod task_graph;

pub use instrument::{InstrumentGlobals, InstrumentError, RuntimeInstrument};
pub use task::{BufferIndex, BoolInput, GraphOutput, RealInput, Task, TaskArgument, TaskFunctionIndex, TaskIndex};
pub use task_graph::TaskGraph;
