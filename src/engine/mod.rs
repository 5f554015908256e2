//! The runtime engine (§4 of the spec this crate implements): the executor
//! and every subsystem it coordinates to drive one chunk of task-graph
//! execution — buffer pooling, task-memory, the worker thread pool, voice
//! allocation, controller events, channel mixing, and profiling/soft-failure
//! reporting.

pub mod buffer_allocator;
pub mod buffer_manager;
pub mod channel_mixer;
pub mod controller_events;
pub mod executor;
pub mod profiler;
pub mod task_context;
pub mod task_memory;
pub mod thread_pool;
pub mod voice_allocator;

pub use executor::{Executor, Stage};
pub use task_context::{TaskContext, TaskInstance};
