//! `wavelang_engine`: the real-time task-graph execution core of the
//! WaveLang audio synthesis runtime.
//!
//! This crate owns everything downstream of a compiled task graph: buffer
//! pooling, the worker thread pool, voice allocation and stealing,
//! controller-event bucketing, channel mixing, and the top-level
//! [`engine::Executor`] that ties them together into one real-time-safe
//! `execute()` call per audio chunk. Producing a [`graph::TaskGraph`] (i.e.
//! compiling a WaveLang instrument definition down to tasks) is out of
//! scope; that's the front-end compiler's job, not this crate's.

pub mod aligned;
pub mod buffer;
pub mod engine;
pub mod error;
pub mod graph;
pub mod primitive;
pub mod registry;
pub mod settings;
pub mod value;

pub use engine::{Executor, Stage};
pub use error::InitError;
pub use graph::{
    BoolInput, BufferIndex, GraphOutput, InstrumentError, InstrumentGlobals, RealInput,
    RuntimeInstrument, Task, TaskArgument, TaskFunctionIndex, TaskGraph, TaskIndex,
};
pub use graph::builder::TaskGraphBuilder;
pub use primitive::{BufferPrimitive, PrimitiveType};
pub use registry::{InitContext, TaskFunctionDescriptor, TaskFunctionLibrary, VoiceInitContext};
pub use settings::{ChunkContext, SampleFormat, Settings, SettingsData};
pub use value::Value;
