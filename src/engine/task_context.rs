//! The per-task execution context (§4.4, §4.5): what a task function sees
//! when it runs — its resolved buffer/constant arguments, this chunk's
//! timing, and (for voice-graph tasks) which voice it is running for.

use crate::buffer::Buffer;
use crate::engine::buffer_allocator::BufferAllocator;
use crate::engine::buffer_manager::BufferManagerInstance;
use crate::engine::controller_events::ControllerEventManager;
use crate::engine::executor::Stage;
use crate::engine::profiler::EventConsole;
use crate::graph::task::{BoolInput, RealInput, TaskArgument, TaskIndex};
use crate::value::Value;

/// Identifies which instance of a graph a task is running for: voice
/// graphs run once per active voice, the FX graph runs once, singleton.
#[derive(Debug, Clone, Copy)]
pub struct TaskInstance {
    pub stage: Stage,
    pub voice_index: u32,
}

/// Everything a task function needs to do its work for one invocation.
/// Borrowed for the duration of a single task execution only.
pub struct TaskContext<'a> {
    pub instance: TaskInstance,
    pub(crate) task_index: TaskIndex,
    pub arguments: &'a [TaskArgument],
    pub(crate) buffers: &'a BufferManagerInstance,
    pub(crate) allocator: &'a BufferAllocator,
    pub(crate) controller_events: &'a ControllerEventManager,
    pub(crate) events: &'a EventConsole,
    /// This task's slice of the task-memory arena for the running
    /// instance. Stored as raw parts, not `&'a mut [u8]`, because a task
    /// function only ever sees `&TaskContext`; see `scratch()`.
    pub(crate) scratch_ptr: *mut u8,
    pub(crate) scratch_len: usize,
    pub sample_rate: u32,
    pub frames: u32,
    pub voice_chunk_offset_samples: u32,
    pub voice_note_release_sample: Option<u32>,
    pub voice_note_id: u64,
    pub voice_note_velocity: f32,
}

impl<'a> TaskContext<'a> {
    /// Resolve a real-valued input argument, reading through to its buffer
    /// if it isn't a compile-time constant.
    pub fn real_input(&self, input: &RealInput) -> &'a Buffer {
        match input {
            RealInput::Constant(_) => panic!("real_input called on a constant input; use real_input_value"),
            RealInput::Buffer(b) => self.buffers.read(*b, self.allocator),
        }
    }

    /// Resolve a real-valued input as either a constant scalar or the
    /// per-frame contents of a (possibly constant-flagged) buffer.
    pub fn real_input_value(&self, input: &RealInput, frame: usize) -> f32 {
        match input {
            RealInput::Constant(v) => *v,
            RealInput::Buffer(b) => self.buffers.read(*b, self.allocator).as_real().sample(frame),
        }
    }

    pub fn bool_input_value(&self, input: &BoolInput, frame: usize) -> bool {
        match input {
            BoolInput::Constant(v) => *v,
            BoolInput::Buffer(b) => self.buffers.read(*b, self.allocator).as_bool().sample(frame),
        }
    }

    /// A task function calls this once it has acquired a fresh output
    /// buffer for `buffer`, before writing into it.
    pub fn output_buffer(&self, buffer: u32) -> &'a mut Buffer {
        self.buffers.acquire_output(buffer, self.allocator)
    }

    /// Read-write access to an `inout` buffer.
    pub fn inout_buffer(&self, buffer: u32) -> &'a mut Buffer {
        self.buffers.read_mut(buffer, self.allocator)
    }

    /// The value a controller parameter held just before this chunk, and
    /// this chunk's timestamped changes to it, in frame order.
    pub fn controller_parameter(
        &self,
        parameter_id: u32,
    ) -> (f32, &'a [crate::engine::controller_events::TimestampedControllerEvent]) {
        (
            self.controller_events.previous_value(parameter_id),
            self.controller_events.events(parameter_id),
        )
    }

    pub fn value_input(&self, value: &Value) -> &Value {
        value
    }

    /// A task function's event interface (§6, §7 "runtime soft failures"):
    /// report a non-fatal error without blocking or propagating a `Result`
    /// out of the hot path. Delivered asynchronously to the event-console
    /// consumer via [`crate::engine::Executor::drain_events`].
    pub fn report_event(&self, message: &'static str) {
        self.events.report(self.task_index, message);
    }

    /// The logical note-id this voice is running for. Meaningless for FX
    /// stage tasks (always `0`).
    pub fn note_id(&self) -> u64 {
        self.voice_note_id
    }

    /// The velocity this voice's note-on carried. Meaningless for FX stage
    /// tasks (always `0.0`).
    pub fn note_velocity(&self) -> f32 {
        self.voice_note_velocity
    }

    /// Frame within this chunk at which the voice was released, or this
    /// chunk's effective frame count if it has not been released (§6,
    /// Voice interface).
    pub fn note_release_sample(&self) -> u32 {
        self.voice_note_release_sample.unwrap_or(self.frames)
    }

    /// This task's persistent scratch memory for the running instance.
    ///
    /// # Safety invariant
    /// Exclusive access follows from the executor never running two
    /// instances of the same task for the same voice concurrently, the
    /// same guarantee the buffer manager relies on for buffer handles.
    pub fn scratch(&self) -> &'a mut [u8] {
        // SAFETY: see above; `scratch_ptr`/`scratch_len` come from the
        // task-memory arena's slice for this exact (task, voice) pair.
        unsafe { std::slice::from_raw_parts_mut(self.scratch_ptr, self.scratch_len) }
    }
}
