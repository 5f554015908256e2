//! The task-function registry: the table of executable task bodies a
//! compiled task graph indexes into by `TaskFunctionIndex` (§4.10).
//!
//! The front-end compiler and its native-module library are out of scope
//! for this crate; what's implemented here is the registry mechanism
//! itself plus a handful of built-in task functions (constant, arithmetic,
//! gain, a controller-parameter echo) sufficient to hand-build and exercise
//! task graphs in tests.

use crate::engine::profiler::EventConsole;
use crate::engine::task_context::TaskContext;
use crate::graph::task::TaskArgument;

pub type TaskFunctionBody = fn(&TaskContext);

/// What a task function's `memory_query`/`initializer` callbacks see
/// (§4.9): this task's constant arguments and the engine's fixed sample
/// rate. No buffers exist yet at these points — they run before the first
/// chunk, or (for `memory_query`) before the task-memory arena itself is
/// sized — so only the compile-time-constant view of the arguments is
/// meaningful. `events` is this task's event interface (§7:
/// "initializer-callback failure reported via event interface", not a
/// propagated `Result`).
pub struct InitContext<'a> {
    pub arguments: &'a [TaskArgument],
    pub sample_rate: u32,
    pub(crate) task_index: u32,
    pub(crate) events: &'a EventConsole,
}

impl<'a> InitContext<'a> {
    pub fn report_event(&self, message: &'static str) {
        self.events.report(self.task_index, message);
    }
}

/// What a task function's `voice_initializer` callback sees (§4.9, §4.1.2
/// step 1): the same constant-argument view as [`InitContext`], plus the
/// voice's own persistent scratch slice, already zeroed, so e.g. an
/// envelope can stash this voice's start time once at activation.
pub struct VoiceInitContext<'a> {
    pub arguments: &'a [TaskArgument],
    pub sample_rate: u32,
    pub scratch: &'a mut [u8],
    pub(crate) task_index: u32,
    pub(crate) events: &'a EventConsole,
}

impl<'a> VoiceInitContext<'a> {
    pub fn report_event(&self, message: &'static str) {
        self.events.report(self.task_index, message);
    }
}

/// One entry in the registry: the task function's four callbacks (§4.9).
/// Only `body` (the hot-path `function`) is required; the other three are
/// optional exactly as the spec describes them.
#[derive(Clone, Copy)]
pub struct TaskFunctionDescriptor {
    pub name: &'static str,
    pub memory_query: Option<fn(&InitContext) -> usize>,
    pub initializer: Option<fn(&InitContext)>,
    pub voice_initializer: Option<fn(&VoiceInitContext)>,
    pub body: TaskFunctionBody,
}

/// The fixed table of task functions a compiled graph's `task_function_index`
/// fields index into. Built once, handed to [`crate::engine::Executor::initialize`]
/// alongside the graphs themselves.
#[derive(Clone, Default)]
pub struct TaskFunctionLibrary {
    functions: Vec<TaskFunctionDescriptor>,
}

impl TaskFunctionLibrary {
    pub fn new() -> Self {
        TaskFunctionLibrary::default()
    }

    pub fn register(&mut self, descriptor: TaskFunctionDescriptor) -> u32 {
        self.functions.push(descriptor);
        (self.functions.len() - 1) as u32
    }

    pub fn get(&self, index: u32) -> &TaskFunctionDescriptor {
        &self.functions[index as usize]
    }

    pub fn len(&self) -> usize {
        self.functions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.functions.is_empty()
    }

    /// A library preloaded with the built-in functions below, registered in
    /// the order their `*_INDEX` constants expect.
    pub fn with_builtins() -> Self {
        let bare = |name: &'static str, body: TaskFunctionBody| TaskFunctionDescriptor {
            name,
            memory_query: None,
            initializer: None,
            voice_initializer: None,
            body,
        };
        let mut lib = TaskFunctionLibrary::new();
        lib.register(bare("constant", builtins::constant));
        lib.register(bare("add", builtins::add));
        lib.register(bare("multiply", builtins::multiply));
        lib.register(bare("gain", builtins::gain));
        lib.register(bare("parameter_echo", builtins::parameter_echo));
        lib.register(bare("velocity", builtins::velocity));
        lib.register(TaskFunctionDescriptor {
            name: "voice_start_marker",
            memory_query: Some(builtins::voice_start_marker_memory_query),
            initializer: None,
            voice_initializer: Some(builtins::voice_start_marker_voice_init),
            body: builtins::voice_start_marker,
        });
        lib
    }
}

pub mod builtins {
    use super::{InitContext, TaskContext, VoiceInitContext};
    use crate::graph::task::TaskArgument;

    pub const CONSTANT: u32 = 0;
    pub const ADD: u32 = 1;
    pub const MULTIPLY: u32 = 2;
    pub const GAIN: u32 = 3;
    pub const PARAMETER_ECHO: u32 = 4;
    pub const VELOCITY: u32 = 5;
    pub const VOICE_START_MARKER: u32 = 6;

    /// `(value: Real constant, out: Real)`: materializes a compile-time
    /// real constant into a freshly allocated buffer, flagging it constant
    /// so downstream tasks and voice accumulation can broadcast it cheaply
    /// rather than filling every frame (data model §3, "constant flag").
    pub fn constant(ctx: &TaskContext) {
        let (value, out_index) = match (&ctx.arguments[0], &ctx.arguments[1]) {
            (TaskArgument::RealIn(crate::graph::task::RealInput::Constant(v)), TaskArgument::RealOut(out)) => {
                (*v, *out)
            }
            _ => panic!("constant: expected (value: Real constant, out: Real)"),
        };
        let out = ctx.output_buffer(out_index).as_real_mut();
        out.set_constant_value(value);
    }

    /// `(a: Real, b: Real, out: Real)`
    pub fn add(ctx: &TaskContext) {
        let (a, b, out_index) = match (&ctx.arguments[0], &ctx.arguments[1], &ctx.arguments[2]) {
            (TaskArgument::RealIn(a), TaskArgument::RealIn(b), TaskArgument::RealOut(out)) => (a, b, *out),
            _ => panic!("add: expected (a: Real, b: Real, out: Real)"),
        };
        let frames = ctx.frames as usize;
        let out = ctx.output_buffer(out_index).as_real_mut();
        for frame in 0..frames {
            let value = ctx.real_input_value(a, frame) + ctx.real_input_value(b, frame);
            out.raw_mut()[frame] = value;
        }
        out.sanitize_inf_nan(frames);
    }

    /// `(a: Real, b: Real, out: Real)`
    pub fn multiply(ctx: &TaskContext) {
        let (a, b, out_index) = match (&ctx.arguments[0], &ctx.arguments[1], &ctx.arguments[2]) {
            (TaskArgument::RealIn(a), TaskArgument::RealIn(b), TaskArgument::RealOut(out)) => (a, b, *out),
            _ => panic!("multiply: expected (a: Real, b: Real, out: Real)"),
        };
        let frames = ctx.frames as usize;
        let out = ctx.output_buffer(out_index).as_real_mut();
        for frame in 0..frames {
            let value = ctx.real_input_value(a, frame) * ctx.real_input_value(b, frame);
            out.raw_mut()[frame] = value;
        }
        out.sanitize_inf_nan(frames);
    }

    /// `(signal: Real, gain: Real, out: Real)`
    pub fn gain(ctx: &TaskContext) {
        let (signal, gain, out_index) = match (&ctx.arguments[0], &ctx.arguments[1], &ctx.arguments[2]) {
            (TaskArgument::RealIn(s), TaskArgument::RealIn(g), TaskArgument::RealOut(out)) => (s, g, *out),
            _ => panic!("gain: expected (signal: Real, gain: Real, out: Real)"),
        };
        let frames = ctx.frames as usize;
        let out = ctx.output_buffer(out_index).as_real_mut();
        for frame in 0..frames {
            let value = ctx.real_input_value(signal, frame) * ctx.real_input_value(gain, frame);
            out.raw_mut()[frame] = value;
        }
        out.sanitize_inf_nan(frames);
    }

    /// `(parameter_id: Real constant, out: Real)`: writes the controller
    /// parameter's sample-held value across the chunk, stepping at each
    /// event's frame offset. Exists to exercise the controller event
    /// manager end-to-end in tests.
    pub fn parameter_echo(ctx: &TaskContext) {
        let (parameter_id, out_index) = match (&ctx.arguments[0], &ctx.arguments[1]) {
            (TaskArgument::RealIn(crate::graph::task::RealInput::Constant(id)), TaskArgument::RealOut(out)) => {
                (*id as u32, *out)
            }
            _ => panic!("parameter_echo: expected (parameter_id: Real constant, out: Real)"),
        };
        let (previous, events) = ctx.controller_parameter(parameter_id);
        let frames = ctx.frames as usize;
        let out = ctx.output_buffer(out_index).as_real_mut();

        let mut value = previous;
        let mut event_cursor = 0usize;
        for frame in 0..frames {
            while event_cursor < events.len() && (events[event_cursor].frame_offset as usize) <= frame {
                value = events[event_cursor].value;
                event_cursor += 1;
            }
            out.raw_mut()[frame] = value;
        }
    }

    /// `(out: Real)`: writes the running voice's note velocity as a
    /// constant-flagged output. Exists so tests can exercise per-voice
    /// state (distinct from per-graph compile-time constants, which every
    /// voice of a graph shares) without a full compiler front end.
    pub fn velocity(ctx: &TaskContext) {
        let out_index = match &ctx.arguments[0] {
            TaskArgument::RealOut(out) => *out,
            _ => panic!("velocity: expected (out: Real)"),
        };
        let out = ctx.output_buffer(out_index).as_real_mut();
        out.set_constant_value(ctx.note_velocity());
    }

    /// One byte of scratch: `1` once this voice's `voice_initializer` has
    /// run, `0` until then.
    pub fn voice_start_marker_memory_query(_ctx: &InitContext) -> usize {
        1
    }

    /// Fires once per voice at activation (§4.1.2 step 1); stamps this
    /// voice's scratch byte so `voice_start_marker` below can tell "ran
    /// voice_initializer at least once" apart from the arena's initial
    /// zero-fill.
    pub fn voice_start_marker_voice_init(ctx: &VoiceInitContext) {
        ctx.scratch[0] = 1;
    }

    /// `(out: Real)`: `1.0` if this voice's `voice_initializer` has fired,
    /// `0.0` otherwise. Exists purely to exercise the `voice_initializer`
    /// callback end to end in tests, since none of the other built-ins need
    /// per-voice persistent state.
    pub fn voice_start_marker(ctx: &TaskContext) {
        let out_index = match &ctx.arguments[0] {
            TaskArgument::RealOut(out) => *out,
            _ => panic!("voice_start_marker: expected (out: Real)"),
        };
        let marked = ctx.scratch()[0];
        let out = ctx.output_buffer(out_index).as_real_mut();
        out.set_constant_value(if marked != 0 { 1.0 } else { 0.0 });
    }
}
