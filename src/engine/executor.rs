//! The executor: owns every runtime subsystem and drives one chunk's worth
//! of task-graph execution per call to [`Executor::execute`] (§4.1).

use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU8, Ordering};
use std::sync::Arc;

use parking_lot::{Condvar, Mutex};

use crate::buffer::Buffer;
use crate::engine::buffer_allocator::{BufferAllocator, PoolSizeRequest};
use crate::engine::buffer_manager::BufferManagerInstance;
use crate::engine::channel_mixer::{convert_and_interleave, deinterleave_and_convert, mix_channels};
use crate::engine::controller_events::ControllerEventManager;
use crate::engine::task_context::{TaskContext, TaskInstance};
use crate::engine::task_memory::{TaskMemoryArena, TaskMemoryRequest};
use crate::engine::thread_pool::ThreadPool;
use crate::engine::voice_allocator::VoiceAllocator;
use crate::error::InitError;
use crate::graph::task::{GraphOutput, TaskIndex};
use crate::graph::{RuntimeInstrument, TaskGraph};
use crate::primitive::BufferPrimitive;
use crate::registry::TaskFunctionLibrary;
use crate::settings::{ChunkContext, Settings};
use crate::value::Value;

/// Which of the two graphs a task instance belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Stage {
    Voice,
    Fx,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
enum State {
    Uninitialized = 0,
    Initialized = 1,
    Running = 2,
    Terminating = 3,
}

#[derive(Clone, Copy)]
struct TaskSubmission {
    stage: Stage,
    voice_index: u32,
    task_index: TaskIndex,
}

struct GraphRuntime {
    graph: TaskGraph,
    /// One `BufferManagerInstance` + one predecessor-counter table per
    /// concurrently running instance (per voice, for the voice graph; a
    /// single entry, for the FX graph).
    instances: Vec<InstanceState>,
}

struct InstanceState {
    buffers: BufferManagerInstance,
    predecessors_remaining: Vec<AtomicU32>,
    remaining_tasks: AtomicU32,
}

impl InstanceState {
    fn new(graph: &TaskGraph) -> Self {
        InstanceState {
            buffers: BufferManagerInstance::new(graph),
            predecessors_remaining: (0..graph.task_count())
                .map(|t| AtomicU32::new(graph.task_predecessor_count(t as TaskIndex)))
                .collect(),
            remaining_tasks: AtomicU32::new(graph.task_count() as u32),
        }
    }

    fn begin_chunk(&self, graph: &TaskGraph) {
        self.buffers.begin_chunk();
        for (t, counter) in self.predecessors_remaining.iter().enumerate() {
            counter.store(graph.task_predecessor_count(t as TaskIndex), Ordering::Relaxed);
        }
        self.remaining_tasks.store(graph.task_count() as u32, Ordering::Relaxed);
    }
}

/// A scratch channel-buffer block preallocated at `initialize` and reused
/// every chunk: `rows` planar channels, each `capacity_frames` long. Chunk
/// execution only ever writes into the first `frames <= capacity_frames`
/// samples of the first `active_rows <= rows` channels, so this never
/// grows or shrinks on the hot path.
struct ChannelScratch {
    rows: Vec<Vec<f32>>,
    capacity_frames: usize,
}

impl ChannelScratch {
    fn new(row_count: usize, capacity_frames: usize) -> Self {
        ChannelScratch {
            rows: vec![vec![0.0; capacity_frames.max(1)]; row_count.max(1)],
            capacity_frames: capacity_frames.max(1),
        }
    }

    /// Borrow the first `active_rows` channels, each truncated to `frames`
    /// samples, as mutable slices for this chunk's use.
    fn borrow_mut(&mut self, active_rows: usize, frames: usize) -> Vec<&mut [f32]> {
        debug_assert!(active_rows <= self.rows.len());
        debug_assert!(frames <= self.capacity_frames);
        self.rows[..active_rows].iter_mut().map(|row| &mut row[..frames]).collect()
    }
}

struct Shared {
    voice_graph: Option<GraphRuntime>,
    fx_graph: Option<GraphRuntime>,
    library: TaskFunctionLibrary,
    allocator: BufferAllocator,
    arena: TaskMemoryArena,
    controller_events: Mutex<ControllerEventManager>,
    voice_allocator: Mutex<VoiceAllocator>,
    /// Frames in the chunk currently being processed; read by every task.
    frames: AtomicU32,
    sample_rate: u32,
    max_buffer_size: u32,
    output_channel_count: u32,
    input_channel_count: u32,
    /// Number of channels the voice graph's own outputs carry; `0` if no
    /// voice graph is configured. Distinct from `output_channel_count`
    /// (the host's channel layout) — the two are reconciled by the
    /// channel mixer, never conflated.
    voice_channel_count: u32,
    fx_channel_count: u32,
    activate_fx_immediately: bool,
    fx_ever_active: AtomicBool,
    /// `voice_channel_count` planar accumulation channels, each
    /// `max_buffer_size` long; persists across chunks, zeroed at the start
    /// of each one.
    accumulation: Mutex<Vec<f32>>,
    /// Reused scratch for whichever of {voice accumulation, FX output}
    /// feeds the channel mixer this chunk.
    pre_mix_scratch: Mutex<ChannelScratch>,
    /// Reused scratch for the channel mixer's host-channel-layout output.
    output_scratch: Mutex<ChannelScratch>,
    /// Reused scratch for deinterleaving the driver's input buffer.
    input_scratch: Mutex<ChannelScratch>,
    voice_remain_active: Vec<AtomicBool>,
    completion: Arc<(Mutex<u32>, Condvar)>,
    /// Weak so this doesn't form a reference cycle with the pool's own
    /// `Arc<Shared>` capture; set once, right after the pool starts.
    pool: Mutex<Option<std::sync::Weak<ThreadPool<TaskSubmission>>>>,
    events: crate::engine::profiler::EventConsole,
}

/// The top-level real-time task-graph execution engine (§4.1).
pub struct Executor {
    state: AtomicU8,
    shared: Option<Arc<Shared>>,
    pool: Option<Arc<ThreadPool<TaskSubmission>>>,
    settings: Option<Settings>,
    stopwatch: crate::engine::profiler::Stopwatch,
}

impl Default for Executor {
    fn default() -> Self {
        Executor {
            state: AtomicU8::new(State::Uninitialized as u8),
            shared: None,
            pool: None,
            settings: None,
            stopwatch: crate::engine::profiler::Stopwatch::new(false, 0.8),
        }
    }
}

impl Executor {
    pub fn new() -> Self {
        Executor::default()
    }

    /// One-time setup: allocates every buffer pool, the task-memory arena,
    /// and starts the worker thread pool. Never called again for the life
    /// of this executor; the real-time `execute` path that follows performs
    /// no further allocation.
    pub fn initialize(
        &mut self,
        instrument: RuntimeInstrument,
        settings: Settings,
        library: TaskFunctionLibrary,
    ) -> Result<(), InitError> {
        debug_assert_eq!(self.state.load(Ordering::Acquire), State::Uninitialized as u8);

        let max_voices = instrument.globals().max_voices.max(1);
        let max_buffer_size = settings.max_buffer_size;

        let mut pool_requests: Vec<PoolSizeRequest> = Vec::new();
        for primitive in BufferPrimitive::ALL {
            let mut count = 0u32;
            if let Some(g) = instrument.voice_graph() {
                count += g.max_buffer_concurrency(primitive) * max_voices;
            }
            if let Some(g) = instrument.fx_graph() {
                count += g.max_buffer_concurrency(primitive);
            }
            if count > 0 {
                pool_requests.push(PoolSizeRequest {
                    primitive,
                    buffer_size: max_buffer_size as usize,
                    buffer_count: count,
                });
            }
        }
        let allocator = BufferAllocator::new(&pool_requests);

        // The event console itself is needed to build `InitContext`s below,
        // so it's constructed before `Shared` rather than as one of its
        // fields directly.
        let events = crate::engine::profiler::EventConsole::new(
            settings.event_console_enabled,
            settings.controller_event_queue_size as usize,
        );

        // §4.6: each task's `memory_query(ctx_with_constant_args_only)`
        // decides how much of the arena it gets; tasks without one need none.
        let mut memory_requests: Vec<TaskMemoryRequest> = Vec::new();
        if let Some(g) = instrument.voice_graph() {
            for t in 0..g.task_count() as TaskIndex {
                let descriptor = library.get(g.task_function_index(t));
                if let Some(memory_query) = descriptor.memory_query {
                    let init_ctx = crate::registry::InitContext {
                        arguments: g.task_arguments(t),
                        sample_rate: settings.sample_rate,
                        task_index: t,
                        events: &events,
                    };
                    let bytes = memory_query(&init_ctx);
                    if bytes > 0 {
                        memory_requests.push(TaskMemoryRequest { task_index: t, bytes_per_instance: bytes, instance_count: max_voices });
                    }
                }
            }
        }
        if let Some(g) = instrument.fx_graph() {
            for t in 0..g.task_count() as TaskIndex {
                let descriptor = library.get(g.task_function_index(t));
                if let Some(memory_query) = descriptor.memory_query {
                    let init_ctx = crate::registry::InitContext {
                        arguments: g.task_arguments(t),
                        sample_rate: settings.sample_rate,
                        task_index: t,
                        events: &events,
                    };
                    let bytes = memory_query(&init_ctx);
                    if bytes > 0 {
                        memory_requests.push(TaskMemoryRequest { task_index: t, bytes_per_instance: bytes, instance_count: 1 });
                    }
                }
            }
        }
        let arena = TaskMemoryArena::new(&memory_requests)
            .map_err(|requested_bytes| InitError::TaskMemoryAllocationFailed { requested_bytes })?;

        let max_task_concurrency = instrument.voice_graph().map(|g| g.max_task_concurrency() * max_voices).unwrap_or(0)
            + instrument.fx_graph().map(|g| g.max_task_concurrency()).unwrap_or(0);

        let output_channel_count = settings.output_channel_count;
        let input_channel_count = settings.input_channel_count;
        let voice_channel_count = instrument.voice_graph().map(|g| g.output_count() as u32).unwrap_or(0);
        let fx_channel_count = instrument.fx_graph().map(|g| g.output_count() as u32).unwrap_or(0);
        let globals = instrument.globals();

        let voice_graph = instrument.voice_graph().map(|g| {
            let instances = (0..max_voices).map(|_| InstanceState::new(g)).collect();
            GraphRuntime { graph: g.clone(), instances }
        });
        let fx_graph = instrument
            .fx_graph()
            .map(|g| GraphRuntime { graph: g.clone(), instances: vec![InstanceState::new(g)] });

        let controller_events =
            ControllerEventManager::new(settings.max_controller_parameters, settings.controller_event_queue_size as usize);

        let pre_mix_rows = voice_channel_count.max(fx_channel_count).max(1) as usize;

        let shared = Arc::new(Shared {
            voice_graph,
            fx_graph,
            library,
            allocator,
            arena,
            controller_events: Mutex::new(controller_events),
            voice_allocator: Mutex::new(VoiceAllocator::new(max_voices)),
            frames: AtomicU32::new(0),
            sample_rate: settings.sample_rate,
            max_buffer_size,
            output_channel_count,
            input_channel_count,
            voice_channel_count,
            fx_channel_count,
            activate_fx_immediately: globals.activate_fx_immediately,
            fx_ever_active: AtomicBool::new(false),
            accumulation: Mutex::new(vec![0.0; voice_channel_count.max(1) as usize * max_buffer_size as usize]),
            pre_mix_scratch: Mutex::new(ChannelScratch::new(pre_mix_rows, max_buffer_size as usize)),
            output_scratch: Mutex::new(ChannelScratch::new(output_channel_count as usize, max_buffer_size as usize)),
            input_scratch: Mutex::new(ChannelScratch::new(input_channel_count as usize, max_buffer_size as usize)),
            voice_remain_active: (0..max_voices).map(|_| AtomicBool::new(false)).collect(),
            completion: Arc::new((Mutex::new(0), Condvar::new())),
            pool: Mutex::new(None),
            events,
        });

        let pool_shared = Arc::clone(&shared);
        let pool = Arc::new(ThreadPool::start(
            settings.thread_count,
            max_task_concurrency.max(1),
            true,
            move |submission| execute_one(&pool_shared, submission),
        )?);
        *shared.pool.lock() = Some(Arc::downgrade(&pool));

        // §4.1 `initialize`: "walk every task in every stage and invoke its
        // initializer callback (constant args only)", after every subsystem
        // above is up but before the state machine admits the first chunk.
        if let Some(g) = instrument.voice_graph() {
            run_initializers(&shared.library, g, settings.sample_rate, &shared.events);
        }
        if let Some(g) = instrument.fx_graph() {
            run_initializers(&shared.library, g, settings.sample_rate, &shared.events);
        }

        self.stopwatch = crate::engine::profiler::Stopwatch::new(settings.profiling_enabled, settings.profiling_threshold);
        self.shared = Some(shared);
        self.pool = Some(pool);
        self.settings = Some(settings);
        self.state.store(State::Initialized as u8, Ordering::Release);
        Ok(())
    }

    /// Drain soft-failure reports raised by task functions since the last
    /// call (§7, §4.11).
    pub fn drain_events(&self) -> Vec<crate::engine::profiler::RuntimeEvent> {
        self.shared.as_ref().expect("not initialized").events.drain()
    }

    pub fn note_on(&self, note_id: u64, velocity: f32, offset_samples: u32) -> u32 {
        let shared = self.shared.as_ref().expect("not initialized");
        shared.voice_allocator.lock().note_on(note_id, velocity, offset_samples)
    }

    pub fn note_off(&self, note_id: u64, release_sample: u32) {
        let shared = self.shared.as_ref().expect("not initialized");
        shared.voice_allocator.lock().note_off(note_id, release_sample);
    }

    pub fn start(&self) {
        self.state
            .compare_exchange(State::Initialized as u8, State::Running as u8, Ordering::AcqRel, Ordering::Acquire)
            .expect("start() called from a state other than Initialized");
    }

    /// Run one chunk: gather controller events, dispatch the voice graph
    /// for every active voice, sum into the accumulation buffer, run the FX
    /// graph (if active), then mix/convert into the driver's output buffer.
    ///
    /// `frames` must not exceed `max_buffer_size`; that is an invariant the
    /// driver is responsible for, asserted here rather than recovered from
    /// (§7, "driver mismatches").
    pub fn execute(&mut self, ctx: &mut ChunkContext) {
        debug_assert_eq!(self.state.load(Ordering::Acquire), State::Running as u8);
        let shared = self.shared.as_ref().expect("not initialized").clone();
        let pool = self.pool.as_ref().expect("not initialized");
        let settings = self.settings.as_mut().expect("not initialized");

        assert!(ctx.frames <= shared.max_buffer_size, "chunk frames exceeds max_buffer_size");
        assert_eq!(ctx.sample_rate, shared.sample_rate, "chunk sample rate does not match initialize()'s");

        let frames = ctx.frames as usize;
        if frames == 0 {
            return;
        }

        self.stopwatch.start();
        shared.frames.store(ctx.frames, Ordering::Relaxed);

        {
            let mut events = shared.controller_events.lock();
            let event_count = {
                let raw = events.raw_queue_mut();
                (settings.process_controller_events)(raw, ctx.buffer_time_sec, ctx.frames as f64 / shared.sample_rate as f64)
            };
            events.bucket(event_count);
        }

        if ctx.input_channel_count > 0 {
            let mut input_scratch = shared.input_scratch.lock();
            let mut refs = input_scratch.borrow_mut(ctx.input_channel_count as usize, frames);
            deinterleave_and_convert(ctx.input_buffer, frames, ctx.input_channel_count as usize, ctx.input_sample_format, &mut refs);
        }

        // Note: `VoiceAllocator::begin_chunk` clears the *previous* chunk's
        // transient `chunk_offset_samples`/`note_release_sample`, so it must
        // run only after this chunk's voice stage has consumed them (at the
        // bottom of this function) — not here, which would erase whatever
        // `note_on`/`note_off` just set for the chunk about to run.
        let active_voices: Vec<u32> = shared.voice_allocator.lock().active_voices().collect();

        if shared.voice_channel_count > 0 {
            let mut accum = shared.accumulation.lock();
            let channels = shared.voice_channel_count as usize;
            for ch in 0..channels {
                accum[ch * shared.max_buffer_size as usize..ch * shared.max_buffer_size as usize + frames]
                    .iter_mut()
                    .for_each(|s| *s = 0.0);
            }
        }

        if let Some(runtime) = &shared.voice_graph {
            if !active_voices.is_empty() {
                run_instances(&shared, pool, Stage::Voice, runtime, &active_voices, |_voice| {});
                for &voice in &active_voices {
                    accumulate_voice_output(&shared, runtime, voice);
                }
                for &voice in &active_voices {
                    let alive = remain_active(&shared, runtime, voice);
                    shared.voice_remain_active[voice as usize].store(alive, Ordering::Relaxed);
                    release_graph(&shared, runtime, voice);
                }
                shared.fx_ever_active.store(true, Ordering::Relaxed);
                let mut allocator = shared.voice_allocator.lock();
                for &voice in &active_voices {
                    if !shared.voice_remain_active[voice as usize].load(Ordering::Relaxed) {
                        allocator.deactivate(voice);
                    }
                }
            }
        }

        // §4.1.1 step 5: the FX graph runs this chunk if it's always on, or
        // has ever seen a voice; otherwise the voice accumulation feeds the
        // mixer directly.
        let fx_active_now = shared.fx_graph.is_some()
            && (shared.activate_fx_immediately || shared.fx_ever_active.load(Ordering::Relaxed));

        let output_channel_count = ctx.output_channel_count as usize;

        // Fill `pre_mix_scratch` with whichever source feeds the channel
        // mixer this chunk, then mix it into `output_scratch` at the
        // host's channel count.
        {
            let mut pre_mix = shared.pre_mix_scratch.lock();

            if fx_active_now {
                let runtime = shared.fx_graph.as_ref().unwrap();
                let fx_input_channels = shared.voice_channel_count.max(1) as usize;
                // Seeding must happen after `begin_chunk` has reset this
                // instance's buffer slots for the chunk, not before: seeding
                // before would have its freshly produced buffers wiped out
                // by `begin_chunk`'s "not yet produced this chunk" reset.
                run_instances(&shared, pool, Stage::Fx, runtime, &[0], |_voice| {
                    seed_fx_inputs(&shared, runtime, fx_input_channels, frames);
                });
                let fx_channels = (shared.fx_channel_count.max(1) as usize).min(pre_mix.rows.len());
                {
                    let mut rows = pre_mix.borrow_mut(fx_channels, frames);
                    collect_fx_outputs(&shared, runtime, &mut rows);
                }
                let alive = remain_active(&shared, runtime, 0);
                release_graph(&shared, runtime, 0);
                if !alive {
                    shared.fx_ever_active.store(false, Ordering::Relaxed);
                }

                let mut output_scratch = shared.output_scratch.lock();
                let source: Vec<&[f32]> =
                    pre_mix.rows[..fx_channels].iter().map(|row| &row[..frames]).collect();
                let mut dest = output_scratch.borrow_mut(output_channel_count, frames);
                mix_channels(&source, &mut dest, frames);
                convert_and_interleave(
                    &dest.iter().map(|s| &**s).collect::<Vec<_>>(),
                    frames,
                    ctx.output_sample_format,
                    ctx.output_buffer,
                );
            } else if shared.voice_channel_count > 0 {
                let accum = shared.accumulation.lock();
                let channels = shared.voice_channel_count as usize;
                let stride = shared.max_buffer_size as usize;
                {
                    let mut rows = pre_mix.borrow_mut(channels, frames);
                    for (ch, row) in rows.iter_mut().enumerate() {
                        row.copy_from_slice(&accum[ch * stride..ch * stride + frames]);
                    }
                }
                drop(accum);

                let mut output_scratch = shared.output_scratch.lock();
                let source: Vec<&[f32]> = pre_mix.rows[..channels].iter().map(|row| &row[..frames]).collect();
                let mut dest = output_scratch.borrow_mut(output_channel_count, frames);
                mix_channels(&source, &mut dest, frames);
                convert_and_interleave(
                    &dest.iter().map(|s| &**s).collect::<Vec<_>>(),
                    frames,
                    ctx.output_sample_format,
                    ctx.output_buffer,
                );
            } else {
                let mut output_scratch = shared.output_scratch.lock();
                let mut dest = output_scratch.borrow_mut(output_channel_count, frames);
                for row in dest.iter_mut() {
                    row.fill(0.0);
                }
                convert_and_interleave(
                    &dest.iter().map(|s| &**s).collect::<Vec<_>>(),
                    frames,
                    ctx.output_sample_format,
                    ctx.output_buffer,
                );
            }
        }

        // This chunk's mid-chunk offsets have now been consumed by every
        // reader (voice-graph task execution, accumulation); clear them so a
        // voice carried into the next chunk reports offset 0 unless
        // `note_on`/`note_off` sets a fresh one before then.
        shared.voice_allocator.lock().begin_chunk();

        let budget = std::time::Duration::from_secs_f64(frames as f64 / shared.sample_rate.max(1) as f64);
        self.stopwatch.stop(budget);
    }

    /// Join every worker thread. Must not be called while `execute` could
    /// still be in flight.
    pub fn terminate(&mut self) {
        self.state.store(State::Terminating as u8, Ordering::Release);
        if let Some(pool) = self.pool.take() {
            match Arc::try_unwrap(pool) {
                Ok(pool) => {
                    let leftover = pool.stop();
                    debug_assert_eq!(leftover, 0, "thread pool still had queued tasks at shutdown");
                }
                Err(_) => debug_assert!(false, "thread pool still referenced at shutdown"),
            }
        }
    }
}

/// Invoke every task's `initializer` callback for one graph (§4.1, §4.9).
/// Constant arguments only; fires once, at `Executor::initialize`.
fn run_initializers(
    library: &TaskFunctionLibrary,
    graph: &TaskGraph,
    sample_rate: u32,
    events: &crate::engine::profiler::EventConsole,
) {
    for t in 0..graph.task_count() as TaskIndex {
        let descriptor = library.get(graph.task_function_index(t));
        if let Some(initializer) = descriptor.initializer {
            let ctx = crate::registry::InitContext {
                arguments: graph.task_arguments(t),
                sample_rate,
                task_index: t,
                events,
            };
            initializer(&ctx);
        }
    }
}

/// Invoke every task's `voice_initializer` callback for one voice's
/// instance of the voice graph, the chunk it activates (§4.1.2 step 1,
/// §4.9). Each task sees its own task-memory slice for this voice, already
/// zeroed by the arena, but no dynamic buffers (none exist yet this chunk).
fn run_voice_initializers(shared: &Shared, graph: &TaskGraph, voice: u32) {
    for t in 0..graph.task_count() as TaskIndex {
        let descriptor = shared.library.get(graph.task_function_index(t));
        if let Some(voice_initializer) = descriptor.voice_initializer {
            let ctx = crate::registry::VoiceInitContext {
                arguments: graph.task_arguments(t),
                sample_rate: shared.sample_rate,
                scratch: shared.arena.slice(t, voice),
                task_index: t,
                events: &shared.events,
            };
            voice_initializer(&ctx);
        }
    }
}

/// Submit every active instance's initial tasks and block the calling
/// thread until all of them, and everything they transitively unblock,
/// have finished.
///
/// `before_dispatch` runs once per voice right after that voice's
/// `begin_chunk`, but before any task is submitted to the pool — the hook
/// the FX stage uses to seed its input buffers (`seed_fx_inputs`) into
/// freshly reset buffer slots rather than ones `begin_chunk` is about to
/// clobber.
fn run_instances(
    shared: &Arc<Shared>,
    pool: &ThreadPool<TaskSubmission>,
    stage: Stage,
    runtime: &GraphRuntime,
    voices: &[u32],
    mut before_dispatch: impl FnMut(u32),
) {
    if voices.is_empty() {
        return;
    }

    {
        let mut remaining = shared.completion.0.lock();
        *remaining = voices.len() as u32;
    }

    for &voice in voices {
        let index = if stage == Stage::Fx { 0 } else { voice as usize };
        runtime.instances[index].begin_chunk(&runtime.graph);
        before_dispatch(voice);

        // §4.1.2 step 1: a voice that activated this chunk gets its
        // `voice_initializer` callbacks run before its first task does.
        if stage == Stage::Voice && shared.voice_allocator.lock().activated_this_chunk(voice) {
            run_voice_initializers(shared, &runtime.graph, voice);
        }
    }

    // A graph with no tasks at all (a degenerate but legal hand-built
    // graph) never calls back into `execute_one`, so its completion must be
    // signaled here instead of from within a task.
    for &voice in voices {
        if runtime.graph.task_count() == 0 {
            let (lock, cv) = &*shared.completion;
            let mut remaining = lock.lock();
            *remaining -= 1;
            if *remaining == 0 {
                cv.notify_all();
            }
        } else {
            for &task in runtime.graph.initial_tasks() {
                pool.add_task(TaskSubmission { stage, voice_index: voice, task_index: task });
            }
        }
    }

    pool.resume();

    let (lock, cv) = &*shared.completion;
    let mut remaining = lock.lock();
    while *remaining > 0 {
        cv.wait(&mut remaining);
    }
    pool.pause();
}

fn execute_one(shared: &Arc<Shared>, submission: TaskSubmission) {
    let runtime = match submission.stage {
        Stage::Voice => shared.voice_graph.as_ref().expect("voice task submitted without a voice graph"),
        Stage::Fx => shared.fx_graph.as_ref().expect("fx task submitted without an fx graph"),
    };
    let instance_index = if submission.stage == Stage::Fx { 0 } else { submission.voice_index as usize };
    let instance = &runtime.instances[instance_index];
    let graph = &runtime.graph;
    let task = graph.task_arguments(submission.task_index);
    let function_index = graph.task_function_index(submission.task_index);
    let descriptor = shared.library.get(function_index);

    let voice_allocator = shared.voice_allocator.lock();
    let (offset, release, note_id, note_velocity) = if submission.stage == Stage::Voice {
        (
            voice_allocator.chunk_offset_samples(submission.voice_index),
            voice_allocator.note_release_sample(submission.voice_index),
            voice_allocator.note_id(submission.voice_index),
            voice_allocator.note_velocity(submission.voice_index),
        )
    } else {
        (0, None, 0, 0.0)
    };
    drop(voice_allocator);

    let events = shared.controller_events.lock();
    let arena_voice = if submission.stage == Stage::Fx { 0 } else { submission.voice_index };
    let scratch = shared.arena.slice(submission.task_index, arena_voice);
    // §4.1.2 step 5: tasks see the voice's *effective* buffer size, not the
    // full chunk — a voice triggered mid-chunk only produces
    // `frames - chunk_offset_samples` samples this chunk.
    let effective_frames = shared.frames.load(Ordering::Relaxed).saturating_sub(offset);
    let ctx = TaskContext {
        instance: TaskInstance { stage: submission.stage, voice_index: submission.voice_index },
        task_index: submission.task_index,
        arguments: task,
        buffers: &instance.buffers,
        allocator: &shared.allocator,
        controller_events: &events,
        events: &shared.events,
        scratch_ptr: scratch.as_mut_ptr(),
        scratch_len: scratch.len(),
        sample_rate: shared.sample_rate,
        frames: effective_frames,
        voice_chunk_offset_samples: offset,
        voice_note_release_sample: release,
        voice_note_id: note_id,
        voice_note_velocity: note_velocity,
    };
    (descriptor.body)(&ctx);
    drop(events);

    for argument in task {
        argument.for_each_consumed_buffer(|b| instance.buffers.release(b, &shared.allocator));
    }

    let mut ready = Vec::new();
    for &successor in graph.task_successors(submission.task_index) {
        let prior = instance.predecessors_remaining[successor as usize].fetch_sub(1, Ordering::AcqRel);
        if prior == 1 {
            ready.push(successor);
        }
    }

    let finished = instance.remaining_tasks.fetch_sub(1, Ordering::AcqRel) == 1;

    for successor in ready {
        resubmit(shared, TaskSubmission { stage: submission.stage, voice_index: submission.voice_index, task_index: successor });
    }

    if finished {
        let (lock, cv) = &*shared.completion;
        let mut remaining = lock.lock();
        *remaining -= 1;
        if *remaining == 0 {
            cv.notify_all();
        }
    }
}

fn resubmit(shared: &Arc<Shared>, submission: TaskSubmission) {
    let pool = shared.pool.lock().as_ref().and_then(|weak| weak.upgrade());
    pool.expect("resubmit called before the pool finished starting").add_task(submission);
}

/// Add one voice's output into the accumulation buffer, honoring its
/// `chunk_offset_samples` by shifting the add itself rather than mutating
/// the task's own output buffer in place (§9 Open Questions: "a safer
/// approach is to shift into the accumulation buffer during the add step
/// rather than mutating task outputs").
fn accumulate_voice_output(shared: &Shared, runtime: &GraphRuntime, voice: u32) {
    let instance = &runtime.instances[voice as usize];
    let offset = (shared.voice_allocator.lock().chunk_offset_samples(voice) as usize).min(shared.frames.load(Ordering::Relaxed) as usize);
    let frames = shared.frames.load(Ordering::Relaxed) as usize;
    let channel_count = shared.voice_channel_count as usize;
    let stride = shared.max_buffer_size as usize;
    let mut accum = shared.accumulation.lock();

    for (ch, output) in runtime.graph.outputs().iter().take(channel_count).enumerate() {
        match output {
            GraphOutput::Buffer(buffer_index) => {
                let buffer: &Buffer = instance.buffers.read(*buffer_index, &shared.allocator);
                if let Buffer::Real(real) = buffer {
                    for frame in offset..frames {
                        accum[ch * stride + frame] += real.sample(frame - offset);
                    }
                }
            }
            GraphOutput::Constant(Value::Real(v)) => {
                for frame in offset..frames {
                    accum[ch * stride + frame] += v;
                }
            }
            GraphOutput::Constant(_) => {}
        }
    }
}

fn remain_active(shared: &Shared, runtime: &GraphRuntime, voice: u32) -> bool {
    let instance = &runtime.instances[voice as usize];
    match runtime.graph.remain_active_output() {
        GraphOutput::Constant(Value::Bool(b)) => *b,
        GraphOutput::Constant(_) => true,
        GraphOutput::Buffer(b) => {
            let buffer = instance.buffers.read(*b, &shared.allocator);
            match buffer {
                Buffer::Bool(bools) => bools.sample(0),
                Buffer::Real(reals) => reals.sample(0) != 0.0,
            }
        }
    }
}

/// Releases this instance's graph-output and `remain_active` buffer
/// references (§4.3/§4.4). These are counted in `buffer_usages` alongside
/// every task-argument consumer (see `compute_buffer_usages`), so a normal
/// counted `release` is what's needed here, not an unconditional free: it
/// keeps a buffer that's also consumed by another task alive until both
/// that task and this call have released it, and must run only after every
/// reader of the output (accumulation, FX collection, `remain_active`) has
/// already read it.
fn release_graph(shared: &Shared, runtime: &GraphRuntime, index: u32) {
    let instance = &runtime.instances[index as usize];
    for output in runtime.graph.outputs() {
        if let Some(b) = output.buffer_index() {
            instance.buffers.release(b, &shared.allocator);
        }
    }
    if let Some(b) = runtime.graph.remain_active_output().buffer_index() {
        instance.buffers.release(b, &shared.allocator);
    }
}

/// Seed the FX graph's first `channel_count` dynamic buffers from the
/// voice-accumulation buffer, so FX task functions can wire their first
/// `in` arguments straight to those buffer indices. Must run after this
/// instance's `begin_chunk` (see `run_instances`'s `before_dispatch` hook),
/// since it acts as this chunk's producer for those buffers exactly like a
/// task's `out` argument would.
fn seed_fx_inputs(shared: &Shared, runtime: &GraphRuntime, channel_count: usize, frames: usize) {
    let instance = &runtime.instances[0];
    let accum = shared.accumulation.lock();
    let stride = shared.max_buffer_size as usize;
    for ch in 0..channel_count.min(runtime.graph.buffer_count()) {
        let buffer = instance.buffers.acquire_output(ch as u32, &shared.allocator);
        if let Buffer::Real(real) = buffer {
            real.raw_mut()[..frames].copy_from_slice(&accum[ch * stride..ch * stride + frames]);
        }
        // A seeded channel no FX task ever reads as an `in`/`inout`
        // argument has a usage count of zero, so nothing would ever
        // release it back to the pool; reclaim it here instead of leaking
        // the handle every chunk.
        if runtime.graph.buffer_usages(ch as u32) == 0 {
            instance.buffers.release_unconditionally(ch as u32, &shared.allocator);
        }
    }
}

fn collect_fx_outputs(shared: &Shared, runtime: &GraphRuntime, mixed: &mut [&mut [f32]]) {
    let instance = &runtime.instances[0];
    for (ch, output) in runtime.graph.outputs().iter().enumerate() {
        if ch >= mixed.len() {
            break;
        }
        match output {
            GraphOutput::Buffer(b) => {
                let buffer = instance.buffers.read(*b, &shared.allocator);
                if let Buffer::Real(real) = buffer {
                    for (frame, sample) in mixed[ch].iter_mut().enumerate() {
                        *sample = real.sample(frame);
                    }
                }
            }
            GraphOutput::Constant(Value::Real(v)) => {
                mixed[ch].iter_mut().for_each(|s| *s = *v);
            }
            GraphOutput::Constant(_) => {}
        }
    }
}
