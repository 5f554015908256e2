//! End-to-end scenarios from spec.md §8 "Testable properties / End-to-end
//! scenarios". Scenario 6 (parameter-change bucketing) is covered directly
//! against `ControllerEventManager` in `engine::controller_events`'s own
//! unit tests, since it exercises that subsystem in isolation rather than a
//! full chunk.

use std::collections::HashMap;

use wavelang_engine::engine::TaskContext;
use wavelang_engine::registry::builtins;
use wavelang_engine::{
    BufferIndex, BufferPrimitive, ChunkContext, Executor, GraphOutput, InstrumentGlobals, RealInput,
    RuntimeInstrument, SampleFormat, Settings, SettingsData, TaskArgument, TaskFunctionDescriptor,
    TaskFunctionLibrary, TaskGraphBuilder, Value,
};

fn settings(output_channel_count: u32, frames: u32) -> Settings {
    Settings {
        data: SettingsData {
            thread_count: 0,
            sample_rate: 48_000,
            max_buffer_size: frames,
            input_channel_count: 0,
            output_channel_count,
            controller_event_queue_size: 16,
            max_controller_parameters: 8,
            event_console_enabled: false,
            profiling_enabled: false,
            profiling_threshold: 0.8,
        },
        process_controller_events: Box::new(|_queue, _buffer_time, _duration| 0),
    }
}

fn chunk_ctx<'a>(frames: u32, output_channel_count: u32, output_buffer: &'a mut [u8]) -> ChunkContext<'a> {
    ChunkContext {
        sample_rate: 48_000,
        frames,
        buffer_time_sec: 0.0,
        input_channel_count: 0,
        input_sample_format: SampleFormat::Float32,
        input_buffer: &[],
        output_channel_count,
        output_sample_format: SampleFormat::Float32,
        output_buffer,
    }
}

fn real_concurrency(n: u32) -> HashMap<BufferPrimitive, u32> {
    let mut map = HashMap::new();
    map.insert(BufferPrimitive::Real, n);
    map
}

/// A voice graph with a single task `multiply(const a, const b) -> out0`,
/// output = out0, remain_active = `true`.
fn multiply_constant_voice_graph(a: f32, b: f32) -> wavelang_engine::TaskGraph {
    let mut builder = TaskGraphBuilder::new();
    let out: BufferIndex = builder.add_buffer(BufferPrimitive::Real);
    builder.add_task(
        builtins::MULTIPLY,
        vec![
            TaskArgument::RealIn(RealInput::Constant(a)),
            TaskArgument::RealIn(RealInput::Constant(b)),
            TaskArgument::RealOut(out),
        ],
    );
    builder.set_outputs(vec![GraphOutput::Buffer(out)]);
    builder.build(1, real_concurrency(1))
}

/// A voice graph with a single `constant(value) -> out0` task.
fn constant_voice_graph(value: f32) -> wavelang_engine::TaskGraph {
    let mut builder = TaskGraphBuilder::new();
    let out: BufferIndex = builder.add_buffer(BufferPrimitive::Real);
    builder.add_task(
        builtins::CONSTANT,
        vec![TaskArgument::RealIn(RealInput::Constant(value)), TaskArgument::RealOut(out)],
    );
    builder.set_outputs(vec![GraphOutput::Buffer(out)]);
    builder.build(1, real_concurrency(1))
}

fn library() -> TaskFunctionLibrary {
    TaskFunctionLibrary::with_builtins()
}

#[test]
fn scenario_1_single_constant_voice() {
    let graph = multiply_constant_voice_graph(0.5, 0.25);
    let instrument = RuntimeInstrument::new(
        Some(graph),
        None,
        InstrumentGlobals { max_voices: 1, sample_rate: 48_000, chunk_size: 8, activate_fx_immediately: false },
    )
    .unwrap();

    let mut executor = Executor::new();
    executor.initialize(instrument, settings(1, 8), library()).unwrap();
    executor.start();
    executor.note_on(1, 1.0, 0);

    let mut output = vec![0u8; 8 * 1 * 4];
    executor.execute(&mut chunk_ctx(8, 1, &mut output));

    let samples: &[f32] = bytemuck::cast_slice(&output);
    assert_eq!(samples.len(), 8);
    for &s in samples {
        assert!((s - 0.125).abs() < 1e-6, "expected 0.125, got {s}");
    }
}

#[test]
fn scenario_2_mono_to_stereo() {
    let graph = multiply_constant_voice_graph(0.5, 0.25);
    let instrument = RuntimeInstrument::new(
        Some(graph),
        None,
        InstrumentGlobals { max_voices: 1, sample_rate: 48_000, chunk_size: 8, activate_fx_immediately: false },
    )
    .unwrap();

    let mut executor = Executor::new();
    executor.initialize(instrument, settings(2, 8), library()).unwrap();
    executor.start();
    executor.note_on(1, 1.0, 0);

    let mut output = vec![0u8; 8 * 2 * 4];
    executor.execute(&mut chunk_ctx(8, 2, &mut output));

    let samples: &[f32] = bytemuck::cast_slice(&output);
    assert_eq!(samples.len(), 16, "16 interleaved floats for 8 frames x 2 channels");
    for &s in samples {
        assert!((s - 0.125).abs() < 1e-6, "expected 0.125, got {s}");
    }
}

#[test]
fn scenario_3_two_voices_sum() {
    let graph = constant_voice_graph(0.25);
    let instrument = RuntimeInstrument::new(
        Some(graph),
        None,
        InstrumentGlobals { max_voices: 2, sample_rate: 48_000, chunk_size: 8, activate_fx_immediately: false },
    )
    .unwrap();

    let mut executor = Executor::new();
    executor.initialize(instrument, settings(1, 8), library()).unwrap();
    executor.start();
    executor.note_on(1, 1.0, 0);
    executor.note_on(2, 1.0, 0);

    let mut output = vec![0u8; 8 * 4];
    executor.execute(&mut chunk_ctx(8, 1, &mut output));

    let samples: &[f32] = bytemuck::cast_slice(&output);
    for &s in samples {
        assert!((s - 0.5).abs() < 1e-6, "expected 0.5, got {s}");
    }
}

#[test]
fn scenario_4_mid_chunk_note_on() {
    let graph = constant_voice_graph(1.0);
    let instrument = RuntimeInstrument::new(
        Some(graph),
        None,
        InstrumentGlobals { max_voices: 1, sample_rate: 48_000, chunk_size: 8, activate_fx_immediately: false },
    )
    .unwrap();

    let mut executor = Executor::new();
    executor.initialize(instrument, settings(1, 8), library()).unwrap();
    executor.start();
    executor.note_on(1, 1.0, 4);

    let mut output = vec![0u8; 8 * 4];
    executor.execute(&mut chunk_ctx(8, 1, &mut output));

    let samples: &[f32] = bytemuck::cast_slice(&output);
    assert_eq!(&samples[0..4], &[0.0, 0.0, 0.0, 0.0]);
    assert_eq!(&samples[4..8], &[1.0, 1.0, 1.0, 1.0]);
}

#[test]
fn scenario_5_remain_active_false_deactivates_after_one_chunk() {
    let mut builder = TaskGraphBuilder::new();
    let out: BufferIndex = builder.add_buffer(BufferPrimitive::Real);
    builder.add_task(
        builtins::CONSTANT,
        vec![TaskArgument::RealIn(RealInput::Constant(0.3)), TaskArgument::RealOut(out)],
    );
    builder.set_outputs(vec![GraphOutput::Buffer(out)]);
    builder.set_remain_active(GraphOutput::Constant(Value::Bool(false)));
    let graph = builder.build(1, real_concurrency(1));

    let instrument = RuntimeInstrument::new(
        Some(graph),
        None,
        InstrumentGlobals { max_voices: 1, sample_rate: 48_000, chunk_size: 8, activate_fx_immediately: false },
    )
    .unwrap();

    let mut executor = Executor::new();
    executor.initialize(instrument, settings(1, 8), library()).unwrap();
    executor.start();
    executor.note_on(1, 1.0, 0);

    let mut first = vec![0u8; 8 * 4];
    executor.execute(&mut chunk_ctx(8, 1, &mut first));
    let first_samples: &[f32] = bytemuck::cast_slice(&first);
    for &s in first_samples {
        assert!((s - 0.3).abs() < 1e-6);
    }

    let mut second = vec![0u8; 8 * 4];
    executor.execute(&mut chunk_ctx(8, 1, &mut second));
    let second_samples: &[f32] = bytemuck::cast_slice(&second);
    for &s in second_samples {
        assert_eq!(s, 0.0, "voice must have been deactivated after remain_active=false");
    }
}

#[test]
fn frames_zero_returns_immediately() {
    let graph = constant_voice_graph(1.0);
    let instrument = RuntimeInstrument::new(
        Some(graph),
        None,
        InstrumentGlobals { max_voices: 1, sample_rate: 48_000, chunk_size: 8, activate_fx_immediately: false },
    )
    .unwrap();

    let mut executor = Executor::new();
    executor.initialize(instrument, settings(1, 8), library()).unwrap();
    executor.start();
    executor.note_on(1, 1.0, 0);

    let mut output: Vec<u8> = Vec::new();
    executor.execute(&mut chunk_ctx(0, 1, &mut output));
    assert!(output.is_empty());
}

/// An FX graph that reads buffer 0 (the channel the executor seeds from the
/// voice-accumulation buffer) through a `gain(signal, const 2.0) -> out1`
/// task, i.e. it actually consumes the signal the voice graph produced
/// rather than ignoring it.
fn doubling_fx_graph() -> wavelang_engine::TaskGraph {
    let mut builder = TaskGraphBuilder::new();
    let fx_in: BufferIndex = builder.add_buffer(BufferPrimitive::Real);
    let fx_out: BufferIndex = builder.add_buffer(BufferPrimitive::Real);
    builder.add_task(
        builtins::GAIN,
        vec![
            TaskArgument::RealIn(RealInput::Buffer(fx_in)),
            TaskArgument::RealIn(RealInput::Constant(2.0)),
            TaskArgument::RealOut(fx_out),
        ],
    );
    builder.set_outputs(vec![GraphOutput::Buffer(fx_out)]);
    builder.build(1, real_concurrency(2))
}

#[test]
fn fx_graph_reads_and_transforms_the_voice_graphs_summed_output() {
    // Voice graph emits a constant 0.5; FX doubles whatever it's handed, so
    // the chunk's output must be 1.0 once FX actually runs on voice output
    // rather than a silent fallback.
    let voice_graph = constant_voice_graph(0.5);
    let fx_graph = doubling_fx_graph();

    let instrument = RuntimeInstrument::new(
        Some(voice_graph),
        Some(fx_graph),
        InstrumentGlobals { max_voices: 1, sample_rate: 48_000, chunk_size: 8, activate_fx_immediately: false },
    )
    .unwrap();

    let mut executor = Executor::new();
    executor.initialize(instrument, settings(1, 8), library()).unwrap();
    executor.start();
    executor.note_on(1, 1.0, 0);

    let mut first = vec![0u8; 8 * 4];
    executor.execute(&mut chunk_ctx(8, 1, &mut first));
    let first_samples: &[f32] = bytemuck::cast_slice(&first);
    for &s in first_samples {
        assert!((s - 1.0).abs() < 1e-6, "expected voice(0.5) doubled by FX to 1.0, got {s}");
    }

    // A second chunk with the same still-active voice exercises that
    // `seed_fx_inputs` doesn't leak or corrupt a buffer slot across chunks.
    let mut second = vec![0u8; 8 * 4];
    executor.execute(&mut chunk_ctx(8, 1, &mut second));
    let second_samples: &[f32] = bytemuck::cast_slice(&second);
    for &s in second_samples {
        assert!((s - 1.0).abs() < 1e-6, "expected 1.0 again on the second chunk, got {s}");
    }
}

#[test]
fn no_voice_graph_configured_falls_back_to_fx_only_and_zeroes_without_fx() {
    // An instrument with only an FX graph, which happens to be inactive
    // (activate_fx_immediately = false, and no voice ever ran): output must
    // be silence, not garbage.
    let mut builder = TaskGraphBuilder::new();
    let out: BufferIndex = builder.add_buffer(BufferPrimitive::Real);
    builder.add_task(
        builtins::CONSTANT,
        vec![TaskArgument::RealIn(RealInput::Constant(1.0)), TaskArgument::RealOut(out)],
    );
    builder.set_outputs(vec![GraphOutput::Buffer(out)]);
    let fx_graph = builder.build(1, real_concurrency(1));

    let instrument = RuntimeInstrument::new(
        None,
        Some(fx_graph),
        InstrumentGlobals { max_voices: 1, sample_rate: 48_000, chunk_size: 8, activate_fx_immediately: false },
    )
    .unwrap();

    let mut executor = Executor::new();
    executor.initialize(instrument, settings(1, 8), library()).unwrap();
    executor.start();

    let mut output = vec![0u8; 8 * 4];
    executor.execute(&mut chunk_ctx(8, 1, &mut output));
    let samples: &[f32] = bytemuck::cast_slice(&output);
    for &s in samples {
        assert_eq!(s, 0.0);
    }
}

/// A voice graph with a single `voice_start_marker(out) -> out0` task,
/// exercising the `voice_initializer` lifecycle callback (§4.9).
fn voice_start_marker_graph() -> wavelang_engine::TaskGraph {
    let mut builder = TaskGraphBuilder::new();
    let out: BufferIndex = builder.add_buffer(BufferPrimitive::Real);
    builder.add_task(builtins::VOICE_START_MARKER, vec![TaskArgument::RealOut(out)]);
    builder.set_outputs(vec![GraphOutput::Buffer(out)]);
    builder.build(1, real_concurrency(1))
}

#[test]
fn voice_initializer_runs_before_the_voice_s_first_chunk() {
    let graph = voice_start_marker_graph();
    let instrument = RuntimeInstrument::new(
        Some(graph),
        None,
        InstrumentGlobals { max_voices: 1, sample_rate: 48_000, chunk_size: 8, activate_fx_immediately: false },
    )
    .unwrap();

    let mut executor = Executor::new();
    executor.initialize(instrument, settings(1, 8), library()).unwrap();
    executor.start();
    executor.note_on(1, 1.0, 0);

    let mut output = vec![0u8; 8 * 4];
    executor.execute(&mut chunk_ctx(8, 1, &mut output));

    let samples: &[f32] = bytemuck::cast_slice(&output);
    for &s in samples {
        assert_eq!(s, 1.0, "voice_initializer must have stamped the scratch byte before this chunk ran");
    }

    executor.terminate();
}

/// A task function that reports a soft failure through its event
/// interface (§6, §7 "runtime soft failures") every time it runs, without
/// producing anything meaningful in its output buffer.
fn reporting_task(ctx: &TaskContext) {
    ctx.report_event("reporting_task always reports");
    let out_index = match &ctx.arguments[0] {
        TaskArgument::RealOut(out) => *out,
        _ => panic!("reporting_task: expected (out: Real)"),
    };
    ctx.output_buffer(out_index).as_real_mut().set_constant_value(0.0);
}

#[test]
fn report_event_is_drained_through_the_event_console() {
    let mut lib = TaskFunctionLibrary::with_builtins();
    let reporting_index = lib.register(TaskFunctionDescriptor {
        name: "reporting_task",
        memory_query: None,
        initializer: None,
        voice_initializer: None,
        body: reporting_task,
    });

    let mut builder = TaskGraphBuilder::new();
    let out: BufferIndex = builder.add_buffer(BufferPrimitive::Real);
    builder.add_task(reporting_index, vec![TaskArgument::RealOut(out)]);
    builder.set_outputs(vec![GraphOutput::Buffer(out)]);
    let graph = builder.build(1, real_concurrency(1));

    let instrument = RuntimeInstrument::new(
        Some(graph),
        None,
        InstrumentGlobals { max_voices: 1, sample_rate: 48_000, chunk_size: 8, activate_fx_immediately: false },
    )
    .unwrap();

    let mut executor = Executor::new();
    let mut data = settings(1, 8);
    data.data.event_console_enabled = true;
    executor.initialize(instrument, data, lib).unwrap();
    executor.start();
    executor.note_on(1, 1.0, 0);

    let mut output = vec![0u8; 8 * 4];
    executor.execute(&mut chunk_ctx(8, 1, &mut output));

    let events = executor.drain_events();
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].message, "reporting_task always reports");
    assert!(executor.drain_events().is_empty(), "drain_events must not return already-drained events again");
}
