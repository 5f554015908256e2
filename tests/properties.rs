//! Property tests for the invariants in spec.md §8: buffer-pool
//! conservation (no leaked buffer handles), and accumulation/
//! thread-count determinism.

use std::collections::HashMap;

use proptest::prelude::*;

use wavelang_engine::registry::builtins;
use wavelang_engine::{
    BufferIndex, BufferPrimitive, ChunkContext, Executor, GraphOutput, InstrumentGlobals, RealInput,
    RuntimeInstrument, SampleFormat, Settings, SettingsData, TaskArgument, TaskFunctionLibrary,
    TaskGraphBuilder,
};

fn settings(thread_count: u32, output_channel_count: u32, max_buffer_size: u32) -> Settings {
    Settings {
        data: SettingsData {
            thread_count,
            sample_rate: 48_000,
            max_buffer_size,
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

fn chunk_ctx(frames: u32, output_channel_count: u32, output_buffer: &mut [u8]) -> ChunkContext<'_> {
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

/// A linear chain of `add(running_sum, const step) -> next` tasks, `length`
/// tasks long, each adding `step` to a running total that starts at 0.
/// Exercises the buffer manager's usage-count-to-zero release path across
/// `length` producer/consumer hops instead of a single task.
fn add_chain_voice_graph(length: usize, step: f32) -> (wavelang_engine::TaskGraph, BufferIndex) {
    let mut builder = TaskGraphBuilder::new();
    let mut map = HashMap::new();
    map.insert(BufferPrimitive::Real, 2);

    let mut running: BufferIndex = builder.add_buffer(BufferPrimitive::Real);
    builder.add_task(
        builtins::CONSTANT,
        vec![TaskArgument::RealIn(RealInput::Constant(0.0)), TaskArgument::RealOut(running)],
    );

    for i in 0..length {
        let next = builder.add_buffer(BufferPrimitive::Real);
        let task = builder.add_task(
            builtins::ADD,
            vec![
                TaskArgument::RealIn(RealInput::Buffer(running)),
                TaskArgument::RealIn(RealInput::Constant(step)),
                TaskArgument::RealOut(next),
            ],
        );
        // Edge from the task that produced `running` to this one; since
        // each buffer has exactly one producer task, its index among tasks
        // is `i` for i > 0, or the seed task (0) for i == 0.
        builder.add_edge(i as u32, task);
        running = next;
    }

    builder.set_outputs(vec![GraphOutput::Buffer(running)]);
    let graph = builder.build((length + 1) as u32, map);
    (graph, running)
}

proptest! {
    /// Running many chunks through a multi-task chain never panics on pool
    /// exhaustion (every buffer handle returned within a chunk) and always
    /// computes the expected arithmetic sum.
    #[test]
    fn buffer_pool_conserved_across_chunks_and_chain_lengths(
        length in 1usize..12,
        step in -4.0f32..4.0,
        chunk_count in 1u32..8,
    ) {
        let (graph, _) = add_chain_voice_graph(length, step);
        let instrument = RuntimeInstrument::new(
            Some(graph),
            None,
            InstrumentGlobals { max_voices: 1, sample_rate: 48_000, chunk_size: 8, activate_fx_immediately: false },
        )
        .unwrap();

        let mut executor = Executor::new();
        executor.initialize(instrument, settings(0, 1, 8), TaskFunctionLibrary::with_builtins()).unwrap();
        executor.start();
        executor.note_on(1, 1.0, 0);

        let expected = step * length as f32;
        for _ in 0..chunk_count {
            let mut output = vec![0u8; 8 * 4];
            executor.execute(&mut chunk_ctx(8, 1, &mut output));
            let samples: &[f32] = bytemuck::cast_slice(&output);
            for &s in samples {
                prop_assert!((s - expected).abs() < 1e-3, "expected {expected}, got {s}");
            }
        }
    }

    /// Two voices emitting random constants sum exactly, independent of the
    /// order their note-ons were issued in (accumulation invariance, §8).
    #[test]
    fn two_voice_accumulation_is_order_independent(a in -2.0f32..2.0, b in -2.0f32..2.0) {
        let forward = run_two_constant_voices((1, a), (2, b));
        let reversed = run_two_constant_voices((2, b), (1, a));
        prop_assert_eq!(forward.to_bits(), reversed.to_bits());
    }

    /// The same graph and inputs produce bit-identical output whether run
    /// with an inline (`thread_count = 0`) or multi-threaded pool.
    #[test]
    fn thread_count_does_not_affect_output(step in -3.0f32..3.0, length in 1usize..6) {
        let serial = run_add_chain(length, step, 0);
        let threaded = run_add_chain(length, step, 3);
        prop_assert_eq!(serial.to_bits(), threaded.to_bits());
    }
}

/// A voice graph with a single `velocity -> out0` task: each voice's
/// contribution to the sum is that voice's own note velocity, letting this
/// test vary what each of the two voices emits (a plain compile-time
/// constant task argument is shared by every voice of a graph, so it can't
/// express "voice A emits `a`, voice B emits `b`").
fn run_two_constant_voices(first: (u64, f32), second: (u64, f32)) -> f32 {
    let mut builder = TaskGraphBuilder::new();
    let out = builder.add_buffer(BufferPrimitive::Real);
    builder.add_task(builtins::VELOCITY, vec![TaskArgument::RealOut(out)]);
    builder.set_outputs(vec![GraphOutput::Buffer(out)]);
    let graph = builder.build(1, {
        let mut m = HashMap::new();
        m.insert(BufferPrimitive::Real, 2);
        m
    });

    let instrument = RuntimeInstrument::new(
        Some(graph),
        None,
        InstrumentGlobals { max_voices: 2, sample_rate: 48_000, chunk_size: 8, activate_fx_immediately: false },
    )
    .unwrap();

    let mut executor = Executor::new();
    executor.initialize(instrument, settings(0, 1, 8), TaskFunctionLibrary::with_builtins()).unwrap();
    executor.start();
    executor.note_on(first.0, first.1, 0);
    executor.note_on(second.0, second.1, 0);

    let mut output = vec![0u8; 8 * 4];
    executor.execute(&mut chunk_ctx(8, 1, &mut output));
    let samples: &[f32] = bytemuck::cast_slice(&output);
    samples[0]
}

fn run_add_chain(length: usize, step: f32, thread_count: u32) -> f32 {
    let (graph, _) = add_chain_voice_graph(length, step);
    let instrument = RuntimeInstrument::new(
        Some(graph),
        None,
        InstrumentGlobals { max_voices: 1, sample_rate: 48_000, chunk_size: 8, activate_fx_immediately: false },
    )
    .unwrap();

    let mut executor = Executor::new();
    executor.initialize(instrument, settings(thread_count, 1, 8), TaskFunctionLibrary::with_builtins()).unwrap();
    executor.start();
    executor.note_on(1, 1.0, 0);

    let mut output = vec![0u8; 8 * 4];
    executor.execute(&mut chunk_ctx(8, 1, &mut output));
    let samples: &[f32] = bytemuck::cast_slice(&output);
    samples[0]
}
