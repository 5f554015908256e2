//! Lightweight chunk-timing diagnostics and the runtime event console
//! (§4.11). Neither of these sit on the task-dispatch hot path: a
//! `Stopwatch` is read by the audio thread itself around `execute()`, and
//! the event ring is an SPSC queue tasks push onto without blocking.

use std::time::{Duration, Instant};

use ringbuffer::{AllocRingBuffer, RingBuffer};

/// Measures one chunk's wall-clock execution time against its real-time
/// budget (`frames / sample_rate`), logging a warning through the `log`
/// crate when a chunk runs past `profiling_threshold` of that budget.
pub struct Stopwatch {
    enabled: bool,
    threshold: f32,
    started: Option<Instant>,
}

impl Stopwatch {
    pub fn new(enabled: bool, threshold: f32) -> Self {
        Stopwatch { enabled, threshold, started: None }
    }

    pub fn start(&mut self) {
        if self.enabled {
            self.started = Some(Instant::now());
        }
    }

    /// Call once the chunk's output has been written; `budget` is the
    /// chunk's real-time deadline (`frames / sample_rate` seconds).
    pub fn stop(&mut self, budget: Duration) {
        let Some(started) = self.started.take() else { return };
        let elapsed = started.elapsed();
        if budget.as_secs_f32() > 0.0 && elapsed.as_secs_f32() > budget.as_secs_f32() * self.threshold {
            log::warn!(
                "chunk took {:.3}ms, {:.0}% of its {:.3}ms budget",
                elapsed.as_secs_f64() * 1000.0,
                (elapsed.as_secs_f32() / budget.as_secs_f32()) * 100.0,
                budget.as_secs_f64() * 1000.0,
            );
        }
    }
}

/// A runtime soft-failure report raised by a task function (§7: "runtime
/// soft failures"). The chunk continues with silence for that task's
/// output; this is purely diagnostic.
#[derive(Debug, Clone)]
pub struct RuntimeEvent {
    pub task_index: u32,
    pub message: &'static str,
}

/// A single-producer/single-consumer ring of runtime events, read off the
/// audio thread after each chunk (or by an external diagnostics consumer)
/// so a task function never blocks reporting a soft failure.
pub struct EventConsole {
    enabled: bool,
    ring: parking_lot::Mutex<AllocRingBuffer<RuntimeEvent>>,
}

impl EventConsole {
    pub fn new(enabled: bool, capacity: usize) -> Self {
        EventConsole {
            enabled,
            ring: parking_lot::Mutex::new(AllocRingBuffer::new(capacity.max(1))),
        }
    }

    /// Push a soft-failure report. Never blocks; oldest entries are
    /// overwritten once the ring is full rather than losing a task's
    /// forward progress waiting for room.
    pub fn report(&self, task_index: u32, message: &'static str) {
        if !self.enabled {
            return;
        }
        self.ring.lock().push(RuntimeEvent { task_index, message });
    }

    /// Drain every event reported since the last drain.
    pub fn drain(&self) -> Vec<RuntimeEvent> {
        let mut ring = self.ring.lock();
        let drained: Vec<RuntimeEvent> = ring.iter().cloned().collect();
        ring.clear();
        drained
    }
}
