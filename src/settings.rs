//! External interface types (§6): the settings struct passed to
//! `Executor::initialize`, and the per-chunk context passed to `execute`.

use serde::{Deserialize, Serialize};

/// The driver's sample format for input/output buffers. Only `Float32` is
/// required by the spec; others are reserved for a future driver shim.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SampleFormat {
    Float32,
}

impl SampleFormat {
    pub fn bytes_per_sample(self) -> usize {
        match self {
            SampleFormat::Float32 => 4,
        }
    }
}

/// A callback the driver provides to fill in this chunk's controller events.
/// Returns the number of valid entries written into `queue_slice`.
pub type ProcessControllerEventsFn = dyn FnMut(
        &mut [crate::engine::controller_events::TimestampedControllerEvent],
        f64,
        f64,
    ) -> usize
    + Send;

/// The subset of [`Settings`] that is plain data, kept separate so it can
/// derive `Serialize`/`Deserialize` for an external config-file loader; the
/// driver callback itself is never serializable.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct SettingsData {
    pub thread_count: u32,
    pub sample_rate: u32,
    pub max_buffer_size: u32,
    pub input_channel_count: u32,
    pub output_channel_count: u32,
    pub controller_event_queue_size: u32,
    pub max_controller_parameters: u32,
    pub event_console_enabled: bool,
    pub profiling_enabled: bool,
    /// Fraction (0..1) of the chunk's time budget above which an overrun
    /// event is reported.
    pub profiling_threshold: f32,
}

impl Default for SettingsData {
    fn default() -> Self {
        SettingsData {
            thread_count: 0,
            sample_rate: 48_000,
            max_buffer_size: 512,
            input_channel_count: 0,
            output_channel_count: 2,
            controller_event_queue_size: 256,
            max_controller_parameters: 64,
            event_console_enabled: false,
            profiling_enabled: false,
            profiling_threshold: 0.8,
        }
    }
}

/// Settings provided once, at [`crate::engine::Executor::initialize`].
pub struct Settings {
    pub data: SettingsData,
    pub process_controller_events: Box<ProcessControllerEventsFn>,
}

impl std::ops::Deref for Settings {
    type Target = SettingsData;

    fn deref(&self) -> &Self::Target {
        &self.data
    }
}

/// Per-chunk context passed to [`crate::engine::Executor::execute`].
pub struct ChunkContext<'a> {
    pub sample_rate: u32,
    pub frames: u32,
    pub buffer_time_sec: f64,
    pub input_channel_count: u32,
    pub input_sample_format: SampleFormat,
    pub input_buffer: &'a [u8],
    pub output_channel_count: u32,
    pub output_sample_format: SampleFormat,
    pub output_buffer: &'a mut [u8],
}
