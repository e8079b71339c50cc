// SPDX-License-Identifier: GPL-3.0-only

//! Capture driver boundary
//!
//! A capture card driver is reached through two traits:
//!
//! - [`CaptureDriver`]: what the source asks of the driver (create the
//!   device, select inputs, start and stop streaming)
//! - [`DriverCallbacks`]: what the driver reports back, from its own thread
//!   (format changes, signal loss, frames)
//!
//! Frames cross the boundary as [`CaptureFrame`] values that hand their
//! buffer back to the driver when dropped.

pub mod format_converters;
pub mod frame_loop;
pub mod frame_queue;
pub mod simulated;
pub mod state;
pub mod types;

pub use frame_loop::{LoopAction, TickLoopController};
pub use frame_queue::FrameQueue;
pub use simulated::{SimulatedDriver, TestPattern};
pub use state::{AutoDetect, DeviceState};
pub use types::*;

use crate::gpu::DeviceSlice;
use std::fmt;
use std::sync::Arc;

/// Driver-level errors
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DriverError {
    /// The vendor SDK could not be loaded; not fatal, bring-up is retried
    SdkUnavailable(String),
    /// No device matches the requested name and channel
    DeviceNotFound(String),
    /// The driver refused an operation
    Rejected(String),
}

impl fmt::Display for DriverError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DriverError::SdkUnavailable(msg) => write!(f, "Capture SDK unavailable: {}", msg),
            DriverError::DeviceNotFound(msg) => write!(f, "Capture device not found: {}", msg),
            DriverError::Rejected(msg) => write!(f, "Driver rejected request: {}", msg),
        }
    }
}

impl std::error::Error for DriverError {}

/// Result type for driver operations
pub type DriverResult<T> = Result<T, DriverError>;

/// Device-wide driver properties
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DeviceProperty {
    /// Frame transfer method
    IoMethod,
    /// Video output path inside the driver
    VideoOutputBackend,
    /// SDI 12G link mode (0 quad-link, 1 two-sample interleave)
    Sdi12gMode,
}

/// Events the driver delivers from its callback thread
///
/// Implementations must be cheap and must not block: the driver stalls
/// capture while a callback runs.
pub trait DriverCallbacks: Send + Sync {
    /// A signal was locked (or its format changed)
    fn on_format_changed(&self, change: &FormatChange);

    /// The signal went away after having been present
    fn on_signal_removed(&self, video_input: VideoInput, audio_input: AudioInput);

    /// The input carries no signal
    fn on_no_signal_detected(&self, video_input: VideoInput, audio_input: AudioInput);

    /// A video frame is ready; dropping `frame` returns it to the driver
    fn on_video_preview(&self, sample_time: f64, frame: CaptureFrame);

    /// Audio samples are ready; the source ignores audio
    fn on_audio_preview(&self, _sample_time: f64, _data: &[u8]) {}
}

/// Capture card driver
///
/// All methods are called from the thread that owns the source. Callbacks
/// registered with [`register_callbacks`](Self::register_callbacks) fire on
/// the driver's own thread between [`run`](Self::run) and [`stop`](Self::stop).
pub trait CaptureDriver: Send {
    /// Short driver name for logs
    fn name(&self) -> &str;

    // ===== Device =====

    /// Open `device` on 0-based `channel`
    ///
    /// # Returns
    /// * `Err(DriverError::SdkUnavailable)` - the SDK is not loadable yet
    fn create(&mut self, device: &str, channel: u32) -> DriverResult<()>;

    /// Close the device opened by [`create`](Self::create)
    fn destroy(&mut self) -> DriverResult<()>;

    /// Whether capture hardware answers on the opened device
    fn probe(&mut self) -> bool;

    fn set_custom_property(&mut self, property: DeviceProperty, value: u32) -> DriverResult<()>;

    // ===== Callbacks =====

    /// Install the format and signal callbacks
    fn register_callbacks(&mut self, callbacks: Arc<dyn DriverCallbacks>) -> DriverResult<()>;

    /// Register (or unregister) the video and audio preview callbacks
    fn set_preview_enabled(&mut self, enabled: bool) -> DriverResult<()>;

    // ===== Input and format =====

    fn set_video_input(&mut self, input: VideoInput) -> DriverResult<()>;

    /// Input the driver is actually using
    fn video_input(&self) -> DriverResult<VideoInput>;

    fn set_output_format(&mut self, format: PixelFormat) -> DriverResult<()>;

    // ===== GPU direct (RDMA) =====

    /// Let the driver write frames straight into `buffer`
    fn bind_gpu_direct_buffer(
        &mut self,
        index: usize,
        buffer: DeviceSlice,
        len: usize,
    ) -> DriverResult<()>;

    fn unbind_gpu_direct_buffer(&mut self, index: usize) -> DriverResult<()>;

    // ===== Streaming =====

    fn run(&mut self) -> DriverResult<()>;

    fn stop(&mut self) -> DriverResult<()>;
}
