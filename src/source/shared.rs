// SPDX-License-Identifier: GPL-3.0-only

//! State shared between the driver callback thread and the tick thread

use crate::backends::capture::{
    AudioInput, AutoDetect, AutoDetectState, CaptureFrame, DeviceState, DeviceStatus,
    DriverCallbacks, FormatChange, FrameQueue, InputType, NegotiatedFormat, VideoInput,
};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tracing::{debug, info};

/// Running counters, updated from both threads
#[derive(Debug, Default)]
pub struct SourceStats {
    frames_received: AtomicU64,
    frames_dropped: AtomicU64,
    frames_converted: AtomicU64,
    placeholders_published: AtomicU64,
    conversion_failures: AtomicU64,
    reconfigurations: AtomicU64,
}

/// Point-in-time copy of [`SourceStats`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct StatsSnapshot {
    /// Frames delivered by the driver
    pub frames_received: u64,
    /// Frames evicted from the queue before the tick took them
    pub frames_dropped: u64,
    pub frames_converted: u64,
    pub placeholders_published: u64,
    pub conversion_failures: u64,
    pub reconfigurations: u64,
}

impl SourceStats {
    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            frames_received: self.frames_received.load(Ordering::Relaxed),
            frames_dropped: self.frames_dropped.load(Ordering::Relaxed),
            frames_converted: self.frames_converted.load(Ordering::Relaxed),
            placeholders_published: self.placeholders_published.load(Ordering::Relaxed),
            conversion_failures: self.conversion_failures.load(Ordering::Relaxed),
            reconfigurations: self.reconfigurations.load(Ordering::Relaxed),
        }
    }

    pub(crate) fn frame_converted(&self) {
        self.frames_converted.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn placeholder_published(&self) {
        self.placeholders_published.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn conversion_failed(&self) {
        self.conversion_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn reconfigured(&self) {
        self.reconfigurations.fetch_add(1, Ordering::Relaxed);
    }
}

pub(crate) struct SourceShared {
    pub(crate) queue: FrameQueue<CaptureFrame>,
    pub(crate) device: DeviceState,
    pub(crate) auto: AutoDetect,
    pub(crate) stats: SourceStats,
    format: Mutex<NegotiatedFormat>,
}

impl SourceShared {
    pub(crate) fn new(input_type: InputType) -> Self {
        Self {
            queue: FrameQueue::new(),
            device: DeviceState::new(),
            auto: AutoDetect::new(input_type),
            stats: SourceStats::default(),
            format: Mutex::new(NegotiatedFormat::default()),
        }
    }

    fn lock_format(&self) -> MutexGuard<'_, NegotiatedFormat> {
        self.format.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub(crate) fn negotiated(&self) -> NegotiatedFormat {
        *self.lock_format()
    }

    /// Back to the power-on state before a start
    pub(crate) fn reset(&self) {
        self.device.reset();
        self.auto.reset();
        self.queue.reset();
        *self.lock_format() = NegotiatedFormat::default();
    }

    fn signal_lost(&self) {
        self.queue.signal(false);
        if self.auto.on_signal_lost() {
            self.queue.interrupt();
        }
    }
}

impl DriverCallbacks for SourceShared {
    fn on_format_changed(&self, change: &FormatChange) {
        info!("{}", change);
        let generation = {
            let mut format = self.lock_format();
            format.info = *change;
            format.generation += 1;
            format.generation
        };
        debug!(generation, "Negotiated format updated");

        self.device.format_locked();
        if self.auto.on_format_locked() {
            // Preview is still off, so a waiting tick must be woken by hand
            self.queue.interrupt();
        }
        self.queue.signal(true);
    }

    fn on_signal_removed(&self, video_input: VideoInput, audio_input: AudioInput) {
        info!(%video_input, %audio_input, "Signal removed");
        self.device.signal_removed();
        self.signal_lost();
    }

    fn on_no_signal_detected(&self, video_input: VideoInput, audio_input: AudioInput) {
        info!(%video_input, %audio_input, "No signal detected");
        self.device.no_signal();
        self.signal_lost();
    }

    fn on_video_preview(&self, _sample_time: f64, frame: CaptureFrame) {
        self.stats.frames_received.fetch_add(1, Ordering::Relaxed);
        let dropped = self.queue.push_and_drop(frame, drop);
        if dropped {
            self.stats.frames_dropped.fetch_add(1, Ordering::Relaxed);
        }
    }
}

/// Cheap handle for observing and unblocking a source from other threads
#[derive(Clone)]
pub struct SourceHandle {
    pub(crate) shared: Arc<SourceShared>,
}

impl SourceHandle {
    /// Wake a tick blocked on the frame queue and refuse further frames
    ///
    /// The source still has to be stopped by its owner.
    pub fn quit(&self) {
        self.shared.queue.quit();
    }

    pub fn status(&self) -> DeviceStatus {
        self.shared.device.status()
    }

    pub fn auto_detect_state(&self) -> AutoDetectState {
        self.shared.auto.state()
    }

    pub fn negotiated_format(&self) -> NegotiatedFormat {
        self.shared.negotiated()
    }

    pub fn stats(&self) -> StatsSnapshot {
        self.shared.stats.snapshot()
    }
}
