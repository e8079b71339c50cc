// SPDX-License-Identifier: GPL-3.0-only

use crate::backends::capture::{MemoryStorage, OutputPixelFormat, PlaceholderKind};
use crate::gpu::DevicePtr;
use crate::pipelines::{ConvertedFrame, PlaceholderImage};

/// Where a published frame came from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameOrigin {
    /// Converted from the capture signal
    Live,
    /// Status image shown while no signal is locked
    Placeholder(PlaceholderKind),
}

/// Frame descriptor handed to the consumer
///
/// The pixels stay in device memory owned by the source. Live frames come
/// from a small output ring and are overwritten a few ticks later; the
/// consumer must be done with one before the ring wraps.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct VideoFrame {
    pub width: u32,
    pub height: u32,
    pub format: OutputPixelFormat,
    /// Bytes per row
    pub stride: usize,
    pub size: usize,
    pub storage: MemoryStorage,
    pub ptr: DevicePtr,
    pub origin: FrameOrigin,
    /// Driver timestamp in seconds, live frames only
    pub sample_time: Option<f64>,
}

impl VideoFrame {
    pub(crate) fn live(frame: ConvertedFrame, sample_time: f64) -> Self {
        Self {
            width: frame.width,
            height: frame.height,
            format: OutputPixelFormat::Rgb24,
            stride: frame.stride,
            size: frame.size,
            storage: MemoryStorage::Device,
            ptr: frame.ptr,
            origin: FrameOrigin::Live,
            sample_time: Some(sample_time),
        }
    }

    pub(crate) fn placeholder(kind: PlaceholderKind, image: &PlaceholderImage) -> Self {
        Self {
            width: image.width,
            height: image.height,
            format: OutputPixelFormat::Rgb24,
            stride: image.stride,
            size: image.size,
            storage: MemoryStorage::Device,
            ptr: image.ptr,
            origin: FrameOrigin::Placeholder(kind),
            sample_time: None,
        }
    }

    pub fn is_placeholder(&self) -> bool {
        matches!(self.origin, FrameOrigin::Placeholder(_))
    }
}

/// Result of one tick
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum TickOutcome {
    /// A frame to publish: live video or a status placeholder
    Frame(VideoFrame),
    /// Signal is locked but no frame was available
    Idle,
    /// The input was reconfigured; nothing was published
    Reconfigured,
}

impl TickOutcome {
    pub fn frame(&self) -> Option<&VideoFrame> {
        match self {
            TickOutcome::Frame(frame) => Some(frame),
            _ => None,
        }
    }
}
