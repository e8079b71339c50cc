// SPDX-License-Identifier: GPL-3.0-only

//! Source-wide constants

/// Number of device buffers in each conversion ring (staging and output)
///
/// Two buffers let the GPU read buffer N while the next copy fills N+1.
pub const COLOR_CONVERT_RING_SIZE: usize = 2;

/// Number of driver-visible GPU-direct preview buffers bound in RDMA mode
pub const GPU_DIRECT_RING_SIZE: usize = 4;

/// Bytes per pixel of the published RGB24 output
pub const OUTPUT_BYTES_PER_PIXEL: usize = 3;

/// Per-row link header preceding the pixel payload in Y210 quad-link frames
pub const SQD_ROW_HEADER_BYTES: usize = 10;

/// Extra bytes per row in Y210 quad-link frames (header plus trailer)
pub const SQD_ROW_PADDING_BYTES: usize = 16;

/// Device used when none is configured
pub const DEFAULT_DEVICE: &str = "SC0710 PCI";

/// Capture channel used when none is configured (0-based)
pub const DEFAULT_CHANNEL: u32 = 0;

/// Advisory stream width; the negotiated signal width always wins
pub const DEFAULT_WIDTH: u32 = 3840;

/// Advisory stream height; the negotiated signal height always wins
pub const DEFAULT_HEIGHT: u32 = 2160;

/// Advisory stream frame rate
pub const DEFAULT_FRAMERATE: u32 = 60;

/// RDMA is opt-in
pub const DEFAULT_RDMA: bool = false;

/// Driver I/O method applied right after the device is created
pub const DEVICE_IO_METHOD: u32 = 1;

/// Driver video-output backend applied right after the device is created
pub const DEVICE_VIDEO_OUTPUT_BACKEND: u32 = 2;

/// Placeholder asset names (compiled in from `assets/placeholders/`)
pub mod assets {
    /// Shown while the capture SDK cannot be loaded
    pub const NO_SDK: &str = "no_sdk.png";
    /// Shown while no capture hardware answers
    pub const NO_DEVICE: &str = "no_device.png";
    /// Shown while the input has no (or lost its) signal
    pub const NO_SIGNAL: &str = "no_signal.png";
}
