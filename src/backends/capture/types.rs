// SPDX-License-Identifier: GPL-3.0-only

//! Shared types for the capture driver boundary

use crate::constants::{OUTPUT_BYTES_PER_PIXEL, SQD_ROW_PADDING_BYTES};
use crate::errors::ConfigError;
use crate::gpu::DeviceSlice;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Raw pixel format the driver is asked to deliver
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PixelFormat {
    /// Packed 4:2:2 8-bit, Y0 Cb Y1 Cr
    #[serde(rename = "yuy2")]
    Yuy2,
    /// Packed 8-bit B G R
    #[serde(rename = "bgr24")]
    Bgr24,
    /// Packed 4:2:2 10-bit, 5 bytes per pixel pair
    #[serde(rename = "y210")]
    Y210,
    /// Planar 4:2:0 8-bit, Y plane followed by interleaved CbCr
    #[serde(rename = "nv12")]
    Nv12,
}

/// Row layout of Y210 frames
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkLayout {
    /// Plain rows, no link framing
    SingleLink,
    /// 12G square-division quad link: four quadrants stored one after
    /// another, each row framed by a link header and trailer
    QuadLink,
}

impl PixelFormat {
    /// All formats the driver can deliver
    pub const ALL: [PixelFormat; 4] = [
        PixelFormat::Yuy2,
        PixelFormat::Bgr24,
        PixelFormat::Y210,
        PixelFormat::Nv12,
    ];

    /// Configuration selector for this format
    pub fn as_str(&self) -> &'static str {
        match self {
            PixelFormat::Yuy2 => "yuy2",
            PixelFormat::Bgr24 => "bgr24",
            PixelFormat::Y210 => "y210",
            PixelFormat::Nv12 => "nv12",
        }
    }

    /// Bytes per row of the first plane
    ///
    /// NV12's chroma plane uses the same step as the luma plane. A Y210
    /// quad-link row holds one quadrant row, half the frame width.
    pub fn row_step(&self, width: u32, layout: LinkLayout) -> usize {
        let w = width as usize;
        match self {
            PixelFormat::Yuy2 => w.div_ceil(2) * 4,
            PixelFormat::Bgr24 => w * 3,
            PixelFormat::Y210 => match layout {
                LinkLayout::SingleLink => w.div_ceil(2) * 5,
                LinkLayout::QuadLink => w / 4 * 5 + SQD_ROW_PADDING_BYTES,
            },
            PixelFormat::Nv12 => w.next_multiple_of(2),
        }
    }

    /// Byte size of one raw frame delivered by the driver
    pub fn frame_size(&self, width: u32, height: u32, layout: LinkLayout) -> usize {
        let h = height as usize;
        match (self, layout) {
            (PixelFormat::Nv12, _) => {
                let step = self.row_step(width, layout);
                step * h + step * h.div_ceil(2)
            }
            // Four quadrants of h/2 rows each
            (PixelFormat::Y210, LinkLayout::QuadLink) => self.row_step(width, layout) * h * 2,
            _ => self.row_step(width, layout) * h,
        }
    }

    /// Largest raw frame any format (and layout) can produce at this resolution
    pub fn max_frame_size(width: u32, height: u32) -> usize {
        Self::ALL
            .iter()
            .flat_map(|f| {
                [LinkLayout::SingleLink, LinkLayout::QuadLink]
                    .map(|layout| f.frame_size(width, height, layout))
            })
            .max()
            .unwrap_or(0)
    }

    /// Whether this format carries 10-bit samples
    pub fn is_10bit(&self) -> bool {
        matches!(self, PixelFormat::Y210)
    }
}

impl fmt::Display for PixelFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PixelFormat::Yuy2 => write!(f, "YUY2"),
            PixelFormat::Bgr24 => write!(f, "BGR24"),
            PixelFormat::Y210 => write!(f, "Y210"),
            PixelFormat::Nv12 => write!(f, "NV12"),
        }
    }
}

impl FromStr for PixelFormat {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|f| f.as_str().eq_ignore_ascii_case(s))
            .ok_or_else(|| ConfigError::UnknownPixelFormat(s.to_string()))
    }
}

/// Pixel format of the published output
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OutputPixelFormat {
    #[default]
    Rgb24,
}

impl OutputPixelFormat {
    pub fn bytes_per_pixel(&self) -> usize {
        match self {
            OutputPixelFormat::Rgb24 => OUTPUT_BYTES_PER_PIXEL,
        }
    }

    /// Channel count of the output image
    pub fn channels(&self) -> u32 {
        match self {
            OutputPixelFormat::Rgb24 => 3,
        }
    }
}

impl fmt::Display for OutputPixelFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OutputPixelFormat::Rgb24 => write!(f, "RGB24"),
        }
    }
}

/// Input connector selection as configured
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum InputType {
    /// Let the driver find the active input, then lock onto it
    #[default]
    #[serde(rename = "auto")]
    Auto,
    #[serde(rename = "dvi_d")]
    DviD,
    #[serde(rename = "dp")]
    DisplayPort,
    #[serde(rename = "sdi")]
    Sdi,
    #[serde(rename = "hdmi")]
    Hdmi,
}

impl InputType {
    pub const ALL: [InputType; 5] = [
        InputType::Auto,
        InputType::DviD,
        InputType::DisplayPort,
        InputType::Sdi,
        InputType::Hdmi,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            InputType::Auto => "auto",
            InputType::DviD => "dvi_d",
            InputType::DisplayPort => "dp",
            InputType::Sdi => "sdi",
            InputType::Hdmi => "hdmi",
        }
    }
}

impl fmt::Display for InputType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for InputType {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|t| t.as_str().eq_ignore_ascii_case(s))
            .ok_or_else(|| ConfigError::UnknownInputType(s.to_string()))
    }
}

/// DisplayPort stream transport mode
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DisplayPortMstMode {
    #[default]
    Sst,
    Mst,
}

impl FromStr for DisplayPortMstMode {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "sst" => Ok(DisplayPortMstMode::Sst),
            "mst" => Ok(DisplayPortMstMode::Mst),
            _ => Err(ConfigError::UnknownMstMode(s.to_string())),
        }
    }
}

/// SDI 12G link mode
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum Sdi12gMode {
    /// Leave the card's 12G setting untouched
    #[default]
    #[serde(rename = "default")]
    Default,
    /// Square-division quad link
    #[serde(rename = "quad_link")]
    QuadLink,
    /// Two-sample interleave
    #[serde(rename = "2si")]
    TwoSampleInterleave,
}

impl Sdi12gMode {
    /// Driver property value, `None` when the property must not be written
    pub fn property_value(&self) -> Option<u32> {
        match self {
            Sdi12gMode::Default => None,
            Sdi12gMode::QuadLink => Some(0),
            Sdi12gMode::TwoSampleInterleave => Some(1),
        }
    }
}

impl FromStr for Sdi12gMode {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "default" => Ok(Sdi12gMode::Default),
            "quad_link" | "quadlink" => Ok(Sdi12gMode::QuadLink),
            "2si" => Ok(Sdi12gMode::TwoSampleInterleave),
            _ => Err(ConfigError::UnknownSdi12gMode(s.to_string())),
        }
    }
}

/// Physical video input as seen by the driver
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum VideoInput {
    Composite,
    SVideo,
    Hdmi,
    DviD,
    Components,
    DviA,
    Sdi,
    #[default]
    Auto,
    DisplayPortSst,
    DisplayPortMst,
}

impl fmt::Display for VideoInput {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            VideoInput::Composite => "COMPOSITE",
            VideoInput::SVideo => "SVIDEO",
            VideoInput::Hdmi => "HDMI",
            VideoInput::DviD => "DVI_D",
            VideoInput::Components => "COMPONENTS",
            VideoInput::DviA => "DVI_A",
            VideoInput::Sdi => "SDI",
            VideoInput::Auto => "AUTO",
            VideoInput::DisplayPortSst => "DISPLAYPORT_SST",
            VideoInput::DisplayPortMst => "DISPLAYPORT_MST",
        };
        f.write_str(name)
    }
}

/// Audio input reported alongside a format change
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AudioInput {
    #[default]
    Embedded,
    LineIn,
    SoundcardMicrophone,
    SoundcardLineIn,
}

impl fmt::Display for AudioInput {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            AudioInput::Embedded => "EMBEDDED_AUDIO",
            AudioInput::LineIn => "LINE_IN",
            AudioInput::SoundcardMicrophone => "SOUNDCARD_MICROPHONE",
            AudioInput::SoundcardLineIn => "SOUNDCARD_LINE_IN",
        };
        f.write_str(name)
    }
}

/// Signal description delivered by the driver's format-changed callback
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct FormatChange {
    pub video_input: VideoInput,
    pub audio_input: AudioInput,
    pub width: u32,
    pub height: u32,
    pub interlaced: bool,
    pub frame_rate: f64,
    pub audio_channels: u32,
    pub audio_bits_per_sample: u32,
    pub audio_sample_frequency: u32,
}

impl FormatChange {
    /// Progressive video-only format, the common case in tests and the simulator
    pub fn video(video_input: VideoInput, width: u32, height: u32, frame_rate: f64) -> Self {
        Self {
            video_input,
            width,
            height,
            frame_rate,
            ..Default::default()
        }
    }
}

impl fmt::Display for FormatChange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // Interlaced heights are reported per field by the card
        let (height, scan) = if self.interlaced {
            (self.height / 2, "I")
        } else {
            (self.height, "P")
        };
        write!(
            f,
            "{} x {}{} @{:.3} FPS, {} CH x {} BITS x {} HZ, VIDEO INPUT: {}, AUDIO INPUT: {}",
            self.width,
            height,
            scan,
            self.frame_rate,
            self.audio_channels,
            self.audio_bits_per_sample,
            self.audio_sample_frequency,
            self.video_input,
            self.audio_input,
        )
    }
}

/// Most recent negotiated format plus a generation counter
///
/// The generation increments on every format change; conversion buffers
/// sized for an older generation are reallocated before use.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct NegotiatedFormat {
    pub info: FormatChange,
    pub generation: u64,
}

impl NegotiatedFormat {
    pub fn width(&self) -> u32 {
        self.info.width
    }

    pub fn height(&self) -> u32 {
        self.info.height
    }

    /// Whether a real signal format has been negotiated yet
    pub fn is_known(&self) -> bool {
        self.info.width > 0 && self.info.height > 0
    }
}

/// Driver device lifecycle status
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DeviceStatus {
    /// Capture SDK not loaded
    #[default]
    NoSdk = 0,
    /// SDK loaded, no hardware answering
    NoDevice = 1,
    /// Device present, no signal on the input
    NoSignal = 2,
    /// Signal was present and went away
    SignalRemoved = 3,
    /// A signal format is negotiated and frames are flowing
    SignalLocked = 4,
}

impl DeviceStatus {
    pub(crate) fn from_u8(value: u8) -> Self {
        match value {
            1 => DeviceStatus::NoDevice,
            2 => DeviceStatus::NoSignal,
            3 => DeviceStatus::SignalRemoved,
            4 => DeviceStatus::SignalLocked,
            _ => DeviceStatus::NoSdk,
        }
    }

    /// Placeholder to publish in this status, `None` when live frames flow
    pub fn placeholder(&self) -> Option<PlaceholderKind> {
        match self {
            DeviceStatus::NoSdk => Some(PlaceholderKind::NoSdk),
            DeviceStatus::NoDevice => Some(PlaceholderKind::NoDevice),
            DeviceStatus::NoSignal | DeviceStatus::SignalRemoved => {
                Some(PlaceholderKind::NoSignal)
            }
            DeviceStatus::SignalLocked => None,
        }
    }
}

/// Input auto-detection state
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AutoDetectState {
    /// Searching; preview is disabled
    #[default]
    Auto = 0,
    /// Locked onto the input the driver found
    Detected = 1,
    /// A specific input was configured
    Forced = 2,
}

impl AutoDetectState {
    pub(crate) fn from_u8(value: u8) -> Self {
        match value {
            1 => AutoDetectState::Detected,
            2 => AutoDetectState::Forced,
            _ => AutoDetectState::Auto,
        }
    }
}

/// Static image shown instead of live video
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PlaceholderKind {
    NoSdk,
    NoDevice,
    NoSignal,
}

/// Where a published frame's pixels live
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MemoryStorage {
    Host,
    Device,
}

/// One plane of a driver buffer
#[derive(Debug, Clone, Copy)]
pub enum PlaneData<'a> {
    /// Host memory owned by the driver buffer
    Host(&'a [u8]),
    /// GPU memory written by the driver (RDMA)
    Device(DeviceSlice),
}

/// Driver-owned frame memory
///
/// The driver reclaims the buffer when the implementor is dropped.
pub trait DriverBuffer: Send {
    /// Total byte length of the frame
    fn len(&self) -> usize;

    /// Plane `index`, or `None` if the format has fewer planes
    fn plane(&self, index: usize) -> Option<PlaneData<'_>>;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// A captured frame borrowed from the driver
///
/// Dropping the frame hands its buffer back to the driver, so every frame
/// is released exactly once whichever path (converted, evicted, shut down)
/// it leaves through.
pub struct CaptureFrame {
    buffer: Box<dyn DriverBuffer>,
    sample_time: f64,
}

impl CaptureFrame {
    pub fn new(buffer: Box<dyn DriverBuffer>, sample_time: f64) -> Self {
        Self {
            buffer,
            sample_time,
        }
    }

    pub fn len(&self) -> usize {
        self.buffer.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }

    pub fn plane(&self, index: usize) -> Option<PlaneData<'_>> {
        self.buffer.plane(index)
    }

    /// Driver timestamp in seconds
    pub fn sample_time(&self) -> f64 {
        self.sample_time
    }
}

impl fmt::Debug for CaptureFrame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CaptureFrame")
            .field("len", &self.len())
            .field("sample_time", &self.sample_time)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_raw_frame_sizes() {
        let single = LinkLayout::SingleLink;
        assert_eq!(PixelFormat::Yuy2.frame_size(1920, 1080, single), 1920 * 1080 * 2);
        assert_eq!(PixelFormat::Bgr24.frame_size(1920, 1080, single), 1920 * 1080 * 3);
        assert_eq!(
            PixelFormat::Y210.frame_size(1920, 1080, single),
            1920 * 1080 * 10 / 8 * 2
        );
        assert_eq!(PixelFormat::Nv12.frame_size(1920, 1080, single), 1920 * 1080 * 3 / 2);
    }

    #[test]
    fn test_quad_link_rows_are_padded() {
        let single = PixelFormat::Y210.row_step(3840, LinkLayout::SingleLink);
        let quad = PixelFormat::Y210.row_step(3840, LinkLayout::QuadLink);
        assert_eq!(single, 3840 / 2 * 5);
        // One quadrant row of 1920 pixels plus link framing
        assert_eq!(quad, 3840 / 4 * 5 + 16);
        assert_eq!(
            PixelFormat::Y210.frame_size(3840, 2160, LinkLayout::QuadLink),
            quad * 2160 * 2
        );
        // Layout only matters for Y210
        assert_eq!(
            PixelFormat::Yuy2.row_step(3840, LinkLayout::QuadLink),
            PixelFormat::Yuy2.row_step(3840, LinkLayout::SingleLink)
        );
    }

    #[test]
    fn test_max_frame_size_covers_every_format() {
        let max = PixelFormat::max_frame_size(1280, 720);
        for format in PixelFormat::ALL {
            assert!(format.frame_size(1280, 720, LinkLayout::QuadLink) <= max);
        }
    }

    #[test]
    fn test_selectors_parse() {
        assert_eq!("NV12".parse::<PixelFormat>(), Ok(PixelFormat::Nv12));
        assert_eq!("dp".parse::<InputType>(), Ok(InputType::DisplayPort));
        assert_eq!("2si".parse::<Sdi12gMode>(), Ok(Sdi12gMode::TwoSampleInterleave));
        assert_eq!("mst".parse::<DisplayPortMstMode>(), Ok(DisplayPortMstMode::Mst));
        assert!(matches!(
            "rgb565".parse::<PixelFormat>(),
            Err(ConfigError::UnknownPixelFormat(_))
        ));
        assert!(matches!(
            "vga".parse::<InputType>(),
            Err(ConfigError::UnknownInputType(_))
        ));
    }

    #[test]
    fn test_status_placeholders() {
        assert_eq!(DeviceStatus::NoSdk.placeholder(), Some(PlaceholderKind::NoSdk));
        assert_eq!(DeviceStatus::NoDevice.placeholder(), Some(PlaceholderKind::NoDevice));
        assert_eq!(DeviceStatus::NoSignal.placeholder(), Some(PlaceholderKind::NoSignal));
        assert_eq!(
            DeviceStatus::SignalRemoved.placeholder(),
            Some(PlaceholderKind::NoSignal)
        );
        assert_eq!(DeviceStatus::SignalLocked.placeholder(), None);
    }

    #[test]
    fn test_format_change_log_line() {
        let mut change = FormatChange::video(VideoInput::Hdmi, 1920, 1080, 59.94);
        assert_eq!(
            change.to_string(),
            "1920 x 1080P @59.940 FPS, 0 CH x 0 BITS x 0 HZ, VIDEO INPUT: HDMI, AUDIO INPUT: EMBEDDED_AUDIO"
        );
        change.interlaced = true;
        assert!(change.to_string().starts_with("1920 x 540I"));
    }
}
