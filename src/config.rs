// SPDX-License-Identifier: GPL-3.0-only

use crate::backends::capture::{DisplayPortMstMode, InputType, PixelFormat, Sdi12gMode};
use crate::constants::{
    DEFAULT_CHANNEL, DEFAULT_DEVICE, DEFAULT_FRAMERATE, DEFAULT_HEIGHT, DEFAULT_RDMA,
    DEFAULT_WIDTH,
};
use crate::errors::ConfigError;
use serde::{Deserialize, Serialize};

/// Capture source settings
///
/// Width, height and frame rate are advisory: they size the first output
/// ring, and the negotiated signal format overrides them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SourceConfig {
    /// Driver device name
    pub device: String,
    /// 0-based channel on the device
    pub channel: u32,
    pub width: u32,
    pub height: u32,
    pub framerate: u32,
    /// Let the driver write frames straight into GPU memory
    pub rdma: bool,
    /// Raw format requested from the driver
    pub pixel_format: PixelFormat,
    /// Input connector, or auto-detection
    pub input_type: InputType,
    /// Transport used when the input is DisplayPort
    pub mst_mode: DisplayPortMstMode,
    /// Link mode applied when the active input is SDI
    pub sdi12g_mode: Sdi12gMode,
}

impl Default for SourceConfig {
    fn default() -> Self {
        Self {
            device: DEFAULT_DEVICE.to_string(),
            channel: DEFAULT_CHANNEL,
            width: DEFAULT_WIDTH,
            height: DEFAULT_HEIGHT,
            framerate: DEFAULT_FRAMERATE,
            rdma: DEFAULT_RDMA,
            pixel_format: PixelFormat::Bgr24,
            input_type: InputType::Auto,
            mst_mode: DisplayPortMstMode::Sst,
            sdi12g_mode: Sdi12gMode::Default,
        }
    }
}

impl SourceConfig {
    /// Parse and validate a JSON document; missing fields take their defaults
    pub fn from_json_str(json: &str) -> Result<Self, ConfigError> {
        let config: SourceConfig =
            serde_json::from_str(json).map_err(|e| ConfigError::Parse(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn to_json_string(&self) -> Result<String, ConfigError> {
        serde_json::to_string_pretty(self).map_err(|e| ConfigError::Parse(e.to_string()))
    }

    /// Reject settings no device can run with
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.width == 0 || self.height == 0 {
            return Err(ConfigError::InvalidValue(format!(
                "resolution {}x{} must be non-zero",
                self.width, self.height
            )));
        }
        if self.framerate == 0 {
            return Err(ConfigError::InvalidValue(
                "frame rate must be non-zero".into(),
            ));
        }
        if self.device.trim().is_empty() {
            return Err(ConfigError::InvalidValue("device name is empty".into()));
        }
        Ok(())
    }

    /// Whether Y210 rows arrive in the quad-link layout
    ///
    /// Only GPU-direct transfers carry the link framing; host copies are
    /// always single-link.
    pub fn quad_link(&self) -> bool {
        self.rdma && self.sdi12g_mode == Sdi12gMode::QuadLink
    }
}
