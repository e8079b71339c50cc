// SPDX-License-Identifier: GPL-3.0-only

//! Error types for the capture source
//!
//! Errors follow the source's failure taxonomy:
//! - initialization and teardown failures are fatal
//! - a failed conversion only costs the current tick
//! - reconfiguration failures are fatal
//!
//! Signal loss is never an error; it is a device state with a placeholder frame.

use std::fmt;

/// Result type alias using SourceError
pub type SourceResult<T> = Result<T, SourceError>;

/// Main capture source error type
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SourceError {
    /// GPU context, buffer or placeholder setup failed during start
    Initialization(String),
    /// Releasing device or GPU resources failed during stop
    Teardown(String),
    /// The stop/configure/restart cycle after an input change failed
    Reconfiguration(String),
    /// Converting the current frame failed; the frame was dropped
    Conversion(String),
    /// `tick` was called before `start` or after `stop`
    NotStarted,
    /// Invalid configuration
    Config(ConfigError),
}

impl SourceError {
    /// Whether the source must be torn down after this error
    ///
    /// Only per-tick conversion failures are recoverable; the next tick runs normally.
    pub fn is_fatal(&self) -> bool {
        !matches!(self, SourceError::Conversion(_))
    }
}

/// Configuration errors
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    /// Pixel format selector is not one of yuy2, nv12, y210, bgr24
    UnknownPixelFormat(String),
    /// Input type selector is not one of auto, dvi_d, dp, sdi, hdmi
    UnknownInputType(String),
    /// DisplayPort MST selector is not sst or mst
    UnknownMstMode(String),
    /// SDI 12G selector is not default, quad_link or 2si
    UnknownSdi12gMode(String),
    /// A numeric field is out of range
    InvalidValue(String),
    /// The configuration document could not be parsed
    Parse(String),
}

impl fmt::Display for SourceError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SourceError::Initialization(msg) => write!(f, "Initialization failed: {}", msg),
            SourceError::Teardown(msg) => write!(f, "Teardown failed: {}", msg),
            SourceError::Reconfiguration(msg) => write!(f, "Reconfiguration failed: {}", msg),
            SourceError::Conversion(msg) => write!(f, "Conversion failed: {}", msg),
            SourceError::NotStarted => write!(f, "Capture source is not started"),
            SourceError::Config(e) => write!(f, "Configuration error: {}", e),
        }
    }
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::UnknownPixelFormat(v) => {
                write!(f, "unknown pixel format '{}' (expected yuy2, nv12, y210 or bgr24)", v)
            }
            ConfigError::UnknownInputType(v) => {
                write!(f, "unknown input type '{}' (expected auto, dvi_d, dp, sdi or hdmi)", v)
            }
            ConfigError::UnknownMstMode(v) => {
                write!(f, "unknown DisplayPort MST mode '{}' (expected sst or mst)", v)
            }
            ConfigError::UnknownSdi12gMode(v) => {
                write!(f, "unknown SDI 12G mode '{}' (expected default, quad_link or 2si)", v)
            }
            ConfigError::InvalidValue(msg) => write!(f, "invalid value: {}", msg),
            ConfigError::Parse(msg) => write!(f, "parse error: {}", msg),
        }
    }
}

impl std::error::Error for SourceError {}
impl std::error::Error for ConfigError {}

impl From<ConfigError> for SourceError {
    fn from(err: ConfigError) -> Self {
        SourceError::Config(err)
    }
}
