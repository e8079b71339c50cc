// SPDX-License-Identifier: GPL-3.0-only

//! QCAP capture source - live video ingestion with GPU RGB24 conversion
//!
//! This library owns a capture card, receives frames from the driver's
//! callback thread, tracks device and signal health, and converts every
//! frame to RGB24 in GPU memory once per tick.
//!
//! # Architecture
//!
//! The crate is organized into several modules:
//!
//! - [`backends`]: Capture driver boundary, frame queue and state machines
//! - [`gpu`]: Device memory and conversion kernels (wgpu or host)
//! - [`shaders`]: WGSL kernels and compute helpers
//! - [`pipelines`]: Frame conversion and status placeholders
//! - [`source`]: Lifecycle manager and per-tick frame production
//! - [`config`]: Source configuration
//!
//! # Example
//!
//! ```no_run
//! use qcap_source::backends::capture::SimulatedDriver;
//! use qcap_source::gpu::HostBackend;
//! use qcap_source::{QcapSource, SourceConfig, TickOutcome};
//! use std::sync::Arc;
//!
//! let mut source = QcapSource::new(
//!     SourceConfig::default(),
//!     Box::new(SimulatedDriver::new()),
//!     Arc::new(HostBackend::new()),
//! )?;
//! source.start()?;
//! if let TickOutcome::Frame(frame) = source.tick()? {
//!     println!("{}x{} {:?}", frame.width, frame.height, frame.origin);
//! }
//! source.stop()?;
//! # Ok::<(), qcap_source::SourceError>(())
//! ```

pub mod backends;
pub mod config;
pub mod constants;
pub mod errors;
pub mod gpu;
pub mod pipelines;
pub mod shaders;
pub mod source;

// Re-export commonly used types
pub use backends::capture::{
    AutoDetectState, DeviceStatus, InputType, OutputPixelFormat, PixelFormat,
};
pub use config::SourceConfig;
pub use errors::{ConfigError, SourceError, SourceResult};
pub use source::{
    FrameOrigin, QcapSource, SourceHandle, StatsSnapshot, TickOutcome, VideoFrame,
};
