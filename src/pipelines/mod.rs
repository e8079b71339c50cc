// SPDX-License-Identifier: GPL-3.0-only

//! Device-side frame pipelines
//!
//! ```text
//! ┌──────────────┐     ┌───────────────────┐     ┌──────────────┐
//! │ CaptureFrame │ ──▶ │    Conversion     │ ──▶ │ RGB24 output │
//! │ (YUY2, BGR,  │     │  - upload/RDMA    │     │    ring      │
//! │  Y210, NV12) │     │  - kernel launch  │     │              │
//! └──────────────┘     └───────────────────┘     └──────────────┘
//!
//! ┌──────────────┐     ┌───────────────────┐
//! │ Embedded PNG │ ──▶ │   Placeholders    │ ──▶ published while no signal
//! └──────────────┘     └───────────────────┘
//! ```
//!
//! # Modules
//!
//! - [`conversion`]: raw capture formats to RGB24
//! - [`placeholder`]: status images shown without live video

pub mod conversion;
pub mod placeholder;

pub use conversion::{BufferRing, ConversionPipeline, ConvertError, ConvertedFrame};
pub use placeholder::{PlaceholderError, PlaceholderImage, PlaceholderSet};
