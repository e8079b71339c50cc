// SPDX-License-Identifier: GPL-3.0-only

//! Backend abstraction layer for capture hardware
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────┐
//! │            QcapSource (tick thread)          │
//! └────────────────────┬────────────────────────┘
//!                      │ CaptureDriver
//! ┌────────────────────┴────────────────────────┐
//! │              Backend Layer                   │
//! │  ┌──────────────────┐  ┌─────────────────┐  │
//! │  │  Capture driver  │  │ SimulatedDriver │  │
//! │  │   (vendor SDK)   │  │  (tests, demo)  │  │
//! │  └──────────────────┘  └─────────────────┘  │
//! └────────────────────┬────────────────────────┘
//!                      │ DriverCallbacks (driver thread)
//!                      ▼
//!              FrameQueue / state machines
//! ```
//!
//! # Modules
//!
//! - [`capture`]: driver traits, frame hand-off, signal state machines

pub mod capture;
