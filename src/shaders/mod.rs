// SPDX-License-Identifier: GPL-3.0-only

//! Compute shaders for colour conversion
//!
//! A single WGSL module implements every conversion kernel; the wgpu
//! backend selects the kernel through a uniform.

mod gpu_processor;

pub use gpu_processor::{
    MAX_WORKGROUPS_PER_DIMENSION, compute_dispatch_size, dispatch_grid, read_buffer_async,
};

/// Raw capture formats to packed RGB24
pub const RGB24_CONVERT_SHADER: &str = include_str!("rgb24_convert.wgsl");

/// Invocations per workgroup in [`RGB24_CONVERT_SHADER`]
pub const RGB24_CONVERT_WORKGROUP_SIZE: u32 = 64;

/// Kernel selector values understood by [`RGB24_CONVERT_SHADER`]
pub mod kernel_id {
    pub const YUY2: u32 = 0;
    pub const SWAP_CHANNELS: u32 = 1;
    pub const Y210: u32 = 2;
    pub const NV12: u32 = 3;
    pub const Y210_QUAD_LINK: u32 = 4;
}
