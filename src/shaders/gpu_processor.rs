// SPDX-License-Identifier: GPL-3.0-only

//! Shared compute helpers
//!
//! Dispatch sizing and buffer readback used by the wgpu conversion backend.

use crate::gpu::wgpu;

/// Largest workgroup count allowed in one dispatch dimension
pub const MAX_WORKGROUPS_PER_DIMENSION: u32 = 65_535;

/// Helper for async buffer readback (map, poll, read, unmap)
///
/// # Arguments
/// * `device` - The wgpu device for polling
/// * `buffer` - The buffer to read from (must be MAP_READ)
///
/// # Returns
/// The buffer contents as a Vec<u8>
pub async fn read_buffer_async(
    device: &wgpu::Device,
    buffer: &wgpu::Buffer,
) -> Result<Vec<u8>, String> {
    let slice = buffer.slice(..);
    let (sender, receiver) = futures::channel::oneshot::channel();

    slice.map_async(wgpu::MapMode::Read, move |result| {
        let _ = sender.send(result);
    });

    device
        .poll(wgpu::PollType::wait_indefinitely())
        .map_err(|e| format!("Failed to poll device: {}", e))?;

    receiver
        .await
        .map_err(|_| "Failed to receive buffer mapping".to_string())?
        .map_err(|e| format!("Failed to map buffer: {:?}", e))?;

    let data = slice.get_mapped_range().to_vec();
    buffer.unmap();

    Ok(data)
}

/// Calculate compute shader dispatch size (workgroups needed)
///
/// Given a dimension and workgroup size, returns the number of workgroups
/// needed to cover the entire dimension.
#[inline]
pub fn compute_dispatch_size(dimension: u32, workgroup_size: u32) -> u32 {
    dimension.div_ceil(workgroup_size)
}

/// Fold a linear workgroup count into a 2D grid within dispatch limits
///
/// The shader recovers the linear index as `gid.y * groups.x * size + gid.x`;
/// surplus invocations in the last row are bounds-checked away.
pub fn dispatch_grid(workgroups: u32) -> (u32, u32) {
    if workgroups == 0 {
        return (0, 0);
    }
    let x = workgroups.min(MAX_WORKGROUPS_PER_DIMENSION);
    (x, workgroups.div_ceil(x))
}
