// SPDX-License-Identifier: GPL-3.0-only

//! Host-memory implementation of [`GpuBackend`]

use super::{
    ConvertJob, ConvertKernel, DevicePtr, DeviceSlice, GpuBackend, GpuError, GpuResult,
    check_range,
};
use crate::backends::capture::format_converters as convert;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};
use tracing::trace;

/// Runs the conversion kernels on the CPU over heap allocations
///
/// Behaves like a device: allocations are only reachable through
/// [`DevicePtr`] handles and every operation needs an open context.
#[derive(Debug)]
pub struct HostBackend {
    memory: Mutex<HashMap<DevicePtr, Vec<u8>>>,
    next_ptr: AtomicU64,
    context_depth: AtomicUsize,
}

impl Default for HostBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl HostBackend {
    pub fn new() -> Self {
        Self {
            memory: Mutex::new(HashMap::new()),
            next_ptr: AtomicU64::new(1),
            context_depth: AtomicUsize::new(0),
        }
    }

    /// Number of live allocations
    pub fn live_allocations(&self) -> usize {
        self.lock().len()
    }

    /// Whether at least one context level is open
    pub fn has_context(&self) -> bool {
        self.context_depth.load(Ordering::Acquire) > 0
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<DevicePtr, Vec<u8>>> {
        self.memory.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn require_context(&self) -> GpuResult<()> {
        if self.has_context() {
            Ok(())
        } else {
            Err(GpuError::NoContext)
        }
    }
}

/// Borrow `len` bytes of `slice` from the allocation table
fn source<'a>(
    memory: &'a HashMap<DevicePtr, Vec<u8>>,
    slice: DeviceSlice,
    len: usize,
) -> GpuResult<&'a [u8]> {
    let data = memory
        .get(&slice.ptr)
        .ok_or(GpuError::InvalidPointer(slice.ptr))?;
    check_range(slice.ptr, slice.offset, len, data.len())?;
    Ok(&data[slice.offset..slice.offset + len])
}

impl GpuBackend for HostBackend {
    fn name(&self) -> &str {
        "host"
    }

    fn open_context(&self) -> GpuResult<()> {
        let depth = self.context_depth.fetch_add(1, Ordering::AcqRel) + 1;
        trace!(depth, "Host context retained");
        Ok(())
    }

    fn close_context(&self) -> GpuResult<()> {
        self.context_depth
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |depth| {
                depth.checked_sub(1)
            })
            .map(|_| ())
            .map_err(|_| GpuError::NoContext)
    }

    fn alloc(&self, len: usize) -> GpuResult<DevicePtr> {
        self.require_context()?;
        if len == 0 {
            return Err(GpuError::Allocation {
                len,
                reason: "zero-sized allocation".into(),
            });
        }
        let ptr = DevicePtr(self.next_ptr.fetch_add(1, Ordering::Relaxed));
        self.lock().insert(ptr, vec![0u8; len]);
        trace!(%ptr, len, "Host allocation");
        Ok(ptr)
    }

    fn free(&self, ptr: DevicePtr) -> GpuResult<()> {
        self.require_context()?;
        self.lock()
            .remove(&ptr)
            .map(|_| ())
            .ok_or(GpuError::InvalidPointer(ptr))
    }

    fn allocation_len(&self, ptr: DevicePtr) -> GpuResult<usize> {
        self.lock()
            .get(&ptr)
            .map(Vec::len)
            .ok_or(GpuError::InvalidPointer(ptr))
    }

    fn copy_htod(&self, dst: DeviceSlice, src: &[u8]) -> GpuResult<()> {
        self.require_context()?;
        let mut memory = self.lock();
        let data = memory
            .get_mut(&dst.ptr)
            .ok_or(GpuError::InvalidPointer(dst.ptr))?;
        check_range(dst.ptr, dst.offset, src.len(), data.len())?;
        data[dst.offset..dst.offset + src.len()].copy_from_slice(src);
        Ok(())
    }

    fn copy_dtoh(&self, src: DeviceSlice, dst: &mut [u8]) -> GpuResult<()> {
        self.require_context()?;
        let memory = self.lock();
        dst.copy_from_slice(source(&memory, src, dst.len())?);
        Ok(())
    }

    fn convert(&self, job: &ConvertJob) -> GpuResult<()> {
        self.require_context()?;
        job.validate()?;

        let mut memory = self.lock();
        // Lift the output out of the table so sources can be borrowed alongside it
        let mut out = memory
            .remove(&job.dst)
            .ok_or(GpuError::InvalidPointer(job.dst))?;

        let result = (|| -> GpuResult<()> {
            check_range(job.dst, 0, job.required_dst_len(), out.len())?;
            let src = source(&memory, job.src, job.required_src_len())?;
            match job.kernel {
                ConvertKernel::Yuy2ToRgb => convert::yuy2_to_rgb24(
                    src,
                    job.src_step,
                    &mut out,
                    job.dst_step,
                    job.width,
                    job.height,
                ),
                ConvertKernel::SwapChannels {
                    src_channels,
                    order,
                } => convert::swap_channels(
                    src,
                    job.src_step,
                    src_channels as usize,
                    order,
                    &mut out,
                    job.dst_step,
                    job.width,
                    job.height,
                ),
                ConvertKernel::Y210ToRgb => convert::y210_to_rgb24(
                    src,
                    job.src_step,
                    &mut out,
                    job.dst_step,
                    job.width,
                    job.height,
                ),
                ConvertKernel::Y210QuadLinkToRgb { header } => convert::y210_quad_link_to_rgb24(
                    src,
                    job.src_step,
                    header as usize,
                    &mut out,
                    job.dst_step,
                    job.width,
                    job.height,
                ),
                ConvertKernel::Nv12ToRgb => {
                    let chroma_slice = job
                        .src_chroma
                        .ok_or_else(|| GpuError::InvalidJob("NV12 needs a chroma plane".into()))?;
                    let chroma = source(&memory, chroma_slice, job.required_chroma_len())?;
                    convert::nv12_to_rgb24(
                        src,
                        chroma,
                        job.src_step,
                        &mut out,
                        job.dst_step,
                        job.width,
                        job.height,
                    )
                }
            }
            Ok(())
        })();

        memory.insert(job.dst, out);
        result.map_err(|e| match e {
            GpuError::OutOfBounds { .. } | GpuError::InvalidPointer(_) => {
                GpuError::Kernel(e.to_string())
            }
            other => other,
        })
    }
}
