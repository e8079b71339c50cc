// SPDX-License-Identifier: GPL-3.0-only

//! GPU memory and conversion-kernel abstraction
//!
//! The capture source talks to the GPU through [`GpuBackend`]: opaque device
//! pointers, host/device copies and four colour-conversion kernels. Two
//! implementations exist:
//!
//! - [`WgpuBackend`]: compute shaders on a Vulkan device
//! - [`HostBackend`]: the same kernels on host memory, used when no GPU is
//!   available and by the test suite
//!
//! Both produce byte-identical output for the same input.

mod host;
mod wgpu_backend;

pub use host::HostBackend;
pub use wgpu_backend::WgpuBackend;

/// Re-export of the wgpu crate used for compute
pub use ::wgpu;

use std::fmt;
use tracing::{debug, info};

/// Result type for GPU operations
pub type GpuResult<T> = Result<T, GpuError>;

/// Opaque handle to a device allocation
///
/// Zero is never handed out and serves as the null handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct DevicePtr(pub u64);

impl DevicePtr {
    pub const NULL: DevicePtr = DevicePtr(0);

    pub fn is_null(&self) -> bool {
        self.0 == 0
    }

    /// Slice starting `offset` bytes into this allocation
    pub fn at(self, offset: usize) -> DeviceSlice {
        DeviceSlice { ptr: self, offset }
    }
}

impl fmt::Display for DevicePtr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "dev:{:#x}", self.0)
    }
}

/// Byte offset into a device allocation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeviceSlice {
    pub ptr: DevicePtr,
    pub offset: usize,
}

impl From<DevicePtr> for DeviceSlice {
    fn from(ptr: DevicePtr) -> Self {
        ptr.at(0)
    }
}

/// GPU operation errors
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GpuError {
    /// Operation issued while no execution context is open
    NoContext,
    /// No usable GPU device
    DeviceUnavailable(String),
    /// Device allocation failed
    Allocation { len: usize, reason: String },
    /// Pointer does not name a live allocation
    InvalidPointer(DevicePtr),
    /// Access past the end of an allocation
    OutOfBounds {
        ptr: DevicePtr,
        offset: usize,
        len: usize,
        capacity: usize,
    },
    /// Kernel parameters are inconsistent
    InvalidJob(String),
    /// Kernel execution reported a failure
    Kernel(String),
    /// Host/device copy failed
    Transfer(String),
}

impl fmt::Display for GpuError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            GpuError::NoContext => write!(f, "no GPU context is open"),
            GpuError::DeviceUnavailable(msg) => write!(f, "GPU device unavailable: {}", msg),
            GpuError::Allocation { len, reason } => {
                write!(f, "failed to allocate {} bytes: {}", len, reason)
            }
            GpuError::InvalidPointer(ptr) => write!(f, "invalid device pointer {}", ptr),
            GpuError::OutOfBounds {
                ptr,
                offset,
                len,
                capacity,
            } => write!(
                f,
                "access of {} bytes at offset {} exceeds {} ({} bytes)",
                len, offset, ptr, capacity
            ),
            GpuError::InvalidJob(msg) => write!(f, "invalid kernel parameters: {}", msg),
            GpuError::Kernel(msg) => write!(f, "kernel failed: {}", msg),
            GpuError::Transfer(msg) => write!(f, "transfer failed: {}", msg),
        }
    }
}

impl std::error::Error for GpuError {}

/// Check that `len` bytes at `offset` fit in an allocation of `capacity` bytes
pub(crate) fn check_range(
    ptr: DevicePtr,
    offset: usize,
    len: usize,
    capacity: usize,
) -> GpuResult<()> {
    match offset.checked_add(len) {
        Some(end) if end <= capacity => Ok(()),
        _ => Err(GpuError::OutOfBounds {
            ptr,
            offset,
            len,
            capacity,
        }),
    }
}

/// Colour-conversion kernels, all producing packed RGB24
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConvertKernel {
    /// Packed YUY2 (BT.601 limited range)
    Yuy2ToRgb,
    /// Channel reorder: output channel `i` takes source channel `order[i]`
    SwapChannels { src_channels: u32, order: [u32; 3] },
    /// Packed Y210
    Y210ToRgb,
    /// Packed Y210 in square-division quad-link layout
    ///
    /// The frame arrives as four quadrants (top-left, top-right, bottom-left,
    /// bottom-right) of `width / 2` x `height / 2` pixels, stored one after
    /// another. Every source row starts with `header` bytes of link framing.
    Y210QuadLinkToRgb { header: u32 },
    /// Two-plane NV12 (BT.601 limited range)
    Nv12ToRgb,
}

impl ConvertKernel {
    /// BGR24 to RGB24
    pub const BGR_TO_RGB: ConvertKernel = ConvertKernel::SwapChannels {
        src_channels: 3,
        order: [2, 1, 0],
    };

    /// RGBA to RGB24 (alpha dropped)
    pub const RGBA_TO_RGB: ConvertKernel = ConvertKernel::SwapChannels {
        src_channels: 4,
        order: [0, 1, 2],
    };

    /// Bytes one source row occupies
    pub fn src_row_bytes(&self, width: u32) -> usize {
        let w = width as usize;
        match self {
            ConvertKernel::Yuy2ToRgb => w.div_ceil(2) * 4,
            ConvertKernel::SwapChannels { src_channels, .. } => w * *src_channels as usize,
            ConvertKernel::Y210ToRgb => w.div_ceil(2) * 5,
            ConvertKernel::Y210QuadLinkToRgb { header } => *header as usize + w / 4 * 5,
            ConvertKernel::Nv12ToRgb => w,
        }
    }

    /// Source rows read for an output of `height` rows
    pub fn src_rows(&self, height: u32) -> usize {
        match self {
            ConvertKernel::Y210QuadLinkToRgb { .. } => height as usize * 2,
            _ => height as usize,
        }
    }
}

/// One kernel launch
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConvertJob {
    pub kernel: ConvertKernel,
    /// Packed source, or the luma plane for NV12
    pub src: DeviceSlice,
    /// Interleaved CbCr plane, NV12 only
    pub src_chroma: Option<DeviceSlice>,
    /// Bytes per source row (shared by both NV12 planes)
    pub src_step: usize,
    pub dst: DevicePtr,
    /// Bytes per output row
    pub dst_step: usize,
    pub width: u32,
    pub height: u32,
}

impl ConvertJob {
    /// Bytes read from `src`
    pub fn required_src_len(&self) -> usize {
        let rows = self.kernel.src_rows(self.height);
        (rows - 1) * self.src_step + self.kernel.src_row_bytes(self.width)
    }

    /// Bytes read from `src_chroma`
    pub fn required_chroma_len(&self) -> usize {
        let rows = (self.height as usize).div_ceil(2);
        (rows - 1) * self.src_step + (self.width as usize).div_ceil(2) * 2
    }

    /// Bytes written to `dst`
    pub fn required_dst_len(&self) -> usize {
        let h = self.height as usize;
        (h - 1) * self.dst_step + self.width as usize * 3
    }

    /// Reject parameter sets no kernel can run
    pub fn validate(&self) -> GpuResult<()> {
        if self.width == 0 || self.height == 0 {
            return Err(GpuError::InvalidJob(format!(
                "empty region {}x{}",
                self.width, self.height
            )));
        }
        let row_bytes = self.kernel.src_row_bytes(self.width);
        if self.src_step < row_bytes {
            return Err(GpuError::InvalidJob(format!(
                "source step {} shorter than row ({} bytes)",
                self.src_step, row_bytes
            )));
        }
        if self.dst_step < self.width as usize * 3 {
            return Err(GpuError::InvalidJob(format!(
                "output step {} shorter than row ({} bytes)",
                self.dst_step,
                self.width as usize * 3
            )));
        }
        match self.kernel {
            ConvertKernel::Nv12ToRgb if self.src_chroma.is_none() => {
                return Err(GpuError::InvalidJob("NV12 needs a chroma plane".into()));
            }
            ConvertKernel::Y210QuadLinkToRgb { .. }
                if self.width % 4 != 0 || self.height % 2 != 0 =>
            {
                return Err(GpuError::InvalidJob(format!(
                    "quad-link region {}x{} does not split into pixel-pair quadrants",
                    self.width, self.height
                )));
            }
            ConvertKernel::SwapChannels {
                src_channels,
                order,
            } => {
                if src_channels == 0 || order.iter().any(|&c| c >= src_channels) {
                    return Err(GpuError::InvalidJob(format!(
                        "channel order {:?} invalid for {} channels",
                        order, src_channels
                    )));
                }
            }
            _ => {}
        }
        if self.src.ptr == self.dst || self.src_chroma.is_some_and(|c| c.ptr == self.dst) {
            return Err(GpuError::InvalidJob("source aliases output".into()));
        }
        Ok(())
    }
}

/// Device memory and conversion kernels
///
/// Implementations are shared between the tick thread and the driver (which
/// writes RDMA frames into bound buffers), hence `Send + Sync`.
pub trait GpuBackend: Send + Sync {
    /// Short backend name for logs
    fn name(&self) -> &str;

    /// Open (retain) the execution context; calls nest
    fn open_context(&self) -> GpuResult<()>;

    /// Close (release) one level of the execution context
    fn close_context(&self) -> GpuResult<()>;

    /// Allocate `len` bytes of device memory
    fn alloc(&self, len: usize) -> GpuResult<DevicePtr>;

    /// Free an allocation
    fn free(&self, ptr: DevicePtr) -> GpuResult<()>;

    /// Size of a live allocation
    fn allocation_len(&self, ptr: DevicePtr) -> GpuResult<usize>;

    /// Copy host bytes into device memory
    fn copy_htod(&self, dst: DeviceSlice, src: &[u8]) -> GpuResult<()>;

    /// Copy device memory into host bytes
    fn copy_dtoh(&self, src: DeviceSlice, dst: &mut [u8]) -> GpuResult<()>;

    /// Run one conversion kernel to completion
    fn convert(&self, job: &ConvertJob) -> GpuResult<()>;
}

/// Information about the created GPU device
#[derive(Debug, Clone)]
pub struct GpuDeviceInfo {
    /// Name of the GPU adapter
    pub adapter_name: String,
    /// Backend being used
    pub backend: wgpu::Backend,
}

/// Create a wgpu device and queue for compute work
pub async fn create_compute_device(
    label: &str,
) -> Result<(wgpu::Device, wgpu::Queue, GpuDeviceInfo), String> {
    info!(label = label, "Creating GPU device for compute");

    let instance = wgpu::Instance::new(&wgpu::InstanceDescriptor {
        backends: wgpu::Backends::VULKAN,
        ..Default::default()
    });

    let adapter = instance
        .request_adapter(&wgpu::RequestAdapterOptions {
            power_preference: wgpu::PowerPreference::HighPerformance,
            compatible_surface: None,
            force_fallback_adapter: false,
        })
        .await
        .map_err(|e| format!("Failed to find suitable GPU adapter: {}", e))?;

    let adapter_info = adapter.get_info();
    let adapter_limits = adapter.limits();

    info!(
        adapter = %adapter_info.name,
        backend = ?adapter_info.backend,
        "GPU adapter selected for compute"
    );
    debug!(
        max_storage_buffer = adapter_limits.max_storage_buffer_binding_size,
        "Adapter limits"
    );

    let (device, queue) = adapter
        .request_device(&wgpu::DeviceDescriptor {
            label: Some(label),
            required_features: wgpu::Features::empty(),
            required_limits: adapter_limits,
            memory_hints: wgpu::MemoryHints::Performance,
            ..Default::default()
        })
        .await
        .map_err(|e| format!("Failed to create GPU device: {}", e))?;

    let info = GpuDeviceInfo {
        adapter_name: adapter_info.name.clone(),
        backend: adapter_info.backend,
    };

    Ok((device, queue, info))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn job(kernel: ConvertKernel, src_step: usize) -> ConvertJob {
        ConvertJob {
            kernel,
            src: DevicePtr(1).at(0),
            src_chroma: None,
            src_step,
            dst: DevicePtr(2),
            dst_step: 12,
            width: 4,
            height: 2,
        }
    }

    #[test]
    fn test_required_lengths() {
        let yuy2 = job(ConvertKernel::Yuy2ToRgb, 8);
        assert_eq!(yuy2.required_src_len(), 16);
        assert_eq!(yuy2.required_dst_len(), 24);

        let y210 = job(ConvertKernel::Y210ToRgb, 10);
        assert_eq!(y210.required_src_len(), 20);

        // 4x2 output: four 2x1 quadrants, one 5-byte pair per row
        let quad = job(ConvertKernel::Y210QuadLinkToRgb { header: 10 }, 21);
        assert_eq!(quad.required_src_len(), 3 * 21 + 10 + 5);

        let mut nv12 = job(ConvertKernel::Nv12ToRgb, 4);
        nv12.src_chroma = Some(DevicePtr(1).at(8));
        assert_eq!(nv12.required_src_len(), 8);
        assert_eq!(nv12.required_chroma_len(), 4);
    }

    #[test]
    fn test_validate_rejects_bad_jobs() {
        assert!(job(ConvertKernel::Yuy2ToRgb, 8).validate().is_ok());
        assert!(matches!(
            job(ConvertKernel::Yuy2ToRgb, 4).validate(),
            Err(GpuError::InvalidJob(_))
        ));
        assert!(matches!(
            job(ConvertKernel::Nv12ToRgb, 4).validate(),
            Err(GpuError::InvalidJob(_))
        ));
        let mut odd_quad = job(ConvertKernel::Y210QuadLinkToRgb { header: 10 }, 21);
        assert!(odd_quad.validate().is_ok());
        odd_quad.width = 6;
        odd_quad.dst_step = 18;
        assert!(matches!(odd_quad.validate(), Err(GpuError::InvalidJob(_))));

        let bad_order = ConvertKernel::SwapChannels {
            src_channels: 3,
            order: [3, 1, 0],
        };
        assert!(job(bad_order, 12).validate().is_err());

        let mut aliased = job(ConvertKernel::BGR_TO_RGB, 12);
        aliased.dst = aliased.src.ptr;
        assert!(aliased.validate().is_err());
    }

    #[test]
    fn test_check_range() {
        assert!(check_range(DevicePtr(1), 0, 16, 16).is_ok());
        assert!(check_range(DevicePtr(1), 1, 16, 16).is_err());
        assert!(check_range(DevicePtr(1), usize::MAX, 2, 16).is_err());
    }
}
