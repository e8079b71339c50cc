// SPDX-License-Identifier: GPL-3.0-only

//! Raw frame to RGB24 conversion
//!
//! ```text
//! CaptureFrame ──┬── host plane ──▶ staging buffer ──┐
//!                └── device plane (RDMA) ────────────┴──▶ kernel ──▶ output ring
//! ```
//!
//! Host frames are uploaded whole into a ring of staging buffers keyed by the
//! format generation, so a resolution change reallocates the ring before the
//! next upload and consecutive uploads never share a buffer. GPU-direct
//! frames are converted in place. Output goes to a small ring of RGB24
//! buffers so the consumer can still read the previous frame while the next
//! one is written.

use crate::backends::capture::{CaptureFrame, LinkLayout, NegotiatedFormat, PixelFormat, PlaneData};
use crate::constants::{COLOR_CONVERT_RING_SIZE, OUTPUT_BYTES_PER_PIXEL, SQD_ROW_HEADER_BYTES};
use crate::gpu::{ConvertJob, ConvertKernel, DevicePtr, DeviceSlice, GpuBackend, GpuError, GpuResult};
use std::fmt;
use std::sync::Arc;
use tracing::{debug, trace};

/// Conversion failures; none of them stop the source
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConvertError {
    Gpu(GpuError),
    /// The driver delivered fewer bytes than the negotiated format needs
    FrameTooShort { len: usize, expected: usize },
    /// A plane the format needs is absent
    MissingPlane(usize),
    /// A frame arrived before any format was negotiated
    NoSignalFormat,
}

impl fmt::Display for ConvertError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConvertError::Gpu(e) => write!(f, "{}", e),
            ConvertError::FrameTooShort { len, expected } => {
                write!(f, "frame has {} bytes, expected {}", len, expected)
            }
            ConvertError::MissingPlane(index) => write!(f, "frame has no plane {}", index),
            ConvertError::NoSignalFormat => write!(f, "no signal format negotiated"),
        }
    }
}

impl std::error::Error for ConvertError {}

impl From<GpuError> for ConvertError {
    fn from(e: GpuError) -> Self {
        ConvertError::Gpu(e)
    }
}

/// Fixed set of equally sized device buffers handed out round-robin
#[derive(Debug, Default)]
pub struct BufferRing {
    buffers: Vec<DevicePtr>,
    len: usize,
    next: usize,
}

impl BufferRing {
    /// Allocate `count` buffers of `len` bytes
    ///
    /// On failure the buffers already allocated are freed again.
    pub fn allocate(backend: &dyn GpuBackend, count: usize, len: usize) -> GpuResult<Self> {
        let mut buffers = Vec::with_capacity(count);
        for _ in 0..count {
            match backend.alloc(len) {
                Ok(ptr) => buffers.push(ptr),
                Err(e) => {
                    for ptr in buffers {
                        let _ = backend.free(ptr);
                    }
                    return Err(e);
                }
            }
        }
        Ok(Self {
            buffers,
            len,
            next: 0,
        })
    }

    /// Next buffer in rotation, `None` if the ring is empty
    pub fn next_buffer(&mut self) -> Option<DevicePtr> {
        let ptr = *self.buffers.get(self.next)?;
        self.next = (self.next + 1) % self.buffers.len();
        Some(ptr)
    }

    pub fn buffer_len(&self) -> usize {
        self.len
    }

    pub fn count(&self) -> usize {
        self.buffers.len()
    }

    pub fn buffers(&self) -> &[DevicePtr] {
        &self.buffers
    }

    /// Free every buffer; the first error is returned after all were tried
    pub fn release(&mut self, backend: &dyn GpuBackend) -> GpuResult<()> {
        let mut result = Ok(());
        for ptr in self.buffers.drain(..) {
            if let Err(e) = backend.free(ptr)
                && result.is_ok()
            {
                result = Err(e);
            }
        }
        self.len = 0;
        self.next = 0;
        result
    }
}

/// Converted frame in device memory
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConvertedFrame {
    pub ptr: DevicePtr,
    pub width: u32,
    pub height: u32,
    pub stride: usize,
    pub size: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct StagingKey {
    generation: u64,
    format: PixelFormat,
    layout: LinkLayout,
}

/// Kernel for one capture format
pub fn kernel_for(format: PixelFormat, layout: LinkLayout) -> ConvertKernel {
    match format {
        PixelFormat::Yuy2 => ConvertKernel::Yuy2ToRgb,
        PixelFormat::Bgr24 => ConvertKernel::BGR_TO_RGB,
        PixelFormat::Y210 => match layout {
            LinkLayout::SingleLink => ConvertKernel::Y210ToRgb,
            LinkLayout::QuadLink => ConvertKernel::Y210QuadLinkToRgb {
                header: SQD_ROW_HEADER_BYTES as u32,
            },
        },
        PixelFormat::Nv12 => ConvertKernel::Nv12ToRgb,
    }
}

/// Device-side conversion state for one source
pub struct ConversionPipeline {
    backend: Arc<dyn GpuBackend>,
    output: BufferRing,
    staging: BufferRing,
    staging_key: Option<StagingKey>,
}

impl ConversionPipeline {
    /// Allocate the output ring for frames up to `width` x `height`
    pub fn new(backend: Arc<dyn GpuBackend>, width: u32, height: u32) -> GpuResult<Self> {
        let len = width as usize * height as usize * OUTPUT_BYTES_PER_PIXEL;
        let output = BufferRing::allocate(backend.as_ref(), COLOR_CONVERT_RING_SIZE, len)?;
        debug!(
            buffers = COLOR_CONVERT_RING_SIZE,
            len, "Allocated RGB24 output ring"
        );
        Ok(Self {
            backend,
            output,
            staging: BufferRing::default(),
            staging_key: None,
        })
    }

    pub fn output_ring(&self) -> &BufferRing {
        &self.output
    }

    /// Host-path staging ring, empty until the first host frame
    pub fn staging_ring(&self) -> &BufferRing {
        &self.staging
    }

    /// Convert one captured frame to RGB24
    pub fn convert(
        &mut self,
        frame: &CaptureFrame,
        format: PixelFormat,
        layout: LinkLayout,
        negotiated: &NegotiatedFormat,
    ) -> Result<ConvertedFrame, ConvertError> {
        if !negotiated.is_known() {
            return Err(ConvertError::NoSignalFormat);
        }
        let (width, height) = (negotiated.width(), negotiated.height());
        let src_step = format.row_step(width, layout);
        let expected = format.frame_size(width, height, layout);
        if frame.len() < expected {
            return Err(ConvertError::FrameTooShort {
                len: frame.len(),
                expected,
            });
        }

        let src = match frame.plane(0).ok_or(ConvertError::MissingPlane(0))? {
            PlaneData::Host(bytes) => {
                if bytes.len() < expected {
                    return Err(ConvertError::FrameTooShort {
                        len: bytes.len(),
                        expected,
                    });
                }
                let key = StagingKey {
                    generation: negotiated.generation,
                    format,
                    layout,
                };
                let staging = self.staging_buffer(key, expected)?;
                self.backend.copy_htod(staging.into(), &bytes[..expected])?;
                staging.at(0)
            }
            PlaneData::Device(slice) => slice,
        };

        // Chroma follows the luma rows unless the driver hands out its own plane
        let src_chroma = match format {
            PixelFormat::Nv12 => Some(match frame.plane(1) {
                Some(PlaneData::Device(slice)) => slice,
                _ => src.ptr.at(src.offset + src_step * height as usize),
            }),
            _ => None,
        };

        let dst_step = width as usize * OUTPUT_BYTES_PER_PIXEL;
        let size = dst_step * height as usize;
        let dst = self.output_buffer(size)?;

        let job = ConvertJob {
            kernel: kernel_for(format, layout),
            src,
            src_chroma,
            src_step,
            dst,
            dst_step,
            width,
            height,
        };
        self.backend.convert(&job)?;
        trace!(%format, width, height, dst = %dst, "Frame converted");

        Ok(ConvertedFrame {
            ptr: dst,
            width,
            height,
            stride: dst_step,
            size,
        })
    }

    /// Next staging buffer, reallocating the ring when the key or size changes
    fn staging_buffer(&mut self, key: StagingKey, len: usize) -> GpuResult<DevicePtr> {
        let reusable = self.staging_key == Some(key)
            && self.staging.count() > 0
            && self.staging.buffer_len() >= len;
        if !reusable {
            self.staging_key = None;
            self.staging.release(self.backend.as_ref())?;
            self.staging = BufferRing::allocate(self.backend.as_ref(), COLOR_CONVERT_RING_SIZE, len)?;
            self.staging_key = Some(key);
            debug!(
                generation = key.generation,
                format = %key.format,
                buffers = COLOR_CONVERT_RING_SIZE,
                len,
                "Allocated staging ring"
            );
        }
        self.staging
            .next_buffer()
            .ok_or_else(|| GpuError::Allocation {
                len,
                reason: "staging ring is empty".into(),
            })
    }

    /// Next output buffer, growing the ring for larger frames
    fn output_buffer(&mut self, size: usize) -> GpuResult<DevicePtr> {
        if self.output.buffer_len() < size || self.output.count() == 0 {
            debug!(
                from = self.output.buffer_len(),
                to = size,
                "Growing RGB24 output ring"
            );
            self.output.release(self.backend.as_ref())?;
            self.output =
                BufferRing::allocate(self.backend.as_ref(), COLOR_CONVERT_RING_SIZE, size)?;
        }
        self.output
            .next_buffer()
            .ok_or_else(|| GpuError::Allocation {
                len: size,
                reason: "output ring is empty".into(),
            })
    }

    /// Free the output and staging rings; the first error wins
    pub fn release(&mut self) -> GpuResult<()> {
        let output = self.output.release(self.backend.as_ref());
        let staging = self.staging.release(self.backend.as_ref());
        self.staging_key = None;
        output.and(staging)
    }
}

/// Read a converted frame back into host memory
pub fn download(backend: &dyn GpuBackend, frame: &ConvertedFrame) -> GpuResult<Vec<u8>> {
    let mut data = vec![0u8; frame.size];
    backend.copy_dtoh(DeviceSlice::from(frame.ptr), &mut data)?;
    Ok(data)
}
