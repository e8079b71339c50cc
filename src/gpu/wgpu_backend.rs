// SPDX-License-Identifier: GPL-3.0-only

//! wgpu compute implementation of [`GpuBackend`]
//!
//! Device allocations are storage buffers rounded up to whole 32-bit words.
//! Byte offsets into sources travel through the kernel uniform, so no
//! binding offset alignment applies to driver planes.

use super::{
    ConvertJob, ConvertKernel, DevicePtr, DeviceSlice, GpuBackend, GpuDeviceInfo, GpuError,
    GpuResult, check_range, create_compute_device, wgpu,
};
use crate::shaders::{
    RGB24_CONVERT_SHADER, RGB24_CONVERT_WORKGROUP_SIZE, compute_dispatch_size, dispatch_grid,
    kernel_id, read_buffer_async,
};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};
use tracing::{debug, info, trace};

/// Copy and map granularity
const WORD: usize = 4;

/// Uniform buffer for shader parameters
#[repr(C)]
#[derive(Debug, Copy, Clone, Default, bytemuck::Pod, bytemuck::Zeroable)]
struct KernelParams {
    kernel: u32,
    width: u32,
    height: u32,
    src_step: u32,
    dst_step: u32,
    src_offset: u32,
    chroma_offset: u32,
    header: u32,
    src_channels: u32,
    order: [u32; 3],
    dst_words: u32,
    _pad: [u32; 3],
}

fn to_u32(value: usize, what: &str) -> GpuResult<u32> {
    u32::try_from(value).map_err(|_| GpuError::InvalidJob(format!("{} {} exceeds u32", what, value)))
}

impl KernelParams {
    fn from_job(job: &ConvertJob) -> GpuResult<Self> {
        let mut params = KernelParams {
            width: job.width,
            height: job.height,
            src_step: to_u32(job.src_step, "source step")?,
            dst_step: to_u32(job.dst_step, "output step")?,
            src_offset: to_u32(job.src.offset, "source offset")?,
            chroma_offset: to_u32(job.src_chroma.map_or(0, |c| c.offset), "chroma offset")?,
            dst_words: to_u32(job.required_dst_len().div_ceil(WORD), "output size")?,
            ..Default::default()
        };
        match job.kernel {
            ConvertKernel::Yuy2ToRgb => params.kernel = kernel_id::YUY2,
            ConvertKernel::SwapChannels {
                src_channels,
                order,
            } => {
                params.kernel = kernel_id::SWAP_CHANNELS;
                params.src_channels = src_channels;
                params.order = order;
            }
            ConvertKernel::Y210ToRgb => params.kernel = kernel_id::Y210,
            ConvertKernel::Y210QuadLinkToRgb { header } => {
                params.kernel = kernel_id::Y210_QUAD_LINK;
                params.header = header;
            }
            ConvertKernel::Nv12ToRgb => params.kernel = kernel_id::NV12,
        }
        Ok(params)
    }
}

struct Allocation {
    buffer: wgpu::Buffer,
    len: usize,
}

/// GPU conversion backend on a wgpu compute device
pub struct WgpuBackend {
    device: wgpu::Device,
    queue: wgpu::Queue,
    pipeline: wgpu::ComputePipeline,
    bind_group_layout: wgpu::BindGroupLayout,
    params_buffer: wgpu::Buffer,
    allocations: Mutex<HashMap<DevicePtr, Allocation>>,
    next_ptr: AtomicU64,
    context_depth: AtomicUsize,
    // The params uniform is shared, so launches are serialized
    launch: Mutex<()>,
    info: GpuDeviceInfo,
}

impl WgpuBackend {
    /// Create the backend on the first suitable adapter, blocking
    pub fn new() -> GpuResult<Self> {
        pollster::block_on(Self::new_async())
    }

    pub async fn new_async() -> GpuResult<Self> {
        let (device, queue, info) = create_compute_device("RGB24 Convert")
            .await
            .map_err(GpuError::DeviceUnavailable)?;

        info!(
            adapter_name = %info.adapter_name,
            backend = ?info.backend,
            "GPU device created for RGB24 conversion"
        );

        let shader_module = device.create_shader_module(wgpu::ShaderModuleDescriptor {
            label: Some("RGB24 Convert Shader"),
            source: wgpu::ShaderSource::Wgsl(RGB24_CONVERT_SHADER.into()),
        });

        let storage_entry = |binding: u32, read_only: bool| wgpu::BindGroupLayoutEntry {
            binding,
            visibility: wgpu::ShaderStages::COMPUTE,
            ty: wgpu::BindingType::Buffer {
                ty: wgpu::BufferBindingType::Storage { read_only },
                has_dynamic_offset: false,
                min_binding_size: None,
            },
            count: None,
        };

        let bind_group_layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("RGB24 Convert Bind Group Layout"),
            entries: &[
                // Params uniform
                wgpu::BindGroupLayoutEntry {
                    binding: 0,
                    visibility: wgpu::ShaderStages::COMPUTE,
                    ty: wgpu::BindingType::Buffer {
                        ty: wgpu::BufferBindingType::Uniform,
                        has_dynamic_offset: false,
                        min_binding_size: None,
                    },
                    count: None,
                },
                // Packed source or luma plane
                storage_entry(1, true),
                // Chroma plane (aliases the source for packed formats)
                storage_entry(2, true),
                // Packed RGB24 output
                storage_entry(3, false),
            ],
        });

        let pipeline_layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
            label: Some("RGB24 Convert Pipeline Layout"),
            bind_group_layouts: &[&bind_group_layout],
            push_constant_ranges: &[],
        });

        let pipeline = device.create_compute_pipeline(&wgpu::ComputePipelineDescriptor {
            label: Some("RGB24 Convert Pipeline"),
            layout: Some(&pipeline_layout),
            module: &shader_module,
            entry_point: Some("main"),
            compilation_options: Default::default(),
            cache: None,
        });

        let params_buffer = device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("RGB24 Convert Params"),
            size: std::mem::size_of::<KernelParams>() as u64,
            usage: wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });

        Ok(Self {
            device,
            queue,
            pipeline,
            bind_group_layout,
            params_buffer,
            allocations: Mutex::new(HashMap::new()),
            next_ptr: AtomicU64::new(1),
            context_depth: AtomicUsize::new(0),
            launch: Mutex::new(()),
            info,
        })
    }

    /// Adapter the backend runs on
    pub fn device_info(&self) -> &GpuDeviceInfo {
        &self.info
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<DevicePtr, Allocation>> {
        self.allocations
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    fn require_context(&self) -> GpuResult<()> {
        if self.context_depth.load(Ordering::Acquire) > 0 {
            Ok(())
        } else {
            Err(GpuError::NoContext)
        }
    }

    fn buffer(&self, ptr: DevicePtr) -> GpuResult<(wgpu::Buffer, usize)> {
        self.lock()
            .get(&ptr)
            .map(|a| (a.buffer.clone(), a.len))
            .ok_or(GpuError::InvalidPointer(ptr))
    }

    /// Wait for submitted work and surface validation errors
    fn finish(&self) -> Result<(), String> {
        let polled = self.device.poll(wgpu::PollType::wait_indefinitely());
        // Always pop, even when polling failed, to keep scopes balanced
        if let Some(error) = pollster::block_on(self.device.pop_error_scope()) {
            return Err(error.to_string());
        }
        polled
            .map(|_| ())
            .map_err(|e| format!("device poll failed: {}", e))
    }
}

impl GpuBackend for WgpuBackend {
    fn name(&self) -> &str {
        "wgpu"
    }

    fn open_context(&self) -> GpuResult<()> {
        let depth = self.context_depth.fetch_add(1, Ordering::AcqRel) + 1;
        debug!(depth, adapter = %self.info.adapter_name, "GPU context retained");
        Ok(())
    }

    fn close_context(&self) -> GpuResult<()> {
        let previous = self
            .context_depth
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |depth| {
                depth.checked_sub(1)
            })
            .map_err(|_| GpuError::NoContext)?;
        debug!(depth = previous - 1, "GPU context released");
        Ok(())
    }

    fn alloc(&self, len: usize) -> GpuResult<DevicePtr> {
        self.require_context()?;
        let limits = self.device.limits();
        let size = len.next_multiple_of(WORD) as u64;
        if len == 0 || size > limits.max_storage_buffer_binding_size as u64 {
            return Err(GpuError::Allocation {
                len,
                reason: format!(
                    "size must be between 1 and {} bytes",
                    limits.max_storage_buffer_binding_size
                ),
            });
        }

        let ptr = DevicePtr(self.next_ptr.fetch_add(1, Ordering::Relaxed));
        let label = format!("Device Allocation {}", ptr);
        let buffer = self.device.create_buffer(&wgpu::BufferDescriptor {
            label: Some(&label),
            size,
            usage: wgpu::BufferUsages::STORAGE
                | wgpu::BufferUsages::COPY_SRC
                | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });
        self.lock().insert(ptr, Allocation { buffer, len });
        trace!(%ptr, len, "GPU allocation");
        Ok(ptr)
    }

    fn free(&self, ptr: DevicePtr) -> GpuResult<()> {
        self.require_context()?;
        let allocation = self
            .lock()
            .remove(&ptr)
            .ok_or(GpuError::InvalidPointer(ptr))?;
        allocation.buffer.destroy();
        Ok(())
    }

    fn allocation_len(&self, ptr: DevicePtr) -> GpuResult<usize> {
        self.buffer(ptr).map(|(_, len)| len)
    }

    fn copy_htod(&self, dst: DeviceSlice, src: &[u8]) -> GpuResult<()> {
        self.require_context()?;
        let (buffer, len) = self.buffer(dst.ptr)?;
        check_range(dst.ptr, dst.offset, src.len(), len)?;
        if src.is_empty() {
            return Ok(());
        }
        if dst.offset % WORD != 0 {
            return Err(GpuError::Transfer(format!(
                "upload offset {} is not word aligned",
                dst.offset
            )));
        }

        // Writes are whole words; a partial tail word is zero-filled
        if src.len() % WORD == 0 {
            self.queue.write_buffer(&buffer, dst.offset as u64, src);
        } else {
            let mut padded = Vec::with_capacity(src.len().next_multiple_of(WORD));
            padded.extend_from_slice(src);
            padded.resize(src.len().next_multiple_of(WORD), 0);
            self.queue.write_buffer(&buffer, dst.offset as u64, &padded);
        }
        self.queue.submit(std::iter::empty());
        Ok(())
    }

    fn copy_dtoh(&self, src: DeviceSlice, dst: &mut [u8]) -> GpuResult<()> {
        self.require_context()?;
        let (buffer, len) = self.buffer(src.ptr)?;
        check_range(src.ptr, src.offset, dst.len(), len)?;
        if dst.is_empty() {
            return Ok(());
        }

        // Copy the enclosing word-aligned range, then slice out the request
        let start = src.offset - src.offset % WORD;
        let end = (src.offset + dst.len()).next_multiple_of(WORD);
        let readback = self.device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("Readback Buffer"),
            size: (end - start) as u64,
            usage: wgpu::BufferUsages::COPY_DST | wgpu::BufferUsages::MAP_READ,
            mapped_at_creation: false,
        });

        let mut encoder = self
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some("Readback Encoder"),
            });
        encoder.copy_buffer_to_buffer(&buffer, start as u64, &readback, 0, (end - start) as u64);
        self.queue.submit(std::iter::once(encoder.finish()));

        let data = pollster::block_on(read_buffer_async(&self.device, &readback))
            .map_err(GpuError::Transfer)?;
        let skip = src.offset - start;
        dst.copy_from_slice(&data[skip..skip + dst.len()]);
        Ok(())
    }

    fn convert(&self, job: &ConvertJob) -> GpuResult<()> {
        self.require_context()?;
        job.validate()?;
        let params = KernelParams::from_job(job)?;

        let (src_buffer, src_len) = self.buffer(job.src.ptr)?;
        check_range(job.src.ptr, job.src.offset, job.required_src_len(), src_len)
            .map_err(|e| GpuError::Kernel(e.to_string()))?;
        let chroma_buffer = match job.src_chroma {
            Some(chroma) => {
                let (buffer, len) = self.buffer(chroma.ptr)?;
                check_range(chroma.ptr, chroma.offset, job.required_chroma_len(), len)
                    .map_err(|e| GpuError::Kernel(e.to_string()))?;
                buffer
            }
            None => src_buffer.clone(),
        };
        let (dst_buffer, dst_len) = self.buffer(job.dst)?;
        check_range(job.dst, 0, job.required_dst_len(), dst_len)
            .map_err(|e| GpuError::Kernel(e.to_string()))?;

        let _launch = self.launch.lock().unwrap_or_else(PoisonError::into_inner);
        self.device.push_error_scope(wgpu::ErrorFilter::Validation);

        self.queue
            .write_buffer(&self.params_buffer, 0, bytemuck::bytes_of(&params));

        let bind_group = self.device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("RGB24 Convert Bind Group"),
            layout: &self.bind_group_layout,
            entries: &[
                wgpu::BindGroupEntry {
                    binding: 0,
                    resource: self.params_buffer.as_entire_binding(),
                },
                wgpu::BindGroupEntry {
                    binding: 1,
                    resource: src_buffer.as_entire_binding(),
                },
                wgpu::BindGroupEntry {
                    binding: 2,
                    resource: chroma_buffer.as_entire_binding(),
                },
                wgpu::BindGroupEntry {
                    binding: 3,
                    resource: dst_buffer.as_entire_binding(),
                },
            ],
        });

        let mut encoder = self
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some("RGB24 Convert Encoder"),
            });

        let workgroups = compute_dispatch_size(params.dst_words, RGB24_CONVERT_WORKGROUP_SIZE);
        let (groups_x, groups_y) = dispatch_grid(workgroups);
        {
            let mut compute_pass = encoder.begin_compute_pass(&wgpu::ComputePassDescriptor {
                label: Some("RGB24 Convert Pass"),
                timestamp_writes: None,
            });
            compute_pass.set_pipeline(&self.pipeline);
            compute_pass.set_bind_group(0, &bind_group, &[]);
            compute_pass.dispatch_workgroups(groups_x, groups_y, 1);
        }

        self.queue.submit(std::iter::once(encoder.finish()));
        self.finish().map_err(GpuError::Kernel)?;

        trace!(
            kernel = params.kernel,
            width = job.width,
            height = job.height,
            groups_x,
            groups_y,
            "Conversion kernel finished"
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_params_layout_matches_shader() {
        // 16 u32 fields in the WGSL Params struct
        assert_eq!(std::mem::size_of::<KernelParams>(), 64);
    }

    #[test]
    fn test_params_from_swap_job() {
        let job = ConvertJob {
            kernel: ConvertKernel::BGR_TO_RGB,
            src: DevicePtr(1).at(8),
            src_chroma: None,
            src_step: 9,
            dst: DevicePtr(2),
            dst_step: 9,
            width: 3,
            height: 2,
        };
        let params = KernelParams::from_job(&job).unwrap();
        assert_eq!(params.kernel, kernel_id::SWAP_CHANNELS);
        assert_eq!(params.order, [2, 1, 0]);
        assert_eq!(params.src_offset, 8);
        // 18 output bytes round up to 5 words
        assert_eq!(params.dst_words, 5);
    }

    #[test]
    fn test_wgpu_matches_host_kernels() {
        use crate::gpu::HostBackend;

        // Requires a GPU, so skip when none is available
        let gpu = match WgpuBackend::new() {
            Ok(backend) => backend,
            Err(e) => {
                println!("Skipping test (no GPU): {}", e);
                return;
            }
        };
        let host = HostBackend::new();
        gpu.open_context().unwrap();
        host.open_context().unwrap();

        let (width, height) = (7u32, 3u32);
        let src: Vec<u8> = (0..width as usize * height as usize * 4)
            .map(|i| (i * 37 % 251) as u8)
            .collect();
        let jobs = [
            (ConvertKernel::Yuy2ToRgb, (width as usize).div_ceil(2) * 4),
            (ConvertKernel::BGR_TO_RGB, width as usize * 3),
            (ConvertKernel::RGBA_TO_RGB, width as usize * 4),
            (ConvertKernel::Y210ToRgb, (width as usize).div_ceil(2) * 5),
        ];

        for (kernel, src_step) in jobs {
            let mut outputs = Vec::new();
            for backend in [&gpu as &dyn GpuBackend, &host as &dyn GpuBackend] {
                let src_ptr = backend.alloc(src.len()).unwrap();
                let dst_ptr = backend.alloc(width as usize * 3 * height as usize).unwrap();
                backend.copy_htod(src_ptr.into(), &src).unwrap();
                backend
                    .convert(&ConvertJob {
                        kernel,
                        src: src_ptr.into(),
                        src_chroma: None,
                        src_step,
                        dst: dst_ptr,
                        dst_step: width as usize * 3,
                        width,
                        height,
                    })
                    .unwrap();
                let mut out = vec![0u8; width as usize * 3 * height as usize];
                backend.copy_dtoh(dst_ptr.into(), &mut out).unwrap();
                outputs.push(out);
            }
            assert_eq!(outputs[0], outputs[1], "kernel {:?}", kernel);
        }
    }
}
