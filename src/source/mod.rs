// SPDX-License-Identifier: GPL-3.0-only

//! Capture source lifecycle and per-tick frame production
//!
//! [`QcapSource`] owns the driver, the GPU resources and the two state
//! machines. The driver reports on its own thread through [`SourceShared`];
//! everything else happens on the thread calling [`QcapSource::tick`].
//!
//! ```text
//! start ─▶ open context ─▶ placeholders ─▶ output ring ─▶ device bring-up
//!                                                            │
//!            ┌───────────────────────────────────────────────┘
//!            ▼
//! tick ─▶ reconfigure pending? ─▶ placeholder state? ─▶ pop frame ─▶ convert
//!
//! stop ─▶ driver stop ─▶ queue quit ─▶ GPU-direct ─▶ output ring
//!      ─▶ placeholders ─▶ context ─▶ device destroy
//! ```

mod frame;
mod shared;

pub use frame::{FrameOrigin, TickOutcome, VideoFrame};
pub use shared::{SourceHandle, SourceStats, StatsSnapshot};

use crate::backends::capture::{
    AutoDetectState, CaptureDriver, DeviceProperty, DeviceStatus, DisplayPortMstMode, DriverError,
    DriverResult, InputType, LinkLayout, PixelFormat, PlaceholderKind, VideoInput,
};
use crate::config::SourceConfig;
use crate::constants::{DEVICE_IO_METHOD, DEVICE_VIDEO_OUTPUT_BACKEND, GPU_DIRECT_RING_SIZE};
use crate::errors::{SourceError, SourceResult};
use crate::gpu::{DevicePtr, DeviceSlice, GpuBackend};
use crate::pipelines::{ConversionPipeline, PlaceholderSet};
use shared::SourceShared;
use std::fmt;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

fn init_error(e: impl fmt::Display) -> SourceError {
    SourceError::Initialization(e.to_string())
}

fn reconfigure_error(e: impl fmt::Display) -> SourceError {
    SourceError::Reconfiguration(e.to_string())
}

/// Connector to select for an explicitly configured input type
fn forced_input(input_type: InputType, mst_mode: DisplayPortMstMode) -> VideoInput {
    match input_type {
        InputType::Auto => VideoInput::Auto,
        InputType::DviD => VideoInput::DviD,
        InputType::Sdi => VideoInput::Sdi,
        InputType::Hdmi => VideoInput::Hdmi,
        InputType::DisplayPort => match mst_mode {
            DisplayPortMstMode::Sst => VideoInput::DisplayPortSst,
            DisplayPortMstMode::Mst => VideoInput::DisplayPortMst,
        },
    }
}

/// Collects teardown failures, keeping the first one
#[derive(Default)]
struct TeardownLog {
    first: Option<String>,
}

impl TeardownLog {
    fn step<E: fmt::Display>(&mut self, what: &str, result: Result<(), E>) {
        if let Err(e) = result {
            warn!(step = what, error = %e, "Teardown step failed");
            self.first.get_or_insert_with(|| format!("{}: {}", what, e));
        }
    }

    fn finish(self) -> SourceResult<()> {
        match self.first {
            Some(msg) => Err(SourceError::Teardown(msg)),
            None => Ok(()),
        }
    }
}

/// Live capture source producing RGB24 frames on the GPU
pub struct QcapSource {
    config: SourceConfig,
    driver: Box<dyn CaptureDriver>,
    backend: Arc<dyn GpuBackend>,
    shared: Arc<SourceShared>,
    /// Format the driver was last told to deliver
    pixel_format: PixelFormat,
    layout: LinkLayout,
    placeholders: PlaceholderSet,
    pipeline: Option<ConversionPipeline>,
    gpu_direct: Vec<DevicePtr>,
    context_open: bool,
    device_open: bool,
    started: bool,
}

impl QcapSource {
    pub fn new(
        config: SourceConfig,
        driver: Box<dyn CaptureDriver>,
        backend: Arc<dyn GpuBackend>,
    ) -> SourceResult<Self> {
        config.validate()?;
        let shared = Arc::new(SourceShared::new(config.input_type));
        Ok(Self {
            pixel_format: config.pixel_format,
            layout: LinkLayout::SingleLink,
            config,
            driver,
            backend,
            shared,
            placeholders: PlaceholderSet::default(),
            pipeline: None,
            gpu_direct: Vec::new(),
            context_open: false,
            device_open: false,
            started: false,
        })
    }

    pub fn config(&self) -> &SourceConfig {
        &self.config
    }

    pub fn handle(&self) -> SourceHandle {
        SourceHandle {
            shared: Arc::clone(&self.shared),
        }
    }

    pub fn status(&self) -> DeviceStatus {
        self.shared.device.status()
    }

    pub fn auto_detect_state(&self) -> AutoDetectState {
        self.shared.auto.state()
    }

    pub fn stats(&self) -> StatsSnapshot {
        self.shared.stats.snapshot()
    }

    pub fn is_started(&self) -> bool {
        self.started
    }

    /// Raw format the driver is currently delivering
    pub fn pixel_format(&self) -> PixelFormat {
        self.pixel_format
    }

    pub fn link_layout(&self) -> LinkLayout {
        self.layout
    }

    // ===== Lifecycle =====

    /// Acquire GPU resources and bring the device up
    ///
    /// A missing capture SDK or device is not an error: the source starts,
    /// publishes the matching placeholder and retries on every tick.
    pub fn start(&mut self) -> SourceResult<()> {
        if self.started {
            return Ok(());
        }
        info!(
            device = %self.config.device,
            channel = self.config.channel,
            rdma = self.config.rdma,
            width = self.config.width,
            height = self.config.height,
            framerate = self.config.framerate,
            pixel_format = %self.config.pixel_format,
            input_type = %self.config.input_type,
            driver = self.driver.name(),
            gpu = self.backend.name(),
            "Starting capture source"
        );

        if let Err(e) = self.acquire() {
            error!(error = %e, "Capture source failed to start");
            if let Err(cleanup) = self.teardown() {
                warn!(error = %cleanup, "Cleanup after failed start was incomplete");
            }
            return Err(e);
        }
        self.started = true;
        info!(status = ?self.status(), "Capture source started");
        Ok(())
    }

    fn acquire(&mut self) -> SourceResult<()> {
        self.backend.open_context().map_err(init_error)?;
        self.context_open = true;

        self.placeholders = PlaceholderSet::load(self.backend.as_ref()).map_err(init_error)?;
        self.pipeline = Some(
            ConversionPipeline::new(
                Arc::clone(&self.backend),
                self.config.width,
                self.config.height,
            )
            .map_err(init_error)?,
        );

        self.shared.reset();
        self.bring_up_device()
    }

    /// Create the device if it is not open yet, then probe for hardware
    fn bring_up_device(&mut self) -> SourceResult<()> {
        if !self.device_open {
            match self.driver.create(&self.config.device, self.config.channel) {
                Ok(()) => {
                    self.device_open = true;
                    self.shared.device.sdk_ready();
                    self.open_device()?;
                }
                Err(DriverError::SdkUnavailable(reason)) => {
                    debug!(%reason, "Capture SDK not available yet");
                    return Ok(());
                }
                Err(DriverError::DeviceNotFound(reason)) => {
                    self.shared.device.sdk_ready();
                    debug!(%reason, "Capture device not found yet");
                    return Ok(());
                }
                Err(e) => return Err(init_error(e)),
            }
        }

        if self.shared.device.status() == DeviceStatus::NoDevice
            && self.driver.probe()
            && self.shared.device.device_found()
        {
            info!(device = %self.config.device, "Capture hardware found");
        }
        Ok(())
    }

    fn open_device(&mut self) -> SourceResult<()> {
        self.driver
            .set_custom_property(DeviceProperty::IoMethod, DEVICE_IO_METHOD)
            .map_err(init_error)?;
        self.driver
            .set_custom_property(
                DeviceProperty::VideoOutputBackend,
                DEVICE_VIDEO_OUTPUT_BACKEND,
            )
            .map_err(init_error)?;
        self.driver
            .register_callbacks(self.shared.clone())
            .map_err(init_error)?;
        self.configure_input().map_err(init_error)?;
        if self.config.rdma {
            self.bind_gpu_direct()?;
        }
        self.driver.run().map_err(init_error)
    }

    fn bind_gpu_direct(&mut self) -> SourceResult<()> {
        let len = PixelFormat::max_frame_size(self.config.width, self.config.height);
        for index in 0..GPU_DIRECT_RING_SIZE {
            let ptr = self.backend.alloc(len).map_err(init_error)?;
            if let Err(e) = self
                .driver
                .bind_gpu_direct_buffer(index, DeviceSlice::from(ptr), len)
            {
                let _ = self.backend.free(ptr);
                return Err(init_error(e));
            }
            self.gpu_direct.push(ptr);
        }
        info!(
            buffers = GPU_DIRECT_RING_SIZE,
            len, "GPU-direct buffers allocated and bound"
        );
        Ok(())
    }

    /// Select the input and output format for the current auto-detect state
    fn configure_input(&mut self) -> DriverResult<()> {
        let state = self.shared.auto.state();
        let requested = match state {
            AutoDetectState::Auto => VideoInput::Auto,
            AutoDetectState::Detected => self.shared.negotiated().info.video_input,
            AutoDetectState::Forced => forced_input(self.config.input_type, self.config.mst_mode),
        };
        self.driver.set_video_input(requested)?;
        let active = self.driver.video_input()?;
        info!(%requested, %active, ?state, "Video input selected");

        // Auto-detected inputs are only guaranteed to deliver YUY2
        let mut format = match self.config.input_type {
            InputType::Auto => PixelFormat::Yuy2,
            _ => self.config.pixel_format,
        };
        let mut layout = LinkLayout::SingleLink;
        if active == VideoInput::Sdi {
            if let Some(value) = self.config.sdi12g_mode.property_value() {
                self.driver
                    .set_custom_property(DeviceProperty::Sdi12gMode, value)?;
                self.driver.set_video_input(VideoInput::Sdi)?;
                if self.config.quad_link() && format == PixelFormat::Y210 {
                    layout = LinkLayout::QuadLink;
                }
            }
            if format == PixelFormat::Bgr24 {
                warn!("SDI inputs do not deliver BGR24, falling back to YUY2");
                format = PixelFormat::Yuy2;
            }
        }
        self.driver.set_output_format(format)?;
        self.pixel_format = format;
        self.layout = layout;

        let preview = matches!(state, AutoDetectState::Detected | AutoDetectState::Forced);
        self.driver.set_preview_enabled(preview)?;
        debug!(%format, ?layout, preview, "Input configured");
        Ok(())
    }

    /// Release everything `start` acquired
    ///
    /// Every step runs even if an earlier one fails; the first failure is
    /// returned.
    pub fn stop(&mut self) -> SourceResult<()> {
        if !self.started && !self.context_open && !self.device_open {
            return Ok(());
        }
        info!(stats = ?self.stats(), "Stopping capture source");
        self.started = false;
        self.teardown()
    }

    fn teardown(&mut self) -> SourceResult<()> {
        let mut log = TeardownLog::default();

        if self.device_open {
            log.step("driver stop", self.driver.stop());
        }
        self.shared.queue.quit();

        for (index, ptr) in self.gpu_direct.drain(..).enumerate() {
            if self.device_open {
                log.step("unbind GPU-direct buffer", self.driver.unbind_gpu_direct_buffer(index));
            }
            log.step("free GPU-direct buffer", self.backend.free(ptr));
        }
        if let Some(mut pipeline) = self.pipeline.take() {
            log.step("release output ring", pipeline.release());
        }
        log.step("release placeholders", self.placeholders.release(self.backend.as_ref()));

        if self.context_open {
            log.step("close GPU context", self.backend.close_context());
            self.context_open = false;
        }
        if self.device_open {
            log.step("destroy device", self.driver.destroy());
            self.device_open = false;
        }
        log.finish()
    }

    // ===== Per tick =====

    /// Produce the next frame
    ///
    /// Blocks while a signal is locked and the driver has not delivered a
    /// frame yet. A [`SourceError::Conversion`] loses only the current frame;
    /// every other error is fatal.
    pub fn tick(&mut self) -> SourceResult<TickOutcome> {
        if !self.started {
            return Err(SourceError::NotStarted);
        }

        if self.shared.auto.take_reconfigure() {
            self.reconfigure()?;
            return Ok(TickOutcome::Reconfigured);
        }

        if !self.device_open || self.shared.device.status() == DeviceStatus::NoDevice {
            self.bring_up_device()?;
        }

        if let Some(kind) = self.shared.device.status().placeholder() {
            return self.publish_placeholder(kind);
        }

        let Some(frame) = self.shared.queue.pop_block() else {
            return Ok(TickOutcome::Idle);
        };
        let negotiated = self.shared.negotiated();
        let sample_time = frame.sample_time();
        let pipeline = self.pipeline.as_mut().ok_or(SourceError::NotStarted)?;
        let converted = pipeline.convert(&frame, self.pixel_format, self.layout, &negotiated);
        // Hand the buffer back before publishing
        drop(frame);

        match converted {
            Ok(converted) => {
                self.shared.stats.frame_converted();
                Ok(TickOutcome::Frame(VideoFrame::live(converted, sample_time)))
            }
            Err(e) => {
                self.shared.stats.conversion_failed();
                error!(
                    error = %e,
                    format = %self.pixel_format,
                    width = negotiated.width(),
                    height = negotiated.height(),
                    generation = negotiated.generation,
                    "Frame conversion failed"
                );
                Err(SourceError::Conversion(e.to_string()))
            }
        }
    }

    fn reconfigure(&mut self) -> SourceResult<()> {
        if !self.device_open {
            return Ok(());
        }
        info!(state = ?self.shared.auto.state(), "Reconfiguring capture input");
        self.driver.stop().map_err(reconfigure_error)?;
        self.shared.queue.clear();
        self.configure_input().map_err(reconfigure_error)?;
        self.driver.run().map_err(reconfigure_error)?;
        self.shared.stats.reconfigured();
        Ok(())
    }

    fn publish_placeholder(&self, kind: PlaceholderKind) -> SourceResult<TickOutcome> {
        let image = self
            .placeholders
            .get(kind)
            .ok_or_else(|| init_error(format!("placeholder {:?} is not loaded", kind)))?;
        self.shared.stats.placeholder_published();
        Ok(TickOutcome::Frame(VideoFrame::placeholder(kind, image)))
    }

    /// Copy a published frame into host memory
    pub fn download(&self, frame: &VideoFrame) -> SourceResult<Vec<u8>> {
        let mut data = vec![0u8; frame.size];
        self.backend
            .copy_dtoh(DeviceSlice::from(frame.ptr), &mut data)
            .map_err(|e| SourceError::Conversion(e.to_string()))?;
        Ok(data)
    }
}

impl Drop for QcapSource {
    fn drop(&mut self) {
        if let Err(e) = self.stop() {
            warn!(error = %e, "Capture source did not stop cleanly");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_port_follows_mst_mode() {
        assert_eq!(
            forced_input(InputType::DisplayPort, DisplayPortMstMode::Mst),
            VideoInput::DisplayPortMst
        );
        assert_eq!(
            forced_input(InputType::DisplayPort, DisplayPortMstMode::Sst),
            VideoInput::DisplayPortSst
        );
        assert_eq!(
            forced_input(InputType::Hdmi, DisplayPortMstMode::Mst),
            VideoInput::Hdmi
        );
    }

    #[test]
    fn test_teardown_keeps_first_failure() {
        let mut log = TeardownLog::default();
        log.step("a", Ok::<(), String>(()));
        log.step("b", Err::<(), _>("first"));
        log.step("c", Err::<(), _>("second"));
        assert_eq!(
            log.finish(),
            Err(SourceError::Teardown("b: first".to_string()))
        );
    }
}
