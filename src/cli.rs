// SPDX-License-Identifier: GPL-3.0-only

//! CLI commands for the capture source
//!
//! The demo drives a [`QcapSource`] with the simulated capture card, so it
//! runs without capture hardware or the vendor SDK.

use clap::{Parser, ValueEnum};
use qcap_source::backends::capture::{
    InputType, LinkLayout, LoopAction, PixelFormat, SimulatedDriver, TestPattern,
    TickLoopController,
};
use qcap_source::gpu::{GpuBackend, HostBackend, WgpuBackend};
use qcap_source::{QcapSource, SourceConfig, TickOutcome, VideoFrame};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::Ordering;
use std::time::Duration;
use tracing::{debug, error, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum GpuChoice {
    /// Run the kernels on the CPU
    Host,
    /// Run the kernels as wgpu compute shaders
    Wgpu,
}

#[derive(Debug, Clone, Parser)]
pub struct RunArgs {
    /// JSON configuration file; flags override its values
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Advisory capture width
    #[arg(long)]
    width: Option<u32>,

    /// Advisory capture height
    #[arg(long)]
    height: Option<u32>,

    /// Tick rate and simulated frame rate
    #[arg(long)]
    fps: Option<u32>,

    /// Raw format requested from the card (yuy2, nv12, y210, bgr24)
    #[arg(long)]
    pixel_format: Option<PixelFormat>,

    /// Input connector (auto, dvi_d, dp, sdi, hdmi)
    #[arg(long)]
    input_type: Option<InputType>,

    /// Have the card write frames into GPU memory
    #[arg(long)]
    rdma: bool,

    /// Number of ticks to run before stopping
    #[arg(short, long, default_value = "120")]
    ticks: u64,

    /// Signal resolution produced by the simulated card
    #[arg(long, default_value = "1920")]
    signal_width: u32,

    #[arg(long, default_value = "1080")]
    signal_height: u32,

    #[arg(long, value_enum, default_value = "host")]
    backend: GpuChoice,

    /// Save the last live frame as PNG
    #[arg(long)]
    snapshot: Option<PathBuf>,
}

impl RunArgs {
    fn source_config(&self) -> Result<SourceConfig, Box<dyn std::error::Error>> {
        let mut config = match &self.config {
            Some(path) => SourceConfig::from_json_str(&std::fs::read_to_string(path)?)?,
            None => SourceConfig::default(),
        };
        if let Some(width) = self.width {
            config.width = width;
        }
        if let Some(height) = self.height {
            config.height = height;
        }
        if let Some(fps) = self.fps {
            config.framerate = fps;
        }
        if let Some(format) = self.pixel_format {
            config.pixel_format = format;
        }
        if let Some(input_type) = self.input_type {
            config.input_type = input_type;
        }
        config.rdma |= self.rdma;
        config.validate()?;
        Ok(config)
    }
}

/// Run the source against the simulated card until the tick count or Ctrl+C
pub fn run_capture(args: RunArgs) -> Result<(), Box<dyn std::error::Error>> {
    let config = args.source_config()?;

    let backend: Arc<dyn GpuBackend> = match args.backend {
        GpuChoice::Host => Arc::new(HostBackend::new()),
        GpuChoice::Wgpu => Arc::new(WgpuBackend::new()?),
    };

    let pattern = TestPattern::new(
        args.signal_width,
        args.signal_height,
        f64::from(config.framerate),
    );
    let driver = SimulatedDriver::new()
        .with_pattern(pattern)
        .with_gpu_backend(Arc::clone(&backend));

    let period = Duration::from_secs_f64(1.0 / f64::from(config.framerate));
    let mut source = QcapSource::new(config, Box::new(driver), backend)?;
    let handle = source.handle();
    let ticks = args.ticks;
    let snapshot = args.snapshot.clone();

    println!("Running {} ticks (Ctrl+C to stop early)...", ticks);

    let mut controller = TickLoopController::start_with_init(
        "qcap-tick",
        Some(period),
        move || {
            source.start().map_err(|e| e.to_string())?;
            Ok((source, 0u64, None::<VideoFrame>))
        },
        move |state| {
            let (source, count, last_live) = state;
            *count += 1;
            match source.tick() {
                Ok(TickOutcome::Frame(frame)) => {
                    info!(
                        tick = *count,
                        width = frame.width,
                        height = frame.height,
                        stride = frame.stride,
                        origin = ?frame.origin,
                        "Frame published"
                    );
                    if !frame.is_placeholder() {
                        *last_live = Some(frame);
                    }
                }
                Ok(TickOutcome::Idle) => debug!(tick = *count, "No frame this tick"),
                Ok(TickOutcome::Reconfigured) => info!(tick = *count, "Input reconfigured"),
                Err(e) if !e.is_fatal() => warn!(tick = *count, error = %e, "Tick failed"),
                Err(e) => {
                    error!(tick = *count, error = %e, "Capture source failed");
                    return LoopAction::Stop;
                }
            }

            if *count < ticks {
                return LoopAction::Continue;
            }
            if let (Some(path), Some(frame)) = (&snapshot, last_live.as_ref())
                && let Err(e) = save_snapshot(source, frame, path)
            {
                warn!(path = %path.display(), error = %e, "Failed to save snapshot");
            }
            LoopAction::Stop
        },
    );

    let stop_signal = controller.stop_signal();
    let quit_handle = handle.clone();
    ctrlc::set_handler(move || {
        stop_signal.store(true, Ordering::SeqCst);
        quit_handle.quit();
    })?;

    controller.join();

    let stats = handle.stats();
    println!();
    println!("Final status:       {:?}", handle.status());
    println!("Frames received:    {}", stats.frames_received);
    println!("Frames dropped:     {}", stats.frames_dropped);
    println!("Frames converted:   {}", stats.frames_converted);
    println!("Placeholders:       {}", stats.placeholders_published);
    println!("Conversion errors:  {}", stats.conversion_failures);
    println!("Reconfigurations:   {}", stats.reconfigurations);
    Ok(())
}

fn save_snapshot(
    source: &QcapSource,
    frame: &VideoFrame,
    path: &Path,
) -> Result<(), Box<dyn std::error::Error>> {
    let data = source.download(frame)?;
    let image = image::RgbImage::from_raw(frame.width, frame.height, data)
        .ok_or("frame buffer does not match its dimensions")?;
    image.save(path)?;
    println!("Snapshot saved to {}", path.display());
    Ok(())
}

/// Print the raw frame size of every pixel format
pub fn list_formats(width: u32, height: u32) {
    println!("Raw frame sizes at {}x{}:", width, height);
    println!();
    for format in PixelFormat::ALL {
        let single = format.frame_size(width, height, LinkLayout::SingleLink);
        print!("  {:<6} {:>10} bytes", format.to_string(), single);
        if format == PixelFormat::Y210 {
            let quad = format.frame_size(width, height, LinkLayout::QuadLink);
            print!("  ({} bytes quad-link)", quad);
        }
        println!();
    }
}
