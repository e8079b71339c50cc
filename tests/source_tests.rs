// SPDX-License-Identifier: GPL-3.0-only

//! Integration tests for the capture source
//!
//! The simulated card and the host GPU backend stand in for the hardware.
//! Ticks block while a signal is locked and no frame is pending, so every
//! test delivers a frame before ticking a locked source.

use qcap_source::backends::capture::format_converters::{
    encode_rgb24, encode_y210_quad_link, nv12_to_rgb24, y210_to_rgb24, yuy2_to_rgb24,
};
use qcap_source::backends::capture::{
    DeviceProperty, LinkLayout, PlaceholderKind, Sdi12gMode, SimulatedDriver, TestPattern,
    VideoInput,
};
use qcap_source::gpu::{GpuBackend, HostBackend};
use qcap_source::{
    AutoDetectState, DeviceStatus, FrameOrigin, InputType, PixelFormat, QcapSource, SourceConfig,
    SourceError, TickOutcome, VideoFrame,
};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

fn config(width: u32, height: u32, input_type: InputType, format: PixelFormat) -> SourceConfig {
    SourceConfig {
        width,
        height,
        input_type,
        pixel_format: format,
        ..Default::default()
    }
}

fn source_with(config: SourceConfig, sim: &SimulatedDriver) -> (QcapSource, Arc<HostBackend>) {
    let backend = Arc::new(HostBackend::new());
    let source = QcapSource::new(config, Box::new(sim.clone()), backend.clone())
        .expect("config should be valid");
    (source, backend)
}

/// Gradient test image so channel mix-ups show
fn gradient(width: u32, height: u32) -> Vec<u8> {
    let mut rgb = Vec::with_capacity((width * height * 3) as usize);
    for y in 0..height {
        for x in 0..width {
            rgb.extend_from_slice(&[(x * 4) as u8, (y * 4) as u8, ((x + y) * 2) as u8]);
        }
    }
    rgb
}

fn expect_frame(outcome: Result<TickOutcome, SourceError>) -> VideoFrame {
    match outcome {
        Ok(TickOutcome::Frame(frame)) => frame,
        other => panic!("expected a frame, got {:?}", other),
    }
}

fn expect_placeholder(source: &mut QcapSource, kind: PlaceholderKind, size: (u32, u32)) {
    let frame = expect_frame(source.tick());
    assert_eq!(frame.origin, FrameOrigin::Placeholder(kind));
    assert_eq!((frame.width, frame.height), size, "{:?} placeholder size", kind);
    assert_eq!(frame.stride, frame.width as usize * 3);
}

#[test]
fn test_bring_up_then_first_live_frame() {
    let sim = SimulatedDriver::new();
    sim.set_sdk_installed(false);
    sim.set_hardware_present(false);
    let (mut source, backend) = source_with(
        config(1920, 1080, InputType::Hdmi, PixelFormat::Bgr24),
        &sim,
    );

    source.start().unwrap();
    assert_eq!(source.status(), DeviceStatus::NoSdk);
    expect_placeholder(&mut source, PlaceholderKind::NoSdk, (160, 90));

    sim.set_sdk_installed(true);
    expect_placeholder(&mut source, PlaceholderKind::NoDevice, (192, 108));
    assert_eq!(source.status(), DeviceStatus::NoDevice);

    sim.set_hardware_present(true);
    expect_placeholder(&mut source, PlaceholderKind::NoSignal, (256, 144));
    assert_eq!(source.status(), DeviceStatus::NoSignal);
    assert_eq!(sim.property(DeviceProperty::IoMethod), Some(1));
    assert_eq!(sim.property(DeviceProperty::VideoOutputBackend), Some(2));

    // Solid blue, B=255 G=0 R=0
    assert!(sim.emit_signal(1920, 1080, 60.0));
    let blue = [255u8, 0, 0].repeat(1920 * 1080);
    assert!(sim.emit_frame(&blue));

    let frame = expect_frame(source.tick());
    assert_eq!(frame.origin, FrameOrigin::Live);
    assert_eq!((frame.width, frame.height), (1920, 1080));
    assert_eq!(frame.stride, 1920 * 3);
    let rgb = source.download(&frame).unwrap();
    assert!(
        rgb.chunks_exact(3).all(|p| p == [0, 0, 255]),
        "BGR bytes should come out in RGB order"
    );
    assert_eq!(sim.outstanding_frames(), 0, "converted frame was released");

    source.stop().unwrap();
    assert_eq!(backend.live_allocations(), 0);
}

#[test]
fn test_auto_detect_reconfigures_onto_detected_input() {
    let sim = SimulatedDriver::new();
    sim.set_detected_input(VideoInput::Hdmi);
    let (mut source, _backend) =
        source_with(config(64, 32, InputType::Auto, PixelFormat::Bgr24), &sim);

    source.start().unwrap();
    assert_eq!(source.auto_detect_state(), AutoDetectState::Auto);
    assert_eq!(sim.selected_input(), VideoInput::Auto);
    assert!(!sim.preview_enabled(), "preview stays off while searching");
    assert_eq!(sim.output_format(), Some(PixelFormat::Yuy2));
    expect_placeholder(&mut source, PlaceholderKind::NoSignal, (256, 144));

    // First lock: stop, select the detected input, restart
    sim.emit_signal(64, 32, 60.0);
    assert_eq!(source.auto_detect_state(), AutoDetectState::Detected);
    assert_eq!(source.tick(), Ok(TickOutcome::Reconfigured));
    assert_eq!(sim.selected_input(), VideoInput::Hdmi);
    assert!(sim.preview_enabled());
    assert_eq!(sim.run_count(), 2);

    let raw = encode_rgb24(PixelFormat::Yuy2, &gradient(64, 32), 64, 32);
    sim.emit_frame(&raw);
    let frame = expect_frame(source.tick());
    let mut expected = vec![0u8; 64 * 32 * 3];
    yuy2_to_rgb24(&raw, 128, &mut expected, 64 * 3, 64, 32);
    assert_eq!(source.download(&frame).unwrap(), expected);

    // Losing the signal goes back to searching
    sim.emit_no_signal();
    assert_eq!(source.auto_detect_state(), AutoDetectState::Auto);
    assert_eq!(source.tick(), Ok(TickOutcome::Reconfigured));
    assert_eq!(sim.selected_input(), VideoInput::Auto);
    assert!(!sim.preview_enabled());
    expect_placeholder(&mut source, PlaceholderKind::NoSignal, (256, 144));

    assert_eq!(source.stats().reconfigurations, 2);
}

#[test]
fn test_forced_input_never_reconfigures() {
    let sim = SimulatedDriver::new();
    let (mut source, _backend) =
        source_with(config(64, 32, InputType::Sdi, PixelFormat::Bgr24), &sim);

    source.start().unwrap();
    assert_eq!(source.auto_detect_state(), AutoDetectState::Forced);
    assert_eq!(sim.selected_input(), VideoInput::Sdi);
    assert!(sim.preview_enabled());
    // SDI cannot deliver BGR24
    assert_eq!(source.pixel_format(), PixelFormat::Yuy2);
    assert_eq!(sim.output_format(), Some(PixelFormat::Yuy2));
    assert_eq!(sim.property(DeviceProperty::Sdi12gMode), None);

    for _ in 0..3 {
        sim.emit_signal(64, 32, 30.0);
        sim.emit_frame(&encode_rgb24(PixelFormat::Yuy2, &gradient(64, 32), 64, 32));
        assert!(expect_frame(source.tick()).origin == FrameOrigin::Live);
        sim.emit_signal_removed();
        expect_placeholder(&mut source, PlaceholderKind::NoSignal, (256, 144));
    }
    assert_eq!(source.stats().reconfigurations, 0);
    assert_eq!(source.auto_detect_state(), AutoDetectState::Forced);
}

#[test]
fn test_sdi_link_mode_is_applied() {
    let sim = SimulatedDriver::new();
    let mut config = config(64, 32, InputType::Sdi, PixelFormat::Y210);
    config.sdi12g_mode = Sdi12gMode::TwoSampleInterleave;
    let (mut source, _backend) = source_with(config, &sim);

    source.start().unwrap();
    assert_eq!(sim.property(DeviceProperty::Sdi12gMode), Some(1));
    assert_eq!(source.pixel_format(), PixelFormat::Y210);
    assert_eq!(source.link_layout(), LinkLayout::SingleLink);
}

#[test]
fn test_conversion_failure_is_not_fatal() {
    let sim = SimulatedDriver::new();
    let (mut source, _backend) =
        source_with(config(64, 48, InputType::Hdmi, PixelFormat::Bgr24), &sim);
    source.start().unwrap();

    sim.emit_signal(64, 48, 60.0);
    sim.emit_frame(&[0u8; 100]);
    let err = source.tick().unwrap_err();
    assert!(matches!(err, SourceError::Conversion(_)), "got {:?}", err);
    assert!(!err.is_fatal());
    assert_eq!(source.stats().conversion_failures, 1);
    assert_eq!(sim.outstanding_frames(), 0, "failed frame was released");

    // The next tick runs normally
    sim.emit_frame(&vec![0u8; 64 * 48 * 3]);
    let frame = expect_frame(source.tick());
    assert_eq!(frame.origin, FrameOrigin::Live);
}

#[test]
fn test_resolution_change_uses_new_stride() {
    let sim = SimulatedDriver::new();
    let (mut source, _backend) =
        source_with(config(64, 48, InputType::Hdmi, PixelFormat::Bgr24), &sim);
    source.start().unwrap();

    sim.emit_signal(64, 48, 60.0);
    sim.emit_frame(&encode_rgb24(PixelFormat::Bgr24, &gradient(64, 48), 64, 48));
    assert_eq!(expect_frame(source.tick()).stride, 64 * 3);

    // A frame captured at the old size is never converted with new dimensions
    sim.emit_frame(&encode_rgb24(PixelFormat::Bgr24, &gradient(64, 48), 64, 48));
    sim.emit_signal(128, 96, 60.0);
    assert!(matches!(source.tick(), Err(SourceError::Conversion(_))));

    let rgb = gradient(128, 96);
    sim.emit_frame(&encode_rgb24(PixelFormat::Bgr24, &rgb, 128, 96));
    let frame = expect_frame(source.tick());
    assert_eq!((frame.width, frame.height), (128, 96));
    assert_eq!(frame.stride, 128 * 3);
    assert_eq!(source.download(&frame).unwrap(), rgb);
}

#[test]
fn test_newest_frame_wins() {
    let sim = SimulatedDriver::new();
    let (mut source, _backend) =
        source_with(config(8, 8, InputType::Hdmi, PixelFormat::Bgr24), &sim);
    source.start().unwrap();
    sim.emit_signal(8, 8, 60.0);

    for value in [10u8, 20, 30] {
        sim.emit_frame(&[value; 8 * 8 * 3]);
    }
    assert_eq!(sim.outstanding_frames(), 1, "evicted frames were released");
    assert_eq!(source.stats().frames_dropped, 2);

    let frame = expect_frame(source.tick());
    assert!(source.download(&frame).unwrap().iter().all(|&b| b == 30));
    assert_eq!(sim.outstanding_frames(), 0);
    assert_eq!(source.stats().frames_received, 3);
}

#[test]
fn test_stop_releases_everything() {
    let sim = SimulatedDriver::new();
    let backend = Arc::new(HostBackend::new());
    let mut config = config(64, 32, InputType::Hdmi, PixelFormat::Yuy2);
    config.rdma = true;
    let driver = sim.clone().with_gpu_backend(backend.clone());
    let mut source = QcapSource::new(config, Box::new(driver), backend.clone()).unwrap();

    source.start().unwrap();
    assert_eq!(sim.bound_gpu_direct_buffers(), 4);
    sim.emit_signal(64, 32, 60.0);
    sim.emit_frame(&vec![16u8; 64 * 32 * 2]);
    assert_eq!(sim.outstanding_frames(), 1);

    source.stop().unwrap();
    assert_eq!(sim.outstanding_frames(), 0, "pending frame was released");
    assert_eq!(sim.bound_gpu_direct_buffers(), 0);
    assert!(!sim.is_created());
    assert!(!sim.is_running());
    assert_eq!(backend.live_allocations(), 0);
    assert!(!backend.has_context());
    assert_eq!(source.tick(), Err(SourceError::NotStarted));

    // Frames arriving after stop are refused
    assert!(!sim.emit_frame(&[0u8; 16]));
}

#[test]
fn test_rdma_nv12_converts_from_device_memory() {
    let sim = SimulatedDriver::new();
    let backend = Arc::new(HostBackend::new());
    let mut config = config(64, 32, InputType::Hdmi, PixelFormat::Nv12);
    config.rdma = true;
    let driver = sim.clone().with_gpu_backend(backend.clone());
    let mut source = QcapSource::new(config, Box::new(driver), backend.clone()).unwrap();
    source.start().unwrap();

    let raw = encode_rgb24(PixelFormat::Nv12, &gradient(64, 32), 64, 32);
    sim.emit_signal(64, 32, 60.0);
    sim.emit_frame(&raw);
    let frame = expect_frame(source.tick());

    let mut expected = vec![0u8; 64 * 32 * 3];
    nv12_to_rgb24(&raw, &raw[64 * 32..], 64, &mut expected, 64 * 3, 64, 32);
    assert_eq!(source.download(&frame).unwrap(), expected);
}

fn quad_link_config(input_type: InputType) -> SourceConfig {
    let mut config = config(64, 32, input_type, PixelFormat::Y210);
    config.rdma = true;
    config.sdi12g_mode = Sdi12gMode::QuadLink;
    config
}

/// Single-link decode of the gradient, the reference for both layouts
fn expected_y210_gradient() -> Vec<u8> {
    let packed = encode_rgb24(PixelFormat::Y210, &gradient(64, 32), 64, 32);
    let step = PixelFormat::Y210.row_step(64, LinkLayout::SingleLink);
    let mut expected = vec![0u8; 64 * 32 * 3];
    y210_to_rgb24(&packed, step, &mut expected, 64 * 3, 64, 32);
    expected
}

#[test]
fn test_rdma_quad_link_reassembles_quadrants() {
    let sim = SimulatedDriver::new();
    let backend = Arc::new(HostBackend::new());
    let driver = sim.clone().with_gpu_backend(backend.clone());
    let mut source =
        QcapSource::new(quad_link_config(InputType::Sdi), Box::new(driver), backend.clone())
            .unwrap();
    source.start().unwrap();
    assert_eq!(sim.property(DeviceProperty::Sdi12gMode), Some(0));
    assert_eq!(source.link_layout(), LinkLayout::QuadLink);

    let framed = encode_y210_quad_link(&gradient(64, 32), 64, 32, |_| [0xAA; 10]);
    // Quadrant rows of 32 pixels: 40 payload bytes plus 16 bytes of framing
    assert_eq!(PixelFormat::Y210.row_step(64, LinkLayout::QuadLink), 64 / 4 * 5 + 16);
    assert_eq!(
        framed.len(),
        PixelFormat::Y210.frame_size(64, 32, LinkLayout::QuadLink)
    );

    sim.emit_signal(64, 32, 60.0);
    sim.emit_frame(&framed);
    let frame = expect_frame(source.tick());
    assert_eq!(source.download(&frame).unwrap(), expected_y210_gradient());
}

#[test]
fn test_quad_link_mode_ignored_off_sdi() {
    // The 12G link property only exists on SDI inputs
    let sim = SimulatedDriver::new();
    let backend = Arc::new(HostBackend::new());
    let driver = sim.clone().with_gpu_backend(backend.clone());
    let mut source =
        QcapSource::new(quad_link_config(InputType::Hdmi), Box::new(driver), backend.clone())
            .unwrap();
    source.start().unwrap();
    assert_eq!(sim.property(DeviceProperty::Sdi12gMode), None);
    assert_eq!(source.link_layout(), LinkLayout::SingleLink);

    let raw = encode_rgb24(PixelFormat::Y210, &gradient(64, 32), 64, 32);
    sim.emit_signal(64, 32, 60.0);
    sim.emit_frame(&raw);
    let frame = expect_frame(source.tick());
    assert_eq!(source.download(&frame).unwrap(), expected_y210_gradient());
}

#[test]
fn test_quit_unblocks_waiting_tick() {
    let sim = SimulatedDriver::new();
    let (mut source, _backend) =
        source_with(config(8, 8, InputType::Hdmi, PixelFormat::Bgr24), &sim);
    source.start().unwrap();
    sim.emit_signal(8, 8, 60.0);

    let handle = source.handle();
    let quitter = thread::spawn(move || {
        thread::sleep(Duration::from_millis(50));
        handle.quit();
    });

    // Locked signal, no frame: blocks until the handle quits
    assert_eq!(source.tick(), Ok(TickOutcome::Idle));
    quitter.join().unwrap();
    source.stop().unwrap();
}

#[test]
fn test_pattern_generator_feeds_source() {
    let sim = SimulatedDriver::new().with_pattern(TestPattern::new(32, 16, 200.0));
    let (mut source, backend) =
        source_with(config(32, 16, InputType::Hdmi, PixelFormat::Yuy2), &sim);
    source.start().unwrap();

    let mut live = None;
    for _ in 0..500 {
        if let Ok(TickOutcome::Frame(frame)) = source.tick()
            && frame.origin == FrameOrigin::Live
        {
            live = Some(frame);
            break;
        }
        thread::sleep(Duration::from_millis(2));
    }
    let frame = live.expect("generator should deliver a live frame");
    assert_eq!((frame.width, frame.height), (32, 16));

    source.stop().unwrap();
    assert!(!sim.is_running());
    assert_eq!(backend.live_allocations(), 0);
}

#[test]
fn test_tick_before_start_fails() {
    let sim = SimulatedDriver::new();
    let (mut source, _backend) =
        source_with(config(8, 8, InputType::Hdmi, PixelFormat::Bgr24), &sim);
    assert_eq!(source.tick(), Err(SourceError::NotStarted));
}
