// SPDX-License-Identifier: GPL-3.0-only

//! In-process capture driver
//!
//! [`SimulatedDriver`] honours the same contract as a hardware driver:
//! callbacks fire from a thread other than the caller's, frames are
//! borrowed and must be dropped to be returned, and preview frames are only
//! delivered while preview is enabled. Tests drive it by hand through the
//! `emit_*` methods; with a [`TestPattern`] it generates colour bars on its
//! own thread while running.
//!
//! Handles are cheap clones sharing one device, so a test can keep one while
//! the source owns another.

use super::format_converters::{encode_rgb24, encode_y210_quad_link};
use super::frame_loop::{LoopAction, TickLoopController};
use super::types::{
    AudioInput, CaptureFrame, DriverBuffer, FormatChange, LinkLayout, PixelFormat, PlaneData,
    VideoInput,
};
use super::{CaptureDriver, DeviceProperty, DriverCallbacks, DriverError, DriverResult};
use crate::constants::SQD_ROW_HEADER_BYTES;
use crate::gpu::{DeviceSlice, GpuBackend};
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tracing::{debug, info, trace, warn};

/// Signal the pattern generator announces when the driver starts running
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TestPattern {
    pub width: u32,
    pub height: u32,
    pub frame_rate: f64,
}

impl TestPattern {
    pub fn new(width: u32, height: u32, frame_rate: f64) -> Self {
        Self {
            width,
            height,
            frame_rate,
        }
    }

    /// Eight vertical bars: white, yellow, cyan, green, magenta, red, blue, black
    pub fn colour_bars(&self) -> Vec<u8> {
        const BARS: [[u8; 3]; 8] = [
            [235, 235, 235],
            [235, 235, 16],
            [16, 235, 235],
            [16, 235, 16],
            [235, 16, 235],
            [235, 16, 16],
            [16, 16, 235],
            [16, 16, 16],
        ];
        let w = self.width as usize;
        let mut rgb = Vec::with_capacity(w * self.height as usize * 3);
        for _ in 0..self.height {
            for x in 0..w {
                rgb.extend_from_slice(&BARS[x * BARS.len() / w.max(1)]);
            }
        }
        rgb
    }
}

/// Encode colour bars for `format` in the given link layout
///
/// Quad-link rows carry their stored row index in the link header.
fn pattern_frame(pattern: &TestPattern, format: PixelFormat, layout: LinkLayout) -> Vec<u8> {
    let rgb = pattern.colour_bars();
    if layout == LinkLayout::QuadLink && format == PixelFormat::Y210 {
        return encode_y210_quad_link(&rgb, pattern.width, pattern.height, |row| {
            let mut header = [0u8; SQD_ROW_HEADER_BYTES];
            header[..4].copy_from_slice(&(row as u32).to_le_bytes());
            header
        });
    }
    encode_rgb24(format, &rgb, pattern.width, pattern.height)
}

#[derive(Default)]
struct SimState {
    created: bool,
    running: bool,
    run_count: u32,
    preview_enabled: bool,
    callbacks: Option<Arc<dyn DriverCallbacks>>,
    video_input: VideoInput,
    detected_input: VideoInput,
    output_format: Option<PixelFormat>,
    properties: HashMap<DeviceProperty, u32>,
    gpu_direct: BTreeMap<usize, (DeviceSlice, usize)>,
    next_gpu_direct: usize,
    gpu: Option<Arc<dyn GpuBackend>>,
    signal: Option<FormatChange>,
    pattern: Option<TestPattern>,
    generator: Option<TickLoopController>,
}

struct SimInner {
    sdk_installed: AtomicBool,
    hardware_present: AtomicBool,
    state: Mutex<SimState>,
    outstanding: AtomicUsize,
    delivered: AtomicU64,
    released: AtomicU64,
}

enum SimStorage {
    Host(Vec<u8>),
    Device(DeviceSlice),
}

/// One borrowed frame; dropping it returns the buffer to the driver
struct SimBuffer {
    storage: SimStorage,
    len: usize,
    chroma_offset: Option<usize>,
    owner: Arc<SimInner>,
}

impl DriverBuffer for SimBuffer {
    fn len(&self) -> usize {
        self.len
    }

    fn plane(&self, index: usize) -> Option<PlaneData<'_>> {
        let offset = match index {
            0 => 0,
            1 => self.chroma_offset?,
            _ => return None,
        };
        match &self.storage {
            SimStorage::Host(data) => data.get(offset..).map(PlaneData::Host),
            SimStorage::Device(slice) => Some(PlaneData::Device(
                slice.ptr.at(slice.offset + offset),
            )),
        }
    }
}

impl Drop for SimBuffer {
    fn drop(&mut self) {
        self.owner.outstanding.fetch_sub(1, Ordering::AcqRel);
        self.owner.released.fetch_add(1, Ordering::AcqRel);
    }
}

/// Simulated capture card
#[derive(Clone)]
pub struct SimulatedDriver {
    inner: Arc<SimInner>,
}

impl Default for SimulatedDriver {
    fn default() -> Self {
        Self::new()
    }
}

impl SimulatedDriver {
    /// A card with the SDK installed, hardware present and HDMI connected
    pub fn new() -> Self {
        let state = SimState {
            detected_input: VideoInput::Hdmi,
            ..Default::default()
        };
        Self {
            inner: Arc::new(SimInner {
                sdk_installed: AtomicBool::new(true),
                hardware_present: AtomicBool::new(true),
                state: Mutex::new(state),
                outstanding: AtomicUsize::new(0),
                delivered: AtomicU64::new(0),
                released: AtomicU64::new(0),
            }),
        }
    }

    /// Generate colour bars on a driver thread while running
    pub fn with_pattern(self, pattern: TestPattern) -> Self {
        self.lock().pattern = Some(pattern);
        self
    }

    /// Backend used to write frames into bound GPU-direct buffers
    pub fn with_gpu_backend(self, gpu: Arc<dyn GpuBackend>) -> Self {
        self.lock().gpu = Some(gpu);
        self
    }

    fn lock(&self) -> MutexGuard<'_, SimState> {
        self.inner
            .state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    // ===== Environment =====

    pub fn set_sdk_installed(&self, installed: bool) {
        self.inner.sdk_installed.store(installed, Ordering::SeqCst);
    }

    pub fn set_hardware_present(&self, present: bool) {
        self.inner.hardware_present.store(present, Ordering::SeqCst);
    }

    /// Input the card finds when asked to auto-detect
    pub fn set_detected_input(&self, input: VideoInput) {
        self.lock().detected_input = input;
    }

    // ===== Events =====

    fn callbacks(&self) -> Option<Arc<dyn DriverCallbacks>> {
        let state = self.lock();
        if state.running {
            state.callbacks.clone()
        } else {
            None
        }
    }

    /// Input reported with signal events
    fn reported_input(state: &SimState) -> VideoInput {
        match state.video_input {
            VideoInput::Auto => state.detected_input,
            input => input,
        }
    }

    /// Announce a signal format; ignored unless running
    pub fn emit_format_changed(&self, change: FormatChange) -> bool {
        self.lock().signal = Some(change);
        match self.callbacks() {
            Some(callbacks) => {
                callbacks.on_format_changed(&change);
                true
            }
            None => false,
        }
    }

    /// Announce a signal on the currently reported input
    pub fn emit_signal(&self, width: u32, height: u32, frame_rate: f64) -> bool {
        let input = Self::reported_input(&self.lock());
        self.emit_format_changed(FormatChange::video(input, width, height, frame_rate))
    }

    pub fn emit_no_signal(&self) -> bool {
        let input = {
            let mut state = self.lock();
            state.signal = None;
            Self::reported_input(&state)
        };
        match self.callbacks() {
            Some(callbacks) => {
                callbacks.on_no_signal_detected(input, AudioInput::Embedded);
                true
            }
            None => false,
        }
    }

    pub fn emit_signal_removed(&self) -> bool {
        let input = {
            let mut state = self.lock();
            state.signal = None;
            Self::reported_input(&state)
        };
        match self.callbacks() {
            Some(callbacks) => {
                callbacks.on_signal_removed(input, AudioInput::Embedded);
                true
            }
            None => false,
        }
    }

    /// Deliver one raw frame; returns `false` if preview is not running
    pub fn emit_frame(&self, data: &[u8]) -> bool {
        self.emit_frame_at(0.0, data)
    }

    /// Deliver one raw frame stamped `sample_time` seconds
    pub fn emit_frame_at(&self, sample_time: f64, data: &[u8]) -> bool {
        let (callbacks, storage, chroma_offset) = {
            let mut state = self.lock();
            if !state.running || !state.preview_enabled {
                return false;
            }
            let Some(callbacks) = state.callbacks.clone() else {
                return false;
            };

            let chroma_offset = match (state.output_format, state.signal) {
                (Some(PixelFormat::Nv12), Some(signal)) => Some(
                    PixelFormat::Nv12.row_step(signal.width, LinkLayout::SingleLink)
                        * signal.height as usize,
                ),
                _ => None,
            };

            let storage = match Self::next_gpu_direct(&mut state) {
                Some((slice, capacity)) => {
                    if data.len() > capacity {
                        warn!(len = data.len(), capacity, "Frame exceeds GPU-direct buffer");
                        return false;
                    }
                    let Some(gpu) = state.gpu.clone() else {
                        return false;
                    };
                    if let Err(e) = gpu.copy_htod(slice, data) {
                        warn!(error = %e, "GPU-direct write failed");
                        return false;
                    }
                    SimStorage::Device(slice)
                }
                None => SimStorage::Host(data.to_vec()),
            };
            (callbacks, storage, chroma_offset)
        };

        self.inner.outstanding.fetch_add(1, Ordering::AcqRel);
        self.inner.delivered.fetch_add(1, Ordering::AcqRel);
        let frame = CaptureFrame::new(
            Box::new(SimBuffer {
                storage,
                len: data.len(),
                chroma_offset,
                owner: Arc::clone(&self.inner),
            }),
            sample_time,
        );
        trace!(len = data.len(), sample_time, "Simulated frame delivered");
        callbacks.on_video_preview(sample_time, frame);
        true
    }

    /// Deliver audio samples; returns `false` if preview is not running
    pub fn emit_audio(&self, sample_time: f64, data: &[u8]) -> bool {
        let callbacks = {
            let state = self.lock();
            if !state.running || !state.preview_enabled {
                return false;
            }
            state.callbacks.clone()
        };
        match callbacks {
            Some(callbacks) => {
                callbacks.on_audio_preview(sample_time, data);
                true
            }
            None => false,
        }
    }

    fn next_gpu_direct(state: &mut SimState) -> Option<(DeviceSlice, usize)> {
        if state.gpu_direct.is_empty() || state.gpu.is_none() {
            return None;
        }
        let (&index, &(slice, len)) = state
            .gpu_direct
            .range(state.next_gpu_direct..)
            .next()
            .or_else(|| state.gpu_direct.iter().next())?;
        state.next_gpu_direct = index + 1;
        Some((slice, len))
    }

    // ===== Inspection =====

    /// Frames delivered and not yet dropped by the consumer
    pub fn outstanding_frames(&self) -> usize {
        self.inner.outstanding.load(Ordering::Acquire)
    }

    pub fn delivered_frames(&self) -> u64 {
        self.inner.delivered.load(Ordering::Acquire)
    }

    pub fn released_frames(&self) -> u64 {
        self.inner.released.load(Ordering::Acquire)
    }

    pub fn is_created(&self) -> bool {
        self.lock().created
    }

    pub fn is_running(&self) -> bool {
        self.lock().running
    }

    /// Number of times `run` succeeded
    pub fn run_count(&self) -> u32 {
        self.lock().run_count
    }

    pub fn preview_enabled(&self) -> bool {
        self.lock().preview_enabled
    }

    /// Input most recently selected with `set_video_input`
    pub fn selected_input(&self) -> VideoInput {
        self.lock().video_input
    }

    pub fn output_format(&self) -> Option<PixelFormat> {
        self.lock().output_format
    }

    pub fn property(&self, property: DeviceProperty) -> Option<u32> {
        self.lock().properties.get(&property).copied()
    }

    pub fn bound_gpu_direct_buffers(&self) -> usize {
        self.lock().gpu_direct.len()
    }

    fn require_created(state: &SimState, operation: &str) -> DriverResult<()> {
        if state.created {
            Ok(())
        } else {
            Err(DriverError::Rejected(format!(
                "{} before device was created",
                operation
            )))
        }
    }

    fn start_generator(&self, pattern: TestPattern) -> TickLoopController {
        let driver = self.clone();
        let period = Duration::from_secs_f64(1.0 / pattern.frame_rate.max(1.0));
        let mut announced = false;
        let mut frame_index = 0u64;
        let mut cached: Option<(PixelFormat, LinkLayout, Vec<u8>)> = None;

        TickLoopController::start("qcap-sim-generator", Some(period), move || {
            if !announced {
                driver.emit_signal(pattern.width, pattern.height, pattern.frame_rate);
                announced = true;
                return LoopAction::Continue;
            }

            let Some(format) = driver.output_format() else {
                return LoopAction::Continue;
            };
            let layout = driver.link_layout(format);
            let stale = cached
                .as_ref()
                .is_none_or(|(f, l, _)| *f != format || *l != layout);
            if stale {
                debug!(%format, ?layout, "Encoding simulated test pattern");
                cached = Some((format, layout, pattern_frame(&pattern, format, layout)));
            }
            if let Some((_, _, data)) = &cached {
                let sample_time = frame_index as f64 / pattern.frame_rate;
                if driver.emit_frame_at(sample_time, data) {
                    frame_index += 1;
                }
            }
            LoopAction::Continue
        })
    }

    /// Quad-link framing applies to Y210 written through GPU-direct buffers
    /// with the 12G property set to quad-link
    fn link_layout(&self, format: PixelFormat) -> LinkLayout {
        let state = self.lock();
        let quad = format == PixelFormat::Y210
            && !state.gpu_direct.is_empty()
            && state.properties.get(&DeviceProperty::Sdi12gMode) == Some(&0);
        if quad {
            LinkLayout::QuadLink
        } else {
            LinkLayout::SingleLink
        }
    }

    fn stop_generator(&self) {
        let generator = self.lock().generator.take();
        if let Some(mut generator) = generator {
            generator.stop();
        }
    }
}

impl CaptureDriver for SimulatedDriver {
    fn name(&self) -> &str {
        "simulated"
    }

    fn create(&mut self, device: &str, channel: u32) -> DriverResult<()> {
        if !self.inner.sdk_installed.load(Ordering::SeqCst) {
            return Err(DriverError::SdkUnavailable(
                "capture library is not installed".into(),
            ));
        }
        self.lock().created = true;
        info!(device, channel, "Simulated device created");
        Ok(())
    }

    fn destroy(&mut self) -> DriverResult<()> {
        self.stop_generator();
        let mut state = self.lock();
        Self::require_created(&state, "destroy")?;
        state.created = false;
        state.running = false;
        state.preview_enabled = false;
        state.callbacks = None;
        state.gpu_direct.clear();
        state.properties.clear();
        Ok(())
    }

    fn probe(&mut self) -> bool {
        self.lock().created && self.inner.hardware_present.load(Ordering::SeqCst)
    }

    fn set_custom_property(&mut self, property: DeviceProperty, value: u32) -> DriverResult<()> {
        let mut state = self.lock();
        Self::require_created(&state, "set_custom_property")?;
        state.properties.insert(property, value);
        Ok(())
    }

    fn register_callbacks(&mut self, callbacks: Arc<dyn DriverCallbacks>) -> DriverResult<()> {
        let mut state = self.lock();
        Self::require_created(&state, "register_callbacks")?;
        state.callbacks = Some(callbacks);
        Ok(())
    }

    fn set_preview_enabled(&mut self, enabled: bool) -> DriverResult<()> {
        let mut state = self.lock();
        Self::require_created(&state, "set_preview_enabled")?;
        state.preview_enabled = enabled;
        Ok(())
    }

    fn set_video_input(&mut self, input: VideoInput) -> DriverResult<()> {
        let mut state = self.lock();
        Self::require_created(&state, "set_video_input")?;
        state.video_input = input;
        Ok(())
    }

    fn video_input(&self) -> DriverResult<VideoInput> {
        let state = self.lock();
        Self::require_created(&state, "video_input")?;
        Ok(state.video_input)
    }

    fn set_output_format(&mut self, format: PixelFormat) -> DriverResult<()> {
        let mut state = self.lock();
        Self::require_created(&state, "set_output_format")?;
        state.output_format = Some(format);
        Ok(())
    }

    fn bind_gpu_direct_buffer(
        &mut self,
        index: usize,
        buffer: DeviceSlice,
        len: usize,
    ) -> DriverResult<()> {
        let mut state = self.lock();
        Self::require_created(&state, "bind_gpu_direct_buffer")?;
        state.gpu_direct.insert(index, (buffer, len));
        Ok(())
    }

    fn unbind_gpu_direct_buffer(&mut self, index: usize) -> DriverResult<()> {
        let mut state = self.lock();
        state
            .gpu_direct
            .remove(&index)
            .map(|_| ())
            .ok_or_else(|| DriverError::Rejected(format!("no GPU-direct buffer {}", index)))
    }

    fn run(&mut self) -> DriverResult<()> {
        self.stop_generator();
        let pattern = {
            let mut state = self.lock();
            Self::require_created(&state, "run")?;
            state.running = true;
            state.run_count += 1;
            state.pattern
        };
        if let Some(pattern) = pattern {
            let generator = self.start_generator(pattern);
            self.lock().generator = Some(generator);
        }
        Ok(())
    }

    fn stop(&mut self) -> DriverResult<()> {
        self.stop_generator();
        let mut state = self.lock();
        Self::require_created(&state, "stop")?;
        state.running = false;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex as StdMutex;

    #[derive(Default)]
    struct Recorder {
        events: StdMutex<Vec<String>>,
        frames: StdMutex<Vec<CaptureFrame>>,
    }

    impl DriverCallbacks for Recorder {
        fn on_format_changed(&self, change: &FormatChange) {
            self.events
                .lock()
                .unwrap()
                .push(format!("format {}x{} {}", change.width, change.height, change.video_input));
        }

        fn on_signal_removed(&self, video_input: VideoInput, _audio_input: AudioInput) {
            self.events
                .lock()
                .unwrap()
                .push(format!("removed {}", video_input));
        }

        fn on_no_signal_detected(&self, video_input: VideoInput, _audio_input: AudioInput) {
            self.events
                .lock()
                .unwrap()
                .push(format!("no signal {}", video_input));
        }

        fn on_video_preview(&self, _sample_time: f64, frame: CaptureFrame) {
            self.frames.lock().unwrap().push(frame);
        }
    }

    fn running_driver(recorder: &Arc<Recorder>) -> SimulatedDriver {
        let mut driver = SimulatedDriver::new();
        driver.create("SC0710 PCI", 0).unwrap();
        driver.register_callbacks(recorder.clone()).unwrap();
        driver.run().unwrap();
        driver
    }

    #[test]
    fn test_create_fails_without_sdk() {
        let mut driver = SimulatedDriver::new();
        driver.set_sdk_installed(false);
        assert!(matches!(
            driver.create("SC0710 PCI", 0),
            Err(DriverError::SdkUnavailable(_))
        ));
        assert!(!driver.probe());

        driver.set_sdk_installed(true);
        driver.set_hardware_present(false);
        driver.create("SC0710 PCI", 0).unwrap();
        assert!(!driver.probe());
        driver.set_hardware_present(true);
        assert!(driver.probe());
    }

    #[test]
    fn test_frames_need_preview() {
        let recorder = Arc::new(Recorder::default());
        let mut driver = running_driver(&recorder);

        assert!(!driver.emit_frame(&[0u8; 8]));
        driver.set_preview_enabled(true).unwrap();
        assert!(driver.emit_frame(&[0u8; 8]));
        assert_eq!(driver.outstanding_frames(), 1);

        recorder.frames.lock().unwrap().clear();
        assert_eq!(driver.outstanding_frames(), 0);
        assert_eq!(driver.released_frames(), 1);
    }

    #[test]
    fn test_auto_input_reports_detected_connector() {
        let recorder = Arc::new(Recorder::default());
        let mut driver = running_driver(&recorder);
        driver.set_detected_input(VideoInput::Sdi);

        driver.set_video_input(VideoInput::Auto).unwrap();
        driver.emit_signal(1920, 1080, 60.0);
        driver.set_video_input(VideoInput::Hdmi).unwrap();
        driver.emit_no_signal();

        assert_eq!(
            *recorder.events.lock().unwrap(),
            vec!["format 1920x1080 SDI".to_string(), "no signal HDMI".to_string()]
        );
    }

    #[test]
    fn test_events_ignored_when_stopped() {
        let recorder = Arc::new(Recorder::default());
        let mut driver = running_driver(&recorder);
        driver.stop().unwrap();
        assert!(!driver.emit_signal(1280, 720, 30.0));
        assert!(!driver.emit_signal_removed());
        assert!(recorder.events.lock().unwrap().is_empty());
    }

    #[test]
    fn test_nv12_frames_expose_chroma_plane() {
        let recorder = Arc::new(Recorder::default());
        let mut driver = running_driver(&recorder);
        driver.set_output_format(PixelFormat::Nv12).unwrap();
        driver.set_preview_enabled(true).unwrap();
        driver.emit_signal(4, 2, 60.0);
        driver.emit_frame(&[1, 1, 1, 1, 1, 1, 1, 1, 9, 9, 9, 9]);

        let frames = recorder.frames.lock().unwrap();
        match frames[0].plane(1) {
            Some(PlaneData::Host(chroma)) => assert_eq!(chroma, &[9, 9, 9, 9]),
            other => panic!("unexpected chroma plane {:?}", other),
        }
    }

    #[test]
    fn test_quad_link_pattern_rows() {
        let pattern = TestPattern::new(8, 2, 30.0);
        let frame = pattern_frame(&pattern, PixelFormat::Y210, LinkLayout::QuadLink);
        assert_eq!(
            frame.len(),
            PixelFormat::Y210.frame_size(8, 2, LinkLayout::QuadLink)
        );
        // Four quadrant rows, each starting with its index in the link header
        let step = PixelFormat::Y210.row_step(8, LinkLayout::QuadLink);
        assert_eq!(step, 8 / 4 * 5 + 16);
        for row in 0..4 {
            assert_eq!(&frame[row * step..row * step + 4], &(row as u32).to_le_bytes());
        }
    }
}
