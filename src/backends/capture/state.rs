// SPDX-License-Identifier: GPL-3.0-only

//! Device status and input auto-detection state machines
//!
//! Both are written from the driver callback thread and read from the tick
//! thread, so they live in atomics rather than behind the tick thread's `&mut`.

use super::types::{AutoDetectState, DeviceStatus, InputType};
use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use tracing::debug;

/// Device lifecycle status
///
/// ```text
/// NoSdk --sdk_ready--> NoDevice --device_found--> NoSignal
/// NoSignal | SignalRemoved --format_locked--> SignalLocked
/// SignalLocked --no_signal--> NoSignal
/// SignalLocked --signal_removed--> SignalRemoved
/// ```
#[derive(Debug, Default)]
pub struct DeviceState {
    status: AtomicU8,
}

impl DeviceState {
    pub fn new() -> Self {
        Self {
            status: AtomicU8::new(DeviceStatus::NoSdk as u8),
        }
    }

    pub fn status(&self) -> DeviceStatus {
        DeviceStatus::from_u8(self.status.load(Ordering::Acquire))
    }

    fn transition(&self, from: DeviceStatus, to: DeviceStatus) -> bool {
        let moved = self
            .status
            .compare_exchange(from as u8, to as u8, Ordering::AcqRel, Ordering::Acquire)
            .is_ok();
        if moved {
            debug!(?from, ?to, "Device status changed");
        }
        moved
    }

    fn set(&self, to: DeviceStatus) {
        let from = DeviceStatus::from_u8(self.status.swap(to as u8, Ordering::AcqRel));
        if from != to {
            debug!(?from, ?to, "Device status changed");
        }
    }

    /// The driver context was created
    pub fn sdk_ready(&self) -> bool {
        self.transition(DeviceStatus::NoSdk, DeviceStatus::NoDevice)
    }

    /// Hardware answered the presence probe
    pub fn device_found(&self) -> bool {
        self.transition(DeviceStatus::NoDevice, DeviceStatus::NoSignal)
    }

    /// A signal format was negotiated
    pub fn format_locked(&self) {
        self.set(DeviceStatus::SignalLocked);
    }

    pub fn no_signal(&self) {
        self.set(DeviceStatus::NoSignal);
    }

    pub fn signal_removed(&self) {
        self.set(DeviceStatus::SignalRemoved);
    }

    /// Back to `NoSdk` for a fresh start
    pub fn reset(&self) {
        self.set(DeviceStatus::NoSdk);
    }
}

/// Input auto-detection
///
/// With `InputType::Auto` the source starts in `Auto` with preview disabled.
/// The first locked format moves it to `Detected` and requests a
/// reconfiguration onto the reported input; losing the signal while
/// `Detected` moves it back to `Auto` and requests another one. Any other
/// input type is `Forced` and never requests reconfiguration.
#[derive(Debug)]
pub struct AutoDetect {
    input_type: InputType,
    state: AtomicU8,
    need_reconfigure: AtomicBool,
}

impl AutoDetect {
    pub fn new(input_type: InputType) -> Self {
        Self {
            input_type,
            state: AtomicU8::new(Self::initial_state(input_type) as u8),
            need_reconfigure: AtomicBool::new(false),
        }
    }

    fn initial_state(input_type: InputType) -> AutoDetectState {
        match input_type {
            InputType::Auto => AutoDetectState::Auto,
            _ => AutoDetectState::Forced,
        }
    }

    pub fn input_type(&self) -> InputType {
        self.input_type
    }

    pub fn state(&self) -> AutoDetectState {
        AutoDetectState::from_u8(self.state.load(Ordering::Acquire))
    }

    fn transition(&self, from: AutoDetectState, to: AutoDetectState) -> bool {
        if self.input_type != InputType::Auto {
            return false;
        }
        let moved = self
            .state
            .compare_exchange(from as u8, to as u8, Ordering::AcqRel, Ordering::Acquire)
            .is_ok();
        if moved {
            debug!(?from, ?to, "Input auto-detect state changed");
            self.need_reconfigure.store(true, Ordering::Release);
        }
        moved
    }

    /// A format was locked; returns `true` if a reconfiguration was requested
    pub fn on_format_locked(&self) -> bool {
        self.transition(AutoDetectState::Auto, AutoDetectState::Detected)
    }

    /// The signal went away; returns `true` if a reconfiguration was requested
    pub fn on_signal_lost(&self) -> bool {
        self.transition(AutoDetectState::Detected, AutoDetectState::Auto)
    }

    pub fn is_reconfigure_pending(&self) -> bool {
        self.need_reconfigure.load(Ordering::Acquire)
    }

    /// Consume a pending reconfiguration request
    pub fn take_reconfigure(&self) -> bool {
        self.need_reconfigure.swap(false, Ordering::AcqRel)
    }

    /// Back to the initial state with no request pending
    pub fn reset(&self) {
        self.state
            .store(Self::initial_state(self.input_type) as u8, Ordering::Release);
        self.need_reconfigure.store(false, Ordering::Release);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_device_bring_up_order() {
        let state = DeviceState::new();
        assert_eq!(state.status(), DeviceStatus::NoSdk);

        // Probing before the SDK is up changes nothing
        assert!(!state.device_found());
        assert_eq!(state.status(), DeviceStatus::NoSdk);

        assert!(state.sdk_ready());
        assert_eq!(state.status(), DeviceStatus::NoDevice);
        assert!(!state.sdk_ready());

        assert!(state.device_found());
        assert_eq!(state.status(), DeviceStatus::NoSignal);
    }

    #[test]
    fn test_signal_transitions() {
        let state = DeviceState::new();
        state.sdk_ready();
        state.device_found();

        state.format_locked();
        assert_eq!(state.status(), DeviceStatus::SignalLocked);
        state.signal_removed();
        assert_eq!(state.status(), DeviceStatus::SignalRemoved);
        state.format_locked();
        state.no_signal();
        assert_eq!(state.status(), DeviceStatus::NoSignal);

        state.reset();
        assert_eq!(state.status(), DeviceStatus::NoSdk);
    }

    #[test]
    fn test_auto_detect_lock_and_loss() {
        let auto = AutoDetect::new(InputType::Auto);
        assert_eq!(auto.state(), AutoDetectState::Auto);
        assert!(!auto.is_reconfigure_pending());

        assert!(auto.on_format_locked());
        assert_eq!(auto.state(), AutoDetectState::Detected);
        assert!(auto.take_reconfigure());
        assert!(!auto.take_reconfigure());

        // A second lock while detected (e.g. a resolution change) is not a new detection
        assert!(!auto.on_format_locked());
        assert!(!auto.is_reconfigure_pending());

        assert!(auto.on_signal_lost());
        assert_eq!(auto.state(), AutoDetectState::Auto);
        assert!(auto.take_reconfigure());

        // Losing the signal while still searching requests nothing
        assert!(!auto.on_signal_lost());
        assert!(!auto.is_reconfigure_pending());
    }

    #[test]
    fn test_forced_input_never_reconfigures() {
        for input in [
            InputType::DviD,
            InputType::DisplayPort,
            InputType::Sdi,
            InputType::Hdmi,
        ] {
            let auto = AutoDetect::new(input);
            assert_eq!(auto.state(), AutoDetectState::Forced);
            assert!(!auto.on_format_locked());
            assert!(!auto.on_signal_lost());
            assert!(!auto.is_reconfigure_pending());
            assert_eq!(auto.state(), AutoDetectState::Forced);
        }
    }

    #[test]
    fn test_auto_detect_reset() {
        let auto = AutoDetect::new(InputType::Auto);
        auto.on_format_locked();
        auto.reset();
        assert_eq!(auto.state(), AutoDetectState::Auto);
        assert!(!auto.is_reconfigure_pending());
    }
}
