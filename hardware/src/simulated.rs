//! In-process payload used when no lens adapter is attached

use std::sync::{Arc, Mutex};

use tracing::debug;

use crate::adapter::HardwareAdapter;
use crate::applied::AppliedSettings;
use crate::error::{HardwareError, HardwareResult};
use crate::request::{ApertureMove, CameraSettings, FocusMove, LensSettings, LensState};

/// Focus encoder range of the simulated lens.
pub const SIM_MIN_FOCUS: i32 = 0;
pub const SIM_MAX_FOCUS: i32 = 4000;

/// F-numbers (x10) the simulated aperture can stop at, widest first.
pub const SIM_F_STOPS_X10: [i32; 8] = [14, 20, 28, 40, 56, 80, 110, 160];

/// Something the simulated payload was asked to do.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum PayloadEvent {
    Camera(CameraSettings),
    Lens(LensSettings),
    Released,
}

#[derive(Debug, Default)]
struct Journal {
    events: Vec<PayloadEvent>,
    fail_next: bool,
}

/// Handle for inspecting a [`SimulatedPayload`] after it has been moved into
/// the server.
#[derive(Debug, Clone, Default)]
pub struct PayloadJournal {
    inner: Arc<Mutex<Journal>>,
}

impl PayloadJournal {
    pub fn events(&self) -> Vec<PayloadEvent> {
        self.lock().events.clone()
    }

    /// Make the next camera or lens call fail with a device error.
    pub fn fail_next(&self) {
        self.lock().fail_next = true;
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Journal> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn record(&self, event: PayloadEvent) -> HardwareResult<()> {
        let mut journal = self.lock();
        if journal.fail_next {
            journal.fail_next = false;
            return Err(HardwareError::DeviceError {
                code: -1,
                message: "simulated fault".to_string(),
            });
        }
        journal.events.push(event);
        Ok(())
    }
}

/// Simulated camera and lens.
///
/// Tracks focus and aperture, clamps moves to the lens range, and publishes
/// the applied exposure and focus through [`AppliedSettings`].
#[derive(Debug)]
pub struct SimulatedPayload {
    applied: AppliedSettings,
    journal: PayloadJournal,
    focus_position: i32,
    aperture_index: usize,
}

impl SimulatedPayload {
    pub fn new(applied: AppliedSettings) -> Self {
        let focus_position = applied.focus_position().clamp(SIM_MIN_FOCUS, SIM_MAX_FOCUS);
        applied.set_focus_position(focus_position);
        Self {
            applied,
            journal: PayloadJournal::default(),
            focus_position,
            aperture_index: 0,
        }
    }

    pub fn journal(&self) -> PayloadJournal {
        self.journal.clone()
    }

    fn state(&self) -> LensState {
        LensState {
            focus_position: self.focus_position,
            min_focus_position: SIM_MIN_FOCUS,
            max_focus_position: SIM_MAX_FOCUS,
            f_number_x10: SIM_F_STOPS_X10[self.aperture_index],
        }
    }
}

impl HardwareAdapter for SimulatedPayload {
    fn apply_camera_settings(&mut self, settings: &CameraSettings) -> HardwareResult<()> {
        if !settings.exposure_ms.is_finite() || settings.exposure_ms < 0.0 {
            return Err(HardwareError::OutOfRange(format!(
                "exposure {} ms",
                settings.exposure_ms
            )));
        }
        self.journal.record(PayloadEvent::Camera(*settings))?;
        self.applied.set_exposure_ms(settings.exposure_ms);
        debug!("Simulated exposure set to {:.3} ms", settings.exposure_ms);
        Ok(())
    }

    fn apply_lens_settings(&mut self, settings: &LensSettings) -> HardwareResult<LensState> {
        self.journal.record(PayloadEvent::Lens(*settings))?;

        match settings.focus {
            Some(FocusMove::Infinity) => self.focus_position = SIM_MAX_FOCUS,
            Some(FocusMove::Absolute(position)) => {
                self.focus_position = position.clamp(SIM_MIN_FOCUS, SIM_MAX_FOCUS)
            }
            None => {}
        }

        match settings.aperture {
            Some(ApertureMove::Open) => self.aperture_index = 0,
            Some(ApertureMove::Steps(steps)) => {
                // One f-stop per ten motor steps; positive steps close down.
                let last = SIM_F_STOPS_X10.len() as i32 - 1;
                let index = (self.aperture_index as i32 + steps / 10).clamp(0, last);
                self.aperture_index = index as usize;
            }
            None => {}
        }

        self.applied.set_focus_position(self.focus_position);
        let state = self.state();
        debug!("Simulated lens now {:?}", state);
        Ok(state)
    }

    fn lens_state(&mut self) -> HardwareResult<LensState> {
        Ok(self.state())
    }

    fn release(&mut self) -> HardwareResult<()> {
        self.journal.record(PayloadEvent::Released)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapter::apply_request;
    use crate::request::HardwareRequest;

    fn payload() -> (SimulatedPayload, AppliedSettings) {
        let applied = AppliedSettings::new(800.0, 1000);
        (SimulatedPayload::new(applied.clone()), applied)
    }

    #[test]
    fn test_exposure_published() {
        let (mut sim, applied) = payload();
        sim.apply_camera_settings(&CameraSettings { exposure_ms: 11.6 })
            .unwrap();
        assert_eq!(applied.exposure_ms(), 11.6);
        assert_eq!(
            sim.journal().events(),
            vec![PayloadEvent::Camera(CameraSettings { exposure_ms: 11.6 })]
        );
    }

    #[test]
    fn test_focus_infinity_and_clamp() {
        let (mut sim, applied) = payload();
        let state = sim
            .apply_lens_settings(&LensSettings {
                focus: Some(FocusMove::Infinity),
                aperture: None,
            })
            .unwrap();
        assert_eq!(state.focus_position, SIM_MAX_FOCUS);
        assert_eq!(applied.focus_position(), SIM_MAX_FOCUS);

        let state = sim
            .apply_lens_settings(&LensSettings {
                focus: Some(FocusMove::Absolute(-50)),
                aperture: None,
            })
            .unwrap();
        assert_eq!(state.focus_position, SIM_MIN_FOCUS);
    }

    #[test]
    fn test_aperture_steps_and_open() {
        let (mut sim, _) = payload();
        let state = sim
            .apply_lens_settings(&LensSettings {
                focus: None,
                aperture: Some(ApertureMove::Steps(20)),
            })
            .unwrap();
        assert_eq!(state.f_number_x10, 28);

        let state = sim
            .apply_lens_settings(&LensSettings {
                focus: None,
                aperture: Some(ApertureMove::Open),
            })
            .unwrap();
        assert_eq!(state.f_number_x10, 14);
    }

    #[test]
    fn test_injected_fault_is_one_shot() {
        let (mut sim, applied) = payload();
        let journal = sim.journal();
        journal.fail_next();

        let request = HardwareRequest {
            camera: Some(CameraSettings { exposure_ms: 50.0 }),
            lens: LensSettings::default(),
        };
        assert!(apply_request(&mut sim, &request).is_err());
        assert_eq!(applied.exposure_ms(), 800.0);

        assert_eq!(apply_request(&mut sim, &request).unwrap(), None);
        assert_eq!(applied.exposure_ms(), 50.0);
    }

    #[test]
    fn test_empty_lens_request_skips_lens() {
        let (mut sim, _) = payload();
        let request = HardwareRequest::default();
        assert_eq!(apply_request(&mut sim, &request).unwrap(), None);
        assert!(sim.journal().events().is_empty());
    }
}
