//! One-shot hardware requests and their acknowledgements

/// Camera sensor settings to push to the driver.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CameraSettings {
    /// Exposure time in milliseconds
    pub exposure_ms: f64,
}

/// Requested focus motion.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FocusMove {
    /// Drive focus to the infinity stop
    Infinity,
    /// Move to an absolute encoder position
    Absolute(i32),
}

/// Requested aperture motion.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApertureMove {
    /// Open the aperture fully
    Open,
    /// Move the aperture motor by a relative number of steps
    Steps(i32),
}

/// Lens settings to push to the lens adapter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct LensSettings {
    pub focus: Option<FocusMove>,
    pub aperture: Option<ApertureMove>,
}

impl LensSettings {
    pub fn is_empty(&self) -> bool {
        self.focus.is_none() && self.aperture.is_none()
    }
}

/// Everything a single command asked the hardware to change.
///
/// Built once per applied command and consumed by
/// [`apply_request`](crate::apply_request). Nothing here persists, so a change
/// is never re-applied on a later cycle.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct HardwareRequest {
    /// New camera settings, present only when the exposure changed
    pub camera: Option<CameraSettings>,
    /// Lens motions requested by the command
    pub lens: LensSettings,
}

impl HardwareRequest {
    pub fn is_empty(&self) -> bool {
        self.camera.is_none() && self.lens.is_empty()
    }

    pub fn exposure_changed(&self) -> bool {
        self.camera.is_some()
    }
}

/// Lens state reported by the adapter after a move.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct LensState {
    /// Current focus encoder position
    pub focus_position: i32,
    /// Lowest reachable focus position
    pub min_focus_position: i32,
    /// Highest reachable focus position (infinity stop)
    pub max_focus_position: i32,
    /// Current f-number times ten
    pub f_number_x10: i32,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_request_is_empty() {
        let request = HardwareRequest::default();
        assert!(request.is_empty());
        assert!(!request.exposure_changed());
    }

    #[test]
    fn test_request_with_lens_move_is_not_empty() {
        let request = HardwareRequest {
            camera: None,
            lens: LensSettings {
                focus: Some(FocusMove::Infinity),
                aperture: None,
            },
        };
        assert!(!request.is_empty());
        assert!(!request.exposure_changed());
    }
}
