//! Camera and lens block

use bytemuck::{Pod, Zeroable};

/// Exposure applied at startup (milliseconds).
pub const DEFAULT_EXPOSURE_MS: f64 = 800.0;

/// Camera exposure, focus and aperture configuration.
///
/// Fields marked "reported" are written back from the lens adapter after a
/// hardware adjustment; everything else mirrors the last operator command.
///
/// Total block size: 56 bytes
#[derive(Debug, Clone, Copy, PartialEq, Pod, Zeroable)]
#[repr(C)]
pub struct CameraParams {
    /// Exposure time (milliseconds)
    pub exposure_time: f64,

    /// Focus position (encoder counts, reported)
    pub focus_position: i32,

    /// Lowest focus position the lens can reach (reported)
    pub min_focus_position: i32,

    /// Highest focus position the lens can reach (reported)
    pub max_focus_position: i32,

    /// 1 while an auto-focus sweep is requested or running
    pub focus_mode: i32,

    /// First focus position of the auto-focus sweep
    pub start_focus_position: i32,

    /// Last focus position of the auto-focus sweep
    pub end_focus_position: i32,

    /// Focus increment between sweep samples
    pub focus_step: i32,

    /// 1 if the last command drove focus to infinity
    pub focus_infinity: i32,

    /// Relative aperture motor steps requested by the last command
    pub aperture_steps: i32,

    /// 1 if the last command opened the aperture fully
    pub max_aperture: i32,

    /// Current f-number times ten (reported, e.g. 14 for f/1.4)
    pub current_aperture: i32,

    /// 1 if the last hardware adjustment failed
    pub hardware_fault: i32,
}

impl CameraParams {
    /// Block size in bytes
    pub const SIZE: usize = 56;

    pub fn focus_mode_enabled(&self) -> bool {
        self.focus_mode != 0
    }
}

impl Default for CameraParams {
    fn default() -> Self {
        Self {
            exposure_time: DEFAULT_EXPOSURE_MS,
            ..Zeroable::zeroed()
        }
    }
}
