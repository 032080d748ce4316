//! Operator command message

use bytemuck::{Pod, Zeroable};

use crate::error::{ProtoError, ProtoResult};
use crate::telemetry::Telemetry;

/// Number of blob detection values carried by a command.
pub const BLOB_PARAM_COUNT: usize = 9;

/// Blob detection value meaning "leave unchanged" (any negative value works).
pub const BLOB_SKIP: f32 = -1.0;

/// Focus position meaning "do not move focus".
pub const FOCUS_NO_OP: f32 = -1.0;

/// Positions inside [`Command::blob_params`]
pub mod blob_index {
    pub const SPIKE_LIMIT: usize = 0;
    pub const DYNAMIC_HOT_PIXELS: usize = 1;
    pub const R_SMOOTH: usize = 2;
    pub const HIGH_PASS_FILTER: usize = 3;
    pub const R_HIGH_PASS_FILTER: usize = 4;
    pub const CENTROID_SEARCH_BORDER: usize = 5;
    pub const FILTER_RETURN_IMAGE: usize = 6;
    pub const N_SIGMA: usize = 7;
    pub const UNIQUE_STAR_SPACING: usize = 8;
}

/// Command from an operator client
///
/// Carries candidate values for astrometry, camera and blob detection in one
/// message. Which values actually take effect is decided by the server (see
/// the sentinel constants in this module).
///
/// Total message size: 116 bytes
#[derive(Debug, Clone, Copy, PartialEq)]
#[repr(C, packed)]
pub struct Command {
    /// Odds ratio threshold for accepting a plate solution
    pub odds_threshold: f64,

    /// Observer latitude (degrees)
    pub latitude: f64,

    /// Observer longitude (degrees)
    pub longitude: f64,

    /// Observer height above ellipsoid (meters)
    pub height: f64,

    /// Requested exposure (milliseconds)
    pub exposure: f64,

    /// Requested focus position (counts), [`FOCUS_NO_OP`] to leave focus alone
    pub focus_position: f32,

    /// 1 = run an auto-focus sweep, 0 = normal focusing
    pub focus_mode: i32,

    /// Auto-focus sweep start position
    pub start_focus_position: i32,

    /// Auto-focus sweep end position
    pub end_focus_position: i32,

    /// Auto-focus sweep step
    pub focus_step: i32,

    /// 1 = drive focus to infinity (overrides focus_position)
    pub set_focus_infinity: i32,

    /// Relative aperture steps (+ closes, - opens)
    pub aperture_steps: i32,

    /// 1 = open the aperture fully (overrides aperture_steps)
    pub set_max_aperture: i32,

    /// Nonzero = remake the static hot pixel mask
    pub make_hot_pixel_mask: i32,

    /// 1 = apply the static hot pixel mask
    pub use_hot_pixel_mask: i32,

    /// Blob detection values, see [`blob_index`]; negative skips numeric fields
    pub blob_params: [f32; BLOB_PARAM_COUNT],
}

// SAFETY: Command is repr(C, packed) and all fields are Pod
unsafe impl Pod for Command {}
// SAFETY: Command is repr(C, packed) and all fields are Zeroable
unsafe impl Zeroable for Command {}

const _: () = assert!(std::mem::size_of::<Command>() == Command::SIZE);

impl Command {
    /// Expected message size in bytes
    pub const SIZE: usize = 116;

    /// Decode a command from exactly [`Command::SIZE`] bytes.
    ///
    /// Rejects buffers of the wrong length and commands carrying NaN or
    /// infinite values, which only show up on a garbled stream.
    pub fn from_bytes(bytes: &[u8]) -> ProtoResult<Self> {
        if bytes.len() != Self::SIZE {
            return Err(ProtoError::Length {
                message: "command",
                expected: Self::SIZE,
                actual: bytes.len(),
            });
        }
        let command: Command = bytemuck::pod_read_unaligned(bytes);
        command.check_finite()?;
        Ok(command)
    }

    /// Raw wire bytes
    pub fn as_bytes(&self) -> &[u8] {
        bytemuck::bytes_of(self)
    }

    /// Build a command that keeps the server in its current state.
    ///
    /// Operator fields echo the telemetry, focus and blob values use their
    /// skip sentinels, and all one-shot actions are off. Clients start from
    /// this and change only what the operator touched.
    pub fn hold(telemetry: &Telemetry) -> Self {
        let astrometry = telemetry.astrometry;
        let camera = telemetry.camera;
        let blob = telemetry.blob;

        Self {
            odds_threshold: astrometry.odds_threshold,
            latitude: astrometry.latitude,
            longitude: astrometry.longitude,
            height: astrometry.height,
            exposure: camera.exposure_time,
            focus_position: FOCUS_NO_OP,
            focus_mode: 0,
            start_focus_position: camera.start_focus_position,
            end_focus_position: camera.end_focus_position,
            focus_step: camera.focus_step,
            set_focus_infinity: 0,
            aperture_steps: 0,
            set_max_aperture: 0,
            make_hot_pixel_mask: 0,
            use_hot_pixel_mask: blob.use_static_hp_mask,
            blob_params: [BLOB_SKIP; BLOB_PARAM_COUNT],
        }
    }

    fn check_finite(&self) -> ProtoResult<()> {
        let doubles = [
            ("odds_threshold", self.odds_threshold),
            ("latitude", self.latitude),
            ("longitude", self.longitude),
            ("height", self.height),
            ("exposure", self.exposure),
        ];
        for (field, value) in doubles {
            if !value.is_finite() {
                return Err(ProtoError::NonFinite {
                    message: "command",
                    field,
                });
            }
        }

        let focus_position = self.focus_position;
        if !focus_position.is_finite() {
            return Err(ProtoError::NonFinite {
                message: "command",
                field: "focus_position",
            });
        }

        let blob_params = self.blob_params;
        if blob_params.iter().any(|v| !v.is_finite()) {
            return Err(ProtoError::NonFinite {
                message: "command",
                field: "blob_params",
            });
        }
        Ok(())
    }
}
