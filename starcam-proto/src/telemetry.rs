//! Telemetry message sent to clients every cycle

use bytemuck::{Pod, Zeroable};

use crate::error::{ProtoError, ProtoResult};
use crate::params::{AstrometryParams, BlobParams, CameraParams};

/// Snapshot of every configuration group
///
/// Sent once per session cycle and immediately followed on the wire by the
/// current raw frame. Groups are copied independently, so one message can mix
/// groups taken a few microseconds apart; each group on its own is consistent.
///
/// Total message size: 196 bytes
#[derive(Debug, Clone, Copy, PartialEq)]
#[repr(C, packed)]
pub struct Telemetry {
    /// Observer site and latest plate solution (96 bytes)
    pub astrometry: AstrometryParams,

    /// Exposure, focus and aperture (56 bytes)
    pub camera: CameraParams,

    /// Blob detection tuning (44 bytes)
    pub blob: BlobParams,
}

// SAFETY: Telemetry is repr(C, packed) and all fields are Pod
unsafe impl Pod for Telemetry {}
// SAFETY: Telemetry is repr(C, packed) and all fields are Zeroable
unsafe impl Zeroable for Telemetry {}

const _: () = assert!(std::mem::size_of::<Telemetry>() == Telemetry::SIZE);

impl Telemetry {
    /// Expected message size in bytes
    pub const SIZE: usize =
        AstrometryParams::SIZE + CameraParams::SIZE + BlobParams::SIZE;

    pub fn new(astrometry: AstrometryParams, camera: CameraParams, blob: BlobParams) -> Self {
        Self {
            astrometry,
            camera,
            blob,
        }
    }

    /// Raw wire bytes
    pub fn as_bytes(&self) -> &[u8] {
        bytemuck::bytes_of(self)
    }

    /// Decode telemetry from exactly [`Telemetry::SIZE`] bytes.
    pub fn from_bytes(bytes: &[u8]) -> ProtoResult<Self> {
        if bytes.len() != Self::SIZE {
            return Err(ProtoError::Length {
                message: "telemetry",
                expected: Self::SIZE,
                actual: bytes.len(),
            });
        }
        Ok(bytemuck::pod_read_unaligned(bytes))
    }
}

impl Default for Telemetry {
    fn default() -> Self {
        Self::new(
            AstrometryParams::default(),
            CameraParams::default(),
            BlobParams::default(),
        )
    }
}
