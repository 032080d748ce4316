//! Configuration groups held by the server and mirrored in telemetry.
//!
//! Each group is a `repr(C)` plain-old-data block without padding so it can be
//! copied straight into a [`Telemetry`](crate::Telemetry) message.

mod astrometry;
mod blob;
mod camera;

pub use astrometry::{
    AstrometryParams, DEFAULT_ODDS_THRESHOLD, SITE_HEIGHT_M, SITE_LATITUDE_DEG,
    SITE_LONGITUDE_DEG,
};
pub use blob::BlobParams;
pub use camera::{CameraParams, DEFAULT_EXPOSURE_MS};
