//! Astrometry block: observer site plus the latest plate solution

use bytemuck::{Pod, Zeroable};

/// Default observer latitude in degrees.
pub const SITE_LATITUDE_DEG: f64 = 40.79166879;

/// Default observer longitude in degrees (east positive).
pub const SITE_LONGITUDE_DEG: f64 = -73.68133399;

/// Default observer height above the WGS84 ellipsoid in meters.
pub const SITE_HEIGHT_M: f64 = 59.24;

/// Default odds ratio a solution must beat to be accepted.
pub const DEFAULT_ODDS_THRESHOLD: f64 = 1e8;

/// Observer configuration and most recent solved pointing.
///
/// Total block size: 96 bytes (12 x f64)
#[derive(Debug, Clone, Copy, PartialEq, Pod, Zeroable)]
#[repr(C)]
pub struct AstrometryParams {
    /// Unix time (seconds) of the exposure behind the last solution
    pub raw_time: f64,

    /// Odds ratio threshold for accepting a match
    pub odds_threshold: f64,

    /// Observer latitude (degrees)
    pub latitude: f64,

    /// Observer longitude (degrees, east positive)
    pub longitude: f64,

    /// Observer height above ellipsoid (meters)
    pub height: f64,

    /// Observed right ascension (degrees)
    pub ra: f64,

    /// Observed declination (degrees)
    pub dec: f64,

    /// Field rotation reported by the solver (degrees)
    pub field_rotation: f64,

    /// Pixel scale (arcsec/px)
    pub pixel_scale: f64,

    /// Image rotation: field rotation plus parallactic angle (degrees)
    pub image_rotation: f64,

    /// Altitude above horizon (degrees)
    pub altitude: f64,

    /// Azimuth, north through east (degrees)
    pub azimuth: f64,
}

impl AstrometryParams {
    /// Block size in bytes
    pub const SIZE: usize = 96;

    /// Create parameters for an observer site with no solution yet.
    pub fn at_site(latitude: f64, longitude: f64, height: f64, odds_threshold: f64) -> Self {
        Self {
            odds_threshold,
            latitude,
            longitude,
            height,
            ..Zeroable::zeroed()
        }
    }
}

impl Default for AstrometryParams {
    fn default() -> Self {
        Self::at_site(
            SITE_LATITUDE_DEG,
            SITE_LONGITUDE_DEG,
            SITE_HEIGHT_M,
            DEFAULT_ODDS_THRESHOLD,
        )
    }
}
