//! Equatorial to horizontal coordinates for solved pointings

/// Observing site. Latitude and longitude in degrees (east positive),
/// height in meters.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ObserverLocation {
    pub latitude_deg: f64,
    pub longitude_deg: f64,
    pub height_m: f64,
}

/// Where a solved pointing sits in the observer's sky. All angles in degrees.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct HorizonSolution {
    /// Refracted altitude above the horizon
    pub altitude: f64,
    /// Azimuth, north through east, in [0, 360)
    pub azimuth: f64,
    /// Right ascension as observed through the atmosphere
    pub observed_ra: f64,
    /// Declination as observed through the atmosphere
    pub observed_dec: f64,
    /// Angle between the direction to the pole and the zenith
    pub parallactic_angle: f64,
}

impl HorizonSolution {
    /// Image rotation on the sky for a solution with this field rotation.
    pub fn image_rotation(&self, field_rotation: f64) -> f64 {
        self.parallactic_angle + field_rotation
    }
}

pub trait SkyTransform: Send {
    /// Transform an ICRS-ish RA/Dec (degrees) observed at `unix_time`
    /// (UTC seconds) from `site`.
    fn to_horizon(
        &self,
        ra: f64,
        dec: f64,
        unix_time: f64,
        site: &ObserverLocation,
    ) -> HorizonSolution;
}

const UNIX_EPOCH_JD: f64 = 2_440_587.5;
const J2000_JD: f64 = 2_451_545.0;
const SECONDS_PER_DAY: f64 = 86_400.0;

/// Atmospheric scale height used to thin refraction with site height.
const SCALE_HEIGHT_M: f64 = 8_434.0;

/// Julian date on the UT1 scale.
pub fn julian_date_ut1(unix_time: f64, dut1: f64) -> f64 {
    (unix_time + dut1) / SECONDS_PER_DAY + UNIX_EPOCH_JD
}

/// Greenwich mean sidereal time in degrees, [0, 360).
pub fn gmst_deg(jd_ut1: f64) -> f64 {
    let d = jd_ut1 - J2000_JD;
    let t = d / 36_525.0;
    let gmst = 280.460_618_37 + 360.985_647_366_29 * d + 0.000_387_933 * t * t
        - t * t * t / 38_710_000.0;
    gmst.rem_euclid(360.0)
}

/// Refraction in degrees for a true (airless) altitude in degrees, at sea
/// level. Sæmundsson's inversion of Bennett's formula.
pub fn refraction_deg(true_altitude: f64) -> f64 {
    if true_altitude < -1.0 {
        return 0.0;
    }
    let arcmin = 1.02 / (true_altitude + 10.3 / (true_altitude + 5.11)).to_radians().tan();
    arcmin.max(0.0) / 60.0
}

/// Geometric transform: mean sidereal time, spherical trigonometry and a
/// closed-form refraction model. No precession, nutation or aberration;
/// adequate for the arcminute-level attitude telemetry this feeds.
#[derive(Debug, Clone, Copy, Default)]
pub struct GeometricSkyTransform {
    /// UT1 - UTC in seconds
    pub dut1: f64,
}

impl GeometricSkyTransform {
    pub fn new(dut1: f64) -> Self {
        Self { dut1 }
    }
}

impl SkyTransform for GeometricSkyTransform {
    fn to_horizon(
        &self,
        ra: f64,
        dec: f64,
        unix_time: f64,
        site: &ObserverLocation,
    ) -> HorizonSolution {
        let lat = site.latitude_deg.to_radians();
        let lst = gmst_deg(julian_date_ut1(unix_time, self.dut1)) + site.longitude_deg;
        let ha = (lst - ra).to_radians();
        let dec_r = dec.to_radians();

        let sin_alt = dec_r.sin() * lat.sin() + dec_r.cos() * lat.cos() * ha.cos();
        let true_alt = sin_alt.clamp(-1.0, 1.0).asin();
        let az = (-dec_r.cos() * ha.sin())
            .atan2(dec_r.sin() * lat.cos() - dec_r.cos() * lat.sin() * ha.cos());

        let pressure_scale = (-site.height_m.max(0.0) / SCALE_HEIGHT_M).exp();
        let altitude = true_alt.to_degrees() + refraction_deg(true_alt.to_degrees()) * pressure_scale;
        let alt = altitude.to_radians();

        // Back to equatorial with the refracted altitude.
        let sin_dec_obs = alt.sin() * lat.sin() + alt.cos() * lat.cos() * az.cos();
        let dec_obs = sin_dec_obs.clamp(-1.0, 1.0).asin();
        let ha_obs = (-az.sin() * alt.cos())
            .atan2(alt.sin() * lat.cos() - alt.cos() * lat.sin() * az.cos());

        let parallactic = (lat.cos() * ha_obs.sin())
            .atan2(lat.sin() * dec_obs.cos() - lat.cos() * dec_obs.sin() * ha_obs.cos());

        HorizonSolution {
            altitude,
            azimuth: az.to_degrees().rem_euclid(360.0),
            observed_ra: (lst - ha_obs.to_degrees()).rem_euclid(360.0),
            observed_dec: dec_obs.to_degrees(),
            parallactic_angle: parallactic.to_degrees(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    /// 2000-01-01T12:00:00Z
    const J2000_UNIX: f64 = 946_728_000.0;

    fn site(latitude_deg: f64) -> ObserverLocation {
        ObserverLocation {
            latitude_deg,
            longitude_deg: 0.0,
            height_m: 0.0,
        }
    }

    #[test]
    fn test_gmst_at_j2000() {
        let jd = julian_date_ut1(J2000_UNIX, 0.0);
        assert_relative_eq!(jd, J2000_JD, epsilon = 1e-9);
        assert_relative_eq!(gmst_deg(jd), 280.460_618_37, epsilon = 1e-6);
    }

    #[test]
    fn test_gmst_advances_one_sidereal_day() {
        let jd = julian_date_ut1(J2000_UNIX, 0.0);
        let sidereal_day = 0.997_269_566_3;
        assert_relative_eq!(
            gmst_deg(jd + sidereal_day),
            gmst_deg(jd),
            epsilon = 1e-3
        );
    }

    #[test]
    fn test_refraction_magnitudes() {
        assert_relative_eq!(refraction_deg(90.0) * 60.0, 0.0, epsilon = 0.01);
        assert_relative_eq!(refraction_deg(45.0) * 60.0, 1.0, epsilon = 0.05);
        assert!(refraction_deg(0.0) * 60.0 > 25.0);
        assert_eq!(refraction_deg(-5.0), 0.0);
    }

    #[test]
    fn test_pole_sits_at_latitude() {
        let transform = GeometricSkyTransform::default();
        let horizon = transform.to_horizon(0.0, 90.0, J2000_UNIX, &site(40.0));
        let refraction = refraction_deg(40.0);
        assert_relative_eq!(horizon.altitude, 40.0 + refraction, epsilon = 1e-6);
        let azimuth = horizon.azimuth;
        assert!(azimuth < 1e-6 || azimuth > 360.0 - 1e-6);
    }

    #[test]
    fn test_meridian_transit() {
        let transform = GeometricSkyTransform::default();
        let lst = gmst_deg(julian_date_ut1(J2000_UNIX, 0.0));
        let horizon = transform.to_horizon(lst, 10.0, J2000_UNIX, &site(40.0));

        assert_relative_eq!(horizon.azimuth, 180.0, epsilon = 1e-6);
        assert_relative_eq!(horizon.altitude, 60.0 + refraction_deg(60.0), epsilon = 1e-6);
        assert_relative_eq!(horizon.parallactic_angle, 0.0, epsilon = 1e-6);
        // Refraction lifts the object toward the pole on the meridian.
        assert!(horizon.observed_dec > 10.0);
        assert_relative_eq!(horizon.image_rotation(25.0), 25.0, epsilon = 1e-6);
    }

    #[test]
    fn test_dut1_shifts_sidereal_time() {
        let site = site(40.0);
        let a = GeometricSkyTransform::new(0.0).to_horizon(100.0, 20.0, J2000_UNIX, &site);
        let b = GeometricSkyTransform::new(0.0).to_horizon(100.0, 20.0, J2000_UNIX + 0.5, &site);
        let c = GeometricSkyTransform::new(0.5).to_horizon(100.0, 20.0, J2000_UNIX, &site);
        assert_relative_eq!(b.azimuth, c.azimuth, epsilon = 1e-9);
        assert!((a.azimuth - c.azimuth).abs() > 1e-6);
    }

    #[test]
    fn test_height_thins_refraction() {
        let sea = GeometricSkyTransform::default().to_horizon(0.0, 90.0, J2000_UNIX, &site(30.0));
        let high = GeometricSkyTransform::default().to_horizon(
            0.0,
            90.0,
            J2000_UNIX,
            &ObserverLocation {
                height_m: 4000.0,
                ..site(30.0)
            },
        );
        assert!(high.altitude < sea.altitude);
        assert!(high.altitude > 30.0);
    }
}
