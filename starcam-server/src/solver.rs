//! Plate solver boundary and the solvers the server ships with

use std::sync::Arc;

use thiserror::Error;
use tracing::debug;

use crate::extract::Star;
use crate::frame::SkyTruth;

/// Why a frame did not produce a solution. None of these are faults; the
/// solve loop logs them and moves on.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum SolveError {
    #[error("Too few stars: {found}, need {needed}")]
    TooFewStars { found: usize, needed: usize },

    #[error("No match found")]
    NoMatch,

    #[error("Best match log10 odds {log_odds:.2} below threshold {needed:.2}")]
    BelowThreshold { log_odds: f64, needed: f64 },

    #[error("No solver available")]
    Unavailable,
}

pub type SolveResult<T> = Result<T, SolveError>;

/// Where on the sky to look.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum SearchRegion {
    /// Blind solve over the whole sky
    Unconstrained,
    /// Only accept solutions within `radius_deg` of a previous pointing
    Around { ra: f64, dec: f64, radius_deg: f64 },
}

impl SearchRegion {
    pub fn contains(&self, ra: f64, dec: f64) -> bool {
        match *self {
            SearchRegion::Unconstrained => true,
            SearchRegion::Around {
                ra: center_ra,
                dec: center_dec,
                radius_deg,
            } => angular_separation_deg(center_ra, center_dec, ra, dec) <= radius_deg,
        }
    }
}

#[derive(Debug, Clone)]
pub struct SolveRequest<'a> {
    /// Brightest first
    pub stars: &'a [Star],
    pub width: usize,
    pub height: usize,
    /// Odds ratio a match must reach to be accepted
    pub odds_threshold: f64,
    pub region: SearchRegion,
    /// Plausible pixel scale range in arcsec/px
    pub pixel_scale_bounds: (f64, f64),
    pub min_stars: usize,
}

/// An accepted plate solution.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PlateSolution {
    /// Right ascension of the image center, degrees
    pub ra: f64,
    /// Declination of the image center, degrees
    pub dec: f64,
    /// Field rotation east of north, degrees
    pub field_rotation: f64,
    /// Arcseconds per pixel
    pub pixel_scale: f64,
    /// log10 of the match odds ratio
    pub log_odds: f64,
}

pub trait PlateSolver: Send {
    fn solve(&mut self, request: &SolveRequest<'_>) -> SolveResult<PlateSolution>;
}

/// Great-circle distance between two equatorial positions, all in degrees.
pub fn angular_separation_deg(ra1: f64, dec1: f64, ra2: f64, dec2: f64) -> f64 {
    let (ra1, dec1, ra2, dec2) = (
        ra1.to_radians(),
        dec1.to_radians(),
        ra2.to_radians(),
        dec2.to_radians(),
    );
    let a = ((dec2 - dec1) / 2.0).sin().powi(2)
        + dec1.cos() * dec2.cos() * ((ra2 - ra1) / 2.0).sin().powi(2);
    (2.0 * a.sqrt().min(1.0).asin()).to_degrees()
}

/// Distance in pixels within which an extracted star matches a known one.
const MATCH_RADIUS_PX: f64 = 2.0;

/// Evidence each matched star adds, in log10 odds.
const LOG_ODDS_PER_MATCH: f64 = 1.5;

/// Solver for [`SimulatedSky`](crate::frame::SimulatedSky) frames.
///
/// Matches extracted stars against the star positions the sky rendered and
/// reports the known pointing when enough of them line up. It honors the
/// search region, pixel scale bounds and odds threshold the same way a real
/// solver would.
pub struct SimulatedSolver {
    truth: Arc<SkyTruth>,
}

impl SimulatedSolver {
    pub fn new(truth: Arc<SkyTruth>) -> Self {
        Self { truth }
    }
}

impl PlateSolver for SimulatedSolver {
    fn solve(&mut self, request: &SolveRequest<'_>) -> SolveResult<PlateSolution> {
        if request.stars.len() < request.min_stars {
            return Err(SolveError::TooFewStars {
                found: request.stars.len(),
                needed: request.min_stars,
            });
        }

        let truth = &self.truth;
        let (min_scale, max_scale) = request.pixel_scale_bounds;
        if truth.pixel_scale < min_scale || truth.pixel_scale > max_scale {
            return Err(SolveError::NoMatch);
        }
        if !request.region.contains(truth.ra, truth.dec) {
            return Err(SolveError::NoMatch);
        }

        let matches = request
            .stars
            .iter()
            .filter(|star| {
                truth
                    .stars
                    .iter()
                    .any(|&(x, y, _)| (x - star.x).hypot(y - star.y) <= MATCH_RADIUS_PX)
            })
            .count();
        if matches < request.min_stars {
            return Err(SolveError::NoMatch);
        }

        let log_odds = matches as f64 * LOG_ODDS_PER_MATCH;
        let needed = if request.odds_threshold > 0.0 {
            request.odds_threshold.log10()
        } else {
            f64::NEG_INFINITY
        };
        if log_odds < needed {
            return Err(SolveError::BelowThreshold { log_odds, needed });
        }

        debug!("Simulated solve matched {} of {} stars", matches, request.stars.len());
        Ok(PlateSolution {
            ra: truth.ra,
            dec: truth.dec,
            field_rotation: truth.field_rotation,
            pixel_scale: truth.pixel_scale,
            log_odds,
        })
    }
}

/// Solver that never finds a match. Used when replaying frames without a
/// star catalog.
#[derive(Debug, Default)]
pub struct NullSolver;

impl PlateSolver for NullSolver {
    fn solve(&mut self, _request: &SolveRequest<'_>) -> SolveResult<PlateSolution> {
        Err(SolveError::Unavailable)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn truth() -> Arc<SkyTruth> {
        Arc::new(SkyTruth {
            ra: 83.8,
            dec: -5.4,
            field_rotation: 30.0,
            pixel_scale: 6.2,
            stars: (0..10).map(|i| (10.0 * i as f64 + 5.0, 20.0, 100.0)).collect(),
        })
    }

    fn stars(count: usize) -> Vec<Star> {
        (0..count)
            .map(|i| Star {
                x: 10.0 * i as f64 + 5.5,
                y: 19.5,
                flux: 100.0,
            })
            .collect()
    }

    fn request(stars: &[Star]) -> SolveRequest<'_> {
        SolveRequest {
            stars,
            width: 120,
            height: 40,
            odds_threshold: 1e8,
            region: SearchRegion::Unconstrained,
            pixel_scale_bounds: (6.0, 6.5),
            min_stars: 4,
        }
    }

    #[test]
    fn test_angular_separation() {
        assert_relative_eq!(angular_separation_deg(0.0, 0.0, 90.0, 0.0), 90.0, epsilon = 1e-9);
        assert_relative_eq!(angular_separation_deg(10.0, 89.0, 190.0, 89.0), 2.0, epsilon = 1e-9);
        assert_relative_eq!(angular_separation_deg(5.0, 5.0, 5.0, 5.0), 0.0, epsilon = 1e-9);
    }

    #[test]
    fn test_solves_known_sky() {
        let stars = stars(8);
        let solution = SimulatedSolver::new(truth()).solve(&request(&stars)).unwrap();
        assert_eq!(solution.ra, 83.8);
        assert_eq!(solution.dec, -5.4);
        assert_eq!(solution.pixel_scale, 6.2);
        assert_relative_eq!(solution.log_odds, 12.0);
    }

    #[test]
    fn test_too_few_stars() {
        let stars = stars(3);
        assert_eq!(
            SimulatedSolver::new(truth()).solve(&request(&stars)),
            Err(SolveError::TooFewStars { found: 3, needed: 4 })
        );
    }

    #[test]
    fn test_threshold_rejects_weak_match() {
        let stars = stars(5);
        let mut req = request(&stars);
        req.odds_threshold = 1e9;
        assert!(matches!(
            SimulatedSolver::new(truth()).solve(&req),
            Err(SolveError::BelowThreshold { .. })
        ));
    }

    #[test]
    fn test_search_region_and_scale_bounds() {
        let stars = stars(8);
        let mut solver = SimulatedSolver::new(truth());

        let mut req = request(&stars);
        req.region = SearchRegion::Around {
            ra: 83.0,
            dec: -5.0,
            radius_deg: 1.0,
        };
        assert!(solver.solve(&req).is_ok());

        req.region = SearchRegion::Around {
            ra: 200.0,
            dec: 40.0,
            radius_deg: 1.0,
        };
        assert_eq!(solver.solve(&req), Err(SolveError::NoMatch));

        let mut req = request(&stars);
        req.pixel_scale_bounds = (1.0, 2.0);
        assert_eq!(solver.solve(&req), Err(SolveError::NoMatch));
    }

    #[test]
    fn test_unmatched_stars_do_not_solve() {
        let stars: Vec<Star> = (0..8)
            .map(|i| Star {
                x: 3.0 * i as f64,
                y: 35.0,
                flux: 1.0,
            })
            .collect();
        assert_eq!(
            SimulatedSolver::new(truth()).solve(&request(&stars)),
            Err(SolveError::NoMatch)
        );
    }

    #[test]
    fn test_null_solver() {
        let stars = stars(8);
        assert_eq!(NullSolver.solve(&request(&stars)), Err(SolveError::Unavailable));
    }
}
