//! Background capture, extraction and plate-solving loop
//!
//! Runs on its own OS thread because every stage blocks: the sensor for the
//! exposure time, extraction and solving on the CPU. Each iteration either
//! runs a requested focus sweep or captures one frame, publishes it for the
//! sessions, and tries to solve it. Shutdown is checked once per iteration.

use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use hardware::{FocusMove, LensSettings};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::extract::StarExtractor;
use crate::frame::{FrameSource, LatestFrame};
use crate::sky::{ObserverLocation, SkyTransform};
use crate::solution_log::{SolutionLog, SolutionRow};
use crate::solver::{PlateSolver, SearchRegion, SolveRequest};
use crate::store::{ConfigStore, SolutionRecord};

/// Longest focus sweep the loop will run, in positions.
const MAX_SWEEP_POSITIONS: usize = 256;

#[derive(Debug, Clone)]
pub struct SolveLoopConfig {
    pub width: usize,
    pub height: usize,
    /// Plausible pixel scale range, arcsec/px
    pub min_pixel_scale: f64,
    pub max_pixel_scale: f64,
    /// Search radius in field half diagonals
    pub search_radius_factor: f64,
    /// Fewer stars than this skips the solver
    pub min_stars: usize,
    pub capture_retry: Duration,
}

impl SolveLoopConfig {
    /// Search radius around the previous pointing, in degrees.
    pub fn search_radius_deg(&self) -> f64 {
        let half_diagonal_px = (self.width as f64).hypot(self.height as f64) / 2.0;
        self.max_pixel_scale * half_diagonal_px / 3600.0 * self.search_radius_factor
    }
}

/// What one iteration did.
#[derive(Debug, Clone, PartialEq)]
pub enum StepOutcome {
    Solved(SolutionRecord),
    NoSolution,
    CaptureFailed,
    /// A focus sweep ran; `best` is where focus was left, if anywhere
    FocusSweep { best: Option<i32> },
}

pub struct SolveLoop {
    config: SolveLoopConfig,
    store: Arc<ConfigStore>,
    latest: LatestFrame,
    source: Box<dyn FrameSource>,
    extractor: Box<dyn StarExtractor>,
    solver: Box<dyn PlateSolver>,
    sky: Box<dyn SkyTransform>,
    log: Option<SolutionLog>,
    cancel: CancellationToken,
}

impl SolveLoop {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        config: SolveLoopConfig,
        store: Arc<ConfigStore>,
        latest: LatestFrame,
        source: Box<dyn FrameSource>,
        extractor: Box<dyn StarExtractor>,
        solver: Box<dyn PlateSolver>,
        sky: Box<dyn SkyTransform>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            config,
            store,
            latest,
            source,
            extractor,
            solver,
            sky,
            log: None,
            cancel,
        }
    }

    pub fn with_solution_log(mut self, log: SolutionLog) -> Self {
        self.log = Some(log);
        self
    }

    /// Start the loop on a dedicated thread.
    pub fn spawn(self) -> std::io::Result<JoinHandle<()>> {
        std::thread::Builder::new()
            .name("solve-loop".to_string())
            .spawn(move || self.run())
    }

    pub fn run(mut self) {
        info!(
            "Solve loop started, search radius {:.3} deg",
            self.config.search_radius_deg()
        );
        while !self.cancel.is_cancelled() {
            self.step();
        }
        info!("Solve loop stopped");
    }

    fn search_region(&self) -> SearchRegion {
        match self.store.pointing_estimate() {
            Some(pointing) => SearchRegion::Around {
                ra: pointing.ra,
                dec: pointing.dec,
                radius_deg: self.config.search_radius_deg(),
            },
            None => SearchRegion::Unconstrained,
        }
    }

    /// Run one iteration.
    pub fn step(&mut self) -> StepOutcome {
        if self.store.camera().focus_mode_enabled() {
            return StepOutcome::FocusSweep {
                best: self.focus_sweep(),
            };
        }

        let frame = match self.source.capture_frame() {
            Ok(frame) => frame,
            Err(e) => {
                warn!("Capture failed: {}", e);
                std::thread::sleep(self.config.capture_retry);
                return StepOutcome::CaptureFailed;
            }
        };

        let blob = self.store.blob_params();
        let extraction =
            self.extractor
                .extract(&frame.pixels, self.config.width, self.config.height, &blob);
        match extraction.filtered {
            Some(filtered) => self.latest.publish(filtered.into()),
            None => self.latest.publish(frame.pixels.clone()),
        };

        let star_count = extraction.stars.len();
        if star_count < self.config.min_stars {
            debug!(
                "{} stars, need {} to solve",
                star_count, self.config.min_stars
            );
            return StepOutcome::NoSolution;
        }

        let astrometry = self.store.astrometry();
        let request = SolveRequest {
            stars: &extraction.stars,
            width: self.config.width,
            height: self.config.height,
            odds_threshold: astrometry.odds_threshold,
            region: self.search_region(),
            pixel_scale_bounds: (self.config.min_pixel_scale, self.config.max_pixel_scale),
            min_stars: self.config.min_stars,
        };

        let started = Instant::now();
        let solution = match self.solver.solve(&request) {
            Ok(solution) => solution,
            Err(e) => {
                debug!("No solution from {} stars: {}", star_count, e);
                return StepOutcome::NoSolution;
            }
        };

        let site = ObserverLocation {
            latitude_deg: astrometry.latitude,
            longitude_deg: astrometry.longitude,
            height_m: astrometry.height,
        };
        let raw_time = frame.mid_exposure_unix();
        let horizon = self
            .sky
            .to_horizon(solution.ra, solution.dec, raw_time, &site);
        let solve_ms = started.elapsed().as_secs_f64() * 1000.0;

        let record = SolutionRecord {
            raw_time,
            ra: horizon.observed_ra,
            dec: horizon.observed_dec,
            field_rotation: solution.field_rotation,
            pixel_scale: solution.pixel_scale,
            image_rotation: horizon.image_rotation(solution.field_rotation),
            altitude: horizon.altitude,
            azimuth: horizon.azimuth,
        };
        self.store.record_solution(&record);

        info!(
            "Solved {} stars | RA {:.6} | DEC {:.6} | FR {:.3} | PS {:.4} | ALT {:.6} | AZ {:.6} | IR {:.3} | {:.1} ms",
            star_count,
            record.ra,
            record.dec,
            record.field_rotation,
            record.pixel_scale,
            record.altitude,
            record.azimuth,
            record.image_rotation,
            solve_ms
        );

        if let Some(log) = &mut self.log {
            let row = SolutionRow {
                star_count,
                ra: record.ra,
                dec: record.dec,
                field_rotation: record.field_rotation,
                pixel_scale: record.pixel_scale,
                altitude: record.altitude,
                azimuth: record.azimuth,
                image_rotation: record.image_rotation,
                solve_ms,
            };
            if let Err(e) = log.append(&row) {
                warn!("Failed to log solution: {}", e);
            }
        }

        StepOutcome::Solved(record)
    }

    /// Step focus across the requested range, score each position by its
    /// brightest star, and finish at the best one. Clears the focus mode
    /// whether or not the sweep succeeded.
    fn focus_sweep(&mut self) -> Option<i32> {
        let camera = self.store.camera();
        let positions = sweep_positions(
            camera.start_focus_position,
            camera.end_focus_position,
            camera.focus_step,
        );
        info!(
            "Focus sweep {} -> {} step {} ({} positions)",
            camera.start_focus_position,
            camera.end_focus_position,
            camera.focus_step,
            positions.len()
        );

        let mut best: Option<(i32, f64)> = None;
        for position in positions {
            if self.cancel.is_cancelled() {
                break;
            }
            let moved = LensSettings {
                focus: Some(FocusMove::Absolute(position)),
                aperture: None,
            };
            let reached = match self.store.move_lens(&moved) {
                Ok(state) => state.focus_position,
                Err(e) => {
                    warn!("Focus sweep aborted at {}: {}", position, e);
                    break;
                }
            };

            let frame = match self.source.capture_frame() {
                Ok(frame) => frame,
                Err(e) => {
                    warn!("Focus sweep capture failed at {}: {}", position, e);
                    continue;
                }
            };
            self.latest.publish(frame.pixels.clone());

            let blob = self.store.blob_params();
            let extraction =
                self.extractor
                    .extract(&frame.pixels, self.config.width, self.config.height, &blob);
            let score = extraction.stars.first().map_or(0.0, |star| star.flux);
            debug!("Focus {} scored {:.1}", reached, score);

            if best.map_or(true, |(_, best_score)| score > best_score) {
                best = Some((reached, score));
            }
        }

        let best = best.filter(|&(_, score)| score > 0.0).map(|(position, _)| position);
        if let Some(position) = best {
            let settle = LensSettings {
                focus: Some(FocusMove::Absolute(position)),
                aperture: None,
            };
            match self.store.move_lens(&settle) {
                Ok(_) => info!("Focus sweep finished at {}", position),
                Err(e) => warn!("Failed to settle focus at {}: {}", position, e),
            }
        } else {
            warn!("Focus sweep found no stars");
        }

        self.store.finish_focus_sweep();
        best
    }
}

/// Positions from `start` toward `end` in steps of `|step|`, inclusive of
/// both ends. Empty for a zero step.
pub fn sweep_positions(start: i32, end: i32, step: i32) -> Vec<i32> {
    if step == 0 {
        return Vec::new();
    }
    let step = step.unsigned_abs() as i64;
    let (start, end) = (start as i64, end as i64);
    let direction = if end >= start { 1 } else { -1 };

    let mut positions = Vec::new();
    let mut position = start;
    while (end - position) * direction >= 0 && positions.len() < MAX_SWEEP_POSITIONS {
        positions.push(position as i32);
        position += direction * step;
    }
    if positions.last() != Some(&(end as i32)) && positions.len() < MAX_SWEEP_POSITIONS {
        positions.push(end as i32);
    }
    positions
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::extract::ThresholdExtractor;
    use crate::frame::{Frame, FrameError, FrameResult, SimulatedSky, SIM_BEST_FOCUS};
    use crate::sky::GeometricSkyTransform;
    use crate::solver::{NullSolver, SimulatedSolver};
    use approx::assert_relative_eq;
    use hardware::simulated::SimulatedPayload;
    use hardware::AppliedSettings;
    use starcam_proto::Command;
    use std::path::PathBuf;

    const W: usize = 320;
    const H: usize = 240;

    fn config() -> SolveLoopConfig {
        SolveLoopConfig {
            width: W,
            height: H,
            min_pixel_scale: 6.0,
            max_pixel_scale: 6.5,
            search_radius_factor: 1.0,
            min_stars: 4,
            capture_retry: Duration::ZERO,
        }
    }

    struct Fixture {
        store: Arc<ConfigStore>,
        latest: LatestFrame,
        solve_loop: SolveLoop,
    }

    fn fixture(focus: i32, with_solver: bool) -> Fixture {
        let applied = AppliedSettings::new(800.0, focus);
        let payload = SimulatedPayload::new(applied.clone());
        let store = Arc::new(ConfigStore::with_defaults(Box::new(payload)));
        let latest = LatestFrame::new(W, H);
        let sky = SimulatedSky::new(W, H, (83.8, -5.4), 6.2, applied, 11).without_exposure_delay();
        let solver: Box<dyn PlateSolver> = if with_solver {
            Box::new(SimulatedSolver::new(sky.truth()))
        } else {
            Box::new(NullSolver)
        };
        let solve_loop = SolveLoop::new(
            config(),
            store.clone(),
            latest.clone(),
            Box::new(sky),
            Box::new(ThresholdExtractor::new()),
            solver,
            Box::new(GeometricSkyTransform::default()),
            CancellationToken::new(),
        );
        Fixture {
            store,
            latest,
            solve_loop,
        }
    }

    struct BrokenCamera;

    impl FrameSource for BrokenCamera {
        fn dimensions(&self) -> (usize, usize) {
            (W, H)
        }

        fn capture_frame(&mut self) -> FrameResult<Frame> {
            Err(FrameError::NoFrames(PathBuf::from("/dev/null")))
        }
    }

    #[test]
    fn test_search_radius_from_half_diagonal() {
        let config = SolveLoopConfig {
            width: 1936,
            height: 1216,
            ..config()
        };
        let expected = 6.5 * (1936.0f64).hypot(1216.0) / 2.0 / 3600.0;
        assert_relative_eq!(config.search_radius_deg(), expected, epsilon = 1e-12);
    }

    #[test]
    fn test_sweep_positions() {
        assert_eq!(sweep_positions(0, 10, 5), vec![0, 5, 10]);
        assert_eq!(sweep_positions(0, 10, 4), vec![0, 4, 8, 10]);
        assert_eq!(sweep_positions(10, 0, 5), vec![10, 5, 0]);
        assert_eq!(sweep_positions(10, 0, -5), vec![10, 5, 0]);
        assert!(sweep_positions(0, 10, 0).is_empty());
        assert_eq!(sweep_positions(0, 1_000_000, 1).len(), MAX_SWEEP_POSITIONS);
    }

    #[test]
    fn test_solve_records_solution_and_narrows_search() {
        let mut f = fixture(SIM_BEST_FOCUS, true);
        assert_eq!(f.solve_loop.search_region(), SearchRegion::Unconstrained);

        let record = match f.solve_loop.step() {
            StepOutcome::Solved(record) => record,
            other => panic!("expected a solution, got {other:?}"),
        };
        assert_relative_eq!(record.pixel_scale, 6.2);
        assert_relative_eq!(record.ra, 83.8, epsilon = 1.0);
        assert_relative_eq!(record.dec, -5.4, epsilon = 1.0);

        let astrometry = f.store.astrometry();
        assert_eq!(astrometry.ra, record.ra);
        assert_eq!(astrometry.altitude, record.altitude);
        assert!(astrometry.raw_time > 1.0e9);

        assert!(matches!(
            f.solve_loop.search_region(),
            SearchRegion::Around { .. }
        ));
        assert!(f.latest.current().iter().any(|&p| p > 50));
    }

    #[test]
    fn test_failed_solve_leaves_astrometry_alone() {
        let mut f = fixture(SIM_BEST_FOCUS, false);
        assert_eq!(f.solve_loop.step(), StepOutcome::NoSolution);
        assert_eq!(f.store.pointing_estimate(), None);
        assert_eq!(f.store.astrometry().ra, 0.0);
        // The frame is still published for telemetry.
        assert!(f.latest.current().iter().any(|&p| p > 0));
    }

    #[test]
    fn test_capture_failure_is_absorbed() {
        let f = fixture(SIM_BEST_FOCUS, true);
        let mut solve_loop = SolveLoop {
            source: Box::new(BrokenCamera),
            ..f.solve_loop
        };
        assert_eq!(solve_loop.step(), StepOutcome::CaptureFailed);
        assert!(f.latest.current().iter().all(|&p| p == 0));
    }

    #[test]
    fn test_solution_log_gets_a_row() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("solutions.txt");
        let f = fixture(SIM_BEST_FOCUS, true);
        let mut solve_loop = f
            .solve_loop
            .with_solution_log(SolutionLog::open(&path).unwrap());
        assert!(matches!(solve_loop.step(), StepOutcome::Solved(_)));

        let text = std::fs::read_to_string(&path).unwrap();
        assert_eq!(text.lines().count(), 1);
        assert_eq!(text.trim_end().split('|').count(), 9);
    }

    #[test]
    fn test_focus_sweep_finds_best_focus() {
        let mut f = fixture(0, true);
        let mut cmd = Command::hold(&f.store.snapshot());
        cmd.focus_mode = 1;
        cmd.start_focus_position = 2000;
        cmd.end_focus_position = 3200;
        cmd.focus_step = 200;
        f.store.apply_command(&cmd);

        assert_eq!(
            f.solve_loop.step(),
            StepOutcome::FocusSweep {
                best: Some(SIM_BEST_FOCUS)
            }
        );
        let camera = f.store.camera();
        assert_eq!(camera.focus_mode, 0);
        assert_eq!(camera.focus_position, SIM_BEST_FOCUS);

        // Back to solving on the next iteration.
        assert!(matches!(f.solve_loop.step(), StepOutcome::Solved(_)));
    }

    #[test]
    fn test_zero_step_sweep_just_clears_mode() {
        let mut f = fixture(SIM_BEST_FOCUS, true);
        let mut cmd = Command::hold(&f.store.snapshot());
        cmd.focus_mode = 1;
        cmd.focus_step = 0;
        f.store.apply_command(&cmd);

        assert_eq!(
            f.solve_loop.step(),
            StepOutcome::FocusSweep { best: None }
        );
        assert_eq!(f.store.camera().focus_mode, 0);
    }

    #[test]
    fn test_run_stops_on_cancel() {
        let f = fixture(SIM_BEST_FOCUS, false);
        let cancel = f.solve_loop.cancel.clone();
        let handle = f.solve_loop.spawn().unwrap();
        std::thread::sleep(Duration::from_millis(50));
        cancel.cancel();
        handle.join().unwrap();
    }
}
