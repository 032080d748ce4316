//! Frame capture and the shared latest-frame slot
//!
//! The solve loop captures frames from a [`FrameSource`] and publishes each
//! one into a [`LatestFrame`]. Sessions send whatever frame is current when
//! they build their telemetry. The slot always holds exactly
//! `width * height` bytes, starting with an all-black frame.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock};
use std::time::Duration;

use bytes::Bytes;
use chrono::{DateTime, Utc};
use hardware::AppliedSettings;
use ndarray::{s, Array2};
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use rand_distr::StandardNormal;
use thiserror::Error;
use tracing::{debug, warn};

#[derive(Error, Debug)]
pub enum FrameError {
    #[error("Failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("{path} is {actual} bytes, expected {expected}")]
    SizeMismatch {
        path: PathBuf,
        expected: usize,
        actual: usize,
    },

    #[error("No *.raw frames in {0}")]
    NoFrames(PathBuf),
}

pub type FrameResult<T> = Result<T, FrameError>;

/// One captured 8-bit frame.
#[derive(Debug, Clone)]
pub struct Frame {
    pub pixels: Bytes,
    /// Start of the exposure
    pub captured_at: DateTime<Utc>,
    pub exposure_ms: f64,
}

impl Frame {
    /// Unix time at the middle of the exposure, in seconds.
    pub fn mid_exposure_unix(&self) -> f64 {
        let start = self.captured_at.timestamp() as f64
            + self.captured_at.timestamp_subsec_nanos() as f64 * 1e-9;
        start + self.exposure_ms / 2000.0
    }
}

/// Camera sensor driver boundary.
pub trait FrameSource: Send {
    /// Sensor width and height in pixels.
    fn dimensions(&self) -> (usize, usize);

    /// Block until the next frame is available.
    fn capture_frame(&mut self) -> FrameResult<Frame>;
}

/// Single slot holding the most recent frame.
#[derive(Debug, Clone)]
pub struct LatestFrame {
    slot: Arc<RwLock<Bytes>>,
    len: usize,
}

impl LatestFrame {
    pub fn new(width: usize, height: usize) -> Self {
        let len = starcam_proto::frame_len(width, height);
        Self {
            slot: Arc::new(RwLock::new(Bytes::from(vec![0u8; len]))),
            len,
        }
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Replace the current frame. Frames of the wrong size are dropped.
    pub fn publish(&self, pixels: Bytes) -> bool {
        if pixels.len() != self.len {
            warn!(
                "Dropping frame of {} bytes, sensor frame is {}",
                pixels.len(),
                self.len
            );
            return false;
        }
        *self.slot.write().unwrap_or_else(|e| e.into_inner()) = pixels;
        true
    }

    /// The current frame. Cheap: shares the underlying buffer.
    pub fn current(&self) -> Bytes {
        self.slot.read().unwrap_or_else(|e| e.into_inner()).clone()
    }
}

fn exposure_delay(exposure_ms: f64) -> Duration {
    if exposure_ms.is_finite() && exposure_ms > 0.0 {
        Duration::from_secs_f64(exposure_ms / 1000.0)
    } else {
        Duration::ZERO
    }
}

/// Where the simulated camera is pointing, and what it can see.
#[derive(Debug, Clone)]
pub struct SkyTruth {
    /// Right ascension of the field center in degrees
    pub ra: f64,
    /// Declination of the field center in degrees
    pub dec: f64,
    /// Field rotation in degrees
    pub field_rotation: f64,
    /// Arcseconds per pixel
    pub pixel_scale: f64,
    /// Star positions (x, y) in pixels with their peak brightness at the
    /// reference exposure
    pub stars: Vec<(f64, f64, f64)>,
}

/// Synthetic star field frame source.
///
/// Renders a fixed, seeded field of Gaussian stars over a noisy background.
/// Star brightness scales with the applied exposure and the PSF widens as
/// focus moves away from [`SIM_BEST_FOCUS`]. Capturing blocks for the
/// exposure time like a real sensor readout would.
pub struct SimulatedSky {
    width: usize,
    height: usize,
    truth: Arc<SkyTruth>,
    applied: AppliedSettings,
    rng: ChaCha8Rng,
    realtime: bool,
}

/// Focus position that renders the sharpest stars.
pub const SIM_BEST_FOCUS: i32 = 2600;

const SIM_STAR_COUNT: usize = 60;
const SIM_BACKGROUND: f64 = 12.0;
const SIM_NOISE_SIGMA: f64 = 2.0;
const SIM_REFERENCE_EXPOSURE_MS: f64 = 800.0;
const SIM_BASE_PSF_SIGMA: f64 = 1.2;
const SIM_BLUR_PER_COUNT: f64 = 1.0 / 150.0;
const SIM_EDGE_MARGIN: f64 = 12.0;

impl SimulatedSky {
    pub fn new(
        width: usize,
        height: usize,
        pointing: (f64, f64),
        pixel_scale: f64,
        applied: AppliedSettings,
        seed: u64,
    ) -> Self {
        let mut rng = ChaCha8Rng::seed_from_u64(seed);
        let margin = SIM_EDGE_MARGIN.min(width as f64 / 4.0).min(height as f64 / 4.0);

        let stars = (0..SIM_STAR_COUNT)
            .map(|_| {
                let x = rng.random_range(margin..(width as f64 - margin).max(margin + 1.0));
                let y = rng.random_range(margin..(height as f64 - margin).max(margin + 1.0));
                let peak = rng.random_range(60.0..240.0);
                (x, y, peak)
            })
            .collect();

        let truth = SkyTruth {
            ra: pointing.0,
            dec: pointing.1,
            field_rotation: rng.random_range(-180.0..180.0),
            pixel_scale,
            stars,
        };

        Self {
            width,
            height,
            truth: Arc::new(truth),
            applied,
            rng,
            realtime: true,
        }
    }

    /// Return frames immediately instead of waiting out the exposure.
    pub fn without_exposure_delay(mut self) -> Self {
        self.realtime = false;
        self
    }

    /// Ground truth for a solver that knows this sky.
    pub fn truth(&self) -> Arc<SkyTruth> {
        self.truth.clone()
    }

    fn render(&mut self, exposure_ms: f64, focus_position: i32) -> Array2<u8> {
        let gain = (exposure_ms / SIM_REFERENCE_EXPOSURE_MS).max(0.0);
        let sigma = SIM_BASE_PSF_SIGMA
            + (focus_position - SIM_BEST_FOCUS).abs() as f64 * SIM_BLUR_PER_COUNT;
        // Defocus spreads the same flux over a wider disc.
        let peak_scale = gain * (SIM_BASE_PSF_SIGMA / sigma).powi(2);
        let reach = (4.0 * sigma).ceil();

        let shape = (self.height, self.width);
        let mut image = Array2::from_elem(shape, SIM_BACKGROUND);
        for &(sx, sy, peak) in &self.truth.stars {
            let amplitude = peak * peak_scale;
            let span = |center: f64, len: usize| {
                let lo = (center.round() - reach).clamp(0.0, len as f64) as usize;
                let hi = (center.round() + reach + 1.0).clamp(0.0, len as f64) as usize;
                (lo, hi)
            };
            let (r0, r1) = span(sy, self.height);
            let (c0, c1) = span(sx, self.width);

            let mut patch = image.slice_mut(s![r0..r1, c0..c1]);
            for ((i, j), value) in patch.indexed_iter_mut() {
                let dx = (c0 + j) as f64 - sx;
                let dy = (r0 + i) as f64 - sy;
                *value += amplitude * (-(dx * dx + dy * dy) / (2.0 * sigma * sigma)).exp();
            }
        }

        let rng = &mut self.rng;
        let noise = Array2::from_shape_fn(shape, |_| {
            rng.sample::<f64, _>(StandardNormal) * SIM_NOISE_SIGMA
        });
        (image + noise).mapv(|v| v.clamp(0.0, 255.0) as u8)
    }
}

impl FrameSource for SimulatedSky {
    fn dimensions(&self) -> (usize, usize) {
        (self.width, self.height)
    }

    fn capture_frame(&mut self) -> FrameResult<Frame> {
        let exposure_ms = self.applied.exposure_ms();
        let focus = self.applied.focus_position();
        let captured_at = Utc::now();

        if self.realtime {
            std::thread::sleep(exposure_delay(exposure_ms));
        }
        let pixels: Vec<u8> = self.render(exposure_ms, focus).iter().copied().collect();
        debug!("Simulated capture at {:.1} ms, focus {}", exposure_ms, focus);

        Ok(Frame {
            pixels: Bytes::from(pixels),
            captured_at,
            exposure_ms,
        })
    }
}

/// Replays previously recorded raw 8-bit frames from a directory, in file
/// name order, looping forever.
pub struct RawFrameReplay {
    width: usize,
    height: usize,
    files: Vec<PathBuf>,
    next: usize,
    applied: AppliedSettings,
}

impl RawFrameReplay {
    pub fn open(
        dir: &Path,
        width: usize,
        height: usize,
        applied: AppliedSettings,
    ) -> FrameResult<Self> {
        let entries = fs::read_dir(dir).map_err(|source| FrameError::Io {
            path: dir.to_path_buf(),
            source,
        })?;

        let mut files: Vec<PathBuf> = entries
            .filter_map(|entry| entry.ok().map(|e| e.path()))
            .filter(|path| path.extension().is_some_and(|ext| ext == "raw"))
            .collect();
        files.sort();

        if files.is_empty() {
            return Err(FrameError::NoFrames(dir.to_path_buf()));
        }
        debug!("Replaying {} frames from {}", files.len(), dir.display());

        Ok(Self {
            width,
            height,
            files,
            next: 0,
            applied,
        })
    }

    pub fn frame_count(&self) -> usize {
        self.files.len()
    }
}

impl FrameSource for RawFrameReplay {
    fn dimensions(&self) -> (usize, usize) {
        (self.width, self.height)
    }

    fn capture_frame(&mut self) -> FrameResult<Frame> {
        let path = self.files[self.next].clone();
        self.next = (self.next + 1) % self.files.len();

        let exposure_ms = self.applied.exposure_ms();
        let captured_at = Utc::now();
        std::thread::sleep(exposure_delay(exposure_ms));

        let pixels = fs::read(&path).map_err(|source| FrameError::Io {
            path: path.clone(),
            source,
        })?;
        let expected = starcam_proto::frame_len(self.width, self.height);
        if pixels.len() != expected {
            return Err(FrameError::SizeMismatch {
                path,
                expected,
                actual: pixels.len(),
            });
        }

        Ok(Frame {
            pixels: Bytes::from(pixels),
            captured_at,
            exposure_ms,
        })
    }
}
