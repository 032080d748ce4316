//! Star extraction from raw frames

use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};

use ndarray::{s, Array2, ArrayView2};
use starcam_proto::BlobParams;
use tracing::{debug, info, trace, warn};

/// Most stars handed to the solver from one frame.
pub const MAX_STARS: usize = 100;

/// Centroid window half-width in pixels.
const CENTROID_RADIUS: usize = 2;

/// A detected star.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Star {
    /// Centroid column in pixels
    pub x: f64,
    /// Centroid row in pixels
    pub y: f64,
    /// Background-subtracted flux in the centroid window
    pub flux: f64,
}

/// Stars from one frame, brightest first.
#[derive(Debug, Clone, Default)]
pub struct Extraction {
    pub stars: Vec<Star>,
    /// Background-subtracted frame, when detection asked for it
    pub filtered: Option<Vec<u8>>,
}

pub trait StarExtractor: Send {
    fn extract(
        &mut self,
        pixels: &[u8],
        width: usize,
        height: usize,
        params: &BlobParams,
    ) -> Extraction;
}

/// (row, column) of a pixel
type Pixel = (usize, usize);

/// Global mean and population standard deviation of a frame.
fn frame_stats(image: &Array2<f64>) -> (f64, f64) {
    if image.is_empty() {
        return (0.0, 0.0);
    }
    (image.mean().unwrap_or(0.0), image.std(0.0))
}

/// Square window of `radius` around `center`, clipped to the image, and the
/// position of its top left corner.
fn window(image: &Array2<f64>, center: Pixel, radius: usize) -> (ArrayView2<'_, f64>, Pixel) {
    let (height, width) = image.dim();
    let (row, col) = center;
    let (r0, c0) = (row.saturating_sub(radius), col.saturating_sub(radius));
    let (r1, c1) = ((row + radius + 1).min(height), (col + radius + 1).min(width));
    (image.slice(s![r0..r1, c0..c1]), (r0, c0))
}

fn is_local_max(image: &Array2<f64>, center: Pixel, value: f64) -> bool {
    let (view, (r0, c0)) = window(image, center, 1);
    !view.indexed_iter().any(|((i, j), &n)| {
        let pixel = (r0 + i, c0 + j);
        // Ties go to the first pixel in scan order.
        pixel != center && (n > value || (pixel < center && n == value))
    })
}

fn neighbor_mean(image: &Array2<f64>, center: Pixel, value: f64) -> f64 {
    let (view, _) = window(image, center, 1);
    match view.len() - 1 {
        0 => 0.0,
        count => (view.sum() - value) / count as f64,
    }
}

/// Mean of the square ring `radius` pixels out from `center`.
fn ring_mean(image: &Array2<f64>, center: Pixel, radius: usize) -> Option<f64> {
    let (outer, _) = window(image, center, radius);
    let (inner, _) = window(image, center, radius - 1);
    let count = outer.len() - inner.len();
    (count > 0).then(|| (outer.sum() - inner.sum()) / count as f64)
}

fn centroid(image: &Array2<f64>, center: Pixel, background: f64) -> Star {
    let (view, (r0, c0)) = window(image, center, CENTROID_RADIUS);
    let (flux, sx, sy) = view
        .indexed_iter()
        .fold((0.0, 0.0, 0.0), |(flux, sx, sy), ((i, j), &v)| {
            let w = (v - background).max(0.0);
            (flux + w, sx + w * (c0 + j) as f64, sy + w * (r0 + i) as f64)
        });
    if flux > 0.0 {
        Star {
            x: sx / flux,
            y: sy / flux,
            flux,
        }
    } else {
        Star {
            x: center.1 as f64,
            y: center.0 as f64,
            flux: 0.0,
        }
    }
}

/// Read a hot pixel mask file: one `x y` pair per line.
fn load_mask(path: &Path) -> std::io::Result<HashSet<Pixel>> {
    let text = fs::read_to_string(path)?;
    let mut mask = HashSet::new();
    for (number, line) in text.lines().enumerate() {
        let mut fields = line.split_whitespace().map(str::parse::<usize>);
        match (fields.next(), fields.next()) {
            (Some(Ok(x)), Some(Ok(y))) => {
                mask.insert((y, x));
            }
            (None, _) => {}
            _ => warn!("{}:{}: skipping malformed entry", path.display(), number + 1),
        }
    }
    Ok(mask)
}

fn save_mask(path: &Path, mask: &HashSet<Pixel>) -> std::io::Result<()> {
    let mut pixels: Vec<&Pixel> = mask.iter().collect();
    pixels.sort();
    let text: String = pixels
        .into_iter()
        .map(|(row, col)| format!("{col} {row}\n"))
        .collect();
    fs::write(path, text)
}

/// Threshold and local-maximum star finder.
///
/// Detection follows [`BlobParams`]:
/// - candidates are local maxima brighter than `mean + n_sigma * std`,
///   at least `centroid_search_border` pixels from the edge
/// - `r_smooth` sets the box used to confirm a candidate against noise
/// - with `high_pass_filter`, background is measured on a ring at
///   `r_high_pass_filter` around each candidate instead of globally
/// - with `dynamic_hot_pixels`, single-pixel spikes brighter than
///   `spike_limit` times their surroundings are rejected
/// - stars closer than `unique_star_spacing` to a brighter star are dropped
/// - `make_static_hp_mask` records this frame's spikes; `use_static_hp_mask`
///   skips them in later frames
///
/// With a mask file the static mask is loaded at startup and rewritten
/// whenever a remake changes it.
#[derive(Debug, Default)]
pub struct ThresholdExtractor {
    hot_pixels: HashSet<Pixel>,
    mask_file: Option<PathBuf>,
}

impl ThresholdExtractor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Keep the static hot pixel mask in `path`. A missing file starts an
    /// empty mask.
    pub fn with_mask_file(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let hot_pixels = match load_mask(&path) {
            Ok(mask) => {
                info!("Loaded {} hot pixels from {}", mask.len(), path.display());
                mask
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => HashSet::new(),
            Err(e) => {
                warn!("Could not read hot pixel mask {}: {}", path.display(), e);
                HashSet::new()
            }
        };
        Self {
            hot_pixels,
            mask_file: Some(path),
        }
    }

    pub fn hot_pixel_count(&self) -> usize {
        self.hot_pixels.len()
    }

    fn store_mask(&self) {
        if let Some(path) = &self.mask_file {
            match save_mask(path, &self.hot_pixels) {
                Ok(()) => debug!("Saved {} hot pixels to {}", self.hot_pixels.len(), path.display()),
                Err(e) => warn!("Could not write hot pixel mask {}: {}", path.display(), e),
            }
        }
    }
}

impl StarExtractor for ThresholdExtractor {
    fn extract(
        &mut self,
        pixels: &[u8],
        width: usize,
        height: usize,
        params: &BlobParams,
    ) -> Extraction {
        let image = match ArrayView2::from_shape((height, width), pixels) {
            Ok(view) => view.mapv(f64::from),
            Err(e) => {
                warn!("Frame of {} bytes is not {}x{}: {}", pixels.len(), width, height, e);
                return Extraction::default();
            }
        };
        let (mean, std) = frame_stats(&image);
        let n_sigma = params.n_sigma.max(0.0) as f64;
        let threshold = mean + n_sigma * std;
        let border = params.centroid_search_border.max(0) as usize;
        let smooth = params.r_smooth.max(0) as usize;
        let spike_limit = params.spike_limit.max(1) as f64;
        let noise = std.max(1.0);

        let make_mask = params.make_static_hp_mask != 0;
        let use_mask = params.use_static_hp_mask != 0 && !make_mask;
        let previous_mask = make_mask.then(|| std::mem::take(&mut self.hot_pixels));

        let mut candidates = Vec::new();
        for ((row, col), &value) in image.indexed_iter() {
            let center = (row, col);
            if row < border || col < border || row + border >= height || col + border >= width {
                continue;
            }
            if value <= threshold || !is_local_max(&image, center, value) {
                continue;
            }
            if use_mask && self.hot_pixels.contains(&center) {
                continue;
            }

            let background = if params.high_pass_filter != 0 {
                ring_mean(&image, center, params.r_high_pass_filter.max(1) as usize)
                    .unwrap_or(mean)
            } else {
                mean
            };

            let surroundings = neighbor_mean(&image, center, value) - background;
            if value - background > spike_limit * surroundings.max(noise) {
                if make_mask {
                    self.hot_pixels.insert(center);
                }
                if params.dynamic_hot_pixels != 0 {
                    trace!("Rejecting hot pixel at ({col}, {row})");
                    continue;
                }
            }

            // Smoothed significance: the box mean must stand out from
            // the noise averaged over the same box.
            let side = (2 * smooth + 1) as f64;
            let box_mean = window(&image, center, smooth).0.mean().unwrap_or(0.0);
            if box_mean - background <= n_sigma * std / side {
                continue;
            }

            candidates.push(centroid(&image, center, background));
        }

        if previous_mask.is_some_and(|previous| previous != self.hot_pixels) {
            self.store_mask();
        }

        candidates.sort_by(|a, b| b.flux.total_cmp(&a.flux));

        let spacing = params.unique_star_spacing.max(0) as f64;
        let mut stars: Vec<Star> = Vec::new();
        for star in candidates {
            let crowded = stars
                .iter()
                .any(|kept| (kept.x - star.x).hypot(kept.y - star.y) < spacing);
            if !crowded {
                stars.push(star);
                if stars.len() == MAX_STARS {
                    break;
                }
            }
        }

        let filtered = (params.filter_return_image != 0).then(|| {
            image
                .iter()
                .map(|&p| (p - mean).clamp(0.0, 255.0) as u8)
                .collect()
        });

        debug!(
            "Extracted {} stars (threshold {:.1}, hot pixel mask {})",
            stars.len(),
            threshold,
            self.hot_pixels.len()
        );

        Extraction { stars, filtered }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    const W: usize = 64;
    const H: usize = 48;

    fn blank() -> Vec<u8> {
        // Mild deterministic texture so the standard deviation is not zero.
        (0..W * H).map(|i| 10 + (i % 3) as u8).collect()
    }

    fn add_star(pixels: &mut [u8], cx: f64, cy: f64, peak: f64, sigma: f64) {
        for y in 0..H {
            for x in 0..W {
                let dx = x as f64 - cx;
                let dy = y as f64 - cy;
                let v = peak * (-(dx * dx + dy * dy) / (2.0 * sigma * sigma)).exp();
                let p = &mut pixels[y * W + x];
                *p = (*p as f64 + v).min(255.0) as u8;
            }
        }
    }

    #[test]
    fn test_finds_stars_brightest_first() {
        let mut pixels = blank();
        add_star(&mut pixels, 20.0, 15.0, 120.0, 1.3);
        add_star(&mut pixels, 45.0, 30.0, 200.0, 1.3);

        let mut extractor = ThresholdExtractor::new();
        let result = extractor.extract(&pixels, W, H, &BlobParams::default());

        assert_eq!(result.stars.len(), 2);
        assert_relative_eq!(result.stars[0].x, 45.0, epsilon = 0.3);
        assert_relative_eq!(result.stars[0].y, 30.0, epsilon = 0.3);
        assert_relative_eq!(result.stars[1].x, 20.0, epsilon = 0.3);
        assert!(result.stars[0].flux > result.stars[1].flux);
        assert!(result.filtered.is_none());
    }

    #[test]
    fn test_rejects_hot_pixel() {
        let mut pixels = blank();
        add_star(&mut pixels, 20.0, 15.0, 120.0, 1.3);
        pixels[30 * W + 40] = 250;

        let mut extractor = ThresholdExtractor::new();
        let result = extractor.extract(&pixels, W, H, &BlobParams::default());
        assert_eq!(result.stars.len(), 1);

        let params = BlobParams {
            dynamic_hot_pixels: 0,
            ..BlobParams::default()
        };
        let result = extractor.extract(&pixels, W, H, &params);
        assert_eq!(result.stars.len(), 2);
    }

    #[test]
    fn test_static_mask_hides_recorded_spikes() {
        let mut pixels = blank();
        pixels[30 * W + 40] = 250;

        let mut extractor = ThresholdExtractor::new();
        let make = BlobParams {
            dynamic_hot_pixels: 0,
            make_static_hp_mask: 1,
            ..BlobParams::default()
        };
        assert_eq!(extractor.extract(&pixels, W, H, &make).stars.len(), 1);
        assert_eq!(extractor.hot_pixel_count(), 1);

        let use_mask = BlobParams {
            dynamic_hot_pixels: 0,
            use_static_hp_mask: 1,
            ..BlobParams::default()
        };
        assert!(extractor.extract(&pixels, W, H, &use_mask).stars.is_empty());
    }

    #[test]
    fn test_mask_file_survives_restart() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("static_hp_mask.txt");
        let mut pixels = blank();
        pixels[30 * W + 40] = 250;

        let make = BlobParams {
            dynamic_hot_pixels: 0,
            make_static_hp_mask: 1,
            ..BlobParams::default()
        };
        let mut extractor = ThresholdExtractor::with_mask_file(path.clone());
        extractor.extract(&pixels, W, H, &make);
        assert_eq!(fs::read_to_string(&path).unwrap(), "40 30\n");

        let mut restarted = ThresholdExtractor::with_mask_file(path.clone());
        assert_eq!(restarted.hot_pixel_count(), 1);
        let use_mask = BlobParams {
            dynamic_hot_pixels: 0,
            use_static_hp_mask: 1,
            ..BlobParams::default()
        };
        assert!(restarted.extract(&pixels, W, H, &use_mask).stars.is_empty());
    }

    #[test]
    fn test_missing_or_malformed_mask_file() {
        let dir = tempfile::tempdir().unwrap();
        let missing = ThresholdExtractor::with_mask_file(dir.path().join("none.txt"));
        assert_eq!(missing.hot_pixel_count(), 0);

        let path = dir.path().join("mask.txt");
        fs::write(&path, "3 4\nbogus\n\n7 8\n").unwrap();
        assert_eq!(ThresholdExtractor::with_mask_file(path).hot_pixel_count(), 2);
    }

    #[test]
    fn test_wrong_frame_size_yields_nothing() {
        let result = ThresholdExtractor::new().extract(&[0u8; 10], W, H, &BlobParams::default());
        assert!(result.stars.is_empty());
        assert!(result.filtered.is_none());
    }

    #[test]
    fn test_unique_star_spacing() {
        let mut pixels = blank();
        add_star(&mut pixels, 20.0, 20.0, 200.0, 1.2);
        add_star(&mut pixels, 26.0, 20.0, 120.0, 1.2);

        let mut extractor = ThresholdExtractor::new();
        let result = extractor.extract(&pixels, W, H, &BlobParams::default());
        assert_eq!(result.stars.len(), 1);

        let params = BlobParams {
            unique_star_spacing: 3,
            ..BlobParams::default()
        };
        let result = extractor.extract(&pixels, W, H, &params);
        assert_eq!(result.stars.len(), 2);
    }

    #[test]
    fn test_border_excludes_edge_stars() {
        let mut pixels = blank();
        add_star(&mut pixels, 2.0, 20.0, 200.0, 1.2);

        let mut extractor = ThresholdExtractor::new();
        assert_eq!(
            extractor
                .extract(&pixels, W, H, &BlobParams::default())
                .stars
                .len(),
            1
        );

        let params = BlobParams {
            centroid_search_border: 5,
            ..BlobParams::default()
        };
        assert!(extractor.extract(&pixels, W, H, &params).stars.is_empty());
    }

    #[test]
    fn test_filtered_image_returned_on_request() {
        let pixels = blank();
        let params = BlobParams {
            filter_return_image: 1,
            ..BlobParams::default()
        };
        let result = ThresholdExtractor::new().extract(&pixels, W, H, &params);
        let filtered = result.filtered.unwrap();
        assert_eq!(filtered.len(), W * H);
        assert!(filtered.iter().all(|&p| p <= 2));
    }
}
