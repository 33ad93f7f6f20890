//! Checker card detection and patch sampling
//!
//! Implements patch detection that:
//! - Segments the display-encoded image into flat regions
//! - Keeps compact, square-ish regions of a consistent size that sit next to
//!   each other (background clutter falls out here)
//! - Fits a lattice through their centres and checks it against the
//!   expected grid size
//! - Picks the quarter rotation that puts the darkest corner patch first
//! - Samples every cell with a percentile-trimmed mean on the linear image
//!
//! Swatch order is row-major over the canonical grid: index `row * cols + col`
//! with patch 0 at the darkest corner. Only rotations of the card are
//! recognised; a mirrored photograph is read in the wrong order.

use image::{imageops::FilterType, Rgb32FImage, RgbImage};
use palette::LinSrgb;
use serde::{Deserialize, Serialize};
use tracing::{debug, instrument};

use crate::color::analysis::trimmed_mean;
use crate::color::conversion::ColorSpace;
use crate::config::DetectionConfig;
use crate::constants::detection::SAMPLE_RADIUS_FRACTION;
use crate::detection::grid::{fit_lattice, median_neighbour_distance, GridGeometry};
use crate::detection::regions::{segment_flat_regions, FlatRegion};
use crate::{CalibrationError, Result};

/// One sampled checker patch
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Swatch {
    /// Row-major index in the canonical grid
    pub index: usize,
    /// Trimmed mean of the sampling window, linear light
    pub color: LinSrgb,
    /// Patch centre (x, y) in image pixels
    pub centre: (f64, f64),
    /// True when no region was seen at this cell and its position comes
    /// from the fitted grid alone (occlusion, glare)
    pub inferred: bool,
}

/// Result of a successful detection
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Detection {
    /// Sampled patches in index order; cells whose sampling window leaves
    /// the image are omitted
    pub swatches: Vec<Swatch>,
    pub geometry: GridGeometry,
}

impl Detection {
    /// Swatch with the given index, if it was sampled
    pub fn get(&self, index: usize) -> Option<&Swatch> {
        self.swatches.iter().find(|s| s.index == index)
    }

    pub fn inferred_count(&self) -> usize {
        self.swatches.iter().filter(|s| s.inferred).count()
    }
}

#[derive(Debug, Clone, Copy)]
struct Candidate {
    centre: (f64, f64),
    area: f64,
}

/// Checker card detector over display-encoded RGB images
#[derive(Debug, Clone)]
pub struct PatchDetector {
    config: DetectionConfig,
}

impl Default for PatchDetector {
    fn default() -> Self {
        Self::new()
    }
}

impl PatchDetector {
    /// Create a detector with default parameters
    pub fn new() -> Self {
        Self {
            config: DetectionConfig::default(),
        }
    }

    pub fn with_config(config: DetectionConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &DetectionConfig {
        &self.config
    }

    /// Detect a `rows x cols` checker card and sample its patches
    ///
    /// # Arguments
    ///
    /// * `image` - Display-encoded photograph
    /// * `rows`, `cols` - Expected grid size of the card, in its canonical
    ///   (darkest corner first) orientation
    ///
    /// # Errors
    ///
    /// Returns `CalibrationError` if:
    /// - The grid size or detector configuration is invalid
    /// - The image has no pixels
    /// - No plausible grid of the expected size is found (`CardNotFound`)
    pub fn detect(&self, image: &RgbImage, rows: usize, cols: usize) -> Result<Detection> {
        let geometry = self.locate(image, rows, cols)?;
        let linear = ColorSpace::decode_to_linear(image)?;
        let swatches = sample_grid(&linear, &geometry);
        Ok(Detection { swatches, geometry })
    }

    /// Find the canonical grid geometry without sampling
    #[instrument(skip(self, image), fields(width = image.width(), height = image.height()))]
    pub fn locate(&self, image: &RgbImage, rows: usize, cols: usize) -> Result<GridGeometry> {
        if rows < 2 || cols < 2 {
            return Err(CalibrationError::invalid_config(
                "grid size",
                format!("{}x{}", rows, cols),
            ));
        }
        self.config.validate()?;
        let (width, height) = image.dimensions();
        if width == 0 || height == 0 {
            return Err(CalibrationError::invalid_image("image has no pixels"));
        }

        // Step 1: Working resolution for segmentation
        let pixels = width as u64 * height as u64;
        let budget = self.config.max_detection_pixels as u64;
        let downscaled;
        let (work, sx, sy) = if pixels > budget {
            let factor = (budget as f64 / pixels as f64).sqrt();
            let w = ((width as f64 * factor).round() as u32).max(1);
            let h = ((height as f64 * factor).round() as u32).max(1);
            downscaled = image::imageops::resize(image, w, h, FilterType::Triangle);
            debug!(w, h, "downscaled for segmentation");
            (&downscaled, w as f64 / width as f64, h as f64 / height as f64)
        } else {
            (image, 1.0, 1.0)
        };

        // Step 2: Flat regions
        let regions = segment_flat_regions(
            work,
            self.config.color_tolerance,
            self.config.gradient_tolerance,
            self.config.min_region_pixels,
        );

        // Step 3: Patch-shaped regions, in full-resolution coordinates
        let max_area = pixels as f64 / (rows * cols) as f64;
        let candidates: Vec<Candidate> = regions
            .iter()
            .filter(|r| self.is_patch_shaped(r))
            .map(|r| Candidate {
                centre: ((r.centroid.0 + 0.5) / sx - 0.5, (r.centroid.1 + 0.5) / sy - 0.5),
                area: r.pixel_count as f64 / (sx * sy),
            })
            .filter(|c| c.area <= max_area)
            .collect();
        debug!(
            regions = regions.len(),
            candidates = candidates.len(),
            "segmented flat regions"
        );

        // Step 4: Same-size patches next to each other
        let sized = largest_size_cluster(candidates, self.config.size_cluster_ratio);
        let group = largest_connected_group(&sized, self.config.neighbour_link_pitches);
        let needed = (self.config.min_detected_fraction * (rows * cols) as f64).ceil() as usize;
        if group.len() < needed.max(4) {
            return Err(CalibrationError::card_not_found(format!(
                "{} patch-like regions found, {} needed for a {}x{} card",
                group.len(),
                needed.max(4),
                rows,
                cols
            )));
        }

        // Step 5: Lattice through the patch centres
        let centres: Vec<(f64, f64)> = group.iter().map(|c| c.centre).collect();
        let lattice = fit_lattice(&centres)?;
        let pitch = lattice.pitch();
        debug!(
            rows = lattice.rows,
            cols = lattice.cols,
            occupied = lattice.occupied.len(),
            residual = lattice.mean_residual,
            pitch,
            "fitted patch lattice"
        );

        if lattice.mean_residual > self.config.max_residual_pitches * pitch {
            return Err(CalibrationError::card_not_found(format!(
                "patch centres are irregular (mean residual {:.1}px at {:.1}px pitch)",
                lattice.mean_residual, pitch
            )));
        }
        let dims = (lattice.rows, lattice.cols);
        if dims != (rows, cols) && dims != (cols, rows) {
            return Err(CalibrationError::card_not_found(format!(
                "found a {}x{} patch grid, expected {}x{}",
                lattice.rows, lattice.cols, rows, cols
            )));
        }
        if lattice.occupied.len() < needed {
            return Err(CalibrationError::card_not_found(format!(
                "only {} of {} patches visible",
                lattice.occupied.len(),
                rows * cols
            )));
        }

        // Step 6: Canonical orientation, darkest corner first
        let radius = match self.config.sample_radius {
            Some(r) => r,
            None => {
                let mut sides: Vec<f64> = group.iter().map(|c| c.area.sqrt()).collect();
                sides.sort_by(f64::total_cmp);
                let side = sides[sides.len() / 2];
                ((side * SAMPLE_RADIUS_FRACTION).round() as u32).max(1)
            }
        };

        let mut best: Option<(f32, u8, GridGeometry)> = None;
        for quarter_turns in 0..4u8 {
            let Some(geometry) = lattice.orient(quarter_turns, rows, cols, radius) else {
                continue;
            };
            let luminance = corner_luminance(image, &geometry).unwrap_or(f32::INFINITY);
            if best.as_ref().map_or(true, |(l, _, _)| luminance < *l) {
                best = Some((luminance, quarter_turns, geometry));
            }
        }

        let (luminance, quarter_turns, geometry) = best
            .ok_or_else(|| CalibrationError::card_not_found("no orientation matches the expected grid"))?;
        debug!(quarter_turns, corner_luminance = luminance, "chose canonical orientation");
        Ok(geometry)
    }

    fn is_patch_shaped(&self, region: &FlatRegion) -> bool {
        let fill = region.fill_ratio();
        region.aspect_ratio() <= self.config.max_patch_aspect
            && fill >= self.config.fill_ratio_min
            && fill <= self.config.fill_ratio_max
    }
}

/// Largest set of candidates whose areas stay within `ratio` of each other
fn largest_size_cluster(mut candidates: Vec<Candidate>, ratio: f64) -> Vec<Candidate> {
    candidates.sort_by(|a, b| a.area.total_cmp(&b.area));

    let (mut best_start, mut best_len) = (0, 0);
    let mut end = 0;
    for start in 0..candidates.len() {
        end = end.max(start);
        while end < candidates.len() && candidates[end].area <= candidates[start].area * ratio {
            end += 1;
        }
        if end - start > best_len {
            (best_start, best_len) = (start, end - start);
        }
    }
    candidates.drain(best_start..best_start + best_len).collect()
}

/// Largest group of candidates linked by steps of at most `link_pitches`
/// times the median neighbour distance
fn largest_connected_group(candidates: &[Candidate], link_pitches: f64) -> Vec<Candidate> {
    let centres: Vec<(f64, f64)> = candidates.iter().map(|c| c.centre).collect();
    let Some(pitch) = median_neighbour_distance(&centres) else {
        return candidates.to_vec();
    };
    let link = link_pitches * pitch;

    let mut group_of = vec![usize::MAX; candidates.len()];
    let mut best: Vec<usize> = Vec::new();
    for seed in 0..candidates.len() {
        if group_of[seed] != usize::MAX {
            continue;
        }
        let mut members = vec![seed];
        group_of[seed] = seed;
        let mut cursor = 0;
        while cursor < members.len() {
            let here = centres[members[cursor]];
            cursor += 1;
            for (j, &there) in centres.iter().enumerate() {
                if group_of[j] == usize::MAX && (here.0 - there.0).hypot(here.1 - there.1) <= link {
                    group_of[j] = seed;
                    members.push(j);
                }
            }
        }
        if members.len() > best.len() {
            best = members;
        }
    }

    best.sort_unstable();
    best.into_iter().map(|i| candidates[i]).collect()
}

/// Linear luminance of patch (0, 0) read from the display image
fn corner_luminance(image: &RgbImage, geometry: &GridGeometry) -> Option<f32> {
    let (x0, y0, x1, y1) = geometry.window(0, image.width(), image.height())?;
    let mut values = Vec::with_capacity(((x1 - x0) * (y1 - y0)) as usize);
    for y in y0..y1 {
        for x in x0..x1 {
            let lin = ColorSpace::decode_rgb8(image.get_pixel(x, y).0);
            values.push([lin.red, lin.green, lin.blue]);
        }
    }
    let mean = trimmed_mean(&values)?;
    Some(ColorSpace::luminance(LinSrgb::new(mean[0], mean[1], mean[2])))
}

/// Sample every cell of a known grid on a linear image
///
/// Used both for the first measurement and to re-measure a corrected image
/// at the geometry found on the original. Cells whose sampling window leaves
/// the image are omitted.
pub fn sample_grid(linear: &Rgb32FImage, geometry: &GridGeometry) -> Vec<Swatch> {
    let (width, height) = linear.dimensions();
    let mut swatches = Vec::with_capacity(geometry.patch_count());
    let mut values = Vec::new();

    for index in 0..geometry.patch_count() {
        let Some((x0, y0, x1, y1)) = geometry.window(index, width, height) else {
            continue;
        };
        values.clear();
        for y in y0..y1 {
            for x in x0..x1 {
                values.push(linear.get_pixel(x, y).0);
            }
        }
        let Some(mean) = trimmed_mean(&values) else {
            continue;
        };
        swatches.push(Swatch {
            index,
            color: LinSrgb::new(mean[0], mean[1], mean[2]),
            centre: geometry.centre_of_index(index),
            inferred: !geometry.is_observed(index),
        });
    }
    swatches
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgb;

    /// Axis-aligned grid of flat squares on a grey card, darkest patch at
    /// `dark_cell`
    fn card(rows: u32, cols: u32, dark_cell: (u32, u32)) -> RgbImage {
        let (side, gap, margin) = (20u32, 6u32, 30u32);
        let width = 2 * margin + cols * side + (cols - 1) * gap;
        let height = 2 * margin + rows * side + (rows - 1) * gap;
        RgbImage::from_fn(width, height, |x, y| {
            let (px, py) = (x as i64 - margin as i64, y as i64 - margin as i64);
            let pitch = (side + gap) as i64;
            if px < 0 || py < 0 {
                return Rgb([150, 150, 150]);
            }
            let (c, r) = (px / pitch, py / pitch);
            if c >= cols as i64 || r >= rows as i64 || px % pitch >= side as i64 || py % pitch >= side as i64 {
                return Rgb([150, 150, 150]);
            }
            if (r as u32, c as u32) == dark_cell {
                return Rgb([10, 10, 10]);
            }
            let v = (60 + 8 * (r * cols as i64 + c)) as u8;
            Rgb([v, 255 - v, (v / 2) + 40])
        })
    }

    #[test]
    fn test_detects_grid_in_order() {
        let image = card(3, 4, (0, 0));
        let detection = PatchDetector::new().detect(&image, 3, 4).unwrap();
        assert_eq!(detection.swatches.len(), 12);
        assert_eq!(detection.inferred_count(), 0);

        // Index 0 is the dark patch, then row-major
        let first = &detection.swatches[0];
        assert!(ColorSpace::luminance(first.color) < 0.01);
        for (i, swatch) in detection.swatches.iter().enumerate() {
            assert_eq!(swatch.index, i);
        }
        let (x, y) = detection.swatches[1].centre;
        assert!((x - 65.5).abs() < 1.0 && (y - 39.5).abs() < 1.0);
    }

    #[test]
    fn test_darkest_corner_defines_origin() {
        // Dark patch at the bottom-right: the card is upside down
        let image = card(3, 4, (2, 3));
        let detection = PatchDetector::new().detect(&image, 3, 4).unwrap();
        let first = &detection.swatches[0];
        assert!(ColorSpace::luminance(first.color) < 0.01);
        assert!(first.centre.0 > 100.0 && first.centre.1 > 70.0);
    }

    #[test]
    fn test_sideways_card() {
        let image = card(4, 3, (0, 2));
        let detection = PatchDetector::new().detect(&image, 3, 4).unwrap();
        assert_eq!(detection.geometry.rows, 3);
        assert_eq!(detection.geometry.cols, 4);
        assert_eq!(detection.swatches.len(), 12);
        assert!(ColorSpace::luminance(detection.swatches[0].color) < 0.01);
    }

    #[test]
    fn test_wrong_grid_size_is_card_not_found() {
        let image = card(3, 4, (0, 0));
        let err = PatchDetector::new().detect(&image, 4, 6).unwrap_err();
        assert!(matches!(err, CalibrationError::CardNotFound { .. }));
    }

    #[test]
    fn test_blank_image_is_card_not_found() {
        let image = RgbImage::from_pixel(200, 150, Rgb([90, 90, 90]));
        let err = PatchDetector::new().detect(&image, 4, 6).unwrap_err();
        assert!(matches!(err, CalibrationError::CardNotFound { .. }));
    }

    #[test]
    fn test_invalid_grid_size() {
        let image = card(3, 4, (0, 0));
        assert!(matches!(
            PatchDetector::new().detect(&image, 1, 4),
            Err(CalibrationError::InvalidConfiguration { .. })
        ));
    }

    #[test]
    fn test_size_cluster_prefers_most_members() {
        let make = |area: f64| Candidate {
            centre: (0.0, 0.0),
            area,
        };
        let candidates = vec![make(10.0), make(400.0), make(420.0), make(390.0), make(5000.0)];
        let cluster = largest_size_cluster(candidates, 1.8);
        assert_eq!(cluster.len(), 3);
        assert!(cluster.iter().all(|c| c.area > 300.0 && c.area < 500.0));
    }

    #[test]
    fn test_connected_group_drops_far_clutter() {
        let mut candidates: Vec<Candidate> = (0..6)
            .map(|i| Candidate {
                centre: ((i % 3) as f64 * 10.0, (i / 3) as f64 * 10.0),
                area: 50.0,
            })
            .collect();
        candidates.push(Candidate {
            centre: (500.0, 500.0),
            area: 50.0,
        });
        let group = largest_connected_group(&candidates, 1.6);
        assert_eq!(group.len(), 6);
    }

    #[test]
    fn test_sample_grid_omits_cells_outside_image() {
        let linear = Rgb32FImage::from_pixel(50, 50, Rgb([0.25, 0.5, 0.75]));
        let geometry = GridGeometry {
            origin: [10.0, 10.0],
            row_step: [0.0, 30.0],
            col_step: [30.0, 0.0],
            rows: 2,
            cols: 2,
            sample_radius: 4,
            observed: vec![true, false, true, true],
        };
        let swatches = sample_grid(&linear, &geometry);
        // Cell (1, 1) is centred at (40, 40): its window reaches x = 44, inside
        assert_eq!(swatches.len(), 4);
        assert!(swatches[1].inferred);
        assert!(!swatches[0].inferred);
        assert!((swatches[0].color.green - 0.5).abs() < 1e-6);

        let small = Rgb32FImage::from_pixel(42, 42, Rgb([0.25, 0.5, 0.75]));
        let swatches = sample_grid(&small, &geometry);
        assert_eq!(swatches.iter().map(|s| s.index).collect::<Vec<_>>(), vec![0]);
    }
}
