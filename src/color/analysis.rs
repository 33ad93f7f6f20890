//! Region color statistics
//!
//! Point sampling for ad-hoc measurements (mean, spread and raw samples of a
//! rectangular selection) and the percentile-trimmed mean used when reading
//! patch colors.

use serde::{Deserialize, Serialize};

use image::RgbImage;

use crate::{CalibrationError, Result};

/// Percentile range kept by [`trimmed_mean`]
const OUTLIER_PERCENTILE_LOW: f32 = 10.0;
const OUTLIER_PERCENTILE_HIGH: f32 = 90.0;

/// Rectangular pixel selection, half-open on the right and bottom
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Region {
    pub x0: u32,
    pub y0: u32,
    pub x1: u32,
    pub y1: u32,
}

impl Region {
    /// Create a region from two corners given in any order
    pub fn new(xa: u32, ya: u32, xb: u32, yb: u32) -> Self {
        Self {
            x0: xa.min(xb),
            y0: ya.min(yb),
            x1: xa.max(xb),
            y1: ya.max(yb),
        }
    }

    /// Convert plot ranges, whose y axis grows upwards from the bottom image
    /// edge, into image rows
    pub fn from_plot_ranges(x_range: (f64, f64), y_range: (f64, f64), image_height: u32) -> Self {
        let to_col = |v: f64| v.max(0.0) as u32;
        let to_row = |v: f64| {
            let flipped = image_height as f64 - v;
            flipped.clamp(0.0, image_height as f64) as u32
        };
        Self::new(
            to_col(x_range.0),
            to_row(y_range.0),
            to_col(x_range.1),
            to_row(y_range.1),
        )
    }

    pub fn width(&self) -> u32 {
        self.x1 - self.x0
    }

    pub fn height(&self) -> u32 {
        self.y1 - self.y0
    }

    pub fn area(&self) -> u64 {
        self.width() as u64 * self.height() as u64
    }

    /// Intersect with the image bounds
    fn clamp_to(&self, width: u32, height: u32) -> Self {
        Self {
            x0: self.x0.min(width),
            y0: self.y0.min(height),
            x1: self.x1.min(width),
            y1: self.y1.min(height),
        }
    }
}

/// Statistics of a sampled region in 8-bit display units
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RegionSample {
    /// Per-channel mean (0-255)
    pub mean: [f32; 3],
    /// Per-channel population standard deviation (0-255)
    pub std: [f32; 3],
    /// Every pixel in the region, row by row
    pub samples: Vec<[u8; 3]>,
}

/// Average color of a rectangular selection
///
/// The region is intersected with the image first.
///
/// # Errors
///
/// `InvalidRegion` if nothing of the region lies inside the image
pub fn get_average_color(region: Region, image: &RgbImage) -> Result<RegionSample> {
    let clamped = region.clamp_to(image.width(), image.height());
    if clamped.area() == 0 {
        return Err(CalibrationError::InvalidRegion {
            reason: format!(
                "region ({}, {})-({}, {}) covers no pixel of a {}x{} image",
                region.x0,
                region.y0,
                region.x1,
                region.y1,
                image.width(),
                image.height()
            ),
        });
    }

    let mut samples = Vec::with_capacity(clamped.area() as usize);
    let mut sum = [0.0f64; 3];
    let mut sum_sq = [0.0f64; 3];
    for y in clamped.y0..clamped.y1 {
        for x in clamped.x0..clamped.x1 {
            let p = image.get_pixel(x, y).0;
            for c in 0..3 {
                let v = p[c] as f64;
                sum[c] += v;
                sum_sq[c] += v * v;
            }
            samples.push(p);
        }
    }

    let n = samples.len() as f64;
    let mut mean = [0.0f32; 3];
    let mut std = [0.0f32; 3];
    for c in 0..3 {
        let m = sum[c] / n;
        mean[c] = m as f32;
        std[c] = (sum_sq[c] / n - m * m).max(0.0).sqrt() as f32;
    }

    Ok(RegionSample { mean, std, samples })
}

/// Per-channel mean after dropping values outside the 10th-90th percentile
///
/// Used on patch windows so that specular glints and dust do not pull the
/// reading. Returns `None` for an empty input.
pub fn trimmed_mean(values: &[[f32; 3]]) -> Option<[f32; 3]> {
    if values.is_empty() {
        return None;
    }

    let n = values.len();
    let low_idx = ((n as f32 * OUTLIER_PERCENTILE_LOW / 100.0) as usize).min(n - 1);
    let high_idx = ((n as f32 * OUTLIER_PERCENTILE_HIGH / 100.0) as usize).min(n - 1);

    let mut out = [0.0f32; 3];
    let mut channel: Vec<f32> = Vec::with_capacity(n);
    for (c, slot) in out.iter_mut().enumerate() {
        channel.clear();
        channel.extend(values.iter().map(|v| v[c]));
        channel.sort_by(f32::total_cmp);
        let kept = &channel[low_idx..=high_idx];
        *slot = kept.iter().sum::<f32>() / kept.len() as f32;
    }
    Some(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgb;

    #[test]
    fn test_average_of_uniform_region() {
        let image = RgbImage::from_pixel(20, 10, Rgb([10, 120, 250]));
        let sample = get_average_color(Region::new(2, 2, 8, 6), &image).unwrap();
        assert_eq!(sample.mean, [10.0, 120.0, 250.0]);
        assert_eq!(sample.std, [0.0, 0.0, 0.0]);
        assert_eq!(sample.samples.len(), 24);
    }

    #[test]
    fn test_average_and_spread_of_two_halves() {
        let image = RgbImage::from_fn(4, 2, |x, _| {
            if x < 2 {
                Rgb([0, 0, 0])
            } else {
                Rgb([100, 50, 20])
            }
        });
        let sample = get_average_color(Region::new(0, 0, 4, 2), &image).unwrap();
        assert_eq!(sample.mean, [50.0, 25.0, 10.0]);
        assert!((sample.std[0] - 50.0).abs() < 1e-4);
        assert_eq!(sample.samples[0], [0, 0, 0]);
        assert_eq!(sample.samples[3], [100, 50, 20]);
    }

    #[test]
    fn test_corners_in_any_order() {
        assert_eq!(Region::new(8, 6, 2, 2), Region::new(2, 2, 8, 6));
    }

    #[test]
    fn test_empty_region_is_an_error() {
        let image = RgbImage::new(10, 10);
        let err = get_average_color(Region::new(3, 3, 3, 9), &image).unwrap_err();
        assert!(matches!(err, CalibrationError::InvalidRegion { .. }));

        let outside = get_average_color(Region::new(20, 20, 30, 30), &image);
        assert!(outside.is_err());
    }

    #[test]
    fn test_region_is_clamped_to_image() {
        let image = RgbImage::from_pixel(10, 10, Rgb([1, 2, 3]));
        let sample = get_average_color(Region::new(5, 5, 50, 50), &image).unwrap();
        assert_eq!(sample.samples.len(), 25);
    }

    #[test]
    fn test_plot_ranges_flip_rows() {
        // Plot y grows upward: y in [10, 30] on a 100-row image is rows 70..90
        let region = Region::from_plot_ranges((5.0, 15.0), (30.0, 10.0), 100);
        assert_eq!(region, Region::new(5, 70, 15, 90));
    }

    #[test]
    fn test_trimmed_mean_drops_glints() {
        let mut values = vec![[0.2f32, 0.3, 0.4]; 50];
        values.push([1.0, 1.0, 1.0]);
        values.push([1.0, 1.0, 1.0]);
        let mean = trimmed_mean(&values).unwrap();
        assert!((mean[0] - 0.2).abs() < 1e-6);
        assert!((mean[2] - 0.4).abs() < 1e-6);
    }

    #[test]
    fn test_trimmed_mean_empty() {
        assert!(trimmed_mean(&[]).is_none());
    }
}
