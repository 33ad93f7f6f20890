//! One-point white balance
//!
//! Per-channel gains that map the measured neutral patch onto its certified
//! value. Always applied to linear data, before the regression fit.

use image::Rgb32FImage;
use palette::LinSrgb;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::calibration::reference::ReferencePalette;
use crate::detection::Swatch;
use crate::{CalibrationError, Result};

/// Per-channel multiplicative white balance
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct WhiteBalance {
    /// Gains for (R, G, B)
    pub gains: [f32; 3],
}

impl Default for WhiteBalance {
    fn default() -> Self {
        Self::identity()
    }
}

impl WhiteBalance {
    /// Unit gains
    pub fn identity() -> Self {
        Self { gains: [1.0; 3] }
    }

    /// Gains such that `measured * gains == reference`
    ///
    /// # Errors
    ///
    /// `InvalidImage` if a measured channel is zero, negative or not finite;
    /// the anchor patch is then clipped black or corrupt.
    pub fn from_anchor(measured: LinSrgb, reference: LinSrgb) -> Result<Self> {
        let m = [measured.red, measured.green, measured.blue];
        let r = [reference.red, reference.green, reference.blue];
        let mut gains = [1.0f32; 3];
        for c in 0..3 {
            if !m[c].is_finite() || m[c] <= 0.0 {
                return Err(CalibrationError::invalid_image(format!(
                    "white balance anchor has unusable channel value {}",
                    m[c]
                )));
            }
            gains[c] = r[c] / m[c];
        }
        Ok(Self { gains })
    }

    /// Gains anchored on a palette patch found among detected swatches
    ///
    /// Falls back to unit gains, with a warning, when the anchor patch was
    /// not sampled.
    pub fn from_swatches(swatches: &[Swatch], palette: &ReferencePalette, anchor: usize) -> Result<Self> {
        let Some(reference) = palette.get(anchor) else {
            return Err(CalibrationError::invalid_config("white balance anchor", anchor));
        };
        match swatches.iter().find(|s| s.index == anchor) {
            Some(swatch) => {
                let balance = Self::from_anchor(swatch.color, reference.color)?;
                debug!(anchor, gains = ?balance.gains, "white balance from anchor patch");
                Ok(balance)
            }
            None => {
                warn!(anchor, "white balance anchor patch not sampled, using unit gains");
                Ok(Self::identity())
            }
        }
    }

    pub fn is_identity(&self) -> bool {
        self.gains == [1.0; 3]
    }

    pub fn apply_color(&self, color: LinSrgb) -> LinSrgb {
        LinSrgb::new(
            color.red * self.gains[0],
            color.green * self.gains[1],
            color.blue * self.gains[2],
        )
    }

    /// Balanced copy of a linear image; values are not clipped
    pub fn apply_image(&self, image: &Rgb32FImage) -> Rgb32FImage {
        let mut out = image.clone();
        for pixel in out.pixels_mut() {
            for (v, g) in pixel.0.iter_mut().zip(self.gains) {
                *v *= g;
            }
        }
        out
    }

    pub fn apply_swatches(&self, swatches: &[Swatch]) -> Vec<Swatch> {
        swatches
            .iter()
            .map(|s| Swatch {
                color: self.apply_color(s.color),
                ..s.clone()
            })
            .collect()
    }
}

/// Scale a linear image so that `measured` maps onto `reference`
pub fn white_balance(image: &Rgb32FImage, measured: LinSrgb, reference: LinSrgb) -> Result<Rgb32FImage> {
    Ok(WhiteBalance::from_anchor(measured, reference)?.apply_image(image))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::calibration::CardType;
    use approx::assert_relative_eq;
    use image::Rgb;

    fn swatch(index: usize, color: LinSrgb) -> Swatch {
        Swatch {
            index,
            color,
            centre: (0.0, 0.0),
            inferred: false,
        }
    }

    #[test]
    fn test_anchor_maps_onto_reference() {
        let measured = LinSrgb::new(0.30, 0.20, 0.10);
        let reference = LinSrgb::new(0.19, 0.18, 0.17);
        let balance = WhiteBalance::from_anchor(measured, reference).unwrap();
        let corrected = balance.apply_color(measured);
        assert_relative_eq!(corrected.red, reference.red, epsilon = 1e-6);
        assert_relative_eq!(corrected.green, reference.green, epsilon = 1e-6);
        assert_relative_eq!(corrected.blue, reference.blue, epsilon = 1e-6);
    }

    #[test]
    fn test_zero_channel_is_invalid_image() {
        let err = WhiteBalance::from_anchor(LinSrgb::new(0.2, 0.0, 0.2), LinSrgb::new(0.2, 0.2, 0.2)).unwrap_err();
        assert!(matches!(err, CalibrationError::InvalidImage { .. }));
    }

    #[test]
    fn test_image_gains() {
        let image = Rgb32FImage::from_pixel(4, 4, Rgb([0.5, 0.25, 0.1]));
        let balanced = white_balance(&image, LinSrgb::new(0.5, 0.25, 0.1), LinSrgb::new(0.2, 0.2, 0.2)).unwrap();
        let p = balanced.get_pixel(3, 3).0;
        assert_relative_eq!(p[0], 0.2, epsilon = 1e-6);
        assert_relative_eq!(p[1], 0.2, epsilon = 1e-6);
        assert_relative_eq!(p[2], 0.2, epsilon = 1e-6);
        // Input untouched
        assert_eq!(image.get_pixel(0, 0).0, [0.5, 0.25, 0.1]);
    }

    #[test]
    fn test_missing_anchor_falls_back_to_unit_gains() {
        let palette = CardType::Spyder24.palette();
        let swatches = vec![swatch(0, LinSrgb::new(0.02, 0.02, 0.02))];
        let balance = WhiteBalance::from_swatches(&swatches, palette, palette.neutral_index).unwrap();
        assert!(balance.is_identity());
    }

    #[test]
    fn test_swatch_anchor() {
        let palette = CardType::Spyder24.palette();
        let swatches = vec![swatch(2, LinSrgb::new(0.25, 0.2, 0.15))];
        let balance = WhiteBalance::from_swatches(&swatches, palette, 2).unwrap();
        let corrected = balance.apply_swatches(&swatches);
        assert_relative_eq!(corrected[0].color.green, palette.neutral().color.green, epsilon = 1e-6);
        assert_eq!(corrected[0].index, 2);

        assert!(WhiteBalance::from_swatches(&swatches, palette, 99).is_err());
    }
}
