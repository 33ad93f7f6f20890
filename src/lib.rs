//! # Checker Calibrate
//!
//! A Rust crate for calibrating the colors of a photograph against a
//! color-checker card photographed in the same scene.
//!
//! This library provides color correction by:
//! - Detecting the card's patch grid and sampling every patch in a fixed order
//! - Anchoring a one-point white balance on the card's neutral patch
//! - Fitting a linear or polynomial correction onto the certified colors
//! - Reporting per-patch CIEDE2000 error of the corrected image
//!
//! All operations are synchronous and stateless; the reference palettes and
//! the named-color table are the only shared data and are read-only.
//!
//! ## Example
//!
//! ```rust,no_run
//! use checker_calibrate::{calibrate, image_loader, CalibrationRequest};
//! use std::path::Path;
//!
//! let image = image_loader::load_image(Path::new("checker.jpg"))?;
//! let request = CalibrationRequest::from_ids("spyder24", "finlayson", &[])?;
//! let outcome = calibrate(&image, &request)?;
//! if let Some(summary) = outcome.table.summary() {
//!     println!("mean ΔE00 {:.2}", summary.mean_delta_e);
//! }
//! # Ok::<(), checker_calibrate::CalibrationError>(())
//! ```

use image::RgbImage;
use tracing::{info, instrument, warn};

pub mod calibration;
pub mod color;
pub mod config;
pub mod constants;
pub mod detection;
pub mod error;
pub mod image_loader;
pub mod orientation;
pub mod report;

pub use calibration::{fit_correction, white_balance, CardType, CorrectionMethod, CorrectionModel, WhiteBalance};
pub use color::{closest_name, get_average_color, ColorSpace, Region, RegionSample};
pub use config::{CalibrationRequest, DetectionConfig, WhiteBalanceConfig};
pub use detection::{sample_grid, Detection, PatchDetector, Swatch};
pub use error::{CalibrationError, Result};
pub use report::{ComparisonRecord, ComparisonTable, ParitySeries, QualitySummary};

/// Everything a calibration request produces
#[derive(Debug, Clone)]
pub struct CalibrationOutcome {
    /// Corrected image, display-encoded like the input
    pub image: RgbImage,
    /// Corrected patches against the reference, by patch index
    pub table: ComparisonTable,
    pub model: CorrectionModel,
    /// Gains applied before the fit; unit gains when disabled
    pub white_balance: WhiteBalance,
    /// Patches measured on the input image
    pub detection: Detection,
}

/// Calibrate a photograph of a checker card
///
/// The input image is not modified; the corrected image is a new buffer.
///
/// # Arguments
///
/// * `image` - Display-encoded photograph containing the whole card
/// * `request` - Card type, correction method, exclusions and tuning
///
/// # Errors
///
/// Returns `CalibrationError` if:
/// - The request is invalid (`InvalidConfiguration`), checked before any
///   image work
/// - The card is not found (`CardNotFound`)
/// - The white balance anchor is unusable (`InvalidImage`)
/// - Too few patches remain for the method (`InsufficientSamples`)
#[instrument(skip(image, request), fields(card = %request.card, method = %request.method))]
pub fn calibrate(image: &RgbImage, request: &CalibrationRequest) -> Result<CalibrationOutcome> {
    // Step 1: Fail fast on the request
    request.validate()?;
    let palette = request.card.palette();
    let reference = palette.colors();

    // Step 2: Locate the card and sample the linear image
    let linear = ColorSpace::decode_to_linear(image)?;
    let detector = PatchDetector::with_config(request.detection.clone());
    let geometry = detector.locate(image, palette.rows, palette.cols)?;
    let detection = Detection {
        swatches: sample_grid(&linear, &geometry),
        geometry,
    };

    // Step 3: White balance on the anchor patch
    let balance = if request.white_balance.enabled {
        WhiteBalance::from_swatches(&detection.swatches, palette, request.anchor_index())?
    } else {
        WhiteBalance::identity()
    };
    let balanced_image = balance.apply_image(&linear);
    let balanced = balance.apply_swatches(&detection.swatches);

    // Step 4: Fit and apply the correction
    let model = fit_correction(&balanced, &reference, &request.excluded, &request.method)?;
    let corrected_linear = model.apply(&balanced_image);
    let corrected = ColorSpace::encode_from_linear(&corrected_linear)?;

    // Step 5: Re-measure the delivered image at the same geometry
    let remeasured = sample_grid(&ColorSpace::decode_to_linear(&corrected)?, &detection.geometry);
    let table = ComparisonTable::build_excluding(&remeasured, &reference, &request.excluded);

    if table.dropped_count() > 0 {
        warn!(
            missing_in_source = ?table.missing_in_source,
            missing_in_reference = ?table.missing_in_reference,
            "patches dropped from the comparison"
        );
    }
    if let Some(summary) = table.summary() {
        info!(
            patches = summary.patch_count,
            mean_delta_e = summary.mean_delta_e,
            max_delta_e = summary.max_delta_e,
            worst = summary.worst_label,
            "calibration complete"
        );
    }

    Ok(CalibrationOutcome {
        image: corrected,
        table,
        model,
        white_balance: balance,
        detection,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgb;

    #[test]
    fn test_bad_exclusion_fails_before_detection() {
        // A blank image would be CardNotFound; the request error must win
        let image = RgbImage::from_pixel(64, 64, Rgb([128, 128, 128]));
        let mut request = CalibrationRequest::default();
        request.excluded.insert(40);
        let err = calibrate(&image, &request).unwrap_err();
        assert!(matches!(err, CalibrationError::InvalidConfiguration { .. }));
    }

    #[test]
    fn test_blank_image_is_card_not_found() {
        let image = RgbImage::from_pixel(200, 150, Rgb([128, 128, 128]));
        let err = calibrate(&image, &CalibrationRequest::default()).unwrap_err();
        assert!(matches!(err, CalibrationError::CardNotFound { .. }));
    }
}
