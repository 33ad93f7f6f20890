//! Configuration structures for a calibration request.
//!
//! A request names the card, the correction method and the excluded
//! patches, plus tuning for the detector and the white balance step.
//!
//! # Configuration Loading
//!
//! Requests can be loaded from JSON files or built from the string
//! identifiers a caller receives:
//!
//! ```no_run
//! use checker_calibrate::CalibrationRequest;
//! use std::path::Path;
//!
//! // Load from file
//! let request = CalibrationRequest::from_json_file(Path::new("request.json"))?;
//!
//! // Or from identifiers
//! let request = CalibrationRequest::from_ids("spyder24", "cheung", &[3, 17])?;
//! # Ok::<(), checker_calibrate::CalibrationError>(())
//! ```
//!
//! Every field has a default, so a JSON file only needs the values it changes.

use std::collections::BTreeSet;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::calibration::{CardType, ColorExpansion, CorrectionMethod};
use crate::constants::{detection, performance};
use crate::{CalibrationError, Result};

/// Complete calibration request.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CalibrationRequest {
    /// Checker card in the photograph
    pub card: CardType,

    /// Correction method and its parameters
    pub method: CorrectionMethod,

    /// Patch indices left out of the fit and the report
    pub excluded: BTreeSet<usize>,

    /// Patch detector tuning
    pub detection: DetectionConfig,

    /// White balance settings
    pub white_balance: WhiteBalanceConfig,
}

/// Patch detector parameters.
///
/// Tolerances are in 8-bit display codes; area and distance thresholds are
/// relative to the patch size so they hold at any resolution.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DetectionConfig {
    /// Largest per-channel step between neighbouring pixels of one patch
    pub color_tolerance: u8,

    /// Largest |dx| + |dy| gradient for a pixel to count as flat
    pub gradient_tolerance: u16,

    /// Smallest region, in pixels, considered as a patch
    pub min_region_pixels: u32,

    /// Largest accepted long/short axis ratio of a patch
    pub max_patch_aspect: f64,

    /// Accepted range of the rectangular fill ratio
    pub fill_ratio_min: f64,
    pub fill_ratio_max: f64,

    /// Largest area ratio between patches of one card
    pub size_cluster_ratio: f64,

    /// Neighbour link distance in grid pitches
    pub neighbour_link_pitches: f64,

    /// Fraction of the patches that must be seen (0.0-1.0)
    pub min_detected_fraction: f64,

    /// Largest mean lattice residual in grid pitches
    pub max_residual_pitches: f64,

    /// Fixed sampling half-width in pixels; derived from the patch size
    /// when absent
    pub sample_radius: Option<u32>,

    /// Images above this many pixels are downscaled for segmentation
    pub max_detection_pixels: u32,
}

impl Default for DetectionConfig {
    fn default() -> Self {
        Self {
            color_tolerance: detection::COLOR_TOLERANCE,
            gradient_tolerance: detection::GRADIENT_TOLERANCE,
            min_region_pixels: detection::MIN_REGION_PIXELS,
            max_patch_aspect: detection::MAX_PATCH_ASPECT,
            fill_ratio_min: detection::FILL_RATIO_MIN,
            fill_ratio_max: detection::FILL_RATIO_MAX,
            size_cluster_ratio: detection::SIZE_CLUSTER_RATIO,
            neighbour_link_pitches: detection::NEIGHBOUR_LINK_PITCHES,
            min_detected_fraction: detection::MIN_DETECTED_FRACTION,
            max_residual_pitches: detection::MAX_RESIDUAL_PITCHES,
            sample_radius: None,
            max_detection_pixels: performance::MAX_DETECTION_PIXELS,
        }
    }
}

impl DetectionConfig {
    /// Check parameter ranges
    pub fn validate(&self) -> Result<()> {
        if self.max_patch_aspect < 1.0 {
            return Err(CalibrationError::invalid_config("max_patch_aspect", self.max_patch_aspect));
        }
        if !(self.fill_ratio_min > 0.0 && self.fill_ratio_min < self.fill_ratio_max) {
            return Err(CalibrationError::invalid_config(
                "fill_ratio",
                format!("{}..{}", self.fill_ratio_min, self.fill_ratio_max),
            ));
        }
        if self.size_cluster_ratio < 1.0 {
            return Err(CalibrationError::invalid_config("size_cluster_ratio", self.size_cluster_ratio));
        }
        if self.neighbour_link_pitches < 1.0 {
            return Err(CalibrationError::invalid_config(
                "neighbour_link_pitches",
                self.neighbour_link_pitches,
            ));
        }
        if !(self.min_detected_fraction > 0.0 && self.min_detected_fraction <= 1.0) {
            return Err(CalibrationError::invalid_config(
                "min_detected_fraction",
                self.min_detected_fraction,
            ));
        }
        if self.max_residual_pitches <= 0.0 {
            return Err(CalibrationError::invalid_config(
                "max_residual_pitches",
                self.max_residual_pitches,
            ));
        }
        if self.sample_radius == Some(0) {
            return Err(CalibrationError::invalid_config("sample_radius", 0));
        }
        if self.max_detection_pixels < 10_000 {
            return Err(CalibrationError::invalid_config(
                "max_detection_pixels",
                self.max_detection_pixels,
            ));
        }
        Ok(())
    }
}

/// White balance parameters.
///
/// When enabled, gains are computed on the anchor patch (the card's neutral
/// patch unless overridden) and applied before the regression.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WhiteBalanceConfig {
    /// Apply white balance before fitting
    pub enabled: bool,

    /// Patch index used as the neutral anchor
    pub anchor: Option<usize>,
}

impl Default for WhiteBalanceConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            anchor: None,
        }
    }
}

impl CalibrationRequest {
    /// Build a request from the string identifiers used at the API boundary
    ///
    /// Unknown card identifiers are an error; unknown algorithm identifiers
    /// fall back to `finlayson` with a warning.
    pub fn from_ids(card: &str, algorithm: &str, excluded: &[usize]) -> Result<Self> {
        let request = Self {
            card: card.parse()?,
            method: CorrectionMethod::from_id(algorithm),
            excluded: excluded.iter().copied().collect(),
            ..Self::default()
        };
        request.validate()?;
        Ok(request)
    }

    /// Check the request against the card before any image work
    pub fn validate(&self) -> Result<()> {
        let palette = self.card.palette();
        palette.validate_exclusions(&self.excluded)?;
        self.method.validate()?;
        self.detection.validate()?;
        if let Some(anchor) = self.white_balance.anchor {
            if anchor >= palette.len() {
                return Err(CalibrationError::invalid_config("white balance anchor", anchor));
            }
        }
        Ok(())
    }

    /// Patch index the white balance is anchored on
    pub fn anchor_index(&self) -> usize {
        self.white_balance
            .anchor
            .unwrap_or_else(|| self.card.palette().neutral_index)
    }

    /// Load a request from a JSON file
    pub fn from_json_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|source| CalibrationError::Io {
            path: path.display().to_string(),
            source,
        })?;
        serde_json::from_str(&content)
            .map_err(|e| CalibrationError::invalid_config(path.display().to_string(), e))
    }

    /// Save the request to a JSON file
    pub fn to_json_file(&self, path: &Path) -> Result<()> {
        let json = serde_json::to_string_pretty(self)
            .map_err(|e| CalibrationError::invalid_config("request", e))?;
        std::fs::write(path, json).map_err(|source| CalibrationError::Io {
            path: path.display().to_string(),
            source,
        })
    }
}
