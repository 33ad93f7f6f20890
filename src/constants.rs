//! Calibration constants and default tuning values
//!
//! Defaults for the detector, the solver and the quality report live here so
//! that `config.rs` and the algorithm modules agree on a single value.

/// Patch segmentation and grid fitting
pub mod detection {
    /// Maximum per-channel difference (8-bit codes) between neighbouring
    /// pixels of the same flat region
    pub const COLOR_TOLERANCE: u8 = 6;

    /// Maximum central-difference gradient (8-bit codes, |dx| + |dy|) for a
    /// pixel to count as flat
    pub const GRADIENT_TOLERANCE: u16 = 14;

    /// Smallest region, in pixels, that can be a patch
    pub const MIN_REGION_PIXELS: u32 = 16;

    /// Largest accepted aspect ratio of a patch region
    pub const MAX_PATCH_ASPECT: f64 = 1.6;

    /// Accepted range of area / (12 * sqrt(det covariance)); 1.0 for a solid rectangle
    pub const FILL_RATIO_MIN: f64 = 0.8;
    pub const FILL_RATIO_MAX: f64 = 1.15;

    /// Largest area ratio inside one cluster of same-size patches
    pub const SIZE_CLUSTER_RATIO: f64 = 1.8;

    /// Neighbour link distance, in grid pitches, when grouping patches
    pub const NEIGHBOUR_LINK_PITCHES: f64 = 1.6;

    /// Fraction of the grid that must be seen as real regions
    pub const MIN_DETECTED_FRACTION: f64 = 0.5;

    /// Largest mean lattice residual, in grid pitches
    pub const MAX_RESIDUAL_PITCHES: f64 = 0.2;

    /// Sampling half-width as a fraction of the patch side
    pub const SAMPLE_RADIUS_FRACTION: f64 = 0.25;
}

/// Least-squares fitting
pub mod fitting {
    /// Relative singular value threshold for rank and solve
    pub const SVD_EPSILON: f64 = 1e-10;
}

/// Quality thresholds for reports
pub mod quality {
    /// ΔE00 below which a patch difference is imperceptible
    pub const IMPERCEPTIBLE_DELTA_E: f32 = 1.0;

    /// ΔE00 above which a patch is flagged as poorly corrected
    pub const POOR_PATCH_DELTA_E: f32 = 5.0;
}

/// Performance limits
pub mod performance {
    /// Images above this pixel count are downscaled for segmentation
    pub const MAX_DETECTION_PIXELS: u32 = 4_000_000;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fill_ratio_brackets_solid_rectangle() {
        assert!(detection::FILL_RATIO_MIN < 1.0);
        assert!(detection::FILL_RATIO_MAX > 1.0);
    }

    #[test]
    fn test_threshold_ranges() {
        assert!(quality::IMPERCEPTIBLE_DELTA_E < quality::POOR_PATCH_DELTA_E);
        assert!(detection::MIN_DETECTED_FRACTION > 0.0 && detection::MIN_DETECTED_FRACTION <= 1.0);
        assert!(detection::SAMPLE_RADIUS_FRACTION < 0.5);
    }
}
