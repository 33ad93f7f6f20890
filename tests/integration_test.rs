//! Integration tests for the complete calibration pipeline
//!
//! These tests drive `calibrate` and its stages on synthetic photographs of
//! a SpyderCheckr 24 (see `common/mod.rs`):
//! - Detection order, orientation and tolerance to clutter and occlusion
//! - Correction fit and application on a known camera matrix
//! - Exclusions, white balance anchoring and underdetermined fits
//! - Request files and the named-color entry point

mod common;

use std::collections::BTreeSet;

use approx::assert_relative_eq;
use checker_calibrate::calibration::Vandermonde;
use checker_calibrate::orientation::rotate_quarter_cw;
use checker_calibrate::{
    calibrate, closest_name, fit_correction, CalibrationError, CalibrationRequest, CardType, ColorSpace,
    CorrectionMethod, PatchDetector,
};
use common::{scene_without_card, SyntheticCard};

fn request(algorithm: &str, excluded: &[usize]) -> CalibrationRequest {
    CalibrationRequest::from_ids("spyder24", algorithm, excluded).unwrap()
}

// ============================================================================
// Detection
// ============================================================================

#[test]
fn test_detects_all_patches_in_canonical_order() {
    let card = SyntheticCard::default();
    let detection = PatchDetector::new().detect(&card.render(), 4, 6).unwrap();

    assert_eq!(detection.swatches.len(), 24);
    assert_eq!(detection.inferred_count(), 0);
    for swatch in &detection.swatches {
        let (ex, ey) = card.patch_centre(swatch.index);
        assert!(
            (swatch.centre.0 - ex).abs() < 2.0 && (swatch.centre.1 - ey).abs() < 2.0,
            "patch {} at {:?}, expected ({:.1}, {:.1})",
            swatch.index,
            swatch.centre,
            ex,
            ey
        );
        let expected = card.recorded_color(swatch.index);
        assert_relative_eq!(swatch.color.green, expected.green, epsilon = 0.01);
    }
}

#[test]
fn test_quarter_turn_keeps_patch_order() {
    let card = SyntheticCard::default();
    let upright = PatchDetector::new().detect(&card.render(), 4, 6).unwrap();
    let turned = PatchDetector::new().detect(&rotate_quarter_cw(&card.render()), 4, 6).unwrap();

    assert_eq!(turned.swatches.len(), 24);
    for (a, b) in upright.swatches.iter().zip(&turned.swatches) {
        assert_eq!(a.index, b.index);
        assert!(ColorSpace::perceptual_distance(a.color, b.color) < 0.5);
    }
}

#[test]
fn test_clutter_and_uneven_light() {
    let card = SyntheticCard {
        angle_deg: -3.0,
        falloff: 0.25,
        clutter: true,
        ..SyntheticCard::default()
    };
    let detection = PatchDetector::new().detect(&card.render(), 4, 6).unwrap();
    assert_eq!(detection.swatches.len(), 24);
    let (ex, ey) = card.patch_centre(0);
    assert!((detection.swatches[0].centre.0 - ex).abs() < 2.0);
    assert!((detection.swatches[0].centre.1 - ey).abs() < 2.0);
}

#[test]
fn test_occluded_patch_is_inferred_from_grid() {
    let card = SyntheticCard {
        occluded: Some(10),
        ..SyntheticCard::default()
    };
    let detection = PatchDetector::new().detect(&card.render(), 4, 6).unwrap();
    assert_eq!(detection.swatches.len(), 24);
    assert_eq!(detection.inferred_count(), 1);
    assert!(detection.get(10).unwrap().inferred);
}

#[test]
fn test_no_card_is_card_not_found() {
    let err = PatchDetector::new().detect(&scene_without_card(), 4, 6).unwrap_err();
    assert!(matches!(err, CalibrationError::CardNotFound { .. }), "got {:?}", err);

    let err = calibrate(&scene_without_card(), &request("finlayson", &[])).unwrap_err();
    assert!(matches!(err, CalibrationError::CardNotFound { .. }));
}

// ============================================================================
// Calibration
// ============================================================================

#[test]
fn test_linear_camera_is_corrected() {
    let outcome = calibrate(&SyntheticCard::default().render(), &request("finlayson", &[])).unwrap();

    assert_eq!(outcome.table.len(), 24);
    assert_eq!(outcome.table.dropped_count(), 0);
    let summary = outcome.table.summary().unwrap();
    assert!(summary.mean_delta_e < 1.0, "mean ΔE00 {}", summary.mean_delta_e);
    assert_eq!(outcome.model.fitted_indices().len(), 24);
}

#[test]
fn test_polynomial_methods_fit_the_card() {
    let image = SyntheticCard::default().render();
    for algorithm in ["cheung", "vandermonde"] {
        let outcome = calibrate(&image, &request(algorithm, &[])).unwrap();
        let summary = outcome.table.summary().unwrap();
        assert!(summary.mean_delta_e < 1.5, "{}: mean ΔE00 {}", algorithm, summary.mean_delta_e);
    }
}

#[test]
fn test_exclusions_leave_22_rows() {
    let outcome = calibrate(&SyntheticCard::default().render(), &request("finlayson", &[3, 17])).unwrap();

    assert_eq!(outcome.table.len(), 22);
    let labels = outcome.table.labels();
    assert!(!labels.contains(&3) && !labels.contains(&17));
    assert!(!outcome.model.fitted_indices().contains(&3));
    assert!(!outcome.model.fitted_indices().contains(&17));
    assert_eq!(outcome.table.dropped_count(), 0);

    let rows = outcome.table.to_json_rows();
    assert_eq!(rows.as_array().unwrap().len(), 22);
}

#[test]
fn test_white_balance_anchors_neutral_patch() {
    let outcome = calibrate(&SyntheticCard::default().render(), &request("finlayson", &[])).unwrap();
    let palette = CardType::Spyder24.palette();

    let measured = outcome.detection.get(palette.neutral_index).unwrap().color;
    let balanced = outcome.white_balance.apply_color(measured);
    let target = palette.neutral().color;
    assert_relative_eq!(balanced.red, target.red, epsilon = 1e-4);
    assert_relative_eq!(balanced.green, target.green, epsilon = 1e-4);
    assert_relative_eq!(balanced.blue, target.blue, epsilon = 1e-4);
}

#[test]
fn test_white_balance_can_be_disabled() {
    let mut request = request("finlayson", &[]);
    request.white_balance.enabled = false;
    let outcome = calibrate(&SyntheticCard::default().render(), &request).unwrap();
    assert!(outcome.white_balance.is_identity());
    assert!(outcome.table.summary().unwrap().mean_delta_e < 1.0);
}

#[test]
fn test_underdetermined_fit_is_rejected() {
    // Vandermonde degree 6 has 19 terms; 18 patches remain
    let excluded: Vec<usize> = (18..24).collect();
    let mut request = request("vandermonde", &excluded);
    request.method = CorrectionMethod::Vandermonde(Vandermonde { degree: 6 });

    let err = calibrate(&SyntheticCard::default().render(), &request).unwrap_err();
    match err {
        CalibrationError::InsufficientSamples { required, available, .. } => {
            assert_eq!(required, 19);
            assert_eq!(available, 18);
        }
        other => panic!("expected InsufficientSamples, got {:?}", other),
    }
}

#[test]
fn test_fit_from_detection_directly() {
    let card = SyntheticCard::default();
    let detection = PatchDetector::new().detect(&card.render(), 4, 6).unwrap();
    let reference = CardType::Spyder24.palette().colors();
    let model = fit_correction(
        &detection.swatches,
        &reference,
        &BTreeSet::from([0, 5]),
        &CorrectionMethod::default(),
    )
    .unwrap();

    assert_eq!(model.fitted_indices().len(), 22);
    let corrected = model.apply_color(card.recorded_color(12));
    assert!(ColorSpace::perceptual_distance(corrected, reference[12]) < 1.5);
}

#[test]
fn test_input_image_is_untouched() {
    let image = SyntheticCard::default().render();
    let before = image.clone();
    let outcome = calibrate(&image, &request("cheung", &[])).unwrap();
    assert_eq!(image, before);
    assert_eq!(outcome.image.dimensions(), image.dimensions());
    assert_ne!(outcome.image, image);
}

// ============================================================================
// Configuration and secondary entry points
// ============================================================================

#[test]
fn test_request_file_drives_calibration() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("request.json");
    request("vandermonde", &[7]).to_json_file(&path).unwrap();

    let loaded = CalibrationRequest::from_json_file(&path).unwrap();
    assert_eq!(loaded.excluded, BTreeSet::from([7]));
    let outcome = calibrate(&SyntheticCard::default().render(), &loaded).unwrap();
    assert_eq!(outcome.table.len(), 23);
}

#[test]
fn test_unknown_card_fails_fast() {
    let err = CalibrationRequest::from_ids("colorchecker24", "finlayson", &[]).unwrap_err();
    assert!(matches!(err, CalibrationError::InvalidConfiguration { .. }));
}

#[test]
fn test_named_color_extremes() {
    assert_eq!(closest_name([0.0, 0.0, 0.0]), Some("black"));
    assert_eq!(closest_name([255.0, 255.0, 255.0]), Some("white"));
}
