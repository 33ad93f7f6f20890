use std::collections::BTreeSet;

use checker_calibrate::calibration::RootPolynomial;
use checker_calibrate::{
    calibrate, closest_name, fit_correction, CalibrationRequest, CardType, ColorSpace, CorrectionMethod,
    PatchDetector,
};
use criterion::{black_box, criterion_group, criterion_main, Criterion};
use image::{Rgb, RgbImage};

/// Axis-aligned SpyderCheckr 24 on a dark card over a grey background
fn checker_image() -> RgbImage {
    let palette = CardType::Spyder24.palette();
    let (side, gap, left, top) = (40u32, 10u32, 120u32, 100u32);
    RgbImage::from_fn(600, 400, |x, y| {
        let inside_card = (left - 15..left + 6 * (side + gap) + 5).contains(&x)
            && (top - 15..top + 4 * (side + gap) + 5).contains(&y);
        if !inside_card {
            return Rgb([110, 120, 100]);
        }
        if x >= left && y >= top {
            let (col, row) = ((x - left) / (side + gap), (y - top) / (side + gap));
            if col < 6 && row < 4 && (x - left) % (side + gap) < side && (y - top) % (side + gap) < side {
                return Rgb(palette.patches[(row * 6 + col) as usize].srgb8);
            }
        }
        Rgb([20, 20, 20])
    })
}

fn benchmark_detection(c: &mut Criterion) {
    let image = checker_image();
    let detector = PatchDetector::new();
    c.bench_function("detect_spyder24", |b| {
        b.iter(|| detector.detect(black_box(&image), 4, 6))
    });
}

fn benchmark_fit(c: &mut Criterion) {
    let image = checker_image();
    let detection = PatchDetector::new().detect(&image, 4, 6).expect("synthetic card is detectable");
    let reference = CardType::Spyder24.palette().colors();
    let excluded = BTreeSet::new();

    let mut group = c.benchmark_group("fit_correction");
    for degree in 1..=3u8 {
        let method = CorrectionMethod::Finlayson(RootPolynomial { degree });
        group.bench_function(format!("finlayson_{}", degree), |b| {
            b.iter(|| fit_correction(black_box(&detection.swatches), &reference, &excluded, &method))
        });
    }
    group.finish();
}

fn benchmark_pipeline(c: &mut Criterion) {
    let image = checker_image();
    let request = CalibrationRequest::default();
    c.bench_function("calibrate_spyder24", |b| b.iter(|| calibrate(black_box(&image), &request)));

    let linear = ColorSpace::decode_to_linear(&image).expect("non-empty image");
    c.bench_function("encode_from_linear", |b| {
        b.iter(|| ColorSpace::encode_from_linear(black_box(&linear)))
    });
}

fn benchmark_names(c: &mut Criterion) {
    c.bench_function("closest_name", |b| b.iter(|| closest_name(black_box([45.0, 98.0, 180.0]))));
}

criterion_group!(benches, benchmark_detection, benchmark_fit, benchmark_pipeline, benchmark_names);
criterion_main!(benches);
