//! Calibration quality report
//!
//! Joins the patches measured on the corrected image with the reference
//! palette by patch index and summarises the residual error. Values are on the
//! 8-bit display scale (0-255 floats), the scale the table is shown in.

use std::collections::{BTreeMap, BTreeSet};

use palette::LinSrgb;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::color::conversion::ColorSpace;
use crate::constants::quality::{IMPERCEPTIBLE_DELTA_E, POOR_PATCH_DELTA_E};
use crate::detection::Swatch;

/// One row of the comparison table
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ComparisonRecord {
    /// Patch index
    pub label: usize,
    pub r_source: f32,
    pub g_source: f32,
    pub b_source: f32,
    pub r_target: f32,
    pub g_target: f32,
    pub b_target: f32,
}

impl ComparisonRecord {
    fn new(label: usize, source: LinSrgb, target: LinSrgb) -> Self {
        let [r_source, g_source, b_source] = ColorSpace::encode_srgb8_f32(source);
        let [r_target, g_target, b_target] = ColorSpace::encode_srgb8_f32(target);
        Self {
            label,
            r_source,
            g_source,
            b_source,
            r_target,
            g_target,
            b_target,
        }
    }

    pub fn source(&self) -> [f32; 3] {
        [self.r_source, self.g_source, self.b_source]
    }

    pub fn target(&self) -> [f32; 3] {
        [self.r_target, self.g_target, self.b_target]
    }

    /// CIEDE2000 between source and target
    pub fn delta_e(&self) -> f32 {
        ColorSpace::perceptual_distance_srgb8(self.source(), self.target())
    }
}

/// Source/target comparison, one record per patch present on both sides
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ComparisonTable {
    /// Records in ascending label order
    pub records: Vec<ComparisonRecord>,
    /// Reference indices with no measured patch
    pub missing_in_source: Vec<usize>,
    /// Measured patch indices with no reference entry
    pub missing_in_reference: Vec<usize>,
}

/// Aggregate error statistics of a comparison table
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QualitySummary {
    pub patch_count: usize,
    pub mean_delta_e: f32,
    pub median_delta_e: f32,
    pub max_delta_e: f32,
    /// Label of the patch with the largest ΔE00
    pub worst_label: usize,
    /// Root mean square source-target difference per channel (0-255)
    pub rms: [f32; 3],
    /// Patches below the just-noticeable difference
    pub imperceptible_count: usize,
    /// Labels of patches above the poor-correction threshold
    pub poor_labels: Vec<usize>,
}

/// One point of a parity plot
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ParityPoint {
    pub source: f32,
    pub target: f32,
    pub label: usize,
}

/// Per-channel parity plot data
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ParitySeries {
    pub red: Vec<ParityPoint>,
    pub green: Vec<ParityPoint>,
    pub blue: Vec<ParityPoint>,
}

impl ComparisonTable {
    /// Join corrected swatches with `reference[index]` by patch index
    pub fn build(corrected: &[Swatch], reference: &[LinSrgb]) -> Self {
        Self::build_excluding(corrected, reference, &BTreeSet::new())
    }

    /// Join by patch index after removing `excluded` from both sides
    ///
    /// Excluded patches are not reported as missing.
    pub fn build_excluding(corrected: &[Swatch], reference: &[LinSrgb], excluded: &BTreeSet<usize>) -> Self {
        let measured: BTreeMap<usize, LinSrgb> = corrected
            .iter()
            .filter(|s| !excluded.contains(&s.index))
            .map(|s| (s.index, s.color))
            .collect();

        let mut table = Self::default();
        for (index, &target) in reference.iter().enumerate() {
            if excluded.contains(&index) {
                continue;
            }
            match measured.get(&index) {
                Some(&source) => table.records.push(ComparisonRecord::new(index, source, target)),
                None => table.missing_in_source.push(index),
            }
        }
        table.missing_in_reference = measured.keys().copied().filter(|&i| i >= reference.len()).collect();
        table
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Patches present on only one side of the join
    pub fn dropped_count(&self) -> usize {
        self.missing_in_source.len() + self.missing_in_reference.len()
    }

    pub fn labels(&self) -> Vec<usize> {
        self.records.iter().map(|r| r.label).collect()
    }

    /// Error statistics, `None` for an empty table
    pub fn summary(&self) -> Option<QualitySummary> {
        if self.records.is_empty() {
            return None;
        }

        let deltas: Vec<(usize, f32)> = self.records.iter().map(|r| (r.label, r.delta_e())).collect();
        let n = deltas.len();
        let mean_delta_e = deltas.iter().map(|d| d.1).sum::<f32>() / n as f32;

        let mut sorted: Vec<f32> = deltas.iter().map(|d| d.1).collect();
        sorted.sort_by(f32::total_cmp);
        let median_delta_e = if n % 2 == 1 {
            sorted[n / 2]
        } else {
            0.5 * (sorted[n / 2 - 1] + sorted[n / 2])
        };

        let (worst_label, max_delta_e) = deltas
            .iter()
            .copied()
            .fold((deltas[0].0, f32::NEG_INFINITY), |best, d| if d.1 > best.1 { d } else { best });

        let mut rms = [0.0f32; 3];
        for record in &self.records {
            let (s, t) = (record.source(), record.target());
            for c in 0..3 {
                rms[c] += (s[c] - t[c]).powi(2);
            }
        }
        let rms = rms.map(|v| (v / n as f32).sqrt());

        Some(QualitySummary {
            patch_count: n,
            mean_delta_e,
            median_delta_e,
            max_delta_e,
            worst_label,
            rms,
            imperceptible_count: deltas.iter().filter(|d| d.1 < IMPERCEPTIBLE_DELTA_E).count(),
            poor_labels: deltas
                .iter()
                .filter(|d| d.1 > POOR_PATCH_DELTA_E)
                .map(|d| d.0)
                .collect(),
        })
    }

    /// Source against target per channel, for parity plots
    pub fn parity_series(&self) -> ParitySeries {
        let channel = |c: usize| {
            self.records
                .iter()
                .map(|r| ParityPoint {
                    source: r.source()[c],
                    target: r.target()[c],
                    label: r.label,
                })
                .collect()
        };
        ParitySeries {
            red: channel(0),
            green: channel(1),
            blue: channel(2),
        }
    }

    /// Row-oriented JSON: one object per record with the columns
    /// `label, r_source, g_source, b_source, r_target, g_target, b_target`
    pub fn to_json_rows(&self) -> Value {
        Value::Array(
            self.records
                .iter()
                .map(|r| {
                    json!({
                        "label": r.label,
                        "r_source": r.r_source,
                        "g_source": r.g_source,
                        "b_source": r.b_source,
                        "r_target": r.r_target,
                        "g_target": r.g_target,
                        "b_target": r.b_target,
                    })
                })
                .collect(),
        )
    }
}
