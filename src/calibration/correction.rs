//! Color correction fitting
//!
//! A correction expands each linear RGB sample into a vector of terms and
//! maps it to linear reference RGB with a `terms x 3` matrix fitted by least
//! squares over the paired checker patches.
//!
//! Three expansions are available:
//! - `finlayson`: root-polynomial (Finlayson, Mackiewicz & Hurlbert 2015),
//!   exposure invariant, degree 1 to 4
//! - `cheung`: polynomial with a chosen number of terms (Cheung et al. 2004)
//! - `vandermonde`: per-channel powers plus one constant

use std::collections::BTreeSet;
use std::fmt;

use enum_dispatch::enum_dispatch;
use image::Rgb32FImage;
use nalgebra::DMatrix;
use palette::LinSrgb;
use serde::{Deserialize, Deserializer, Serialize};
use tracing::{debug, warn};

use crate::color::conversion::clip;
use crate::constants::fitting::SVD_EPSILON;
use crate::detection::Swatch;
use crate::{CalibrationError, Result};

/// Correction method, selected by the `algorithm` identifier
///
/// Deserializing an unknown `algorithm` falls back to the default method,
/// the same as [`from_id`](CorrectionMethod::from_id).
#[enum_dispatch]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "algorithm", rename_all = "lowercase")]
pub enum CorrectionMethod {
    Finlayson(RootPolynomial),
    Cheung(Polynomial),
    Vandermonde(Vandermonde),
}

/// Term expansion of a linear RGB sample
#[enum_dispatch(CorrectionMethod)]
pub trait ColorExpansion {
    /// Identifier at the string boundary
    fn id(&self) -> &'static str;

    /// Number of terms produced by [`expand`](ColorExpansion::expand)
    fn term_count(&self) -> usize;

    /// Append the terms for `rgb` to `out`
    fn expand(&self, rgb: [f64; 3], out: &mut Vec<f64>);

    fn validate(&self) -> Result<()>;
}

impl Default for CorrectionMethod {
    fn default() -> Self {
        CorrectionMethod::Finlayson(RootPolynomial::default())
    }
}

impl CorrectionMethod {
    /// Method for an algorithm identifier, with default parameters
    ///
    /// Unknown identifiers fall back to `finlayson` and log a warning.
    pub fn from_id(id: &str) -> Self {
        Self::known(id).unwrap_or_else(|| {
            warn!(algorithm = id, "unknown correction method, falling back to finlayson");
            CorrectionMethod::default()
        })
    }

    fn known(id: &str) -> Option<Self> {
        match id.trim().to_ascii_lowercase().as_str() {
            "finlayson" => Some(CorrectionMethod::Finlayson(RootPolynomial::default())),
            "cheung" => Some(CorrectionMethod::Cheung(Polynomial::default())),
            "vandermonde" => Some(CorrectionMethod::Vandermonde(Vandermonde::default())),
            _ => None,
        }
    }

    /// Descriptive name with the publication it follows
    pub fn display_name(&self) -> &'static str {
        match self {
            CorrectionMethod::Finlayson(_) => "Finlayson 2015",
            CorrectionMethod::Cheung(_) => "Cheung 2004",
            CorrectionMethod::Vandermonde(_) => "Vandermonde",
        }
    }
}

/// Flat form of a serialized method; parameters absent from it keep their
/// defaults
#[derive(Deserialize)]
struct MethodFields {
    algorithm: Option<String>,
    degree: Option<u8>,
    terms: Option<usize>,
}

impl<'de> Deserialize<'de> for CorrectionMethod {
    fn deserialize<D>(deserializer: D) -> std::result::Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let fields = MethodFields::deserialize(deserializer)?;
        let id = fields.algorithm.as_deref().unwrap_or("finlayson");
        let Some(method) = Self::known(id) else {
            // Parameters of an unknown method mean nothing to the fallback
            return Ok(Self::from_id(id));
        };

        Ok(match method {
            CorrectionMethod::Finlayson(p) => CorrectionMethod::Finlayson(RootPolynomial {
                degree: fields.degree.unwrap_or(p.degree),
            }),
            CorrectionMethod::Cheung(p) => CorrectionMethod::Cheung(Polynomial {
                terms: fields.terms.unwrap_or(p.terms),
            }),
            CorrectionMethod::Vandermonde(p) => CorrectionMethod::Vandermonde(Vandermonde {
                degree: fields.degree.unwrap_or(p.degree),
            }),
        })
    }
}

impl fmt::Display for CorrectionMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({} terms)", self.id(), self.term_count())
    }
}

/// Root-polynomial expansion; every term has total degree one
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RootPolynomial {
    pub degree: u8,
}

impl Default for RootPolynomial {
    fn default() -> Self {
        Self { degree: 1 }
    }
}

impl ColorExpansion for RootPolynomial {
    fn id(&self) -> &'static str {
        "finlayson"
    }

    fn term_count(&self) -> usize {
        match self.degree {
            1 => 3,
            2 => 6,
            3 => 13,
            _ => 22,
        }
    }

    fn expand(&self, rgb: [f64; 3], out: &mut Vec<f64>) {
        let [r, g, b] = rgb.map(|v| v.max(0.0));
        out.extend([r, g, b]);
        if self.degree >= 2 {
            out.extend([(r * g).sqrt(), (g * b).sqrt(), (r * b).sqrt()]);
        }
        if self.degree >= 3 {
            out.extend(
                [
                    r * g * g,
                    g * b * b,
                    r * b * b,
                    g * r * r,
                    b * g * g,
                    b * r * r,
                    r * g * b,
                ]
                .map(f64::cbrt),
            );
        }
        if self.degree >= 4 {
            out.extend(
                [
                    r * r * r * g,
                    r * r * r * b,
                    g * g * g * r,
                    g * g * g * b,
                    b * b * b * r,
                    b * b * b * g,
                    r * r * g * b,
                    g * g * r * b,
                    b * b * r * g,
                ]
                .map(|v| v.sqrt().sqrt()),
            );
        }
    }

    fn validate(&self) -> Result<()> {
        if (1..=4).contains(&self.degree) {
            Ok(())
        } else {
            Err(CalibrationError::invalid_config("finlayson degree", self.degree))
        }
    }
}

/// Polynomial expansion with a fixed number of terms
///
/// Term sets follow Cheung et al. (2004) as tabulated by the `colour`
/// library's `matrix_augmented_Cheung2004`; 16 and up add the mixed cubic
/// terms, 22 adds `R²GB`, `RG²B` and `RGB²`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Polynomial {
    pub terms: usize,
}

impl Polynomial {
    /// Supported term counts
    pub const TERM_COUNTS: [usize; 12] = [3, 5, 7, 8, 10, 11, 14, 16, 17, 19, 20, 22];
}

impl Default for Polynomial {
    fn default() -> Self {
        Self { terms: 3 }
    }
}

impl ColorExpansion for Polynomial {
    fn id(&self) -> &'static str {
        "cheung"
    }

    fn term_count(&self) -> usize {
        self.terms
    }

    fn expand(&self, rgb: [f64; 3], out: &mut Vec<f64>) {
        let [r, g, b] = rgb;
        let linear = [r, g, b];
        let cross = [r * g, r * b, g * b];
        let squares = [r * r, g * g, b * b];
        let cubes = [r * r * r, g * g * g, b * b * b];
        let mixed_a = [r * r * g, g * g * b, b * b * r];
        let mixed_b = [r * r * b, g * g * r, b * b * g];

        out.extend(linear);
        match self.terms {
            5 => out.extend([r * g * b, 1.0]),
            7 => out.extend(cross.into_iter().chain([1.0])),
            8 => out.extend(cross.into_iter().chain([r * g * b, 1.0])),
            10 => out.extend(cross.into_iter().chain(squares).chain([1.0])),
            11 => out.extend(cross.into_iter().chain(squares).chain([r * g * b, 1.0])),
            14 => out.extend(cross.into_iter().chain(squares).chain([r * g * b]).chain(cubes).chain([1.0])),
            16 | 17 => {
                out.extend(cross.into_iter().chain(squares).chain([r * g * b]).chain(mixed_a).chain(cubes));
                if self.terms == 17 {
                    out.push(1.0);
                }
            }
            19 | 20 | 22 => {
                out.extend(
                    cross
                        .into_iter()
                        .chain(squares)
                        .chain([r * g * b])
                        .chain(mixed_a)
                        .chain(mixed_b)
                        .chain(cubes),
                );
                match self.terms {
                    20 => out.push(1.0),
                    22 => out.extend([r * r * g * b, r * g * g * b, r * g * b * b]),
                    _ => {}
                }
            }
            _ => {}
        }
    }

    fn validate(&self) -> Result<()> {
        if Self::TERM_COUNTS.contains(&self.terms) {
            Ok(())
        } else {
            Err(CalibrationError::invalid_config("cheung terms", self.terms))
        }
    }
}

/// Per-channel powers `c^degree .. c` plus a single constant
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Vandermonde {
    pub degree: u8,
}

impl Default for Vandermonde {
    fn default() -> Self {
        Self { degree: 1 }
    }
}

impl ColorExpansion for Vandermonde {
    fn id(&self) -> &'static str {
        "vandermonde"
    }

    fn term_count(&self) -> usize {
        3 * self.degree as usize + 1
    }

    fn expand(&self, rgb: [f64; 3], out: &mut Vec<f64>) {
        for v in rgb {
            out.extend((1..=self.degree as i32).rev().map(|p| v.powi(p)));
        }
        out.push(1.0);
    }

    fn validate(&self) -> Result<()> {
        if (1..=6).contains(&self.degree) {
            Ok(())
        } else {
            Err(CalibrationError::invalid_config("vandermonde degree", self.degree))
        }
    }
}

/// Source and reference colors paired by patch index, exclusions removed
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FitInput {
    /// Patch index of every pair, ascending
    pub indices: Vec<usize>,
    pub source: Vec<LinSrgb>,
    pub reference: Vec<LinSrgb>,
}

impl FitInput {
    /// Pair swatches with `reference[index]`, dropping excluded indices from
    /// both sides and swatches without a reference entry
    pub fn paired(detected: &[Swatch], reference: &[LinSrgb], excluded: &BTreeSet<usize>) -> Self {
        let mut pairs: Vec<(usize, LinSrgb, LinSrgb)> = detected
            .iter()
            .filter(|s| !excluded.contains(&s.index))
            .filter_map(|s| reference.get(s.index).map(|&r| (s.index, s.color, r)))
            .collect();
        pairs.sort_by_key(|p| p.0);
        pairs.dedup_by_key(|p| p.0);

        let mut input = Self::default();
        for (index, source, target) in pairs {
            input.indices.push(index);
            input.source.push(source);
            input.reference.push(target);
        }
        input
    }

    pub fn len(&self) -> usize {
        self.indices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.indices.is_empty()
    }
}

fn to_f64(color: LinSrgb) -> [f64; 3] {
    [color.red as f64, color.green as f64, color.blue as f64]
}

/// A fitted correction, consumed by [`apply`](CorrectionModel::apply)
#[derive(Debug, Clone, PartialEq)]
pub struct CorrectionModel {
    method: CorrectionMethod,
    /// `terms x 3` matrix mapping expanded source to linear reference
    coefficients: DMatrix<f64>,
    fitted_indices: Vec<usize>,
    residual_rms: f64,
}

impl CorrectionModel {
    pub fn method(&self) -> CorrectionMethod {
        self.method
    }

    pub fn coefficients(&self) -> &DMatrix<f64> {
        &self.coefficients
    }

    /// Patch indices the model was fitted on
    pub fn fitted_indices(&self) -> &[usize] {
        &self.fitted_indices
    }

    /// Root mean square fit error over all channels, in linear units
    pub fn residual_rms(&self) -> f64 {
        self.residual_rms
    }

    fn map_expanded(&self, terms: &[f64]) -> [f64; 3] {
        let mut out = [0.0; 3];
        for (t, &x) in terms.iter().enumerate() {
            for (c, slot) in out.iter_mut().enumerate() {
                *slot += x * self.coefficients[(t, c)];
            }
        }
        out
    }

    /// Corrected color, without clipping
    pub fn predict(&self, color: LinSrgb) -> LinSrgb {
        let mut terms = Vec::with_capacity(self.coefficients.nrows());
        self.method.expand(to_f64(color), &mut terms);
        let [r, g, b] = self.map_expanded(&terms);
        LinSrgb::new(r as f32, g as f32, b as f32)
    }

    /// Corrected color, clipped to [0, 1]
    pub fn apply_color(&self, color: LinSrgb) -> LinSrgb {
        clip(self.predict(color))
    }

    /// Correct every pixel of a linear image; results are clipped to [0, 1]
    pub fn apply(&self, image: &Rgb32FImage) -> Rgb32FImage {
        let mut out = image.clone();
        let mut terms = Vec::with_capacity(self.coefficients.nrows());
        for pixel in out.pixels_mut() {
            let [r, g, b] = pixel.0;
            terms.clear();
            self.method.expand([r as f64, g as f64, b as f64], &mut terms);
            let mapped = self.map_expanded(&terms);
            for (v, m) in pixel.0.iter_mut().zip(mapped) {
                *v = (m as f32).clamp(0.0, 1.0);
            }
        }
        out
    }
}

/// Fit a correction from detected swatches to reference colors
///
/// # Arguments
///
/// * `detected` - Swatches measured on the (white balanced) image
/// * `reference` - Linear reference colors, indexed by patch index
/// * `excluded` - Patch indices left out of the fit
/// * `method` - Expansion to fit
///
/// # Errors
///
/// - `InvalidConfiguration` for invalid method parameters
/// - `InsufficientSamples` when fewer pairs remain than the method has
///   terms, or the pairs do not determine every coefficient
pub fn fit_correction(
    detected: &[Swatch],
    reference: &[LinSrgb],
    excluded: &BTreeSet<usize>,
    method: &CorrectionMethod,
) -> Result<CorrectionModel> {
    method.validate()?;
    let input = FitInput::paired(detected, reference, excluded);
    let terms = method.term_count();

    if input.len() < terms {
        return Err(CalibrationError::InsufficientSamples {
            method: method.id().to_string(),
            required: terms,
            available: input.len(),
        });
    }

    let mut row = Vec::with_capacity(terms);
    let mut design = DMatrix::<f64>::zeros(input.len(), terms);
    for (i, &color) in input.source.iter().enumerate() {
        row.clear();
        method.expand(to_f64(color), &mut row);
        for (t, &x) in row.iter().enumerate() {
            design[(i, t)] = x;
        }
    }
    let targets = DMatrix::from_fn(input.len(), 3, |i, c| to_f64(input.reference[i])[c]);

    let svd = design.clone().svd(true, true);
    let eps = SVD_EPSILON * svd.singular_values.max();
    let rank = svd.rank(eps);
    if rank < terms {
        return Err(CalibrationError::InsufficientSamples {
            method: method.id().to_string(),
            required: terms,
            available: rank,
        });
    }
    let coefficients = svd
        .solve(&targets, eps)
        .map_err(|e| CalibrationError::invalid_config("least squares", e))?;

    let residuals = &design * &coefficients - &targets;
    let residual_rms = (residuals.norm_squared() / (3 * input.len()) as f64).sqrt();
    debug!(
        method = method.id(),
        terms,
        pairs = input.len(),
        residual_rms,
        "fitted color correction"
    );

    Ok(CorrectionModel {
        method: *method,
        coefficients,
        fitted_indices: input.indices,
        residual_rms,
    })
}
