//! Reference palettes, white balance and color correction
//!
//! This module turns detected patch colors into a correction: a one-point
//! white balance on the neutral patch followed by a least-squares regression
//! onto the card's certified colors.

pub mod correction;
pub mod reference;
pub mod white_balance;

pub use correction::{
    fit_correction, ColorExpansion, CorrectionMethod, CorrectionModel, FitInput, Polynomial, RootPolynomial,
    Vandermonde,
};
pub use reference::{CardType, ReferencePalette, ReferencePatch};
pub use white_balance::{white_balance, WhiteBalance};
