//! Checker card detection module
//!
//! This module locates a grid of color patches in a photograph and samples
//! one representative linear color per patch, in a fixed canonical order.

pub mod grid;
pub mod regions;
pub mod swatch;

pub use grid::GridGeometry;
pub use swatch::{sample_grid, Detection, PatchDetector, Swatch};
