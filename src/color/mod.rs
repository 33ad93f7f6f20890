//! Color conversion, region statistics and named-color lookup
//!
//! This module owns the boundary between display-encoded and linear data,
//! the perceptual difference metric, and point sampling of arbitrary regions.

pub mod analysis;
pub mod conversion;
pub mod names;

pub use analysis::{get_average_color, Region, RegionSample};
pub use conversion::ColorSpace;
pub use names::{closest_name, NamedColorMatcher};
