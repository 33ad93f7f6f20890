//! Orientation fixes for photographs taken sideways or upside down
//!
//! Detection already handles any quarter rotation of the card, so these are
//! for presenting the corrected image. A mirrored image must be mirrored back
//! before detection: patch order is only recovered up to rotation.

use image::{imageops, RgbImage};

/// Rotate a quarter turn counter-clockwise
pub fn rotate_quarter_ccw(image: &RgbImage) -> RgbImage {
    imageops::rotate270(image)
}

/// Rotate a quarter turn clockwise
pub fn rotate_quarter_cw(image: &RgbImage) -> RgbImage {
    imageops::rotate90(image)
}

/// Swap top and bottom
pub fn flip_vertical(image: &RgbImage) -> RgbImage {
    imageops::flip_vertical(image)
}

/// Swap left and right
pub fn mirror_horizontal(image: &RgbImage) -> RgbImage {
    imageops::flip_horizontal(image)
}
