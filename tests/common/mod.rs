//! Synthetic checker photographs for integration tests
//!
//! A SpyderCheckr 24 rendered on a dark card, slightly rotated, over a flat
//! background. Patch colors are the certified values pushed through a linear
//! camera matrix, so a correction fit has a known answer.

#![allow(dead_code)]

use checker_calibrate::{CardType, ColorSpace};
use image::{Rgb, RgbImage};
use palette::LinSrgb;

pub const WIDTH: u32 = 640;
pub const HEIGHT: u32 = 480;
pub const BACKGROUND: [u8; 3] = [110, 120, 100];
pub const BORDER: [u8; 3] = [20, 20, 20];
pub const PATCH_SIDE: f64 = 50.0;
pub const PATCH_GAP: f64 = 12.0;
pub const BORDER_MARGIN: f64 = 20.0;

/// Mild cross-talk between channels with a slight exposure loss
pub const CAMERA_MATRIX: [[f32; 3]; 3] = [[0.85, 0.10, 0.02], [0.05, 0.80, 0.08], [0.03, 0.07, 0.75]];

pub const IDENTITY: [[f32; 3]; 3] = [[1.0, 0.0, 0.0], [0.0, 1.0, 0.0], [0.0, 0.0, 1.0]];

#[derive(Debug, Clone)]
pub struct SyntheticCard {
    /// Counter-clockwise rotation of the card, degrees
    pub angle_deg: f64,
    /// Linear transform applied to the certified colors
    pub camera: [[f32; 3]; 3],
    /// Fraction of light lost from the left to the right edge
    pub falloff: f32,
    /// Patch index painted over with a steep ramp (glare, a finger)
    pub occluded: Option<usize>,
    /// Add unrelated flat objects around the card
    pub clutter: bool,
}

impl Default for SyntheticCard {
    fn default() -> Self {
        Self {
            angle_deg: 5.0,
            camera: CAMERA_MATRIX,
            falloff: 0.0,
            occluded: None,
            clutter: false,
        }
    }
}

fn transform(m: &[[f32; 3]; 3], c: LinSrgb) -> LinSrgb {
    let v = [c.red, c.green, c.blue];
    let row = |r: usize| m[r][0] * v[0] + m[r][1] * v[1] + m[r][2] * v[2];
    LinSrgb::new(row(0), row(1), row(2))
}

impl SyntheticCard {
    fn grid_size() -> (f64, f64) {
        let palette = CardType::Spyder24.palette();
        let pitch = PATCH_SIDE + PATCH_GAP;
        (
            palette.cols as f64 * pitch - PATCH_GAP,
            palette.rows as f64 * pitch - PATCH_GAP,
        )
    }

    /// Linear color the camera records for a patch
    pub fn recorded_color(&self, index: usize) -> LinSrgb {
        let reference = CardType::Spyder24.palette().patches[index].color;
        transform(&self.camera, reference)
    }

    /// Card-frame coordinates (origin at the card centre) of an image point
    fn to_card(&self, x: f64, y: f64) -> (f64, f64) {
        let (s, c) = self.angle_deg.to_radians().sin_cos();
        let (dx, dy) = (x - WIDTH as f64 / 2.0, y - HEIGHT as f64 / 2.0);
        (c * dx - s * dy, s * dx + c * dy)
    }

    fn to_image(&self, u: f64, v: f64) -> (f64, f64) {
        let (s, c) = self.angle_deg.to_radians().sin_cos();
        (
            WIDTH as f64 / 2.0 + c * u + s * v,
            HEIGHT as f64 / 2.0 - s * u + c * v,
        )
    }

    /// Patch under card-frame point, if any
    fn patch_at(u: f64, v: f64) -> Option<(usize, f64)> {
        let palette = CardType::Spyder24.palette();
        let (gw, gh) = Self::grid_size();
        let (gx, gy) = (u + gw / 2.0, v + gh / 2.0);
        if gx < 0.0 || gy < 0.0 || gx >= gw || gy >= gh {
            return None;
        }
        let pitch = PATCH_SIDE + PATCH_GAP;
        let (col, row) = ((gx / pitch) as usize, (gy / pitch) as usize);
        let (fx, fy) = (gx - col as f64 * pitch, gy - row as f64 * pitch);
        (fx < PATCH_SIDE && fy < PATCH_SIDE).then_some((row * palette.cols + col, fx))
    }

    /// Expected image position of a patch centre
    pub fn patch_centre(&self, index: usize) -> (f64, f64) {
        let palette = CardType::Spyder24.palette();
        let (gw, gh) = Self::grid_size();
        let pitch = PATCH_SIDE + PATCH_GAP;
        let (row, col) = (index / palette.cols, index % palette.cols);
        let u = col as f64 * pitch + PATCH_SIDE / 2.0 - gw / 2.0;
        let v = row as f64 * pitch + PATCH_SIDE / 2.0 - gh / 2.0;
        self.to_image(u, v)
    }

    pub fn render(&self) -> RgbImage {
        let (gw, gh) = Self::grid_size();
        let (half_w, half_h) = (gw / 2.0 + BORDER_MARGIN, gh / 2.0 + BORDER_MARGIN);

        RgbImage::from_fn(WIDTH, HEIGHT, |x, y| {
            let (u, v) = self.to_card(x as f64, y as f64);
            let shade = 1.0 - self.falloff * x as f32 / WIDTH as f32;
            let lit = |c: LinSrgb| Rgb(ColorSpace::encode_rgb8(LinSrgb::new(c.red * shade, c.green * shade, c.blue * shade)));

            if let Some((index, fx)) = Self::patch_at(u, v) {
                if self.occluded == Some(index) {
                    let code = ((fx * 11.0) as u32 % 256) as u8;
                    return Rgb([code, code, code]);
                }
                return lit(self.recorded_color(index));
            }
            if u.abs() <= half_w && v.abs() <= half_h {
                return Rgb(BORDER);
            }
            if self.clutter && in_clutter(x, y) {
                return Rgb([230, 140, 40]);
            }
            lit(ColorSpace::decode_rgb8(BACKGROUND))
        })
    }
}

/// Three small orange squares in the margins
fn in_clutter(x: u32, y: u32) -> bool {
    [(20u32, 20u32), (590, 30), (30, 420)]
        .iter()
        .any(|&(x0, y0)| (x0..x0 + 30).contains(&x) && (y0..y0 + 30).contains(&y))
}

/// Scene with no card: a smooth ramp and two blocks
pub fn scene_without_card() -> RgbImage {
    RgbImage::from_fn(WIDTH, HEIGHT, |x, y| {
        if (100..180).contains(&x) && (100..180).contains(&y) {
            return Rgb([200, 40, 40]);
        }
        if (400..470).contains(&x) && (250..330).contains(&y) {
            return Rgb([40, 40, 200]);
        }
        Rgb([(x / 3) as u8, (y / 2) as u8, 90])
    })
}
