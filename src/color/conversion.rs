//! Color transfer functions and perceptual distance
//!
//! Provides the boundary between stored and linear light:
//! - sRGB CCTF decode of 8-bit and float display-encoded images
//! - CCTF encode back to 8-bit, clipped to the display range
//! - Linear sRGB and 8-bit sRGB to CIE Lab (D65)
//! - CIEDE2000 color difference
//!
//! Color arithmetic in the rest of the crate only ever sees linear data.

use std::sync::LazyLock;

use image::{Rgb, Rgb32FImage, RgbImage};
use palette::{color_difference::Ciede2000, FromColor, Lab, LinSrgb, Srgb};

use crate::{CalibrationError, Result};

/// Linear value of every 8-bit code
static DECODE_LUT: LazyLock<[f32; 256]> = LazyLock::new(|| {
    let mut lut = [0.0; 256];
    for (code, slot) in lut.iter_mut().enumerate() {
        let v = code as f32 / 255.0;
        let lin: LinSrgb = Srgb::new(v, v, v).into_linear();
        *slot = lin.red;
    }
    lut
});

/// sRGB transfer functions and Lab conversions
pub struct ColorSpace;

impl ColorSpace {
    /// Decode one 8-bit display code to linear light
    #[inline]
    pub fn decode_code(code: u8) -> f32 {
        DECODE_LUT[code as usize]
    }

    /// Decode an 8-bit sRGB triplet to linear light
    pub fn decode_rgb8(rgb: [u8; 3]) -> LinSrgb {
        LinSrgb::new(
            Self::decode_code(rgb[0]),
            Self::decode_code(rgb[1]),
            Self::decode_code(rgb[2]),
        )
    }

    /// Decode a display triplet in the 0-255 range (possibly fractional)
    pub fn decode_srgb8_f32(rgb: [f32; 3]) -> LinSrgb {
        let srgb = Srgb::new(rgb[0] / 255.0, rgb[1] / 255.0, rgb[2] / 255.0);
        srgb.into_linear()
    }

    /// Encode a linear color to a display triplet in the 0-255 range,
    /// clipped but not quantized
    pub fn encode_srgb8_f32(color: LinSrgb) -> [f32; 3] {
        let clipped = clip(color);
        let srgb: Srgb = Srgb::from_linear(clipped);
        [srgb.red * 255.0, srgb.green * 255.0, srgb.blue * 255.0]
    }

    /// Encode a linear color to 8-bit codes, clipped to [0, 1] first
    pub fn encode_rgb8(color: LinSrgb) -> [u8; 3] {
        let srgb: Srgb = Srgb::from_linear(clip(color));
        let quantized: Srgb<u8> = srgb.into_format();
        [quantized.red, quantized.green, quantized.blue]
    }

    /// Apply the inverse CCTF to every sample of an 8-bit image
    ///
    /// # Errors
    ///
    /// `InvalidImage` for a zero-sized image
    pub fn decode_to_linear(image: &RgbImage) -> Result<Rgb32FImage> {
        ensure_not_empty(image.width(), image.height())?;
        let lut = &*DECODE_LUT;
        Ok(Rgb32FImage::from_fn(image.width(), image.height(), |x, y| {
            let Rgb([r, g, b]) = *image.get_pixel(x, y);
            Rgb([lut[r as usize], lut[g as usize], lut[b as usize]])
        }))
    }

    /// Apply the inverse CCTF to a float display-encoded image
    ///
    /// # Errors
    ///
    /// `InvalidImage` if any sample is non-finite or outside [0, 1]
    pub fn decode_normalized_to_linear(image: &Rgb32FImage) -> Result<Rgb32FImage> {
        ensure_not_empty(image.width(), image.height())?;
        if let Some((i, v)) = image
            .as_raw()
            .iter()
            .enumerate()
            .find(|(_, v)| !v.is_finite() || **v < 0.0 || **v > 1.0)
        {
            return Err(CalibrationError::invalid_image(format!(
                "sample {} of pixel {} is outside the display range [0, 1]",
                v,
                i / 3
            )));
        }

        let mut out = image.clone();
        for pixel in out.pixels_mut() {
            let lin: LinSrgb = Srgb::new(pixel[0], pixel[1], pixel[2]).into_linear();
            *pixel = Rgb([lin.red, lin.green, lin.blue]);
        }
        Ok(out)
    }

    /// Apply the forward CCTF and quantize to 8 bits
    ///
    /// Samples are clipped to [0, 1] before quantizing.
    ///
    /// # Errors
    ///
    /// `InvalidImage` for a zero-sized image or a non-finite sample
    pub fn encode_from_linear(image: &Rgb32FImage) -> Result<RgbImage> {
        ensure_not_empty(image.width(), image.height())?;
        if image.as_raw().iter().any(|v| !v.is_finite()) {
            return Err(CalibrationError::invalid_image(
                "linear image contains non-finite samples",
            ));
        }

        Ok(RgbImage::from_fn(image.width(), image.height(), |x, y| {
            let Rgb([r, g, b]) = *image.get_pixel(x, y);
            Rgb(Self::encode_rgb8(LinSrgb::new(r, g, b)))
        }))
    }

    /// Convert a linear color to CIE Lab (D65)
    pub fn linear_to_lab(color: LinSrgb) -> Lab {
        Lab::from_color(color)
    }

    /// Convert a 0-255 display triplet to CIE Lab (D65)
    pub fn srgb8_to_lab(rgb: [f32; 3]) -> Lab {
        let srgb = Srgb::new(rgb[0] / 255.0, rgb[1] / 255.0, rgb[2] / 255.0);
        Lab::from_color(srgb)
    }

    /// Convert CIE Lab back to clipped 8-bit codes
    pub fn lab_to_srgb8(lab: Lab) -> [u8; 3] {
        let lin: LinSrgb = LinSrgb::from_color(lab);
        Self::encode_rgb8(lin)
    }

    /// CIEDE2000 difference between two linear colors
    ///
    /// Both colors are taken to Lab first; this is never a Euclidean RGB
    /// distance. Symmetric up to float rounding and zero for equal inputs.
    pub fn perceptual_distance(a: LinSrgb, b: LinSrgb) -> f32 {
        Self::linear_to_lab(a).difference(Self::linear_to_lab(b))
    }

    /// CIEDE2000 difference between two 0-255 display triplets
    pub fn perceptual_distance_srgb8(a: [f32; 3], b: [f32; 3]) -> f32 {
        Self::srgb8_to_lab(a).difference(Self::srgb8_to_lab(b))
    }

    /// CIEDE2000 difference between two Lab colors
    pub fn lab_distance(a: Lab, b: Lab) -> f32 {
        a.difference(b)
    }

    /// Format 8-bit codes as `#RRGGBB`
    pub fn to_hex(rgb: [u8; 3]) -> String {
        format!("#{:02X}{:02X}{:02X}", rgb[0], rgb[1], rgb[2])
    }

    /// Parse `#RRGGBB` or `RRGGBB` into 8-bit codes
    pub fn from_hex(hex: &str) -> Result<[u8; 3]> {
        let digits = hex.trim_start_matches('#');
        if digits.len() != 6 || !digits.is_ascii() {
            return Err(CalibrationError::invalid_config("hex color", hex));
        }

        let mut rgb = [0u8; 3];
        for (i, slot) in rgb.iter_mut().enumerate() {
            *slot = u8::from_str_radix(&digits[2 * i..2 * i + 2], 16)
                .map_err(|_| CalibrationError::invalid_config("hex color", hex))?;
        }
        Ok(rgb)
    }

    /// Relative luminance (Y) of a linear color
    pub fn luminance(color: LinSrgb) -> f32 {
        0.2126 * color.red + 0.7152 * color.green + 0.0722 * color.blue
    }
}

/// Clip every component of a linear color to [0, 1]
pub fn clip(color: LinSrgb) -> LinSrgb {
    LinSrgb::new(
        color.red.clamp(0.0, 1.0),
        color.green.clamp(0.0, 1.0),
        color.blue.clamp(0.0, 1.0),
    )
}

fn ensure_not_empty(width: u32, height: u32) -> Result<()> {
    if width == 0 || height == 0 {
        return Err(CalibrationError::invalid_image(format!(
            "image has zero size ({}x{})",
            width, height
        )));
    }
    Ok(())
}
