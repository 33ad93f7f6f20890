//! Image file loading and saving
//!
//! The calibration core works on in-memory buffers; this module is the file
//! boundary used by the demo and by callers that start from a path.
//!
//! ## Supported Formats
//!
//! JPEG, PNG, TIFF, BMP and WebP through the `image` crate. Every image is
//! converted to 8-bit RGB on load; alpha is dropped.

use std::path::Path;

use image::RgbImage;
use tracing::debug;

use crate::error::{CalibrationError, Result};

/// Supported image formats
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImageFormat {
    Jpeg,
    Png,
    Tiff,
    Bmp,
    WebP,
}

impl ImageFormat {
    /// Detect format from file extension
    pub fn from_extension(path: &Path) -> Option<ImageFormat> {
        let ext = path.extension()?.to_str()?.to_lowercase();
        match ext.as_str() {
            "jpg" | "jpeg" => Some(ImageFormat::Jpeg),
            "png" => Some(ImageFormat::Png),
            "tiff" | "tif" => Some(ImageFormat::Tiff),
            "bmp" => Some(ImageFormat::Bmp),
            "webp" => Some(ImageFormat::WebP),
            _ => None,
        }
    }

    fn codec(self) -> image::ImageFormat {
        match self {
            ImageFormat::Jpeg => image::ImageFormat::Jpeg,
            ImageFormat::Png => image::ImageFormat::Png,
            ImageFormat::Tiff => image::ImageFormat::Tiff,
            ImageFormat::Bmp => image::ImageFormat::Bmp,
            ImageFormat::WebP => image::ImageFormat::WebP,
        }
    }
}

fn format_of(path: &Path) -> Result<ImageFormat> {
    ImageFormat::from_extension(path).ok_or_else(|| CalibrationError::ImageLoad {
        message: format!("Unknown image format for file: {}", path.display()),
        source: None,
    })
}

/// Load an image from disk as display-encoded 8-bit RGB
///
/// # Errors
///
/// Returns `CalibrationError::ImageLoad` if:
/// - The extension is not a supported format
/// - File cannot be opened
/// - Decoding fails
///
/// # Example
///
/// ```rust,no_run
/// use checker_calibrate::image_loader::load_image;
/// use std::path::Path;
///
/// let image = load_image(Path::new("checker.jpg"))?;
/// println!("Loaded image: {}x{}", image.width(), image.height());
/// # Ok::<(), checker_calibrate::CalibrationError>(())
/// ```
pub fn load_image(path: &Path) -> Result<RgbImage> {
    let format = format_of(path)?;

    let reader = image::ImageReader::open(path).map_err(|e| {
        CalibrationError::image_load(format!("Failed to open image file: {}", path.display()), e)
    })?;
    let decoded = reader
        .with_guessed_format()
        .map_err(|e| CalibrationError::image_load(format!("Failed to read image: {}", path.display()), e))?
        .decode()
        .map_err(|e| CalibrationError::image_load(format!("Failed to decode image: {}", path.display()), e))?;

    let rgb = decoded.to_rgb8();
    debug!(?format, width = rgb.width(), height = rgb.height(), "loaded image");
    Ok(rgb)
}

/// Write an 8-bit RGB image in the format named by the path's extension
pub fn save_image(image: &RgbImage, path: &Path) -> Result<()> {
    let format = format_of(path)?;
    image
        .save_with_format(path, format.codec())
        .map_err(|e| CalibrationError::image_load(format!("Failed to write image: {}", path.display()), e))
}

/// Get list of all supported file extensions
pub fn supported_extensions() -> &'static [&'static str] {
    &["jpg", "jpeg", "png", "tiff", "tif", "bmp", "webp"]
}

/// Check if a file extension is supported
pub fn is_supported_extension(ext: &str) -> bool {
    let ext_lower = ext.to_lowercase();
    supported_extensions().contains(&ext_lower.as_str())
}
