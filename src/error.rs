//! Error types for the checker_calibrate library

use thiserror::Error;

/// Result type alias for checker_calibrate operations
pub type Result<T> = std::result::Result<T, CalibrationError>;

/// Typed failures of a calibration request.
///
/// Every variant aborts the request it was raised in. Nothing in the crate
/// catches one of these and substitutes a placeholder result.
#[derive(Error, Debug)]
pub enum CalibrationError {
    /// No plausible checker grid of the expected size was found
    #[error("Color checker not found: {reason}")]
    CardNotFound { reason: String },

    /// Too few usable patches for the number of free parameters in the fit
    #[error("Insufficient samples for {method}: {available} usable patches, {required} required")]
    InsufficientSamples {
        method: String,
        required: usize,
        available: usize,
    },

    /// Unknown card type, out-of-range exclusion or malformed configuration
    #[error("Invalid configuration: {parameter} = {value}")]
    InvalidConfiguration { parameter: String, value: String },

    /// Malformed or out-of-domain pixel data
    #[error("Invalid image: {reason}")]
    InvalidImage { reason: String },

    /// Sampling region is empty or lies outside the image
    #[error("Invalid region: {reason}")]
    InvalidRegion { reason: String },

    /// Image file could not be loaded, decoded or written
    #[error("Failed to load image: {message}")]
    ImageLoad {
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// Configuration file could not be read or written
    #[error("I/O error on {path}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
}

impl CalibrationError {
    /// Create an image load error with context
    pub fn image_load<E>(message: impl Into<String>, source: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        Self::ImageLoad {
            message: message.into(),
            source: Some(Box::new(source)),
        }
    }

    pub fn card_not_found(reason: impl Into<String>) -> Self {
        Self::CardNotFound {
            reason: reason.into(),
        }
    }

    pub fn invalid_image(reason: impl Into<String>) -> Self {
        Self::InvalidImage {
            reason: reason.into(),
        }
    }

    pub fn invalid_config(parameter: impl Into<String>, value: impl ToString) -> Self {
        Self::InvalidConfiguration {
            parameter: parameter.into(),
            value: value.to_string(),
        }
    }

    /// Get user-friendly error description for application display
    pub fn user_message(&self) -> String {
        match self {
            CalibrationError::CardNotFound { .. } => {
                "Could not find the color checker in the image. Make sure the whole card is visible.".to_string()
            }
            CalibrationError::InsufficientSamples { required, available, .. } => {
                format!(
                    "Too many patches excluded: {} remain but the chosen method needs at least {}.",
                    available, required
                )
            }
            CalibrationError::InvalidConfiguration { parameter, value } => {
                format!("Unsupported setting for {}: {}", parameter, value)
            }
            CalibrationError::InvalidRegion { .. } => {
                "The selected region is empty. Please select an area inside the image.".to_string()
            }
            CalibrationError::ImageLoad { .. } | CalibrationError::InvalidImage { .. } => {
                "Could not read the image. Please check the file format and try again.".to_string()
            }
            CalibrationError::Io { .. } => "Could not read or write the settings file.".to_string(),
        }
    }
}
