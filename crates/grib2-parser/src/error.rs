//! Error types for GRIB2 decoding.

use std::path::PathBuf;
use thiserror::Error;

/// Errors raised while reading or unpacking GRIB2 data.
#[derive(Error, Debug)]
pub enum Grib2Error {
    #[error("Failed to read GRIB2 file: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid GRIB2 format: {0}")]
    InvalidFormat(String),

    #[error("Invalid section {section}: {reason}")]
    InvalidSection { section: u8, reason: String },

    #[error("Truncated message at offset {offset}: needs {needed} bytes, {available} available")]
    Truncated {
        offset: usize,
        needed: usize,
        available: usize,
    },

    #[error("Unsupported template {template} in section {section}")]
    UnsupportedTemplate { section: u8, template: u16 },

    #[error("Unsupported scanning mode {0:#010b}")]
    UnsupportedScanningMode(u8),

    #[error("Unpacking failed: {0}")]
    UnpackingError(String),

    #[error("Grid definition of message {message} ({found}) differs from the first selected grid ({expected})")]
    GridMismatch {
        message: usize,
        expected: String,
        found: String,
    },
}

/// A decode failure tied to the file it came from.
#[derive(Error, Debug)]
#[error("Failed to decode {}: {source}", path.display())]
pub struct DecodeError {
    pub path: PathBuf,
    #[source]
    pub source: Grib2Error,
}

impl DecodeError {
    pub fn new(path: impl Into<PathBuf>, source: Grib2Error) -> Self {
        Self {
            path: path.into(),
            source,
        }
    }
}

/// Result type for GRIB2 operations.
pub type Result<T> = std::result::Result<T, Grib2Error>;
