//! Error types for the ingestion crate.

use grib2_parser::DecodeError;
use thiserror::Error;

use crate::dedup::MergeError;

/// Errors that can occur during ingestion.
#[derive(Error, Debug)]
pub enum IngestionError {
    /// Rejected before any file is opened
    #[error("Invalid configuration: {0}")]
    Configuration(String),

    /// A single file could not be decoded; the run continues with the others
    #[error(transparent)]
    Decode(#[from] DecodeError),

    /// The store failed or timed out; the run stops
    #[error("Storage failed ({committed} records committed, {uncommitted} not committed): {source}")]
    Storage {
        #[source]
        source: MergeError,
        committed: u64,
        uncommitted: u64,
    },

    #[error("Ingestion cancelled ({committed} records committed, {uncommitted} not committed)")]
    Cancelled { committed: u64, uncommitted: u64 },
}

impl IngestionError {
    pub fn configuration(message: impl Into<String>) -> Self {
        Self::Configuration(message.into())
    }

    /// Whether this error was raised while validating inputs.
    pub fn is_configuration(&self) -> bool {
        matches!(self, Self::Configuration(_))
    }

    /// Records committed before the run stopped.
    pub fn committed(&self) -> Option<u64> {
        match self {
            Self::Storage { committed, .. } | Self::Cancelled { committed, .. } => Some(*committed),
            _ => None,
        }
    }
}

/// Result type for ingestion operations.
pub type Result<T> = std::result::Result<T, IngestionError>;
