//! Error types shared by every catalog acquisition strategy.
//!
//! Only configuration and resource-access faults are represented here. Conditions
//! that a pipeline is expected to survive (an external extraction tool that fails
//! to run, an image with no detectable sources) are absorbed by the strategies and
//! show up as empty catalogs instead.

use std::path::PathBuf;

use thiserror::Error;

use crate::projection::ProjectionError;

/// Errors raised while building, converting or writing a source catalog.
#[derive(Error, Debug)]
pub enum CatalogError {
    /// Required strategy parameters are missing or malformed.
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// The image backing the catalog could not be read.
    #[error("No valid pixels in '{path}': {reason}")]
    NoValidPixels { path: PathBuf, reason: String },

    /// Sky conversion was requested without a usable projection.
    #[error(transparent)]
    Projection(#[from] ProjectionError),

    /// A column file line could not be interpreted.
    #[error("Failed to parse '{path}' line {line}: {reason}")]
    Parse {
        path: PathBuf,
        line: usize,
        reason: String,
    },

    /// Reading or writing a catalog file failed.
    #[error("I/O error on '{path}': {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    /// Serialization was requested for a catalog without pixel positions.
    #[error("Nothing to write: {0}")]
    NothingToWrite(String),
}

impl CatalogError {
    pub(crate) fn config(msg: impl Into<String>) -> Self {
        CatalogError::Configuration(msg.into())
    }

    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        CatalogError::Io {
            path: path.into(),
            source,
        }
    }
}

/// Convenience alias used across the crate.
pub type Result<T> = std::result::Result<T, CatalogError>;
