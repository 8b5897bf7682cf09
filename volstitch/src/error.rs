//! Error types for stitching runs.

use std::io;
use std::path::PathBuf;

use common::SerdeFormatError;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

/// Errors that abort a stitching run.
///
/// A rejected robust fit is not an error: it is reported through
/// [`crate::matching::RobustFitResult::accepted`] and the run continues.
#[derive(Debug, Error)]
pub enum Error {
    #[error("No {role} volume provided")]
    MissingVolume { role: &'static str },

    #[error("Overlap of {overlap} slices exceeds volume depth {depth}")]
    OverlapExceedsDepth { overlap: usize, depth: usize },

    #[error("Invalid overlap search window [{start}, {end}] for depth {depth}")]
    InvalidSearchWindow {
        start: usize,
        end: usize,
        depth: usize,
    },

    #[error("Dimension mismatch: expected {expected:?}, got {actual:?}")]
    DimensionMismatch {
        expected: (usize, usize, usize),
        actual: (usize, usize, usize),
    },

    #[error("Affine model is singular and cannot be inverted")]
    SingularModel,

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("I/O error on '{path}': {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("TIFF error: {0}")]
    Tiff(String),

    #[error("Config file error: {0}")]
    Config(#[from] SerdeFormatError),
}

impl From<tiff::TiffError> for Error {
    fn from(err: tiff::TiffError) -> Self {
        Error::Tiff(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_volume_message() {
        let err = Error::MissingVolume { role: "back" };
        assert_eq!(err.to_string(), "No back volume provided");
    }

    #[test]
    fn test_overlap_exceeds_depth_message() {
        let err = Error::OverlapExceedsDepth {
            overlap: 120,
            depth: 100,
        };
        assert_eq!(
            err.to_string(),
            "Overlap of 120 slices exceeds volume depth 100"
        );
    }

    #[test]
    fn test_io_error_keeps_source() {
        let err = Error::Io {
            path: PathBuf::from("/tmp/missing.tif"),
            source: io::Error::new(io::ErrorKind::NotFound, "gone"),
        };
        assert!(err.to_string().contains("/tmp/missing.tif"));
        assert!(std::error::Error::source(&err).is_some());
    }

    #[test]
    fn test_config_error_from_serde_format() {
        let err: Error = SerdeFormatError::MissingFileExtension.into();
        assert!(matches!(err, Error::Config(_)));
    }
}
