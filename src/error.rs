use thiserror::Error;

/// Failures of the extraction and recomposition chain.
///
/// A missing face is not part of this taxonomy: detectors report it as `Ok(None)`.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ExtractionError {
    #[error("degenerate landmark geometry: {stage} crop would be empty")]
    DegenerateGeometry { stage: &'static str },

    #[error("invalid mask type {0}: expected a single channel 8-bit or floating point mask")]
    InvalidMaskType(i32),

    #[error("landmark set needs {expected} points, got {actual}")]
    LandmarkCount { expected: usize, actual: usize },

    #[error("unknown facial feature '{0}'")]
    UnknownFeature(String),

    #[error("facial feature '{feature}' needs {expected} points, got {actual}")]
    FeatureSize {
        feature: &'static str,
        expected: usize,
        actual: usize,
    },

    #[error("no landmark subset with {0} points (supported: 5, 10, 28)")]
    UnsupportedSubset(usize),
}
