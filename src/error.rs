//! Error taxonomy for fitting, persisting and serving segmentation models

use std::path::PathBuf;
use thiserror::Error;

/// Errors produced by the segmentation core
#[derive(Error, Debug)]
pub enum SegmentError {
    /// A reference column is constant, or the reference dataset is empty
    #[error("cannot normalize feature '{feature}': {reason}")]
    DegenerateFeature { feature: String, reason: String },

    /// A cluster ended up with no members; retry with a smaller K or another seed
    #[error("cluster {cluster} of {k} has no members (K too large for the data?)")]
    EmptyCluster { k: usize, cluster: usize },

    #[error("model artifact not found: {}", path.display())]
    ModelNotFound { path: PathBuf },

    #[error("model artifact {} is corrupt: {reason}", path.display())]
    ModelCorrupt { path: PathBuf, reason: String },

    /// Normalizer and centroid set do not belong together
    #[error("model version mismatch: {0}")]
    ModelVersionMismatch(String),

    #[error("invalid observation: {0}")]
    InvalidObservation(String),

    #[error("invalid parameter: {0}")]
    InvalidParameter(String),

    #[error("training cancelled after {iterations} iterations")]
    Cancelled { iterations: usize },

    #[error("failed to read dataset: {0}")]
    Dataset(#[from] polars::prelude::PolarsError),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl SegmentError {
    /// True for errors scoped to a single request; the server keeps serving after these.
    pub fn is_request_error(&self) -> bool {
        matches!(self, SegmentError::InvalidObservation(_))
    }

    /// True when retrying the fit with a different K or seed may succeed.
    pub fn is_retryable_fit(&self) -> bool {
        matches!(self, SegmentError::EmptyCluster { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_classification() {
        assert!(SegmentError::InvalidObservation("age".into()).is_request_error());
        assert!(!SegmentError::ModelNotFound { path: "m.json".into() }.is_request_error());
        assert!(SegmentError::EmptyCluster { k: 5, cluster: 3 }.is_retryable_fit());
        assert!(!SegmentError::DegenerateFeature {
            feature: "age".into(),
            reason: "constant".into()
        }
        .is_retryable_fit());
    }

    #[test]
    fn test_error_messages() {
        let err = SegmentError::EmptyCluster { k: 5, cluster: 3 };
        assert_eq!(
            err.to_string(),
            "cluster 3 of 5 has no members (K too large for the data?)"
        );
        let err = SegmentError::ModelNotFound { path: "models/m.json".into() };
        assert_eq!(err.to_string(), "model artifact not found: models/m.json");
    }
}
