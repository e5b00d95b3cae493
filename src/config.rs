//! Training and serving configuration (segmentforge.toml)
//!
//! Values resolve in this order, highest first:
//! 1. Explicit command-line flags
//! 2. The TOML file passed with `--config`
//! 3. Built-in defaults

use crate::error::SegmentError;
use crate::model::KMeansParams;
use serde::{Deserialize, Serialize};
use std::num::NonZeroUsize;
use std::ops::RangeInclusive;
use std::path::Path;
use tracing::debug;

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default, deny_unknown_fields)]
pub struct SegmentConfig {
    /// Number of customer segments
    pub clusters: usize,
    pub seed: u64,
    pub max_iters: usize,
    pub tolerance: f64,
    /// Seeded K-Means restarts per fit
    pub n_init: usize,
    /// Smallest K tried by the elbow sweep
    pub elbow_min_k: usize,
    /// Largest K tried by the elbow sweep
    pub elbow_max_k: usize,
    /// Most recent assignments kept for views; unbounded when absent
    pub ledger_capacity: Option<usize>,
}

impl Default for SegmentConfig {
    fn default() -> Self {
        Self {
            clusters: 5,
            seed: 42,
            max_iters: 300,
            tolerance: 1e-4,
            n_init: 10,
            elbow_min_k: 1,
            elbow_max_k: 10,
            ledger_capacity: None,
        }
    }
}

impl SegmentConfig {
    /// Load a config file; missing keys take their defaults
    pub fn load(path: impl AsRef<Path>) -> crate::Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)?;
        let config: SegmentConfig = toml::from_str(&content).map_err(|e| {
            SegmentError::InvalidParameter(format!("invalid config {}: {}", path.display(), e))
        })?;
        debug!(path = %path.display(), ?config, "Loaded config");
        Ok(config)
    }

    /// Load `path` if given, else defaults
    pub fn load_or_default(path: Option<&Path>) -> crate::Result<Self> {
        path.map_or_else(|| Ok(Self::default()), |p| Self::load(p))
    }

    pub fn kmeans_params(&self) -> KMeansParams {
        KMeansParams::new(self.clusters)
            .max_iters(self.max_iters)
            .tolerance(self.tolerance)
            .n_init(self.n_init)
            .seed(self.seed)
    }

    pub fn elbow_range(&self) -> RangeInclusive<usize> {
        self.elbow_min_k..=self.elbow_max_k
    }

    pub fn ledger_capacity(&self) -> Option<NonZeroUsize> {
        self.ledger_capacity.and_then(NonZeroUsize::new)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_defaults_match_reference_training() {
        let config = SegmentConfig::default();
        let params = config.kmeans_params();
        assert_eq!(params.n_clusters, 5);
        assert_eq!(params.seed, 42);
        assert_eq!(config.elbow_range(), 1..=10);
        assert_eq!(config.ledger_capacity(), None);
    }

    #[test]
    fn test_load_partial_file() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, "clusters = 4").unwrap();
        writeln!(file, "ledger_capacity = 1000").unwrap();

        let config = SegmentConfig::load(file.path()).unwrap();
        assert_eq!(config.clusters, 4);
        assert_eq!(config.max_iters, 300);
        assert_eq!(config.ledger_capacity().map(NonZeroUsize::get), Some(1000));
    }

    #[test]
    fn test_load_rejects_unknown_keys() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, "clusterz = 4").unwrap();
        assert!(matches!(
            SegmentConfig::load(file.path()),
            Err(SegmentError::InvalidParameter(_))
        ));
    }

    #[test]
    fn test_load_or_default() {
        assert_eq!(SegmentConfig::load_or_default(None).unwrap(), SegmentConfig::default());
    }
}
