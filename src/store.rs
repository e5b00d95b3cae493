//! Persistence of the normalizer and centroid set as one version-locked artifact

use crate::data::Feature;
use crate::error::SegmentError;
use crate::model::CentroidSet;
use crate::scaler::NormalizationParameters;
use ndarray::Array2;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fs::{self, File};
use std::io::{BufWriter, ErrorKind, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// Artifact layout version written by this build
pub const FORMAT_VERSION: u32 = 1;

/// A normalizer paired with the centroids fit on data it normalized
///
/// The pair is only ever built, saved and loaded as a unit, and it carries a
/// fingerprint of both halves so labels can be pinned to the exact model that
/// produced them.
#[derive(Debug, Clone, PartialEq)]
pub struct SegmentationModel {
    id: String,
    normalizer: NormalizationParameters,
    centroids: CentroidSet,
}

impl SegmentationModel {
    pub fn new(normalizer: NormalizationParameters, centroids: CentroidSet) -> crate::Result<Self> {
        if normalizer.arity() != centroids.dimension() {
            return Err(SegmentError::ModelVersionMismatch(format!(
                "normalizer has {} attributes but centroids have {} dimensions",
                normalizer.arity(),
                centroids.dimension()
            )));
        }
        let id = fingerprint(&normalizer, &centroids);
        Ok(Self {
            id,
            normalizer,
            centroids,
        })
    }

    /// Hex SHA-256 fingerprint of the normalizer and centroids
    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn normalizer(&self) -> &NormalizationParameters {
        &self.normalizer
    }

    pub fn centroids(&self) -> &CentroidSet {
        &self.centroids
    }

    pub fn into_parts(self) -> (NormalizationParameters, CentroidSet) {
        (self.normalizer, self.centroids)
    }

    /// Atomically write the model to `path`, replacing any previous artifact
    pub fn save(&self, path: impl AsRef<Path>) -> crate::Result<()> {
        let path = path.as_ref();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }

        // Write to a sibling temp file first, then rename over the target
        let tmp_path = temp_path_for(path);
        if let Err(err) = write_artifact(&tmp_path, &self.to_artifact()) {
            let _ = fs::remove_file(&tmp_path);
            return Err(err);
        }
        if let Err(err) = fs::rename(&tmp_path, path) {
            let _ = fs::remove_file(&tmp_path);
            return Err(err.into());
        }

        info!(path = %path.display(), model_id = %self.id, k = self.centroids.k(), "Model saved");
        Ok(())
    }

    /// Load and verify a model artifact
    ///
    /// # Errors
    /// * `ModelNotFound` if nothing exists at `path`
    /// * `ModelCorrupt` if the artifact cannot be fully decoded or fails its fingerprint
    /// * `ModelVersionMismatch` for an unknown format version or when parameter
    ///   arity and centroid dimensionality disagree
    pub fn load(path: impl AsRef<Path>) -> crate::Result<Self> {
        let path = path.as_ref();
        let bytes = match fs::read(path) {
            Ok(bytes) => bytes,
            Err(err) if err.kind() == ErrorKind::NotFound => {
                return Err(SegmentError::ModelNotFound {
                    path: path.to_path_buf(),
                })
            }
            Err(err) => return Err(err.into()),
        };

        let corrupt = |reason: String| SegmentError::ModelCorrupt {
            path: path.to_path_buf(),
            reason,
        };

        let artifact: ModelArtifact =
            serde_json::from_slice(&bytes).map_err(|e| corrupt(e.to_string()))?;

        if artifact.format_version != FORMAT_VERSION {
            return Err(SegmentError::ModelVersionMismatch(format!(
                "artifact format version {} is not supported (expected {})",
                artifact.format_version, FORMAT_VERSION
            )));
        }

        let arity = artifact.normalizer.mean.len();
        if artifact.feature_names.len() != arity {
            return Err(SegmentError::ModelVersionMismatch(format!(
                "{} feature names for {} normalizer attributes",
                artifact.feature_names.len(),
                arity
            )));
        }

        let normalizer = NormalizationParameters::new(artifact.normalizer.mean, artifact.normalizer.std_dev)
            .map_err(|e| corrupt(e.to_string()))?;

        let k = artifact.centroids.len();
        if k == 0 {
            return Err(corrupt("artifact holds no centroids".to_string()));
        }
        let dimension = artifact.centroids.first().map_or(0, |c| c.position.len());
        let mut positions = Vec::with_capacity(k * dimension);
        for (expected, centroid) in artifact.centroids.iter().enumerate() {
            if centroid.label != expected {
                return Err(corrupt(format!(
                    "centroid labels must be 0..{} in order, found {} at position {}",
                    k, centroid.label, expected
                )));
            }
            if centroid.position.len() != dimension {
                return Err(corrupt(format!(
                    "centroid {} has {} dimensions, expected {}",
                    centroid.label,
                    centroid.position.len(),
                    dimension
                )));
            }
            positions.extend_from_slice(&centroid.position);
        }

        if dimension != normalizer.arity() {
            return Err(SegmentError::ModelVersionMismatch(format!(
                "normalizer has {} attributes but centroids have {} dimensions",
                normalizer.arity(),
                dimension
            )));
        }

        let positions = Array2::from_shape_vec((k, dimension), positions).map_err(|e| corrupt(e.to_string()))?;
        let centroids = CentroidSet::new(positions).map_err(|e| corrupt(e.to_string()))?;
        let model = SegmentationModel::new(normalizer, centroids)?;

        if model.id != artifact.model_id {
            return Err(corrupt(format!(
                "fingerprint mismatch: recorded {}, computed {}",
                artifact.model_id, model.id
            )));
        }

        debug!(path = %path.display(), model_id = %model.id, "Model loaded");
        Ok(model)
    }

    fn to_artifact(&self) -> ModelArtifact {
        let feature_names = (0..self.normalizer.arity())
            .map(|j| {
                Feature::ALL
                    .get(j)
                    .map(|f| f.name().to_string())
                    .unwrap_or_else(|| format!("column_{}", j))
            })
            .collect();

        ModelArtifact {
            format_version: FORMAT_VERSION,
            model_id: self.id.clone(),
            feature_names,
            normalizer: NormalizerRecord {
                mean: self.normalizer.means().to_vec(),
                std_dev: self.normalizer.std_devs().to_vec(),
            },
            centroids: self
                .centroids
                .iter()
                .map(|(label, position)| CentroidRecord {
                    label,
                    position: position.to_vec(),
                })
                .collect(),
        }
    }
}

/// Save a normalizer and its centroids as one artifact; returns the model id
pub fn save(
    normalizer: &NormalizationParameters,
    centroids: &CentroidSet,
    path: impl AsRef<Path>,
) -> crate::Result<String> {
    let model = SegmentationModel::new(normalizer.clone(), centroids.clone())?;
    model.save(path)?;
    Ok(model.id)
}

/// Load the normalizer/centroid pair from an artifact
pub fn load(path: impl AsRef<Path>) -> crate::Result<(NormalizationParameters, CentroidSet)> {
    SegmentationModel::load(path).map(SegmentationModel::into_parts)
}

/// On-disk representation
#[derive(Debug, Serialize, Deserialize)]
struct ModelArtifact {
    format_version: u32,
    model_id: String,
    feature_names: Vec<String>,
    normalizer: NormalizerRecord,
    centroids: Vec<CentroidRecord>,
}

#[derive(Debug, Serialize, Deserialize)]
struct NormalizerRecord {
    mean: Vec<f64>,
    std_dev: Vec<f64>,
}

#[derive(Debug, Serialize, Deserialize)]
struct CentroidRecord {
    label: usize,
    position: Vec<f64>,
}

fn write_artifact(path: &Path, artifact: &ModelArtifact) -> crate::Result<()> {
    let file = File::create(path)?;
    let mut writer = BufWriter::new(file);
    serde_json::to_writer_pretty(&mut writer, artifact)?;
    writer.flush()?;
    let file = writer.into_inner().map_err(|e| e.into_error())?;
    file.sync_all()?;
    Ok(())
}

fn temp_path_for(path: &Path) -> PathBuf {
    let file_name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "model".to_string());
    path.with_file_name(format!(".{}.{}.tmp", file_name, std::process::id()))
}

fn fingerprint(normalizer: &NormalizationParameters, centroids: &CentroidSet) -> String {
    let mut hasher = Sha256::new();
    hasher.update(FORMAT_VERSION.to_le_bytes());
    hasher.update((normalizer.arity() as u64).to_le_bytes());
    for value in normalizer.means().iter().chain(normalizer.std_devs()) {
        hasher.update(value.to_le_bytes());
    }
    hasher.update((centroids.k() as u64).to_le_bytes());
    for value in centroids.positions().iter() {
        hasher.update(value.to_le_bytes());
    }
    hasher
        .finalize()
        .iter()
        .map(|b| format!("{:02x}", b))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;
    use tempfile::tempdir;

    fn sample_model() -> SegmentationModel {
        let normalizer = NormalizationParameters::new(vec![43.5, 79.25, 50.125], vec![15.1, 39.7, 28.9]).unwrap();
        let centroids = CentroidSet::new(array![
            [-0.912345678901234, 1.1, 0.3],
            [1.2, -0.7, -1.4],
            [0.1, 0.2, 1.6000000000000001],
        ])
        .unwrap();
        SegmentationModel::new(normalizer, centroids).unwrap()
    }

    #[test]
    fn test_save_load_round_trip() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("models").join("segmentation.json");
        let model = sample_model();

        model.save(&path).unwrap();
        let loaded = SegmentationModel::load(&path).unwrap();

        assert_eq!(loaded, model);
        assert_eq!(loaded.id(), model.id());
    }

    #[test]
    fn test_free_functions_round_trip() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("model.json");
        let (normalizer, centroids) = sample_model().into_parts();

        save(&normalizer, &centroids, &path).unwrap();
        let (loaded_normalizer, loaded_centroids) = load(&path).unwrap();
        assert_eq!(loaded_normalizer, normalizer);
        assert_eq!(loaded_centroids, centroids);
    }

    #[test]
    fn test_save_overwrites_and_leaves_no_temp_file() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("model.json");
        sample_model().save(&path).unwrap();

        let normalizer = NormalizationParameters::new(vec![1.0, 2.0, 3.0], vec![1.0, 1.0, 1.0]).unwrap();
        let centroids = CentroidSet::new(array![[0.0, 0.0, 0.0]]).unwrap();
        let replacement = SegmentationModel::new(normalizer, centroids).unwrap();
        replacement.save(&path).unwrap();

        assert_eq!(SegmentationModel::load(&path).unwrap(), replacement);
        let entries: Vec<_> = fs::read_dir(dir.path()).unwrap().collect();
        assert_eq!(entries.len(), 1);
    }

    #[test]
    fn test_load_missing() {
        let dir = tempdir().unwrap();
        let result = SegmentationModel::load(dir.path().join("absent.json"));
        assert!(matches!(result, Err(SegmentError::ModelNotFound { .. })));
    }

    #[test]
    fn test_load_truncated_is_corrupt() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("model.json");
        sample_model().save(&path).unwrap();

        let text = fs::read_to_string(&path).unwrap();
        fs::write(&path, &text[..text.len() / 2]).unwrap();
        assert!(matches!(
            SegmentationModel::load(&path),
            Err(SegmentError::ModelCorrupt { .. })
        ));
    }

    #[test]
    fn test_load_tampered_centroid_is_corrupt() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("model.json");
        sample_model().save(&path).unwrap();

        let mut value: serde_json::Value = serde_json::from_slice(&fs::read(&path).unwrap()).unwrap();
        value["centroids"][1]["position"][0] = serde_json::json!(9.0);
        fs::write(&path, serde_json::to_vec(&value).unwrap()).unwrap();

        assert!(matches!(
            SegmentationModel::load(&path),
            Err(SegmentError::ModelCorrupt { .. })
        ));
    }

    fn rewrite_artifact(path: &Path, edit: impl FnOnce(&mut serde_json::Value)) {
        let mut value: serde_json::Value = serde_json::from_slice(&fs::read(path).unwrap()).unwrap();
        edit(&mut value);
        fs::write(path, serde_json::to_vec(&value).unwrap()).unwrap();
    }

    #[test]
    fn test_load_labels_out_of_order_is_corrupt() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("model.json");
        sample_model().save(&path).unwrap();

        rewrite_artifact(&path, |value| {
            value["centroids"][0]["label"] = serde_json::json!(1);
            value["centroids"][1]["label"] = serde_json::json!(0);
        });

        match SegmentationModel::load(&path) {
            Err(SegmentError::ModelCorrupt { reason, .. }) => {
                assert!(reason.contains("in order"), "{reason}")
            }
            other => panic!("expected ModelCorrupt, got {:?}", other),
        }
    }

    #[test]
    fn test_load_duplicate_centroids_is_corrupt() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("model.json");
        sample_model().save(&path).unwrap();

        rewrite_artifact(&path, |value| {
            let first = value["centroids"][0]["position"].clone();
            value["centroids"][1]["position"] = first;
        });

        match SegmentationModel::load(&path) {
            Err(SegmentError::ModelCorrupt { reason, .. }) => {
                assert!(reason.contains("same point"), "{reason}")
            }
            other => panic!("expected ModelCorrupt, got {:?}", other),
        }
    }

    #[test]
    fn test_load_arity_mismatch() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("model.json");
        let artifact = serde_json::json!({
            "format_version": FORMAT_VERSION,
            "model_id": "0",
            "feature_names": ["age", "income"],
            "normalizer": { "mean": [1.0, 2.0], "std_dev": [1.0, 1.0] },
            "centroids": [
                { "label": 0, "position": [0.0, 0.0, 0.0] },
                { "label": 1, "position": [1.0, 1.0, 1.0] }
            ]
        });
        fs::write(&path, serde_json::to_vec(&artifact).unwrap()).unwrap();

        assert!(matches!(
            SegmentationModel::load(&path),
            Err(SegmentError::ModelVersionMismatch(_))
        ));
    }

    #[test]
    fn test_load_unknown_format_version() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("model.json");
        sample_model().save(&path).unwrap();

        let mut value: serde_json::Value = serde_json::from_slice(&fs::read(&path).unwrap()).unwrap();
        value["format_version"] = serde_json::json!(FORMAT_VERSION + 1);
        fs::write(&path, serde_json::to_vec(&value).unwrap()).unwrap();

        assert!(matches!(
            SegmentationModel::load(&path),
            Err(SegmentError::ModelVersionMismatch(_))
        ));
    }

    #[test]
    fn test_new_rejects_dimension_mismatch() {
        let normalizer = NormalizationParameters::new(vec![1.0, 2.0], vec![1.0, 1.0]).unwrap();
        let centroids = CentroidSet::new(array![[0.0, 0.0, 0.0]]).unwrap();
        assert!(matches!(
            SegmentationModel::new(normalizer, centroids),
            Err(SegmentError::ModelVersionMismatch(_))
        ));
    }
}
