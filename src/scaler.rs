//! Feature normalization: per-attribute standardization fit once and then frozen

use crate::data::{Feature, RawObservation};
use crate::error::SegmentError;
use ndarray::{Array1, Array2, ArrayView1, ArrayView2, Axis};
use serde::{Deserialize, Serialize};

/// Standard deviations at or below this fraction of the mean magnitude count as zero
const DEGENERATE_RELATIVE_STD: f64 = 1e-12;

/// Fitted standardization parameters: one (mean, standard deviation) pair per attribute
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NormalizationParameters {
    means: Vec<f64>,
    std_devs: Vec<f64>,
}

impl NormalizationParameters {
    /// Build parameters from known values, e.g. when loading a persisted model
    pub fn new(means: Vec<f64>, std_devs: Vec<f64>) -> crate::Result<Self> {
        if means.is_empty() || means.len() != std_devs.len() {
            return Err(SegmentError::InvalidParameter(format!(
                "normalizer needs matching non-empty mean/std vectors, got {} and {}",
                means.len(),
                std_devs.len()
            )));
        }
        for (j, (&mean, &std)) in means.iter().zip(&std_devs).enumerate() {
            if !mean.is_finite() || !std.is_finite() || std <= 0.0 {
                return Err(SegmentError::DegenerateFeature {
                    feature: feature_name(j),
                    reason: format!("mean {} / standard deviation {} not usable", mean, std),
                });
            }
        }
        Ok(Self { means, std_devs })
    }

    /// Fit per-column mean and population standard deviation over the whole dataset
    pub fn fit(data: ArrayView2<f64>) -> crate::Result<Self> {
        let n_samples = data.nrows();
        if n_samples == 0 {
            return Err(SegmentError::DegenerateFeature {
                feature: "*".to_string(),
                reason: "reference dataset is empty".to_string(),
            });
        }

        let mut means = Vec::with_capacity(data.ncols());
        let mut std_devs = Vec::with_capacity(data.ncols());

        for (j, column) in data.axis_iter(Axis(1)).enumerate() {
            let mean = column.sum() / n_samples as f64;
            let variance = column.iter().map(|&v| (v - mean).powi(2)).sum::<f64>() / n_samples as f64;
            let std = variance.sqrt();

            if !std.is_finite() || std <= DEGENERATE_RELATIVE_STD * mean.abs().max(1.0) {
                return Err(SegmentError::DegenerateFeature {
                    feature: feature_name(j),
                    reason: "column is constant".to_string(),
                });
            }

            means.push(mean);
            std_devs.push(std);
        }

        Ok(Self { means, std_devs })
    }

    /// Number of attributes these parameters were fit on
    pub fn arity(&self) -> usize {
        self.means.len()
    }

    pub fn means(&self) -> &[f64] {
        &self.means
    }

    pub fn std_devs(&self) -> &[f64] {
        &self.std_devs
    }

    /// Apply `(value - mean) / std` per attribute
    pub fn transform(&self, observation: ArrayView1<f64>) -> crate::Result<Array1<f64>> {
        if observation.len() != self.arity() {
            return Err(SegmentError::ModelVersionMismatch(format!(
                "normalizer fit on {} attributes cannot transform a {}-attribute point",
                self.arity(),
                observation.len()
            )));
        }
        Ok(observation
            .iter()
            .zip(self.means.iter().zip(&self.std_devs))
            .map(|(&v, (&mean, &std))| (v - mean) / std)
            .collect())
    }

    pub fn transform_observation(&self, observation: &RawObservation) -> crate::Result<Array1<f64>> {
        let values = observation.to_array();
        self.transform(ArrayView1::from(&values[..]))
    }

    /// Transform every row of a matrix
    pub fn transform_matrix(&self, data: ArrayView2<f64>) -> crate::Result<Array2<f64>> {
        if data.ncols() != self.arity() {
            return Err(SegmentError::ModelVersionMismatch(format!(
                "normalizer fit on {} attributes cannot transform {}-column data",
                self.arity(),
                data.ncols()
            )));
        }
        let mut scaled = data.to_owned();
        for (j, mut column) in scaled.axis_iter_mut(Axis(1)).enumerate() {
            let (mean, std) = (self.means[j], self.std_devs[j]);
            column.mapv_inplace(|v| (v - mean) / std);
        }
        Ok(scaled)
    }
}

fn feature_name(column: usize) -> String {
    Feature::ALL
        .get(column)
        .map(|f| f.name().to_string())
        .unwrap_or_else(|| format!("column {}", column))
}
