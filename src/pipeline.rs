//! Training entry point: normalize, fit, and persist the model pair

use crate::data::{to_feature_matrix, RawObservation};
use crate::error::SegmentError;
use crate::model::{fit_kmeans, select_k, CancelFlag, ElbowPoint, FittedPartition, KMeansParams};
use crate::scaler::NormalizationParameters;
use crate::store::SegmentationModel;
use ndarray::Array2;
use polars::prelude::*;
use std::fs::{self, File};
use std::ops::RangeInclusive;
use std::path::Path;
use tracing::info;

/// Everything produced by one training run
#[derive(Debug, Clone)]
pub struct TrainingOutcome {
    pub model: SegmentationModel,
    pub partition: FittedPartition,
    /// Reference rows in normalized space, row-aligned with `partition.labels`
    pub normalized: Array2<f64>,
}

/// Fit the normalizer on `rows`, then K-Means on the normalized rows
pub fn train(rows: &[RawObservation], params: &KMeansParams, cancel: &CancelFlag) -> crate::Result<TrainingOutcome> {
    let raw = to_feature_matrix(rows);
    let normalizer = NormalizationParameters::fit(raw.view())?;
    let normalized = normalizer.transform_matrix(raw.view())?;

    info!(
        rows = rows.len(),
        k = params.n_clusters,
        seed = params.seed,
        "Fitting K-Means model"
    );
    let partition = fit_kmeans(normalized.view(), params, cancel)?;
    let model = SegmentationModel::new(normalizer, partition.centroids.clone())?;
    info!(
        model_id = %model.id(),
        inertia = partition.inertia,
        iterations = partition.n_iter,
        "Model fitted"
    );

    Ok(TrainingOutcome {
        model,
        partition,
        normalized,
    })
}

/// Train and persist; nothing is written unless the whole run succeeds
pub fn train_and_save(
    rows: &[RawObservation],
    params: &KMeansParams,
    model_path: impl AsRef<Path>,
    cancel: &CancelFlag,
) -> crate::Result<TrainingOutcome> {
    let outcome = train(rows, params, cancel)?;
    if cancel.is_cancelled() {
        return Err(SegmentError::Cancelled {
            iterations: outcome.partition.n_iter,
        });
    }
    outcome.model.save(model_path)?;
    Ok(outcome)
}

/// Normalize `rows` and record inertia for every K in `candidates`
pub fn elbow(
    rows: &[RawObservation],
    candidates: RangeInclusive<usize>,
    template: &KMeansParams,
    cancel: &CancelFlag,
) -> crate::Result<Vec<ElbowPoint>> {
    let raw = to_feature_matrix(rows);
    let normalizer = NormalizationParameters::fit(raw.view())?;
    let normalized = normalizer.transform_matrix(raw.view())?;
    select_k(normalized.view(), candidates, template, cancel)
}

/// Write the reference rows with their training cluster as a CSV
pub fn write_clustered_csv(
    rows: &[RawObservation],
    labels: &[usize],
    output_path: impl AsRef<Path>,
) -> crate::Result<()> {
    if rows.len() != labels.len() {
        return Err(SegmentError::InvalidParameter(format!(
            "{} rows but {} labels",
            rows.len(),
            labels.len()
        )));
    }

    let output_path = output_path.as_ref();
    if let Some(parent) = output_path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)?;
    }

    let mut df = DataFrame::new(vec![
        Series::new("Age", rows.iter().map(|r| r.age).collect::<Vec<i64>>()),
        Series::new("Income", rows.iter().map(|r| r.income).collect::<Vec<i64>>()),
        Series::new(
            "SpendingScore",
            rows.iter().map(|r| r.spending_score).collect::<Vec<i64>>(),
        ),
        Series::new("Cluster", labels.iter().map(|&l| l as u64).collect::<Vec<u64>>()),
    ])?;

    let mut file = File::create(output_path)?;
    CsvWriter::new(&mut file).include_header(true).finish(&mut df)?;
    info!(path = %output_path.display(), rows = rows.len(), "Clustered dataset written");
    Ok(())
}
