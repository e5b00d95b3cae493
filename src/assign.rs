//! Assignment of new customers to the clusters of a loaded model

use crate::data::RawObservation;
use crate::ledger::{AssignmentRecord, Ledger};
use crate::store::SegmentationModel;
use crate::viz::{build_views, AggregateViews};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, warn};

/// Validate, normalize with the model's frozen parameters, and return the
/// label of the nearest centroid (lowest label on ties)
pub fn assign(model: &SegmentationModel, raw: &RawObservation) -> crate::Result<usize> {
    raw.validate()?;
    let normalized = model.normalizer().transform_observation(raw)?;
    Ok(model.centroids().nearest(normalized.view()))
}

/// Outcome of one inference request
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Prediction {
    pub label: usize,
    /// Fingerprint of the model that produced `label`
    pub model_id: String,
}

/// Request-facing service: one shared read-only model plus the run's ledger
///
/// Cheap to clone; clones share the model and the ledger.
#[derive(Debug, Clone)]
pub struct Segmenter {
    model: Arc<SegmentationModel>,
    ledger: Ledger,
}

impl Segmenter {
    pub fn new(model: Arc<SegmentationModel>, ledger: Ledger) -> Self {
        Self { model, ledger }
    }

    pub fn model(&self) -> &SegmentationModel {
        &self.model
    }

    pub fn ledger(&self) -> &Ledger {
        &self.ledger
    }

    /// Assign one observation and record it; rejected observations are not recorded
    pub fn predict(&self, raw: &RawObservation) -> crate::Result<Prediction> {
        let label = match assign(&self.model, raw) {
            Ok(label) => label,
            Err(err) => {
                warn!(?raw, error = %err, "Observation rejected");
                return Err(err);
            }
        };

        self.ledger.append(AssignmentRecord {
            observation: *raw,
            label,
        });
        debug!(?raw, label, "Observation assigned");

        Ok(Prediction {
            label,
            model_id: self.model.id().to_string(),
        })
    }

    /// Assign many observations in parallel; results keep input order
    pub fn predict_batch(&self, observations: &[RawObservation]) -> Vec<crate::Result<Prediction>> {
        observations.par_iter().map(|raw| self.predict(raw)).collect()
    }

    /// Assign rows loaded from a batch file, keeping input order
    ///
    /// Rows that failed to load are passed through as-is, so one bad row
    /// never hides the results of the others.
    pub fn predict_rows(
        &self,
        rows: Vec<crate::Result<RawObservation>>,
    ) -> Vec<crate::Result<(RawObservation, Prediction)>> {
        rows.into_par_iter()
            .map(|row| {
                let raw = row.inspect_err(|err| warn!(error = %err, "Batch row rejected"))?;
                self.predict(&raw).map(|prediction| (raw, prediction))
            })
            .collect()
    }

    /// Views over everything recorded so far
    pub fn views(&self) -> Option<AggregateViews> {
        build_views(&self.ledger.snapshot())
    }
}
