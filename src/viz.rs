//! Aggregate views over the assignment ledger, emitted as data for an external renderer

use crate::data::Feature;
use crate::ledger::AssignmentRecord;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::Path;
use tracing::info;

/// Attribute pairs plotted against each other, as (x, y)
pub const FEATURE_PAIRS: [(Feature, Feature); 3] = [
    (Feature::Age, Feature::Income),
    (Feature::Age, Feature::SpendingScore),
    (Feature::Income, Feature::SpendingScore),
];

/// One scatter point colored by cluster label
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScatterPoint {
    pub x: i64,
    pub y: i64,
    pub label: usize,
}

/// Named 2-D series for one attribute pair
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScatterSeries {
    /// e.g. `income_vs_score`
    pub name: String,
    pub title: String,
    pub x: Feature,
    pub y: Feature,
    pub x_label: String,
    pub y_label: String,
    pub points: Vec<ScatterPoint>,
}

/// Everything the renderer needs for one dashboard refresh
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AggregateViews {
    pub scatter: Vec<ScatterSeries>,
    /// Label -> number of assignments, ascending by label
    pub population: BTreeMap<usize, usize>,
    pub total: usize,
}

impl AggregateViews {
    /// Look up a scatter series by name
    pub fn series(&self, name: &str) -> Option<&ScatterSeries> {
        self.scatter.iter().find(|s| s.name == name)
    }
}

/// Build scatter series and population counts from a ledger snapshot
///
/// Returns `None` for an empty snapshot.
pub fn build_views(snapshot: &[AssignmentRecord]) -> Option<AggregateViews> {
    if snapshot.is_empty() {
        return None;
    }

    let scatter = FEATURE_PAIRS
        .iter()
        .map(|&(x, y)| ScatterSeries {
            name: format!("{}_vs_{}", x.short_name(), y.short_name()),
            title: format!("{} vs. {}", display_name(x), display_name(y)),
            x,
            y,
            x_label: x.axis_label().to_string(),
            y_label: y.axis_label().to_string(),
            points: snapshot
                .iter()
                .map(|record| ScatterPoint {
                    x: record.observation.get(x),
                    y: record.observation.get(y),
                    label: record.label,
                })
                .collect(),
        })
        .collect();

    let mut population = BTreeMap::new();
    for record in snapshot {
        *population.entry(record.label).or_insert(0) += 1;
    }

    Some(AggregateViews {
        scatter,
        population,
        total: snapshot.len(),
    })
}

/// Write views as pretty JSON for the rendering side
pub fn write_views_json(views: &AggregateViews, output_path: impl AsRef<Path>) -> crate::Result<()> {
    let output_path = output_path.as_ref();
    if let Some(parent) = output_path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)?;
    }
    fs::write(output_path, serde_json::to_vec_pretty(views)?)?;
    info!(path = %output_path.display(), points = views.total, "Views written");
    Ok(())
}

fn display_name(feature: Feature) -> &'static str {
    match feature {
        Feature::Age => "Age",
        Feature::Income => "Income",
        Feature::SpendingScore => "Spending Score",
    }
}
