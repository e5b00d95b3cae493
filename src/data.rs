//! Customer observations and reference dataset loading using Polars

use crate::error::SegmentError;
use ndarray::Array2;
use polars::prelude::*;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;
use tracing::{debug, info};

/// Number of attributes describing a customer
pub const N_FEATURES: usize = 3;

/// Highest valid spending score
pub const MAX_SPENDING_SCORE: i64 = 100;

/// Customer attribute, in the column order used everywhere in the crate
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Feature {
    Age,
    Income,
    SpendingScore,
}

impl Feature {
    pub const ALL: [Feature; N_FEATURES] = [Feature::Age, Feature::Income, Feature::SpendingScore];

    /// Stable identifier used in persisted artifacts
    pub fn name(self) -> &'static str {
        match self {
            Feature::Age => "age",
            Feature::Income => "income",
            Feature::SpendingScore => "spending_score",
        }
    }

    /// Short name used to build view series names
    pub fn short_name(self) -> &'static str {
        match self {
            Feature::Age => "age",
            Feature::Income => "income",
            Feature::SpendingScore => "score",
        }
    }

    /// Axis label for charts
    pub fn axis_label(self) -> &'static str {
        match self {
            Feature::Age => "Age",
            Feature::Income => "Annual Income (k$)",
            Feature::SpendingScore => "Spending Score (1-100)",
        }
    }

    /// CSV headers accepted for this feature
    fn column_aliases(self) -> &'static [&'static str] {
        match self {
            Feature::Age => &["Age"],
            Feature::Income => &["Income", "Annual Income (k$)"],
            Feature::SpendingScore => &["SpendingScore", "Spending Score (1-100)"],
        }
    }
}

impl fmt::Display for Feature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// One customer as received: age in years, income in thousands, spending score 1-100.
///
/// Fields are kept signed so out-of-range input can be represented and rejected
/// by [`RawObservation::validate`] instead of failing at parse time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawObservation {
    pub age: i64,
    pub income: i64,
    pub spending_score: i64,
}

impl RawObservation {
    pub fn new(age: i64, income: i64, spending_score: i64) -> Self {
        Self {
            age,
            income,
            spending_score,
        }
    }

    /// Check the attribute ranges accepted at the inference boundary
    pub fn validate(&self) -> crate::Result<()> {
        if self.age <= 0 {
            return Err(SegmentError::InvalidObservation(format!(
                "age must be a positive integer, got {}",
                self.age
            )));
        }
        if self.income <= 0 {
            return Err(SegmentError::InvalidObservation(format!(
                "income must be a positive integer, got {}",
                self.income
            )));
        }
        if !(1..=MAX_SPENDING_SCORE).contains(&self.spending_score) {
            return Err(SegmentError::InvalidObservation(format!(
                "spending score must be in [1, {}], got {}",
                MAX_SPENDING_SCORE, self.spending_score
            )));
        }
        Ok(())
    }

    pub fn get(&self, feature: Feature) -> i64 {
        match feature {
            Feature::Age => self.age,
            Feature::Income => self.income,
            Feature::SpendingScore => self.spending_score,
        }
    }

    /// Attribute values as a real-valued vector in [`Feature::ALL`] order
    pub fn to_array(&self) -> [f64; N_FEATURES] {
        [
            self.age as f64,
            self.income as f64,
            self.spending_score as f64,
        ]
    }
}

impl std::str::FromStr for RawObservation {
    type Err = SegmentError;

    /// Parse "age,income,score"
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let parts: Vec<&str> = s.split(',').map(str::trim).collect();
        if parts.len() != N_FEATURES {
            return Err(SegmentError::InvalidObservation(format!(
                "expected 'age,income,score', got '{}'",
                s
            )));
        }

        let parse = |feature: Feature, value: &str| {
            value.parse::<i64>().map_err(|_| {
                SegmentError::InvalidObservation(format!("invalid {} value: '{}'", feature, value))
            })
        };

        Ok(RawObservation {
            age: parse(Feature::Age, parts[0])?,
            income: parse(Feature::Income, parts[1])?,
            spending_score: parse(Feature::SpendingScore, parts[2])?,
        })
    }
}

/// Stack observations into an (n_samples, 3) matrix
pub fn to_feature_matrix(rows: &[RawObservation]) -> Array2<f64> {
    Array2::from_shape_fn((rows.len(), N_FEATURES), |(i, j)| rows[i].to_array()[j])
}

/// Load the reference dataset from a CSV file
///
/// Only the Age, Income and SpendingScore columns are read; other columns
/// such as CustomerID or Gender are ignored. Both the short headers and the
/// "Annual Income (k$)" / "Spending Score (1-100)" headers are accepted.
/// Training needs every row, so the first bad row fails the whole load.
pub fn load_dataset(path: impl AsRef<Path>) -> crate::Result<Vec<RawObservation>> {
    let rows = load_observations(path)?
        .into_iter()
        .collect::<crate::Result<Vec<_>>>()?;
    debug!(rows = rows.len(), "Reference dataset loaded");
    Ok(rows)
}

/// Load a CSV of observations, keeping one result per data row
///
/// Unreadable files and missing columns fail the call. A blank, non-numeric
/// or fractional cell only fails its own row with
/// [`SegmentError::InvalidObservation`], so batch inference can report it
/// and carry on with the rest.
pub fn load_observations(
    path: impl AsRef<Path>,
) -> crate::Result<Vec<crate::Result<RawObservation>>> {
    let path = path.as_ref();
    info!(path = %path.display(), "Loading observations");

    let df = CsvReadOptions::default()
        .with_has_header(true)
        .try_into_reader_with_file_path(Some(path.to_path_buf()))?
        .finish()?;

    observations_from_frame(&df)
}

/// Extract observations from an already-loaded frame, one result per row
pub fn observations_from_frame(
    df: &DataFrame,
) -> crate::Result<Vec<crate::Result<RawObservation>>> {
    let ages = integer_column(df, Feature::Age)?;
    let incomes = integer_column(df, Feature::Income)?;
    let scores = integer_column(df, Feature::SpendingScore)?;

    Ok(ages
        .into_iter()
        .zip(incomes)
        .zip(scores)
        .map(|((age, income), spending_score)| {
            Ok(RawObservation {
                age: age?,
                income: income?,
                spending_score: spending_score?,
            })
        })
        .collect())
}

fn integer_column(df: &DataFrame, feature: Feature) -> crate::Result<Vec<crate::Result<i64>>> {
    let series = feature
        .column_aliases()
        .iter()
        .find_map(|name| df.column(name).ok())
        .ok_or_else(|| {
            PolarsError::ColumnNotFound(
                format!(
                    "none of the columns {:?} found for {}",
                    feature.column_aliases(),
                    feature
                )
                .into(),
            )
        })?;

    let missing = |row: usize| {
        SegmentError::InvalidObservation(format!(
            "missing or non-numeric {} in row {}",
            feature,
            row + 1
        ))
    };

    if series.dtype().is_integer() {
        let values = series.cast(&DataType::Int64)?;
        return Ok(values
            .i64()?
            .into_iter()
            .enumerate()
            .map(|(row, value)| value.ok_or_else(|| missing(row)))
            .collect());
    }

    // Float and text columns go through f64; unparsable text becomes null
    let values = series.cast(&DataType::Float64)?;
    Ok(values
        .f64()?
        .into_iter()
        .enumerate()
        .map(|(row, value)| match value {
            None => Err(missing(row)),
            Some(v) if !v.is_finite() || v.fract() != 0.0 => {
                Err(SegmentError::InvalidObservation(format!(
                    "{} must be an integer, got {} in row {}",
                    feature,
                    v,
                    row + 1
                )))
            }
            Some(v) => Ok(v as i64),
        })
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn create_test_csv() -> NamedTempFile {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, "CustomerID,Gender,Age,Annual Income (k$),Spending Score (1-100)").unwrap();
        writeln!(file, "1,Male,19,15,39").unwrap();
        writeln!(file, "2,Male,21,15,81").unwrap();
        writeln!(file, "3,Female,20,16,6").unwrap();
        writeln!(file, "4,Female,23,16,77").unwrap();
        file
    }

    #[test]
    fn test_load_dataset_with_long_headers() {
        let file = create_test_csv();
        let rows = load_dataset(file.path()).unwrap();
        assert_eq!(rows.len(), 4);
        assert_eq!(rows[0], RawObservation::new(19, 15, 39));
        assert_eq!(rows[3], RawObservation::new(23, 16, 77));
    }

    #[test]
    fn test_load_dataset_with_short_headers() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, "Age,Income,SpendingScore").unwrap();
        writeln!(file, "35,60,50").unwrap();
        writeln!(file, "52,120,12").unwrap();

        let rows = load_dataset(file.path()).unwrap();
        assert_eq!(rows, vec![RawObservation::new(35, 60, 50), RawObservation::new(52, 120, 12)]);
    }

    #[test]
    fn test_load_dataset_missing_column() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, "Age,Income").unwrap();
        writeln!(file, "35,60").unwrap();

        let result = load_dataset(file.path());
        assert!(matches!(result, Err(SegmentError::Dataset(_))));
    }

    #[test]
    fn test_fractional_cells_are_rejected_not_truncated() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, "Age,Income,SpendingScore").unwrap();
        writeln!(file, "30,60,50").unwrap();
        writeln!(file, "30.9,60.7,100.9").unwrap();

        let rows = load_observations(file.path()).unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(*rows[0].as_ref().unwrap(), RawObservation::new(30, 60, 50));
        match &rows[1] {
            Err(SegmentError::InvalidObservation(msg)) => assert!(msg.contains("row 2"), "{msg}"),
            other => panic!("expected InvalidObservation, got {:?}", other),
        }

        assert!(matches!(
            load_dataset(file.path()),
            Err(SegmentError::InvalidObservation(_))
        ));
    }

    #[test]
    fn test_whole_floats_are_accepted() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, "Age,Income,SpendingScore").unwrap();
        writeln!(file, "30.0,60.0,50.0").unwrap();
        writeln!(file, "41.0,75.0,12.0").unwrap();

        let rows = load_dataset(file.path()).unwrap();
        assert_eq!(rows, vec![RawObservation::new(30, 60, 50), RawObservation::new(41, 75, 12)]);
    }

    #[test]
    fn test_blank_cell_fails_only_its_row() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, "Age,Income,SpendingScore").unwrap();
        writeln!(file, "30,60,50").unwrap();
        writeln!(file, "40,,50").unwrap();
        writeln!(file, "50,80,20").unwrap();

        let rows = load_observations(file.path()).unwrap();
        assert_eq!(rows.len(), 3);
        assert_eq!(*rows[0].as_ref().unwrap(), RawObservation::new(30, 60, 50));
        let err = rows[1].as_ref().unwrap_err();
        assert!(err.is_request_error());
        let msg = err.to_string();
        assert!(msg.contains("income") && msg.contains("row 2"), "{msg}");
        assert_eq!(*rows[2].as_ref().unwrap(), RawObservation::new(50, 80, 20));

        // Training stays strict
        assert!(load_dataset(file.path()).is_err());
    }

    #[test]
    fn test_validate_bounds() {
        assert!(RawObservation::new(30, 60, 1).validate().is_ok());
        assert!(RawObservation::new(30, 60, 100).validate().is_ok());

        for invalid in [
            RawObservation::new(30, 60, 0),
            RawObservation::new(30, 60, 101),
            RawObservation::new(0, 60, 50),
            RawObservation::new(30, -5, 50),
        ] {
            assert!(matches!(
                invalid.validate(),
                Err(SegmentError::InvalidObservation(_))
            ));
        }
    }

    #[test]
    fn test_parse_observation() {
        let obs: RawObservation = "30, 60,70".parse().unwrap();
        assert_eq!(obs, RawObservation::new(30, 60, 70));

        assert!("30,60".parse::<RawObservation>().is_err());
        assert!("thirty,60,70".parse::<RawObservation>().is_err());
    }

    #[test]
    fn test_to_feature_matrix() {
        let rows = vec![RawObservation::new(19, 15, 39), RawObservation::new(21, 15, 81)];
        let matrix = to_feature_matrix(&rows);
        assert_eq!(matrix.shape(), &[2, 3]);
        assert_eq!(matrix[[1, 2]], 81.0);
    }
}
