//! SegmentForge: customer segmentation with K-Means
//!
//! Training fits a standardization transform and a K-Means partition on
//! (age, income, spending score) and saves both as one artifact. Serving
//! loads that artifact once, assigns new customers with the same frozen
//! transform, and accumulates assignments for aggregate views.

pub mod assign;
pub mod cli;
pub mod config;
pub mod data;
pub mod error;
pub mod ledger;
pub mod model;
pub mod pipeline;
pub mod scaler;
pub mod store;
pub mod viz;

// Re-export public items for easier access
pub use assign::{assign, Prediction, Segmenter};
pub use cli::Args;
pub use config::SegmentConfig;
pub use data::{load_dataset, load_observations, Feature, RawObservation};
pub use error::SegmentError;
pub use ledger::{AssignmentRecord, Ledger};
pub use model::{fit_kmeans, select_k, CancelFlag, CentroidSet, ElbowPoint, FittedPartition, KMeansParams};
pub use pipeline::{elbow, train, train_and_save, TrainingOutcome};
pub use scaler::NormalizationParameters;
pub use store::SegmentationModel;
pub use viz::{build_views, AggregateViews};

/// Common result type used throughout the library
pub type Result<T> = std::result::Result<T, SegmentError>;
