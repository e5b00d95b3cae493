//! Command-line interface definitions and argument parsing

use crate::config::SegmentConfig;
use crate::data::RawObservation;
use clap::{Args as ClapArgs, Parser, Subcommand};
use std::path::PathBuf;

/// Customer segmentation CLI: K-Means on age, income and spending score
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Args {
    /// Path to a segmentforge.toml config file
    #[arg(short, long, global = true, env = "SEGMENTFORGE_CONFIG")]
    pub config: Option<PathBuf>,

    /// Enable verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Fit the normalizer and K-Means on a reference dataset and save the model
    Train(TrainArgs),
    /// Report inertia for a range of K to pick the elbow
    Elbow(ElbowArgs),
    /// Assign new customers to segments using a saved model
    Predict(PredictArgs),
}

#[derive(ClapArgs, Debug)]
pub struct TrainArgs {
    /// Path to the reference CSV (Age, Income, SpendingScore)
    #[arg(short, long, env = "SEGMENTFORGE_DATA", default_value = "dataset/customers.csv")]
    pub input: PathBuf,

    /// Where to write the model artifact
    #[arg(short, long, env = "SEGMENTFORGE_MODEL", default_value = "models/segmentation.json")]
    pub model: PathBuf,

    /// Number of clusters
    #[arg(short = 'k', long)]
    pub clusters: Option<usize>,

    /// Random seed for k-means++ seeding
    #[arg(long)]
    pub seed: Option<u64>,

    /// Maximum iterations per restart
    #[arg(long)]
    pub max_iters: Option<usize>,

    /// Centroid shift tolerance for convergence
    #[arg(long)]
    pub tolerance: Option<f64>,

    /// Number of seeded restarts
    #[arg(long)]
    pub n_init: Option<usize>,

    /// Also write the reference rows with their cluster to this CSV
    #[arg(long)]
    pub clustered_output: Option<PathBuf>,
}

impl TrainArgs {
    /// Apply flags given on the command line over `config`
    pub fn apply(&self, config: &mut SegmentConfig) {
        if let Some(clusters) = self.clusters {
            config.clusters = clusters;
        }
        if let Some(seed) = self.seed {
            config.seed = seed;
        }
        if let Some(max_iters) = self.max_iters {
            config.max_iters = max_iters;
        }
        if let Some(tolerance) = self.tolerance {
            config.tolerance = tolerance;
        }
        if let Some(n_init) = self.n_init {
            config.n_init = n_init;
        }
    }
}

#[derive(ClapArgs, Debug)]
pub struct ElbowArgs {
    /// Path to the reference CSV (Age, Income, SpendingScore)
    #[arg(short, long, env = "SEGMENTFORGE_DATA", default_value = "dataset/customers.csv")]
    pub input: PathBuf,

    /// Smallest K to try
    #[arg(long)]
    pub min_k: Option<usize>,

    /// Largest K to try
    #[arg(long)]
    pub max_k: Option<usize>,

    /// Random seed for k-means++ seeding
    #[arg(long)]
    pub seed: Option<u64>,

    /// Print the sweep as JSON instead of a table
    #[arg(long)]
    pub json: bool,
}

impl ElbowArgs {
    pub fn apply(&self, config: &mut SegmentConfig) {
        if let Some(min_k) = self.min_k {
            config.elbow_min_k = min_k;
        }
        if let Some(max_k) = self.max_k {
            config.elbow_max_k = max_k;
        }
        if let Some(seed) = self.seed {
            config.seed = seed;
        }
    }
}

#[derive(ClapArgs, Debug)]
pub struct PredictArgs {
    /// Saved model artifact
    #[arg(short, long, env = "SEGMENTFORGE_MODEL", default_value = "models/segmentation.json")]
    pub model: PathBuf,

    /// Customer as "age,income,score", e.g. --observation "30,60,70"; repeatable
    #[arg(short, long = "observation")]
    pub observations: Vec<String>,

    /// CSV of customers to assign in parallel
    #[arg(short, long)]
    pub batch: Option<PathBuf>,

    /// Write aggregate views as JSON to this path instead of stdout
    #[arg(long)]
    pub views: Option<PathBuf>,
}

impl PredictArgs {
    /// Parse every `--observation`, keeping the input text next to each result
    pub fn parse_observations(&self) -> Vec<(&str, crate::Result<RawObservation>)> {
        self.observations
            .iter()
            .map(|text| (text.as_str(), text.parse::<RawObservation>()))
            .collect()
    }
}
