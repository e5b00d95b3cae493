//! SegmentForge: customer segmentation CLI
//!
//! Entry point dispatching training, the elbow sweep and prediction.

use anyhow::{Context, Result};
use clap::Parser;
use segmentforge::cli::{Command, ElbowArgs, PredictArgs, TrainArgs};
use segmentforge::{
    load_dataset, load_observations, pipeline, viz, Args, CancelFlag, Ledger, Prediction,
    RawObservation, SegmentConfig, SegmentationModel, Segmenter,
};
use std::sync::Arc;
use std::time::Instant;
use tracing::{info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

fn main() -> Result<()> {
    let args = Args::parse();

    let default_level = if args.verbose { "debug" } else { "info" };
    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)))
        .init();

    let mut config = SegmentConfig::load_or_default(args.config.as_deref())
        .context("Failed to load configuration")?;

    match &args.command {
        Command::Train(train) => {
            train.apply(&mut config);
            run_train(train, &config)
        }
        Command::Elbow(elbow) => {
            elbow.apply(&mut config);
            run_elbow(elbow, &config)
        }
        Command::Predict(predict) => run_predict(predict, &config),
    }
}

/// Fit and persist a model
fn run_train(args: &TrainArgs, config: &SegmentConfig) -> Result<()> {
    println!("=== Training ===\n");
    let start_time = Instant::now();

    let rows = load_dataset(&args.input)
        .with_context(|| format!("Failed to load dataset {}", args.input.display()))?;
    println!("✓ Data loaded: {} customers", rows.len());

    let params = config.kmeans_params();
    let outcome = match pipeline::train_and_save(&rows, &params, &args.model, &CancelFlag::new()) {
        Ok(outcome) => outcome,
        Err(err) if err.is_retryable_fit() => {
            return Err(err).context("Training failed; no model was written (try a smaller K or another seed)")
        }
        Err(err) => return Err(err).context("Training failed; no model was written"),
    };

    println!("✓ Model fitted and saved to {}", args.model.display());
    println!("  Model id: {}", outcome.model.id());

    println!("\n=== Cluster Statistics ===");
    for (label, size) in outcome.partition.cluster_sizes().iter().enumerate() {
        let percentage = (*size as f64 / rows.len() as f64) * 100.0;
        println!("Cluster {}: {} customers ({:.1}%)", label, size, percentage);
    }

    let silhouette = outcome
        .partition
        .silhouette_sample(outcome.normalized.view(), 100.min(rows.len()));
    println!("\nSilhouette score (sample): {:.3}", silhouette);
    println!("Within-cluster sum of squares: {:.2}", outcome.partition.inertia);

    println!("\nCluster centroids (normalized):");
    println!("  Cluster |     Age |  Income |   Score");
    println!("  --------|---------|---------|--------");
    for (label, centroid) in outcome.model.centroids().iter() {
        println!(
            "  {:7} | {:7.2} | {:7.2} | {:7.2}",
            label, centroid[0], centroid[1], centroid[2]
        );
    }

    if let Some(path) = &args.clustered_output {
        let labels = outcome.partition.labels.to_vec();
        pipeline::write_clustered_csv(&rows, &labels, path)
            .with_context(|| format!("Failed to write {}", path.display()))?;
        println!("\nClustered dataset saved to: {}", path.display());
    }

    println!("\nTotal processing time: {:.2}s", start_time.elapsed().as_secs_f64());
    Ok(())
}

/// Print inertia per candidate K
fn run_elbow(args: &ElbowArgs, config: &SegmentConfig) -> Result<()> {
    let rows = load_dataset(&args.input)
        .with_context(|| format!("Failed to load dataset {}", args.input.display()))?;

    let points = pipeline::elbow(&rows, config.elbow_range(), &config.kmeans_params(), &CancelFlag::new())
        .context("Elbow sweep failed")?;

    if args.json {
        println!("{}", serde_json::to_string_pretty(&points)?);
        return Ok(());
    }

    println!("=== Elbow Method ===");
    println!("   K |      Inertia");
    println!("  ---|-------------");
    for point in &points {
        println!("  {:2} | {:12.2}", point.k, point.inertia);
    }
    Ok(())
}

/// Assign observations with a saved model and report views
fn run_predict(args: &PredictArgs, config: &SegmentConfig) -> Result<()> {
    // The service does not start without a valid model
    let model = SegmentationModel::load(&args.model)
        .with_context(|| format!("Cannot serve without a valid model at {}", args.model.display()))?;
    info!(model_id = %model.id(), k = model.centroids().k(), "Model ready");

    let ledger = config.ledger_capacity().map_or_else(Ledger::new, Ledger::with_capacity);
    info!(capacity = ?ledger.capacity(), "Ledger ready");
    let segmenter = Segmenter::new(Arc::new(model), ledger);

    for (text, parsed) in args.parse_observations() {
        let result = parsed.and_then(|raw| segmenter.predict(&raw).map(|p| (raw, p)));
        match result {
            Ok((raw, prediction)) => report_prediction(&raw, &prediction),
            Err(err) if err.is_request_error() => println!("✗ '{}' rejected: {}", text, err),
            Err(err) => return Err(err).context("Prediction failed"),
        }
    }

    if let Some(batch_path) = &args.batch {
        let rows = load_observations(batch_path)
            .with_context(|| format!("Failed to load batch {}", batch_path.display()))?;
        let mut rejected = 0;
        for (row, result) in segmenter.predict_rows(rows).into_iter().enumerate() {
            match result {
                Ok((raw, prediction)) => report_prediction(&raw, &prediction),
                Err(err) if err.is_request_error() => {
                    println!("✗ batch row {} rejected: {}", row + 1, err);
                    rejected += 1;
                }
                Err(err) => return Err(err).context("Batch prediction failed"),
            }
        }
        if rejected > 0 {
            warn!(rejected, "Some batch rows were rejected");
        }
    }

    let Some(views) = segmenter.views() else {
        println!("\nNo assignments recorded; no views to build.");
        return Ok(());
    };

    println!("\n=== Cluster Distribution ===");
    for (label, count) in &views.population {
        println!("Cluster {}: {} customers", label, count);
    }

    match &args.views {
        Some(path) => {
            viz::write_views_json(&views, path)
                .with_context(|| format!("Failed to write views to {}", path.display()))?;
            println!("Views saved to: {}", path.display());
        }
        None => println!("\n{}", serde_json::to_string_pretty(&views)?),
    }

    Ok(())
}

fn report_prediction(raw: &RawObservation, prediction: &Prediction) {
    println!(
        "✓ Customer (age {}, income {}k, score {}) belongs to Cluster {}",
        raw.age, raw.income, raw.spending_score, prediction.label
    );
}
