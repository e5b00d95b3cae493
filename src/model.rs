//! K-Means partition training over normalized features

use crate::error::SegmentError;
use ndarray::{Array1, Array2, ArrayView1, ArrayView2, Axis};
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use serde::{Deserialize, Serialize};
use std::ops::RangeInclusive;
use std::sync::atomic::{AtomicBool, Ordering};
#[cfg(test)]
use std::sync::atomic::AtomicUsize;
use std::sync::Arc;
use tracing::{debug, info};

/// Shared flag checked by the trainer at every iteration boundary
#[derive(Debug, Clone, Default)]
pub struct CancelFlag {
    raised: Arc<AtomicBool>,
    /// Checks allowed before the flag raises itself
    #[cfg(test)]
    trip_after: Option<Arc<AtomicUsize>>,
}

impl CancelFlag {
    pub fn new() -> Self {
        Self::default()
    }

    /// Flag that raises itself on the check after `checks` checks have passed
    #[cfg(test)]
    pub(crate) fn tripping_after(checks: usize) -> Self {
        Self {
            trip_after: Some(Arc::new(AtomicUsize::new(checks))),
            ..Self::default()
        }
    }

    pub fn cancel(&self) {
        self.raised.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        #[cfg(test)]
        self.count_check();
        self.raised.load(Ordering::SeqCst)
    }

    #[cfg(test)]
    fn count_check(&self) {
        if let Some(left) = &self.trip_after {
            if left
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                .is_err()
            {
                self.cancel();
            }
        }
    }
}

/// K-Means hyperparameters
#[derive(Debug, Clone, PartialEq)]
pub struct KMeansParams {
    /// Number of clusters (K)
    pub n_clusters: usize,
    /// Upper bound on relocation iterations per restart
    pub max_iters: usize,
    /// Stop once no centroid moves further than this
    pub tolerance: f64,
    /// Number of seeded restarts; the lowest-inertia one is kept
    pub n_init: usize,
    pub seed: u64,
}

impl KMeansParams {
    pub fn new(n_clusters: usize) -> Self {
        Self {
            n_clusters,
            max_iters: 300,
            tolerance: 1e-4,
            n_init: 10,
            seed: 42,
        }
    }

    pub fn max_iters(mut self, max_iters: usize) -> Self {
        self.max_iters = max_iters;
        self
    }

    pub fn tolerance(mut self, tolerance: f64) -> Self {
        self.tolerance = tolerance;
        self
    }

    pub fn n_init(mut self, n_init: usize) -> Self {
        self.n_init = n_init;
        self
    }

    pub fn seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }

    pub fn validate(&self) -> crate::Result<()> {
        if self.n_clusters == 0 {
            return Err(SegmentError::InvalidParameter("number of clusters must be >= 1".into()));
        }
        if self.max_iters == 0 {
            return Err(SegmentError::InvalidParameter("max_iters must be >= 1".into()));
        }
        if self.n_init == 0 {
            return Err(SegmentError::InvalidParameter("n_init must be >= 1".into()));
        }
        if !self.tolerance.is_finite() || self.tolerance < 0.0 {
            return Err(SegmentError::InvalidParameter(format!(
                "tolerance must be a finite non-negative number, got {}",
                self.tolerance
            )));
        }
        Ok(())
    }
}

/// Ordered centroids in normalized space; row `i` carries label `i`
#[derive(Debug, Clone, PartialEq)]
pub struct CentroidSet {
    positions: Array2<f64>,
}

impl CentroidSet {
    /// Wrap centroid positions, rejecting empty, non-finite or coincident centroids
    pub fn new(positions: Array2<f64>) -> crate::Result<Self> {
        if positions.nrows() == 0 || positions.ncols() == 0 {
            return Err(SegmentError::InvalidParameter(
                "centroid set needs at least one centroid of non-zero dimension".into(),
            ));
        }
        if positions.iter().any(|v| !v.is_finite()) {
            return Err(SegmentError::InvalidParameter("centroid positions must be finite".into()));
        }
        for i in 0..positions.nrows() {
            for j in (i + 1)..positions.nrows() {
                if positions.row(i) == positions.row(j) {
                    return Err(SegmentError::InvalidParameter(format!(
                        "centroids {} and {} occupy the same point",
                        i, j
                    )));
                }
            }
        }
        Ok(Self { positions })
    }

    /// Number of clusters
    pub fn k(&self) -> usize {
        self.positions.nrows()
    }

    /// Dimensionality of each centroid
    pub fn dimension(&self) -> usize {
        self.positions.ncols()
    }

    pub fn positions(&self) -> ArrayView2<'_, f64> {
        self.positions.view()
    }

    /// `(label, position)` pairs in label order
    pub fn iter(&self) -> impl Iterator<Item = (usize, ArrayView1<'_, f64>)> {
        self.positions.outer_iter().enumerate()
    }

    /// Label of the nearest centroid; ties go to the lowest label
    pub fn nearest(&self, point: ArrayView1<f64>) -> usize {
        nearest_centroid(point, self.positions.view()).0
    }
}

/// Result of fitting K-Means on a training matrix
#[derive(Debug, Clone)]
pub struct FittedPartition {
    pub centroids: CentroidSet,
    /// Cluster assignments for the training rows
    pub labels: Array1<usize>,
    /// Within-cluster sum of squares (inertia)
    pub inertia: f64,
    /// Relocation iterations used by the kept restart
    pub n_iter: usize,
}

impl FittedPartition {
    pub fn n_clusters(&self) -> usize {
        self.centroids.k()
    }

    /// Get cluster sizes
    pub fn cluster_sizes(&self) -> Vec<usize> {
        let mut sizes = vec![0; self.n_clusters()];
        for &label in self.labels.iter() {
            sizes[label] += 1;
        }
        sizes
    }

    /// Compute the silhouette coefficient over the first `sample_size` training rows
    pub fn silhouette_sample(&self, features: ArrayView2<f64>, sample_size: usize) -> f64 {
        let n_samples = features.nrows().min(sample_size).min(self.labels.len());
        if n_samples < 2 {
            return 0.0;
        }

        let k = self.n_clusters();
        let mut silhouette_sum = 0.0;

        for i in 0..n_samples {
            let point = features.row(i);
            let own_label = self.labels[i];

            let mut own_distances = Vec::new();
            let mut other_distances: Vec<Vec<f64>> = vec![Vec::new(); k];

            for j in 0..n_samples {
                if i == j {
                    continue;
                }
                let distance = squared_distance(point, features.row(j)).sqrt();
                if self.labels[j] == own_label {
                    own_distances.push(distance);
                } else {
                    other_distances[self.labels[j]].push(distance);
                }
            }

            let a_i = mean_or_zero(&own_distances);
            let b_i = other_distances
                .iter()
                .filter(|d| !d.is_empty())
                .map(|d| mean_or_zero(d))
                .fold(f64::INFINITY, f64::min);

            if !b_i.is_infinite() && (a_i > 0.0 || b_i > 0.0) {
                silhouette_sum += (b_i - a_i) / a_i.max(b_i);
            }
        }

        silhouette_sum / n_samples as f64
    }
}

/// Inertia recorded for one candidate K of a model-selection sweep
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ElbowPoint {
    pub k: usize,
    pub inertia: f64,
}

/// Fit K-Means with k-means++ seeding
///
/// Each restart alternates nearest-centroid assignment and centroid
/// recomputation until assignments stop changing, the largest centroid shift
/// is within `tolerance`, or `max_iters` is reached. A cluster that loses all
/// its members mid-run keeps its previous centroid and may win points back;
/// only the final assignment must populate every cluster. The same data,
/// params and seed always yield the same centroids.
///
/// # Errors
/// * `EmptyCluster` when every restart ends with some cluster without members
/// * `Cancelled` when `cancel` is raised between iterations
pub fn fit_kmeans(
    data: ArrayView2<f64>,
    params: &KMeansParams,
    cancel: &CancelFlag,
) -> crate::Result<FittedPartition> {
    params.validate()?;
    if data.nrows() == 0 || data.ncols() == 0 {
        return Err(SegmentError::InvalidParameter("cannot cluster an empty dataset".into()));
    }

    let mut rng = ChaCha8Rng::seed_from_u64(params.seed);
    let runs = (0..params.n_init).map(|_| fit_single(data, params, &mut rng, cancel));
    best_restart(runs, params.n_clusters)
}

/// Keep the lowest-inertia restart, earliest on ties
///
/// Restarts ending in `EmptyCluster` are skipped; any other error stops the
/// fit at once. When no restart succeeds the last `EmptyCluster` is returned.
fn best_restart(
    runs: impl IntoIterator<Item = crate::Result<FittedPartition>>,
    k: usize,
) -> crate::Result<FittedPartition> {
    let mut best: Option<FittedPartition> = None;
    let mut last_error = None;

    for (run, result) in runs.into_iter().enumerate() {
        match result {
            Ok(fitted) => {
                debug!(
                    run,
                    k,
                    inertia = fitted.inertia,
                    iterations = fitted.n_iter,
                    "K-Means restart finished"
                );
                if best.as_ref().map_or(true, |b| fitted.inertia < b.inertia) {
                    best = Some(fitted);
                }
            }
            Err(err @ SegmentError::EmptyCluster { .. }) => {
                debug!(run, k, error = %err, "K-Means restart discarded");
                last_error = Some(err);
            }
            Err(err) => return Err(err),
        }
    }

    match best {
        Some(fitted) => Ok(fitted),
        None => Err(last_error.unwrap_or(SegmentError::EmptyCluster { k, cluster: 0 })),
    }
}

/// Run the fit for every K in `candidates` and record its inertia
///
/// K is not chosen automatically; an operator reads the elbow off the result.
pub fn select_k(
    data: ArrayView2<f64>,
    candidates: RangeInclusive<usize>,
    template: &KMeansParams,
    cancel: &CancelFlag,
) -> crate::Result<Vec<ElbowPoint>> {
    if candidates.is_empty() || *candidates.start() == 0 {
        return Err(SegmentError::InvalidParameter(format!(
            "candidate range {}..={} must be non-empty and start at 1 or more",
            candidates.start(),
            candidates.end()
        )));
    }

    let mut points = Vec::new();
    for k in candidates {
        let params = KMeansParams {
            n_clusters: k,
            ..template.clone()
        };
        let fitted = fit_kmeans(data, &params, cancel)?;
        info!(k, inertia = fitted.inertia, "Elbow candidate evaluated");
        points.push(ElbowPoint {
            k,
            inertia: fitted.inertia,
        });
    }
    Ok(points)
}

fn fit_single(
    data: ArrayView2<f64>,
    params: &KMeansParams,
    rng: &mut ChaCha8Rng,
    cancel: &CancelFlag,
) -> crate::Result<FittedPartition> {
    let k = params.n_clusters;
    let mut centroids = init_plus_plus(data, k, rng)?;
    let mut labels = assign_all(data, centroids.view());

    let mut n_iter = 0;
    while n_iter < params.max_iters {
        if cancel.is_cancelled() {
            return Err(SegmentError::Cancelled { iterations: n_iter });
        }
        n_iter += 1;

        let updated = recompute_centroids(data, &labels, centroids.view());
        let shift = max_shift(centroids.view(), updated.view());
        centroids = updated;

        let new_labels = assign_all(data, centroids.view());
        let changed = new_labels != labels;
        labels = new_labels;

        if !changed || shift <= params.tolerance {
            break;
        }
    }

    ensure_no_empty(&labels, k)?;
    let inertia = compute_inertia(data, &labels, centroids.view());
    // Every cluster kept at least one member, so no two centroids coincide
    let centroids = CentroidSet::new(centroids).map_err(|_| SegmentError::EmptyCluster { k, cluster: 0 })?;

    Ok(FittedPartition {
        centroids,
        labels,
        inertia,
        n_iter,
    })
}

/// k-means++ seeding: the first centroid is drawn uniformly, later ones with
/// probability proportional to squared distance from the nearest chosen centroid
fn init_plus_plus(data: ArrayView2<f64>, k: usize, rng: &mut ChaCha8Rng) -> crate::Result<Array2<f64>> {
    let n_samples = data.nrows();
    let mut centroids = Array2::zeros((k, data.ncols()));

    let first = rng.gen_range(0..n_samples);
    centroids.row_mut(0).assign(&data.row(first));

    let mut closest_sq: Vec<f64> = data
        .outer_iter()
        .map(|row| squared_distance(row, centroids.row(0)))
        .collect();

    for cluster in 1..k {
        let total: f64 = closest_sq.iter().sum();
        if total <= 0.0 {
            // Fewer distinct points than clusters
            return Err(SegmentError::EmptyCluster { k, cluster });
        }

        let mut target = rng.gen::<f64>() * total;
        let mut chosen = 0;
        for (i, &d) in closest_sq.iter().enumerate() {
            if d <= 0.0 {
                continue;
            }
            chosen = i;
            if target < d {
                break;
            }
            target -= d;
        }

        centroids.row_mut(cluster).assign(&data.row(chosen));
        for (i, row) in data.outer_iter().enumerate() {
            let d = squared_distance(row, centroids.row(cluster));
            if d < closest_sq[i] {
                closest_sq[i] = d;
            }
        }
    }

    Ok(centroids)
}

/// Index and squared distance of the nearest centroid; ties go to the lowest index
pub(crate) fn nearest_centroid(point: ArrayView1<f64>, centroids: ArrayView2<f64>) -> (usize, f64) {
    let mut closest = 0;
    let mut min_distance = f64::INFINITY;

    for (idx, centroid) in centroids.outer_iter().enumerate() {
        let distance = squared_distance(point, centroid);
        if distance < min_distance {
            min_distance = distance;
            closest = idx;
        }
    }

    (closest, min_distance)
}

fn assign_all(data: ArrayView2<f64>, centroids: ArrayView2<f64>) -> Array1<usize> {
    data.outer_iter()
        .map(|row| nearest_centroid(row, centroids).0)
        .collect()
}

fn ensure_no_empty(labels: &Array1<usize>, k: usize) -> crate::Result<()> {
    let mut sizes = vec![0usize; k];
    for &label in labels.iter() {
        sizes[label] += 1;
    }
    match sizes.iter().position(|&s| s == 0) {
        Some(cluster) => Err(SegmentError::EmptyCluster { k, cluster }),
        None => Ok(()),
    }
}

/// Mean of each cluster's members; a cluster without members keeps its position
fn recompute_centroids(
    data: ArrayView2<f64>,
    labels: &Array1<usize>,
    previous: ArrayView2<f64>,
) -> Array2<f64> {
    let k = previous.nrows();
    let mut sums = Array2::<f64>::zeros((k, data.ncols()));
    let mut counts = vec![0usize; k];

    for (row, &label) in data.outer_iter().zip(labels.iter()) {
        let mut sum = sums.row_mut(label);
        sum += &row;
        counts[label] += 1;
    }

    for ((mut sum, &count), old) in sums
        .axis_iter_mut(Axis(0))
        .zip(&counts)
        .zip(previous.outer_iter())
    {
        if count > 0 {
            sum /= count as f64;
        } else {
            sum.assign(&old);
        }
    }
    sums
}

fn max_shift(before: ArrayView2<f64>, after: ArrayView2<f64>) -> f64 {
    before
        .outer_iter()
        .zip(after.outer_iter())
        .map(|(a, b)| squared_distance(a, b).sqrt())
        .fold(0.0, f64::max)
}

/// Compute within-cluster sum of squares (inertia)
pub fn compute_inertia(data: ArrayView2<f64>, labels: &Array1<usize>, centroids: ArrayView2<f64>) -> f64 {
    data.outer_iter()
        .zip(labels.iter())
        .map(|(row, &label)| squared_distance(row, centroids.row(label)))
        .sum()
}

fn squared_distance(a: ArrayView1<f64>, b: ArrayView1<f64>) -> f64 {
    a.iter().zip(b.iter()).map(|(x, y)| (x - y).powi(2)).sum()
}

fn mean_or_zero(values: &[f64]) -> f64 {
    if values.is_empty() {
        0.0
    } else {
        values.iter().sum::<f64>() / values.len() as f64
    }
}
