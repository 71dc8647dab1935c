use ndarray::{Array1, Array2, ArrayView1, ArrayView2, Axis};
use polars::prelude::*;
use rand::{Rng, SeedableRng};
use rand_pcg::Pcg64;
use tracing::{debug, warn};

use crate::data_loader::{has_column, numeric_values};
use crate::error::{FanSightError, Result};
use crate::feature_engineering::median;

/// Behavioral fields clustered when no feature subset is given.
pub const DEFAULT_SEGMENT_FEATURES: [&str; 5] = [
    "loyalty_score",
    "engagement_score",
    "avg_spend",
    "price_sensitivity",
    "touch_count_30d",
];

const MIN_RECORDS: usize = 3;

#[derive(Debug, Clone)]
pub struct KMeansConfig {
    pub max_iter: usize,
    pub tol: f64,
}

impl Default for KMeansConfig {
    fn default() -> Self {
        Self {
            max_iter: 300,
            tol: 1e-4,
        }
    }
}

/// Cluster ids aligned with the input rows, plus a silhouette score over
/// the standardized feature space.
#[derive(Debug, Clone)]
pub struct SegmentAssignment {
    pub assignments: Vec<usize>,
    pub k: usize,
    pub features: Vec<String>,
    pub centroids: Array2<f64>,
    pub silhouette: f64,
}

impl SegmentAssignment {
    pub fn to_series(&self) -> Series {
        let ids: Vec<u32> = self.assignments.iter().map(|&c| c as u32).collect();
        Series::new("segment_id".into(), ids)
    }

    /// Record count per cluster id.
    pub fn counts(&self) -> Vec<usize> {
        let mut counts = vec![0; self.k];
        for &cluster in &self.assignments {
            counts[cluster] += 1;
        }
        counts
    }

    pub fn n_clusters(&self) -> usize {
        self.counts().iter().filter(|&&c| c > 0).count()
    }
}

/// Clusters the rows of `df` into `n_segments` groups, clamped to
/// `[2, n - 1]`.
pub fn run_kmeans_segmentation(
    df: &DataFrame,
    features: Option<&[String]>,
    n_segments: usize,
    seed: u64,
) -> Result<SegmentAssignment> {
    let n = df.height();
    if n < MIN_RECORDS {
        return Err(FanSightError::InsufficientData {
            required: MIN_RECORDS,
            found: n,
        });
    }
    let k = n_segments.clamp(2, n - 1);
    if k != n_segments {
        debug!(requested = n_segments, k, "Clamped segment count");
    }

    let requested: Vec<String> = match features {
        Some(features) => features.to_vec(),
        None => DEFAULT_SEGMENT_FEATURES.iter().map(|f| f.to_string()).collect(),
    };
    let available: Vec<String> = requested
        .iter()
        .filter(|f| has_column(df, f))
        .cloned()
        .collect();
    if available.is_empty() {
        return Err(FanSightError::NoFeatures(requested));
    }

    let scaled = standardized_matrix(df, &available)?;
    let (assignments, centroids) = KMeans::new(k, seed, KMeansConfig::default()).fit(scaled.view());
    let silhouette = silhouette_score(scaled.view(), &assignments);
    if silhouette.is_nan() {
        warn!("Fewer than two populated segments; silhouette is undefined");
    }

    Ok(SegmentAssignment {
        assignments,
        k,
        features: available,
        centroids,
        silhouette,
    })
}

/// Median-imputed, zero-mean, unit-variance feature matrix.
fn standardized_matrix(df: &DataFrame, features: &[String]) -> Result<Array2<f64>> {
    let mut matrix = Array2::zeros((df.height(), features.len()));
    for (j, feature) in features.iter().enumerate() {
        let values = numeric_values(df, feature)?;
        let fill = median(values.iter().flatten().copied().collect()).unwrap_or(0.0);
        let column: Array1<f64> = values.iter().map(|v| v.unwrap_or(fill)).collect();

        let mean = column.mean().unwrap_or(0.0);
        let std = column.std(0.0);
        let scale = if std > f64::EPSILON { std } else { 1.0 };
        matrix
            .column_mut(j)
            .assign(&column.mapv(|x| (x - mean) / scale));
    }
    Ok(matrix)
}

fn squared_distance(a: ArrayView1<f64>, b: ArrayView1<f64>) -> f64 {
    a.iter().zip(b.iter()).map(|(x, y)| (x - y).powi(2)).sum()
}

/// Lloyd's k-means with k-means++ seeding.
pub struct KMeans {
    k: usize,
    seed: u64,
    config: KMeansConfig,
}

impl KMeans {
    pub fn new(k: usize, seed: u64, config: KMeansConfig) -> Self {
        Self { k, seed, config }
    }

    /// Returns per-row cluster ids and the final centroids. Every cluster
    /// is non-empty when there are at least `k` rows.
    pub fn fit(&self, data: ArrayView2<f64>) -> (Vec<usize>, Array2<f64>) {
        let mut rng = Pcg64::seed_from_u64(self.seed);
        let mut centroids = self.init_centroids(data, &mut rng);

        let variance_scale = data.var_axis(Axis(0), 0.0).mean().unwrap_or(0.0);
        let tolerance = self.config.tol * variance_scale;

        let mut labels = assign(data, centroids.view());
        for iteration in 0..self.config.max_iter {
            let updated = self.update_centroids(data, &mut labels);
            let shift: f64 = centroids
                .rows()
                .into_iter()
                .zip(updated.rows())
                .map(|(old, new)| squared_distance(old, new))
                .sum();
            centroids = updated;

            let next = assign(data, centroids.view());
            let stable = next == labels;
            labels = next;
            if stable || shift <= tolerance {
                debug!(iterations = iteration + 1, "k-means converged");
                break;
            }
        }

        fill_empty_clusters(data, &mut labels, &mut centroids);
        (labels, centroids)
    }

    fn init_centroids(&self, data: ArrayView2<f64>, rng: &mut Pcg64) -> Array2<f64> {
        let n = data.nrows();
        let mut centroids = Array2::zeros((self.k, data.ncols()));
        let first = rng.random_range(0..n);
        centroids.row_mut(0).assign(&data.row(first));

        let mut closest: Vec<f64> = data
            .rows()
            .into_iter()
            .map(|row| squared_distance(row, data.row(first)))
            .collect();
        for c in 1..self.k {
            let total: f64 = closest.iter().sum();
            let chosen = if total > 0.0 {
                let mut target = rng.random::<f64>() * total;
                let mut chosen = closest.iter().rposition(|w| *w > 0.0).unwrap_or(n - 1);
                for (i, weight) in closest.iter().enumerate() {
                    if target < *weight {
                        chosen = i;
                        break;
                    }
                    target -= weight;
                }
                chosen
            } else {
                rng.random_range(0..n)
            };

            centroids.row_mut(c).assign(&data.row(chosen));
            for (i, row) in data.rows().into_iter().enumerate() {
                closest[i] = closest[i].min(squared_distance(row, data.row(chosen)));
            }
        }
        centroids
    }

    fn update_centroids(&self, data: ArrayView2<f64>, labels: &mut [usize]) -> Array2<f64> {
        let mut sums = Array2::zeros((self.k, data.ncols()));
        let mut counts = vec![0usize; self.k];
        for (row, &label) in data.rows().into_iter().zip(labels.iter()) {
            let mut sum = sums.row_mut(label);
            sum += &row;
            counts[label] += 1;
        }
        for (c, count) in counts.iter().enumerate() {
            if *count > 0 {
                sums.row_mut(c).mapv_inplace(|x| x / *count as f64);
            }
        }
        if counts.contains(&0) {
            fill_empty_clusters(data, labels, &mut sums);
        }
        sums
    }
}

fn assign(data: ArrayView2<f64>, centroids: ArrayView2<f64>) -> Vec<usize> {
    data.rows()
        .into_iter()
        .map(|row| {
            let mut best = (0, f64::INFINITY);
            for (c, centroid) in centroids.rows().into_iter().enumerate() {
                let d = squared_distance(row, centroid);
                if d < best.1 {
                    best = (c, d);
                }
            }
            best.0
        })
        .collect()
}

/// Moves the point farthest from its centroid (taken from a cluster with
/// more than one member) into each empty cluster.
fn fill_empty_clusters(data: ArrayView2<f64>, labels: &mut [usize], centroids: &mut Array2<f64>) {
    let k = centroids.nrows();
    let mut counts = vec![0usize; k];
    for &label in labels.iter() {
        counts[label] += 1;
    }

    for empty in 0..k {
        if counts[empty] > 0 {
            continue;
        }
        let donor = (0..labels.len())
            .filter(|&i| counts[labels[i]] > 1)
            .max_by(|&a, &b| {
                let da = squared_distance(data.row(a), centroids.row(labels[a]));
                let db = squared_distance(data.row(b), centroids.row(labels[b]));
                da.total_cmp(&db)
            });
        let Some(point) = donor else { break };

        counts[labels[point]] -= 1;
        counts[empty] += 1;
        labels[point] = empty;
        centroids.row_mut(empty).assign(&data.row(point));
    }
}

/// Mean silhouette coefficient. NaN when fewer than two clusters are
/// populated; singleton clusters contribute 0.
pub fn silhouette_score(data: ArrayView2<f64>, labels: &[usize]) -> f64 {
    let n = labels.len();
    let k = labels.iter().max().map_or(0, |m| m + 1);
    let mut sizes = vec![0usize; k];
    for &label in labels {
        sizes[label] += 1;
    }
    if sizes.iter().filter(|&&s| s > 0).count() < 2 {
        return f64::NAN;
    }

    let mut total = 0.0;
    for i in 0..n {
        let own = labels[i];
        if sizes[own] <= 1 {
            continue;
        }
        let mut distance_sums = vec![0.0; k];
        for j in 0..n {
            if i != j {
                distance_sums[labels[j]] += squared_distance(data.row(i), data.row(j)).sqrt();
            }
        }
        let a = distance_sums[own] / (sizes[own] - 1) as f64;
        let b = (0..k)
            .filter(|&c| c != own && sizes[c] > 0)
            .map(|c| distance_sums[c] / sizes[c] as f64)
            .fold(f64::INFINITY, f64::min);
        let spread = a.max(b);
        if spread > 0.0 {
            total += (b - a) / spread;
        }
    }
    total / n as f64
}
