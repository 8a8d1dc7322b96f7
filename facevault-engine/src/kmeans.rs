//! Centroid clustering used to partition enrolled identities.
//!
//! [`Clusterer`] is the seam the cluster index builds through; [`KMeans`] is
//! the default implementation (k-means++ seeding, then Lloyd iterations for
//! small inputs or mini-batch updates for large ones).

use std::collections::HashSet;

use ndarray::{Array1, Array2, ArrayView1, ArrayView2};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use thiserror::Error;

use crate::distance::squared_l2;

/// Output of a clustering run: one centroid per row, and for every input
/// point the row index of its centroid.
#[derive(Debug, Clone)]
pub struct Clustering {
    pub centroids: Array2<f64>,
    pub assignments: Vec<usize>,
}

#[derive(Debug, Error)]
pub enum ClusterError {
    #[error("no points to cluster")]
    NoPoints,

    #[error("cannot form {k} clusters from fewer than {k} distinct points")]
    Degenerate { k: usize },

    #[error("invalid cluster count {0}")]
    InvalidK(usize),
}

/// Pluggable clustering capability: `cluster(points, k) -> (centroids, assignments)`.
pub trait Clusterer: Send + Sync {
    fn cluster(&self, points: ArrayView2<'_, f64>, k: usize) -> Result<Clustering, ClusterError>;
}

#[derive(Debug, Clone)]
pub struct KMeans {
    pub max_iterations: usize,
    pub batch_size: usize,
    pub seed: u64,
    pub tolerance: f64,
}

impl Default for KMeans {
    fn default() -> Self {
        Self {
            max_iterations: 100,
            batch_size: 100,
            seed: 42,
            tolerance: 1e-10,
        }
    }
}

impl Clusterer for KMeans {
    fn cluster(&self, points: ArrayView2<'_, f64>, k: usize) -> Result<Clustering, ClusterError> {
        let n = points.nrows();
        if n == 0 {
            return Err(ClusterError::NoPoints);
        }
        if k == 0 || k > n {
            return Err(ClusterError::InvalidK(k));
        }
        if !has_distinct(points, k) {
            return Err(ClusterError::Degenerate { k });
        }

        let mut rng = StdRng::seed_from_u64(self.seed);
        let mut centroids = seed_plus_plus(points, k, &mut rng)?;

        if n <= self.batch_size.max(1) {
            self.lloyd(points, &mut centroids);
        } else {
            self.mini_batch(points, &mut centroids, &mut rng);
        }

        let assignments = points
            .rows()
            .into_iter()
            .map(|p| nearest(p, &centroids).0)
            .collect();
        Ok(Clustering {
            centroids,
            assignments,
        })
    }
}

impl KMeans {
    fn lloyd(&self, points: ArrayView2<'_, f64>, centroids: &mut Array2<f64>) {
        let (k, dim) = centroids.dim();
        for _ in 0..self.max_iterations {
            let mut sums = Array2::<f64>::zeros((k, dim));
            let mut counts = vec![0usize; k];
            // Farthest point from its centroid, for reseeding empty clusters.
            let mut worst: Option<(usize, f64)> = None;

            for (i, p) in points.rows().into_iter().enumerate() {
                let (c, d2) = nearest(p, centroids);
                let mut row = sums.row_mut(c);
                row += &p;
                counts[c] += 1;
                if worst.map_or(true, |(_, w)| d2 > w) {
                    worst = Some((i, d2));
                }
            }

            let mut shift = 0.0f64;
            for j in 0..k {
                let next: Array1<f64> = if counts[j] > 0 {
                    &sums.row(j) / counts[j] as f64
                } else if let Some((i, _)) = worst.take() {
                    points.row(i).to_owned()
                } else {
                    continue;
                };
                shift = shift.max(squared_l2(centroids.row(j), next.view()));
                centroids.row_mut(j).assign(&next);
            }
            if shift <= self.tolerance {
                break;
            }
        }
    }

    fn mini_batch(
        &self,
        points: ArrayView2<'_, f64>,
        centroids: &mut Array2<f64>,
        rng: &mut StdRng,
    ) {
        let n = points.nrows();
        let mut counts = vec![0usize; centroids.nrows()];
        for _ in 0..self.max_iterations {
            let batch: Vec<usize> = (0..self.batch_size).map(|_| rng.gen_range(0..n)).collect();
            let labels: Vec<usize> = batch
                .iter()
                .map(|&i| nearest(points.row(i), centroids).0)
                .collect();

            let mut shift = 0.0f64;
            for (&i, &c) in batch.iter().zip(&labels) {
                counts[c] += 1;
                let eta = 1.0 / counts[c] as f64;
                let before = centroids.row(c).to_owned();
                centroids
                    .row_mut(c)
                    .zip_mut_with(&points.row(i), |cv, &xv| *cv += eta * (xv - *cv));
                shift = shift.max(squared_l2(before.view(), centroids.row(c)));
            }
            if shift <= self.tolerance {
                break;
            }
        }
    }
}

/// Index of the closest centroid (lowest index on ties) and its squared distance.
fn nearest(point: ArrayView1<'_, f64>, centroids: &Array2<f64>) -> (usize, f64) {
    let mut best = (0, f64::INFINITY);
    for (j, c) in centroids.rows().into_iter().enumerate() {
        let d2 = squared_l2(point, c);
        if d2 < best.1 {
            best = (j, d2);
        }
    }
    best
}

/// Whether at least `k` rows are pairwise distinct. Stops as soon as it knows.
fn has_distinct(points: ArrayView2<'_, f64>, k: usize) -> bool {
    let mut seen: HashSet<Vec<u64>> = HashSet::with_capacity(k);
    for row in points.rows() {
        // +0.0 and -0.0 are the same point.
        seen.insert(row.iter().map(|v| (v + 0.0).to_bits()).collect());
        if seen.len() >= k {
            return true;
        }
    }
    false
}

/// k-means++: each next seed is drawn with probability proportional to its
/// squared distance from the closest seed chosen so far.
fn seed_plus_plus(
    points: ArrayView2<'_, f64>,
    k: usize,
    rng: &mut StdRng,
) -> Result<Array2<f64>, ClusterError> {
    let (n, dim) = points.dim();
    let mut centroids = Array2::<f64>::zeros((k, dim));
    let first = rng.gen_range(0..n);
    centroids.row_mut(0).assign(&points.row(first));

    let mut d2: Vec<f64> = points
        .rows()
        .into_iter()
        .map(|p| squared_l2(p, centroids.row(0)))
        .collect();

    for j in 1..k {
        let total: f64 = d2.iter().sum();
        if !(total > 0.0) {
            return Err(ClusterError::Degenerate { k });
        }
        let mut target = rng.gen::<f64>() * total;
        let mut pick = n - 1;
        for (i, &w) in d2.iter().enumerate() {
            if w <= 0.0 {
                continue;
            }
            if target < w {
                pick = i;
                break;
            }
            target -= w;
        }
        // Rounding can run past the end; fall back to the farthest point.
        if d2[pick] <= 0.0 {
            pick = d2
                .iter()
                .enumerate()
                .max_by(|a, b| a.1.total_cmp(b.1))
                .map(|(i, _)| i)
                .unwrap_or(0);
        }
        centroids.row_mut(j).assign(&points.row(pick));
        for (i, p) in points.rows().into_iter().enumerate() {
            d2[i] = d2[i].min(squared_l2(p, centroids.row(j)));
        }
    }
    Ok(centroids)
}
