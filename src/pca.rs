// Principal component analysis (PCA) by power iteration with deflation

use log::{debug, info, trace};
use ndarray::{Array1, Array2, ArrayView1, Axis};
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use serde::{Deserialize, Serialize};

use crate::error::ComputeError;
use crate::monitor::{checkpoint, ComputeMonitor, Unmonitored};
use crate::stats::{to_dense, zscore_matrix};

/// Seed offset between consecutive components, so every component starts
/// from its own reproducible random direction.
const COMPONENT_SEED_STRIDE: u64 = 97;

/// Options for a PCA run. Field names serialize in camelCase (`maxIter`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct PcaOptions {
    /// Number of components to extract. Not capped to the number of
    /// features: components past the rank come out with eigenvalue ~0.
    pub k: usize,
    /// Z-score each column before building the covariance matrix. When false
    /// the matrix is used as-is (missing cells read as 0, no centering).
    pub standardize: bool,
    /// Upper bound on power-iteration rounds per component.
    pub max_iter: usize,
    /// Stop once the eigenvalue estimate moves by less than this.
    pub tol: f64,
    /// Base seed for the initial vectors.
    pub seed: u64,
}

impl Default for PcaOptions {
    fn default() -> Self {
        Self {
            k: 2,
            standardize: true,
            max_iter: 300,
            tol: 1e-8,
            seed: 0,
        }
    }
}

impl PcaOptions {
    /// Rejects options a background job should not run with.
    pub fn validate(&self) -> Result<(), ComputeError> {
        if !self.tol.is_finite() || self.tol < 0.0 {
            return Err(ComputeError::InvalidInput(format!(
                "tol must be a finite, non-negative number (got {})",
                self.tol
            )));
        }
        if self.max_iter == 0 {
            return Err(ComputeError::InvalidInput("maxIter must be at least 1".into()));
        }
        Ok(())
    }
}

/// Output of a PCA run. Components are in extraction order (not re-sorted).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PcaResult {
    /// Shape (m_observations, k).
    pub scores: Array2<f64>,
    /// Shape (k, n_features); row `i` is the unit eigenvector of component `i`.
    pub components: Array2<f64>,
    pub eigenvalues: Array1<f64>,
    /// `eigenvalue_i / trace(C)`.
    pub explained_variance_ratio: Array1<f64>,
}

impl PcaResult {
    pub fn empty() -> Self {
        Self {
            scores: Array2::zeros((0, 0)),
            components: Array2::zeros((0, 0)),
            eigenvalues: Array1::zeros(0),
            explained_variance_ratio: Array1::zeros(0),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.scores.is_empty() && self.components.is_empty()
    }

    pub fn num_components(&self) -> usize {
        self.eigenvalues.len()
    }

    /// Score pairs `(PC a, PC b)` per observation, ready for scatter sampling.
    /// Returns an empty vector when either component index is out of range.
    pub fn score_points(&self, a: usize, b: usize) -> Vec<[f64; 2]> {
        let k = self.scores.ncols();
        if a >= k || b >= k {
            return Vec::new();
        }
        self.scores
            .axis_iter(Axis(0))
            .map(|row| [row[a], row[b]])
            .collect()
    }
}

/// A dominant eigenvector/eigenvalue estimate from [`power_iteration`].
#[derive(Debug, Clone, PartialEq)]
pub struct EigenPair {
    /// Unit-length direction.
    pub vector: Array1<f64>,
    pub eigenvalue: f64,
    pub iterations: usize,
    /// False when `max_iter` ran out or the iterate collapsed to zero.
    pub converged: bool,
}

/// Symmetric covariance matrix owned by a single PCA run.
#[derive(Debug, Clone, PartialEq)]
pub struct CovarianceMatrix {
    data: Array2<f64>,
}

impl CovarianceMatrix {
    /// `Xᵗ·X / max(1, m - 1)` for an (m × n) matrix `x`.
    ///
    /// The product is symmetrized so `(i, j)` and `(j, i)` are bit-identical
    /// regardless of the summation order used by the matrix product.
    pub fn from_observations(x: &Array2<f64>) -> Self {
        let denom = x.nrows().saturating_sub(1).max(1) as f64;
        let gram = x.t().dot(x);
        let n = gram.nrows();
        let data = Array2::from_shape_fn((n, n), |(i, j)| {
            let (lo, hi) = if i <= j { (i, j) } else { (j, i) };
            gram[[lo, hi]] / denom
        });
        Self { data }
    }

    pub fn dim(&self) -> usize {
        self.data.nrows()
    }

    pub fn as_array(&self) -> &Array2<f64> {
        &self.data
    }

    pub fn trace(&self) -> f64 {
        self.data.diag().sum()
    }

    /// `C ← C − λ·v·vᵗ`. Each cell subtracts `λ·(v_i·v_j)` so symmetry is exact.
    pub fn deflate(&mut self, eigenvalue: f64, vector: ArrayView1<f64>) {
        for ((i, j), c) in self.data.indexed_iter_mut() {
            *c -= eigenvalue * (vector[i] * vector[j]);
        }
    }

    pub fn is_symmetric(&self) -> bool {
        let n = self.dim();
        (0..n).all(|i| (i + 1..n).all(|j| self.data[[i, j]] == self.data[[j, i]]))
    }
}

fn seeded_unit_vector(n: usize, seed: u64) -> Array1<f64> {
    let mut rng = ChaCha8Rng::seed_from_u64(seed);
    let mut v = Array1::from_shape_fn(n, |_| rng.gen::<f64>() - 0.5);
    let norm = v.dot(&v).sqrt();
    if norm == 0.0 {
        if n > 0 {
            v[0] = 1.0;
        }
    } else {
        v.mapv_inplace(|x| x / norm);
    }
    v
}

/// Finds the dominant eigenpair of the symmetric matrix `a` by power
/// iteration from a seeded random start.
///
/// Each round multiplies by `a`, renormalizes, and takes the Rayleigh
/// quotient as the eigenvalue estimate. Iteration stops when the estimate
/// moves by less than `tol`, after `max_iter` rounds, or when `a·v` is the zero
/// vector (the current estimate is returned instead of dividing by zero).
pub fn power_iteration(a: &Array2<f64>, max_iter: usize, tol: f64, seed: u64) -> EigenPair {
    // Unmonitored runs are never interrupted, so the fallback is unreachable.
    power_iteration_monitored(a, max_iter, tol, seed, &Unmonitored)
        .unwrap_or_else(|_| EigenPair {
            vector: Array1::zeros(a.nrows()),
            eigenvalue: 0.0,
            iterations: 0,
            converged: false,
        })
}

fn power_iteration_monitored(
    a: &Array2<f64>,
    max_iter: usize,
    tol: f64,
    seed: u64,
    monitor: &dyn ComputeMonitor,
) -> Result<EigenPair, ComputeError> {
    let mut v = seeded_unit_vector(a.nrows(), seed);
    let mut lambda = 0.0;
    let mut iterations = 0;
    let mut converged = false;

    while iterations < max_iter {
        checkpoint(monitor)?;
        iterations += 1;

        let av = a.dot(&v);
        let norm = av.dot(&av).sqrt();
        if norm == 0.0 || !norm.is_finite() {
            trace!("Power iteration collapsed after {} rounds", iterations);
            break;
        }
        let v_new = av / norm;
        let lambda_new = v_new.dot(&a.dot(&v_new));

        let diff = (lambda_new - lambda).abs();
        v = v_new;
        lambda = lambda_new;
        if diff < tol {
            converged = true;
            break;
        }
    }

    Ok(EigenPair {
        vector: v,
        eigenvalue: lambda,
        iterations,
        converged,
    })
}

/// PCA runner holding its options. Build once, fit many matrices.
#[derive(Debug, Clone, Default)]
pub struct PcaEngine {
    options: PcaOptions,
}

impl PcaEngine {
    pub fn new(options: PcaOptions) -> Self {
        Self { options }
    }

    pub fn options(&self) -> &PcaOptions {
        &self.options
    }

    /// Runs PCA to completion on the calling thread.
    pub fn fit(&self, matrix: &[Vec<f64>]) -> PcaResult {
        // Unmonitored runs are never interrupted.
        self.fit_monitored(matrix, &Unmonitored)
            .unwrap_or_else(|_| PcaResult::empty())
    }

    /// Runs PCA, polling `monitor` before every power-iteration round and
    /// reporting progress after each extracted component.
    pub fn fit_monitored(
        &self,
        matrix: &[Vec<f64>],
        monitor: &dyn ComputeMonitor,
    ) -> Result<PcaResult, ComputeError> {
        let opts = &self.options;
        if matrix.is_empty() {
            debug!("PCA on an empty matrix; returning empty result.");
            return Ok(PcaResult::empty());
        }

        let x = if opts.standardize {
            zscore_matrix(matrix).data
        } else {
            to_dense(matrix)
        };
        let (m, n) = x.dim();
        if n == 0 {
            debug!("PCA on a matrix with {} rows but no columns; returning empty result.", m);
            return Ok(PcaResult::empty());
        }

        info!(
            "Starting PCA: {} observations x {} features, k={}, standardize={}",
            m, n, opts.k, opts.standardize
        );
        let start = std::time::Instant::now();
        monitor.report_progress(0.1);

        let mut cov = CovarianceMatrix::from_observations(&x);
        let trace = cov.trace();
        let total_variance = if trace != 0.0 && trace.is_finite() { trace } else { 1.0 };

        let mut components = Array2::<f64>::zeros((opts.k, n));
        let mut eigenvalues = Array1::<f64>::zeros(opts.k);
        for i in 0..opts.k {
            let seed = opts
                .seed
                .wrapping_add((i as u64).wrapping_mul(COMPONENT_SEED_STRIDE));
            let pair = power_iteration_monitored(cov.as_array(), opts.max_iter, opts.tol, seed, monitor)?;
            debug!(
                "Component {}: eigenvalue={:.6e}, iterations={}, converged={}",
                i, pair.eigenvalue, pair.iterations, pair.converged
            );

            cov.deflate(pair.eigenvalue, pair.vector.view());
            components.row_mut(i).assign(&pair.vector);
            eigenvalues[i] = pair.eigenvalue.max(0.0);

            monitor.report_progress(0.1 + 0.8 * (i + 1) as f64 / opts.k as f64);
        }

        let scores = x.dot(&components.t());
        let explained_variance_ratio = eigenvalues.mapv(|ev| ev / total_variance);

        info!("PCA finished in {:?}", start.elapsed());
        Ok(PcaResult {
            scores,
            components,
            eigenvalues,
            explained_variance_ratio,
        })
    }
}

/// Convenience wrapper around [`PcaEngine::fit`].
pub fn pca(matrix: &[Vec<f64>], options: &PcaOptions) -> PcaResult {
    PcaEngine::new(options.clone()).fit(matrix)
}
