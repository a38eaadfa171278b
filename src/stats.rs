//! Descriptive statistics, pairwise correlation, compositional transforms and
//! matrix-level helpers.
//!
//! Every function here is total: empty, all-missing or constant input yields
//! `None`, an empty vector or zeros so a chart can show "no data" instead of
//! failing. A value is *missing* when it is not finite. In a [`Matrix`] a cell
//! is also missing when its row is shorter than the widest row.

use ndarray::{Array1, Array2};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Row-major observations × features. Rows may be ragged.
pub type Matrix = Vec<Vec<f64>>;

pub const DEFAULT_WHISKER_COEF: f64 = 1.5;
pub const DEFAULT_WINSOR: f64 = 0.05;
pub const DEFAULT_PSEUDOCOUNT: f64 = 1.0;

// --- Scalar statistics ---

/// Keeps the finite values of `values`, in order.
pub fn clean_numbers(values: &[f64]) -> Vec<f64> {
    values.iter().copied().filter(|v| v.is_finite()).collect()
}

pub fn sum(values: &[f64]) -> f64 {
    values.iter().sum()
}

/// Arithmetic mean; `None` for an empty slice.
pub fn mean(values: &[f64]) -> Option<f64> {
    if values.is_empty() {
        return None;
    }
    Some(sum(values) / values.len() as f64)
}

/// Denominator convention for [`variance_with`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum VarianceKind {
    /// Divide by `n - 1`; needs at least two values.
    #[default]
    Sample,
    /// Divide by `n`; needs at least one value.
    Population,
}

/// Variance with the requested denominator; `None` when there are too few values.
pub fn variance_with(values: &[f64], kind: VarianceKind) -> Option<f64> {
    let (min_len, denom) = match kind {
        VarianceKind::Sample => (2, values.len().saturating_sub(1)),
        VarianceKind::Population => (1, values.len()),
    };
    if values.len() < min_len {
        return None;
    }
    let m = mean(values)?;
    let ss: f64 = values.iter().map(|v| (v - m) * (v - m)).sum();
    Some(ss / denom as f64)
}

/// Sample variance (`n - 1` denominator).
pub fn variance(values: &[f64]) -> Option<f64> {
    variance_with(values, VarianceKind::Sample)
}

pub fn std_dev_with(values: &[f64], kind: VarianceKind) -> Option<f64> {
    variance_with(values, kind).map(f64::sqrt)
}

/// Sample standard deviation.
pub fn std_dev(values: &[f64]) -> Option<f64> {
    std_dev_with(values, VarianceKind::Sample)
}

fn sorted_finite(values: &[f64]) -> Vec<f64> {
    let mut sorted = clean_numbers(values);
    sorted.sort_by(f64::total_cmp);
    sorted
}

fn quantile_of_sorted(sorted: &[f64], q: f64) -> Option<f64> {
    match sorted.len() {
        0 => None,
        1 => Some(sorted[0]),
        len => {
            let q = if q.is_nan() { 0.0 } else { q.clamp(0.0, 1.0) };
            let pos = (len - 1) as f64 * q;
            let base = pos.floor() as usize;
            let rest = pos - base as f64;
            let left = sorted[base];
            let right = sorted[(base + 1).min(len - 1)];
            Some(left + rest * (right - left))
        }
    }
}

/// Linear-interpolation quantile of the finite values in `values`.
///
/// The input does not need to be sorted. `q` is clamped into `[0, 1]` (a NaN
/// `q` reads as 0). Returns `None` when no finite value is present; a single
/// value is returned for every `q`.
pub fn quantile(values: &[f64], q: f64) -> Option<f64> {
    quantile_of_sorted(&sorted_finite(values), q)
}

pub fn median(values: &[f64]) -> Option<f64> {
    quantile(values, 0.5)
}

// --- Boxplot ---

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct BoxplotOptions {
    /// Fence distance in IQR units (Tukey's `c`).
    pub whisker_coef: f64,
}

impl Default for BoxplotOptions {
    fn default() -> Self {
        Self {
            whisker_coef: DEFAULT_WHISKER_COEF,
        }
    }
}

/// Five-number summary plus Tukey whiskers and outliers.
///
/// Every statistic is `None` when `count == 0`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BoxplotStats {
    pub count: usize,
    pub min: Option<f64>,
    pub q1: Option<f64>,
    pub median: Option<f64>,
    pub q3: Option<f64>,
    pub max: Option<f64>,
    pub mean: Option<f64>,
    pub iqr: Option<f64>,
    /// Smallest value at or above `q1 - c·iqr`.
    pub whisker_low: Option<f64>,
    /// Largest value at or below `q3 + c·iqr`.
    pub whisker_high: Option<f64>,
    /// Values outside the whiskers, ascending.
    pub outliers: Vec<f64>,
}

impl BoxplotStats {
    pub fn empty() -> Self {
        Self {
            count: 0,
            min: None,
            q1: None,
            median: None,
            q3: None,
            max: None,
            mean: None,
            iqr: None,
            whisker_low: None,
            whisker_high: None,
            outliers: Vec::new(),
        }
    }
}

/// Tukey boxplot statistics over the finite values of `values`.
pub fn boxplot_stats(values: &[f64], options: &BoxplotOptions) -> BoxplotStats {
    let clean = clean_numbers(values);
    let mut sorted = clean.clone();
    sorted.sort_by(f64::total_cmp);

    let (Some(q1), Some(med), Some(q3), Some(avg)) = (
        quantile_of_sorted(&sorted, 0.25),
        quantile_of_sorted(&sorted, 0.5),
        quantile_of_sorted(&sorted, 0.75),
        mean(&clean),
    ) else {
        return BoxplotStats::empty();
    };

    let min_v = sorted[0];
    let max_v = sorted[sorted.len() - 1];
    let iqr = q3 - q1;
    let low_fence = q1 - options.whisker_coef * iqr;
    let high_fence = q3 + options.whisker_coef * iqr;

    let whisker_low = sorted
        .iter()
        .copied()
        .find(|&x| x >= low_fence)
        .unwrap_or(min_v);
    let whisker_high = sorted
        .iter()
        .rev()
        .copied()
        .find(|&x| x <= high_fence)
        .unwrap_or(max_v);
    let outliers = sorted
        .iter()
        .copied()
        .filter(|&x| x < whisker_low || x > whisker_high)
        .collect();

    BoxplotStats {
        count: sorted.len(),
        min: Some(min_v),
        q1: Some(q1),
        median: Some(med),
        q3: Some(q3),
        max: Some(max_v),
        mean: Some(avg),
        iqr: Some(iqr),
        whisker_low: Some(whisker_low),
        whisker_high: Some(whisker_high),
        outliers,
    }
}

// --- Correlation ---

/// Cleans both sequences and truncates them to their common length.
fn paired_prefix(x: &[f64], y: &[f64]) -> (Vec<f64>, Vec<f64>) {
    let mut xs = clean_numbers(x);
    let mut ys = clean_numbers(y);
    let n = xs.len().min(ys.len());
    xs.truncate(n);
    ys.truncate(n);
    (xs, ys)
}

/// Product-moment correlation of two equally long, already clean sequences.
fn pearson_paired(xs: &[f64], ys: &[f64]) -> Option<f64> {
    let n = xs.len().min(ys.len());
    if n < 2 {
        return None;
    }
    let mx = mean(&xs[..n])?;
    let my = mean(&ys[..n])?;

    let mut num = 0.0;
    let mut dx = 0.0;
    let mut dy = 0.0;
    for (a, b) in xs[..n].iter().zip(&ys[..n]) {
        let da = a - mx;
        let db = b - my;
        num += da * db;
        dx += da * da;
        dy += db * db;
    }

    let den = (dx * dy).sqrt();
    if den == 0.0 || !den.is_finite() {
        return None;
    }
    Some((num / den).clamp(-1.0, 1.0))
}

/// Pearson correlation over the overlapping prefix of the finite values of
/// `x` and `y`.
///
/// Returns `None` for fewer than two paired points or when either sequence
/// has zero variance.
pub fn pearson(x: &[f64], y: &[f64]) -> Option<f64> {
    let (xs, ys) = paired_prefix(x, y);
    pearson_paired(&xs, &ys)
}

/// 1-based ascending ranks. Ties are not averaged: equal values are ranked by
/// their position in the input.
pub fn ranks(values: &[f64]) -> Vec<f64> {
    let mut order: Vec<usize> = (0..values.len()).collect();
    order.sort_by(|&a, &b| values[a].total_cmp(&values[b]));
    let mut out = vec![0.0; values.len()];
    for (rank, idx) in order.into_iter().enumerate() {
        out[idx] = (rank + 1) as f64;
    }
    out
}

/// Spearman correlation: Pearson over [`ranks`] of the paired prefix.
///
/// Because ties get distinct ranks this is an approximation for data with many
/// repeated values.
pub fn spearman(x: &[f64], y: &[f64]) -> Option<f64> {
    let (xs, ys) = paired_prefix(x, y);
    if xs.len() < 2 {
        return None;
    }
    pearson_paired(&ranks(&xs), &ranks(&ys))
}

/// Clamps every value into `[quantile(p), quantile(1 - p)]`.
pub fn winsorize(values: &[f64], p: f64) -> Vec<f64> {
    let sorted = sorted_finite(values);
    let (Some(lo), Some(hi)) = (quantile_of_sorted(&sorted, p), quantile_of_sorted(&sorted, 1.0 - p))
    else {
        return Vec::new();
    };
    values.iter().map(|&v| hi.min(lo.max(v))).collect()
}

/// Pearson correlation after winsorizing each sequence independently at `winsor`.
pub fn robust_corr(x: &[f64], y: &[f64], winsor: f64) -> Option<f64> {
    let (xs, ys) = paired_prefix(x, y);
    if xs.len() < 2 {
        return None;
    }
    pearson_paired(&winsorize(&xs, winsor), &winsorize(&ys, winsor))
}

// --- Compositional transforms ---

fn shifted(vector: &[f64], pseudocount: f64) -> Vec<f64> {
    vector
        .iter()
        .map(|&x| (if x.is_finite() { x.max(0.0) } else { 0.0 }) + pseudocount)
        .collect()
}

/// Centered log-ratio: `ln(x + pseudocount)` minus the mean of those logs.
///
/// Negative and missing parts count as 0 before the pseudocount is added.
pub fn clr_transform(vector: &[f64], pseudocount: f64) -> Vec<f64> {
    let logs: Vec<f64> = shifted(vector, pseudocount).into_iter().map(f64::ln).collect();
    let Some(gm) = mean(&logs) else {
        return Vec::new();
    };
    logs.into_iter().map(|l| l - gm).collect()
}

/// Additive log-ratio against the part at `ref_index`.
///
/// An out-of-range `ref_index` uses a denominator of 1.
pub fn alr_transform(vector: &[f64], ref_index: usize, pseudocount: f64) -> Vec<f64> {
    let parts = shifted(vector, pseudocount);
    let denom = parts.get(ref_index).copied().unwrap_or(1.0);
    parts.into_iter().map(|x| (x / denom).ln()).collect()
}

/// Euclidean distance between the CLR transforms of `x` and `y`, over their
/// common length. `None` when either is empty.
pub fn aitchison_distance(x: &[f64], y: &[f64], pseudocount: f64) -> Option<f64> {
    let cx = clr_transform(x, pseudocount);
    let cy = clr_transform(y, pseudocount);
    let n = cx.len().min(cy.len());
    if n == 0 {
        return None;
    }
    let ss: f64 = cx.iter().zip(&cy).map(|(a, b)| (a - b) * (a - b)).sum();
    Some(ss.sqrt())
}

/// Z-scores the finite values of `values` with the sample standard deviation.
/// A constant (or single-valued) input maps to zeros.
pub fn zscore(values: &[f64]) -> Vec<f64> {
    let clean = clean_numbers(values);
    let (Some(m), Some(s)) = (mean(&clean), std_dev(&clean)) else {
        return vec![0.0; clean.len()];
    };
    if is_constant(&clean) || !(s.is_finite() && s > 0.0) {
        return vec![0.0; clean.len()];
    }
    clean.into_iter().map(|v| (v - m) / s).collect()
}

/// True when every value equals the first. A constant column whose mean is not
/// exactly representable still has a nonzero rounded standard deviation.
#[inline]
fn is_constant(values: &[f64]) -> bool {
    values.iter().all(|&v| v == values[0])
}

// --- Matrix helpers ---

/// Number of columns of a possibly ragged matrix: the widest row.
pub fn matrix_width(matrix: &[Vec<f64>]) -> usize {
    matrix.iter().map(Vec::len).max().unwrap_or(0)
}

#[inline]
fn cell(row: &[f64], j: usize) -> Option<f64> {
    row.get(j).copied().filter(|v| v.is_finite())
}

fn column_values(matrix: &[Vec<f64>], j: usize) -> Vec<f64> {
    matrix.iter().filter_map(|row| cell(row, j)).collect()
}

#[derive(Debug, Clone, Copy)]
struct ColumnMoments {
    mean: f64,
    variance: f64,
    constant: bool,
}

/// Per-column mean and sample variance over the present cells.
/// Columns with no cells get mean 0; fewer than two cells give variance 0.
fn column_moments(matrix: &[Vec<f64>]) -> Vec<ColumnMoments> {
    let n = matrix_width(matrix);
    (0..n)
        .into_par_iter()
        .map(|j| {
            let col = column_values(matrix, j);
            ColumnMoments {
                mean: mean(&col).unwrap_or(0.0),
                variance: variance(&col).unwrap_or(0.0),
                constant: is_constant(&col),
            }
        })
        .collect()
}

/// Sample variance of every column, ignoring missing cells.
pub fn column_variance(matrix: &[Vec<f64>]) -> Vec<f64> {
    column_moments(matrix).into_iter().map(|c| c.variance).collect()
}

/// Column-wise z-scored snapshot of a matrix.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StandardizedMatrix {
    /// Shape `(rows, width)` of the source. Missing cells and constant columns are 0.
    pub data: Array2<f64>,
    pub means: Array1<f64>,
    /// Sample standard deviations; 0 marks a column that standardized to zeros.
    pub stds: Array1<f64>,
}

impl StandardizedMatrix {
    pub fn empty() -> Self {
        Self {
            data: Array2::zeros((0, 0)),
            means: Array1::zeros(0),
            stds: Array1::zeros(0),
        }
    }
}

/// Centers and scales each column by its mean and sample standard deviation.
///
/// Missing cells become 0 (the column mean after centering). Columns with
/// zero spread become all zeros, never NaN or infinity.
pub fn zscore_matrix(matrix: &[Vec<f64>]) -> StandardizedMatrix {
    if matrix.is_empty() {
        return StandardizedMatrix::empty();
    }
    let moments = column_moments(matrix);
    let means: Array1<f64> = moments.iter().map(|c| c.mean).collect();
    let stds: Array1<f64> = moments
        .iter()
        .map(|c| {
            let s = c.variance.sqrt();
            if c.constant || !s.is_finite() {
                0.0
            } else {
                s
            }
        })
        .collect();

    let data = Array2::from_shape_fn((matrix.len(), moments.len()), |(i, j)| {
        match cell(&matrix[i], j) {
            Some(v) if stds[j] != 0.0 => (v - means[j]) / stds[j],
            _ => 0.0,
        }
    });

    StandardizedMatrix { data, means, stds }
}

/// Dense copy of a ragged matrix with missing cells set to 0.
pub fn to_dense(matrix: &[Vec<f64>]) -> Array2<f64> {
    let n = matrix_width(matrix);
    Array2::from_shape_fn((matrix.len(), n), |(i, j)| cell(&matrix[i], j).unwrap_or(0.0))
}

/// `ln(1 + max(0, x))` per cell; missing cells read as 0. Row lengths are kept.
pub fn log1p_matrix(matrix: &[Vec<f64>]) -> Matrix {
    matrix
        .iter()
        .map(|row| {
            row.iter()
                .map(|&v| (if v.is_finite() { v.max(0.0) } else { 0.0 }).ln_1p())
                .collect()
        })
        .collect()
}

/// How missing cells are handled before a statistic is computed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ImputeStrategy {
    /// Remove rows (or, for a single series, values) that contain a missing cell.
    #[default]
    Drop,
    Zero,
    Pseudocount,
    /// Substitute the column's median (0 for a column with no values).
    Median,
}

impl ImputeStrategy {
    pub fn as_str(&self) -> &'static str {
        match self {
            ImputeStrategy::Drop => "drop",
            ImputeStrategy::Zero => "zero",
            ImputeStrategy::Pseudocount => "pseudocount",
            ImputeStrategy::Median => "median",
        }
    }
}

impl fmt::Display for ImputeStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ImputeStrategy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "drop" => Ok(ImputeStrategy::Drop),
            "zero" => Ok(ImputeStrategy::Zero),
            "pseudocount" => Ok(ImputeStrategy::Pseudocount),
            "median" => Ok(ImputeStrategy::Median),
            other => Err(format!("unknown imputation strategy {other:?}")),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ImputedMatrix {
    pub rows: Matrix,
    /// Rows removed by [`ImputeStrategy::Drop`].
    pub dropped: usize,
}

fn fill_rows(matrix: &[Vec<f64>], width: usize, fill: impl Fn(usize) -> f64) -> Matrix {
    matrix
        .iter()
        .map(|row| (0..width).map(|j| cell(row, j).unwrap_or_else(|| fill(j))).collect())
        .collect()
}

/// Fills or drops missing cells.
///
/// `Drop` keeps only complete rows (full width, every cell finite). The
/// filling strategies pad short rows to the matrix width.
pub fn impute_matrix(matrix: &[Vec<f64>], strategy: ImputeStrategy, pseudocount: f64) -> ImputedMatrix {
    let width = matrix_width(matrix);

    match strategy {
        ImputeStrategy::Drop => {
            let rows: Matrix = matrix
                .iter()
                .filter(|row| row.len() == width && row.iter().all(|v| v.is_finite()))
                .cloned()
                .collect();
            let dropped = matrix.len() - rows.len();
            ImputedMatrix { rows, dropped }
        }
        ImputeStrategy::Zero => ImputedMatrix {
            rows: fill_rows(matrix, width, |_| 0.0),
            dropped: 0,
        },
        ImputeStrategy::Pseudocount => ImputedMatrix {
            rows: fill_rows(matrix, width, |_| pseudocount),
            dropped: 0,
        },
        ImputeStrategy::Median => {
            let medians: Vec<f64> = (0..width)
                .into_par_iter()
                .map(|j| median(&column_values(matrix, j)).unwrap_or(0.0))
                .collect();
            ImputedMatrix {
                rows: fill_rows(matrix, width, |j| medians[j]),
                dropped: 0,
            }
        }
    }
}

/// Applies an imputation strategy to a single series.
pub fn impute_series(values: &[f64], strategy: ImputeStrategy, pseudocount: f64) -> Vec<f64> {
    let fill = match strategy {
        ImputeStrategy::Drop => return clean_numbers(values),
        ImputeStrategy::Zero => 0.0,
        ImputeStrategy::Pseudocount => pseudocount,
        ImputeStrategy::Median => median(values).unwrap_or(0.0),
    };
    values
        .iter()
        .map(|&v| if v.is_finite() { v } else { fill })
        .collect()
}
