//! Dense pairwise correlation matrices over the columns of a
//! [`Matrix`](crate::stats::Matrix).

use log::{debug, info};
use ndarray::Array2;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::ComputeError;
use crate::monitor::{checkpoint, ComputeMonitor, Unmonitored};
use crate::stats::{
    clr_transform, impute_series, pearson, robust_corr, spearman, ImputeStrategy,
    DEFAULT_PSEUDOCOUNT, DEFAULT_WINSOR,
};

/// Largest supported rounding precision, in decimal places.
pub const MAX_PRECISION: u32 = 12;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CorrelationMethod {
    #[default]
    Pearson,
    /// Rank correlation without tie averaging.
    Spearman,
    /// Pearson after winsorizing each column.
    Robust,
}

impl fmt::Display for CorrelationMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            CorrelationMethod::Pearson => "pearson",
            CorrelationMethod::Spearman => "spearman",
            CorrelationMethod::Robust => "robust",
        })
    }
}

impl FromStr for CorrelationMethod {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pearson" => Ok(CorrelationMethod::Pearson),
            "spearman" => Ok(CorrelationMethod::Spearman),
            "robust" => Ok(CorrelationMethod::Robust),
            other => Err(format!("unknown correlation method {other:?}")),
        }
    }
}

/// Transform applied to each imputed column before correlating.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ValueTransform {
    #[default]
    None,
    /// `ln(1 + max(0, x))`.
    Log1p,
    /// Centered log-ratio over the column.
    Clr,
}

impl fmt::Display for ValueTransform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            ValueTransform::None => "none",
            ValueTransform::Log1p => "log1p",
            ValueTransform::Clr => "clr",
        })
    }
}

impl FromStr for ValueTransform {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "none" => Ok(ValueTransform::None),
            "log1p" => Ok(ValueTransform::Log1p),
            "clr" => Ok(ValueTransform::Clr),
            other => Err(format!("unknown value transform {other:?}")),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct CorrelationOptions {
    pub method: CorrelationMethod,
    pub transform: ValueTransform,
    pub impute: ImputeStrategy,
    /// Decimal places kept in every cell.
    pub precision: u32,
    /// Winsorizing quantile for [`CorrelationMethod::Robust`].
    pub winsor: f64,
    /// Used by pseudocount imputation and the CLR transform.
    pub pseudocount: f64,
}

impl Default for CorrelationOptions {
    fn default() -> Self {
        Self {
            method: CorrelationMethod::Pearson,
            transform: ValueTransform::None,
            impute: ImputeStrategy::Drop,
            precision: 3,
            winsor: DEFAULT_WINSOR,
            pseudocount: DEFAULT_PSEUDOCOUNT,
        }
    }
}

impl CorrelationOptions {
    pub fn validate(&self) -> Result<(), ComputeError> {
        if !(0.0..0.5).contains(&self.winsor) {
            return Err(ComputeError::InvalidInput(format!(
                "winsor must lie in [0, 0.5) (got {})",
                self.winsor
            )));
        }
        if !self.pseudocount.is_finite() {
            return Err(ComputeError::InvalidInput("pseudocount must be finite".into()));
        }
        if self.precision > MAX_PRECISION {
            return Err(ComputeError::InvalidInput(format!(
                "precision must be at most {} (got {})",
                MAX_PRECISION, self.precision
            )));
        }
        Ok(())
    }
}

/// One heatmap cell: `x` is the column index, `y` the row index.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct HeatmapCell {
    pub x: usize,
    pub y: usize,
    pub value: f64,
}

/// Square, symmetric correlation matrix labelled by column identifier.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CorrelationMatrix {
    pub labels: Vec<String>,
    pub values: Array2<f64>,
}

impl CorrelationMatrix {
    pub fn len(&self) -> usize {
        self.labels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.labels.is_empty()
    }

    pub fn get(&self, i: usize, j: usize) -> Option<f64> {
        self.values.get((i, j)).copied()
    }

    /// Looks a cell up by the two column identifiers.
    pub fn get_by_label(&self, a: &str, b: &str) -> Option<f64> {
        let i = self.labels.iter().position(|l| l == a)?;
        let j = self.labels.iter().position(|l| l == b)?;
        self.get(i, j)
    }

    /// Row-major list of cells, the shape heatmap series consume.
    pub fn to_cells(&self) -> Vec<HeatmapCell> {
        self.values
            .indexed_iter()
            .map(|((i, j), &value)| HeatmapCell { x: j, y: i, value })
            .collect()
    }
}

fn round_to(value: f64, precision: u32) -> f64 {
    let scale = 10f64.powi(precision as i32);
    (value * scale).round() / scale
}

fn prepare_column(rows: &[Vec<f64>], j: usize, options: &CorrelationOptions) -> Vec<f64> {
    let raw: Vec<f64> = rows
        .iter()
        .map(|row| row.get(j).copied().unwrap_or(f64::NAN))
        .collect();
    let imputed = impute_series(&raw, options.impute, options.pseudocount);
    match options.transform {
        ValueTransform::None => imputed,
        ValueTransform::Log1p => imputed
            .into_iter()
            .map(|v| v.max(0.0).ln_1p())
            .collect(),
        ValueTransform::Clr => clr_transform(&imputed, options.pseudocount),
    }
}

fn correlate(x: &[f64], y: &[f64], options: &CorrelationOptions) -> Option<f64> {
    match options.method {
        CorrelationMethod::Pearson => pearson(x, y),
        CorrelationMethod::Spearman => spearman(x, y),
        CorrelationMethod::Robust => robust_corr(x, y, options.winsor),
    }
}

/// Builds correlation matrices under a fixed configuration.
#[derive(Debug, Clone)]
pub struct CorrelationEngine {
    options: CorrelationOptions,
    progress_stride: usize,
}

impl Default for CorrelationEngine {
    fn default() -> Self {
        Self::new(CorrelationOptions::default())
    }
}

impl CorrelationEngine {
    pub fn new(options: CorrelationOptions) -> Self {
        Self {
            options,
            progress_stride: 4,
        }
    }

    /// Report progress every `stride` matrix rows (0 disables reporting).
    pub fn with_progress_stride(mut self, stride: usize) -> Self {
        self.progress_stride = stride;
        self
    }

    pub fn options(&self) -> &CorrelationOptions {
        &self.options
    }

    pub fn compute(&self, rows: &[Vec<f64>], columns: &[String]) -> CorrelationMatrix {
        // Unmonitored runs are never interrupted, so the fallback is unreachable.
        self.compute_monitored(rows, columns, &Unmonitored)
            .unwrap_or_else(|_| CorrelationMatrix {
                labels: columns.to_vec(),
                values: Array2::zeros((columns.len(), columns.len())),
            })
    }

    /// Correlates every pair of the first `columns.len()` matrix columns.
    ///
    /// Column `i` of `rows` is labelled `columns[i]`; a label past the matrix
    /// width names an all-missing column. Each column is imputed and
    /// transformed once, every unordered pair is correlated once and mirrored,
    /// and undefined correlations are written as 0.
    pub fn compute_monitored(
        &self,
        rows: &[Vec<f64>],
        columns: &[String],
        monitor: &dyn ComputeMonitor,
    ) -> Result<CorrelationMatrix, ComputeError> {
        let opts = &self.options;
        let n = columns.len();
        debug!(
            "Correlation matrix: {} rows, {} columns, method={}, transform={}, impute={}",
            rows.len(),
            n,
            opts.method,
            opts.transform,
            opts.impute
        );
        let start = std::time::Instant::now();

        let prepared: Vec<Vec<f64>> = (0..n)
            .into_par_iter()
            .map(|j| prepare_column(rows, j, opts))
            .collect();

        let mut values = Array2::<f64>::zeros((n, n));
        for i in 0..n {
            checkpoint(monitor)?;
            for j in i..n {
                let r = correlate(&prepared[i], &prepared[j], opts).unwrap_or(0.0);
                let r = round_to(r, opts.precision);
                values[[i, j]] = r;
                values[[j, i]] = r;
            }
            if self.progress_stride > 0 && i % self.progress_stride == 0 {
                monitor.report_progress((i as f64 / n as f64).min(0.9));
            }
        }

        info!("Correlation matrix ({}x{}) finished in {:?}", n, n, start.elapsed());
        Ok(CorrelationMatrix {
            labels: columns.to_vec(),
            values,
        })
    }
}

/// Convenience wrapper around [`CorrelationEngine::compute`].
pub fn correlation_matrix(
    rows: &[Vec<f64>],
    columns: &[String],
    options: &CorrelationOptions,
) -> CorrelationMatrix {
    CorrelationEngine::new(options.clone()).compute(rows, columns)
}
