//! Level-of-detail sampling for scatter points and heatmap cells.
//!
//! Charts render a bounded number of marks, so point and cell arrays are
//! thinned here right before they reach a charting component. Every
//! sampler is deterministic for a fixed input and seed, never mutates its
//! input, and is a no-op (`enabled = false`, output equal to input) when the
//! input already fits the budget.

use log::debug;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

/// Grids never get coarser than this many cells per side.
const MIN_GRID_SIDE: usize = 8;

/// How a [`SampledSeries`] was produced.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LodStrategy {
    Grid,
    Random,
    /// Stride + random heatmap thinning.
    Slice,
    Reservoir,
    /// Input was within budget.
    None,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LodInfo {
    pub enabled: bool,
    pub original_count: usize,
    pub sampled_count: usize,
    pub strategy: LodStrategy,
}

/// A bounded copy of a point or cell sequence plus how it was reduced.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SampledSeries<T> {
    pub items: Vec<T>,
    pub lod: LodInfo,
}

impl<T: Clone> SampledSeries<T> {
    fn passthrough(items: &[T], strategy: LodStrategy) -> Self {
        Self {
            items: items.to_vec(),
            lod: LodInfo {
                enabled: false,
                original_count: items.len(),
                sampled_count: items.len(),
                strategy,
            },
        }
    }

    fn reduced(items: Vec<T>, original_count: usize, strategy: LodStrategy) -> Self {
        let sampled_count = items.len();
        Self {
            items,
            lod: LodInfo {
                enabled: true,
                original_count,
                sampled_count,
                strategy,
            },
        }
    }
}

/// Anything with planar coordinates.
pub trait ScatterPoint {
    fn x(&self) -> f64;
    fn y(&self) -> f64;
}

impl ScatterPoint for [f64; 2] {
    fn x(&self) -> f64 {
        self[0]
    }
    fn y(&self) -> f64 {
        self[1]
    }
}

impl ScatterPoint for (f64, f64) {
    fn x(&self) -> f64 {
        self.0
    }
    fn y(&self) -> f64 {
        self.1
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Point {
    pub x: f64,
    pub y: f64,
}

impl ScatterPoint for Point {
    fn x(&self) -> f64 {
        self.x
    }
    fn y(&self) -> f64 {
        self.y
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ScatterStrategy {
    /// First point per occupied grid cell; keeps the spatial envelope.
    #[default]
    Grid,
    /// Seeded Bernoulli filter.
    Random,
}

impl ScatterStrategy {
    fn as_lod(self) -> LodStrategy {
        match self {
            ScatterStrategy::Grid => LodStrategy::Grid,
            ScatterStrategy::Random => LodStrategy::Random,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ScatterLodOptions {
    pub max_points: usize,
    pub strategy: ScatterStrategy,
    pub seed: u64,
}

impl Default for ScatterLodOptions {
    fn default() -> Self {
        Self {
            max_points: 50_000,
            strategy: ScatterStrategy::Grid,
            seed: 42,
        }
    }
}

/// Keeps each point with probability `keep`, drawing once per point.
fn bernoulli_filter<T: Clone>(items: &[T], keep: f64, seed: u64) -> Vec<T> {
    let mut rng = ChaCha8Rng::seed_from_u64(seed);
    items
        .iter()
        .filter(|_| rng.gen::<f64>() < keep)
        .cloned()
        .collect()
}

fn grid_cell(value: f64, origin: f64, step: f64, side: usize) -> i64 {
    let idx = ((value - origin) / step).floor() as i64;
    idx.clamp(0, side as i64 - 1)
}

/// First point (in input order) of every occupied cell of a `side × side`
/// grid over the bounding box. Points with a non-finite coordinate cannot be
/// placed and are skipped.
fn grid_sample<T: ScatterPoint + Clone>(points: &[T], max_points: usize) -> Vec<T> {
    let mut bounds: Option<(f64, f64, f64, f64)> = None;
    for p in points {
        let (x, y) = (p.x(), p.y());
        if !(x.is_finite() && y.is_finite()) {
            continue;
        }
        bounds = Some(match bounds {
            None => (x, x, y, y),
            Some((x0, x1, y0, y1)) => (x0.min(x), x1.max(x), y0.min(y), y1.max(y)),
        });
    }
    let Some((xmin, xmax, ymin, ymax)) = bounds else {
        return Vec::new();
    };

    let side = MIN_GRID_SIDE.max((max_points as f64).sqrt().floor() as usize);
    let step_or_one = |span: f64| {
        let step = span / side as f64;
        if step > 0.0 && step.is_finite() {
            step
        } else {
            1.0
        }
    };
    let x_step = step_or_one(xmax - xmin);
    let y_step = step_or_one(ymax - ymin);

    let mut occupied: HashSet<(i64, i64)> = HashSet::new();
    let mut kept = Vec::new();
    for p in points {
        if kept.len() >= max_points {
            break;
        }
        let (x, y) = (p.x(), p.y());
        if !(x.is_finite() && y.is_finite()) {
            continue;
        }
        let key = (
            grid_cell(x, xmin, x_step, side),
            grid_cell(y, ymin, y_step, side),
        );
        if occupied.insert(key) {
            kept.push(p.clone());
        }
    }
    kept
}

/// Thins a scatter series to at most `options.max_points` points.
///
/// `Grid` partitions the bounding box into `max(8, ⌊√max_points⌋)` cells per
/// side and keeps the first point seen in each occupied cell, so sparse
/// regions survive as well as dense ones. The result depends on input order.
/// `Random` keeps each point with probability `max_points / n` and truncates.
pub fn sample_scatter_points<T: ScatterPoint + Clone>(
    points: &[T],
    options: &ScatterLodOptions,
) -> SampledSeries<T> {
    let strategy = options.strategy.as_lod();
    if points.len() <= options.max_points {
        return SampledSeries::passthrough(points, strategy);
    }

    let mut kept = match options.strategy {
        ScatterStrategy::Random => {
            let keep = options.max_points as f64 / points.len() as f64;
            bernoulli_filter(points, keep, options.seed)
        }
        ScatterStrategy::Grid => grid_sample(points, options.max_points),
    };
    kept.truncate(options.max_points);
    debug!(
        "Scatter LOD ({:?}): {} -> {} points",
        strategy,
        points.len(),
        kept.len()
    );
    SampledSeries::reduced(kept, points.len(), strategy)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HeatmapStrategy {
    /// Every `⌊n / max_cells⌋`-th cell plus a seeded random top-up. Cheap, but
    /// not a uniform sample.
    #[default]
    Stride,
    /// Uniform sample without replacement, returned in source order.
    Reservoir,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct HeatmapLodOptions {
    pub max_cells: usize,
    pub seed: u64,
    pub strategy: HeatmapStrategy,
}

impl Default for HeatmapLodOptions {
    fn default() -> Self {
        Self {
            max_cells: 40_000,
            seed: 42,
            strategy: HeatmapStrategy::Stride,
        }
    }
}

fn stride_sample<T: Clone>(values: &[T], max_cells: usize, seed: u64) -> Vec<T> {
    let mut rng = ChaCha8Rng::seed_from_u64(seed);
    let step = (values.len() / max_cells.max(1)).max(1);
    let keep = max_cells as f64 / values.len() as f64;
    values
        .iter()
        .enumerate()
        // The random draw only happens off the stride.
        .filter(|(i, _)| i % step == 0 || rng.gen::<f64>() < keep)
        .map(|(_, v)| v.clone())
        .take(max_cells)
        .collect()
}

fn reservoir_sample<T: Clone>(values: &[T], max_cells: usize, seed: u64) -> Vec<T> {
    let mut rng = ChaCha8Rng::seed_from_u64(seed);
    let mut picked = rand::seq::index::sample(&mut rng, values.len(), max_cells).into_vec();
    picked.sort_unstable();
    picked.into_iter().map(|i| values[i].clone()).collect()
}

/// Thins a heatmap cell sequence to at most `options.max_cells` cells.
pub fn sample_heatmap_values<T: Clone>(
    values: &[T],
    options: &HeatmapLodOptions,
) -> SampledSeries<T> {
    if values.len() <= options.max_cells {
        return SampledSeries::passthrough(values, LodStrategy::None);
    }

    let (kept, strategy) = match options.strategy {
        HeatmapStrategy::Stride => (
            stride_sample(values, options.max_cells, options.seed),
            LodStrategy::Slice,
        ),
        HeatmapStrategy::Reservoir => (
            reservoir_sample(values, options.max_cells, options.seed),
            LodStrategy::Reservoir,
        ),
    };
    debug!(
        "Heatmap LOD ({:?}): {} -> {} cells",
        strategy,
        values.len(),
        kept.len()
    );
    SampledSeries::reduced(kept, values.len(), strategy)
}
