use crate::lod::*;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;

fn generate_points(n: usize, seed: u64) -> Vec<[f64; 2]> {
    let mut rng = ChaCha8Rng::seed_from_u64(seed);
    (0..n)
        .map(|_| [rng.gen_range(-100.0..100.0), rng.gen_range(-100.0..100.0)])
        .collect()
}

/// Points whose x coordinate is their input index, for order checks.
fn indexed_points(n: usize) -> Vec<Point> {
    (0..n)
        .map(|i| Point {
            x: i as f64,
            y: ((i * 7919) % 1000) as f64,
        })
        .collect()
}

fn is_strictly_increasing(values: &[f64]) -> bool {
    values.windows(2).all(|w| w[0] < w[1])
}

#[cfg(test)]
mod scatter_tests {
    use super::*;

    #[test]
    fn test_small_input_passes_through() {
        let points = generate_points(50, 1);
        let options = ScatterLodOptions {
            max_points: 100,
            ..ScatterLodOptions::default()
        };
        let sampled = sample_scatter_points(&points, &options);
        assert_eq!(sampled.items, points);
        assert!(!sampled.lod.enabled);
        assert_eq!(sampled.lod.original_count, 50);
        assert_eq!(sampled.lod.sampled_count, 50);
        assert_eq!(sampled.lod.strategy, LodStrategy::Grid);
    }

    #[test]
    fn test_grid_sampling_is_deterministic_and_bounded() {
        let points = generate_points(10_000, 7);
        let options = ScatterLodOptions {
            max_points: 100,
            strategy: ScatterStrategy::Grid,
            seed: 7,
        };
        let first = sample_scatter_points(&points, &options);
        let second = sample_scatter_points(&points, &options);
        assert_eq!(first, second);

        assert!(first.lod.enabled);
        assert_eq!(first.lod.strategy, LodStrategy::Grid);
        assert_eq!(first.lod.original_count, 10_000);
        assert_eq!(first.lod.sampled_count, first.items.len());
        assert!(first.items.len() <= 100, "kept {} points", first.items.len());
        // 10 x 10 grid over uniform points: every cell is occupied.
        assert!(first.items.len() > 90, "kept only {} points", first.items.len());
        assert!(first.items.iter().all(|p| points.contains(p)));
    }

    #[test]
    fn test_grid_keeps_sparse_regions() {
        let mut points: Vec<(f64, f64)> = (0..5_000)
            .map(|i| (0.001 * (i % 100) as f64, 0.001 * (i / 100) as f64))
            .collect();
        points.push((1_000.0, 1_000.0));
        let options = ScatterLodOptions {
            max_points: 100,
            ..ScatterLodOptions::default()
        };
        let sampled = sample_scatter_points(&points, &options);
        assert!(sampled.items.contains(&(1_000.0, 1_000.0)), "lone far point was dropped");
        assert!(sampled.items.contains(&(0.0, 0.0)));
    }

    #[test]
    fn test_grid_keeps_first_point_in_each_cell() {
        let points = indexed_points(2_000);
        let options = ScatterLodOptions {
            max_points: 64,
            ..ScatterLodOptions::default()
        };
        let sampled = sample_scatter_points(&points, &options);
        assert_eq!(sampled.items[0], points[0]);
        let xs: Vec<f64> = sampled.items.iter().map(|p| p.x).collect();
        assert!(is_strictly_increasing(&xs), "input order not preserved");
    }

    #[test]
    fn test_grid_collapses_identical_points() {
        let points = vec![[3.0, 3.0]; 1_000];
        let options = ScatterLodOptions {
            max_points: 10,
            ..ScatterLodOptions::default()
        };
        let sampled = sample_scatter_points(&points, &options);
        assert_eq!(sampled.items, vec![[3.0, 3.0]]);
        assert!(sampled.lod.enabled);
    }

    #[test]
    fn test_grid_skips_non_finite_points() {
        let mut points = generate_points(1_000, 3);
        points[0] = [f64::NAN, 1.0];
        points[1] = [f64::INFINITY, f64::INFINITY];
        let options = ScatterLodOptions {
            max_points: 100,
            ..ScatterLodOptions::default()
        };
        let sampled = sample_scatter_points(&points, &options);
        assert!(sampled.items.iter().all(|p| p[0].is_finite() && p[1].is_finite()));
        assert!(!sampled.items.is_empty());

        let all_missing = vec![[f64::NAN, f64::NAN]; 500];
        let sampled = sample_scatter_points(&all_missing, &options);
        assert!(sampled.items.is_empty());
        assert_eq!(sampled.lod.sampled_count, 0);
        assert_eq!(sampled.lod.original_count, 500);
    }

    #[test]
    fn test_random_sampling() {
        let points = indexed_points(10_000);
        let options = ScatterLodOptions {
            max_points: 1_000,
            strategy: ScatterStrategy::Random,
            seed: 11,
        };
        let sampled = sample_scatter_points(&points, &options);
        assert_eq!(sampled.lod.strategy, LodStrategy::Random);
        assert!(sampled.items.len() <= 1_000);
        assert!(sampled.items.len() > 800, "kept only {}", sampled.items.len());
        let xs: Vec<f64> = sampled.items.iter().map(|p| p.x).collect();
        assert!(is_strictly_increasing(&xs));

        assert_eq!(sampled, sample_scatter_points(&points, &options));
        let reseeded = sample_scatter_points(&points, &ScatterLodOptions { seed: 12, ..options });
        assert_ne!(sampled.items, reseeded.items);
    }

    #[test]
    fn test_scatter_options_serde() {
        let options: ScatterLodOptions = serde_json::from_str("{}").unwrap();
        assert_eq!(options, ScatterLodOptions::default());
        let options: ScatterLodOptions =
            serde_json::from_str(r#"{"maxPoints": 10, "strategy": "random"}"#).unwrap();
        assert_eq!(options.max_points, 10);
        assert_eq!(options.strategy, ScatterStrategy::Random);
        assert_eq!(options.seed, 42);
    }
}

#[cfg(test)]
mod heatmap_tests {
    use super::*;

    fn cells(n: usize) -> Vec<f64> {
        (0..n).map(|i| i as f64).collect()
    }

    #[test]
    fn test_small_heatmap_passes_through() {
        let values = cells(100);
        let sampled = sample_heatmap_values(&values, &HeatmapLodOptions::default());
        assert_eq!(sampled.items, values);
        assert!(!sampled.lod.enabled);
        assert_eq!(sampled.lod.strategy, LodStrategy::None);
    }

    #[test]
    fn test_stride_sampling() {
        let values = cells(1_000);
        let options = HeatmapLodOptions {
            max_cells: 100,
            ..HeatmapLodOptions::default()
        };
        let sampled = sample_heatmap_values(&values, &options);
        assert!(sampled.lod.enabled);
        assert_eq!(sampled.lod.strategy, LodStrategy::Slice);
        // 100 stride hits alone fill the budget.
        assert_eq!(sampled.items.len(), 100);
        assert_eq!(sampled.items[0], 0.0);
        assert!(sampled.items.contains(&10.0));
        assert!(is_strictly_increasing(&sampled.items));
        assert_eq!(sampled, sample_heatmap_values(&values, &options));
    }

    #[test]
    fn test_reservoir_sampling() {
        let values = cells(1_000);
        let options = HeatmapLodOptions {
            max_cells: 100,
            strategy: HeatmapStrategy::Reservoir,
            seed: 3,
        };
        let sampled = sample_heatmap_values(&values, &options);
        assert_eq!(sampled.lod.strategy, LodStrategy::Reservoir);
        assert_eq!(sampled.items.len(), 100);
        assert_eq!(sampled.lod.sampled_count, 100);
        assert!(is_strictly_increasing(&sampled.items), "cells not in source order");
        assert_eq!(sampled, sample_heatmap_values(&values, &options));
    }

    #[test]
    fn test_lod_info_serializes_camel_case() {
        let sampled = sample_heatmap_values(&cells(10), &HeatmapLodOptions::default());
        let json = serde_json::to_value(&sampled.lod).unwrap();
        assert_eq!(json["originalCount"], 10);
        assert_eq!(json["sampledCount"], 10);
        assert_eq!(json["strategy"], "none");
        assert_eq!(json["enabled"], false);
    }
}
