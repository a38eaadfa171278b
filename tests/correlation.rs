use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

use approx::assert_abs_diff_eq;
use ndarray::Array2;
use ndarray_rand::RandomExt;
use omics_compute::{
    correlation_matrix, ComputeError, ComputeMonitor, CorrelationEngine, CorrelationMethod,
    CorrelationOptions, ImputeStrategy, Unmonitored, ValueTransform,
};
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use rand_distr::Normal;

fn labels(n: usize) -> Vec<String> {
    (0..n).map(|i| format!("gene{}", i)).collect()
}

fn normal_rows(rows: usize, cols: usize, seed: u64) -> Vec<Vec<f64>> {
    let mut rng = ChaCha8Rng::seed_from_u64(seed);
    let data = Array2::random_using((rows, cols), Normal::new(2.0, 1.0).unwrap(), &mut rng);
    data.outer_iter().map(|row| row.to_vec()).collect()
}

#[derive(Default)]
struct RecordingMonitor {
    progress: Mutex<Vec<f64>>,
    cancelled: AtomicBool,
}

impl ComputeMonitor for RecordingMonitor {
    fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    fn report_progress(&self, fraction: f64) {
        self.progress.lock().unwrap().push(fraction);
    }
}

#[test]
fn test_matrix_is_symmetric_with_unit_diagonal() {
    let rows = normal_rows(60, 6, 1);
    for method in [CorrelationMethod::Pearson, CorrelationMethod::Spearman, CorrelationMethod::Robust] {
        for transform in [ValueTransform::None, ValueTransform::Log1p, ValueTransform::Clr] {
            let options = CorrelationOptions {
                method,
                transform,
                ..CorrelationOptions::default()
            };
            let matrix = correlation_matrix(&rows, &labels(6), &options);
            assert_eq!(matrix.values.dim(), (6, 6));
            for i in 0..6 {
                assert_eq!(
                    matrix.get(i, i),
                    Some(1.0),
                    "{}/{}: diagonal {} is not 1",
                    method,
                    transform,
                    i
                );
                for j in 0..6 {
                    assert_eq!(matrix.values[[i, j]], matrix.values[[j, i]]);
                    assert!((-1.0..=1.0).contains(&matrix.values[[i, j]]));
                }
            }
        }
    }
}

#[test]
fn test_values_are_rounded_to_precision() {
    let rows = normal_rows(30, 5, 2);
    for precision in [1, 3] {
        let options = CorrelationOptions {
            precision,
            ..CorrelationOptions::default()
        };
        let scale = 10f64.powi(precision as i32);
        let matrix = correlation_matrix(&rows, &labels(5), &options);
        for &v in matrix.values.iter() {
            assert_abs_diff_eq!(v * scale, (v * scale).round(), epsilon = 1e-6);
        }
    }
}

#[test]
fn test_known_relationships() {
    let rows: Vec<Vec<f64>> = (1..=10)
        .map(|i| {
            let x = i as f64;
            vec![x, -2.0 * x + 1.0, x * x * x]
        })
        .collect();
    let columns = vec!["x".to_string(), "neg".to_string(), "cube".to_string()];

    let pearson = correlation_matrix(&rows, &columns, &CorrelationOptions::default());
    assert_eq!(pearson.get_by_label("x", "neg"), Some(-1.0));
    assert!(pearson.get_by_label("x", "cube").unwrap() < 1.0);

    let spearman = correlation_matrix(
        &rows,
        &columns,
        &CorrelationOptions {
            method: CorrelationMethod::Spearman,
            ..CorrelationOptions::default()
        },
    );
    assert_eq!(spearman.get_by_label("x", "cube"), Some(1.0));
    assert_eq!(spearman.get_by_label("cube", "neg"), Some(-1.0));
    assert_eq!(spearman.get_by_label("x", "missing"), None);
}

#[test]
fn test_degenerate_columns_render_as_zero() {
    let rows = vec![vec![1.0, 5.0], vec![2.0, 5.0], vec![3.0, 5.0]];
    let columns = vec!["varying".to_string(), "constant".to_string(), "absent".to_string()];
    let matrix = correlation_matrix(&rows, &columns, &CorrelationOptions::default());
    assert_eq!(matrix.len(), 3);
    assert_eq!(matrix.get(0, 0), Some(1.0));
    assert_eq!(matrix.get(1, 1), Some(0.0), "zero variance has no correlation");
    assert_eq!(matrix.get(0, 1), Some(0.0));
    assert_eq!(matrix.get(2, 2), Some(0.0), "column past the matrix width");
    assert_eq!(matrix.get(0, 2), Some(0.0));
}

#[test]
fn test_imputation_changes_pairing() {
    let rows = vec![
        vec![1.0, 1.0],
        vec![f64::NAN, 2.0],
        vec![3.0, 3.0],
        vec![4.0, 4.0],
    ];
    let columns = labels(2);
    let dropped = correlation_matrix(&rows, &columns, &CorrelationOptions::default());
    let zeroed = correlation_matrix(
        &rows,
        &columns,
        &CorrelationOptions {
            impute: ImputeStrategy::Zero,
            ..CorrelationOptions::default()
        },
    );
    assert!(dropped.get(0, 1).unwrap() > 0.0);
    assert_ne!(dropped.get(0, 1), zeroed.get(0, 1));
}

#[test]
fn test_to_cells_layout() {
    let rows = normal_rows(20, 3, 3);
    let matrix = correlation_matrix(&rows, &labels(3), &CorrelationOptions::default());
    let cells = matrix.to_cells();
    assert_eq!(cells.len(), 9);
    assert_eq!((cells[1].x, cells[1].y), (1, 0));
    assert_eq!((cells[3].x, cells[3].y), (0, 1));
    assert!(cells.iter().all(|c| matrix.get(c.y, c.x) == Some(c.value)));
}

#[test]
fn test_empty_inputs() {
    let matrix = correlation_matrix(&[], &[], &CorrelationOptions::default());
    assert!(matrix.is_empty());
    assert_eq!(matrix.values.dim(), (0, 0));

    let matrix = correlation_matrix(&[], &labels(2), &CorrelationOptions::default());
    assert_eq!(matrix.values.dim(), (2, 2));
    assert!(matrix.values.iter().all(|&v| v == 0.0));
}

#[test]
fn test_monitored_progress_and_cancellation() {
    let rows = normal_rows(20, 10, 4);
    let engine = CorrelationEngine::new(CorrelationOptions::default());

    let monitor = RecordingMonitor::default();
    engine.compute_monitored(&rows, &labels(10), &monitor).unwrap();
    let progress = monitor.progress.lock().unwrap().clone();
    assert_eq!(progress, vec![0.0, 0.4, 0.8]);

    let silent = RecordingMonitor::default();
    engine
        .clone()
        .with_progress_stride(0)
        .compute_monitored(&rows, &labels(10), &silent)
        .unwrap();
    assert!(silent.progress.lock().unwrap().is_empty());

    let cancelled = RecordingMonitor::default();
    cancelled.cancelled.store(true, Ordering::SeqCst);
    let err = engine
        .compute_monitored(&rows, &labels(10), &cancelled)
        .unwrap_err();
    assert_eq!(err, ComputeError::Interrupted);
}

#[test]
fn test_options_wire_format() {
    let options: CorrelationOptions =
        serde_json::from_str(r#"{"method": "robust", "transform": "clr", "precision": 2}"#).unwrap();
    assert_eq!(options.method, CorrelationMethod::Robust);
    assert_eq!(options.transform, ValueTransform::Clr);
    assert_eq!(options.precision, 2);
    assert_eq!(options.impute, ImputeStrategy::Drop);
    assert_eq!(options.winsor, 0.05);

    assert_eq!("spearman".parse::<CorrelationMethod>(), Ok(CorrelationMethod::Spearman));
    assert_eq!("log1p".parse::<ValueTransform>(), Ok(ValueTransform::Log1p));
    assert!("kendall".parse::<CorrelationMethod>().is_err());
}

#[test]
fn test_options_validation() {
    assert!(CorrelationOptions::default().validate().is_ok());
    let bad = [
        CorrelationOptions {
            winsor: 0.5,
            ..CorrelationOptions::default()
        },
        CorrelationOptions {
            winsor: -0.1,
            ..CorrelationOptions::default()
        },
        CorrelationOptions {
            pseudocount: f64::NAN,
            ..CorrelationOptions::default()
        },
        CorrelationOptions {
            precision: 13,
            ..CorrelationOptions::default()
        },
    ];
    for options in bad {
        assert!(
            matches!(options.validate(), Err(ComputeError::InvalidInput(_))),
            "accepted {:?}",
            options
        );
    }
}

#[test]
fn test_compute_matches_unmonitored_run() {
    let rows = normal_rows(25, 4, 5);
    let engine = CorrelationEngine::new(CorrelationOptions::default());
    let plain = engine.compute(&rows, &labels(4));
    let monitored = engine.compute_monitored(&rows, &labels(4), &Unmonitored).unwrap();
    assert_eq!(plain, monitored);
    assert!((0..4).all(|i| plain.get(i, i) == Some(1.0)));
}
