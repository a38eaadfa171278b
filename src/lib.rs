// Statistical compute core: PCA, correlation matrices, LOD sampling, background jobs

#![doc = include_str!("../README.md")]

pub mod correlation;
pub mod error;
pub mod jobs;
pub mod lod;
pub mod monitor;
pub mod pca;
pub mod stats;

pub use correlation::{
    correlation_matrix, CorrelationEngine, CorrelationMatrix, CorrelationMethod, CorrelationOptions,
    HeatmapCell, ValueTransform,
};
pub use error::{ComputeError, JobError};
pub use jobs::{
    CancelHandle, CorrelationJob, JobHandle, JobId, JobKind, JobOutcome, JobOutput, JobPayload,
    JobRunner, JobRunnerConfig, PcaJob,
};
pub use lod::{
    sample_heatmap_values, sample_scatter_points, HeatmapLodOptions, HeatmapStrategy, LodInfo,
    LodStrategy, Point, SampledSeries, ScatterLodOptions, ScatterPoint, ScatterStrategy,
};
pub use monitor::{ComputeMonitor, Unmonitored};
pub use pca::{pca, power_iteration, CovarianceMatrix, EigenPair, PcaEngine, PcaOptions, PcaResult};
pub use stats::{
    aitchison_distance, alr_transform, boxplot_stats, clean_numbers, clr_transform, column_variance,
    impute_matrix, impute_series, log1p_matrix, mean, median, pearson, quantile, robust_corr,
    spearman, std_dev, variance, zscore, zscore_matrix, BoxplotOptions, BoxplotStats,
    ImputeStrategy, ImputedMatrix, Matrix, StandardizedMatrix,
};



#[cfg(test)]
mod lod_tests;
