//! Sequences ETL, modeling, segmentation and A/B evaluation over one
//! in-memory dataset.

use polars::prelude::*;
use std::path::PathBuf;
use tracing::{info, instrument, warn};

use crate::ab_testing::{run_ab_test, AbResult};
use crate::config::Config;
use crate::data_loader::{has_column, SourceOverrides};
use crate::error::{FanSightError, Result};
use crate::etl::build_and_save_dataset;
use crate::metrics::ForecastMetrics;
use crate::models::AttendanceForecaster;
use crate::segmentation::{run_kmeans_segmentation, SegmentAssignment};

pub const DEFAULT_DATASET_NAME: &str = "fansight_master";

pub struct FanSightPipeline {
    config: Config,
    dataset_name: String,
    overrides: SourceOverrides,
    dataset: Option<DataFrame>,
    dataset_path: Option<PathBuf>,
    model: Option<AttendanceForecaster>,
    segments: Option<SegmentAssignment>,
}

impl FanSightPipeline {
    pub fn new(config: Config) -> Self {
        Self {
            config,
            dataset_name: DEFAULT_DATASET_NAME.to_string(),
            overrides: SourceOverrides::default(),
            dataset: None,
            dataset_path: None,
            model: None,
            segments: None,
        }
    }

    pub fn with_dataset_name(mut self, name: impl Into<String>) -> Self {
        self.dataset_name = name.into();
        self
    }

    pub fn with_overrides(mut self, overrides: SourceOverrides) -> Self {
        self.overrides = overrides;
        self
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn dataset(&self) -> Option<&DataFrame> {
        self.dataset.as_ref()
    }

    pub fn dataset_path(&self) -> Option<&PathBuf> {
        self.dataset_path.as_ref()
    }

    pub fn model(&self) -> Option<&AttendanceForecaster> {
        self.model.as_ref()
    }

    pub fn segments(&self) -> Option<&SegmentAssignment> {
        self.segments.as_ref()
    }

    fn require_dataset(&self, step: &str) -> Result<&DataFrame> {
        self.dataset
            .as_ref()
            .ok_or_else(|| FanSightError::state(format!("run_etl must precede {step}")))
    }

    /// Builds the modeling dataset, writes it under the processed directory
    /// and keeps it as the current dataset.
    #[instrument(skip(self), fields(dataset = %self.dataset_name))]
    pub fn run_etl(&mut self) -> Result<&DataFrame> {
        let (dataset, path) =
            build_and_save_dataset(&self.dataset_name, &self.config, &self.overrides)?;
        info!(rows = dataset.height(), path = %path.display(), "ETL complete");
        self.dataset_path = Some(path);
        Ok(self.dataset.insert(dataset))
    }

    /// Fits a fresh forecaster on the current dataset and persists it to the
    /// configured artifact path.
    #[instrument(skip(self))]
    pub fn run_modeling(&mut self) -> Result<ForecastMetrics> {
        let dataset = self.require_dataset("run_modeling")?;
        let mut model = AttendanceForecaster::new(&self.config);
        let metrics = model.fit(dataset)?;
        let path = model.save(self.config.paths.model_artifact())?;
        info!(
            mae = metrics.mae,
            r2 = metrics.r2,
            artifact = %path.display(),
            "Modeling complete"
        );
        self.model = Some(model);
        Ok(metrics)
    }

    /// Segments the current dataset into `k` clusters, or the configured
    /// count when `k` is `None`.
    #[instrument(skip(self))]
    pub fn run_segmentation(&mut self, k: Option<usize>) -> Result<&SegmentAssignment> {
        let dataset = self.require_dataset("run_segmentation")?;
        let k = k.unwrap_or(self.config.model.segment_k);
        let segments = run_kmeans_segmentation(dataset, None, k, self.config.model.segment_seed)?;
        info!(
            k = segments.k,
            silhouette = segments.silhouette,
            counts = ?segments.counts(),
            "Segmentation complete"
        );
        Ok(self.segments.insert(segments))
    }

    /// Evaluates `metric` between variants. Returns `Ok(None)` when there is
    /// no dataset yet or the variant column is absent.
    #[instrument(skip(self))]
    pub fn run_ab_test(&self, metric: &str, variant_col: &str) -> Result<Option<AbResult>> {
        let Some(dataset) = self.dataset.as_ref() else {
            warn!("No dataset loaded; skipping A/B test");
            return Ok(None);
        };
        if !has_column(dataset, variant_col) {
            warn!(variant_col, "Variant column missing; skipping A/B test");
            return Ok(None);
        }
        let result = run_ab_test(dataset, metric, variant_col, self.config.ab_test.alpha)?;
        info!(
            lift = result.lift,
            ci_low = result.ci_low,
            ci_high = result.ci_high,
            p_value = result.p_value,
            "A/B test complete"
        );
        Ok(Some(result))
    }

    /// A/B test with the configured metric and variant column.
    pub fn run_default_ab_test(&self) -> Result<Option<AbResult>> {
        let metric = self.config.ab_test.metric.clone();
        let variant = self.config.features.variant.clone();
        self.run_ab_test(&metric, &variant)
    }

    /// Predictions of the current model over the current dataset.
    pub fn predict_dataset(&self) -> Result<Series> {
        let dataset = self.require_dataset("predict_dataset")?;
        let model = self
            .model
            .as_ref()
            .ok_or_else(|| FanSightError::state("run_modeling must precede predict_dataset"))?;
        model.predict(dataset)
    }
}
