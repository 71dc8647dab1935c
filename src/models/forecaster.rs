//! Attendance forecaster: feature transform plus gradient boosting, with a
//! one-way untrained → trained lifecycle.

use gbdt::gradient_boost::GBDT;
use ndarray::Array2;
use polars::prelude::*;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use rand_pcg::Pcg64;
use serde::{Deserialize, Serialize};
use std::fs::{self, File};
use std::io::{BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

use super::gbdt::GBDTModel;
use super::traits::{ModelFactory, Regressor};
use crate::config::Config;
use crate::error::{FanSightError, Result};
use crate::feature_engineering::{
    add_behavioral_features, prepare_training_matrices, FeatureTransform, FittedTransform,
};
use crate::metrics::ForecastMetrics;

pub const PREDICTION_COLUMN: &str = "attendance_pred";

struct TrainedForecaster {
    transform: FittedTransform,
    model: GBDTModel,
    metrics: Option<ForecastMetrics>,
}

enum ForecasterState {
    Untrained,
    Trained(Box<TrainedForecaster>),
}

#[derive(Serialize)]
struct ArtifactRef<'a> {
    transform: &'a FittedTransform,
    model: &'a GBDT,
}

#[derive(Deserialize)]
struct Artifact {
    transform: FittedTransform,
    model: GBDT,
}

/// Row indices of a seeded shuffle split: `ceil(test_size × n)` test rows,
/// the rest for training.
pub fn train_test_split(n: usize, test_size: f64, seed: u64) -> (Vec<usize>, Vec<usize>) {
    let n_test = ((test_size.clamp(0.0, 1.0) * n as f64).ceil() as usize).min(n);
    let mut rows: Vec<usize> = (0..n).collect();
    rows.shuffle(&mut Pcg64::seed_from_u64(seed));
    let test = rows[..n_test].to_vec();
    let train = rows[n_test..].to_vec();
    (train, test)
}

fn take_rows(df: &DataFrame, rows: &[usize]) -> Result<DataFrame> {
    let idx = IdxCa::from_vec(
        "idx".into(),
        rows.iter().map(|&r| r as IdxSize).collect(),
    );
    Ok(df.take(&idx)?)
}

/// Forecasts event attendance from the modeling dataset.
pub struct AttendanceForecaster {
    config: Config,
    state: ForecasterState,
}

impl AttendanceForecaster {
    pub fn new(config: &Config) -> Self {
        Self {
            config: config.clone(),
            state: ForecasterState::Untrained,
        }
    }

    pub fn is_trained(&self) -> bool {
        matches!(self.state, ForecasterState::Trained(_))
    }

    fn trained(&self, action: &str) -> Result<&TrainedForecaster> {
        match &self.state {
            ForecasterState::Trained(trained) => Ok(&**trained),
            ForecasterState::Untrained => Err(FanSightError::state(format!(
                "cannot {action}: model has not been fit"
            ))),
        }
    }

    /// Splits `dataset`, fits the transform on the training rows only, fits
    /// the ensemble and scores the held-out rows.
    pub fn fit(&mut self, dataset: &DataFrame) -> Result<ForecastMetrics> {
        let (x, y) = prepare_training_matrices(dataset, &self.config)?;
        let params = &self.config.model;
        let (train_rows, test_rows) = train_test_split(x.height(), params.test_size, params.random_state);
        if train_rows.is_empty() {
            return Err(FanSightError::InsufficientData {
                required: 1,
                found: 0,
            });
        }
        debug!(train = train_rows.len(), test = test_rows.len(), "Split modeling rows");

        let x_train = take_rows(&x, &train_rows)?;
        let x_test = take_rows(&x, &test_rows)?;
        let y_train: Vec<f64> = train_rows.iter().map(|&r| y[r]).collect();
        let y_test: Vec<f64> = test_rows.iter().map(|&r| y[r]).collect();

        let transform = FeatureTransform::for_frame(&x_train, &self.config.features).fit(&x_train)?;
        let train_matrix = transform.apply(&x_train)?;
        let test_matrix = transform.apply(&x_test)?;

        let mut model = GBDTModel::create(params)?;
        model.fit(train_matrix.view(), &y_train)?;

        let predictions = model.predict(test_matrix.view())?;
        let metrics = ForecastMetrics::compute(&y_test, &predictions);
        if test_rows.is_empty() {
            warn!("Empty test split; MAE is undefined");
        }
        if metrics.r2.is_nan() {
            warn!(test_rows = test_rows.len(), "Fewer than two test rows; R² is undefined");
        }
        info!(mae = metrics.mae, r2 = metrics.r2, "Fitted attendance forecaster");

        self.state = ForecasterState::Trained(Box::new(TrainedForecaster {
            transform,
            model,
            metrics: Some(metrics),
        }));
        Ok(metrics)
    }

    /// One prediction per row of `frame`, in row order.
    pub fn predict(&self, frame: &DataFrame) -> Result<Series> {
        let trained = self.trained("predict")?;
        let enriched = add_behavioral_features(frame)?;
        let matrix: Array2<f64> = trained.transform.apply(&enriched)?;
        let predictions = trained.model.predict(matrix.view())?;
        Ok(Series::new(PREDICTION_COLUMN.into(), predictions))
    }

    /// (MAE, R²) from the most recent fit.
    pub fn evaluate(&self) -> Result<(f64, f64)> {
        let metrics = self
            .trained("evaluate")?
            .metrics
            .ok_or_else(|| FanSightError::state("cannot evaluate: no fit has occurred"))?;
        Ok((metrics.mae, metrics.r2))
    }

    pub fn metrics(&self) -> Option<ForecastMetrics> {
        match &self.state {
            ForecasterState::Trained(trained) => trained.metrics,
            ForecasterState::Untrained => None,
        }
    }

    pub fn transform(&self) -> Option<&FittedTransform> {
        match &self.state {
            ForecasterState::Trained(trained) => Some(&trained.transform),
            ForecasterState::Untrained => None,
        }
    }

    /// Writes the fitted transform and ensemble as one JSON artifact.
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<PathBuf> {
        let trained = self.trained("save")?;
        let booster = trained
            .model
            .booster()
            .ok_or_else(|| FanSightError::state("cannot save: regressor has not been fitted"))?;

        let path = path.as_ref();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }
        let mut writer = BufWriter::new(File::create(path)?);
        serde_json::to_writer(
            &mut writer,
            &ArtifactRef {
                transform: &trained.transform,
                model: booster,
            },
        )?;
        writer.flush()?;
        debug!(path = %path.display(), "Saved forecaster artifact");
        Ok(path.to_path_buf())
    }

    /// Restores a trained forecaster. It predicts like the saved one but has
    /// no metrics until it is fit again.
    pub fn load<P: AsRef<Path>>(path: P, config: &Config) -> Result<Self> {
        let path = path.as_ref();
        if !path.exists() {
            return Err(FanSightError::NotFound {
                path: path.to_path_buf(),
            });
        }
        let artifact: Artifact = serde_json::from_reader(BufReader::new(File::open(path)?))?;
        Ok(Self {
            config: config.clone(),
            state: ForecasterState::Trained(Box::new(TrainedForecaster {
                transform: artifact.transform,
                model: GBDTModel::from_trained(artifact.model, config.model.clone()),
                metrics: None,
            })),
        })
    }
}
