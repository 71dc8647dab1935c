use gbdt::config::Config as GBDTConfig;
use gbdt::gradient_boost::GBDT;
use ndarray::ArrayView2;
use tracing::debug;

use super::traits::{IntoDataVec, ModelFactory, Regressor};
use crate::config::ModelConfig;
use crate::error::{FanSightError, Result};

/// Gradient-boosted regression trees with squared-error loss.
pub struct GBDTModel {
    model: Option<GBDT>,
    params: ModelConfig,
}

impl GBDTModel {
    pub(crate) fn from_trained(model: GBDT, params: ModelConfig) -> Self {
        Self {
            model: Some(model),
            params,
        }
    }

    pub(crate) fn booster(&self) -> Option<&GBDT> {
        self.model.as_ref()
    }

    fn config_for(&self, feature_size: usize) -> GBDTConfig {
        let mut config = GBDTConfig::new();
        config.set_feature_size(feature_size);
        config.set_max_depth(self.params.max_depth);
        config.set_iterations(self.params.n_estimators);
        config.set_shrinkage(self.params.learning_rate as f32);
        config.set_min_leaf_size(self.params.min_leaf_size);
        config.set_loss("SquaredError");
        config.set_debug(false);
        // full samples on every round keep fits reproducible
        config.set_data_sample_ratio(1.0);
        config.set_feature_sample_ratio(1.0);
        config.set_training_optimization_level(2);
        config
    }
}

impl Regressor for GBDTModel {
    fn fit(&mut self, features: ArrayView2<f64>, targets: &[f64]) -> Result<()> {
        if features.nrows() != targets.len() {
            return Err(FanSightError::Model(format!(
                "{} feature rows but {} targets",
                features.nrows(),
                targets.len()
            )));
        }
        if features.nrows() == 0 {
            return Err(FanSightError::InsufficientData {
                required: 1,
                found: 0,
            });
        }

        let mut train_data = features.into_data_vec(Some(targets));
        let mut gbdt = GBDT::new(&self.config_for(features.ncols()));
        gbdt.fit(&mut train_data);
        debug!(
            rows = features.nrows(),
            features = features.ncols(),
            iterations = self.params.n_estimators,
            "Fitted gradient boosting ensemble"
        );

        self.model = Some(gbdt);
        Ok(())
    }

    fn predict(&self, features: ArrayView2<f64>) -> Result<Vec<f64>> {
        let model = self
            .model
            .as_ref()
            .ok_or_else(|| FanSightError::state("regressor has not been fitted"))?;
        if features.nrows() == 0 {
            return Ok(Vec::new());
        }

        let test_data = features.into_data_vec(None);
        Ok(model
            .predict(&test_data)
            .into_iter()
            .map(f64::from)
            .collect())
    }
}

impl ModelFactory for GBDTModel {
    type ModelType = Self;

    fn create(params: &ModelConfig) -> Result<Self::ModelType> {
        if params.n_estimators == 0 || params.max_depth == 0 {
            return Err(FanSightError::Model(
                "n_estimators and max_depth must be positive".into(),
            ));
        }
        Ok(Self {
            model: None,
            params: params.clone(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::Array2;

    fn small_params() -> ModelConfig {
        ModelConfig {
            n_estimators: 30,
            max_depth: 3,
            ..ModelConfig::default()
        }
    }

    fn step_data() -> (Array2<f64>, Vec<f64>) {
        let x = Array2::from_shape_fn((20, 1), |(i, _)| i as f64);
        let y = (0..20).map(|i| if i < 10 { 100.0 } else { 300.0 }).collect();
        (x, y)
    }

    #[test]
    fn learns_a_step_function() {
        let (x, y) = step_data();
        let mut model = GBDTModel::create(&small_params()).unwrap();
        model.fit(x.view(), &y).unwrap();

        let predictions = model.predict(x.view()).unwrap();
        assert_eq!(predictions.len(), 20);
        assert!(predictions[0] < 150.0);
        assert!(predictions[19] > 250.0);
    }

    #[test]
    fn predict_before_fit_is_a_state_error() {
        let (x, _) = step_data();
        let model = GBDTModel::create(&small_params()).unwrap();
        assert!(matches!(
            model.predict(x.view()),
            Err(FanSightError::State(_))
        ));
    }

    #[test]
    fn rejects_mismatched_targets() {
        let (x, _) = step_data();
        let mut model = GBDTModel::create(&small_params()).unwrap();
        assert!(model.fit(x.view(), &[1.0]).is_err());
    }
}
