use gbdt::decision_tree::{Data, DataVec, ValueType};
use ndarray::ArrayView2;

use crate::config::ModelConfig;
use crate::error::Result;

/// A regressor over a dense, already-transformed feature matrix.
pub trait Regressor {
    fn fit(&mut self, features: ArrayView2<f64>, targets: &[f64]) -> Result<()>;
    fn predict(&self, features: ArrayView2<f64>) -> Result<Vec<f64>>;
}

pub trait ModelFactory {
    type ModelType: Regressor;

    fn create(params: &ModelConfig) -> Result<Self::ModelType>;
}

pub trait IntoDataVec {
    /// Converts rows to gbdt samples; `targets` labels them for training.
    fn into_data_vec(self, targets: Option<&[f64]>) -> DataVec;
}

impl IntoDataVec for ArrayView2<'_, f64> {
    fn into_data_vec(self, targets: Option<&[f64]>) -> DataVec {
        self.rows()
            .into_iter()
            .enumerate()
            .map(|(row_idx, row)| {
                let feature: Vec<ValueType> = row.iter().map(|&v| v as ValueType).collect();
                match targets {
                    Some(targets) => {
                        Data::new_training_data(feature, 1.0, targets[row_idx] as ValueType, None)
                    }
                    None => Data::new_test_data(feature, None),
                }
            })
            .collect()
    }
}
