use serde::{Deserialize, Serialize};

/// Hold-out metrics recorded by the most recent fit.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ForecastMetrics {
    pub mae: f64,
    /// NaN when the test split has fewer than two records.
    pub r2: f64,
    pub test_rows: usize,
}

impl ForecastMetrics {
    pub fn compute(actuals: &[f64], predictions: &[f64]) -> Self {
        let r2 = if actuals.len() >= 2 {
            r2_score(actuals, predictions)
        } else {
            f64::NAN
        };
        Self {
            mae: mean_absolute_error(actuals, predictions),
            r2,
            test_rows: actuals.len(),
        }
    }
}

pub fn mean_absolute_error(actuals: &[f64], predictions: &[f64]) -> f64 {
    if actuals.is_empty() {
        return f64::NAN;
    }
    actuals
        .iter()
        .zip(predictions)
        .map(|(a, p)| (a - p).abs())
        .sum::<f64>()
        / actuals.len() as f64
}

/// Coefficient of determination. A constant target scores 1.0 when
/// predicted exactly and 0.0 otherwise.
pub fn r2_score(actuals: &[f64], predictions: &[f64]) -> f64 {
    if actuals.is_empty() {
        return f64::NAN;
    }
    let mean = actuals.iter().sum::<f64>() / actuals.len() as f64;
    let residual: f64 = actuals
        .iter()
        .zip(predictions)
        .map(|(a, p)| (a - p).powi(2))
        .sum();
    let total: f64 = actuals.iter().map(|a| (a - mean).powi(2)).sum();
    if total == 0.0 {
        return if residual == 0.0 { 1.0 } else { 0.0 };
    }
    1.0 - residual / total
}
