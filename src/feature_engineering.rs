use ndarray::{concatenate, Array2, ArrayView2, Axis};
use polars::prelude::*;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::config::{Config, FeatureConfig};
use crate::data_loader::{has_column, numeric_values, string_values};
use crate::error::{FanSightError, Result};

const LOYALTY_EPSILON: f64 = 1e-3;
const MISSING_CATEGORY: &str = "missing";

/// Adds behavioral ratios, each only when its inputs are present.
///
/// - `sell_through_rate`: attendance / capacity, null when capacity is zero
/// - `loyalty_value_ratio`: lifetime value / (loyalty score + 1e-3)
/// - `price_alignment`: ticket price × (1 − price sensitivity)
pub fn add_behavioral_features(df: &DataFrame) -> Result<DataFrame> {
    let has = |name: &str| has_column(df, name);
    let float = |name: &str| col(name).cast(DataType::Float64);

    let mut derived = Vec::new();
    if has("attendance") && has("capacity") {
        derived.push(
            when(float("capacity").eq(lit(0.0)))
                .then(lit(NULL).cast(DataType::Float64))
                .otherwise(float("attendance") / float("capacity"))
                .alias("sell_through_rate"),
        );
    }
    if has("lifetime_value") && has("loyalty_score") {
        derived.push(
            (float("lifetime_value") / (float("loyalty_score") + lit(LOYALTY_EPSILON)))
                .alias("loyalty_value_ratio"),
        );
    }
    if has("ticket_price") && has("price_sensitivity") {
        derived.push(
            (float("ticket_price") * (lit(1.0) - float("price_sensitivity")))
                .alias("price_alignment"),
        );
    }

    if derived.is_empty() {
        return Ok(df.clone());
    }
    Ok(df.clone().lazy().with_columns(derived).collect()?)
}

/// Keeps the configured feature columns present in `df`, warning about the
/// ones that are absent.
pub fn select_features(df: &DataFrame, features: &FeatureConfig) -> Result<DataFrame> {
    let (present, missing): (Vec<&str>, Vec<&str>) =
        features.feature_columns().partition(|name| has_column(df, name));
    if !missing.is_empty() {
        warn!(columns = ?missing, "Dropping missing feature columns");
    }
    Ok(df
        .clone()
        .lazy()
        .select(present.into_iter().map(col).collect::<Vec<_>>())
        .collect()?)
}

/// Returns the feature frame and target values used for fitting.
///
/// Behavioral ratios are derived first. Rows with a null target are
/// dropped.
pub fn prepare_training_matrices(df: &DataFrame, config: &Config) -> Result<(DataFrame, Vec<f64>)> {
    let target = config.features.target.as_str();
    if !has_column(df, target) {
        return Err(FanSightError::NotFitted {
            target: target.to_string(),
        });
    }

    let enriched = add_behavioral_features(df)?;
    let nulls = enriched.column(target)?.null_count();
    let enriched = if nulls > 0 {
        warn!(rows = nulls, "Dropping rows with a null target");
        enriched.lazy().filter(col(target).is_not_null()).collect()?
    } else {
        enriched
    };

    let x = select_features(&enriched, &config.features)?;
    let y = numeric_values(&enriched, target)?
        .into_iter()
        .flatten()
        .collect();
    Ok((x, y))
}

/// One column's preprocessing before fitting.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Stage {
    /// Most-frequent imputation then one-hot encoding.
    Categorical(String),
    /// Median imputation then standard scaling.
    Numeric(String),
}

/// A stage's parameters learned from training data.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum FittedStage {
    OneHot {
        column: String,
        fill: String,
        categories: Vec<String>,
    },
    Scaled {
        column: String,
        median: f64,
        mean: f64,
        scale: f64,
    },
}

impl Stage {
    pub fn column(&self) -> &str {
        match self {
            Self::Categorical(column) | Self::Numeric(column) => column,
        }
    }

    pub fn fit(&self, data: &DataFrame) -> Result<FittedStage> {
        match self {
            Self::Categorical(column) => {
                let values = string_values(data, column)?;
                let fill = most_frequent(&values).unwrap_or_else(|| {
                    warn!(column = %column, "No observed categories; imputing `{MISSING_CATEGORY}`");
                    MISSING_CATEGORY.to_string()
                });
                let mut categories: Vec<String> = values
                    .into_iter()
                    .map(|v| v.unwrap_or_else(|| fill.clone()))
                    .collect();
                categories.sort();
                categories.dedup();
                Ok(FittedStage::OneHot {
                    column: column.clone(),
                    fill,
                    categories,
                })
            }
            Self::Numeric(column) => {
                let values = numeric_values(data, column)?;
                let median = median(values.iter().flatten().copied().collect()).unwrap_or_else(|| {
                    warn!(column = %column, "No observed values; imputing 0.0");
                    0.0
                });
                let imputed: Vec<f64> = values.iter().map(|v| v.unwrap_or(median)).collect();
                let n = imputed.len().max(1) as f64;
                let mean = imputed.iter().sum::<f64>() / n;
                let variance = imputed.iter().map(|x| (x - mean).powi(2)).sum::<f64>() / n;
                let std = variance.sqrt();
                let scale = if std > f64::EPSILON { std } else { 1.0 };
                Ok(FittedStage::Scaled {
                    column: column.clone(),
                    median,
                    mean,
                    scale,
                })
            }
        }
    }
}

impl FittedStage {
    pub fn column(&self) -> &str {
        match self {
            Self::OneHot { column, .. } | Self::Scaled { column, .. } => column,
        }
    }

    pub fn width(&self) -> usize {
        match self {
            Self::OneHot { categories, .. } => categories.len(),
            Self::Scaled { .. } => 1,
        }
    }

    pub fn output_names(&self) -> Vec<String> {
        match self {
            Self::OneHot {
                column, categories, ..
            } => categories.iter().map(|c| format!("{column}={c}")).collect(),
            Self::Scaled { column, .. } => vec![column.clone()],
        }
    }

    /// Encodes the stage's column of `data`. Categories unseen during
    /// fitting encode to an all-zero row.
    pub fn apply(&self, data: &DataFrame) -> Result<Array2<f64>> {
        let mut out = Array2::zeros((data.height(), self.width()));
        match self {
            Self::OneHot {
                column,
                fill,
                categories,
            } => {
                for (row, value) in string_values(data, column)?.into_iter().enumerate() {
                    let value = value.as_deref().unwrap_or(fill.as_str());
                    if let Ok(position) = categories.binary_search_by(|c| c.as_str().cmp(value)) {
                        out[[row, position]] = 1.0;
                    }
                }
            }
            Self::Scaled {
                column,
                median,
                mean,
                scale,
            } => {
                for (row, value) in numeric_values(data, column)?.into_iter().enumerate() {
                    out[[row, 0]] = (value.unwrap_or(*median) - mean) / scale;
                }
            }
        }
        Ok(out)
    }
}

/// Ordered stages built from the configured feature lists.
#[derive(Debug, Clone, Default)]
pub struct FeatureTransform {
    stages: Vec<Stage>,
    skipped: Vec<String>,
}

impl FeatureTransform {
    /// One stage per configured column present in `frame`; absent columns
    /// are skipped with a warning.
    pub fn for_frame(frame: &DataFrame, features: &FeatureConfig) -> Self {
        let mut stages = Vec::new();
        let mut skipped = Vec::new();
        let configured = features
            .categorical
            .iter()
            .map(|c| Stage::Categorical(c.clone()))
            .chain(features.numerical.iter().map(|c| Stage::Numeric(c.clone())));
        for stage in configured {
            if has_column(frame, stage.column()) {
                stages.push(stage);
            } else {
                skipped.push(stage.column().to_string());
            }
        }
        if !skipped.is_empty() {
            warn!(columns = ?skipped, "Feature columns absent from frame; skipping");
        }
        Self { stages, skipped }
    }

    pub fn stages(&self) -> &[Stage] {
        &self.stages
    }

    pub fn fit(&self, data: &DataFrame) -> Result<FittedTransform> {
        if self.stages.is_empty() {
            return Err(FanSightError::NoFeatures(self.skipped.clone()));
        }
        let stages = self
            .stages
            .iter()
            .map(|stage| stage.fit(data))
            .collect::<Result<Vec<_>>>()?;
        let fitted = FittedTransform { stages };
        debug!(width = fitted.width(), "Fitted feature transform");
        Ok(fitted)
    }
}

/// Fitted stages, applied in order and concatenated column-wise.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FittedTransform {
    stages: Vec<FittedStage>,
}

impl FittedTransform {
    pub fn stages(&self) -> &[FittedStage] {
        &self.stages
    }

    pub fn width(&self) -> usize {
        self.stages.iter().map(FittedStage::width).sum()
    }

    pub fn output_names(&self) -> Vec<String> {
        self.stages.iter().flat_map(FittedStage::output_names).collect()
    }

    pub fn apply(&self, data: &DataFrame) -> Result<Array2<f64>> {
        let missing: Vec<String> = self
            .stages
            .iter()
            .map(FittedStage::column)
            .filter(|column| !has_column(data, column))
            .map(String::from)
            .collect();
        if !missing.is_empty() {
            return Err(FanSightError::Schema {
                table: "feature frame".into(),
                missing,
            });
        }

        let blocks = self
            .stages
            .iter()
            .map(|stage| stage.apply(data))
            .collect::<Result<Vec<_>>>()?;
        let views: Vec<ArrayView2<f64>> = blocks.iter().map(|b| b.view()).collect();
        Ok(concatenate(Axis(1), &views)?)
    }
}

fn most_frequent(values: &[Option<String>]) -> Option<String> {
    let mut counts: Vec<(&str, usize)> = Vec::new();
    for value in values.iter().flatten() {
        match counts.iter_mut().find(|(seen, _)| *seen == value.as_str()) {
            Some((_, count)) => *count += 1,
            None => counts.push((value, 1)),
        }
    }
    let mut best: Option<(&str, usize)> = None;
    for (value, count) in counts {
        if best.map_or(true, |(_, top)| count > top) {
            best = Some((value, count));
        }
    }
    best.map(|(value, _)| value.to_string())
}

pub(crate) fn median(mut values: Vec<f64>) -> Option<f64> {
    if values.is_empty() {
        return None;
    }
    values.sort_by(f64::total_cmp);
    let mid = values.len() / 2;
    Some(if values.len() % 2 == 0 {
        (values[mid - 1] + values[mid]) / 2.0
    } else {
        values[mid]
    })
}
