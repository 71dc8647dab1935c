use polars::prelude::*;
use serde::Serialize;
use statrs::distribution::{ContinuousCDF, StudentsT};
use tracing::{debug, warn};

use crate::data_loader::{numeric_values, string_values};
use crate::error::{FanSightError, Result};

pub const CONTROL: &str = "control";
pub const TREATMENT: &str = "treatment";

/// Treatment-minus-control comparison of one metric.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct AbResult {
    pub lift: f64,
    pub ci_low: f64,
    pub ci_high: f64,
    pub p_value: f64,
    pub t_stat: f64,
    pub degrees_of_freedom: f64,
    pub n_control: usize,
    pub n_treatment: usize,
}

fn group(metric: &[Option<f64>], variants: &[Option<String>], label: &str) -> Result<Vec<f64>> {
    let values: Vec<f64> = metric
        .iter()
        .zip(variants)
        .filter(|(_, variant)| variant.as_deref() == Some(label))
        .filter_map(|(value, _)| *value)
        .collect();
    if values.is_empty() {
        return Err(FanSightError::EmptyGroup {
            variant: label.to_string(),
        });
    }
    Ok(values)
}

fn mean(values: &[f64]) -> f64 {
    values.iter().sum::<f64>() / values.len() as f64
}

/// Sample variance (n − 1 denominator); NaN for a single value.
fn sample_variance(values: &[f64]) -> f64 {
    if values.len() < 2 {
        return f64::NAN;
    }
    let m = mean(values);
    values.iter().map(|v| (v - m).powi(2)).sum::<f64>() / (values.len() - 1) as f64
}

/// Compares `metric` between the `control` and `treatment` rows of
/// `variant_col`.
///
/// The standard error combines the two sample variances, while the degrees
/// of freedom use the pooled `n_control + n_treatment - 2`. The p-value is
/// two-sided and the interval is `lift ± t(1 - alpha/2) × se`. Rows with a
/// null metric are ignored.
pub fn run_ab_test(df: &DataFrame, metric: &str, variant_col: &str, alpha: f64) -> Result<AbResult> {
    if !(alpha > 0.0 && alpha < 1.0) {
        return Err(FanSightError::InvalidParameter(format!(
            "alpha must lie in (0, 1), got {alpha}"
        )));
    }
    let values = numeric_values(df, metric)?;
    let variants = string_values(df, variant_col)?;
    let control = group(&values, &variants, CONTROL)?;
    let treatment = group(&values, &variants, TREATMENT)?;

    let (n_control, n_treatment) = (control.len(), treatment.len());
    let lift = mean(&treatment) - mean(&control);
    let se = (sample_variance(&control) / n_control as f64
        + sample_variance(&treatment) / n_treatment as f64)
        .sqrt();
    let t_stat = lift / se;
    let dof = (n_control + n_treatment) as f64 - 2.0;

    let (p_value, margin) = if dof > 0.0 && se.is_finite() {
        let dist = StudentsT::new(0.0, 1.0, dof)?;
        let p_value = if t_stat.is_nan() {
            f64::NAN
        } else if t_stat.is_infinite() {
            0.0
        } else {
            2.0 * (1.0 - dist.cdf(t_stat.abs()))
        };
        (p_value, dist.inverse_cdf(1.0 - alpha / 2.0) * se)
    } else {
        warn!(
            n_control,
            n_treatment, "Too few samples for a t-test; interval and p-value are undefined"
        );
        (f64::NAN, f64::NAN)
    };

    let result = AbResult {
        lift,
        ci_low: lift - margin,
        ci_high: lift + margin,
        p_value,
        t_stat,
        degrees_of_freedom: dof,
        n_control,
        n_treatment,
    };
    debug!(?result, metric, "A/B evaluation");
    Ok(result)
}

/// Mean, sample standard deviation and count of `metric` per variant.
pub fn summarize_by_variant(df: &DataFrame, metric: &str, variant_col: &str) -> Result<DataFrame> {
    Ok(df
        .clone()
        .lazy()
        .group_by([col(variant_col)])
        .agg([
            col(metric).cast(DataType::Float64).mean().alias("avg"),
            col(metric).cast(DataType::Float64).std(1).alias("std_dev"),
            col(metric).count().alias("count"),
        ])
        .sort([variant_col], SortMultipleOptions::default())
        .collect()?)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn experiment() -> DataFrame {
        df!(
            "variant" => ["control", "treatment", "control", "treatment", "control", "treatment", "holdout"],
            "attendance" => [Some(10.0), Some(14.0), Some(12.0), Some(15.0), Some(11.0), Some(16.0), Some(99.0)],
        )
        .unwrap()
    }

    #[test]
    fn computes_lift_interval_and_p_value() {
        let result = run_ab_test(&experiment(), "attendance", "variant", 0.05).unwrap();

        assert!((result.lift - 4.0).abs() < 1e-12);
        // both groups have sample variance 1
        let se = (2.0f64 / 3.0).sqrt();
        assert!((result.t_stat - 4.0 / se).abs() < 1e-9);
        assert_eq!(result.degrees_of_freedom, 4.0);
        assert_eq!((result.n_control, result.n_treatment), (3, 3));

        // t(0.975, 4) = 2.776445
        let margin = 2.776_445_105_197_793 * se;
        assert!((result.ci_low - (4.0 - margin)).abs() < 1e-6);
        assert!((result.ci_high - (4.0 + margin)).abs() < 1e-6);
        assert!(result.p_value > 0.0 && result.p_value < 0.01);
    }

    #[test]
    fn swapping_labels_negates_lift_only() {
        let original = run_ab_test(&experiment(), "attendance", "variant", 0.05).unwrap();

        let swapped = experiment()
            .lazy()
            .with_column(
                when(col("variant").eq(lit("control")))
                    .then(lit("treatment"))
                    .when(col("variant").eq(lit("treatment")))
                    .then(lit("control"))
                    .otherwise(col("variant"))
                    .alias("variant"),
            )
            .collect()
            .unwrap();
        let mirrored = run_ab_test(&swapped, "attendance", "variant", 0.05).unwrap();

        assert!((mirrored.lift + original.lift).abs() < 1e-12);
        assert!((mirrored.t_stat.abs() - original.t_stat.abs()).abs() < 1e-12);
        assert!((mirrored.p_value - original.p_value).abs() < 1e-12);
    }

    #[test]
    fn empty_group_is_an_error() {
        let df = df!(
            "variant" => ["control", "control"],
            "attendance" => [1.0, 2.0],
        )
        .unwrap();
        let err = run_ab_test(&df, "attendance", "variant", 0.05).unwrap_err();
        assert!(matches!(err, FanSightError::EmptyGroup { variant } if variant == "treatment"));
    }

    #[test]
    fn singleton_groups_leave_statistics_undefined() {
        let df = df!(
            "variant" => ["control", "treatment"],
            "attendance" => [1.0, 2.0],
        )
        .unwrap();
        let result = run_ab_test(&df, "attendance", "variant", 0.05).unwrap();
        assert_eq!(result.lift, 1.0);
        assert!(result.p_value.is_nan());
        assert!(result.ci_low.is_nan());
    }

    #[test]
    fn rejects_alpha_outside_unit_interval() {
        assert!(run_ab_test(&experiment(), "attendance", "variant", 1.5).is_err());
    }

    #[test]
    fn summary_lists_each_variant() {
        let summary = summarize_by_variant(&experiment(), "attendance", "variant").unwrap();
        assert_eq!(summary.height(), 3);
        assert_eq!(
            string_values(&summary, "variant").unwrap(),
            vec![
                Some("control".to_string()),
                Some("holdout".to_string()),
                Some("treatment".to_string())
            ]
        );
        assert_eq!(
            numeric_values(&summary, "avg").unwrap(),
            vec![Some(11.0), Some(99.0), Some(15.0)]
        );
    }
}
