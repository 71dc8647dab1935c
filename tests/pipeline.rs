mod common;

use fansight::models::forecaster::PREDICTION_COLUMN;
use fansight::{AttendanceForecaster, FanSightError, FanSightPipeline, SourceOverrides};
use polars::prelude::*;

use common::{sample_workspace, SAMPLE_PAIRS};

fn values(series: &Series) -> Vec<f64> {
    series.f64().unwrap().into_no_null_iter().collect()
}

/// Rows shaped like the dataset but with attribute values the model never saw.
fn unseen_rows(dataset: &DataFrame) -> DataFrame {
    dataset
        .clone()
        .lazy()
        .with_columns([
            lit(91.5).alias("ticket_price"),
            lit("Rookie").alias("segment"),
            lit(0.33).alias("loyalty_score"),
        ])
        .collect()
        .unwrap()
}

#[test]
fn runs_every_step_on_sample_data() {
    let (_dir, config) = sample_workspace();
    let mut pipeline = FanSightPipeline::new(config.clone());

    let dataset = pipeline.run_etl().unwrap();
    assert_eq!(dataset.height(), SAMPLE_PAIRS);
    assert_eq!(dataset.column("attendance").unwrap().null_count(), 0);
    assert!(pipeline.dataset_path().unwrap().exists());

    let metrics = pipeline.run_modeling().unwrap();
    assert_eq!(metrics.test_rows, 1);
    assert!(metrics.mae.is_finite());
    // a single held-out row leaves R² undefined
    assert!(metrics.r2.is_nan());
    assert!(config.paths.model_artifact().exists());

    let predictions = pipeline.predict_dataset().unwrap();
    assert_eq!(predictions.name().as_str(), PREDICTION_COLUMN);
    assert_eq!(predictions.len(), SAMPLE_PAIRS);

    let segments = pipeline.run_segmentation(None).unwrap();
    assert_eq!(segments.k, SAMPLE_PAIRS - 1);
    assert_eq!(segments.assignments.len(), SAMPLE_PAIRS);
    assert!(segments.silhouette.is_finite());

    let ab = pipeline.run_default_ab_test().unwrap().unwrap();
    assert_eq!((ab.n_control, ab.n_treatment), (2, 3));
    let treatment = (15870.0 + 17210.0 + 17750.0) / 3.0;
    let control = (16420.0 + 17750.0) / 2.0;
    assert!((ab.lift - (treatment - control)).abs() < 1e-9);
    assert!(ab.ci_low < ab.lift && ab.lift < ab.ci_high);
    assert!(ab.p_value > 0.0 && ab.p_value <= 1.0);
}

#[test]
fn modeling_requires_etl() {
    let (_dir, config) = sample_workspace();
    let mut pipeline = FanSightPipeline::new(config);
    assert!(matches!(
        pipeline.run_modeling(),
        Err(FanSightError::State(_))
    ));
}

#[test]
fn missing_source_is_not_found() {
    let (dir, config) = sample_workspace();
    std::fs::remove_file(dir.path().join("raw").join("fans.csv")).unwrap();

    let mut pipeline = FanSightPipeline::new(config);
    assert!(matches!(
        pipeline.run_etl(),
        Err(FanSightError::NotFound { .. })
    ));
}

#[test]
fn refits_are_deterministic() {
    let (_dir, config) = sample_workspace();
    let mut pipeline = FanSightPipeline::new(config.clone());
    let dataset = pipeline.run_etl().unwrap().clone();

    let mut first = AttendanceForecaster::new(&config);
    let mut second = AttendanceForecaster::new(&config);
    let first_metrics = first.fit(&dataset).unwrap();
    let second_metrics = second.fit(&dataset).unwrap();

    assert_eq!(first_metrics.mae, second_metrics.mae);
    let held_out = unseen_rows(&dataset);
    assert_eq!(
        values(&first.predict(&held_out).unwrap()),
        values(&second.predict(&held_out).unwrap())
    );
}

#[test]
fn saved_model_predicts_like_the_original() {
    let (dir, config) = sample_workspace();
    let mut pipeline = FanSightPipeline::new(config.clone());
    let dataset = pipeline.run_etl().unwrap().clone();

    let mut model = AttendanceForecaster::new(&config);
    model.fit(&dataset).unwrap();
    let path = model.save(dir.path().join("nested").join("model.json")).unwrap();

    let restored = AttendanceForecaster::load(&path, &config).unwrap();
    assert!(restored.is_trained());
    assert!(matches!(restored.evaluate(), Err(FanSightError::State(_))));
    assert!(model.metrics().is_some());
    assert_eq!(restored.metrics(), None);
    assert_eq!(restored.transform(), model.transform());

    let original = values(&model.predict(&dataset).unwrap());
    let reloaded = values(&restored.predict(&dataset).unwrap());
    assert_eq!(original, reloaded);

    let held_out = unseen_rows(&dataset);
    assert_eq!(
        values(&model.predict(&held_out).unwrap()),
        values(&restored.predict(&held_out).unwrap())
    );
}

#[test]
fn loading_a_missing_artifact_is_not_found() {
    let (dir, config) = sample_workspace();
    assert!(matches!(
        AttendanceForecaster::load(dir.path().join("absent.json"), &config),
        Err(FanSightError::NotFound { .. })
    ));
}

#[test]
fn ab_test_skips_without_variant_column() {
    let (_dir, config) = sample_workspace();
    let mut pipeline = FanSightPipeline::new(config);
    pipeline.run_etl().unwrap();

    assert_eq!(pipeline.run_ab_test("attendance", "cohort").unwrap(), None);
}

#[test]
fn requested_segment_count_is_clamped() {
    let (_dir, config) = sample_workspace();
    let mut pipeline = FanSightPipeline::new(config);
    pipeline.run_etl().unwrap();

    assert_eq!(pipeline.run_segmentation(Some(50)).unwrap().k, SAMPLE_PAIRS - 1);
    assert_eq!(pipeline.run_segmentation(Some(1)).unwrap().k, 2);
    assert_eq!(pipeline.segments().unwrap().assignments.len(), SAMPLE_PAIRS);
}

#[test]
fn source_overrides_replace_configured_paths() {
    let (dir, config) = sample_workspace();
    let relocated = dir.path().join("crm").join("fans_export.csv");
    std::fs::create_dir_all(relocated.parent().unwrap()).unwrap();
    std::fs::rename(dir.path().join("raw").join("fans.csv"), &relocated).unwrap();

    let mut pipeline = FanSightPipeline::new(config.clone());
    assert!(matches!(
        pipeline.run_etl(),
        Err(FanSightError::NotFound { .. })
    ));

    let mut pipeline = FanSightPipeline::new(config).with_overrides(SourceOverrides {
        fans: Some(relocated),
        ..SourceOverrides::default()
    });
    let dataset = pipeline.run_etl().unwrap();
    assert_eq!(dataset.height(), SAMPLE_PAIRS);
    assert!(dataset.column("loyalty_score").unwrap().null_count() == 0);
}
