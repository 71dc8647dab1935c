use std::path::PathBuf;

use anyhow::Context;
use fansight::ab_testing::summarize_by_variant;
use fansight::{Config, FanSightPipeline};
use tracing::{debug, info, instrument, warn};

fn load_config() -> anyhow::Result<Config> {
    let path = std::env::args()
        .nth(1)
        .map(PathBuf::from)
        .or_else(|| Some(PathBuf::from("config.toml")).filter(|p| p.exists()));

    match path {
        Some(path) => {
            debug!("Loading config from path: {}", path.display());
            Config::load(&path).with_context(|| format!("reading config {}", path.display()))
        }
        None => {
            warn!("No config.toml found; using defaults");
            Ok(Config::default())
        }
    }
}

#[instrument]
fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_max_level(tracing::Level::DEBUG)
        .init();

    info!("Starting FanSight pipeline");
    let config = load_config()?;
    debug!(?config, "Config loaded successfully");

    let mut pipeline = FanSightPipeline::new(config);

    let dataset = pipeline.run_etl().context("building modeling dataset")?;
    debug!(shape = ?dataset.shape(), "Modeling dataset ready");

    let metrics = pipeline.run_modeling().context("training attendance model")?;
    info!(
        mae = metrics.mae,
        r2 = metrics.r2,
        test_rows = metrics.test_rows,
        "Attendance forecaster trained"
    );
    if let Some(transform) = pipeline.model().and_then(|model| model.transform()) {
        debug!(
            width = transform.width(),
            columns = ?transform.output_names(),
            "Model feature layout"
        );
    }

    let segments = pipeline.run_segmentation(None).context("segmenting fans")?;
    info!(
        k = segments.k,
        silhouette = segments.silhouette,
        "Segments assigned"
    );

    match pipeline.run_default_ab_test().context("evaluating A/B test")? {
        Some(result) => {
            info!(?result, "A/B result");
            if let Some(dataset) = pipeline.dataset() {
                let config = pipeline.config();
                let summary =
                    summarize_by_variant(dataset, &config.ab_test.metric, &config.features.variant)?;
                info!("Variant summary:\n{summary}");
            }
        }
        None => info!("A/B test skipped"),
    }

    info!("Pipeline complete");
    Ok(())
}
