use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

use crate::error::Result;

/// Pipeline configuration. Every entry point receives it explicitly.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub paths: DataPaths,
    pub features: FeatureConfig,
    pub etl: EtlConfig,
    pub model: ModelConfig,
    pub ab_test: AbTestConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DataPaths {
    pub input_dir: PathBuf,
    pub processed_dir: PathBuf,
    pub artifacts_dir: PathBuf,
    pub games_file: String,
    pub fans_file: String,
    pub campaigns_file: String,
}

impl Default for DataPaths {
    fn default() -> Self {
        Self {
            input_dir: PathBuf::from("data/raw"),
            processed_dir: PathBuf::from("data/processed"),
            artifacts_dir: PathBuf::from("fansight_artifacts"),
            games_file: "games.csv".into(),
            fans_file: "fans.csv".into(),
            campaigns_file: "campaign_touches.csv".into(),
        }
    }
}

impl DataPaths {
    pub fn games(&self) -> PathBuf {
        self.input_dir.join(&self.games_file)
    }

    pub fn fans(&self) -> PathBuf {
        self.input_dir.join(&self.fans_file)
    }

    pub fn campaigns(&self) -> PathBuf {
        self.input_dir.join(&self.campaigns_file)
    }

    pub fn model_artifact(&self) -> PathBuf {
        self.artifacts_dir.join("attendance_model.json")
    }
}

/// Column views shared by the ETL projection and the model.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FeatureConfig {
    pub categorical: Vec<String>,
    pub numerical: Vec<String>,
    pub target: String,
    pub variant: String,
}

impl Default for FeatureConfig {
    fn default() -> Self {
        let strings = |names: &[&str]| names.iter().map(|s| s.to_string()).collect();
        Self {
            categorical: strings(&[
                "home_team",
                "visitor_team",
                "segment",
                "campaign_channel",
                "promotion_flag",
                "day_of_week",
                "month",
                "is_rivalry",
            ]),
            numerical: strings(&[
                "game_id",
                "fan_id",
                "ticket_price",
                "engagement_score",
                "loyalty_score",
                "tenure_days",
                "avg_spend",
                "lifetime_value",
                "price_sensitivity",
                "campaign_spend",
                "touch_count_7d",
                "touch_count_30d",
                "win_pct_home",
                "win_pct_visitor",
                "attendance_lag_1",
                "attendance_lag_3",
                "capacity",
                "loyalty_engagement",
                "loyalty_value_ratio",
                "price_alignment",
            ]),
            target: "attendance".into(),
            variant: "variant".into(),
        }
    }
}

impl FeatureConfig {
    /// Categorical then numeric feature names, in transform order.
    pub fn feature_columns(&self) -> impl Iterator<Item = &str> {
        self.categorical
            .iter()
            .chain(self.numerical.iter())
            .map(String::as_str)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EtlConfig {
    pub short_window: usize,
    pub medium_window: usize,
    pub short_window_column: String,
    pub medium_window_column: String,
}

impl Default for EtlConfig {
    fn default() -> Self {
        Self {
            short_window: 3,
            medium_window: 5,
            short_window_column: "touch_count_7d".into(),
            medium_window_column: "touch_count_30d".into(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ModelConfig {
    pub test_size: f64,
    pub random_state: u64,
    pub n_estimators: usize,
    pub max_depth: u32,
    pub learning_rate: f64,
    pub min_leaf_size: usize,
    pub segment_k: usize,
    pub segment_seed: u64,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            test_size: 0.2,
            random_state: 42,
            n_estimators: 400,
            max_depth: 8,
            learning_rate: 0.1,
            min_leaf_size: 1,
            segment_k: 6,
            segment_seed: 18,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AbTestConfig {
    pub alpha: f64,
    pub metric: String,
}

impl Default for AbTestConfig {
    fn default() -> Self {
        Self {
            alpha: 0.05,
            metric: "attendance".into(),
        }
    }
}

impl Config {
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let contents = fs::read_to_string(path)?;
        let config: Config = toml::from_str(&contents)?;
        Ok(config)
    }

    /// Creates the output folders used by the ETL and modeling steps.
    pub fn ensure_directories(&self) -> Result<()> {
        for dir in [&self.paths.processed_dir, &self.paths.artifacts_dir] {
            fs::create_dir_all(dir)?;
        }
        Ok(())
    }
}
