use std::path::PathBuf;

use polars::error::PolarsError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum FanSightError {
    #[error("{table} missing columns: {}", .missing.join(", "))]
    Schema { table: String, missing: Vec<String> },

    #[error("expected dataset at {}", .path.display())]
    NotFound { path: PathBuf },

    #[error("invalid state: {0}")]
    State(String),

    #[error("cannot fit: target column `{target}` is missing")]
    NotFitted { target: String },

    #[error("no `{variant}` samples for A/B evaluation")]
    EmptyGroup { variant: String },

    #[error("insufficient data: need at least {required} records, found {found}")]
    InsufficientData { required: usize, found: usize },

    #[error("no overlapping features among: {}", .0.join(", "))]
    NoFeatures(Vec<String>),

    #[error("invalid parameter: {0}")]
    InvalidParameter(String),

    #[error("unsupported table format: {0}")]
    UnsupportedFormat(String),

    #[error("model error: {0}")]
    Model(String),

    #[error(transparent)]
    Polars(#[from] PolarsError),

    #[error(transparent)]
    Shape(#[from] ndarray::ShapeError),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Serialization(#[from] serde_json::Error),

    #[error(transparent)]
    Config(#[from] toml::de::Error),

    #[error(transparent)]
    Distribution(#[from] statrs::StatsError),
}

impl FanSightError {
    pub(crate) fn state(msg: impl Into<String>) -> Self {
        Self::State(msg.into())
    }
}

pub type Result<T> = std::result::Result<T, FanSightError>;
