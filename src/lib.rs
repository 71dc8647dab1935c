pub mod ab_testing;
pub mod config;
pub mod data_loader;
pub mod error;
pub mod etl;
pub mod feature_engineering;
pub mod metrics;
pub mod models;
pub mod pipeline;
pub mod schema;
pub mod segmentation;

pub use ab_testing::AbResult;
pub use config::Config;
pub use data_loader::{DataLoader, SourceOverrides};
pub use error::{FanSightError, Result};
pub use models::{AttendanceForecaster, GBDTModel};
pub use pipeline::FanSightPipeline;
pub use segmentation::SegmentAssignment;
