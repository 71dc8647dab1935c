pub mod forecaster;
pub mod gbdt;
pub mod traits;

pub use self::forecaster::AttendanceForecaster;
pub use self::gbdt::GBDTModel;
pub use self::traits::{ModelFactory, Regressor};
