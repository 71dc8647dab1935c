use polars::prelude::*;
use std::fs::{self, File};
use std::path::{Path, PathBuf};
use tracing::{debug, info};

use crate::config::{Config, DataPaths};
use crate::error::{FanSightError, Result};
use crate::schema::{TableSchema, CAMPAIGN_SCHEMA, FAN_SCHEMA, GAME_SCHEMA};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TableFormat {
    Csv,
    Parquet,
}

impl TableFormat {
    fn from_path(path: &Path) -> Result<Self> {
        let extension = path
            .extension()
            .and_then(|e| e.to_str())
            .unwrap_or("")
            .to_lowercase();
        match extension.as_str() {
            "csv" => Ok(Self::Csv),
            "parquet" => Ok(Self::Parquet),
            other => Err(FanSightError::UnsupportedFormat(format!(
                "{} (extension `{other}`)",
                path.display()
            ))),
        }
    }
}

/// Reads a CSV or Parquet table, parses `date_columns` as dates and
/// validates the result against `schema`.
///
/// Missing required columns fail with [`FanSightError::Schema`]; extra
/// columns are only reported in the log.
pub fn load_table<P: AsRef<Path>>(
    path: P,
    schema: &TableSchema,
    date_columns: &[&str],
) -> Result<DataFrame> {
    let path = path.as_ref();
    if !path.exists() {
        return Err(FanSightError::NotFound {
            path: path.to_path_buf(),
        });
    }

    let df = match TableFormat::from_path(path)? {
        TableFormat::Csv => CsvReadOptions::default()
            .with_has_header(true)
            .try_into_reader_with_file_path(Some(path.to_path_buf()))?
            .finish()?,
        TableFormat::Parquet => ParquetReader::new(File::open(path)?).finish()?,
    };
    debug!(table = schema.name, shape = ?df.shape(), "Table read");

    let diff = schema.validate(&column_names(&df));
    if !diff.is_valid() {
        return Err(FanSightError::Schema {
            table: schema.name.to_string(),
            missing: diff.missing,
        });
    }
    if !diff.extra.is_empty() {
        info!(table = schema.name, extra = ?diff.extra, "Tolerating unrecognized columns");
    }

    parse_dates(df, date_columns)
}

fn parse_dates(df: DataFrame, date_columns: &[&str]) -> Result<DataFrame> {
    let mut parsers = Vec::new();
    for &name in date_columns {
        let Ok(column) = df.column(name) else {
            continue;
        };
        match column.dtype() {
            DataType::String => parsers.push(
                col(name)
                    .str()
                    .to_date(StrptimeOptions {
                        strict: false,
                        ..Default::default()
                    })
                    .alias(name),
            ),
            DataType::Date => {}
            _ => parsers.push(col(name).cast(DataType::Date).alias(name)),
        }
    }
    if parsers.is_empty() {
        return Ok(df);
    }
    Ok(df.lazy().with_columns(parsers).collect()?)
}

/// Writes `df` as CSV or Parquet depending on the extension of `path`,
/// creating parent directories as needed.
pub fn save_table<P: AsRef<Path>>(df: &mut DataFrame, path: P) -> Result<()> {
    let path = path.as_ref();
    let format = TableFormat::from_path(path)?;
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)?;
    }
    let mut file = File::create(path)?;
    match format {
        TableFormat::Csv => CsvWriter::new(&mut file).include_header(true).finish(df)?,
        TableFormat::Parquet => {
            ParquetWriter::new(&mut file).finish(df)?;
        }
    }
    debug!(path = %path.display(), shape = ?df.shape(), "Table written");
    Ok(())
}

/// Canonical location of a processed dataset called `name`.
pub fn processed_path(name: &str, config: &Config) -> PathBuf {
    config.paths.processed_dir.join(format!("{name}.csv"))
}

/// Per-table path replacements for [`DataLoader::load_all`].
#[derive(Debug, Clone, Default)]
pub struct SourceOverrides {
    pub games: Option<PathBuf>,
    pub fans: Option<PathBuf>,
    pub campaigns: Option<PathBuf>,
}

/// The three raw entity tables.
#[derive(Debug, Clone)]
pub struct SourceTables {
    pub games: DataFrame,
    pub fans: DataFrame,
    pub campaigns: DataFrame,
}

/// Loads the raw entity tables from the configured input directory.
pub struct DataLoader {
    paths: DataPaths,
}

impl DataLoader {
    pub fn new(config: &Config) -> Self {
        Self {
            paths: config.paths.clone(),
        }
    }

    pub fn load_games(&self, path: Option<&Path>) -> Result<DataFrame> {
        let path = path.map_or_else(|| self.paths.games(), Path::to_path_buf);
        load_table(path, &GAME_SCHEMA, &["game_date"])
    }

    pub fn load_fans(&self, path: Option<&Path>) -> Result<DataFrame> {
        let path = path.map_or_else(|| self.paths.fans(), Path::to_path_buf);
        load_table(path, &FAN_SCHEMA, &[])
    }

    pub fn load_campaign_touches(&self, path: Option<&Path>) -> Result<DataFrame> {
        let path = path.map_or_else(|| self.paths.campaigns(), Path::to_path_buf);
        load_table(path, &CAMPAIGN_SCHEMA, &["touch_date"])
    }

    pub fn load_all(&self, overrides: &SourceOverrides) -> Result<SourceTables> {
        Ok(SourceTables {
            games: self.load_games(overrides.games.as_deref())?,
            fans: self.load_fans(overrides.fans.as_deref())?,
            campaigns: self.load_campaign_touches(overrides.campaigns.as_deref())?,
        })
    }
}

pub(crate) fn column_names(df: &DataFrame) -> Vec<String> {
    df.get_column_names()
        .into_iter()
        .map(|name| name.to_string())
        .collect()
}

pub(crate) fn has_column(df: &DataFrame, name: &str) -> bool {
    df.column(name).is_ok()
}

/// Column values cast to `f64`; nulls and NaN become `None`.
pub(crate) fn numeric_values(df: &DataFrame, name: &str) -> Result<Vec<Option<f64>>> {
    let series = df
        .column(name)?
        .as_materialized_series()
        .cast(&DataType::Float64)?;
    Ok(series
        .f64()?
        .into_iter()
        .map(|value| value.filter(|v| !v.is_nan()))
        .collect())
}

/// Column values rendered as strings; nulls stay `None`.
pub(crate) fn string_values(df: &DataFrame, name: &str) -> Result<Vec<Option<String>>> {
    let series = df
        .column(name)?
        .as_materialized_series()
        .cast(&DataType::String)?;
    Ok(series
        .str()?
        .into_iter()
        .map(|value| value.map(str::to_string))
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::TempDir;

    fn write_file(dir: &TempDir, name: &str, contents: &str) -> PathBuf {
        let path = dir.path().join(name);
        let mut file = File::create(&path).unwrap();
        file.write_all(contents.as_bytes()).unwrap();
        path
    }

    #[test]
    fn missing_file_is_not_found() {
        let dir = TempDir::new().unwrap();
        let err = load_table(dir.path().join("absent.csv"), &FAN_SCHEMA, &[]).unwrap_err();
        assert!(matches!(err, FanSightError::NotFound { .. }));
    }

    #[test]
    fn missing_required_columns_fail_fast() {
        let dir = TempDir::new().unwrap();
        let path = write_file(
            &dir,
            "touches.csv",
            "campaign_id,fan_id,touch_date\nEML-001,100,2024-01-01\n",
        );

        let err = load_table(&path, &CAMPAIGN_SCHEMA, &["touch_date"]).unwrap_err();
        match err {
            FanSightError::Schema { table, missing } => {
                assert_eq!(table, "campaign_touches");
                assert_eq!(
                    missing,
                    vec!["campaign_channel", "campaign_spend", "conversion"]
                );
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn parses_dates_and_tolerates_extra_columns() {
        let dir = TempDir::new().unwrap();
        let path = write_file(
            &dir,
            "touches.csv",
            "campaign_id,fan_id,touch_date,campaign_channel,campaign_spend,conversion,mood\n\
             EML-001,100,2024-01-01,email,1.2,1,happy\n\
             SMS-002,101,2024-01-07,sms,0.9,0,calm\n",
        );

        let df = load_table(&path, &CAMPAIGN_SCHEMA, &["touch_date"]).unwrap();
        assert_eq!(df.height(), 2);
        assert_eq!(df.column("touch_date").unwrap().dtype(), &DataType::Date);
        assert!(has_column(&df, "mood"));
    }

    #[test]
    fn unsupported_extension_is_rejected() {
        let dir = TempDir::new().unwrap();
        let path = write_file(&dir, "fans.xlsx", "fan_id\n1\n");
        let err = load_table(&path, &FAN_SCHEMA, &[]).unwrap_err();
        assert!(matches!(err, FanSightError::UnsupportedFormat(_)));
    }

    #[test]
    fn saved_csv_reloads() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("nested").join("out.csv");
        let mut df = df!(
            "fan_id" => [100i64, 101],
            "loyalty_score" => [Some(0.9), None],
        )
        .unwrap();

        save_table(&mut df, &path).unwrap();

        let reloaded = CsvReadOptions::default()
            .with_has_header(true)
            .try_into_reader_with_file_path(Some(path))
            .unwrap()
            .finish()
            .unwrap();
        assert_eq!(reloaded.shape(), (2, 2));
        assert_eq!(
            numeric_values(&reloaded, "loyalty_score").unwrap(),
            vec![Some(0.9), None]
        );
    }

    #[test]
    fn parquet_round_trips_through_load_table() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("fans.parquet");
        let mut fans = df!(
            "fan_id" => [100i64, 101, 102],
            "segment" => ["Loyal", "Value", "New"],
            "tenure_days" => [1500i64, 600, 120],
            "loyalty_score" => [0.92, 0.65, 0.4],
            "avg_spend" => [145.0, 95.0, 60.0],
            "lifetime_value" => [5200.0, 2100.0, 500.0],
            "price_sensitivity" => [0.2, 0.55, 0.7],
            "engagement_score" => [0.88, 0.73, 0.51],
        )
        .unwrap();

        save_table(&mut fans, &path).unwrap();
        let reloaded = load_table(&path, &FAN_SCHEMA, &[]).unwrap();

        assert!(reloaded.equals(&fans));
    }

    #[test]
    fn nan_counts_as_missing() {
        let df = df!("avg_spend" => [Some(1.5), Some(f64::NAN), None]).unwrap();
        assert_eq!(
            numeric_values(&df, "avg_spend").unwrap(),
            vec![Some(1.5), None, None]
        );
    }
}
