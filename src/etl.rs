//! Assembly of the fan × game modeling table.

use polars::prelude::*;
use std::collections::{HashMap, HashSet};
use std::path::PathBuf;
use tracing::{debug, info, warn};

use crate::config::Config;
use crate::data_loader::{
    column_names, has_column, processed_path, save_table, string_values, DataLoader,
    SourceOverrides,
};
use crate::error::{FanSightError, Result};

const GROUP_KEY: &str = "__touch_group";
const GAME_MATCHED: &str = "__game_matched";

/// Counts values in first-seen order so ties resolve to the earliest one.
#[derive(Debug, Default)]
struct ModeTally {
    counts: Vec<(String, usize)>,
}

impl ModeTally {
    fn observe(&mut self, value: Option<&str>) {
        let Some(value) = value else { return };
        match self.counts.iter_mut().find(|(seen, _)| seen == value) {
            Some((_, count)) => *count += 1,
            None => self.counts.push((value.to_string(), 1)),
        }
    }

    fn most_frequent(&self, default: &str) -> String {
        let mut best: Option<&(String, usize)> = None;
        for entry in &self.counts {
            if best.map_or(true, |(_, count)| entry.1 > *count) {
                best = Some(entry);
            }
        }
        best.map_or_else(|| default.to_string(), |(value, _)| value.clone())
    }
}

fn touch_defaults(campaigns: &DataFrame) -> Vec<Expr> {
    let defaults = [
        ("game_id", lit(NULL).cast(DataType::Int64)),
        ("campaign_spend", lit(0.0)),
        ("conversion", lit(0i64)),
        ("campaign_channel", lit("unknown")),
        ("promotion_flag", lit(0i64)),
        ("variant", lit("control")),
    ];
    defaults
        .into_iter()
        .filter(|(name, _)| !has_column(campaigns, name))
        .map(|(name, value)| value.alias(name))
        .collect()
}

/// Collapses campaign touches to one row per (fan id, game id).
///
/// Counts, spend and conversions are summed, the promotion flag takes the
/// maximum, and channel and variant take their most frequent value with
/// ties going to the value seen first. Touches without a game id form
/// their own group per fan.
pub fn aggregate_campaign_touches(campaigns: &DataFrame) -> Result<DataFrame> {
    let defaults = touch_defaults(campaigns);
    let mut touches = if defaults.is_empty() {
        campaigns.clone()
    } else {
        campaigns.clone().lazy().with_columns(defaults).collect()?
    };

    let fans = string_values(&touches, "fan_id")?;
    let games = string_values(&touches, "game_id")?;
    let channels = string_values(&touches, "campaign_channel")?;
    let variants = string_values(&touches, "variant")?;

    let mut index: HashMap<(Option<String>, Option<String>), u32> = HashMap::new();
    let mut tallies: Vec<(ModeTally, ModeTally)> = Vec::new();
    let mut groups = Vec::with_capacity(touches.height());
    for (row, key) in fans.into_iter().zip(games).enumerate() {
        let next = tallies.len() as u32;
        let group = *index.entry(key).or_insert_with(|| {
            tallies.push(Default::default());
            next
        });
        let (channel, variant) = &mut tallies[group as usize];
        channel.observe(channels[row].as_deref());
        variant.observe(variants[row].as_deref());
        groups.push(group);
    }
    touches.with_column(Series::new(GROUP_KEY.into(), groups))?;

    let mut aggregated = touches
        .lazy()
        .group_by([col(GROUP_KEY)])
        .agg([
            col("fan_id").first(),
            col("game_id").first(),
            len().cast(DataType::Int64).alias("touch_count_total"),
            col("campaign_spend")
                .cast(DataType::Float64)
                .sum()
                .alias("campaign_spend"),
            col("conversion")
                .cast(DataType::Int64)
                .sum()
                .alias("conversions"),
            col("promotion_flag")
                .cast(DataType::Int64)
                .max()
                .fill_null(lit(0i64))
                .alias("promotion_flag"),
        ])
        .sort([GROUP_KEY], SortMultipleOptions::default())
        .collect()?;

    let (channel_modes, variant_modes): (Vec<String>, Vec<String>) = tallies
        .iter()
        .map(|(channel, variant)| {
            (
                channel.most_frequent("unknown"),
                variant.most_frequent("control"),
            )
        })
        .unzip();
    aggregated.with_column(Series::new("campaign_channel".into(), channel_modes))?;
    aggregated.with_column(Series::new("variant".into(), variant_modes))?;

    let aggregated = aggregated.drop(GROUP_KEY)?;
    debug!(
        touches = campaigns.height(),
        pairs = aggregated.height(),
        "Aggregated campaign touches"
    );
    Ok(aggregated)
}

/// Maps suffixed collision columns back to their canonical names.
/// `None` drops the column.
fn canonical_name(name: &str) -> Option<String> {
    match name {
        "campaign_channel_fan" => Some("campaign_channel".into()),
        "promotion_flag_fan" => Some("promotion_flag".into()),
        "home_team_game" => Some("home_team".into()),
        "home_team_fan" => Some("home_team_preference".into()),
        "campaign_channel_game" | "promotion_flag_game" => None,
        other => Some(other.to_string()),
    }
}

fn join_games(touched_fans: DataFrame, games: &DataFrame) -> Result<DataFrame> {
    let left_names = column_names(&touched_fans);
    let right_names = column_names(games);
    let left_set: HashSet<&str> = left_names.iter().map(String::as_str).collect();
    let collisions: HashSet<&str> = right_names
        .iter()
        .map(String::as_str)
        .filter(|name| *name != "game_id" && left_set.contains(name))
        .collect();

    let game_key_type = games.column("game_id")?.dtype().clone();
    let left = left_names.iter().map(|name| {
        let expr = col(name.as_str());
        if name == "game_id" {
            expr.cast(game_key_type.clone())
        } else if collisions.contains(name.as_str()) {
            expr.alias(format!("{name}_fan"))
        } else {
            expr
        }
    });
    let right = right_names
        .iter()
        .map(|name| {
            let expr = col(name.as_str());
            if collisions.contains(name.as_str()) {
                expr.alias(format!("{name}_game"))
            } else {
                expr
            }
        })
        .chain([lit(true).alias(GAME_MATCHED)]);

    let joined = touched_fans
        .lazy()
        .select(left.collect::<Vec<_>>())
        .join(
            games.clone().lazy().select(right.collect::<Vec<_>>()),
            [col("game_id")],
            [col("game_id")],
            JoinArgs::new(JoinType::Left),
        )
        .collect()?;

    let renames: Vec<Expr> = column_names(&joined)
        .iter()
        .filter_map(|name| canonical_name(name).map(|target| col(name.as_str()).alias(target)))
        .collect();
    Ok(joined.lazy().select(renames).collect()?)
}

fn drop_unknown_games(merged: DataFrame) -> Result<DataFrame> {
    let unmatched = merged.column(GAME_MATCHED)?.null_count();
    if unmatched > 0 {
        warn!(
            rows = unmatched,
            "Campaign touches reference unknown game_ids; dropping them"
        );
    }
    Ok(merged
        .lazy()
        .filter(col(GAME_MATCHED).is_not_null())
        .select([col("*").exclude([GAME_MATCHED])])
        .collect()?)
}

fn rolling_touches(window: usize) -> Expr {
    col("touch_count_total")
        .cast(DataType::Float64)
        .rolling_sum(RollingOptionsFixedWindow {
            window_size: window,
            min_periods: 1,
            ..Default::default()
        })
        .over([col("fan_id")])
}

/// Builds the modeling table: one row per touched (fan, game) pair with
/// fan and game attributes, rolling engagement windows and the target.
///
/// Rows are sorted by fan id then game date. Rows whose game id has no
/// matching game, and rows with a null target, are dropped.
pub fn build_fan_game_dataset(
    games: &DataFrame,
    fans: &DataFrame,
    campaigns: &DataFrame,
    config: &Config,
) -> Result<DataFrame> {
    let aggregated = aggregate_campaign_touches(campaigns)?;

    let touched_fans = aggregated
        .lazy()
        .join(
            fans.clone().lazy(),
            [col("fan_id")],
            [col("fan_id")],
            JoinArgs::new(JoinType::Left),
        )
        .collect()?;
    let merged = drop_unknown_games(join_games(touched_fans, games)?)?;

    let etl = &config.etl;
    let mut derived = vec![
        rolling_touches(etl.short_window).alias(etl.short_window_column.as_str()),
        rolling_touches(etl.medium_window).alias(etl.medium_window_column.as_str()),
    ];
    if has_column(&merged, "loyalty_score") && has_column(&merged, "engagement_score") {
        derived.push((col("loyalty_score") * col("engagement_score")).alias("loyalty_engagement"));
    }

    let enriched = merged
        .lazy()
        .sort_by_exprs(
            [col("fan_id"), col("game_date")],
            SortMultipleOptions::default().with_maintain_order(true),
        )
        .with_columns(derived)
        .collect()?;

    let features = &config.features;
    if !has_column(&enriched, &features.target) {
        return Err(FanSightError::Schema {
            table: "modeling dataset".into(),
            missing: vec![features.target.clone()],
        });
    }

    let mut selected: Vec<&str> = Vec::new();
    for name in features
        .feature_columns()
        .chain([features.target.as_str(), features.variant.as_str()])
    {
        if has_column(&enriched, name) && !selected.contains(&name) {
            selected.push(name);
        }
    }

    let dataset = enriched
        .lazy()
        .select(selected.iter().map(|name| col(*name)).collect::<Vec<_>>())
        .filter(col(features.target.as_str()).is_not_null())
        .collect()?;
    info!(rows = dataset.height(), columns = dataset.width(), "Built modeling dataset");
    Ok(dataset)
}

/// Loads the raw tables, builds the modeling dataset and writes it to the
/// processed path for `name`.
pub fn build_and_save_dataset(
    name: &str,
    config: &Config,
    overrides: &SourceOverrides,
) -> Result<(DataFrame, PathBuf)> {
    config.ensure_directories()?;
    let sources = DataLoader::new(config).load_all(overrides)?;
    let mut dataset =
        build_fan_game_dataset(&sources.games, &sources.fans, &sources.campaigns, config)?;
    let path = processed_path(name, config);
    save_table(&mut dataset, &path)?;
    Ok((dataset, path))
}
