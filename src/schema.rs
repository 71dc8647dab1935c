use std::collections::BTreeSet;

/// Required and optional column names for one input table.
#[derive(Debug, Clone, Copy)]
pub struct TableSchema {
    pub name: &'static str,
    pub required: &'static [&'static str],
    pub optional: &'static [&'static str],
}

/// Outcome of comparing a table's columns against its schema.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SchemaDiff {
    pub missing: Vec<String>,
    pub extra: Vec<String>,
}

impl SchemaDiff {
    pub fn is_valid(&self) -> bool {
        self.missing.is_empty()
    }
}

impl TableSchema {
    /// Returns the sorted missing-required and unrecognized columns.
    pub fn validate<S: AsRef<str>>(&self, columns: &[S]) -> SchemaDiff {
        let present: BTreeSet<&str> = columns.iter().map(AsRef::as_ref).collect();
        let known: BTreeSet<&str> = self
            .required
            .iter()
            .chain(self.optional.iter())
            .copied()
            .collect();

        let missing = self
            .required
            .iter()
            .filter(|c| !present.contains(*c))
            .copied()
            .collect::<BTreeSet<_>>()
            .into_iter()
            .map(String::from)
            .collect();
        let extra = present
            .iter()
            .filter(|c| !known.contains(*c))
            .map(|c| c.to_string())
            .collect();

        SchemaDiff { missing, extra }
    }
}

pub const GAME_SCHEMA: TableSchema = TableSchema {
    name: "games",
    required: &[
        "game_id",
        "game_date",
        "home_team",
        "visitor_team",
        "attendance",
        "capacity",
        "ticket_price",
        "win_pct_home",
        "win_pct_visitor",
    ],
    optional: &[
        "promotion_flag",
        "campaign_id",
        "campaign_channel",
        "day_of_week",
        "month",
        "is_rivalry",
        "attendance_lag_1",
        "attendance_lag_3",
        "season_id",
        "team_id",
        "team_abbreviation",
        "team_name",
        "wl",
        "min",
        "fgm",
        "fga",
        "fg_pct",
        "fg3m",
        "fg3a",
        "fg3_pct",
        "ftm",
        "fta",
        "ft_pct",
        "oreb",
        "dreb",
        "reb",
        "ast",
        "stl",
        "blk",
        "tov",
        "pf",
        "pts",
        "plus_minus",
        "video_available",
        "season",
        "arena",
        "notes",
        "source_file",
    ],
};

pub const FAN_SCHEMA: TableSchema = TableSchema {
    name: "fans",
    required: &[
        "fan_id",
        "segment",
        "tenure_days",
        "loyalty_score",
        "avg_spend",
        "lifetime_value",
        "price_sensitivity",
        "engagement_score",
    ],
    optional: &["home_team", "favorite_player", "city", "email_opt_in"],
};

pub const CAMPAIGN_SCHEMA: TableSchema = TableSchema {
    name: "campaign_touches",
    required: &[
        "campaign_id",
        "fan_id",
        "touch_date",
        "campaign_channel",
        "campaign_spend",
        "conversion",
    ],
    optional: &["game_id", "promotion_flag", "creative", "variant"],
};
