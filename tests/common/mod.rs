#![allow(dead_code)]

use std::fs;
use std::path::Path;

use fansight::Config;
use tempfile::TempDir;

pub const GAMES_CSV: &str = "\
game_id,game_date,home_team,visitor_team,attendance,capacity,ticket_price,win_pct_home,win_pct_visitor,promotion_flag,campaign_channel,day_of_week,month,is_rivalry,attendance_lag_1,attendance_lag_3
1,2024-01-05,Metro Meteors,Coast Captains,15870,18000,68.0,0.55,0.48,1,email,Friday,January,0,15010,14980
2,2024-01-12,Metro Meteors,Capital Comets,16420,18000,72.0,0.57,0.61,0,sms,Friday,January,1,15870,15010
3,2024-01-19,Metro Meteors,Harbor Hawks,17210,18000,75.0,0.6,0.5,1,social,Friday,January,0,16420,15870
4,2024-02-02,Metro Meteors,Desert Drakes,17750,18000,80.0,0.62,0.52,1,email,Friday,February,0,17210,16420
";

pub const FANS_CSV: &str = "\
fan_id,segment,tenure_days,loyalty_score,avg_spend,lifetime_value,price_sensitivity,engagement_score,home_team
100,Loyal,1500,0.92,145.0,5200.0,0.2,0.88,Metro Meteors
101,Value,600,0.65,95.0,2100.0,0.55,0.73,Metro Meteors
102,New,120,0.4,60.0,500.0,0.7,0.51,Metro Meteors
";

pub const TOUCHES_CSV: &str = "\
campaign_id,fan_id,game_id,touch_date,campaign_channel,campaign_spend,conversion,promotion_flag,variant
EML-001,100,1,2023-12-31,email,1.2,1,1,treatment
SMS-015,101,2,2024-01-07,sms,0.9,1,0,control
SOC-020,102,3,2024-01-15,social,1.5,0,1,treatment
EML-002,100,4,2024-01-28,email,1.1,1,1,treatment
SOC-021,101,4,2024-01-30,social,1.3,0,1,control
";

/// Distinct (fan, game) pairs in [`TOUCHES_CSV`].
pub const SAMPLE_PAIRS: usize = 5;

/// Writes the sample tables under `<root>/raw` and returns a config whose
/// outputs also live under `root`.
pub fn sample_config(root: &Path) -> Config {
    let raw = root.join("raw");
    fs::create_dir_all(&raw).unwrap();
    fs::write(raw.join("games.csv"), GAMES_CSV).unwrap();
    fs::write(raw.join("fans.csv"), FANS_CSV).unwrap();
    fs::write(raw.join("campaign_touches.csv"), TOUCHES_CSV).unwrap();

    let mut config = Config::default();
    config.paths.input_dir = raw;
    config.paths.processed_dir = root.join("processed");
    config.paths.artifacts_dir = root.join("artifacts");
    config.model.n_estimators = 20;
    config.model.max_depth = 3;
    config
}

pub fn sample_workspace() -> (TempDir, Config) {
    let dir = tempfile::tempdir().unwrap();
    let config = sample_config(dir.path());
    (dir, config)
}
