use std::path::Path;

use error_stack::{Report, ResultExt};
use serde::Deserialize;

use crate::error::ConfigError;
use crate::model::TimeFrame;

fn default_log_level() -> String {
    "info".into()
}

fn default_log_format() -> String {
    "text".into()
}

fn default_data_dir() -> String {
    "./data".into()
}

fn default_top_volume_limit() -> usize {
    100
}

fn default_market_refresh_hours() -> u64 {
    1
}

fn default_scan_interval_seconds() -> u64 {
    300
}

fn default_warmup_seconds() -> u64 {
    90
}

fn default_max_parallel_tasks() -> usize {
    15
}

fn default_max_tracked_signals() -> usize {
    3
}

fn default_active_strategy() -> String {
    "ema_volume".into()
}

fn default_kline_timeframes() -> Vec<String> {
    vec!["1m".into(), "5m".into()]
}

fn default_reconnect_delay_seconds() -> u64 {
    5
}

fn default_preload_limit() -> usize {
    250
}

fn default_max_concurrent_requests() -> usize {
    20
}

fn default_ema_fast() -> usize {
    9
}

fn default_ema_slow() -> usize {
    21
}

fn default_volume_spike_min() -> f64 {
    2.5
}

fn default_volume_spike_max() -> f64 {
    6.0
}

fn default_breakout_range_period() -> usize {
    5
}

fn default_rr_ratio() -> f64 {
    1.4
}

fn default_max_stop_percent() -> f64 {
    0.025
}

fn default_stop_offset() -> f64 {
    0.0005
}

fn default_time_stop_hours() -> u64 {
    4
}

fn default_trade_control_seconds() -> u64 {
    10
}

#[derive(Debug, Default, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub general: GeneralConfig,
    #[serde(default)]
    pub telegram: TelegramConfig,
    #[serde(default)]
    pub market: MarketConfig,
    #[serde(default)]
    pub scan: ScanConfig,
    #[serde(default)]
    pub stream: StreamConfig,
    #[serde(default)]
    pub history: HistoryConfig,
    #[serde(default)]
    pub strategy: StrategyConfig,
    #[serde(default)]
    pub risk: RiskConfig,
}

#[derive(Debug, Deserialize)]
pub struct GeneralConfig {
    #[serde(default = "default_log_level")]
    pub log_level: String,
    #[serde(default = "default_log_format")]
    pub log_format: String,
    #[serde(default = "default_data_dir")]
    pub data_dir: String,
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            log_format: default_log_format(),
            data_dir: default_data_dir(),
        }
    }
}

#[derive(Debug, Default, Deserialize)]
pub struct TelegramConfig {
    #[serde(default)]
    pub bot_token: String,
    #[serde(default)]
    pub chat_id: String,
}

#[derive(Debug, Deserialize)]
pub struct MarketConfig {
    #[serde(default = "default_top_volume_limit")]
    pub top_volume_limit: usize,
    #[serde(default = "default_market_refresh_hours")]
    pub market_refresh_hours: u64,
}

impl Default for MarketConfig {
    fn default() -> Self {
        Self {
            top_volume_limit: default_top_volume_limit(),
            market_refresh_hours: default_market_refresh_hours(),
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct ScanConfig {
    #[serde(default = "default_scan_interval_seconds")]
    pub scan_interval_seconds: u64,
    #[serde(default = "default_warmup_seconds")]
    pub warmup_seconds: u64,
    #[serde(default = "default_max_parallel_tasks")]
    pub max_parallel_tasks: usize,
    #[serde(default = "default_max_tracked_signals")]
    pub max_tracked_signals: usize,
    #[serde(default = "default_active_strategy")]
    pub active_strategy: String,
}

impl Default for ScanConfig {
    fn default() -> Self {
        Self {
            scan_interval_seconds: default_scan_interval_seconds(),
            warmup_seconds: default_warmup_seconds(),
            max_parallel_tasks: default_max_parallel_tasks(),
            max_tracked_signals: default_max_tracked_signals(),
            active_strategy: default_active_strategy(),
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct StreamConfig {
    #[serde(default = "default_kline_timeframes")]
    pub kline_timeframes: Vec<String>,
    #[serde(default = "default_reconnect_delay_seconds")]
    pub reconnect_delay_seconds: u64,
}

impl StreamConfig {
    /// Timeframes as typed values. Unknown strings are rejected by
    /// `validate`, so this is lossless after a successful load.
    pub fn parsed_timeframes(&self) -> Vec<TimeFrame> {
        self.kline_timeframes
            .iter()
            .filter_map(|s| TimeFrame::from_str(s))
            .collect()
    }
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            kline_timeframes: default_kline_timeframes(),
            reconnect_delay_seconds: default_reconnect_delay_seconds(),
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct HistoryConfig {
    #[serde(default = "default_preload_limit")]
    pub preload_limit: usize,
    #[serde(default = "default_max_concurrent_requests")]
    pub max_concurrent_requests: usize,
}

impl Default for HistoryConfig {
    fn default() -> Self {
        Self {
            preload_limit: default_preload_limit(),
            max_concurrent_requests: default_max_concurrent_requests(),
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct StrategyConfig {
    #[serde(default = "default_ema_fast")]
    pub ema_fast: usize,
    #[serde(default = "default_ema_slow")]
    pub ema_slow: usize,
    #[serde(default = "default_volume_spike_min")]
    pub volume_spike_min: f64,
    #[serde(default = "default_volume_spike_max")]
    pub volume_spike_max: f64,
    #[serde(default = "default_breakout_range_period")]
    pub breakout_range_period: usize,
}

impl Default for StrategyConfig {
    fn default() -> Self {
        Self {
            ema_fast: default_ema_fast(),
            ema_slow: default_ema_slow(),
            volume_spike_min: default_volume_spike_min(),
            volume_spike_max: default_volume_spike_max(),
            breakout_range_period: default_breakout_range_period(),
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct RiskConfig {
    #[serde(default = "default_rr_ratio")]
    pub rr_ratio: f64,
    #[serde(default = "default_max_stop_percent")]
    pub max_stop_percent: f64,
    #[serde(default = "default_stop_offset")]
    pub stop_offset: f64,
    #[serde(default = "default_time_stop_hours")]
    pub time_stop_hours: u64,
    #[serde(default = "default_trade_control_seconds")]
    pub trade_control_seconds: u64,
}

impl Default for RiskConfig {
    fn default() -> Self {
        Self {
            rr_ratio: default_rr_ratio(),
            max_stop_percent: default_max_stop_percent(),
            stop_offset: default_stop_offset(),
            time_stop_hours: default_time_stop_hours(),
            trade_control_seconds: default_trade_control_seconds(),
        }
    }
}

pub fn load(path: &Path) -> Result<AppConfig, Report<ConfigError>> {
    let content = std::fs::read_to_string(path)
        .change_context(ConfigError::ReadFile)
        .attach_with(|| format!("path: {}", path.display()))?;

    let config: AppConfig = toml::from_str(&content).change_context(ConfigError::Parse {
        reason: "invalid TOML syntax or schema mismatch".into(),
    })?;

    validate(&config)?;
    Ok(config)
}

fn validate(config: &AppConfig) -> Result<(), Report<ConfigError>> {
    validate_timeframes(config)?;
    validate_strategy(config)?;
    validate_risk(config)?;
    validate_intervals(config)?;
    Ok(())
}

fn validate_timeframes(config: &AppConfig) -> Result<(), Report<ConfigError>> {
    if config.stream.kline_timeframes.is_empty() {
        return Err(Report::new(ConfigError::Validation {
            field: "stream.kline_timeframes must not be empty".into(),
        }));
    }
    for tf in &config.stream.kline_timeframes {
        if TimeFrame::from_str(tf).is_none() {
            return Err(Report::new(ConfigError::Validation {
                field: format!("stream.kline_timeframes: unknown timeframe \"{tf}\""),
            }));
        }
    }
    Ok(())
}

fn validate_strategy(config: &AppConfig) -> Result<(), Report<ConfigError>> {
    if !crate::strategy::KNOWN_IDS.contains(&config.scan.active_strategy.as_str()) {
        return Err(Report::new(ConfigError::Validation {
            field: format!(
                "scan.active_strategy \"{}\" is not one of {:?}",
                config.scan.active_strategy,
                crate::strategy::KNOWN_IDS
            ),
        }));
    }

    let strategy = &config.strategy;
    if strategy.ema_fast == 0 || strategy.ema_slow == 0 {
        return Err(Report::new(ConfigError::Validation {
            field: "strategy.ema_fast and strategy.ema_slow must be > 0".into(),
        }));
    }
    if strategy.ema_fast >= strategy.ema_slow {
        return Err(Report::new(ConfigError::Validation {
            field: "strategy.ema_fast must be < strategy.ema_slow".into(),
        }));
    }
    if strategy.volume_spike_min <= 0.0 || strategy.volume_spike_min > strategy.volume_spike_max {
        return Err(Report::new(ConfigError::Validation {
            field: "strategy.volume_spike_min must be > 0 and <= volume_spike_max".into(),
        }));
    }
    if strategy.breakout_range_period == 0 {
        return Err(Report::new(ConfigError::Validation {
            field: "strategy.breakout_range_period must be > 0".into(),
        }));
    }
    Ok(())
}

fn validate_risk(config: &AppConfig) -> Result<(), Report<ConfigError>> {
    let risk = &config.risk;
    if risk.rr_ratio <= 0.0 {
        return Err(Report::new(ConfigError::Validation {
            field: "risk.rr_ratio must be > 0".into(),
        }));
    }
    if risk.max_stop_percent <= 0.0 || risk.max_stop_percent >= 1.0 {
        return Err(Report::new(ConfigError::Validation {
            field: "risk.max_stop_percent must be in (0, 1)".into(),
        }));
    }
    if risk.stop_offset < 0.0 {
        return Err(Report::new(ConfigError::Validation {
            field: "risk.stop_offset must be >= 0".into(),
        }));
    }
    Ok(())
}

fn validate_intervals(config: &AppConfig) -> Result<(), Report<ConfigError>> {
    let nonzero: [(&str, u64); 6] = [
        ("market.top_volume_limit", config.market.top_volume_limit as u64),
        ("market.market_refresh_hours", config.market.market_refresh_hours),
        ("scan.scan_interval_seconds", config.scan.scan_interval_seconds),
        ("scan.max_parallel_tasks", config.scan.max_parallel_tasks as u64),
        ("risk.trade_control_seconds", config.risk.trade_control_seconds),
        ("risk.time_stop_hours", config.risk.time_stop_hours),
    ];
    for (field, value) in nonzero {
        if value == 0 {
            return Err(Report::new(ConfigError::Validation {
                field: format!("{field} must be > 0"),
            }));
        }
    }
    if config.history.preload_limit == 0 || config.history.max_concurrent_requests == 0 {
        return Err(Report::new(ConfigError::Validation {
            field: "history.preload_limit and history.max_concurrent_requests must be > 0".into(),
        }));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(toml: &str) -> AppConfig {
        toml::from_str(toml).expect("parse failed")
    }

    #[test]
    fn defaults_applied_when_fields_omitted() {
        let config = parse("");
        assert_eq!(config.general.log_level, "info");
        assert_eq!(config.general.log_format, "text");
        assert_eq!(config.general.data_dir, "./data");
        assert!(config.telegram.bot_token.is_empty());
        assert_eq!(config.market.top_volume_limit, 100);
        assert_eq!(config.market.market_refresh_hours, 1);
        assert_eq!(config.scan.scan_interval_seconds, 300);
        assert_eq!(config.scan.warmup_seconds, 90);
        assert_eq!(config.scan.max_parallel_tasks, 15);
        assert_eq!(config.scan.max_tracked_signals, 3);
        assert_eq!(config.scan.active_strategy, "ema_volume");
        assert_eq!(config.stream.kline_timeframes, vec!["1m", "5m"]);
        assert_eq!(config.stream.reconnect_delay_seconds, 5);
        assert_eq!(config.history.preload_limit, 250);
        assert_eq!(config.history.max_concurrent_requests, 20);
        assert_eq!(config.strategy.ema_fast, 9);
        assert_eq!(config.strategy.ema_slow, 21);
        assert_eq!(config.strategy.volume_spike_min, 2.5);
        assert_eq!(config.strategy.volume_spike_max, 6.0);
        assert_eq!(config.strategy.breakout_range_period, 5);
        assert_eq!(config.risk.rr_ratio, 1.4);
        assert_eq!(config.risk.max_stop_percent, 0.025);
        assert_eq!(config.risk.stop_offset, 0.0005);
        assert_eq!(config.risk.time_stop_hours, 4);
        assert_eq!(config.risk.trade_control_seconds, 10);
        assert!(validate(&config).is_ok());
    }

    #[test]
    fn parsed_timeframes_map_to_typed_values() {
        let config = parse("");
        assert_eq!(
            config.stream.parsed_timeframes(),
            vec![TimeFrame::Min1, TimeFrame::Min5]
        );
    }

    #[test]
    fn invalid_timeframe_string_rejected() {
        let config = parse(
            r#"
[stream]
kline_timeframes = ["1m", "2m"]
"#,
        );
        assert!(validate(&config).is_err());
    }

    #[test]
    fn unknown_strategy_rejected() {
        let config = parse(
            r#"
[scan]
active_strategy = "martingale"
"#,
        );
        assert!(validate(&config).is_err());
    }

    #[test]
    fn ema_fast_must_be_below_ema_slow() {
        let config = parse(
            r#"
[strategy]
ema_fast = 21
ema_slow = 9
"#,
        );
        assert!(validate(&config).is_err());
    }

    #[test]
    fn inverted_spike_band_rejected() {
        let config = parse(
            r#"
[strategy]
volume_spike_min = 7.0
volume_spike_max = 6.0
"#,
        );
        assert!(validate(&config).is_err());
    }

    #[test]
    fn zero_scan_interval_rejected() {
        let config = parse(
            r#"
[scan]
scan_interval_seconds = 0
"#,
        );
        assert!(validate(&config).is_err());
    }

    #[test]
    fn max_stop_percent_must_be_fractional() {
        let config = parse(
            r#"
[risk]
max_stop_percent = 2.5
"#,
        );
        assert!(validate(&config).is_err());
    }
}
