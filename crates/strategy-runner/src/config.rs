//! Engine configuration.
//!
//! Loaded once at startup from an optional TOML file plus `ENGINE__*`
//! environment overrides (e.g. `ENGINE__RISK__MAX_OPEN_POSITIONS=3`).
//! Reloading means restarting the process.

use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use config::{Config, Environment, File, FileFormat};
use rust_decimal::Decimal;
use serde::Deserialize;

use execution_core::RiskLimits;
use session_calendar::{
    BlackoutPolicy, ImpactLevel, NewsEvent, SessionCalendar, SessionWindow, SessionWindowConfig,
    TradingDayConfig, TradingDayRule,
};

use crate::error::ConfigError;
use crate::risk_gate::{CorrelationMatrix, CorrelationScope, GatePolicy};
use crate::sizer::{InstrumentSpec, PositionSizer};

/// Root configuration.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub account: AccountConfig,
    pub risk: RiskLimits,
    pub trading_hours: TradingHoursConfig,
    pub news: NewsConfig,
    /// Session windows. Empty means the four major forex sessions.
    pub sessions: Vec<SessionWindowConfig>,
    pub trading_day: TradingDayConfig,
    pub instruments: Vec<InstrumentSpec>,
    pub correlations: CorrelationConfig,
    pub coordinator: CoordinatorSettings,
    /// Per-strategy overrides keyed by strategy id.
    pub strategies: HashMap<String, StrategySettings>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AccountConfig {
    pub id: String,
    pub starting_equity: Decimal,
}

impl Default for AccountConfig {
    fn default() -> Self {
        Self {
            id: "primary".to_string(),
            starting_equity: Decimal::from(10_000),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct TradingHoursConfig {
    pub enabled: bool,
    /// Sessions that permit entries. Empty means any configured session.
    pub sessions: Vec<String>,
}

impl Default for TradingHoursConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            sessions: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct NewsConfig {
    pub avoid_trading_during_news: bool,
    pub pre_news_minutes: i64,
    pub post_news_minutes: i64,
    pub enabled_impacts: Vec<ImpactLevel>,
    /// Lowest impact the gate considers.
    pub min_impact: ImpactLevel,
    pub events: Vec<NewsEvent>,
}

impl Default for NewsConfig {
    fn default() -> Self {
        let policy = BlackoutPolicy::default();
        Self {
            avoid_trading_during_news: true,
            pre_news_minutes: policy.pre_news_minutes,
            post_news_minutes: policy.post_news_minutes,
            enabled_impacts: policy.enabled_impacts.into_iter().collect(),
            min_impact: ImpactLevel::Low,
            events: Vec::new(),
        }
    }
}

impl NewsConfig {
    pub fn policy(&self) -> BlackoutPolicy {
        BlackoutPolicy::default()
            .with_minutes(self.pre_news_minutes, self.post_news_minutes)
            .with_impacts(self.enabled_impacts.iter().copied())
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct CorrelationConfig {
    pub scope: CorrelationScope,
    pub pairs: Vec<CorrelationPair>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CorrelationPair {
    pub a: String,
    pub b: String,
    pub coefficient: Decimal,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CoordinatorSettings {
    /// How often the watchdog looks for orders past their fill deadline.
    pub watchdog_interval_ms: u64,
    /// Fill timeout for strategies without their own. Falls back to the
    /// broker adapter's reported timeout when unset.
    pub default_fill_timeout_ms: Option<u64>,
    /// Capacity of each runner's inbound channel.
    pub channel_capacity: usize,
    pub client_order_prefix: String,
}

impl Default for CoordinatorSettings {
    fn default() -> Self {
        Self {
            watchdog_interval_ms: 1_000,
            default_fill_timeout_ms: None,
            channel_capacity: 1_024,
            client_order_prefix: "ENG".to_string(),
        }
    }
}

/// Per-strategy runtime settings.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct StrategySettings {
    /// Overrides the account's default risk percent.
    pub risk_percent: Option<Decimal>,
    pub fill_timeout_ms: Option<u64>,
    pub max_trades_per_day: u32,
    /// Stop entering once the day's realized P&L reaches this percent of
    /// start-of-day equity.
    pub daily_profit_target_percent: Option<Decimal>,
    /// Minutes before the session close after which no entries are made.
    pub entry_cutoff_minutes: Option<u64>,
    /// Minutes before the session close at which open positions are closed.
    pub flatten_before_close_minutes: Option<u64>,
}

impl Default for StrategySettings {
    fn default() -> Self {
        Self {
            risk_percent: None,
            fill_timeout_ms: None,
            max_trades_per_day: 5,
            daily_profit_target_percent: None,
            entry_cutoff_minutes: None,
            flatten_before_close_minutes: None,
        }
    }
}

impl EngineConfig {
    /// Load from `path` (if given) and the environment, then validate.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut builder = Config::builder();
        if let Some(path) = path {
            builder = builder.add_source(File::from(path).required(true));
        }
        let config: Self = builder
            .add_source(
                Environment::with_prefix("ENGINE")
                    .prefix_separator("__")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?
            .try_deserialize()?;

        config.validate()?;
        Ok(config)
    }

    /// Parse a TOML document without consulting the environment.
    pub fn from_toml_str(toml: &str) -> Result<Self, ConfigError> {
        let config: Self = Config::builder()
            .add_source(File::from_str(toml, FileFormat::Toml))
            .build()?
            .try_deserialize()?;

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.account.starting_equity <= Decimal::ZERO {
            return Err(ConfigError::Invalid(format!(
                "account.starting_equity must be positive, got {}",
                self.account.starting_equity
            )));
        }

        self.risk
            .validate()
            .map_err(|e| ConfigError::Invalid(format!("risk: {e}")))?;

        for pair in &self.correlations.pairs {
            if pair.coefficient < Decimal::NEGATIVE_ONE || pair.coefficient > Decimal::ONE {
                return Err(ConfigError::Invalid(format!(
                    "correlation {}/{} must be within [-1, 1], got {}",
                    pair.a, pair.b, pair.coefficient
                )));
            }
        }

        for spec in &self.instruments {
            if spec.lot_step <= Decimal::ZERO {
                return Err(ConfigError::Invalid(format!(
                    "instrument {} lot_step must be positive",
                    spec.symbol
                )));
            }
        }

        for (id, settings) in &self.strategies {
            if let Some(percent) = settings.risk_percent {
                if percent <= Decimal::ZERO || percent > Decimal::ONE_HUNDRED {
                    return Err(ConfigError::Invalid(format!(
                        "strategies.{id}.risk_percent must be in (0, 100], got {percent}"
                    )));
                }
            }
            if let Some(percent) = settings.daily_profit_target_percent {
                if percent <= Decimal::ZERO || percent > Decimal::ONE_HUNDRED {
                    return Err(ConfigError::Invalid(format!(
                        "strategies.{id}.daily_profit_target_percent must be in (0, 100], got {percent}"
                    )));
                }
            }
            let day_minutes = 24 * 60;
            for (field, minutes) in [
                ("entry_cutoff_minutes", settings.entry_cutoff_minutes),
                ("flatten_before_close_minutes", settings.flatten_before_close_minutes),
            ] {
                if minutes.is_some_and(|m| m > day_minutes) {
                    return Err(ConfigError::Invalid(format!(
                        "strategies.{id}.{field} must be at most {day_minutes}"
                    )));
                }
            }
        }

        if self.coordinator.watchdog_interval_ms == 0 || self.coordinator.channel_capacity == 0 {
            return Err(ConfigError::Invalid(
                "coordinator watchdog interval and channel capacity must be non-zero".to_string(),
            ));
        }

        let calendar = self.build_calendar()?;
        if let Some(unknown) = self
            .trading_hours
            .sessions
            .iter()
            .find(|name| calendar.session(name).is_none())
        {
            return Err(ConfigError::Invalid(format!(
                "trading_hours.sessions names unknown session '{unknown}'"
            )));
        }

        Ok(())
    }

    pub fn build_calendar(&self) -> Result<SessionCalendar, ConfigError> {
        let calendar = if self.sessions.is_empty() {
            SessionCalendar::major_forex()
        } else {
            let windows = self
                .sessions
                .iter()
                .map(SessionWindow::from_config)
                .collect::<Result<Vec<_>, _>>()?;
            SessionCalendar::new(windows)?
        };

        let rule = TradingDayRule::try_from(&self.trading_day)?;
        Ok(calendar
            .with_news(self.news.policy(), self.news.events.clone())?
            .with_trading_day(rule))
    }

    pub fn gate_policy(&self) -> GatePolicy {
        GatePolicy {
            trading_hours_enabled: self.trading_hours.enabled,
            allowed_sessions: self.trading_hours.sessions.clone(),
            avoid_news: self.news.avoid_trading_during_news,
            news_min_impact: self.news.min_impact,
            correlation_scope: self.correlations.scope,
        }
    }

    pub fn correlation_matrix(&self) -> Arc<CorrelationMatrix> {
        let mut matrix = CorrelationMatrix::new();
        for pair in &self.correlations.pairs {
            matrix.insert(&pair.a, &pair.b, pair.coefficient);
        }
        Arc::new(matrix)
    }

    pub fn position_sizer(&self) -> PositionSizer {
        PositionSizer::new(self.instruments.iter().cloned())
    }

    /// Settings for `strategy_id`, defaulted when not configured.
    pub fn strategy_settings(&self, strategy_id: &str) -> StrategySettings {
        self.strategies.get(strategy_id).cloned().unwrap_or_default()
    }

    pub fn watchdog_interval(&self) -> Duration {
        Duration::from_millis(self.coordinator.watchdog_interval_ms)
    }

    pub fn default_fill_timeout(&self) -> Option<Duration> {
        self.coordinator.default_fill_timeout_ms.map(Duration::from_millis)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use rust_decimal_macros::dec;
    use crate::runner::RunnerSettings;

    const SAMPLE: &str = r#"
[account]
id = "fx-main"
starting_equity = 25000

[risk]
default_risk_percent = 0.5
max_daily_loss_percent = 2.0
max_open_positions = 3

[trading_hours]
enabled = true
sessions = ["london", "new_york"]

[news]
avoid_trading_during_news = true
pre_news_minutes = 15
post_news_minutes = 45
enabled_impacts = ["high", "medium"]

[[news.events]]
title = "ECB Rate Decision"
scheduled_at = "2024-03-07T13:15:00Z"
impact = "high"

[[sessions]]
name = "london"
start = "08:00"
end = "17:00"
timezone = "Europe/London"

[[sessions]]
name = "new_york"
start = "08:00"
end = "17:00"
timezone = "America/New_York"

[[instruments]]
symbol = "EURUSD"
lot_step = 1000

[correlations]
scope = "per_session"

[[correlations.pairs]]
a = "EURUSD"
b = "GBPUSD"
coefficient = 0.85

[coordinator]
watchdog_interval_ms = 250
default_fill_timeout_ms = 10000

[strategies.rsi]
risk_percent = 0.75
max_trades_per_day = 3

[strategies.london]
daily_profit_target_percent = 2.0
entry_cutoff_minutes = 15
flatten_before_close_minutes = 5
"#;

    #[test]
    fn test_parse_sample() {
        let config = EngineConfig::from_toml_str(SAMPLE).unwrap();

        assert_eq!(config.account.id, "fx-main");
        assert_eq!(config.account.starting_equity, dec!(25000));
        assert_eq!(config.risk.default_risk_percent, dec!(0.5));
        assert_eq!(config.risk.max_open_positions, 3);
        // Unset limits keep their defaults
        assert_eq!(config.risk.max_weekly_loss_percent, dec!(6.0));
        assert_eq!(config.news.events.len(), 1);
        assert_eq!(config.instruments[0].lot_step, dec!(1000));
        assert_eq!(config.correlations.scope, CorrelationScope::PerSession);
        assert_eq!(config.watchdog_interval(), Duration::from_millis(250));
        assert_eq!(config.default_fill_timeout(), Some(Duration::from_secs(10)));

        let rsi = config.strategy_settings("rsi");
        assert_eq!(rsi.risk_percent, Some(dec!(0.75)));
        assert_eq!(rsi.max_trades_per_day, 3);
        assert_eq!(rsi.entry_cutoff_minutes, None);

        let london = RunnerSettings::from(&config.strategy_settings("london"));
        assert_eq!(london.max_trades_per_day, 5);
        assert_eq!(london.daily_profit_target_percent, Some(dec!(2.0)));
        assert_eq!(london.entry_cutoff, Some(Duration::from_secs(900)));
        assert_eq!(london.flatten_before_close, Some(Duration::from_secs(300)));
    }

    #[test]
    fn test_build_calendar_from_sample() {
        let config = EngineConfig::from_toml_str(SAMPLE).unwrap();
        let calendar = config.build_calendar().unwrap();

        assert_eq!(calendar.session_names().count(), 2);
        let at = Utc.with_ymd_and_hms(2024, 3, 7, 13, 0, 0).unwrap();
        assert!(calendar.in_news_blackout(at, ImpactLevel::Low));
        let later = Utc.with_ymd_and_hms(2024, 3, 7, 14, 1, 0).unwrap();
        assert!(!calendar.in_news_blackout(later, ImpactLevel::Low));

        let policy = config.gate_policy();
        assert_eq!(policy.allowed_sessions, vec!["london", "new_york"]);
        assert!(policy.avoid_news);
    }

    #[test]
    fn test_defaults_when_empty() {
        let config = EngineConfig::from_toml_str("").unwrap();
        assert_eq!(config.account.starting_equity, dec!(10000));
        assert_eq!(config.risk, RiskLimits::default());
        assert_eq!(config.build_calendar().unwrap().session_names().count(), 4);
        assert_eq!(config.coordinator.client_order_prefix, "ENG");
    }

    #[test]
    fn test_rejects_bad_values() {
        let cases = [
            "[risk]\nmax_daily_loss_percent = 150",
            "[risk]\nmax_open_positions = 0",
            "[account]\nstarting_equity = -5",
            "[[correlations.pairs]]\na = \"EURUSD\"\nb = \"GBPUSD\"\ncoefficient = 1.5",
            "[strategies.rsi]\nrisk_percent = 0",
            "[strategies.rsi]\ndaily_profit_target_percent = -1",
            "[strategies.rsi]\nentry_cutoff_minutes = 100000",
            "[trading_hours]\nsessions = [\"sydney_late\"]",
        ];
        for case in cases {
            assert!(
                matches!(EngineConfig::from_toml_str(case), Err(ConfigError::Invalid(_))),
                "accepted: {case}"
            );
        }
    }

    #[test]
    fn test_rejects_bad_calendar() {
        let cases = [
            "[[sessions]]\nname = \"x\"\nstart = \"25:00\"\nend = \"04:00\"\ntimezone = \"UTC\"",
            "[[sessions]]\nname = \"x\"\nstart = \"08:00\"\nend = \"17:00\"\ntimezone = \"Mars/Olympus\"",
            "[[sessions]]\nname = \"x\"\nstart = \"08:00\"\nend = \"17:00\"\ntimezone = \"UTC\"\nweekdays = [0]",
            "[news]\npre_news_minutes = -5",
            "[news]\npost_news_minutes = 9000000000000000",
            "[trading_day]\nrollover = \"5pm\"",
        ];
        for case in cases {
            assert!(
                matches!(EngineConfig::from_toml_str(case), Err(ConfigError::Calendar(_))),
                "accepted: {case}"
            );
        }
    }
}
