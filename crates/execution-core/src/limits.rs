//! Risk limit configuration.
//!
//! Defines the thresholds every candidate order is validated against.

use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::Deserialize;

/// Account-wide risk thresholds.
///
/// Loaded once at startup and shared read-only. Percentages are expressed
/// in percent (1.0 = 1%), not as fractions.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct RiskLimits {
    // === Per-Trade ===
    /// Percent of equity risked per trade when a strategy has no override.
    pub default_risk_percent: Decimal,

    // === Loss Limits ===
    /// Maximum realized + reserved loss per trading day, as percent of
    /// start-of-day equity.
    pub max_daily_loss_percent: Decimal,

    /// Maximum realized + reserved loss per trading week, as percent of
    /// start-of-week equity.
    pub max_weekly_loss_percent: Decimal,

    // === Position Limits ===
    /// Maximum open plus in-flight positions across the account.
    pub max_open_positions: u32,

    /// Maximum open plus in-flight positions per symbol.
    pub max_positions_per_symbol: u32,

    /// Whether one strategy may hold more than one position in a symbol.
    pub allow_multiple_positions_per_symbol: bool,

    // === Correlation ===
    /// Maximum absolute correlation between a candidate symbol and any
    /// symbol already held.
    pub correlation_threshold: Decimal,
}

impl Default for RiskLimits {
    fn default() -> Self {
        Self {
            default_risk_percent: dec!(1.0),
            max_daily_loss_percent: dec!(3.0),
            max_weekly_loss_percent: dec!(6.0),
            max_open_positions: 5,
            max_positions_per_symbol: 2,
            allow_multiple_positions_per_symbol: false,
            correlation_threshold: dec!(0.8),
        }
    }
}

impl RiskLimits {
    /// Create limits with all default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Tighter limits for a first live deployment.
    pub fn conservative() -> Self {
        Self {
            default_risk_percent: dec!(0.5),
            max_daily_loss_percent: dec!(1.5),
            max_weekly_loss_percent: dec!(3.0),
            max_open_positions: 2,
            max_positions_per_symbol: 1,
            allow_multiple_positions_per_symbol: false,
            correlation_threshold: dec!(0.7),
        }
    }

    pub fn with_default_risk_percent(mut self, percent: Decimal) -> Self {
        self.default_risk_percent = percent;
        self
    }

    pub fn with_max_daily_loss_percent(mut self, percent: Decimal) -> Self {
        self.max_daily_loss_percent = percent;
        self
    }

    pub fn with_max_weekly_loss_percent(mut self, percent: Decimal) -> Self {
        self.max_weekly_loss_percent = percent;
        self
    }

    pub fn with_max_open_positions(mut self, limit: u32) -> Self {
        self.max_open_positions = limit;
        self
    }

    pub fn with_max_positions_per_symbol(mut self, limit: u32) -> Self {
        self.max_positions_per_symbol = limit;
        self
    }

    pub fn with_multiple_positions_per_symbol(mut self, allowed: bool) -> Self {
        self.allow_multiple_positions_per_symbol = allowed;
        self
    }

    pub fn with_correlation_threshold(mut self, threshold: Decimal) -> Self {
        self.correlation_threshold = threshold;
        self
    }

    /// Daily loss budget in account currency.
    pub fn daily_loss_limit(&self, start_of_day_equity: Decimal) -> Decimal {
        start_of_day_equity * self.max_daily_loss_percent / Decimal::ONE_HUNDRED
    }

    /// Weekly loss budget in account currency.
    pub fn weekly_loss_limit(&self, start_of_week_equity: Decimal) -> Decimal {
        start_of_week_equity * self.max_weekly_loss_percent / Decimal::ONE_HUNDRED
    }

    /// Describe the first malformed value, if any.
    pub fn validate(&self) -> Result<(), String> {
        let percent = |name: &str, value: Decimal| {
            if value <= Decimal::ZERO || value > Decimal::ONE_HUNDRED {
                Err(format!("{name} must be in (0, 100], got {value}"))
            } else {
                Ok(())
            }
        };
        percent("default_risk_percent", self.default_risk_percent)?;
        percent("max_daily_loss_percent", self.max_daily_loss_percent)?;
        percent("max_weekly_loss_percent", self.max_weekly_loss_percent)?;

        if self.max_open_positions == 0 {
            return Err("max_open_positions must be at least 1".into());
        }
        if self.max_positions_per_symbol == 0 {
            return Err("max_positions_per_symbol must be at least 1".into());
        }
        if self.correlation_threshold < Decimal::ZERO || self.correlation_threshold > Decimal::ONE {
            return Err(format!(
                "correlation_threshold must be in [0, 1], got {}",
                self.correlation_threshold
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_limits() {
        let limits = RiskLimits::default();

        assert_eq!(limits.default_risk_percent, dec!(1.0));
        assert_eq!(limits.max_daily_loss_percent, dec!(3.0));
        assert_eq!(limits.max_weekly_loss_percent, dec!(6.0));
        assert_eq!(limits.max_open_positions, 5);
        assert_eq!(limits.max_positions_per_symbol, 2);
        assert!(!limits.allow_multiple_positions_per_symbol);
        assert_eq!(limits.correlation_threshold, dec!(0.8));
        assert!(limits.validate().is_ok());
    }

    #[test]
    fn test_conservative_limits() {
        let limits = RiskLimits::conservative();

        assert_eq!(limits.default_risk_percent, dec!(0.5));
        assert_eq!(limits.max_open_positions, 2);
        assert_eq!(limits.max_positions_per_symbol, 1);
        assert!(limits.validate().is_ok());
    }

    #[test]
    fn test_builder_methods() {
        let limits = RiskLimits::new()
            .with_default_risk_percent(dec!(2))
            .with_max_daily_loss_percent(dec!(4))
            .with_max_open_positions(10)
            .with_multiple_positions_per_symbol(true)
            .with_correlation_threshold(dec!(0.9));

        assert_eq!(limits.default_risk_percent, dec!(2));
        assert_eq!(limits.max_daily_loss_percent, dec!(4));
        assert_eq!(limits.max_open_positions, 10);
        assert!(limits.allow_multiple_positions_per_symbol);
        assert_eq!(limits.correlation_threshold, dec!(0.9));
    }

    #[test]
    fn test_loss_limits_in_currency() {
        let limits = RiskLimits::default();
        assert_eq!(limits.daily_loss_limit(dec!(10000)), dec!(300));
        assert_eq!(limits.weekly_loss_limit(dec!(10000)), dec!(600));
    }

    #[test]
    fn test_validate_rejects_bad_values() {
        assert!(RiskLimits::new().with_default_risk_percent(dec!(0)).validate().is_err());
        assert!(RiskLimits::new().with_max_daily_loss_percent(dec!(101)).validate().is_err());
        assert!(RiskLimits::new().with_max_open_positions(0).validate().is_err());
        assert!(RiskLimits::new().with_correlation_threshold(dec!(1.5)).validate().is_err());
    }
}
