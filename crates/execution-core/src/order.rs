//! Candidate orders and their risk verdict.

use std::fmt;

use chrono::{DateTime, Utc};
use model::Side;
use rust_decimal::Decimal;

use crate::error::RiskRejection;

/// Risk-check state of an intent.
///
/// `Approved` and `Rejected` are terminal; a rejected intent is never
/// resubmitted.
#[derive(Debug, Clone, PartialEq, Default)]
pub enum IntentStatus {
    #[default]
    Pending,
    Approved,
    Rejected(RiskRejection),
}

impl IntentStatus {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::Pending)
    }
}

impl fmt::Display for IntentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Pending => write!(f, "pending"),
            Self::Approved => write!(f, "approved"),
            Self::Rejected(reason) => write!(f, "rejected: {reason}"),
        }
    }
}

/// A sized entry order proposed by a strategy runner.
#[derive(Debug, Clone, PartialEq)]
pub struct OrderIntent {
    pub symbol: String,
    pub side: Side,
    pub quantity: Decimal,
    pub strategy_id: String,
    pub timestamp: DateTime<Utc>,
    /// Distance from entry to the protective stop, in price units.
    pub stop_distance: Decimal,
    pub take_profit_distance: Option<Decimal>,
    /// Price the intent was sized at.
    pub reference_price: Decimal,
    /// Session the intent was generated in, used for per-session correlation.
    pub session: Option<String>,
    pub status: IntentStatus,
}

impl OrderIntent {
    pub fn new(
        strategy_id: impl Into<String>,
        symbol: impl Into<String>,
        side: Side,
        quantity: Decimal,
        reference_price: Decimal,
        stop_distance: Decimal,
        timestamp: DateTime<Utc>,
    ) -> Self {
        Self {
            symbol: symbol.into(),
            side,
            quantity,
            strategy_id: strategy_id.into(),
            timestamp,
            stop_distance,
            take_profit_distance: None,
            reference_price,
            session: None,
            status: IntentStatus::Pending,
        }
    }

    pub fn with_take_profit(mut self, distance: Decimal) -> Self {
        self.take_profit_distance = Some(distance);
        self
    }

    pub fn with_session(mut self, session: impl Into<String>) -> Self {
        self.session = Some(session.into());
        self
    }

    /// Loss if the stop is hit: quantity times stop distance.
    pub fn risk_amount(&self) -> Decimal {
        self.quantity * self.stop_distance
    }

    /// Absolute stop-loss price.
    pub fn stop_price(&self) -> Decimal {
        self.reference_price - self.side.sign() * self.stop_distance
    }

    /// Absolute take-profit price, if one was requested.
    pub fn take_profit_price(&self) -> Option<Decimal> {
        self.take_profit_distance
            .map(|d| self.reference_price + self.side.sign() * d)
    }

    pub fn approve(&mut self) {
        self.status = IntentStatus::Approved;
    }

    pub fn reject(&mut self, reason: RiskRejection) {
        self.status = IntentStatus::Rejected(reason);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn intent(side: Side) -> OrderIntent {
        OrderIntent::new(
            "rsi",
            "EURUSD",
            side,
            dec!(20000),
            dec!(1.1000),
            dec!(0.0050),
            Utc::now(),
        )
    }

    #[test]
    fn test_risk_amount() {
        assert_eq!(intent(Side::Long).risk_amount(), dec!(100));
    }

    #[test]
    fn test_stop_and_target_prices() {
        let long = intent(Side::Long).with_take_profit(dec!(0.0100));
        assert_eq!(long.stop_price(), dec!(1.0950));
        assert_eq!(long.take_profit_price(), Some(dec!(1.1100)));

        let short = intent(Side::Short);
        assert_eq!(short.stop_price(), dec!(1.1050));
        assert_eq!(short.take_profit_price(), None);
    }

    #[test]
    fn test_status_transitions() {
        let mut intent = intent(Side::Long);
        assert!(!intent.status.is_terminal());

        intent.reject(RiskRejection::MaxOpenPositionsExceeded { current: 3, limit: 3 });
        assert!(intent.status.is_terminal());
        assert!(intent.status.to_string().starts_with("rejected"));
    }
}
