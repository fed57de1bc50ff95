//! Open positions owned by the ledger.

use std::fmt;

use chrono::{DateTime, Utc};
use model::Side;
use rust_decimal::Decimal;
use serde::Serialize;
use uuid::Uuid;

/// Ledger-assigned position identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct PositionId(Uuid);

impl PositionId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for PositionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for PositionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "pos_{}", self.0.as_simple())
    }
}

/// A filled position, created on fill confirmation and destroyed on close.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Position {
    pub id: PositionId,
    pub symbol: String,
    pub side: Side,
    /// Filled quantity, always positive.
    pub quantity: Decimal,
    pub entry_price: Decimal,
    pub strategy_id: String,
    pub opened_at: DateTime<Utc>,
    pub session_tag: Option<String>,
    /// Loss at the protective stop.
    pub risk_amount: Decimal,
    pub stop_distance: Decimal,
    /// Last mark-to-market P&L.
    pub unrealized_pnl: Decimal,
}

impl Position {
    /// P&L if closed at `price`.
    pub fn pnl_at(&self, price: Decimal) -> Decimal {
        (price - self.entry_price) * self.quantity * self.side.sign()
    }

    /// Notional at entry.
    pub fn exposure(&self) -> Decimal {
        self.quantity.abs() * self.entry_price
    }

    /// Absolute stop price.
    pub fn stop_price(&self) -> Decimal {
        self.entry_price - self.side.sign() * self.stop_distance
    }

    /// True when `price` has reached the protective stop.
    pub fn stop_hit(&self, price: Decimal) -> bool {
        if self.stop_distance <= Decimal::ZERO {
            return false;
        }
        match self.side {
            Side::Long => price <= self.stop_price(),
            Side::Short => price >= self.stop_price(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn position(side: Side) -> Position {
        Position {
            id: PositionId::new(),
            symbol: "EURUSD".into(),
            side,
            quantity: dec!(10000),
            entry_price: dec!(1.1000),
            strategy_id: "rsi".into(),
            opened_at: Utc::now(),
            session_tag: None,
            risk_amount: dec!(50),
            stop_distance: dec!(0.0050),
            unrealized_pnl: Decimal::ZERO,
        }
    }

    #[test]
    fn test_long_pnl() {
        let pos = position(Side::Long);
        assert_eq!(pos.pnl_at(dec!(1.1020)), dec!(20));
        assert_eq!(pos.pnl_at(dec!(1.0990)), dec!(-10));
    }

    #[test]
    fn test_short_pnl() {
        let pos = position(Side::Short);
        assert_eq!(pos.pnl_at(dec!(1.0980)), dec!(20));
        assert_eq!(pos.pnl_at(dec!(1.1010)), dec!(-10));
    }

    #[test]
    fn test_stop_hit() {
        let long = position(Side::Long);
        assert!(!long.stop_hit(dec!(1.0960)));
        assert!(long.stop_hit(dec!(1.0950)));

        let short = position(Side::Short);
        assert!(short.stop_hit(dec!(1.1051)));
        assert!(!short.stop_hit(dec!(1.1000)));
    }

    #[test]
    fn test_exposure() {
        assert_eq!(position(Side::Short).exposure(), dec!(11000));
    }

    #[test]
    fn test_position_ids_unique() {
        assert_ne!(PositionId::new(), PositionId::new());
        assert!(PositionId::new().to_string().starts_with("pos_"));
    }
}
