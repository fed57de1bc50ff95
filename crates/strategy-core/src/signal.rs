//! What a strategy asks the runner to do.

use model::Side;
use rust_decimal::Decimal;

/// Proposed entry. Quantity is left to the position sizer.
#[derive(Debug, Clone, PartialEq)]
pub struct EntrySignal {
    pub symbol: String,
    pub side: Side,
    /// Distance from entry to stop, in price units. Must be positive.
    pub stop_loss_distance: Decimal,
    pub take_profit_distance: Option<Decimal>,
    pub reason: String,
}

impl EntrySignal {
    pub fn long(symbol: impl Into<String>, stop_loss_distance: Decimal) -> Self {
        Self::new(symbol, Side::Long, stop_loss_distance)
    }

    pub fn short(symbol: impl Into<String>, stop_loss_distance: Decimal) -> Self {
        Self::new(symbol, Side::Short, stop_loss_distance)
    }

    pub fn new(symbol: impl Into<String>, side: Side, stop_loss_distance: Decimal) -> Self {
        Self {
            symbol: symbol.into(),
            side,
            stop_loss_distance,
            take_profit_distance: None,
            reason: String::new(),
        }
    }

    pub fn with_take_profit(mut self, distance: Decimal) -> Self {
        self.take_profit_distance = Some(distance);
        self
    }

    pub fn with_reason(mut self, reason: impl Into<String>) -> Self {
        self.reason = reason.into();
        self
    }
}

/// Result of evaluating a tick.
#[derive(Debug, Clone, PartialEq, Default)]
pub enum Action {
    /// Nothing to do.
    #[default]
    Hold,
    /// Open a position. Ignored unless the runner is idle.
    Enter(EntrySignal),
    /// Close the open position. Ignored unless the runner is in a position.
    Exit { reason: String },
}

impl Action {
    pub fn exit(reason: impl Into<String>) -> Self {
        Self::Exit {
            reason: reason.into(),
        }
    }

    pub fn is_hold(&self) -> bool {
        matches!(self, Self::Hold)
    }
}

/// Order lifecycle notification delivered to the strategy.
#[derive(Debug, Clone, PartialEq)]
pub enum OrderUpdate {
    /// Entry was refused by the risk gate, ledger or sizer.
    Refused { reason: String },
    /// Entry filled.
    Filled {
        symbol: String,
        side: Side,
        price: Decimal,
        quantity: Decimal,
    },
    /// Broker canceled the order.
    Canceled,
    /// Broker rejected the order.
    Rejected { reason: String },
    /// No fill within the fill timeout.
    TimedOut,
    /// Position closed.
    Closed { exit_price: Decimal, pnl: Decimal },
}
