//! Risk rejection reasons and ledger errors.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use thiserror::Error;

use crate::ledger::ReservationId;
use crate::position::PositionId;

/// Reasons a candidate order was refused.
///
/// Rejections are expected outcomes, not failures: they are logged, routed
/// back to the strategy as a no-op and never retried automatically.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum RiskRejection {
    /// New orders are halted for the account.
    #[error("account halted: {reason}")]
    AccountHalted {
        /// Why the account was halted.
        reason: String,
    },

    /// No permitted trading session is open.
    #[error("outside trading session window at {at}")]
    OutsideSessionWindow {
        /// Intent timestamp.
        at: DateTime<Utc>,
    },

    /// A scheduled release is inside its blackout window.
    #[error("news blackout for '{event}' scheduled at {scheduled_at}")]
    NewsBlackout {
        /// Event title.
        event: String,
        /// Release time.
        scheduled_at: DateTime<Utc>,
    },

    /// Realized plus reserved daily loss would exceed the daily budget.
    #[error("daily loss limit exceeded: current {current}, limit {limit}")]
    DailyLossLimitExceeded {
        /// Realized plus reserved loss including the candidate.
        current: Decimal,
        /// Budget in account currency.
        limit: Decimal,
    },

    /// Realized plus reserved weekly loss would exceed the weekly budget.
    #[error("weekly loss limit exceeded: current {current}, limit {limit}")]
    WeeklyLossLimitExceeded {
        /// Realized plus reserved loss including the candidate.
        current: Decimal,
        /// Budget in account currency.
        limit: Decimal,
    },

    /// Open plus in-flight positions are at the account maximum.
    #[error("max open positions exceeded: current {current}, limit {limit}")]
    MaxOpenPositionsExceeded {
        /// Committed plus reserved positions.
        current: u32,
        /// Configured maximum.
        limit: u32,
    },

    /// Open plus in-flight positions in the symbol are at the maximum.
    #[error("max positions for {symbol} exceeded: current {current}, limit {limit}")]
    MaxPerSymbolExceeded {
        /// Candidate symbol.
        symbol: String,
        /// Committed plus reserved positions in the symbol.
        current: u32,
        /// Configured maximum.
        limit: u32,
    },

    /// The candidate is too correlated with a symbol already held.
    #[error("correlation {correlation} between {symbol} and {held} exceeds {threshold}")]
    CorrelationLimitExceeded {
        /// Candidate symbol.
        symbol: String,
        /// Symbol already held or in flight.
        held: String,
        /// Coefficient between the two.
        correlation: Decimal,
        /// Configured threshold.
        threshold: Decimal,
    },

    /// The strategy already holds or awaits a position in the symbol.
    #[error("strategy {strategy_id} already has a position in {symbol}")]
    DuplicateStrategyPosition {
        /// Strategy instance id.
        strategy_id: String,
        /// Candidate symbol.
        symbol: String,
    },
}

impl RiskRejection {
    /// Short machine-readable code for metrics and events.
    pub fn code(&self) -> &'static str {
        match self {
            Self::AccountHalted { .. } => "account_halted",
            Self::OutsideSessionWindow { .. } => "outside_session_window",
            Self::NewsBlackout { .. } => "news_blackout",
            Self::DailyLossLimitExceeded { .. } => "daily_loss_limit_exceeded",
            Self::WeeklyLossLimitExceeded { .. } => "weekly_loss_limit_exceeded",
            Self::MaxOpenPositionsExceeded { .. } => "max_open_positions_exceeded",
            Self::MaxPerSymbolExceeded { .. } => "max_per_symbol_exceeded",
            Self::CorrelationLimitExceeded { .. } => "correlation_limit_exceeded",
            Self::DuplicateStrategyPosition { .. } => "duplicate_strategy_position",
        }
    }
}

/// Errors returned by ledger mutations.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum LedgerError {
    /// Re-validation at reservation time failed. Handle like a gate rejection.
    #[error("reservation rejected: {0}")]
    Rejected(#[from] RiskRejection),

    /// The account is halted after an invariant violation or by an operator.
    #[error("account halted: {0}")]
    Halted(String),

    /// The intent is malformed (non-positive quantity or stop distance).
    #[error("invalid intent: {0}")]
    InvalidIntent(String),

    /// No reservation with this id was ever made.
    #[error("unknown reservation {0}")]
    UnknownReservation(ReservationId),

    /// No open position with this id.
    #[error("unknown position {0}")]
    UnknownPosition(PositionId),

    /// Fill quantity or price is not positive.
    #[error("invalid fill: qty {qty} at {price}")]
    InvalidFill {
        /// Reported fill quantity.
        qty: Decimal,
        /// Reported fill price.
        price: Decimal,
    },

    /// A ledger invariant no longer holds; the account has been halted.
    #[error("ledger invariant violated: {0}")]
    InvariantViolation(String),
}

impl LedgerError {
    /// The rejection to report when this error is treated as a risk verdict.
    pub fn as_rejection(&self) -> Option<RiskRejection> {
        match self {
            Self::Rejected(reason) => Some(reason.clone()),
            Self::Halted(reason) => Some(RiskRejection::AccountHalted {
                reason: reason.clone(),
            }),
            _ => None,
        }
    }
}
