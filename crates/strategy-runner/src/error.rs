//! Strategy runner error types.

use rust_decimal::Decimal;
use thiserror::Error;

use session_calendar::CalendarError;

/// Errors that can occur while running the engine.
#[derive(Debug, Error)]
pub enum RunnerError {
    /// Strategy error.
    #[error("strategy error: {0}")]
    Strategy(#[from] strategy_core::StrategyError),

    /// Broker adapter error.
    #[error("broker error: {0}")]
    Broker(#[from] connector_core::BrokerError),

    /// Ledger error.
    #[error("ledger error: {0}")]
    Ledger(#[from] execution_core::LedgerError),

    /// Configuration error.
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    /// A strategy with this id is already registered.
    #[error("duplicate strategy id '{0}'")]
    DuplicateStrategy(String),

    /// No strategy with this id is registered.
    #[error("unknown strategy '{0}'")]
    UnknownStrategy(String),

    /// Channel closed unexpectedly.
    #[error("channel closed")]
    ChannelClosed,
}

/// Reasons the position sizer refused to size an order.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum SizingError {
    /// The computed quantity rounds to zero or below the minimum.
    #[error("insufficient equity {equity}: computed quantity {quantity} below minimum {minimum}")]
    InsufficientEquity {
        /// Account equity.
        equity: Decimal,
        /// Quantity after flooring to the lot step.
        quantity: Decimal,
        /// Smallest tradable quantity.
        minimum: Decimal,
    },

    /// Stop distance is zero or negative.
    #[error("invalid stop distance {0}")]
    InvalidStopDistance(Decimal),

    /// Risk percent outside (0, 100].
    #[error("invalid risk percent {0}")]
    InvalidRiskPercent(Decimal),

    /// The size does not fit a decimal.
    #[error("position size overflows for equity {equity} and stop distance {stop_distance}")]
    Overflow {
        /// Account equity.
        equity: Decimal,
        /// Requested stop distance.
        stop_distance: Decimal,
    },
}

/// Startup configuration errors. Always fatal.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The configuration could not be read or deserialized.
    #[error("failed to load configuration: {0}")]
    Load(#[from] config::ConfigError),

    /// A session or calendar entry is malformed.
    #[error("invalid calendar: {0}")]
    Calendar(#[from] CalendarError),

    /// A value is out of range.
    #[error("invalid configuration: {0}")]
    Invalid(String),
}
