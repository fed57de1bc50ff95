//! Strategy error types.

use thiserror::Error;

/// Errors a strategy returns from its callbacks.
///
/// The runner logs them and skips the tick; an error from `on_start`
/// stops the runner before it sees any data.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum StrategyError {
    /// Strategy parameters are inconsistent.
    #[error("invalid strategy parameters: {0}")]
    InvalidConfig(String),

    /// Indicator data arrives for the symbol but lacks a value the
    /// strategy needs.
    #[error("indicator {indicator} missing for {symbol}")]
    IndicatorUnavailable {
        /// Instrument the snapshot was for.
        symbol: String,
        /// Indicator name (e.g. "rsi").
        indicator: &'static str,
    },

    /// Anything else.
    #[error("{0}")]
    Internal(String),
}
