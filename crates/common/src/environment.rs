//! Trading mode configuration.
//!
//! Paper mode routes orders to the in-process simulated broker; live mode
//! requires a real broker adapter.

use std::fmt;
use std::str::FromStr;

/// Where order intents end up.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TradingMode {
    /// Simulated fills, no real money.
    #[default]
    Paper,
    /// Orders are routed to a real broker.
    Live,
}

impl TradingMode {
    /// Returns true if orders reach a real broker.
    pub fn is_live(&self) -> bool {
        matches!(self, Self::Live)
    }

    /// Returns true if fills are simulated.
    pub fn is_paper(&self) -> bool {
        matches!(self, Self::Paper)
    }

    /// Load the mode from the `TRADING_MODE` env var.
    ///
    /// Returns `Paper` if not set or invalid.
    pub fn from_env() -> Self {
        std::env::var("TRADING_MODE")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or_default()
    }
}

impl fmt::Display for TradingMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Paper => write!(f, "paper"),
            Self::Live => write!(f, "live"),
        }
    }
}

impl FromStr for TradingMode {
    type Err = ParseTradingModeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "paper" | "dry-run" | "dry_run" | "demo" | "sim" => Ok(Self::Paper),
            "live" | "real" | "production" | "prod" => Ok(Self::Live),
            _ => Err(ParseTradingModeError(s.to_string())),
        }
    }
}

/// Error parsing a trading mode string.
#[derive(Debug, Clone)]
pub struct ParseTradingModeError(String);

impl fmt::Display for ParseTradingModeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "invalid trading mode '{}', expected 'paper' or 'live'",
            self.0
        )
    }
}

impl std::error::Error for ParseTradingModeError {}
