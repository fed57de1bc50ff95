//! Risk-based position sizing.

use std::collections::HashMap;

use execution_core::{AccountView, RiskLimits};
use rust_decimal::{Decimal, RoundingStrategy};
use serde::Deserialize;
use tracing::debug;

use crate::error::SizingError;

/// Tradable quantity constraints for one symbol.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct InstrumentSpec {
    pub symbol: String,
    /// Quantities are floored to a multiple of this.
    #[serde(default = "default_lot_step")]
    pub lot_step: Decimal,
    /// Smallest order accepted; defaults to one lot step.
    #[serde(default)]
    pub min_quantity: Option<Decimal>,
    /// Larger sizes are clamped to this.
    #[serde(default)]
    pub max_quantity: Option<Decimal>,
}

fn default_lot_step() -> Decimal {
    Decimal::ONE
}

impl InstrumentSpec {
    pub fn new(symbol: impl Into<String>, lot_step: Decimal) -> Self {
        Self {
            symbol: symbol.into(),
            lot_step,
            min_quantity: None,
            max_quantity: None,
        }
    }

    pub fn with_min_quantity(mut self, quantity: Decimal) -> Self {
        self.min_quantity = Some(quantity);
        self
    }

    pub fn with_max_quantity(mut self, quantity: Decimal) -> Self {
        self.max_quantity = Some(quantity);
        self
    }

    pub fn minimum(&self) -> Decimal {
        self.min_quantity.unwrap_or(self.lot_step)
    }

    /// Floor `quantity` to the lot step. `None` if the lot count does not
    /// fit a decimal.
    pub fn floor_to_step(&self, quantity: Decimal) -> Option<Decimal> {
        if self.lot_step <= Decimal::ZERO {
            return Some(quantity);
        }
        quantity
            .checked_div(self.lot_step)?
            .round_dp_with_strategy(0, RoundingStrategy::ToZero)
            .checked_mul(self.lot_step)
    }
}

/// Computes order quantity from equity, risk percent and stop distance.
///
/// `quantity = equity * risk% / 100 / stop_distance`, floored to the
/// instrument's lot step and clamped to its maximum.
#[derive(Debug, Clone, Default)]
pub struct PositionSizer {
    instruments: HashMap<String, InstrumentSpec>,
}

impl PositionSizer {
    pub fn new(instruments: impl IntoIterator<Item = InstrumentSpec>) -> Self {
        Self {
            instruments: instruments
                .into_iter()
                .map(|spec| (spec.symbol.clone(), spec))
                .collect(),
        }
    }

    /// Spec for `symbol`, or a lot step of one unit if unknown.
    pub fn instrument(&self, symbol: &str) -> InstrumentSpec {
        self.instruments
            .get(symbol)
            .cloned()
            .unwrap_or_else(|| InstrumentSpec::new(symbol, default_lot_step()))
    }

    pub fn compute_size(
        &self,
        account: &AccountView,
        limits: &RiskLimits,
        symbol: &str,
        stop_loss_distance: Decimal,
        risk_percent_override: Option<Decimal>,
    ) -> Result<Decimal, SizingError> {
        if stop_loss_distance <= Decimal::ZERO {
            return Err(SizingError::InvalidStopDistance(stop_loss_distance));
        }

        let risk_percent = risk_percent_override.unwrap_or(limits.default_risk_percent);
        if risk_percent <= Decimal::ZERO || risk_percent > Decimal::ONE_HUNDRED {
            return Err(SizingError::InvalidRiskPercent(risk_percent));
        }

        let spec = self.instrument(symbol);
        let insufficient = |quantity| SizingError::InsufficientEquity {
            equity: account.equity,
            quantity,
            minimum: spec.minimum(),
        };
        if account.equity <= Decimal::ZERO {
            return Err(insufficient(Decimal::ZERO));
        }

        let overflow = || SizingError::Overflow {
            equity: account.equity,
            stop_distance: stop_loss_distance,
        };
        let mut quantity = account
            .equity
            .checked_mul(risk_percent)
            .and_then(|v| v.checked_div(Decimal::ONE_HUNDRED))
            .and_then(|risk_amount| risk_amount.checked_div(stop_loss_distance))
            .and_then(|raw| spec.floor_to_step(raw))
            .ok_or_else(overflow)?;

        if let Some(max) = spec.max_quantity {
            quantity = quantity.min(spec.floor_to_step(max).unwrap_or(max));
        }
        if quantity <= Decimal::ZERO || quantity < spec.minimum() {
            return Err(insufficient(quantity));
        }

        debug!(
            symbol = %symbol,
            equity = %account.equity,
            risk_percent = %risk_percent,
            stop_distance = %stop_loss_distance,
            quantity = %quantity,
            "position sized"
        );
        Ok(quantity.normalize())
    }
}
