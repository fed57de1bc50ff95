//! Strategy trait definition.

use async_trait::async_trait;
use model::Tick;
use rust_decimal::Decimal;

use crate::context::StrategyContext;
use crate::error::StrategyError;
use crate::signal::{Action, OrderUpdate};

/// Core trait for implementing trading strategies.
///
/// A strategy only decides; sizing, risk checks, order placement and
/// position bookkeeping belong to the runner.
///
/// # Lifecycle
///
/// 1. `on_start` - Called once when the runner starts
/// 2. `on_tick` - Called for each tick on a subscribed symbol
/// 3. `on_order_update` - Called when an order the runner placed changes state
/// 4. `on_stop` - Called once when the runner stops
#[async_trait]
pub trait Strategy: Send + Sync {
    /// Returns the unique identifier for this strategy instance.
    fn id(&self) -> &str;

    /// Returns the symbols this strategy trades.
    ///
    /// If `None`, the strategy receives ticks for all symbols.
    fn symbols(&self) -> Option<&[String]> {
        None
    }

    /// Per-trade risk percent overriding the account default.
    fn risk_percent(&self) -> Option<Decimal> {
        None
    }

    /// Session this strategy trades, used to tag its positions.
    ///
    /// If `None`, positions are tagged with the first active session.
    fn session(&self) -> Option<&str> {
        None
    }

    /// Called once when the runner starts.
    async fn on_start(&mut self, _ctx: &StrategyContext) -> Result<(), StrategyError> {
        Ok(())
    }

    /// Evaluate a tick.
    ///
    /// `ctx.position()` tells whether the strategy is flat. Return
    /// `Action::Enter` to propose an entry while flat and `Action::Exit` to
    /// close while in a position.
    async fn on_tick(&mut self, tick: &Tick, ctx: &StrategyContext) -> Result<Action, StrategyError>;

    /// Called when an order status changes.
    async fn on_order_update(
        &mut self,
        _update: &OrderUpdate,
        _ctx: &StrategyContext,
    ) -> Result<(), StrategyError> {
        Ok(())
    }

    /// Called once when the runner stops.
    async fn on_stop(&mut self, _ctx: &StrategyContext) -> Result<(), StrategyError> {
        Ok(())
    }
}

/// A boxed strategy trait object.
pub type BoxedStrategy = Box<dyn Strategy>;
