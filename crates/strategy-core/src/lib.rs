//! Core strategy types and traits for the engine.
//!
//! This crate provides the building blocks every strategy implements against:
//!
//! - **Strategy trait**: `Strategy::on_tick` returns an `Action`; runners are
//!   generic over the trait and never branch on a strategy type
//! - **Actions**: `Action::{Hold, Enter, Exit}` with `EntrySignal` carrying the
//!   stop distance the position sizer needs
//! - **Context**: `StrategyContext` giving read-only access to the latest ticks,
//!   indicator snapshots, the strategy's open position and active sessions
//!
//! # Example Strategy
//!
//! ```rust,ignore
//! use async_trait::async_trait;
//! use strategy_core::{Action, Strategy, StrategyContext, StrategyError};
//! use model::Tick;
//!
//! struct Flat {
//!     id: String,
//! }
//!
//! #[async_trait]
//! impl Strategy for Flat {
//!     fn id(&self) -> &str {
//!         &self.id
//!     }
//!
//!     async fn on_tick(&mut self, _tick: &Tick, _ctx: &StrategyContext) -> Result<Action, StrategyError> {
//!         Ok(Action::Hold)
//!     }
//! }
//! ```

mod context;
mod error;
mod signal;
mod strategy;

pub use context::{create_market_state, MarketState, SharedMarketState, StrategyContext};
pub use error::StrategyError;
pub use signal::{Action, EntrySignal, OrderUpdate};
pub use strategy::{BoxedStrategy, Strategy};

// Re-export commonly used types from dependencies for convenience
pub use execution_core::Position;
pub use model::{IndicatorSnapshot, MarketEvent, Side, Tick};
