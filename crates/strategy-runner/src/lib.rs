//! Execution runtime for the trading engine.
//!
//! This crate turns strategy decisions into orders for one account:
//!
//! - **ExecutionCoordinator**: Owns the runners, fans out market data, applies
//!   broker events to the ledger and runs the fill-timeout watchdog
//! - **StrategyRunner**: Per-strategy state machine from signal to close
//! - **RiskGate**: Stateless pre-trade checks against a ledger snapshot
//! - **PositionSizer**: Risk-percent position sizing
//! - **PaperBroker**: Simulated broker for paper trading and tests
//!
//! # Architecture
//!
//! ```text
//! ┌────────────┐  Enter   ┌────────────────┐  reserve   ┌────────────┐
//! │  Strategy  │─────────>│ StrategyRunner │───────────>│ RiskLedger │
//! │  on_tick() │          │ size/gate/send │            └────────────┘
//! └────────────┘          └────────────────┘                  ^
//!       ^                         │ submit_order              │ commit/release
//!       │                         v                           │
//!       │                 ┌────────────────┐ BrokerEvent ┌─────────────┐
//!       └─────────────────│ BrokerAdapter  │────────────>│ Coordinator │
//!        on_order_update  └────────────────┘             └─────────────┘
//! ```
//!
//! # Usage
//!
//! ```rust,ignore
//! use strategy_runner::{CoordinatorConfig, EngineConfig, EngineServices, ExecutionCoordinator};
//!
//! let config = EngineConfig::load(Some(path))?;
//! let services = EngineServices::from_config(&config, broker, events, metrics)?;
//!
//! let mut coordinator = ExecutionCoordinator::new(services, CoordinatorConfig::from(&config));
//! coordinator.add_strategy(Box::new(my_strategy), config.strategy_settings("rsi").into())?;
//!
//! coordinator.run(market_rx, broker_rx, shutdown_rx).await?;
//! ```

mod config;
mod coordinator;
mod error;
pub mod examples;
mod paper_broker;
mod risk_gate;
mod runner;
mod services;
mod sizer;

pub use config::{
    AccountConfig, CoordinatorSettings, CorrelationConfig, CorrelationPair, EngineConfig, NewsConfig,
    StrategySettings, TradingHoursConfig,
};
pub use coordinator::{ControlCommand, CoordinatorConfig, CoordinatorControl, ExecutionCoordinator};
pub use error::{ConfigError, RunnerError, SizingError};
pub use paper_broker::{PaperBroker, PaperFillMode};
pub use risk_gate::{
    CorrelationMatrix, CorrelationScope, CorrelationSource, GatePolicy, RiskCheckResult, RiskGate,
    SharedRiskGate,
};
pub use runner::{
    OrderNotice, RunnerMessage, RunnerSettings, RunnerState, StrategyRunner, StrategyState,
};
pub use services::EngineServices;
pub use sizer::{InstrumentSpec, PositionSizer};
