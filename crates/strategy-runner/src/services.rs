//! Shared engine collaborators handed to every runner.

use std::sync::Arc;
use std::time::Duration;

use connector_core::SharedBroker;
use execution_core::{
    create_pending_order_registry, RiskLedger, SharedLedger, SharedPendingOrderRegistry,
};
use metrics::{EventSink, SharedMetrics};
use session_calendar::SessionCalendar;
use strategy_core::{create_market_state, SharedMarketState};

use crate::config::EngineConfig;
use crate::error::ConfigError;
use crate::risk_gate::{RiskGate, SharedRiskGate};
use crate::sizer::PositionSizer;

/// Handles to the account's ledger, risk layer and broker.
///
/// Cloning is cheap; every field is shared.
#[derive(Clone)]
pub struct EngineServices {
    pub ledger: SharedLedger,
    pub gate: SharedRiskGate,
    pub sizer: Arc<PositionSizer>,
    pub calendar: Arc<SessionCalendar>,
    pub broker: SharedBroker,
    pub registry: SharedPendingOrderRegistry,
    pub market_state: SharedMarketState,
    pub events: EventSink,
    pub metrics: SharedMetrics,
    /// Prefix of generated client order ids.
    pub client_order_prefix: String,
    /// Fill timeout for strategies that configure none.
    pub default_fill_timeout: Option<Duration>,
}

impl EngineServices {
    /// Assemble services for one account from validated configuration.
    pub fn from_config(
        config: &EngineConfig,
        broker: SharedBroker,
        events: EventSink,
        metrics: SharedMetrics,
    ) -> Result<Self, ConfigError> {
        let calendar = Arc::new(config.build_calendar()?);

        let ledger = RiskLedger::new(
            config.account.id.clone(),
            config.account.starting_equity,
            config.risk.clone(),
        )
        .with_events(events.clone());

        let gate = RiskGate::new(config.risk.clone(), calendar.clone(), config.gate_policy())
            .with_correlations(config.correlation_matrix())
            .with_events(events.clone());

        Ok(Self {
            ledger: Arc::new(ledger),
            gate: Arc::new(gate),
            sizer: Arc::new(config.position_sizer()),
            calendar,
            broker,
            registry: create_pending_order_registry(),
            market_state: create_market_state(),
            events,
            metrics,
            client_order_prefix: config.coordinator.client_order_prefix.clone(),
            default_fill_timeout: config.default_fill_timeout(),
        })
    }
}
