//! Structured observability events.
//!
//! Every gate rejection, runner state transition and ledger mutation is
//! logged through `tracing` and, when a consumer subscribed, published on a
//! broadcast channel for dashboards.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::broadcast;
use tracing::{error, info, warn};

/// Engine component that produced an event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Component {
    RiskLedger,
    RiskGate,
    PositionSizer,
    StrategyRunner,
    Coordinator,
    Watchdog,
}

impl fmt::Display for Component {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::RiskLedger => "risk_ledger",
            Self::RiskGate => "risk_gate",
            Self::PositionSizer => "position_sizer",
            Self::StrategyRunner => "strategy_runner",
            Self::Coordinator => "coordinator",
            Self::Watchdog => "watchdog",
        };
        f.write_str(name)
    }
}

/// Category of an event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    Rejection,
    StateTransition,
    LedgerMutation,
    BrokerFailure,
    Alert,
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Rejection => "rejection",
            Self::StateTransition => "state_transition",
            Self::LedgerMutation => "ledger_mutation",
            Self::BrokerFailure => "broker_failure",
            Self::Alert => "alert",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct EngineEvent {
    pub timestamp: DateTime<Utc>,
    pub component: Component,
    pub event_kind: EventKind,
    pub detail: String,
}

/// Cloneable emitter handed to every component that reports events.
#[derive(Debug, Clone, Default)]
pub struct EventSink {
    tx: Option<broadcast::Sender<EngineEvent>>,
}

impl EventSink {
    /// A sink that only logs.
    pub fn log_only() -> Self {
        Self { tx: None }
    }

    /// A sink that also publishes to subscribers.
    pub fn with_channel(capacity: usize) -> (Self, broadcast::Receiver<EngineEvent>) {
        let (tx, rx) = broadcast::channel(capacity.max(1));
        (Self { tx: Some(tx) }, rx)
    }

    /// Subscribe to published events, if publishing is enabled.
    pub fn subscribe(&self) -> Option<broadcast::Receiver<EngineEvent>> {
        self.tx.as_ref().map(|tx| tx.subscribe())
    }

    pub fn emit(
        &self,
        timestamp: DateTime<Utc>,
        component: Component,
        event_kind: EventKind,
        detail: impl Into<String>,
    ) {
        let event = EngineEvent {
            timestamp,
            component,
            event_kind,
            detail: detail.into(),
        };

        match event.event_kind {
            EventKind::Rejection | EventKind::BrokerFailure => warn!(
                component = %event.component,
                kind = %event.event_kind,
                at = %event.timestamp,
                "{}",
                event.detail
            ),
            EventKind::Alert => error!(
                component = %event.component,
                kind = %event.event_kind,
                at = %event.timestamp,
                "{}",
                event.detail
            ),
            EventKind::StateTransition | EventKind::LedgerMutation => info!(
                component = %event.component,
                kind = %event.event_kind,
                at = %event.timestamp,
                "{}",
                event.detail
            ),
        }

        if let Some(tx) = &self.tx {
            // No subscribers is fine
            let _ = tx.send(event);
        }
    }
}
