//! Pre-trade risk gate.
//!
//! The gate sits between the position sizer and the ledger reservation.
//! It validates a sized `OrderIntent` against a point-in-time `AccountView`
//! and the session calendar, and returns the first rule the intent breaks.
//! Approval is advisory: the ledger re-validates counts and loss budgets
//! atomically when the reservation is taken.

use std::collections::HashMap;
use std::sync::Arc;

use rust_decimal::Decimal;
use serde::Deserialize;
use tracing::debug;

use execution_core::{AccountView, OrderIntent, RiskLimits, RiskRejection};
use metrics::{Component, EventKind, EventSink};
use session_calendar::{ImpactLevel, SessionCalendar};

/// Result of a risk check on an order.
#[derive(Debug, Clone, PartialEq)]
pub enum RiskCheckResult {
    /// Order approved - may proceed to reservation.
    Approved,
    /// Order rejected - must not be executed.
    Rejected(RiskRejection),
}

impl RiskCheckResult {
    pub fn is_approved(&self) -> bool {
        matches!(self, Self::Approved)
    }
}

/// Which held symbols the correlation check compares against.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CorrelationScope {
    /// Every open or in-flight symbol.
    #[default]
    Global,
    /// Only positions and reservations tagged with the candidate's session.
    /// Untagged candidates fall back to the global comparison.
    PerSession,
}

/// Gate switches that are not account limits.
#[derive(Debug, Clone, PartialEq)]
pub struct GatePolicy {
    /// Reject intents when no permitted session is open.
    pub trading_hours_enabled: bool,
    /// Sessions that permit trading. Empty means any configured session.
    pub allowed_sessions: Vec<String>,
    /// Reject intents inside a news blackout window.
    pub avoid_news: bool,
    /// Lowest impact level that can cause a blackout.
    pub news_min_impact: ImpactLevel,
    pub correlation_scope: CorrelationScope,
}

impl Default for GatePolicy {
    fn default() -> Self {
        Self {
            trading_hours_enabled: true,
            allowed_sessions: Vec::new(),
            avoid_news: true,
            news_min_impact: ImpactLevel::Low,
            correlation_scope: CorrelationScope::Global,
        }
    }
}

impl GatePolicy {
    /// Policy with session and news checks switched off.
    pub fn permissive() -> Self {
        Self {
            trading_hours_enabled: false,
            avoid_news: false,
            ..Self::default()
        }
    }

    pub fn with_allowed_sessions(mut self, sessions: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.allowed_sessions = sessions.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_correlation_scope(mut self, scope: CorrelationScope) -> Self {
        self.correlation_scope = scope;
        self
    }
}

/// Read-only supplier of pairwise symbol correlations.
pub trait CorrelationSource: Send + Sync {
    /// Coefficient in [-1, 1], or `None` when the pair is unknown.
    fn correlation(&self, a: &str, b: &str) -> Option<Decimal>;
}

/// Static symmetric correlation table.
#[derive(Debug, Clone, Default)]
pub struct CorrelationMatrix {
    pairs: HashMap<(String, String), Decimal>,
}

impl CorrelationMatrix {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_pair(mut self, a: &str, b: &str, coefficient: Decimal) -> Self {
        self.insert(a, b, coefficient);
        self
    }

    pub fn insert(&mut self, a: &str, b: &str, coefficient: Decimal) {
        self.pairs.insert(Self::key(a, b), coefficient);
    }

    pub fn len(&self) -> usize {
        self.pairs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pairs.is_empty()
    }

    fn key(a: &str, b: &str) -> (String, String) {
        if a <= b {
            (a.to_string(), b.to_string())
        } else {
            (b.to_string(), a.to_string())
        }
    }
}

impl CorrelationSource for CorrelationMatrix {
    fn correlation(&self, a: &str, b: &str) -> Option<Decimal> {
        if a == b {
            return Some(Decimal::ONE);
        }
        self.pairs.get(&Self::key(a, b)).copied()
    }
}

/// Layered pre-trade validation.
///
/// Checks run in a fixed order and stop at the first failure, so a given
/// account state always yields the same rejection reason:
///
/// 0. Account halted
/// 1. Trading hours
/// 2. News blackout
/// 3. Daily / weekly loss budget
/// 4. Open positions, per-symbol positions, duplicate strategy position
/// 5. Correlation with held symbols
pub struct RiskGate {
    limits: RiskLimits,
    policy: GatePolicy,
    calendar: Arc<SessionCalendar>,
    correlations: Arc<dyn CorrelationSource>,
    events: EventSink,
}

impl RiskGate {
    pub fn new(limits: RiskLimits, calendar: Arc<SessionCalendar>, policy: GatePolicy) -> Self {
        Self {
            limits,
            policy,
            calendar,
            correlations: Arc::new(CorrelationMatrix::new()),
            events: EventSink::log_only(),
        }
    }

    pub fn with_correlations(mut self, source: Arc<dyn CorrelationSource>) -> Self {
        self.correlations = source;
        self
    }

    pub fn with_events(mut self, events: EventSink) -> Self {
        self.events = events;
        self
    }

    pub fn limits(&self) -> &RiskLimits {
        &self.limits
    }

    pub fn policy(&self) -> &GatePolicy {
        &self.policy
    }

    pub fn calendar(&self) -> &SessionCalendar {
        &self.calendar
    }

    /// Validate `intent` against `account`, emitting a rejection event on
    /// failure.
    pub fn validate(&self, intent: &OrderIntent, account: &AccountView) -> RiskCheckResult {
        match self.first_violation(intent, account) {
            None => {
                debug!(
                    strategy_id = %intent.strategy_id,
                    symbol = %intent.symbol,
                    quantity = %intent.quantity,
                    "risk gate approved"
                );
                RiskCheckResult::Approved
            }
            Some(rejection) => {
                self.events.emit(
                    intent.timestamp,
                    Component::RiskGate,
                    EventKind::Rejection,
                    format!(
                        "{} {} {} rejected [{}]: {}",
                        intent.strategy_id,
                        intent.side,
                        intent.symbol,
                        rejection.code(),
                        rejection
                    ),
                );
                RiskCheckResult::Rejected(rejection)
            }
        }
    }

    fn first_violation(&self, intent: &OrderIntent, account: &AccountView) -> Option<RiskRejection> {
        // 0. Halted account
        if account.halted {
            return Some(RiskRejection::AccountHalted {
                reason: "ledger halted".to_string(),
            });
        }

        // 1. Trading hours
        if self.policy.trading_hours_enabled && !self.session_open(intent) {
            return Some(RiskRejection::OutsideSessionWindow {
                at: intent.timestamp,
            });
        }

        // 2. News blackout
        if self.policy.avoid_news {
            if let Some(event) = self
                .calendar
                .blackout_event(intent.timestamp, self.policy.news_min_impact)
            {
                return Some(RiskRejection::NewsBlackout {
                    event: event.title.clone(),
                    scheduled_at: event.scheduled_at,
                });
            }
        }

        // 3. Loss budgets
        if let Some(rejection) = account.check_loss_limits(&self.limits, intent.risk_amount()) {
            return Some(rejection);
        }

        // 4. Position counts
        if let Some(rejection) =
            account.check_position_limits(&self.limits, &intent.strategy_id, &intent.symbol)
        {
            return Some(rejection);
        }

        // 5. Correlation
        self.check_correlation(intent, account)
    }

    fn session_open(&self, intent: &OrderIntent) -> bool {
        if self.policy.allowed_sessions.is_empty() {
            return self.calendar.any_session_active(intent.timestamp);
        }
        self.policy
            .allowed_sessions
            .iter()
            .any(|name| self.calendar.is_session_active(name, intent.timestamp))
    }

    fn check_correlation(&self, intent: &OrderIntent, account: &AccountView) -> Option<RiskRejection> {
        let session = match self.policy.correlation_scope {
            CorrelationScope::Global => None,
            CorrelationScope::PerSession => intent.session.as_deref(),
        };

        let threshold = self.limits.correlation_threshold;
        account
            .held_symbols(session)
            .into_iter()
            .filter(|held| *held != intent.symbol)
            .find_map(|held| {
                let correlation = self.correlations.correlation(&intent.symbol, held)?;
                (correlation.abs() > threshold).then(|| RiskRejection::CorrelationLimitExceeded {
                    symbol: intent.symbol.clone(),
                    held: held.to_string(),
                    correlation,
                    threshold,
                })
            })
    }
}

/// Shared handle to the risk gate.
pub type SharedRiskGate = Arc<RiskGate>;
