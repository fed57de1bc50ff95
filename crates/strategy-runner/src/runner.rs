//! Per-strategy state machine.
//!
//! ```text
//!          signal            approved + reserved          fill
//!  Idle ────────> Evaluating ───────────────> AwaitingFill ─────> InPosition
//!   ^  ^              │ rejected                  │ cancel/timeout     │ exit / hard stop
//!   │  └──────────────┴───────────────────────────┘                    v
//!   └───────────────────────────────────────────────────────────── Closing
//!                               close confirmed
//! ```
//!
//! `Idle -> Disabled` is administrative. A disable received in any other
//! state takes effect the next time the runner is back in `Idle`.

use std::fmt;
use std::time::Duration;

use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::Serialize;
use tokio::sync::{mpsc, watch};
use tracing::{debug, error, info, trace, warn};

use connector_core::OrderRequest;
use execution_core::{
    generate_client_order_id, OrderIntent, OrderPurpose, PendingOrder, Position, PositionId,
};
use metrics::{Component, EventKind};
use model::Tick;
use strategy_core::{Action, BoxedStrategy, EntrySignal, OrderUpdate, StrategyContext};

use crate::config::StrategySettings;
use crate::error::RunnerError;
use crate::risk_gate::RiskCheckResult;
use crate::services::EngineServices;

/// Used when a configured fill timeout does not fit a chrono duration.
const FALLBACK_FILL_TIMEOUT_SECS: i64 = 30;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RunnerState {
    Idle,
    Evaluating,
    AwaitingFill,
    InPosition,
    Closing,
    Disabled,
}

impl fmt::Display for RunnerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Idle => "idle",
            Self::Evaluating => "evaluating",
            Self::AwaitingFill => "awaiting_fill",
            Self::InPosition => "in_position",
            Self::Closing => "closing",
            Self::Disabled => "disabled",
        };
        f.write_str(name)
    }
}

/// Observable state of one strategy instance.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StrategyState {
    pub strategy_id: String,
    pub state: RunnerState,
    pub last_signal_at: Option<DateTime<Utc>>,
    /// Entries filled during `trading_day`.
    pub trades_today: u32,
    /// P&L of this strategy's positions closed during `trading_day`.
    pub realized_today: Decimal,
    pub trading_day: Option<NaiveDate>,
    /// Why the last entry was refused or failed.
    pub last_rejection: Option<String>,
    pub disable_requested: bool,
    pub position_id: Option<PositionId>,
}

impl StrategyState {
    fn new(strategy_id: &str) -> Self {
        Self {
            strategy_id: strategy_id.to_string(),
            state: RunnerState::Idle,
            last_signal_at: None,
            trades_today: 0,
            realized_today: Decimal::ZERO,
            trading_day: None,
            last_rejection: None,
            disable_requested: false,
            position_id: None,
        }
    }
}

/// Runtime settings for one runner.
#[derive(Debug, Clone, PartialEq)]
pub struct RunnerSettings {
    /// Overrides both the strategy's and the account's risk percent.
    pub risk_percent: Option<Decimal>,
    /// Overrides the coordinator default and the broker's fill timeout.
    pub fill_timeout: Option<Duration>,
    pub max_trades_per_day: u32,
    /// Stop entering for the day once this strategy's realized P&L reaches
    /// this percent of the account's start-of-day equity.
    pub daily_profit_target_percent: Option<Decimal>,
    /// No new entries this close to the session's end.
    pub entry_cutoff: Option<Duration>,
    /// Flatten open positions this close to the session's end.
    pub flatten_before_close: Option<Duration>,
}

impl Default for RunnerSettings {
    fn default() -> Self {
        Self {
            risk_percent: None,
            fill_timeout: None,
            max_trades_per_day: 5,
            daily_profit_target_percent: None,
            entry_cutoff: None,
            flatten_before_close: None,
        }
    }
}

impl RunnerSettings {
    pub fn with_risk_percent(mut self, percent: Decimal) -> Self {
        self.risk_percent = Some(percent);
        self
    }

    pub fn with_fill_timeout(mut self, timeout: Duration) -> Self {
        self.fill_timeout = Some(timeout);
        self
    }

    pub fn with_max_trades_per_day(mut self, max: u32) -> Self {
        self.max_trades_per_day = max;
        self
    }

    /// Intraday profile: 5 trades, 2% profit target, no entries in the
    /// last 15 minutes of the session, flat 5 minutes before it ends.
    pub fn day_trading() -> Self {
        Self::default()
            .with_max_trades_per_day(5)
            .with_daily_profit_target(Decimal::TWO)
            .with_entry_cutoff(Duration::from_secs(15 * 60))
            .with_flatten_before_close(Duration::from_secs(5 * 60))
    }

    pub fn with_daily_profit_target(mut self, percent: Decimal) -> Self {
        self.daily_profit_target_percent = Some(percent);
        self
    }

    pub fn with_entry_cutoff(mut self, before_close: Duration) -> Self {
        self.entry_cutoff = Some(before_close);
        self
    }

    pub fn with_flatten_before_close(mut self, before_close: Duration) -> Self {
        self.flatten_before_close = Some(before_close);
        self
    }
}

impl From<&StrategySettings> for RunnerSettings {
    fn from(settings: &StrategySettings) -> Self {
        Self {
            risk_percent: settings.risk_percent,
            fill_timeout: settings.fill_timeout_ms.map(Duration::from_millis),
            max_trades_per_day: settings.max_trades_per_day,
            daily_profit_target_percent: settings.daily_profit_target_percent,
            entry_cutoff: settings
                .entry_cutoff_minutes
                .map(|m| Duration::from_secs(m * 60)),
            flatten_before_close: settings
                .flatten_before_close_minutes
                .map(|m| Duration::from_secs(m * 60)),
        }
    }
}

/// Order outcome routed to a runner after the ledger applied it.
#[derive(Debug, Clone, PartialEq)]
pub enum OrderNotice {
    /// Entry filled and committed.
    Filled {
        client_order_id: String,
        position: Position,
    },
    /// Entry canceled, rejected or timed out; the reservation is released.
    EntryFailed {
        client_order_id: String,
        update: OrderUpdate,
    },
    /// Exit filled and the position closed.
    Closed {
        client_order_id: String,
        position_id: PositionId,
        exit_price: Decimal,
        pnl: Decimal,
    },
    /// Exit canceled, rejected or timed out; the position is still open.
    ExitFailed {
        client_order_id: String,
        update: OrderUpdate,
    },
}

/// Inbound message for a runner task.
#[derive(Debug, Clone, PartialEq)]
pub enum RunnerMessage {
    Tick(Tick),
    Order(OrderNotice),
    Disable,
    Enable,
}

/// Drives one strategy instance.
///
/// The runner owns its state and is only ever touched by its own task, so
/// no locking is needed here. Account state lives in the shared ledger.
pub struct StrategyRunner {
    strategy: BoxedStrategy,
    settings: RunnerSettings,
    services: EngineServices,
    state: StrategyState,
    status_tx: watch::Sender<StrategyState>,
    entry_order: Option<String>,
    exit_order: Option<String>,
    position: Option<Position>,
}

impl StrategyRunner {
    pub fn new(strategy: BoxedStrategy, settings: RunnerSettings, services: EngineServices) -> Self {
        let state = StrategyState::new(strategy.id());
        let (status_tx, _) = watch::channel(state.clone());
        Self {
            strategy,
            settings,
            services,
            state,
            status_tx,
            entry_order: None,
            exit_order: None,
            position: None,
        }
    }

    pub fn strategy_id(&self) -> &str {
        &self.state.strategy_id
    }

    pub fn state(&self) -> &StrategyState {
        &self.state
    }

    /// Receiver that sees every published state change.
    pub fn status(&self) -> watch::Receiver<StrategyState> {
        self.status_tx.subscribe()
    }

    pub fn symbols(&self) -> Option<Vec<String>> {
        self.strategy.symbols().map(<[String]>::to_vec)
    }

    /// Run until the inbox closes.
    pub async fn run(mut self, mut inbox: mpsc::Receiver<RunnerMessage>) -> Result<(), RunnerError> {
        let ctx = self.context(Utc::now());
        if let Err(e) = self.strategy.on_start(&ctx).await {
            error!(strategy_id = %self.strategy_id(), error = %e, "strategy start failed");
            return Err(e.into());
        }
        info!(strategy_id = %self.strategy_id(), "strategy runner started");

        while let Some(message) = inbox.recv().await {
            self.handle(message).await;
        }

        let ctx = self.context(Utc::now());
        if let Err(e) = self.strategy.on_stop(&ctx).await {
            error!(strategy_id = %self.strategy_id(), error = %e, "strategy stop failed");
        }
        info!(
            strategy_id = %self.strategy_id(),
            state = %self.state.state,
            trades_today = self.state.trades_today,
            "strategy runner stopped"
        );
        Ok(())
    }

    /// Apply one message.
    pub async fn handle(&mut self, message: RunnerMessage) {
        match message {
            RunnerMessage::Tick(tick) => self.on_tick(tick).await,
            RunnerMessage::Order(notice) => self.on_order_notice(notice).await,
            RunnerMessage::Disable => self.disable(),
            RunnerMessage::Enable => self.enable(),
        }
    }

    async fn on_tick(&mut self, tick: Tick) {
        self.roll_day(tick.timestamp);

        match self.state.state {
            RunnerState::Idle => self.evaluate_entry(&tick).await,
            RunnerState::InPosition => self.evaluate_exit(&tick).await,
            other => trace!(strategy_id = %self.strategy_id(), state = %other, "tick ignored"),
        }
    }

    /// Reset the daily counters when a later trading day starts. Ticks from
    /// an earlier day never move the runner back.
    fn roll_day(&mut self, at: DateTime<Utc>) {
        let day = self.services.calendar.trading_day(at);
        match self.state.trading_day {
            Some(current) if day <= current => {
                if day < current {
                    trace!(
                        strategy_id = %self.strategy_id(),
                        current = %current,
                        stale = %day,
                        "tick from an earlier trading day"
                    );
                }
            }
            previous => {
                if previous.is_some() {
                    debug!(
                        strategy_id = %self.strategy_id(),
                        day = %day,
                        trades = self.state.trades_today,
                        "trading day changed, resetting trade count"
                    );
                }
                self.state.trading_day = Some(day);
                self.state.trades_today = 0;
                self.state.realized_today = Decimal::ZERO;
                self.publish();
            }
        }
    }

    async fn evaluate_entry(&mut self, tick: &Tick) {
        let ctx = self.context(tick.timestamp);
        let action = match self.strategy.on_tick(tick, &ctx).await {
            Ok(action) => action,
            Err(e) => {
                error!(strategy_id = %self.strategy_id(), error = %e, "strategy error on tick");
                return;
            }
        };

        match action {
            Action::Hold => {}
            Action::Exit { .. } => {
                trace!(strategy_id = %self.strategy_id(), "exit while flat ignored");
            }
            Action::Enter(signal) => {
                self.services.metrics.inc_signals_generated();
                self.state.last_signal_at = Some(tick.timestamp);

                if let Some(reason) = self.entry_blocked(tick.timestamp) {
                    debug!(
                        strategy_id = %self.strategy_id(),
                        trades_today = self.state.trades_today,
                        realized_today = %self.state.realized_today,
                        reason = %reason,
                        "entry skipped"
                    );
                    self.state.last_rejection = Some(reason);
                    self.publish();
                    return;
                }

                self.transition(RunnerState::Evaluating, tick.timestamp);
                self.enter(signal, tick).await;
            }
        }
    }

    /// Day-trading limits the runner enforces before sizing.
    fn entry_blocked(&self, at: DateTime<Utc>) -> Option<String> {
        if self.state.trades_today >= self.settings.max_trades_per_day {
            return Some(format!(
                "daily trade limit reached ({}/{})",
                self.state.trades_today, self.settings.max_trades_per_day
            ));
        }

        if let Some(percent) = self.settings.daily_profit_target_percent {
            let start = self.services.ledger.snapshot().start_of_day_equity;
            let target = start
                .checked_mul(percent)
                .and_then(|v| v.checked_div(Decimal::ONE_HUNDRED));
            if let Some(target) = target.filter(|t| self.state.realized_today >= *t) {
                return Some(format!(
                    "daily profit target reached ({} >= {})",
                    self.state.realized_today, target
                ));
            }
        }

        let cutoff = self.settings.entry_cutoff.and_then(|d| chrono::Duration::from_std(d).ok())?;
        let remaining = self.time_to_close(at)?;
        (remaining < cutoff).then(|| format!("session closes in {}s", remaining.num_seconds()))
    }

    /// Size, validate, reserve and submit. Leaves the runner in
    /// `AwaitingFill` on success and `Idle` otherwise.
    async fn enter(&mut self, signal: EntrySignal, tick: &Tick) {
        let at = tick.timestamp;
        let quote = if signal.symbol == tick.symbol {
            Some(tick.clone())
        } else {
            self.services.market_state.last_tick(&signal.symbol)
        };
        let Some(quote) = quote else {
            self.refuse(format!("no quote for {}", signal.symbol), at).await;
            return;
        };
        let reference_price = quote.entry_price(signal.side);

        let account = self.services.ledger.snapshot();
        let quantity = match self.services.sizer.compute_size(
            &account,
            self.services.gate.limits(),
            &signal.symbol,
            signal.stop_loss_distance,
            self.risk_percent(),
        ) {
            Ok(quantity) => quantity,
            Err(e) => {
                self.services.events.emit(
                    at,
                    Component::PositionSizer,
                    EventKind::Rejection,
                    format!("{} {} {}: {}", self.strategy_id(), signal.side, signal.symbol, e),
                );
                self.refuse(e.to_string(), at).await;
                return;
            }
        };

        let mut intent = OrderIntent::new(
            self.strategy_id(),
            &signal.symbol,
            signal.side,
            quantity,
            reference_price,
            signal.stop_loss_distance,
            at,
        );
        if let Some(distance) = signal.take_profit_distance {
            intent = intent.with_take_profit(distance);
        }
        if let Some(session) = self.session_tag(at) {
            intent = intent.with_session(session);
        }

        match self.services.gate.validate(&intent, &account) {
            RiskCheckResult::Approved => intent.approve(),
            RiskCheckResult::Rejected(reason) => {
                intent.reject(reason.clone());
                self.refuse(reason.to_string(), at).await;
                return;
            }
        }

        let reservation = match self.services.ledger.reserve_exposure(&intent) {
            Ok(reservation) => reservation,
            Err(e) => {
                match e.as_rejection() {
                    Some(reason) => self.refuse(reason.to_string(), at).await,
                    None => {
                        error!(strategy_id = %self.strategy_id(), error = %e, "reservation failed");
                        self.refuse(e.to_string(), at).await;
                    }
                }
                return;
            }
        };
        self.services.metrics.inc_orders_approved();

        let client_order_id = generate_client_order_id(&self.services.client_order_prefix);
        let now = Utc::now();
        self.services.registry.register(PendingOrder::new(
            client_order_id.clone(),
            OrderPurpose::Entry {
                reservation_id: reservation.id,
            },
            self.strategy_id(),
            &intent.symbol,
            intent.side,
            intent.quantity,
            now,
            now + self.fill_timeout(),
        ));
        self.entry_order = Some(client_order_id.clone());
        self.state.last_rejection = None;
        self.transition(RunnerState::AwaitingFill, at);

        let request = OrderRequest::market(&client_order_id, &intent.symbol, intent.side, intent.quantity)
            .with_stop_loss(intent.stop_price())
            .with_take_profit(intent.take_profit_price())
            .with_reference_price(reference_price);

        info!(
            strategy_id = %self.strategy_id(),
            client_order_id = %client_order_id,
            symbol = %intent.symbol,
            side = %intent.side,
            qty = %intent.quantity,
            stop = %intent.stop_price(),
            reason = %signal.reason,
            "submitting entry"
        );

        match self.services.broker.submit_order(request).await {
            Ok(handle) => {
                if !self
                    .services
                    .registry
                    .acknowledge(&handle.client_order_id, &handle.broker_order_id)
                {
                    debug!(client_order_id = %client_order_id, "entry resolved before submit response");
                }
            }
            Err(e) => {
                // Nothing reached the broker: undo the reservation
                self.services.registry.take(&client_order_id);
                self.services.ledger.release_reservation(reservation.id, at);
                self.services.metrics.inc_reservations_released();
                self.services.metrics.inc_broker_errors();
                self.services.events.emit(
                    at,
                    Component::StrategyRunner,
                    EventKind::BrokerFailure,
                    format!("{} entry {} failed: {}", self.strategy_id(), client_order_id, e),
                );
                self.entry_order = None;
                self.state.last_rejection = Some(e.to_string());
                self.transition(RunnerState::Idle, at);
                self.notify(OrderUpdate::Rejected { reason: e.to_string() }, at).await;
            }
        }
    }

    async fn refuse(&mut self, reason: String, at: DateTime<Utc>) {
        debug!(strategy_id = %self.strategy_id(), reason = %reason, "entry refused");
        self.services.metrics.inc_orders_rejected();
        self.state.last_rejection = Some(reason.clone());
        self.transition(RunnerState::Idle, at);
        self.notify(OrderUpdate::Refused { reason }, at).await;
    }

    async fn evaluate_exit(&mut self, tick: &Tick) {
        let Some(position) = self.position.as_ref().map(|p| p.id) else {
            warn!(strategy_id = %self.strategy_id(), "in position without a position, resetting");
            self.transition(RunnerState::Idle, tick.timestamp);
            return;
        };
        // Pick up the ledger's mark-to-market
        if let Some(current) = self.services.ledger.position(position) {
            self.position = Some(current);
        }
        let Some(position) = self.position.clone() else {
            return;
        };

        if tick.symbol == position.symbol && position.stop_hit(tick.exit_price(position.side)) {
            warn!(
                strategy_id = %self.strategy_id(),
                position = %position.id,
                stop = %position.stop_price(),
                price = %tick.exit_price(position.side),
                "hard stop hit"
            );
            self.close(position, "hard stop", tick.timestamp).await;
            return;
        }

        let flatten_window = self
            .settings
            .flatten_before_close
            .and_then(|d| chrono::Duration::from_std(d).ok());
        if let (Some(window), Some(remaining)) = (flatten_window, self.time_to_close(tick.timestamp)) {
            if remaining < window {
                info!(
                    strategy_id = %self.strategy_id(),
                    position = %position.id,
                    remaining_secs = remaining.num_seconds(),
                    "session closing, flattening"
                );
                self.close(position, "session close", tick.timestamp).await;
                return;
            }
        }

        let ctx = self.context(tick.timestamp);
        match self.strategy.on_tick(tick, &ctx).await {
            Ok(Action::Exit { reason }) => self.close(position, &reason, tick.timestamp).await,
            Ok(Action::Enter(_)) => {
                trace!(strategy_id = %self.strategy_id(), "entry while in position ignored");
            }
            Ok(Action::Hold) => {}
            Err(e) => {
                error!(strategy_id = %self.strategy_id(), error = %e, "strategy error on tick");
            }
        }
    }

    async fn close(&mut self, position: Position, reason: &str, at: DateTime<Utc>) {
        let exit_side = position.side.opposite();
        let client_order_id = generate_client_order_id(&self.services.client_order_prefix);
        let now = Utc::now();
        self.services.registry.register(PendingOrder::new(
            client_order_id.clone(),
            OrderPurpose::Exit {
                position_id: position.id,
            },
            self.strategy_id(),
            &position.symbol,
            exit_side,
            position.quantity,
            now,
            now + self.fill_timeout(),
        ));
        self.exit_order = Some(client_order_id.clone());
        self.transition(RunnerState::Closing, at);

        let mut request =
            OrderRequest::market(&client_order_id, &position.symbol, exit_side, position.quantity);
        if let Some(quote) = self.services.market_state.last_tick(&position.symbol) {
            request = request.with_reference_price(quote.exit_price(position.side));
        }

        info!(
            strategy_id = %self.strategy_id(),
            client_order_id = %client_order_id,
            position = %position.id,
            reason = %reason,
            "submitting exit"
        );

        match self.services.broker.submit_order(request).await {
            Ok(handle) => {
                self.services
                    .registry
                    .acknowledge(&handle.client_order_id, &handle.broker_order_id);
            }
            Err(e) => {
                self.services.registry.take(&client_order_id);
                self.services.metrics.inc_broker_errors();
                self.services.events.emit(
                    at,
                    Component::StrategyRunner,
                    EventKind::BrokerFailure,
                    format!("{} exit {} failed: {}", self.strategy_id(), client_order_id, e),
                );
                self.exit_order = None;
                self.transition(RunnerState::InPosition, at);
                self.notify(OrderUpdate::Rejected { reason: e.to_string() }, at).await;
            }
        }
    }

    async fn on_order_notice(&mut self, notice: OrderNotice) {
        let at = Utc::now();
        match notice {
            OrderNotice::Filled {
                client_order_id,
                position,
            } => {
                if self.entry_order.as_deref() != Some(client_order_id.as_str()) {
                    warn!(
                        strategy_id = %self.strategy_id(),
                        client_order_id = %client_order_id,
                        "fill for an order this runner is not awaiting"
                    );
                    return;
                }
                self.entry_order = None;
                self.state.trades_today += 1;
                self.state.position_id = Some(position.id);
                let update = OrderUpdate::Filled {
                    symbol: position.symbol.clone(),
                    side: position.side,
                    price: position.entry_price,
                    quantity: position.quantity,
                };
                self.position = Some(position);
                self.transition(RunnerState::InPosition, at);
                self.notify(update, at).await;
            }
            OrderNotice::EntryFailed {
                client_order_id,
                update,
            } => {
                if self.entry_order.as_deref() != Some(client_order_id.as_str()) {
                    debug!(client_order_id = %client_order_id, "stale entry failure ignored");
                    return;
                }
                self.entry_order = None;
                self.state.last_rejection = Some(describe(&update));
                self.transition(RunnerState::Idle, at);
                self.notify(update, at).await;
            }
            OrderNotice::Closed {
                client_order_id,
                position_id,
                exit_price,
                pnl,
            } => {
                if self.position.as_ref().map(|p| p.id) != Some(position_id) {
                    warn!(
                        strategy_id = %self.strategy_id(),
                        position = %position_id,
                        "close for a position this runner does not hold"
                    );
                    return;
                }
                info!(
                    strategy_id = %self.strategy_id(),
                    client_order_id = %client_order_id,
                    position = %position_id,
                    exit_price = %exit_price,
                    pnl = %pnl,
                    "position closed"
                );
                self.exit_order = None;
                self.position = None;
                self.state.position_id = None;
                self.state.realized_today += pnl;
                self.transition(RunnerState::Idle, at);
                self.notify(OrderUpdate::Closed { exit_price, pnl }, at).await;
            }
            OrderNotice::ExitFailed {
                client_order_id,
                update,
            } => {
                if self.exit_order.as_deref() != Some(client_order_id.as_str()) {
                    debug!(client_order_id = %client_order_id, "stale exit failure ignored");
                    return;
                }
                self.exit_order = None;
                self.transition(RunnerState::InPosition, at);
                self.notify(update, at).await;
            }
        }
    }

    fn disable(&mut self) {
        match self.state.state {
            RunnerState::Idle => self.transition(RunnerState::Disabled, Utc::now()),
            RunnerState::Disabled => {}
            other => {
                info!(strategy_id = %self.strategy_id(), state = %other, "disable deferred until idle");
                self.state.disable_requested = true;
                self.publish();
            }
        }
    }

    fn enable(&mut self) {
        self.state.disable_requested = false;
        if self.state.state == RunnerState::Disabled {
            self.transition(RunnerState::Idle, Utc::now());
        } else {
            self.publish();
        }
    }

    fn transition(&mut self, to: RunnerState, at: DateTime<Utc>) {
        let to = if to == RunnerState::Idle && self.state.disable_requested {
            self.state.disable_requested = false;
            RunnerState::Disabled
        } else {
            to
        };

        let from = self.state.state;
        if from != to {
            self.state.state = to;
            self.services.events.emit(
                at,
                Component::StrategyRunner,
                EventKind::StateTransition,
                format!("{}: {} -> {}", self.state.strategy_id, from, to),
            );
        }
        self.publish();
    }

    fn publish(&self) {
        self.status_tx.send_replace(self.state.clone());
    }

    async fn notify(&mut self, update: OrderUpdate, at: DateTime<Utc>) {
        let ctx = self.context(at);
        if let Err(e) = self.strategy.on_order_update(&update, &ctx).await {
            error!(strategy_id = %self.strategy_id(), error = %e, "strategy error on order update");
        }
    }

    fn context(&self, at: DateTime<Utc>) -> StrategyContext {
        StrategyContext::new(at, self.services.market_state.clone())
            .with_position(self.position.clone())
            .with_active_sessions(self.services.calendar.active_sessions(at))
    }

    fn risk_percent(&self) -> Option<Decimal> {
        self.settings
            .risk_percent
            .or_else(|| self.strategy.risk_percent())
    }

    fn fill_timeout(&self) -> chrono::Duration {
        let timeout = self
            .settings
            .fill_timeout
            .or(self.services.default_fill_timeout)
            .unwrap_or_else(|| self.services.broker.fill_timeout());
        chrono::Duration::from_std(timeout)
            .unwrap_or_else(|_| chrono::Duration::seconds(FALLBACK_FILL_TIMEOUT_SECS))
    }

    /// Time until the strategy's session closes. Strategies without a
    /// session trade until the last open session closes.
    fn time_to_close(&self, at: DateTime<Utc>) -> Option<chrono::Duration> {
        let calendar = &self.services.calendar;
        match self.strategy.session() {
            Some(name) => calendar.time_until_close(name, at),
            None => calendar
                .active_sessions(at)
                .iter()
                .filter_map(|name| calendar.time_until_close(name, at))
                .max(),
        }
    }

    /// The strategy's own session, else the first session open at `at`.
    fn session_tag(&self, at: DateTime<Utc>) -> Option<String> {
        self.strategy
            .session()
            .map(str::to_string)
            .or_else(|| self.services.calendar.active_sessions(at).into_iter().next())
    }
}

fn describe(update: &OrderUpdate) -> String {
    match update {
        OrderUpdate::Refused { reason } | OrderUpdate::Rejected { reason } => reason.clone(),
        OrderUpdate::Canceled => "canceled".to_string(),
        OrderUpdate::TimedOut => "fill timeout".to_string(),
        other => format!("{other:?}"),
    }
}
