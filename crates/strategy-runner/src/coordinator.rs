//! Top-level orchestration for one account.
//!
//! The coordinator owns the strategy runners, fans ticks out to them,
//! applies broker events to the ledger before telling the owning runner, and
//! runs the fill-timeout watchdog.
//!
//! ```text
//!  market_rx ──> coordinator ──try_send──> runner task (per strategy)
//!                    ^                          │ submit_order
//!  broker_rx ────────┘                          v
//!     ^                                    BrokerAdapter
//!     └─────────────── fills / cancels ─────────┘
//! ```

use std::collections::BTreeMap;
use std::time::Duration;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};

use connector_core::{BrokerEvent, BrokerEventReceiver, MarketEventReceiver, OrderHandle, OrderRequest};
use execution_core::{
    generate_client_order_id, CommitOutcome, LedgerError, OrderPurpose, PendingOrder, PositionId,
    ReleaseOutcome, ReservationId, TradingPeriod,
};
use metrics::{Component, EventKind};
use model::MarketEvent;
use strategy_core::{BoxedStrategy, OrderUpdate};

use crate::config::EngineConfig;
use crate::error::RunnerError;
use crate::runner::{OrderNotice, RunnerMessage, RunnerSettings, RunnerState, StrategyRunner, StrategyState};
use crate::services::EngineServices;

/// How long timed-out orders stay correlatable for late fills.
const TIMED_OUT_RETENTION_HOURS: i64 = 24;

/// Configuration for the execution coordinator.
#[derive(Debug, Clone)]
pub struct CoordinatorConfig {
    /// How often the watchdog scans for orders past their deadline.
    pub watchdog_interval: Duration,
    /// Capacity of each runner's inbox. Ticks are dropped when it is full.
    pub channel_capacity: usize,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            watchdog_interval: Duration::from_secs(1),
            channel_capacity: 1_024,
        }
    }
}

impl From<&EngineConfig> for CoordinatorConfig {
    fn from(config: &EngineConfig) -> Self {
        Self {
            watchdog_interval: config.watchdog_interval(),
            channel_capacity: config.coordinator.channel_capacity,
        }
    }
}

/// Administrative requests accepted while the coordinator runs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ControlCommand {
    Disable(String),
    Enable(String),
    /// Halt new entries on the account.
    Halt(String),
    Resume,
}

/// Cloneable handle for sending `ControlCommand`s to a running coordinator.
#[derive(Debug, Clone)]
pub struct CoordinatorControl {
    tx: mpsc::Sender<ControlCommand>,
}

impl CoordinatorControl {
    pub async fn disable_strategy(&self, strategy_id: impl Into<String>) -> Result<(), RunnerError> {
        self.send(ControlCommand::Disable(strategy_id.into())).await
    }

    pub async fn enable_strategy(&self, strategy_id: impl Into<String>) -> Result<(), RunnerError> {
        self.send(ControlCommand::Enable(strategy_id.into())).await
    }

    pub async fn halt(&self, reason: impl Into<String>) -> Result<(), RunnerError> {
        self.send(ControlCommand::Halt(reason.into())).await
    }

    pub async fn resume(&self) -> Result<(), RunnerError> {
        self.send(ControlCommand::Resume).await
    }

    async fn send(&self, command: ControlCommand) -> Result<(), RunnerError> {
        self.tx.send(command).await.map_err(|_| RunnerError::ChannelClosed)
    }
}

struct RunnerHandle {
    symbols: Option<Vec<String>>,
    tx: mpsc::Sender<RunnerMessage>,
    status: watch::Receiver<StrategyState>,
    task: JoinHandle<Result<(), RunnerError>>,
}

impl RunnerHandle {
    fn subscribes(&self, symbol: &str) -> bool {
        self.symbols
            .as_ref()
            .map_or(true, |symbols| symbols.iter().any(|s| s == symbol))
    }

    /// Idle from the coordinator's point of view: nothing queued and no
    /// order in flight.
    fn is_quiet(&self) -> bool {
        let queued = self.tx.max_capacity() - self.tx.capacity();
        let state = self.status.borrow().state;
        queued == 0
            && !matches!(
                state,
                RunnerState::Evaluating | RunnerState::AwaitingFill | RunnerState::Closing
            )
    }
}

/// Orchestrates all strategy runners of one account.
///
/// # Usage
///
/// ```rust,ignore
/// let mut coordinator = ExecutionCoordinator::new(services, CoordinatorConfig::default());
/// coordinator.add_strategy(Box::new(strategy), RunnerSettings::default())?;
///
/// let control = coordinator.control();
/// coordinator.run(market_rx, broker_rx, shutdown_rx).await?;
/// ```
pub struct ExecutionCoordinator {
    services: EngineServices,
    config: CoordinatorConfig,
    runners: BTreeMap<String, RunnerHandle>,
    control_tx: mpsc::Sender<ControlCommand>,
    control_rx: Option<mpsc::Receiver<ControlCommand>>,
}

impl ExecutionCoordinator {
    pub fn new(services: EngineServices, config: CoordinatorConfig) -> Self {
        let (control_tx, control_rx) = mpsc::channel(64);
        Self {
            services,
            config,
            runners: BTreeMap::new(),
            control_tx,
            control_rx: Some(control_rx),
        }
    }

    pub fn services(&self) -> &EngineServices {
        &self.services
    }

    pub fn control(&self) -> CoordinatorControl {
        CoordinatorControl {
            tx: self.control_tx.clone(),
        }
    }

    pub fn strategy_ids(&self) -> impl Iterator<Item = &str> {
        self.runners.keys().map(String::as_str)
    }

    /// State receiver for a registered strategy.
    pub fn status(&self, strategy_id: &str) -> Option<watch::Receiver<StrategyState>> {
        self.runners.get(strategy_id).map(|h| h.status.clone())
    }

    /// Register a strategy and spawn its runner task.
    ///
    /// Must be called from within a tokio runtime.
    pub fn add_strategy(
        &mut self,
        strategy: BoxedStrategy,
        settings: RunnerSettings,
    ) -> Result<watch::Receiver<StrategyState>, RunnerError> {
        let strategy_id = strategy.id().to_string();
        if self.runners.contains_key(&strategy_id) {
            return Err(RunnerError::DuplicateStrategy(strategy_id));
        }

        let runner = StrategyRunner::new(strategy, settings, self.services.clone());
        let status = runner.status();
        let symbols = runner.symbols();
        let (tx, rx) = mpsc::channel(self.config.channel_capacity.max(1));
        let task = tokio::spawn(runner.run(rx));

        info!(
            strategy_id = %strategy_id,
            symbols = ?symbols,
            "registered strategy"
        );
        self.runners.insert(
            strategy_id,
            RunnerHandle {
                symbols,
                tx,
                status: status.clone(),
                task,
            },
        );
        Ok(status)
    }

    /// Run until shutdown is signaled, or until market data ends and no
    /// order is left in flight.
    pub async fn run(
        mut self,
        mut market_rx: MarketEventReceiver,
        mut broker_rx: BrokerEventReceiver,
        mut shutdown_rx: watch::Receiver<bool>,
    ) -> Result<(), RunnerError> {
        let mut control_rx = self.control_rx.take().ok_or(RunnerError::ChannelClosed)?;
        let mut watchdog = tokio::time::interval(self.config.watchdog_interval);
        watchdog.set_missed_tick_behavior(MissedTickBehavior::Skip);

        let mut market_open = true;
        let mut broker_open = true;

        info!(
            account = %self.services.ledger.account_id(),
            strategy_count = self.runners.len(),
            broker = %self.services.broker.name(),
            "starting execution coordinator"
        );

        loop {
            tokio::select! {
                biased;

                // Shutdown signal (highest priority); a dropped sender also stops us
                changed = shutdown_rx.changed() => {
                    if changed.is_err() || *shutdown_rx.borrow() {
                        info!("shutdown signal received");
                        break;
                    }
                }

                // Broker events before market data so fills are never starved
                event = broker_rx.recv(), if broker_open => match event {
                    Some(event) => self.handle_broker_event(event).await,
                    None => {
                        warn!("broker event channel closed");
                        broker_open = false;
                    }
                },

                Some(command) = control_rx.recv() => {
                    self.handle_control(command).await;
                }

                _ = watchdog.tick() => {
                    self.check_timeouts().await;
                    if !market_open && self.is_drained() {
                        info!("market data ended and no orders in flight");
                        break;
                    }
                }

                event = market_rx.recv(), if market_open => match event {
                    Some(event) => self.dispatch_market_event(event),
                    None => {
                        info!("market data channel closed");
                        market_open = false;
                    }
                },
            }
        }

        self.shutdown().await;
        Ok(())
    }

    fn is_drained(&self) -> bool {
        self.services.registry.in_flight() == 0 && self.runners.values().all(RunnerHandle::is_quiet)
    }

    async fn shutdown(self) {
        let mut tasks = Vec::with_capacity(self.runners.len());
        for (strategy_id, handle) in self.runners {
            // Dropping the sender ends the runner loop
            drop(handle.tx);
            tasks.push((strategy_id, handle.task));
        }

        for (strategy_id, task) in tasks {
            match task.await {
                Ok(Ok(())) => debug!(strategy_id = %strategy_id, "runner finished"),
                Ok(Err(e)) => error!(strategy_id = %strategy_id, error = %e, "runner failed"),
                Err(e) => error!(strategy_id = %strategy_id, error = %e, "runner task panicked"),
            }
        }

        let snapshot = self.services.metrics.snapshot();
        let account = self.services.ledger.snapshot();
        info!(
            ticks = snapshot.ticks_received,
            approved = snapshot.orders_approved,
            rejected = snapshot.orders_rejected,
            closed = snapshot.positions_closed,
            equity = %account.equity,
            open_positions = account.positions.len(),
            "execution coordinator stopped"
        );
    }

    /// Update shared market state, roll the ledger and fan ticks out.
    pub fn dispatch_market_event(&self, event: MarketEvent) {
        self.services.market_state.apply(&event);

        let MarketEvent::Tick(tick) = event else {
            return;
        };
        self.services.metrics.inc_ticks_received();

        let at = tick.timestamp;
        let period = TradingPeriod {
            day: self.services.calendar.trading_day(at),
            week: self.services.calendar.trading_week(at),
        };
        self.services.ledger.roll_to(period, at);
        self.services.ledger.mark_to_market(&tick.symbol, tick.mid(), at);

        for (strategy_id, handle) in &self.runners {
            if !handle.subscribes(&tick.symbol) {
                continue;
            }
            match handle.tx.try_send(RunnerMessage::Tick(tick.clone())) {
                Ok(()) => {}
                Err(TrySendError::Full(_)) => {
                    warn!(strategy_id = %strategy_id, symbol = %tick.symbol, "runner inbox full, tick dropped");
                }
                Err(TrySendError::Closed(_)) => {
                    warn!(strategy_id = %strategy_id, "runner inbox closed");
                }
            }
        }
    }

    /// Apply a broker event to the ledger, then notify the runner.
    pub async fn handle_broker_event(&self, event: BrokerEvent) {
        let Some(order) = self.services.registry.take(event.client_order_id()) else {
            warn!(
                client_order_id = %event.client_order_id(),
                "broker event for unknown order"
            );
            return;
        };

        debug!(
            client_order_id = %order.client_order_id,
            purpose = %order.purpose,
            timed_out = order.timed_out,
            "broker event"
        );

        match order.purpose {
            OrderPurpose::Entry { reservation_id } => match event {
                BrokerEvent::Filled {
                    fill_price,
                    fill_qty,
                    at,
                    ..
                } => match self
                    .services
                    .ledger
                    .commit_reservation(reservation_id, fill_price, fill_qty, at)
                {
                    Ok(CommitOutcome::Opened(position)) => {
                        self.services.metrics.inc_reservations_committed();
                        self.notify(
                            &order.strategy_id,
                            OrderNotice::Filled {
                                client_order_id: order.client_order_id.clone(),
                                position,
                            },
                        )
                        .await;
                    }
                    Ok(CommitOutcome::AlreadyCommitted(position_id)) => {
                        debug!(position = %position_id, "duplicate fill ignored");
                    }
                    Ok(CommitOutcome::Released) => {
                        self.flatten_orphan(&order, fill_qty, fill_price, at).await;
                    }
                    Err(e) => {
                        error!(client_order_id = %order.client_order_id, error = %e, "commit failed");
                        self.services.ledger.release_reservation(reservation_id, at);
                        self.notify(
                            &order.strategy_id,
                            OrderNotice::EntryFailed {
                                client_order_id: order.client_order_id.clone(),
                                update: OrderUpdate::Rejected {
                                    reason: e.to_string(),
                                },
                            },
                        )
                        .await;
                    }
                },
                BrokerEvent::Canceled { at, .. } => {
                    self.release_entry(&order, reservation_id, OrderUpdate::Canceled, at)
                        .await;
                }
                BrokerEvent::Rejected { reason, at, .. } => {
                    self.services.metrics.inc_broker_errors();
                    self.release_entry(&order, reservation_id, OrderUpdate::Rejected { reason }, at)
                        .await;
                }
            },

            OrderPurpose::Exit { position_id } => match event {
                BrokerEvent::Filled {
                    fill_price,
                    fill_qty,
                    at,
                    ..
                } => {
                    let expected_pnl = self
                        .services
                        .ledger
                        .position(position_id)
                        .map(|p| p.pnl_at(fill_price));

                    match self.services.ledger.close_position_at(position_id, fill_price, at) {
                        Ok((_, pnl)) => {
                            self.services.metrics.inc_positions_closed();
                            self.notify_closed(&order, position_id, fill_price, pnl).await;
                        }
                        Err(LedgerError::UnknownPosition(_)) => {
                            // Already closed: this fill opened exposure nobody owns
                            self.flatten_orphan(&order, fill_qty, fill_price, at).await;
                        }
                        Err(LedgerError::InvariantViolation(reason)) => {
                            self.services.metrics.inc_positions_closed();
                            self.services.events.emit(
                                at,
                                Component::Coordinator,
                                EventKind::Alert,
                                format!("close of {position_id} broke a ledger invariant: {reason}"),
                            );
                            let pnl = expected_pnl.unwrap_or(Decimal::ZERO);
                            self.notify_closed(&order, position_id, fill_price, pnl).await;
                        }
                        Err(e) => {
                            error!(position = %position_id, error = %e, "close failed");
                            self.notify(
                                &order.strategy_id,
                                OrderNotice::ExitFailed {
                                    client_order_id: order.client_order_id.clone(),
                                    update: OrderUpdate::Rejected {
                                        reason: e.to_string(),
                                    },
                                },
                            )
                            .await;
                        }
                    }
                }
                BrokerEvent::Canceled { .. } => {
                    self.exit_failed(&order, OrderUpdate::Canceled).await;
                }
                BrokerEvent::Rejected { reason, .. } => {
                    self.services.metrics.inc_broker_errors();
                    self.exit_failed(&order, OrderUpdate::Rejected { reason }).await;
                }
            },

            OrderPurpose::Flatten => match event {
                BrokerEvent::Filled {
                    fill_price, fill_qty, ..
                } => info!(
                    client_order_id = %order.client_order_id,
                    symbol = %order.symbol,
                    qty = %fill_qty,
                    price = %fill_price,
                    "orphaned fill flattened"
                ),
                other => self.services.events.emit(
                    other.at(),
                    Component::Coordinator,
                    EventKind::Alert,
                    format!(
                        "flatten {} for {} {} {} did not fill: manual intervention required",
                        order.client_order_id, order.side, order.quantity, order.symbol
                    ),
                ),
            },
        }
    }

    async fn release_entry(
        &self,
        order: &PendingOrder,
        reservation_id: ReservationId,
        update: OrderUpdate,
        at: DateTime<Utc>,
    ) {
        if let ReleaseOutcome::Released(_) = self.services.ledger.release_reservation(reservation_id, at) {
            self.services.metrics.inc_reservations_released();
        }
        if order.timed_out {
            // The runner was already told when the order timed out
            return;
        }
        self.notify(
            &order.strategy_id,
            OrderNotice::EntryFailed {
                client_order_id: order.client_order_id.clone(),
                update,
            },
        )
        .await;
    }

    async fn exit_failed(&self, order: &PendingOrder, update: OrderUpdate) {
        if order.timed_out {
            return;
        }
        self.notify(
            &order.strategy_id,
            OrderNotice::ExitFailed {
                client_order_id: order.client_order_id.clone(),
                update,
            },
        )
        .await;
    }

    async fn notify_closed(
        &self,
        order: &PendingOrder,
        position_id: PositionId,
        exit_price: Decimal,
        pnl: Decimal,
    ) {
        self.notify(
            &order.strategy_id,
            OrderNotice::Closed {
                client_order_id: order.client_order_id.clone(),
                position_id,
                exit_price,
                pnl,
            },
        )
        .await;
    }

    /// Offset a fill nobody owns with an opposite market order.
    async fn flatten_orphan(
        &self,
        order: &PendingOrder,
        quantity: Decimal,
        price: Decimal,
        at: DateTime<Utc>,
    ) {
        let side = order.side.opposite();
        self.services.events.emit(
            at,
            Component::Coordinator,
            EventKind::Alert,
            format!(
                "orphaned fill {} {} {} @ {} on {}, flattening",
                order.side, quantity, order.symbol, price, order.client_order_id
            ),
        );

        let client_order_id = generate_client_order_id(&self.services.client_order_prefix);
        let now = Utc::now();
        let deadline = now
            + chrono::Duration::from_std(self.services.broker.fill_timeout())
                .unwrap_or_else(|_| chrono::Duration::seconds(30));
        self.services.registry.register(PendingOrder::new(
            client_order_id.clone(),
            OrderPurpose::Flatten,
            order.strategy_id.clone(),
            order.symbol.clone(),
            side,
            quantity,
            now,
            deadline,
        ));

        let mut request = OrderRequest::market(&client_order_id, &order.symbol, side, quantity);
        if let Some(tick) = self.services.market_state.last_tick(&order.symbol) {
            request = request.with_reference_price(tick.entry_price(side));
        }

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
                    Component::Coordinator,
                    EventKind::Alert,
                    format!("flatten {client_order_id} could not be submitted: {e}"),
                );
            }
        }
    }

    /// Give up on orders past their deadline: release entry reservations,
    /// tell the runners, and ask the broker to cancel.
    pub async fn check_timeouts(&self) {
        let now = Utc::now();
        for order in self.services.registry.expire(now) {
            warn!(
                client_order_id = %order.client_order_id,
                strategy_id = %order.strategy_id,
                purpose = %order.purpose,
                deadline = %order.deadline,
                "order fill timeout"
            );

            match order.purpose {
                OrderPurpose::Entry { reservation_id } => {
                    if let ReleaseOutcome::Released(_) =
                        self.services.ledger.release_reservation(reservation_id, now)
                    {
                        self.services.metrics.inc_reservations_released();
                    }
                    self.services.events.emit(
                        now,
                        Component::Watchdog,
                        EventKind::LedgerMutation,
                        format!(
                            "released {} for {} after fill timeout",
                            reservation_id, order.client_order_id
                        ),
                    );
                    self.notify(
                        &order.strategy_id,
                        OrderNotice::EntryFailed {
                            client_order_id: order.client_order_id.clone(),
                            update: OrderUpdate::TimedOut,
                        },
                    )
                    .await;
                }
                OrderPurpose::Exit { .. } => {
                    self.notify(
                        &order.strategy_id,
                        OrderNotice::ExitFailed {
                            client_order_id: order.client_order_id.clone(),
                            update: OrderUpdate::TimedOut,
                        },
                    )
                    .await;
                }
                OrderPurpose::Flatten => {
                    self.services.events.emit(
                        now,
                        Component::Watchdog,
                        EventKind::Alert,
                        format!("flatten {} timed out", order.client_order_id),
                    );
                }
            }

            // Best effort; the broker may already have filled it
            if let Some(broker_order_id) = order.broker_order_id.clone() {
                let broker = self.services.broker.clone();
                let handle = OrderHandle {
                    client_order_id: order.client_order_id.clone(),
                    broker_order_id,
                };
                tokio::spawn(async move {
                    if let Err(e) = broker.cancel_order(&handle).await {
                        debug!(client_order_id = %handle.client_order_id, error = %e, "cancel after timeout failed");
                    }
                });
            }
        }

        let purged = self
            .services
            .registry
            .purge(now - chrono::Duration::hours(TIMED_OUT_RETENTION_HOURS));
        if purged > 0 {
            debug!(purged, "purged timed-out orders");
        }
    }

    async fn handle_control(&self, command: ControlCommand) {
        let now = Utc::now();
        let result = match command {
            ControlCommand::Disable(strategy_id) => self.disable_strategy(&strategy_id).await,
            ControlCommand::Enable(strategy_id) => self.enable_strategy(&strategy_id).await,
            ControlCommand::Halt(reason) => {
                self.services.ledger.halt(reason, now);
                Ok(())
            }
            ControlCommand::Resume => self.services.ledger.resume(now).map_err(RunnerError::from),
        };
        if let Err(e) = result {
            warn!(error = %e, "control command failed");
        }
    }

    /// Disable a strategy. Takes effect once its runner is idle.
    pub async fn disable_strategy(&self, strategy_id: &str) -> Result<(), RunnerError> {
        self.send_admin(strategy_id, RunnerMessage::Disable).await
    }

    pub async fn enable_strategy(&self, strategy_id: &str) -> Result<(), RunnerError> {
        self.send_admin(strategy_id, RunnerMessage::Enable).await
    }

    async fn send_admin(&self, strategy_id: &str, message: RunnerMessage) -> Result<(), RunnerError> {
        let handle = self
            .runners
            .get(strategy_id)
            .ok_or_else(|| RunnerError::UnknownStrategy(strategy_id.to_string()))?;
        handle
            .tx
            .send(message)
            .await
            .map_err(|_| RunnerError::ChannelClosed)
    }

    async fn notify(&self, strategy_id: &str, notice: OrderNotice) {
        let Some(handle) = self.runners.get(strategy_id) else {
            warn!(strategy_id = %strategy_id, "order notice for unknown strategy");
            return;
        };
        // Order notices must not be dropped, unlike ticks
        if handle.tx.send(RunnerMessage::Order(notice)).await.is_err() {
            warn!(strategy_id = %strategy_id, "runner inbox closed, order notice lost");
        }
    }
}
