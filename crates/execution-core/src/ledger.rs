//! The account risk ledger.
//!
//! `RiskLedger` is the only writer of account state. Every mutation
//! (reserve, commit, release, close, rollover, mark-to-market) runs under a
//! single mutex and ends by publishing a fresh `AccountView`, so readers
//! never observe a half-applied reservation.

use std::collections::{BTreeSet, HashMap};
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Duration, IsoWeek, NaiveDate, Utc};
use metrics::{Component, EventKind, EventSink};
use model::Side;
use parking_lot::{Mutex, MutexGuard, RwLock};
use rust_decimal::Decimal;
use serde::Serialize;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::error::{LedgerError, RiskRejection};
use crate::limits::RiskLimits;
use crate::order::OrderIntent;
use crate::position::{Position, PositionId};

/// How long settled reservation ids are remembered for idempotency.
const SETTLED_RETENTION_HOURS: i64 = 24;

/// Ledger-assigned reservation identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct ReservationId(Uuid);

impl ReservationId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for ReservationId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ReservationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "rsv_{}", self.0.as_simple())
    }
}

/// A provisional hold on exposure for an order not yet filled.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Reservation {
    pub id: ReservationId,
    pub symbol: String,
    pub side: Side,
    pub quantity: Decimal,
    pub strategy_id: String,
    pub session: Option<String>,
    pub reference_price: Decimal,
    pub stop_distance: Decimal,
    pub risk_amount: Decimal,
    pub created_at: DateTime<Utc>,
}

/// Trading day and week an instant belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TradingPeriod {
    pub day: NaiveDate,
    pub week: IsoWeek,
}

/// Result of committing a reservation.
#[derive(Debug, Clone, PartialEq)]
pub enum CommitOutcome {
    /// The reservation became a position.
    Opened(Position),
    /// The reservation had already been committed; nothing changed.
    AlreadyCommitted(PositionId),
    /// The reservation had been released before the fill arrived. The fill
    /// is not booked; the caller owns flattening the orphaned quantity.
    Released,
}

/// Result of releasing a reservation. Releasing never fails.
#[derive(Debug, Clone, PartialEq)]
pub enum ReleaseOutcome {
    Released(Reservation),
    /// Already committed or released; nothing changed.
    AlreadySettled,
    Unknown,
}

/// Point-in-time, read-only copy of the account.
#[derive(Debug, Clone, Serialize)]
pub struct AccountView {
    pub account_id: String,
    pub as_of: DateTime<Utc>,
    pub trading_day: Option<NaiveDate>,
    pub equity: Decimal,
    pub start_of_day_equity: Decimal,
    pub start_of_week_equity: Decimal,
    pub realized_today: Decimal,
    pub realized_week: Decimal,
    pub unrealized_pnl: Decimal,
    /// Realized today plus unrealized.
    pub daily_pnl: Decimal,
    /// Realized this week plus unrealized.
    pub weekly_pnl: Decimal,
    /// Sum of |qty| x entry price over open positions.
    pub exposure: Decimal,
    /// Stop-loss risk of in-flight reservations and open positions.
    pub reserved_risk: Decimal,
    pub positions: Vec<Position>,
    pub reservations: Vec<Reservation>,
    pub halted: bool,
}

impl AccountView {
    /// Committed plus reserved positions.
    pub fn open_count(&self) -> u32 {
        (self.positions.len() + self.reservations.len()) as u32
    }

    /// Committed plus reserved positions in `symbol`.
    pub fn symbol_count(&self, symbol: &str) -> u32 {
        let positions = self.positions.iter().filter(|p| p.symbol == symbol).count();
        let reserved = self.reservations.iter().filter(|r| r.symbol == symbol).count();
        (positions + reserved) as u32
    }

    /// Whether `strategy_id` holds or awaits a position in `symbol`.
    pub fn holds(&self, strategy_id: &str, symbol: &str) -> bool {
        self.positions
            .iter()
            .any(|p| p.strategy_id == strategy_id && p.symbol == symbol)
            || self
                .reservations
                .iter()
                .any(|r| r.strategy_id == strategy_id && r.symbol == symbol)
    }

    /// Symbols held or in flight. With `Some(session)`, only those tagged
    /// with that session.
    pub fn held_symbols(&self, session: Option<&str>) -> BTreeSet<&str> {
        let tagged = |tag: &Option<String>| session.is_none() || tag.as_deref() == session;
        self.positions
            .iter()
            .filter(|p| tagged(&p.session_tag))
            .map(|p| p.symbol.as_str())
            .chain(
                self.reservations
                    .iter()
                    .filter(|r| tagged(&r.session))
                    .map(|r| r.symbol.as_str()),
            )
            .collect()
    }

    pub fn position(&self, id: PositionId) -> Option<&Position> {
        self.positions.iter().find(|p| p.id == id)
    }

    /// Daily and weekly drawdown rule.
    ///
    /// Loss is realized loss for the period plus `reserved_risk`. Rejects
    /// once that loss has reached the budget, or when adding
    /// `candidate_risk` would push it over.
    pub fn check_loss_limits(
        &self,
        limits: &RiskLimits,
        candidate_risk: Decimal,
    ) -> Option<RiskRejection> {
        let realized_day_loss = (-self.realized_today).max(Decimal::ZERO);
        let day_loss = realized_day_loss + self.reserved_risk;
        let day_limit = limits.daily_loss_limit(self.start_of_day_equity);
        if day_loss >= day_limit || day_loss + candidate_risk > day_limit {
            return Some(RiskRejection::DailyLossLimitExceeded {
                current: day_loss + candidate_risk,
                limit: day_limit,
            });
        }

        let realized_week_loss = (-self.realized_week).max(Decimal::ZERO);
        let week_loss = realized_week_loss + self.reserved_risk;
        let week_limit = limits.weekly_loss_limit(self.start_of_week_equity);
        if week_loss >= week_limit || week_loss + candidate_risk > week_limit {
            return Some(RiskRejection::WeeklyLossLimitExceeded {
                current: week_loss + candidate_risk,
                limit: week_limit,
            });
        }

        None
    }

    /// Account, per-symbol and per-strategy position count rules.
    pub fn check_position_limits(
        &self,
        limits: &RiskLimits,
        strategy_id: &str,
        symbol: &str,
    ) -> Option<RiskRejection> {
        let open = self.open_count();
        if open >= limits.max_open_positions {
            return Some(RiskRejection::MaxOpenPositionsExceeded {
                current: open,
                limit: limits.max_open_positions,
            });
        }

        let in_symbol = self.symbol_count(symbol);
        if in_symbol >= limits.max_positions_per_symbol {
            return Some(RiskRejection::MaxPerSymbolExceeded {
                symbol: symbol.to_string(),
                current: in_symbol,
                limit: limits.max_positions_per_symbol,
            });
        }

        if !limits.allow_multiple_positions_per_symbol && self.holds(strategy_id, symbol) {
            return Some(RiskRejection::DuplicateStrategyPosition {
                strategy_id: strategy_id.to_string(),
                symbol: symbol.to_string(),
            });
        }

        None
    }
}

#[derive(Debug, Clone, Copy)]
enum Settlement {
    Committed(PositionId),
    Released,
}

/// Mutable account state, only touched under the ledger mutex.
struct LedgerState {
    equity: Decimal,
    start_of_day_equity: Decimal,
    start_of_week_equity: Decimal,
    realized_today: Decimal,
    realized_week: Decimal,
    period: Option<TradingPeriod>,
    reservations: HashMap<ReservationId, Reservation>,
    positions: HashMap<PositionId, Position>,
    settled: HashMap<ReservationId, (Settlement, DateTime<Utc>)>,
    halt_reason: Option<String>,
}

impl LedgerState {
    fn view(&self, account_id: &str, as_of: DateTime<Utc>) -> AccountView {
        let mut positions: Vec<Position> = self.positions.values().cloned().collect();
        positions.sort_by_key(|p| p.opened_at);
        let mut reservations: Vec<Reservation> = self.reservations.values().cloned().collect();
        reservations.sort_by_key(|r| r.created_at);

        let unrealized_pnl: Decimal = positions.iter().map(|p| p.unrealized_pnl).sum();
        let exposure: Decimal = positions.iter().map(Position::exposure).sum();
        let reserved_risk: Decimal = positions.iter().map(|p| p.risk_amount).sum::<Decimal>()
            + reservations.iter().map(|r| r.risk_amount).sum::<Decimal>();

        AccountView {
            account_id: account_id.to_string(),
            as_of,
            trading_day: self.period.map(|p| p.day),
            equity: self.equity,
            start_of_day_equity: self.start_of_day_equity,
            start_of_week_equity: self.start_of_week_equity,
            realized_today: self.realized_today,
            realized_week: self.realized_week,
            unrealized_pnl,
            daily_pnl: self.realized_today + unrealized_pnl,
            weekly_pnl: self.realized_week + unrealized_pnl,
            exposure,
            reserved_risk,
            positions,
            reservations,
            halted: self.halt_reason.is_some(),
        }
    }
}

/// Authoritative record of one account's equity, P&L and exposure.
///
/// # Thread Safety
///
/// - All mutations serialize on one `parking_lot::Mutex`; reservations hand
///   the lock over fairly so competing strategies are admitted in FIFO order
/// - `snapshot()` reads the last published `AccountView` without taking the
///   mutation lock
/// - The halted flag is an atomic for lock-free checks by the risk gate
///
/// # Usage
///
/// ```rust,ignore
/// let ledger = RiskLedger::new("primary", dec!(10000), RiskLimits::default());
///
/// let reservation = ledger.reserve_exposure(&intent)?;
/// // submit the order...
/// match ledger.commit_reservation(reservation.id, fill_price, fill_qty, now)? {
///     CommitOutcome::Opened(position) => { /* track position.id */ }
///     CommitOutcome::AlreadyCommitted(_) => {}
///     CommitOutcome::Released => { /* late fill: flatten it */ }
/// }
/// ```
pub struct RiskLedger {
    account_id: String,
    limits: RiskLimits,
    state: Mutex<LedgerState>,
    published: RwLock<Arc<AccountView>>,
    halted: AtomicBool,
    events: EventSink,
}

impl RiskLedger {
    /// Create a ledger with the given starting equity.
    pub fn new(account_id: impl Into<String>, starting_equity: Decimal, limits: RiskLimits) -> Self {
        let account_id = account_id.into();
        let state = LedgerState {
            equity: starting_equity,
            start_of_day_equity: starting_equity,
            start_of_week_equity: starting_equity,
            realized_today: Decimal::ZERO,
            realized_week: Decimal::ZERO,
            period: None,
            reservations: HashMap::new(),
            positions: HashMap::new(),
            settled: HashMap::new(),
            halt_reason: None,
        };
        let view = state.view(&account_id, Utc::now());

        Self {
            account_id,
            limits,
            state: Mutex::new(state),
            published: RwLock::new(Arc::new(view)),
            halted: AtomicBool::new(false),
            events: EventSink::log_only(),
        }
    }

    /// Route ledger events to `events`.
    pub fn with_events(mut self, events: EventSink) -> Self {
        self.events = events;
        self
    }

    pub fn account_id(&self) -> &str {
        &self.account_id
    }

    pub fn limits(&self) -> &RiskLimits {
        &self.limits
    }

    pub fn is_halted(&self) -> bool {
        self.halted.load(Ordering::Acquire)
    }

    /// Latest consistent view of the account.
    pub fn snapshot(&self) -> Arc<AccountView> {
        self.published.read().clone()
    }

    /// Hold exposure for `intent`, re-validating loss and count limits
    /// atomically against the current state.
    pub fn reserve_exposure(&self, intent: &OrderIntent) -> Result<Reservation, LedgerError> {
        if intent.quantity <= Decimal::ZERO {
            return Err(LedgerError::InvalidIntent(format!(
                "quantity must be positive, got {}",
                intent.quantity
            )));
        }
        if intent.stop_distance <= Decimal::ZERO {
            return Err(LedgerError::InvalidIntent(format!(
                "stop distance must be positive, got {}",
                intent.stop_distance
            )));
        }

        let mut state = self.state.lock();
        if let Some(reason) = &state.halt_reason {
            return Err(LedgerError::Halted(reason.clone()));
        }

        let at = intent.timestamp;
        let current = state.view(&self.account_id, at);
        let verdict = current
            .check_loss_limits(&self.limits, intent.risk_amount())
            .or_else(|| {
                current.check_position_limits(&self.limits, &intent.strategy_id, &intent.symbol)
            });
        if let Some(reason) = verdict {
            self.events.emit(
                at,
                Component::RiskLedger,
                EventKind::Rejection,
                format!(
                    "reservation refused for {} {} {}: {}",
                    intent.strategy_id, intent.side, intent.symbol, reason
                ),
            );
            return Err(LedgerError::Rejected(reason));
        }

        let reservation = Reservation {
            id: ReservationId::new(),
            symbol: intent.symbol.clone(),
            side: intent.side,
            quantity: intent.quantity,
            strategy_id: intent.strategy_id.clone(),
            session: intent.session.clone(),
            reference_price: intent.reference_price,
            stop_distance: intent.stop_distance,
            risk_amount: intent.risk_amount(),
            created_at: at,
        };
        state.reservations.insert(reservation.id, reservation.clone());
        self.publish(&state, at);

        self.events.emit(
            at,
            Component::RiskLedger,
            EventKind::LedgerMutation,
            format!(
                "reserved {} {} {} qty {} risk {} for {}",
                reservation.id,
                reservation.side,
                reservation.symbol,
                reservation.quantity,
                reservation.risk_amount,
                reservation.strategy_id
            ),
        );

        MutexGuard::unlock_fair(state);
        Ok(reservation)
    }

    /// Convert a reservation into a position. Idempotent.
    pub fn commit_reservation(
        &self,
        id: ReservationId,
        fill_price: Decimal,
        fill_qty: Decimal,
        at: DateTime<Utc>,
    ) -> Result<CommitOutcome, LedgerError> {
        let mut state = self.state.lock();

        match state.settled.get(&id) {
            Some((Settlement::Committed(position_id), _)) => {
                debug!(reservation = %id, position = %position_id, "duplicate commit ignored");
                return Ok(CommitOutcome::AlreadyCommitted(*position_id));
            }
            Some((Settlement::Released, _)) => {
                warn!(reservation = %id, fill_price = %fill_price, fill_qty = %fill_qty, "fill arrived after release");
                return Ok(CommitOutcome::Released);
            }
            None => {}
        }

        if fill_qty <= Decimal::ZERO || fill_price <= Decimal::ZERO {
            return Err(LedgerError::InvalidFill {
                qty: fill_qty,
                price: fill_price,
            });
        }

        let reservation = state
            .reservations
            .remove(&id)
            .ok_or(LedgerError::UnknownReservation(id))?;

        let position = Position {
            id: PositionId::new(),
            symbol: reservation.symbol,
            side: reservation.side,
            quantity: fill_qty,
            entry_price: fill_price,
            strategy_id: reservation.strategy_id,
            opened_at: at,
            session_tag: reservation.session,
            risk_amount: fill_qty * reservation.stop_distance,
            stop_distance: reservation.stop_distance,
            unrealized_pnl: Decimal::ZERO,
        };
        state.positions.insert(position.id, position.clone());
        state.settled.insert(id, (Settlement::Committed(position.id), at));
        self.publish(&state, at);

        self.events.emit(
            at,
            Component::RiskLedger,
            EventKind::LedgerMutation,
            format!(
                "committed {} as {} {} {} qty {} @ {}",
                id, position.id, position.side, position.symbol, position.quantity, position.entry_price
            ),
        );

        Ok(CommitOutcome::Opened(position))
    }

    /// Drop a reservation after a cancel, reject or timeout. Idempotent and
    /// never fails.
    pub fn release_reservation(&self, id: ReservationId, at: DateTime<Utc>) -> ReleaseOutcome {
        let mut state = self.state.lock();

        if state.settled.contains_key(&id) {
            debug!(reservation = %id, "release of settled reservation ignored");
            return ReleaseOutcome::AlreadySettled;
        }

        let Some(reservation) = state.reservations.remove(&id) else {
            debug!(reservation = %id, "release of unknown reservation ignored");
            return ReleaseOutcome::Unknown;
        };
        state.settled.insert(id, (Settlement::Released, at));
        self.publish(&state, at);

        self.events.emit(
            at,
            Component::RiskLedger,
            EventKind::LedgerMutation,
            format!(
                "released {} {} {} for {}",
                id, reservation.side, reservation.symbol, reservation.strategy_id
            ),
        );

        ReleaseOutcome::Released(reservation)
    }

    /// Remove a closed position and realize `pnl`.
    ///
    /// If equity turns negative the close is still booked, the account is
    /// halted and `InvariantViolation` is returned.
    pub fn record_close(
        &self,
        position_id: PositionId,
        pnl: Decimal,
        at: DateTime<Utc>,
    ) -> Result<Position, LedgerError> {
        let mut state = self.state.lock();
        self.close_locked(&mut state, position_id, pnl, at)
    }

    /// Close a position at `exit_price`, computing P&L from its entry.
    pub fn close_position_at(
        &self,
        position_id: PositionId,
        exit_price: Decimal,
        at: DateTime<Utc>,
    ) -> Result<(Position, Decimal), LedgerError> {
        let mut state = self.state.lock();
        let pnl = state
            .positions
            .get(&position_id)
            .map(|p| p.pnl_at(exit_price))
            .ok_or(LedgerError::UnknownPosition(position_id))?;
        let position = self.close_locked(&mut state, position_id, pnl, at)?;
        Ok((position, pnl))
    }

    fn close_locked(
        &self,
        state: &mut LedgerState,
        position_id: PositionId,
        pnl: Decimal,
        at: DateTime<Utc>,
    ) -> Result<Position, LedgerError> {
        let position = state
            .positions
            .remove(&position_id)
            .ok_or(LedgerError::UnknownPosition(position_id))?;

        state.equity += pnl;
        state.realized_today += pnl;
        state.realized_week += pnl;

        self.events.emit(
            at,
            Component::RiskLedger,
            EventKind::LedgerMutation,
            format!(
                "closed {} {} {} pnl {} equity {}",
                position_id, position.side, position.symbol, pnl, state.equity
            ),
        );

        if state.equity < Decimal::ZERO {
            let reason = format!("equity negative ({}) after closing {}", state.equity, position_id);
            self.halt_locked(state, reason.clone(), at);
            self.publish(state, at);
            return Err(LedgerError::InvariantViolation(reason));
        }

        self.publish(state, at);
        Ok(position)
    }

    /// Move to `period`, resetting daily counters on a new day and weekly
    /// counters on a new ISO week. Returns true if anything rolled.
    ///
    /// Periods only move forward: a period at or before the current one
    /// (a late tick from an unordered feed) is ignored.
    pub fn roll_to(&self, period: TradingPeriod, at: DateTime<Utc>) -> bool {
        let mut state = self.state.lock();

        let Some(previous) = state.period else {
            state.period = Some(period);
            state.start_of_day_equity = state.equity;
            state.start_of_week_equity = state.equity;
            self.publish(&state, at);
            return true;
        };
        if period.day <= previous.day {
            if period.day < previous.day {
                debug!(
                    account = %self.account_id,
                    current = %previous.day,
                    stale = %period.day,
                    "ignoring stale trading period"
                );
            }
            return false;
        }

        state.period = Some(period);
        state.realized_today = Decimal::ZERO;
        state.start_of_day_equity = state.equity;
        if previous.week != period.week {
            state.realized_week = Decimal::ZERO;
            state.start_of_week_equity = state.equity;
        }

        let cutoff = at - Duration::hours(SETTLED_RETENTION_HOURS);
        state.settled.retain(|_, (_, settled_at)| *settled_at >= cutoff);
        self.publish(&state, at);

        info!(
            account = %self.account_id,
            day = %period.day,
            new_week = previous.week != period.week,
            equity = %state.equity,
            "trading period rolled"
        );
        true
    }

    /// Revalue open positions in `symbol` at `price`.
    pub fn mark_to_market(&self, symbol: &str, price: Decimal, at: DateTime<Utc>) {
        let mut state = self.state.lock();
        let mut touched = false;
        for position in state.positions.values_mut().filter(|p| p.symbol == symbol) {
            position.unrealized_pnl = position.pnl_at(price);
            touched = true;
        }
        if touched {
            self.publish(&state, at);
        }
    }

    pub fn position(&self, id: PositionId) -> Option<Position> {
        self.state.lock().positions.get(&id).cloned()
    }

    pub fn reservation(&self, id: ReservationId) -> Option<Reservation> {
        self.state.lock().reservations.get(&id).cloned()
    }

    /// Stop new reservations. Fills, releases and closes still apply.
    pub fn halt(&self, reason: impl Into<String>, at: DateTime<Utc>) {
        let mut state = self.state.lock();
        self.halt_locked(&mut state, reason.into(), at);
        self.publish(&state, at);
    }

    /// Lift a halt. Refused while equity is negative.
    pub fn resume(&self, at: DateTime<Utc>) -> Result<(), LedgerError> {
        let mut state = self.state.lock();
        if state.equity < Decimal::ZERO {
            return Err(LedgerError::InvariantViolation(format!(
                "cannot resume with negative equity {}",
                state.equity
            )));
        }
        if state.halt_reason.take().is_some() {
            self.halted.store(false, Ordering::Release);
            self.publish(&state, at);
            self.events.emit(
                at,
                Component::RiskLedger,
                EventKind::StateTransition,
                format!("account {} resumed", self.account_id),
            );
        }
        Ok(())
    }

    fn halt_locked(&self, state: &mut LedgerState, reason: String, at: DateTime<Utc>) {
        self.halted.store(true, Ordering::Release);
        self.events.emit(
            at,
            Component::RiskLedger,
            EventKind::Alert,
            format!("account {} halted: {}", self.account_id, reason),
        );
        state.halt_reason = Some(reason);
    }

    fn publish(&self, state: &LedgerState, at: DateTime<Utc>) {
        let view = state.view(&self.account_id, at);
        *self.published.write() = Arc::new(view);
    }
}

/// Shared handle to a ledger.
pub type SharedLedger = Arc<RiskLedger>;

/// Create a new shared ledger.
pub fn create_ledger(
    account_id: impl Into<String>,
    starting_equity: Decimal,
    limits: RiskLimits,
) -> SharedLedger {
    Arc::new(RiskLedger::new(account_id, starting_equity, limits))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Datelike, TimeZone};
    use rust_decimal_macros::dec;

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 5, 10, 0, 0).unwrap()
    }

    fn period(day: u32) -> TradingPeriod {
        let date = NaiveDate::from_ymd_opt(2024, 3, day).unwrap();
        TradingPeriod {
            day: date,
            week: date.iso_week(),
        }
    }

    fn intent(strategy: &str, symbol: &str, qty: Decimal) -> OrderIntent {
        OrderIntent::new(strategy, symbol, Side::Long, qty, dec!(1.1000), dec!(0.0050), now())
    }

    fn make_ledger(limits: RiskLimits) -> RiskLedger {
        RiskLedger::new("test", dec!(10000), limits)
    }

    #[test]
    fn test_reserve_commit_close_round_trip() {
        let ledger = make_ledger(RiskLimits::default());
        let before = ledger.snapshot();

        let reservation = ledger.reserve_exposure(&intent("rsi", "EURUSD", dec!(20000))).unwrap();
        assert_eq!(reservation.risk_amount, dec!(100));
        assert_eq!(ledger.snapshot().reserved_risk, dec!(100));

        let position = match ledger
            .commit_reservation(reservation.id, dec!(1.1000), dec!(20000), now())
            .unwrap()
        {
            CommitOutcome::Opened(p) => p,
            other => panic!("unexpected outcome {other:?}"),
        };
        let open = ledger.snapshot();
        assert_eq!(open.positions.len(), 1);
        assert!(open.reservations.is_empty());
        assert_eq!(open.exposure, dec!(22000));

        let (_, pnl) = ledger
            .close_position_at(position.id, dec!(1.1025), now())
            .unwrap();
        assert_eq!(pnl, dec!(50));

        let after = ledger.snapshot();
        assert_eq!(after.equity, before.equity + pnl);
        assert_eq!(after.exposure, before.exposure);
        assert_eq!(after.reserved_risk, Decimal::ZERO);
        assert_eq!(after.open_count(), 0);
        assert_eq!(after.realized_today, dec!(50));
    }

    #[test]
    fn test_commit_is_idempotent() {
        let ledger = make_ledger(RiskLimits::default());
        let reservation = ledger.reserve_exposure(&intent("rsi", "EURUSD", dec!(1000))).unwrap();

        let first = ledger
            .commit_reservation(reservation.id, dec!(1.1), dec!(1000), now())
            .unwrap();
        let CommitOutcome::Opened(position) = first else {
            panic!("expected open");
        };

        let second = ledger
            .commit_reservation(reservation.id, dec!(1.1), dec!(1000), now())
            .unwrap();
        assert_eq!(second, CommitOutcome::AlreadyCommitted(position.id));
        assert_eq!(ledger.snapshot().positions.len(), 1);

        // Release after commit has no effect
        assert_eq!(
            ledger.release_reservation(reservation.id, now()),
            ReleaseOutcome::AlreadySettled
        );
        assert_eq!(ledger.snapshot().positions.len(), 1);
    }

    #[test]
    fn test_release_is_idempotent() {
        let ledger = make_ledger(RiskLimits::default());
        let reservation = ledger.reserve_exposure(&intent("rsi", "EURUSD", dec!(1000))).unwrap();

        assert!(matches!(
            ledger.release_reservation(reservation.id, now()),
            ReleaseOutcome::Released(_)
        ));
        assert_eq!(
            ledger.release_reservation(reservation.id, now()),
            ReleaseOutcome::AlreadySettled
        );
        assert_eq!(ledger.snapshot().open_count(), 0);
        assert_eq!(ledger.release_reservation(ReservationId::new(), now()), ReleaseOutcome::Unknown);
    }

    #[test]
    fn test_late_fill_after_release() {
        let ledger = make_ledger(RiskLimits::default());
        let reservation = ledger.reserve_exposure(&intent("rsi", "EURUSD", dec!(1000))).unwrap();
        ledger.release_reservation(reservation.id, now());

        let outcome = ledger
            .commit_reservation(reservation.id, dec!(1.1), dec!(1000), now())
            .unwrap();
        assert_eq!(outcome, CommitOutcome::Released);
        assert!(ledger.snapshot().positions.is_empty());
    }

    #[test]
    fn test_commit_unknown_reservation() {
        let ledger = make_ledger(RiskLimits::default());
        let id = ReservationId::new();
        assert_eq!(
            ledger.commit_reservation(id, dec!(1.1), dec!(1), now()),
            Err(LedgerError::UnknownReservation(id))
        );
    }

    #[test]
    fn test_invalid_fill_keeps_reservation() {
        let ledger = make_ledger(RiskLimits::default());
        let reservation = ledger.reserve_exposure(&intent("rsi", "EURUSD", dec!(1000))).unwrap();

        let err = ledger
            .commit_reservation(reservation.id, dec!(1.1), Decimal::ZERO, now())
            .unwrap_err();
        assert!(matches!(err, LedgerError::InvalidFill { .. }));
        assert!(ledger.reservation(reservation.id).is_some());
    }

    #[test]
    fn test_max_open_positions_counts_reservations() {
        let ledger = make_ledger(RiskLimits::default().with_max_open_positions(2));

        ledger.reserve_exposure(&intent("a", "EURUSD", dec!(1000))).unwrap();
        ledger.reserve_exposure(&intent("b", "GBPUSD", dec!(1000))).unwrap();
        let err = ledger.reserve_exposure(&intent("c", "USDJPY", dec!(1000))).unwrap_err();

        assert_eq!(
            err,
            LedgerError::Rejected(RiskRejection::MaxOpenPositionsExceeded { current: 2, limit: 2 })
        );
    }

    #[test]
    fn test_concurrent_reservations_respect_max_open_positions() {
        let limits = RiskLimits::default()
            .with_max_open_positions(5)
            .with_max_positions_per_symbol(100)
            .with_max_daily_loss_percent(dec!(100))
            .with_max_weekly_loss_percent(dec!(100));
        let ledger = Arc::new(make_ledger(limits));

        let accepted: usize = std::thread::scope(|scope| {
            let handles: Vec<_> = (0..32)
                .map(|i| {
                    let ledger = Arc::clone(&ledger);
                    scope.spawn(move || {
                        ledger
                            .reserve_exposure(&intent(&format!("s{i}"), "EURUSD", dec!(100)))
                            .is_ok()
                    })
                })
                .collect();
            handles
                .into_iter()
                .map(|h| h.join().unwrap())
                .filter(|ok| *ok)
                .count()
        });

        assert_eq!(accepted, 5);
        assert_eq!(ledger.snapshot().open_count(), 5);
    }

    #[test]
    fn test_per_symbol_and_duplicate_guard() {
        let limits = RiskLimits::default().with_max_positions_per_symbol(2);
        let ledger = make_ledger(limits.clone());

        ledger.reserve_exposure(&intent("rsi", "EURUSD", dec!(1000))).unwrap();
        let err = ledger.reserve_exposure(&intent("rsi", "EURUSD", dec!(1000))).unwrap_err();
        assert!(matches!(
            err,
            LedgerError::Rejected(RiskRejection::DuplicateStrategyPosition { .. })
        ));

        ledger.reserve_exposure(&intent("london", "EURUSD", dec!(1000))).unwrap();
        let err = ledger.reserve_exposure(&intent("vwap", "EURUSD", dec!(1000))).unwrap_err();
        assert!(matches!(
            err,
            LedgerError::Rejected(RiskRejection::MaxPerSymbolExceeded { current: 2, limit: 2, .. })
        ));

        let multi = make_ledger(limits.with_multiple_positions_per_symbol(true));
        multi.reserve_exposure(&intent("rsi", "EURUSD", dec!(1000))).unwrap();
        assert!(multi.reserve_exposure(&intent("rsi", "EURUSD", dec!(1000))).is_ok());
    }

    #[test]
    fn test_daily_loss_limit_until_rollover() {
        // 3% of 10000 = 300 daily budget
        let ledger = make_ledger(RiskLimits::default());
        ledger.roll_to(period(5), now());

        let reservation = ledger.reserve_exposure(&intent("rsi", "EURUSD", dec!(1000))).unwrap();
        let CommitOutcome::Opened(position) = ledger
            .commit_reservation(reservation.id, dec!(1.1), dec!(1000), now())
            .unwrap()
        else {
            panic!("expected open");
        };
        ledger.record_close(position.id, dec!(-300), now()).unwrap();

        let err = ledger.reserve_exposure(&intent("rsi", "EURUSD", dec!(1))).unwrap_err();
        assert!(matches!(
            err,
            LedgerError::Rejected(RiskRejection::DailyLossLimitExceeded { .. })
        ));

        // Same day: still rejected
        assert!(!ledger.roll_to(period(5), now()));
        assert!(ledger.reserve_exposure(&intent("rsi", "EURUSD", dec!(1))).is_err());

        // Next trading day: budget is 3% of 9700
        assert!(ledger.roll_to(period(6), now()));
        let view = ledger.snapshot();
        assert_eq!(view.start_of_day_equity, dec!(9700));
        assert_eq!(view.realized_today, Decimal::ZERO);
        assert!(ledger.reserve_exposure(&intent("rsi", "EURUSD", dec!(1))).is_ok());
    }

    #[test]
    fn test_stale_period_does_not_reset_daily_loss() {
        let ledger = make_ledger(RiskLimits::default());
        ledger.roll_to(period(6), now());

        let reservation = ledger.reserve_exposure(&intent("rsi", "EURUSD", dec!(1000))).unwrap();
        let CommitOutcome::Opened(position) = ledger
            .commit_reservation(reservation.id, dec!(1.1), dec!(1000), now())
            .unwrap()
        else {
            panic!("expected open");
        };
        ledger.record_close(position.id, dec!(-300), now()).unwrap();

        // Late tick from the previous trading day, then back in order
        assert!(!ledger.roll_to(period(5), now()));
        assert!(!ledger.roll_to(period(6), now()));

        let view = ledger.snapshot();
        assert_eq!(view.realized_today, dec!(-300));
        assert_eq!(view.start_of_day_equity, dec!(10000));
        assert_eq!(view.trading_day, Some(period(6).day));
        assert!(matches!(
            ledger.reserve_exposure(&intent("rsi", "EURUSD", dec!(1))),
            Err(LedgerError::Rejected(RiskRejection::DailyLossLimitExceeded { .. }))
        ));
    }

    #[test]
    fn test_candidate_risk_counts_toward_daily_limit() {
        let ledger = make_ledger(RiskLimits::default());
        // risk = 70000 * 0.005 = 350 > 300 budget
        let err = ledger.reserve_exposure(&intent("rsi", "EURUSD", dec!(70000))).unwrap_err();
        assert_eq!(
            err,
            LedgerError::Rejected(RiskRejection::DailyLossLimitExceeded {
                current: dec!(350),
                limit: dec!(300),
            })
        );
    }

    #[test]
    fn test_weekly_loss_limit_survives_daily_roll() {
        let limits = RiskLimits::default()
            .with_max_daily_loss_percent(dec!(5))
            .with_max_weekly_loss_percent(dec!(6));
        let ledger = make_ledger(limits);
        // Tuesday and Wednesday of the same ISO week
        ledger.roll_to(period(5), now());

        for _ in 0..2 {
            let r = ledger.reserve_exposure(&intent("rsi", "EURUSD", dec!(1000))).unwrap();
            let CommitOutcome::Opened(p) = ledger
                .commit_reservation(r.id, dec!(1.1), dec!(1000), now())
                .unwrap()
            else {
                panic!("expected open");
            };
            ledger.record_close(p.id, dec!(-300), now()).unwrap();
            ledger.roll_to(period(6), now());
        }

        let err = ledger.reserve_exposure(&intent("rsi", "EURUSD", dec!(1))).unwrap_err();
        assert!(matches!(
            err,
            LedgerError::Rejected(RiskRejection::WeeklyLossLimitExceeded { .. })
        ));

        // Next Monday starts a new week
        ledger.roll_to(period(11), now());
        assert!(ledger.reserve_exposure(&intent("rsi", "EURUSD", dec!(1))).is_ok());
    }

    #[test]
    fn test_negative_equity_halts_account() {
        let ledger = RiskLedger::new("test", dec!(100), RiskLimits::default().with_max_daily_loss_percent(dec!(100)));
        let r = ledger.reserve_exposure(&intent("rsi", "EURUSD", dec!(100))).unwrap();
        let CommitOutcome::Opened(p) = ledger
            .commit_reservation(r.id, dec!(1.1), dec!(100), now())
            .unwrap()
        else {
            panic!("expected open");
        };

        let err = ledger.record_close(p.id, dec!(-150), now()).unwrap_err();
        assert!(matches!(err, LedgerError::InvariantViolation(_)));
        assert!(ledger.is_halted());
        assert!(ledger.snapshot().halted);
        assert_eq!(ledger.snapshot().positions.len(), 0);

        let err = ledger.reserve_exposure(&intent("rsi", "EURUSD", dec!(1))).unwrap_err();
        assert!(matches!(err, LedgerError::Halted(_)));
        assert!(matches!(
            err.as_rejection(),
            Some(RiskRejection::AccountHalted { .. })
        ));
        assert!(ledger.resume(now()).is_err());
    }

    #[test]
    fn test_manual_halt_and_resume() {
        let ledger = make_ledger(RiskLimits::default());
        ledger.halt("operator request", now());
        assert!(ledger.reserve_exposure(&intent("rsi", "EURUSD", dec!(1))).is_err());

        ledger.resume(now()).unwrap();
        assert!(!ledger.is_halted());
        assert!(ledger.reserve_exposure(&intent("rsi", "EURUSD", dec!(1))).is_ok());
    }

    #[test]
    fn test_mark_to_market() {
        let ledger = make_ledger(RiskLimits::default());
        let r = ledger.reserve_exposure(&intent("rsi", "EURUSD", dec!(10000))).unwrap();
        ledger
            .commit_reservation(r.id, dec!(1.1000), dec!(10000), now())
            .unwrap();

        ledger.mark_to_market("EURUSD", dec!(1.1010), now());
        let view = ledger.snapshot();
        assert_eq!(view.unrealized_pnl, dec!(10));
        assert_eq!(view.daily_pnl, dec!(10));
        // Equity only moves on realized P&L
        assert_eq!(view.equity, dec!(10000));
    }

    #[test]
    fn test_invalid_intent_rejected() {
        let ledger = make_ledger(RiskLimits::default());
        let err = ledger.reserve_exposure(&intent("rsi", "EURUSD", dec!(0))).unwrap_err();
        assert!(matches!(err, LedgerError::InvalidIntent(_)));
    }

    #[test]
    fn test_ledger_events_published() {
        let (sink, mut rx) = EventSink::with_channel(16);
        let ledger = make_ledger(RiskLimits::default()).with_events(sink);

        let r = ledger.reserve_exposure(&intent("rsi", "EURUSD", dec!(1000))).unwrap();
        ledger.release_reservation(r.id, now());

        let first = rx.try_recv().unwrap();
        assert_eq!(first.component, Component::RiskLedger);
        assert_eq!(first.event_kind, EventKind::LedgerMutation);
        assert!(first.detail.starts_with("reserved"));
        assert!(rx.try_recv().unwrap().detail.starts_with("released"));
    }

    #[test]
    fn test_held_symbols_by_session() {
        let ledger = make_ledger(RiskLimits::default());
        ledger
            .reserve_exposure(&intent("a", "EURUSD", dec!(100)).with_session("london"))
            .unwrap();
        ledger
            .reserve_exposure(&intent("b", "USDJPY", dec!(100)).with_session("tokyo"))
            .unwrap();

        let view = ledger.snapshot();
        assert_eq!(view.held_symbols(None).len(), 2);
        let london: Vec<_> = view.held_symbols(Some("london")).into_iter().collect();
        assert_eq!(london, vec!["EURUSD"]);
    }
}
