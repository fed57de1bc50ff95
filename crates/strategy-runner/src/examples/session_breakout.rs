//! Session breakout strategy example.
//!
//! Records the price range over the hours before a session opens, then
//! trades a break of that range once the session is open. One entry per
//! session.

use std::collections::VecDeque;

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use tracing::{debug, info};

use model::{Side, Tick};
use strategy_core::{Action, EntrySignal, OrderUpdate, Strategy, StrategyContext, StrategyError};

/// Configuration for the session breakout strategy.
#[derive(Debug, Clone)]
pub struct SessionBreakoutConfig {
    pub symbol: String,
    /// Session whose open is traded.
    pub session: String,
    /// Hours before the open that form the range.
    pub range_hours: i64,
    /// Entry beyond the range, as a fraction of the range size.
    pub breakout_trigger: Decimal,
    /// Stop distance as a multiple of the range size.
    pub stop_loss_factor: Decimal,
    /// Take-profit distance as a multiple of the range size.
    pub take_profit_factor: Decimal,
    /// Skip entries while the spread is wider than this.
    pub max_spread: Option<Decimal>,
    /// Close positions held longer than this.
    pub max_trade_hours: i64,
    pub risk_percent: Option<Decimal>,
}

impl SessionBreakoutConfig {
    /// London open breakout over the three pre-London hours.
    pub fn london(symbol: impl Into<String>) -> Self {
        Self {
            symbol: symbol.into(),
            session: "london".to_string(),
            range_hours: 3,
            breakout_trigger: dec!(0.5),
            stop_loss_factor: dec!(1.0),
            take_profit_factor: dec!(2.0),
            max_spread: None,
            max_trade_hours: 6,
            risk_percent: None,
        }
    }

    pub fn with_risk_percent(mut self, percent: Decimal) -> Self {
        self.risk_percent = Some(percent);
        self
    }

    pub fn with_max_spread(mut self, spread: Decimal) -> Self {
        self.max_spread = Some(spread);
        self
    }
}

/// High and low of the pre-session window.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SessionRange {
    pub high: Decimal,
    pub low: Decimal,
}

impl SessionRange {
    pub fn size(&self) -> Decimal {
        self.high - self.low
    }
}

/// Trades the break of the pre-session range.
pub struct SessionBreakoutStrategy {
    id: String,
    config: SessionBreakoutConfig,
    symbols: Vec<String>,
    /// Mid prices seen while the session was closed.
    window: VecDeque<(DateTime<Utc>, Decimal)>,
    range: Option<SessionRange>,
    session_open: bool,
    /// Set once this session's entry has been proposed.
    entered: bool,
}

impl SessionBreakoutStrategy {
    pub fn new(id: impl Into<String>, config: SessionBreakoutConfig) -> Self {
        let symbols = vec![config.symbol.clone()];
        Self {
            id: id.into(),
            config,
            symbols,
            window: VecDeque::new(),
            range: None,
            session_open: false,
            entered: false,
        }
    }

    pub fn range(&self) -> Option<SessionRange> {
        self.range
    }

    fn record(&mut self, at: DateTime<Utc>, price: Decimal) {
        self.window.push_back((at, price));
        let cutoff = at - Duration::hours(self.config.range_hours);
        while self.window.front().is_some_and(|(ts, _)| *ts < cutoff) {
            self.window.pop_front();
        }
    }

    fn freeze_range(&mut self, open_at: DateTime<Utc>) {
        let cutoff = open_at - Duration::hours(self.config.range_hours);
        self.window.retain(|(ts, _)| *ts >= cutoff);
        let high = self.window.iter().map(|(_, p)| *p).max();
        let low = self.window.iter().map(|(_, p)| *p).min();
        self.range = match (high, low) {
            (Some(high), Some(low)) if high > low => Some(SessionRange { high, low }),
            _ => None,
        };
        self.window.clear();

        match self.range {
            Some(range) => info!(
                strategy_id = %self.id,
                session = %self.config.session,
                high = %range.high,
                low = %range.low,
                "pre-session range"
            ),
            None => debug!(strategy_id = %self.id, "no usable pre-session range"),
        }
    }

    fn breakout(&self, tick: &Tick, range: SessionRange) -> Option<EntrySignal> {
        let size = range.size();
        let offset = size * self.config.breakout_trigger;
        let side = if tick.ask > range.high + offset {
            Side::Long
        } else if tick.bid < range.low - offset {
            Side::Short
        } else {
            return None;
        };

        Some(
            EntrySignal::new(&self.config.symbol, side, size * self.config.stop_loss_factor)
                .with_take_profit(size * self.config.take_profit_factor)
                .with_reason(format!("{} range break {}-{}", self.config.session, range.low, range.high)),
        )
    }
}

#[async_trait]
impl Strategy for SessionBreakoutStrategy {
    fn id(&self) -> &str {
        &self.id
    }

    fn symbols(&self) -> Option<&[String]> {
        Some(&self.symbols)
    }

    fn risk_percent(&self) -> Option<Decimal> {
        self.config.risk_percent
    }

    fn session(&self) -> Option<&str> {
        Some(&self.config.session)
    }

    async fn on_start(&mut self, _ctx: &StrategyContext) -> Result<(), StrategyError> {
        if self.config.range_hours <= 0 {
            return Err(StrategyError::InvalidConfig(format!(
                "range hours must be positive, got {}",
                self.config.range_hours
            )));
        }
        if self.config.stop_loss_factor <= Decimal::ZERO {
            return Err(StrategyError::InvalidConfig(format!(
                "stop loss factor must be positive, got {}",
                self.config.stop_loss_factor
            )));
        }
        info!(
            strategy_id = %self.id,
            symbol = %self.config.symbol,
            session = %self.config.session,
            range_hours = self.config.range_hours,
            "session breakout strategy started"
        );
        Ok(())
    }

    async fn on_tick(&mut self, tick: &Tick, ctx: &StrategyContext) -> Result<Action, StrategyError> {
        if tick.symbol != self.config.symbol {
            return Ok(Action::Hold);
        }

        let open = ctx.is_session_active(&self.config.session);
        if open != self.session_open {
            self.session_open = open;
            if open {
                self.freeze_range(tick.timestamp);
            } else {
                debug!(strategy_id = %self.id, session = %self.config.session, "session closed");
                self.range = None;
                self.entered = false;
            }
        }

        if let Some(position) = ctx.position() {
            if tick.timestamp - position.opened_at >= Duration::hours(self.config.max_trade_hours) {
                return Ok(Action::exit("max trade duration"));
            }
            return Ok(Action::Hold);
        }

        if !open {
            self.record(tick.timestamp, tick.mid());
            return Ok(Action::Hold);
        }
        if self.entered {
            return Ok(Action::Hold);
        }
        let Some(range) = self.range else {
            return Ok(Action::Hold);
        };
        if self.config.max_spread.is_some_and(|max| tick.spread() > max) {
            return Ok(Action::Hold);
        }

        match self.breakout(tick, range) {
            Some(signal) => {
                self.entered = true;
                Ok(Action::Enter(signal))
            }
            None => Ok(Action::Hold),
        }
    }

    async fn on_order_update(
        &mut self,
        update: &OrderUpdate,
        _ctx: &StrategyContext,
    ) -> Result<(), StrategyError> {
        // Entry never happened: allow another try this session
        if matches!(
            update,
            OrderUpdate::Refused { .. }
                | OrderUpdate::Rejected { .. }
                | OrderUpdate::Canceled
                | OrderUpdate::TimedOut
        ) {
            self.entered = false;
        }
        Ok(())
    }
}
