//! Strategy context providing market state access.

use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use execution_core::Position;
use model::{IndicatorSnapshot, MarketEvent, Tick};
use parking_lot::RwLock;
use rust_decimal::Decimal;

/// Latest market data shared between the coordinator and all strategies.
///
/// Indicator snapshots are computed elsewhere and stored as received.
pub struct MarketState {
    /// Last tick indexed by symbol.
    last_ticks: RwLock<HashMap<String, Tick>>,
    /// Latest indicator snapshot indexed by (symbol, timeframe).
    indicators: RwLock<HashMap<(String, String), IndicatorSnapshot>>,
}

impl MarketState {
    /// Create a new empty market state.
    pub fn new() -> Self {
        Self {
            last_ticks: RwLock::new(HashMap::new()),
            indicators: RwLock::new(HashMap::new()),
        }
    }

    /// Store a market event.
    pub fn apply(&self, event: &MarketEvent) {
        match event {
            MarketEvent::Tick(tick) => self.update_tick(tick.clone()),
            MarketEvent::Indicators(snapshot) => self.update_indicators(snapshot.clone()),
        }
    }

    pub fn update_tick(&self, tick: Tick) {
        let mut ticks = self.last_ticks.write();
        ticks.insert(tick.symbol.clone(), tick);
    }

    pub fn update_indicators(&self, snapshot: IndicatorSnapshot) {
        let mut indicators = self.indicators.write();
        indicators.insert(
            (snapshot.symbol.clone(), snapshot.timeframe.clone()),
            snapshot,
        );
    }

    /// Get the last tick for a symbol.
    pub fn last_tick(&self, symbol: &str) -> Option<Tick> {
        let ticks = self.last_ticks.read();
        ticks.get(symbol).cloned()
    }

    /// Get the mid price for a symbol.
    pub fn mid_price(&self, symbol: &str) -> Option<Decimal> {
        let ticks = self.last_ticks.read();
        ticks.get(symbol).map(Tick::mid)
    }

    /// Get the spread for a symbol.
    pub fn spread(&self, symbol: &str) -> Option<Decimal> {
        let ticks = self.last_ticks.read();
        ticks.get(symbol).map(Tick::spread)
    }

    /// Indicator snapshot for a symbol and timeframe.
    pub fn indicators(&self, symbol: &str, timeframe: &str) -> Option<IndicatorSnapshot> {
        let indicators = self.indicators.read();
        indicators
            .get(&(symbol.to_string(), timeframe.to_string()))
            .cloned()
    }

    /// Most recent indicator snapshot for a symbol on any timeframe.
    pub fn latest_indicators(&self, symbol: &str) -> Option<IndicatorSnapshot> {
        let indicators = self.indicators.read();
        indicators
            .values()
            .filter(|s| s.symbol == symbol)
            .max_by_key(|s| s.timestamp)
            .cloned()
    }
}

impl Default for MarketState {
    fn default() -> Self {
        Self::new()
    }
}

/// Shared market state handle.
pub type SharedMarketState = Arc<MarketState>;

/// Create a new shared market state.
pub fn create_market_state() -> SharedMarketState {
    Arc::new(MarketState::new())
}

/// Context provided to strategies during execution.
///
/// Read-only: market data, the strategy's own open position, and the
/// sessions open at `timestamp`.
pub struct StrategyContext {
    /// Timestamp of the event being processed.
    pub timestamp: DateTime<Utc>,
    market_state: SharedMarketState,
    position: Option<Position>,
    active_sessions: BTreeSet<String>,
}

impl StrategyContext {
    /// Create a new strategy context.
    pub fn new(timestamp: DateTime<Utc>, market_state: SharedMarketState) -> Self {
        Self {
            timestamp,
            market_state,
            position: None,
            active_sessions: BTreeSet::new(),
        }
    }

    pub fn with_position(mut self, position: Option<Position>) -> Self {
        self.position = position;
        self
    }

    pub fn with_active_sessions(mut self, sessions: BTreeSet<String>) -> Self {
        self.active_sessions = sessions;
        self
    }

    /// The strategy's open position, if any.
    pub fn position(&self) -> Option<&Position> {
        self.position.as_ref()
    }

    pub fn is_flat(&self) -> bool {
        self.position.is_none()
    }

    pub fn active_sessions(&self) -> &BTreeSet<String> {
        &self.active_sessions
    }

    pub fn is_session_active(&self, name: &str) -> bool {
        self.active_sessions.contains(name)
    }

    pub fn last_tick(&self, symbol: &str) -> Option<Tick> {
        self.market_state.last_tick(symbol)
    }

    pub fn mid_price(&self, symbol: &str) -> Option<Decimal> {
        self.market_state.mid_price(symbol)
    }

    pub fn spread(&self, symbol: &str) -> Option<Decimal> {
        self.market_state.spread(symbol)
    }

    pub fn indicators(&self, symbol: &str, timeframe: &str) -> Option<IndicatorSnapshot> {
        self.market_state.indicators(symbol, timeframe)
    }

    pub fn latest_indicators(&self, symbol: &str) -> Option<IndicatorSnapshot> {
        self.market_state.latest_indicators(symbol)
    }
}
