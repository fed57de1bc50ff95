//! RSI threshold strategy example.
//!
//! Goes long when RSI is oversold and short when it is overbought, then
//! exits once RSI crosses back through the midline. RSI is computed
//! upstream and arrives as indicator snapshots.

use async_trait::async_trait;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use tracing::{debug, info};

use model::{Side, Tick};
use strategy_core::{Action, EntrySignal, OrderUpdate, Strategy, StrategyContext, StrategyError};

/// Configuration for the RSI threshold strategy.
#[derive(Debug, Clone)]
pub struct RsiThresholdConfig {
    /// Instrument to trade (e.g., "EURUSD").
    pub symbol: String,
    /// Indicator timeframe to read. If `None`, the latest snapshot of any
    /// timeframe is used.
    pub timeframe: Option<String>,
    /// Enter long below this RSI.
    pub oversold: Decimal,
    /// Enter short above this RSI.
    pub overbought: Decimal,
    /// Exit when RSI crosses back through this level.
    pub midline: Decimal,
    /// Stop distance in price units.
    pub stop_loss_distance: Decimal,
    /// Take-profit distance as a multiple of the stop distance.
    pub take_profit_multiple: Option<Decimal>,
    pub risk_percent: Option<Decimal>,
}

impl RsiThresholdConfig {
    /// Classic 30/70 thresholds with a 50 pip stop and 2:1 target.
    pub fn new(symbol: impl Into<String>) -> Self {
        Self {
            symbol: symbol.into(),
            timeframe: None,
            oversold: dec!(30),
            overbought: dec!(70),
            midline: dec!(50),
            stop_loss_distance: dec!(0.0050),
            take_profit_multiple: Some(dec!(2)),
            risk_percent: None,
        }
    }

    pub fn with_risk_percent(mut self, percent: Decimal) -> Self {
        self.risk_percent = Some(percent);
        self
    }

    fn validate(&self) -> Result<(), StrategyError> {
        if self.oversold >= self.overbought {
            return Err(StrategyError::InvalidConfig(format!(
                "oversold {} must be below overbought {}",
                self.oversold, self.overbought
            )));
        }
        if self.midline <= self.oversold || self.midline >= self.overbought {
            return Err(StrategyError::InvalidConfig(format!(
                "midline {} must lie between oversold and overbought",
                self.midline
            )));
        }
        if self.stop_loss_distance <= Decimal::ZERO {
            return Err(StrategyError::InvalidConfig(format!(
                "stop loss distance {} must be positive",
                self.stop_loss_distance
            )));
        }
        Ok(())
    }
}

/// Mean-reversion strategy on externally supplied RSI.
pub struct RsiThresholdStrategy {
    id: String,
    config: RsiThresholdConfig,
    symbols: Vec<String>,
    /// RSI at the last entry signal, for logging.
    entry_rsi: Option<Decimal>,
}

impl RsiThresholdStrategy {
    pub fn new(id: impl Into<String>, config: RsiThresholdConfig) -> Self {
        let symbols = vec![config.symbol.clone()];
        Self {
            id: id.into(),
            config,
            symbols,
            entry_rsi: None,
        }
    }

    /// `None` until the first indicator snapshot arrives.
    fn current_rsi(&self, ctx: &StrategyContext) -> Result<Option<Decimal>, StrategyError> {
        let snapshot = match &self.config.timeframe {
            Some(timeframe) => ctx.indicators(&self.config.symbol, timeframe),
            None => ctx.latest_indicators(&self.config.symbol),
        };
        match snapshot {
            Some(snapshot) => snapshot.rsi.map(Some).ok_or_else(|| StrategyError::IndicatorUnavailable {
                symbol: self.config.symbol.clone(),
                indicator: "rsi",
            }),
            None => Ok(None),
        }
    }

    fn entry_signal(&self, side: Side, rsi: Decimal) -> EntrySignal {
        let mut signal = EntrySignal::new(&self.config.symbol, side, self.config.stop_loss_distance)
            .with_reason(format!("rsi {rsi}"));
        if let Some(multiple) = self.config.take_profit_multiple {
            signal = signal.with_take_profit(self.config.stop_loss_distance * multiple);
        }
        signal
    }
}

#[async_trait]
impl Strategy for RsiThresholdStrategy {
    fn id(&self) -> &str {
        &self.id
    }

    fn symbols(&self) -> Option<&[String]> {
        Some(&self.symbols)
    }

    fn risk_percent(&self) -> Option<Decimal> {
        self.config.risk_percent
    }

    async fn on_start(&mut self, _ctx: &StrategyContext) -> Result<(), StrategyError> {
        self.config.validate()?;
        info!(
            strategy_id = %self.id,
            symbol = %self.config.symbol,
            oversold = %self.config.oversold,
            overbought = %self.config.overbought,
            "rsi threshold strategy started"
        );
        Ok(())
    }

    async fn on_tick(&mut self, tick: &Tick, ctx: &StrategyContext) -> Result<Action, StrategyError> {
        if tick.symbol != self.config.symbol {
            return Ok(Action::Hold);
        }
        let Some(rsi) = self.current_rsi(ctx)? else {
            return Ok(Action::Hold);
        };

        if let Some(position) = ctx.position() {
            let crossed = match position.side {
                Side::Long => rsi >= self.config.midline,
                Side::Short => rsi <= self.config.midline,
            };
            if crossed {
                debug!(strategy_id = %self.id, rsi = %rsi, entry_rsi = ?self.entry_rsi, "rsi back at midline");
                return Ok(Action::exit(format!("rsi {rsi} crossed midline")));
            }
            return Ok(Action::Hold);
        }

        if rsi < self.config.oversold {
            self.entry_rsi = Some(rsi);
            return Ok(Action::Enter(self.entry_signal(Side::Long, rsi)));
        }
        if rsi > self.config.overbought {
            self.entry_rsi = Some(rsi);
            return Ok(Action::Enter(self.entry_signal(Side::Short, rsi)));
        }
        Ok(Action::Hold)
    }

    async fn on_order_update(
        &mut self,
        update: &OrderUpdate,
        _ctx: &StrategyContext,
    ) -> Result<(), StrategyError> {
        if let OrderUpdate::Closed { pnl, .. } = update {
            info!(strategy_id = %self.id, pnl = %pnl, "rsi trade closed");
            self.entry_rsi = None;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use execution_core::{Position, PositionId};
    use model::IndicatorSnapshot;
    use std::collections::BTreeMap;
    use strategy_core::{create_market_state, SharedMarketState};

    fn tick() -> Tick {
        Tick {
            symbol: "EURUSD".into(),
            timestamp: Utc.with_ymd_and_hms(2024, 3, 6, 10, 0, 0).unwrap(),
            bid: dec!(1.1000),
            ask: dec!(1.1002),
            volume: Decimal::ZERO,
        }
    }

    fn state_with_rsi(rsi: Decimal) -> SharedMarketState {
        let state = create_market_state();
        state.update_indicators(IndicatorSnapshot {
            symbol: "EURUSD".into(),
            timeframe: "M15".into(),
            timestamp: tick().timestamp,
            rsi: Some(rsi),
            macd: None,
            bollinger: None,
            moving_averages: BTreeMap::new(),
        });
        state
    }

    fn position(side: Side) -> Position {
        Position {
            id: PositionId::new(),
            symbol: "EURUSD".into(),
            side,
            quantity: dec!(20000),
            entry_price: dec!(1.1000),
            strategy_id: "rsi".into(),
            opened_at: tick().timestamp,
            session_tag: None,
            risk_amount: dec!(100),
            stop_distance: dec!(0.0050),
            unrealized_pnl: Decimal::ZERO,
        }
    }

    #[tokio::test]
    async fn test_oversold_enters_long() {
        let mut strategy = RsiThresholdStrategy::new("rsi", RsiThresholdConfig::new("EURUSD"));
        let ctx = StrategyContext::new(tick().timestamp, state_with_rsi(dec!(25)));

        match strategy.on_tick(&tick(), &ctx).await.unwrap() {
            Action::Enter(signal) => {
                assert_eq!(signal.side, Side::Long);
                assert_eq!(signal.stop_loss_distance, dec!(0.0050));
                assert_eq!(signal.take_profit_distance, Some(dec!(0.0100)));
            }
            other => panic!("expected entry, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_overbought_enters_short() {
        let mut strategy = RsiThresholdStrategy::new("rsi", RsiThresholdConfig::new("EURUSD"));
        let ctx = StrategyContext::new(tick().timestamp, state_with_rsi(dec!(75)));

        let action = strategy.on_tick(&tick(), &ctx).await.unwrap();
        assert!(matches!(action, Action::Enter(ref s) if s.side == Side::Short));
    }

    #[tokio::test]
    async fn test_holds_without_rsi_or_in_neutral_zone() {
        let mut strategy = RsiThresholdStrategy::new("rsi", RsiThresholdConfig::new("EURUSD"));

        let ctx = StrategyContext::new(tick().timestamp, create_market_state());
        assert!(strategy.on_tick(&tick(), &ctx).await.unwrap().is_hold());

        let ctx = StrategyContext::new(tick().timestamp, state_with_rsi(dec!(50)));
        assert!(strategy.on_tick(&tick(), &ctx).await.unwrap().is_hold());
    }

    #[tokio::test]
    async fn test_exits_on_midline_cross() {
        let mut strategy = RsiThresholdStrategy::new("rsi", RsiThresholdConfig::new("EURUSD"));

        // Long still below the midline: hold
        let ctx = StrategyContext::new(tick().timestamp, state_with_rsi(dec!(45)))
            .with_position(Some(position(Side::Long)));
        assert!(strategy.on_tick(&tick(), &ctx).await.unwrap().is_hold());

        let ctx = StrategyContext::new(tick().timestamp, state_with_rsi(dec!(52)))
            .with_position(Some(position(Side::Long)));
        assert!(matches!(strategy.on_tick(&tick(), &ctx).await.unwrap(), Action::Exit { .. }));

        let ctx = StrategyContext::new(tick().timestamp, state_with_rsi(dec!(48)))
            .with_position(Some(position(Side::Short)));
        assert!(matches!(strategy.on_tick(&tick(), &ctx).await.unwrap(), Action::Exit { .. }));
    }

    #[tokio::test]
    async fn test_snapshot_without_rsi_is_an_error() {
        let mut strategy = RsiThresholdStrategy::new("rsi", RsiThresholdConfig::new("EURUSD"));
        let state = create_market_state();
        state.update_indicators(IndicatorSnapshot {
            symbol: "EURUSD".into(),
            timeframe: "M15".into(),
            timestamp: tick().timestamp,
            rsi: None,
            macd: None,
            bollinger: None,
            moving_averages: BTreeMap::new(),
        });
        let ctx = StrategyContext::new(tick().timestamp, state);

        let err = strategy.on_tick(&tick(), &ctx).await.unwrap_err();
        assert!(matches!(err, StrategyError::IndicatorUnavailable { indicator: "rsi", .. }));
    }

    #[tokio::test]
    async fn test_invalid_thresholds_fail_start() {
        let mut config = RsiThresholdConfig::new("EURUSD");
        config.oversold = dec!(80);
        let mut strategy = RsiThresholdStrategy::new("rsi", config);

        let ctx = StrategyContext::new(tick().timestamp, create_market_state());
        assert!(matches!(
            strategy.on_start(&ctx).await,
            Err(StrategyError::InvalidConfig(_))
        ));
    }
}
