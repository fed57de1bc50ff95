use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Side {
    Long,
    Short,
}

impl Side {
    /// The side that flattens a position opened on `self`.
    pub fn opposite(&self) -> Self {
        match self {
            Self::Long => Self::Short,
            Self::Short => Self::Long,
        }
    }

    /// +1 for long, -1 for short.
    pub fn sign(&self) -> Decimal {
        match self {
            Self::Long => Decimal::ONE,
            Self::Short => Decimal::NEGATIVE_ONE,
        }
    }

    pub fn as_order_str(&self) -> &'static str {
        match self {
            Self::Long => "BUY",
            Self::Short => "SELL",
        }
    }
}

impl fmt::Display for Side {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Long => write!(f, "long"),
            Self::Short => write!(f, "short"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrderType {
    #[default]
    Market,
    Limit,
    Stop,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Tick {
    pub symbol: String,
    pub timestamp: DateTime<Utc>,
    pub bid: Decimal,
    pub ask: Decimal,
    #[serde(default)]
    pub volume: Decimal,
}

impl Tick {
    pub fn mid(&self) -> Decimal {
        (self.bid + self.ask) / Decimal::TWO
    }

    pub fn spread(&self) -> Decimal {
        self.ask - self.bid
    }

    /// Price a fresh order on `side` would pay: ask for longs, bid for shorts.
    pub fn entry_price(&self, side: Side) -> Decimal {
        match side {
            Side::Long => self.ask,
            Side::Short => self.bid,
        }
    }

    /// Price at which a position on `side` could be flattened right now.
    pub fn exit_price(&self, side: Side) -> Decimal {
        self.entry_price(side.opposite())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Macd {
    pub macd: Decimal,
    pub signal: Decimal,
    pub histogram: Decimal,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BollingerBands {
    pub upper: Decimal,
    pub middle: Decimal,
    pub lower: Decimal,
}

/// Indicator values computed upstream for one symbol and timeframe.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndicatorSnapshot {
    pub symbol: String,
    pub timeframe: String,
    pub timestamp: DateTime<Utc>,
    #[serde(default)]
    pub rsi: Option<Decimal>,
    #[serde(default)]
    pub macd: Option<Macd>,
    #[serde(default)]
    pub bollinger: Option<BollingerBands>,
    /// Moving averages keyed by period.
    #[serde(default)]
    pub moving_averages: BTreeMap<u32, Decimal>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum MarketEvent {
    Tick(Tick),
    Indicators(IndicatorSnapshot),
}

impl MarketEvent {
    pub fn symbol(&self) -> &str {
        match self {
            Self::Tick(t) => &t.symbol,
            Self::Indicators(i) => &i.symbol,
        }
    }

    pub fn timestamp(&self) -> DateTime<Utc> {
        match self {
            Self::Tick(t) => t.timestamp,
            Self::Indicators(i) => i.timestamp,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use rust_decimal_macros::dec;

    fn tick() -> Tick {
        Tick {
            symbol: "EURUSD".into(),
            timestamp: Utc.with_ymd_and_hms(2024, 3, 4, 9, 0, 0).unwrap(),
            bid: dec!(1.08500),
            ask: dec!(1.08520),
            volume: dec!(10),
        }
    }

    #[test]
    fn test_tick_prices() {
        let t = tick();
        assert_eq!(t.mid(), dec!(1.08510));
        assert_eq!(t.spread(), dec!(0.00020));
        assert_eq!(t.entry_price(Side::Long), dec!(1.08520));
        assert_eq!(t.exit_price(Side::Long), dec!(1.08500));
        assert_eq!(t.entry_price(Side::Short), dec!(1.08500));
    }

    #[test]
    fn test_side_helpers() {
        assert_eq!(Side::Long.opposite(), Side::Short);
        assert_eq!(Side::Short.sign(), dec!(-1));
        assert_eq!(Side::Short.as_order_str(), "SELL");
    }

    #[test]
    fn test_market_event_json() {
        let json = r#"{"type":"tick","symbol":"EURUSD","timestamp":"2024-03-04T09:00:00Z","bid":"1.085","ask":"1.0852"}"#;
        let event: MarketEvent = serde_json::from_str(json).unwrap();
        assert_eq!(event.symbol(), "EURUSD");
        assert!(matches!(event, MarketEvent::Tick(ref t) if t.volume == Decimal::ZERO));
    }
}
