//! Broker adapter interface.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use model::{OrderType, Side};
use rust_decimal::Decimal;

use crate::error::BrokerError;

/// An order as handed to a broker adapter.
#[derive(Debug, Clone, PartialEq)]
pub struct OrderRequest {
    /// Engine-generated id echoed back on every broker event.
    pub client_order_id: String,
    pub symbol: String,
    pub side: Side,
    pub quantity: Decimal,
    pub order_type: OrderType,
    /// Limit or stop trigger price, for non-market orders.
    pub price: Option<Decimal>,
    pub stop_loss: Option<Decimal>,
    pub take_profit: Option<Decimal>,
    /// Price the engine expects to trade at.
    pub reference_price: Option<Decimal>,
}

impl OrderRequest {
    pub fn market(
        client_order_id: impl Into<String>,
        symbol: impl Into<String>,
        side: Side,
        quantity: Decimal,
    ) -> Self {
        Self {
            client_order_id: client_order_id.into(),
            symbol: symbol.into(),
            side,
            quantity,
            order_type: OrderType::Market,
            price: None,
            stop_loss: None,
            take_profit: None,
            reference_price: None,
        }
    }

    pub fn with_stop_loss(mut self, price: Decimal) -> Self {
        self.stop_loss = Some(price);
        self
    }

    pub fn with_take_profit(mut self, price: Option<Decimal>) -> Self {
        self.take_profit = price;
        self
    }

    pub fn with_reference_price(mut self, price: Decimal) -> Self {
        self.reference_price = Some(price);
        self
    }
}

/// Acknowledgement of a submitted order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OrderHandle {
    pub client_order_id: String,
    pub broker_order_id: String,
}

/// Asynchronous order outcome pushed by a broker adapter.
#[derive(Debug, Clone, PartialEq)]
pub enum BrokerEvent {
    Filled {
        client_order_id: String,
        fill_price: Decimal,
        fill_qty: Decimal,
        at: DateTime<Utc>,
    },
    Canceled {
        client_order_id: String,
        at: DateTime<Utc>,
    },
    Rejected {
        client_order_id: String,
        reason: String,
        at: DateTime<Utc>,
    },
}

impl BrokerEvent {
    pub fn client_order_id(&self) -> &str {
        match self {
            Self::Filled { client_order_id, .. }
            | Self::Canceled { client_order_id, .. }
            | Self::Rejected { client_order_id, .. } => client_order_id,
        }
    }

    pub fn at(&self) -> DateTime<Utc> {
        match self {
            Self::Filled { at, .. } | Self::Canceled { at, .. } | Self::Rejected { at, .. } => *at,
        }
    }
}

/// Order transport for one broker or exchange.
///
/// `submit_order` returns once the broker acknowledged the order; the fill
/// (or cancel/reject) arrives later as a `BrokerEvent` and may overtake the
/// acknowledgement.
#[async_trait]
pub trait BrokerAdapter: Send + Sync {
    fn name(&self) -> &str;

    /// How long an unfilled order is given before the engine gives up on it.
    fn fill_timeout(&self) -> Duration {
        Duration::from_secs(30)
    }

    async fn submit_order(&self, request: OrderRequest) -> Result<OrderHandle, BrokerError>;

    async fn cancel_order(&self, handle: &OrderHandle) -> Result<(), BrokerError>;
}

pub type SharedBroker = Arc<dyn BrokerAdapter>;
