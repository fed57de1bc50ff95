//! Seams to the engine's external collaborators.
//!
//! - **Market data**: normalized `MarketEvent`s arrive on an mpsc channel
//! - **Broker adapters**: `BrokerAdapter` places and cancels orders; fills,
//!   cancels and rejects flow back as `BrokerEvent`s on a per-account channel

mod broker;
mod error;

use model::MarketEvent;
use tokio::sync::mpsc;

pub use broker::{BrokerAdapter, BrokerEvent, OrderHandle, OrderRequest, SharedBroker};
pub use error::BrokerError;

pub type MarketEventSender = mpsc::Sender<MarketEvent>;
pub type MarketEventReceiver = mpsc::Receiver<MarketEvent>;

pub fn create_market_channel(capacity: usize) -> (MarketEventSender, MarketEventReceiver) {
    mpsc::channel(capacity)
}

pub type BrokerEventSender = mpsc::Sender<BrokerEvent>;
pub type BrokerEventReceiver = mpsc::Receiver<BrokerEvent>;

pub fn create_broker_channel(capacity: usize) -> (BrokerEventSender, BrokerEventReceiver) {
    mpsc::channel(capacity)
}
