//! Paper broker for simulated order fills.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use parking_lot::Mutex;
use tracing::{debug, warn};

use connector_core::{BrokerAdapter, BrokerError, BrokerEvent, BrokerEventSender, OrderHandle, OrderRequest};

/// Counter for generating unique simulated order IDs.
static SIMULATED_ORDER_ID: AtomicU64 = AtomicU64::new(1_000_000);

/// How the paper broker answers submitted orders.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum PaperFillMode {
    /// Full fill at the request's reference price.
    #[default]
    Immediate,
    /// Reject every order with this reason.
    Reject(String),
    /// Acknowledge but never fill; cancels are confirmed.
    Silent,
}

/// Simulated broker for paper trading.
///
/// Orders are acknowledged synchronously; fills are pushed onto the broker
/// event channel from a separate task, so they may arrive before or after
/// the submit call returns, as with a real venue.
pub struct PaperBroker {
    events: BrokerEventSender,
    mode: PaperFillMode,
    fill_timeout: Duration,
    submitted: Mutex<Vec<OrderRequest>>,
}

impl PaperBroker {
    pub fn new(events: BrokerEventSender) -> Self {
        Self {
            events,
            mode: PaperFillMode::Immediate,
            fill_timeout: Duration::from_secs(30),
            submitted: Mutex::new(Vec::new()),
        }
    }

    pub fn with_mode(mut self, mode: PaperFillMode) -> Self {
        self.mode = mode;
        self
    }

    pub fn with_fill_timeout(mut self, timeout: Duration) -> Self {
        self.fill_timeout = timeout;
        self
    }

    /// Every order submitted so far, oldest first.
    pub fn submitted(&self) -> Vec<OrderRequest> {
        self.submitted.lock().clone()
    }

    fn deliver(&self, event: BrokerEvent) {
        let tx = self.events.clone();
        tokio::spawn(async move {
            if tx.send(event).await.is_err() {
                warn!("broker event channel closed, dropping paper event");
            }
        });
    }
}

#[async_trait]
impl BrokerAdapter for PaperBroker {
    fn name(&self) -> &str {
        "paper"
    }

    fn fill_timeout(&self) -> Duration {
        self.fill_timeout
    }

    async fn submit_order(&self, request: OrderRequest) -> Result<OrderHandle, BrokerError> {
        if self.events.is_closed() {
            return Err(BrokerError::ChannelClosed);
        }

        let broker_order_id = format!("PAPER-{}", SIMULATED_ORDER_ID.fetch_add(1, Ordering::Relaxed));
        self.submitted.lock().push(request.clone());

        let now = Utc::now();
        match &self.mode {
            PaperFillMode::Immediate => match request.reference_price {
                Some(fill_price) => {
                    debug!(
                        client_order_id = %request.client_order_id,
                        symbol = %request.symbol,
                        side = %request.side,
                        qty = %request.quantity,
                        price = %fill_price,
                        "simulated fill"
                    );
                    self.deliver(BrokerEvent::Filled {
                        client_order_id: request.client_order_id.clone(),
                        fill_price,
                        fill_qty: request.quantity,
                        at: now,
                    });
                }
                None => self.deliver(BrokerEvent::Rejected {
                    client_order_id: request.client_order_id.clone(),
                    reason: "no reference price to fill at".to_string(),
                    at: now,
                }),
            },
            PaperFillMode::Reject(reason) => self.deliver(BrokerEvent::Rejected {
                client_order_id: request.client_order_id.clone(),
                reason: reason.clone(),
                at: now,
            }),
            PaperFillMode::Silent => {}
        }

        Ok(OrderHandle {
            client_order_id: request.client_order_id,
            broker_order_id,
        })
    }

    async fn cancel_order(&self, handle: &OrderHandle) -> Result<(), BrokerError> {
        if self.mode == PaperFillMode::Silent {
            self.deliver(BrokerEvent::Canceled {
                client_order_id: handle.client_order_id.clone(),
                at: Utc::now(),
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use connector_core::create_broker_channel;
    use model::Side;
    use rust_decimal_macros::dec;

    #[tokio::test]
    async fn test_fills_at_reference_price() {
        let (tx, mut rx) = create_broker_channel(8);
        let broker = PaperBroker::new(tx);

        let request = OrderRequest::market("ENG_1", "EURUSD", Side::Long, dec!(20000))
            .with_reference_price(dec!(1.1000));
        let handle = broker.submit_order(request).await.unwrap();
        assert!(handle.broker_order_id.starts_with("PAPER-"));

        match rx.recv().await.unwrap() {
            BrokerEvent::Filled { client_order_id, fill_price, fill_qty, .. } => {
                assert_eq!(client_order_id, "ENG_1");
                assert_eq!(fill_price, dec!(1.1000));
                assert_eq!(fill_qty, dec!(20000));
            }
            other => panic!("unexpected event {other:?}"),
        }
        assert_eq!(broker.submitted().len(), 1);
    }

    #[tokio::test]
    async fn test_rejects_without_reference_price() {
        let (tx, mut rx) = create_broker_channel(8);
        let broker = PaperBroker::new(tx);

        broker
            .submit_order(OrderRequest::market("ENG_2", "EURUSD", Side::Short, dec!(1000)))
            .await
            .unwrap();
        assert!(matches!(rx.recv().await.unwrap(), BrokerEvent::Rejected { .. }));
    }

    #[tokio::test]
    async fn test_silent_mode_confirms_cancel() {
        let (tx, mut rx) = create_broker_channel(8);
        let broker = PaperBroker::new(tx).with_mode(PaperFillMode::Silent);

        let request = OrderRequest::market("ENG_3", "EURUSD", Side::Long, dec!(1000))
            .with_reference_price(dec!(1.1));
        let handle = broker.submit_order(request).await.unwrap();
        broker.cancel_order(&handle).await.unwrap();

        assert!(matches!(
            rx.recv().await.unwrap(),
            BrokerEvent::Canceled { client_order_id, .. } if client_order_id == "ENG_3"
        ));
    }

    #[tokio::test]
    async fn test_closed_channel_fails_submit() {
        let (tx, rx) = create_broker_channel(1);
        drop(rx);
        let broker = PaperBroker::new(tx);

        let err = broker
            .submit_order(OrderRequest::market("ENG_4", "EURUSD", Side::Long, dec!(1)))
            .await
            .unwrap_err();
        assert!(matches!(err, BrokerError::ChannelClosed));
        assert!(err.is_transport());
    }
}
