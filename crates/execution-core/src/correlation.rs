//! Client order id correlation between submissions and broker events.
//!
//! When placing an order:
//! 1. Generate a unique client order id
//! 2. Pre-register it with what the order is for (entry, exit or flatten)
//!    and its fill deadline
//! 3. Submit to the broker adapter
//! 4. Either:
//!    a. the submit response arrives first -> record the broker order id
//!    b. a fill or cancel arrives first -> the event is resolved from the
//!       registry and the entry removed; the late submit response is ignored
//!
//! Entries still present after their deadline are marked timed out by the
//! coordinator's watchdog. They stay in the registry so that a fill arriving
//! after the timeout can still be correlated, and are purged later.

use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use model::Side;
use rust_decimal::Decimal;
use uuid::Uuid;

use crate::ledger::ReservationId;
use crate::position::PositionId;

/// Generate a unique client order id with a prefix.
///
/// Format: `{prefix}_{uuid}` where uuid is a v4 UUID in simple format (no hyphens).
pub fn generate_client_order_id(prefix: &str) -> String {
    format!("{}_{}", prefix, Uuid::new_v4().as_simple())
}

/// What a submitted order is meant to do.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OrderPurpose {
    /// Opens a position; a fill commits the reservation.
    Entry { reservation_id: ReservationId },
    /// Closes a ledger position.
    Exit { position_id: PositionId },
    /// Offsets a fill that arrived after its reservation was released.
    Flatten,
}

impl fmt::Display for OrderPurpose {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Entry { reservation_id } => write!(f, "entry({reservation_id})"),
            Self::Exit { position_id } => write!(f, "exit({position_id})"),
            Self::Flatten => write!(f, "flatten"),
        }
    }
}

/// An order submitted to a broker and not yet resolved.
#[derive(Debug, Clone, PartialEq)]
pub struct PendingOrder {
    pub client_order_id: String,
    pub purpose: OrderPurpose,
    pub strategy_id: String,
    pub symbol: String,
    pub side: Side,
    pub quantity: Decimal,
    pub created_at: DateTime<Utc>,
    /// After this instant the watchdog gives up on the order.
    pub deadline: DateTime<Utc>,
    /// Broker-assigned id, once the submit response arrived.
    pub broker_order_id: Option<String>,
    /// Set once the watchdog has given up on the order.
    pub timed_out: bool,
}

impl PendingOrder {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        client_order_id: impl Into<String>,
        purpose: OrderPurpose,
        strategy_id: impl Into<String>,
        symbol: impl Into<String>,
        side: Side,
        quantity: Decimal,
        created_at: DateTime<Utc>,
        deadline: DateTime<Utc>,
    ) -> Self {
        Self {
            client_order_id: client_order_id.into(),
            purpose,
            strategy_id: strategy_id.into(),
            symbol: symbol.into(),
            side,
            quantity,
            created_at,
            deadline,
            broker_order_id: None,
            timed_out: false,
        }
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now >= self.deadline
    }
}

/// Thread-safe registry keyed by client order id.
///
/// # Usage
///
/// ```rust,ignore
/// let registry = PendingOrderRegistry::new();
///
/// // Before submitting
/// registry.register(pending);
///
/// // Submit response
/// if !registry.acknowledge(&client_order_id, &handle.broker_order_id) {
///     // a terminal event already resolved the order
/// }
///
/// // Broker event (in the coordinator task)
/// if let Some(order) = registry.take(&event.client_order_id) { /* apply */ }
/// ```
pub struct PendingOrderRegistry {
    pending: DashMap<String, PendingOrder>,
}

impl Default for PendingOrderRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl PendingOrderRegistry {
    /// Create a new empty registry.
    pub fn new() -> Self {
        Self {
            pending: DashMap::new(),
        }
    }

    /// Pre-register an order. Must happen before the broker sees it.
    pub fn register(&self, order: PendingOrder) {
        self.pending.insert(order.client_order_id.clone(), order);
    }

    /// Record the broker order id from the submit response.
    ///
    /// Returns `false` if the order was already resolved by a broker event
    /// that raced ahead of the response.
    pub fn acknowledge(&self, client_order_id: &str, broker_order_id: &str) -> bool {
        match self.pending.get_mut(client_order_id) {
            Some(mut entry) => {
                if entry.broker_order_id.is_some() {
                    tracing::warn!(
                        client_order_id = %client_order_id,
                        "duplicate submit response received"
                    );
                }
                entry.broker_order_id = Some(broker_order_id.to_string());
                true
            }
            None => false,
        }
    }

    pub fn get(&self, client_order_id: &str) -> Option<PendingOrder> {
        self.pending.get(client_order_id).map(|e| e.clone())
    }

    /// Remove and return an order on a terminal broker event.
    pub fn take(&self, client_order_id: &str) -> Option<PendingOrder> {
        self.pending.remove(client_order_id).map(|(_, order)| order)
    }

    /// Mark every live order whose deadline has passed as timed out and
    /// return them. Orders already marked are not returned again.
    pub fn expire(&self, now: DateTime<Utc>) -> Vec<PendingOrder> {
        let mut expired = Vec::new();
        for mut entry in self.pending.iter_mut() {
            if !entry.timed_out && entry.is_expired(now) {
                entry.timed_out = true;
                expired.push(entry.clone());
            }
        }
        expired
    }

    /// Drop timed-out orders whose deadline is before `cutoff`.
    ///
    /// Returns how many were dropped.
    pub fn purge(&self, cutoff: DateTime<Utc>) -> usize {
        let before = self.pending.len();
        self.pending
            .retain(|_, order| !(order.timed_out && order.deadline < cutoff));
        before.saturating_sub(self.pending.len())
    }

    /// Get the number of pending orders.
    pub fn len(&self) -> usize {
        self.pending.len()
    }

    /// Check if the registry is empty.
    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    /// Orders still waiting on the broker, excluding timed-out ones kept
    /// around for late fills.
    pub fn in_flight(&self) -> usize {
        self.pending.iter().filter(|e| !e.timed_out).count()
    }
}

/// Shared handle to the pending order registry.
pub type SharedPendingOrderRegistry = Arc<PendingOrderRegistry>;

/// Create a new shared pending order registry.
pub fn create_pending_order_registry() -> SharedPendingOrderRegistry {
    Arc::new(PendingOrderRegistry::new())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use rust_decimal_macros::dec;

    fn make_pending(client_order_id: &str, created_at: DateTime<Utc>) -> PendingOrder {
        PendingOrder::new(
            client_order_id,
            OrderPurpose::Entry {
                reservation_id: ReservationId::new(),
            },
            "rsi",
            "EURUSD",
            Side::Long,
            dec!(1000),
            created_at,
            created_at + Duration::seconds(30),
        )
    }

    #[test]
    fn test_generate_client_order_id() {
        let id1 = generate_client_order_id("ENG");
        let id2 = generate_client_order_id("ENG");

        assert!(id1.starts_with("ENG_"));
        assert_ne!(id1, id2);
    }

    #[test]
    fn test_normal_flow_ack_first() {
        let registry = PendingOrderRegistry::new();
        registry.register(make_pending("order_1", Utc::now()));

        assert!(registry.acknowledge("order_1", "B-1"));
        assert_eq!(
            registry.get("order_1").unwrap().broker_order_id.as_deref(),
            Some("B-1")
        );

        let order = registry.take("order_1").unwrap();
        assert_eq!(order.broker_order_id.as_deref(), Some("B-1"));
        assert!(registry.is_empty());
    }

    #[test]
    fn test_fill_before_ack() {
        let registry = PendingOrderRegistry::new();
        registry.register(make_pending("order_2", Utc::now()));

        // Fill resolves the order before the submit response
        let order = registry.take("order_2").unwrap();
        assert!(order.broker_order_id.is_none());

        // Late response is reported as already resolved
        assert!(!registry.acknowledge("order_2", "B-2"));
        assert!(registry.is_empty());
    }

    #[test]
    fn test_unknown_order_event() {
        let registry = PendingOrderRegistry::new();
        assert!(registry.take("unknown").is_none());
    }

    #[test]
    fn test_expire_marks_once() {
        let registry = PendingOrderRegistry::new();
        let now = Utc::now();

        registry.register(make_pending("old_order", now - Duration::seconds(60)));
        registry.register(make_pending("new_order", now));

        let expired = registry.expire(now);
        assert_eq!(expired.len(), 1);
        assert_eq!(expired[0].client_order_id, "old_order");
        assert!(expired[0].timed_out);
        assert_eq!(registry.len(), 2);
        assert_eq!(registry.in_flight(), 1);

        // Already marked
        assert!(registry.expire(now).is_empty());
    }

    #[test]
    fn test_late_fill_after_timeout_still_correlates() {
        let registry = PendingOrderRegistry::new();
        let now = Utc::now();
        registry.register(make_pending("slow", now - Duration::seconds(60)));
        registry.expire(now);

        let order = registry.take("slow").unwrap();
        assert!(order.timed_out);
        assert!(registry.is_empty());
    }

    #[test]
    fn test_purge_drops_only_old_timed_out() {
        let registry = PendingOrderRegistry::new();
        let now = Utc::now();
        registry.register(make_pending("stale", now - Duration::hours(2)));
        registry.register(make_pending("live", now - Duration::hours(2)));
        registry.register(make_pending("recent", now - Duration::seconds(45)));
        registry.expire(now);

        // "live" was expired too; re-arm it to check untimed entries survive
        registry.take("live");
        registry.register(make_pending("live", now));

        let dropped = registry.purge(now - Duration::hours(1));
        assert_eq!(dropped, 1);
        assert!(registry.get("stale").is_none());
        assert!(registry.get("recent").is_some());
        assert!(registry.get("live").is_some());
    }
}
