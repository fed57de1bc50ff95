//! Account-level execution state.
//!
//! This crate owns the data every strategy shares:
//!
//! - **Limits**: `RiskLimits`, the immutable risk thresholds loaded at startup
//! - **Intents**: `OrderIntent`, a sized candidate order and its risk verdict
//! - **Positions**: `Position`, created on fill and destroyed on close
//! - **Ledger**: `RiskLedger`, the single mutation path for equity, P&L,
//!   reservations and open positions
//! - **Correlation registry**: `PendingOrderRegistry`, mapping client order ids
//!   back to the reservation or position they belong to
//!
//! # Order Lifecycle
//!
//! 1. A strategy signal is sized and approved by the risk gate
//! 2. `RiskLedger::reserve_exposure` holds the exposure (re-validating limits)
//! 3. A `client_order_id` is generated and pre-registered in `PendingOrderRegistry`
//! 4. The order is submitted to the broker adapter
//! 5. A fill commits the reservation into a `Position`; a cancel, reject or
//!    timeout releases it
//! 6. A close confirmation removes the position and realizes its P&L

mod correlation;
mod error;
mod ledger;
mod limits;
mod order;
mod position;

pub use correlation::{
    create_pending_order_registry, generate_client_order_id, OrderPurpose, PendingOrder,
    PendingOrderRegistry, SharedPendingOrderRegistry,
};
pub use error::{LedgerError, RiskRejection};
pub use ledger::{
    create_ledger, AccountView, CommitOutcome, ReleaseOutcome, Reservation, ReservationId,
    RiskLedger, SharedLedger, TradingPeriod,
};
pub use limits::RiskLimits;
pub use order::{IntentStatus, OrderIntent};
pub use position::{Position, PositionId};
