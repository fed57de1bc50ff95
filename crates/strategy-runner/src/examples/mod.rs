//! Reference strategy implementations.
//!
//! These strategies show how to implement the `Strategy` trait and are
//! wired into the runner binary.

mod rsi_threshold;
mod session_breakout;

pub use rsi_threshold::{RsiThresholdConfig, RsiThresholdStrategy};
pub use session_breakout::{SessionBreakoutConfig, SessionBreakoutStrategy, SessionRange};
