//! Shared process plumbing: logging bootstrap and trading mode selection.

mod environment;

pub use environment::{ParseTradingModeError, TradingMode};

use tracing_subscriber::EnvFilter;

/// Install the global tracing subscriber.
///
/// The filter comes from `RUST_LOG` and falls back to `info`. With `json`
/// set, events are emitted as one JSON object per line for log shippers.
pub fn init_logging_with(json: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    if json {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_target(true)
            .json()
            .try_init();
    } else {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_target(false)
            .try_init();
    }
}

/// Install the default human-readable subscriber.
pub fn init_logging() {
    init_logging_with(false);
}
