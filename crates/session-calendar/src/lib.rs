//! Trading session schedule and news blackout windows.
//!
//! Answers three questions for any UTC instant:
//!
//! - which configured sessions (London, New York, Tokyo, ...) are open,
//! - whether a scheduled economic release puts trading in blackout,
//! - which trading day and week the instant belongs to.
//!
//! Sessions are declared in local wall-clock time with an IANA timezone, so
//! daylight-saving shifts are handled by converting the instant into each
//! session's zone rather than by storing UTC offsets.

mod calendar;
mod error;
mod news;
mod window;

pub use calendar::{SessionCalendar, TradingDayConfig, TradingDayRule};
pub use error::CalendarError;
pub use news::{BlackoutPolicy, ImpactLevel, NewsEvent};
pub use window::{SessionWindow, SessionWindowConfig};

// Re-exported so callers can name zones without a direct dependency
pub use chrono_tz::Tz;
