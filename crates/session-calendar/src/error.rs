//! Calendar configuration errors.

use thiserror::Error;

/// Errors raised while building a calendar from configuration.
///
/// All of them are startup failures: a malformed schedule must stop the
/// engine before it trades.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum CalendarError {
    /// A time of day could not be parsed.
    #[error("invalid time of day '{0}', expected HH:MM or HH:MM:SS")]
    InvalidTime(String),

    /// The timezone is not a known IANA name.
    #[error("unknown timezone '{0}'")]
    UnknownTimezone(String),

    /// Weekday outside 1 (Monday) ..= 7 (Sunday).
    #[error("invalid weekday {weekday} in session '{session}', expected 1-7")]
    InvalidWeekday {
        /// Session name.
        session: String,
        /// Offending value.
        weekday: u8,
    },

    /// A session has no active weekdays.
    #[error("session '{0}' has no active weekdays")]
    NoWeekdays(String),

    /// Two sessions share a name.
    #[error("duplicate session name '{0}'")]
    DuplicateSession(String),

    /// Blackout buffers must lie within zero and one week.
    #[error("news blackout minutes must be within 0..=10080, got pre={pre} post={post}")]
    InvalidBlackout {
        /// Minutes before the event.
        pre: i64,
        /// Minutes after the event.
        post: i64,
    },
}
