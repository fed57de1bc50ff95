//! Scheduled economic releases and the blackout window around them.

use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::error::CalendarError;

/// Market impact of a scheduled release.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ImpactLevel {
    Low,
    Medium,
    High,
}

impl fmt::Display for ImpactLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ImpactLevel::Low => write!(f, "low"),
            ImpactLevel::Medium => write!(f, "medium"),
            ImpactLevel::High => write!(f, "high"),
        }
    }
}

impl FromStr for ImpactLevel {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "low" => Ok(ImpactLevel::Low),
            "medium" => Ok(ImpactLevel::Medium),
            "high" => Ok(ImpactLevel::High),
            other => Err(format!("unknown impact level '{other}'")),
        }
    }
}

/// A scheduled economic release.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewsEvent {
    pub title: String,
    pub scheduled_at: DateTime<Utc>,
    pub impact: ImpactLevel,
}

impl NewsEvent {
    pub fn new(title: impl Into<String>, scheduled_at: DateTime<Utc>, impact: ImpactLevel) -> Self {
        Self {
            title: title.into(),
            scheduled_at,
            impact,
        }
    }
}

/// Longest accepted blackout buffer on either side of an event: one week.
const MAX_BLACKOUT_MINUTES: i64 = 7 * 24 * 60;

/// How long before and after a release trading is suspended, and for which
/// impact levels.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct BlackoutPolicy {
    pub pre_news_minutes: i64,
    pub post_news_minutes: i64,
    pub enabled_impacts: BTreeSet<ImpactLevel>,
}

impl Default for BlackoutPolicy {
    fn default() -> Self {
        Self {
            pre_news_minutes: 30,
            post_news_minutes: 60,
            enabled_impacts: BTreeSet::from([ImpactLevel::High]),
        }
    }
}

impl BlackoutPolicy {
    pub fn with_minutes(mut self, pre: i64, post: i64) -> Self {
        self.pre_news_minutes = pre;
        self.post_news_minutes = post;
        self
    }

    pub fn with_impacts(mut self, impacts: impl IntoIterator<Item = ImpactLevel>) -> Self {
        self.enabled_impacts = impacts.into_iter().collect();
        self
    }

    pub fn validate(&self) -> Result<(), CalendarError> {
        let in_range = |minutes: i64| (0..=MAX_BLACKOUT_MINUTES).contains(&minutes);
        if !in_range(self.pre_news_minutes) || !in_range(self.post_news_minutes) {
            return Err(CalendarError::InvalidBlackout {
                pre: self.pre_news_minutes,
                post: self.post_news_minutes,
            });
        }
        Ok(())
    }

    /// Inclusive blackout interval around an event. Buffers are clamped
    /// to the validated range.
    pub fn window_for(&self, event: &NewsEvent) -> (DateTime<Utc>, DateTime<Utc>) {
        let buffer = |minutes: i64| Duration::minutes(minutes.clamp(0, MAX_BLACKOUT_MINUTES));
        let at = event.scheduled_at;
        (
            at.checked_sub_signed(buffer(self.pre_news_minutes))
                .unwrap_or(DateTime::<Utc>::MIN_UTC),
            at.checked_add_signed(buffer(self.post_news_minutes))
                .unwrap_or(DateTime::<Utc>::MAX_UTC),
        )
    }

    /// True when `event` blacks out trading at `at` for a caller that cares
    /// about releases of at least `min_impact`.
    pub fn covers(&self, event: &NewsEvent, at: DateTime<Utc>, min_impact: ImpactLevel) -> bool {
        if event.impact < min_impact || !self.enabled_impacts.contains(&event.impact) {
            return false;
        }
        let (from, to) = self.window_for(event);
        from <= at && at <= to
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn nfp() -> NewsEvent {
        NewsEvent::new(
            "Non-Farm Payrolls",
            Utc.with_ymd_and_hms(2024, 3, 8, 13, 30, 0).unwrap(),
            ImpactLevel::High,
        )
    }

    #[test]
    fn test_default_policy() {
        let policy = BlackoutPolicy::default();
        assert_eq!(policy.pre_news_minutes, 30);
        assert_eq!(policy.post_news_minutes, 60);
        assert!(policy.enabled_impacts.contains(&ImpactLevel::High));
        assert!(!policy.enabled_impacts.contains(&ImpactLevel::Low));
    }

    #[test]
    fn test_window_bounds_are_inclusive() {
        let policy = BlackoutPolicy::default();
        let event = nfp();
        let t = event.scheduled_at;

        assert!(policy.covers(&event, t - Duration::minutes(30), ImpactLevel::Low));
        assert!(policy.covers(&event, t + Duration::minutes(60), ImpactLevel::Low));
        assert!(!policy.covers(&event, t - Duration::minutes(31), ImpactLevel::Low));
        assert!(!policy.covers(&event, t + Duration::minutes(61), ImpactLevel::Low));
    }

    #[test]
    fn test_disabled_impact_is_ignored() {
        let policy = BlackoutPolicy::default();
        let mut event = nfp();
        event.impact = ImpactLevel::Medium;
        assert!(!policy.covers(&event, event.scheduled_at, ImpactLevel::Low));

        let policy = policy.with_impacts([ImpactLevel::Medium, ImpactLevel::High]);
        assert!(policy.covers(&event, event.scheduled_at, ImpactLevel::Medium));
        // caller only cares about high impact
        assert!(!policy.covers(&event, event.scheduled_at, ImpactLevel::High));
    }

    #[test]
    fn test_out_of_range_minutes_rejected() {
        let policy = BlackoutPolicy::default().with_minutes(-5, 10);
        assert_eq!(
            policy.validate(),
            Err(CalendarError::InvalidBlackout { pre: -5, post: 10 })
        );

        let oversized = BlackoutPolicy::default().with_minutes(30, i64::MAX);
        assert!(oversized.validate().is_err());
        // Unvalidated policies still produce a window instead of panicking
        let (from, to) = oversized.window_for(&nfp());
        assert_eq!(from, nfp().scheduled_at - Duration::minutes(30));
        assert_eq!(to, nfp().scheduled_at + Duration::weeks(1));

        assert!(BlackoutPolicy::default().with_minutes(0, 7 * 24 * 60).validate().is_ok());
    }

    #[test]
    fn test_impact_parse_and_order() {
        assert_eq!("HIGH".parse::<ImpactLevel>().unwrap(), ImpactLevel::High);
        assert!("severe".parse::<ImpactLevel>().is_err());
        assert!(ImpactLevel::Low < ImpactLevel::Medium);
        assert_eq!(ImpactLevel::Medium.to_string(), "medium");
    }
}
