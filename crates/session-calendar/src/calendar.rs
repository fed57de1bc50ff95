//! The weekly session calendar.

use std::collections::{BTreeMap, BTreeSet};

use chrono::{DateTime, Datelike, Duration, IsoWeek, NaiveDate, NaiveTime, Utc};
use chrono_tz::Tz;
use serde::Deserialize;
use tracing::debug;

use crate::error::CalendarError;
use crate::news::{BlackoutPolicy, ImpactLevel, NewsEvent};
use crate::window::{parse_time, parse_timezone, SessionWindow};

/// Configured trading-day boundary, as read from configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct TradingDayConfig {
    pub timezone: String,
    pub rollover: String,
}

impl Default for TradingDayConfig {
    fn default() -> Self {
        Self {
            timezone: "America/New_York".to_string(),
            rollover: "17:00".to_string(),
        }
    }
}

/// Trading-day boundary: the local time in a zone at which a new trading
/// day begins.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TradingDayRule {
    pub timezone: Tz,
    pub rollover: NaiveTime,
}

impl Default for TradingDayRule {
    /// 17:00 New York, the forex day boundary.
    fn default() -> Self {
        Self {
            timezone: chrono_tz::America::New_York,
            rollover: NaiveTime::from_hms_opt(17, 0, 0).unwrap_or(NaiveTime::MIN),
        }
    }
}

impl TryFrom<&TradingDayConfig> for TradingDayRule {
    type Error = CalendarError;

    fn try_from(config: &TradingDayConfig) -> Result<Self, Self::Error> {
        Ok(Self {
            timezone: parse_timezone(&config.timezone)?,
            rollover: parse_time(&config.rollover)?,
        })
    }
}

/// Sessions, news events, and the trading-day rule.
///
/// Immutable once built; share it behind an `Arc`.
#[derive(Debug, Clone)]
pub struct SessionCalendar {
    sessions: BTreeMap<String, SessionWindow>,
    events: Vec<NewsEvent>,
    blackout: BlackoutPolicy,
    trading_day: TradingDayRule,
}

impl Default for SessionCalendar {
    fn default() -> Self {
        Self {
            sessions: BTreeMap::new(),
            events: Vec::new(),
            blackout: BlackoutPolicy::default(),
            trading_day: TradingDayRule::default(),
        }
    }
}

impl SessionCalendar {
    /// Build a calendar from validated sessions. Session names must be unique.
    pub fn new(sessions: impl IntoIterator<Item = SessionWindow>) -> Result<Self, CalendarError> {
        let mut map = BTreeMap::new();
        for session in sessions {
            let name = session.name().to_string();
            if map.insert(name.clone(), session).is_some() {
                return Err(CalendarError::DuplicateSession(name));
            }
        }
        Ok(Self {
            sessions: map,
            ..Self::default()
        })
    }

    /// The four major forex sessions.
    pub fn major_forex() -> Self {
        let sessions = [
            SessionWindow::sydney(),
            SessionWindow::tokyo(),
            SessionWindow::london(),
            SessionWindow::new_york(),
        ];
        Self {
            sessions: sessions
                .into_iter()
                .map(|s| (s.name().to_string(), s))
                .collect(),
            ..Self::default()
        }
    }

    pub fn with_news(mut self, policy: BlackoutPolicy, events: Vec<NewsEvent>) -> Result<Self, CalendarError> {
        policy.validate()?;
        self.blackout = policy;
        self.events = events;
        self.events.sort_by_key(|e| e.scheduled_at);
        Ok(self)
    }

    pub fn with_trading_day(mut self, rule: TradingDayRule) -> Self {
        self.trading_day = rule;
        self
    }

    pub fn session(&self, name: &str) -> Option<&SessionWindow> {
        self.sessions.get(name)
    }

    pub fn session_names(&self) -> impl Iterator<Item = &str> {
        self.sessions.keys().map(String::as_str)
    }

    pub fn events(&self) -> &[NewsEvent] {
        &self.events
    }

    pub fn blackout_policy(&self) -> &BlackoutPolicy {
        &self.blackout
    }

    /// Unknown session names are never active.
    pub fn is_session_active(&self, name: &str, at: DateTime<Utc>) -> bool {
        self.sessions.get(name).is_some_and(|s| s.contains(at))
    }

    pub fn active_sessions(&self, at: DateTime<Utc>) -> BTreeSet<String> {
        self.sessions
            .values()
            .filter(|s| s.contains(at))
            .map(|s| s.name().to_string())
            .collect()
    }

    pub fn any_session_active(&self, at: DateTime<Utc>) -> bool {
        self.sessions.values().any(|s| s.contains(at))
    }

    /// Time until `name` next opens; zero while it is open.
    pub fn time_until_session(&self, name: &str, at: DateTime<Utc>) -> Option<Duration> {
        let session = self.sessions.get(name)?;
        if session.contains(at) {
            return Some(Duration::zero());
        }
        session.next_open_after(at).map(|open| open - at)
    }

    /// Time until the open occurrence of `name` closes. `None` while it is
    /// closed or when it never closes.
    pub fn time_until_close(&self, name: &str, at: DateTime<Utc>) -> Option<Duration> {
        self.sessions
            .get(name)?
            .close_after(at)
            .map(|close| close - at)
    }

    /// The first scheduled event that blacks out trading at `at`.
    pub fn blackout_event(&self, at: DateTime<Utc>, min_impact: ImpactLevel) -> Option<&NewsEvent> {
        let event = self
            .events
            .iter()
            .find(|e| self.blackout.covers(e, at, min_impact));
        if let Some(e) = event {
            debug!(title = %e.title, impact = %e.impact, at = %at, "news blackout in effect");
        }
        event
    }

    pub fn in_news_blackout(&self, at: DateTime<Utc>, impact: ImpactLevel) -> bool {
        self.blackout_event(at, impact).is_some()
    }

    /// Trading day containing `at`. Instants at or after the rollover
    /// belong to the next calendar date.
    pub fn trading_day(&self, at: DateTime<Utc>) -> NaiveDate {
        let local = at.with_timezone(&self.trading_day.timezone);
        let date = local.date_naive();
        if local.time() >= self.trading_day.rollover {
            date.succ_opt().unwrap_or(date)
        } else {
            date
        }
    }

    pub fn trading_week(&self, at: DateTime<Utc>) -> IsoWeek {
        self.trading_day(at).iso_week()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn utc(y: i32, m: u32, d: u32, h: u32, min: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(y, m, d, h, min, 0).unwrap()
    }

    #[test]
    fn test_tokyo_session_active() {
        let calendar = SessionCalendar::major_forex();
        // Tuesday 2024-03-05 03:00 UTC = 12:00 JST
        assert!(calendar.is_session_active("tokyo", utc(2024, 3, 5, 3, 0)));
        // 10:00 UTC = 19:00 JST
        assert!(!calendar.is_session_active("tokyo", utc(2024, 3, 5, 10, 0)));
        assert!(!calendar.is_session_active("atlantis", utc(2024, 3, 5, 3, 0)));
    }

    #[test]
    fn test_london_new_york_overlap() {
        let calendar = SessionCalendar::major_forex();
        // Winter: 14:00 UTC = 14:00 London, 09:00 New York
        let active = calendar.active_sessions(utc(2024, 1, 16, 14, 0));
        assert!(active.contains("london"));
        assert!(active.contains("new_york"));
        assert!(!active.contains("tokyo"));
    }

    #[test]
    fn test_duplicate_session_rejected() {
        let err = SessionCalendar::new([SessionWindow::london(), SessionWindow::london()]).unwrap_err();
        assert_eq!(err, CalendarError::DuplicateSession("london".into()));
    }

    #[test]
    fn test_time_until_session() {
        let calendar = SessionCalendar::major_forex();
        // 2024-01-16 06:00 UTC, London opens at 08:00 UTC in winter
        let wait = calendar
            .time_until_session("london", utc(2024, 1, 16, 6, 0))
            .unwrap();
        assert_eq!(wait, Duration::hours(2));

        let open = calendar
            .time_until_session("london", utc(2024, 1, 16, 9, 0))
            .unwrap();
        assert_eq!(open, Duration::zero());
        assert!(calendar.time_until_session("atlantis", utc(2024, 1, 16, 9, 0)).is_none());
    }

    #[test]
    fn test_time_until_close() {
        let calendar = SessionCalendar::major_forex();
        // Winter: New York closes 17:00 EST == 22:00 UTC
        assert_eq!(
            calendar.time_until_close("new_york", utc(2024, 1, 16, 21, 50)),
            Some(Duration::minutes(10))
        );
        assert!(calendar.time_until_close("new_york", utc(2024, 1, 16, 22, 0)).is_none());
        assert!(calendar.time_until_close("atlantis", utc(2024, 1, 16, 12, 0)).is_none());
    }

    #[test]
    fn test_news_blackout_window() {
        let release = utc(2024, 3, 8, 13, 30);
        let calendar = SessionCalendar::major_forex()
            .with_news(
                BlackoutPolicy::default(),
                vec![
                    NewsEvent::new("CPI", utc(2024, 3, 12, 12, 30), ImpactLevel::Medium),
                    NewsEvent::new("NFP", release, ImpactLevel::High),
                ],
            )
            .unwrap();

        assert!(calendar.in_news_blackout(release - Duration::minutes(30), ImpactLevel::High));
        assert!(calendar.in_news_blackout(release + Duration::minutes(60), ImpactLevel::High));
        assert!(!calendar.in_news_blackout(release + Duration::minutes(61), ImpactLevel::High));
        assert!(!calendar.in_news_blackout(release - Duration::minutes(31), ImpactLevel::High));

        let event = calendar.blackout_event(release, ImpactLevel::Low).unwrap();
        assert_eq!(event.title, "NFP");

        // medium impact is not in the enabled set
        assert!(!calendar.in_news_blackout(utc(2024, 3, 12, 12, 30), ImpactLevel::Low));
    }

    #[test]
    fn test_trading_day_rollover() {
        let calendar = SessionCalendar::default();
        // 2024-03-05 21:59 UTC = 16:59 EST, still Tuesday's trading day
        assert_eq!(
            calendar.trading_day(utc(2024, 3, 5, 21, 59)),
            NaiveDate::from_ymd_opt(2024, 3, 5).unwrap()
        );
        // 22:00 UTC = 17:00 EST, Wednesday's trading day begins
        assert_eq!(
            calendar.trading_day(utc(2024, 3, 5, 22, 0)),
            NaiveDate::from_ymd_opt(2024, 3, 6).unwrap()
        );
    }

    #[test]
    fn test_trading_week_starts_sunday_evening() {
        let calendar = SessionCalendar::default();
        // Sunday 2024-03-10 22:00 UTC = 18:00 EDT, belongs to Monday
        let week = calendar.trading_week(utc(2024, 3, 10, 22, 0));
        let friday = calendar.trading_week(utc(2024, 3, 8, 15, 0));
        assert_ne!(week, friday);
        assert_eq!(week.week(), friday.week() + 1);
    }

    #[test]
    fn test_trading_day_rule_from_config() {
        let rule = TradingDayRule::try_from(&TradingDayConfig {
            timezone: "Asia/Tokyo".into(),
            rollover: "07:00".into(),
        })
        .unwrap();
        assert_eq!(rule.timezone, chrono_tz::Asia::Tokyo);

        let err = TradingDayRule::try_from(&TradingDayConfig {
            timezone: "Nowhere".into(),
            rollover: "07:00".into(),
        })
        .unwrap_err();
        assert_eq!(err, CalendarError::UnknownTimezone("Nowhere".into()));
    }
}
