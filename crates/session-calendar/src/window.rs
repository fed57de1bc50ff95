//! A recurring local-time trading window.

use std::collections::BTreeSet;

use chrono::{DateTime, Datelike, Duration, NaiveTime, TimeZone, Utc};
use chrono_tz::Tz;
use serde::Deserialize;

use crate::error::CalendarError;

/// Raw session definition as it appears in configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct SessionWindowConfig {
    /// Session name, e.g. "london".
    pub name: String,
    /// Local opening time, "HH:MM".
    pub start: String,
    /// Local closing time (exclusive), "HH:MM".
    pub end: String,
    /// IANA timezone name, e.g. "Europe/London".
    pub timezone: String,
    /// Active ISO weekdays, 1 = Monday .. 7 = Sunday.
    #[serde(default = "default_weekdays")]
    pub weekdays: Vec<u8>,
}

fn default_weekdays() -> Vec<u8> {
    vec![1, 2, 3, 4, 5]
}

/// A validated trading session.
///
/// `start > end` means the window wraps past local midnight. `start == end`
/// means the session is open around the clock on its active weekdays.
#[derive(Debug, Clone, PartialEq)]
pub struct SessionWindow {
    name: String,
    start: NaiveTime,
    end: NaiveTime,
    timezone: Tz,
    weekdays: BTreeSet<u8>,
}

impl SessionWindow {
    /// Create a session window, validating the weekday set.
    pub fn new(
        name: impl Into<String>,
        start: NaiveTime,
        end: NaiveTime,
        timezone: Tz,
        weekdays: impl IntoIterator<Item = u8>,
    ) -> Result<Self, CalendarError> {
        let name = name.into();
        let weekdays: BTreeSet<u8> = weekdays.into_iter().collect();

        if let Some(&weekday) = weekdays.iter().find(|d| !(1..=7).contains(*d)) {
            return Err(CalendarError::InvalidWeekday {
                session: name,
                weekday,
            });
        }
        if weekdays.is_empty() {
            return Err(CalendarError::NoWeekdays(name));
        }

        Ok(Self {
            name,
            start,
            end,
            timezone,
            weekdays,
        })
    }

    /// Build a window from its configuration form.
    pub fn from_config(config: &SessionWindowConfig) -> Result<Self, CalendarError> {
        Self::new(
            config.name.clone(),
            parse_time(&config.start)?,
            parse_time(&config.end)?,
            parse_timezone(&config.timezone)?,
            config.weekdays.iter().copied(),
        )
    }

    /// Sydney, 07:00-16:00 local, Monday to Friday.
    pub fn sydney() -> Self {
        Self::weekday_session("sydney", 7, 16, chrono_tz::Australia::Sydney)
    }

    /// Tokyo, 09:00-18:00 local, Monday to Friday.
    pub fn tokyo() -> Self {
        Self::weekday_session("tokyo", 9, 18, chrono_tz::Asia::Tokyo)
    }

    /// London, 08:00-17:00 local, Monday to Friday.
    pub fn london() -> Self {
        Self::weekday_session("london", 8, 17, chrono_tz::Europe::London)
    }

    /// New York, 08:00-17:00 local, Monday to Friday.
    pub fn new_york() -> Self {
        Self::weekday_session("new_york", 8, 17, chrono_tz::America::New_York)
    }

    fn weekday_session(name: &str, start_hour: u32, end_hour: u32, timezone: Tz) -> Self {
        Self {
            name: name.to_string(),
            start: NaiveTime::from_hms_opt(start_hour, 0, 0).unwrap_or(NaiveTime::MIN),
            end: NaiveTime::from_hms_opt(end_hour, 0, 0).unwrap_or(NaiveTime::MIN),
            timezone,
            weekdays: (1..=5).collect(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn start(&self) -> NaiveTime {
        self.start
    }

    pub fn end(&self) -> NaiveTime {
        self.end
    }

    pub fn timezone(&self) -> Tz {
        self.timezone
    }

    pub fn weekdays(&self) -> &BTreeSet<u8> {
        &self.weekdays
    }

    /// Returns true if the window crosses local midnight.
    pub fn wraps_midnight(&self) -> bool {
        self.start > self.end
    }

    /// Check whether the session is open at a UTC instant.
    ///
    /// For wrapping windows the part after midnight belongs to the weekday
    /// on which the window opened.
    pub fn contains(&self, at: DateTime<Utc>) -> bool {
        let local = at.with_timezone(&self.timezone);
        let time = local.time();
        let weekday = local.weekday();
        let active_on = |day: chrono::Weekday| self.weekdays.contains(&(day.number_from_monday() as u8));

        if self.start == self.end {
            return active_on(weekday);
        }

        if self.start < self.end {
            return self.start <= time && time < self.end && active_on(weekday);
        }

        if time >= self.start {
            active_on(weekday)
        } else if time < self.end {
            active_on(weekday.pred())
        } else {
            false
        }
    }

    /// When the occurrence open at `at` closes. `None` while the session is
    /// closed, for an around-the-clock session active every day, or when
    /// the close falls into a DST gap.
    pub fn close_after(&self, at: DateTime<Utc>) -> Option<DateTime<Utc>> {
        if !self.contains(at) {
            return None;
        }
        let local = at.with_timezone(&self.timezone);
        let date = local.date_naive();

        let (close_date, close_time) = if self.start == self.end {
            // Open until local midnight before the first inactive day
            let inactive = (1..=7)
                .map(|offset| date + Duration::days(offset))
                .find(|d| !self.weekdays.contains(&(d.weekday().number_from_monday() as u8)))?;
            (inactive, NaiveTime::MIN)
        } else if self.wraps_midnight() && local.time() >= self.start {
            (date + Duration::days(1), self.end)
        } else {
            (date, self.end)
        };

        self.timezone
            .from_local_datetime(&close_date.and_time(close_time))
            .earliest()
            .map(|close| close.with_timezone(&Utc))
    }

    /// The next opening strictly after `at`, if one exists within eight days.
    pub fn next_open_after(&self, at: DateTime<Utc>) -> Option<DateTime<Utc>> {
        let local_date = at.with_timezone(&self.timezone).date_naive();

        (0..=8).find_map(|offset| {
            let date = local_date + Duration::days(offset);
            if !self
                .weekdays
                .contains(&(date.weekday().number_from_monday() as u8))
            {
                return None;
            }
            // `earliest` is None only inside a DST gap; skip that day
            let open = self
                .timezone
                .from_local_datetime(&date.and_time(self.start))
                .earliest()?
                .with_timezone(&Utc);
            (open > at).then_some(open)
        })
    }
}

/// Parse "HH:MM" or "HH:MM:SS".
pub(crate) fn parse_time(value: &str) -> Result<NaiveTime, CalendarError> {
    NaiveTime::parse_from_str(value, "%H:%M")
        .or_else(|_| NaiveTime::parse_from_str(value, "%H:%M:%S"))
        .map_err(|_| CalendarError::InvalidTime(value.to_string()))
}

pub(crate) fn parse_timezone(value: &str) -> Result<Tz, CalendarError> {
    value
        .parse::<Tz>()
        .map_err(|_| CalendarError::UnknownTimezone(value.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn utc(y: i32, m: u32, d: u32, h: u32, min: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(y, m, d, h, min, 0).unwrap()
    }

    fn hm(h: u32, m: u32) -> NaiveTime {
        NaiveTime::from_hms_opt(h, m, 0).unwrap()
    }

    #[test]
    fn test_tokyo_weekday_hours() {
        let tokyo = SessionWindow::tokyo();

        // Monday 2024-03-04 00:00 UTC = 09:00 JST
        assert!(tokyo.contains(utc(2024, 3, 4, 0, 0)));
        // 08:59 UTC = 17:59 JST
        assert!(tokyo.contains(utc(2024, 3, 4, 8, 59)));
        // 09:00 UTC = 18:00 JST, end is exclusive
        assert!(!tokyo.contains(utc(2024, 3, 4, 9, 0)));
        // Sunday 23:59 UTC = Monday 08:59 JST, before the open
        assert!(!tokyo.contains(utc(2024, 3, 3, 23, 59)));
    }

    #[test]
    fn test_tokyo_closed_on_weekend() {
        let tokyo = SessionWindow::tokyo();
        // Saturday 2024-03-09 03:00 UTC = 12:00 JST Saturday
        assert!(!tokyo.contains(utc(2024, 3, 9, 3, 0)));
        // Friday 2024-03-08 03:00 UTC = 12:00 JST Friday
        assert!(tokyo.contains(utc(2024, 3, 8, 3, 0)));
    }

    #[test]
    fn test_london_follows_daylight_saving() {
        let london = SessionWindow::london();
        // Winter: 08:00 GMT == 08:00 UTC
        assert!(london.contains(utc(2024, 1, 15, 8, 0)));
        assert!(!london.contains(utc(2024, 1, 15, 7, 30)));
        // Summer: 08:00 BST == 07:00 UTC
        assert!(london.contains(utc(2024, 7, 15, 7, 0)));
        assert!(!london.contains(utc(2024, 7, 15, 16, 30)));
    }

    #[test]
    fn test_window_wrapping_midnight() {
        let overnight = SessionWindow::new("overnight", hm(22, 0), hm(4, 0), chrono_tz::UTC, 1..=5)
            .unwrap();
        assert!(overnight.wraps_midnight());

        // Monday 23:00 opens Monday's window
        assert!(overnight.contains(utc(2024, 3, 4, 23, 0)));
        // Tuesday 03:00 still belongs to Monday's window
        assert!(overnight.contains(utc(2024, 3, 5, 3, 0)));
        // Tuesday 05:00 is between windows
        assert!(!overnight.contains(utc(2024, 3, 5, 5, 0)));
        // Saturday 02:00 belongs to Friday's window
        assert!(overnight.contains(utc(2024, 3, 9, 2, 0)));
        // Monday 02:00 belongs to Sunday, which is inactive
        assert!(!overnight.contains(utc(2024, 3, 4, 2, 0)));
    }

    #[test]
    fn test_equal_start_and_end_is_all_day() {
        let always = SessionWindow::new("crypto", hm(0, 0), hm(0, 0), chrono_tz::UTC, 1..=7).unwrap();
        assert!(always.contains(utc(2024, 3, 9, 13, 37)));
    }

    #[test]
    fn test_close_after() {
        let london = SessionWindow::london();
        // Summer: 17:00 BST == 16:00 UTC
        assert_eq!(london.close_after(utc(2024, 7, 15, 12, 0)), Some(utc(2024, 7, 15, 16, 0)));
        assert_eq!(london.close_after(utc(2024, 7, 15, 17, 0)), None);

        let overnight = SessionWindow::new("overnight", hm(22, 0), hm(4, 0), chrono_tz::UTC, 1..=5)
            .unwrap();
        // Opened Monday 22:00, closes Tuesday 04:00 from either side of midnight
        assert_eq!(overnight.close_after(utc(2024, 3, 4, 23, 0)), Some(utc(2024, 3, 5, 4, 0)));
        assert_eq!(overnight.close_after(utc(2024, 3, 5, 1, 0)), Some(utc(2024, 3, 5, 4, 0)));

        let weekdays = SessionWindow::new("desk", hm(0, 0), hm(0, 0), chrono_tz::UTC, 1..=5).unwrap();
        // Wednesday: runs until Saturday 00:00
        assert_eq!(weekdays.close_after(utc(2024, 3, 6, 9, 0)), Some(utc(2024, 3, 9, 0, 0)));
        let always = SessionWindow::new("crypto", hm(0, 0), hm(0, 0), chrono_tz::UTC, 1..=7).unwrap();
        assert_eq!(always.close_after(utc(2024, 3, 6, 9, 0)), None);
    }

    #[test]
    fn test_invalid_weekdays_rejected() {
        let err = SessionWindow::new("bad", hm(9, 0), hm(17, 0), chrono_tz::UTC, [0u8, 3]).unwrap_err();
        assert!(matches!(err, CalendarError::InvalidWeekday { weekday: 0, .. }));

        let err = SessionWindow::new("none", hm(9, 0), hm(17, 0), chrono_tz::UTC, Vec::<u8>::new()).unwrap_err();
        assert_eq!(err, CalendarError::NoWeekdays("none".into()));
    }

    #[test]
    fn test_from_config() {
        let config = SessionWindowConfig {
            name: "frankfurt".into(),
            start: "08:00".into(),
            end: "16:30:00".into(),
            timezone: "Europe/Berlin".into(),
            weekdays: default_weekdays(),
        };
        let window = SessionWindow::from_config(&config).unwrap();
        assert_eq!(window.end(), hm(16, 30));
        assert_eq!(window.timezone(), chrono_tz::Europe::Berlin);

        let bad_tz = SessionWindowConfig {
            timezone: "Mars/Olympus".into(),
            ..config.clone()
        };
        assert_eq!(
            SessionWindow::from_config(&bad_tz).unwrap_err(),
            CalendarError::UnknownTimezone("Mars/Olympus".into())
        );

        let bad_time = SessionWindowConfig {
            start: "8am".into(),
            ..config
        };
        assert!(matches!(
            SessionWindow::from_config(&bad_time),
            Err(CalendarError::InvalidTime(_))
        ));
    }

    #[test]
    fn test_next_open_skips_weekend() {
        let tokyo = SessionWindow::tokyo();
        // Friday 2024-03-08 12:00 UTC, after Friday's close
        let next = tokyo.next_open_after(utc(2024, 3, 8, 12, 0)).unwrap();
        // Monday 09:00 JST == Monday 00:00 UTC
        assert_eq!(next, utc(2024, 3, 11, 0, 0));
    }
}
