//! Wall-clock access and reference-timezone helpers.
//!
//! Every cycle reads time through [`Clock`] so tests can pin "now".

use chrono::{
    DateTime, Datelike, Duration, FixedOffset, NaiveDate, TimeZone, Timelike, Utc, Weekday,
};
use std::sync::Mutex;

pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

/// The real system clock.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// A clock that only moves when told to.
#[derive(Debug)]
pub struct ManualClock {
    now: Mutex<DateTime<Utc>>,
}

impl ManualClock {
    pub fn new(now: DateTime<Utc>) -> Self {
        Self {
            now: Mutex::new(now),
        }
    }

    pub fn set(&self, now: DateTime<Utc>) {
        if let Ok(mut guard) = self.now.lock() {
            *guard = now;
        }
    }

    pub fn advance(&self, by: Duration) {
        if let Ok(mut guard) = self.now.lock() {
            *guard += by;
        }
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        match self.now.lock() {
            Ok(guard) => *guard,
            Err(poisoned) => *poisoned.into_inner(),
        }
    }
}

/// Calendar date of `instant` in the reference timezone.
pub fn reference_date(instant: DateTime<Utc>, offset: FixedOffset) -> NaiveDate {
    instant.with_timezone(&offset).date_naive()
}

/// Hour of day of `instant` in the reference timezone.
pub fn reference_hour(instant: DateTime<Utc>, offset: FixedOffset) -> u32 {
    instant.with_timezone(&offset).hour()
}

/// Next instant strictly after `now` that falls on `weekday` at `hour:00`
/// reference time.
pub fn next_weekly_fire(
    now: DateTime<Utc>,
    offset: FixedOffset,
    weekday: Weekday,
    hour: u32,
) -> DateTime<Utc> {
    let local = now.with_timezone(&offset);
    let days_ahead = (i64::from(weekday.num_days_from_monday())
        - i64::from(local.weekday().num_days_from_monday()))
    .rem_euclid(7);

    let date = local.date_naive() + Duration::days(days_ahead);
    let candidate = date
        .and_hms_opt(hour.min(23), 0, 0)
        .and_then(|naive| offset.from_local_datetime(&naive).single())
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or(now + Duration::days(7));

    if candidate <= now {
        candidate + Duration::days(7)
    } else {
        candidate
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn utc(s: &str) -> DateTime<Utc> {
        DateTime::parse_from_rfc3339(s).unwrap().with_timezone(&Utc)
    }

    fn eastern() -> FixedOffset {
        FixedOffset::east_opt(-5 * 3600).unwrap()
    }

    #[test]
    fn test_reference_date_differs_from_utc_date() {
        // 02:00 UTC on the 16th is still the 15th five hours west.
        let instant = utc("2026-10-16T02:00:00Z");
        assert_eq!(
            reference_date(instant, eastern()),
            NaiveDate::from_ymd_opt(2026, 10, 15).unwrap()
        );
        assert_eq!(reference_hour(instant, eastern()), 21);
    }

    #[test]
    fn test_next_weekly_fire_later_same_week() {
        // Friday 2026-10-16 10:00 reference time.
        let now = utc("2026-10-16T15:00:00Z");
        let fire = next_weekly_fire(now, eastern(), Weekday::Sun, 3);
        assert_eq!(fire, utc("2026-10-18T08:00:00Z"));
    }

    #[test]
    fn test_next_weekly_fire_rolls_over_when_passed() {
        // Sunday 2026-10-18 04:00 reference time, one hour after the slot.
        let now = utc("2026-10-18T09:00:00Z");
        let fire = next_weekly_fire(now, eastern(), Weekday::Sun, 3);
        assert_eq!(fire, utc("2026-10-25T08:00:00Z"));
    }

    #[test]
    fn test_manual_clock_advances() {
        let clock = ManualClock::new(utc("2026-10-16T00:00:00Z"));
        clock.advance(Duration::minutes(40));
        assert_eq!(clock.now(), utc("2026-10-16T00:40:00Z"));
    }
}
