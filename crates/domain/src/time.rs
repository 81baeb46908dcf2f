//! Time and timestamp helpers.

use chrono::{DateTime, Duration, NaiveTime, Utc};

/// UTC timestamp used for event times, timer deadlines and uptime.
pub type Timestamp = DateTime<Utc>;

/// Return the current UTC time.
#[must_use]
pub fn now() -> Timestamp {
    Utc::now()
}

/// Next instant strictly after `from` whose UTC wall-clock time is `time_of_day`.
#[must_use]
pub fn next_daily_occurrence(from: Timestamp, time_of_day: NaiveTime) -> Timestamp {
    let today = from.date_naive().and_time(time_of_day).and_utc();
    if today > from {
        today
    } else {
        today + Duration::days(1)
    }
}

/// Non-negative delay from `from` until `target`.
#[must_use]
pub fn delay_until(from: Timestamp, target: Timestamp) -> std::time::Duration {
    (target - from).to_std().unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn should_return_current_utc_time() {
        let before = Utc::now();
        let ts = now();
        let after = Utc::now();
        assert!(ts >= before);
        assert!(ts <= after);
    }

    #[test]
    fn should_schedule_later_today_when_time_not_yet_passed() {
        let from = Utc.with_ymd_and_hms(2024, 3, 1, 6, 0, 0).unwrap();
        let at = NaiveTime::from_hms_opt(7, 30, 0).unwrap();
        let next = next_daily_occurrence(from, at);
        assert_eq!(next, Utc.with_ymd_and_hms(2024, 3, 1, 7, 30, 0).unwrap());
    }

    #[test]
    fn should_schedule_tomorrow_when_time_already_passed() {
        let from = Utc.with_ymd_and_hms(2024, 3, 1, 8, 0, 0).unwrap();
        let at = NaiveTime::from_hms_opt(7, 30, 0).unwrap();
        let next = next_daily_occurrence(from, at);
        assert_eq!(next, Utc.with_ymd_and_hms(2024, 3, 2, 7, 30, 0).unwrap());
    }

    #[test]
    fn should_schedule_tomorrow_when_time_is_exactly_now() {
        let from = Utc.with_ymd_and_hms(2024, 3, 1, 7, 30, 0).unwrap();
        let at = NaiveTime::from_hms_opt(7, 30, 0).unwrap();
        assert_eq!(
            next_daily_occurrence(from, at),
            Utc.with_ymd_and_hms(2024, 3, 2, 7, 30, 0).unwrap()
        );
    }

    #[test]
    fn should_clamp_delay_to_zero_for_past_targets() {
        let from = Utc.with_ymd_and_hms(2024, 3, 1, 8, 0, 0).unwrap();
        let past = Utc.with_ymd_and_hms(2024, 3, 1, 7, 0, 0).unwrap();
        assert_eq!(delay_until(from, past), std::time::Duration::ZERO);
        assert_eq!(
            delay_until(past, from),
            std::time::Duration::from_secs(3600)
        );
    }
}
