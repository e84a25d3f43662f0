use chrono::Days;

use crate::model::*;

/// Last representable instant (23:59:59.999999 UTC) of the calendar day
/// `days` days after `now`.
pub fn expiring_window_end(now: Ts, days: u64) -> Ts {
    let day = utc_day(now).checked_add_days(Days::new(days)).unwrap_or(utc_day(now));
    day.and_hms_micro_opt(23, 59, 59, 999_999)
        .expect("23:59:59.999999 is a valid time of day")
        .and_utc()
}

/// Whole calendar days from `now` until `return_date`; 0 means "today".
pub fn days_left(return_date: Ts, now: Ts) -> i64 {
    (utc_day(return_date) - utc_day(now)).num_days()
}
