//! Next-trigger arithmetic for countdown labels.
//!
//! All math runs on local wall-clock time. The device computes its own
//! countdowns when it reports alarms; these functions keep the labels
//! fresh between reports and cover locally created alarms the device has
//! not confirmed yet.

use chrono::{DateTime, Datelike, Local, Timelike, Weekday};
use wakelink_ble::wire::humanize_minutes;

use crate::model::{Alarm, DISABLED_LABEL};

/// Weekday as the wire encodes it, 0 = Monday .. 6 = Sunday.
///
/// The only place chrono weekdays are converted, so the convention
/// cannot drift between call sites.
pub fn weekday_index(weekday: Weekday) -> u8 {
    // num_days_from_monday is already the 0 = Monday ordinal.
    weekday.num_days_from_monday() as u8
}

/// Minutes from `now` until the alarm next fires, or `None` when no
/// future trigger exists.
///
/// An empty day set is treated the same as no day set: the alarm fires
/// daily. An alarm at the current minute counts as already past and
/// resolves to the next occurrence.
pub fn minutes_until_next(alarm: &Alarm, now: &DateTime<Local>) -> Option<i64> {
    let now_minutes = i64::from(now.hour() * 60 + now.minute());
    let target_minutes = i64::from(alarm.minutes_of_day());
    let today = weekday_index(now.weekday());

    let days = alarm.days.as_deref().filter(|d| !d.is_empty());
    let Some(days) = days else {
        // Daily alarm: today if still ahead, otherwise tomorrow.
        let delta = target_minutes - now_minutes;
        return Some(if delta > 0 { delta } else { delta + 24 * 60 });
    };

    if days.contains(&today) && target_minutes > now_minutes {
        return Some(target_minutes - now_minutes);
    }
    for offset in 1..=7_i64 {
        let day = ((i64::from(today) + offset) % 7) as u8;
        if days.contains(&day) {
            return Some(offset * 24 * 60 + target_minutes - now_minutes);
        }
    }
    None
}

/// Countdown label for an alarm at a given instant.
pub fn time_until_label(alarm: &Alarm, now: &DateTime<Local>) -> String {
    if !alarm.enabled {
        return DISABLED_LABEL.to_owned();
    }
    match minutes_until_next(alarm, now) {
        Some(minutes) => humanize_minutes(minutes),
        None => "unknown".to_owned(),
    }
}
