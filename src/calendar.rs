//! Timezone-aware date and interval arithmetic.
//!
//! Stored instants are UTC milliseconds; everything a human types (dates,
//! opening hours, "HH:MM") is local to the organization's timezone and gets
//! converted here.

use chrono::{Datelike, Duration, NaiveDate, NaiveDateTime, NaiveTime, TimeZone};
use chrono_tz::Tz;

use crate::model::{Ms, Span, TimeRange};

pub fn now_ms() -> Ms {
    chrono::Utc::now().timestamp_millis()
}

/// Resolve a local wall-clock moment to UTC ms.
///
/// Ambiguous times (DST fall-back) take the earlier instant. Nonexistent
/// times (DST spring-forward gap) move forward by the gap.
pub fn local_instant(tz: &Tz, date: NaiveDate, time: NaiveTime) -> Ms {
    resolve_local(tz, date.and_time(time))
}

fn resolve_local(tz: &Tz, ndt: NaiveDateTime) -> Ms {
    if let Some(dt) = tz.from_local_datetime(&ndt).earliest() {
        return dt.timestamp_millis();
    }
    let shifted = ndt + Duration::hours(1);
    match tz.from_local_datetime(&shifted).earliest() {
        Some(dt) => dt.timestamp_millis(),
        None => ndt.and_utc().timestamp_millis(),
    }
}

/// `[local midnight, next local midnight)` for `date`.
pub fn day_span(tz: &Tz, date: NaiveDate) -> Span {
    let start = local_instant(tz, date, NaiveTime::MIN);
    let next = date.succ_opt().unwrap_or(date);
    let end = local_instant(tz, next, NaiveTime::MIN);
    Span::new(start, end.max(start + 1))
}

/// `None` when a DST gap swallows the range.
pub fn range_span(tz: &Tz, date: NaiveDate, range: &TimeRange) -> Option<Span> {
    let start = local_instant(tz, date, range.start);
    let end = local_instant(tz, date, range.end);
    (start < end).then(|| Span::new(start, end))
}

pub fn local_date(tz: &Tz, t: Ms) -> NaiveDate {
    tz.timestamp_millis_opt(t)
        .single()
        .map(|dt| dt.date_naive())
        .unwrap_or_default()
}

pub fn local_time(tz: &Tz, t: Ms) -> NaiveTime {
    tz.timestamp_millis_opt(t)
        .single()
        .map(|dt| dt.time())
        .unwrap_or(NaiveTime::MIN)
}

/// Today's date in `tz` at instant `now`.
pub fn today(tz: &Tz, now: Ms) -> NaiveDate {
    local_date(tz, now)
}

/// `count` consecutive dates starting at `first`.
pub fn days(first: NaiveDate, count: u32) -> impl Iterator<Item = NaiveDate> {
    first.iter_days().take(count as usize)
}

/// Candidate spans of `length` starting at `window.start` every `step`,
/// each fully inside `window`.
pub fn grid(window: Span, step: Ms, length: Ms) -> impl Iterator<Item = Span> {
    debug_assert!(step > 0 && length > 0);
    let mut t = window.start;
    std::iter::from_fn(move || {
        if t + length > window.end {
            return None;
        }
        let slot = Span::new(t, t + length);
        t += step;
        Some(slot)
    })
}

/// 0 = Sunday .. 6 = Saturday.
pub fn weekday_index(date: NaiveDate) -> u8 {
    date.weekday().num_days_from_sunday() as u8
}

/// The Sunday on or before `date`.
pub fn week_start(date: NaiveDate) -> NaiveDate {
    date - Duration::days(weekday_index(date) as i64)
}

/// Accepts an ISO date or the aliases "hoy" / "mañana".
pub fn parse_date_alias(s: &str, today: NaiveDate) -> Option<NaiveDate> {
    match s.trim().to_lowercase().as_str() {
        "hoy" => Some(today),
        "mañana" | "manana" => today.succ_opt(),
        other => NaiveDate::parse_from_str(other, "%Y-%m-%d").ok(),
    }
}

/// Strict 24h `HH:MM`.
pub fn parse_hhmm(s: &str) -> Option<NaiveTime> {
    let s = s.trim();
    if s.len() != 5 {
        return None;
    }
    NaiveTime::parse_from_str(s, "%H:%M").ok()
}

pub fn format_hhmm(t: NaiveTime) -> String {
    t.format("%H:%M").to_string()
}
