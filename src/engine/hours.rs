use std::collections::BTreeMap;

use chrono::{Datelike, NaiveDate};
use chrono_tz::Tz;
use ulid::Ulid;

use crate::calendar;
use crate::model::*;

use super::EngineError;

/// Opening hours of one owner (a professional, or the organization).
///
/// Weekday rules repeat every week. A date exception replaces the weekday
/// rule for that date; an exception with no ranges closes the day.
#[derive(Debug, Clone, Default)]
pub struct WeeklyHours {
    owner: Option<Ulid>,
    by_weekday: [Vec<TimeRange>; 7],
    exceptions: BTreeMap<NaiveDate, Vec<TimeRange>>,
}

impl WeeklyHours {
    pub fn new(owner: Option<Ulid>) -> Self {
        Self {
            owner,
            ..Self::default()
        }
    }

    pub fn has_weekly_rules(&self) -> bool {
        self.by_weekday.iter().any(|r| !r.is_empty())
    }

    /// Add shifts to a day, keeping whatever is already there.
    pub fn add(&mut self, day: HoursDay, ranges: &[TimeRange]) -> Result<(), EngineError> {
        self.check(ranges)?;
        let mut combined = match day {
            HoursDay::Weekday(w) => self.by_weekday[w.num_days_from_sunday() as usize].clone(),
            HoursDay::Date(d) => self.exceptions.get(&d).cloned().unwrap_or_default(),
        };
        combined.extend_from_slice(ranges);
        combined.sort_by_key(|r| r.start);
        if let Some(w) = combined.windows(2).find(|w| w[1].start < w[0].end) {
            return Err(self.malformed(format!(
                "shift starting {} overlaps shift ending {}",
                w[1].start, w[0].end
            )));
        }
        *self.slot_mut(day) = combined;
        Ok(())
    }

    /// Replace a day's shifts. An empty list clears a weekday rule, or
    /// closes the date for an exception.
    pub fn replace(&mut self, day: HoursDay, ranges: &[TimeRange]) -> Result<(), EngineError> {
        self.check(ranges)?;
        *self.slot_mut(day) = ranges.to_vec();
        Ok(())
    }

    pub fn remove_exception(&mut self, date: &NaiveDate) -> bool {
        self.exceptions.remove(date).is_some()
    }

    /// Shifts for `date` from this owner alone.
    ///
    /// `None` means this owner says nothing about the date (no exception and
    /// no weekly rules at all), so a fallback applies.
    pub fn ranges_for(&self, date: NaiveDate) -> Option<&[TimeRange]> {
        if let Some(ex) = self.exceptions.get(&date) {
            return Some(ex);
        }
        if self.has_weekly_rules() {
            let idx = date.weekday().num_days_from_sunday() as usize;
            return Some(&self.by_weekday[idx]);
        }
        None
    }

    fn slot_mut(&mut self, day: HoursDay) -> &mut Vec<TimeRange> {
        match day {
            HoursDay::Weekday(w) => &mut self.by_weekday[w.num_days_from_sunday() as usize],
            HoursDay::Date(d) => self.exceptions.entry(d).or_default(),
        }
    }

    /// Each rule's own ranges must be non-empty, sorted and disjoint.
    fn check(&self, ranges: &[TimeRange]) -> Result<(), EngineError> {
        for r in ranges {
            if r.start >= r.end {
                return Err(self.malformed(format!("shift {}-{} ends before it starts", r.start, r.end)));
            }
        }
        for w in ranges.windows(2) {
            if w[1].start < w[0].start {
                return Err(self.malformed("shifts are not sorted".into()));
            }
            if w[1].start < w[0].end {
                return Err(self.malformed(format!(
                    "shift starting {} overlaps shift ending {}",
                    w[1].start, w[0].end
                )));
            }
        }
        Ok(())
    }

    fn malformed(&self, reason: String) -> EngineError {
        EngineError::MalformedWorkingHours {
            professional_id: self.owner,
            reason,
        }
    }
}

/// Ordered open intervals for a professional on `date`.
///
/// The professional's own hours override the organization's entirely; the
/// organization's hours apply only when the professional has nothing for
/// the date.
pub fn resolve(own: &WeeklyHours, org: &WeeklyHours, tz: &Tz, date: NaiveDate) -> Vec<Span> {
    let ranges = own
        .ranges_for(date)
        .or_else(|| org.ranges_for(date))
        .unwrap_or(&[]);
    ranges
        .iter()
        .filter_map(|r| calendar::range_span(tz, date, r))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{NaiveTime, Weekday};

    const H: Ms = 3_600_000;

    fn t(h: u32, m: u32) -> NaiveTime {
        NaiveTime::from_hms_opt(h, m, 0).unwrap()
    }

    fn r(sh: u32, eh: u32) -> TimeRange {
        TimeRange::new(t(sh, 0), t(eh, 0))
    }

    fn monday() -> NaiveDate {
        NaiveDate::from_ymd_opt(2026, 3, 2).unwrap()
    }

    fn day_offset(date: NaiveDate) -> Ms {
        calendar::day_span(&Tz::UTC, date).start
    }

    #[test]
    fn weekday_rule_with_two_shifts() {
        let mut own = WeeklyHours::new(Some(Ulid::new()));
        own.add(HoursDay::Weekday(Weekday::Mon), &[r(9, 13), r(15, 19)]).unwrap();
        let open = resolve(&own, &WeeklyHours::default(), &Tz::UTC, monday());
        let base = day_offset(monday());
        assert_eq!(
            open,
            vec![Span::new(base + 9 * H, base + 13 * H), Span::new(base + 15 * H, base + 19 * H)]
        );
    }

    #[test]
    fn shifts_added_separately_are_kept_sorted() {
        let mut own = WeeklyHours::new(None);
        own.add(HoursDay::Weekday(Weekday::Mon), &[r(15, 19)]).unwrap();
        own.add(HoursDay::Weekday(Weekday::Mon), &[r(9, 13)]).unwrap();
        let open = resolve(&own, &WeeklyHours::default(), &Tz::UTC, monday());
        assert!(open[0].start < open[1].start);
    }

    #[test]
    fn overlapping_shifts_are_malformed() {
        let mut own = WeeklyHours::new(Some(Ulid::new()));
        let err = own
            .add(HoursDay::Weekday(Weekday::Mon), &[r(9, 13), r(12, 19)])
            .unwrap_err();
        assert!(err.is_fault());

        own.add(HoursDay::Weekday(Weekday::Tue), &[r(9, 13)]).unwrap();
        assert!(own.add(HoursDay::Weekday(Weekday::Tue), &[r(10, 11)]).is_err());
    }

    #[test]
    fn inverted_and_unsorted_shifts_are_malformed() {
        let mut own = WeeklyHours::new(None);
        assert!(own.add(HoursDay::Weekday(Weekday::Mon), &[r(13, 9)]).is_err());
        assert!(own.add(HoursDay::Weekday(Weekday::Mon), &[r(15, 19), r(9, 13)]).is_err());
    }

    #[test]
    fn back_to_back_shifts_are_fine() {
        let mut own = WeeklyHours::new(None);
        own.add(HoursDay::Weekday(Weekday::Mon), &[r(9, 13), r(13, 17)]).unwrap();
    }

    #[test]
    fn exception_overrides_weekday() {
        let mut own = WeeklyHours::new(None);
        own.add(HoursDay::Weekday(Weekday::Mon), &[r(9, 17)]).unwrap();
        own.replace(HoursDay::Date(monday()), &[r(10, 12)]).unwrap();
        let open = resolve(&own, &WeeklyHours::default(), &Tz::UTC, monday());
        let base = day_offset(monday());
        assert_eq!(open, vec![Span::new(base + 10 * H, base + 12 * H)]);

        let next = monday() + chrono::Duration::days(7);
        assert_eq!(resolve(&own, &WeeklyHours::default(), &Tz::UTC, next).len(), 1);
    }

    #[test]
    fn empty_exception_closes_day() {
        let mut own = WeeklyHours::new(None);
        own.add(HoursDay::Weekday(Weekday::Mon), &[r(9, 17)]).unwrap();
        own.replace(HoursDay::Date(monday()), &[]).unwrap();
        assert!(resolve(&own, &WeeklyHours::default(), &Tz::UTC, monday()).is_empty());
        assert!(own.remove_exception(&monday()));
        assert_eq!(resolve(&own, &WeeklyHours::default(), &Tz::UTC, monday()).len(), 1);
    }

    #[test]
    fn organization_hours_are_fallback_only() {
        let mut org = WeeklyHours::new(None);
        org.add(HoursDay::Weekday(Weekday::Mon), &[r(8, 20)]).unwrap();

        let inherits = WeeklyHours::new(Some(Ulid::new()));
        assert_eq!(resolve(&inherits, &org, &Tz::UTC, monday()).len(), 1);

        // Own rules on other weekdays still mean "closed Monday"
        let mut own = WeeklyHours::new(Some(Ulid::new()));
        own.add(HoursDay::Weekday(Weekday::Tue), &[r(9, 17)]).unwrap();
        assert!(resolve(&own, &org, &Tz::UTC, monday()).is_empty());
    }

    #[test]
    fn no_rules_anywhere_means_closed() {
        let open = resolve(&WeeklyHours::default(), &WeeklyHours::default(), &Tz::UTC, monday());
        assert!(open.is_empty());
    }
}
