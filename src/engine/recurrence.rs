use chrono::{Duration, Months, NaiveDate};

use crate::calendar;
use crate::limits::*;
use crate::model::*;

use super::EngineError;

pub fn validate_pattern(p: &RecurrencePattern) -> Result<(), EngineError> {
    if p.interval == 0 || p.interval > MAX_RECURRENCE_INTERVAL {
        return Err(EngineError::validation(format!(
            "interval must be between 1 and {MAX_RECURRENCE_INTERVAL}"
        )));
    }
    // Monthly patterns repeat the anchor's day and never read the weekdays.
    if p.frequency != Frequency::Monthly && p.weekdays.iter().any(|d| *d > 6) {
        return Err(EngineError::validation("weekday index must be between 0 and 6"));
    }
    if let Termination::Count(n) = p.termination
        && (n == 0 || n as usize > MAX_SERIES_OCCURRENCES) {
            return Err(EngineError::validation(format!(
                "occurrence count must be between 1 and {MAX_SERIES_OCCURRENCES}"
            )));
        }
    Ok(())
}

/// Concrete dates of a pattern anchored at `anchor`, in order.
///
/// An `UntilDate` before the first occurrence yields an empty list; the
/// caller decides what that means.
pub fn expand(anchor: NaiveDate, pattern: &RecurrencePattern) -> Result<Vec<NaiveDate>, EngineError> {
    validate_pattern(pattern)?;
    let horizon = anchor + Duration::days(MAX_SERIES_HORIZON_DAYS);
    if let Termination::UntilDate(until) = pattern.termination
        && until > horizon {
            return Err(EngineError::validation(format!(
                "series may not end more than {MAX_SERIES_HORIZON_DAYS} days after its first date"
            )));
        }

    let mut out = Vec::new();
    let mut emit = |date: NaiveDate| -> Result<bool, EngineError> {
        match pattern.termination {
            Termination::UntilDate(until) if date > until => return Ok(false),
            _ => {}
        }
        if date > horizon {
            return Err(EngineError::validation("series reaches too far into the future"));
        }
        if out.len() >= MAX_SERIES_OCCURRENCES {
            return Err(EngineError::validation(format!(
                "series may not exceed {MAX_SERIES_OCCURRENCES} occurrences"
            )));
        }
        out.push(date);
        Ok(match pattern.termination {
            Termination::Count(n) => out.len() < n as usize,
            Termination::UntilDate(_) => true,
        })
    };

    match pattern.frequency {
        Frequency::Weekly | Frequency::Biweekly => {
            let base = if pattern.frequency == Frequency::Weekly { 1 } else { 2 };
            let step = Duration::weeks((pattern.interval * base) as i64);
            let mut weekdays = pattern.weekdays.clone();
            if weekdays.is_empty() {
                weekdays.push(calendar::weekday_index(anchor));
            }
            weekdays.sort_unstable();
            weekdays.dedup();

            let mut week = calendar::week_start(anchor);
            'weeks: loop {
                for &d in &weekdays {
                    let date = week + Duration::days(d as i64);
                    if date < anchor {
                        continue;
                    }
                    if !emit(date)? {
                        break 'weeks;
                    }
                }
                week += step;
            }
        }
        Frequency::Monthly => {
            let mut k: u32 = 0;
            loop {
                // Always offset from the anchor so a clamped month does not
                // drag later months to an earlier day.
                let date = anchor
                    .checked_add_months(Months::new(k * pattern.interval))
                    .ok_or_else(|| EngineError::validation("date out of range"))?;
                if !emit(date)? {
                    break;
                }
                k += 1;
            }
        }
    }

    Ok(out)
}
