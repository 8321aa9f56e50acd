use chrono::NaiveDate;
use ulid::Ulid;

use crate::calendar;
use crate::model::*;

// ── Slot Algorithm ────────────────────────────────────────────────

/// Shape of the candidates walked over one professional-day.
#[derive(Debug, Clone, Copy)]
pub struct SlotSpec {
    pub step: Ms,
    /// Total occupied length: services plus their buffers.
    pub length: Ms,
    pub only_available: bool,
    /// Evaluate only the candidate starting here instead of the grid.
    pub requested_start: Option<Ms>,
    pub not_before: Option<Ms>,
}

/// Everything that removes time from one professional's day.
#[derive(Debug, Default)]
pub struct DayLoad {
    pub blocks: Vec<(Span, BlockKind)>,
    /// Active appointments only, with the excluded one already removed.
    pub busy: Vec<(Span, Ulid)>,
}

/// Free sub-intervals: open hours minus blocks minus busy time.
pub fn free_intervals(open: &[Span], load: &DayLoad) -> Vec<Span> {
    let mut base = open.to_vec();
    base.sort_by_key(|s| s.start);
    let mut free = merge_overlapping(&base);

    let mut blocked: Vec<Span> = load.blocks.iter().map(|(s, _)| *s).collect();
    if !blocked.is_empty() {
        blocked.sort_by_key(|s| s.start);
        free = subtract_intervals(&free, &merge_overlapping(&blocked));
    }

    let mut busy: Vec<Span> = load.busy.iter().map(|(s, _)| *s).collect();
    if !busy.is_empty() {
        busy.sort_by_key(|s| s.start);
        free = subtract_intervals(&free, &merge_overlapping(&busy));
    }

    free
}

/// Walk each open interval on the grid and classify every candidate.
///
/// A candidate is available iff it lies inside a single free sub-interval.
/// Occupied candidates are only emitted when `only_available` is false.
pub fn day_slots(
    professional_id: Ulid,
    date: NaiveDate,
    open: &[Span],
    load: &DayLoad,
    spec: &SlotSpec,
) -> Vec<Slot> {
    let mut windows = open.to_vec();
    windows.sort_by_key(|s| s.start);
    let windows = merge_overlapping(&windows);
    let free = free_intervals(&windows, load);

    let mut slots = Vec::new();
    for window in windows {
        let candidates: Vec<Span> = match spec.requested_start {
            Some(t) if window.start <= t && t + spec.length <= window.end => {
                vec![Span::new(t, t + spec.length)]
            }
            Some(_) => Vec::new(),
            None => calendar::grid(window, spec.step, spec.length).collect(),
        };

        for candidate in candidates {
            if spec.not_before.is_some_and(|nb| candidate.start < nb) {
                continue;
            }
            let idx = free.partition_point(|f| f.end <= candidate.start);
            let available = free.get(idx).is_some_and(|f| f.contains_span(&candidate));
            if available {
                slots.push(Slot {
                    professional_id,
                    date,
                    span: candidate,
                    available: true,
                    occupancy: None,
                });
            } else if !spec.only_available {
                slots.push(Slot {
                    professional_id,
                    date,
                    span: candidate,
                    available: false,
                    occupancy: occupancy_of(&candidate, load),
                });
            }
        }
    }
    slots
}

/// Blocks win over bookings when both cover a candidate.
fn occupancy_of(candidate: &Span, load: &DayLoad) -> Option<Occupancy> {
    load.blocks
        .iter()
        .find(|(s, _)| s.overlaps(candidate))
        .map(|(_, kind)| Occupancy::Blocked(*kind))
        .or_else(|| {
            load.busy
                .iter()
                .find(|(s, _)| s.overlaps(candidate))
                .map(|(_, id)| Occupancy::Booked(*id))
        })
}

/// Merge sorted overlapping/adjacent intervals into disjoint intervals.
pub fn merge_overlapping(sorted: &[Span]) -> Vec<Span> {
    let mut merged: Vec<Span> = Vec::new();
    for &span in sorted {
        if let Some(last) = merged.last_mut()
            && span.start <= last.end {
                last.end = last.end.max(span.end);
                continue;
            }
        merged.push(span);
    }
    merged
}

/// `base` minus `to_remove`; both sorted by start, `to_remove` may overlap itself.
pub fn subtract_intervals(base: &[Span], to_remove: &[Span]) -> Vec<Span> {
    let mut result = Vec::new();
    let mut ri = 0;

    for &b in base {
        let mut current_start = b.start;
        let current_end = b.end;

        while ri < to_remove.len() && to_remove[ri].end <= current_start {
            ri += 1;
        }

        let mut j = ri;
        while j < to_remove.len() && to_remove[j].start < current_end {
            let r = &to_remove[j];
            if r.start > current_start {
                result.push(Span::new(current_start, r.start));
            }
            current_start = current_start.max(r.end);
            j += 1;
        }

        if current_start < current_end {
            result.push(Span::new(current_start, current_end));
        }
    }

    result
}
