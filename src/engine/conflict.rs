use chrono_tz::Tz;
use ulid::Ulid;

use crate::calendar;
use crate::limits::*;
use crate::model::*;

use super::blocks::{BlockList, blocks_in};
use super::hours::{self, WeeklyHours};
use super::store::ProfessionalState;
use super::{ConflictWith, EngineError};

pub(crate) fn validate_span(span: &Span) -> Result<(), EngineError> {
    if span.start >= span.end {
        return Err(EngineError::validation("interval must end after it starts"));
    }
    if span.start < MIN_VALID_TIMESTAMP_MS || span.end > MAX_VALID_TIMESTAMP_MS {
        return Err(EngineError::validation("timestamp out of range"));
    }
    Ok(())
}

/// True iff an active appointment (other than `exclude`) or a block
/// overlaps `candidate`. Cancelled and no-show appointments never block.
///
/// `appointments` must be sorted by start.
pub fn is_conflicting(
    candidate: &Span,
    appointments: &[Appointment],
    blocks: &[&Block],
    exclude: Option<Ulid>,
) -> bool {
    if blocks.iter().any(|b| b.span.overlaps(candidate)) {
        return true;
    }
    let right_bound = appointments.partition_point(|a| a.span.start < candidate.end);
    appointments[..right_bound]
        .iter()
        .any(|a| a.is_active() && Some(a.id) != exclude && a.span.end > candidate.start)
}

/// Everything shared by every professional of a tenant that a commit-time
/// check needs to see.
pub(crate) struct OrgView<'a> {
    pub tz: &'a Tz,
    pub hours: &'a WeeklyHours,
    pub blocks: &'a BlockList,
}

/// First reason `candidate` cannot be booked for this professional, if any.
///
/// Checked in order: working hours, blocks, appointments.
pub(crate) fn find_conflict(
    ps: &ProfessionalState,
    org: &OrgView<'_>,
    candidate: &Span,
    exclude: Option<Ulid>,
) -> Option<ConflictWith> {
    let date = calendar::local_date(org.tz, candidate.start);
    let open = hours::resolve(&ps.hours, org.hours, org.tz, date);
    if !open.iter().any(|o| o.contains_span(candidate)) {
        return Some(ConflictWith::OutsideWorkingHours);
    }

    let blocks = blocks_in(&ps.blocks, org.blocks, candidate);
    if !is_conflicting(candidate, &ps.appointments, &blocks, exclude) {
        return None;
    }
    if let Some(b) = blocks.first() {
        return Some(ConflictWith::Block {
            id: b.id,
            kind: b.kind,
        });
    }
    ps.overlapping(candidate)
        .find(|a| a.is_active() && Some(a.id) != exclude)
        .map(|a| ConflictWith::Appointment(a.id))
}

pub(crate) fn check_no_conflict(
    ps: &ProfessionalState,
    org: &OrgView<'_>,
    candidate: &Span,
    exclude: Option<Ulid>,
) -> Result<(), EngineError> {
    match find_conflict(ps, org, candidate, exclude) {
        None => Ok(()),
        Some(with) => Err(EngineError::SlotConflict {
            professional_id: ps.id(),
            span: *candidate,
            with,
        }),
    }
}
