use chrono::NaiveDate;
use serde::Serialize;
use ulid::Ulid;

use crate::model::{AppointmentStatus, BlockKind, Span};

/// What a rejected interval collided with.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ConflictWith {
    Appointment(Ulid),
    Block { id: Ulid, kind: BlockKind },
    OutsideWorkingHours,
}

impl std::fmt::Display for ConflictWith {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConflictWith::Appointment(id) => write!(f, "appointment {id}"),
            ConflictWith::Block { id, kind } => write!(f, "{} block {id}", kind.as_str()),
            ConflictWith::OutsideWorkingHours => f.write_str("outside working hours"),
        }
    }
}

/// One occurrence of a series that could not be booked.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct DateConflict {
    pub date: NaiveDate,
    pub with: ConflictWith,
}

#[derive(Debug)]
pub enum EngineError {
    Validation(String),
    NotFound(Ulid),
    SlotConflict {
        professional_id: Ulid,
        span: Span,
        with: ConflictWith,
    },
    NoProfessionalAvailable {
        service_id: Ulid,
    },
    /// Empty `conflicts` means the pattern produced no dates at all.
    RecurrenceUnsatisfiable {
        conflicts: Vec<DateConflict>,
    },
    CapacityExceeded {
        remaining: u32,
        requested: u32,
    },
    InvalidTransition {
        id: Ulid,
        from: AppointmentStatus,
        to: AppointmentStatus,
    },
    MalformedWorkingHours {
        professional_id: Option<Ulid>,
        reason: String,
    },
}

impl EngineError {
    pub fn validation(msg: impl Into<String>) -> Self {
        EngineError::Validation(msg.into())
    }

    /// Broken snapshot data rather than an expected business outcome.
    pub fn is_fault(&self) -> bool {
        matches!(self, EngineError::MalformedWorkingHours { .. })
    }

    /// Short stable label for metrics and error bodies.
    pub fn code(&self) -> &'static str {
        match self {
            EngineError::Validation(_) => "validation_error",
            EngineError::NotFound(_) => "not_found",
            EngineError::SlotConflict { .. } => "slot_conflict",
            EngineError::NoProfessionalAvailable { .. } => "no_professional_available",
            EngineError::RecurrenceUnsatisfiable { .. } => "recurrence_unsatisfiable",
            EngineError::CapacityExceeded { .. } => "capacity_exceeded",
            EngineError::InvalidTransition { .. } => "invalid_transition",
            EngineError::MalformedWorkingHours { .. } => "malformed_working_hours",
        }
    }
}

impl std::fmt::Display for EngineError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EngineError::Validation(msg) => write!(f, "validation error: {msg}"),
            EngineError::NotFound(id) => write!(f, "not found: {id}"),
            EngineError::SlotConflict {
                professional_id,
                span,
                with,
            } => write!(
                f,
                "slot [{}, {}) for professional {professional_id} conflicts with {with}",
                span.start, span.end
            ),
            EngineError::NoProfessionalAvailable { service_id } => {
                write!(f, "no professional available for service {service_id}")
            }
            EngineError::RecurrenceUnsatisfiable { conflicts } if conflicts.is_empty() => {
                write!(f, "recurrence produced no occurrences")
            }
            EngineError::RecurrenceUnsatisfiable { conflicts } => {
                let dates: Vec<String> = conflicts.iter().map(|c| c.date.to_string()).collect();
                write!(f, "recurrence conflicts on {}", dates.join(", "))
            }
            EngineError::CapacityExceeded { remaining, requested } => write!(
                f,
                "plan capacity exceeded: {requested} requested, {remaining} remaining"
            ),
            EngineError::InvalidTransition { id, from, to } => {
                write!(f, "appointment {id} cannot move from {from} to {to}")
            }
            EngineError::MalformedWorkingHours {
                professional_id: Some(pid),
                reason,
            } => write!(f, "malformed working hours for {pid}: {reason}"),
            EngineError::MalformedWorkingHours {
                professional_id: None,
                reason,
            } => write!(f, "malformed organization hours: {reason}"),
        }
    }
}

impl std::error::Error for EngineError {}
