use chrono::{NaiveDate, NaiveTime, Weekday};
use serde::{Deserialize, Serialize};
use ulid::Ulid;

/// Unix milliseconds. Every stored instant is UTC.
pub type Ms = i64;

pub const MINUTE_MS: Ms = 60_000;

/// Half-open interval `[start, end)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Span {
    pub start: Ms,
    pub end: Ms,
}

impl Span {
    pub fn new(start: Ms, end: Ms) -> Self {
        debug_assert!(start < end, "Span start must be before end");
        Self { start, end }
    }

    pub fn duration_ms(&self) -> Ms {
        self.end - self.start
    }

    pub fn overlaps(&self, other: &Span) -> bool {
        self.start < other.end && other.start < self.end
    }

    /// Returns true if `self` fully contains `other`.
    pub fn contains_span(&self, other: &Span) -> bool {
        self.start <= other.start && other.end <= self.end
    }
}

/// Local wall-clock range `[start, end)` inside one day.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeRange {
    pub start: NaiveTime,
    pub end: NaiveTime,
}

impl TimeRange {
    pub fn new(start: NaiveTime, end: NaiveTime) -> Self {
        Self { start, end }
    }
}

/// Which calendar days a working-hours rule applies to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HoursDay {
    Weekday(Weekday),
    /// Exception for one date; replaces every weekday rule for it.
    Date(NaiveDate),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkingHoursRule {
    /// `None` for organization-wide business hours.
    pub professional_id: Option<Ulid>,
    pub day: HoursDay,
    #[serde(default)]
    pub ranges: Vec<TimeRange>,
}

// ── Blocks ───────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum BlockKind {
    #[serde(rename = "vacaciones")]
    Vacation,
    #[serde(rename = "feriado")]
    Holiday,
    #[serde(rename = "mantenimiento")]
    Maintenance,
    #[serde(rename = "capacitacion")]
    Training,
    #[serde(rename = "personal")]
    Personal,
    #[serde(rename = "otro")]
    Other,
}

impl BlockKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            BlockKind::Vacation => "vacaciones",
            BlockKind::Holiday => "feriado",
            BlockKind::Maintenance => "mantenimiento",
            BlockKind::Training => "capacitacion",
            BlockKind::Personal => "personal",
            BlockKind::Other => "otro",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BlockScope {
    Organization,
    Professional(Ulid),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Block {
    pub id: Ulid,
    pub scope: BlockScope,
    pub kind: BlockKind,
    pub span: Span,
    #[serde(default)]
    pub reason: Option<String>,
}

// ── Appointments ─────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AppointmentStatus {
    #[serde(rename = "programada")]
    Scheduled,
    #[serde(rename = "confirmada")]
    Confirmed,
    #[serde(rename = "en_sala")]
    InWaitingRoom,
    #[serde(rename = "en_servicio")]
    InService,
    #[serde(rename = "completada")]
    Completed,
    #[serde(rename = "cancelada")]
    Cancelled,
    #[serde(rename = "no_show")]
    NoShow,
}

impl AppointmentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            AppointmentStatus::Scheduled => "programada",
            AppointmentStatus::Confirmed => "confirmada",
            AppointmentStatus::InWaitingRoom => "en_sala",
            AppointmentStatus::InService => "en_servicio",
            AppointmentStatus::Completed => "completada",
            AppointmentStatus::Cancelled => "cancelada",
            AppointmentStatus::NoShow => "no_show",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            AppointmentStatus::Completed | AppointmentStatus::Cancelled | AppointmentStatus::NoShow
        )
    }

    /// Whether an appointment in this state occupies its time.
    pub fn blocks_time(&self) -> bool {
        !matches!(self, AppointmentStatus::Cancelled | AppointmentStatus::NoShow)
    }

    /// The single forward step along the service chain, if any.
    pub fn next(&self) -> Option<AppointmentStatus> {
        match self {
            AppointmentStatus::Scheduled => Some(AppointmentStatus::Confirmed),
            AppointmentStatus::Confirmed => Some(AppointmentStatus::InWaitingRoom),
            AppointmentStatus::InWaitingRoom => Some(AppointmentStatus::InService),
            AppointmentStatus::InService => Some(AppointmentStatus::Completed),
            AppointmentStatus::Completed | AppointmentStatus::Cancelled | AppointmentStatus::NoShow => None,
        }
    }

    pub fn can_transition_to(&self, to: AppointmentStatus) -> bool {
        if self.is_terminal() {
            return false;
        }
        match to {
            AppointmentStatus::Cancelled | AppointmentStatus::NoShow => true,
            other => self.next() == Some(other),
        }
    }
}

impl std::fmt::Display for AppointmentStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Appointment {
    pub id: Ulid,
    pub professional_id: Ulid,
    pub services: Vec<Ulid>,
    /// Includes every service's pre/post buffer.
    pub span: Span,
    pub status: AppointmentStatus,
    #[serde(default)]
    pub series_id: Option<Ulid>,
    #[serde(default)]
    pub client: Option<String>,
}

impl Appointment {
    pub fn is_active(&self) -> bool {
        self.status.blocks_time()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Service {
    pub id: Ulid,
    pub name: String,
    pub duration_min: u32,
    #[serde(default)]
    pub buffer_before_min: u32,
    #[serde(default)]
    pub buffer_after_min: u32,
}

impl Service {
    /// Minutes this service occupies including both buffers.
    pub fn occupied_min(&self) -> u32 {
        self.buffer_before_min + self.duration_min + self.buffer_after_min
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Professional {
    pub id: Ulid,
    pub name: String,
    #[serde(default)]
    pub display_order: u32,
    /// Services this professional can perform, in the order they are offered.
    pub services: Vec<Ulid>,
    /// Services for which this professional takes part in automatic assignment.
    #[serde(default)]
    pub rotation: Vec<Ulid>,
}

impl Professional {
    pub fn performs(&self, service_id: &Ulid) -> bool {
        self.services.contains(service_id)
    }

    pub fn performs_all(&self, services: &[Ulid]) -> bool {
        services.iter().all(|s| self.performs(s))
    }

    pub fn rotates_for(&self, service_id: &Ulid) -> bool {
        self.rotation.contains(service_id) && self.performs(service_id)
    }
}

// ── Recurrence ───────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Frequency {
    #[serde(rename = "semanal")]
    Weekly,
    #[serde(rename = "quincenal")]
    Biweekly,
    #[serde(rename = "mensual")]
    Monthly,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Termination {
    Count(u32),
    UntilDate(NaiveDate),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecurrencePattern {
    pub frequency: Frequency,
    pub interval: u32,
    /// 0 = Sunday .. 6 = Saturday, sorted and unique. Ignored for monthly.
    pub weekdays: Vec<u8>,
    pub termination: Termination,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecurrenceSeries {
    pub id: Ulid,
    pub professional_id: Ulid,
    pub anchor: NaiveDate,
    pub pattern: RecurrencePattern,
    /// Member appointment ids in chronological order.
    pub members: Vec<Ulid>,
}

/// Which members a series cancellation touches.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SeriesScope {
    ThisOccurrence(Ulid),
    ThisAndFollowing(Ulid),
    Entire,
}

// ── Slots ────────────────────────────────────────────────────────

/// Why a candidate slot cannot be booked.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Occupancy {
    Booked(Ulid),
    Blocked(BlockKind),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Slot {
    pub professional_id: Ulid,
    pub date: NaiveDate,
    pub span: Span,
    pub available: bool,
    pub occupancy: Option<Occupancy>,
}

/// Committed changes, published to persistence collaborators.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Event {
    AppointmentBooked {
        appointment: Appointment,
    },
    AppointmentMoved {
        id: Ulid,
        from_professional: Ulid,
        professional_id: Ulid,
        span: Span,
    },
    StatusChanged {
        id: Ulid,
        professional_id: Ulid,
        from: AppointmentStatus,
        to: AppointmentStatus,
    },
    SeriesCreated {
        series: RecurrenceSeries,
    },
    AppointmentDetached {
        id: Ulid,
        series_id: Ulid,
    },
    BlockAdded {
        block: Block,
    },
    BlockRemoved {
        id: Ulid,
        scope: BlockScope,
    },
    RotationAdvanced {
        service_id: Ulid,
        professional_id: Ulid,
    },
}
