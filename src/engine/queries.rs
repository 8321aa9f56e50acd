use std::time::Instant;

use chrono::{NaiveDate, NaiveTime};
use serde::{Deserialize, Serialize};
use ulid::Ulid;

use crate::calendar;
use crate::limits::*;
use crate::model::*;

use super::availability::{DayLoad, SlotSpec, day_slots};
use super::blocks::{BlockList, blocks_in};
use super::hours::{self, WeeklyHours};
use super::round_robin::{PointerKey, pick};
use super::store::ProfessionalState;
use super::{Engine, EngineError};

/// Granularity of the candidate walk.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum GridStep {
    Fifteen,
    #[default]
    Thirty,
    Sixty,
}

impl GridStep {
    pub fn from_minutes(minutes: u32) -> Option<Self> {
        match minutes {
            15 => Some(GridStep::Fifteen),
            30 => Some(GridStep::Thirty),
            60 => Some(GridStep::Sixty),
            _ => None,
        }
    }

    pub fn minutes(&self) -> u32 {
        match self {
            GridStep::Fifteen => 15,
            GridStep::Thirty => 30,
            GridStep::Sixty => 60,
        }
    }

    pub fn as_ms(&self) -> Ms {
        self.minutes() as Ms * MINUTE_MS
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SlotRequest {
    pub services: Vec<Ulid>,
    pub first_day: NaiveDate,
    pub days: u32,
    pub professional: Option<Ulid>,
    pub requested_time: Option<NaiveTime>,
    pub duration_override_min: Option<u32>,
    pub step: GridStep,
    pub only_available: bool,
    /// Appointment whose own time counts as free (rescheduling).
    pub exclude: Option<Ulid>,
    pub not_before: Option<Ms>,
}

impl SlotRequest {
    /// One day, 30-minute grid, available slots only.
    pub fn new(services: Vec<Ulid>, first_day: NaiveDate) -> Self {
        Self {
            services,
            first_day,
            days: 1,
            professional: None,
            requested_time: None,
            duration_override_min: None,
            step: GridStep::default(),
            only_available: true,
            exclude: None,
            not_before: None,
        }
    }

    fn validate(&self) -> Result<(), EngineError> {
        if self.days == 0 || self.days > MAX_RANGE_DAYS {
            return Err(EngineError::validation(format!(
                "range must be between 1 and {MAX_RANGE_DAYS} days"
            )));
        }
        Ok(())
    }
}

impl Engine {
    /// Candidate slots per eligible professional per day.
    ///
    /// Professionals come in `(display_order, id)` order; each
    /// professional's slots are chronological.
    pub async fn slots(&self, req: &SlotRequest) -> Result<Vec<Slot>, EngineError> {
        let started = Instant::now();
        req.validate()?;
        let length = self.occupied_length(&req.services, req.duration_override_min)?;
        let pool = self.eligible(&req.services, req.professional).await?;

        let org_hours = self.org_hours.read().await;
        let org_blocks = self.org_blocks.read().await;

        let mut out = Vec::new();
        for ps in &pool {
            let guard = ps.read().await;
            for date in calendar::days(req.first_day, req.days) {
                out.extend(self.professional_day(&guard, &org_hours, &org_blocks, date, length, req));
            }
        }

        metrics::counter!(crate::observability::SLOT_QUERIES_TOTAL).increment(1);
        metrics::histogram!(crate::observability::SLOT_QUERY_DURATION_SECONDS)
            .record(started.elapsed().as_secs_f64());
        tracing::debug!(
            "slots for {} day(s) from {} over {} professional(s): {} candidates",
            req.days,
            req.first_day,
            pool.len(),
            out.len()
        );
        Ok(out)
    }

    fn professional_day(
        &self,
        ps: &ProfessionalState,
        org_hours: &WeeklyHours,
        org_blocks: &BlockList,
        date: NaiveDate,
        length: Ms,
        req: &SlotRequest,
    ) -> Vec<Slot> {
        let open = hours::resolve(&ps.hours, org_hours, &self.tz, date);
        let (Some(first), Some(last)) = (open.first(), open.last()) else {
            return Vec::new();
        };
        let window = Span::new(first.start, last.end);
        let load = DayLoad {
            blocks: blocks_in(&ps.blocks, org_blocks, &window)
                .into_iter()
                .map(|b| (b.span, b.kind))
                .collect(),
            busy: ps.busy_in(&window, req.exclude),
        };
        let spec = SlotSpec {
            step: req.step.as_ms(),
            length,
            only_available: req.only_available,
            requested_start: req
                .requested_time
                .map(|t| calendar::local_instant(&self.tz, date, t)),
            not_before: req.not_before,
        };
        day_slots(ps.id(), date, &open, &load, &spec)
    }

    /// Who automatic assignment would choose for this request right now,
    /// without advancing the rotation.
    pub async fn next_professional(&self, req: &SlotRequest) -> Result<Ulid, EngineError> {
        let first = *req
            .services
            .first()
            .ok_or_else(|| EngineError::validation("at least one service is required"))?;
        let pool = self.rotation_pool(&req.services).await;
        let last = self
            .pointers
            .last_assigned(&PointerKey::new(&self.tenant, first))
            .await;

        let mut lookahead = req.clone();
        lookahead.professional = None;
        lookahead.only_available = true;
        let slots = self.slots(&lookahead).await?;
        pick(&pool, last, |id| slots.iter().any(|s| s.professional_id == id))
            .ok_or(EngineError::NoProfessionalAvailable { service_id: first })
    }

    pub async fn get_appointment(&self, id: &Ulid) -> Option<Appointment> {
        let pid = self.store.professional_for_appointment(id)?;
        let ps = self.store.get_professional(&pid)?;
        let guard = ps.read().await;
        guard.appointment(id).cloned()
    }

    /// Appointments of one professional overlapping `window`, any status.
    pub async fn list_appointments(
        &self,
        professional_id: Ulid,
        window: &Span,
    ) -> Result<Vec<Appointment>, EngineError> {
        let ps = self
            .store
            .get_professional(&professional_id)
            .ok_or(EngineError::NotFound(professional_id))?;
        let guard = ps.read().await;
        Ok(guard.overlapping(window).cloned().collect())
    }

    pub fn get_series(&self, id: &Ulid) -> Option<RecurrenceSeries> {
        self.store.get_series(id)
    }
}
