use chrono::{NaiveDate, NaiveTime};
use ulid::Ulid;

use crate::calendar;
use crate::limits::*;
use crate::model::*;
use crate::observability::{self, BOOKINGS_TOTAL, ROUND_ROBIN_SKIPS_TOTAL, SERIES_TOTAL};

use super::conflict::{OrgView, check_no_conflict, find_conflict, validate_span};
use super::recurrence;
use super::round_robin::{PointerKey, rotation_order};
use super::store::ProfessionalState;
use super::{DateConflict, Engine, EngineError};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BookingRequest {
    pub services: Vec<Ulid>,
    /// `None` assigns through the rotation of the first service.
    pub professional: Option<Ulid>,
    pub date: NaiveDate,
    pub start_time: NaiveTime,
    pub duration_override_min: Option<u32>,
    pub client: Option<String>,
}

/// A booking repeated on every date of `pattern`; `booking.date` is the anchor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SeriesRequest {
    pub booking: BookingRequest,
    pub pattern: RecurrencePattern,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SeriesBooking {
    pub series: RecurrenceSeries,
    pub appointments: Vec<Appointment>,
}

impl BookingRequest {
    fn validate(&self) -> Result<(), EngineError> {
        if let Some(ref c) = self.client
            && c.len() > MAX_LABEL_LEN {
                return Err(EngineError::validation("client label too long"));
            }
        Ok(())
    }
}

impl Engine {
    fn span_at(&self, date: NaiveDate, time: NaiveTime, length: Ms) -> Result<Span, EngineError> {
        let start = calendar::local_instant(&self.tz, date, time);
        let span = Span {
            start,
            end: start + length,
        };
        validate_span(&span)?;
        Ok(span)
    }

    fn new_appointment(&self, pid: Ulid, req: &BookingRequest, span: Span, series_id: Option<Ulid>) -> Appointment {
        Appointment {
            id: Ulid::new(),
            professional_id: pid,
            services: req.services.clone(),
            span,
            status: AppointmentStatus::Scheduled,
            series_id,
            client: req.client.clone(),
        }
    }

    fn count_booking(outcome: &Result<Appointment, EngineError>) {
        metrics::counter!(BOOKINGS_TOTAL, "outcome" => observability::outcome_label(outcome))
            .increment(1);
    }

    // ── Single bookings ──────────────────────────────────────

    pub async fn book(&self, req: BookingRequest) -> Result<Appointment, EngineError> {
        let result = self.book_inner(&req).await;
        Self::count_booking(&result);
        match &result {
            Ok(a) => tracing::info!(
                "booked {} for professional {} at {}",
                a.id,
                a.professional_id,
                a.span.start
            ),
            Err(e) => tracing::debug!("booking on {} {} rejected: {e}", req.date, req.start_time),
        }
        result
    }

    async fn book_inner(&self, req: &BookingRequest) -> Result<Appointment, EngineError> {
        req.validate()?;
        let length = self.occupied_length(&req.services, req.duration_override_min)?;
        let span = self.span_at(req.date, req.start_time, length)?;
        self.ensure_quota(1).await?;

        let Some(pid) = req.professional else {
            return self.book_with_rotation(req, span).await;
        };
        let ps = self
            .eligible(&req.services, Some(pid))
            .await?
            .into_iter()
            .next()
            .ok_or(EngineError::NotFound(pid))?;

        let org_hours = self.org_hours.read().await;
        let org_blocks = self.org_blocks.read().await;
        let org = OrgView { tz: &self.tz, hours: &org_hours, blocks: &org_blocks };

        let mut guard = ps.write().await;
        ensure_room(&guard, 1)?;
        check_no_conflict(&guard, &org, &span, None)?;
        let appointment = self.new_appointment(pid, req, span, None);
        self.apply_and_publish(&mut guard, &Event::AppointmentBooked { appointment: appointment.clone() });
        Ok(appointment)
    }

    /// Round robin under the rotation lock: the first professional after the
    /// pointer for whom the span validates gets the booking.
    async fn book_with_rotation(&self, req: &BookingRequest, span: Span) -> Result<Appointment, EngineError> {
        let service_id = req.services[0];
        let key = PointerKey::new(&self.tenant, service_id);
        let _turn = self.rotation_locks.lock(&key).await;
        let last = self.pointers.last_assigned(&key).await;
        let pool = self.rotation_pool(&req.services).await;

        let org_hours = self.org_hours.read().await;
        let org_blocks = self.org_blocks.read().await;
        let org = OrgView { tz: &self.tz, hours: &org_hours, blocks: &org_blocks };

        for pid in rotation_order(&pool, last) {
            let Some(ps) = self.store.get_professional(&pid) else { continue };
            let mut guard = ps.write().await;
            if ensure_room(&guard, 1).is_err() {
                tracing::debug!("rotation for {service_id} skips {pid}: appointment limit reached");
                metrics::counter!(ROUND_ROBIN_SKIPS_TOTAL).increment(1);
                continue;
            }
            if let Some(with) = find_conflict(&guard, &org, &span, None) {
                tracing::debug!("rotation for {service_id} skips {pid}: {with}");
                metrics::counter!(ROUND_ROBIN_SKIPS_TOTAL).increment(1);
                continue;
            }
            let appointment = self.new_appointment(pid, req, span, None);
            self.apply_and_publish(&mut guard, &Event::AppointmentBooked { appointment: appointment.clone() });
            self.advance_rotation(&key, &mut guard).await;
            return Ok(appointment);
        }
        Err(EngineError::NoProfessionalAvailable { service_id })
    }

    async fn advance_rotation(&self, key: &PointerKey, ps: &mut ProfessionalState) {
        let pid = ps.id();
        self.pointers.record(key, pid).await;
        self.apply_and_publish(
            ps,
            &Event::RotationAdvanced {
                service_id: key.service_id,
                professional_id: pid,
            },
        );
    }

    // ── Lifecycle ────────────────────────────────────────────

    /// Move an appointment, optionally to another professional. Its own
    /// current time counts as free. Terminal appointments are left as they are.
    pub async fn reschedule(
        &self,
        id: Ulid,
        date: NaiveDate,
        time: NaiveTime,
        professional: Option<Ulid>,
    ) -> Result<Appointment, EngineError> {
        let org_hours = self.org_hours.read().await;
        let org_blocks = self.org_blocks.read().await;
        let org = OrgView { tz: &self.tz, hours: &org_hours, blocks: &org_blocks };

        // The owner is only trusted once its lock is held; a concurrent move
        // in between sends us around again.
        let (from, to, mut source_guard, mut target_guard) = loop {
            let (from, mut guard) = self.resolve_appointment_write(&id).await?;
            let to = professional.unwrap_or(from);

            if to == from {
                let current = guard.appointment(&id).cloned().ok_or(EngineError::NotFound(id))?;
                if current.status.is_terminal() {
                    return Ok(current);
                }
                let span = self.span_at(date, time, current.span.duration_ms())?;
                check_no_conflict(&guard, &org, &span, Some(id))?;
                let event = Event::AppointmentMoved { id, from_professional: from, professional_id: to, span };
                self.apply_and_publish(&mut guard, &event);
                tracing::info!("appointment {id} moved to {}", span.start);
                return guard.appointment(&id).cloned().ok_or(EngineError::NotFound(id));
            }

            let target = self.store.get_professional(&to).ok_or(EngineError::NotFound(to))?;
            if from < to {
                let target_guard = target.write_owned().await;
                break (from, to, guard, target_guard);
            }
            // Sorted acquisition keeps two concurrent cross moves from
            // deadlocking: release the source, take the target first.
            let source = self.store.get_professional(&from).ok_or(EngineError::NotFound(from))?;
            drop(guard);
            let target_guard = target.write_owned().await;
            let source_guard = source.write_owned().await;
            if source_guard.appointment(&id).is_some() {
                break (from, to, source_guard, target_guard);
            }
        };

        let current = source_guard.appointment(&id).cloned().ok_or(EngineError::NotFound(id))?;
        if current.status.is_terminal() {
            return Ok(current);
        }
        ensure_room(&target_guard, 1)?;
        if !target_guard.profile.performs_all(&current.services) {
            return Err(EngineError::validation(format!(
                "professional {to} does not perform every booked service"
            )));
        }
        let span = self.span_at(date, time, current.span.duration_ms())?;
        check_no_conflict(&target_guard, &org, &span, Some(id))?;

        let event = Event::AppointmentMoved { id, from_professional: from, professional_id: to, span };
        self.apply_and_publish(&mut source_guard, &event);
        target_guard.insert_appointment(current);
        self.apply_and_publish(&mut target_guard, &event);
        tracing::info!("appointment {id} moved from {from} to {to} at {}", span.start);
        target_guard.appointment(&id).cloned().ok_or(EngineError::NotFound(id))
    }

    /// Soft cancellation. Already terminal appointments are returned unchanged.
    pub async fn cancel(&self, id: Ulid) -> Result<Appointment, EngineError> {
        self.transition(id, AppointmentStatus::Cancelled, true).await
    }

    pub async fn set_status(&self, id: Ulid, to: AppointmentStatus) -> Result<Appointment, EngineError> {
        self.transition(id, to, false).await
    }

    async fn transition(
        &self,
        id: Ulid,
        to: AppointmentStatus,
        terminal_is_noop: bool,
    ) -> Result<Appointment, EngineError> {
        let (pid, mut guard) = self.resolve_appointment_write(&id).await?;
        let current = guard.appointment(&id).cloned().ok_or(EngineError::NotFound(id))?;
        let from = current.status;
        if from == to || (terminal_is_noop && from.is_terminal()) {
            return Ok(current);
        }
        if !from.can_transition_to(to) {
            return Err(EngineError::InvalidTransition { id, from, to });
        }
        self.apply_and_publish(&mut guard, &Event::StatusChanged { id, professional_id: pid, from, to });
        tracing::debug!("appointment {id}: {from} -> {to}");
        guard.appointment(&id).cloned().ok_or(EngineError::NotFound(id))
    }

    // ── Series ───────────────────────────────────────────────

    /// Book every occurrence of a pattern or none of them.
    pub async fn book_series(&self, req: SeriesRequest) -> Result<SeriesBooking, EngineError> {
        let result = self.book_series_inner(&req).await;
        metrics::counter!(SERIES_TOTAL, "outcome" => observability::outcome_label(&result)).increment(1);
        match &result {
            Ok(b) => tracing::info!(
                "series {} booked: {} occurrences for professional {}",
                b.series.id,
                b.appointments.len(),
                b.series.professional_id
            ),
            Err(e) => tracing::debug!("series anchored {} rejected: {e}", req.booking.date),
        }
        result
    }

    async fn book_series_inner(&self, req: &SeriesRequest) -> Result<SeriesBooking, EngineError> {
        let booking = &req.booking;
        booking.validate()?;
        let dates = recurrence::expand(booking.date, &req.pattern)?;
        if dates.is_empty() {
            return Err(EngineError::RecurrenceUnsatisfiable { conflicts: Vec::new() });
        }
        let length = self.occupied_length(&booking.services, booking.duration_override_min)?;
        let spans = dates
            .iter()
            .map(|d| Ok((*d, self.span_at(*d, booking.start_time, length)?)))
            .collect::<Result<Vec<_>, EngineError>>()?;
        self.ensure_quota(spans.len()).await?;

        if let Some(pid) = booking.professional {
            let ps = self
                .eligible(&booking.services, Some(pid))
                .await?
                .into_iter()
                .next()
                .ok_or(EngineError::NotFound(pid))?;
            let org_hours = self.org_hours.read().await;
            let org_blocks = self.org_blocks.read().await;
            let org = OrgView { tz: &self.tz, hours: &org_hours, blocks: &org_blocks };
            let mut guard = ps.write().await;
            ensure_room(&guard, spans.len())?;
            let conflicts = series_conflicts(&guard, &org, &spans);
            if !conflicts.is_empty() {
                return Err(EngineError::RecurrenceUnsatisfiable { conflicts });
            }
            return Ok(self.commit_series(&mut guard, req, &spans));
        }

        let service_id = booking.services[0];
        let key = PointerKey::new(&self.tenant, service_id);
        let _turn = self.rotation_locks.lock(&key).await;
        let last = self.pointers.last_assigned(&key).await;
        let pool = self.rotation_pool(&booking.services).await;

        let org_hours = self.org_hours.read().await;
        let org_blocks = self.org_blocks.read().await;
        let org = OrgView { tz: &self.tz, hours: &org_hours, blocks: &org_blocks };
        for pid in rotation_order(&pool, last) {
            let Some(ps) = self.store.get_professional(&pid) else { continue };
            let mut guard = ps.write().await;
            if ensure_room(&guard, spans.len()).is_err() {
                tracing::debug!("rotation for {service_id} skips {pid}: appointment limit reached");
                metrics::counter!(ROUND_ROBIN_SKIPS_TOTAL).increment(1);
                continue;
            }
            let conflicts = series_conflicts(&guard, &org, &spans);
            if !conflicts.is_empty() {
                tracing::debug!(
                    "rotation for {service_id} skips {pid}: {} conflicting dates",
                    conflicts.len()
                );
                metrics::counter!(ROUND_ROBIN_SKIPS_TOTAL).increment(1);
                continue;
            }
            let booked = self.commit_series(&mut guard, req, &spans);
            self.advance_rotation(&key, &mut guard).await;
            return Ok(booked);
        }
        Err(EngineError::NoProfessionalAvailable { service_id })
    }

    fn commit_series(
        &self,
        ps: &mut ProfessionalState,
        req: &SeriesRequest,
        spans: &[(NaiveDate, Span)],
    ) -> SeriesBooking {
        let series_id = Ulid::new();
        let pid = ps.id();
        let appointments: Vec<Appointment> = spans
            .iter()
            .map(|(_, span)| self.new_appointment(pid, &req.booking, *span, Some(series_id)))
            .collect();
        for appointment in &appointments {
            self.apply_and_publish(ps, &Event::AppointmentBooked { appointment: appointment.clone() });
        }
        let series = RecurrenceSeries {
            id: series_id,
            professional_id: pid,
            anchor: req.booking.date,
            pattern: req.pattern.clone(),
            members: appointments.iter().map(|a| a.id).collect(),
        };
        self.apply_and_publish(ps, &Event::SeriesCreated { series: series.clone() });
        SeriesBooking { series, appointments }
    }

    /// Cancel part or all of a series. Returns the ids that changed state;
    /// members already terminal are left alone.
    pub async fn cancel_series(&self, series_id: Ulid, scope: SeriesScope) -> Result<Vec<Ulid>, EngineError> {
        let series = self
            .store
            .get_series(&series_id)
            .ok_or(EngineError::NotFound(series_id))?;

        let targets: Vec<Ulid> = match scope {
            SeriesScope::ThisOccurrence(id) => {
                if !series.members.contains(&id) {
                    return Err(EngineError::validation(format!(
                        "appointment {id} is not part of series {series_id}"
                    )));
                }
                let before = self.get_appointment(&id).await.ok_or(EngineError::NotFound(id))?;
                self.cancel(id).await?;
                let (_, mut guard) = self.resolve_appointment_write(&id).await?;
                self.apply_and_publish(&mut guard, &Event::AppointmentDetached { id, series_id });
                return Ok(if before.status.is_terminal() { Vec::new() } else { vec![id] });
            }
            SeriesScope::ThisAndFollowing(id) => {
                if !series.members.contains(&id) {
                    return Err(EngineError::validation(format!(
                        "appointment {id} is not part of series {series_id}"
                    )));
                }
                let pivot = self.get_appointment(&id).await.ok_or(EngineError::NotFound(id))?;
                let mut following = Vec::new();
                for member in &series.members {
                    if let Some(a) = self.get_appointment(member).await
                        && a.span.start >= pivot.span.start {
                            following.push(a.id);
                        }
                }
                following
            }
            SeriesScope::Entire => series.members.clone(),
        };

        let mut cancelled = Vec::new();
        for id in targets {
            let Some(current) = self.get_appointment(&id).await else { continue };
            if current.status.is_terminal() {
                continue;
            }
            let after = self.cancel(id).await?;
            if after.status == AppointmentStatus::Cancelled {
                cancelled.push(id);
            }
        }
        tracing::info!("series {series_id}: {} member(s) cancelled", cancelled.len());
        Ok(cancelled)
    }
}

fn ensure_room(ps: &ProfessionalState, adding: usize) -> Result<(), EngineError> {
    if ps.appointments.len() + adding > MAX_APPOINTMENTS_PER_PROFESSIONAL {
        return Err(EngineError::validation("too many appointments for one professional"));
    }
    Ok(())
}

/// Every occurrence that would fail to book, with its cause.
fn series_conflicts(ps: &ProfessionalState, org: &OrgView<'_>, spans: &[(NaiveDate, Span)]) -> Vec<DateConflict> {
    spans
        .iter()
        .filter_map(|(date, span)| {
            find_conflict(ps, org, span, None).map(|with| DateConflict { date: *date, with })
        })
        .collect()
}
