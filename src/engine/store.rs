use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::RwLock;
use ulid::Ulid;

use crate::model::*;

use super::blocks::BlockList;
use super::hours::WeeklyHours;

pub type SharedProfessionalState = Arc<RwLock<ProfessionalState>>;

/// Everything the engine knows about one professional's calendar.
#[derive(Debug, Clone)]
pub struct ProfessionalState {
    pub profile: Professional,
    pub hours: WeeklyHours,
    pub blocks: BlockList,
    /// Appointments in every status, sorted by `span.start`.
    pub appointments: Vec<Appointment>,
}

impl ProfessionalState {
    pub fn new(profile: Professional) -> Self {
        let owner = Some(profile.id);
        Self {
            profile,
            hours: WeeklyHours::new(owner),
            blocks: BlockList::new(),
            appointments: Vec::new(),
        }
    }

    pub fn id(&self) -> Ulid {
        self.profile.id
    }

    /// Insert appointment maintaining sort order by span.start.
    pub fn insert_appointment(&mut self, appointment: Appointment) {
        let pos = self
            .appointments
            .binary_search_by_key(&appointment.span.start, |a| a.span.start)
            .unwrap_or_else(|e| e);
        self.appointments.insert(pos, appointment);
    }

    pub fn remove_appointment(&mut self, id: Ulid) -> Option<Appointment> {
        let pos = self.appointments.iter().position(|a| a.id == id)?;
        Some(self.appointments.remove(pos))
    }

    pub fn appointment(&self, id: &Ulid) -> Option<&Appointment> {
        self.appointments.iter().find(|a| a.id == *id)
    }

    pub fn appointment_mut(&mut self, id: &Ulid) -> Option<&mut Appointment> {
        self.appointments.iter_mut().find(|a| a.id == *id)
    }

    /// Appointments (any status) whose span overlaps the query window.
    pub fn overlapping(&self, query: &Span) -> impl Iterator<Item = &Appointment> {
        let right_bound = self
            .appointments
            .partition_point(|a| a.span.start < query.end);
        self.appointments[..right_bound]
            .iter()
            .filter(move |a| a.span.end > query.start)
    }

    /// Active appointments inside `window`, minus `exclude`.
    pub fn busy_in(&self, window: &Span, exclude: Option<Ulid>) -> Vec<(Span, Ulid)> {
        self.overlapping(window)
            .filter(|a| a.is_active() && Some(a.id) != exclude)
            .map(|a| (a.span, a.id))
            .collect()
    }
}

pub struct InMemoryStore {
    professionals: DashMap<Ulid, SharedProfessionalState>,
    services: DashMap<Ulid, Service>,
    appointment_to_professional: DashMap<Ulid, Ulid>,
    series: DashMap<Ulid, RecurrenceSeries>,
}

impl Default for InMemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self {
            professionals: DashMap::new(),
            services: DashMap::new(),
            appointment_to_professional: DashMap::new(),
            series: DashMap::new(),
        }
    }

    // ── Professionals ────────────────────────────────────────

    pub fn professional_count(&self) -> usize {
        self.professionals.len()
    }

    pub fn get_professional(&self, id: &Ulid) -> Option<SharedProfessionalState> {
        self.professionals.get(id).map(|e| e.value().clone())
    }

    pub fn insert_professional(&self, id: Ulid, state: SharedProfessionalState) {
        self.professionals.insert(id, state);
    }

    /// Snapshot of all professional handles, sorted by id.
    pub fn professionals(&self) -> Vec<(Ulid, SharedProfessionalState)> {
        let mut all: Vec<_> = self
            .professionals
            .iter()
            .map(|e| (*e.key(), e.value().clone()))
            .collect();
        all.sort_by_key(|(id, _)| *id);
        all
    }

    // ── Services ─────────────────────────────────────────────

    pub fn get_service(&self, id: &Ulid) -> Option<Service> {
        self.services.get(id).map(|e| e.value().clone())
    }

    pub fn insert_service(&self, service: Service) {
        self.services.insert(service.id, service);
    }

    // ── Appointment index ────────────────────────────────────

    pub fn professional_for_appointment(&self, appointment_id: &Ulid) -> Option<Ulid> {
        self.appointment_to_professional
            .get(appointment_id)
            .map(|e| *e.value())
    }

    pub fn map_appointment(&self, appointment_id: Ulid, professional_id: Ulid) {
        self.appointment_to_professional
            .insert(appointment_id, professional_id);
    }

    // ── Series ───────────────────────────────────────────────

    pub fn get_series(&self, id: &Ulid) -> Option<RecurrenceSeries> {
        self.series.get(id).map(|e| e.value().clone())
    }

    pub fn insert_series(&self, series: RecurrenceSeries) {
        self.series.insert(series.id, series);
    }

    pub fn detach_from_series(&self, series_id: &Ulid, appointment_id: &Ulid) {
        if let Some(mut s) = self.series.get_mut(series_id) {
            s.members.retain(|m| m != appointment_id);
        }
    }

    // ── Event application ────────────────────────────────────

    /// Apply a committed event to one professional's state (caller holds the lock).
    pub fn apply_event(&self, ps: &mut ProfessionalState, event: &Event) {
        match event {
            Event::AppointmentBooked { appointment } => {
                ps.insert_appointment(appointment.clone());
                self.map_appointment(appointment.id, ps.id());
            }
            Event::AppointmentMoved {
                id,
                from_professional,
                professional_id,
                ..
            } if *from_professional == ps.id() && *professional_id != ps.id() => {
                ps.remove_appointment(*id);
            }
            Event::AppointmentMoved {
                id,
                professional_id,
                span,
                ..
            } => {
                if let Some(mut moved) = ps.remove_appointment(*id) {
                    moved.span = *span;
                    moved.professional_id = *professional_id;
                    ps.insert_appointment(moved);
                }
                self.map_appointment(*id, *professional_id);
            }
            Event::StatusChanged { id, to, .. } => {
                if let Some(a) = ps.appointment_mut(id) {
                    a.status = *to;
                }
            }
            Event::AppointmentDetached { id, series_id } => {
                if let Some(a) = ps.appointment_mut(id) {
                    a.series_id = None;
                }
                self.detach_from_series(series_id, id);
            }
            Event::BlockAdded { block } => ps.blocks.insert(block.clone()),
            Event::BlockRemoved { id, .. } => {
                ps.blocks.remove(*id);
            }
            Event::SeriesCreated { series } => self.insert_series(series.clone()),
            Event::RotationAdvanced { .. } => {}
        }
    }
}
