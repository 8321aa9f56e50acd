mod availability;
mod blocks;
mod conflict;
mod error;
mod hours;
mod mutations;
mod queries;
mod recurrence;
mod round_robin;
mod store;

pub use availability::{DayLoad, SlotSpec, day_slots, free_intervals, merge_overlapping, subtract_intervals};
pub use blocks::BlockList;
pub use conflict::is_conflicting;
pub use error::{ConflictWith, DateConflict, EngineError};
pub use hours::WeeklyHours;
pub use mutations::{BookingRequest, SeriesBooking, SeriesRequest};
pub use queries::{GridStep, SlotRequest};
pub use recurrence::{expand, validate_pattern};
pub use round_robin::{InMemoryPointerStore, PointerKey, PointerStore, pick, rotation_order};
pub use store::{ProfessionalState, SharedProfessionalState};

use std::sync::Arc;

use async_trait::async_trait;
use chrono_tz::Tz;
use serde::Deserialize;
use tokio::sync::{OwnedRwLockWriteGuard, RwLock};
use ulid::Ulid;

use crate::limits::*;
use crate::model::*;
use crate::notify::NotifyHub;

use blocks::validate_block;
use round_robin::RotationLocks;
use store::InMemoryStore;

/// Plan-limit collaborator. `None` means unlimited.
#[async_trait]
pub trait PlanQuota: Send + Sync {
    async fn remaining_appointments(&self, tenant: &str) -> Option<u32>;
}

pub struct Unlimited;

#[async_trait]
impl PlanQuota for Unlimited {
    async fn remaining_appointments(&self, _tenant: &str) -> Option<u32> {
        None
    }
}

/// Plain records the persistence layer hands over at startup.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Snapshot {
    pub services: Vec<Service>,
    pub professionals: Vec<Professional>,
    pub hours: Vec<WorkingHoursRule>,
    pub blocks: Vec<Block>,
    pub appointments: Vec<Appointment>,
    pub series: Vec<RecurrenceSeries>,
}

/// One tenant's calendar: professionals, their hours, blocks and bookings.
pub struct Engine {
    tenant: String,
    tz: Tz,
    store: InMemoryStore,
    org_hours: RwLock<WeeklyHours>,
    org_blocks: RwLock<BlockList>,
    pointers: Arc<dyn PointerStore>,
    rotation_locks: RotationLocks,
    quota: Arc<dyn PlanQuota>,
    pub notify: Arc<NotifyHub>,
}

impl Engine {
    pub fn new(tenant: impl Into<String>, tz: Tz, notify: Arc<NotifyHub>) -> Self {
        Self {
            tenant: tenant.into(),
            tz,
            store: InMemoryStore::new(),
            org_hours: RwLock::new(WeeklyHours::new(None)),
            org_blocks: RwLock::new(BlockList::new()),
            pointers: Arc::new(InMemoryPointerStore::new()),
            rotation_locks: RotationLocks::new(),
            quota: Arc::new(Unlimited),
            notify,
        }
    }

    pub fn with_pointer_store(mut self, pointers: Arc<dyn PointerStore>) -> Self {
        self.pointers = pointers;
        self
    }

    pub fn with_quota(mut self, quota: Arc<dyn PlanQuota>) -> Self {
        self.quota = quota;
        self
    }

    pub fn timezone(&self) -> &Tz {
        &self.tz
    }

    pub fn get_professional(&self, id: &Ulid) -> Option<SharedProfessionalState> {
        self.store.get_professional(id)
    }

    // ── Snapshot setup ───────────────────────────────────────

    pub fn upsert_service(&self, service: Service) -> Result<(), EngineError> {
        if service.name.len() > MAX_NAME_LEN {
            return Err(EngineError::validation("service name too long"));
        }
        if service.duration_min == 0 || service.duration_min > MAX_SERVICE_DURATION_MIN {
            return Err(EngineError::validation(format!(
                "service duration must be between 1 and {MAX_SERVICE_DURATION_MIN} minutes"
            )));
        }
        if service.buffer_before_min > MAX_SERVICE_BUFFER_MIN || service.buffer_after_min > MAX_SERVICE_BUFFER_MIN {
            return Err(EngineError::validation(format!(
                "service buffers must be at most {MAX_SERVICE_BUFFER_MIN} minutes"
            )));
        }
        self.store.insert_service(service);
        Ok(())
    }

    /// Register a professional, or replace the profile of a known one
    /// keeping their hours, blocks and appointments.
    pub async fn upsert_professional(&self, profile: Professional) -> Result<(), EngineError> {
        if profile.name.len() > MAX_NAME_LEN {
            return Err(EngineError::validation("professional name too long"));
        }
        if let Some(existing) = self.store.get_professional(&profile.id) {
            existing.write().await.profile = profile;
            return Ok(());
        }
        let id = profile.id;
        self.store
            .insert_professional(id, Arc::new(RwLock::new(ProfessionalState::new(profile))));
        Ok(())
    }

    /// Replace the shifts of one day. `professional_id = None` targets the
    /// organization's business hours.
    pub async fn set_working_hours(
        &self,
        professional_id: Option<Ulid>,
        day: HoursDay,
        ranges: &[TimeRange],
    ) -> Result<(), EngineError> {
        match professional_id {
            None => self.org_hours.write().await.replace(day, ranges),
            Some(pid) => {
                let ps = self.store.get_professional(&pid).ok_or(EngineError::NotFound(pid))?;
                let mut guard = ps.write().await;
                guard.hours.replace(day, ranges)
            }
        }
    }

    /// Drop a date exception so the weekly rule applies again.
    pub async fn clear_hours_exception(
        &self,
        professional_id: Option<Ulid>,
        date: chrono::NaiveDate,
    ) -> Result<bool, EngineError> {
        match professional_id {
            None => Ok(self.org_hours.write().await.remove_exception(&date)),
            Some(pid) => {
                let ps = self.store.get_professional(&pid).ok_or(EngineError::NotFound(pid))?;
                let mut guard = ps.write().await;
                Ok(guard.hours.remove_exception(&date))
            }
        }
    }

    async fn add_working_hours(&self, rule: &WorkingHoursRule) -> Result<(), EngineError> {
        match rule.professional_id {
            None => self.org_hours.write().await.add(rule.day, &rule.ranges),
            Some(pid) => {
                let ps = self.store.get_professional(&pid).ok_or(EngineError::NotFound(pid))?;
                let mut guard = ps.write().await;
                guard.hours.add(rule.day, &rule.ranges)
            }
        }
    }

    pub async fn add_block(&self, block: Block) -> Result<(), EngineError> {
        validate_block(&block)?;
        match block.scope {
            BlockScope::Organization => {
                self.org_blocks.write().await.insert(block.clone());
                tracing::info!(
                    "organization {} block {} added for tenant {}",
                    block.kind.as_str(),
                    block.id,
                    self.tenant
                );
                let event = Event::BlockAdded { block };
                for (pid, _) in self.store.professionals() {
                    self.notify.send(pid, &event);
                }
                Ok(())
            }
            BlockScope::Professional(pid) => {
                let ps = self.store.get_professional(&pid).ok_or(EngineError::NotFound(pid))?;
                let mut guard = ps.write().await;
                self.apply_and_publish(&mut guard, &Event::BlockAdded { block });
                Ok(())
            }
        }
    }

    pub async fn remove_block(&self, id: Ulid, scope: BlockScope) -> Result<(), EngineError> {
        match scope {
            BlockScope::Organization => {
                self.org_blocks
                    .write()
                    .await
                    .remove(id)
                    .ok_or(EngineError::NotFound(id))?;
                let event = Event::BlockRemoved { id, scope };
                for (pid, _) in self.store.professionals() {
                    self.notify.send(pid, &event);
                }
                Ok(())
            }
            BlockScope::Professional(pid) => {
                let ps = self.store.get_professional(&pid).ok_or(EngineError::NotFound(pid))?;
                let mut guard = ps.write().await;
                if !guard.blocks.iter().any(|b| b.id == id) {
                    return Err(EngineError::NotFound(id));
                }
                self.apply_and_publish(&mut guard, &Event::BlockRemoved { id, scope });
                Ok(())
            }
        }
    }

    /// Load plain records. Existing appointments are taken as they are;
    /// only the shape of hours and blocks is validated.
    pub async fn load(&self, snapshot: Snapshot) -> Result<(), EngineError> {
        for service in snapshot.services {
            self.upsert_service(service)?;
        }
        for profile in snapshot.professionals {
            self.upsert_professional(profile).await?;
        }
        for rule in &snapshot.hours {
            self.add_working_hours(rule).await?;
        }
        for block in snapshot.blocks {
            validate_block(&block)?;
            match block.scope {
                BlockScope::Organization => self.org_blocks.write().await.insert(block),
                BlockScope::Professional(pid) => {
                    let ps = self.store.get_professional(&pid).ok_or(EngineError::NotFound(pid))?;
                    ps.write().await.blocks.insert(block);
                }
            }
        }
        for appointment in snapshot.appointments {
            let pid = appointment.professional_id;
            let ps = self.store.get_professional(&pid).ok_or(EngineError::NotFound(pid))?;
            let mut guard = ps.write().await;
            if guard.appointments.len() >= MAX_APPOINTMENTS_PER_PROFESSIONAL {
                return Err(EngineError::validation("too many appointments for one professional"));
            }
            self.store.map_appointment(appointment.id, pid);
            guard.insert_appointment(appointment);
        }
        for series in snapshot.series {
            self.store.insert_series(series);
        }
        tracing::info!(
            "tenant {} loaded: {} professionals",
            self.tenant,
            self.store.professional_count()
        );
        Ok(())
    }

    // ── Internals shared by queries and mutations ────────────

    /// Apply + notify in one call. Persistence collaborators listen on the hub.
    pub(super) fn apply_and_publish(&self, ps: &mut ProfessionalState, event: &Event) {
        self.store.apply_event(ps, event);
        self.notify.send(ps.id(), event);
    }

    /// Lookup appointment → professional, acquire that professional's write lock.
    pub(super) async fn resolve_appointment_write(
        &self,
        appointment_id: &Ulid,
    ) -> Result<(Ulid, OwnedRwLockWriteGuard<ProfessionalState>), EngineError> {
        loop {
            let pid = self
                .store
                .professional_for_appointment(appointment_id)
                .ok_or(EngineError::NotFound(*appointment_id))?;
            let ps = self
                .store
                .get_professional(&pid)
                .ok_or(EngineError::NotFound(pid))?;
            let guard = ps.write_owned().await;
            // A move away from this professional needs this lock, so once
            // the appointment is seen here it stays here.
            if guard.appointment(appointment_id).is_some() {
                return Ok((pid, guard));
            }
            if self.store.professional_for_appointment(appointment_id) == Some(pid) {
                return Err(EngineError::NotFound(*appointment_id));
            }
        }
    }

    pub(super) async fn ensure_quota(&self, requested: usize) -> Result<(), EngineError> {
        if let Some(remaining) = self.quota.remaining_appointments(&self.tenant).await
            && (remaining as usize) < requested {
                return Err(EngineError::CapacityExceeded {
                    remaining,
                    requested: requested as u32,
                });
            }
        Ok(())
    }

    /// Occupied length of the given services booked back-to-back, in ms.
    pub(super) fn occupied_length(
        &self,
        services: &[Ulid],
        duration_override_min: Option<u32>,
    ) -> Result<Ms, EngineError> {
        if services.is_empty() {
            return Err(EngineError::validation("at least one service is required"));
        }
        if services.len() > MAX_SERVICES_PER_BOOKING {
            return Err(EngineError::validation(format!(
                "at most {MAX_SERVICES_PER_BOOKING} services per booking"
            )));
        }
        if let Some(d) = duration_override_min
            && !(MIN_DURATION_OVERRIDE_MIN..=MAX_DURATION_OVERRIDE_MIN).contains(&d) {
                return Err(EngineError::validation(format!(
                    "duration must be between {MIN_DURATION_OVERRIDE_MIN} and {MAX_DURATION_OVERRIDE_MIN} minutes"
                )));
            }
        let mut working: Ms = 0;
        let mut occupied: Ms = 0;
        for id in services {
            let s = self.store.get_service(id).ok_or(EngineError::NotFound(*id))?;
            working += s.duration_min as Ms;
            occupied += s.occupied_min() as Ms;
        }
        // An override replaces the working time only; buffers stay.
        let minutes = match duration_override_min {
            Some(d) => occupied - working + d as Ms,
            None => occupied,
        };
        Ok(minutes * MINUTE_MS)
    }

    /// Professionals able to perform every service, sorted by
    /// `(display_order, id)`; or just the named one after checking it.
    pub(super) async fn eligible(
        &self,
        services: &[Ulid],
        professional: Option<Ulid>,
    ) -> Result<Vec<SharedProfessionalState>, EngineError> {
        if let Some(pid) = professional {
            let ps = self.store.get_professional(&pid).ok_or(EngineError::NotFound(pid))?;
            if !ps.read().await.profile.performs_all(services) {
                return Err(EngineError::validation(format!(
                    "professional {pid} does not perform every requested service"
                )));
            }
            return Ok(vec![ps]);
        }
        let mut pool = Vec::new();
        for (id, ps) in self.store.professionals() {
            let order = {
                let guard = ps.read().await;
                if !guard.profile.performs_all(services) {
                    continue;
                }
                guard.profile.display_order
            };
            pool.push((order, id, ps));
        }
        pool.sort_by_key(|(order, id, _)| (*order, *id));
        Ok(pool.into_iter().map(|(_, _, ps)| ps).collect())
    }

    /// Ids of the automatic-assignment pool for a set of services: members of
    /// the first service's rotation who can perform all of them.
    pub(super) async fn rotation_pool(&self, services: &[Ulid]) -> Vec<Ulid> {
        let Some(first) = services.first() else {
            return Vec::new();
        };
        let mut pool = Vec::new();
        for (id, ps) in self.store.professionals() {
            let guard = ps.read().await;
            if guard.profile.rotates_for(first) && guard.profile.performs_all(services) {
                pool.push(id);
            }
        }
        pool
    }
}
