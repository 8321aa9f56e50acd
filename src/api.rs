//! Wire shapes of the public booking surface and their conversion to
//! engine requests. Field names follow the product's Spanish API.

use chrono::NaiveDate;
use chrono_tz::Tz;
use serde::{Deserialize, Serialize};
use ulid::Ulid;

use crate::calendar;
use crate::engine::{ConflictWith, DateConflict, EngineError, GridStep, SlotRequest, validate_pattern};
use crate::limits::*;
use crate::model::*;

/// Who is asking. Public (anonymous website) callers must name the
/// organization and never see why a slot is taken.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Caller {
    Authenticated { tenant: String },
    Public,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct AvailabilityQuery {
    pub organizacion_id: Option<String>,
    pub fecha: String,
    pub servicio_id: Option<Ulid>,
    pub servicios_ids: Option<Vec<Ulid>>,
    pub profesional_id: Option<Ulid>,
    pub hora: Option<String>,
    pub duracion: Option<u32>,
    pub rango_dias: Option<u32>,
    pub intervalo_minutos: Option<u32>,
    pub solo_disponibles: Option<bool>,
    pub excluir_cita_id: Option<Ulid>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedQuery {
    pub tenant: String,
    pub request: SlotRequest,
}

impl AvailabilityQuery {
    /// Resolve the tenant and build a typed request. `today` resolves the
    /// date aliases; a query for `today` never returns slots before `now`.
    pub fn into_request(self, caller: &Caller, today: NaiveDate, now: Ms) -> Result<ResolvedQuery, EngineError> {
        let tenant = match caller {
            Caller::Authenticated { tenant } => tenant.clone(),
            Caller::Public => self
                .organizacion_id
                .clone()
                .filter(|s| !s.trim().is_empty())
                .ok_or_else(|| EngineError::validation("organizacion_id is required"))?,
        };

        let services = match (self.servicio_id, self.servicios_ids) {
            (Some(_), Some(_)) => {
                return Err(EngineError::validation(
                    "send either servicio_id or servicios_ids, not both",
                ));
            }
            (Some(one), None) => vec![one],
            (None, Some(many)) => many,
            (None, None) => return Err(EngineError::validation("servicio_id is required")),
        };
        if services.is_empty() || services.len() > MAX_SERVICES_PER_BOOKING {
            return Err(EngineError::validation(format!(
                "servicios_ids must list between 1 and {MAX_SERVICES_PER_BOOKING} services"
            )));
        }

        let first_day = calendar::parse_date_alias(&self.fecha, today)
            .ok_or_else(|| EngineError::validation(format!("fecha: not a date: {}", self.fecha)))?;

        let requested_time = match self.hora.as_deref() {
            None => None,
            Some(h) => Some(
                calendar::parse_hhmm(h)
                    .ok_or_else(|| EngineError::validation(format!("hora: expected HH:MM, got {h}")))?,
            ),
        };

        if let Some(d) = self.duracion
            && !(MIN_DURATION_OVERRIDE_MIN..=MAX_DURATION_OVERRIDE_MIN).contains(&d) {
                return Err(EngineError::validation(format!(
                    "duracion must be between {MIN_DURATION_OVERRIDE_MIN} and {MAX_DURATION_OVERRIDE_MIN}"
                )));
            }

        let days = self.rango_dias.unwrap_or(1);
        if days == 0 || days > MAX_RANGE_DAYS {
            return Err(EngineError::validation(format!(
                "rango_dias must be between 1 and {MAX_RANGE_DAYS}"
            )));
        }

        let step = match self.intervalo_minutos {
            None => GridStep::default(),
            Some(m) => GridStep::from_minutes(m).ok_or_else(|| {
                EngineError::validation(format!("intervalo_minutos must be one of {GRID_STEPS_MIN:?}"))
            })?,
        };

        let (only_available, exclude) = match caller {
            Caller::Public => (true, None),
            Caller::Authenticated { .. } => (self.solo_disponibles.unwrap_or(true), self.excluir_cita_id),
        };

        Ok(ResolvedQuery {
            tenant,
            request: SlotRequest {
                services,
                first_day,
                days,
                professional: self.profesional_id,
                requested_time,
                duration_override_min: self.duracion,
                step,
                only_available,
                exclude,
                not_before: (first_day <= today).then_some(now),
            },
        })
    }
}

// ── Recurrence ───────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TerminaEn {
    Cantidad,
    Fecha,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RecurrencePayload {
    pub frecuencia: Frequency,
    #[serde(default)]
    pub dias_semana: Vec<u8>,
    #[serde(default)]
    pub intervalo: Option<u32>,
    pub termina_en: TerminaEn,
    #[serde(default)]
    pub cantidad_citas: Option<u32>,
    #[serde(default)]
    pub fecha_fin: Option<NaiveDate>,
}

impl RecurrencePayload {
    pub fn into_pattern(self) -> Result<RecurrencePattern, EngineError> {
        let termination = match (self.termina_en, self.cantidad_citas, self.fecha_fin) {
            (TerminaEn::Cantidad, Some(n), _) => Termination::Count(n),
            (TerminaEn::Fecha, _, Some(d)) => Termination::UntilDate(d),
            (TerminaEn::Cantidad, None, _) => {
                return Err(EngineError::validation("cantidad_citas is required"));
            }
            (TerminaEn::Fecha, _, None) => return Err(EngineError::validation("fecha_fin is required")),
        };
        let mut weekdays = self.dias_semana;
        weekdays.sort_unstable();
        weekdays.dedup();
        let pattern = RecurrencePattern {
            frequency: self.frecuencia,
            interval: self.intervalo.unwrap_or(1),
            weekdays,
            termination,
        };
        validate_pattern(&pattern)?;
        Ok(pattern)
    }
}

// ── Responses ────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SlotRecord {
    pub profesional_id: Ulid,
    pub fecha: NaiveDate,
    pub inicio: String,
    pub fin: String,
    pub disponible: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub motivo: Option<String>,
}

impl SlotRecord {
    pub fn from_slot(slot: &Slot, tz: &Tz) -> Self {
        Self {
            profesional_id: slot.professional_id,
            fecha: slot.date,
            inicio: calendar::format_hhmm(calendar::local_time(tz, slot.span.start)),
            fin: calendar::format_hhmm(calendar::local_time(tz, slot.span.end)),
            disponible: slot.available,
            motivo: slot.occupancy.map(|o| match o {
                Occupancy::Booked(_) => "ocupado".to_string(),
                Occupancy::Blocked(kind) => kind.as_str().to_string(),
            }),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ConflictEntry {
    pub fecha: NaiveDate,
    pub motivo: String,
}

impl From<&DateConflict> for ConflictEntry {
    fn from(c: &DateConflict) -> Self {
        let motivo = match c.with {
            ConflictWith::Appointment(_) => "ocupado".to_string(),
            ConflictWith::Block { kind, .. } => kind.as_str().to_string(),
            ConflictWith::OutsideWorkingHours => "fuera_de_horario".to_string(),
        };
        Self { fecha: c.date, motivo }
    }
}

/// Error document returned to callers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ErrorBody {
    pub error: &'static str,
    pub mensaje: String,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub conflictos: Vec<ConflictEntry>,
}

impl From<&EngineError> for ErrorBody {
    fn from(e: &EngineError) -> Self {
        let conflictos = match e {
            EngineError::RecurrenceUnsatisfiable { conflicts } => conflicts.iter().map(ConflictEntry::from).collect(),
            _ => Vec::new(),
        };
        Self {
            error: e.code(),
            mensaje: e.to_string(),
            conflictos,
        }
    }
}
