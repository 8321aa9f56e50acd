use crate::model::Ms;

// ── Request surface ──────────────────────────────────────────────

/// Longest span of days a single availability query may cover.
pub const MAX_RANGE_DAYS: u32 = 90;

/// Most services that can be booked back-to-back in one appointment.
pub const MAX_SERVICES_PER_BOOKING: usize = 10;

/// Bounds for an explicit duration override, in minutes.
pub const MIN_DURATION_OVERRIDE_MIN: u32 = 10;
pub const MAX_DURATION_OVERRIDE_MIN: u32 = 480;

/// Longest single service and longest buffer on either side, in minutes.
pub const MAX_SERVICE_DURATION_MIN: u32 = 1440;
pub const MAX_SERVICE_BUFFER_MIN: u32 = 240;

/// Accepted slot grid steps, in minutes.
pub const GRID_STEPS_MIN: [u32; 3] = [15, 30, 60];

// ── Recurrence ───────────────────────────────────────────────────

/// Upper bound on occurrences a single series may expand to.
pub const MAX_SERIES_OCCURRENCES: usize = 104;

/// Series may not reach further than this many days past the anchor.
pub const MAX_SERIES_HORIZON_DAYS: i64 = 731;

/// Largest accepted repeat multiplier.
pub const MAX_RECURRENCE_INTERVAL: u32 = 12;

// ── Snapshot ─────────────────────────────────────────────────────

pub const MAX_APPOINTMENTS_PER_PROFESSIONAL: usize = 100_000;
pub const MAX_NAME_LEN: usize = 256;
pub const MAX_LABEL_LEN: usize = 1024;
pub const MAX_TENANT_NAME_LEN: usize = 256;

/// Blocks may span many days, but not years.
pub const MAX_BLOCK_DURATION_MS: Ms = 400 * 86_400_000;

/// 1970-01-01 .. 2100-01-01
pub const MIN_VALID_TIMESTAMP_MS: Ms = 0;
pub const MAX_VALID_TIMESTAMP_MS: Ms = 4_102_444_800_000;

/// Default ceiling on loaded tenants; `AGENDA_MAX_TENANTS` overrides it.
pub const MAX_TENANTS: usize = 1024;
