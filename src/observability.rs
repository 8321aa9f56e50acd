use crate::engine::EngineError;

// ── RED metrics (request-driven) ────────────────────────────────

/// Counter: slot queries answered.
pub const SLOT_QUERIES_TOTAL: &str = "agenda_slot_queries_total";

/// Histogram: slot query latency in seconds.
pub const SLOT_QUERY_DURATION_SECONDS: &str = "agenda_slot_query_duration_seconds";

/// Counter: single booking attempts. Labels: outcome.
pub const BOOKINGS_TOTAL: &str = "agenda_bookings_total";

/// Counter: series booking attempts. Labels: outcome.
pub const SERIES_TOTAL: &str = "agenda_series_total";

/// Counter: professionals passed over by automatic assignment.
pub const ROUND_ROBIN_SKIPS_TOTAL: &str = "agenda_round_robin_skips_total";

// ── USE metrics (resource utilization) ──────────────────────────

/// Gauge: number of active tenants (loaded engines).
pub const TENANTS_ACTIVE: &str = "agenda_tenants_active";

/// Map a mutation result to a short label for metrics.
pub fn outcome_label<T>(result: &Result<T, EngineError>) -> &'static str {
    match result {
        Ok(_) => "ok",
        Err(e) => e.code(),
    }
}
