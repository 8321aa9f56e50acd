use chrono_tz::Tz;

use crate::engine::GridStep;
use crate::limits::MAX_TENANTS;

/// Process-wide defaults, read once at startup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineConfig {
    /// Timezone of tenants that do not declare their own.
    pub timezone: Tz,
    /// Grid used when a query does not name one.
    pub grid: GridStep,
    pub max_tenants: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            timezone: Tz::UTC,
            grid: GridStep::default(),
            max_tenants: MAX_TENANTS,
        }
    }
}

impl EngineConfig {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Unparseable values fall back to the default with a warning.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let defaults = Self::default();

        let timezone = match lookup("AGENDA_TIMEZONE") {
            None => defaults.timezone,
            Some(s) => s.parse().unwrap_or_else(|_| {
                tracing::warn!("AGENDA_TIMEZONE={s} is not an IANA timezone, using UTC");
                defaults.timezone
            }),
        };
        let grid = match lookup("AGENDA_GRID_MINUTES") {
            None => defaults.grid,
            Some(s) => s.parse().ok().and_then(GridStep::from_minutes).unwrap_or_else(|| {
                tracing::warn!("AGENDA_GRID_MINUTES={s} is not 15, 30 or 60, using 30");
                defaults.grid
            }),
        };
        let max_tenants = lookup("AGENDA_MAX_TENANTS")
            .and_then(|s| s.parse().ok())
            .unwrap_or(defaults.max_tenants);

        Self {
            timezone,
            grid,
            max_tenants,
        }
    }
}
