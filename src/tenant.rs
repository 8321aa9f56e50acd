use std::sync::Arc;

use chrono_tz::Tz;
use dashmap::DashMap;

use crate::config::EngineConfig;
use crate::engine::{Engine, EngineError, InMemoryPointerStore, PlanQuota, PointerStore, Unlimited};
use crate::limits::*;
use crate::notify::NotifyHub;

/// Manages per-tenant engines. Every engine shares the rotation pointer
/// store and the plan quota; pointer keys carry the tenant.
pub struct TenantManager {
    engines: DashMap<String, Arc<Engine>>,
    config: EngineConfig,
    pointers: Arc<dyn PointerStore>,
    quota: Arc<dyn PlanQuota>,
}

impl TenantManager {
    pub fn new(config: EngineConfig) -> Self {
        Self {
            engines: DashMap::new(),
            config,
            pointers: Arc::new(InMemoryPointerStore::new()),
            quota: Arc::new(Unlimited),
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

    pub fn get(&self, tenant: &str) -> Option<Arc<Engine>> {
        self.engines.get(tenant).map(|e| e.value().clone())
    }

    /// Get or lazily create an engine in the configured default timezone.
    pub fn get_or_create(&self, tenant: &str) -> Result<Arc<Engine>, EngineError> {
        self.get_or_create_in(tenant, self.config.timezone)
    }

    /// Get or lazily create an engine. `tz` only applies on creation.
    pub fn get_or_create_in(&self, tenant: &str, tz: Tz) -> Result<Arc<Engine>, EngineError> {
        if let Some(engine) = self.engines.get(tenant) {
            return Ok(engine.value().clone());
        }
        if tenant.len() > MAX_TENANT_NAME_LEN {
            return Err(EngineError::validation("tenant name too long"));
        }
        if tenant.trim().is_empty() {
            return Err(EngineError::validation("empty tenant name"));
        }
        if self.engines.len() >= self.config.max_tenants {
            return Err(EngineError::validation("too many tenants"));
        }

        let engine = self
            .engines
            .entry(tenant.to_string())
            .or_insert_with(|| {
                tracing::info!("loading tenant {tenant} ({tz})");
                Arc::new(
                    Engine::new(tenant, tz, Arc::new(NotifyHub::new()))
                        .with_pointer_store(self.pointers.clone())
                        .with_quota(self.quota.clone()),
                )
            })
            .clone();
        metrics::gauge!(crate::observability::TENANTS_ACTIVE).set(self.engines.len() as f64);
        Ok(engine)
    }

    pub fn unload(&self, tenant: &str) -> bool {
        let removed = self.engines.remove(tenant).is_some();
        if removed {
            metrics::gauge!(crate::observability::TENANTS_ACTIVE).set(self.engines.len() as f64);
        }
        removed
    }
}
