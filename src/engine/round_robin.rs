use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;
use tokio::sync::{Mutex, OwnedMutexGuard};
use ulid::Ulid;

/// Identifies one rotation: a tenant and the (first) requested service.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PointerKey {
    pub tenant: String,
    pub service_id: Ulid,
}

impl PointerKey {
    pub fn new(tenant: impl Into<String>, service_id: Ulid) -> Self {
        Self {
            tenant: tenant.into(),
            service_id,
        }
    }
}

/// Where the last-assigned professional of each rotation lives.
///
/// Implementations backed by a database must make `record` durable; callers
/// serialize access per key through [`RotationLocks`].
#[async_trait]
pub trait PointerStore: Send + Sync {
    async fn last_assigned(&self, key: &PointerKey) -> Option<Ulid>;
    async fn record(&self, key: &PointerKey, professional_id: Ulid);
}

#[derive(Default)]
pub struct InMemoryPointerStore {
    pointers: DashMap<PointerKey, Ulid>,
}

impl InMemoryPointerStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl PointerStore for InMemoryPointerStore {
    async fn last_assigned(&self, key: &PointerKey) -> Option<Ulid> {
        self.pointers.get(key).map(|e| *e.value())
    }

    async fn record(&self, key: &PointerKey, professional_id: Ulid) {
        self.pointers.insert(key.clone(), professional_id);
    }
}

/// One async mutex per rotation key: the single writer of that pointer.
#[derive(Default)]
pub struct RotationLocks {
    locks: DashMap<PointerKey, Arc<Mutex<()>>>,
}

impl RotationLocks {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn lock(&self, key: &PointerKey) -> OwnedMutexGuard<()> {
        let mutex = self
            .locks
            .entry(key.clone())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone();
        mutex.lock_owned().await
    }
}

/// The pool in the order it should be tried: sorted by id, starting with
/// the first professional after `last` and wrapping around.
///
/// `last` need not be in the pool (the professional may have left it); the
/// rotation still resumes right after where it would sort.
pub fn rotation_order(pool: &[Ulid], last: Option<Ulid>) -> Vec<Ulid> {
    let mut sorted = pool.to_vec();
    sorted.sort();
    sorted.dedup();
    let start = match last {
        Some(last) => sorted.partition_point(|id| *id <= last),
        None => 0,
    };
    let len = sorted.len();
    sorted.rotate_left(start.min(len));
    sorted
}

/// Next available professional after `last`, trying each at most once.
pub fn pick(pool: &[Ulid], last: Option<Ulid>, mut is_available: impl FnMut(Ulid) -> bool) -> Option<Ulid> {
    rotation_order(pool, last)
        .into_iter()
        .find(|id| is_available(*id))
}
