use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::{Mutex, OwnedMutexGuard};

/// Registry of per-cluster mutexes. Admission and CAS hold the mutex for
/// one `domain` across backend reads and writes; they never block on
/// network fan-out while holding it. Lookup of the per-domain lock is
/// itself guarded by a short-lived registry mutex, so creating a new
/// cluster's lock never contends with an unrelated cluster's critical
/// section.
#[derive(Default)]
pub struct ClusterLocks {
    registry: Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl ClusterLocks {
    pub fn new() -> Self {
        Self::default()
    }

    async fn lock_for(&self, domain: &str) -> Arc<Mutex<()>> {
        let mut registry = self.registry.lock().await;
        registry
            .entry(domain.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    pub async fn acquire(&self, domain: &str) -> ClusterGuard {
        let lock = self.lock_for(domain).await;
        let guard = lock.lock_owned().await;
        ClusterGuard { _guard: guard }
    }
}

/// Held for the duration of one admission/CAS call.
pub struct ClusterGuard {
    _guard: OwnedMutexGuard<()>,
}
