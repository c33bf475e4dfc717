//! The service registry — source of truth for what is running.
//!
//! One lock guards the name → `RunningService` map. The registry never
//! calls into the backend, and callers hold the lock only across
//! pointer-level operations, never across I/O.

use std::collections::HashMap;

use tokio::sync::{RwLock, RwLockWriteGuard};
use tokio_util::sync::CancellationToken;

use spawnpoint_core::ServiceConfiguration;

use crate::ledger::Reservation;

/// A live service record.
///
/// Exclusively owned by the registry; other components work on clones
/// resolved by name. `token` owns the service's log-pipeline and stats
/// tasks and is cancelled when the record is removed.
#[derive(Debug, Clone)]
pub struct RunningService {
    pub name: String,
    pub container_id: String,
    pub reservation: Reservation,
    pub auto_restart: bool,
    pub config: ServiceConfiguration,
    pub token: CancellationToken,
}

/// Name → live-service map, guarded by one lock.
#[derive(Default)]
pub struct ServiceRegistry {
    inner: RwLock<HashMap<String, RunningService>>,
}

impl ServiceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn get(&self, name: &str) -> Option<RunningService> {
        self.inner.read().await.get(name).cloned()
    }

    pub async fn find_by_container(&self, container_id: &str) -> Option<RunningService> {
        self.inner
            .read()
            .await
            .values()
            .find(|svc| svc.container_id == container_id)
            .cloned()
    }

    pub async fn snapshot(&self) -> Vec<RunningService> {
        self.inner.read().await.values().cloned().collect()
    }

    pub async fn len(&self) -> usize {
        self.inner.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.inner.read().await.is_empty()
    }

    /// Flip a service's auto-restart flag in place. Returns false when the
    /// name is unknown.
    pub async fn set_auto_restart(&self, name: &str, enabled: bool) -> bool {
        match self.inner.write().await.get_mut(name) {
            Some(svc) => {
                svc.auto_restart = enabled;
                true
            }
            None => false,
        }
    }

    /// Insert a record, cancelling the tasks of any record it displaces.
    pub async fn insert(&self, svc: RunningService) {
        if let Some(old) = self.inner.write().await.insert(svc.name.clone(), svc) {
            old.token.cancel();
        }
    }

    /// Remove a record and cancel its tasks.
    pub async fn remove(&self, name: &str) -> Option<RunningService> {
        let removed = self.inner.write().await.remove(name);
        if let Some(svc) = &removed {
            svc.token.cancel();
        }
        removed
    }

    /// Write access to the underlying map, for compound critical sections
    /// that must pair a registry mutation with a ledger mutation.
    pub(crate) async fn guard(&self) -> RwLockWriteGuard<'_, HashMap<String, RunningService>> {
        self.inner.write().await
    }
}
