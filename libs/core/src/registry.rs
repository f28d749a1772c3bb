use std::sync::Arc;

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use futures::future::join_all;
use tracing::{debug, info, warn};

use crate::error::SessionError;
use crate::session::{SessionDeps, TenantSession};
use crate::types::{ConnectionState, SessionStatus, TenantId};

/// The set of tenants that exist right now, one session each.
pub struct TenantRegistry {
    sessions: DashMap<TenantId, Arc<TenantSession>>,
    deps: SessionDeps,
}

impl TenantRegistry {
    pub fn new(deps: SessionDeps) -> Self {
        Self {
            sessions: DashMap::new(),
            deps,
        }
    }

    pub fn deps(&self) -> &SessionDeps {
        &self.deps
    }

    /// Returns the tenant's session, creating an idle one if absent.
    ///
    /// Creation holds the map entry, so concurrent callers for one id share a session.
    pub fn get_or_create(&self, tenant: &TenantId) -> Arc<TenantSession> {
        self.sessions
            .entry(tenant.clone())
            .or_insert_with(|| {
                debug!(tenant = %tenant, "creating session");
                TenantSession::new(tenant.clone(), self.deps.clone())
            })
            .clone()
    }

    pub fn create(&self, tenant: &TenantId) -> Result<Arc<TenantSession>, SessionError> {
        match self.sessions.entry(tenant.clone()) {
            Entry::Occupied(_) => Err(SessionError::AlreadyExists(tenant.to_string())),
            Entry::Vacant(slot) => {
                info!(tenant = %tenant, "session created");
                let session = TenantSession::new(tenant.clone(), self.deps.clone());
                slot.insert(session.clone());
                Ok(session)
            }
        }
    }

    pub fn get(&self, tenant: &TenantId) -> Option<Arc<TenantSession>> {
        self.sessions.get(tenant).map(|entry| entry.value().clone())
    }

    /// Destroys the tenant's session and then removes it. Returns `false` if it was absent.
    ///
    /// The entry stays in the map until teardown has deleted the credentials, so callers
    /// racing the delete get the retired session (and `Retired` errors) rather than a fresh
    /// one that could load or persist credentials the teardown is about to remove.
    pub async fn delete(&self, tenant: &TenantId) -> bool {
        let Some(session) = self.get(tenant) else {
            debug!(tenant = %tenant, "delete requested for unknown tenant");
            return false;
        };
        if let Err(err) = session.destroy().await {
            warn!(tenant = %tenant, error = %err, "session teardown reported an error");
        }
        self.sessions
            .remove_if(tenant, |_, current| Arc::ptr_eq(current, &session));
        info!(tenant = %tenant, "tenant deleted");
        true
    }

    /// Lazily yields a status per tenant, computed as the map is walked.
    ///
    /// Entries are read under shard locks; do not mutate the registry while iterating.
    pub fn list(&self) -> impl Iterator<Item = SessionStatus> + '_ {
        self.sessions.iter().map(|entry| entry.value().status())
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    pub fn connected_count(&self) -> usize {
        self.list()
            .filter(|status| status.state == ConnectionState::Connected)
            .count()
    }

    /// Destroys every session and empties the map.
    pub async fn clear(&self) -> usize {
        let tenants: Vec<TenantId> = self.sessions.iter().map(|e| e.key().clone()).collect();
        let removed = join_all(tenants.iter().map(|tenant| self.delete(tenant))).await;
        let cleared = removed.into_iter().filter(|deleted| *deleted).count();
        info!(cleared, "registry cleared");
        cleared
    }

    /// Registers and connects every tenant with persisted credentials.
    pub async fn restore(&self) -> Result<usize, SessionError> {
        let stored = self.deps.store.tenants().await?;
        let mut restored = 0;
        for raw in stored {
            let tenant = match TenantId::parse(raw) {
                Ok(tenant) => tenant,
                Err(err) => {
                    warn!(error = %err, "skipping stored tenant with unusable id");
                    continue;
                }
            };
            let session = self.get_or_create(&tenant);
            match session.connect().await {
                Ok(_) => restored += 1,
                Err(err) => warn!(tenant = %tenant, error = %err, "failed to restore session"),
            }
        }
        info!(restored, "sessions restored from credential store");
        Ok(restored)
    }

    /// Disconnects every session, keeping tenants and their credentials.
    pub async fn shutdown(&self) {
        let sessions: Vec<Arc<TenantSession>> =
            self.sessions.iter().map(|e| e.value().clone()).collect();
        join_all(sessions.iter().map(|session| session.disconnect())).await;
        info!(sessions = sessions.len(), "all sessions disconnected");
    }
}
