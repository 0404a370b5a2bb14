//! Control-plane entry points of the session lifecycle manager.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{debug, info, instrument, warn};

use crate::{
    backend::{MemorySessionStore, MemoryTenantStore},
    client::ClientFactory,
    config::SessionConfig,
    controller::{self, StopReason},
    events::{EventBroadcaster, Subscription},
    registry::{SessionRegistry, StopOutcome},
    store::{SessionBlob, SessionStore, TenantStore},
    ConnectionState, OwnerId, SessionError, SessionResult, TenantId, TenantRecord,
};

/// Everything a tenant task needs, shared by all of them.
pub(crate) struct SessionContext {
    pub(crate) registry: SessionRegistry,
    pub(crate) sessions: Arc<dyn SessionStore>,
    pub(crate) tenants: Arc<dyn TenantStore>,
    pub(crate) events: EventBroadcaster,
    pub(crate) factory: Arc<dyn ClientFactory>,
    pub(crate) config: SessionConfig,
}

// Store writes are a best-effort mirror of the in-memory state: failures
// are logged and never roll a transition back.
impl SessionContext {
    pub(crate) async fn persist_connection(
        &self,
        tenant: &TenantId,
        state: ConnectionState,
        account_id: Option<String>,
    ) {
        if let Err(err) = self
            .tenants
            .update_connection(tenant, state, account_id)
            .await
        {
            warn!(tenant_id = %tenant, state = state.as_str(), error = %err, "failed to persist connection state");
        }
    }

    pub(crate) async fn save_session(&self, tenant: &TenantId, blob: SessionBlob) {
        match self.sessions.save(tenant, blob).await {
            Ok(()) => debug!(tenant_id = %tenant, "session saved"),
            Err(err) => warn!(tenant_id = %tenant, error = %err, "failed to save session"),
        }
    }

    pub(crate) async fn delete_session(&self, tenant: &TenantId) {
        if let Err(err) = self.sessions.delete(tenant).await {
            warn!(tenant_id = %tenant, error = %err, "failed to delete session");
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AckStatus {
    Started,
    Ok,
}

/// `{"status": "started" | "ok"}`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Ack {
    pub status: AckStatus,
}

impl Ack {
    pub fn started() -> Self {
        Self {
            status: AckStatus::Started,
        }
    }

    pub fn ok() -> Self {
        Self {
            status: AckStatus::Ok,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionStatus {
    /// From the live handle, never from the store.
    pub connected: bool,
    pub has_session: bool,
}

pub struct SessionManagerBuilder {
    factory: Arc<dyn ClientFactory>,
    sessions: Option<Arc<dyn SessionStore>>,
    tenants: Option<Arc<dyn TenantStore>>,
    config: SessionConfig,
}

impl SessionManagerBuilder {
    pub fn session_store(mut self, store: Arc<dyn SessionStore>) -> Self {
        self.sessions = Some(store);
        self
    }

    pub fn tenant_store(mut self, store: Arc<dyn TenantStore>) -> Self {
        self.tenants = Some(store);
        self
    }

    pub fn config(mut self, config: SessionConfig) -> Self {
        self.config = config;
        self
    }

    /// Missing stores default to in-memory ones.
    pub fn build(self) -> SessionManager {
        let sessions = self
            .sessions
            .unwrap_or_else(|| Arc::new(MemorySessionStore::new()));
        let tenants = self
            .tenants
            .unwrap_or_else(|| Arc::new(MemoryTenantStore::new()));

        SessionManager {
            ctx: Arc::new(SessionContext {
                registry: SessionRegistry::new(),
                sessions,
                tenants,
                events: EventBroadcaster::new(self.config.event_channel_capacity),
                factory: self.factory,
                config: self.config,
            }),
        }
    }
}

/// Creates, tracks, restores and tears down per-tenant client sessions.
///
/// Cheap to clone; clones share all state.
#[derive(Clone)]
pub struct SessionManager {
    ctx: Arc<SessionContext>,
}

impl SessionManager {
    pub fn builder(factory: Arc<dyn ClientFactory>) -> SessionManagerBuilder {
        SessionManagerBuilder {
            factory,
            sessions: None,
            tenants: None,
            config: SessionConfig::default(),
        }
    }

    pub fn config(&self) -> &SessionConfig {
        &self.ctx.config
    }

    pub fn registry(&self) -> &SessionRegistry {
        &self.ctx.registry
    }

    /// Unchecked access to the broadcaster. Observers coming from outside
    /// should go through [`SessionManager::subscribe`].
    pub fn events(&self) -> &EventBroadcaster {
        &self.ctx.events
    }

    /// The tenant record, if `owner` owns it. Unowned tenants look missing.
    pub async fn authorize(&self, tenant: &TenantId, owner: &OwnerId) -> SessionResult<TenantRecord> {
        match self.ctx.tenants.get(tenant).await? {
            Some(record) if record.is_owned_by(owner) => Ok(record),
            _ => Err(SessionError::not_found(tenant.as_str())),
        }
    }

    /// Start pairing (or restoring) the tenant's client.
    ///
    /// Returns once the client's connect call completed; the rest of the
    /// lifecycle is reported on the tenant's event channel.
    #[instrument(skip(self), fields(tenant_id = %tenant, owner_id = %owner))]
    pub async fn initialize_session(&self, tenant: &TenantId, owner: &OwnerId) -> SessionResult<Ack> {
        let record = self.authorize(tenant, owner).await?;
        self.launch(&record).await?;
        Ok(Ack::started())
    }

    async fn launch(&self, record: &TenantRecord) -> SessionResult<()> {
        let restored = match self.ctx.sessions.load(&record.id).await {
            Ok(restored) => restored,
            Err(err) => {
                warn!(tenant_id = %record.id, error = %err, "could not load stored session, pairing from scratch");
                None
            }
        };

        // nothing may be awaited between acquire and start: start owns
        // the slot from its first line
        let handle = self.ctx.registry.acquire(&record.id)?;
        if record.connection_state != ConnectionState::Disconnected || record.account_id.is_some() {
            // start overwrites these fields right away
            info!(tenant_id = %record.id, state = record.connection_state.as_str(), "resetting stale connection state");
        }
        controller::start(self.ctx.clone(), handle, restored).await
    }

    pub fn get_pairing_artifact(&self, tenant: &TenantId) -> SessionResult<String> {
        self.ctx
            .registry
            .get(tenant)
            .and_then(|handle| handle.pairing_artifact())
            .ok_or(SessionError::NotAvailable)
    }

    pub async fn get_status(&self, tenant: &TenantId) -> SessionStatus {
        let connected = self
            .ctx
            .registry
            .get(tenant)
            .is_some_and(|handle| handle.is_connected());
        let has_session = match self.ctx.sessions.exists(tenant).await {
            Ok(exists) => exists,
            Err(err) => {
                warn!(tenant_id = %tenant, error = %err, "could not check stored session");
                false
            }
        };
        SessionStatus {
            connected,
            has_session,
        }
    }

    /// Log out and tear down the tenant's session. Idempotent.
    #[instrument(skip(self), fields(tenant_id = %tenant, owner_id = %owner))]
    pub async fn disconnect_session(&self, tenant: &TenantId, owner: &OwnerId) -> SessionResult<Ack> {
        let record = self.authorize(tenant, owner).await?;
        let stopped = self.stop(tenant, StopReason::UserRequest).await;

        if !stopped {
            // nothing live; only mirror cleanup left
            self.ctx.delete_session(tenant).await;
            if record.connection_state != ConnectionState::Disconnected || record.account_id.is_some() {
                self.ctx
                    .persist_connection(tenant, ConnectionState::Disconnected, None)
                    .await;
            }
        }
        Ok(Ack::ok())
    }

    /// Stop the tenant's live session, if any. Returns whether a task
    /// acknowledged the stop.
    async fn stop(&self, tenant: &TenantId, reason: StopReason) -> bool {
        let Some(handle) = self.ctx.registry.get(tenant) else {
            return false;
        };

        match handle.request_stop(reason, self.ctx.config.stop_timeout).await {
            StopOutcome::Stopped => true,
            outcome => {
                warn!(tenant_id = %tenant, ?outcome, reason = reason.as_str(), "session task did not stop, forcing cleanup");
                controller::force_release(&self.ctx, &handle, reason.logs_out()).await;
                false
            }
        }
    }

    /// Subscribe to a tenant's lifecycle events after an ownership check.
    pub async fn subscribe(&self, tenant: &TenantId, owner: &OwnerId) -> SessionResult<Subscription> {
        self.authorize(tenant, owner).await?;
        Ok(self.ctx.events.subscribe(tenant))
    }

    /// Relaunch every tenant with a stored session. Stored sessions whose
    /// tenant no longer exists are deleted.
    ///
    /// Returns the number of tenants started.
    #[instrument(skip(self))]
    pub async fn restore_sessions(&self) -> SessionResult<usize> {
        let stored = self.ctx.sessions.list().await?;
        let mut started = 0;

        for tenant in stored {
            let record = match self.ctx.tenants.get(&tenant).await {
                Ok(Some(record)) => record,
                Ok(None) => {
                    info!(tenant_id = %tenant, "removing stored session of a deleted project");
                    self.ctx.delete_session(&tenant).await;
                    continue;
                }
                Err(err) => {
                    warn!(tenant_id = %tenant, error = %err, "could not read project, skipping restore");
                    continue;
                }
            };

            match self.launch(&record).await {
                Ok(()) => started += 1,
                Err(SessionError::Conflict(_)) => {
                    debug!(tenant_id = %tenant, "already running, not restored")
                }
                Err(err) => warn!(tenant_id = %tenant, error = %err, "failed to restore session"),
            }
        }

        info!(started, "stored sessions restored");
        Ok(started)
    }

    /// Destroy every live client without logging out, keeping stored
    /// sessions for the next [`SessionManager::restore_sessions`].
    #[instrument(skip(self))]
    pub async fn shutdown(&self) {
        let handles = self.ctx.registry.handles();
        info!(sessions = handles.len(), "shutting down sessions");
        for handle in handles {
            let tenant = handle.tenant_id().clone();
            if !self.stop(&tenant, StopReason::Shutdown).await {
                self.ctx
                    .persist_connection(&tenant, ConnectionState::Disconnected, None)
                    .await;
            }
        }
    }
}
