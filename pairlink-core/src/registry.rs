//! Process-wide table of live client handles.
//!
//! The registry is the only state shared across tenants. Every operation
//! takes the same mutex, so `acquire` is the single point that decides
//! whether a tenant may start a new client.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::{mpsc, oneshot};
use tracing::debug;

use crate::{
    client::MessagingClient,
    controller::{Command, StopReason},
    SessionError, SessionResult, TenantId,
};

static HANDLE_ID: AtomicU64 = AtomicU64::new(1);

/// In-memory lifecycle state of a tenant's controller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LifecycleState {
    Idle,
    Initializing,
    Pairing,
    Authenticating,
    Connected,
    Disconnected,
}

impl LifecycleState {
    /// Mid-initialization: a client exists but `ready` has not fired yet.
    pub fn is_initializing(&self) -> bool {
        matches!(self, Self::Initializing | Self::Pairing | Self::Authenticating)
    }
}

/// Outcome of asking a tenant's task to stop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopOutcome {
    Stopped,
    /// No task is attached, or it already exited.
    Unreachable,
    TimedOut,
}

struct HandleInner {
    state: LifecycleState,
    artifact: Option<String>,
    account_id: Option<String>,
    client: Option<Arc<dyn MessagingClient>>,
    commands: Option<mpsc::Sender<Command>>,
    cancelled: bool,
}

/// Runtime objects of one tenant session.
///
/// Written only by the tenant's own task; everyone else reads.
pub struct ClientHandle {
    id: u64,
    tenant_id: TenantId,
    inner: Mutex<HandleInner>,
}

impl ClientHandle {
    fn new(tenant_id: TenantId) -> Self {
        Self {
            id: HANDLE_ID.fetch_add(1, Ordering::Relaxed),
            tenant_id,
            inner: Mutex::new(HandleInner {
                state: LifecycleState::Initializing,
                artifact: None,
                account_id: None,
                client: None,
                commands: None,
                cancelled: false,
            }),
        }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn tenant_id(&self) -> &TenantId {
        &self.tenant_id
    }

    pub fn state(&self) -> LifecycleState {
        self.inner.lock().state
    }

    pub fn initializing(&self) -> bool {
        self.state().is_initializing()
    }

    pub fn is_connected(&self) -> bool {
        self.state() == LifecycleState::Connected
    }

    /// Initializing or live.
    pub fn is_active(&self) -> bool {
        let state = self.state();
        state.is_initializing() || state == LifecycleState::Connected
    }

    /// The cached artifact; only ever present while pairing.
    pub fn pairing_artifact(&self) -> Option<String> {
        let inner = self.inner.lock();
        match inner.state {
            LifecycleState::Pairing => inner.artifact.clone(),
            _ => None,
        }
    }

    pub fn account_id(&self) -> Option<String> {
        self.inner.lock().account_id.clone()
    }

    pub fn client(&self) -> Option<Arc<dyn MessagingClient>> {
        self.inner.lock().client.clone()
    }

    /// Wire the client and the task's command channel. Returns false if the
    /// handle was cancelled while the client was being built.
    pub(crate) fn attach(
        &self,
        client: Arc<dyn MessagingClient>,
        commands: mpsc::Sender<Command>,
    ) -> bool {
        let mut inner = self.inner.lock();
        if inner.cancelled {
            return false;
        }
        inner.client = Some(client);
        inner.commands = Some(commands);
        true
    }

    /// Detach the handle from its task. Later state writes by the task
    /// are ignored.
    pub(crate) fn cancel(&self) {
        let mut inner = self.inner.lock();
        inner.cancelled = true;
        inner.state = LifecycleState::Idle;
        inner.artifact = None;
        inner.account_id = None;
    }

    pub(crate) fn is_cancelled(&self) -> bool {
        self.inner.lock().cancelled
    }

    pub(crate) fn set_state(&self, state: LifecycleState) {
        let mut inner = self.inner.lock();
        if inner.cancelled {
            return;
        }
        inner.state = state;
        if state != LifecycleState::Pairing {
            inner.artifact = None;
        }
        if state != LifecycleState::Connected {
            inner.account_id = None;
        }
    }

    pub(crate) fn set_pairing(&self, artifact: String) {
        let mut inner = self.inner.lock();
        if inner.cancelled {
            return;
        }
        inner.state = LifecycleState::Pairing;
        inner.artifact = Some(artifact);
        inner.account_id = None;
    }

    pub(crate) fn set_connected(&self, account_id: Option<String>) {
        let mut inner = self.inner.lock();
        if inner.cancelled {
            return;
        }
        inner.state = LifecycleState::Connected;
        inner.artifact = None;
        inner.account_id = account_id;
    }

    /// Drop everything the handle references and go idle.
    pub(crate) fn clear(&self) {
        let mut inner = self.inner.lock();
        inner.state = LifecycleState::Idle;
        inner.artifact = None;
        inner.account_id = None;
        inner.client = None;
        inner.commands = None;
    }

    /// Ask the tenant's task to stop and wait up to `wait` for it.
    pub(crate) async fn request_stop(&self, reason: StopReason, wait: Duration) -> StopOutcome {
        self.send_command(|reply| Command::Stop { reason, reply }, wait)
            .await
    }

    pub(crate) async fn request_abort(&self, message: String, wait: Duration) -> StopOutcome {
        self.send_command(|reply| Command::Abort { message, reply }, wait)
            .await
    }

    /// `wait` bounds both queueing and the task's acknowledgement. A
    /// command still queued when the wait runs out is skipped by the task,
    /// since its reply side is gone by then.
    async fn send_command<F>(&self, build: F, wait: Duration) -> StopOutcome
    where
        F: FnOnce(oneshot::Sender<()>) -> Command,
    {
        let commands = self.inner.lock().commands.clone();
        let Some(commands) = commands else {
            return StopOutcome::Unreachable;
        };

        let (reply, done) = oneshot::channel();
        let exchange = async {
            commands
                .send(build(reply))
                .await
                .map_err(|_| StopOutcome::Unreachable)?;
            done.await.map_err(|_| StopOutcome::Unreachable)
        };
        match tokio::time::timeout(wait, exchange).await {
            Ok(Ok(())) => StopOutcome::Stopped,
            Ok(Err(outcome)) => outcome,
            Err(_) => StopOutcome::TimedOut,
        }
    }
}

impl std::fmt::Debug for ClientHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClientHandle")
            .field("id", &self.id)
            .field("tenant_id", &self.tenant_id)
            .field("state", &self.state())
            .finish()
    }
}

#[derive(Default)]
pub struct SessionRegistry {
    handles: Mutex<HashMap<TenantId, Arc<ClientHandle>>>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Claim the tenant's slot.
    ///
    /// Fails with `Conflict` while another handle is initializing or live.
    /// A leftover idle handle is replaced.
    pub fn acquire(&self, tenant: &TenantId) -> SessionResult<Arc<ClientHandle>> {
        let mut handles = self.handles.lock();
        if let Some(existing) = handles.get(tenant) {
            if existing.is_active() {
                return Err(SessionError::conflict(
                    "Client already initializing or active",
                ));
            }
            debug!(tenant_id = %tenant, handle = existing.id(), "replacing idle handle");
        }

        let handle = Arc::new(ClientHandle::new(tenant.clone()));
        handles.insert(tenant.clone(), handle.clone());
        Ok(handle)
    }

    pub fn release(&self, tenant: &TenantId) -> Option<Arc<ClientHandle>> {
        self.handles.lock().remove(tenant)
    }

    /// Release `handle` only if it still owns its tenant's slot.
    pub fn release_handle(&self, handle: &ClientHandle) -> bool {
        let mut handles = self.handles.lock();
        match handles.get(handle.tenant_id()) {
            Some(current) if current.id() == handle.id() => {
                handles.remove(handle.tenant_id());
                true
            }
            _ => false,
        }
    }

    pub fn get(&self, tenant: &TenantId) -> Option<Arc<ClientHandle>> {
        self.handles.lock().get(tenant).cloned()
    }

    pub fn handles(&self) -> Vec<Arc<ClientHandle>> {
        self.handles.lock().values().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.handles.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
