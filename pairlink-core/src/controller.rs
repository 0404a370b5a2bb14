//! Per-tenant client lifecycle controller.
//!
//! Each started client gets one task that owns it. The task consumes the
//! client's events and the caller's commands from two queues, one item at
//! a time, so a tenant never handles `disconnected` while `ready` is still
//! in flight. Every terminal path ends in the same cleanup: persisted
//! connection fields reset, handle cleared, registry slot released.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, oneshot};
use tokio::time::{sleep_until, timeout, Instant};
use tracing::{debug, error, info, instrument, warn};

use crate::{
    client::{ClientEvent, ClientEventSink, Inbound, MessagingClient},
    conflict,
    events::LifecycleEvent,
    manager::SessionContext,
    registry::{ClientHandle, LifecycleState, StopOutcome},
    store::SessionBlob,
    ConnectionState, SessionError, SessionResult, TenantId,
};

/// Why a tenant's session is being torn down from the outside.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StopReason {
    /// The owner asked to disconnect.
    UserRequest,
    /// Another tenant connected the same account.
    AccountTakeover,
    /// The process is going down; credentials are kept for restore.
    Shutdown,
}

impl StopReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::UserRequest => "user_request",
            Self::AccountTakeover => "account_takeover",
            Self::Shutdown => "shutdown",
        }
    }

    pub(crate) fn logs_out(&self) -> bool {
        !matches!(self, Self::Shutdown)
    }

    pub(crate) fn keeps_session(&self) -> bool {
        matches!(self, Self::Shutdown)
    }
}

pub(crate) enum Command {
    Stop {
        reason: StopReason,
        reply: oneshot::Sender<()>,
    },
    /// `connect` failed in `start`.
    Abort {
        message: String,
        reply: oneshot::Sender<()>,
    },
}

enum Flow {
    Continue,
    Exit,
}

/// Marks the handle idle and frees its registry slot on any exit path,
/// panics included.
struct ReleaseGuard {
    ctx: Arc<SessionContext>,
    handle: Arc<ClientHandle>,
}

impl Drop for ReleaseGuard {
    fn drop(&mut self) {
        self.handle.clear();
        if self.ctx.registry.release_handle(&self.handle) {
            debug!(tenant_id = %self.handle.tenant_id(), handle = self.handle.id(), "registry slot released");
        }
    }
}

/// Build the client, spawn its task and run `connect`.
///
/// `handle` must come fresh from `SessionRegistry::acquire`. Returns once
/// `connect` returned and every event the client emitted meanwhile has
/// been handled, so an `auth_failure` or `disconnected` raised during
/// `connect` reaches the caller. On error the slot has been released and
/// the persisted state reset by the time this returns.
#[instrument(skip_all, fields(tenant_id = %handle.tenant_id(), restored = restored.is_some()))]
pub(crate) async fn start(
    ctx: Arc<SessionContext>,
    handle: Arc<ClientHandle>,
    restored: Option<SessionBlob>,
) -> SessionResult<()> {
    let tenant = handle.tenant_id().clone();
    let guard = ReleaseGuard {
        ctx: ctx.clone(),
        handle: handle.clone(),
    };

    ctx.persist_connection(&tenant, ConnectionState::Initializing, None)
        .await;

    let (sink, events) = ClientEventSink::channel(tenant.clone());
    let marker = sink.clone();
    let client = match ctx.factory.create(&tenant, restored, sink).await {
        Ok(client) => client,
        Err(err) => {
            let message = format!("{err:#}");
            error!(tenant_id = %tenant, error = %message, "failed to create client");
            fail_initialization(&ctx, &tenant, &message).await;
            drop(guard);
            return Err(SessionError::initialization(message));
        }
    };

    let (commands_tx, commands) = mpsc::channel(4);
    if !handle.attach(client.clone(), commands_tx) {
        let message = "session stopped during startup";
        warn!(tenant_id = %tenant, "session stopped while the client was being created");
        call_client(&ctx, &tenant, "destroy", client.destroy()).await;
        fail_initialization(&ctx, &tenant, message).await;
        drop(guard);
        return Err(SessionError::initialization(message));
    }

    let (startup_tx, mut startup) = oneshot::channel();
    let controller = SessionController {
        ctx: ctx.clone(),
        tenant: tenant.clone(),
        handle: handle.clone(),
        client: client.clone(),
        deadline: Some(Instant::now() + ctx.config.pairing_timeout),
        startup: Some(startup_tx),
        startup_error: None,
        _guard: guard,
    };
    tokio::spawn(controller.run(events, commands));
    info!(tenant_id = %tenant, "client created, connecting");

    let failure = match timeout(ctx.config.pairing_timeout, client.connect()).await {
        Ok(Ok(())) => {
            marker.connect_returned();
            return match startup.await {
                Ok(result) => result,
                Err(_) => Err(SessionError::initialization("session ended during startup")),
            };
        }
        Ok(Err(err)) => SessionError::initialization(format!("{err:#}")),
        Err(_) => SessionError::initialization("client connect timed out"),
    };
    let message = failure.to_string();

    error!(tenant_id = %tenant, error = %message, "client connect failed");
    match handle
        .request_abort(message.clone(), ctx.config.stop_timeout)
        .await
    {
        StopOutcome::Stopped => {}
        StopOutcome::Unreachable => {
            debug!(tenant_id = %tenant, "session task already finished");
        }
        StopOutcome::TimedOut => {
            warn!(tenant_id = %tenant, "abort not acknowledged, forcing cleanup");
            force_release(&ctx, &handle, false).await;
            fail_initialization(&ctx, &tenant, &message).await;
        }
    }

    // a credential rejection handled before the abort is the better answer
    match startup.try_recv() {
        Ok(Err(err @ SessionError::AuthFailure(_))) => Err(err),
        _ => Err(failure),
    }
}

/// Tear a tenant's client down past its task, which is stuck or gone.
///
/// The handle is cancelled first so the task can no longer write state
/// or publish, then the client is destroyed and the slot released.
pub(crate) async fn force_release(ctx: &SessionContext, handle: &ClientHandle, logout: bool) {
    let tenant = handle.tenant_id();
    handle.cancel();
    if let Some(client) = handle.client() {
        if logout {
            call_client(ctx, tenant, "logout", client.logout()).await;
        }
        call_client(ctx, tenant, "destroy", client.destroy()).await;
    }
    handle.clear();
    if ctx.registry.release_handle(handle) {
        debug!(tenant_id = %tenant, handle = handle.id(), "registry slot force-released");
    }
}

async fn fail_initialization(ctx: &SessionContext, tenant: &TenantId, message: &str) {
    ctx.persist_connection(tenant, ConnectionState::Disconnected, None)
        .await;
    ctx.events
        .publish_event(LifecycleEvent::error(tenant, "initialization", message));
}

/// Run one best-effort client call under the configured bound.
async fn call_client<F>(ctx: &SessionContext, tenant: &TenantId, op: &'static str, call: F) -> bool
where
    F: Future<Output = anyhow::Result<()>>,
{
    match timeout(ctx.config.client_call_timeout, call).await {
        Ok(Ok(())) => true,
        Ok(Err(err)) => {
            warn!(tenant_id = %tenant, op, error = %format!("{err:#}"), "client call failed");
            false
        }
        Err(_) => {
            warn!(tenant_id = %tenant, op, "client call timed out");
            false
        }
    }
}

struct SessionController {
    ctx: Arc<SessionContext>,
    tenant: TenantId,
    handle: Arc<ClientHandle>,
    client: Arc<dyn MessagingClient>,
    /// Armed until `ready`.
    deadline: Option<Instant>,
    /// Answers `start` once `connect` returned, or with `startup_error`
    /// if the session ends first.
    startup: Option<oneshot::Sender<SessionResult<()>>>,
    startup_error: Option<SessionError>,
    _guard: ReleaseGuard,
}

impl SessionController {
    async fn run(
        mut self,
        mut events: mpsc::UnboundedReceiver<Inbound>,
        mut commands: mpsc::Receiver<Command>,
    ) {
        let reply = loop {
            let armed = self.deadline.is_some();
            let deadline = self
                .deadline
                .unwrap_or_else(|| Instant::now() + Duration::from_secs(86_400));

            tokio::select! {
                biased;

                command = commands.recv() => match command {
                    // whoever gave up on these has already forced the cleanup
                    Some(Command::Stop { reason, reply }) if reply.is_closed() => {
                        debug!(tenant_id = %self.tenant, reason = reason.as_str(), "skipping abandoned stop");
                    }
                    Some(Command::Abort { reply, .. }) if reply.is_closed() => {
                        debug!(tenant_id = %self.tenant, "skipping abandoned abort");
                    }
                    Some(Command::Stop { reason, reply }) => {
                        self.stop(reason).await;
                        break Some(reply);
                    }
                    Some(Command::Abort { message, reply }) => {
                        self.abort(&message).await;
                        break Some(reply);
                    }
                    None => {
                        // the handle was force-released, client included
                        debug!(tenant_id = %self.tenant, "session detached from its handle");
                        break None;
                    }
                },

                event = events.recv() => {
                    let event = match event {
                        Some(Inbound::Client(event)) => event,
                        Some(Inbound::ConnectReturned) => {
                            if let Some(startup) = self.startup.take() {
                                let _ = startup.send(Ok(()));
                            }
                            continue;
                        }
                        None => ClientEvent::Disconnected("client event stream closed".to_string()),
                    };
                    if let Flow::Exit = self.handle_event(event).await {
                        break None;
                    }
                }

                _ = sleep_until(deadline), if armed => {
                    self.on_pairing_timeout().await;
                    break None;
                }
            }
        };

        let tenant = self.tenant.clone();
        let startup = self.startup.take();
        let startup_error = self.startup_error.take();
        // release the slot before answering anyone, so the tenant can be
        // initialized again as soon as the caller resumes
        drop(self);
        if let Some(reply) = reply {
            let _ = reply.send(());
        }
        if let Some(startup) = startup {
            let err = startup_error
                .unwrap_or_else(|| SessionError::initialization("session ended during startup"));
            let _ = startup.send(Err(err));
        }
        debug!(tenant_id = %tenant, "session task finished");
    }

    /// Remember why the session ended, for a `start` still waiting on it.
    fn fail_startup(&mut self, err: SessionError) {
        if self.startup.is_some() {
            self.startup_error = Some(err);
        }
    }

    async fn handle_event(&mut self, event: ClientEvent) -> Flow {
        debug!(tenant_id = %self.tenant, event = event.name(), "client event");
        if self.handle.is_cancelled() {
            debug!(tenant_id = %self.tenant, "session was force-released, dropping event");
            return Flow::Exit;
        }
        match event {
            ClientEvent::PairingArtifact(artifact) => {
                self.on_pairing_artifact(artifact).await;
                Flow::Continue
            }
            ClientEvent::Authenticated if self.handle.is_connected() => {
                debug!(tenant_id = %self.tenant, "authenticated again while connected");
                Flow::Continue
            }
            ClientEvent::Authenticated => {
                info!(tenant_id = %self.tenant, "client authenticated");
                self.handle.set_state(LifecycleState::Authenticating);
                Flow::Continue
            }
            ClientEvent::AuthFailure(message) => {
                self.on_auth_failure(&message).await;
                Flow::Exit
            }
            ClientEvent::Ready => self.on_ready().await,
            ClientEvent::Disconnected(reason) => {
                self.on_disconnected(&reason).await;
                Flow::Exit
            }
            ClientEvent::Message(message) => {
                self.ctx
                    .events
                    .publish_event(LifecycleEvent::message(&self.tenant, &message));
                Flow::Continue
            }
            ClientEvent::CredentialsUpdated(blob) => {
                if self.handle.is_connected() {
                    self.ctx.save_session(&self.tenant, blob).await;
                }
                Flow::Continue
            }
            ClientEvent::Error(message) => {
                warn!(tenant_id = %self.tenant, error = %message, "client error");
                Flow::Continue
            }
        }
    }

    async fn on_pairing_artifact(&mut self, artifact: String) {
        if self.handle.is_connected() {
            warn!(tenant_id = %self.tenant, "pairing code while connected, ignoring");
            return;
        }
        let first = self.handle.state() != LifecycleState::Pairing;
        self.handle.set_pairing(artifact.clone());
        if self.deadline.is_none() {
            self.deadline = Some(Instant::now() + self.ctx.config.pairing_timeout);
        }
        if first {
            info!(tenant_id = %self.tenant, "pairing code ready");
            self.ctx
                .persist_connection(&self.tenant, ConnectionState::Pairing, None)
                .await;
        }
        self.ctx
            .events
            .publish_event(LifecycleEvent::pairing_ready(&self.tenant, &artifact));
    }

    async fn on_ready(&mut self) -> Flow {
        let account = self.client.account_id().await;
        match &account {
            Some(account) => {
                let displaced = conflict::resolve(&self.ctx, &self.tenant, account).await;
                if !displaced.is_empty() {
                    info!(tenant_id = %self.tenant, displaced = ?displaced, "account taken over from other projects");
                }
            }
            None => warn!(tenant_id = %self.tenant, "client ready without an account id"),
        }
        // another tenant may have taken this one down while resolving
        if self.handle.is_cancelled() {
            warn!(tenant_id = %self.tenant, "session was force-released while resolving its account");
            return Flow::Exit;
        }

        match self.client.credentials().await {
            Ok(blob) => self.ctx.save_session(&self.tenant, blob).await,
            Err(err) => {
                warn!(tenant_id = %self.tenant, error = %format!("{err:#}"), "could not read client credentials")
            }
        }
        self.ctx
            .persist_connection(&self.tenant, ConnectionState::Connected, account.clone())
            .await;

        self.handle.set_connected(account.clone());
        self.deadline = None;
        info!(tenant_id = %self.tenant, account_id = ?account, "client connected");
        self.ctx
            .events
            .publish_event(LifecycleEvent::connected(&self.tenant, account.as_deref()));
        Flow::Continue
    }

    async fn on_auth_failure(&mut self, message: &str) {
        warn!(tenant_id = %self.tenant, error = %message, "authentication failed");
        self.fail_startup(SessionError::AuthFailure(message.to_string()));
        self.handle.set_state(LifecycleState::Idle);
        call_client(&self.ctx, &self.tenant, "destroy", self.client.destroy()).await;

        self.ctx.delete_session(&self.tenant).await;
        self.ctx
            .persist_connection(&self.tenant, ConnectionState::Disconnected, None)
            .await;
        self.ctx
            .events
            .publish_event(LifecycleEvent::error(&self.tenant, "auth_failure", message));
    }

    async fn on_disconnected(&mut self, reason: &str) {
        warn!(tenant_id = %self.tenant, reason, "client disconnected");
        self.fail_startup(SessionError::initialization(format!("client disconnected: {reason}")));
        self.handle.set_state(LifecycleState::Disconnected);
        call_client(&self.ctx, &self.tenant, "destroy", self.client.destroy()).await;

        if !self.ctx.config.retain_on_disconnect {
            self.ctx.delete_session(&self.tenant).await;
        }
        self.ctx
            .persist_connection(&self.tenant, ConnectionState::Disconnected, None)
            .await;
        self.ctx
            .events
            .publish_event(LifecycleEvent::disconnected(&self.tenant, reason));
    }

    async fn on_pairing_timeout(&mut self) {
        warn!(
            tenant_id = %self.tenant,
            timeout_secs = self.ctx.config.pairing_timeout.as_secs(),
            "no ready before the pairing deadline"
        );
        self.fail_startup(SessionError::initialization("Pairing timed out"));
        self.handle.set_state(LifecycleState::Idle);
        call_client(&self.ctx, &self.tenant, "destroy", self.client.destroy()).await;

        self.ctx
            .persist_connection(&self.tenant, ConnectionState::Disconnected, None)
            .await;
        self.ctx.events.publish_event(LifecycleEvent::error(
            &self.tenant,
            "pairing_timeout",
            "Pairing timed out",
        ));
    }

    async fn stop(&mut self, reason: StopReason) {
        info!(tenant_id = %self.tenant, reason = reason.as_str(), "stopping session");
        self.fail_startup(SessionError::initialization(format!("session stopped: {}", reason.as_str())));
        self.handle.set_state(LifecycleState::Idle);
        if reason.logs_out() {
            call_client(&self.ctx, &self.tenant, "logout", self.client.logout()).await;
        }
        call_client(&self.ctx, &self.tenant, "destroy", self.client.destroy()).await;

        if self.handle.is_cancelled() {
            // the caller stopped waiting and cleaned up on its own
            debug!(tenant_id = %self.tenant, reason = reason.as_str(), "session force-released during stop");
            return;
        }
        if !reason.keeps_session() {
            self.ctx.delete_session(&self.tenant).await;
        }
        self.ctx
            .persist_connection(&self.tenant, ConnectionState::Disconnected, None)
            .await;
        self.ctx
            .events
            .publish_event(LifecycleEvent::disconnected(&self.tenant, reason.as_str()));
    }

    async fn abort(&mut self, message: &str) {
        self.handle.set_state(LifecycleState::Idle);
        call_client(&self.ctx, &self.tenant, "destroy", self.client.destroy()).await;
        if !self.handle.is_cancelled() {
            fail_initialization(&self.ctx, &self.tenant, message).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        backend::{MemorySessionStore, MemoryTenantStore},
        client::scripted::ScriptedClientFactory,
        config::SessionConfig,
        events::{EventBroadcaster, LifecycleEventKind},
        registry::SessionRegistry,
        OwnerId, TenantRecord,
    };

    fn context(factory: &ScriptedClientFactory, tenants: &MemoryTenantStore) -> Arc<SessionContext> {
        Arc::new(SessionContext {
            registry: SessionRegistry::new(),
            sessions: Arc::new(MemorySessionStore::new()),
            tenants: Arc::new(tenants.clone()),
            events: EventBroadcaster::new(16),
            factory: Arc::new(factory.clone()),
            config: SessionConfig::default(),
        })
    }

    #[tokio::test]
    async fn start_on_a_cancelled_handle_resets_and_reports() {
        let factory = ScriptedClientFactory::new();
        let tenants = MemoryTenantStore::new();
        tenants.insert(TenantRecord::new("p1", OwnerId::from("u1")));
        let ctx = context(&factory, &tenants);
        let tenant = TenantId::from("p1");
        let mut events = ctx.events.subscribe(&tenant);

        // stopped from outside before the client was attached
        let handle = ctx.registry.acquire(&tenant).unwrap();
        handle.cancel();

        let err = start(ctx.clone(), handle, None).await.unwrap_err();
        assert!(matches!(err, SessionError::Initialization(_)));
        assert!(ctx.registry.get(&tenant).is_none());
        assert!(factory.client("p1").unwrap().is_destroyed());
        assert_eq!(
            tenants.snapshot(&tenant).unwrap().connection_state,
            ConnectionState::Disconnected
        );

        let event = events.recv().await.unwrap();
        assert_eq!(event.kind, LifecycleEventKind::Error);
        assert_eq!(event.reason(), Some("initialization"));
    }

    #[test]
    fn stop_reasons() {
        assert!(StopReason::UserRequest.logs_out());
        assert!(!StopReason::Shutdown.logs_out());
        assert!(StopReason::Shutdown.keeps_session());
        assert!(!StopReason::AccountTakeover.keeps_session());
    }
}
