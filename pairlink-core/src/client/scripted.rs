//! Scripted client for tests and local development.
//!
//! A [`ScriptedClientFactory`] hands out [`ScriptedClient`]s that do
//! nothing on their own: the test drives them by emitting events and
//! toggling failures.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use parking_lot::Mutex;

use super::{ClientEvent, ClientEventSink, ClientFactory, IncomingMessage, MessagingClient};
use crate::{store::SessionBlob, TenantId};

pub struct ScriptedClient {
    tenant_id: TenantId,
    sink: ClientEventSink,
    restored: Option<SessionBlob>,
    account: Mutex<Option<String>>,
    connect_error: Option<String>,
    connect_delay: Option<Duration>,
    on_connect: Vec<ClientEvent>,
    logout_fails: AtomicBool,
    logout_delay: Mutex<Option<Duration>>,
    destroy_fails: AtomicBool,
    destroyed: AtomicBool,
    calls: Mutex<Vec<&'static str>>,
}

impl ScriptedClient {
    pub fn tenant_id(&self) -> &TenantId {
        &self.tenant_id
    }

    /// Credentials the client was seeded with.
    pub fn restored(&self) -> Option<&SessionBlob> {
        self.restored.as_ref()
    }

    pub fn emit(&self, event: ClientEvent) -> bool {
        self.sink.emit(event)
    }

    pub fn show_pairing(&self, artifact: &str) -> bool {
        self.emit(ClientEvent::PairingArtifact(artifact.to_string()))
    }

    /// Bind `account` and emit `authenticated` followed by `ready`.
    pub fn connect_as(&self, account: &str) -> bool {
        *self.account.lock() = Some(account.to_string());
        self.emit(ClientEvent::Authenticated) && self.emit(ClientEvent::Ready)
    }

    pub fn reject(&self, reason: &str) -> bool {
        self.emit(ClientEvent::AuthFailure(reason.to_string()))
    }

    pub fn drop_connection(&self, reason: &str) -> bool {
        self.emit(ClientEvent::Disconnected(reason.to_string()))
    }

    pub fn receive(&self, from: &str, body: &str) -> bool {
        self.emit(ClientEvent::Message(IncomingMessage {
            id: None,
            from: from.to_string(),
            body: body.to_string(),
            timestamp: chrono::Utc::now().timestamp(),
            kind: "chat".to_string(),
        }))
    }

    pub fn set_logout_fails(&self, fails: bool) {
        self.logout_fails.store(fails, Ordering::SeqCst);
    }

    /// Make every later `logout` take `delay` before answering.
    pub fn set_logout_delay(&self, delay: Duration) {
        *self.logout_delay.lock() = Some(delay);
    }

    pub fn set_destroy_fails(&self, fails: bool) {
        self.destroy_fails.store(fails, Ordering::SeqCst);
    }

    pub fn is_destroyed(&self) -> bool {
        self.destroyed.load(Ordering::SeqCst)
    }

    /// Names of the imperative calls made so far, in order.
    pub fn calls(&self) -> Vec<&'static str> {
        self.calls.lock().clone()
    }

    fn record(&self, call: &'static str) {
        self.calls.lock().push(call);
    }
}

#[async_trait]
impl MessagingClient for ScriptedClient {
    async fn connect(&self) -> Result<()> {
        self.record("connect");
        if let Some(delay) = self.connect_delay {
            tokio::time::sleep(delay).await;
        }
        for event in &self.on_connect {
            self.sink.emit(event.clone());
        }
        match &self.connect_error {
            Some(message) => Err(anyhow!("{message}")),
            None => Ok(()),
        }
    }

    async fn logout(&self) -> Result<()> {
        self.record("logout");
        let delay = *self.logout_delay.lock();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        if self.logout_fails.load(Ordering::SeqCst) {
            return Err(anyhow!("logout rejected by remote"));
        }
        Ok(())
    }

    async fn destroy(&self) -> Result<()> {
        self.record("destroy");
        if self.destroy_fails.load(Ordering::SeqCst) {
            return Err(anyhow!("browser already gone"));
        }
        self.destroyed.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn account_id(&self) -> Option<String> {
        self.account.lock().clone()
    }

    async fn credentials(&self) -> Result<SessionBlob> {
        if let Some(blob) = &self.restored {
            return Ok(blob.clone());
        }
        let account = self.account.lock().clone().unwrap_or_default();
        Ok(SessionBlob::new(format!("{}:{}", self.tenant_id, account)))
    }
}

#[derive(Default)]
struct Script {
    clients: HashMap<TenantId, Arc<ScriptedClient>>,
    fail_create: HashSet<TenantId>,
    fail_connect: HashMap<TenantId, String>,
    on_connect: HashMap<TenantId, Vec<ClientEvent>>,
    connect_delay: HashMap<TenantId, Duration>,
}

/// Factory handing out [`ScriptedClient`]s. Clones share state.
#[derive(Clone, Default)]
pub struct ScriptedClientFactory {
    script: Arc<Mutex<Script>>,
    created: Arc<AtomicUsize>,
}

impl ScriptedClientFactory {
    pub fn new() -> Self {
        Self::default()
    }

    /// The most recently created client of `tenant`.
    pub fn client(&self, tenant: impl Into<TenantId>) -> Option<Arc<ScriptedClient>> {
        self.script.lock().clients.get(&tenant.into()).cloned()
    }

    /// Total number of clients built so far.
    pub fn created(&self) -> usize {
        self.created.load(Ordering::SeqCst)
    }

    pub fn fail_create(&self, tenant: impl Into<TenantId>) {
        self.script.lock().fail_create.insert(tenant.into());
    }

    pub fn fail_connect(&self, tenant: impl Into<TenantId>, message: &str) {
        self.script
            .lock()
            .fail_connect
            .insert(tenant.into(), message.to_string());
    }

    /// Make `connect` of every future client of `tenant` take `delay`.
    pub fn delay_connect(&self, tenant: impl Into<TenantId>, delay: Duration) {
        self.script.lock().connect_delay.insert(tenant.into(), delay);
    }

    /// Events every future client of `tenant` emits while connecting.
    pub fn on_connect(&self, tenant: impl Into<TenantId>, events: Vec<ClientEvent>) {
        self.script.lock().on_connect.insert(tenant.into(), events);
    }
}

#[async_trait]
impl ClientFactory for ScriptedClientFactory {
    async fn create(
        &self,
        tenant: &TenantId,
        restored: Option<SessionBlob>,
        events: ClientEventSink,
    ) -> Result<Arc<dyn MessagingClient>> {
        let mut script = self.script.lock();
        if script.fail_create.contains(tenant) {
            return Err(anyhow!("failed to launch client for {tenant}"));
        }

        let client = Arc::new(ScriptedClient {
            tenant_id: tenant.clone(),
            sink: events,
            restored,
            account: Mutex::new(None),
            connect_error: script.fail_connect.get(tenant).cloned(),
            connect_delay: script.connect_delay.get(tenant).copied(),
            on_connect: script.on_connect.get(tenant).cloned().unwrap_or_default(),
            logout_fails: AtomicBool::new(false),
            logout_delay: Mutex::new(None),
            destroy_fails: AtomicBool::new(false),
            destroyed: AtomicBool::new(false),
            calls: Mutex::new(Vec::new()),
        });
        script.clients.insert(tenant.clone(), client.clone());
        self.created.fetch_add(1, Ordering::SeqCst);
        Ok(client)
    }
}
