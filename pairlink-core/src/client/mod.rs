//! The messaging-client collaborator.
//!
//! pairlink never speaks the messaging protocol itself. It drives an
//! opaque [`MessagingClient`] through imperative calls and consumes the
//! lifecycle events the client pushes into its [`ClientEventSink`].

pub mod scripted;

use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use crate::{store::SessionBlob, TenantId};

/// A message received by a connected client.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IncomingMessage {
    pub id: Option<String>,
    pub from: String,
    pub body: String,
    pub timestamp: i64,
    #[serde(rename = "type")]
    pub kind: String,
}

/// Events emitted by a client, in emission order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClientEvent {
    /// A new one-time pairing code/image to show to the end user.
    PairingArtifact(String),
    Authenticated,
    /// Credentials were rejected. Terminal.
    AuthFailure(String),
    /// The client is fully operational and its account id is resolvable.
    Ready,
    /// The session was lost (remote logout, browser closed...). Terminal.
    Disconnected(String),
    Message(IncomingMessage),
    /// Fresh credential backup while connected.
    CredentialsUpdated(SessionBlob),
    /// Non-terminal client error.
    Error(String),
}

impl ClientEvent {
    pub fn name(&self) -> &'static str {
        match self {
            Self::PairingArtifact(_) => "pairing_artifact",
            Self::Authenticated => "authenticated",
            Self::AuthFailure(_) => "auth_failure",
            Self::Ready => "ready",
            Self::Disconnected(_) => "disconnected",
            Self::Message(_) => "message",
            Self::CredentialsUpdated(_) => "credentials_updated",
            Self::Error(_) => "error",
        }
    }
}

/// What a controller reads from its sink.
#[derive(Debug)]
pub(crate) enum Inbound {
    Client(ClientEvent),
    /// Queued by the controller's starter once `connect` returned, so
    /// everything emitted during `connect` is handled before it.
    ConnectReturned,
}

/// Where a client pushes its events.
///
/// Each tenant controller owns the receiving side and handles the events
/// one at a time, so a client never needs to synchronise its callbacks.
#[derive(Debug, Clone)]
pub struct ClientEventSink {
    tenant_id: TenantId,
    tx: mpsc::UnboundedSender<Inbound>,
}

impl ClientEventSink {
    pub(crate) fn channel(tenant_id: TenantId) -> (Self, mpsc::UnboundedReceiver<Inbound>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tenant_id, tx }, rx)
    }

    pub(crate) fn connect_returned(&self) -> bool {
        self.tx.send(Inbound::ConnectReturned).is_ok()
    }

    pub fn tenant_id(&self) -> &TenantId {
        &self.tenant_id
    }

    /// Returns false once the controller is gone.
    pub fn emit(&self, event: ClientEvent) -> bool {
        self.tx.send(Inbound::Client(event)).is_ok()
    }

    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

/// One live instance of the external messaging client.
///
/// Every call may fail independently; the controller decides which
/// failures are fatal.
#[async_trait]
pub trait MessagingClient: Send + Sync {
    /// Start the client. Lifecycle events may fire before this returns.
    async fn connect(&self) -> Result<()>;

    /// Revoke the remote session.
    async fn logout(&self) -> Result<()>;

    /// Release local resources (browser, sockets...).
    async fn destroy(&self) -> Result<()>;

    /// The bound external account, once `ready` fired.
    async fn account_id(&self) -> Option<String>;

    /// Current credential bundle to persist.
    async fn credentials(&self) -> Result<SessionBlob>;
}

/// Builds clients, one per controller start.
#[async_trait]
pub trait ClientFactory: Send + Sync {
    async fn create(
        &self,
        tenant: &TenantId,
        restored: Option<SessionBlob>,
        events: ClientEventSink,
    ) -> Result<Arc<dyn MessagingClient>>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sink_reports_closed_receiver() {
        let (sink, rx) = ClientEventSink::channel(TenantId::from("p1"));
        assert!(sink.emit(ClientEvent::Authenticated));
        drop(rx);
        assert!(sink.is_closed());
        assert!(!sink.emit(ClientEvent::Ready));
    }

    #[test]
    fn connect_marker_queues_behind_emitted_events() {
        let (sink, mut rx) = ClientEventSink::channel(TenantId::from("p1"));
        assert!(sink.emit(ClientEvent::AuthFailure("revoked".into())));
        assert!(sink.connect_returned());

        assert!(matches!(
            rx.try_recv(),
            Ok(Inbound::Client(ClientEvent::AuthFailure(_)))
        ));
        assert!(matches!(rx.try_recv(), Ok(Inbound::ConnectReturned)));
    }

    #[test]
    fn incoming_message_uses_type_key() {
        let msg = IncomingMessage {
            id: Some("abc".into()),
            from: "+200".into(),
            body: "hi".into(),
            timestamp: 1_700_000_000,
            kind: "chat".into(),
        };
        let v = serde_json::to_value(&msg).unwrap();
        assert_eq!(v["type"], "chat");
        assert_eq!(v["from"], "+200");
    }
}
