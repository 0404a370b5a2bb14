//! Per-tenant lifecycle event channels.

use std::collections::HashMap;
use std::pin::Pin;

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::Serialize;
use serde_json::{json, Value};
use tokio::sync::broadcast;
use tokio_stream::Stream;
use tracing::{debug, warn};

use crate::{client::IncomingMessage, TenantId};

pub type BoxStream<T> = Pin<Box<dyn Stream<Item = T> + Send>>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LifecycleEventKind {
    PairingReady,
    Connected,
    Disconnected,
    Error,
    Message,
}

impl LifecycleEventKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::PairingReady => "pairing_ready",
            Self::Connected => "connected",
            Self::Disconnected => "disconnected",
            Self::Error => "error",
            Self::Message => "message",
        }
    }
}

/// One event as delivered to observers.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LifecycleEvent {
    pub tenant_id: TenantId,
    #[serde(rename = "event")]
    pub kind: LifecycleEventKind,
    #[serde(rename = "data")]
    pub payload: Value,
    pub at: DateTime<Utc>,
}

impl LifecycleEvent {
    pub fn new(tenant_id: &TenantId, kind: LifecycleEventKind, payload: Value) -> Self {
        Self {
            tenant_id: tenant_id.clone(),
            kind,
            payload,
            at: Utc::now(),
        }
    }

    pub fn pairing_ready(tenant_id: &TenantId, artifact: &str) -> Self {
        Self::new(
            tenant_id,
            LifecycleEventKind::PairingReady,
            json!({ "artifact": artifact }),
        )
    }

    pub fn connected(tenant_id: &TenantId, account_id: Option<&str>) -> Self {
        Self::new(
            tenant_id,
            LifecycleEventKind::Connected,
            json!({ "accountId": account_id }),
        )
    }

    pub fn disconnected(tenant_id: &TenantId, reason: &str) -> Self {
        Self::new(
            tenant_id,
            LifecycleEventKind::Disconnected,
            json!({ "reason": reason }),
        )
    }

    pub fn error(tenant_id: &TenantId, reason: &str, message: &str) -> Self {
        Self::new(
            tenant_id,
            LifecycleEventKind::Error,
            json!({ "reason": reason, "message": message }),
        )
    }

    pub fn message(tenant_id: &TenantId, message: &IncomingMessage) -> Self {
        Self::new(
            tenant_id,
            LifecycleEventKind::Message,
            serde_json::to_value(message).unwrap_or(Value::Null),
        )
    }

    /// `payload["reason"]`, if any.
    pub fn reason(&self) -> Option<&str> {
        self.payload.get("reason").and_then(Value::as_str)
    }
}

/// Fan-out of lifecycle events, one broadcast channel per tenant.
///
/// Channels are created on first subscribe and dropped once their last
/// observer goes away. Publishing to a tenant nobody watches is a no-op.
pub struct EventBroadcaster {
    channels: RwLock<HashMap<TenantId, broadcast::Sender<LifecycleEvent>>>,
    capacity: usize,
}

impl EventBroadcaster {
    pub fn new(capacity: usize) -> Self {
        Self {
            channels: RwLock::new(HashMap::new()),
            capacity: capacity.max(1),
        }
    }

    /// Deliver to current observers of `tenant`. Returns how many received it.
    pub fn publish(&self, tenant: &TenantId, kind: LifecycleEventKind, payload: Value) -> usize {
        self.publish_event(LifecycleEvent::new(tenant, kind, payload))
    }

    pub fn publish_event(&self, event: LifecycleEvent) -> usize {
        let sender = self.channels.read().get(&event.tenant_id).cloned();
        let Some(sender) = sender else {
            return 0;
        };

        let tenant = event.tenant_id.clone();
        let kind = event.kind;
        match sender.send(event) {
            Ok(delivered) => {
                debug!(tenant_id = %tenant, event = kind.as_str(), delivered, "event published");
                delivered
            }
            Err(_) => {
                self.prune(&tenant);
                0
            }
        }
    }

    /// Open a subscription on `tenant`'s channel.
    ///
    /// Callers must have checked ownership of the tenant beforehand.
    pub fn subscribe(&self, tenant: &TenantId) -> Subscription {
        let mut channels = self.channels.write();
        let sender = channels
            .entry(tenant.clone())
            .or_insert_with(|| broadcast::channel(self.capacity).0);
        Subscription {
            tenant_id: tenant.clone(),
            receiver: sender.subscribe(),
        }
    }

    pub fn subscriber_count(&self, tenant: &TenantId) -> usize {
        self.channels
            .read()
            .get(tenant)
            .map(|s| s.receiver_count())
            .unwrap_or(0)
    }

    fn prune(&self, tenant: &TenantId) {
        let mut channels = self.channels.write();
        if channels
            .get(tenant)
            .is_some_and(|sender| sender.receiver_count() == 0)
        {
            channels.remove(tenant);
        }
    }
}

pub struct Subscription {
    tenant_id: TenantId,
    receiver: broadcast::Receiver<LifecycleEvent>,
}

impl Subscription {
    pub fn tenant_id(&self) -> &TenantId {
        &self.tenant_id
    }

    /// Next event. Skips over events lost to lag; `None` once closed.
    pub async fn recv(&mut self) -> Option<LifecycleEvent> {
        loop {
            match self.receiver.recv().await {
                Ok(event) => return Some(event),
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!(tenant_id = %self.tenant_id, skipped, "observer lagged, events dropped");
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }

    pub fn into_stream(self) -> BoxStream<LifecycleEvent> {
        use tokio_stream::{wrappers::BroadcastStream, StreamExt};
        let stream = BroadcastStream::new(self.receiver).filter_map(|result| result.ok());

        Box::pin(stream)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn events_are_scoped_to_their_tenant() {
        let hub = EventBroadcaster::new(8);
        let p1 = TenantId::from("p1");
        let p2 = TenantId::from("p2");

        let mut sub1 = hub.subscribe(&p1);
        let mut sub2 = hub.subscribe(&p2);

        assert_eq!(hub.publish_event(LifecycleEvent::pairing_ready(&p1, "X")), 1);
        assert_eq!(hub.publish_event(LifecycleEvent::disconnected(&p2, "logout")), 1);

        let e1 = sub1.recv().await.unwrap();
        assert_eq!(e1.kind, LifecycleEventKind::PairingReady);
        assert_eq!(e1.payload["artifact"], "X");

        let e2 = sub2.recv().await.unwrap();
        assert_eq!(e2.reason(), Some("logout"));
    }

    #[tokio::test]
    async fn publish_without_observers_is_dropped() {
        let hub = EventBroadcaster::new(8);
        let p1 = TenantId::from("p1");
        assert_eq!(hub.publish_event(LifecycleEvent::connected(&p1, Some("+100"))), 0);

        let sub = hub.subscribe(&p1);
        drop(sub);
        assert_eq!(hub.publish(&p1, LifecycleEventKind::Connected, Value::Null), 0);
        // the empty channel was pruned
        assert_eq!(hub.subscriber_count(&p1), 0);
        assert!(hub.channels.read().get(&p1).is_none());
    }

    #[tokio::test]
    async fn per_tenant_order_is_preserved() {
        use tokio_stream::StreamExt;

        let hub = EventBroadcaster::new(8);
        let p1 = TenantId::from("p1");
        let mut stream = hub.subscribe(&p1).into_stream();

        hub.publish_event(LifecycleEvent::pairing_ready(&p1, "A"));
        hub.publish_event(LifecycleEvent::connected(&p1, Some("+100")));
        hub.publish_event(LifecycleEvent::disconnected(&p1, "user_request"));

        let kinds: Vec<_> = vec![
            stream.next().await.unwrap().kind,
            stream.next().await.unwrap().kind,
            stream.next().await.unwrap().kind,
        ];
        assert_eq!(
            kinds,
            vec![
                LifecycleEventKind::PairingReady,
                LifecycleEventKind::Connected,
                LifecycleEventKind::Disconnected
            ]
        );
    }

    #[test]
    fn wire_shape() {
        let p1 = TenantId::from("p1");
        let v = serde_json::to_value(LifecycleEvent::error(&p1, "pairing_timeout", "no ready")).unwrap();
        assert_eq!(v["event"], "error");
        assert_eq!(v["tenantId"], "p1");
        assert_eq!(v["data"]["reason"], "pairing_timeout");
        assert!(v.get("at").is_some());
    }
}
