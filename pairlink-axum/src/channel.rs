//! Real-time observer channel: one WebSocket per tenant subscription.

use axum::{
    extract::{
        ws::{Message, WebSocket},
        Path, State, WebSocketUpgrade,
    },
    response::IntoResponse,
};
use futures::{SinkExt, StreamExt};
use pairlink_core::{Subscription, TenantId};
use tracing::{debug, warn};

use crate::{auth::Owner, PairlinkAxumError, PairlinkState};

/// `GET /projects/{id}/events`
///
/// Ownership is checked before the upgrade, so unowned tenants get a
/// plain 404 instead of a socket.
pub async fn events_handler(
    State(state): State<PairlinkState>,
    Path(id): Path<String>,
    Owner(owner): Owner,
    ws: WebSocketUpgrade,
) -> Result<impl IntoResponse, PairlinkAxumError> {
    let tenant = TenantId::from(id);
    let subscription = state.manager.subscribe(&tenant, &owner).await?;
    debug!(tenant_id = %tenant, owner_id = %owner, "observer subscribed");
    Ok(ws.on_upgrade(move |socket| forward(socket, subscription)))
}

async fn forward(socket: WebSocket, mut subscription: Subscription) {
    let (mut sender, mut receiver) = socket.split();
    let tenant = subscription.tenant_id().clone();

    loop {
        tokio::select! {
            event = subscription.recv() => {
                let Some(event) = event else { break };
                let text = match serde_json::to_string(&event) {
                    Ok(text) => text,
                    Err(e) => {
                        warn!(tenant_id = %tenant, error = %e, "could not encode event");
                        continue;
                    }
                };
                if sender.send(Message::Text(text.into())).await.is_err() {
                    break;
                }
            }
            incoming = receiver.next() => match incoming {
                Some(Ok(Message::Close(_))) | None => break,
                Some(Err(e)) => {
                    debug!(tenant_id = %tenant, error = %e, "observer socket error");
                    break;
                }
                // observers only listen
                Some(Ok(_)) => {}
            },
        }
    }

    debug!(tenant_id = %tenant, "observer left");
}
