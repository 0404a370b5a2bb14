use axum::{
    extract::{Path, State},
    routing::{delete, get, post},
    Json, Router,
};
use pairlink_core::{Ack, SessionStatus, TenantId};
use serde_json::{json, Value};

use crate::{auth::Owner, channel, PairlinkAxumError, PairlinkState};

pub fn router(state: PairlinkState) -> Router<()> {
    Router::new()
        .route("/health", get(|| async { "ok" }))
        .route("/projects/{id}/initialize", post(initialize))
        .route("/projects/{id}/qr", get(pairing_code))
        .route("/projects/{id}/status", get(status))
        .route("/projects/{id}/disconnect", delete(disconnect))
        .route("/projects/{id}/events", get(channel::events_handler))
        .with_state(state)
}

async fn initialize(
    State(state): State<PairlinkState>,
    Path(id): Path<String>,
    Owner(owner): Owner,
) -> Result<Json<Ack>, PairlinkAxumError> {
    let ack = state
        .manager
        .initialize_session(&TenantId::from(id), &owner)
        .await?;
    Ok(Json(ack))
}

async fn pairing_code(
    State(state): State<PairlinkState>,
    Path(id): Path<String>,
    Owner(owner): Owner,
) -> Result<Json<Value>, PairlinkAxumError> {
    let tenant = TenantId::from(id);
    state.manager.authorize(&tenant, &owner).await?;
    let artifact = state.manager.get_pairing_artifact(&tenant)?;
    Ok(Json(json!({ "qrCode": artifact })))
}

async fn status(
    State(state): State<PairlinkState>,
    Path(id): Path<String>,
    Owner(owner): Owner,
) -> Result<Json<SessionStatus>, PairlinkAxumError> {
    let tenant = TenantId::from(id);
    state.manager.authorize(&tenant, &owner).await?;
    Ok(Json(state.manager.get_status(&tenant).await))
}

async fn disconnect(
    State(state): State<PairlinkState>,
    Path(id): Path<String>,
    Owner(owner): Owner,
) -> Result<Json<Ack>, PairlinkAxumError> {
    let ack = state
        .manager
        .disconnect_session(&TenantId::from(id), &owner)
        .await?;
    Ok(Json(ack))
}
