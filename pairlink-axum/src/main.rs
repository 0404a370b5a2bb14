//! Development server backed by scripted clients and in-memory stores.
//!
//! Projects are seeded from `PAIRLINK__DEV__PROJECTS`, a comma separated
//! list of `project:owner` pairs.

use std::sync::Arc;

use anyhow::Result;
use pairlink_axum::{logging, HttpConfig, JwtVerifier, PairlinkApp};
use pairlink_core::{
    backend::MemoryTenantStore, client::scripted::ScriptedClientFactory, ConfigStore, OwnerId,
    SessionConfig, SessionManager, TenantRecord,
};
use tracing::{info, warn};

fn seed_projects(store: &MemoryTenantStore, list: &str) {
    for entry in list.split(',').map(str::trim).filter(|e| !e.is_empty()) {
        match entry.split_once(':') {
            Some((project, owner)) => {
                store.insert(TenantRecord::new(project.trim(), OwnerId::new(owner.trim())));
                info!(project, owner, "seeded project");
            }
            None => warn!(entry, "ignoring malformed project entry"),
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    logging::init();

    let mut cfg = ConfigStore::new();
    cfg.load_env("PAIRLINK");
    let snapshot = cfg.snapshot();
    let http = HttpConfig::from_snapshot(&snapshot)?;

    let tenants = MemoryTenantStore::new();
    if let Some(projects) = snapshot.get("dev.projects") {
        seed_projects(&tenants, projects);
    }

    let manager = SessionManager::builder(Arc::new(ScriptedClientFactory::new()))
        .tenant_store(Arc::new(tenants))
        .config(SessionConfig::from_snapshot(&snapshot))
        .build();
    manager.restore_sessions().await?;

    let app = PairlinkApp::new(manager, JwtVerifier::from_config(&http));
    app.listen_until(http.addr(), async {
        let _ = tokio::signal::ctrl_c().await;
    })
    .await
}
