use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use parking_lot::RwLock;

use crate::{
    store::{SessionBlob, SessionStore, TenantStore},
    ConnectionState, SessionError, SessionResult, TenantId, TenantRecord,
};

/// In-memory session store for testing and development.
///
/// Clones share the same storage.
#[derive(Clone, Default)]
pub struct MemorySessionStore {
    pub(crate) records: Arc<RwLock<HashMap<TenantId, SessionBlob>>>,
    unavailable: Arc<AtomicBool>,
}

impl MemorySessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every call fail with `SessionError::Persistence` (test helper).
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    fn check(&self) -> SessionResult<()> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(SessionError::persistence("session store unavailable"));
        }
        Ok(())
    }
}

#[async_trait]
impl SessionStore for MemorySessionStore {
    async fn exists(&self, tenant: &TenantId) -> SessionResult<bool> {
        self.check()?;
        Ok(self.records.read().contains_key(tenant))
    }

    async fn save(&self, tenant: &TenantId, blob: SessionBlob) -> SessionResult<()> {
        self.check()?;
        self.records.write().insert(tenant.clone(), blob);
        Ok(())
    }

    async fn load(&self, tenant: &TenantId) -> SessionResult<Option<SessionBlob>> {
        self.check()?;
        Ok(self.records.read().get(tenant).cloned())
    }

    async fn delete(&self, tenant: &TenantId) -> SessionResult<()> {
        self.check()?;
        self.records.write().remove(tenant);
        Ok(())
    }

    async fn list(&self) -> SessionResult<Vec<TenantId>> {
        self.check()?;
        let mut ids: Vec<TenantId> = self.records.read().keys().cloned().collect();
        ids.sort();
        Ok(ids)
    }
}

/// In-memory tenant records, standing in for the CRUD layer.
#[derive(Clone, Default)]
pub struct MemoryTenantStore {
    pub(crate) tenants: Arc<RwLock<HashMap<TenantId, TenantRecord>>>,
}

impl MemoryTenantStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create or replace a tenant record.
    pub fn insert(&self, record: TenantRecord) {
        self.tenants.write().insert(record.id.clone(), record);
    }

    pub fn remove(&self, tenant: &TenantId) -> Option<TenantRecord> {
        self.tenants.write().remove(tenant)
    }

    /// Synchronous read, handy in tests.
    pub fn snapshot(&self, tenant: &TenantId) -> Option<TenantRecord> {
        self.tenants.read().get(tenant).cloned()
    }
}

#[async_trait]
impl TenantStore for MemoryTenantStore {
    async fn get(&self, tenant: &TenantId) -> SessionResult<Option<TenantRecord>> {
        Ok(self.tenants.read().get(tenant).cloned())
    }

    async fn update_connection(
        &self,
        tenant: &TenantId,
        state: ConnectionState,
        account_id: Option<String>,
    ) -> SessionResult<()> {
        let mut tenants = self.tenants.write();
        if let Some(record) = tenants.get_mut(tenant) {
            record.connection_state = state;
            record.account_id = account_id;
            record.updated_at = Utc::now();
        }
        Ok(())
    }

    async fn find_connected_by_account(&self, account_id: &str) -> SessionResult<Vec<TenantRecord>> {
        let tenants = self.tenants.read();
        let mut found: Vec<TenantRecord> = tenants
            .values()
            .filter(|r| r.is_connected() && r.account_id.as_deref() == Some(account_id))
            .cloned()
            .collect();
        found.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(found)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::OwnerId;

    #[tokio::test]
    async fn session_store_save_load_delete() {
        let store = MemorySessionStore::new();
        let tenant = TenantId::from("p1");

        assert!(!store.exists(&tenant).await.unwrap());
        store.save(&tenant, SessionBlob::new(b"v1".to_vec())).await.unwrap();
        store.save(&tenant, SessionBlob::new(b"v2".to_vec())).await.unwrap();

        assert!(store.exists(&tenant).await.unwrap());
        assert_eq!(store.load(&tenant).await.unwrap(), Some(SessionBlob::new(b"v2".to_vec())));
        assert_eq!(store.list().await.unwrap(), vec![tenant.clone()]);

        store.delete(&tenant).await.unwrap();
        store.delete(&tenant).await.unwrap();
        assert_eq!(store.load(&tenant).await.unwrap(), None);
    }

    #[tokio::test]
    async fn unavailable_store_reports_persistence_errors() {
        let store = MemorySessionStore::new();
        store.set_unavailable(true);

        let result = store.exists(&TenantId::from("p1")).await;
        assert!(matches!(result, Err(SessionError::Persistence(_))));

        store.set_unavailable(false);
        assert!(store.exists(&TenantId::from("p1")).await.is_ok());
    }

    #[tokio::test]
    async fn tenant_store_finds_connected_accounts() {
        let store = MemoryTenantStore::new();
        let owner = OwnerId::from("u1");
        store.insert(TenantRecord::new("p1", owner.clone()));
        store.insert(TenantRecord::new("p2", owner));

        store
            .update_connection(&"p1".into(), ConnectionState::Connected, Some("+100".into()))
            .await
            .unwrap();
        store
            .update_connection(&"p2".into(), ConnectionState::Pairing, Some("+100".into()))
            .await
            .unwrap();

        let found = store.find_connected_by_account("+100").await.unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].id, TenantId::from("p1"));

        // unknown tenants are ignored
        store
            .update_connection(&"nope".into(), ConnectionState::Connected, None)
            .await
            .unwrap();
        assert!(store.snapshot(&"nope".into()).is_none());
    }
}
