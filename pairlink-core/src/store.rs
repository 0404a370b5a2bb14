use std::fmt;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::{ConnectionState, SessionResult, TenantId, TenantRecord};

/// Opaque credential bundle of one paired client.
///
/// The session core never looks inside it; it only moves it between the
/// client and the [`SessionStore`].
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionBlob(pub Vec<u8>);

impl SessionBlob {
    pub fn new(bytes: impl Into<Vec<u8>>) -> Self {
        Self(bytes.into())
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

// Never print credentials.
impl fmt::Debug for SessionBlob {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SessionBlob({} bytes)", self.0.len())
    }
}

/// Durable storage of per-tenant credential bundles.
///
/// Every call is scoped to one tenant, so implementations are expected to
/// be safe for concurrent use across tenants. Failures are reported as
/// `SessionError::Persistence`.
#[async_trait]
pub trait SessionStore: Send + Sync {
    async fn exists(&self, tenant: &TenantId) -> SessionResult<bool>;

    /// Create or overwrite the tenant's record.
    async fn save(&self, tenant: &TenantId, blob: SessionBlob) -> SessionResult<()>;

    async fn load(&self, tenant: &TenantId) -> SessionResult<Option<SessionBlob>>;

    /// Deleting a missing record is not an error.
    async fn delete(&self, tenant: &TenantId) -> SessionResult<()>;

    /// Tenants that currently have a stored record.
    async fn list(&self) -> SessionResult<Vec<TenantId>>;
}

/// The CRUD collaborator that owns tenant records.
///
/// The session core reads records and writes only the connection fields.
#[async_trait]
pub trait TenantStore: Send + Sync {
    async fn get(&self, tenant: &TenantId) -> SessionResult<Option<TenantRecord>>;

    /// Set connection state and bound account, bumping `updated_at`.
    /// Updating a missing tenant is a no-op.
    async fn update_connection(
        &self,
        tenant: &TenantId,
        state: ConnectionState,
        account_id: Option<String>,
    ) -> SessionResult<()>;

    /// Tenants persisted as `connected` with the given account.
    async fn find_connected_by_account(&self, account_id: &str) -> SessionResult<Vec<TenantRecord>>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn blob_debug_hides_contents() {
        let blob = SessionBlob::new(b"secret-token".to_vec());
        let printed = format!("{blob:?}");
        assert_eq!(printed, "SessionBlob(12 bytes)");
        assert!(!printed.contains("secret"));
    }
}
