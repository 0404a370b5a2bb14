//! Core multi-tenant types for pairlink.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Identifier of a tenant ("project").
///
/// Every session, registry slot and observer channel is scoped by one.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TenantId(pub String);

impl TenantId {
    pub fn new<S: Into<String>>(id: S) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TenantId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<String> for TenantId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

impl From<&str> for TenantId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

/// Identifier of the user that owns a tenant.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct OwnerId(pub String);

impl OwnerId {
    pub fn new<S: Into<String>>(id: S) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for OwnerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for OwnerId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

/// Persisted connection state of a tenant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionState {
    #[default]
    Disconnected,
    Initializing,
    Pairing,
    Connected,
}

impl ConnectionState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Disconnected => "disconnected",
            Self::Initializing => "initializing",
            Self::Pairing => "pairing",
            Self::Connected => "connected",
        }
    }
}

/// Tenant record as owned by the CRUD layer.
///
/// The session core only ever touches the connection fields
/// (`connection_state`, `account_id`, `updated_at`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TenantRecord {
    pub id: TenantId,
    pub owner_id: OwnerId,
    pub connection_state: ConnectionState,
    /// External account bound to this tenant while connected.
    pub account_id: Option<String>,
    pub updated_at: DateTime<Utc>,
}

impl TenantRecord {
    /// A fresh, disconnected tenant.
    pub fn new(id: impl Into<TenantId>, owner_id: OwnerId) -> Self {
        Self {
            id: id.into(),
            owner_id,
            connection_state: ConnectionState::Disconnected,
            account_id: None,
            updated_at: Utc::now(),
        }
    }

    pub fn is_owned_by(&self, owner: &OwnerId) -> bool {
        &self.owner_id == owner
    }

    pub fn is_connected(&self) -> bool {
        self.connection_state == ConnectionState::Connected
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn connection_state_serializes_snake_case() {
        let v = serde_json::to_value(ConnectionState::Connected).unwrap();
        assert_eq!(v, "connected");
        assert_eq!(ConnectionState::default(), ConnectionState::Disconnected);
    }

    #[test]
    fn new_record_is_disconnected_and_owned() {
        let owner = OwnerId::from("u1");
        let record = TenantRecord::new("p1", owner.clone());
        assert!(!record.is_connected());
        assert!(record.is_owned_by(&owner));
        assert!(!record.is_owned_by(&OwnerId::from("u2")));
        assert_eq!(record.account_id, None);
    }
}
