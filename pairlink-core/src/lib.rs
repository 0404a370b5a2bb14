//! # pairlink-core
//!
//! Multi-tenant session lifecycle manager for account-based messaging
//! clients.
//!
//! Each tenant ("project") pairs and runs at most one client session.
//! The [`SessionManager`] creates, tracks, persists, restores and tears
//! those sessions down, hands over an external account when a second
//! tenant connects it, and broadcasts lifecycle events to observers
//! scoped to the tenant.
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use pairlink_core::{client::scripted::ScriptedClientFactory, OwnerId, SessionManager, TenantId};
//!
//! # async fn demo() -> pairlink_core::SessionResult<()> {
//! let manager = SessionManager::builder(Arc::new(ScriptedClientFactory::new())).build();
//! let ack = manager
//!     .initialize_session(&TenantId::from("p1"), &OwnerId::from("u1"))
//!     .await?;
//! # let _ = ack;
//! # Ok(())
//! # }
//! ```
//!
//! The in-memory state of each tenant's controller is the source of
//! truth. The session and tenant stores are best-effort mirrors: their
//! failures are logged and never undo a transition.

pub mod backend;
pub mod client;
pub mod config;
mod conflict;
pub mod controller;
pub mod errors;
pub mod events;
pub mod manager;
pub mod registry;
pub mod store;
pub mod tenant;

pub use client::{ClientEvent, ClientEventSink, ClientFactory, IncomingMessage, MessagingClient};
pub use config::{ConfigSnapshot, ConfigStore, SessionConfig};
pub use controller::StopReason;
pub use errors::{ErrorKind, SessionError, SessionResult};
pub use events::{EventBroadcaster, LifecycleEvent, LifecycleEventKind, Subscription};
pub use manager::{Ack, AckStatus, SessionManager, SessionManagerBuilder, SessionStatus};
pub use registry::{ClientHandle, LifecycleState, SessionRegistry};
pub use store::{SessionBlob, SessionStore, TenantStore};
pub use tenant::{ConnectionState, OwnerId, TenantId, TenantRecord};
