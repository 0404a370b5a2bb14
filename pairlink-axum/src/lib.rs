//! pairlink-axum: HTTP control plane and WebSocket observer channel for
//! `pairlink-core`.

pub mod app;
pub mod auth;
pub mod channel;
pub mod config;
pub mod error;
pub mod logging;
pub mod routes;
pub mod state;

pub use app::PairlinkApp;
pub use auth::{JwtVerifier, Owner};
pub use config::HttpConfig;
pub use error::{HttpError, PairlinkAxumError};
pub use state::PairlinkState;
