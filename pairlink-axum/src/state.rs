use std::sync::Arc;

use pairlink_core::SessionManager;

use crate::auth::JwtVerifier;

#[derive(Clone)]
pub struct PairlinkState {
    pub manager: SessionManager,
    pub auth: Arc<JwtVerifier>,
}

impl PairlinkState {
    pub fn new(manager: SessionManager, auth: JwtVerifier) -> Self {
        Self {
            manager,
            auth: Arc::new(auth),
        }
    }
}
