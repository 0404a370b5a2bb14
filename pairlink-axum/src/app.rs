use std::future::Future;

use axum::Router;
use pairlink_core::SessionManager;
use tokio::net::{TcpListener, ToSocketAddrs};
use tower::ServiceBuilder;
use tower_http::{
    request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer},
    trace::TraceLayer,
};
use tracing::info;

use crate::{auth::JwtVerifier, routes, PairlinkState};

#[derive(Clone)]
pub struct PairlinkApp {
    pub manager: SessionManager,
    pub router: Router<()>,
}

impl PairlinkApp {
    pub fn new(manager: SessionManager, auth: JwtVerifier) -> Self {
        let state = PairlinkState::new(manager.clone(), auth);
        let router = routes::router(state).layer(
            ServiceBuilder::new()
                .layer(SetRequestIdLayer::x_request_id(MakeRequestUuid))
                .layer(TraceLayer::new_for_http())
                .layer(PropagateRequestIdLayer::x_request_id()),
        );
        Self { manager, router }
    }

    /// Mount extra routes next to the session API.
    pub fn use_router(mut self, path: &str, router: Router<()>) -> Self {
        self.router = self.router.nest(path, router);
        self
    }

    pub async fn listen<A>(self, addr: A) -> anyhow::Result<()>
    where
        A: ToSocketAddrs,
    {
        self.listen_until(addr, std::future::pending()).await
    }

    /// Serve until `shutdown` resolves, then destroy every live client
    /// while keeping stored sessions for the next start.
    pub async fn listen_until<A, F>(self, addr: A, shutdown: F) -> anyhow::Result<()>
    where
        A: ToSocketAddrs,
        F: Future<Output = ()> + Send + 'static,
    {
        let listener = TcpListener::bind(addr).await?;
        info!(addr = %listener.local_addr()?, "listening");
        axum::serve(listener, self.router)
            .with_graceful_shutdown(shutdown)
            .await?;
        self.manager.shutdown().await;
        Ok(())
    }
}
