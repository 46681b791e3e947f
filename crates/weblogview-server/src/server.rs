//! Viewer server implementation.

use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;

use tokio::net::TcpListener;
use tracing::info;

use crate::config::ServerConfig;
use crate::error::ServerError;
use crate::routes::create_router;
use crate::settings::SettingsStore;
use crate::state::AppState;

/// HTTP and WebSocket server for the log viewer.
#[derive(Clone)]
pub struct WebLogViewServer {
    state: Arc<AppState>,
}

impl WebLogViewServer {
    #[must_use]
    pub fn new(config: ServerConfig, settings: Arc<SettingsStore>) -> Self {
        Self::from_state(AppState::new(config, settings))
    }

    /// Wrap prepared state, e.g. one with a replaced source factory
    #[must_use]
    pub fn from_state(state: AppState) -> Self {
        Self {
            state: Arc::new(state),
        }
    }

    #[must_use]
    pub fn state(&self) -> Arc<AppState> {
        Arc::clone(&self.state)
    }

    /// Create the router without starting the server.
    pub fn router(&self) -> axum::Router {
        create_router(Arc::clone(&self.state))
    }

    /// Validate the configuration and bind the listening socket
    pub async fn bind(&self) -> Result<TcpListener, ServerError> {
        let config = self.state.config();
        config.validate()?;

        let addr = config.bind_addr();
        TcpListener::bind(&addr)
            .await
            .map_err(|source| ServerError::Bind { addr, source })
    }

    /// Serve until `shutdown` completes, then end every open session.
    pub async fn serve<F>(&self, listener: TcpListener, shutdown: F) -> Result<(), ServerError>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let local = listener.local_addr()?;
        info!(addr = %local, "Server listening");

        let registry = Arc::clone(self.state.registry());
        let router = self.router();

        axum::serve(
            listener,
            router.into_make_service_with_connect_info::<SocketAddr>(),
        )
        .with_graceful_shutdown(async move {
            shutdown.await;
            let closed = registry.shutdown_all();
            info!(sessions = closed, "Shutting down");
        })
        .await?;

        info!("Server stopped");
        Ok(())
    }
}
