//! The HTTP server binary wrapper: binds a listener, builds the router, and
//! runs it, split into a reusable `ApiServer` plus its bind-time `ApiConfig`.

use std::net::SocketAddr;

use axum::Router;
use tokio::net::TcpListener;
use tower_http::limit::RequestBodyLimitLayer;

use ceneca_core::error::{ConfigError, Error as CoreError, Result as CoreResult};

use crate::routes;
use crate::state::AppState;

/// Server bind configuration.
#[derive(Debug, Clone)]
pub struct ApiConfig {
    /// Address to bind to.
    pub bind_addr: SocketAddr,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::from(([127, 0, 0, 1], 8080)),
        }
    }
}

impl ApiConfig {
    /// Override the bind port, keeping the configured host.
    #[must_use]
    pub fn with_port(mut self, port: u16) -> Self {
        self.bind_addr.set_port(port);
        self
    }
}

/// The running HTTP server: router plus bind config.
pub struct ApiServer {
    config: ApiConfig,
    state: AppState,
    router: Router,
}

impl ApiServer {
    /// Build a server from already-constructed state.
    #[must_use]
    pub fn new(state: AppState, config: ApiConfig) -> Self {
        let router = Self::build_router(&state, &config);
        Self { config, state, router }
    }

    fn build_router(state: &AppState, config: &ApiConfig) -> Router {
        routes::build_router(state.clone()).layer(RequestBodyLimitLayer::new(config_max_body_size(state)))
    }

    /// The bind address this server was configured with.
    #[must_use]
    pub fn addr(&self) -> SocketAddr {
        self.config.bind_addr
    }

    /// Application state, for tests that want to assert on it directly.
    #[must_use]
    pub fn state(&self) -> &AppState {
        &self.state
    }

    /// The built router, for tests exercising it with `tower::ServiceExt`.
    #[must_use]
    pub fn router(&self) -> Router {
        self.router.clone()
    }

    /// Bind and serve forever.
    pub async fn run(self) -> CoreResult<()> {
        let listener = TcpListener::bind(self.config.bind_addr).await.map_err(|e| {
            CoreError::Config(ConfigError::InvalidValue {
                key: "bind_addr".to_string(),
                detail: e.to_string(),
            })
        })?;
        tracing::info!(addr = %self.config.bind_addr, "ceneca-http listening");
        axum::serve(listener, self.router).await.map_err(|e| {
            CoreError::Config(ConfigError::InvalidValue {
                key: "server".to_string(),
                detail: e.to_string(),
            })
        })
    }

    /// Bind and serve until `shutdown_signal` resolves.
    pub async fn run_until<F>(self, shutdown_signal: F) -> CoreResult<()>
    where
        F: std::future::Future<Output = ()> + Send + 'static,
    {
        let listener = TcpListener::bind(self.config.bind_addr).await.map_err(|e| {
            CoreError::Config(ConfigError::InvalidValue {
                key: "bind_addr".to_string(),
                detail: e.to_string(),
            })
        })?;
        tracing::info!(addr = %self.config.bind_addr, "ceneca-http listening");
        axum::serve(listener, self.router)
            .with_graceful_shutdown(shutdown_signal)
            .await
            .map_err(|e| {
                CoreError::Config(ConfigError::InvalidValue {
                    key: "server".to_string(),
                    detail: e.to_string(),
                })
            })
    }
}

fn config_max_body_size(state: &AppState) -> usize {
    state.server.max_body_size
}

/// Run a server with default bind config over the given state.
pub async fn run_server(state: AppState) -> CoreResult<()> {
    ApiServer::new(state, ApiConfig::default()).run().await
}

/// Run a server on a specific port over the given state.
pub async fn run_server_on_port(state: AppState, port: u16) -> CoreResult<()> {
    ApiServer::new(state, ApiConfig::default().with_port(port)).run().await
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use tower::util::ServiceExt;

    #[tokio::test]
    async fn health_endpoint_is_reachable_without_a_session() {
        let server = ApiServer::new(AppState::disabled(), ApiConfig::default());
        let request = Request::builder().uri("/health").body(Body::empty()).unwrap();
        let response = server.router().oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn protected_route_without_session_is_rejected() {
        let server = ApiServer::new(AppState::disabled(), ApiConfig::default());
        let request = Request::builder().uri("/auth/user").body(Body::empty()).unwrap();
        let response = server.router().oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
    }
}
