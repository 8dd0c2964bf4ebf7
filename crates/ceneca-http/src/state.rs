//! Shared application state for all HTTP handlers.

use std::sync::Arc;

use ceneca_core::auth_gate::RequestAuthGate;
use ceneca_core::config::AppConfig;
use ceneca_core::error::{ConfigError, Error as CoreError, Result as CoreResult};
use ceneca_core::oidc::OidcHandler;
use ceneca_core::session::{InMemorySessionStore, SessionStore};

/// The session cookie's fixed name.
pub const SESSION_COOKIE_NAME: &str = "ceneca_session";

/// Server-level knobs not sourced from `AppConfig` (bind address, TLS mode).
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Base URL the front end is served from, used to build redirect targets.
    pub frontend_base_url: String,
    /// Whether the server is running in production (sets the `Secure`
    /// cookie attribute and forbids a wildcard CORS origin).
    pub production: bool,
    /// Maximum request body size in bytes.
    pub max_body_size: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            frontend_base_url: "http://localhost:3000".to_string(),
            production: false,
            max_body_size: 2 * 1024 * 1024,
        }
    }
}

/// Shared state for all HTTP handlers: the auth stack (§4.3-4.5), nothing
/// else. A surrounding binary layers its own state for query/data endpoints
/// on top of this.
#[derive(Clone)]
pub struct AppState {
    /// Server-side session records (C3).
    pub sessions: Arc<dyn SessionStore>,
    /// OIDC handler (C4), present only when `sso.enabled = true`.
    pub oidc: Option<Arc<OidcHandler>>,
    /// Request auth gate (C5): strict when OIDC is configured, disabled
    /// otherwise (so `GateMode::Strict` calls surface `ServiceUnavailable`
    /// rather than silently granting access).
    pub auth_gate: Arc<RequestAuthGate>,
    /// Loaded application config.
    pub config: Arc<AppConfig>,
    /// HTTP-layer-only settings.
    pub server: Arc<ServerConfig>,
}

impl AppState {
    /// Build state from a loaded [`AppConfig`], wiring the OIDC handler only
    /// when SSO is enabled (§6: `sso.enabled`).
    #[must_use]
    pub fn new(config: AppConfig, server: ServerConfig) -> Self {
        let sessions: Arc<dyn SessionStore> = Arc::new(InMemorySessionStore::new(config.session_ttl()));
        let oidc = config.sso.oidc.clone().map(|oidc_config| {
            Arc::new(OidcHandler::new(
                oidc_config,
                Arc::clone(&sessions),
                config.role_mappings(),
                config.session_ttl(),
            ))
        });
        let auth_gate = if config.sso.enabled {
            Arc::new(RequestAuthGate::new(Arc::clone(&sessions)))
        } else {
            Arc::new(RequestAuthGate::disabled())
        };
        Self {
            sessions,
            oidc,
            auth_gate,
            config: Arc::new(config),
            server: Arc::new(server),
        }
    }

    /// A state with SSO disabled and an in-memory session store, for tests
    /// and local development without an IdP.
    #[must_use]
    pub fn disabled() -> Self {
        Self::new(
            AppConfig {
                sso: ceneca_core::config::SsoConfig::default(),
                role_mappings: Default::default(),
                session_timeout_s: 8 * 3600,
                session_secret: None,
            },
            ServerConfig::default(),
        )
    }

    /// Build state directly from a YAML config document.
    pub fn from_yaml(yaml: &str, server: ServerConfig) -> CoreResult<Self> {
        Ok(Self::new(AppConfig::load(yaml)?, server))
    }

    /// Whether SSO is configured and the OIDC handler is available.
    #[must_use]
    pub fn sso_enabled(&self) -> bool {
        self.config.sso.enabled && self.oidc.is_some()
    }

    /// The OIDC handler, or a [`ConfigError`] if SSO is not enabled.
    pub fn require_oidc(&self) -> CoreResult<&Arc<OidcHandler>> {
        self.oidc
            .as_ref()
            .ok_or_else(|| CoreError::Config(ConfigError::MissingKey("sso.oidc".to_string())))
    }

    /// The URL a client should be sent to in order to (re-)authenticate.
    #[must_use]
    pub fn login_url(&self) -> String {
        format!("{}/auth/login", self.server.frontend_base_url.trim_end_matches('/'))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn disabled_state_has_no_oidc_handler() {
        let state = AppState::disabled();
        assert!(!state.sso_enabled());
        assert!(state.require_oidc().is_err());
    }
}
