//! Request Auth Gate (C5): per-request session validation, public-route
//! allowlist, and role checks.

use std::sync::Arc;

use crate::error::{AuthGateError, Error, Result};
use crate::session::{SessionData, SessionStore};

const EXACT_ALLOWLIST: &[&str] = &[
    "/health",
    "/auth/login",
    "/auth/callback",
    "/auth/health",
    "/docs",
    "/openapi.json",
    "/favicon.ico",
];

const PREFIX_ALLOWLIST: &[&str] = &["/auth/", "/static/", "/assets/"];

/// Whether `path` is reachable without a session.
#[must_use]
pub fn is_public_route(path: &str) -> bool {
    EXACT_ALLOWLIST.contains(&path) || PREFIX_ALLOWLIST.iter().any(|p| path.starts_with(p))
}

/// Operating mode for the gate: `Strict` for production/enterprise routes,
/// `Optional` for routes that should work with or without a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GateMode {
    /// Session required; failures raise typed errors.
    Strict,
    /// Session used if present; absence is not an error.
    Optional,
}

/// Where an incoming request carried its session id.
#[derive(Debug, Clone)]
pub struct SessionCarrier<'a> {
    /// The `ceneca_session` cookie value, if present.
    pub cookie: Option<&'a str>,
    /// The `Authorization: Bearer <session_id>` header value, if present.
    pub bearer: Option<&'a str>,
}

impl<'a> SessionCarrier<'a> {
    /// Extraction order: cookie first, then bearer header (§4.5).
    #[must_use]
    pub fn session_id(&self) -> Option<&'a str> {
        self.cookie.or(self.bearer)
    }
}

/// Validates sessions for incoming requests.
pub struct RequestAuthGate {
    sessions: Option<Arc<dyn SessionStore>>,
    initialized: bool,
}

impl RequestAuthGate {
    /// A gate with auth disabled: every `authenticate` call in `Strict` mode
    /// fails `ServiceUnavailable`.
    #[must_use]
    pub fn disabled() -> Self {
        Self {
            sessions: None,
            initialized: false,
        }
    }

    /// A gate backed by a live session store.
    #[must_use]
    pub fn new(sessions: Arc<dyn SessionStore>) -> Self {
        Self {
            sessions: Some(sessions),
            initialized: true,
        }
    }

    /// Validate a request's session per §4.5's state table.
    pub async fn authenticate(&self, mode: GateMode, carrier: &SessionCarrier<'_>) -> Result<Option<SessionData>> {
        if !self.initialized || self.sessions.is_none() {
            return match mode {
                GateMode::Strict => Err(Error::AuthGate(AuthGateError::ServiceUnavailable)),
                GateMode::Optional => Ok(None),
            };
        }
        let sessions = self.sessions.as_ref().unwrap_or_else(|| unreachable!("checked above"));

        let Some(session_id) = carrier.session_id() else {
            return match mode {
                GateMode::Strict => Err(Error::AuthGate(AuthGateError::Unauthorized)),
                GateMode::Optional => Ok(None),
            };
        };

        match sessions.get(session_id).await? {
            Some(session) => Ok(Some(session)),
            None => match mode {
                GateMode::Strict => {
                    // The session id the caller presented is stale; best
                    // effort delete in case the store still has a record
                    // under some alternate key (defensive; get() already
                    // removes on expiry).
                    let _ = sessions.delete(session_id).await;
                    Err(Error::AuthGate(AuthGateError::Unauthorized))
                }
                GateMode::Optional => Ok(None),
            },
        }
    }

    /// `require_role(roles)`: passes iff the session has at least one of
    /// `roles`.
    pub fn require_role(session: &SessionData, roles: &[&str]) -> Result<()> {
        if session.has_any_role(roles) {
            Ok(())
        } else {
            Err(Error::AuthGate(AuthGateError::Forbidden(
                roles.iter().map(|r| r.to_string()).collect(),
            )))
        }
    }

    /// `require_admin` is `require_role(["admin"])`.
    pub fn require_admin(session: &SessionData) -> Result<()> {
        Self::require_role(session, &["admin"])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::InMemorySessionStore;
    use chrono::Duration;

    #[tokio::test]
    async fn strict_mode_without_session_id_is_unauthorized() {
        let gate = RequestAuthGate::new(Arc::new(InMemorySessionStore::new(Duration::hours(1))));
        let carrier = SessionCarrier { cookie: None, bearer: None };
        let err = gate.authenticate(GateMode::Strict, &carrier).await.unwrap_err();
        assert!(matches!(err, Error::AuthGate(AuthGateError::Unauthorized)));
    }

    #[tokio::test]
    async fn optional_mode_without_session_id_returns_none() {
        let gate = RequestAuthGate::new(Arc::new(InMemorySessionStore::new(Duration::hours(1))));
        let carrier = SessionCarrier { cookie: None, bearer: None };
        assert!(gate.authenticate(GateMode::Optional, &carrier).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn disabled_gate_in_strict_mode_is_service_unavailable() {
        let gate = RequestAuthGate::disabled();
        let carrier = SessionCarrier { cookie: Some("anything"), bearer: None };
        let err = gate.authenticate(GateMode::Strict, &carrier).await.unwrap_err();
        assert!(matches!(err, Error::AuthGate(AuthGateError::ServiceUnavailable)));
    }

    #[tokio::test]
    async fn valid_session_is_returned() {
        let store = Arc::new(InMemorySessionStore::new(Duration::hours(1)));
        let session_id = store
            .create("u1", "a@b.com", "A", vec![], vec!["user".into()], "okta", Duration::hours(1))
            .await
            .unwrap();
        let gate = RequestAuthGate::new(store);
        let carrier = SessionCarrier { cookie: Some(&session_id), bearer: None };
        let session = gate.authenticate(GateMode::Strict, &carrier).await.unwrap();
        assert_eq!(session.unwrap().session_id, session_id);
    }

    #[tokio::test]
    async fn cookie_takes_precedence_over_bearer() {
        let store = Arc::new(InMemorySessionStore::new(Duration::hours(1)));
        let cookie_id = store
            .create("u1", "a@b.com", "A", vec![], vec![], "okta", Duration::hours(1))
            .await
            .unwrap();
        let carrier = SessionCarrier {
            cookie: Some(&cookie_id),
            bearer: Some("some-other-id"),
        };
        assert_eq!(carrier.session_id(), Some(cookie_id.as_str()));
    }

    #[test]
    fn public_route_matching() {
        assert!(is_public_route("/health"));
        assert!(is_public_route("/auth/login"));
        assert!(is_public_route("/auth/anything/else"));
        assert!(is_public_route("/static/app.js"));
        assert!(!is_public_route("/api/v1/query"));
    }

    #[test]
    fn require_role_checks_intersection() {
        let session = SessionData {
            session_id: "s".into(),
            user_id: "u".into(),
            email: "e".into(),
            display_name: "d".into(),
            groups: vec![],
            roles: vec!["user".into()],
            provider: "okta".into(),
            created_at: chrono::Utc::now(),
            last_accessed: chrono::Utc::now(),
            expires_at: chrono::Utc::now() + Duration::hours(1),
        };
        assert!(RequestAuthGate::require_role(&session, &["user", "admin"]).is_ok());
        assert!(RequestAuthGate::require_admin(&session).is_err());
    }
}
