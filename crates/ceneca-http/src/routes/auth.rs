//! `/auth/*` — the complete auth surface: login, callback, current
//! user, logout, health, and the two admin session endpoints.

use axum::extract::{Extension, Query, State};
use axum::http::{header, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use axum_extra::extract::CookieJar;
use serde::{Deserialize, Serialize};

use ceneca_core::auth_gate::RequestAuthGate;
use ceneca_core::error::{AuthFlowError, Error as CoreError};
use ceneca_core::session::SessionData;

use crate::cookies::{expired_session_cookie, session_cookie};
use crate::error::ApiError;
use crate::middleware::AuthenticatedSession;
use crate::state::{AppState, SESSION_COOKIE_NAME};

/// Auth routes.
#[must_use]
pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/auth/login", post(login))
        .route("/auth/callback", get(callback))
        .route("/auth/user", get(current_user))
        .route("/auth/logout", post(logout))
        .route("/auth/health", get(auth_health))
        .route("/auth/sessions", get(list_sessions))
        .route("/auth/sessions/cleanup", post(cleanup_sessions))
}

#[derive(Debug, Serialize)]
struct LoginResponse {
    authorization_url: String,
    state: String,
    message: &'static str,
}

/// `POST /auth/login` → starts the OIDC authorization-code + PKCE flow.
async fn login(State(state): State<AppState>) -> Result<Json<LoginResponse>, ApiError> {
    let oidc = state.require_oidc().map_err(ApiError::new)?;
    let start = oidc.login().await.map_err(ApiError::new)?;
    Ok(Json(LoginResponse {
        authorization_url: start.authorization_url,
        state: start.state,
        message: "Redirect the user agent to authorization_url to begin login.",
    }))
}

#[derive(Debug, Deserialize)]
struct CallbackParams {
    code: Option<String>,
    state: Option<String>,
    error: Option<String>,
    error_description: Option<String>,
}

/// `GET /auth/callback` → exchanges the code, validates the ID token,
/// provisions a session, and redirects the browser back to the front end.
/// Every failure path redirects with `auth_error=<kind>`; none creates a
/// partial session.
async fn callback(State(state): State<AppState>, Query(params): Query<CallbackParams>) -> Response {
    let frontend = state.server.frontend_base_url.trim_end_matches('/').to_string();

    if let Some(error) = params.error {
        tracing::warn!(%error, description = ?params.error_description, "idp returned an error on callback");
        return redirect_302(&format!("{frontend}/?auth_error={error}"));
    }

    let (Some(code), Some(callback_state)) = (params.code, params.state) else {
        return redirect_302(&format!("{frontend}/?auth_error=callback_error"));
    };

    let oidc = match state.require_oidc() {
        Ok(oidc) => oidc,
        Err(_) => return redirect_302(&format!("{frontend}/?auth_error=service_unavailable")),
    };

    match oidc.handle_callback(&code, &callback_state).await {
        Ok(result) => {
            let cookie = session_cookie(
                result.session_id,
                state.config.session_timeout_std(),
                state.server.production,
            );
            let jar = CookieJar::new().add(cookie);
            tracing::info!(email = %result.email, "login completed, redirecting to frontend");
            (jar, redirect_302(&frontend)).into_response()
        }
        Err(err) => {
            tracing::warn!(error = %err, "oidc callback failed");
            let code = auth_error_code(&err);
            redirect_302(&format!("{frontend}/?auth_error={code}"))
        }
    }
}

/// A `302 Found` redirect, as `/auth/callback` requires
/// (axum's [`axum::response::Redirect::to`] would send 303 instead).
fn redirect_302(location: &str) -> Response {
    let mut response = StatusCode::FOUND.into_response();
    if let Ok(value) = HeaderValue::from_str(location) {
        response.headers_mut().insert(header::LOCATION, value);
    }
    response
}

fn auth_error_code(err: &CoreError) -> &'static str {
    match err {
        CoreError::AuthFlow(AuthFlowError::Callback(_)) => "callback_error",
        CoreError::AuthFlow(AuthFlowError::TokenExchange(_)) => "token_exchange_error",
        CoreError::AuthFlow(AuthFlowError::TokenValidation(_)) => "token_validation_error",
        CoreError::AuthFlow(AuthFlowError::Identity(_)) => "identity_error",
        _ => "auth_error",
    }
}

/// `GET /auth/user` → the current session. The session-extraction
/// middleware has already enforced `GateMode::Strict` for this path, so a
/// missing extension here would be a wiring bug, not a client error.
async fn current_user(Extension(session): Extension<AuthenticatedSession>) -> Json<SessionData> {
    Json(session.0)
}

/// `POST /auth/logout` → clears the cookie and deletes the session.
async fn logout(State(state): State<AppState>, jar: CookieJar) -> Response {
    if let Some(cookie) = jar.get(SESSION_COOKIE_NAME) {
        let _ = state.sessions.delete(cookie.value()).await;
    }
    let jar = CookieJar::new().add(expired_session_cookie(state.server.production));
    (jar, StatusCode::NO_CONTENT).into_response()
}

#[derive(Debug, Serialize)]
struct AuthHealthResponse {
    status: &'static str,
    sso_enabled: bool,
    provider: String,
    session_manager: String,
    oidc_handler: &'static str,
    mode: &'static str,
}

/// `GET /auth/health` → auth subsystem health, always reachable regardless
/// of session state (§4.5 public allowlist).
async fn auth_health(State(state): State<AppState>) -> Json<AuthHealthResponse> {
    let provider = state
        .config
        .sso
        .oidc
        .as_ref()
        .map(|o| o.provider.clone())
        .unwrap_or_else(|| "none".to_string());

    let (status, session_manager) = match state.sessions.health().await {
        Ok(report) if state.sso_enabled() => ("healthy", report.storage_backend),
        Ok(report) => ("degraded", report.storage_backend),
        Err(_) => ("error", "unknown".to_string()),
    };

    Json(AuthHealthResponse {
        status,
        sso_enabled: state.sso_enabled(),
        provider,
        session_manager,
        oidc_handler: if state.oidc.is_some() { "configured" } else { "disabled" },
        mode: "enterprise",
    })
}

#[derive(Debug, Serialize)]
struct SessionsResponse {
    active_sessions: u64,
    storage_backend: String,
}

/// `GET /auth/sessions` (admin) → active session count and storage kind.
async fn list_sessions(
    State(state): State<AppState>,
    Extension(session): Extension<AuthenticatedSession>,
) -> Result<Json<SessionsResponse>, ApiError> {
    RequestAuthGate::require_admin(&session.0).map_err(ApiError::new)?;
    let health = state.sessions.health().await.map_err(ApiError::new)?;
    Ok(Json(SessionsResponse {
        active_sessions: health.active_sessions,
        storage_backend: health.storage_backend,
    }))
}

#[derive(Debug, Serialize)]
struct CleanupResponse {
    cleaned: u64,
}

/// `POST /auth/sessions/cleanup` (admin) → sweep expired sessions.
async fn cleanup_sessions(
    State(state): State<AppState>,
    Extension(session): Extension<AuthenticatedSession>,
) -> Result<Json<CleanupResponse>, ApiError> {
    RequestAuthGate::require_admin(&session.0).map_err(ApiError::new)?;
    let cleaned = state.sessions.cleanup_expired().await.map_err(ApiError::new)?;
    Ok(Json(CleanupResponse { cleaned }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::Request;
    use tower::ServiceExt;

    fn enabled_state() -> AppState {
        let yaml = r#"
sso:
  enabled: true
  oidc:
    provider: okta
    client_id: "client-1"
    client_secret: "secret-1"
    issuer: "https://idp.example.com"
    discovery_url: "https://idp.example.com/.well-known/openid-configuration"
    redirect_uri: "https://app.example.com/auth/callback"
    scopes: [openid, email]
    claims_mapping:
      email: email
      name: name
      groups: groups
role_mappings:
  engineering: admin
"#;
        crate::state::AppState::from_yaml(yaml, crate::state::ServerConfig::default()).unwrap()
    }

    #[tokio::test]
    async fn auth_health_reports_enterprise_mode() {
        let state = enabled_state();
        let response = auth_health(State(state)).await;
        assert_eq!(response.mode, "enterprise");
        assert!(response.sso_enabled);
        assert_eq!(response.oidc_handler, "configured");
    }

    #[tokio::test]
    async fn auth_health_degraded_when_sso_disabled() {
        let state = AppState::disabled();
        let response = auth_health(State(state)).await;
        assert_eq!(response.status, "degraded");
        assert!(!response.sso_enabled);
    }

    #[tokio::test]
    async fn login_fails_without_sso_configured() {
        let state = AppState::disabled();
        let result = login(State(state)).await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn user_route_requires_session() {
        let router = crate::routes::build_router(AppState::disabled());
        let request = Request::builder().uri("/auth/user").body(Body::empty()).unwrap();
        let response = router.oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
    }

    #[tokio::test]
    async fn callback_without_code_redirects_with_error() {
        let state = enabled_state();
        let response = callback(
            State(state),
            Query(CallbackParams {
                code: None,
                state: None,
                error: None,
                error_description: None,
            }),
        )
        .await;
        assert_eq!(response.status(), StatusCode::FOUND);
    }

    #[tokio::test]
    async fn callback_with_idp_error_redirects_with_auth_error() {
        let state = enabled_state();
        let response = callback(
            State(state),
            Query(CallbackParams {
                code: None,
                state: None,
                error: Some("access_denied".to_string()),
                error_description: None,
            }),
        )
        .await;
        assert_eq!(response.status(), StatusCode::FOUND);
        let location = response.headers().get("location").unwrap().to_str().unwrap();
        assert!(location.contains("auth_error=access_denied"));
    }
}
