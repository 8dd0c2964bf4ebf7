//! Request-level middleware: session extraction for the public-route
//! allowlist (§4.5), request id tagging, and CORS.

use axum::extract::{Request, State};
use axum::http::{header, HeaderValue};
use axum::middleware::Next;
use axum::response::Response;
use axum_extra::extract::CookieJar;
use uuid::Uuid;

use ceneca_core::auth_gate::{is_public_route, GateMode, SessionCarrier};
use ceneca_core::session::SessionData;

use crate::state::{AppState, SESSION_COOKIE_NAME};

/// A validated session attached to request extensions by
/// [`session_middleware`]. Absent for anonymous requests on optional routes.
#[derive(Clone)]
pub struct AuthenticatedSession(pub SessionData);

/// Request id propagated end-to-end through the tracing middleware.
#[derive(Clone)]
pub struct RequestId(pub String);

/// Tag every request with an id, generating one if the caller didn't send
/// `x-request-id`.
pub async fn request_id_middleware(mut request: Request, next: Next) -> Response {
    let request_id = request
        .headers()
        .get("x-request-id")
        .and_then(|v| v.to_str().ok())
        .map(String::from)
        .unwrap_or_else(|| Uuid::new_v4().to_string());

    request.extensions_mut().insert(RequestId(request_id.clone()));
    let mut response = next.run(request).await;
    if let Ok(value) = HeaderValue::from_str(&request_id) {
        response.headers_mut().insert("x-request-id", value);
    }
    response
}

/// Extract and validate the session for every request per §4.5: public
/// routes run in [`GateMode::Optional`], everything else in
/// [`GateMode::Strict`]. On success (or a public miss) the session, if any,
/// is stashed in request extensions as [`AuthenticatedSession`]; handlers
/// that need the session pull it back out, auth-gate failures short-circuit
/// here as an [`crate::error::ApiError`] response.
pub async fn session_middleware(State(state): State<AppState>, mut request: Request, next: Next) -> Response {
    let path = request.uri().path().to_string();
    let mode = if is_public_route(&path) {
        GateMode::Optional
    } else {
        GateMode::Strict
    };

    let jar = CookieJar::from_headers(request.headers());
    let cookie = jar.get(SESSION_COOKIE_NAME).map(|c| c.value().to_string());
    let bearer = request
        .headers()
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .map(str::to_string);

    let carrier = SessionCarrier {
        cookie: cookie.as_deref(),
        bearer: bearer.as_deref(),
    };

    match state.auth_gate.authenticate(mode, &carrier).await {
        Ok(Some(session)) => {
            request.extensions_mut().insert(AuthenticatedSession(session));
            next.run(request).await
        }
        Ok(None) => next.run(request).await,
        Err(err) => {
            use axum::response::IntoResponse;
            crate::error::ApiError::with_login_url(err, state.login_url()).into_response()
        }
    }
}

/// Permissive CORS for the configured frontend origin; never falls back to
/// a wildcard.
pub async fn cors_middleware(State(state): State<AppState>, request: Request, next: Next) -> Response {
    let mut response = next.run(request).await;
    if let Ok(value) = HeaderValue::from_str(&state.server.frontend_base_url) {
        response
            .headers_mut()
            .insert(header::ACCESS_CONTROL_ALLOW_ORIGIN, value);
    }
    response.headers_mut().insert(
        header::ACCESS_CONTROL_ALLOW_CREDENTIALS,
        HeaderValue::from_static("true"),
    );
    response
}
