//! Translates [`ceneca_core::Error`] into HTTP responses.
//!
//! Every error body is a [`ceneca_core::error::UserFacingError`] (§7: code,
//! message, `recoverable`, optional `login_url`) so the front end never has
//! to special-case transport vs. domain failures.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use ceneca_core::error::{AuthGateError, Error as CoreError};

/// Wraps a [`CoreError`] with the login URL to attach to auth failures.
pub struct ApiError {
    inner: CoreError,
    login_url: Option<String>,
}

impl ApiError {
    /// Wrap a core error with no login URL to offer.
    #[must_use]
    pub fn new(inner: CoreError) -> Self {
        Self { inner, login_url: None }
    }

    /// Wrap a core error, attaching `login_url` for auth-shaped failures.
    #[must_use]
    pub fn with_login_url(inner: CoreError, login_url: impl Into<String>) -> Self {
        Self {
            inner,
            login_url: Some(login_url.into()),
        }
    }
}

impl From<CoreError> for ApiError {
    fn from(inner: CoreError) -> Self {
        Self::new(inner)
    }
}

fn status_for(err: &CoreError) -> StatusCode {
    match err {
        CoreError::Config(_) => StatusCode::INTERNAL_SERVER_ERROR,
        CoreError::Storage(_) => StatusCode::INTERNAL_SERVER_ERROR,
        CoreError::Adapter(_) => StatusCode::BAD_GATEWAY,
        CoreError::Plan(_) => StatusCode::UNPROCESSABLE_ENTITY,
        CoreError::Execution(_) => StatusCode::UNPROCESSABLE_ENTITY,
        CoreError::AuthFlow(_) => StatusCode::BAD_REQUEST,
        CoreError::AuthGate(AuthGateError::Unauthorized) => StatusCode::UNAUTHORIZED,
        CoreError::AuthGate(AuthGateError::ServiceUnavailable) => StatusCode::SERVICE_UNAVAILABLE,
        CoreError::AuthGate(AuthGateError::Forbidden(_)) => StatusCode::FORBIDDEN,
        CoreError::CircuitOpen { .. } => StatusCode::SERVICE_UNAVAILABLE,
        CoreError::Deadline(_) => StatusCode::GATEWAY_TIMEOUT,
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = status_for(&self.inner);
        if status.is_server_error() {
            tracing::error!(error = %self.inner, "request failed");
        } else {
            tracing::warn!(error = %self.inner, "request rejected");
        }
        let body = self.inner.to_user_facing(self.login_url.as_deref());
        (status, Json(body)).into_response()
    }
}
