//! HTTP route handlers, organized by resource: `auth` plus a health check.

pub mod auth;
pub mod health;

use axum::{middleware, Router};

use crate::middleware as mw;
use crate::state::AppState;

/// Build the complete router: auth routes, health, and the shared
/// middleware stack (request id, session extraction, CORS).
///
/// Layers apply innermost-first in source order once added after
/// `with_state`, so `session_middleware` (which needs to run before a
/// handler can see `AuthenticatedSession`) is added last and therefore
/// runs first.
#[must_use]
pub fn build_router(state: AppState) -> Router {
    let routes = Router::new()
        .merge(auth::routes())
        .merge(health::routes())
        .with_state(state.clone());

    routes
        .layer(middleware::from_fn(mw::request_id_middleware))
        .layer(middleware::from_fn_with_state(state.clone(), mw::cors_middleware))
        .layer(middleware::from_fn_with_state(state, mw::session_middleware))
}
