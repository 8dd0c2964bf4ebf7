//! `/health` — basic liveness check, outside the `/auth/*` surface but on
//! the public allowlist (§4.5).

use axum::{routing::get, Json, Router};
use serde::Serialize;

use crate::state::AppState;

/// Health routes at the root.
#[must_use]
pub fn routes() -> Router<AppState> {
    Router::new().route("/health", get(health_check))
}

#[derive(Serialize)]
struct HealthStatus {
    status: &'static str,
    timestamp: chrono::DateTime<chrono::Utc>,
}

async fn health_check() -> Json<HealthStatus> {
    Json(HealthStatus {
        status: "healthy",
        timestamp: chrono::Utc::now(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn health_check_reports_healthy() {
        let Json(status) = health_check().await;
        assert_eq!(status.status, "healthy");
    }
}
