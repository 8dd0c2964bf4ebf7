//! Axum HTTP surface for `ceneca-core`.
//!
//! Exposes the OIDC login/callback pair, session introspection/logout, and
//! the auth subsystem's health and admin routes. The core has no other HTTP
//! surface of its own — a surrounding binary wires in whatever query/data
//! endpoints it needs on top of [`state::AppState`].

pub mod cookies;
pub mod error;
pub mod middleware;
pub mod routes;
pub mod server;
pub mod state;

pub use error::ApiError;
pub use server::{run_server, run_server_on_port, ApiConfig, ApiServer};
pub use state::AppState;
