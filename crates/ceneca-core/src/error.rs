//! Error taxonomy for the orchestration core.
//!
//! Every variant here corresponds to one row of the error-kind table in the
//! core's design notes: startup/config failures are fatal, storage failures
//! are surfaced without in-request retry, adapter failures carry a
//! retryability flag, and auth/OIDC failures never leave a partial session
//! behind.

use thiserror::Error;

/// The top-level error type returned by every public `ceneca-core` API.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum Error {
    /// Invalid or missing required configuration. Fatal at startup.
    #[error("config error: {0}")]
    Config(#[from] ConfigError),

    /// A registry, session, or aggregator backing store failed.
    /// Not retried within the request that triggered it.
    #[error("storage error: {0}")]
    Storage(#[from] StorageError),

    /// A data-source adapter call failed.
    #[error("adapter error: {0}")]
    Adapter(#[from] AdapterError),

    /// The execution plan was rejected before any operation ran.
    #[error("plan error: {0}")]
    Plan(#[from] PlanError),

    /// Aggregation of per-operation results failed after results were
    /// already collected.
    #[error("execution error: {0}")]
    Execution(#[from] ExecutionError),

    /// OIDC authorization-code flow failures. Never leave a partial session.
    #[error("auth flow error: {0}")]
    AuthFlow(#[from] AuthFlowError),

    /// Request auth gate rejected the request outright.
    #[error("auth gate error: {0}")]
    AuthGate(#[from] AuthGateError),

    /// A provider's circuit breaker is open and no fallback remained.
    #[error("circuit open for provider: {provider}")]
    CircuitOpen {
        /// Name of the provider whose breaker tripped.
        provider: String,
    },

    /// The caller's deadline elapsed, or the caller cancelled the operation.
    #[error("{0}")]
    Deadline(#[from] DeadlineError),
}

/// Deadline-related failures: distinguished so callers can tell a slow
/// adapter from an explicit cancellation.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DeadlineError {
    /// The configured timeout elapsed before completion.
    #[error("operation timed out after {0:?}")]
    Timeout(std::time::Duration),
    /// The caller cancelled the operation before it completed.
    #[error("operation was cancelled")]
    Cancelled,
}

/// Fatal configuration problems, detected at startup.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ConfigError {
    /// A required key was absent from the loaded YAML/env configuration.
    #[error("missing required config key: {0}")]
    MissingKey(String),
    /// A present key had a value of the wrong shape or an invalid value.
    #[error("invalid config value for {key}: {detail}")]
    InvalidValue {
        /// The offending key.
        key: String,
        /// Why the value is invalid.
        detail: String,
    },
    /// SSO was enabled but required OIDC fields were not all present.
    #[error("sso.enabled=true but OIDC config is incomplete: {0}")]
    IncompleteOidc(String),
}

/// Backing-store failures for the registry, session store, or aggregator.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum StorageError {
    /// The underlying store (Postgres, Redis, filesystem) returned an error.
    #[error("backend error in {backend}: {detail}")]
    Backend {
        /// Which backend failed (e.g. "postgres", "redis", "memory", "file").
        backend: String,
        /// Backend-provided detail.
        detail: String,
    },
    /// The requested key/row was not found.
    #[error("not found: {0}")]
    NotFound(String),
    /// A uniqueness or foreign-key style constraint was violated.
    #[error("conflict: {0}")]
    Conflict(String),
}

/// Adapter (data-source driver) failure kinds, per the C2 contract.
#[derive(Debug, Error, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AdapterErrorKind {
    /// The adapter's call exceeded its deadline.
    #[error("timeout")]
    Timeout,
    /// The adapter could not establish or maintain a connection.
    #[error("connect")]
    Connect,
    /// The adapter's credentials were rejected.
    #[error("auth")]
    Auth,
    /// The request was malformed from the adapter's point of view.
    #[error("bad_request")]
    BadRequest,
    /// The requested resource does not exist at the source.
    #[error("not_found")]
    NotFound,
    /// The source's rate limiter rejected the call.
    #[error("rate_limited")]
    RateLimited,
    /// An unclassified internal failure inside the adapter.
    #[error("internal")]
    Internal,
}

impl AdapterErrorKind {
    /// Whether the scheduler should retry operations that fail with this
    /// kind, per §7: timeout/connect/rate_limited are retryable, the rest
    /// are not.
    #[must_use]
    pub fn retryable(&self) -> bool {
        matches!(
            self,
            AdapterErrorKind::Timeout | AdapterErrorKind::Connect | AdapterErrorKind::RateLimited
        )
    }
}

/// An error surfaced by a data-source adapter.
#[derive(Debug, Error, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[error("adapter error ({kind}): {detail}")]
pub struct AdapterError {
    /// The classified failure kind.
    pub kind: AdapterErrorKind,
    /// Human-readable detail from the adapter.
    pub detail: String,
}

impl AdapterError {
    /// Construct a new adapter error of the given kind.
    pub fn new(kind: AdapterErrorKind, detail: impl Into<String>) -> Self {
        Self {
            kind,
            detail: detail.into(),
        }
    }

    /// Whether the scheduler may retry an operation that failed this way.
    #[must_use]
    pub fn retryable(&self) -> bool {
        self.kind.retryable()
    }
}

/// Plan validation failures: surfaced before any operation is dispatched.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum PlanError {
    /// The operation DAG contains a cycle.
    #[error("plan contains a dependency cycle among operations: {0:?}")]
    Cycle(Vec<String>),
    /// An operation referenced a source kind/id unknown to the registry.
    #[error("unknown source referenced by operation {op_id}: {source_id}")]
    UnknownSource {
        /// Offending operation id.
        op_id: String,
        /// The unknown source id.
        source_id: String,
    },
    /// The plan had zero operations when at least one was required.
    #[error("plan is empty")]
    Empty,
}

/// Aggregation-stage failures, raised only after per-operation results have
/// already been collected.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ExecutionError {
    /// The final aggregation step failed to combine per-op results.
    #[error("aggregation failed: {0}")]
    AggregationFailed(String),
}

/// OIDC authorization-code + PKCE flow failures (§4.4).
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum AuthFlowError {
    /// The `state` on a callback was unknown, expired, or already consumed.
    #[error("callback error: {0}")]
    Callback(String),
    /// The token endpoint returned a non-success HTTP response.
    #[error("token exchange error: {0}")]
    TokenExchange(String),
    /// The ID token failed structural or claim validation.
    #[error("token validation error: {0}")]
    TokenValidation(String),
    /// A required identity claim (`sub`, `email`) was missing.
    #[error("identity error: {0}")]
    Identity(String),
}

/// Request auth gate rejections (§4.5).
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum AuthGateError {
    /// No session could be established for a route that requires one.
    #[error("unauthorized")]
    Unauthorized,
    /// The auth subsystem is disabled or not yet initialized.
    #[error("auth service unavailable")]
    ServiceUnavailable,
    /// The session lacked a role permitted on this route.
    #[error("forbidden: requires one of {0:?}")]
    Forbidden(Vec<String>),
}

/// A machine-readable, user-safe rendering of an [`Error`], per §7's
/// requirement that user-visible failures carry a code, a message, a
/// recoverability flag, and (for auth) a login URL.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct UserFacingError {
    /// Stable machine code, e.g. `"unauthorized"`, `"circuit_open"`.
    pub code: String,
    /// Human-readable message safe to show to an end user.
    pub message: String,
    /// Whether retrying the same request might succeed.
    pub recoverable: bool,
    /// Present only for auth-related failures: where to send the user to
    /// re-authenticate.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub login_url: Option<String>,
}

impl Error {
    /// Render this error for an API response, without leaking internals.
    #[must_use]
    pub fn to_user_facing(&self, login_url: Option<&str>) -> UserFacingError {
        let (code, recoverable) = match self {
            Error::Config(_) => ("config_error", false),
            Error::Storage(_) => ("storage_error", false),
            Error::Adapter(e) => ("adapter_error", e.retryable()),
            Error::Plan(_) => ("plan_error", false),
            Error::Execution(_) => ("execution_error", false),
            Error::AuthFlow(_) => ("auth_flow_error", false),
            Error::AuthGate(AuthGateError::Unauthorized) => ("unauthorized", true),
            Error::AuthGate(AuthGateError::ServiceUnavailable) => ("service_unavailable", true),
            Error::AuthGate(AuthGateError::Forbidden(_)) => ("forbidden", false),
            Error::CircuitOpen { .. } => ("circuit_open", true),
            Error::Deadline(DeadlineError::Timeout(_)) => ("timeout", true),
            Error::Deadline(DeadlineError::Cancelled) => ("cancelled", false),
        };
        UserFacingError {
            code: code.to_string(),
            message: self.to_string(),
            recoverable,
            login_url: if matches!(self, Error::AuthGate(_) | Error::AuthFlow(_)) {
                login_url.map(str::to_string)
            } else {
                None
            },
        }
    }
}

/// Convenience alias used throughout the crate.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn adapter_error_kind_retryability_matches_policy() {
        assert!(AdapterErrorKind::Timeout.retryable());
        assert!(AdapterErrorKind::Connect.retryable());
        assert!(AdapterErrorKind::RateLimited.retryable());
        assert!(!AdapterErrorKind::Auth.retryable());
        assert!(!AdapterErrorKind::BadRequest.retryable());
        assert!(!AdapterErrorKind::NotFound.retryable());
        assert!(!AdapterErrorKind::Internal.retryable());
    }

    #[test]
    fn unauthorized_is_user_facing_and_recoverable_with_login_url() {
        let err = Error::AuthGate(AuthGateError::Unauthorized);
        let uf = err.to_user_facing(Some("https://app.example/login"));
        assert_eq!(uf.code, "unauthorized");
        assert!(uf.recoverable);
        assert_eq!(uf.login_url.as_deref(), Some("https://app.example/login"));
    }

    #[test]
    fn storage_error_has_no_login_url() {
        let err = Error::Storage(StorageError::NotFound("x".into()));
        let uf = err.to_user_facing(Some("https://app.example/login"));
        assert!(uf.login_url.is_none());
    }
}
