//! Session Store (C3): server-side session records with TTL, backed by a
//! pluggable in-memory or remote KV store. Both backends must expose an
//! identical observable contract (§4.3).

use async_trait::async_trait;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use uuid::Uuid;

use crate::error::{Result, StorageError};

/// A server-side authenticated user session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionData {
    /// Opaque session identifier.
    pub session_id: String,
    /// Identity-provider subject.
    pub user_id: String,
    /// User's email, as reported by the IdP.
    pub email: String,
    /// Display name.
    pub display_name: String,
    /// Raw IdP groups.
    pub groups: Vec<String>,
    /// Roles derived from `groups` via the configured mapping.
    pub roles: Vec<String>,
    /// The OIDC provider name this session was created through.
    pub provider: String,
    /// Creation time.
    pub created_at: DateTime<Utc>,
    /// Last time this session was touched by a successful `get`.
    pub last_accessed: DateTime<Utc>,
    /// Expiry time. Invariant: `expires_at > created_at`.
    pub expires_at: DateTime<Utc>,
}

impl SessionData {
    /// Whether this session is still valid, i.e. `now < expires_at`.
    #[must_use]
    pub fn is_valid(&self, now: DateTime<Utc>) -> bool {
        now < self.expires_at
    }

    /// Whether `roles` intersects this session's role set.
    #[must_use]
    pub fn has_any_role(&self, roles: &[&str]) -> bool {
        roles.iter().any(|r| self.roles.iter().any(|sr| sr == r))
    }
}

/// A small health summary returned by [`SessionStore::health`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionStoreHealth {
    /// Number of currently active (non-expired) sessions.
    pub active_sessions: u64,
    /// Name of the storage backend in use (`"memory"`, `"redis"`, ...).
    pub storage_backend: String,
    /// Age in seconds of the oldest active session, if any exist.
    pub oldest_session_age_s: Option<i64>,
}

/// The Session Store's operations (C3).
#[async_trait]
pub trait SessionStore: Send + Sync {
    /// Create a new session with the given TTL and return its id.
    async fn create(
        &self,
        user_id: &str,
        email: &str,
        name: &str,
        groups: Vec<String>,
        roles: Vec<String>,
        provider: &str,
        ttl: ChronoDuration,
    ) -> Result<String>;

    /// Fetch a session by id. Expired sessions are deleted and `None` is
    /// returned. Every successful fetch refreshes `last_accessed`.
    async fn get(&self, session_id: &str) -> Result<Option<SessionData>>;

    /// Delete a session outright. Returns whether it existed.
    async fn delete(&self, session_id: &str) -> Result<bool>;

    /// Push a session's expiry forward by `extra` (default TTL if `None`).
    async fn extend(&self, session_id: &str, extra: Option<ChronoDuration>) -> Result<bool>;

    /// Count currently active sessions.
    async fn count_active(&self) -> Result<u64>;

    /// Delete all expired sessions and return how many were removed.
    async fn cleanup_expired(&self) -> Result<u64>;

    /// A small operational health report.
    async fn health(&self) -> Result<SessionStoreHealth>;
}

/// Default in-memory [`SessionStore`] backend.
pub struct InMemorySessionStore {
    sessions: dashmap::DashMap<String, SessionData>,
    default_ttl: ChronoDuration,
}

impl InMemorySessionStore {
    /// A new store with the given default session TTL.
    #[must_use]
    pub fn new(default_ttl: ChronoDuration) -> Self {
        Self {
            sessions: dashmap::DashMap::new(),
            default_ttl,
        }
    }
}

#[async_trait]
impl SessionStore for InMemorySessionStore {
    async fn create(
        &self,
        user_id: &str,
        email: &str,
        name: &str,
        groups: Vec<String>,
        roles: Vec<String>,
        provider: &str,
        ttl: ChronoDuration,
    ) -> Result<String> {
        let now = Utc::now();
        let session_id = Uuid::new_v4().to_string();
        let session = SessionData {
            session_id: session_id.clone(),
            user_id: user_id.to_string(),
            email: email.to_string(),
            display_name: name.to_string(),
            groups,
            roles,
            provider: provider.to_string(),
            created_at: now,
            last_accessed: now,
            expires_at: now + ttl,
        };
        self.sessions.insert(session_id.clone(), session);
        tracing::info!(%session_id, %email, "session created");
        Ok(session_id)
    }

    async fn get(&self, session_id: &str) -> Result<Option<SessionData>> {
        let now = Utc::now();
        let Some(mut entry) = self.sessions.get_mut(session_id) else {
            return Ok(None);
        };
        if !entry.is_valid(now) {
            drop(entry);
            self.sessions.remove(session_id);
            tracing::info!(%session_id, "session expired on access");
            return Ok(None);
        }
        entry.last_accessed = now;
        Ok(Some(entry.clone()))
    }

    async fn delete(&self, session_id: &str) -> Result<bool> {
        Ok(self.sessions.remove(session_id).is_some())
    }

    async fn extend(&self, session_id: &str, extra: Option<ChronoDuration>) -> Result<bool> {
        let Some(mut entry) = self.sessions.get_mut(session_id) else {
            return Ok(false);
        };
        entry.expires_at += extra.unwrap_or(self.default_ttl);
        Ok(true)
    }

    async fn count_active(&self) -> Result<u64> {
        let now = Utc::now();
        Ok(self.sessions.iter().filter(|e| e.is_valid(now)).count() as u64)
    }

    async fn cleanup_expired(&self) -> Result<u64> {
        let now = Utc::now();
        let expired: Vec<String> = self
            .sessions
            .iter()
            .filter(|e| !e.is_valid(now))
            .map(|e| e.key().clone())
            .collect();
        let count = expired.len() as u64;
        for id in expired {
            self.sessions.remove(&id);
        }
        Ok(count)
    }

    async fn health(&self) -> Result<SessionStoreHealth> {
        let now = Utc::now();
        let active: Vec<_> = self.sessions.iter().filter(|e| e.is_valid(now)).collect();
        let oldest = active
            .iter()
            .map(|e| (now - e.created_at).num_seconds())
            .max();
        Ok(SessionStoreHealth {
            active_sessions: active.len() as u64,
            storage_backend: "memory".to_string(),
            oldest_session_age_s: oldest,
        })
    }
}

#[cfg(feature = "redis-sessions")]
pub mod redis_backend {
    //! Remote-KV [`SessionStore`] backend over Redis, with per-key TTL
    //! slightly exceeding the session TTL, using `redis` with
    //! `tokio-comp`/`connection-manager`.

    use super::{SessionData, SessionStore, SessionStoreHealth};
    use crate::error::{Error, Result, StorageError};
    use async_trait::async_trait;
    use chrono::{Duration as ChronoDuration, Utc};
    use redis::aio::ConnectionManager;
    use redis::AsyncCommands;
    use uuid::Uuid;

    /// Extra slack added on top of the session TTL for the Redis key TTL,
    /// so the key never expires strictly before the session's logical
    /// `expires_at` (clock skew tolerance).
    const TTL_SLACK_SECONDS: i64 = 30;

    /// Redis-backed session store.
    pub struct RedisSessionStore {
        conn: ConnectionManager,
        default_ttl: ChronoDuration,
        key_prefix: String,
    }

    impl RedisSessionStore {
        /// Connect to `redis_url` and use `key_prefix` for all keys.
        pub async fn connect(redis_url: &str, key_prefix: impl Into<String>, default_ttl: ChronoDuration) -> Result<Self> {
            let client = redis::Client::open(redis_url)
                .map_err(|e| Error::Storage(StorageError::Backend { backend: "redis".into(), detail: e.to_string() }))?;
            let conn = client
                .get_connection_manager()
                .await
                .map_err(|e| Error::Storage(StorageError::Backend { backend: "redis".into(), detail: e.to_string() }))?;
            Ok(Self {
                conn,
                default_ttl,
                key_prefix: key_prefix.into(),
            })
        }

        fn key(&self, session_id: &str) -> String {
            format!("{}:{}", self.key_prefix, session_id)
        }
    }

    #[async_trait]
    impl SessionStore for RedisSessionStore {
        async fn create(
            &self,
            user_id: &str,
            email: &str,
            name: &str,
            groups: Vec<String>,
            roles: Vec<String>,
            provider: &str,
            ttl: ChronoDuration,
        ) -> Result<String> {
            let now = Utc::now();
            let session_id = Uuid::new_v4().to_string();
            let session = SessionData {
                session_id: session_id.clone(),
                user_id: user_id.to_string(),
                email: email.to_string(),
                display_name: name.to_string(),
                groups,
                roles,
                provider: provider.to_string(),
                created_at: now,
                last_accessed: now,
                expires_at: now + ttl,
            };
            let payload = serde_json::to_string(&session)
                .map_err(|e| Error::Storage(StorageError::Backend { backend: "redis".into(), detail: e.to_string() }))?;
            let mut conn = self.conn.clone();
            let ttl_s = (ttl.num_seconds() + TTL_SLACK_SECONDS).max(1) as u64;
            conn.set_ex::<_, _, ()>(self.key(&session_id), payload, ttl_s)
                .await
                .map_err(|e| Error::Storage(StorageError::Backend { backend: "redis".into(), detail: e.to_string() }))?;
            Ok(session_id)
        }

        async fn get(&self, session_id: &str) -> Result<Option<SessionData>> {
            let mut conn = self.conn.clone();
            let raw: Option<String> = conn
                .get(self.key(session_id))
                .await
                .map_err(|e| Error::Storage(StorageError::Backend { backend: "redis".into(), detail: e.to_string() }))?;
            let Some(raw) = raw else { return Ok(None) };
            let mut session: SessionData = serde_json::from_str(&raw)
                .map_err(|e| Error::Storage(StorageError::Backend { backend: "redis".into(), detail: e.to_string() }))?;

            let now = Utc::now();
            if !session.is_valid(now) {
                let _: () = conn
                    .del(self.key(session_id))
                    .await
                    .map_err(|e| Error::Storage(StorageError::Backend { backend: "redis".into(), detail: e.to_string() }))?;
                return Ok(None);
            }

            session.last_accessed = now;
            let payload = serde_json::to_string(&session)
                .map_err(|e| Error::Storage(StorageError::Backend { backend: "redis".into(), detail: e.to_string() }))?;
            let remaining = (session.expires_at - now).num_seconds() + TTL_SLACK_SECONDS;
            let _: () = conn
                .set_ex(self.key(session_id), payload, remaining.max(1) as u64)
                .await
                .map_err(|e| Error::Storage(StorageError::Backend { backend: "redis".into(), detail: e.to_string() }))?;
            Ok(Some(session))
        }

        async fn delete(&self, session_id: &str) -> Result<bool> {
            let mut conn = self.conn.clone();
            let removed: i64 = conn
                .del(self.key(session_id))
                .await
                .map_err(|e| Error::Storage(StorageError::Backend { backend: "redis".into(), detail: e.to_string() }))?;
            Ok(removed > 0)
        }

        async fn extend(&self, session_id: &str, extra: Option<ChronoDuration>) -> Result<bool> {
            let Some(mut session) = self.get(session_id).await? else {
                return Ok(false);
            };
            session.expires_at += extra.unwrap_or(self.default_ttl);
            let payload = serde_json::to_string(&session)
                .map_err(|e| Error::Storage(StorageError::Backend { backend: "redis".into(), detail: e.to_string() }))?;
            let mut conn = self.conn.clone();
            let ttl_s = ((session.expires_at - Utc::now()).num_seconds() + TTL_SLACK_SECONDS).max(1) as u64;
            conn.set_ex::<_, _, ()>(self.key(session_id), payload, ttl_s)
                .await
                .map_err(|e| Error::Storage(StorageError::Backend { backend: "redis".into(), detail: e.to_string() }))?;
            Ok(true)
        }

        async fn count_active(&self) -> Result<u64> {
            // Redis TTL already excludes expired keys; a SCAN over the
            // prefix approximates the active count without a secondary index.
            let mut conn = self.conn.clone();
            let pattern = format!("{}:*", self.key_prefix);
            let keys: Vec<String> = conn
                .keys(pattern)
                .await
                .map_err(|e| Error::Storage(StorageError::Backend { backend: "redis".into(), detail: e.to_string() }))?;
            Ok(keys.len() as u64)
        }

        async fn cleanup_expired(&self) -> Result<u64> {
            // Redis expires keys lazily/actively on its own; the core has
            // no observable expired entries to sweep beyond what TTL does.
            Ok(0)
        }

        async fn health(&self) -> Result<SessionStoreHealth> {
            Ok(SessionStoreHealth {
                active_sessions: self.count_active().await?,
                storage_backend: "redis".to_string(),
                oldest_session_age_s: None,
            })
        }
    }
}

/// Convenience wrapper used by tests and simple callers that don't need a
/// custom TTL per call.
pub async fn create_default(
    store: &dyn SessionStore,
    user_id: &str,
    email: &str,
    name: &str,
    groups: Vec<String>,
    roles: Vec<String>,
    provider: &str,
) -> Result<String> {
    store
        .create(user_id, email, name, groups, roles, provider, ChronoDuration::hours(8))
        .await
}
