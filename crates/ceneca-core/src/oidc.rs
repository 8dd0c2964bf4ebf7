//! OIDC Handler (C4): authorization-code + PKCE flow, ID-token parsing, and
//! group→role mapping.
//!
//! Modeled as an explicit state machine rather than exceptions-as-control-flow:
//! `Init → Pending → Exchanging → Validating → Provisioning → Done`, with
//! every failure mode a typed [`crate::error::AuthFlowError`] rather than a
//! generic error.
//!
//! Signature verification against JWKS is **not** performed here. The
//! provider's JWKS is fetched and cached for parity with a real deployment,
//! but claims are accepted without RS256/ES256 verification. This is a
//! flagged open item, not an oversight: a production deployment must add it
//! before accepting tokens from an untrusted network path.

use base64::Engine;
use chrono::Utc;
use parking_lot::Mutex;
use rand::RngCore;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::sync::Arc;

use crate::error::{AuthFlowError, Error, Result};
use crate::session::SessionStore;

const STATE_BYTES: usize = 32; // 256 bits
const VERIFIER_BYTES: usize = 96;
const NONCE_BYTES: usize = 32;

fn random_urlsafe(n_bytes: usize) -> String {
    let mut buf = vec![0u8; n_bytes];
    rand::thread_rng().fill_bytes(&mut buf);
    base64::engine::general_purpose::URL_SAFE_NO_PAD.encode(buf)
}

/// OIDC provider configuration, as read from the YAML config (§6).
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct OidcConfig {
    /// Provider name, e.g. `"okta"`.
    pub provider: String,
    /// OAuth client id.
    pub client_id: String,
    /// OAuth client secret.
    pub client_secret: String,
    /// Expected `iss` claim.
    pub issuer: String,
    /// Discovery document URL.
    pub discovery_url: String,
    /// Where the IdP redirects back to after login.
    pub redirect_uri: String,
    /// Requested OAuth scopes.
    pub scopes: Vec<String>,
    /// Claim name overrides for email/name/groups.
    pub claims_mapping: ClaimsMapping,
}

/// Claim-name overrides for extracting identity fields from the ID token /
/// userinfo response.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ClaimsMapping {
    /// Claim carrying the user's email. Defaults to `"email"`.
    #[serde(default = "ClaimsMapping::default_email")]
    pub email: String,
    /// Claim carrying the user's display name. Defaults to `"name"`.
    #[serde(default = "ClaimsMapping::default_name")]
    pub name: String,
    /// Claim carrying the user's groups. Defaults to `"groups"`.
    #[serde(default = "ClaimsMapping::default_groups")]
    pub groups: String,
}

impl ClaimsMapping {
    fn default_email() -> String {
        "email".to_string()
    }
    fn default_name() -> String {
        "name".to_string()
    }
    fn default_groups() -> String {
        "groups".to_string()
    }
}

/// Maps IdP groups to internal roles. Unmapped groups are ignored; if no
/// group maps to anything, the default role `"user"` applies.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct RoleMappings(pub HashMap<String, String>);

impl RoleMappings {
    /// Map a set of IdP groups to internal roles.
    #[must_use]
    pub fn map(&self, groups: &[String]) -> Vec<String> {
        let mut roles: Vec<String> = groups.iter().filter_map(|g| self.0.get(g).cloned()).collect();
        roles.sort();
        roles.dedup();
        if roles.is_empty() {
            roles.push("user".to_string());
        }
        roles
    }
}

/// The OIDC provider's discovery document, cached for the process lifetime.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct DiscoveryDocument {
    /// Authorization endpoint URL.
    pub authorization_endpoint: String,
    /// Token endpoint URL.
    pub token_endpoint: String,
    /// Userinfo endpoint URL, if advertised.
    #[serde(default)]
    pub userinfo_endpoint: Option<String>,
    /// JWKS URI, fetched and cached but not used for verification (see
    /// module docs).
    pub jwks_uri: String,
}

/// Claims extracted from a validated ID token.
#[derive(Debug, Clone)]
pub struct IdentityClaims {
    /// The `sub` claim.
    pub sub: String,
    /// Email, via the configured claim mapping.
    pub email: Option<String>,
    /// Display name, via the configured claim mapping.
    pub name: Option<String>,
    /// Groups, via the configured claim mapping.
    pub groups: Vec<String>,
}

/// The result of a completed authorization-code flow.
#[derive(Debug, Clone)]
pub struct AuthResult {
    /// The session id created in the Session Store.
    pub session_id: String,
    /// The authenticated user's email.
    pub email: String,
}

/// What `login()` hands back to the HTTP layer.
#[derive(Debug, Clone, Serialize)]
pub struct AuthorizationStart {
    /// The URL to redirect the user's browser to.
    pub authorization_url: String,
    /// The CSRF state value embedded in the URL.
    pub state: String,
}

struct PendingFlow {
    code_verifier: String,
    #[allow(dead_code)] // retained for audit/debugging parity with the original
    nonce: String,
    created_at: chrono::DateTime<Utc>,
}

/// Handles the complete OIDC authorization-code + PKCE flow.
pub struct OidcHandler {
    config: OidcConfig,
    http: reqwest::Client,
    discovery: Mutex<Option<DiscoveryDocument>>,
    jwks: Mutex<Option<serde_json::Value>>,
    pending: dashmap::DashMap<String, PendingFlow>,
    sessions: Arc<dyn SessionStore>,
    role_mappings: RoleMappings,
    default_session_ttl: chrono::Duration,
}

impl OidcHandler {
    /// Construct a new handler for the given provider config.
    #[must_use]
    pub fn new(
        config: OidcConfig,
        sessions: Arc<dyn SessionStore>,
        role_mappings: RoleMappings,
        default_session_ttl: chrono::Duration,
    ) -> Self {
        Self {
            config,
            http: reqwest::Client::new(),
            discovery: Mutex::new(None),
            jwks: Mutex::new(None),
            pending: dashmap::DashMap::new(),
            sessions,
            role_mappings,
            default_session_ttl,
        }
    }

    /// Fetch (and cache) the provider's discovery document.
    async fn discovery_document(&self) -> Result<DiscoveryDocument> {
        if let Some(doc) = self.discovery.lock().clone() {
            return Ok(doc);
        }
        let resp = self
            .http
            .get(&self.config.discovery_url)
            .send()
            .await
            .map_err(|e| Error::AuthFlow(AuthFlowError::TokenExchange(format!("discovery fetch failed: {e}"))))?;
        let doc: DiscoveryDocument = resp
            .json()
            .await
            .map_err(|e| Error::AuthFlow(AuthFlowError::TokenExchange(format!("discovery parse failed: {e}"))))?;
        *self.discovery.lock() = Some(doc.clone());
        Ok(doc)
    }

    /// Fetch (and cache) the provider's JWKS. Stored for future signature
    /// verification; not consulted by [`Self::validate_id_token`] today.
    pub async fn jwks(&self) -> Result<serde_json::Value> {
        if let Some(jwks) = self.jwks.lock().clone() {
            return Ok(jwks);
        }
        let doc = self.discovery_document().await?;
        let resp = self
            .http
            .get(&doc.jwks_uri)
            .send()
            .await
            .map_err(|e| Error::AuthFlow(AuthFlowError::TokenExchange(format!("jwks fetch failed: {e}"))))?;
        let jwks: serde_json::Value = resp
            .json()
            .await
            .map_err(|e| Error::AuthFlow(AuthFlowError::TokenExchange(format!("jwks parse failed: {e}"))))?;
        *self.jwks.lock() = Some(jwks.clone());
        Ok(jwks)
    }

    /// **Init** state: generate `state`/PKCE verifier/challenge/nonce, store
    /// `(state → verifier)`, and return the authorization URL.
    pub async fn login(&self) -> Result<AuthorizationStart> {
        let doc = self.discovery_document().await?;

        let state = random_urlsafe(STATE_BYTES);
        let code_verifier = random_urlsafe(VERIFIER_BYTES);
        let nonce = random_urlsafe(NONCE_BYTES);
        let code_challenge = base64::engine::general_purpose::URL_SAFE_NO_PAD
            .encode(Sha256::digest(code_verifier.as_bytes()));

        self.pending.insert(
            state.clone(),
            PendingFlow {
                code_verifier,
                nonce: nonce.clone(),
                created_at: Utc::now(),
            },
        );

        let mut url = url::Url::parse(&doc.authorization_endpoint)
            .map_err(|e| Error::AuthFlow(AuthFlowError::TokenExchange(format!("bad authorization_endpoint: {e}"))))?;
        {
            let mut qp = url.query_pairs_mut();
            qp.append_pair("response_type", "code");
            qp.append_pair("client_id", &self.config.client_id);
            qp.append_pair("redirect_uri", &self.config.redirect_uri);
            qp.append_pair("scope", &self.config.scopes.join(" "));
            qp.append_pair("state", &state);
            qp.append_pair("code_challenge", &code_challenge);
            qp.append_pair("code_challenge_method", "S256");
            qp.append_pair("nonce", &nonce);
        }

        Ok(AuthorizationStart {
            authorization_url: url.to_string(),
            state,
        })
    }

    /// **Exchanging → Validating → Provisioning → Done**: handle the
    /// callback, exchanging the code, validating the ID token, provisioning
    /// a session. No partial session is created on any failure.
    pub async fn handle_callback(&self, code: &str, state: &str) -> Result<AuthResult> {
        // Single-use: remove immediately so a replayed callback with the
        // same state cannot both produce sessions.
        let Some((_, pending)) = self.pending.remove(state) else {
            return Err(Error::AuthFlow(AuthFlowError::Callback(
                "invalid or expired state parameter".to_string(),
            )));
        };

        let tokens = self.exchange_code_for_tokens(code, &pending.code_verifier).await?;
        let id_token = tokens
            .get("id_token")
            .and_then(|v| v.as_str())
            .ok_or_else(|| Error::AuthFlow(AuthFlowError::TokenExchange("response missing id_token".to_string())))?;

        let claims = self.validate_id_token(id_token)?;

        let mut email = claims.email.clone();
        let mut name = claims.name.clone();
        let mut groups = claims.groups.clone();

        // Userinfo is best-effort: failure does not abort the flow.
        if let Some(access_token) = tokens.get("access_token").and_then(|v| v.as_str()) {
            if let Ok(userinfo) = self.fetch_userinfo(access_token).await {
                if email.is_none() {
                    email = userinfo
                        .get(&self.config.claims_mapping.email)
                        .and_then(|v| v.as_str())
                        .map(str::to_string);
                }
                if name.is_none() {
                    name = userinfo
                        .get(&self.config.claims_mapping.name)
                        .and_then(|v| v.as_str())
                        .map(str::to_string);
                }
                if groups.is_empty() {
                    if let Some(arr) = userinfo.get(&self.config.claims_mapping.groups).and_then(|v| v.as_array()) {
                        groups = arr.iter().filter_map(|v| v.as_str().map(str::to_string)).collect();
                    }
                }
            }
        }

        let email = email.ok_or_else(|| {
            Error::AuthFlow(AuthFlowError::Identity("missing required claim: email".to_string()))
        })?;
        if claims.sub.is_empty() {
            return Err(Error::AuthFlow(AuthFlowError::Identity(
                "missing required claim: sub".to_string(),
            )));
        }

        let roles = self.role_mappings.map(&groups);
        let display_name = name.unwrap_or_else(|| email.clone());

        let session_id = self
            .sessions
            .create(
                &claims.sub,
                &email,
                &display_name,
                groups,
                roles,
                &self.config.provider,
                self.default_session_ttl,
            )
            .await?;

        tracing::info!(%email, provider = %self.config.provider, "oidc login completed");
        Ok(AuthResult { session_id, email })
    }

    async fn exchange_code_for_tokens(&self, code: &str, code_verifier: &str) -> Result<HashMap<String, serde_json::Value>> {
        let doc = self.discovery_document().await?;
        let form = [
            ("grant_type", "authorization_code"),
            ("client_id", self.config.client_id.as_str()),
            ("client_secret", self.config.client_secret.as_str()),
            ("code", code),
            ("redirect_uri", self.config.redirect_uri.as_str()),
            ("code_verifier", code_verifier),
        ];
        let resp = self
            .http
            .post(&doc.token_endpoint)
            .form(&form)
            .send()
            .await
            .map_err(|e| Error::AuthFlow(AuthFlowError::TokenExchange(e.to_string())))?;

        if !resp.status().is_success() {
            let status = resp.status();
            let body = resp.text().await.unwrap_or_default();
            return Err(Error::AuthFlow(AuthFlowError::TokenExchange(format!(
                "token endpoint returned {status}: {body}"
            ))));
        }

        resp.json()
            .await
            .map_err(|e| Error::AuthFlow(AuthFlowError::TokenExchange(format!("invalid token response: {e}"))))
    }

    async fn fetch_userinfo(&self, access_token: &str) -> Result<serde_json::Value> {
        let doc = self.discovery_document().await?;
        let Some(endpoint) = doc.userinfo_endpoint.as_ref() else {
            return Err(Error::AuthFlow(AuthFlowError::TokenExchange(
                "provider has no userinfo_endpoint".to_string(),
            )));
        };
        let resp = self
            .http
            .get(endpoint)
            .bearer_auth(access_token)
            .send()
            .await
            .map_err(|e| Error::AuthFlow(AuthFlowError::TokenExchange(e.to_string())))?;
        resp.json()
            .await
            .map_err(|e| Error::AuthFlow(AuthFlowError::TokenExchange(format!("invalid userinfo response: {e}"))))
    }

    /// **Validating**: parse the JWT's header/payload (base64url, padded as
    /// needed) and check `exp > now`, `nbf <= now` (if present), `iss`, and
    /// `aud`. No signature check — see module docs.
    fn validate_id_token(&self, id_token: &str) -> Result<IdentityClaims> {
        let parts: Vec<&str> = id_token.split('.').collect();
        if parts.len() != 3 {
            return Err(Error::AuthFlow(AuthFlowError::TokenValidation(
                "id_token is not a three-part JWT".to_string(),
            )));
        }
        let payload_bytes = decode_base64url_padded(parts[1]).map_err(|e| {
            Error::AuthFlow(AuthFlowError::TokenValidation(format!("payload is not valid base64url: {e}")))
        })?;
        let payload: serde_json::Value = serde_json::from_slice(&payload_bytes).map_err(|e| {
            Error::AuthFlow(AuthFlowError::TokenValidation(format!("payload is not valid JSON: {e}")))
        })?;

        let now = Utc::now().timestamp();

        let exp = payload
            .get("exp")
            .and_then(serde_json::Value::as_i64)
            .ok_or_else(|| Error::AuthFlow(AuthFlowError::TokenValidation("missing exp claim".to_string())))?;
        if exp <= now {
            return Err(Error::AuthFlow(AuthFlowError::TokenValidation("token has expired".to_string())));
        }

        if let Some(nbf) = payload.get("nbf").and_then(serde_json::Value::as_i64) {
            if nbf > now {
                return Err(Error::AuthFlow(AuthFlowError::TokenValidation(
                    "token is not yet valid (nbf)".to_string(),
                )));
            }
        }

        let iss = payload.get("iss").and_then(serde_json::Value::as_str).unwrap_or_default();
        if iss != self.config.issuer {
            return Err(Error::AuthFlow(AuthFlowError::TokenValidation(format!(
                "unexpected issuer: {iss}"
            ))));
        }

        let aud_matches = match payload.get("aud") {
            Some(serde_json::Value::String(s)) => s == &self.config.client_id,
            Some(serde_json::Value::Array(arr)) => arr.iter().any(|v| v.as_str() == Some(self.config.client_id.as_str())),
            _ => false,
        };
        if !aud_matches {
            return Err(Error::AuthFlow(AuthFlowError::TokenValidation(
                "audience does not match configured client_id".to_string(),
            )));
        }

        let sub = payload
            .get("sub")
            .and_then(serde_json::Value::as_str)
            .unwrap_or_default()
            .to_string();

        let email = payload
            .get(&self.config.claims_mapping.email)
            .and_then(serde_json::Value::as_str)
            .map(str::to_string);
        let name = payload
            .get(&self.config.claims_mapping.name)
            .and_then(serde_json::Value::as_str)
            .map(str::to_string);
        let groups = payload
            .get(&self.config.claims_mapping.groups)
            .and_then(serde_json::Value::as_array)
            .map(|arr| arr.iter().filter_map(|v| v.as_str().map(str::to_string)).collect())
            .unwrap_or_default();

        Ok(IdentityClaims { sub, email, name, groups })
    }

    /// Drop pending flows older than `max_age`, so an attacker cannot hold
    /// a `state` open indefinitely waiting for a code.
    pub fn sweep_expired_pending(&self, max_age: chrono::Duration) {
        let cutoff = Utc::now() - max_age;
        self.pending.retain(|_, p| p.created_at > cutoff);
    }
}

fn decode_base64url_padded(segment: &str) -> std::result::Result<Vec<u8>, base64::DecodeError> {
    let mut s = segment.to_string();
    while s.len() % 4 != 0 {
        s.push('=');
    }
    base64::engine::general_purpose::URL_SAFE.decode(s.as_bytes())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::InMemorySessionStore;

    fn fake_id_token(claims: serde_json::Value) -> String {
        let header = base64::engine::general_purpose::URL_SAFE_NO_PAD
            .encode(serde_json::json!({"alg": "none", "typ": "JWT"}).to_string());
        let payload = base64::engine::general_purpose::URL_SAFE_NO_PAD.encode(claims.to_string());
        format!("{header}.{payload}.sig")
    }

    fn handler() -> OidcHandler {
        let config = OidcConfig {
            provider: "okta".to_string(),
            client_id: "client-123".to_string(),
            client_secret: "secret".to_string(),
            issuer: "https://idp.example.com".to_string(),
            discovery_url: "https://idp.example.com/.well-known/openid-configuration".to_string(),
            redirect_uri: "https://app.example.com/auth/callback".to_string(),
            scopes: vec!["openid".to_string(), "email".to_string()],
            claims_mapping: ClaimsMapping {
                email: "email".to_string(),
                name: "name".to_string(),
                groups: "groups".to_string(),
            },
        };
        let sessions = Arc::new(InMemorySessionStore::new(chrono::Duration::hours(8)));
        OidcHandler::new(config, sessions, RoleMappings::default(), chrono::Duration::hours(8))
    }

    #[test]
    fn validate_id_token_rejects_expired() {
        let handler = handler();
        let now = Utc::now().timestamp();
        let token = fake_id_token(serde_json::json!({
            "sub": "u1", "email": "a@b.com", "iss": handler.config.issuer,
            "aud": handler.config.client_id, "exp": now - 10,
        }));
        let err = handler.validate_id_token(&token).unwrap_err();
        assert!(matches!(err, Error::AuthFlow(AuthFlowError::TokenValidation(_))));
    }

    #[test]
    fn validate_id_token_rejects_wrong_audience() {
        let handler = handler();
        let now = Utc::now().timestamp();
        let token = fake_id_token(serde_json::json!({
            "sub": "u1", "email": "a@b.com", "iss": handler.config.issuer,
            "aud": "someone-else", "exp": now + 3600,
        }));
        let err = handler.validate_id_token(&token).unwrap_err();
        assert!(matches!(err, Error::AuthFlow(AuthFlowError::TokenValidation(_))));
    }

    #[test]
    fn validate_id_token_accepts_well_formed_token() {
        let handler = handler();
        let now = Utc::now().timestamp();
        let token = fake_id_token(serde_json::json!({
            "sub": "u1", "email": "a@b.com", "name": "Alice",
            "groups": ["engineering"],
            "iss": handler.config.issuer, "aud": handler.config.client_id, "exp": now + 3600,
        }));
        let claims = handler.validate_id_token(&token).unwrap();
        assert_eq!(claims.sub, "u1");
        assert_eq!(claims.email.as_deref(), Some("a@b.com"));
        assert_eq!(claims.groups, vec!["engineering".to_string()]);
    }

    #[test]
    fn role_mapping_falls_back_to_user_role() {
        let mapping = RoleMappings::default();
        assert_eq!(mapping.map(&["unknown-group".to_string()]), vec!["user".to_string()]);
    }

    #[test]
    fn role_mapping_maps_and_dedupes() {
        let mut map = HashMap::new();
        map.insert("eng".to_string(), "admin".to_string());
        map.insert("eng-leads".to_string(), "admin".to_string());
        let mapping = RoleMappings(map);
        assert_eq!(
            mapping.map(&["eng".to_string(), "eng-leads".to_string()]),
            vec!["admin".to_string()]
        );
    }

    #[test]
    fn replayed_state_is_single_use() {
        let handler = handler();
        handler.pending.insert(
            "state-1".to_string(),
            PendingFlow {
                code_verifier: "verifier".to_string(),
                nonce: "nonce".to_string(),
                created_at: Utc::now(),
            },
        );
        assert!(handler.pending.remove("state-1").is_some());
        assert!(handler.pending.remove("state-1").is_none());
    }
}
