//! Configuration (ambient stack): loads the §6 YAML file plus environment
//! overrides, and fails fast when `sso.enabled = true` but required OIDC
//! fields are missing.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;

use crate::error::{ConfigError, Error, Result};
use crate::oidc::{ClaimsMapping, OidcConfig};

/// Top-level `sso:` section of the YAML config.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
pub struct SsoConfig {
    /// Whether SSO is enabled at all. `false` puts the auth gate in
    /// [`crate::auth_gate::RequestAuthGate::disabled`] mode.
    #[serde(default)]
    pub enabled: bool,
    /// The default auth protocol. Only `"oidc"` is implemented.
    #[serde(default = "SsoConfig::default_protocol")]
    pub default_protocol: String,
    /// OIDC provider settings. Required when `enabled = true`.
    pub oidc: Option<OidcConfig>,
}

impl SsoConfig {
    fn default_protocol() -> String {
        "oidc".to_string()
    }
}

/// The full YAML-backed configuration surface consumed by the core.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct AppConfig {
    /// SSO/OIDC settings.
    #[serde(default)]
    pub sso: SsoConfig,
    /// IdP group name → internal role name.
    #[serde(default)]
    pub role_mappings: HashMap<String, String>,
    /// Session TTL in seconds. Overridable by `CENECA_SESSION_TIMEOUT`.
    #[serde(default = "AppConfig::default_session_timeout")]
    pub session_timeout_s: u64,
    /// Secret used to sign/encrypt session cookies. Overridable by
    /// `CENECA_SESSION_SECRET`. Not required unless cookie signing is
    /// enabled by the HTTP layer.
    #[serde(default)]
    pub session_secret: Option<String>,
}

impl AppConfig {
    fn default_session_timeout() -> u64 {
        8 * 3600
    }

    /// Parse the YAML document, apply environment overrides, and validate.
    pub fn load(yaml: &str) -> Result<Self> {
        let mut config: AppConfig = serde_yml::from_str(yaml)
            .map_err(|e| Error::Config(ConfigError::InvalidValue {
                key: "<root>".to_string(),
                detail: e.to_string(),
            }))?;
        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    /// Parse the YAML document from a file on disk.
    pub fn load_from_file(path: &std::path::Path) -> Result<Self> {
        let yaml = std::fs::read_to_string(path).map_err(|e| {
            Error::Config(ConfigError::InvalidValue {
                key: "<file>".to_string(),
                detail: format!("{}: {e}", path.display()),
            })
        })?;
        Self::load(&yaml)
    }

    fn apply_env_overrides(&mut self) {
        if let Ok(raw) = std::env::var("CENECA_SESSION_TIMEOUT") {
            if let Ok(secs) = raw.parse::<u64>() {
                self.session_timeout_s = secs;
            } else {
                tracing::warn!(value = %raw, "ignoring non-numeric CENECA_SESSION_TIMEOUT");
            }
        }
        if let Ok(secret) = std::env::var("CENECA_SESSION_SECRET") {
            self.session_secret = Some(secret);
        }
    }

    /// Validate required fields; `sso.enabled = true` requires a complete
    /// OIDC block.
    fn validate(&self) -> Result<()> {
        if !self.sso.enabled {
            return Ok(());
        }
        let oidc = self.sso.oidc.as_ref().ok_or_else(|| {
            Error::Config(ConfigError::IncompleteOidc("sso.oidc block is missing".to_string()))
        })?;
        let missing: Vec<&str> = [
            ("client_id", oidc.client_id.is_empty()),
            ("client_secret", oidc.client_secret.is_empty()),
            ("issuer", oidc.issuer.is_empty()),
            ("discovery_url", oidc.discovery_url.is_empty()),
            ("redirect_uri", oidc.redirect_uri.is_empty()),
        ]
        .into_iter()
        .filter_map(|(name, empty)| empty.then_some(name))
        .collect();
        if !missing.is_empty() {
            return Err(Error::Config(ConfigError::IncompleteOidc(format!(
                "missing required oidc fields: {}",
                missing.join(", ")
            ))));
        }
        Ok(())
    }

    /// Session TTL as a `chrono::Duration`.
    #[must_use]
    pub fn session_ttl(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.session_timeout_s as i64)
    }

    /// Session TTL as a `std::time::Duration`, for cookie `Max-Age`.
    #[must_use]
    pub fn session_timeout_std(&self) -> Duration {
        Duration::from_secs(self.session_timeout_s)
    }

    /// Build the role-mapping table used by the OIDC handler.
    #[must_use]
    pub fn role_mappings(&self) -> crate::oidc::RoleMappings {
        crate::oidc::RoleMappings(self.role_mappings.clone())
    }
}

/// Defaults for [`ClaimsMapping`], used by `serde(default)` consumers
/// building an `OidcConfig` programmatically rather than from YAML.
#[must_use]
pub fn default_claims_mapping() -> ClaimsMapping {
    ClaimsMapping {
        email: "email".to_string(),
        name: "name".to_string(),
        groups: "groups".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const MINIMAL_YAML: &str = r#"
sso:
  enabled: false
role_mappings: {}
"#;

    const ENABLED_INCOMPLETE_YAML: &str = r#"
sso:
  enabled: true
  oidc:
    provider: okta
    client_id: ""
    client_secret: "s"
    issuer: "https://idp.example.com"
    discovery_url: "https://idp.example.com/.well-known/openid-configuration"
    redirect_uri: "https://app.example.com/auth/callback"
    scopes: [openid]
    claims_mapping:
      email: email
      name: name
      groups: groups
"#;

    const ENABLED_COMPLETE_YAML: &str = r#"
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

    #[test]
    fn sso_disabled_loads_without_oidc_block() {
        let config = AppConfig::load(MINIMAL_YAML).unwrap();
        assert!(!config.sso.enabled);
    }

    #[test]
    fn sso_enabled_with_missing_client_id_fails() {
        let err = AppConfig::load(ENABLED_INCOMPLETE_YAML).unwrap_err();
        assert!(matches!(err, Error::Config(ConfigError::IncompleteOidc(_))));
    }

    #[test]
    fn sso_enabled_with_complete_oidc_loads() {
        let config = AppConfig::load(ENABLED_COMPLETE_YAML).unwrap();
        assert!(config.sso.enabled);
        assert_eq!(config.role_mappings.get("engineering").map(String::as_str), Some("admin"));
    }

    #[test]
    fn env_override_wins_over_yaml_default() {
        std::env::set_var("CENECA_SESSION_TIMEOUT", "120");
        let config = AppConfig::load(MINIMAL_YAML).unwrap();
        assert_eq!(config.session_timeout_s, 120);
        std::env::remove_var("CENECA_SESSION_TIMEOUT");
    }
}
