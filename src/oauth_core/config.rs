//! Configuration for the authorization server and resource servers.
//!
//! Everything here is plain data loaded once at startup (JSON via serde) and
//! turned into strategy objects: a [`JwtTokenCodec`] for the signing section,
//! a [`TokenEnhancerChain`] for the enhancer list, an [`AccessPolicy`] for the
//! resource rules.

use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::enhancer::{
    AdditionalInformationEnhancer, PrincipalAttributesEnhancer, ScopeCeilingEnhancer, TokenEnhancerChain,
};
use super::error::OAuthError;
use super::jwt::{JwtTokenCodec, KeyMaterial};
use super::http_client::OAuthHttpClient;
use super::verifier::{AccessPolicy, AccessRule, RemoteTokenServices, Requirement, ResourceVerifier};

/// Token and code lifetimes (seconds) plus refresh behaviour.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TokenSettings {
    pub access_token_validity: i64,
    pub refresh_token_validity: i64,
    pub code_validity: i64,
    /// Issue refresh tokens at all (still subject to the client's grants).
    pub support_refresh_token: bool,
    /// Hand back the same refresh token on refresh instead of rotating it.
    pub reuse_refresh_tokens: bool,
}

impl Default for TokenSettings {
    fn default() -> Self {
        Self {
            access_token_validity: 60 * 60 * 12,
            refresh_token_validity: 60 * 60 * 24 * 30,
            code_validity: 300,
            support_refresh_token: true,
            reuse_refresh_tokens: true,
        }
    }
}

impl TokenSettings {
    pub fn validate(&self) -> Result<(), OAuthError> {
        validate_validity(self.access_token_validity, self.refresh_token_validity)?;
        if self.code_validity <= 0 {
            return Err(OAuthError::Configuration("code validity must be positive".into()));
        }
        Ok(())
    }
}

/// Checks one access/refresh lifetime pair.
pub fn validate_validity(access: i64, refresh: i64) -> Result<(), OAuthError> {
    if access <= 0 {
        return Err(OAuthError::Configuration("access token validity must be positive".into()));
    }
    if access >= refresh {
        return Err(OAuthError::Configuration(format!(
            "access token validity ({}s) must be shorter than refresh token validity ({}s)",
            access, refresh
        )));
    }
    Ok(())
}

/// Signing key section.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "algorithm")]
pub enum SigningConfig {
    HS256 {
        secret: String,
        #[serde(default)]
        key_id: Option<String>,
    },
    /// PEM strings; omit the private key on resource servers.
    RS256 {
        #[serde(default)]
        private_key_pem: Option<String>,
        public_key_pem: String,
        #[serde(default)]
        key_id: Option<String>,
    },
}

impl SigningConfig {
    pub fn key_material(&self) -> Result<KeyMaterial, OAuthError> {
        let (keys, key_id) = match self {
            SigningConfig::HS256 { secret, key_id } => {
                if secret.is_empty() {
                    return Err(OAuthError::Configuration("HS256 secret must not be empty".into()));
                }
                (KeyMaterial::hs256(secret.as_bytes()), key_id)
            }
            SigningConfig::RS256 { private_key_pem: Some(private), public_key_pem, key_id } => {
                (KeyMaterial::rs256(private.as_bytes(), public_key_pem.as_bytes())?, key_id)
            }
            SigningConfig::RS256 { private_key_pem: None, public_key_pem, key_id } => {
                (KeyMaterial::rs256_public(public_key_pem.as_bytes())?, key_id)
            }
        };
        Ok(match key_id {
            Some(kid) => keys.with_key_id(kid.clone()),
            None => keys,
        })
    }

    pub fn build_codec(&self) -> Result<JwtTokenCodec, OAuthError> {
        Ok(JwtTokenCodec::new(self.key_material()?))
    }
}

/// One stage of the enhancer chain.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum EnhancerConfig {
    AdditionalInformation {
        entries: BTreeMap<String, Value>,
    },
    PrincipalAttributes {
        keys: Vec<String>,
        #[serde(default)]
        required: bool,
    },
    ScopeCeiling {
        scopes: BTreeSet<String>,
        #[serde(default)]
        roles: Option<BTreeSet<String>>,
    },
}

/// Builds the chain in the configured order.
pub fn build_enhancer_chain(stages: &[EnhancerConfig]) -> TokenEnhancerChain {
    stages.iter().fold(TokenEnhancerChain::new(), |chain, stage| match stage {
        EnhancerConfig::AdditionalInformation { entries } => {
            chain.with(Arc::new(AdditionalInformationEnhancer::new(entries.clone())))
        }
        EnhancerConfig::PrincipalAttributes { keys, required } => {
            let enhancer = PrincipalAttributesEnhancer::new(keys.iter().cloned());
            chain.with(Arc::new(if *required { enhancer.required() } else { enhancer }))
        }
        EnhancerConfig::ScopeCeiling { scopes, roles } => {
            let enhancer = ScopeCeilingEnhancer::new(scopes.iter().cloned());
            chain.with(Arc::new(match roles {
                Some(roles) => enhancer.with_roles(roles.iter().cloned()),
                None => enhancer,
            }))
        }
    })
}

/// Authorization server configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuthServerConfig {
    #[serde(default)]
    pub tokens: TokenSettings,
    pub signing: SigningConfig,
    #[serde(default)]
    pub enhancers: Vec<EnhancerConfig>,
}

impl AuthServerConfig {
    pub fn from_json_str(raw: &str) -> Result<Self, OAuthError> {
        let config: Self = serde_json::from_str(raw)
            .map_err(|e| OAuthError::Configuration(format!("cannot parse auth server config: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self, OAuthError> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path)
            .map_err(|e| OAuthError::Configuration(format!("cannot read {}: {}", path.display(), e)))?;
        Self::from_json_str(&raw)
    }

    pub fn validate(&self) -> Result<(), OAuthError> {
        self.tokens.validate()?;
        if !self.signing.key_material()?.can_sign() {
            return Err(OAuthError::Configuration("authorization server needs a signing key".into()));
        }
        Ok(())
    }
}

/// One protected path pattern and what it requires.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccessRuleConfig {
    pub pattern: String,
    #[serde(default)]
    pub roles: BTreeSet<String>,
    #[serde(default)]
    pub scopes: BTreeSet<String>,
}

/// How a resource server checks tokens.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum VerificationConfig {
    Local {
        signing: SigningConfig,
    },
    Remote {
        check_token_url: String,
        client_id: String,
        client_secret: String,
        #[serde(default = "default_remote_timeout_ms")]
        timeout_ms: u64,
    },
}

fn default_remote_timeout_ms() -> u64 {
    2_000
}

/// Resource server configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceServerConfig {
    pub resource_id: String,
    pub verification: VerificationConfig,
    /// Checked in order; when empty the admin-only default policy applies.
    #[serde(default)]
    pub rules: Vec<AccessRuleConfig>,
}

impl ResourceServerConfig {
    pub fn from_json_str(raw: &str) -> Result<Self, OAuthError> {
        serde_json::from_str(raw)
            .map_err(|e| OAuthError::Configuration(format!("cannot parse resource server config: {}", e)))
    }

    pub fn access_policy(&self) -> AccessPolicy {
        if self.rules.is_empty() {
            return AccessPolicy::admin_default();
        }
        self.rules.iter().fold(AccessPolicy::new(), |policy, rule| {
            policy.rule(AccessRule::new(
                &rule.pattern,
                Requirement::any_of(rule.roles.iter().cloned(), rule.scopes.iter().cloned()),
            ))
        })
    }

    /// Wires a verifier; `http` is only used in remote mode.
    pub fn build_verifier(&self, http: Arc<dyn OAuthHttpClient>) -> Result<ResourceVerifier, OAuthError> {
        let verifier = match &self.verification {
            VerificationConfig::Local { signing } => {
                ResourceVerifier::local(&self.resource_id, Arc::new(signing.build_codec()?))
            }
            VerificationConfig::Remote { check_token_url, client_id, client_secret, timeout_ms } => {
                let services = RemoteTokenServices::new(http, check_token_url, client_id, client_secret)
                    .with_timeout(Duration::from_millis(*timeout_ms));
                ResourceVerifier::remote(&self.resource_id, services)
            }
        };
        Ok(verifier.with_policy(self.access_policy()))
    }
}
