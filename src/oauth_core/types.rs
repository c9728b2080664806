//! OAuth2 core primitives: clients, principals, codes, claims and issued tokens.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::error::OAuthError;

/// OAuth2 grant types a client may be registered for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GrantType {
    Password,
    AuthorizationCode,
    RefreshToken,
    ClientCredentials,
}

impl GrantType {
    pub fn as_str(&self) -> &'static str {
        match self {
            GrantType::Password => "password",
            GrantType::AuthorizationCode => "authorization_code",
            GrantType::RefreshToken => "refresh_token",
            GrantType::ClientCredentials => "client_credentials",
        }
    }
}

impl FromStr for GrantType {
    type Err = OAuthError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "password" => Ok(GrantType::Password),
            "authorization_code" => Ok(GrantType::AuthorizationCode),
            "refresh_token" => Ok(GrantType::RefreshToken),
            "client_credentials" => Ok(GrantType::ClientCredentials),
            other => Err(OAuthError::UnsupportedGrantType(other.to_string())),
        }
    }
}

impl fmt::Display for GrantType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A registered OAuth 2.0 client application.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClientDescriptor {
    /// Client identifier.
    pub client_id: String,
    /// PBKDF2 hash of the client secret, see [`crate::oauth_core::crypto::hash_secret`].
    pub secret_hash: String,
    /// Resource servers tokens of this client are valid for.
    #[serde(default)]
    pub resource_ids: BTreeSet<String>,
    /// Grants the client may use.
    #[serde(default)]
    pub allowed_grant_types: BTreeSet<GrantType>,
    /// Scopes the client may request.
    #[serde(default)]
    pub allowed_scopes: BTreeSet<String>,
    /// Registered redirect URIs.
    #[serde(default)]
    pub redirect_uris: BTreeSet<String>,
    /// Access token lifetime override in seconds.
    #[serde(default)]
    pub access_token_validity: Option<i64>,
    /// Refresh token lifetime override in seconds.
    #[serde(default)]
    pub refresh_token_validity: Option<i64>,
}

impl ClientDescriptor {
    /// Creates a client with no grants, scopes, resources or redirect URIs.
    pub fn new(client_id: impl Into<String>, secret_hash: impl Into<String>) -> Self {
        Self {
            client_id: client_id.into(),
            secret_hash: secret_hash.into(),
            resource_ids: BTreeSet::new(),
            allowed_grant_types: BTreeSet::new(),
            allowed_scopes: BTreeSet::new(),
            redirect_uris: BTreeSet::new(),
            access_token_validity: None,
            refresh_token_validity: None,
        }
    }

    pub fn with_grant_types(mut self, grants: impl IntoIterator<Item = GrantType>) -> Self {
        self.allowed_grant_types.extend(grants);
        self
    }

    pub fn with_scopes<S: Into<String>>(mut self, scopes: impl IntoIterator<Item = S>) -> Self {
        self.allowed_scopes.extend(scopes.into_iter().map(Into::into));
        self
    }

    pub fn with_resource_ids<S: Into<String>>(mut self, ids: impl IntoIterator<Item = S>) -> Self {
        self.resource_ids.extend(ids.into_iter().map(Into::into));
        self
    }

    pub fn with_redirect_uris<S: Into<String>>(mut self, uris: impl IntoIterator<Item = S>) -> Self {
        self.redirect_uris.extend(uris.into_iter().map(Into::into));
        self
    }

    /// Overrides the server-wide token lifetimes for this client.
    pub fn with_validity(mut self, access_seconds: i64, refresh_seconds: i64) -> Self {
        self.access_token_validity = Some(access_seconds);
        self.refresh_token_validity = Some(refresh_seconds);
        self
    }

    pub fn allows_grant(&self, grant: GrantType) -> bool {
        self.allowed_grant_types.contains(&grant)
    }
}

/// An authenticated end user as known to the user directory.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Principal {
    /// Unique subject id, usually the username.
    pub subject_id: String,
    #[serde(default)]
    pub roles: BTreeSet<String>,
    #[serde(default)]
    pub attributes: BTreeMap<String, String>,
}

impl Principal {
    pub fn new(subject_id: impl Into<String>) -> Self {
        Self { subject_id: subject_id.into(), roles: BTreeSet::new(), attributes: BTreeMap::new() }
    }

    pub fn with_roles<S: Into<String>>(mut self, roles: impl IntoIterator<Item = S>) -> Self {
        self.roles.extend(roles.into_iter().map(Into::into));
        self
    }

    pub fn with_attribute(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.attributes.insert(key.into(), value.into());
        self
    }
}

/// A single-use authorization code bound to a client, subject and redirect URI.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthorizationCode {
    pub code: String,
    pub client_id: String,
    pub subject_id: String,
    pub scope: BTreeSet<String>,
    pub redirect_uri: String,
    /// Unix seconds.
    pub issued_at: i64,
    /// Unix seconds.
    pub expires_at: i64,
}

impl AuthorizationCode {
    pub fn is_expired_at(&self, now: i64) -> bool {
        self.expires_at <= now
    }
}

/// Lifecycle of an authorization code once it has been handed out.
///
/// `Initiated` only exists while the request is being validated; stores never
/// hold a code in that state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CodeState {
    Initiated,
    CodeIssued,
    Exchanged,
    Expired,
    Revoked,
}

impl CodeState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, CodeState::Exchanged | CodeState::Expired | CodeState::Revoked)
    }
}

/// A stored code together with its current state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CodeRecord {
    pub code: AuthorizationCode,
    pub state: CodeState,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TokenType {
    Access,
    Refresh,
}

/// Claim names owned by the core; enhancers may not write them into `additional`.
pub const RESERVED_CLAIMS: &[&str] = &[
    "sub", "client_id", "scope", "authorities", "aud", "iat", "exp", "jti", "token_type", "ati", "active",
];

/// The payload carried inside a signed token.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TokenClaims {
    #[serde(rename = "sub")]
    pub subject_id: String,
    pub client_id: String,
    #[serde(default)]
    pub scope: BTreeSet<String>,
    #[serde(rename = "authorities", default)]
    pub roles: BTreeSet<String>,
    #[serde(rename = "aud", default)]
    pub resource_ids: BTreeSet<String>,
    /// Unix seconds.
    #[serde(rename = "iat")]
    pub issued_at: i64,
    /// Unix seconds.
    #[serde(rename = "exp")]
    pub expires_at: i64,
    /// Unique token id, the key used by revocation.
    #[serde(rename = "jti")]
    pub token_id: String,
    pub token_type: TokenType,
    /// Enhancer-provided claims; unknown claims from the wire land here too.
    #[serde(flatten)]
    pub additional: BTreeMap<String, Value>,
}

impl TokenClaims {
    pub fn is_expired_at(&self, now: i64) -> bool {
        self.expires_at <= now
    }

    pub fn has_role(&self, role: &str) -> bool {
        self.roles.contains(role)
    }

    pub fn has_scope(&self, scope: &str) -> bool {
        self.scope.contains(scope)
    }
}

/// What the caller receives from a successful grant.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IssuedTokenPair {
    pub access_token: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub refresh_token: Option<String>,
    /// Access token lifetime in seconds.
    pub expires_in: u64,
    /// Always `bearer`.
    pub token_type: String,
    /// Space-delimited granted scope.
    pub scope: String,
}

/// Claim view handed to resource handlers after verification.
#[derive(Debug, Clone, PartialEq)]
pub struct AuthenticatedPrincipal {
    pub subject_id: String,
    pub client_id: String,
    pub scope: BTreeSet<String>,
    pub roles: BTreeSet<String>,
    pub resource_ids: BTreeSet<String>,
    pub expires_at: i64,
    pub additional: BTreeMap<String, Value>,
}

impl From<TokenClaims> for AuthenticatedPrincipal {
    fn from(claims: TokenClaims) -> Self {
        Self {
            subject_id: claims.subject_id,
            client_id: claims.client_id,
            scope: claims.scope,
            roles: claims.roles,
            resource_ids: claims.resource_ids,
            expires_at: claims.expires_at,
            additional: claims.additional,
        }
    }
}

/// Splits a space-delimited scope parameter.
pub fn parse_scope(raw: &str) -> BTreeSet<String> {
    raw.split_whitespace().map(str::to_string).collect()
}

/// Joins a scope set back into its space-delimited form.
pub fn format_scope(scope: &BTreeSet<String>) -> String {
    scope.iter().map(String::as_str).collect::<Vec<_>>().join(" ")
}
