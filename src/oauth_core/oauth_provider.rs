//! Pluggable seams of the authorization core.

use async_trait::async_trait;
use chrono::Utc;

use super::error::OAuthError;
use super::types::{AuthorizationCode, ClientDescriptor, CodeRecord, GrantType, Principal, TokenClaims};

/// Read-only lookup of registered clients.
#[async_trait]
pub trait ClientStore: Send + Sync + 'static {
    /// Returns `Ok(None)` when no client is registered under `client_id`.
    async fn lookup_client(&self, client_id: &str) -> Result<Option<ClientDescriptor>, OAuthError>;
}

/// Read-only lookup and credential check of end users.
#[async_trait]
pub trait UserDirectory: Send + Sync + 'static {
    /// Returns `Ok(None)` when the user does not exist.
    async fn lookup_user(&self, username: &str) -> Result<Option<Principal>, OAuthError>;

    /// Checks `plaintext` against the stored password hash for `principal`.
    async fn verify_password(&self, principal: &Principal, plaintext: &str) -> Result<bool, OAuthError>;
}

/// Transient store for single-use authorization codes.
///
/// `consume_code` must be atomic: of any number of concurrent calls for the same
/// code, at most one returns `Some`.
#[async_trait]
pub trait AuthorizationCodeStore: Send + Sync + 'static {
    /// Stores a freshly issued code in state `CodeIssued`.
    async fn store_code(&self, code: AuthorizationCode) -> Result<(), OAuthError>;

    /// Returns the record for `code` without changing it.
    async fn get_code(&self, code: &str) -> Result<Option<CodeRecord>, OAuthError>;

    /// Moves `code` from `CodeIssued` to `Exchanged` if it has not expired at `now`.
    async fn consume_code(&self, code: &str, now: i64) -> Result<Option<AuthorizationCode>, OAuthError>;

    /// Moves a live code to `Revoked`; returns whether anything changed.
    async fn revoke_code(&self, code: &str) -> Result<bool, OAuthError>;

    /// Drops every record whose code expired at or before `now`, or that was
    /// already exchanged or revoked; returns how many.
    async fn purge_expired(&self, now: i64) -> Result<usize, OAuthError>;
}

/// Explicit revocation list keyed by token id (`jti`).
#[async_trait]
pub trait RevocationList: Send + Sync + 'static {
    /// Records `token_id` as revoked until `expires_at` (Unix seconds).
    ///
    /// Returns `false` if it was already revoked. Concurrent calls for the same
    /// id must agree on exactly one `true`.
    async fn revoke(&self, token_id: &str, expires_at: i64) -> Result<bool, OAuthError>;

    async fn is_revoked(&self, token_id: &str) -> Result<bool, OAuthError>;
}

/// Signs claims into a self-contained token string and verifies them back.
pub trait TokenCodec: Send + Sync + 'static {
    fn encode(&self, claims: &TokenClaims) -> Result<String, OAuthError>;

    /// Verifies the signature, then checks expiry against `now` (Unix seconds).
    fn decode_at(&self, token: &str, now: i64) -> Result<TokenClaims, OAuthError>;

    fn decode(&self, token: &str) -> Result<TokenClaims, OAuthError> {
        self.decode_at(token, Utc::now().timestamp())
    }
}

/// What an enhancer may look at besides the claims themselves.
#[derive(Debug, Clone, Copy)]
pub struct EnhancementContext<'a> {
    pub client: &'a ClientDescriptor,
    /// `None` for client-credentials tokens.
    pub principal: Option<&'a Principal>,
    pub grant_type: GrantType,
}

/// A single stage of the token enhancer chain.
#[async_trait]
pub trait TokenEnhancer: Send + Sync + 'static {
    /// Short name used in logs and failure messages.
    fn name(&self) -> &str;

    async fn enhance(
        &self,
        claims: TokenClaims,
        context: &EnhancementContext<'_>,
    ) -> Result<TokenClaims, OAuthError>;
}
