//! The authorization server: grants, the code flow, refresh and revocation.

use std::collections::BTreeSet;
use std::sync::Arc;

use chrono::Utc;
use serde_json::Value;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use super::config::{validate_validity, TokenSettings};
use super::crypto::{random_token, verify_against_dummy, verify_secret};
use super::enhancer::TokenEnhancerChain;
use super::error::OAuthError;
use super::jwt::JwtTokenCodec;
use super::memory::{InMemoryClientStore, InMemoryCodeStore, InMemoryRevocationList, InMemoryUserDirectory};
use super::oauth_provider::{
    AuthorizationCodeStore, ClientStore, EnhancementContext, RevocationList, TokenCodec, TokenEnhancer,
    UserDirectory,
};
use super::types::{
    format_scope, AuthorizationCode, ClientDescriptor, CodeRecord, CodeState, GrantType, IssuedTokenPair,
    Principal, TokenClaims, TokenType,
};

/// Claim linking a refresh token to the access token it was issued with.
const ACCESS_TOKEN_ID_CLAIM: &str = "ati";

/// Length in bytes of the random part of an authorization code.
const CODE_BYTES: usize = 24;

/// Issues, refreshes and revokes tokens.
///
/// Cheap to share behind an `Arc`; every method takes `&self` and the only
/// shared mutable state lives in the code store and the revocation list.
pub struct AuthorizationServer {
    clients: Arc<dyn ClientStore>,
    users: Arc<dyn UserDirectory>,
    codes: Arc<dyn AuthorizationCodeStore>,
    revocations: Arc<dyn RevocationList>,
    codec: Arc<dyn TokenCodec>,
    enhancers: TokenEnhancerChain,
    settings: TokenSettings,
}

impl AuthorizationServer {
    pub fn builder() -> AuthorizationServerBuilder {
        AuthorizationServerBuilder::new()
    }

    pub fn settings(&self) -> &TokenSettings {
        &self.settings
    }

    /// The codec tokens are signed with, for wiring a local verifier.
    pub fn codec(&self) -> Arc<dyn TokenCodec> {
        self.codec.clone()
    }

    pub fn revocation_list(&self) -> Arc<dyn RevocationList> {
        self.revocations.clone()
    }

    /// Looks up a client and checks its secret and grant permission.
    pub async fn authenticate_client(
        &self,
        client_id: &str,
        client_secret: &str,
        grant: GrantType,
    ) -> Result<ClientDescriptor, OAuthError> {
        let client = self.verify_client(client_id, client_secret).await?;
        if !client.allows_grant(grant) {
            warn!(client_id, grant_type = %grant, "client not allowed to use grant");
            return Err(OAuthError::UnauthorizedGrantType);
        }
        Ok(client)
    }

    /// Checks a client's secret without looking at its grants.
    pub async fn verify_client(&self, client_id: &str, client_secret: &str) -> Result<ClientDescriptor, OAuthError> {
        let client = self.clients.lookup_client(client_id).await?.ok_or(OAuthError::UnknownClient)?;
        if !verify_secret(&client.secret_hash, client_secret) {
            warn!(client_id, "client secret mismatch");
            return Err(OAuthError::InvalidClientSecret);
        }
        Ok(client)
    }

    /// Creates a single-use code for a subject who has already authenticated
    /// and approved the request.
    #[instrument(skip(self, requested_scope), level = "debug")]
    pub async fn initiate_authorization(
        &self,
        client_id: &str,
        subject_id: &str,
        requested_scope: &BTreeSet<String>,
        redirect_uri: &str,
    ) -> Result<AuthorizationCode, OAuthError> {
        let client = self.clients.lookup_client(client_id).await?.ok_or(OAuthError::UnknownClient)?;
        // The redirect target is checked first: every later error is sent back to it.
        if !client.redirect_uris.contains(redirect_uri) {
            return Err(OAuthError::RedirectMismatch);
        }
        if !client.allows_grant(GrantType::AuthorizationCode) {
            return Err(OAuthError::UnauthorizedGrantType);
        }
        let scope = if requested_scope.is_empty() {
            client.allowed_scopes.clone()
        } else if requested_scope.is_subset(&client.allowed_scopes) {
            requested_scope.clone()
        } else {
            return Err(OAuthError::ScopeNotAllowed);
        };
        if scope.is_empty() {
            return Err(OAuthError::ScopeNotAllowed);
        }
        if self.users.lookup_user(subject_id).await?.is_none() {
            return Err(OAuthError::InvalidCredentials);
        }

        let now = Utc::now().timestamp();
        let code = AuthorizationCode {
            code: random_token(CODE_BYTES)?,
            client_id: client.client_id.clone(),
            subject_id: subject_id.to_string(),
            scope,
            redirect_uri: redirect_uri.to_string(),
            issued_at: now,
            expires_at: now + self.settings.code_validity,
        };
        self.codes.store_code(code.clone()).await?;
        info!(client_id, subject_id, expires_at = code.expires_at, "authorization code issued");
        Ok(code)
    }

    /// Exchanges a code for tokens. The code is consumed only once every
    /// check has passed, so a failed attempt leaves it usable.
    #[instrument(skip(self, code, client_secret), level = "debug")]
    pub async fn exchange_code(
        &self,
        code: &str,
        client_id: &str,
        client_secret: &str,
        redirect_uri: &str,
    ) -> Result<IssuedTokenPair, OAuthError> {
        let now = Utc::now().timestamp();
        let record = match self.codes.get_code(code).await? {
            Some(CodeRecord { code, state: CodeState::CodeIssued }) if !code.is_expired_at(now) => code,
            _ => return Err(OAuthError::InvalidOrExpiredCode),
        };
        if record.client_id != client_id || record.redirect_uri != redirect_uri {
            warn!(client_id, "authorization code presented by another client or redirect");
            return Err(OAuthError::ClientMismatch);
        }
        let client = self.authenticate_client(client_id, client_secret, GrantType::AuthorizationCode).await?;

        let consumed = self.codes.consume_code(code, now).await?.ok_or(OAuthError::InvalidOrExpiredCode)?;
        debug!(client_id, subject_id = %consumed.subject_id, "authorization code consumed");

        let principal = self
            .users
            .lookup_user(&consumed.subject_id)
            .await?
            .ok_or(OAuthError::InvalidCredentials)?;
        let scope: BTreeSet<String> = consumed.scope.intersection(&client.allowed_scopes).cloned().collect();
        if scope.is_empty() {
            return Err(OAuthError::ScopeNotAllowed);
        }
        self.issue(&client, Some(&principal), GrantType::AuthorizationCode, scope, principal.roles.clone(), None)
            .await
    }

    /// Resource owner password grant.
    #[instrument(skip(self, client_secret, password, requested_scope), level = "debug")]
    pub async fn grant_password(
        &self,
        client_id: &str,
        client_secret: &str,
        username: &str,
        password: &str,
        requested_scope: &BTreeSet<String>,
    ) -> Result<IssuedTokenPair, OAuthError> {
        let client = self.authenticate_client(client_id, client_secret, GrantType::Password).await?;
        let principal = match self.users.lookup_user(username).await? {
            Some(principal) => principal,
            None => {
                verify_against_dummy(password);
                warn!(client_id, username, "unknown resource owner");
                return Err(OAuthError::InvalidCredentials);
            }
        };
        if !self.users.verify_password(&principal, password).await? {
            warn!(client_id, username, "resource owner password mismatch");
            return Err(OAuthError::InvalidCredentials);
        }
        let scope = narrow_scope(requested_scope, &client.allowed_scopes)?;
        self.issue(&client, Some(&principal), GrantType::Password, scope, principal.roles.clone(), None)
            .await
    }

    /// Client credentials grant; the client is its own subject.
    #[instrument(skip(self, client_secret, requested_scope), level = "debug")]
    pub async fn grant_client_credentials(
        &self,
        client_id: &str,
        client_secret: &str,
        requested_scope: &BTreeSet<String>,
    ) -> Result<IssuedTokenPair, OAuthError> {
        let client = self.authenticate_client(client_id, client_secret, GrantType::ClientCredentials).await?;
        let scope = narrow_scope(requested_scope, &client.allowed_scopes)?;
        self.issue(&client, None, GrantType::ClientCredentials, scope, BTreeSet::new(), None).await
    }

    /// Trades a refresh token for a new access token with the same subject.
    ///
    /// Scope and roles can only shrink: scope to what the client may still
    /// ask for, roles to what the user still has.
    #[instrument(skip(self, client_secret, refresh_token), level = "debug")]
    pub async fn refresh(
        &self,
        client_id: &str,
        client_secret: &str,
        refresh_token: &str,
    ) -> Result<IssuedTokenPair, OAuthError> {
        let client = self.authenticate_client(client_id, client_secret, GrantType::RefreshToken).await?;
        let claims = self.codec.decode(refresh_token)?;
        if claims.token_type != TokenType::Refresh {
            return Err(OAuthError::InvalidRefreshToken);
        }
        if claims.client_id != client.client_id {
            warn!(client_id, "refresh token presented by another client");
            return Err(OAuthError::ClientMismatch);
        }
        if self.revocations.is_revoked(&claims.token_id).await? {
            return Err(OAuthError::InvalidRefreshToken);
        }
        let principal = self
            .users
            .lookup_user(&claims.subject_id)
            .await?
            .ok_or(OAuthError::InvalidRefreshToken)?;

        let scope: BTreeSet<String> = claims.scope.intersection(&client.allowed_scopes).cloned().collect();
        if scope.is_empty() {
            return Err(OAuthError::InvalidRefreshToken);
        }
        let roles: BTreeSet<String> = claims.roles.intersection(&principal.roles).cloned().collect();

        if self.settings.reuse_refresh_tokens {
            let previous = PreviousRefresh { token: refresh_token, claims: &claims };
            return self
                .issue(&client, Some(&principal), GrantType::RefreshToken, scope, roles, Some(previous))
                .await;
        }
        // Claim the old token before issuing, so only one caller can rotate it.
        if !self.revocations.revoke(&claims.token_id, claims.expires_at).await? {
            warn!(client_id, "refresh token already rotated");
            return Err(OAuthError::InvalidRefreshToken);
        }
        let pair = self.issue(&client, Some(&principal), GrantType::RefreshToken, scope, roles, None).await?;
        info!(client_id, subject_id = %claims.subject_id, "refresh token rotated");
        Ok(pair)
    }

    /// Revokes an access or refresh token owned by the calling client.
    ///
    /// An already expired token is accepted silently.
    #[instrument(skip(self, client_secret, token), level = "debug")]
    pub async fn revoke_token(&self, client_id: &str, client_secret: &str, token: &str) -> Result<(), OAuthError> {
        let client = self.verify_client(client_id, client_secret).await?;
        let claims = match self.codec.decode(token) {
            Ok(claims) => claims,
            Err(OAuthError::Expired) => return Ok(()),
            Err(err) => return Err(err),
        };
        if claims.client_id != client.client_id {
            return Err(OAuthError::ClientMismatch);
        }
        if self.revocations.revoke(&claims.token_id, claims.expires_at).await? {
            info!(client_id, token_type = ?claims.token_type, "token revoked");
        }
        Ok(())
    }

    /// Decodes an access token and checks it against the revocation list.
    #[instrument(skip(self, token), level = "debug")]
    pub async fn check_token(&self, token: &str) -> Result<TokenClaims, OAuthError> {
        let claims = self.codec.decode(token)?;
        if claims.token_type != TokenType::Access {
            return Err(OAuthError::WrongTokenType);
        }
        if self.revocations.is_revoked(&claims.token_id).await? {
            return Err(OAuthError::Revoked);
        }
        Ok(claims)
    }

    /// Revokes a live authorization code; `false` if it was unknown or already final.
    pub async fn revoke_code(&self, code: &str) -> Result<bool, OAuthError> {
        let revoked = self.codes.revoke_code(code).await?;
        if revoked {
            info!("authorization code revoked");
        }
        Ok(revoked)
    }

    /// Drops codes that expired by `now` or were already exchanged or revoked.
    pub async fn purge_expired_codes(&self, now: i64) -> Result<usize, OAuthError> {
        let purged = self.codes.purge_expired(now).await?;
        debug!(purged, "expired authorization codes purged");
        Ok(purged)
    }

    fn validity_for(&self, client: &ClientDescriptor) -> Result<(i64, i64), OAuthError> {
        let access = client.access_token_validity.unwrap_or(self.settings.access_token_validity);
        let refresh = client.refresh_token_validity.unwrap_or(self.settings.refresh_token_validity);
        validate_validity(access, refresh)?;
        Ok((access, refresh))
    }

    fn issues_refresh_token(&self, client: &ClientDescriptor, grant: GrantType) -> bool {
        self.settings.support_refresh_token
            && grant != GrantType::ClientCredentials
            && client.allows_grant(GrantType::RefreshToken)
    }

    /// Builds, enhances and signs the access token, then the refresh token.
    async fn issue(
        &self,
        client: &ClientDescriptor,
        principal: Option<&Principal>,
        grant: GrantType,
        scope: BTreeSet<String>,
        roles: BTreeSet<String>,
        previous: Option<PreviousRefresh<'_>>,
    ) -> Result<IssuedTokenPair, OAuthError> {
        let (access_validity, refresh_validity) = self.validity_for(client)?;
        let now = Utc::now().timestamp();
        let subject_id = principal.map_or_else(|| client.client_id.clone(), |p| p.subject_id.clone());

        let mut access_expires_at = now + access_validity;
        if let Some(previous) = &previous {
            access_expires_at = access_expires_at.min(previous.claims.expires_at);
        }
        let access = TokenClaims {
            subject_id,
            client_id: client.client_id.clone(),
            scope,
            roles,
            resource_ids: client.resource_ids.clone(),
            issued_at: now,
            expires_at: access_expires_at,
            token_id: Uuid::new_v4().to_string(),
            token_type: TokenType::Access,
            additional: Default::default(),
        };
        let context = EnhancementContext { client, principal, grant_type: grant };
        let access = self.enhancers.apply(access, &context).await?;
        let access_token = self.codec.encode(&access)?;

        let refresh_token = match previous {
            Some(previous) => Some(previous.token.to_string()),
            None if self.issues_refresh_token(client, grant) => {
                let mut refresh = TokenClaims {
                    token_id: Uuid::new_v4().to_string(),
                    token_type: TokenType::Refresh,
                    expires_at: now + refresh_validity,
                    additional: Default::default(),
                    ..access.clone()
                };
                refresh
                    .additional
                    .insert(ACCESS_TOKEN_ID_CLAIM.to_string(), Value::String(access.token_id.clone()));
                Some(self.codec.encode(&refresh)?)
            }
            None => None,
        };

        info!(
            client_id = %client.client_id,
            subject_id = %access.subject_id,
            grant_type = %grant,
            scope = %format_scope(&access.scope),
            refresh = refresh_token.is_some(),
            "tokens issued"
        );
        Ok(IssuedTokenPair {
            access_token,
            refresh_token,
            expires_in: (access.expires_at - now).max(0) as u64,
            token_type: "bearer".to_string(),
            scope: format_scope(&access.scope),
        })
    }
}

/// The refresh token being reused, when refresh tokens are not rotated.
struct PreviousRefresh<'a> {
    token: &'a str,
    claims: &'a TokenClaims,
}

/// Requested scope narrowed to the client's; empty means "everything allowed".
fn narrow_scope(requested: &BTreeSet<String>, allowed: &BTreeSet<String>) -> Result<BTreeSet<String>, OAuthError> {
    let scope: BTreeSet<String> = if requested.is_empty() {
        allowed.clone()
    } else {
        requested.intersection(allowed).cloned().collect()
    };
    if scope.is_empty() {
        return Err(OAuthError::ScopeNotAllowed);
    }
    Ok(scope)
}

/// Builder for [`AuthorizationServer`]; stores default to the in-memory ones.
pub struct AuthorizationServerBuilder {
    clients: Option<Arc<dyn ClientStore>>,
    users: Option<Arc<dyn UserDirectory>>,
    codes: Option<Arc<dyn AuthorizationCodeStore>>,
    revocations: Option<Arc<dyn RevocationList>>,
    codec: Option<Arc<dyn TokenCodec>>,
    enhancers: TokenEnhancerChain,
    settings: TokenSettings,
}

impl Default for AuthorizationServerBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl AuthorizationServerBuilder {
    pub fn new() -> Self {
        Self {
            clients: None,
            users: None,
            codes: None,
            revocations: None,
            codec: None,
            enhancers: TokenEnhancerChain::new(),
            settings: TokenSettings::default(),
        }
    }

    pub fn client_store(mut self, store: Arc<dyn ClientStore>) -> Self {
        self.clients = Some(store);
        self
    }

    pub fn user_directory(mut self, users: Arc<dyn UserDirectory>) -> Self {
        self.users = Some(users);
        self
    }

    pub fn code_store(mut self, store: Arc<dyn AuthorizationCodeStore>) -> Self {
        self.codes = Some(store);
        self
    }

    pub fn revocation_list(mut self, list: Arc<dyn RevocationList>) -> Self {
        self.revocations = Some(list);
        self
    }

    pub fn token_codec(mut self, codec: Arc<dyn TokenCodec>) -> Self {
        self.codec = Some(codec);
        self
    }

    /// Shorthand for an HS256 [`JwtTokenCodec`].
    pub fn use_jwt_hs256(self, secret: &[u8]) -> Self {
        self.token_codec(Arc::new(JwtTokenCodec::new_hs256(secret)))
    }

    /// Appends one enhancer stage.
    pub fn enhancer(mut self, enhancer: Arc<dyn TokenEnhancer>) -> Self {
        self.enhancers = self.enhancers.with(enhancer);
        self
    }

    /// Replaces the whole chain.
    pub fn enhancer_chain(mut self, chain: TokenEnhancerChain) -> Self {
        self.enhancers = chain;
        self
    }

    pub fn settings(mut self, settings: TokenSettings) -> Self {
        self.settings = settings;
        self
    }

    pub fn access_token_validity(mut self, seconds: i64) -> Self {
        self.settings.access_token_validity = seconds;
        self
    }

    pub fn refresh_token_validity(mut self, seconds: i64) -> Self {
        self.settings.refresh_token_validity = seconds;
        self
    }

    pub fn code_validity(mut self, seconds: i64) -> Self {
        self.settings.code_validity = seconds;
        self
    }

    pub fn reuse_refresh_tokens(mut self, reuse: bool) -> Self {
        self.settings.reuse_refresh_tokens = reuse;
        self
    }

    pub fn support_refresh_token(mut self, support: bool) -> Self {
        self.settings.support_refresh_token = support;
        self
    }

    pub fn build(self) -> Result<AuthorizationServer, OAuthError> {
        self.settings.validate()?;
        let codec = self
            .codec
            .ok_or_else(|| OAuthError::Configuration("a token codec is required".into()))?;
        Ok(AuthorizationServer {
            clients: self.clients.unwrap_or_else(|| Arc::new(InMemoryClientStore::new(Vec::new()))),
            users: self.users.unwrap_or_else(|| Arc::new(InMemoryUserDirectory::new(Vec::new()))),
            codes: self.codes.unwrap_or_else(|| Arc::new(InMemoryCodeStore::new())),
            revocations: self.revocations.unwrap_or_else(|| Arc::new(InMemoryRevocationList::new())),
            codec,
            enhancers: self.enhancers,
            settings: self.settings,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn set(items: &[&str]) -> BTreeSet<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn empty_request_means_everything_allowed() {
        assert_eq!(narrow_scope(&set(&[]), &set(&["read", "write"])).unwrap(), set(&["read", "write"]));
        assert_eq!(narrow_scope(&set(&["read", "admin"]), &set(&["read", "write"])).unwrap(), set(&["read"]));
        assert_eq!(narrow_scope(&set(&["admin"]), &set(&["read"])), Err(OAuthError::ScopeNotAllowed));
    }

    #[test]
    fn builder_requires_codec() {
        assert!(matches!(AuthorizationServer::builder().build(), Err(OAuthError::Configuration(_))));
    }

    #[test]
    fn builder_rejects_inverted_validity() {
        let built = AuthorizationServer::builder()
            .use_jwt_hs256(b"secret")
            .access_token_validity(3600)
            .refresh_token_validity(60)
            .build();
        assert!(matches!(built, Err(OAuthError::Configuration(_))));
    }
}
