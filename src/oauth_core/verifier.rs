//! Resource-server side: token verification and path access policy.
//!
//! A [`ResourceVerifier`] decodes the bearer token either locally with the
//! shared [`TokenCodec`] or remotely through the authorization server's
//! check-token endpoint, then checks the audience and the role/scope
//! [`Requirement`] of the requested path. Every failure denies access.

use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;

use serde::Deserialize;
use tracing::{debug, instrument, warn};

use super::crypto::basic_auth_header;
use super::endpoint::encode_form;
use super::error::OAuthError;
use super::http_client::{HttpRequest, OAuthHttpClient};
use super::oauth_provider::{RevocationList, TokenCodec};
use super::types::{AuthenticatedPrincipal, TokenClaims, TokenType};

/// Default bound on a remote check-token call.
pub const DEFAULT_REMOTE_TIMEOUT: Duration = Duration::from_secs(2);

/// Roles and scopes a request needs; holding any one of them is enough.
/// Both empty means any authenticated principal.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Requirement {
    pub roles: BTreeSet<String>,
    pub scopes: BTreeSet<String>,
}

impl Requirement {
    pub fn authenticated() -> Self {
        Self::default()
    }

    pub fn role(role: impl Into<String>) -> Self {
        Self { roles: BTreeSet::from([role.into()]), scopes: BTreeSet::new() }
    }

    pub fn scope(scope: impl Into<String>) -> Self {
        Self { roles: BTreeSet::new(), scopes: BTreeSet::from([scope.into()]) }
    }

    pub fn any_of<R, S>(roles: impl IntoIterator<Item = R>, scopes: impl IntoIterator<Item = S>) -> Self
    where
        R: Into<String>,
        S: Into<String>,
    {
        Self {
            roles: roles.into_iter().map(Into::into).collect(),
            scopes: scopes.into_iter().map(Into::into).collect(),
        }
    }

    pub fn is_authenticated_only(&self) -> bool {
        self.roles.is_empty() && self.scopes.is_empty()
    }

    pub fn is_satisfied_by(&self, principal: &AuthenticatedPrincipal) -> bool {
        self.is_authenticated_only()
            || !self.roles.is_disjoint(&principal.roles)
            || !self.scopes.is_disjoint(&principal.scope)
    }
}

/// One segment of an ant-style path pattern.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PathSegment {
    Literal(String),
    /// `*`, exactly one segment.
    Any,
    /// `**`, zero or more segments.
    AnyPath,
}

/// Parsed ant-style pattern such as `/admin/**` or `/api/*/items`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PathPattern {
    raw: String,
    segments: Vec<PathSegment>,
}

impl PathPattern {
    pub fn parse(pattern: &str) -> Self {
        let segments = split_path(pattern)
            .map(|segment| match segment {
                "**" => PathSegment::AnyPath,
                "*" => PathSegment::Any,
                literal => PathSegment::Literal(literal.to_string()),
            })
            .collect();
        Self { raw: pattern.to_string(), segments }
    }

    pub fn as_str(&self) -> &str {
        &self.raw
    }

    pub fn matches(&self, path: &str) -> bool {
        // Query strings are not part of the matched path.
        let path = path.split(['?', '#']).next().unwrap_or_default();
        let segments: Vec<&str> = split_path(path).collect();
        match_segments(&self.segments, &segments)
    }
}

/// Rejects paths that could resolve to something other than what the patterns
/// see: dot segments, `;` parameters, backslashes and their percent-encoded forms.
pub fn check_normalized(path: &str) -> Result<(), OAuthError> {
    let path = path.split(['?', '#']).next().unwrap_or_default();
    let lowered = path.to_ascii_lowercase();
    let encoded = ["%2e", "%2f", "%3b", "%5c", "%25"].iter().any(|seq| lowered.contains(seq));
    let dotted = split_path(path).any(|segment| segment == "." || segment == "..");
    if encoded || dotted || path.contains([';', '\\']) {
        warn!(path, "rejected non-normalized request path");
        return Err(OAuthError::InvalidRequest("request path is not normalized".into()));
    }
    Ok(())
}

fn split_path(path: &str) -> impl Iterator<Item = &str> {
    path.split('/').filter(|s| !s.is_empty())
}

fn match_segments(pattern: &[PathSegment], path: &[&str]) -> bool {
    match pattern.split_first() {
        None => path.is_empty(),
        Some((PathSegment::AnyPath, rest)) => (0..=path.len()).any(|skip| match_segments(rest, &path[skip..])),
        Some((segment, rest)) => match path.split_first() {
            None => false,
            Some((head, tail)) => {
                let head_matches = match segment {
                    PathSegment::Literal(literal) => literal.as_str() == *head,
                    _ => true,
                };
                head_matches && match_segments(rest, tail)
            }
        },
    }
}

/// A pattern and what matching requests need.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AccessRule {
    pub pattern: PathPattern,
    pub requirement: Requirement,
}

impl AccessRule {
    pub fn new(pattern: &str, requirement: Requirement) -> Self {
        Self { pattern: PathPattern::parse(pattern), requirement }
    }
}

/// Ordered rules; the first matching rule decides, anything else only needs
/// an authenticated principal.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AccessPolicy {
    rules: Vec<AccessRule>,
}

impl AccessPolicy {
    pub fn new() -> Self {
        Self::default()
    }

    /// `/admin/**` needs role `admin`, everything else any authenticated principal.
    pub fn admin_default() -> Self {
        Self::new().rule(AccessRule::new("/admin/**", Requirement::role("admin")))
    }

    pub fn rule(mut self, rule: AccessRule) -> Self {
        self.rules.push(rule);
        self
    }

    pub fn rules(&self) -> &[AccessRule] {
        &self.rules
    }

    pub fn requirement_for(&self, path: &str) -> Requirement {
        self.rules
            .iter()
            .find(|rule| rule.pattern.matches(path))
            .map(|rule| rule.requirement.clone())
            .unwrap_or_default()
    }
}

/// Whether access was granted on authentication alone or by a rule.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccessStatus {
    Authenticated,
    Authorized,
}

#[derive(Debug, Clone, PartialEq)]
pub struct VerifiedAccess {
    pub status: AccessStatus,
    pub principal: AuthenticatedPrincipal,
}

/// Extracts the token from an `Authorization: Bearer ...` header value.
pub fn parse_bearer(header: &str) -> Option<&str> {
    let (scheme, token) = header.trim().split_once(' ')?;
    if !scheme.eq_ignore_ascii_case("bearer") {
        return None;
    }
    let token = token.trim();
    (!token.is_empty()).then_some(token)
}

/// Calls the authorization server's check-token endpoint.
#[derive(Clone)]
pub struct RemoteTokenServices {
    http: Arc<dyn OAuthHttpClient>,
    check_token_url: String,
    client_id: String,
    client_secret: String,
    timeout: Duration,
}

#[derive(Deserialize)]
struct RemoteError {
    #[serde(default)]
    error: String,
    #[serde(default)]
    error_kind: Option<String>,
}

impl RemoteTokenServices {
    pub fn new(
        http: Arc<dyn OAuthHttpClient>,
        check_token_url: impl Into<String>,
        client_id: impl Into<String>,
        client_secret: impl Into<String>,
    ) -> Self {
        Self {
            http,
            check_token_url: check_token_url.into(),
            client_id: client_id.into(),
            client_secret: client_secret.into(),
            timeout: DEFAULT_REMOTE_TIMEOUT,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// One bounded round-trip. Anything other than a clear answer fails closed.
    pub async fn check_token(&self, token: &str) -> Result<TokenClaims, OAuthError> {
        let request = HttpRequest::post_form(&self.check_token_url, encode_form(&[("token", token)]))
            .header("Authorization", basic_auth_header(&self.client_id, &self.client_secret))
            .header("Accept", "application/json")
            .timeout(self.timeout);

        let response = match tokio::time::timeout(self.timeout, self.http.execute(request)).await {
            Ok(Ok(response)) => response,
            Ok(Err(err)) => {
                warn!(url = %self.check_token_url, error = %err, "check_token call failed");
                return Err(OAuthError::VerificationUnavailable(format!("check_token call failed: {}", err)));
            }
            Err(_) => {
                warn!(url = %self.check_token_url, timeout_ms = self.timeout.as_millis() as u64, "check_token timed out");
                return Err(OAuthError::VerificationUnavailable("check_token timed out".into()));
            }
        };

        match response.status {
            200 => {
                let mut claims: TokenClaims = serde_json::from_slice(&response.body).map_err(|e| {
                    OAuthError::VerificationUnavailable(format!("unreadable check_token response: {}", e))
                })?;
                let active = claims.additional.remove("active");
                if active != Some(serde_json::Value::Bool(true)) {
                    return Err(OAuthError::VerificationUnavailable("check_token reported an inactive token".into()));
                }
                Ok(claims)
            }
            400..=499 => {
                let body: Option<RemoteError> = serde_json::from_slice(&response.body).ok();
                let mapped = body
                    .as_ref()
                    .and_then(|b| b.error_kind.as_deref())
                    .and_then(OAuthError::token_error_from_kind);
                match mapped {
                    Some(err) => Err(err),
                    None => {
                        let code = body.map(|b| b.error).unwrap_or_default();
                        Err(OAuthError::VerificationUnavailable(format!(
                            "check_token answered {} {}",
                            response.status, code
                        )))
                    }
                }
            }
            status => Err(OAuthError::VerificationUnavailable(format!("check_token answered {}", status))),
        }
    }
}

/// Where claims come from.
#[derive(Clone)]
pub enum VerificationMode {
    /// Self-contained tokens, no network.
    Local {
        codec: Arc<dyn TokenCodec>,
        revocations: Option<Arc<dyn RevocationList>>,
    },
    Remote(RemoteTokenServices),
}

/// Verifies bearer tokens for one resource server.
#[derive(Clone)]
pub struct ResourceVerifier {
    resource_id: String,
    mode: VerificationMode,
    policy: AccessPolicy,
}

impl ResourceVerifier {
    pub fn local(resource_id: impl Into<String>, codec: Arc<dyn TokenCodec>) -> Self {
        Self {
            resource_id: resource_id.into(),
            mode: VerificationMode::Local { codec, revocations: None },
            policy: AccessPolicy::admin_default(),
        }
    }

    pub fn remote(resource_id: impl Into<String>, services: RemoteTokenServices) -> Self {
        Self {
            resource_id: resource_id.into(),
            mode: VerificationMode::Remote(services),
            policy: AccessPolicy::admin_default(),
        }
    }

    /// Consult a revocation list in local mode; ignored in remote mode where
    /// the authorization server checks it.
    pub fn with_revocation_list(mut self, list: Arc<dyn RevocationList>) -> Self {
        if let VerificationMode::Local { revocations, .. } = &mut self.mode {
            *revocations = Some(list);
        }
        self
    }

    pub fn with_policy(mut self, policy: AccessPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn resource_id(&self) -> &str {
        &self.resource_id
    }

    pub fn policy(&self) -> &AccessPolicy {
        &self.policy
    }

    async fn claims(&self, token: &str) -> Result<TokenClaims, OAuthError> {
        match &self.mode {
            VerificationMode::Local { codec, revocations } => {
                let claims = codec.decode(token)?;
                if let Some(list) = revocations {
                    if list.is_revoked(&claims.token_id).await? {
                        return Err(OAuthError::Revoked);
                    }
                }
                Ok(claims)
            }
            VerificationMode::Remote(services) => services.check_token(token).await,
        }
    }

    /// Decodes `token` and checks audience and `requirement`.
    #[instrument(skip(self, token), fields(resource_id = %self.resource_id), level = "debug")]
    pub async fn verify(&self, token: &str, requirement: &Requirement) -> Result<VerifiedAccess, OAuthError> {
        let claims = self.claims(token).await?;
        if claims.token_type != TokenType::Access {
            return Err(OAuthError::WrongTokenType);
        }
        if !claims.resource_ids.contains(&self.resource_id) {
            warn!(client_id = %claims.client_id, "token not issued for this resource");
            return Err(OAuthError::ResourceNotAuthorized);
        }
        let principal = AuthenticatedPrincipal::from(claims);
        if !requirement.is_satisfied_by(&principal) {
            warn!(subject_id = %principal.subject_id, ?requirement, "access denied");
            return Err(OAuthError::Forbidden);
        }
        let status = if requirement.is_authenticated_only() {
            AccessStatus::Authenticated
        } else {
            AccessStatus::Authorized
        };
        debug!(subject_id = %principal.subject_id, ?status, "access granted");
        Ok(VerifiedAccess { status, principal })
    }

    /// Verifies against the policy rule for `path`.
    pub async fn authorize_path(&self, token: &str, path: &str) -> Result<VerifiedAccess, OAuthError> {
        check_normalized(path)?;
        let requirement = self.policy.requirement_for(path);
        self.verify(token, &requirement).await
    }

    /// Same as [`authorize_path`](Self::authorize_path), starting from the raw
    /// `Authorization` header.
    pub async fn authorize_header(&self, authorization: Option<&str>, path: &str) -> Result<VerifiedAccess, OAuthError> {
        let token = authorization
            .and_then(parse_bearer)
            .ok_or_else(|| OAuthError::InvalidRequest("missing bearer token".into()))?;
        self.authorize_path(token, path).await
    }
}
