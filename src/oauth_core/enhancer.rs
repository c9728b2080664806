//! Token enhancer chain and the stock enhancers.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use tracing::{debug, warn};

use super::error::OAuthError;
use super::oauth_provider::{EnhancementContext, TokenEnhancer};
use super::types::{TokenClaims, RESERVED_CLAIMS};

/// Ordered pipeline of enhancers, fixed when the server is built.
///
/// After every stage the chain checks that core claims are untouched, that
/// scope and roles only shrank, and that no reserved claim name was written
/// into `additional`. Any violation aborts issuance.
#[derive(Clone, Default)]
pub struct TokenEnhancerChain {
    stages: Vec<Arc<dyn TokenEnhancer>>,
}

impl TokenEnhancerChain {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a stage; stages run in insertion order.
    pub fn with(mut self, enhancer: Arc<dyn TokenEnhancer>) -> Self {
        self.stages.push(enhancer);
        self
    }

    pub fn len(&self) -> usize {
        self.stages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.stages.is_empty()
    }

    pub fn stage_names(&self) -> Vec<String> {
        self.stages.iter().map(|s| s.name().to_string()).collect()
    }

    /// Runs every stage in order and returns the final claims.
    pub async fn apply(
        &self,
        mut claims: TokenClaims,
        context: &EnhancementContext<'_>,
    ) -> Result<TokenClaims, OAuthError> {
        for stage in &self.stages {
            let before = claims.clone();
            claims = stage.enhance(claims, context).await.map_err(|err| {
                warn!(enhancer = stage.name(), error = %err, "token enhancer failed");
                match err {
                    OAuthError::EnhancementFailed(_) => err,
                    other => OAuthError::EnhancementFailed(format!("{}: {}", stage.name(), other)),
                }
            })?;
            check_stage(stage.name(), &before, &claims)?;
            debug!(enhancer = stage.name(), "token enhancer applied");
        }
        Ok(claims)
    }
}

#[async_trait]
impl TokenEnhancer for TokenEnhancerChain {
    fn name(&self) -> &str {
        "chain"
    }

    async fn enhance(
        &self,
        claims: TokenClaims,
        context: &EnhancementContext<'_>,
    ) -> Result<TokenClaims, OAuthError> {
        self.apply(claims, context).await
    }
}

fn check_stage(stage: &str, before: &TokenClaims, after: &TokenClaims) -> Result<(), OAuthError> {
    let fail = |what: &str| Err(OAuthError::EnhancementFailed(format!("{} {}", stage, what)));
    if after.subject_id != before.subject_id
        || after.client_id != before.client_id
        || after.issued_at != before.issued_at
        || after.expires_at != before.expires_at
        || after.token_id != before.token_id
        || after.token_type != before.token_type
        || after.resource_ids != before.resource_ids
    {
        return fail("modified a core claim");
    }
    if !after.scope.is_subset(&before.scope) {
        return fail("widened the scope");
    }
    if !after.roles.is_subset(&before.roles) {
        return fail("widened the roles");
    }
    if let Some(key) = after.additional.keys().find(|k| RESERVED_CLAIMS.contains(&k.as_str())) {
        return fail(&format!("wrote reserved claim `{}`", key));
    }
    Ok(())
}

/// Adds a fixed set of key/value pairs to every token.
pub struct AdditionalInformationEnhancer {
    entries: BTreeMap<String, Value>,
}

impl AdditionalInformationEnhancer {
    pub fn new(entries: BTreeMap<String, Value>) -> Self {
        Self { entries }
    }

    pub fn from_pairs<K: Into<String>, V: Into<Value>>(pairs: impl IntoIterator<Item = (K, V)>) -> Self {
        Self::new(pairs.into_iter().map(|(k, v)| (k.into(), v.into())).collect())
    }
}

#[async_trait]
impl TokenEnhancer for AdditionalInformationEnhancer {
    fn name(&self) -> &str {
        "additional_information"
    }

    async fn enhance(
        &self,
        mut claims: TokenClaims,
        _context: &EnhancementContext<'_>,
    ) -> Result<TokenClaims, OAuthError> {
        for (key, value) in &self.entries {
            claims.additional.insert(key.clone(), value.clone());
        }
        Ok(claims)
    }
}

/// Copies selected principal attributes into the token.
///
/// Client-credentials tokens have no principal and pass through unchanged.
/// With `required`, a missing attribute fails the issuance.
pub struct PrincipalAttributesEnhancer {
    keys: Vec<String>,
    required: bool,
}

impl PrincipalAttributesEnhancer {
    pub fn new<S: Into<String>>(keys: impl IntoIterator<Item = S>) -> Self {
        Self { keys: keys.into_iter().map(Into::into).collect(), required: false }
    }

    pub fn required(mut self) -> Self {
        self.required = true;
        self
    }
}

#[async_trait]
impl TokenEnhancer for PrincipalAttributesEnhancer {
    fn name(&self) -> &str {
        "principal_attributes"
    }

    async fn enhance(
        &self,
        mut claims: TokenClaims,
        context: &EnhancementContext<'_>,
    ) -> Result<TokenClaims, OAuthError> {
        let Some(principal) = context.principal else {
            return Ok(claims);
        };
        for key in &self.keys {
            match principal.attributes.get(key) {
                Some(value) => {
                    claims.additional.insert(key.clone(), Value::String(value.clone()));
                }
                None if self.required => {
                    return Err(OAuthError::EnhancementFailed(format!(
                        "principal {} has no attribute `{}`",
                        principal.subject_id, key
                    )));
                }
                None => {}
            }
        }
        Ok(claims)
    }
}

/// Narrows scope to a fixed ceiling, and optionally roles to an allow-list.
pub struct ScopeCeilingEnhancer {
    scopes: BTreeSet<String>,
    roles: Option<BTreeSet<String>>,
}

impl ScopeCeilingEnhancer {
    pub fn new<S: Into<String>>(scopes: impl IntoIterator<Item = S>) -> Self {
        Self { scopes: scopes.into_iter().map(Into::into).collect(), roles: None }
    }

    pub fn with_roles<S: Into<String>>(mut self, roles: impl IntoIterator<Item = S>) -> Self {
        self.roles = Some(roles.into_iter().map(Into::into).collect());
        self
    }
}

#[async_trait]
impl TokenEnhancer for ScopeCeilingEnhancer {
    fn name(&self) -> &str {
        "scope_ceiling"
    }

    async fn enhance(
        &self,
        mut claims: TokenClaims,
        _context: &EnhancementContext<'_>,
    ) -> Result<TokenClaims, OAuthError> {
        claims.scope.retain(|s| self.scopes.contains(s));
        if let Some(roles) = &self.roles {
            claims.roles.retain(|r| roles.contains(r));
        }
        Ok(claims)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::oauth_core::types::{ClientDescriptor, GrantType, Principal, TokenType};
    use serde_json::json;

    fn claims() -> TokenClaims {
        TokenClaims {
            subject_id: "alice".into(),
            client_id: "acme".into(),
            scope: BTreeSet::from(["read".to_string(), "write".to_string()]),
            roles: BTreeSet::from(["user".to_string(), "admin".to_string()]),
            resource_ids: BTreeSet::new(),
            issued_at: 100,
            expires_at: 200,
            token_id: "t".into(),
            token_type: TokenType::Access,
            additional: BTreeMap::new(),
        }
    }

    struct Widening;

    #[async_trait]
    impl TokenEnhancer for Widening {
        fn name(&self) -> &str {
            "widening"
        }

        async fn enhance(
            &self,
            mut claims: TokenClaims,
            _context: &EnhancementContext<'_>,
        ) -> Result<TokenClaims, OAuthError> {
            claims.scope.insert("delete".into());
            Ok(claims)
        }
    }

    struct Resubject;

    #[async_trait]
    impl TokenEnhancer for Resubject {
        fn name(&self) -> &str {
            "resubject"
        }

        async fn enhance(
            &self,
            mut claims: TokenClaims,
            _context: &EnhancementContext<'_>,
        ) -> Result<TokenClaims, OAuthError> {
            claims.subject_id = "mallory".into();
            Ok(claims)
        }
    }

    #[tokio::test]
    async fn stages_run_in_order() {
        let client = ClientDescriptor::new("acme", "");
        let principal = Principal::new("alice").with_attribute("dept", "ops");
        let ctx = EnhancementContext { client: &client, principal: Some(&principal), grant_type: GrantType::Password };
        let chain = TokenEnhancerChain::new()
            .with(Arc::new(AdditionalInformationEnhancer::from_pairs([("author", "first")])))
            .with(Arc::new(AdditionalInformationEnhancer::from_pairs([("author", "second")])))
            .with(Arc::new(PrincipalAttributesEnhancer::new(["dept"])))
            .with(Arc::new(ScopeCeilingEnhancer::new(["read"]).with_roles(["user"])));
        let out = chain.apply(claims(), &ctx).await.unwrap();
        assert_eq!(out.additional["author"], json!("second"));
        assert_eq!(out.additional["dept"], json!("ops"));
        assert_eq!(out.scope, BTreeSet::from(["read".to_string()]));
        assert_eq!(out.roles, BTreeSet::from(["user".to_string()]));
        assert_eq!(chain.stage_names().len(), 4);
    }

    #[tokio::test]
    async fn widening_or_core_edits_abort() {
        let client = ClientDescriptor::new("acme", "");
        let ctx = EnhancementContext { client: &client, principal: None, grant_type: GrantType::ClientCredentials };

        let chain = TokenEnhancerChain::new().with(Arc::new(Widening));
        assert!(matches!(chain.apply(claims(), &ctx).await, Err(OAuthError::EnhancementFailed(_))));

        let chain = TokenEnhancerChain::new().with(Arc::new(Resubject));
        assert!(matches!(chain.apply(claims(), &ctx).await, Err(OAuthError::EnhancementFailed(_))));

        let chain = TokenEnhancerChain::new()
            .with(Arc::new(AdditionalInformationEnhancer::from_pairs([("exp", 0)])));
        assert!(matches!(chain.apply(claims(), &ctx).await, Err(OAuthError::EnhancementFailed(_))));
    }

    #[tokio::test]
    async fn required_attribute_missing_fails() {
        let client = ClientDescriptor::new("acme", "");
        let principal = Principal::new("alice");
        let ctx = EnhancementContext { client: &client, principal: Some(&principal), grant_type: GrantType::Password };
        let chain = TokenEnhancerChain::new().with(Arc::new(PrincipalAttributesEnhancer::new(["dept"]).required()));
        assert!(matches!(chain.apply(claims(), &ctx).await, Err(OAuthError::EnhancementFailed(_))));
    }
}
