#![allow(dead_code)]

use std::collections::BTreeSet;
use std::sync::Arc;

use starberry_auth::oauth_core::crypto::hash_secret_with_iterations;
use starberry_auth::{
    AuthorizationServer, AuthorizationServerBuilder, ClientDescriptor, GrantType, InMemoryClientStore,
    InMemoryUserDirectory, Principal, UserRecord,
};

pub const SIGNING_SECRET: &[u8] = b"javaboy";
pub const REDIRECT_URI: &str = "http://localhost:8082/index.html";
pub const RESOURCE_ID: &str = "res1";
pub const LEGACY_REDIRECT_URI: &str = "http://localhost:8083/callback";

fn hash(secret: &str) -> String {
    hash_secret_with_iterations(secret, 1_000).unwrap()
}

pub fn scope(items: &[&str]) -> BTreeSet<String> {
    items.iter().map(|s| s.to_string()).collect()
}

pub fn clients() -> Arc<InMemoryClientStore> {
    Arc::new(InMemoryClientStore::new(vec![
        ClientDescriptor::new("acme", hash("s3cret"))
            .with_grant_types([GrantType::Password, GrantType::RefreshToken, GrantType::AuthorizationCode])
            .with_scopes(["read", "write"])
            .with_resource_ids([RESOURCE_ID])
            .with_redirect_uris([REDIRECT_URI]),
        ClientDescriptor::new("other", hash("other-secret"))
            .with_grant_types([GrantType::Password, GrantType::RefreshToken, GrantType::AuthorizationCode])
            .with_scopes(["read"])
            .with_resource_ids([RESOURCE_ID])
            .with_redirect_uris([REDIRECT_URI]),
        ClientDescriptor::new("batch", hash("batch-secret"))
            .with_grant_types([GrantType::ClientCredentials])
            .with_scopes(["read", "write"])
            .with_resource_ids([RESOURCE_ID]),
        ClientDescriptor::new("legacy", hash("legacy-secret"))
            .with_grant_types([GrantType::Password])
            .with_scopes(["read"])
            .with_resource_ids(["res2"])
            .with_redirect_uris([LEGACY_REDIRECT_URI]),
    ]))
}

pub fn users() -> Arc<InMemoryUserDirectory> {
    Arc::new(InMemoryUserDirectory::new(vec![
        UserRecord::new(
            Principal::new("alice").with_roles(["user"]).with_attribute("dept", "ops"),
            hash("pw123"),
        ),
        UserRecord::new(Principal::new("bob").with_roles(["admin", "user"]), hash("pw456")),
    ]))
}

pub fn server_builder() -> AuthorizationServerBuilder {
    AuthorizationServer::builder()
        .client_store(clients())
        .user_directory(users())
        .use_jwt_hs256(SIGNING_SECRET)
}

pub fn server() -> AuthorizationServer {
    server_builder().build().unwrap()
}
