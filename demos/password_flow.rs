//! Password grant, refresh and resource verification in one process.
//! Run with: `cargo run --example password_flow`

use std::collections::BTreeSet;
use std::sync::Arc;

use starberry_auth::oauth_core::crypto::hash_secret;
use starberry_auth::{
    AdditionalInformationEnhancer, AuthorizationServer, ClientDescriptor, GrantType, InMemoryClientStore,
    InMemoryUserDirectory, OAuthError, Principal, ResourceVerifier, UserRecord,
};

#[tokio::main]
async fn main() -> Result<(), OAuthError> {
    let clients = InMemoryClientStore::new(vec![ClientDescriptor::new("javaboy", hash_secret("123")?)
        .with_grant_types([GrantType::Password, GrantType::RefreshToken])
        .with_scopes(["all"])
        .with_resource_ids(["res1"])
        .with_validity(7_200, 259_200)]);
    let users = InMemoryUserDirectory::new(vec![
        UserRecord::new(Principal::new("sang").with_roles(["admin"]), hash_secret("123")?),
        UserRecord::new(Principal::new("javaboy").with_roles(["user"]), hash_secret("123")?),
    ]);

    let server = AuthorizationServer::builder()
        .client_store(Arc::new(clients))
        .user_directory(Arc::new(users))
        .use_jwt_hs256(b"javaboy")
        .enhancer(Arc::new(AdditionalInformationEnhancer::from_pairs([("author", "javaboy")])))
        .build()?;

    let pair = server.grant_password("javaboy", "123", "sang", "123", &BTreeSet::new()).await?;
    println!("issued: {}", serde_json::to_string_pretty(&pair)?);

    let verifier = ResourceVerifier::local("res1", server.codec()).with_revocation_list(server.revocation_list());
    for path in ["/hello", "/admin/hello"] {
        match verifier.authorize_path(&pair.access_token, path).await {
            Ok(access) => println!("{} -> {:?} as {}", path, access.status, access.principal.subject_id),
            Err(err) => println!("{} -> denied: {}", path, err),
        }
    }

    if let Some(refresh_token) = &pair.refresh_token {
        let refreshed = server.refresh("javaboy", "123", refresh_token).await?;
        println!("refreshed, expires in {}s", refreshed.expires_in);
    }
    Ok(())
}
