mod common;

use std::sync::Arc;
use std::time::Duration;

use common::{clients, scope, users, RESOURCE_ID};
use serde_json::json;
use starberry_auth::oauth_core::config::build_enhancer_chain;
use starberry_auth::{
    AccessStatus, AuthServerConfig, AuthorizationServer, HttpResponse, InMemoryHttpClient, OAuthError,
    ResourceServerConfig,
};

const PRIVATE_PEM: &str = include_str!("keys/private.pem");
const PUBLIC_PEM: &str = include_str!("keys/public.pem");

fn auth_config() -> AuthServerConfig {
    let raw = json!({
        "tokens": { "access_token_validity": 7200, "refresh_token_validity": 259200, "reuse_refresh_tokens": false },
        "signing": { "algorithm": "RS256", "private_key_pem": PRIVATE_PEM, "public_key_pem": PUBLIC_PEM, "key_id": "k1" },
        "enhancers": [
            { "type": "additional_information", "entries": { "author": "javaboy", "email": "1727@qq.com" } },
            { "type": "principal_attributes", "keys": ["dept"] }
        ]
    });
    AuthServerConfig::from_json_str(&raw.to_string()).unwrap()
}

#[tokio::test]
async fn configured_server_issues_tokens_a_configured_resource_server_accepts() {
    let config = auth_config();
    let server = AuthorizationServer::builder()
        .client_store(clients())
        .user_directory(users())
        .token_codec(Arc::new(config.signing.build_codec().unwrap()))
        .enhancer_chain(build_enhancer_chain(&config.enhancers))
        .settings(config.tokens.clone())
        .build()
        .unwrap();
    let pair = server.grant_password("acme", "s3cret", "alice", "pw123", &scope(&["read"])).await.unwrap();
    assert_eq!(pair.expires_in, 7_200);

    let resource = ResourceServerConfig::from_json_str(
        &json!({
            "resource_id": RESOURCE_ID,
            "verification": { "mode": "local", "signing": { "algorithm": "RS256", "public_key_pem": PUBLIC_PEM } }
        })
        .to_string(),
    )
    .unwrap();
    let verifier = resource.build_verifier(Arc::new(InMemoryHttpClient::new())).unwrap();

    let access = verifier.authorize_path(&pair.access_token, "/hello").await.unwrap();
    assert_eq!(access.status, AccessStatus::Authenticated);
    assert_eq!(access.principal.additional["author"], json!("javaboy"));
    assert_eq!(access.principal.additional["dept"], json!("ops"));
    assert_eq!(verifier.authorize_path(&pair.access_token, "/admin/hello").await, Err(OAuthError::Forbidden));
}

#[test]
fn invalid_configs_are_rejected() {
    let inverted = json!({
        "tokens": { "access_token_validity": 600, "refresh_token_validity": 60 },
        "signing": { "algorithm": "HS256", "secret": "javaboy" }
    });
    assert!(matches!(
        AuthServerConfig::from_json_str(&inverted.to_string()),
        Err(OAuthError::Configuration(_))
    ));

    let empty_secret = json!({ "signing": { "algorithm": "HS256", "secret": "" } });
    assert!(matches!(
        AuthServerConfig::from_json_str(&empty_secret.to_string()),
        Err(OAuthError::Configuration(_))
    ));

    let bad_pem = json!({ "signing": { "algorithm": "RS256", "private_key_pem": "nope", "public_key_pem": "nope" } });
    assert!(matches!(
        AuthServerConfig::from_json_str(&bad_pem.to_string()),
        Err(OAuthError::Configuration(_))
    ));

    assert!(matches!(AuthServerConfig::from_json_str("{"), Err(OAuthError::Configuration(_))));
    assert!(matches!(
        AuthServerConfig::from_json_file("/definitely/not/here.json"),
        Err(OAuthError::Configuration(_))
    ));
}

#[test]
fn rotation_setting_comes_from_config() {
    let config = auth_config();
    assert!(!config.tokens.reuse_refresh_tokens);
    assert_eq!(config.tokens.code_validity, 300);
}

#[tokio::test]
async fn remote_resource_config_fails_closed_when_unreachable() {
    let resource = ResourceServerConfig::from_json_str(
        &json!({
            "resource_id": RESOURCE_ID,
            "verification": {
                "mode": "remote",
                "check_token_url": "http://localhost:8080/oauth/check_token",
                "client_id": "acme",
                "client_secret": "s3cret",
                "timeout_ms": 100
            },
            "rules": [ { "pattern": "/api/**", "scopes": ["read"] } ]
        })
        .to_string(),
    )
    .unwrap();
    let http = InMemoryHttpClient::new();
    http.insert_failure("http://localhost:8080/oauth/check_token", "connection refused");
    let verifier = resource.build_verifier(Arc::new(http)).unwrap();
    assert_eq!(verifier.policy().rules().len(), 1);
    assert!(matches!(
        verifier.authorize_path("a.b.c", "/api/items").await,
        Err(OAuthError::VerificationUnavailable(_))
    ));
}

#[tokio::test]
async fn remote_resource_config_applies_its_timeout() {
    let resource = ResourceServerConfig::from_json_str(
        &json!({
            "resource_id": RESOURCE_ID,
            "verification": {
                "mode": "remote",
                "check_token_url": "http://localhost:8080/oauth/check_token",
                "client_id": "acme",
                "client_secret": "s3cret",
                "timeout_ms": 50
            }
        })
        .to_string(),
    )
    .unwrap();
    let http = InMemoryHttpClient::with_default(HttpResponse::json(200, &json!({ "active": true })))
        .with_delay(Duration::from_millis(500));
    let verifier = resource.build_verifier(Arc::new(http)).unwrap();
    assert_eq!(
        verifier.authorize_path("a.b.c", "/hello").await,
        Err(OAuthError::VerificationUnavailable("check_token timed out".into()))
    );
}
