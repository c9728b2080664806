use serde_json::Value;
use starberry_auth::oauth_core::error::ErrorResponse;
use starberry_auth::{ErrorCategory, OAuthError};

#[tokio::test]
async fn test_oauth_error_into_response() {
    let cases = vec![
        (OAuthError::UnknownClient, 401, "invalid_client", "Unknown client"),
        (OAuthError::InvalidClientSecret, 401, "invalid_client", "Client authentication failed"),
        (OAuthError::UnauthorizedGrantType, 400, "unauthorized_client", "Client is not allowed to use this grant type"),
        (OAuthError::ScopeNotAllowed, 400, "invalid_scope", "Requested scope is not allowed for this client"),
        (OAuthError::InvalidCredentials, 400, "invalid_grant", "Bad credentials"),
        (OAuthError::InvalidOrExpiredCode, 400, "invalid_grant", "Authorization code is invalid or expired"),
        (OAuthError::InvalidRefreshToken, 400, "invalid_grant", "Invalid refresh token"),
        (OAuthError::Expired, 401, "invalid_token", "The token has expired"),
        (OAuthError::InvalidSignature, 401, "invalid_token", "Token signature is invalid"),
        (OAuthError::ResourceNotAuthorized, 403, "access_denied", "Token is not valid for this resource"),
        (OAuthError::Forbidden, 403, "insufficient_scope", "Insufficient role or scope for this request"),
        (
            OAuthError::VerificationUnavailable("timeout".into()),
            503,
            "temporarily_unavailable",
            "Token verification unavailable: timeout",
        ),
        (OAuthError::ServerError("db down".into()), 500, "server_error", "Internal server error"),
    ];

    for (err, expected_status, expected_code, expected_desc) in cases {
        let (status, body) = err.into_response();
        assert_eq!(status, expected_status, "Status for {:?}", err);
        assert_eq!(body["error"], Value::String(expected_code.into()), "Code for {:?}", err);
        assert_eq!(body["error_description"], Value::String(expected_desc.into()), "Description for {:?}", err);

        let typed: ErrorResponse = serde_json::from_value(body).unwrap();
        assert_eq!(typed, err.to_error_response());
    }
}

#[test]
fn test_every_taxonomy_group_is_reachable() {
    let groups = [
        (OAuthError::ScopeNotAllowed, ErrorCategory::Client),
        (OAuthError::InvalidCredentials, ErrorCategory::Credential),
        (OAuthError::InvalidOrExpiredCode, ErrorCategory::Code),
        (OAuthError::Malformed, ErrorCategory::Token),
        (OAuthError::ResourceNotAuthorized, ErrorCategory::Policy),
        (OAuthError::VerificationUnavailable(String::new()), ErrorCategory::Availability),
        (OAuthError::UnsupportedGrantType("implicit".into()), ErrorCategory::Request),
        (OAuthError::EnhancementFailed("x".into()), ErrorCategory::Internal),
    ];
    for (err, category) in groups {
        assert_eq!(err.category(), category, "{}", err);
    }
}
