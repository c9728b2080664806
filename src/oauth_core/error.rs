//! Error taxonomy shared by issuance and verification.

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::warn;

/// Every failure the authorization core can surface to a caller.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum OAuthError {
    /// No client is registered under the presented id.
    UnknownClient,
    /// The client secret does not match the registered hash.
    InvalidClientSecret,
    /// The client is not allowed to use the requested grant type.
    UnauthorizedGrantType,
    /// The redirect URI is not registered for the client.
    RedirectMismatch,
    /// The requested scope is outside what the client may ask for.
    ScopeNotAllowed,
    /// Resource owner username or password is wrong.
    InvalidCredentials,
    /// The authorization code does not exist, expired, or was already used.
    InvalidOrExpiredCode,
    /// The presented client (or redirect URI) differs from the one bound at issuance.
    ClientMismatch,
    /// Token signature verification failed.
    InvalidSignature,
    /// Token is past its expiry.
    Expired,
    /// Token cannot be parsed.
    Malformed,
    /// The token is not a usable refresh token.
    InvalidRefreshToken,
    /// The token was explicitly revoked.
    Revoked,
    /// A refresh token was presented where an access token is expected, or vice versa.
    WrongTokenType,
    /// The token is not issued for this resource server.
    ResourceNotAuthorized,
    /// The caller lacks the role or scope the resource requires.
    Forbidden,
    /// Remote verification could not be completed.
    VerificationUnavailable(String),
    /// An enhancer stage rejected or corrupted the claim set.
    EnhancementFailed(String),
    /// A required request parameter is missing or invalid.
    InvalidRequest(String),
    /// The grant_type parameter names no grant this server understands.
    UnsupportedGrantType(String),
    /// Invalid configuration detected while wiring the server.
    Configuration(String),
    /// Unexpected internal failure (key material, storage backend, ...).
    ServerError(String),
}

/// Coarse grouping of [`OAuthError`] kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCategory {
    Client,
    Credential,
    Code,
    Token,
    Policy,
    Availability,
    Request,
    Internal,
}

/// JSON error body returned by the endpoint surfaces.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
    pub error_description: String,
}

impl OAuthError {
    /// The category this error belongs to.
    pub fn category(&self) -> ErrorCategory {
        match self {
            OAuthError::UnknownClient
            | OAuthError::InvalidClientSecret
            | OAuthError::UnauthorizedGrantType
            | OAuthError::RedirectMismatch
            | OAuthError::ScopeNotAllowed => ErrorCategory::Client,
            OAuthError::InvalidCredentials => ErrorCategory::Credential,
            OAuthError::InvalidOrExpiredCode | OAuthError::ClientMismatch => ErrorCategory::Code,
            OAuthError::InvalidSignature
            | OAuthError::Expired
            | OAuthError::Malformed
            | OAuthError::InvalidRefreshToken
            | OAuthError::Revoked
            | OAuthError::WrongTokenType => ErrorCategory::Token,
            OAuthError::ResourceNotAuthorized | OAuthError::Forbidden => ErrorCategory::Policy,
            OAuthError::VerificationUnavailable(_) => ErrorCategory::Availability,
            OAuthError::InvalidRequest(_) | OAuthError::UnsupportedGrantType(_) => ErrorCategory::Request,
            OAuthError::EnhancementFailed(_)
            | OAuthError::Configuration(_)
            | OAuthError::ServerError(_) => ErrorCategory::Internal,
        }
    }

    /// Stable kind name, used in logs and carried across the check-token wire.
    pub fn kind(&self) -> &'static str {
        match self {
            OAuthError::UnknownClient => "UnknownClient",
            OAuthError::InvalidClientSecret => "InvalidClientSecret",
            OAuthError::UnauthorizedGrantType => "UnauthorizedGrantType",
            OAuthError::RedirectMismatch => "RedirectMismatch",
            OAuthError::ScopeNotAllowed => "ScopeNotAllowed",
            OAuthError::InvalidCredentials => "InvalidCredentials",
            OAuthError::InvalidOrExpiredCode => "InvalidOrExpiredCode",
            OAuthError::ClientMismatch => "ClientMismatch",
            OAuthError::InvalidSignature => "InvalidSignature",
            OAuthError::Expired => "Expired",
            OAuthError::Malformed => "Malformed",
            OAuthError::InvalidRefreshToken => "InvalidRefreshToken",
            OAuthError::Revoked => "Revoked",
            OAuthError::WrongTokenType => "WrongTokenType",
            OAuthError::ResourceNotAuthorized => "ResourceNotAuthorized",
            OAuthError::Forbidden => "Forbidden",
            OAuthError::VerificationUnavailable(_) => "VerificationUnavailable",
            OAuthError::EnhancementFailed(_) => "EnhancementFailed",
            OAuthError::InvalidRequest(_) => "InvalidRequest",
            OAuthError::UnsupportedGrantType(_) => "UnsupportedGrantType",
            OAuthError::Configuration(_) => "Configuration",
            OAuthError::ServerError(_) => "ServerError",
        }
    }

    /// Rebuilds a token-side error from its kind name; anything else is `None`.
    pub fn token_error_from_kind(kind: &str) -> Option<Self> {
        match kind {
            "InvalidSignature" => Some(OAuthError::InvalidSignature),
            "Expired" => Some(OAuthError::Expired),
            "Malformed" => Some(OAuthError::Malformed),
            "Revoked" => Some(OAuthError::Revoked),
            "WrongTokenType" => Some(OAuthError::WrongTokenType),
            "InvalidRefreshToken" => Some(OAuthError::InvalidRefreshToken),
            _ => None,
        }
    }

    /// OAuth 2.0 wire error code (RFC 6749 §5.2, RFC 6750 §3.1).
    pub fn error_code(&self) -> &'static str {
        match self {
            OAuthError::UnknownClient | OAuthError::InvalidClientSecret => "invalid_client",
            OAuthError::UnauthorizedGrantType => "unauthorized_client",
            OAuthError::RedirectMismatch
            | OAuthError::InvalidCredentials
            | OAuthError::InvalidOrExpiredCode
            | OAuthError::ClientMismatch
            | OAuthError::InvalidRefreshToken => "invalid_grant",
            OAuthError::ScopeNotAllowed => "invalid_scope",
            OAuthError::InvalidSignature
            | OAuthError::Expired
            | OAuthError::Malformed
            | OAuthError::Revoked
            | OAuthError::WrongTokenType => "invalid_token",
            OAuthError::ResourceNotAuthorized => "access_denied",
            OAuthError::Forbidden => "insufficient_scope",
            OAuthError::VerificationUnavailable(_) => "temporarily_unavailable",
            OAuthError::InvalidRequest(_) => "invalid_request",
            OAuthError::UnsupportedGrantType(_) => "unsupported_grant_type",
            OAuthError::EnhancementFailed(_)
            | OAuthError::Configuration(_)
            | OAuthError::ServerError(_) => "server_error",
        }
    }

    /// HTTP status that accompanies this error on an endpoint response.
    pub fn http_status(&self) -> u16 {
        match self {
            OAuthError::UnknownClient | OAuthError::InvalidClientSecret => 401,
            OAuthError::InvalidSignature
            | OAuthError::Expired
            | OAuthError::Malformed
            | OAuthError::Revoked
            | OAuthError::WrongTokenType => 401,
            OAuthError::ResourceNotAuthorized | OAuthError::Forbidden => 403,
            OAuthError::VerificationUnavailable(_) => 503,
            OAuthError::EnhancementFailed(_)
            | OAuthError::Configuration(_)
            | OAuthError::ServerError(_) => 500,
            _ => 400,
        }
    }

    /// Human-readable description.
    pub fn description(&self) -> String {
        match self {
            OAuthError::UnknownClient => "Unknown client".into(),
            OAuthError::InvalidClientSecret => "Client authentication failed".into(),
            OAuthError::UnauthorizedGrantType => "Client is not allowed to use this grant type".into(),
            OAuthError::RedirectMismatch => "Redirect URI is not registered for this client".into(),
            OAuthError::ScopeNotAllowed => "Requested scope is not allowed for this client".into(),
            OAuthError::InvalidCredentials => "Bad credentials".into(),
            OAuthError::InvalidOrExpiredCode => "Authorization code is invalid or expired".into(),
            OAuthError::ClientMismatch => "Grant was issued to another client or redirect URI".into(),
            OAuthError::InvalidSignature => "Token signature is invalid".into(),
            OAuthError::Expired => "The token has expired".into(),
            OAuthError::Malformed => "The token cannot be parsed".into(),
            OAuthError::InvalidRefreshToken => "Invalid refresh token".into(),
            OAuthError::Revoked => "The token has been revoked".into(),
            OAuthError::WrongTokenType => "Token type is not accepted here".into(),
            OAuthError::ResourceNotAuthorized => "Token is not valid for this resource".into(),
            OAuthError::Forbidden => "Insufficient role or scope for this request".into(),
            OAuthError::VerificationUnavailable(msg) => format!("Token verification unavailable: {}", msg),
            OAuthError::EnhancementFailed(msg) => format!("Token enhancement failed: {}", msg),
            OAuthError::InvalidRequest(msg) => msg.clone(),
            OAuthError::UnsupportedGrantType(grant) => format!("Unsupported grant type: {}", grant),
            OAuthError::Configuration(msg) => format!("Invalid configuration: {}", msg),
            OAuthError::ServerError(_) => "Internal server error".into(),
        }
    }

    /// Structured error body `{error, error_description}`.
    pub fn to_error_response(&self) -> ErrorResponse {
        ErrorResponse {
            error: self.error_code().to_string(),
            error_description: self.description(),
        }
    }

    /// Convert into `(status, json body)` for an endpoint response, logging the failure.
    pub fn into_response(&self) -> (u16, Value) {
        let status = self.http_status();
        let code = self.error_code();
        warn!(error = ?self, error_code = code, http_status = status, "OAuth error occurred");
        (status, json!({ "error": code, "error_description": self.description() }))
    }
}

impl fmt::Display for OAuthError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OAuthError::ServerError(detail) => write!(f, "{}: {}", self.kind(), detail),
            _ => write!(f, "{}: {}", self.kind(), self.description()),
        }
    }
}

impl std::error::Error for OAuthError {}

impl From<serde_json::Error> for OAuthError {
    fn from(err: serde_json::Error) -> Self {
        OAuthError::ServerError(format!("JSON error: {}", err))
    }
}

pub type Result<T> = std::result::Result<T, OAuthError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn categories_follow_the_taxonomy() {
        assert_eq!(OAuthError::RedirectMismatch.category(), ErrorCategory::Client);
        assert_eq!(OAuthError::InvalidCredentials.category(), ErrorCategory::Credential);
        assert_eq!(OAuthError::ClientMismatch.category(), ErrorCategory::Code);
        assert_eq!(OAuthError::InvalidRefreshToken.category(), ErrorCategory::Token);
        assert_eq!(OAuthError::Forbidden.category(), ErrorCategory::Policy);
        assert_eq!(
            OAuthError::VerificationUnavailable("timeout".into()).category(),
            ErrorCategory::Availability
        );
    }

    #[test]
    fn token_kinds_survive_the_wire() {
        for err in [OAuthError::InvalidSignature, OAuthError::Expired, OAuthError::Malformed, OAuthError::Revoked] {
            assert_eq!(OAuthError::token_error_from_kind(err.kind()), Some(err));
        }
        assert_eq!(OAuthError::token_error_from_kind("Forbidden"), None);
    }

    #[test]
    fn server_error_hides_detail_from_description() {
        let err = OAuthError::ServerError("key store poisoned".into());
        assert_eq!(err.description(), "Internal server error");
        assert!(err.to_string().contains("key store poisoned"));
    }
}
