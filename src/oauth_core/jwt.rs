//! JWT token codec (HS256 / RS256) with swappable key material.

use std::sync::{Arc, RwLock};

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use jsonwebtoken::{Algorithm, DecodingKey, EncodingKey, Header};
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::error::OAuthError;
use super::oauth_provider::TokenCodec;
use super::types::TokenClaims;

/// Core JWT algorithm options.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum JWTAlgorithm {
    HS256,
    RS256,
}

impl From<JWTAlgorithm> for Algorithm {
    fn from(alg: JWTAlgorithm) -> Self {
        match alg {
            JWTAlgorithm::HS256 => Algorithm::HS256,
            JWTAlgorithm::RS256 => Algorithm::RS256,
        }
    }
}

/// Signing and verification keys for one algorithm.
pub struct KeyMaterial {
    algorithm: JWTAlgorithm,
    /// `None` for verify-only material (resource servers holding a public key).
    encoding_key: Option<EncodingKey>,
    decoding_key: DecodingKey,
    key_id: Option<String>,
}

impl KeyMaterial {
    /// Shared-secret HS256 keys.
    pub fn hs256(secret: &[u8]) -> Self {
        Self {
            algorithm: JWTAlgorithm::HS256,
            encoding_key: Some(EncodingKey::from_secret(secret)),
            decoding_key: DecodingKey::from_secret(secret),
            key_id: None,
        }
    }

    /// RS256 key pair from PEM encoded private and public keys.
    pub fn rs256(private_key_pem: &[u8], public_key_pem: &[u8]) -> Result<Self, OAuthError> {
        let encoding_key = EncodingKey::from_rsa_pem(private_key_pem)
            .map_err(|e| OAuthError::Configuration(format!("invalid RSA private key: {}", e)))?;
        let mut keys = Self::rs256_public(public_key_pem)?;
        keys.encoding_key = Some(encoding_key);
        Ok(keys)
    }

    /// RS256 verification only, from a PEM encoded public key.
    pub fn rs256_public(public_key_pem: &[u8]) -> Result<Self, OAuthError> {
        let decoding_key = DecodingKey::from_rsa_pem(public_key_pem)
            .map_err(|e| OAuthError::Configuration(format!("invalid RSA public key: {}", e)))?;
        Ok(Self { algorithm: JWTAlgorithm::RS256, encoding_key: None, decoding_key, key_id: None })
    }

    /// Tags issued tokens with a `kid` header.
    pub fn with_key_id(mut self, key_id: impl Into<String>) -> Self {
        self.key_id = Some(key_id.into());
        self
    }

    pub fn algorithm(&self) -> JWTAlgorithm {
        self.algorithm
    }

    pub fn can_sign(&self) -> bool {
        self.encoding_key.is_some()
    }
}

/// Encodes [`TokenClaims`] as compact `header.claims.signature` JWTs.
///
/// The active key sits behind a read/write lock so it can be replaced at
/// runtime; readers clone the `Arc` and never hold the lock while signing.
pub struct JwtTokenCodec {
    keys: RwLock<Arc<KeyMaterial>>,
}

impl JwtTokenCodec {
    pub fn new(keys: KeyMaterial) -> Self {
        Self { keys: RwLock::new(Arc::new(keys)) }
    }

    pub fn new_hs256(secret: &[u8]) -> Self {
        Self::new(KeyMaterial::hs256(secret))
    }

    pub fn new_rs256(private_key_pem: &[u8], public_key_pem: &[u8]) -> Result<Self, OAuthError> {
        Ok(Self::new(KeyMaterial::rs256(private_key_pem, public_key_pem)?))
    }

    /// A codec that can only verify RS256 tokens.
    pub fn rs256_verifier(public_key_pem: &[u8]) -> Result<Self, OAuthError> {
        Ok(Self::new(KeyMaterial::rs256_public(public_key_pem)?))
    }

    /// Replaces the active key. Tokens signed with the old key stop verifying.
    pub fn swap_key(&self, keys: KeyMaterial) {
        let mut guard = self.keys.write().unwrap_or_else(|poisoned| poisoned.into_inner());
        *guard = Arc::new(keys);
        debug!(algorithm = ?guard.algorithm, "token signing key replaced");
    }

    pub fn algorithm(&self) -> JWTAlgorithm {
        self.current().algorithm
    }

    fn current(&self) -> Arc<KeyMaterial> {
        self.keys.read().unwrap_or_else(|poisoned| poisoned.into_inner()).clone()
    }
}

impl TokenCodec for JwtTokenCodec {
    fn encode(&self, claims: &TokenClaims) -> Result<String, OAuthError> {
        if claims.expires_at <= claims.issued_at {
            return Err(OAuthError::ServerError("token must expire after it is issued".into()));
        }
        let keys = self.current();
        let encoding_key = keys
            .encoding_key
            .as_ref()
            .ok_or_else(|| OAuthError::Configuration("token codec holds no signing key".into()))?;
        let mut header = Header::new(keys.algorithm.into());
        header.kid = keys.key_id.clone();
        jsonwebtoken::encode(&header, claims, encoding_key)
            .map_err(|e| OAuthError::ServerError(format!("token signing failed: {}", e)))
    }

    fn decode_at(&self, token: &str, now: i64) -> Result<TokenClaims, OAuthError> {
        let keys = self.current();

        // Structure first: exactly three dot separated parts and a readable header.
        let (message, signature) = token.rsplit_once('.').ok_or(OAuthError::Malformed)?;
        let (_, payload) = message.split_once('.').ok_or(OAuthError::Malformed)?;
        if payload.contains('.') {
            return Err(OAuthError::Malformed);
        }
        let header = jsonwebtoken::decode_header(token).map_err(|_| OAuthError::Malformed)?;

        // Signature before any claim is looked at.
        let expected: Algorithm = keys.algorithm.into();
        if header.alg != expected {
            return Err(OAuthError::InvalidSignature);
        }
        let verified = jsonwebtoken::crypto::verify(signature, message.as_bytes(), &keys.decoding_key, expected)
            .unwrap_or(false);
        if !verified {
            return Err(OAuthError::InvalidSignature);
        }

        let raw = URL_SAFE_NO_PAD.decode(payload).map_err(|_| OAuthError::Malformed)?;
        let claims: TokenClaims = serde_json::from_slice(&raw).map_err(|_| OAuthError::Malformed)?;
        if claims.is_expired_at(now) {
            return Err(OAuthError::Expired);
        }
        Ok(claims)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::oauth_core::types::TokenType;
    use chrono::Utc;
    use serde_json::json;
    use std::collections::{BTreeMap, BTreeSet};

    const PRIVATE_PEM: &[u8] = include_bytes!("../../tests/keys/private.pem");
    const PUBLIC_PEM: &[u8] = include_bytes!("../../tests/keys/public.pem");
    const OTHER_PUBLIC_PEM: &[u8] = include_bytes!("../../tests/keys/other_public.pem");

    fn claims(ttl: i64) -> TokenClaims {
        let now = Utc::now().timestamp();
        TokenClaims {
            subject_id: "alice".into(),
            client_id: "acme".into(),
            scope: BTreeSet::from(["read".to_string()]),
            roles: BTreeSet::from(["user".to_string()]),
            resource_ids: BTreeSet::from(["res1".to_string()]),
            issued_at: now,
            expires_at: now + ttl,
            token_id: "jti-1".into(),
            token_type: TokenType::Access,
            additional: BTreeMap::new(),
        }
    }

    fn flip_first_char(part: &str) -> String {
        let mut chars: Vec<char> = part.chars().collect();
        chars[0] = if chars[0] == 'A' { 'B' } else { 'A' };
        chars.into_iter().collect()
    }

    #[test]
    fn hs256_round_trip() {
        let codec = JwtTokenCodec::new_hs256(b"javaboy");
        let issued = claims(3600);
        let token = codec.encode(&issued).unwrap();
        assert_eq!(token.split('.').count(), 3);
        assert_eq!(codec.decode(&token).unwrap(), issued);
    }

    #[test]
    fn altered_signature_is_invalid_signature() {
        let codec = JwtTokenCodec::new_hs256(b"javaboy");
        let token = codec.encode(&claims(3600)).unwrap();
        let (message, signature) = token.rsplit_once('.').unwrap();
        let tampered = format!("{}.{}", message, flip_first_char(signature));
        assert_eq!(codec.decode(&tampered), Err(OAuthError::InvalidSignature));

        let mut truncated = token.clone();
        truncated.pop();
        assert_eq!(codec.decode(&truncated), Err(OAuthError::InvalidSignature));
    }

    #[test]
    fn forged_claims_fail_before_being_read() {
        let codec = JwtTokenCodec::new_hs256(b"javaboy");
        let token = codec.encode(&claims(3600)).unwrap();
        let parts: Vec<&str> = token.split('.').collect();
        let mut forged = claims(3600);
        forged.roles.insert("admin".into());
        let forged_payload = URL_SAFE_NO_PAD.encode(serde_json::to_vec(&forged).unwrap());
        let forged_token = format!("{}.{}.{}", parts[0], forged_payload, parts[2]);
        assert_eq!(codec.decode(&forged_token), Err(OAuthError::InvalidSignature));
    }

    #[test]
    fn expired_token_with_valid_signature_is_expired() {
        let codec = JwtTokenCodec::new_hs256(b"javaboy");
        let mut old = claims(60);
        old.issued_at -= 7200;
        old.expires_at -= 7200;
        let token = codec.encode(&old).unwrap();
        assert_eq!(codec.decode(&token), Err(OAuthError::Expired));
        assert!(codec.decode_at(&token, old.expires_at - 1).is_ok());
        assert_eq!(codec.decode_at(&token, old.expires_at), Err(OAuthError::Expired));
    }

    #[test]
    fn garbage_is_malformed() {
        let codec = JwtTokenCodec::new_hs256(b"javaboy");
        assert_eq!(codec.decode("not-a-token"), Err(OAuthError::Malformed));
        assert_eq!(codec.decode("a.b"), Err(OAuthError::Malformed));
        assert_eq!(codec.decode("a.b.c.d"), Err(OAuthError::Malformed));
        assert_eq!(codec.decode("!!!.???.sig"), Err(OAuthError::Malformed));
    }

    #[test]
    fn signed_non_claims_payload_is_malformed() {
        let codec = JwtTokenCodec::new_hs256(b"javaboy");
        let token = jsonwebtoken::encode(
            &Header::new(Algorithm::HS256),
            &json!({ "hello": "world" }),
            &EncodingKey::from_secret(b"javaboy"),
        )
        .unwrap();
        assert_eq!(codec.decode(&token), Err(OAuthError::Malformed));
    }

    #[test]
    fn wrong_secret_is_invalid_signature() {
        let issuer = JwtTokenCodec::new_hs256(b"javaboy");
        let other = JwtTokenCodec::new_hs256(b"someone-else");
        let token = issuer.encode(&claims(3600)).unwrap();
        assert_eq!(other.decode(&token), Err(OAuthError::InvalidSignature));
    }

    #[test]
    fn unknown_claims_are_kept_not_rejected() {
        let codec = JwtTokenCodec::new_hs256(b"javaboy");
        let mut value = serde_json::to_value(claims(3600)).unwrap();
        value["future_claim"] = json!({ "nested": true });
        let token = jsonwebtoken::encode(
            &Header::new(Algorithm::HS256),
            &value,
            &EncodingKey::from_secret(b"javaboy"),
        )
        .unwrap();
        let decoded = codec.decode(&token).unwrap();
        assert_eq!(decoded.additional["future_claim"], json!({ "nested": true }));
    }

    #[test]
    fn rs256_round_trip_and_verify_only() {
        let signer = JwtTokenCodec::new_rs256(PRIVATE_PEM, PUBLIC_PEM).unwrap();
        let verifier = JwtTokenCodec::rs256_verifier(PUBLIC_PEM).unwrap();
        let issued = claims(3600);
        let token = signer.encode(&issued).unwrap();
        assert_eq!(verifier.decode(&token).unwrap(), issued);
        assert!(matches!(verifier.encode(&issued), Err(OAuthError::Configuration(_))));

        let stranger = JwtTokenCodec::rs256_verifier(OTHER_PUBLIC_PEM).unwrap();
        assert_eq!(stranger.decode(&token), Err(OAuthError::InvalidSignature));
    }

    #[test]
    fn algorithm_confusion_is_rejected() {
        let rs = JwtTokenCodec::new_rs256(PRIVATE_PEM, PUBLIC_PEM).unwrap();
        // HS256 token keyed with the RSA public key bytes.
        let hs = JwtTokenCodec::new_hs256(PUBLIC_PEM);
        let token = hs.encode(&claims(3600)).unwrap();
        assert_eq!(rs.decode(&token), Err(OAuthError::InvalidSignature));
    }

    #[test]
    fn swapped_key_invalidates_old_tokens() {
        let codec = JwtTokenCodec::new_hs256(b"first");
        let old = codec.encode(&claims(3600)).unwrap();
        codec.swap_key(KeyMaterial::hs256(b"second").with_key_id("k2"));
        assert_eq!(codec.decode(&old), Err(OAuthError::InvalidSignature));
        let fresh = codec.encode(&claims(3600)).unwrap();
        assert_eq!(jsonwebtoken::decode_header(&fresh).unwrap().kid.as_deref(), Some("k2"));
        assert!(codec.decode(&fresh).is_ok());
    }

    #[test]
    fn bad_pem_is_configuration_error() {
        assert!(matches!(JwtTokenCodec::rs256_verifier(b"nope"), Err(OAuthError::Configuration(_))));
    }
}
