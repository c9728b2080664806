//! Secret hashing, random values and credential parsing using `ring`.

use std::num::NonZeroU32;

use base64::engine::general_purpose::{STANDARD, URL_SAFE_NO_PAD};
use base64::Engine;
use ring::pbkdf2;
use ring::rand::{SecureRandom, SystemRandom};

use super::error::OAuthError;

/// PBKDF2 iteration count used by [`hash_secret`].
pub const DEFAULT_ITERATIONS: u32 = 10_000;

const HASH_PREFIX: &str = "pbkdf2-sha256";
const SALT_LEN: usize = 16;
const CREDENTIAL_LEN: usize = ring::digest::SHA256_OUTPUT_LEN;

/// Fill `len` random bytes and return them base64url encoded (no padding).
pub fn random_token(len: usize) -> Result<String, OAuthError> {
    let rng = SystemRandom::new();
    let mut buf = vec![0u8; len];
    rng.fill(&mut buf)
        .map_err(|_| OAuthError::ServerError("system random generator failed".into()))?;
    Ok(URL_SAFE_NO_PAD.encode(&buf))
}

/// Hash a client secret or password with PBKDF2-HMAC-SHA256 and a random salt.
///
/// Output format: `pbkdf2-sha256$<iterations>$<salt>$<hash>` with base64 parts.
pub fn hash_secret(plaintext: &str) -> Result<String, OAuthError> {
    hash_secret_with_iterations(plaintext, DEFAULT_ITERATIONS)
}

pub fn hash_secret_with_iterations(plaintext: &str, iterations: u32) -> Result<String, OAuthError> {
    let rounds = NonZeroU32::new(iterations)
        .ok_or_else(|| OAuthError::Configuration("PBKDF2 iterations must be non-zero".into()))?;
    let rng = SystemRandom::new();
    let mut salt = [0u8; SALT_LEN];
    rng.fill(&mut salt)
        .map_err(|_| OAuthError::ServerError("system random generator failed".into()))?;
    let mut hash = [0u8; CREDENTIAL_LEN];
    pbkdf2::derive(pbkdf2::PBKDF2_HMAC_SHA256, rounds, &salt, plaintext.as_bytes(), &mut hash);
    Ok(format!(
        "{}${}${}${}",
        HASH_PREFIX,
        iterations,
        STANDARD.encode(salt),
        STANDARD.encode(hash)
    ))
}

/// Verify `plaintext` against a hash produced by [`hash_secret`].
///
/// The comparison is constant-time; an unparseable hash never verifies.
pub fn verify_secret(stored_hash: &str, plaintext: &str) -> bool {
    let mut parts = stored_hash.split('$');
    let (Some(prefix), Some(iterations), Some(salt), Some(hash), None) =
        (parts.next(), parts.next(), parts.next(), parts.next(), parts.next())
    else {
        return false;
    };
    if prefix != HASH_PREFIX {
        return false;
    }
    let Some(rounds) = iterations.parse::<u32>().ok().and_then(NonZeroU32::new) else {
        return false;
    };
    let (Ok(salt), Ok(hash)) = (STANDARD.decode(salt), STANDARD.decode(hash)) else {
        return false;
    };
    pbkdf2::verify(pbkdf2::PBKDF2_HMAC_SHA256, rounds, &salt, plaintext.as_bytes(), &hash).is_ok()
}

/// A well-formed hash at [`DEFAULT_ITERATIONS`] that no caller's secret matches.
const DUMMY_HASH: &str = "pbkdf2-sha256$10000$c3RhcmJlcnJ5LWR1bW15IQ==$P4FBOVhAOQnQNaIwsPrhz5leLPNLd6gjCGSG0fwIFWA=";

/// Spends the same PBKDF2 work as [`verify_secret`] for an account that does
/// not exist, so lookups of unknown names take as long as wrong passwords.
pub fn verify_against_dummy(plaintext: &str) -> bool {
    std::hint::black_box(verify_secret(DUMMY_HASH, plaintext));
    false
}

/// Decode an `Authorization: Basic ...` header into `(client_id, client_secret)`.
pub fn parse_basic_auth(header: &str) -> Option<(String, String)> {
    let encoded = header.trim().strip_prefix("Basic ")?;
    let decoded = STANDARD.decode(encoded.trim()).ok()?;
    let text = String::from_utf8(decoded).ok()?;
    let (id, secret) = text.split_once(':')?;
    Some((id.to_string(), secret.to_string()))
}

/// Build an `Authorization: Basic ...` header value.
pub fn basic_auth_header(client_id: &str, client_secret: &str) -> String {
    format!("Basic {}", STANDARD.encode(format!("{}:{}", client_id, client_secret)))
}
