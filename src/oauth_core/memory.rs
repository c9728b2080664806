//! In-memory default implementations for the OAuth core traits.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;

use super::crypto::{verify_against_dummy, verify_secret};
use super::error::OAuthError;
use super::oauth_provider::{AuthorizationCodeStore, ClientStore, RevocationList, UserDirectory};
use super::types::{AuthorizationCode, ClientDescriptor, CodeRecord, CodeState, Principal};

#[derive(Clone)]
pub struct InMemoryClientStore {
    clients: Arc<DashMap<String, ClientDescriptor>>,
}

impl InMemoryClientStore {
    /// Creates a new in-memory client store with an initial set of clients.
    pub fn new(initial_clients: Vec<ClientDescriptor>) -> Self {
        let map = DashMap::new();
        for client in initial_clients {
            map.insert(client.client_id.clone(), client);
        }
        Self { clients: Arc::new(map) }
    }

    /// Registers or replaces a client.
    pub fn insert(&self, client: ClientDescriptor) {
        self.clients.insert(client.client_id.clone(), client);
    }
}

#[async_trait]
impl ClientStore for InMemoryClientStore {
    async fn lookup_client(&self, client_id: &str) -> Result<Option<ClientDescriptor>, OAuthError> {
        Ok(self.clients.get(client_id).map(|entry| entry.value().clone()))
    }
}

/// A user known to [`InMemoryUserDirectory`], with the hash of their password.
#[derive(Debug, Clone)]
pub struct UserRecord {
    pub principal: Principal,
    pub password_hash: String,
}

impl UserRecord {
    pub fn new(principal: Principal, password_hash: impl Into<String>) -> Self {
        Self { principal, password_hash: password_hash.into() }
    }
}

#[derive(Clone)]
pub struct InMemoryUserDirectory {
    users: Arc<DashMap<String, UserRecord>>,
}

impl InMemoryUserDirectory {
    /// Creates a new in-memory user directory.
    pub fn new(users: Vec<UserRecord>) -> Self {
        let map = DashMap::new();
        for user in users {
            map.insert(user.principal.subject_id.clone(), user);
        }
        Self { users: Arc::new(map) }
    }

    pub fn insert(&self, user: UserRecord) {
        self.users.insert(user.principal.subject_id.clone(), user);
    }
}

#[async_trait]
impl UserDirectory for InMemoryUserDirectory {
    async fn lookup_user(&self, username: &str) -> Result<Option<Principal>, OAuthError> {
        Ok(self.users.get(username).map(|entry| entry.value().principal.clone()))
    }

    async fn verify_password(&self, principal: &Principal, plaintext: &str) -> Result<bool, OAuthError> {
        // Copy the hash out so the shard lock is not held through PBKDF2.
        let hash = match self.users.get(&principal.subject_id) {
            Some(entry) => entry.value().password_hash.clone(),
            None => return Ok(verify_against_dummy(plaintext)),
        };
        Ok(verify_secret(&hash, plaintext))
    }
}

/// Authorization codes keyed by code value.
///
/// State transitions happen under the map's per-key write lock, which gives
/// `consume_code` its compare-and-swap semantics.
#[derive(Clone, Default)]
pub struct InMemoryCodeStore {
    codes: Arc<DashMap<String, CodeRecord>>,
}

impl InMemoryCodeStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.codes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.codes.is_empty()
    }

    /// Removes codes that are expired at `now` or already exchanged or revoked.
    fn drop_finished(&self, now: i64) -> usize {
        let before = self.codes.len();
        self.codes
            .retain(|_, record| !record.state.is_terminal() && !record.code.is_expired_at(now));
        before.saturating_sub(self.codes.len())
    }
}

#[async_trait]
impl AuthorizationCodeStore for InMemoryCodeStore {
    async fn store_code(&self, code: AuthorizationCode) -> Result<(), OAuthError> {
        self.drop_finished(code.issued_at);
        match self.codes.entry(code.code.clone()) {
            Entry::Occupied(_) => Err(OAuthError::ServerError("authorization code collision".into())),
            Entry::Vacant(slot) => {
                slot.insert(CodeRecord { code, state: CodeState::CodeIssued });
                Ok(())
            }
        }
    }

    async fn get_code(&self, code: &str) -> Result<Option<CodeRecord>, OAuthError> {
        Ok(self.codes.get(code).map(|entry| entry.value().clone()))
    }

    async fn consume_code(&self, code: &str, now: i64) -> Result<Option<AuthorizationCode>, OAuthError> {
        let Some(mut entry) = self.codes.get_mut(code) else {
            return Ok(None);
        };
        let record = entry.value_mut();
        if record.state != CodeState::CodeIssued {
            return Ok(None);
        }
        if record.code.is_expired_at(now) {
            record.state = CodeState::Expired;
            return Ok(None);
        }
        record.state = CodeState::Exchanged;
        Ok(Some(record.code.clone()))
    }

    async fn revoke_code(&self, code: &str) -> Result<bool, OAuthError> {
        let Some(mut entry) = self.codes.get_mut(code) else {
            return Ok(false);
        };
        let record = entry.value_mut();
        if record.state.is_terminal() {
            return Ok(false);
        }
        record.state = CodeState::Revoked;
        Ok(true)
    }

    async fn purge_expired(&self, now: i64) -> Result<usize, OAuthError> {
        Ok(self.drop_finished(now))
    }
}

/// Revoked token ids with the time they would have expired anyway.
///
/// Entries past that time are dropped whenever a new id is recorded.
#[derive(Clone, Default)]
pub struct InMemoryRevocationList {
    revoked: Arc<DashMap<String, i64>>,
}

impl InMemoryRevocationList {
    pub fn new() -> Self {
        Self::default()
    }

    /// Drops entries for tokens that have expired by `now`.
    pub fn purge_expired(&self, now: i64) -> usize {
        let before = self.revoked.len();
        self.revoked.retain(|_, expires_at| *expires_at > now);
        before.saturating_sub(self.revoked.len())
    }

    /// Snapshot of the current list, mainly for diagnostics.
    pub fn snapshot(&self) -> HashMap<String, i64> {
        self.revoked.iter().map(|entry| (entry.key().clone(), *entry.value())).collect()
    }
}

#[async_trait]
impl RevocationList for InMemoryRevocationList {
    async fn revoke(&self, token_id: &str, expires_at: i64) -> Result<bool, OAuthError> {
        self.purge_expired(Utc::now().timestamp());
        match self.revoked.entry(token_id.to_string()) {
            Entry::Occupied(_) => Ok(false),
            Entry::Vacant(slot) => {
                slot.insert(expires_at);
                Ok(true)
            }
        }
    }

    async fn is_revoked(&self, token_id: &str) -> Result<bool, OAuthError> {
        Ok(self.revoked.contains_key(token_id))
    }
}
