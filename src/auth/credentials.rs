/*!
 * @file auth/credentials.rs
 * @brief SCRAM-SHA-256 credential storage and derivation (§4.2, §6.4)
 */

use std::collections::HashMap;
use std::sync::OnceLock;

use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use hmac::{Hmac, Mac};
use parking_lot::RwLock;
use pbkdf2::pbkdf2_hmac;
use rand::RngCore;
use sha2::{Digest, Sha256};

use crate::error::{FauxDBError, Result};

const SALT_LEN: usize = 16;

static FAKE_CREDENTIAL_SECRET: OnceLock<[u8; 32]> = OnceLock::new();

/// Random per-process secret backing `StoredCredential::fake_for_username`.
/// Generated once per process, never persisted, never derived from user
/// input.
fn fake_credential_secret() -> &'static [u8; 32] {
    FAKE_CREDENTIAL_SECRET.get_or_init(|| {
        let mut secret = [0u8; 32];
        rand::thread_rng().fill_bytes(&mut secret);
        secret
    })
}

/// The pieces derived from a password that SCRAM needs at verification
/// time; the plaintext password itself is never retained.
#[derive(Debug, Clone)]
pub struct StoredCredential {
    pub salt: Vec<u8>,
    pub iterations: u32,
    pub stored_key: Vec<u8>,
    pub server_key: Vec<u8>,
}

impl StoredCredential {
    /// Derives a `StoredCredential` from a plaintext password, mirroring
    /// the client-side derivation in reverse (§4.2).
    pub fn derive(password: &str, iterations: u32) -> Self {
        let mut salt = vec![0u8; SALT_LEN];
        rand::thread_rng().fill_bytes(&mut salt);
        Self::derive_with_salt(password, &salt, iterations)
    }

    pub fn derive_with_salt(password: &str, salt: &[u8], iterations: u32) -> Self {
        let salted_password = pbkdf2_hmac_sha256(password, salt, iterations);
        let client_key = hmac_sha256(&salted_password, b"Client Key");
        let stored_key = sha256(&client_key);
        let server_key = hmac_sha256(&salted_password, b"Server Key");

        Self { salt: salt.to_vec(), iterations, stored_key, server_key }
    }

    pub fn salt_base64(&self) -> String {
        BASE64.encode(&self.salt)
    }

    /// Synthesizes keys for a username with no real credential, without
    /// running PBKDF2: a single HMAC under a process-wide secret stands in
    /// for the expensive derivation, so `saslStart` costs the same whether
    /// or not the username exists (§4.2 enumeration resistance — a PBKDF2
    /// pass here would make unknown-user requests measurably slower).
    pub fn fake_for_username(username: &str, salt: Vec<u8>, iterations: u32) -> Self {
        let seed = hmac_sha256(fake_credential_secret(), username.as_bytes());
        let stored_key = hmac_sha256(&seed, b"Stored Key");
        let server_key = hmac_sha256(&seed, b"Server Key");
        Self { salt, iterations, stored_key, server_key }
    }
}

/// Looks up SCRAM credentials for `(db, username)` pairs. A trait seam so
/// the Postgres-backed implementation can be swapped for tests (§6.4).
#[async_trait]
pub trait CredentialsProvider: Send + Sync {
    async fn lookup(&self, db: &str, username: &str) -> Result<Option<StoredCredential>>;
}

/// In-process credentials store, seeded at startup from config (§6.4) or
/// populated by a `createUser` admin command.
#[derive(Debug, Default)]
pub struct InMemoryCredentialsProvider {
    users: RwLock<HashMap<(String, String), StoredCredential>>,
}

impl InMemoryCredentialsProvider {
    pub fn new() -> Self {
        Self { users: RwLock::new(HashMap::new()) }
    }

    pub fn insert(&self, db: &str, username: &str, password: &str, iterations: u32) {
        let credential = StoredCredential::derive(password, iterations);
        self.users.write().insert((db.to_string(), username.to_string()), credential);
    }

    pub fn contains(&self, db: &str, username: &str) -> bool {
        self.users.read().contains_key(&(db.to_string(), username.to_string()))
    }
}

#[async_trait]
impl CredentialsProvider for InMemoryCredentialsProvider {
    async fn lookup(&self, db: &str, username: &str) -> Result<Option<StoredCredential>> {
        Ok(self.users.read().get(&(db.to_string(), username.to_string())).cloned())
    }
}

pub fn pbkdf2_hmac_sha256(password: &str, salt: &[u8], iterations: u32) -> Vec<u8> {
    let mut result = vec![0u8; 32];
    pbkdf2_hmac::<Sha256>(password.as_bytes(), salt, iterations, &mut result);
    result
}

pub fn hmac_sha256(key: &[u8], data: &[u8]) -> Vec<u8> {
    type HmacSha256 = Hmac<Sha256>;
    let mut mac = HmacSha256::new_from_slice(key).map_err(|_| ()).expect("HMAC accepts any key length");
    mac.update(data);
    mac.finalize().into_bytes().to_vec()
}

pub fn sha256(data: &[u8]) -> Vec<u8> {
    let mut hasher = Sha256::new();
    hasher.update(data);
    hasher.finalize().to_vec()
}

pub fn decode_base64(value: &str) -> Result<Vec<u8>> {
    BASE64.decode(value).map_err(|e| {
        tracing::debug!("scram base64 decode failed: {}", e);
        FauxDBError::AuthenticationFailed
    })
}
