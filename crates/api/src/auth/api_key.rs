//! API Key generation and validation

use std::sync::Arc;

use rand::RngCore;
use sha2::{Digest, Sha256};
use subtle::ConstantTimeEq;
use time::OffsetDateTime;

use crate::error::{ApiError, ApiResult};
use crate::store::AccountStore;

use super::middleware::AuthUser;

pub const API_KEY_PREFIX: &str = "mk_";

/// Number of random bytes in a key (hex-encoded to 64 chars)
const API_KEY_RANDOM_BYTES: usize = 32;

/// Leading characters of a key stored in plaintext for indexed lookup
pub const LOOKUP_PREFIX_LEN: usize = 8;

/// A freshly generated key. `plaintext` is shown to the caller once and never stored.
#[derive(Debug, Clone)]
pub struct GeneratedKey {
    pub plaintext: String,
    pub prefix: String,
    pub hash: String,
}

/// Generate a new `mk_` + 64 hex API key
pub fn generate_key() -> GeneratedKey {
    let mut bytes = [0u8; API_KEY_RANDOM_BYTES];
    rand::thread_rng().fill_bytes(&mut bytes);
    let plaintext = format!("{}{}", API_KEY_PREFIX, hex::encode(bytes));
    let prefix = plaintext[..LOOKUP_PREFIX_LEN].to_string();
    let hash = hash_key(&plaintext);
    GeneratedKey {
        plaintext,
        prefix,
        hash,
    }
}

/// Hash an API key for storage
pub fn hash_key(key: &str) -> String {
    hex::encode(Sha256::digest(key.as_bytes()))
}

/// Constant-time comparison to prevent timing attacks
fn constant_time_compare(a: &str, b: &str) -> bool {
    if a.len() != b.len() {
        // Do a dummy comparison to avoid length-based timing attacks
        let dummy = vec![0u8; a.len()];
        let _ = a.as_bytes().ct_eq(&dummy);
        return false;
    }

    a.as_bytes().ct_eq(b.as_bytes()).into()
}

/// Verifies bearer API keys against the account store
pub struct ApiKeyAuthenticator {
    store: Arc<dyn AccountStore>,
}

impl ApiKeyAuthenticator {
    pub fn new(store: Arc<dyn AccountStore>) -> Self {
        Self { store }
    }

    /// Resolve a plaintext key to its owner, stamping `last_used_at` on success
    pub async fn authenticate(&self, token: &str) -> ApiResult<AuthUser> {
        let token = token.trim();
        let Some(prefix) = token.get(..LOOKUP_PREFIX_LEN) else {
            return Err(ApiError::InvalidApiKey);
        };
        if !token.starts_with(API_KEY_PREFIX) {
            return Err(ApiError::InvalidApiKey);
        }

        let presented_hash = hash_key(token);
        let now = OffsetDateTime::now_utc();
        let candidates = self.store.find_api_keys_by_prefix(prefix).await?;

        let matched = candidates
            .into_iter()
            .find(|key| constant_time_compare(&key.key_hash, &presented_hash));

        let Some(key) = matched else {
            tracing::debug!(key_prefix = %prefix, "API key rejected");
            return Err(ApiError::InvalidApiKey);
        };

        if key.is_expired(now) {
            tracing::info!(api_key_id = %key.id, "Expired API key presented");
            return Err(ApiError::InvalidApiKey);
        }

        if let Err(e) = self.store.touch_api_key(key.id, now).await {
            tracing::warn!(api_key_id = %key.id, error = %e, "Failed to stamp API key usage");
        }

        Ok(AuthUser {
            user_id: key.user_id,
            api_key_id: key.id,
        })
    }
}
