//! API key authentication for the gateway

pub mod api_key;
pub mod middleware;

pub use api_key::{generate_key, hash_key, ApiKeyAuthenticator, GeneratedKey, API_KEY_PREFIX};
pub use middleware::{extract_credential, require_api_key, AuthUser};
