//! Common types used across the MCP gateway

use serde::{Deserialize, Serialize};
use serde_json::Value;
use sqlx::FromRow;
use time::OffsetDateTime;
use uuid::Uuid;

// =============================================================================
// ID Wrappers
// =============================================================================

macro_rules! id_type {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
        #[serde(transparent)]
        #[sqlx(transparent)]
        pub struct $name(pub Uuid);

        impl $name {
            pub fn new() -> Self {
                Self(Uuid::new_v4())
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }

        impl From<Uuid> for $name {
            fn from(id: Uuid) -> Self {
                Self(id)
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                self.0.fmt(f)
            }
        }
    };
}

id_type!(
    /// User ID wrapper
    UserId
);
id_type!(
    /// Project ID wrapper
    ProjectId
);
id_type!(
    /// API Key ID wrapper
    ApiKeyId
);
id_type!(
    /// LoRA adapter ID wrapper
    AdapterId
);
id_type!(
    /// Registered upstream MCP server ID wrapper
    McpServerId
);

// =============================================================================
// Account Records
// =============================================================================

/// Gateway user profile
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct User {
    pub id: UserId,
    pub username: String,
    pub email: String,
    pub display_name: Option<String>,
    pub avatar_url: Option<String>,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Project {
    pub id: ProjectId,
    pub user_id: UserId,
    pub name: String,
    pub description: Option<String>,
    pub is_public: bool,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
}

/// API key metadata. The plaintext key is never stored; only its SHA-256 hash.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct ApiKey {
    pub id: ApiKeyId,
    pub user_id: UserId,
    pub name: String,
    pub key_prefix: String,
    #[serde(skip_serializing, default)]
    pub key_hash: String,
    #[serde(with = "time::serde::rfc3339::option", default)]
    pub last_used_at: Option<OffsetDateTime>,
    #[serde(with = "time::serde::rfc3339::option", default)]
    pub expires_at: Option<OffsetDateTime>,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
}

impl ApiKey {
    /// Whether the key has passed its expiry time
    pub fn is_expired(&self, now: OffsetDateTime) -> bool {
        self.expires_at.is_some_and(|expires_at| expires_at <= now)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct LoraAdapter {
    pub id: AdapterId,
    pub user_id: UserId,
    pub project_id: Option<ProjectId>,
    pub name: String,
    pub model_base: String,
    pub storage_path: String,
    pub metadata: Value,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
}

/// An externally hosted MCP server registered by a user.
///
/// Both `id` and `slug` identify the same record; `slug` is globally unique
/// and URL-safe, `upstream_base_url` is always https without a trailing slash.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct McpServer {
    pub id: McpServerId,
    pub user_id: UserId,
    pub slug: String,
    pub name: String,
    pub upstream_base_url: String,
    pub enabled: bool,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339")]
    pub updated_at: OffsetDateTime,
}

// =============================================================================
// Budgets & Usage
// =============================================================================

/// Monthly spend budget for a user
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, FromRow)]
pub struct Budget {
    pub user_id: UserId,
    pub monthly_limit_cents: i64,
    pub current_usage_cents: i64,
    #[serde(with = "time::serde::rfc3339")]
    pub updated_at: OffsetDateTime,
}

impl Budget {
    pub fn remaining_cents(&self) -> i64 {
        self.monthly_limit_cents - self.current_usage_cents
    }

    /// Usage has reached or passed the limit
    pub fn is_exhausted(&self) -> bool {
        self.current_usage_cents >= self.monthly_limit_cents
    }
}

/// One gateway call, recorded for usage reporting
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewTraceRecord {
    pub user_id: UserId,
    pub trace_id: String,
    pub tool_name: String,
    pub model: String,
    pub tokens_in: i64,
    pub tokens_out: i64,
    pub cost_cents: i64,
    pub duration_ms: i64,
    pub status: TraceStatus,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TraceStatus {
    Success,
    Cached,
    RateLimited,
    Error,
}

impl TraceStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TraceStatus::Success => "success",
            TraceStatus::Cached => "cached",
            TraceStatus::RateLimited => "rate_limited",
            TraceStatus::Error => "error",
        }
    }
}

/// Usage aggregated per tool and model over a reporting window
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, FromRow)]
pub struct UsageSummary {
    pub tool_name: String,
    pub model: String,
    pub total_tokens_in: i64,
    pub total_tokens_out: i64,
    pub total_cost_cents: i64,
    pub request_count: i64,
}
