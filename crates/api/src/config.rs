//! Application configuration

use std::{env, str::FromStr, time::Duration};

/// Application configuration loaded from environment variables
#[derive(Debug, Clone)]
pub struct Config {
    // Server
    pub bind_address: String,
    pub public_url: String,
    pub cors_allowed_origins: Vec<String>,
    pub log_format: LogFormat,

    // Database
    pub database_url: String,
    pub database_max_connections: u32,

    // MCP
    pub mcp_request_timeout_ms: u64,
    pub mcp_max_request_body_bytes: usize,
    pub mcp_max_response_body_bytes: usize,
    pub sse_keepalive_secs: u64,

    // Routing
    pub request_cache_ttl_secs: u64,
}

/// Log output format for the tracing subscriber
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
}

impl FromStr for LogFormat {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "pretty" => Ok(LogFormat::Pretty),
            "json" => Ok(LogFormat::Json),
            _ => Err(ConfigError::Invalid("LOG_FORMAT must be 'json' or 'pretty'")),
        }
    }
}

fn parse_or<T: FromStr>(name: &str, default: T) -> T {
    env::var(name)
        .ok()
        .and_then(|value| value.trim().parse().ok())
        .unwrap_or(default)
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self, ConfigError> {
        let public_url = env::var("PUBLIC_URL")
            .unwrap_or_else(|_| "http://localhost:3000".to_string())
            .trim_end_matches('/')
            .to_string();
        if url::Url::parse(&public_url).is_err() {
            return Err(ConfigError::Invalid("PUBLIC_URL must be an absolute URL"));
        }

        Ok(Self {
            // Server
            bind_address: env::var("BIND_ADDRESS").unwrap_or_else(|_| "0.0.0.0:3000".to_string()),
            public_url,
            cors_allowed_origins: env::var("CORS_ALLOWED_ORIGINS")
                .unwrap_or_else(|_| "https://makethe.app".to_string())
                .split(',')
                .map(|origin| origin.trim().trim_end_matches('/').to_string())
                .filter(|origin| !origin.is_empty())
                .collect(),
            log_format: match env::var("LOG_FORMAT") {
                Ok(value) => value.parse()?,
                Err(_) => LogFormat::default(),
            },

            // Database
            database_url: env::var("DATABASE_URL")
                .map_err(|_| ConfigError::Missing("DATABASE_URL"))?,
            database_max_connections: parse_or("DATABASE_MAX_CONNECTIONS", 10),

            // MCP
            mcp_request_timeout_ms: parse_or("MCP_REQUEST_TIMEOUT_MS", 30_000),
            mcp_max_request_body_bytes: parse_or("MCP_MAX_REQUEST_BODY_BYTES", 1_048_576), // 1MB default
            mcp_max_response_body_bytes: parse_or("MCP_MAX_RESPONSE_BODY_BYTES", 8 * 1_048_576),
            sse_keepalive_secs: parse_or("SSE_KEEPALIVE_SECS", 30),

            // Routing
            request_cache_ttl_secs: parse_or("REQUEST_CACHE_TTL_SECS", 300),
        })
    }

    pub fn mcp_request_timeout(&self) -> Duration {
        Duration::from_millis(self.mcp_request_timeout_ms)
    }

    pub fn sse_keepalive(&self) -> Duration {
        Duration::from_secs(self.sse_keepalive_secs.max(1))
    }

    /// Window in which a repeated completion request counts as a cache hit
    pub fn request_cache_ttl(&self) -> time::Duration {
        time::Duration::seconds(i64::try_from(self.request_cache_ttl_secs).unwrap_or(i64::MAX))
    }

    /// Configuration for tests and local tooling, without touching the environment
    pub fn for_tests() -> Self {
        Self {
            bind_address: "127.0.0.1:0".to_string(),
            public_url: "http://gateway.test".to_string(),
            cors_allowed_origins: vec!["https://makethe.app".to_string()],
            log_format: LogFormat::Pretty,
            database_url: "postgres://localhost/mcpgw_test".to_string(),
            database_max_connections: 2,
            mcp_request_timeout_ms: 2_000,
            mcp_max_request_body_bytes: 1_048_576,
            mcp_max_response_body_bytes: 1_048_576,
            sse_keepalive_secs: 30,
            request_cache_ttl_secs: 300,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    Missing(&'static str),
    #[error("Invalid configuration: {0}")]
    Invalid(&'static str),
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use serial_test::serial;

    const VARS: &[&str] = &[
        "BIND_ADDRESS",
        "PUBLIC_URL",
        "CORS_ALLOWED_ORIGINS",
        "LOG_FORMAT",
        "DATABASE_URL",
        "DATABASE_MAX_CONNECTIONS",
        "MCP_REQUEST_TIMEOUT_MS",
        "MCP_MAX_REQUEST_BODY_BYTES",
        "MCP_MAX_RESPONSE_BODY_BYTES",
        "SSE_KEEPALIVE_SECS",
        "REQUEST_CACHE_TTL_SECS",
    ];

    fn reset_env() {
        for var in VARS {
            env::remove_var(var);
        }
    }

    #[test]
    #[serial]
    fn test_defaults() {
        reset_env();
        env::set_var("DATABASE_URL", "postgres://localhost/mcpgw");

        let config = Config::from_env().unwrap();
        assert_eq!(config.bind_address, "0.0.0.0:3000");
        assert_eq!(config.public_url, "http://localhost:3000");
        assert_eq!(config.cors_allowed_origins, vec!["https://makethe.app"]);
        assert_eq!(config.log_format, LogFormat::Pretty);
        assert_eq!(config.database_max_connections, 10);
        assert_eq!(config.mcp_request_timeout(), Duration::from_secs(30));
        assert_eq!(config.mcp_max_request_body_bytes, 1_048_576);
        assert_eq!(config.sse_keepalive(), Duration::from_secs(30));
        assert_eq!(config.mcp_max_response_body_bytes, 8 * 1_048_576);
        assert_eq!(config.request_cache_ttl(), time::Duration::minutes(5));

        reset_env();
    }

    #[test]
    #[serial]
    fn test_missing_database_url() {
        reset_env();
        assert!(matches!(
            Config::from_env(),
            Err(ConfigError::Missing("DATABASE_URL"))
        ));
    }

    #[test]
    #[serial]
    fn test_overrides_and_normalization() {
        reset_env();
        env::set_var("DATABASE_URL", "postgres://localhost/mcpgw");
        env::set_var("PUBLIC_URL", "https://gw.makethe.app/");
        env::set_var("CORS_ALLOWED_ORIGINS", "https://a.example.com/, ,https://b.example.com");
        env::set_var("LOG_FORMAT", "JSON");
        env::set_var("MCP_REQUEST_TIMEOUT_MS", "1500");
        env::set_var("SSE_KEEPALIVE_SECS", "not-a-number");
        env::set_var("REQUEST_CACHE_TTL_SECS", "60");

        let config = Config::from_env().unwrap();
        assert_eq!(config.public_url, "https://gw.makethe.app");
        assert_eq!(
            config.cors_allowed_origins,
            vec!["https://a.example.com", "https://b.example.com"]
        );
        assert_eq!(config.log_format, LogFormat::Json);
        assert_eq!(config.mcp_request_timeout_ms, 1500);
        assert_eq!(config.sse_keepalive_secs, 30);
        assert_eq!(config.request_cache_ttl(), time::Duration::seconds(60));

        reset_env();
    }

    #[test]
    #[serial]
    fn test_invalid_log_format_rejected() {
        reset_env();
        env::set_var("DATABASE_URL", "postgres://localhost/mcpgw");
        env::set_var("LOG_FORMAT", "xml");
        assert!(matches!(Config::from_env(), Err(ConfigError::Invalid(_))));
        reset_env();
    }
}
