// ABOUTME: Environment-based server configuration with parse-and-default helpers
// ABOUTME: Covers bind address, issuer URLs, protocol TTLs, rate limits, and the dashboard cookie key
//
// Licensed under either of Apache License, Version 2.0 or MIT License at your option.
// Copyright ©2025 Gatehouse Labs

use crate::errors::{AppError, AppResult};
use crate::rate_limiting::RateLimitPolicy;
use std::env;

/// OAuth 2.0 protocol configuration
#[derive(Debug, Clone)]
pub struct OAuth2ServerConfig {
    /// Domain used for machine-facing session URLs
    /// (`https://{domain}/{session_id}/{rotation_id}/{login_number}`)
    pub issuer_domain: String,
    /// Base URL of the human-facing authorization page
    pub auth_page_url: String,
    /// Pending session lifetime in seconds
    pub session_ttl_secs: i64,
    /// Authorization code lifetime in seconds
    pub auth_code_ttl_secs: i64,
    /// Access token lifetime in seconds
    pub access_token_ttl_secs: i64,
    /// Refresh token lifetime in seconds
    pub refresh_token_ttl_secs: i64,
}

impl Default for OAuth2ServerConfig {
    fn default() -> Self {
        Self {
            issuer_domain: "auth.gatehouse.dev".into(),
            auth_page_url: "https://auth.gatehouse.dev/login".into(),
            session_ttl_secs: 600,
            auth_code_ttl_secs: 600,
            access_token_ttl_secs: 3_600,
            refresh_token_ttl_secs: 30 * 24 * 3_600,
        }
    }
}

/// Default rate-limit policy applied when a credential carries none
#[derive(Debug, Clone)]
pub struct RateLimitConfig {
    /// Requests allowed per window
    pub default_max_requests: u32,
    /// Window length in milliseconds
    pub default_window_ms: i64,
    /// Global kill switch; false disables limiting entirely
    pub enabled: bool,
}

impl RateLimitConfig {
    /// Render as a [`RateLimitPolicy`]
    #[must_use]
    pub const fn as_policy(&self) -> RateLimitPolicy {
        RateLimitPolicy {
            max_requests: self.default_max_requests,
            window_ms: self.default_window_ms,
            enabled: self.enabled,
        }
    }
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            default_max_requests: 100,
            default_window_ms: 60_000,
            enabled: true,
        }
    }
}

/// Dashboard session-cookie subsystem configuration
///
/// Distinct from the OAuth core: this key encrypts the web dashboard's
/// login cookie, not any OAuth artifact.
#[derive(Debug, Clone)]
pub struct DashboardConfig {
    /// 32-byte AES-256-GCM key for cookie encryption
    pub cookie_key: [u8; 32],
    /// Cookie name set on the dashboard domain
    pub cookie_name: String,
    /// Dashboard session lifetime in seconds
    pub session_ttl_secs: i64,
}

/// Top-level server configuration, loaded once at startup
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// HTTP listen port
    pub http_port: u16,
    /// Bind address
    pub bind_address: String,
    /// OAuth protocol configuration
    pub oauth2_server: OAuth2ServerConfig,
    /// Rate limiter defaults
    pub rate_limit: RateLimitConfig,
    /// Dashboard cookie subsystem
    pub dashboard: DashboardConfig,
}

impl ServerConfig {
    /// Load configuration from environment variables
    ///
    /// # Errors
    /// Returns an error when a set variable fails to parse, or when
    /// `DASHBOARD_COOKIE_KEY` is set but is not 64 hex characters.
    pub fn from_env() -> AppResult<Self> {
        let oauth2_server = OAuth2ServerConfig {
            issuer_domain: env_or("OAUTH_ISSUER_DOMAIN", "auth.gatehouse.dev"),
            auth_page_url: env_or("OAUTH_AUTH_PAGE_URL", "https://auth.gatehouse.dev/login"),
            session_ttl_secs: env_parse_or("OAUTH_SESSION_TTL_SECS", 600)?,
            auth_code_ttl_secs: env_parse_or("OAUTH_CODE_TTL_SECS", 600)?,
            access_token_ttl_secs: env_parse_or("OAUTH_ACCESS_TOKEN_TTL_SECS", 3_600)?,
            refresh_token_ttl_secs: env_parse_or("OAUTH_REFRESH_TOKEN_TTL_SECS", 30 * 24 * 3_600)?,
        };

        let rate_limit = RateLimitConfig {
            default_max_requests: env_parse_or("RATE_LIMIT_MAX_REQUESTS", 100)?,
            default_window_ms: env_parse_or("RATE_LIMIT_WINDOW_MS", 60_000)?,
            enabled: env_parse_or("RATE_LIMIT_ENABLED", true)?,
        };

        let dashboard = DashboardConfig {
            cookie_key: load_cookie_key()?,
            cookie_name: env_or("DASHBOARD_COOKIE_NAME", "gatehouse_session"),
            session_ttl_secs: env_parse_or("DASHBOARD_SESSION_TTL_SECS", 24 * 3_600)?,
        };

        Ok(Self {
            http_port: env_parse_or("HTTP_PORT", 8081)?,
            bind_address: env_or("BIND_ADDRESS", "0.0.0.0"),
            oauth2_server,
            rate_limit,
            dashboard,
        })
    }
}

/// Read a string variable, falling back to a default
fn env_or(name: &str, default: &str) -> String {
    env::var(name).unwrap_or_else(|_| default.to_owned())
}

/// Read and parse a variable, falling back to a default when unset
fn env_parse_or<T: std::str::FromStr>(name: &str, default: T) -> AppResult<T> {
    match env::var(name) {
        Ok(raw) => raw
            .parse()
            .map_err(|_| AppError::config(format!("{name} is set but failed to parse: {raw}"))),
        Err(_) => Ok(default),
    }
}

/// Load the dashboard cookie key from `DASHBOARD_COOKIE_KEY` (64 hex chars),
/// or generate an ephemeral one for development
fn load_cookie_key() -> AppResult<[u8; 32]> {
    match env::var("DASHBOARD_COOKIE_KEY") {
        Ok(hex_key) => {
            let bytes = hex::decode(&hex_key)
                .map_err(|e| AppError::config(format!("DASHBOARD_COOKIE_KEY is not hex: {e}")))?;
            bytes.try_into().map_err(|_| {
                AppError::config("DASHBOARD_COOKIE_KEY must decode to exactly 32 bytes")
            })
        }
        Err(_) => {
            tracing::warn!(
                "DASHBOARD_COOKIE_KEY not set; generating an ephemeral key \
                 (dashboard sessions will not survive restarts)"
            );
            let mut key = [0u8; 32];
            use ring::rand::{SecureRandom, SystemRandom};
            SystemRandom::new()
                .fill(&mut key)
                .map_err(|_| AppError::internal("system RNG failure"))?;
            Ok(key)
        }
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]
    use super::*;

    #[test]
    fn defaults_match_protocol_windows() {
        let config = OAuth2ServerConfig::default();
        assert_eq!(config.session_ttl_secs, 600);
        assert_eq!(config.auth_code_ttl_secs, 600);
        assert_eq!(config.access_token_ttl_secs, 3_600);
        assert_eq!(config.refresh_token_ttl_secs, 2_592_000);
    }

    #[test]
    fn rate_limit_config_renders_policy() {
        let config = RateLimitConfig::default();
        let policy = config.as_policy();
        assert!(policy.enabled);
        assert_eq!(policy.max_requests, 100);
        assert_eq!(policy.window_ms, 60_000);
    }

    #[test]
    #[serial_test::serial]
    fn from_env_reads_overrides() {
        env::set_var("HTTP_PORT", "9000");
        env::set_var("OAUTH_ISSUER_DOMAIN", "auth.test.example");
        let config = ServerConfig::from_env().unwrap();
        assert_eq!(config.http_port, 9000);
        assert_eq!(config.oauth2_server.issuer_domain, "auth.test.example");
        env::remove_var("HTTP_PORT");
        env::remove_var("OAUTH_ISSUER_DOMAIN");
    }

    #[test]
    #[serial_test::serial]
    fn from_env_rejects_unparseable_values() {
        env::set_var("HTTP_PORT", "not-a-port");
        assert!(ServerConfig::from_env().is_err());
        env::remove_var("HTTP_PORT");
    }
}
