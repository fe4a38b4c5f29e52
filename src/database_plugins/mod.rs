// ABOUTME: Storage abstraction layer for the Gatehouse auth server
// ABOUTME: Plugin architecture with an in-memory reference backend; a document store would slot in beside it
//
// Licensed under either of Apache License, Version 2.0 or MIT License at your option.
// Copyright ©2025 Gatehouse Labs

use crate::models::{
    AccessToken, ApiCredentials, AuthorizationCode, OAuthSession, RefreshToken, SecurityLogEntry,
    UsageStat, User,
};
use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

pub mod factory;
pub mod memory;

/// Core storage abstraction trait
///
/// Handlers issue read-then-write sequences against this trait and must not
/// assume those sequences are atomic. The exceptions are the explicitly
/// atomic operations below (`authorize_oauth_session`,
/// `consume_authorization_code`, `consume_refresh_token`): implementations
/// must execute their check-and-set under a single storage-level guard so
/// two concurrent redemptions cannot both succeed.
#[async_trait]
pub trait DatabaseProvider: Send + Sync + Clone {
    // ================================
    // User Management
    // ================================

    /// Get user by ID
    async fn get_user(&self, user_id: Uuid) -> Result<Option<User>>;

    /// Get user by email address
    async fn get_user_by_email(&self, email: &str) -> Result<Option<User>>;

    /// Insert a user, or overwrite the record with the same id
    async fn upsert_user(&self, user: &User) -> Result<()>;

    // ================================
    // Client Credentials
    // ================================

    /// Register new client credentials
    async fn create_credentials(&self, credentials: &ApiCredentials) -> Result<()>;

    /// Get credentials by public client identifier
    async fn get_credentials_by_client_id(&self, client_id: &str)
        -> Result<Option<ApiCredentials>>;

    /// Get credentials by storage identifier
    async fn get_credentials(&self, id: Uuid) -> Result<Option<ApiCredentials>>;

    /// Bump the credential's last-used timestamp
    async fn touch_credentials(&self, id: Uuid, at: DateTime<Utc>) -> Result<()>;

    /// Deactivate a credential in place, revoking all issuance capability
    async fn deactivate_credentials(&self, id: Uuid) -> Result<()>;

    // ================================
    // OAuth Sessions
    // ================================

    /// Persist a new session
    async fn store_oauth_session(&self, session: &OAuthSession) -> Result<()>;

    /// Get a session by its high-entropy session identifier
    async fn get_oauth_session(&self, session_id: &str) -> Result<Option<OAuthSession>>;

    /// Atomically transition a pending, unexpired session to authorized
    ///
    /// Returns the updated session, or `None` when the session is missing,
    /// expired, or not pending. The pending check, expiry check, and status
    /// write happen under one guard: a session authorizes at most once and
    /// never after expiry.
    async fn authorize_oauth_session(
        &self,
        session_id: &str,
        user_id: Uuid,
        now: DateTime<Utc>,
    ) -> Result<Option<OAuthSession>>;

    /// Update the session's denormalized token snapshots (read-model only)
    async fn update_session_tokens(
        &self,
        session_id: &str,
        access_token: &str,
        refresh_token: &str,
        token_expires_at: DateTime<Utc>,
    ) -> Result<()>;

    /// Delete sessions past their expiry; returns how many were removed
    ///
    /// Housekeeping interface for the external sweep job; the protocol
    /// engine never calls this.
    async fn delete_expired_sessions(&self, now: DateTime<Utc>) -> Result<u64>;

    /// Next value of the per-credential login counter
    async fn next_login_number(&self, credential_id: Uuid) -> Result<u64>;

    // ================================
    // Authorization Codes
    // ================================

    /// Persist a freshly minted code
    async fn store_authorization_code(&self, code: &AuthorizationCode) -> Result<()>;

    /// Get a code by its raw value
    async fn get_authorization_code(&self, code: &str) -> Result<Option<AuthorizationCode>>;

    /// Atomically flip `used` from false to true
    ///
    /// Returns true when this call performed the flip; false when the code
    /// is missing or was already used. At most one caller ever sees true
    /// for a given code.
    async fn consume_authorization_code(&self, code: &str) -> Result<bool>;

    // ================================
    // Access Tokens
    // ================================

    /// Persist a freshly minted access token
    async fn store_access_token(&self, token: &AccessToken) -> Result<()>;

    /// Get an access token by its raw value
    async fn get_access_token(&self, token: &str) -> Result<Option<AccessToken>>;

    /// Set `is_revoked` in place; the record is kept for audit
    async fn revoke_access_token(&self, token: &str) -> Result<()>;

    // ================================
    // Refresh Tokens
    // ================================

    /// Persist a freshly minted refresh token
    async fn store_refresh_token(&self, token: &RefreshToken) -> Result<()>;

    /// Get a refresh token by its raw value
    async fn get_refresh_token(&self, token: &str) -> Result<Option<RefreshToken>>;

    /// Atomically flip `used` from false to true (same contract as
    /// [`Self::consume_authorization_code`])
    async fn consume_refresh_token(&self, token: &str) -> Result<bool>;

    /// Record the successor token minted by a rotation
    async fn mark_refresh_token_replaced(&self, token: &str, replaced_by: &str) -> Result<()>;

    // ================================
    // Usage Stats & Security Logs
    // ================================

    /// Append a usage stat
    async fn record_usage_stat(&self, stat: &UsageStat) -> Result<()>;

    /// Read usage stats charged to a credential (newest last)
    async fn get_usage_stats(&self, credential_id: Uuid) -> Result<Vec<UsageStat>>;

    /// Append a security log entry
    async fn store_security_log(&self, entry: &SecurityLogEntry) -> Result<()>;

    /// Read the most recent security log entries (newest last)
    async fn get_security_logs(&self, limit: usize) -> Result<Vec<SecurityLogEntry>>;
}
