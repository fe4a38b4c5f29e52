// ABOUTME: Storage factory and backend dispatcher with runtime backend selection
// ABOUTME: Detects the backend from the storage URL; currently ships the in-memory reference backend
//
// Licensed under either of Apache License, Version 2.0 or MIT License at your option.
// Copyright ©2025 Gatehouse Labs

use super::memory::MemoryDatabase;
use super::DatabaseProvider;
use crate::models::{
    AccessToken, ApiCredentials, AuthorizationCode, OAuthSession, RefreshToken, SecurityLogEntry,
    UsageStat, User,
};
use anyhow::{anyhow, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tracing::{debug, info};
use uuid::Uuid;

/// Supported storage backends
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DatabaseType {
    /// In-process memory (reference deployment and tests)
    Memory,
}

/// Storage instance wrapper that delegates to the selected backend
///
/// A transactional document-store backend would be added as a second
/// variant without touching protocol logic.
#[derive(Clone)]
pub enum Database {
    /// In-memory backend
    Memory(MemoryDatabase),
}

impl Database {
    /// Create a new storage instance based on the connection string
    ///
    /// # Errors
    /// Returns an error when the URL scheme names an unsupported backend.
    pub fn new(database_url: &str) -> Result<Self> {
        debug!("detecting storage backend from URL: {database_url}");
        let db_type = detect_database_type(database_url)?;
        info!("selected storage backend: {db_type:?}");

        match db_type {
            DatabaseType::Memory => Ok(Self::Memory(MemoryDatabase::new())),
        }
    }

    /// Get a descriptive string for the current backend
    #[must_use]
    pub const fn backend_info(&self) -> &'static str {
        match self {
            Self::Memory(_) => "Memory (reference deployment)",
        }
    }

    /// Get the backend type enum
    #[must_use]
    pub const fn database_type(&self) -> DatabaseType {
        match self {
            Self::Memory(_) => DatabaseType::Memory,
        }
    }
}

/// Detect the backend type from a connection string
fn detect_database_type(database_url: &str) -> Result<DatabaseType> {
    if database_url == "memory://" || database_url.starts_with("memory:") {
        Ok(DatabaseType::Memory)
    } else {
        Err(anyhow!(
            "unsupported storage URL: {database_url} (supported: memory://)"
        ))
    }
}

#[async_trait]
impl DatabaseProvider for Database {
    async fn get_user(&self, user_id: Uuid) -> Result<Option<User>> {
        match self {
            Self::Memory(db) => db.get_user(user_id).await,
        }
    }

    async fn get_user_by_email(&self, email: &str) -> Result<Option<User>> {
        match self {
            Self::Memory(db) => db.get_user_by_email(email).await,
        }
    }

    async fn upsert_user(&self, user: &User) -> Result<()> {
        match self {
            Self::Memory(db) => db.upsert_user(user).await,
        }
    }

    async fn create_credentials(&self, credentials: &ApiCredentials) -> Result<()> {
        match self {
            Self::Memory(db) => db.create_credentials(credentials).await,
        }
    }

    async fn get_credentials_by_client_id(
        &self,
        client_id: &str,
    ) -> Result<Option<ApiCredentials>> {
        match self {
            Self::Memory(db) => db.get_credentials_by_client_id(client_id).await,
        }
    }

    async fn get_credentials(&self, id: Uuid) -> Result<Option<ApiCredentials>> {
        match self {
            Self::Memory(db) => db.get_credentials(id).await,
        }
    }

    async fn touch_credentials(&self, id: Uuid, at: DateTime<Utc>) -> Result<()> {
        match self {
            Self::Memory(db) => db.touch_credentials(id, at).await,
        }
    }

    async fn deactivate_credentials(&self, id: Uuid) -> Result<()> {
        match self {
            Self::Memory(db) => db.deactivate_credentials(id).await,
        }
    }

    async fn store_oauth_session(&self, session: &OAuthSession) -> Result<()> {
        match self {
            Self::Memory(db) => db.store_oauth_session(session).await,
        }
    }

    async fn get_oauth_session(&self, session_id: &str) -> Result<Option<OAuthSession>> {
        match self {
            Self::Memory(db) => db.get_oauth_session(session_id).await,
        }
    }

    async fn authorize_oauth_session(
        &self,
        session_id: &str,
        user_id: Uuid,
        now: DateTime<Utc>,
    ) -> Result<Option<OAuthSession>> {
        match self {
            Self::Memory(db) => db.authorize_oauth_session(session_id, user_id, now).await,
        }
    }

    async fn update_session_tokens(
        &self,
        session_id: &str,
        access_token: &str,
        refresh_token: &str,
        token_expires_at: DateTime<Utc>,
    ) -> Result<()> {
        match self {
            Self::Memory(db) => {
                db.update_session_tokens(session_id, access_token, refresh_token, token_expires_at)
                    .await
            }
        }
    }

    async fn delete_expired_sessions(&self, now: DateTime<Utc>) -> Result<u64> {
        match self {
            Self::Memory(db) => db.delete_expired_sessions(now).await,
        }
    }

    async fn next_login_number(&self, credential_id: Uuid) -> Result<u64> {
        match self {
            Self::Memory(db) => db.next_login_number(credential_id).await,
        }
    }

    async fn store_authorization_code(&self, code: &AuthorizationCode) -> Result<()> {
        match self {
            Self::Memory(db) => db.store_authorization_code(code).await,
        }
    }

    async fn get_authorization_code(&self, code: &str) -> Result<Option<AuthorizationCode>> {
        match self {
            Self::Memory(db) => db.get_authorization_code(code).await,
        }
    }

    async fn consume_authorization_code(&self, code: &str) -> Result<bool> {
        match self {
            Self::Memory(db) => db.consume_authorization_code(code).await,
        }
    }

    async fn store_access_token(&self, token: &AccessToken) -> Result<()> {
        match self {
            Self::Memory(db) => db.store_access_token(token).await,
        }
    }

    async fn get_access_token(&self, token: &str) -> Result<Option<AccessToken>> {
        match self {
            Self::Memory(db) => db.get_access_token(token).await,
        }
    }

    async fn revoke_access_token(&self, token: &str) -> Result<()> {
        match self {
            Self::Memory(db) => db.revoke_access_token(token).await,
        }
    }

    async fn store_refresh_token(&self, token: &RefreshToken) -> Result<()> {
        match self {
            Self::Memory(db) => db.store_refresh_token(token).await,
        }
    }

    async fn get_refresh_token(&self, token: &str) -> Result<Option<RefreshToken>> {
        match self {
            Self::Memory(db) => db.get_refresh_token(token).await,
        }
    }

    async fn consume_refresh_token(&self, token: &str) -> Result<bool> {
        match self {
            Self::Memory(db) => db.consume_refresh_token(token).await,
        }
    }

    async fn mark_refresh_token_replaced(&self, token: &str, replaced_by: &str) -> Result<()> {
        match self {
            Self::Memory(db) => db.mark_refresh_token_replaced(token, replaced_by).await,
        }
    }

    async fn record_usage_stat(&self, stat: &UsageStat) -> Result<()> {
        match self {
            Self::Memory(db) => db.record_usage_stat(stat).await,
        }
    }

    async fn get_usage_stats(&self, credential_id: Uuid) -> Result<Vec<UsageStat>> {
        match self {
            Self::Memory(db) => db.get_usage_stats(credential_id).await,
        }
    }

    async fn store_security_log(&self, entry: &SecurityLogEntry) -> Result<()> {
        match self {
            Self::Memory(db) => db.store_security_log(entry).await,
        }
    }

    async fn get_security_logs(&self, limit: usize) -> Result<Vec<SecurityLogEntry>> {
        match self {
            Self::Memory(db) => db.get_security_logs(limit).await,
        }
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]
    use super::*;

    #[test]
    fn memory_url_selects_memory_backend() {
        let db = Database::new("memory://").unwrap();
        assert_eq!(db.database_type(), DatabaseType::Memory);
        assert!(db.backend_info().contains("Memory"));
    }

    #[test]
    fn unknown_url_is_rejected() {
        assert!(Database::new("postgres://localhost/auth").is_err());
    }
}
