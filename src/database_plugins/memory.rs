// ABOUTME: In-memory reference storage backend for the Gatehouse auth server
// ABOUTME: RwLock-guarded collections; the write lock serializes every check-and-set operation
//
// Licensed under either of Apache License, Version 2.0 or MIT License at your option.
// Copyright ©2025 Gatehouse Labs

use super::DatabaseProvider;
use crate::models::{
    AccessToken, ApiCredentials, AuthorizationCode, OAuthSession, RefreshToken, SecurityLogEntry,
    SessionStatus, UsageStat, User,
};
use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use uuid::Uuid;

/// All collections behind one lock; conditional updates (consume, authorize)
/// run entirely under the write guard and therefore serialize.
#[derive(Debug, Default)]
struct Collections {
    users: HashMap<Uuid, User>,
    credentials: HashMap<Uuid, ApiCredentials>,
    /// client_id -> credential storage id
    credentials_by_client_id: HashMap<String, Uuid>,
    sessions: HashMap<String, OAuthSession>,
    authorization_codes: HashMap<String, AuthorizationCode>,
    access_tokens: HashMap<String, AccessToken>,
    refresh_tokens: HashMap<String, RefreshToken>,
    usage_stats: Vec<UsageStat>,
    security_logs: Vec<SecurityLogEntry>,
    login_counters: HashMap<Uuid, u64>,
}

/// In-process storage backend used by the reference deployment and tests
#[derive(Debug, Clone, Default)]
pub struct MemoryDatabase {
    collections: Arc<RwLock<Collections>>,
}

impl MemoryDatabase {
    /// Create an empty store
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl DatabaseProvider for MemoryDatabase {
    async fn get_user(&self, user_id: Uuid) -> Result<Option<User>> {
        Ok(self.collections.read().await.users.get(&user_id).cloned())
    }

    async fn get_user_by_email(&self, email: &str) -> Result<Option<User>> {
        let guard = self.collections.read().await;
        Ok(guard.users.values().find(|u| u.email == email).cloned())
    }

    async fn upsert_user(&self, user: &User) -> Result<()> {
        self.collections
            .write()
            .await
            .users
            .insert(user.id, user.clone());
        Ok(())
    }

    async fn create_credentials(&self, credentials: &ApiCredentials) -> Result<()> {
        let mut guard = self.collections.write().await;
        if guard
            .credentials_by_client_id
            .contains_key(&credentials.client_id)
        {
            anyhow::bail!("client_id already registered: {}", credentials.client_id);
        }
        guard
            .credentials_by_client_id
            .insert(credentials.client_id.clone(), credentials.id);
        guard.credentials.insert(credentials.id, credentials.clone());
        Ok(())
    }

    async fn get_credentials_by_client_id(
        &self,
        client_id: &str,
    ) -> Result<Option<ApiCredentials>> {
        let guard = self.collections.read().await;
        Ok(guard
            .credentials_by_client_id
            .get(client_id)
            .and_then(|id| guard.credentials.get(id))
            .cloned())
    }

    async fn get_credentials(&self, id: Uuid) -> Result<Option<ApiCredentials>> {
        Ok(self.collections.read().await.credentials.get(&id).cloned())
    }

    async fn touch_credentials(&self, id: Uuid, at: DateTime<Utc>) -> Result<()> {
        if let Some(credentials) = self.collections.write().await.credentials.get_mut(&id) {
            credentials.last_used_at = Some(at);
        }
        Ok(())
    }

    async fn deactivate_credentials(&self, id: Uuid) -> Result<()> {
        if let Some(credentials) = self.collections.write().await.credentials.get_mut(&id) {
            credentials.is_active = false;
        }
        Ok(())
    }

    async fn store_oauth_session(&self, session: &OAuthSession) -> Result<()> {
        self.collections
            .write()
            .await
            .sessions
            .insert(session.session_id.clone(), session.clone());
        Ok(())
    }

    async fn get_oauth_session(&self, session_id: &str) -> Result<Option<OAuthSession>> {
        Ok(self
            .collections
            .read()
            .await
            .sessions
            .get(session_id)
            .cloned())
    }

    async fn authorize_oauth_session(
        &self,
        session_id: &str,
        user_id: Uuid,
        now: DateTime<Utc>,
    ) -> Result<Option<OAuthSession>> {
        let mut guard = self.collections.write().await;
        let Some(session) = guard.sessions.get_mut(session_id) else {
            return Ok(None);
        };
        if session.status != SessionStatus::Pending || session.expires_at <= now {
            return Ok(None);
        }
        session.status = SessionStatus::Authorized;
        session.user_id = Some(user_id);
        session.authorized_at = Some(now);
        Ok(Some(session.clone()))
    }

    async fn update_session_tokens(
        &self,
        session_id: &str,
        access_token: &str,
        refresh_token: &str,
        token_expires_at: DateTime<Utc>,
    ) -> Result<()> {
        if let Some(session) = self.collections.write().await.sessions.get_mut(session_id) {
            session.access_token = Some(access_token.to_owned());
            session.refresh_token = Some(refresh_token.to_owned());
            session.token_expires_at = Some(token_expires_at);
        }
        Ok(())
    }

    async fn delete_expired_sessions(&self, now: DateTime<Utc>) -> Result<u64> {
        let mut guard = self.collections.write().await;
        let before = guard.sessions.len();
        guard.sessions.retain(|_, s| s.expires_at > now);
        Ok((before - guard.sessions.len()) as u64)
    }

    async fn next_login_number(&self, credential_id: Uuid) -> Result<u64> {
        let mut guard = self.collections.write().await;
        let counter = guard.login_counters.entry(credential_id).or_insert(0);
        *counter += 1;
        Ok(*counter)
    }

    async fn store_authorization_code(&self, code: &AuthorizationCode) -> Result<()> {
        self.collections
            .write()
            .await
            .authorization_codes
            .insert(code.code.clone(), code.clone());
        Ok(())
    }

    async fn get_authorization_code(&self, code: &str) -> Result<Option<AuthorizationCode>> {
        Ok(self
            .collections
            .read()
            .await
            .authorization_codes
            .get(code)
            .cloned())
    }

    async fn consume_authorization_code(&self, code: &str) -> Result<bool> {
        let mut guard = self.collections.write().await;
        match guard.authorization_codes.get_mut(code) {
            Some(record) if !record.used => {
                record.used = true;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn store_access_token(&self, token: &AccessToken) -> Result<()> {
        self.collections
            .write()
            .await
            .access_tokens
            .insert(token.token.clone(), token.clone());
        Ok(())
    }

    async fn get_access_token(&self, token: &str) -> Result<Option<AccessToken>> {
        Ok(self
            .collections
            .read()
            .await
            .access_tokens
            .get(token)
            .cloned())
    }

    async fn revoke_access_token(&self, token: &str) -> Result<()> {
        if let Some(record) = self.collections.write().await.access_tokens.get_mut(token) {
            record.is_revoked = true;
        }
        Ok(())
    }

    async fn store_refresh_token(&self, token: &RefreshToken) -> Result<()> {
        self.collections
            .write()
            .await
            .refresh_tokens
            .insert(token.token.clone(), token.clone());
        Ok(())
    }

    async fn get_refresh_token(&self, token: &str) -> Result<Option<RefreshToken>> {
        Ok(self
            .collections
            .read()
            .await
            .refresh_tokens
            .get(token)
            .cloned())
    }

    async fn consume_refresh_token(&self, token: &str) -> Result<bool> {
        let mut guard = self.collections.write().await;
        match guard.refresh_tokens.get_mut(token) {
            Some(record) if !record.used => {
                record.used = true;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn mark_refresh_token_replaced(&self, token: &str, replaced_by: &str) -> Result<()> {
        if let Some(record) = self.collections.write().await.refresh_tokens.get_mut(token) {
            record.replaced_by = Some(replaced_by.to_owned());
        }
        Ok(())
    }

    async fn record_usage_stat(&self, stat: &UsageStat) -> Result<()> {
        self.collections.write().await.usage_stats.push(stat.clone());
        Ok(())
    }

    async fn get_usage_stats(&self, credential_id: Uuid) -> Result<Vec<UsageStat>> {
        Ok(self
            .collections
            .read()
            .await
            .usage_stats
            .iter()
            .filter(|s| s.credential_id == credential_id)
            .cloned()
            .collect())
    }

    async fn store_security_log(&self, entry: &SecurityLogEntry) -> Result<()> {
        self.collections
            .write()
            .await
            .security_logs
            .push(entry.clone());
        Ok(())
    }

    async fn get_security_logs(&self, limit: usize) -> Result<Vec<SecurityLogEntry>> {
        let guard = self.collections.read().await;
        let start = guard.security_logs.len().saturating_sub(limit);
        Ok(guard.security_logs[start..].to_vec())
    }
}
