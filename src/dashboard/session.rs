// ABOUTME: Encrypted-cookie session manager for the web dashboard
// ABOUTME: AES-256-GCM sealed cookie carrying the session claims; refresh rotates the cookie value
//
// Licensed under either of Apache License, Version 2.0 or MIT License at your option.
// Copyright ©2025 Gatehouse Labs

use crate::config::environment::DashboardConfig;
use crate::errors::{AppError, AppResult};
use aes_gcm::aead::{Aead, KeyInit};
use aes_gcm::{Aes256Gcm, Key, Nonce};
use base64::{engine::general_purpose, Engine as _};
use chrono::{DateTime, Duration, Utc};
use ring::rand::{SecureRandom, SystemRandom};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Claims sealed inside the dashboard cookie
///
/// This "session" is the dashboard's login persistence, not the OAuth
/// core's `OAuthSession`; the two share only the rotation pattern.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DashboardSession {
    /// Signed-in dashboard user
    pub user_id: Uuid,
    /// When this cookie generation was issued
    pub issued_at: DateTime<Utc>,
    /// Hard expiry; refresh past this point requires a fresh login
    pub expires_at: DateTime<Utc>,
    /// Rotation counter, bumped on every refresh
    pub generation: u32,
}

/// Seals and rotates dashboard session cookies
pub struct DashboardSessionManager {
    cipher: Aes256Gcm,
    session_ttl: Duration,
    cookie_name: String,
}

impl DashboardSessionManager {
    /// Build the manager from the dashboard configuration
    #[must_use]
    pub fn new(config: &DashboardConfig) -> Self {
        let key = Key::<Aes256Gcm>::from_slice(&config.cookie_key);
        Self {
            cipher: Aes256Gcm::new(key),
            session_ttl: Duration::seconds(config.session_ttl_secs),
            cookie_name: config.cookie_name.clone(),
        }
    }

    /// The cookie name this manager reads and writes
    #[must_use]
    pub fn cookie_name(&self) -> &str {
        &self.cookie_name
    }

    /// Issue a fresh session cookie for a signed-in dashboard user
    ///
    /// # Errors
    /// Fails on RNG or serialization failure.
    pub fn issue(&self, user_id: Uuid) -> AppResult<String> {
        let now = Utc::now();
        self.seal(&DashboardSession {
            user_id,
            issued_at: now,
            expires_at: now + self.session_ttl,
            generation: 0,
        })
    }

    /// Rotate a session cookie: validate, bump the generation, re-seal
    ///
    /// The old cookie value is dead after this call in the sense that the
    /// dashboard immediately overwrites it; unlike OAuth refresh tokens
    /// there is no server-side used-flag, which is why this subsystem
    /// guards a dashboard login and nothing else.
    ///
    /// # Errors
    /// Fails when the cookie is malformed, tampered with, or expired.
    pub fn refresh(&self, cookie_value: &str) -> AppResult<(String, DashboardSession)> {
        let mut session = self.open(cookie_value)?;
        if session.expires_at <= Utc::now() {
            return Err(AppError::new(
                crate::errors::ErrorCode::AuthExpired,
                "dashboard session expired",
            ));
        }
        session.generation += 1;
        session.issued_at = Utc::now();
        let cookie = self.seal(&session)?;
        Ok((cookie, session))
    }

    /// Seal claims into `base64url(nonce || ciphertext)`
    fn seal(&self, session: &DashboardSession) -> AppResult<String> {
        let plaintext = serde_json::to_vec(session)
            .map_err(|e| AppError::internal(format!("session serialization failed: {e}")))?;

        let mut nonce_bytes = [0u8; 12];
        SystemRandom::new()
            .fill(&mut nonce_bytes)
            .map_err(|_| AppError::internal("system RNG failure"))?;
        let nonce = Nonce::from_slice(&nonce_bytes);

        let ciphertext = self
            .cipher
            .encrypt(nonce, plaintext.as_ref())
            .map_err(|_| AppError::internal("cookie encryption failed"))?;

        let mut sealed = Vec::with_capacity(12 + ciphertext.len());
        sealed.extend_from_slice(&nonce_bytes);
        sealed.extend_from_slice(&ciphertext);
        Ok(general_purpose::URL_SAFE_NO_PAD.encode(sealed))
    }

    /// Open a sealed cookie value back into claims
    fn open(&self, cookie_value: &str) -> AppResult<DashboardSession> {
        let sealed = general_purpose::URL_SAFE_NO_PAD
            .decode(cookie_value)
            .map_err(|_| AppError::auth_invalid("malformed session cookie"))?;
        if sealed.len() < 12 {
            return Err(AppError::auth_invalid("malformed session cookie"));
        }
        let (nonce_bytes, ciphertext) = sealed.split_at(12);
        let nonce = Nonce::from_slice(nonce_bytes);

        let plaintext = self
            .cipher
            .decrypt(nonce, ciphertext)
            .map_err(|_| AppError::auth_invalid("session cookie failed authentication"))?;

        serde_json::from_slice(&plaintext)
            .map_err(|_| AppError::auth_invalid("malformed session cookie"))
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]
    use super::*;

    fn manager() -> DashboardSessionManager {
        DashboardSessionManager::new(&DashboardConfig {
            cookie_key: [7u8; 32],
            cookie_name: "gatehouse_session".into(),
            session_ttl_secs: 3_600,
        })
    }

    #[test]
    fn refresh_rotates_the_cookie_value() {
        let manager = manager();
        let user = Uuid::new_v4();
        let cookie = manager.issue(user).unwrap();

        let (rotated, session) = manager.refresh(&cookie).unwrap();
        assert_ne!(rotated, cookie);
        assert_eq!(session.user_id, user);
        assert_eq!(session.generation, 1);

        let (_, second) = manager.refresh(&rotated).unwrap();
        assert_eq!(second.generation, 2);
    }

    #[test]
    fn tampered_cookie_is_rejected() {
        let manager = manager();
        let cookie = manager.issue(Uuid::new_v4()).unwrap();
        let mut tampered = cookie.into_bytes();
        let last = tampered.len() - 1;
        tampered[last] = if tampered[last] == b'A' { b'B' } else { b'A' };
        let tampered = String::from_utf8(tampered).unwrap();
        assert!(manager.refresh(&tampered).is_err());
    }

    #[test]
    fn cookie_from_a_different_key_is_rejected() {
        let manager_a = manager();
        let manager_b = DashboardSessionManager::new(&DashboardConfig {
            cookie_key: [9u8; 32],
            cookie_name: "gatehouse_session".into(),
            session_ttl_secs: 3_600,
        });
        let cookie = manager_a.issue(Uuid::new_v4()).unwrap();
        assert!(manager_b.refresh(&cookie).is_err());
    }

    #[test]
    fn expired_session_cannot_refresh() {
        let manager = DashboardSessionManager::new(&DashboardConfig {
            cookie_key: [7u8; 32],
            cookie_name: "gatehouse_session".into(),
            session_ttl_secs: -1,
        });
        let cookie = manager.issue(Uuid::new_v4()).unwrap();
        assert!(manager.refresh(&cookie).is_err());
    }
}
