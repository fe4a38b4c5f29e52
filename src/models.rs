// ABOUTME: Core domain records for the Gatehouse OAuth 2.0 authorization server
// ABOUTME: Defines users, client credentials, sessions, codes, tokens, usage stats, and security logs
//
// Licensed under either of Apache License, Version 2.0 or MIT License at your option.
// Copyright ©2025 Gatehouse Labs

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::rate_limiting::RateLimitPolicy;

/// An end user authenticated by the external identity collaborator
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct User {
    /// Unique user identifier
    pub id: Uuid,
    /// Email address (upsert key)
    pub email: String,
    /// Display name from the identity provider
    pub display_name: Option<String>,
    /// Profile photo URL from the identity provider
    pub photo_url: Option<String>,
    /// Identity provider tag (e.g. "google.com")
    pub provider: Option<String>,
    /// Whether the email has been verified by the collaborator
    pub email_verified: bool,
    /// Active flag; inactive users fail userinfo lookups
    pub is_active: bool,
    /// When the user record was created
    pub created_at: DateTime<Utc>,
    /// Last successful sign-in through any client
    pub last_sign_in_at: DateTime<Utc>,
}

impl User {
    /// Create a new user record from a collaborator-verified identity
    #[must_use]
    pub fn new(id: Uuid, email: String, display_name: Option<String>) -> Self {
        let now = Utc::now();
        Self {
            id,
            email,
            display_name,
            photo_url: None,
            provider: None,
            email_verified: true,
            is_active: true,
            created_at: now,
            last_sign_in_at: now,
        }
    }
}

/// Registered client application credentials
///
/// `client_id` is globally unique and immutable after creation. The
/// `client_secret` is compared exactly (constant-time) and never exposed
/// after the initial creation display.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiCredentials {
    /// Storage identifier
    pub id: Uuid,
    /// User who owns this client registration
    pub user_id: Uuid,
    /// Public client identifier
    pub client_id: String,
    /// Confidential client secret
    pub client_secret: String,
    /// Public API key for alternate lookup
    pub api_key: String,
    /// Display name for the application
    pub name: String,
    /// Optional description shown on consent surfaces
    pub description: Option<String>,
    /// Registered redirect URIs (exact strings or wildcard patterns)
    pub redirect_uris: Vec<String>,
    /// Origins allowed for browser-based calls
    pub allowed_origins: Vec<String>,
    /// Scopes this client may request
    pub scopes: Vec<String>,
    /// Deactivated clients fail every protocol call
    pub is_active: bool,
    /// Per-credential rate limit policy
    pub rate_limit: RateLimitPolicy,
    /// When the registration was created
    pub created_at: DateTime<Utc>,
    /// Last successful protocol call charged to this credential
    pub last_used_at: Option<DateTime<Utc>>,
}

/// Lifecycle of an in-flight authorization attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionStatus {
    /// Created at authorize, waiting for the end user to sign in
    Pending,
    /// Completed exactly once by the auth collaborator
    Authorized,
    /// Past its expiry window
    Expired,
    /// Administratively revoked
    Revoked,
}

/// One authorization attempt, from `authorize` until token issuance
///
/// Looked up by `session_id` only. The `access_token`/`refresh_token`/
/// `token_expires_at` fields are denormalized read-model snapshots kept
/// eventually consistent with the token records; they are never consulted
/// for security decisions.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OAuthSession {
    /// Storage identifier (referenced by the human-facing auth page URL)
    pub id: Uuid,
    /// High-entropy session identifier (16 random bytes, hex)
    pub session_id: String,
    /// Per-client rotating identifier
    pub rotation_id: String,
    /// Per-credential monotonic counter
    pub login_number: u64,
    /// Authenticated user, set at complete
    pub user_id: Option<Uuid>,
    /// Credential this session belongs to
    pub credential_id: Uuid,
    /// Client CSRF state, echoed back on the final redirect
    pub state: String,
    /// PKCE code challenge copied onto the minted code
    pub code_challenge: Option<String>,
    /// PKCE challenge method ("S256" or "plain")
    pub code_challenge_method: Option<String>,
    /// Redirect URI validated at authorize time
    pub redirect_uri: String,
    /// Granted scopes (recognized subset of the request)
    pub scopes: Vec<String>,
    /// Session state machine position
    pub status: SessionStatus,
    /// When the session was created
    pub created_at: DateTime<Utc>,
    /// Hard expiry; an expired pending session can never become authorized
    pub expires_at: DateTime<Utc>,
    /// When the session transitioned to authorized
    pub authorized_at: Option<DateTime<Utc>>,
    /// Denormalized snapshot of the issued access token
    pub access_token: Option<String>,
    /// Denormalized snapshot of the issued refresh token
    pub refresh_token: Option<String>,
    /// Denormalized snapshot of the access token expiry
    pub token_expires_at: Option<DateTime<Utc>>,
}

/// One-time authorization code binding a session to a user
///
/// Consumed exactly once; kept (marked used) for audit rather than deleted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthorizationCode {
    /// The code value (store key)
    pub code: String,
    /// Session the code was minted for
    pub session_id: String,
    /// User who authorized the session
    pub user_id: Uuid,
    /// Credential the code is bound to
    pub credential_id: Uuid,
    /// Redirect URI that must match byte-for-byte at exchange
    pub redirect_uri: String,
    /// Scopes carried onto the minted tokens
    pub scopes: Vec<String>,
    /// PKCE challenge recorded at issuance
    pub code_challenge: Option<String>,
    /// PKCE challenge method
    pub code_challenge_method: Option<String>,
    /// Hard expiry
    pub expires_at: DateTime<Utc>,
    /// Set atomically at first successful redemption
    pub used: bool,
    /// When the code was minted
    pub created_at: DateTime<Utc>,
}

/// Short-lived bearer credential for resource access
///
/// The raw token value is the store key; treat it as a secret and never
/// log it in full.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AccessToken {
    /// Token value (store key)
    pub token: String,
    /// Owning user
    pub user_id: Uuid,
    /// Issuing credential
    pub credential_id: Uuid,
    /// Session the token descends from
    pub session_id: String,
    /// Granted scopes
    pub scopes: Vec<String>,
    /// Always "Bearer"
    pub token_type: String,
    /// Hard expiry
    pub expires_at: DateTime<Utc>,
    /// When the token was minted
    pub created_at: DateTime<Utc>,
    /// Once revoked, never valid again regardless of expiry
    pub is_revoked: bool,
}

/// Long-lived, single-use-then-rotated refresh credential
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RefreshToken {
    /// Token value (store key)
    pub token: String,
    /// Owning user
    pub user_id: Uuid,
    /// Issuing credential
    pub credential_id: Uuid,
    /// Session the token descends from
    pub session_id: String,
    /// The access token this refresh token was issued alongside
    pub access_token: String,
    /// Hard expiry
    pub expires_at: DateTime<Utc>,
    /// When the token was minted
    pub created_at: DateTime<Utc>,
    /// Set at redemption; any later redemption attempt fails
    pub used: bool,
    /// Token value of the successor, once rotated
    pub replaced_by: Option<String>,
}

/// One recorded protocol call charged against a credential
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UsageStat {
    /// Credential the call was charged to
    pub credential_id: Uuid,
    /// Operation name ("authorize", "token", "userinfo", ...)
    pub operation: String,
    /// Whether the call succeeded
    pub success: bool,
    /// Requesting IP when known
    pub ip: Option<String>,
    /// When the call happened
    pub timestamp: DateTime<Utc>,
}

/// Append-only security log entry, written at every protocol decision point
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SecurityLogEntry {
    /// Unique entry identifier
    pub id: Uuid,
    /// Action name ("oauth_authorize", "oauth_token", ...)
    pub action: String,
    /// Whether the action succeeded
    pub success: bool,
    /// Requesting IP
    pub ip: String,
    /// Requesting user agent
    pub user_agent: Option<String>,
    /// User involved, when resolved
    pub user_id: Option<Uuid>,
    /// Credential involved, when resolved
    pub credential_id: Option<Uuid>,
    /// Error string for failures
    pub error: Option<String>,
    /// Arbitrary structured metadata
    pub metadata: serde_json::Value,
    /// When the entry was appended
    pub timestamp: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]
    use super::*;

    #[test]
    fn user_new_defaults_to_active_and_verified() {
        let user = User::new(Uuid::new_v4(), "a@b.co".into(), Some("A B".into()));
        assert!(user.is_active);
        assert!(user.email_verified);
        assert_eq!(user.display_name.as_deref(), Some("A B"));
    }

    #[test]
    fn session_status_serializes_lowercase() {
        let json = serde_json::to_string(&SessionStatus::Pending).unwrap();
        assert_eq!(json, "\"pending\"");
        let back: SessionStatus = serde_json::from_str("\"authorized\"").unwrap();
        assert_eq!(back, SessionStatus::Authorized);
    }
}
