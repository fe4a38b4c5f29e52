// ABOUTME: OAuth 2.0 request/response wire types and the RFC 6749 error shape
// ABOUTME: Includes the two-variant authorize rejection (JSON body vs redirect-with-error-params)
//
// Licensed under either of Apache License, Version 2.0 or MIT License at your option.
// Copyright ©2025 Gatehouse Labs

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use uuid::Uuid;

/// OAuth 2.0 Authorization Request
///
/// Every field is optional at the wire level; the protocol engine enforces
/// presence in its fixed validation order so each missing field maps to the
/// right OAuth error rather than a generic parse failure.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct AuthorizeRequest {
    /// Response type; only "code" is supported
    pub response_type: Option<String>,
    /// Public client identifier
    pub client_id: Option<String>,
    /// Redirect URI for the final callback
    pub redirect_uri: Option<String>,
    /// Requested scopes (raw space-separated string)
    pub scope: Option<String>,
    /// Client CSRF state, echoed back on completion
    pub state: Option<String>,
    /// PKCE code challenge (RFC 7636)
    pub code_challenge: Option<String>,
    /// PKCE challenge method ("S256" or "plain")
    pub code_challenge_method: Option<String>,
}

impl AuthorizeRequest {
    /// Build a request from query or form parameters
    #[must_use]
    pub fn from_params(params: &HashMap<String, String>) -> Self {
        Self {
            response_type: params.get("response_type").cloned(),
            client_id: params.get("client_id").cloned(),
            redirect_uri: params.get("redirect_uri").cloned(),
            scope: params.get("scope").cloned(),
            state: params.get("state").cloned(),
            code_challenge: params.get("code_challenge").cloned(),
            code_challenge_method: params.get("code_challenge_method").cloned(),
        }
    }
}

/// Successful authorization: the pending session's two URLs
#[derive(Debug, Clone, Serialize)]
pub struct AuthorizeSuccess {
    /// Human-facing authorization page carrying the session's storage id
    pub authorization_url: String,
    /// Machine-facing session URL:
    /// `https://{domain}/{session_id}/{rotation_id}/{login_number}`
    pub session_url: String,
    /// High-entropy session identifier
    pub session_id: String,
    /// Seconds until the pending session expires
    pub expires_in: i64,
}

/// Collaborator callback after the end user signed in
///
/// Fields arrive camelCase from the auth collaborator; all are optional at
/// the wire level so the handler can produce precise 400s.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CompleteRequest {
    /// High-entropy session identifier from the session URL
    pub session_id: Option<String>,
    /// Collaborator-verified user identifier
    pub user_id: Option<Uuid>,
    /// Collaborator-verified email
    pub user_email: Option<String>,
    /// Display name, when the provider supplied one
    pub user_display_name: Option<String>,
    /// Photo URL, when the provider supplied one
    #[serde(rename = "userPhotoURL")]
    pub user_photo_url: Option<String>,
    /// Identity provider tag (e.g. "google.com")
    pub provider: Option<String>,
}

/// Response to the collaborator: where to send the browser next
#[derive(Debug, Clone, Serialize)]
pub struct CompleteResponse {
    /// `redirect_uri` with `code` and `state` appended
    pub redirect_url: String,
    /// The minted authorization code
    pub code: String,
    /// Session identifier
    pub session_id: String,
    /// Session rotation identifier
    pub rotation_id: String,
    /// Session login number
    pub login_number: u64,
}

/// OAuth 2.0 Token Request (form-encoded or JSON)
#[derive(Debug, Clone, Default, Deserialize)]
pub struct TokenRequest {
    /// Grant type: `authorization_code` or `refresh_token`
    pub grant_type: Option<String>,
    /// Authorization code (authorization_code grant)
    pub code: Option<String>,
    /// Redirect URI, must equal the one recorded at issuance
    pub redirect_uri: Option<String>,
    /// Public client identifier
    pub client_id: Option<String>,
    /// Confidential client secret
    pub client_secret: Option<String>,
    /// Refresh token (refresh_token grant)
    pub refresh_token: Option<String>,
    /// PKCE code verifier (RFC 7636)
    pub code_verifier: Option<String>,
}

/// OAuth 2.0 Token Response
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TokenResponse {
    /// Bearer access token
    pub access_token: String,
    /// Always "Bearer"
    pub token_type: String,
    /// Seconds until the access token expires
    pub expires_in: i64,
    /// Rotation credential
    pub refresh_token: String,
    /// Space-joined granted scopes
    pub scope: String,
}

/// Scoped claims about the token's user
///
/// Claims appear only when their governing scope was granted; an
/// openid-only token yields `sub` alone.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UserInfoResponse {
    /// Subject: the user id
    pub sub: String,
    /// Display name (profile scope)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// First name segment (profile scope)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub given_name: Option<String>,
    /// Remaining name segments (profile scope)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub family_name: Option<String>,
    /// Photo URL (profile scope)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub picture: Option<String>,
    /// Locale; hardcoded "en-US" until real localization lands
    #[serde(skip_serializing_if = "Option::is_none")]
    pub locale: Option<String>,
    /// Email address (email scope)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    /// Email verification flag (email scope)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub email_verified: Option<bool>,
}

/// Token introspection result
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ValidateResponse {
    /// Whether the token is currently usable
    pub active: bool,
    /// Space-joined scopes (active only)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub scope: Option<String>,
    /// Credential identifier the token was issued to (active only)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub client_id: Option<String>,
    /// Owning user (active only)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
    /// Seconds remaining (active only)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expires_in: Option<i64>,
}

impl ValidateResponse {
    /// The inactive-token response
    #[must_use]
    pub const fn inactive() -> Self {
        Self {
            active: false,
            scope: None,
            client_id: None,
            user_id: None,
            expires_in: None,
        }
    }
}

/// OAuth 2.0 Error Response (RFC 6749 shape)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OAuth2Error {
    /// Error code
    pub error: String,
    /// Human-readable error description
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_description: Option<String>,
    /// Client CSRF state, echoed when known
    #[serde(skip_serializing_if = "Option::is_none")]
    pub state: Option<String>,
}

impl OAuth2Error {
    fn new(error: &str, description: Option<String>) -> Self {
        Self {
            error: error.to_owned(),
            error_description: description,
            state: None,
        }
    }

    /// Create an `invalid_request` error
    #[must_use]
    pub fn invalid_request(description: &str) -> Self {
        Self::new("invalid_request", Some(description.to_owned()))
    }

    /// Create an `invalid_client` error
    ///
    /// The description is deliberately identical for unknown client ids and
    /// wrong secrets; the distinction lives only in internal logs.
    #[must_use]
    pub fn invalid_client() -> Self {
        Self::new(
            "invalid_client",
            Some("Client authentication failed".to_owned()),
        )
    }

    /// Create an `invalid_grant` error
    #[must_use]
    pub fn invalid_grant(description: &str) -> Self {
        Self::new("invalid_grant", Some(description.to_owned()))
    }

    /// Create an `invalid_scope` error
    #[must_use]
    pub fn invalid_scope(description: &str) -> Self {
        Self::new("invalid_scope", Some(description.to_owned()))
    }

    /// Create an `unsupported_response_type` error
    #[must_use]
    pub fn unsupported_response_type() -> Self {
        Self::new(
            "unsupported_response_type",
            Some("Only the 'code' response_type is supported".to_owned()),
        )
    }

    /// Create an `unsupported_grant_type` error
    #[must_use]
    pub fn unsupported_grant_type() -> Self {
        Self::new(
            "unsupported_grant_type",
            Some("Grant type not supported".to_owned()),
        )
    }

    /// Create a `temporarily_unavailable` error (rate limiting)
    #[must_use]
    pub fn temporarily_unavailable() -> Self {
        Self::new(
            "temporarily_unavailable",
            Some("Rate limit exceeded, retry later".to_owned()),
        )
    }

    /// Create an `invalid_token` error (bearer-token endpoints)
    #[must_use]
    pub fn invalid_token(description: &str) -> Self {
        Self::new("invalid_token", Some(description.to_owned()))
    }

    /// Create an `insufficient_scope` error
    #[must_use]
    pub fn insufficient_scope(description: &str) -> Self {
        Self::new("insufficient_scope", Some(description.to_owned()))
    }

    /// Create a `server_error`; the raw cause goes to the security log, never the caller
    #[must_use]
    pub fn server_error() -> Self {
        Self::new(
            "server_error",
            Some("An internal error occurred".to_owned()),
        )
    }

    /// Echo the client's CSRF state on the error
    #[must_use]
    pub fn with_state(mut self, state: Option<String>) -> Self {
        self.state = state;
        self
    }

    /// Fixed status table for protocol errors
    ///
    /// `temporarily_unavailable` maps to 503 here (the token/authorize
    /// convention); the userinfo route deliberately overrides it to 429.
    #[must_use]
    pub fn http_status(&self) -> u16 {
        match self.error.as_str() {
            "invalid_client" | "invalid_token" => 401,
            "insufficient_scope" => 403,
            "temporarily_unavailable" => 503,
            "server_error" => 500,
            _ => 400,
        }
    }
}

/// How an authorize failure is delivered
///
/// Stages validated before the redirect URI is trusted answer with a JSON
/// body; the scope stage, which runs after the redirect URI matched the
/// client's registration, answers with a redirect carrying the error in
/// query parameters. One policy table, not scattered conditionals.
#[derive(Debug, Clone)]
pub enum AuthorizeRejection {
    /// 400 JSON body (`{error, error_description?, state?}`)
    Body(OAuth2Error),
    /// 302 back to the validated redirect URI with error query parameters
    Redirect {
        /// The already-validated redirect URI
        redirect_uri: String,
        /// Error to encode in the query string
        error: OAuth2Error,
    },
}

impl AuthorizeRejection {
    /// Render the redirect variant's target URL
    #[must_use]
    pub fn redirect_url(&self) -> Option<String> {
        let Self::Redirect {
            redirect_uri,
            error,
        } = self
        else {
            return None;
        };

        let mut url = format!(
            "{}{}error={}",
            redirect_uri,
            if redirect_uri.contains('?') { '&' } else { '?' },
            urlencoding::encode(&error.error)
        );
        if let Some(description) = &error.error_description {
            url.push_str("&error_description=");
            url.push_str(&urlencoding::encode(description));
        }
        if let Some(state) = &error.state {
            url.push_str("&state=");
            url.push_str(&urlencoding::encode(state));
        }
        Some(url)
    }
}
