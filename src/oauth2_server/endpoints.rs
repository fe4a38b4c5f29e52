// ABOUTME: OAuth 2.0 protocol state machine: authorize, complete, token, userinfo, and validate
// ABOUTME: Orchestrates the credential, session, code, and token stores and encodes every transition rule
//
// Licensed under either of Apache License, Version 2.0 or MIT License at your option.
// Copyright ©2025 Gatehouse Labs

use super::models::{
    AuthorizeRejection, AuthorizeRequest, AuthorizeSuccess, CompleteRequest, CompleteResponse,
    OAuth2Error, TokenRequest, TokenResponse, UserInfoResponse, ValidateResponse,
};
use super::{pkce, scopes};
use crate::config::environment::ServerConfig;
use crate::database_plugins::{factory::Database, DatabaseProvider};
use crate::errors::{AppError, AppResult};
use crate::logging::redact_token;
use crate::models::{
    AccessToken, ApiCredentials, AuthorizationCode, OAuthSession, RefreshToken, SessionStatus,
    UsageStat, User,
};
use crate::rate_limiting::{client_operation_key, FixedWindowLimiter, RateLimitPolicy};
use crate::security::audit::{RequestContext, SecurityAuditor, SecurityEvent};
use base64::{engine::general_purpose, Engine as _};
use chrono::{Duration, Utc};
use ring::rand::{SecureRandom, SystemRandom};
use std::sync::Arc;
use subtle::ConstantTimeEq;
use uuid::Uuid;

/// Operation names used for rate-limit identifiers and usage stats
const OP_AUTHORIZE: &str = "authorize";
const OP_COMPLETE: &str = "complete";
const OP_TOKEN: &str = "token";
const OP_USERINFO: &str = "userinfo";

/// Security-log action names, one per protocol decision point
const ACTION_AUTHORIZE: &str = "oauth_authorize";
const ACTION_COMPLETE: &str = "oauth_complete";
const ACTION_TOKEN: &str = "oauth_token";
const ACTION_USERINFO: &str = "oauth_userinfo";
const ACTION_VALIDATE: &str = "oauth_validate";

/// A flow failure: the protocol error to return, the credentials when the
/// failure happened after client resolution (so usage can be charged), and
/// the internal cause destined for the security log's metadata.
struct FlowFailure<E> {
    error: E,
    credentials: Option<ApiCredentials>,
    cause: Option<String>,
}

impl<E> FlowFailure<E> {
    fn new(error: E) -> Self {
        Self {
            error,
            credentials: None,
            cause: None,
        }
    }

    fn with_credentials(mut self, credentials: ApiCredentials) -> Self {
        self.credentials = Some(credentials);
        self
    }

    fn with_cause(mut self, cause: String) -> Self {
        self.cause = Some(cause);
        self
    }
}

/// OAuth 2.0 Authorization Server protocol engine
pub struct OAuth2AuthorizationServer {
    database: Arc<Database>,
    rate_limiter: Arc<FixedWindowLimiter>,
    auditor: Arc<SecurityAuditor>,
    config: Arc<ServerConfig>,
}

impl OAuth2AuthorizationServer {
    /// Create the engine over shared resources
    #[must_use]
    pub fn new(
        database: Arc<Database>,
        rate_limiter: Arc<FixedWindowLimiter>,
        auditor: Arc<SecurityAuditor>,
        config: Arc<ServerConfig>,
    ) -> Self {
        Self {
            database,
            rate_limiter,
            auditor,
            config,
        }
    }

    // ================================
    // authorize
    // ================================

    /// Handle an authorization request (GET/POST /authorize)
    ///
    /// # Errors
    /// Returns [`AuthorizeRejection::Body`] for failures before the
    /// redirect URI is trusted, [`AuthorizeRejection::Redirect`] for
    /// scope-stage failures after it has been validated.
    pub async fn authorize(
        &self,
        request: AuthorizeRequest,
        context: &RequestContext,
    ) -> Result<AuthorizeSuccess, AuthorizeRejection> {
        let client_id = request.client_id.clone();
        match self.authorize_flow(&request).await {
            Ok((success, credentials)) => {
                let policy = self.effective_policy(&credentials);
                self.rate_limiter.record(
                    &client_operation_key(&credentials.client_id, OP_AUTHORIZE),
                    true,
                    &policy,
                );
                self.record_usage(credentials.id, OP_AUTHORIZE, true, context)
                    .await;
                self.auditor
                    .log(
                        SecurityEvent::new(ACTION_AUTHORIZE, true, context)
                            .with_credential_id(credentials.id)
                            .with_metadata(serde_json::json!({
                                "session_id": success.session_id,
                            })),
                    )
                    .await;
                Ok(success)
            }
            Err(failure) => {
                let error_code = match &failure.error {
                    AuthorizeRejection::Body(e) | AuthorizeRejection::Redirect { error: e, .. } => {
                        e.error.clone()
                    }
                };
                let mut event = SecurityEvent::new(ACTION_AUTHORIZE, false, context)
                    .with_error(&error_code)
                    .with_metadata(serde_json::json!({
                        "client_id": client_id,
                        "cause": failure.cause,
                    }));
                if let Some(credentials) = failure.credentials {
                    let policy = self.effective_policy(&credentials);
                    self.rate_limiter.record(
                        &client_operation_key(&credentials.client_id, OP_AUTHORIZE),
                        false,
                        &policy,
                    );
                    self.record_usage(credentials.id, OP_AUTHORIZE, false, context)
                        .await;
                    event = event.with_credential_id(credentials.id);
                }
                self.auditor.log(event).await;
                Err(failure.error)
            }
        }
    }

    /// The authorize validation ladder; each failure short-circuits
    async fn authorize_flow(
        &self,
        request: &AuthorizeRequest,
    ) -> Result<(AuthorizeSuccess, ApiCredentials), FlowFailure<AuthorizeRejection>> {
        let state = request.state.clone();
        let body_err = |error: OAuth2Error, state: &Option<String>| {
            FlowFailure::new(AuthorizeRejection::Body(error.with_state(state.clone())))
        };

        // 1. Only the authorization code flow is supported
        if request.response_type.as_deref() != Some("code") {
            return Err(body_err(OAuth2Error::unsupported_response_type(), &state));
        }

        // 2. client_id
        let Some(client_id) = request.client_id.as_deref().filter(|s| !s.is_empty()) else {
            return Err(body_err(
                OAuth2Error::invalid_request("client_id is required"),
                &state,
            ));
        };

        // 3. redirect_uri present and absolute
        let Some(redirect_uri) = request.redirect_uri.as_deref().filter(|s| !s.is_empty()) else {
            return Err(body_err(
                OAuth2Error::invalid_request("redirect_uri is required"),
                &state,
            ));
        };
        if url::Url::parse(redirect_uri).is_err() {
            return Err(body_err(
                OAuth2Error::invalid_request("redirect_uri must be an absolute URL"),
                &state,
            ));
        }

        // 4. scope (raw, non-empty)
        let Some(scope_raw) = request
            .scope
            .as_deref()
            .filter(|s| !s.trim().is_empty())
        else {
            return Err(body_err(
                OAuth2Error::invalid_request("scope is required"),
                &state,
            ));
        };

        // 5. PKCE parameters, when present, must be coherent
        if request.code_challenge.is_some() {
            match request.code_challenge_method.as_deref() {
                Some(method) if pkce::is_supported_method(method) => {}
                Some(_) => {
                    return Err(body_err(
                        OAuth2Error::invalid_request(
                            "code_challenge_method must be 'S256' or 'plain'",
                        ),
                        &state,
                    ));
                }
                None => {
                    return Err(body_err(
                        OAuth2Error::invalid_request(
                            "code_challenge_method is required when code_challenge is present",
                        ),
                        &state,
                    ));
                }
            }
        }

        // 6. Client must exist and be active
        let credentials = match self.database.get_credentials_by_client_id(client_id).await {
            Ok(Some(credentials)) if credentials.is_active => credentials,
            Ok(_) => {
                tracing::warn!(client_id, "authorize for unknown or inactive client");
                return Err(body_err(OAuth2Error::invalid_client(), &state));
            }
            Err(e) => {
                tracing::error!("credential lookup failed for client_id={client_id}: {e:#}");
                return Err(body_err(OAuth2Error::server_error(), &state)
                    .with_cause(e.to_string()));
            }
        };

        // 7. Rate limit keyed by (client_id, "authorize")
        let policy = self.effective_policy(&credentials);
        let decision = self
            .rate_limiter
            .check(&client_operation_key(client_id, OP_AUTHORIZE), &policy);
        if !decision.allowed {
            tracing::warn!(client_id, "authorize rate limit exceeded");
            return Err(body_err(OAuth2Error::temporarily_unavailable(), &state)
                .with_credentials(credentials));
        }

        // 8. redirect_uri must match the client's registration
        if !redirect_uri_matches(&credentials.redirect_uris, redirect_uri) {
            return Err(body_err(
                OAuth2Error::invalid_request("redirect_uri is not registered for this client"),
                &state,
            )
            .with_credentials(credentials));
        }

        // 9. At least one recognized scope; unrecognized tokens drop silently.
        // The redirect URI is trusted from here on, so this stage answers
        // with a redirect instead of a JSON body.
        let granted_scopes = scopes::parse_recognized(scope_raw);
        if granted_scopes.is_empty() {
            return Err(FlowFailure::new(AuthorizeRejection::Redirect {
                redirect_uri: redirect_uri.to_owned(),
                error: OAuth2Error::invalid_scope("no recognized scopes in request")
                    .with_state(state),
            })
            .with_credentials(credentials));
        }

        // All gates passed: create the pending session
        let internal =
            |e: anyhow::Error, state: &Option<String>| -> FlowFailure<AuthorizeRejection> {
                tracing::error!("failed to create session for client_id: {e:#}");
                FlowFailure::new(AuthorizeRejection::Body(
                    OAuth2Error::server_error().with_state(state.clone()),
                ))
                .with_cause(e.to_string())
            };

        let session_id = generate_session_id().map_err(|e| internal(e, &state))?;
        let rotation_id = generate_random_token(9).map_err(|e| internal(e, &state))?;
        let login_number = self
            .database
            .next_login_number(credentials.id)
            .await
            .map_err(|e| internal(e, &state))?;

        let now = Utc::now();
        let session = OAuthSession {
            id: Uuid::new_v4(),
            session_id: session_id.clone(),
            rotation_id: rotation_id.clone(),
            login_number,
            user_id: None,
            credential_id: credentials.id,
            state: request.state.clone().unwrap_or_default(),
            code_challenge: request.code_challenge.clone(),
            code_challenge_method: request.code_challenge_method.clone(),
            redirect_uri: redirect_uri.to_owned(),
            scopes: granted_scopes,
            status: SessionStatus::Pending,
            created_at: now,
            expires_at: now + Duration::seconds(self.config.oauth2_server.session_ttl_secs),
            authorized_at: None,
            access_token: None,
            refresh_token: None,
            token_expires_at: None,
        };
        self.database
            .store_oauth_session(&session)
            .await
            .map_err(|e| internal(e, &state))?;

        let authorization_url = format!(
            "{}?session={}",
            self.config.oauth2_server.auth_page_url, session.id
        );
        let session_url = format!(
            "https://{}/{}/{}/{}",
            self.config.oauth2_server.issuer_domain, session_id, rotation_id, login_number
        );

        tracing::info!(
            client_id,
            session_id = %redact_token(&session_id),
            "pending authorization session created"
        );

        Ok((
            AuthorizeSuccess {
                authorization_url,
                session_url,
                session_id,
                expires_in: self.config.oauth2_server.session_ttl_secs,
            },
            credentials,
        ))
    }

    // ================================
    // complete
    // ================================

    /// Handle the collaborator callback after end-user login (POST /auth/complete)
    ///
    /// Not a client-facing OAuth endpoint: failures are plain 400s, not
    /// OAuth-error-shaped bodies.
    ///
    /// # Errors
    /// Returns an [`AppError`] for missing fields and invalid, expired, or
    /// already-completed sessions.
    pub async fn complete(
        &self,
        request: CompleteRequest,
        context: &RequestContext,
    ) -> AppResult<CompleteResponse> {
        match self.complete_flow(request).await {
            Ok((response, credential_id, user_id)) => {
                self.record_usage(credential_id, OP_COMPLETE, true, context)
                    .await;
                self.auditor
                    .log(
                        SecurityEvent::new(ACTION_COMPLETE, true, context)
                            .with_credential_id(credential_id)
                            .with_user_id(user_id)
                            .with_metadata(serde_json::json!({
                                "session_id": response.session_id,
                            })),
                    )
                    .await;
                Ok(response)
            }
            Err(error) => {
                self.auditor
                    .log(
                        SecurityEvent::new(ACTION_COMPLETE, false, context)
                            .with_error(error.to_string()),
                    )
                    .await;
                Err(error)
            }
        }
    }

    async fn complete_flow(
        &self,
        request: CompleteRequest,
    ) -> AppResult<(CompleteResponse, Uuid, Uuid)> {
        // 1. Required fields
        let Some(session_id) = request.session_id.as_deref().filter(|s| !s.is_empty()) else {
            return Err(AppError::invalid_input("sessionId is required"));
        };
        let Some(user_id) = request.user_id else {
            return Err(AppError::invalid_input("userId is required"));
        };
        let Some(user_email) = request.user_email.as_deref().filter(|s| !s.is_empty()) else {
            return Err(AppError::invalid_input("userEmail is required"));
        };

        // 2-4. Session exists, is unexpired, and is still pending
        let session = self
            .database
            .get_oauth_session(session_id)
            .await
            .map_err(storage_error)?
            .ok_or_else(|| AppError::invalid_input("invalid session"))?;

        let now = Utc::now();
        if session.expires_at <= now {
            return Err(AppError::invalid_input("session expired"));
        }
        if session.status != SessionStatus::Pending {
            return Err(AppError::invalid_input("session already completed"));
        }

        // 5. Upsert the user by email
        let user = match self
            .database
            .get_user_by_email(user_email)
            .await
            .map_err(storage_error)?
        {
            Some(mut existing) => {
                if request.user_display_name.is_some() {
                    existing.display_name = request.user_display_name.clone();
                }
                if request.user_photo_url.is_some() {
                    existing.photo_url = request.user_photo_url.clone();
                }
                if request.provider.is_some() {
                    existing.provider = request.provider.clone();
                }
                existing.email_verified = true;
                existing.is_active = true;
                existing.last_sign_in_at = now;
                self.database
                    .upsert_user(&existing)
                    .await
                    .map_err(storage_error)?;
                existing
            }
            None => {
                let mut user = User::new(
                    user_id,
                    user_email.to_owned(),
                    request.user_display_name.clone(),
                );
                user.photo_url = request.user_photo_url.clone();
                user.provider = request.provider.clone();
                self.database
                    .upsert_user(&user)
                    .await
                    .map_err(storage_error)?;
                user
            }
        };

        // 6. Mint the authorization code from the session, verbatim
        let code_value = generate_random_token(32).map_err(storage_error)?;
        let code = AuthorizationCode {
            code: code_value.clone(),
            session_id: session.session_id.clone(),
            user_id: user.id,
            credential_id: session.credential_id,
            redirect_uri: session.redirect_uri.clone(),
            scopes: session.scopes.clone(),
            code_challenge: session.code_challenge.clone(),
            code_challenge_method: session.code_challenge_method.clone(),
            expires_at: now + Duration::seconds(self.config.oauth2_server.auth_code_ttl_secs),
            used: false,
            created_at: now,
        };
        self.database
            .store_authorization_code(&code)
            .await
            .map_err(storage_error)?;

        // 7. Mark the session authorized; the store enforces pending + unexpired
        let Some(_authorized) = self
            .database
            .authorize_oauth_session(&session.session_id, user.id, now)
            .await
            .map_err(storage_error)?
        else {
            // Lost a race with a concurrent completion; the minted code
            // expires naturally.
            return Err(AppError::invalid_input("session already completed"));
        };

        // 8. Final redirect back to the client
        let redirect_url = append_query(
            &session.redirect_uri,
            &[("code", &code_value), ("state", &session.state)],
        );

        tracing::info!(
            session_id = %redact_token(&session.session_id),
            user_id = %user.id,
            "authorization session completed"
        );

        Ok((
            CompleteResponse {
                redirect_url,
                code: code_value,
                session_id: session.session_id,
                rotation_id: session.rotation_id,
                login_number: session.login_number,
            },
            session.credential_id,
            user.id,
        ))
    }

    // ================================
    // token
    // ================================

    /// Handle a token request (POST /oauth/token)
    ///
    /// # Errors
    /// Returns the protocol error mapped by the fixed status table in
    /// [`OAuth2Error::http_status`].
    pub async fn token(
        &self,
        request: TokenRequest,
        context: &RequestContext,
    ) -> Result<TokenResponse, OAuth2Error> {
        let client_id = request.client_id.clone();
        let grant_type = request.grant_type.clone();
        match self.token_flow(&request).await {
            Ok((response, credentials)) => {
                let policy = self.effective_policy(&credentials);
                self.rate_limiter.record(
                    &client_operation_key(&credentials.client_id, OP_TOKEN),
                    true,
                    &policy,
                );
                self.record_usage(credentials.id, OP_TOKEN, true, context)
                    .await;
                self.auditor
                    .log(
                        SecurityEvent::new(ACTION_TOKEN, true, context)
                            .with_credential_id(credentials.id)
                            .with_metadata(serde_json::json!({ "grant_type": grant_type })),
                    )
                    .await;
                Ok(response)
            }
            Err(failure) => {
                let mut event = SecurityEvent::new(ACTION_TOKEN, false, context)
                    .with_error(&failure.error.error)
                    .with_metadata(serde_json::json!({
                        "client_id": client_id,
                        "grant_type": grant_type,
                        "cause": failure.cause,
                    }));
                // Usage is charged only when the failure happened after
                // client resolution; an unknown client can't be billed.
                if let Some(credentials) = failure.credentials {
                    let policy = self.effective_policy(&credentials);
                    self.rate_limiter.record(
                        &client_operation_key(&credentials.client_id, OP_TOKEN),
                        false,
                        &policy,
                    );
                    self.record_usage(credentials.id, OP_TOKEN, false, context)
                        .await;
                    event = event.with_credential_id(credentials.id);
                }
                self.auditor.log(event).await;
                Err(failure.error)
            }
        }
    }

    async fn token_flow(
        &self,
        request: &TokenRequest,
    ) -> Result<(TokenResponse, ApiCredentials), FlowFailure<OAuth2Error>> {
        // 1. grant_type present and recognized
        let Some(grant_type) = request.grant_type.as_deref().filter(|s| !s.is_empty()) else {
            return Err(FlowFailure::new(OAuth2Error::invalid_request(
                "grant_type is required",
            )));
        };
        if grant_type != "authorization_code" && grant_type != "refresh_token" {
            return Err(FlowFailure::new(OAuth2Error::unsupported_grant_type()));
        }

        // 2. Client credentials always required
        let Some(client_id) = request.client_id.as_deref().filter(|s| !s.is_empty()) else {
            return Err(FlowFailure::new(OAuth2Error::invalid_request(
                "client_id is required",
            )));
        };
        let Some(client_secret) = request.client_secret.as_deref().filter(|s| !s.is_empty())
        else {
            return Err(FlowFailure::new(OAuth2Error::invalid_request(
                "client_secret is required",
            )));
        };

        // 3. Grant-specific required fields
        if grant_type == "authorization_code" {
            if request.code.as_deref().is_none_or_empty() {
                return Err(FlowFailure::new(OAuth2Error::invalid_request(
                    "code is required for the authorization_code grant",
                )));
            }
            if request.redirect_uri.as_deref().is_none_or_empty() {
                return Err(FlowFailure::new(OAuth2Error::invalid_request(
                    "redirect_uri is required for the authorization_code grant",
                )));
            }
        } else if request.refresh_token.as_deref().is_none_or_empty() {
            return Err(FlowFailure::new(OAuth2Error::invalid_request(
                "refresh_token is required for the refresh_token grant",
            )));
        }

        // 4. Client must exist and be active. The response for an unknown
        // client is identical to a wrong secret below.
        let credentials = match self.database.get_credentials_by_client_id(client_id).await {
            Ok(Some(credentials)) if credentials.is_active => credentials,
            Ok(_) => {
                tracing::warn!(client_id, "token request for unknown or inactive client");
                return Err(FlowFailure::new(OAuth2Error::invalid_client()));
            }
            Err(e) => {
                tracing::error!("credential lookup failed for client_id={client_id}: {e:#}");
                return Err(
                    FlowFailure::new(OAuth2Error::server_error()).with_cause(e.to_string())
                );
            }
        };

        // 5. Constant-time secret comparison
        let secret_ok: bool = client_secret
            .as_bytes()
            .ct_eq(credentials.client_secret.as_bytes())
            .into();
        if !secret_ok {
            tracing::warn!(client_id, "client secret mismatch");
            return Err(FlowFailure::new(OAuth2Error::invalid_client()));
        }

        // 6. Rate limit keyed by (client_id, "token")
        let policy = self.effective_policy(&credentials);
        let decision = self
            .rate_limiter
            .check(&client_operation_key(client_id, OP_TOKEN), &policy);
        if !decision.allowed {
            tracing::warn!(client_id, "token rate limit exceeded");
            return Err(FlowFailure::new(OAuth2Error::temporarily_unavailable())
                .with_credentials(credentials));
        }

        let result = if grant_type == "authorization_code" {
            self.authorization_code_grant(request, &credentials).await
        } else {
            self.refresh_token_grant(request, &credentials).await
        };

        match result {
            Ok(response) => Ok((response, credentials)),
            Err(failure) => Err(FlowFailure {
                error: failure.error,
                credentials: Some(credentials),
                cause: failure.cause,
            }),
        }
    }

    /// Exchange an authorization code for a token pair
    async fn authorization_code_grant(
        &self,
        request: &TokenRequest,
        credentials: &ApiCredentials,
    ) -> Result<TokenResponse, FlowFailure<OAuth2Error>> {
        let code_value = request.code.as_deref().unwrap_or_default();
        let redirect_uri = request.redirect_uri.as_deref().unwrap_or_default();

        let code = self
            .database
            .get_authorization_code(code_value)
            .await
            .map_err(internal_error)?
            .ok_or_else(|| {
                FlowFailure::new(OAuth2Error::invalid_grant("authorization code not found"))
            })?;

        if code.used {
            tracing::warn!(
                client_id = %credentials.client_id,
                code = %redact_token(&code.code),
                "replay of a consumed authorization code"
            );
            return Err(FlowFailure::new(OAuth2Error::invalid_grant(
                "authorization code already used",
            )));
        }

        // Anti-replay gate: flip used=true before any further validation so
        // a concurrent redemption of the same code observes it consumed.
        // The store performs the flip as a compare-and-set.
        if !self
            .database
            .consume_authorization_code(&code.code)
            .await
            .map_err(internal_error)?
        {
            return Err(FlowFailure::new(OAuth2Error::invalid_grant(
                "authorization code already used",
            )));
        }

        let now = Utc::now();
        if code.expires_at <= now {
            return Err(FlowFailure::new(OAuth2Error::invalid_grant(
                "authorization code expired",
            )));
        }
        if code.credential_id != credentials.id {
            return Err(FlowFailure::new(OAuth2Error::invalid_grant(
                "authorization code was issued to a different client",
            )));
        }
        if code.redirect_uri != redirect_uri {
            return Err(FlowFailure::new(OAuth2Error::invalid_grant(
                "redirect_uri does not match the authorization request",
            )));
        }

        // PKCE verification, when a challenge was recorded at issuance
        if let Some(challenge) = &code.code_challenge {
            let Some(verifier) = request.code_verifier.as_deref().filter(|s| !s.is_empty())
            else {
                return Err(FlowFailure::new(OAuth2Error::invalid_request(
                    "code_verifier is required",
                )));
            };
            let method = code
                .code_challenge_method
                .as_deref()
                .unwrap_or(pkce::METHOD_S256);
            if !pkce::verify_code_challenge(verifier, challenge, method) {
                tracing::warn!(
                    client_id = %credentials.client_id,
                    "PKCE verification failed"
                );
                return Err(FlowFailure::new(OAuth2Error::invalid_grant(
                    "code_verifier does not match code_challenge",
                )));
            }
        }

        self.mint_token_pair(
            code.user_id,
            credentials.id,
            &code.session_id,
            code.scopes,
            now,
        )
        .await
    }

    /// Rotate a refresh token into a fresh access + refresh pair
    async fn refresh_token_grant(
        &self,
        request: &TokenRequest,
        credentials: &ApiCredentials,
    ) -> Result<TokenResponse, FlowFailure<OAuth2Error>> {
        let token_value = request.refresh_token.as_deref().unwrap_or_default();

        let refresh = self
            .database
            .get_refresh_token(token_value)
            .await
            .map_err(internal_error)?
            .ok_or_else(|| {
                FlowFailure::new(OAuth2Error::invalid_grant("refresh token not found"))
            })?;

        if refresh.used {
            tracing::warn!(
                client_id = %credentials.client_id,
                token = %redact_token(&refresh.token),
                "replay of a consumed refresh token"
            );
            return Err(FlowFailure::new(OAuth2Error::invalid_grant(
                "refresh token already used",
            )));
        }

        let now = Utc::now();
        if refresh.expires_at <= now {
            return Err(FlowFailure::new(OAuth2Error::invalid_grant(
                "refresh token expired",
            )));
        }
        if refresh.credential_id != credentials.id {
            return Err(FlowFailure::new(OAuth2Error::invalid_grant(
                "refresh token was issued to a different client",
            )));
        }

        // Anti-replay gate, same compare-and-set contract as codes
        if !self
            .database
            .consume_refresh_token(&refresh.token)
            .await
            .map_err(internal_error)?
        {
            return Err(FlowFailure::new(OAuth2Error::invalid_grant(
                "refresh token already used",
            )));
        }

        // Revoke the paired access token in place; the record is kept
        self.database
            .revoke_access_token(&refresh.access_token)
            .await
            .map_err(internal_error)?;

        // Scopes come from the session; the fallback covers a swept session
        let granted_scopes = match self
            .database
            .get_oauth_session(&refresh.session_id)
            .await
            .map_err(internal_error)?
        {
            Some(session) if !session.scopes.is_empty() => session.scopes,
            _ => scopes::refresh_fallback(),
        };

        let response = self
            .mint_token_pair(
                refresh.user_id,
                credentials.id,
                &refresh.session_id,
                granted_scopes,
                now,
            )
            .await?;

        self.database
            .mark_refresh_token_replaced(&refresh.token, &response.refresh_token)
            .await
            .map_err(internal_error)?;

        tracing::info!(
            client_id = %credentials.client_id,
            user_id = %refresh.user_id,
            "refresh token rotated"
        );

        Ok(response)
    }

    /// Mint an access + refresh pair and update the session's snapshots
    async fn mint_token_pair(
        &self,
        user_id: Uuid,
        credential_id: Uuid,
        session_id: &str,
        granted_scopes: Vec<String>,
        now: chrono::DateTime<Utc>,
    ) -> Result<TokenResponse, FlowFailure<OAuth2Error>> {
        let access_value = generate_random_token(32).map_err(internal_error)?;
        let refresh_value = generate_random_token(32).map_err(internal_error)?;
        let access_expires_at =
            now + Duration::seconds(self.config.oauth2_server.access_token_ttl_secs);

        let access = AccessToken {
            token: access_value.clone(),
            user_id,
            credential_id,
            session_id: session_id.to_owned(),
            scopes: granted_scopes.clone(),
            token_type: "Bearer".to_owned(),
            expires_at: access_expires_at,
            created_at: now,
            is_revoked: false,
        };
        let refresh = RefreshToken {
            token: refresh_value.clone(),
            user_id,
            credential_id,
            session_id: session_id.to_owned(),
            access_token: access_value.clone(),
            expires_at: now + Duration::seconds(self.config.oauth2_server.refresh_token_ttl_secs),
            created_at: now,
            used: false,
            replaced_by: None,
        };

        self.database
            .store_access_token(&access)
            .await
            .map_err(internal_error)?;
        self.database
            .store_refresh_token(&refresh)
            .await
            .map_err(internal_error)?;
        self.database
            .update_session_tokens(session_id, &access_value, &refresh_value, access_expires_at)
            .await
            .map_err(internal_error)?;

        Ok(TokenResponse {
            access_token: access_value,
            token_type: "Bearer".to_owned(),
            expires_in: (access_expires_at - now).num_seconds(),
            refresh_token: refresh_value,
            scope: scopes::join(&granted_scopes),
        })
    }

    // ================================
    // userinfo
    // ================================

    /// Return scoped claims for a bearer access token (GET/POST /oauth/userinfo)
    ///
    /// # Errors
    /// `invalid_token` (401) for missing/revoked/expired tokens,
    /// `insufficient_scope` (403) when neither openid nor profile was
    /// granted, `temporarily_unavailable` on rate limiting.
    pub async fn userinfo(
        &self,
        access_token: &str,
        context: &RequestContext,
    ) -> Result<UserInfoResponse, OAuth2Error> {
        match self.userinfo_flow(access_token).await {
            Ok((response, credentials, user_id)) => {
                let policy = self.effective_policy(&credentials);
                self.rate_limiter.record(
                    &client_operation_key(&credentials.client_id, OP_USERINFO),
                    true,
                    &policy,
                );
                self.record_usage(credentials.id, OP_USERINFO, true, context)
                    .await;
                self.auditor
                    .log(
                        SecurityEvent::new(ACTION_USERINFO, true, context)
                            .with_credential_id(credentials.id)
                            .with_user_id(user_id),
                    )
                    .await;
                Ok(response)
            }
            Err(failure) => {
                let mut event = SecurityEvent::new(ACTION_USERINFO, false, context)
                    .with_error(&failure.error.error)
                    .with_metadata(serde_json::json!({ "cause": failure.cause }));
                if let Some(credentials) = failure.credentials {
                    let policy = self.effective_policy(&credentials);
                    self.rate_limiter.record(
                        &client_operation_key(&credentials.client_id, OP_USERINFO),
                        false,
                        &policy,
                    );
                    self.record_usage(credentials.id, OP_USERINFO, false, context)
                        .await;
                    event = event.with_credential_id(credentials.id);
                }
                self.auditor.log(event).await;
                Err(failure.error)
            }
        }
    }

    async fn userinfo_flow(
        &self,
        access_token: &str,
    ) -> Result<(UserInfoResponse, ApiCredentials, Uuid), FlowFailure<OAuth2Error>> {
        let token = self
            .database
            .get_access_token(access_token)
            .await
            .map_err(internal_error)?
            .ok_or_else(|| {
                FlowFailure::new(OAuth2Error::invalid_token("access token not found"))
            })?;

        if token.is_revoked {
            return Err(FlowFailure::new(OAuth2Error::invalid_token(
                "access token revoked",
            )));
        }
        if token.expires_at <= Utc::now() {
            return Err(FlowFailure::new(OAuth2Error::invalid_token(
                "access token expired",
            )));
        }

        // The endpoint serves identity claims; a token with neither openid
        // nor profile has no business here.
        if !scopes::has_scope(&token.scopes, "openid")
            && !scopes::has_scope(&token.scopes, "profile")
        {
            return Err(FlowFailure::new(OAuth2Error::insufficient_scope(
                "token lacks the openid or profile scope",
            )));
        }

        let credentials = match self.database.get_credentials(token.credential_id).await {
            Ok(Some(credentials)) if credentials.is_active => credentials,
            Ok(_) => {
                return Err(FlowFailure::new(OAuth2Error::invalid_token(
                    "issuing client is no longer active",
                )));
            }
            Err(e) => {
                return Err(
                    FlowFailure::new(OAuth2Error::server_error()).with_cause(e.to_string())
                );
            }
        };

        let policy = self.effective_policy(&credentials);
        let decision = self.rate_limiter.check(
            &client_operation_key(&credentials.client_id, OP_USERINFO),
            &policy,
        );
        if !decision.allowed {
            return Err(FlowFailure::new(OAuth2Error::temporarily_unavailable())
                .with_credentials(credentials));
        }

        let user = match self.database.get_user(token.user_id).await {
            Ok(Some(user)) if user.is_active => user,
            Ok(_) => {
                return Err(
                    FlowFailure::new(OAuth2Error::invalid_token("user not found"))
                        .with_credentials(credentials),
                );
            }
            Err(e) => {
                return Err(FlowFailure::new(OAuth2Error::server_error())
                    .with_credentials(credentials)
                    .with_cause(e.to_string()));
            }
        };

        let mut response = UserInfoResponse {
            sub: user.id.to_string(),
            ..UserInfoResponse::default()
        };
        if scopes::has_scope(&token.scopes, "profile") {
            response.name = user.display_name.clone();
            if let Some(name) = &user.display_name {
                let mut parts = name.splitn(2, ' ');
                response.given_name = parts.next().map(ToOwned::to_owned);
                response.family_name = parts.next().map(ToOwned::to_owned);
            }
            response.picture = user.photo_url.clone();
            // No real localization yet
            response.locale = Some("en-US".to_owned());
        }
        if scopes::has_scope(&token.scopes, "email") {
            response.email = Some(user.email.clone());
            response.email_verified = Some(user.email_verified);
        }

        Ok((response, credentials, user.id))
    }

    // ================================
    // validate
    // ================================

    /// Minimal token introspection (GET /oauth/validate?token=...)
    ///
    /// Every call appends a security log entry regardless of outcome. The
    /// route layer maps `active: false` to 401.
    pub async fn validate(&self, token_value: &str, context: &RequestContext) -> ValidateResponse {
        let now = Utc::now();
        let token = match self.database.get_access_token(token_value).await {
            Ok(token) => token,
            Err(e) => {
                tracing::error!("access token lookup failed during validate: {e:#}");
                None
            }
        };

        let response = match token {
            Some(token) if !token.is_revoked && token.expires_at > now => ValidateResponse {
                active: true,
                scope: Some(scopes::join(&token.scopes)),
                client_id: Some(token.credential_id.to_string()),
                user_id: Some(token.user_id.to_string()),
                expires_in: Some((token.expires_at - now).num_seconds()),
            },
            _ => ValidateResponse::inactive(),
        };

        self.auditor
            .log(
                SecurityEvent::new(ACTION_VALIDATE, response.active, context).with_metadata(
                    serde_json::json!({ "token": redact_token(token_value) }),
                ),
            )
            .await;

        response
    }

    // ================================
    // shared helpers
    // ================================

    /// Per-credential policy, honoring the global kill switch
    fn effective_policy(&self, credentials: &ApiCredentials) -> RateLimitPolicy {
        if self.config.rate_limit.enabled {
            credentials.rate_limit
        } else {
            RateLimitPolicy::disabled()
        }
    }

    /// Append a usage stat; successes also bump the credential's last-used
    async fn record_usage(
        &self,
        credential_id: Uuid,
        operation: &str,
        success: bool,
        context: &RequestContext,
    ) {
        let stat = UsageStat {
            credential_id,
            operation: operation.to_owned(),
            success,
            ip: Some(context.ip.clone()).filter(|ip| !ip.is_empty()),
            timestamp: Utc::now(),
        };
        if let Err(e) = self.database.record_usage_stat(&stat).await {
            tracing::error!("failed to record usage stat: {e:#}");
        }
        if success {
            if let Err(e) = self
                .database
                .touch_credentials(credential_id, stat.timestamp)
                .await
            {
                tracing::error!("failed to bump credential last-used: {e:#}");
            }
        }
    }
}

/// Map an unexpected storage failure to a protocol `server_error`
fn internal_error(e: anyhow::Error) -> FlowFailure<OAuth2Error> {
    tracing::error!("storage failure inside token flow: {e:#}");
    FlowFailure::new(OAuth2Error::server_error()).with_cause(e.to_string())
}

/// Map a storage failure to a generic `AppError` without leaking the cause
fn storage_error(e: anyhow::Error) -> AppError {
    tracing::error!("storage failure inside complete flow: {e:#}");
    AppError::database("storage operation failed")
}

/// Whether `candidate` matches one of the registered redirect URIs
///
/// A registered URI containing `*` is treated as a wildcard pattern:
/// literal segments are regex-escaped and each `*` matches any run of
/// characters. Everything else is an exact string match.
fn redirect_uri_matches(registered: &[String], candidate: &str) -> bool {
    registered.iter().any(|entry| {
        if entry.contains('*') {
            let pattern = format!("^{}$", regex::escape(entry).replace("\\*", ".*"));
            regex::Regex::new(&pattern).is_ok_and(|re| re.is_match(candidate))
        } else {
            entry == candidate
        }
    })
}

/// Append query pairs to a URL that may already carry a query string
fn append_query(base: &str, pairs: &[(&str, &str)]) -> String {
    let mut url = base.to_owned();
    let mut separator = if url.contains('?') { '&' } else { '?' };
    for (key, value) in pairs {
        url.push(separator);
        url.push_str(key);
        url.push('=');
        url.push_str(&urlencoding::encode(value));
        separator = '&';
    }
    url
}

/// Generate a compact URL-safe random token
///
/// # Errors
/// Fails only when the system RNG fails, which is unrecoverable.
fn generate_random_token(length: usize) -> anyhow::Result<String> {
    let rng = SystemRandom::new();
    let mut bytes = vec![0u8; length];
    rng.fill(&mut bytes).map_err(|e| {
        tracing::error!("system RNG failure while generating token material: {e}");
        anyhow::anyhow!("system RNG failure")
    })?;
    Ok(general_purpose::URL_SAFE_NO_PAD.encode(&bytes))
}

/// Generate a session identifier: 16 random bytes rendered as hex
///
/// # Errors
/// Fails only when the system RNG fails.
fn generate_session_id() -> anyhow::Result<String> {
    let rng = SystemRandom::new();
    let mut bytes = [0u8; 16];
    rng.fill(&mut bytes)
        .map_err(|_| anyhow::anyhow!("system RNG failure"))?;
    Ok(hex::encode(bytes))
}

/// Convenience for "missing or empty" option checks
trait OptionStrExt {
    fn is_none_or_empty(&self) -> bool;
}

impl OptionStrExt for Option<&str> {
    fn is_none_or_empty(&self) -> bool {
        self.map_or(true, str::is_empty)
    }
}
