// ABOUTME: Shared helpers for integration tests: resources, client registration, code provisioning
// ABOUTME: Every test file builds its own in-memory deployment through these helpers
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 Gatehouse Labs

#![allow(dead_code)]
#![allow(clippy::unwrap_used, clippy::expect_used)]

use chrono::Utc;
use gatehouse_auth_server::{
    config::environment::{DashboardConfig, OAuth2ServerConfig, RateLimitConfig, ServerConfig},
    context::ServerResources,
    database_plugins::{factory::Database, DatabaseProvider},
    models::ApiCredentials,
    oauth2_server::models::{AuthorizeRequest, CompleteRequest, TokenRequest},
    rate_limiting::{Clock, RateLimitPolicy},
    security::audit::RequestContext,
};
use std::sync::Arc;
use uuid::Uuid;

/// Server configuration for tests: deterministic cookie key, generous limits
pub fn test_config() -> ServerConfig {
    ServerConfig {
        http_port: 0,
        bind_address: "127.0.0.1".into(),
        oauth2_server: OAuth2ServerConfig::default(),
        rate_limit: RateLimitConfig::default(),
        dashboard: DashboardConfig {
            cookie_key: [42u8; 32],
            cookie_name: "gatehouse_session".into(),
            session_ttl_secs: 3_600,
        },
    }
}

/// Fresh in-memory deployment
pub fn test_resources() -> Arc<ServerResources> {
    Arc::new(ServerResources::new(
        Database::new("memory://").unwrap(),
        test_config(),
    ))
}

/// Fresh deployment over an injected clock (rate-limit tests)
pub fn test_resources_with_clock(clock: Arc<dyn Clock>) -> Arc<ServerResources> {
    Arc::new(ServerResources::with_clock(
        Database::new("memory://").unwrap(),
        test_config(),
        clock,
    ))
}

/// Request context standing in for the HTTP layer
pub fn ctx() -> RequestContext {
    RequestContext::new("198.51.100.7".into(), Some("gatehouse-tests".into()))
}

/// Register a client with the given redirect URIs and scopes
pub async fn register_client(
    resources: &ServerResources,
    redirect_uris: &[&str],
    scopes: &[&str],
) -> ApiCredentials {
    register_client_with_policy(
        resources,
        redirect_uris,
        scopes,
        RateLimitPolicy::new(1_000, 60_000),
    )
    .await
}

/// Register a client with an explicit rate-limit policy
pub async fn register_client_with_policy(
    resources: &ServerResources,
    redirect_uris: &[&str],
    scopes: &[&str],
    rate_limit: RateLimitPolicy,
) -> ApiCredentials {
    let suffix = Uuid::new_v4().simple().to_string();
    let credentials = ApiCredentials {
        id: Uuid::new_v4(),
        user_id: Uuid::new_v4(),
        client_id: format!("client_{suffix}"),
        client_secret: format!("secret_{suffix}"),
        api_key: format!("key_{suffix}"),
        name: "Test App".into(),
        description: None,
        redirect_uris: redirect_uris.iter().map(|s| (*s).to_owned()).collect(),
        allowed_origins: vec![],
        scopes: scopes.iter().map(|s| (*s).to_owned()).collect(),
        is_active: true,
        rate_limit,
        created_at: Utc::now(),
        last_used_at: None,
    };
    resources
        .database
        .create_credentials(&credentials)
        .await
        .unwrap();
    credentials
}

/// A plain authorize request for the given client
pub fn authorize_request(
    client: &ApiCredentials,
    redirect_uri: &str,
    scope: &str,
    state: &str,
) -> AuthorizeRequest {
    AuthorizeRequest {
        response_type: Some("code".into()),
        client_id: Some(client.client_id.clone()),
        redirect_uri: Some(redirect_uri.to_owned()),
        scope: Some(scope.to_owned()),
        state: Some(state.to_owned()),
        code_challenge: None,
        code_challenge_method: None,
    }
}

/// The collaborator callback body for a freshly signed-in user
pub fn complete_request(session_id: &str, user_id: Uuid) -> CompleteRequest {
    CompleteRequest {
        session_id: Some(session_id.to_owned()),
        user_id: Some(user_id),
        user_email: Some(format!("{}@example.com", user_id.simple())),
        user_display_name: Some("Alex Rivera".into()),
        user_photo_url: Some("https://cdn.example/alex.png".into()),
        provider: Some("google.com".into()),
    }
}

/// Run authorize + complete, returning (code, session_id, user_id)
pub async fn obtain_code(
    resources: &ServerResources,
    client: &ApiCredentials,
    redirect_uri: &str,
    scope: &str,
) -> (String, String, Uuid) {
    let success = resources
        .oauth2_server
        .authorize(authorize_request(client, redirect_uri, scope, "xyz"), &ctx())
        .await
        .expect("authorize should succeed");

    let user_id = Uuid::new_v4();
    let completed = resources
        .oauth2_server
        .complete(complete_request(&success.session_id, user_id), &ctx())
        .await
        .expect("complete should succeed");

    (completed.code, success.session_id, user_id)
}

/// A code-exchange token request with the client's real secret
pub fn code_exchange(client: &ApiCredentials, code: &str, redirect_uri: &str) -> TokenRequest {
    TokenRequest {
        grant_type: Some("authorization_code".into()),
        code: Some(code.to_owned()),
        redirect_uri: Some(redirect_uri.to_owned()),
        client_id: Some(client.client_id.clone()),
        client_secret: Some(client.client_secret.clone()),
        refresh_token: None,
        code_verifier: None,
    }
}

/// A refresh-grant token request with the client's real secret
pub fn refresh_exchange(client: &ApiCredentials, refresh_token: &str) -> TokenRequest {
    TokenRequest {
        grant_type: Some("refresh_token".into()),
        code: None,
        redirect_uri: None,
        client_id: Some(client.client_id.clone()),
        client_secret: Some(client.client_secret.clone()),
        refresh_token: Some(refresh_token.to_owned()),
        code_verifier: None,
    }
}
