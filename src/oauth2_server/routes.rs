// ABOUTME: HTTP route handlers for the OAuth 2.0 protocol endpoints
// ABOUTME: Maps engine outcomes onto wire statuses, CORS, cache directives, and WWW-Authenticate headers
//
// Licensed under either of Apache License, Version 2.0 or MIT License at your option.
// Copyright ©2025 Gatehouse Labs

use super::models::{AuthorizeRejection, AuthorizeRequest, CompleteRequest, OAuth2Error};
use crate::context::ServerResources;
use crate::security::audit::RequestContext;
use axum::{
    extract::{Query, State},
    http::{header, HeaderMap, Method, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Form, Json, Router,
};
use std::collections::HashMap;
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};

/// OAuth 2.0 protocol routes
pub struct OAuth2Routes;

impl OAuth2Routes {
    /// Create all protocol routes
    ///
    /// The permissive CORS layer also answers OPTIONS preflights on every
    /// protocol endpoint.
    pub fn routes(resources: Arc<ServerResources>) -> Router {
        let cors = CorsLayer::new()
            .allow_origin(Any)
            .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
            .allow_headers([header::CONTENT_TYPE, header::AUTHORIZATION]);

        Router::new()
            .route(
                "/authorize",
                get(Self::handle_authorize_get).post(Self::handle_authorize_post),
            )
            .route("/auth/complete", post(Self::handle_complete))
            .route("/oauth/token", post(Self::handle_token))
            .route(
                "/oauth/userinfo",
                get(Self::handle_userinfo).post(Self::handle_userinfo),
            )
            .route("/oauth/validate", get(Self::handle_validate))
            .layer(cors)
            .with_state(resources)
    }

    /// GET /authorize with query parameters
    async fn handle_authorize_get(
        State(resources): State<Arc<ServerResources>>,
        headers: HeaderMap,
        Query(params): Query<HashMap<String, String>>,
    ) -> Response {
        Self::run_authorize(&resources, &headers, params).await
    }

    /// POST /authorize with form parameters (query parameters merge in)
    async fn handle_authorize_post(
        State(resources): State<Arc<ServerResources>>,
        headers: HeaderMap,
        Query(query): Query<HashMap<String, String>>,
        Form(form): Form<HashMap<String, String>>,
    ) -> Response {
        let mut params = query;
        params.extend(form);
        Self::run_authorize(&resources, &headers, params).await
    }

    async fn run_authorize(
        resources: &Arc<ServerResources>,
        headers: &HeaderMap,
        params: HashMap<String, String>,
    ) -> Response {
        let context = request_context(headers);
        let request = AuthorizeRequest::from_params(&params);

        match resources.oauth2_server.authorize(request, &context).await {
            Ok(success) => {
                if wants_json(headers) {
                    (StatusCode::OK, Json(success)).into_response()
                } else {
                    redirect_to(&success.authorization_url)
                }
            }
            Err(AuthorizeRejection::Body(error)) => oauth_error_response(&error),
            Err(rejection @ AuthorizeRejection::Redirect { .. }) => rejection
                .redirect_url()
                .map_or_else(
                    || oauth_error_response(&OAuth2Error::server_error()),
                    |url| redirect_to(&url),
                ),
        }
    }

    /// POST /auth/complete: collaborator callback after end-user login
    async fn handle_complete(
        State(resources): State<Arc<ServerResources>>,
        headers: HeaderMap,
        Json(request): Json<CompleteRequest>,
    ) -> Response {
        let context = request_context(&headers);
        match resources.oauth2_server.complete(request, &context).await {
            Ok(response) => (StatusCode::OK, Json(response)).into_response(),
            Err(error) => error.into_response(),
        }
    }

    /// POST /oauth/token: form-encoded or JSON body
    async fn handle_token(
        State(resources): State<Arc<ServerResources>>,
        headers: HeaderMap,
        body: String,
    ) -> Response {
        let context = request_context(&headers);

        let is_json = headers
            .get(header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .is_some_and(|ct| ct.starts_with("application/json"));

        let parsed = if is_json {
            serde_json::from_str::<super::models::TokenRequest>(&body)
                .map_err(|e| e.to_string())
        } else {
            serde_urlencoded::from_str::<super::models::TokenRequest>(&body)
                .map_err(|e| e.to_string())
        };

        let request = match parsed {
            Ok(request) => request,
            Err(e) => {
                tracing::warn!("malformed token request body: {e}");
                return oauth_error_response(&OAuth2Error::invalid_request(
                    "malformed request body",
                ));
            }
        };

        match resources.oauth2_server.token(request, &context).await {
            Ok(response) => (
                StatusCode::OK,
                [(header::CACHE_CONTROL, "no-store")],
                Json(response),
            )
                .into_response(),
            Err(error) => oauth_error_response(&error),
        }
    }

    /// GET/POST /oauth/userinfo with a Bearer access token
    async fn handle_userinfo(
        State(resources): State<Arc<ServerResources>>,
        headers: HeaderMap,
    ) -> Response {
        let context = request_context(&headers);

        let bearer = headers
            .get(header::AUTHORIZATION)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.strip_prefix("Bearer "))
            .filter(|token| !token.is_empty());

        let Some(access_token) = bearer else {
            return (
                StatusCode::UNAUTHORIZED,
                [(header::WWW_AUTHENTICATE, "Bearer")],
                Json(OAuth2Error::invalid_request(
                    "Authorization header must carry a Bearer token",
                )),
            )
                .into_response();
        };

        match resources.oauth2_server.userinfo(access_token, &context).await {
            Ok(response) => (
                StatusCode::OK,
                // userinfo is read-heavy and changes rarely
                [(header::CACHE_CONTROL, "private, max-age=300")],
                Json(response),
            )
                .into_response(),
            Err(error) => userinfo_error_response(&error),
        }
    }

    /// GET /oauth/validate?token=...
    async fn handle_validate(
        State(resources): State<Arc<ServerResources>>,
        headers: HeaderMap,
        Query(params): Query<HashMap<String, String>>,
    ) -> Response {
        let context = request_context(&headers);
        let token = params.get("token").map(String::as_str).unwrap_or_default();

        let response = resources.oauth2_server.validate(token, &context).await;
        let status = if response.active {
            StatusCode::OK
        } else {
            StatusCode::UNAUTHORIZED
        };
        (status, Json(response)).into_response()
    }
}

/// Build the audit request context from the HTTP headers
fn request_context(headers: &HeaderMap) -> RequestContext {
    let ip = headers
        .get("x-forwarded-for")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.split(',').next())
        .map_or_else(|| "unknown".to_owned(), |v| v.trim().to_owned());
    let user_agent = headers
        .get(header::USER_AGENT)
        .and_then(|v| v.to_str().ok())
        .map(ToOwned::to_owned);
    RequestContext::new(ip, user_agent)
}

/// Whether the caller asked for a machine response
fn wants_json(headers: &HeaderMap) -> bool {
    headers
        .get(header::ACCEPT)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|accept| accept.contains("application/json"))
}

/// 302 to the given location
fn redirect_to(url: &str) -> Response {
    (StatusCode::FOUND, [(header::LOCATION, url.to_owned())]).into_response()
}

/// Protocol error with its status from the fixed table
fn oauth_error_response(error: &OAuth2Error) -> Response {
    let status =
        StatusCode::from_u16(error.http_status()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    (status, Json(error.clone())).into_response()
}

/// userinfo-specific status and WWW-Authenticate mapping
///
/// Rate limiting answers 429 here while token/authorize answer 503 for the
/// same error code; the deviation is deliberate and recorded in DESIGN.md
/// rather than silently unified.
fn userinfo_error_response(error: &OAuth2Error) -> Response {
    let status = if error.error == "temporarily_unavailable" {
        StatusCode::TOO_MANY_REQUESTS
    } else {
        StatusCode::from_u16(error.http_status()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR)
    };

    match error.error.as_str() {
        "invalid_token" | "insufficient_scope" => {
            let challenge = format!("Bearer error=\"{}\"", error.error);
            (
                status,
                [(header::WWW_AUTHENTICATE, challenge)],
                Json(error.clone()),
            )
                .into_response()
        }
        _ => (status, Json(error.clone())).into_response(),
    }
}
