// ABOUTME: Dashboard session refresh route (POST /auth/refresh)
// ABOUTME: Cookie-based rotation for the web dashboard; not an OAuth protocol endpoint
//
// Licensed under either of Apache License, Version 2.0 or MIT License at your option.
// Copyright ©2025 Gatehouse Labs

use crate::context::ServerResources;
use crate::errors::AppError;
use axum::{
    extract::State,
    http::HeaderMap,
    response::{IntoResponse, Response},
    routing::post,
    Json, Router,
};
use chrono::Utc;
use std::sync::Arc;

/// Dashboard session routes
pub struct DashboardRoutes;

impl DashboardRoutes {
    /// Create the dashboard session routes
    pub fn routes(resources: Arc<ServerResources>) -> Router {
        Router::new()
            .route("/auth/refresh", post(Self::handle_refresh))
            .with_state(resources)
    }

    /// Rotate the dashboard session cookie
    async fn handle_refresh(
        State(resources): State<Arc<ServerResources>>,
        headers: HeaderMap,
    ) -> Response {
        let cookie_name = resources.dashboard_sessions.cookie_name();
        let Some(cookie_value) = extract_cookie(&headers, cookie_name) else {
            return AppError::auth_invalid("missing dashboard session cookie").into_response();
        };

        match resources.dashboard_sessions.refresh(&cookie_value) {
            Ok((rotated, session)) => {
                let expires_in = (session.expires_at - Utc::now()).num_seconds();
                let set_cookie = format!(
                    "{cookie_name}={rotated}; HttpOnly; Secure; Path=/; SameSite=Lax; Max-Age={expires_in}"
                );
                tracing::debug!(user_id = %session.user_id, "dashboard session rotated");
                (
                    [("Set-Cookie", set_cookie)],
                    Json(serde_json::json!({
                        "expires_in": expires_in,
                        "generation": session.generation,
                    })),
                )
                    .into_response()
            }
            Err(error) => error.into_response(),
        }
    }
}

/// Pull a named cookie out of the Cookie header
fn extract_cookie(headers: &HeaderMap, name: &str) -> Option<String> {
    let header = headers.get("cookie")?.to_str().ok()?;
    for cookie in header.split(';') {
        let cookie = cookie.trim();
        if let Some(value) = cookie.strip_prefix(name) {
            if let Some(value) = value.strip_prefix('=') {
                return Some(value.to_owned());
            }
        }
    }
    None
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]
    use super::*;

    #[test]
    fn extract_cookie_finds_named_cookie() {
        let mut headers = HeaderMap::new();
        headers.insert(
            "cookie",
            "other=1; gatehouse_session=abc123; theme=dark".parse().unwrap(),
        );
        assert_eq!(
            extract_cookie(&headers, "gatehouse_session").as_deref(),
            Some("abc123")
        );
        assert!(extract_cookie(&headers, "missing").is_none());
    }
}
