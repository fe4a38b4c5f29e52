// ABOUTME: Router-level tests driving the axum surface with tower oneshot requests
// ABOUTME: Covers content negotiation, form and JSON token bodies, CORS preflight, and cookie refresh
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 Gatehouse Labs

#![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
#![allow(missing_docs)]

mod common;

use axum::body::Body;
use axum::Router;
use gatehouse_auth_server::{
    dashboard::DashboardRoutes, health::HealthRoutes, oauth2_server::OAuth2Routes,
};
use http::{header, Method, Request, StatusCode};
use tower::ServiceExt;

fn router(resources: &std::sync::Arc<gatehouse_auth_server::context::ServerResources>) -> Router {
    OAuth2Routes::routes(resources.clone())
        .merge(DashboardRoutes::routes(resources.clone()))
        .merge(HealthRoutes::routes())
}

async fn body_json(response: axum::response::Response) -> serde_json::Value {
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

#[tokio::test]
async fn authorize_negotiates_json_or_redirect() {
    let resources = common::test_resources();
    let client = common::register_client(
        &resources,
        &["https://app.example/cb"],
        &["profile", "email"],
    )
    .await;
    let app = router(&resources);

    let uri = format!(
        "/authorize?response_type=code&client_id={}&redirect_uri=https%3A%2F%2Fapp.example%2Fcb&scope=profile%20email&state=xyz",
        client.client_id
    );

    // machine caller: JSON body with both URLs
    let response = app
        .clone()
        .oneshot(
            Request::builder()
                .method(Method::GET)
                .uri(uri.as_str())
                .header(header::ACCEPT, "application/json")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let json = body_json(response).await;
    assert!(json["authorization_url"].as_str().unwrap().contains("session="));
    let session_url = json["session_url"].as_str().unwrap();
    assert!(session_url.starts_with("https://auth.gatehouse.dev/"));
    assert_eq!(json["expires_in"], 600);

    // browser caller: 302 to the human-facing page
    let response = app
        .oneshot(
            Request::builder()
                .method(Method::GET)
                .uri(uri.as_str())
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::FOUND);
    let location = response
        .headers()
        .get(header::LOCATION)
        .unwrap()
        .to_str()
        .unwrap();
    assert!(location.starts_with("https://auth.gatehouse.dev/login?session="));
}

#[tokio::test]
async fn authorize_failure_is_a_json_error_body() {
    let resources = common::test_resources();
    let app = router(&resources);

    let response = app
        .oneshot(
            Request::builder()
                .method(Method::GET)
                .uri("/authorize?response_type=code&redirect_uri=https%3A%2F%2Fapp.example%2Fcb&scope=profile")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let json = body_json(response).await;
    assert_eq!(json["error"], "invalid_request");
}

#[tokio::test]
async fn full_flow_over_http() {
    let resources = common::test_resources();
    let client = common::register_client(
        &resources,
        &["https://app.example/cb"],
        &["profile", "email"],
    )
    .await;
    let app = router(&resources);

    // authorize
    let uri = format!(
        "/authorize?response_type=code&client_id={}&redirect_uri=https%3A%2F%2Fapp.example%2Fcb&scope=profile%20email&state=xyz",
        client.client_id
    );
    let response = app
        .clone()
        .oneshot(
            Request::builder()
                .uri(uri.as_str())
                .header(header::ACCEPT, "application/json")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    let session_id = body_json(response).await["session_id"]
        .as_str()
        .unwrap()
        .to_owned();

    // complete (collaborator callback, camelCase JSON)
    let user_id = uuid::Uuid::new_v4();
    let complete_body = serde_json::json!({
        "sessionId": session_id,
        "userId": user_id,
        "userEmail": format!("{}@example.com", user_id.simple()),
        "userDisplayName": "Alex Rivera",
        "provider": "google.com",
    });
    let response = app
        .clone()
        .oneshot(
            Request::builder()
                .method(Method::POST)
                .uri("/auth/complete")
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(complete_body.to_string()))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let completed = body_json(response).await;
    let code = completed["code"].as_str().unwrap().to_owned();
    let redirect_url = completed["redirect_url"].as_str().unwrap();
    assert!(redirect_url.starts_with("https://app.example/cb?code="));
    assert!(redirect_url.contains("state=xyz"));

    // token (form-encoded)
    let form = format!(
        "grant_type=authorization_code&code={}&redirect_uri=https%3A%2F%2Fapp.example%2Fcb&client_id={}&client_secret={}",
        code, client.client_id, client.client_secret
    );
    let response = app
        .clone()
        .oneshot(
            Request::builder()
                .method(Method::POST)
                .uri("/oauth/token")
                .header(header::CONTENT_TYPE, "application/x-www-form-urlencoded")
                .body(Body::from(form))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let tokens = body_json(response).await;
    assert_eq!(tokens["token_type"], "Bearer");
    assert_eq!(tokens["scope"], "profile email");
    assert!(tokens["expires_in"].as_i64().unwrap() >= 3_599);
    let access_token = tokens["access_token"].as_str().unwrap().to_owned();

    // userinfo
    let response = app
        .clone()
        .oneshot(
            Request::builder()
                .uri("/oauth/userinfo")
                .header(header::AUTHORIZATION, format!("Bearer {access_token}"))
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        response
            .headers()
            .get(header::CACHE_CONTROL)
            .unwrap()
            .to_str()
            .unwrap(),
        "private, max-age=300"
    );
    let claims = body_json(response).await;
    assert_eq!(claims["sub"], user_id.to_string());
    assert_eq!(claims["name"], "Alex Rivera");

    // validate
    let response = app
        .oneshot(
            Request::builder()
                .uri(format!("/oauth/validate?token={access_token}"))
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let validation = body_json(response).await;
    assert_eq!(validation["active"], true);
    assert_eq!(validation["scope"], "profile email");
}

#[tokio::test]
async fn token_endpoint_accepts_json_bodies() {
    let resources = common::test_resources();
    let client =
        common::register_client(&resources, &["https://app.example/cb"], &["profile"]).await;
    let (code, ..) =
        common::obtain_code(&resources, &client, "https://app.example/cb", "profile").await;
    let app = router(&resources);

    let body = serde_json::json!({
        "grant_type": "authorization_code",
        "code": code,
        "redirect_uri": "https://app.example/cb",
        "client_id": client.client_id,
        "client_secret": client.client_secret,
    });
    let response = app
        .oneshot(
            Request::builder()
                .method(Method::POST)
                .uri("/oauth/token")
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(body.to_string()))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn wrong_secret_answers_401_over_http() {
    let resources = common::test_resources();
    let client =
        common::register_client(&resources, &["https://app.example/cb"], &["profile"]).await;
    let (code, ..) =
        common::obtain_code(&resources, &client, "https://app.example/cb", "profile").await;
    let app = router(&resources);

    let form = format!(
        "grant_type=authorization_code&code={}&redirect_uri=https%3A%2F%2Fapp.example%2Fcb&client_id={}&client_secret=wrong",
        code, client.client_id
    );
    let response = app
        .oneshot(
            Request::builder()
                .method(Method::POST)
                .uri("/oauth/token")
                .header(header::CONTENT_TYPE, "application/x-www-form-urlencoded")
                .body(Body::from(form))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    let json = body_json(response).await;
    assert_eq!(json["error"], "invalid_client");
}

#[tokio::test]
async fn userinfo_without_bearer_is_401_with_challenge() {
    let resources = common::test_resources();
    let app = router(&resources);

    let response = app
        .oneshot(
            Request::builder()
                .uri("/oauth/userinfo")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    assert!(response.headers().contains_key(header::WWW_AUTHENTICATE));
}

#[tokio::test]
async fn validate_without_token_is_401_inactive() {
    let resources = common::test_resources();
    let app = router(&resources);

    let response = app
        .oneshot(
            Request::builder()
                .uri("/oauth/validate")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    let json = body_json(response).await;
    assert_eq!(json["active"], false);
}

#[tokio::test]
async fn options_preflight_carries_permissive_cors() {
    let resources = common::test_resources();
    let app = router(&resources);

    let response = app
        .oneshot(
            Request::builder()
                .method(Method::OPTIONS)
                .uri("/oauth/token")
                .header(header::ORIGIN, "https://app.example")
                .header(header::ACCESS_CONTROL_REQUEST_METHOD, "POST")
                .header(header::ACCESS_CONTROL_REQUEST_HEADERS, "content-type")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        response
            .headers()
            .get(header::ACCESS_CONTROL_ALLOW_ORIGIN)
            .unwrap()
            .to_str()
            .unwrap(),
        "*"
    );
}

#[tokio::test]
async fn dashboard_refresh_rotates_the_cookie() {
    let resources = common::test_resources();
    let app = router(&resources);

    // no cookie: 401
    let response = app
        .clone()
        .oneshot(
            Request::builder()
                .method(Method::POST)
                .uri("/auth/refresh")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

    // issued cookie rotates
    let cookie = resources
        .dashboard_sessions
        .issue(uuid::Uuid::new_v4())
        .unwrap();
    let response = app
        .oneshot(
            Request::builder()
                .method(Method::POST)
                .uri("/auth/refresh")
                .header(header::COOKIE, format!("gatehouse_session={cookie}"))
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let set_cookie = response
        .headers()
        .get(header::SET_COOKIE)
        .unwrap()
        .to_str()
        .unwrap()
        .to_owned();
    assert!(set_cookie.starts_with("gatehouse_session="));
    assert!(!set_cookie.contains(&cookie));
    let json = body_json(response).await;
    assert_eq!(json["generation"], 1);
}

#[tokio::test]
async fn health_endpoints_answer() {
    let resources = common::test_resources();
    let app = router(&resources);

    let response = app
        .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let json = body_json(response).await;
    assert_eq!(json["status"], "healthy");
}
