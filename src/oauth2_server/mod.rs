// ABOUTME: OAuth 2.0 authorization server implementation (authorization code grant with PKCE)
// ABOUTME: Protocol engine, wire models, scope handling, PKCE verification, and HTTP routes
//
// Licensed under either of Apache License, Version 2.0 or MIT License at your option.
// Copyright ©2025 Gatehouse Labs

/// OAuth 2.0 protocol state machine (authorize, complete, token, userinfo, validate)
pub mod endpoints;
/// OAuth 2.0 request/response types and the protocol error shape
pub mod models;
/// PKCE challenge verification (RFC 7636)
pub mod pkce;
/// HTTP routes for the protocol endpoints
pub mod routes;
/// Recognized scope set and scope-string handling
pub mod scopes;

pub use endpoints::OAuth2AuthorizationServer;
pub use models::{
    AuthorizeRejection, AuthorizeRequest, AuthorizeSuccess, CompleteRequest, CompleteResponse,
    OAuth2Error, TokenRequest, TokenResponse, UserInfoResponse, ValidateResponse,
};
pub use routes::OAuth2Routes;
