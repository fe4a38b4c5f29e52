// ABOUTME: Main library entry point for the Gatehouse OAuth 2.0 authorization server
// ABOUTME: Issues authorization codes, access tokens, and rotated refresh tokens to client applications
//
// Licensed under either of Apache License, Version 2.0 or MIT License at your option.
// Copyright ©2025 Gatehouse Labs

#![deny(unsafe_code)]

//! # Gatehouse Auth Server
//!
//! A hosted OAuth 2.0 authorization server implementing the Authorization
//! Code grant with optional PKCE. Third-party client applications send end
//! users through `authorize`, an external identity collaborator confirms the
//! sign-in through `complete`, and the client's backend exchanges the
//! resulting one-time code at `token` for a short-lived access token plus a
//! single-use, rotated refresh token.
//!
//! ## Protocol surface
//!
//! - `GET/POST /authorize` - validate the client and open a pending session
//! - `POST /auth/complete` - collaborator callback that mints the code
//! - `POST /oauth/token` - code exchange and refresh rotation
//! - `GET/POST /oauth/userinfo` - scoped claims for a bearer token
//! - `GET /oauth/validate` - minimal token introspection
//! - `POST /auth/refresh` - dashboard cookie rotation (separate subsystem)
//!
//! ## Architecture
//!
//! The protocol engine ([`oauth2_server`]) is stateless per request; all
//! durable state lives behind the [`database_plugins`] abstraction. The
//! safety-critical transitions (code redemption, refresh rotation, session
//! authorization) are atomic conditional updates in the storage layer.
//!
//! ## Example
//!
//! ```rust,no_run
//! use gatehouse_auth_server::config::environment::ServerConfig;
//! use gatehouse_auth_server::errors::AppResult;
//!
//! fn main() -> AppResult<()> {
//!     let config = ServerConfig::from_env()?;
//!     println!("Gatehouse configured for port {}", config.http_port);
//!     Ok(())
//! }
//! ```

/// Environment-based configuration
pub mod config;

/// Centralized dependency-injection container
pub mod context;

/// Web dashboard session subsystem (cookie rotation)
pub mod dashboard;

/// Storage abstraction layer with plugin support
pub mod database_plugins;

/// Unified error handling with standard error codes and HTTP responses
pub mod errors;

/// Health checks and monitoring
pub mod health;

/// Structured logging setup
pub mod logging;

/// Core domain records
pub mod models;

/// OAuth 2.0 authorization server implementation
pub mod oauth2_server;

/// Fixed-window rate limiting service
pub mod rate_limiting;

/// Security audit logging
pub mod security;
