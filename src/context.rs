// ABOUTME: Centralized resource container for dependency injection across route handlers
// ABOUTME: Builds the storage, rate limiter, auditor, protocol engine, and dashboard session manager once
//
// Licensed under either of Apache License, Version 2.0 or MIT License at your option.
// Copyright ©2025 Gatehouse Labs

use crate::config::environment::ServerConfig;
use crate::dashboard::session::DashboardSessionManager;
use crate::database_plugins::factory::Database;
use crate::oauth2_server::OAuth2AuthorizationServer;
use crate::rate_limiting::{Clock, FixedWindowLimiter, SystemClock};
use crate::security::audit::SecurityAuditor;
use std::sync::Arc;

/// Centralized resource container for dependency injection
///
/// Holds every shared server resource so handlers never rebuild expensive
/// objects per request.
#[derive(Clone)]
pub struct ServerResources {
    /// Shared storage backend
    pub database: Arc<Database>,
    /// Fixed-window rate limiter
    pub rate_limiter: Arc<FixedWindowLimiter>,
    /// Security-log side channel
    pub auditor: Arc<SecurityAuditor>,
    /// Server configuration
    pub config: Arc<ServerConfig>,
    /// OAuth 2.0 protocol engine
    pub oauth2_server: Arc<OAuth2AuthorizationServer>,
    /// Dashboard cookie-session subsystem (distinct from the OAuth core)
    pub dashboard_sessions: Arc<DashboardSessionManager>,
}

impl ServerResources {
    /// Create resources over the system clock
    #[must_use]
    pub fn new(database: Database, config: ServerConfig) -> Self {
        Self::with_clock(database, config, Arc::new(SystemClock))
    }

    /// Create resources with an injected clock (deterministic tests)
    #[must_use]
    pub fn with_clock(database: Database, config: ServerConfig, clock: Arc<dyn Clock>) -> Self {
        let database = Arc::new(database);
        let config = Arc::new(config);
        let rate_limiter = Arc::new(FixedWindowLimiter::new(clock));
        let auditor = Arc::new(SecurityAuditor::new(database.clone()));
        let oauth2_server = Arc::new(OAuth2AuthorizationServer::new(
            database.clone(),
            rate_limiter.clone(),
            auditor.clone(),
            config.clone(),
        ));
        let dashboard_sessions = Arc::new(DashboardSessionManager::new(&config.dashboard));

        Self {
            database,
            rate_limiter,
            auditor,
            config,
            oauth2_server,
            dashboard_sessions,
        }
    }
}
