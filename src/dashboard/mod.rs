// ABOUTME: Web dashboard session subsystem, architecturally separate from the OAuth core
// ABOUTME: Reuses the token-rotation pattern for cookie-based dashboard logins, nothing more
//
// Licensed under either of Apache License, Version 2.0 or MIT License at your option.
// Copyright ©2025 Gatehouse Labs

/// HTTP route for dashboard session refresh
pub mod routes;
/// Encrypted-cookie session manager
pub mod session;

pub use routes::DashboardRoutes;
pub use session::DashboardSessionManager;
