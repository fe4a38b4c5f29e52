// ABOUTME: Security-facing modules for the Gatehouse auth server
// ABOUTME: Currently the audit side channel; key rotation would live here too
//
// Licensed under either of Apache License, Version 2.0 or MIT License at your option.
// Copyright ©2025 Gatehouse Labs

/// Security audit logging for protocol decision points
pub mod audit;
