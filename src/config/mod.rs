// ABOUTME: Configuration module for the Gatehouse auth server
// ABOUTME: Environment-only configuration; no config files are read at runtime
//
// Licensed under either of Apache License, Version 2.0 or MIT License at your option.
// Copyright ©2025 Gatehouse Labs

/// Environment-based server configuration
pub mod environment;
