// ABOUTME: Security audit logging for OAuth protocol decision points
// ABOUTME: Appends a security log entry on every success and failure, for compliance and investigation
//
// Licensed under either of Apache License, Version 2.0 or MIT License at your option.
// Copyright ©2025 Gatehouse Labs

use crate::database_plugins::{factory::Database, DatabaseProvider};
use crate::models::SecurityLogEntry;
use chrono::Utc;
use std::sync::Arc;
use uuid::Uuid;

/// Context of the HTTP request behind a protocol decision
#[derive(Debug, Clone, Default)]
pub struct RequestContext {
    /// Requesting IP, best-effort
    pub ip: String,
    /// Requesting user agent
    pub user_agent: Option<String>,
}

impl RequestContext {
    /// Build a context from raw header values
    #[must_use]
    pub fn new(ip: String, user_agent: Option<String>) -> Self {
        Self { ip, user_agent }
    }
}

/// Builder for one security log entry
#[derive(Debug)]
pub struct SecurityEvent {
    entry: SecurityLogEntry,
}

impl SecurityEvent {
    /// Start an event for the given action and outcome
    #[must_use]
    pub fn new(action: &str, success: bool, context: &RequestContext) -> Self {
        Self {
            entry: SecurityLogEntry {
                id: Uuid::new_v4(),
                action: action.to_owned(),
                success,
                ip: context.ip.clone(),
                user_agent: context.user_agent.clone(),
                user_id: None,
                credential_id: None,
                error: None,
                metadata: serde_json::Value::Null,
                timestamp: Utc::now(),
            },
        }
    }

    /// Attach the user involved
    #[must_use]
    pub const fn with_user_id(mut self, user_id: Uuid) -> Self {
        self.entry.user_id = Some(user_id);
        self
    }

    /// Attach the credential involved
    #[must_use]
    pub const fn with_credential_id(mut self, credential_id: Uuid) -> Self {
        self.entry.credential_id = Some(credential_id);
        self
    }

    /// Attach the error string for failures
    #[must_use]
    pub fn with_error(mut self, error: impl Into<String>) -> Self {
        self.entry.error = Some(error.into());
        self
    }

    /// Attach structured metadata
    #[must_use]
    pub fn with_metadata(mut self, metadata: serde_json::Value) -> Self {
        self.entry.metadata = metadata;
        self
    }
}

/// Audit logger for protocol decision points
///
/// Every entry goes to the structured logger for immediate visibility and
/// to the security_logs collection for retention. Audit failures are
/// logged and swallowed: the protocol outcome never depends on the audit
/// write.
pub struct SecurityAuditor {
    database: Arc<Database>,
}

impl SecurityAuditor {
    /// Create a new auditor over the shared store
    #[must_use]
    pub const fn new(database: Arc<Database>) -> Self {
        Self { database }
    }

    /// Append an event to the security log
    pub async fn log(&self, event: SecurityEvent) {
        let entry = event.entry;

        if entry.success {
            tracing::info!(
                action = %entry.action,
                user_id = ?entry.user_id,
                credential_id = ?entry.credential_id,
                ip = %entry.ip,
                "security event"
            );
        } else {
            tracing::warn!(
                action = %entry.action,
                user_id = ?entry.user_id,
                credential_id = ?entry.credential_id,
                ip = %entry.ip,
                error = ?entry.error,
                "security event failed"
            );
        }

        if let Err(e) = self.database.store_security_log(&entry).await {
            tracing::error!("failed to persist security log entry: {e:#}");
        }
    }
}
