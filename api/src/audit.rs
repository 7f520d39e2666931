//! Audit trail.
//!
//! Audit events are emitted on the `audit` tracing target so they can be routed
//! to a separate sink with a filter such as `RUST_LOG=info,audit=info`.

use crate::auth::TenantContext;
use chrono::Utc;
use serde::Serialize;

/// Outcome of an audited action.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AuditStatus {
    /// The action completed.
    Success,
    /// The action was attempted and failed.
    Failure,
}

impl AuditStatus {
    fn as_str(self) -> &'static str {
        match self {
            Self::Success => "SUCCESS",
            Self::Failure => "FAILURE",
        }
    }
}

/// A single audited action.
#[derive(Debug, Clone, Serialize)]
pub struct AuditEvent {
    /// RFC 3339 time of the event.
    pub timestamp: String,
    /// Tenant that performed the action.
    pub actor: String,
    /// Role the actor used.
    pub role: String,
    /// Action name, e.g. `QUERY_EXECUTE`.
    pub action: &'static str,
    /// What the action touched.
    pub resource: &'static str,
    /// Free-form detail such as the query text.
    pub details: String,
    /// Outcome.
    pub status: AuditStatus,
    /// Peer address, if known.
    pub ip_address: Option<String>,
}

impl AuditEvent {
    /// Creates an event for `context`, stamped with the current time.
    #[must_use]
    pub fn new(
        context: &TenantContext,
        action: &'static str,
        resource: &'static str,
        details: impl Into<String>,
        status: AuditStatus,
    ) -> Self {
        Self {
            timestamp: Utc::now().to_rfc3339(),
            actor: context.tenant_id.clone(),
            role: context.role.clone(),
            action,
            resource,
            details: details.into(),
            status,
            ip_address: context.remote_addr.map(|addr| addr.ip().to_string()),
        }
    }

    /// Writes the event to the audit target.
    pub fn emit(&self) {
        tracing::info!(
            target: "audit",
            timestamp = %self.timestamp,
            actor = %self.actor,
            role = %self.role,
            action = self.action,
            resource = self.resource,
            details = %self.details,
            status = self.status.as_str(),
            ip_address = self.ip_address.as_deref().unwrap_or("-"),
            "AUDIT"
        );
    }
}
