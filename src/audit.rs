//! Policy decision audit log.
//!
//! Every per-resource policy check of a dataset request produces one
//! [`PolicyDecisionLog`], whether it passed or failed. Records go to an
//! [`AuditSink`]; sinks are fire-and-forget and must never fail the request.
//!
//! The default [`TracingAuditSink`] emits each record via `tracing::info!`
//! with the record serialized in the `audit` field:
//!
//! ```text
//! INFO access_broker::audit audit={"token_id":"..","pass_auth_check":false,..} policy decision
//! ```

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use serde::Serialize;

use crate::broker::Identity;
use crate::Error;

/// Outcome of one policy check.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PolicyDecisionLog {
    /// Upstream token id of the identity
    pub token_id: String,
    /// Identity subject
    pub token_subject: String,
    /// Identity issuer
    pub token_issuer: String,
    /// Canonical `realm/resource/view/role`
    pub resource: String,
    /// Requested TTL, human readable
    pub ttl: String,
    /// Whether the check passed
    pub pass_auth_check: bool,
    /// Failure message
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl PolicyDecisionLog {
    /// Build the record for a check of `resource` with outcome `result`.
    #[must_use]
    pub fn new(
        identity: &Identity,
        resource: String,
        ttl: Duration,
        result: Result<(), &Error>,
    ) -> Self {
        Self {
            token_id: identity.id.clone(),
            token_subject: identity.subject.clone(),
            token_issuer: identity.issuer.clone(),
            resource,
            ttl: humantime::format_duration(ttl).to_string(),
            pass_auth_check: result.is_ok(),
            message: result.err().map(ToString::to_string),
        }
    }
}

/// Destination of policy decision records.
pub trait AuditSink: Send + Sync + 'static {
    /// Record a decision. Must not fail or block for long.
    fn write_policy_decision(&self, log: &PolicyDecisionLog);
}

/// Sink writing records to the `tracing` pipeline.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingAuditSink;

impl AuditSink for TracingAuditSink {
    fn write_policy_decision(&self, log: &PolicyDecisionLog) {
        match serde_json::to_string(log) {
            Ok(ref json) => tracing::info!(audit = %json, "policy decision"),
            Err(ref e) => tracing::warn!(error = %e, "Failed to serialize policy decision"),
        }
    }
}

/// Sink keeping records in memory, for tests and embedding.
#[derive(Debug, Default, Clone)]
pub struct RecordingAuditSink {
    records: Arc<Mutex<Vec<PolicyDecisionLog>>>,
}

impl RecordingAuditSink {
    /// Empty sink.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Records written so far, oldest first.
    #[must_use]
    pub fn records(&self) -> Vec<PolicyDecisionLog> {
        self.records.lock().clone()
    }
}

impl AuditSink for RecordingAuditSink {
    fn write_policy_decision(&self, log: &PolicyDecisionLog) {
        self.records.lock().push(log.clone());
    }
}
