//! Authorization result types.

use crate::policy::Decision;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use uuid::Uuid;

/// The result of an authorization request.
///
/// Equal inputs produce equal results: timing and request ids are kept out of this type
/// and only appear in the decision log.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthorizeResult {
    /// ALLOW or DENY
    pub decision: Decision,
    /// Ids of the policies that determined the decision, sorted
    #[serde(default)]
    pub reasons: Vec<String>,
    /// Conditions that failed to evaluate, sorted by policy id
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub errors: Vec<PolicyEvaluationError>,
}

impl AuthorizeResult {
    /// An ALLOW result.
    pub fn allow(reasons: Vec<String>) -> Self {
        Self {
            decision: Decision::Allow,
            reasons,
            errors: Vec::new(),
        }
    }

    /// A DENY result.
    pub fn deny(reasons: Vec<String>) -> Self {
        Self {
            decision: Decision::Deny,
            reasons,
            errors: Vec::new(),
        }
    }

    /// Attach evaluation errors.
    pub fn with_errors(mut self, errors: Vec<PolicyEvaluationError>) -> Self {
        self.errors = errors;
        self
    }

    /// Check if the request is allowed.
    pub fn is_allowed(&self) -> bool {
        self.decision.is_allowed()
    }
}

/// A condition that could not be evaluated.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct PolicyEvaluationError {
    /// Policy whose condition failed
    pub policy_id: String,
    /// What went wrong
    pub message: String,
}

/// One decision log record.
#[derive(Debug, Clone, Serialize)]
pub struct DecisionLogEntry {
    /// Unique id for this request
    pub request_id: Uuid,
    /// When the decision was made
    pub timestamp: DateTime<Utc>,
    /// Configured application name
    pub application_name: String,
    /// Store that answered the request
    pub policy_store_id: String,
    /// Version of that store
    pub policy_store_version: String,
    /// Canonical principal
    pub principal: String,
    /// Canonical action
    pub action: String,
    /// Canonical resource
    pub resource: String,
    /// The decision
    pub decision: Decision,
    /// Determining policies
    pub reasons: Vec<String>,
    /// Number of conditions that failed to evaluate
    pub error_count: usize,
    /// Time spent deciding, in milliseconds
    pub decision_time_ms: f64,
}

impl DecisionLogEntry {
    /// Set the decision time.
    pub fn with_decision_time(mut self, duration: Duration) -> Self {
        self.decision_time_ms = duration.as_secs_f64() * 1000.0;
        self
    }

    /// Emit this entry on the `cedarling::decision` tracing target.
    pub fn emit(&self) {
        tracing::info!(
            target: "cedarling::decision",
            request_id = %self.request_id,
            timestamp = %self.timestamp.to_rfc3339(),
            application_name = %self.application_name,
            policy_store_id = %self.policy_store_id,
            policy_store_version = %self.policy_store_version,
            principal = %self.principal,
            action = %self.action,
            resource = %self.resource,
            decision = %self.decision,
            reasons = ?self.reasons,
            error_count = self.error_count,
            decision_time_ms = self.decision_time_ms,
            "Authorization decision"
        );
    }
}
