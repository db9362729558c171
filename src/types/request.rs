//! Access request and decision types.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::hash::Hasher;
use xxhash_rust::xxh64::Xxh64;

/// The subject asking for access.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Subject {
    /// Subject identifier.
    pub id: String,
    /// Subject kind, e.g. "user" or "service".
    #[serde(default)]
    pub subject_type: String,
    /// Roles held by the subject.
    #[serde(default)]
    pub roles: Vec<String>,
}

/// The resource access is requested for.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Resource {
    /// Resource type, matched against policy resource patterns.
    pub resource_type: String,
    /// Resource instance identifier.
    #[serde(default)]
    pub id: String,
}

/// Evaluation context carried alongside a request.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RequestContext {
    /// Request time. When absent, the engine substitutes the current wall
    /// clock before evaluation.
    #[serde(default)]
    pub time: Option<DateTime<Utc>>,
    /// Source address of the request.
    #[serde(default)]
    pub ip_address: String,
    /// User agent of the caller.
    #[serde(default)]
    pub user_agent: String,
    /// Deployment environment label, e.g. "production".
    #[serde(default)]
    pub environment: String,
    /// Arbitrary additional attributes.
    #[serde(default)]
    pub attributes: BTreeMap<String, String>,
}

/// A transient authorization request evaluated by the decision engine.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AccessRequest {
    /// Who is asking.
    pub subject: Subject,
    /// What they are asking about.
    pub resource: Resource,
    /// The action they want to perform.
    pub action: String,
    /// Evaluation context.
    #[serde(default)]
    pub context: RequestContext,
}

impl AccessRequest {
    /// Deterministic fingerprint over the request's semantic key.
    ///
    /// Covers subject id, subject type, sorted roles, resource type and id,
    /// and the action. Context fields are deliberately excluded: two requests
    /// that differ only in context share a cache slot, and condition-bearing
    /// policies are evaluated against the context at decision time before the
    /// result is cached.
    pub fn fingerprint(&self) -> DecisionFingerprint {
        let mut hasher = Xxh64::new(0);

        hasher.write(self.subject.id.as_bytes());
        hasher.write(b"|");
        hasher.write(self.subject.subject_type.as_bytes());
        hasher.write(b"|");

        let mut roles = self.subject.roles.clone();
        roles.sort();
        for role in &roles {
            hasher.write(role.as_bytes());
            hasher.write(b",");
        }

        hasher.write(b"|");
        hasher.write(self.resource.resource_type.as_bytes());
        hasher.write(b"|");
        hasher.write(self.resource.id.as_bytes());
        hasher.write(b"|");
        hasher.write(self.action.as_bytes());

        DecisionFingerprint(format!("{:016x}", hasher.finish()))
    }
}

/// Fingerprint keying a cached decision.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct DecisionFingerprint(String);

impl DecisionFingerprint {
    /// Wrap an existing fingerprint string.
    pub fn new(hash: String) -> Self {
        Self(hash)
    }

    /// Get the fingerprint as a string.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for DecisionFingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// The outcome of evaluating an access request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AccessDecision {
    /// Whether access is granted.
    pub allowed: bool,
    /// Id of the matched policy, or empty if default-denied.
    pub policy_id: String,
    /// Name of the matched policy, or empty if default-denied.
    pub policy_name: String,
    /// Human-readable explanation of the decision.
    pub explanation: String,
    /// The match dimensions that fired, e.g. `resource:doc`, `action:read`.
    pub matched_on: Vec<String>,
    /// When the decision was evaluated.
    pub evaluated_at: DateTime<Utc>,
    /// Whether this decision came from the cache. Observability only; two
    /// decisions differing only in this flag are considered equal.
    pub cache_hit: bool,
}
