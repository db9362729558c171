//! Policy types for the decision engine.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Effect of a policy when it matches a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PolicyEffect {
    /// Matching requests are permitted.
    Allow,
    /// Matching requests are refused.
    Deny,
}

impl PolicyEffect {
    /// Parse an effect from its wire string.
    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "allow" => Some(Self::Allow),
            "deny" => Some(Self::Deny),
            _ => None,
        }
    }
}

impl fmt::Display for PolicyEffect {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Allow => write!(f, "allow"),
            Self::Deny => write!(f, "deny"),
        }
    }
}

/// A named access-control rule.
///
/// Policies are matched against requests by resource type, action, subject
/// roles, and conditions, in descending priority order. The version counter
/// strictly increases with every state-changing mutation on a given id.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Policy {
    /// Opaque unique identifier, immutable for the life of the policy.
    pub id: String,
    /// Human-readable name.
    pub name: String,
    /// Human-readable description.
    pub description: String,
    /// Whether a match allows or denies the request.
    pub effect: PolicyEffect,
    /// Resource type patterns: literal strings or the wildcard `*`.
    pub resources: Vec<String>,
    /// Action patterns: literal strings or the wildcard `*`.
    pub actions: Vec<String>,
    /// Subject-role patterns. Empty means the policy applies to all subjects.
    pub subjects: Vec<String>,
    /// Named conditions that must all hold for the policy to match.
    pub conditions: BTreeMap<String, String>,
    /// Evaluation priority. Higher wins.
    pub priority: i32,
    /// Version counter, starts at 1.
    pub version: u32,
    /// Inactive policies are never applicable.
    pub active: bool,
    /// Free-form metadata.
    pub metadata: BTreeMap<String, String>,
    /// Creation timestamp.
    pub created_at: DateTime<Utc>,
    /// Actor that created the policy.
    pub created_by: String,
    /// Last-modification timestamp.
    pub updated_at: DateTime<Utc>,
    /// Actor responsible for the last modification.
    pub updated_by: String,
}

impl Policy {
    /// Whether the policy's resource set covers the given resource type.
    pub fn matches_resource(&self, resource_type: &str) -> bool {
        self.resources.iter().any(|r| r == "*" || r == resource_type)
    }

    /// Whether the policy's action set covers the given action.
    pub fn matches_action(&self, action: &str) -> bool {
        self.actions.iter().any(|a| a == "*" || a == action)
    }

    /// Whether the policy applies to a subject with the given roles.
    ///
    /// An empty subject set matches any subject. Otherwise any request role
    /// must equal any subject pattern, compared case-insensitively.
    pub fn matches_subject(&self, roles: &[String]) -> bool {
        if self.subjects.is_empty() {
            return true;
        }
        roles.iter().any(|role| {
            self.subjects
                .iter()
                .any(|pattern| pattern.eq_ignore_ascii_case(role))
        })
    }
}

/// Kind of change recorded in a policy's history.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChangeKind {
    /// The policy came into existence.
    Created,
    /// A live policy was mutated.
    Updated,
    /// The live policy row was removed.
    Deleted,
}

impl ChangeKind {
    /// Parse a change kind from its wire string.
    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "created" => Some(Self::Created),
            "updated" => Some(Self::Updated),
            "deleted" => Some(Self::Deleted),
            _ => None,
        }
    }
}

impl fmt::Display for ChangeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Created => write!(f, "created"),
            Self::Updated => write!(f, "updated"),
            Self::Deleted => write!(f, "deleted"),
        }
    }
}

/// Immutable history record of one policy mutation.
///
/// `(policy_id, version)` is unique; snapshots are never mutated after write.
/// History outlives the policy row it describes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PolicyVersion {
    /// Unique identifier of the history record itself.
    pub id: String,
    /// The policy this record belongs to.
    pub policy_id: String,
    /// The policy's version counter at the time of the change.
    pub version: u32,
    /// Deep snapshot of the policy at this version.
    pub policy_data: Policy,
    /// What kind of change produced this record.
    pub change_kind: ChangeKind,
    /// Actor responsible for the change.
    pub changed_by: String,
    /// When the change happened.
    pub changed_at: DateTime<Utc>,
    /// Human-readable reason for the change.
    pub reason: String,
}

/// Input for creating a policy.
///
/// The effect is carried as a wire string so an invalid value can be
/// rejected with a validation error instead of failing to deserialize.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PolicyInput {
    /// Human-readable name.
    pub name: String,
    /// Human-readable description.
    #[serde(default)]
    pub description: String,
    /// Wire string for the effect; must parse to `allow` or `deny`.
    pub effect: String,
    /// Resource type patterns.
    #[serde(default)]
    pub resources: Vec<String>,
    /// Action patterns.
    #[serde(default)]
    pub actions: Vec<String>,
    /// Subject-role patterns. Empty applies to all subjects.
    #[serde(default)]
    pub subjects: Vec<String>,
    /// Named conditions.
    #[serde(default)]
    pub conditions: BTreeMap<String, String>,
    /// Evaluation priority.
    #[serde(default)]
    pub priority: i32,
    /// Whether the policy starts active. Defaults to true.
    #[serde(default = "default_active")]
    pub active: bool,
    /// Free-form metadata.
    #[serde(default)]
    pub metadata: BTreeMap<String, String>,
}

fn default_active() -> bool {
    true
}

/// Patch applied by a policy update.
///
/// Empty strings and empty collections mean "unchanged". `conditions` and
/// `metadata` distinguish an absent field (unchanged) from an explicit JSON
/// null (clear) by double-wrapping in `Option`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PolicyPatch {
    /// New name, or empty to leave unchanged.
    #[serde(default)]
    pub name: String,
    /// New description, or empty to leave unchanged.
    #[serde(default)]
    pub description: String,
    /// New effect wire string, or empty to leave unchanged. An invalid
    /// non-empty value rejects the whole patch.
    #[serde(default)]
    pub effect: String,
    /// New resource patterns, or empty to leave unchanged.
    #[serde(default)]
    pub resources: Vec<String>,
    /// New action patterns, or empty to leave unchanged.
    #[serde(default)]
    pub actions: Vec<String>,
    /// New subject patterns, or empty to leave unchanged.
    #[serde(default)]
    pub subjects: Vec<String>,
    /// Replacement conditions. Absent = unchanged, null = clear.
    #[serde(default, deserialize_with = "nullable")]
    pub conditions: Option<Option<BTreeMap<String, String>>>,
    /// New priority, or absent to leave unchanged.
    #[serde(default)]
    pub priority: Option<i32>,
    /// New active flag, or absent to leave unchanged.
    #[serde(default)]
    pub active: Option<bool>,
    /// Replacement metadata. Absent = unchanged, null = clear.
    #[serde(default, deserialize_with = "nullable")]
    pub metadata: Option<Option<BTreeMap<String, String>>>,
}

/// Deserialize a field so that an explicit JSON null is distinguishable from
/// an absent field: absent stays `None`, null becomes `Some(None)`.
fn nullable<'de, T, D>(deserializer: D) -> Result<Option<Option<T>>, D::Error>
where
    T: Deserialize<'de>,
    D: Deserializer<'de>,
{
    Option::<T>::deserialize(deserializer).map(Some)
}
