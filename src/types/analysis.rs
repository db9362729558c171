//! Analysis orchestration types.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Closed enumeration of supported analysis kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AnalysisType {
    /// Recompute the evidence blob hash and compare with the stored hash.
    HashVerification,
    /// Carve files out of an unstructured image.
    FileCarving,
    /// Build an event timeline.
    Timeline,
    /// Malware triage.
    Malware,
    /// Memory dump analysis.
    Memory,
    /// Registry hive analysis.
    Registry,
    /// Extract printable strings.
    StringExtraction,
    /// Extract embedded metadata.
    Metadata,
    /// Look the content hash up in known-file databases.
    HashLookup,
    /// YARA rule scan.
    Yara,
    /// Operator-defined analysis.
    Custom,
}

impl AnalysisType {
    /// Parse an analysis type from its wire string.
    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "hash_verification" => Some(Self::HashVerification),
            "file_carving" => Some(Self::FileCarving),
            "timeline" => Some(Self::Timeline),
            "malware" => Some(Self::Malware),
            "memory" => Some(Self::Memory),
            "registry" => Some(Self::Registry),
            "string_extraction" => Some(Self::StringExtraction),
            "metadata" => Some(Self::Metadata),
            "hash_lookup" => Some(Self::HashLookup),
            "yara" => Some(Self::Yara),
            "custom" => Some(Self::Custom),
            _ => None,
        }
    }
}

impl fmt::Display for AnalysisType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::HashVerification => "hash_verification",
            Self::FileCarving => "file_carving",
            Self::Timeline => "timeline",
            Self::Malware => "malware",
            Self::Memory => "memory",
            Self::Registry => "registry",
            Self::StringExtraction => "string_extraction",
            Self::Metadata => "metadata",
            Self::HashLookup => "hash_lookup",
            Self::Yara => "yara",
            Self::Custom => "custom",
        };
        write!(f, "{}", s)
    }
}

/// State machine position of an analysis.
///
/// Transitions: `pending → running → {completed, failed, cancelled}`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AnalysisStatus {
    /// Queued, not yet claimed by a worker.
    Pending,
    /// Claimed by exactly one worker.
    Running,
    /// Finished successfully.
    Completed,
    /// Finished with an error.
    Failed,
    /// Cancelled before completion.
    Cancelled,
}

impl AnalysisStatus {
    /// Whether this status is terminal.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
    }

    /// Parse a status from its wire string.
    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(Self::Pending),
            "running" => Some(Self::Running),
            "completed" => Some(Self::Completed),
            "failed" => Some(Self::Failed),
            "cancelled" => Some(Self::Cancelled),
            _ => None,
        }
    }
}

impl fmt::Display for AnalysisStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Pending => "pending",
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
        };
        write!(f, "{}", s)
    }
}

/// A single structured finding produced by an analysis.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Finding {
    /// Finding category, e.g. `hash_mismatch`.
    pub finding_type: String,
    /// Human-readable description.
    pub description: String,
    /// Structured detail.
    #[serde(default)]
    pub data: BTreeMap<String, String>,
}

/// An orchestration record for one analysis of one piece of evidence.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Analysis {
    /// Unique identifier.
    pub id: String,
    /// The evidence being analyzed. Must exist at evaluation time.
    pub evidence_id: String,
    /// What kind of analysis this is.
    pub analysis_type: AnalysisType,
    /// State machine position.
    pub status: AnalysisStatus,
    /// Input parameters.
    pub parameters: BTreeMap<String, String>,
    /// Output results. Populated in terminal states.
    pub results: BTreeMap<String, String>,
    /// Structured findings. Populated in terminal states.
    pub findings: Vec<Finding>,
    /// Worker or actor processing the analysis.
    pub processed_by: String,
    /// When a worker claimed the analysis.
    pub started_at: Option<DateTime<Utc>>,
    /// When the analysis reached a terminal state.
    pub completed_at: Option<DateTime<Utc>>,
    /// Error detail when status is `failed`.
    pub error_message: String,
    /// Row creation timestamp.
    pub created_at: DateTime<Utc>,
    /// Row modification timestamp.
    pub updated_at: DateTime<Utc>,
}

/// Input for starting an analysis.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnalysisRequest {
    /// The evidence to analyze.
    pub evidence_id: String,
    /// Wire string for the analysis type.
    pub analysis_type: String,
    /// Input parameters.
    #[serde(default)]
    pub parameters: BTreeMap<String, String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_type_round_trip() {
        for s in [
            "hash_verification",
            "file_carving",
            "timeline",
            "malware",
            "memory",
            "registry",
            "string_extraction",
            "metadata",
            "hash_lookup",
            "yara",
            "custom",
        ] {
            let t = AnalysisType::from_str(s).unwrap();
            assert_eq!(t.to_string(), s);
        }
        assert_eq!(AnalysisType::from_str("not_a_real_type"), None);
    }

    #[test]
    fn test_terminal_statuses() {
        assert!(!AnalysisStatus::Pending.is_terminal());
        assert!(!AnalysisStatus::Running.is_terminal());
        assert!(AnalysisStatus::Completed.is_terminal());
        assert!(AnalysisStatus::Failed.is_terminal());
        assert!(AnalysisStatus::Cancelled.is_terminal());
    }
}
