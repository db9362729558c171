//! Evidence catalogue types.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Hash algorithm tag carried next to a content hash.
pub const HASH_ALGORITHM_SHA256: &str = "sha256";

/// Closed enumeration of catalogued artifact kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EvidenceType {
    /// Full disk image.
    DiskImage,
    /// Volatile memory dump.
    MemoryDump,
    /// Network traffic capture.
    NetworkCapture,
    /// Application or system log file.
    LogFile,
    /// Windows registry hive.
    RegistryHive,
    /// Individual file.
    File,
    /// Database export.
    Database,
    /// Email message or mailbox.
    Email,
    /// Mobile device extraction.
    Mobile,
    /// Cloud service export.
    Cloud,
    /// Anything else.
    Other,
}

impl EvidenceType {
    /// Parse an evidence type from its wire string.
    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "disk_image" => Some(Self::DiskImage),
            "memory_dump" => Some(Self::MemoryDump),
            "network_capture" => Some(Self::NetworkCapture),
            "log_file" => Some(Self::LogFile),
            "registry_hive" => Some(Self::RegistryHive),
            "file" => Some(Self::File),
            "database" => Some(Self::Database),
            "email" => Some(Self::Email),
            "mobile" => Some(Self::Mobile),
            "cloud" => Some(Self::Cloud),
            "other" => Some(Self::Other),
            _ => None,
        }
    }
}

impl fmt::Display for EvidenceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::DiskImage => "disk_image",
            Self::MemoryDump => "memory_dump",
            Self::NetworkCapture => "network_capture",
            Self::LogFile => "log_file",
            Self::RegistryHive => "registry_hive",
            Self::File => "file",
            Self::Database => "database",
            Self::Email => "email",
            Self::Mobile => "mobile",
            Self::Cloud => "cloud",
            Self::Other => "other",
        };
        write!(f, "{}", s)
    }
}

/// Lifecycle status of an evidence record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EvidenceStatus {
    /// Initial state after collection.
    Collected,
    /// Integrity verification in progress.
    Verifying,
    /// Content hash verified against the stored blob.
    Verified,
    /// One or more analyses are running.
    Analyzing,
    /// Retained but no longer active.
    Archived,
    /// Soft-deleted. Only custody appends and audit reads are allowed.
    Deleted,
    /// Chain of custody or content integrity is broken.
    Damaged,
}

impl EvidenceStatus {
    /// Parse a status from its wire string.
    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "collected" => Some(Self::Collected),
            "verifying" => Some(Self::Verifying),
            "verified" => Some(Self::Verified),
            "analyzing" => Some(Self::Analyzing),
            "archived" => Some(Self::Archived),
            "deleted" => Some(Self::Deleted),
            "damaged" => Some(Self::Damaged),
            _ => None,
        }
    }
}

impl fmt::Display for EvidenceStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Collected => "collected",
            Self::Verifying => "verifying",
            Self::Verified => "verified",
            Self::Analyzing => "analyzing",
            Self::Archived => "archived",
            Self::Deleted => "deleted",
            Self::Damaged => "damaged",
        };
        write!(f, "{}", s)
    }
}

/// A catalogued artifact under custody.
///
/// The content hash never mutates after the first successful store. Once the
/// status enters `Deleted`, only custody appends and read-for-audit are
/// allowed.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Evidence {
    /// Unique identifier.
    pub id: String,
    /// Human-readable name.
    pub name: String,
    /// Artifact kind.
    pub evidence_type: EvidenceType,
    /// Where the artifact came from (host, device, account).
    pub source: String,
    /// Free-form description.
    pub description: String,
    /// Hex-encoded content hash.
    pub content_hash: String,
    /// Hash algorithm tag, currently always `sha256`.
    pub hash_algorithm: String,
    /// Blob size in bytes.
    pub size_bytes: u64,
    /// Storage location, opaque to callers.
    pub storage_location: String,
    /// Tag set for search.
    pub tags: Vec<String>,
    /// Free-form metadata.
    pub metadata: BTreeMap<String, String>,
    /// Lifecycle status.
    pub status: EvidenceStatus,
    /// When the artifact was collected.
    pub collected_at: DateTime<Utc>,
    /// Actor that collected the artifact.
    pub collected_by: String,
    /// When the content hash was last verified, if ever.
    pub verified_at: Option<DateTime<Utc>>,
    /// Actor that verified the content hash, if any.
    pub verified_by: Option<String>,
    /// Row creation timestamp.
    pub created_at: DateTime<Utc>,
    /// Row modification timestamp.
    pub updated_at: DateTime<Utc>,
}

/// Input for collecting a single piece of evidence.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CollectRequest {
    /// Human-readable name.
    pub name: String,
    /// Wire string for the evidence type.
    pub evidence_type: String,
    /// Where the artifact came from.
    #[serde(default)]
    pub source: String,
    /// Free-form description.
    #[serde(default)]
    pub description: String,
    /// Tag set for search.
    #[serde(default)]
    pub tags: Vec<String>,
    /// Free-form metadata.
    #[serde(default)]
    pub metadata: BTreeMap<String, String>,
}

/// Search filters over the evidence catalogue.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EvidenceQuery {
    /// Substring matched against name, description, and source.
    #[serde(default)]
    pub text: String,
    /// Restrict to these evidence types. Empty means all.
    #[serde(default)]
    pub types: Vec<EvidenceType>,
    /// Lower bound on collection time, inclusive.
    #[serde(default)]
    pub collected_after: Option<DateTime<Utc>>,
    /// Upper bound on collection time, inclusive.
    #[serde(default)]
    pub collected_before: Option<DateTime<Utc>>,
    /// Require all of these tags to be present.
    #[serde(default)]
    pub tags: Vec<String>,
    /// 1-based page number.
    pub page: u32,
    /// Page size, 1 to 100.
    pub page_size: u32,
}

/// One page of search results.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EvidencePage {
    /// Matching records for this page.
    pub items: Vec<Evidence>,
    /// Total matches across all pages.
    pub total: u64,
    /// Echo of the requested page.
    pub page: u32,
    /// Echo of the requested page size.
    pub page_size: u32,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_type_round_trip() {
        for s in [
            "disk_image",
            "memory_dump",
            "network_capture",
            "log_file",
            "registry_hive",
            "file",
            "database",
            "email",
            "mobile",
            "cloud",
            "other",
        ] {
            let t = EvidenceType::from_str(s).unwrap();
            assert_eq!(t.to_string(), s);
        }
        assert_eq!(EvidenceType::from_str("not_a_real_type"), None);
    }

    #[test]
    fn test_status_round_trip() {
        for s in [
            "collected",
            "verifying",
            "verified",
            "analyzing",
            "archived",
            "deleted",
            "damaged",
        ] {
            let st = EvidenceStatus::from_str(s).unwrap();
            assert_eq!(st.to_string(), s);
        }
    }
}
