//! Analyzers executed by the worker pool.
//!
//! Every analyzer writes a summary into `results` and at least one
//! type-tagged [`Finding`], so downstream consumers can treat `findings` as
//! the uniform output channel regardless of analysis kind. Kinds with no
//! dedicated engine in this deployment record an `analyzer_unavailable`
//! finding instead of silently completing.

use std::collections::BTreeMap;
use std::sync::Arc;

use crate::canonical::canonical_now;
use crate::events::{emit, EventSink};
use crate::evidence::BlobStore;
use crate::store::EvidenceStore;
use crate::types::{Analysis, AnalysisType, DomainEvent, EvidenceStatus, Finding};

/// Shared dependencies handed to every worker.
#[derive(Clone)]
pub(crate) struct WorkerContext {
    pub evidence: Arc<dyn EvidenceStore>,
    pub blobs: Arc<BlobStore>,
    pub events: Arc<dyn EventSink>,
}

/// Run the analyzer for a claimed analysis, filling in results and findings.
///
/// Returns an error string when the analysis should be marked failed.
pub(crate) async fn run_analyzer(
    ctx: &WorkerContext,
    analysis: &mut Analysis,
) -> Result<(), String> {
    match analysis.analysis_type {
        AnalysisType::HashVerification => hash_verification(ctx, analysis).await,
        AnalysisType::StringExtraction => string_extraction(ctx, analysis).await,
        AnalysisType::Metadata => metadata(ctx, analysis).await,
        AnalysisType::HashLookup => hash_lookup(ctx, analysis).await,
        _ => unsupported(analysis),
    }
}

/// Recompute the blob's SHA-256 and compare it with the hash stored at
/// collection time. A match marks the evidence verified; a mismatch flags it
/// damaged and raises a security event.
async fn hash_verification(ctx: &WorkerContext, analysis: &mut Analysis) -> Result<(), String> {
    let mut evidence = ctx
        .evidence
        .get_evidence(&analysis.evidence_id)
        .await
        .map_err(|e| e.to_string())?
        .ok_or_else(|| format!("evidence {} no longer exists", analysis.evidence_id))?;

    let bytes = ctx
        .blobs
        .read(&evidence.id)
        .await
        .map_err(|e| format!("blob unreadable: {}", e))?;
    let computed = BlobStore::sha256_hex(&bytes);
    let matches = computed == evidence.content_hash;

    analysis
        .results
        .insert("stored_hash".to_string(), evidence.content_hash.clone());
    analysis
        .results
        .insert("computed_hash".to_string(), computed.clone());
    analysis
        .results
        .insert("match".to_string(), matches.to_string());

    let now = canonical_now();
    if matches {
        analysis.findings.push(Finding {
            finding_type: "hash_verified".to_string(),
            description: "stored content hash matches the blob".to_string(),
            data: [("content_hash".to_string(), computed)].into_iter().collect(),
        });

        evidence.verified_at = Some(now);
        evidence.verified_by = Some(analysis.processed_by.clone());
        if matches!(
            evidence.status,
            EvidenceStatus::Collected | EvidenceStatus::Verifying
        ) {
            evidence.status = EvidenceStatus::Verified;
        }
        evidence.updated_at = now;
        ctx.evidence
            .update_evidence(&evidence)
            .await
            .map_err(|e| e.to_string())?;
    } else {
        analysis.findings.push(Finding {
            finding_type: "hash_mismatch".to_string(),
            description: "stored content hash does not match the blob".to_string(),
            data: [
                ("stored_hash".to_string(), evidence.content_hash.clone()),
                ("computed_hash".to_string(), computed),
            ]
            .into_iter()
            .collect(),
        });

        if evidence.status != EvidenceStatus::Deleted {
            evidence.status = EvidenceStatus::Damaged;
            evidence.updated_at = now;
            ctx.evidence
                .update_evidence(&evidence)
                .await
                .map_err(|e| e.to_string())?;
        }

        emit(
            ctx.events.as_ref(),
            DomainEvent::SecurityEvent {
                timestamp: now,
                severity: "critical".to_string(),
                description: "evidence content hash mismatch".to_string(),
                evidence_id: evidence.id.clone(),
            },
        )
        .await;
    }

    Ok(())
}

/// Count printable ASCII runs of four or more bytes.
async fn string_extraction(ctx: &WorkerContext, analysis: &mut Analysis) -> Result<(), String> {
    let bytes = ctx
        .blobs
        .read(&analysis.evidence_id)
        .await
        .map_err(|e| format!("blob unreadable: {}", e))?;

    let mut count: u64 = 0;
    let mut run = 0usize;
    for b in bytes.iter().chain(std::iter::once(&0u8)) {
        if b.is_ascii_graphic() || *b == b' ' {
            run += 1;
        } else {
            if run >= 4 {
                count += 1;
            }
            run = 0;
        }
    }

    analysis
        .results
        .insert("string_count".to_string(), count.to_string());
    analysis
        .results
        .insert("bytes_scanned".to_string(), bytes.len().to_string());
    analysis.findings.push(Finding {
        finding_type: "extracted_strings".to_string(),
        description: format!("{} printable runs of 4 or more bytes", count),
        data: [
            ("string_count".to_string(), count.to_string()),
            ("bytes_scanned".to_string(), bytes.len().to_string()),
        ]
        .into_iter()
        .collect(),
    });
    Ok(())
}

/// Report the catalogue metadata the engine already holds for the blob.
async fn metadata(ctx: &WorkerContext, analysis: &mut Analysis) -> Result<(), String> {
    let evidence = ctx
        .evidence
        .get_evidence(&analysis.evidence_id)
        .await
        .map_err(|e| e.to_string())?
        .ok_or_else(|| format!("evidence {} no longer exists", analysis.evidence_id))?;

    let mut data = BTreeMap::new();
    data.insert(
        "evidence_type".to_string(),
        evidence.evidence_type.to_string(),
    );
    data.insert("size_bytes".to_string(), evidence.size_bytes.to_string());
    data.insert("content_hash".to_string(), evidence.content_hash);
    data.insert("collected_by".to_string(), evidence.collected_by);

    analysis.results.extend(data.clone());
    analysis.findings.push(Finding {
        finding_type: "catalogue_metadata".to_string(),
        description: "metadata recorded for the artifact at collection time".to_string(),
        data,
    });
    Ok(())
}

/// Look the stored content hash up in the caller-supplied hash set.
///
/// The `known_hashes` parameter carries a comma-separated list of hex
/// digests, e.g. exported from a known-file database.
async fn hash_lookup(ctx: &WorkerContext, analysis: &mut Analysis) -> Result<(), String> {
    let evidence = ctx
        .evidence
        .get_evidence(&analysis.evidence_id)
        .await
        .map_err(|e| e.to_string())?
        .ok_or_else(|| format!("evidence {} no longer exists", analysis.evidence_id))?;

    let known_param = analysis
        .parameters
        .get("known_hashes")
        .cloned()
        .unwrap_or_default();
    let known: Vec<&str> = known_param
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .collect();

    let hit = known
        .iter()
        .any(|h| h.eq_ignore_ascii_case(&evidence.content_hash));

    analysis
        .results
        .insert("content_hash".to_string(), evidence.content_hash.clone());
    analysis
        .results
        .insert("hashes_checked".to_string(), known.len().to_string());
    analysis.results.insert("match".to_string(), hit.to_string());

    if hit {
        analysis.findings.push(Finding {
            finding_type: "known_hash_match".to_string(),
            description: "content hash is present in the supplied hash set".to_string(),
            data: [
                ("content_hash".to_string(), evidence.content_hash),
                ("hashes_checked".to_string(), known.len().to_string()),
            ]
            .into_iter()
            .collect(),
        });
    } else {
        analysis.findings.push(Finding {
            finding_type: "unknown_hash".to_string(),
            description: "content hash is not present in the supplied hash set".to_string(),
            data: [
                ("content_hash".to_string(), evidence.content_hash),
                ("hashes_checked".to_string(), known.len().to_string()),
            ]
            .into_iter()
            .collect(),
        });
    }
    Ok(())
}

/// Fallback for analysis kinds with no dedicated engine in this deployment.
fn unsupported(analysis: &mut Analysis) -> Result<(), String> {
    let kind = analysis.analysis_type.to_string();
    analysis.results.insert(
        "summary".to_string(),
        format!("{} analysis recorded without a dedicated engine", kind),
    );
    analysis.findings.push(Finding {
        finding_type: "analyzer_unavailable".to_string(),
        description: format!("no {} engine is registered in this deployment", kind),
        data: [("analysis_type".to_string(), kind)].into_iter().collect(),
    });
    Ok(())
}
