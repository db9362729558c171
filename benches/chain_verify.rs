//! Performance benchmarks for custody chain verification.
//!
//! Run with: `cargo bench --bench chain_verify`
//!
//! ## Performance Targets
//!
//! | Operation | Target | Notes |
//! |-----------|--------|-------|
//! | Single record hash | <10µs | One SHA-256 over the canonical string |
//! | 100-record chain verify | <2ms | Full recompute walk |
//! | Request fingerprint | <5µs | xxh64 over the semantic key |

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};

use custody_kernel::types::{CustodyDraft, ACTION_TRANSFERRED};
use custody_kernel::{
    canonical_now, verify_chain, AccessRequest, CustodyRecord, RequestContext, Resource, Subject,
};

/// Build a valid chain of the given length.
fn make_chain(n: usize) -> Vec<CustodyRecord> {
    let base = canonical_now();
    let mut prev_hash = String::new();
    (0..n)
        .map(|i| {
            let record = CustodyRecord::finalize(
                CustodyDraft {
                    id: format!("record-{}", i),
                    evidence_id: "bench-evidence".to_string(),
                    handler: "bench-handler".to_string(),
                    action: ACTION_TRANSFERRED.to_string(),
                    location: "bench-lab".to_string(),
                    notes: String::new(),
                    signature: String::new(),
                },
                prev_hash.clone(),
                base + chrono::Duration::seconds(i as i64),
            );
            prev_hash = record.record_hash.clone();
            record
        })
        .collect()
}

fn make_request() -> AccessRequest {
    AccessRequest {
        subject: Subject {
            id: "bench-user".to_string(),
            subject_type: "user".to_string(),
            roles: vec!["auditor".to_string(), "viewer".to_string()],
        },
        resource: Resource {
            resource_type: "doc".to_string(),
            id: "42".to_string(),
        },
        action: "read".to_string(),
        context: RequestContext::default(),
    }
}

/// Benchmark hashing a single record.
fn bench_record_hash(c: &mut Criterion) {
    let chain = make_chain(1);
    c.bench_function("record_hash", |b| {
        b.iter(|| black_box(chain[0].recompute_hash()))
    });
}

/// Benchmark full chain verification at several chain lengths.
fn bench_chain_verify(c: &mut Criterion) {
    let mut group = c.benchmark_group("chain_verify");
    for n in [1usize, 10, 100, 1000] {
        let chain = make_chain(n);
        group.throughput(Throughput::Elements(n as u64));
        group.bench_with_input(BenchmarkId::from_parameter(n), &chain, |b, chain| {
            b.iter(|| black_box(verify_chain(chain).is_intact()))
        });
    }
    group.finish();
}

/// Benchmark request fingerprinting.
fn bench_fingerprint(c: &mut Criterion) {
    let request = make_request();
    c.bench_function("request_fingerprint", |b| {
        b.iter(|| black_box(request.fingerprint()))
    });
}

criterion_group!(benches, bench_record_hash, bench_chain_verify, bench_fingerprint);
criterion_main!(benches);
