//! # Coinset-Sync Benchmarks
//!
//! | Subsystem | Operation | Expected scaling |
//! |-----------|-----------|------------------|
//! | cs-01 Merkle Set | Build + root | O(n log n) |
//! | cs-01 Merkle Set | Inclusion proof | O(log n) |
//! | cs-01 Merkle Set | Proof check against a root | O(log n) |

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use cs_01_merkle_set::{confirm_excluded, confirm_included, MerkleSet};
use rand::Rng;
use shared_types::Bytes32;
use std::time::Duration;

fn random_ids(count: usize) -> Vec<Bytes32> {
    let mut rng = rand::thread_rng();
    (0..count).map(|_| Bytes32(rng.gen())).collect()
}

// ============================================================================
// CS-01: Construction
// ============================================================================

fn bench_merkle_set_build(c: &mut Criterion) {
    let mut group = c.benchmark_group("cs-01-merkle-set-build");
    group.measurement_time(Duration::from_secs(10));

    for size in [100, 1_000, 10_000, 100_000] {
        let ids = random_ids(size);
        group.throughput(Throughput::Elements(size as u64));
        group.bench_with_input(BenchmarkId::new("build_and_root", size), &ids, |b, ids| {
            b.iter(|| black_box(MerkleSet::new(ids).root()))
        });
    }

    group.finish();
}

// ============================================================================
// CS-01: Proofs
// ============================================================================

fn bench_merkle_set_proofs(c: &mut Criterion) {
    let mut group = c.benchmark_group("cs-01-merkle-set-proofs");

    for size in [1_000, 100_000] {
        let ids = random_ids(size);
        let set = MerkleSet::new(&ids);
        let root = set.root();
        let member = ids[size / 2];
        let absent = random_ids(1)[0];
        let (_, inclusion) = set.is_included(&member);
        let (_, exclusion) = set.is_included(&absent);

        group.bench_with_input(BenchmarkId::new("prove_inclusion", size), &member, |b, id| {
            b.iter(|| black_box(set.is_included(id)))
        });
        group.bench_with_input(BenchmarkId::new("confirm_included", size), &inclusion, |b, proof| {
            b.iter(|| black_box(confirm_included(&root, &member, proof)))
        });
        group.bench_with_input(BenchmarkId::new("confirm_excluded", size), &exclusion, |b, proof| {
            b.iter(|| black_box(confirm_excluded(&root, &absent, proof)))
        });
    }

    group.finish();
}

criterion_group!(benches, bench_merkle_set_build, bench_merkle_set_proofs);
criterion_main!(benches);
