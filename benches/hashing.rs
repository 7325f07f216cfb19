//! Performance benchmarks for the nonce search hot path

use aimine_client::crypto::{DigestPrefix, KeccakHasher, Preimage};
use aimine_client::worker::random_offsets;
use aimine_client::{CandidateText, Seed, SolverIdentity, Target};
use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use std::hint::black_box;

fn prefix() -> DigestPrefix {
    let candidate = CandidateText::new(vec![b'x'; 256]).unwrap();
    DigestPrefix::for_candidate(&Seed([0x42; 32]), 17, &SolverIdentity([0x11; 20]), &candidate)
}

fn bench_keccak(c: &mut Criterion) {
    let mut preimage = Preimage::new(&prefix());
    let mut hasher = KeccakHasher::new();
    let target = Target::from_leading_zero_bits(24);

    c.bench_function("keccak256_preimage", |b| {
        b.iter(|| black_box(hasher.hash(black_box(preimage.as_bytes()))));
    });

    let mut nonce = 0u64;
    c.bench_function("set_nonce_hash_and_check", |b| {
        b.iter(|| {
            nonce = nonce.wrapping_add(1);
            preimage.set_nonce(nonce);
            black_box(hasher.hash_and_check(preimage.as_bytes(), &target))
        });
    });
}

fn bench_prefix(c: &mut Criterion) {
    let mut group = c.benchmark_group("digest_prefix");

    for len in [CandidateText::MIN_LEN, 500, CandidateText::MAX_LEN] {
        let candidate = CandidateText::new(vec![b'y'; len]).unwrap();
        group.throughput(Throughput::Bytes(len as u64));
        group.bench_with_input(BenchmarkId::new("for_candidate", len), &candidate, |b, candidate| {
            b.iter(|| DigestPrefix::for_candidate(&Seed([1; 32]), 1, &SolverIdentity::ZERO, black_box(candidate)));
        });
    }

    group.finish();
}

fn bench_target_check(c: &mut Criterion) {
    let digest = [0x7f; 32];
    let target = Target::from_leading_zero_bits(20);

    c.bench_function("target_is_met_by", |b| {
        b.iter(|| black_box(target.is_met_by(black_box(&digest))));
    });

    c.bench_function("random_offsets_16", |b| {
        b.iter(|| black_box(random_offsets(16)));
    });
}

criterion_group!(benches, bench_keccak, bench_prefix, bench_target_check);
criterion_main!(benches);
