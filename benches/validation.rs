//! Benchmarks for the per-request hot path: range validation and signature checks.

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion};
use rsa::pss::BlindedSigningKey;
use rsa::signature::{RandomizedSigner, SignatureEncoding};
use rsa::RsaPrivateKey;
use sha2::Sha512;
use std::hint::black_box;

use ppm_agent::auth::TrustAnchor;
use ppm_agent::validation::validate_range;

/// Mix of accepted and rejected inputs
fn sample_ranges(count: usize) -> Vec<String> {
    (0..count)
        .map(|i| match i % 5 {
            0 => format!("{}.{}.0.0/16", i % 256, (i / 256) % 256),
            1 => format!("10.{}.{}.{}", i % 256, (i / 7) % 256, (i / 13) % 256),
            2 => format!("2001:db8:{:x}::/48", i % 65536),
            3 => format!("10.0.0.0/{}", 33 + i % 10),
            _ => format!("10.0.0.{}; rm -rf /", i % 256),
        })
        .collect()
}

fn bench_validate_range(c: &mut Criterion) {
    let mut group = c.benchmark_group("validate_range");

    for size in [10, 100, 1_000] {
        let ranges = sample_ranges(size);
        group.bench_with_input(BenchmarkId::new("mixed", size), &ranges, |b, ranges| {
            b.iter(|| {
                ranges
                    .iter()
                    .filter(|r| validate_range(black_box(r)).is_ok())
                    .count()
            })
        });
    }

    group.finish();
}

fn bench_verify_signature(c: &mut Criterion) {
    let private_key = RsaPrivateKey::new(&mut rand::thread_rng(), 2048).unwrap();
    let anchor = TrustAnchor::from_key(private_key.to_public_key());
    let signing_key = BlindedSigningKey::<Sha512>::new(private_key);

    let body = br#"{"ranges":["198.51.100.0/24","203.0.113.0/24"],"timestamp":1700000000,"seed":"bench","ttl":60}"#;
    let signature = STANDARD.encode(signing_key.sign_with_rng(&mut rand::thread_rng(), body).to_bytes());

    c.bench_function("verify_signature_2048", |b| {
        b.iter(|| anchor.verify_signature(black_box(body), black_box(&signature)))
    });
}

criterion_group!(benches, bench_validate_range, bench_verify_signature);
criterion_main!(benches);
