// Key derivation and version signing benchmarks for the DeRec core.
//
// Covers master key generation, BIP44 paths of increasing depth, and the
// per-version ECDSA signature every update pays for.

use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion};

use derec_protocol::crypto::{DerivationPath, KeyDeriver};

const SEED: &str = "000102030405060708090a0b0c0d0e0f";

fn bench_master_key(c: &mut Criterion) {
    let seed = hex::decode(SEED).unwrap();
    c.bench_function("bip32/master_from_seed", |b| {
        b.iter(|| KeyDeriver::from_seed(&seed).unwrap());
    });
}

fn bench_derive_depth(c: &mut Criterion) {
    let deriver = KeyDeriver::from_hex_seed(SEED).unwrap();
    let mut group = c.benchmark_group("bip32/derive_path");
    for path in ["m/44'", "m/44'/3'/0'", "m/44'/3'/0'/0/1", "m/0'/1/2'/2/1000000000"] {
        let parsed: DerivationPath = path.parse().unwrap();
        group.bench_with_input(BenchmarkId::from_parameter(path), &parsed, |b, p| {
            b.iter(|| deriver.derive_path(p).unwrap());
        });
    }
    group.finish();
}

fn bench_helper_key(c: &mut Criterion) {
    let deriver = KeyDeriver::from_hex_seed(SEED).unwrap();
    let relative: DerivationPath = "0'/0/7".parse().unwrap();
    c.bench_function("bip44/helper_key", |b| {
        b.iter(|| deriver.derive(3, &relative).unwrap());
    });
}

fn bench_version_signature(c: &mut Criterion) {
    let deriver = KeyDeriver::from_hex_seed(SEED).unwrap();
    let key = deriver.derive(3, &"0'/1/1".parse().unwrap()).unwrap();
    let message = [0x42u8; 56];
    let signature = key.sign(&message).unwrap();

    c.bench_function("ecdsa/sign_version", |b| {
        b.iter(|| key.sign(&message).unwrap());
    });
    c.bench_function("ecdsa/verify_version", |b| {
        b.iter(|| key.public_key().verify(&message, &signature));
    });
}

criterion_group!(
    benches,
    bench_master_key,
    bench_derive_depth,
    bench_helper_key,
    bench_version_signature
);
criterion_main!(benches);
