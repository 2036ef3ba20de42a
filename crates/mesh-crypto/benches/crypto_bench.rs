use criterion::{BenchmarkId, Criterion, Throughput, criterion_group, criterion_main};
use mesh_crypto::aes_ccm::{self, MicSize};
use mesh_crypto::aes_cmac::{aes_cmac, k1, s1};
use mesh_crypto::p256::P256PrivateKey;
use mesh_crypto::{Algorithm, CryptoProvider, MeshCrypto, SharedSecret};

fn bench_kdf(c: &mut Criterion) {
    let mut group = c.benchmark_group("kdf");

    let key = [0x42u8; 16];
    let inputs = vec![0xABu8; 145];

    group.throughput(Throughput::Bytes(inputs.len() as u64));
    group.bench_function("aes_cmac_145B", |b| b.iter(|| aes_cmac(&key, &inputs)));
    group.bench_function("s1_145B", |b| b.iter(|| s1(&inputs)));
    group.bench_function("k1", |b| {
        let salt = s1(b"salt");
        b.iter(|| k1(&[0x11; 32], &salt, b"prck"));
    });

    group.finish();
}

fn bench_ccm(c: &mut Criterion) {
    let mut group = c.benchmark_group("aes_ccm");

    let key = [0x42u8; 16];
    let nonce = [0x13u8; 13];
    let data_25 = vec![0xABu8; 25];
    let data_380 = vec![0xABu8; 380];

    for (label, data) in [("25B", &data_25), ("380B", &data_380)] {
        group.throughput(Throughput::Bytes(data.len() as u64));
        group.bench_with_input(BenchmarkId::new("encrypt_mic64", label), data, |b, d| {
            b.iter(|| aes_ccm::encrypt(&key, &nonce, d, &[], MicSize::Bits64));
        });
    }

    group.finish();
}

fn bench_provisioning(c: &mut Criterion) {
    let mut group = c.benchmark_group("provisioning");
    let crypto = MeshCrypto;

    group.bench_function("p256_generate", |b| b.iter(P256PrivateKey::generate));

    let ours = P256PrivateKey::generate();
    let theirs = P256PrivateKey::generate().public_key();
    group.bench_function("p256_ecdh", |b| b.iter(|| ours.diffie_hellman(&theirs)));

    let secret = SharedSecret::new([0x55; 32]);
    let inputs = vec![0u8; 145];
    group.bench_function("confirmation_cmac", |b| {
        b.iter(|| {
            crypto.confirmation(
                Algorithm::EcdhP256CmacAes128,
                &inputs,
                &secret,
                &[1; 16],
                &[0; 16],
            )
        });
    });

    group.finish();
}

criterion_group!(benches, bench_kdf, bench_ccm, bench_provisioning);
criterion_main!(benches);
