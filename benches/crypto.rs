use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use journalcrypt::crypto::{
    aead_decrypt, aead_encrypt, derive_key, random_iv, KdfParams, Salt, SecretKey, SystemRandom,
};

fn bench_aead(c: &mut Criterion) {
    let key = SecretKey::generate(&SystemRandom).unwrap();
    let mut group = c.benchmark_group("aes256gcm");

    for size in [1024usize, 64 * 1024, 1024 * 1024] {
        let plaintext = vec![0x5Au8; size];
        group.throughput(Throughput::Bytes(size as u64));

        group.bench_with_input(BenchmarkId::new("encrypt", size), &plaintext, |b, pt| {
            b.iter(|| {
                let iv = random_iv(&SystemRandom).unwrap();
                aead_encrypt(&key, &iv, black_box(pt), b"bench").unwrap()
            })
        });

        let iv = random_iv(&SystemRandom).unwrap();
        let (ciphertext, tag) = aead_encrypt(&key, &iv, &plaintext, b"bench").unwrap();
        group.bench_with_input(BenchmarkId::new("decrypt", size), &ciphertext, |b, ct| {
            b.iter(|| aead_decrypt(&key, &iv, black_box(ct), &tag, b"bench").unwrap())
        });
    }
    group.finish();
}

fn bench_kdf(c: &mut Criterion) {
    let salt = Salt::random(&SystemRandom).unwrap();
    let mut group = c.benchmark_group("kdf");
    group.sample_size(10);

    group.bench_function("argon2id-default", |b| {
        b.iter(|| derive_key(black_box(b"correcthorse"), &salt, &KdfParams::default()).unwrap())
    });
    group.bench_function("pbkdf2-fallback", |b| {
        b.iter(|| {
            derive_key(black_box(b"correcthorse"), &salt, &KdfParams::pbkdf2_default()).unwrap()
        })
    });
    group.finish();
}

criterion_group!(benches, bench_aead, bench_kdf);
criterion_main!(benches);
