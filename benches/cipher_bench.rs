//! Cipher throughput benchmarks.
//!
//! Run with: cargo bench

use criterion::{black_box, criterion_group, criterion_main, Criterion, Throughput};
use ss_relay::cipher::{CipherKind, CipherPair};

const PAYLOAD_SIZES: &[usize] = &[1024, 16 * 1024, 256 * 1024];

fn bench_encrypt(c: &mut Criterion) {
    let password = b"correct horse battery staple";
    let mut group = c.benchmark_group("cipher_encrypt");

    for kind in [
        CipherKind::Aes128Cfb,
        CipherKind::Aes256Cfb,
        CipherKind::Aes256Cfb8,
        CipherKind::Aes256Ctr,
        CipherKind::BfCfb,
        CipherKind::Rc4Md5,
    ] {
        for &size in PAYLOAD_SIZES {
            group.throughput(Throughput::Bytes(size as u64));
            group.bench_function(format!("{kind:?}/{size}"), |b| {
                let payload = vec![0x42u8; size];
                b.iter(|| {
                    let mut pair = CipherPair::new(kind, password);
                    black_box(pair.encryptor.encrypt(&payload))
                });
            });
        }
    }
    group.finish();
}

fn bench_decrypt(c: &mut Criterion) {
    let password = b"correct horse battery staple";
    let mut group = c.benchmark_group("cipher_decrypt");

    for kind in [CipherKind::Aes256Cfb, CipherKind::Aes256Ctr, CipherKind::Rc4Md5] {
        for &size in PAYLOAD_SIZES {
            let mut client = CipherPair::new(kind, password);
            let on_wire = client.encryptor.encrypt(&vec![0x7eu8; size]);

            group.throughput(Throughput::Bytes(size as u64));
            group.bench_function(format!("{kind:?}/{size}"), |b| {
                b.iter(|| {
                    let mut server = CipherPair::new(kind, password);
                    black_box(server.decryptor.decrypt(&on_wire))
                });
            });
        }
    }
    group.finish();
}

criterion_group!(benches, bench_encrypt, bench_decrypt);
criterion_main!(benches);
