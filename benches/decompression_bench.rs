use criterion::{black_box, criterion_group, criterion_main, Criterion};
use dwarfs::codec::{decompress_all, Registry};
use dwarfs::section::CompressionType;

fn bench_decompression(c: &mut Criterion) {
    let registry = Registry::with_defaults();
    let original = vec![0x5au8; 1024 * 1024];

    let zstd_compressed = zstd::stream::encode_all(&original[..], 3).unwrap();
    c.bench_function("zstd_decompress_1mb", |b| {
        b.iter(|| decompress_all(&registry, CompressionType::Zstd, black_box(&zstd_compressed)).unwrap())
    });

    let lz4_compressed = lz4_flex::block::compress_prepend_size(&original);
    c.bench_function("lz4_decompress_1mb", |b| {
        b.iter(|| decompress_all(&registry, CompressionType::Lz4, black_box(&lz4_compressed)).unwrap())
    });

    c.bench_function("none_decompress_1mb", |b| {
        b.iter(|| decompress_all(&registry, CompressionType::None, black_box(&original)).unwrap())
    });
}

criterion_group!(benches, bench_decompression);
criterion_main!(benches);
