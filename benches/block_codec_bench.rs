use criterion::{black_box, criterion_group, criterion_main, Criterion};
use zs::codec::{get_codec, CodecId};

fn bench_compress(c: &mut Criterion) {
    let data = vec![0x5au8; 1024 * 1024];
    for id in [CodecId::None, CodecId::Deflate, CodecId::Bz2, CodecId::Lzma] {
        let codec = get_codec(id);
        c.bench_function(&format!("{}_compress_1mb", id.name()), |b| {
            b.iter(|| codec.compress(black_box(&data)).unwrap())
        });
    }
}

fn bench_decompress(c: &mut Criterion) {
    let data = vec![0x5au8; 1024 * 1024];
    for id in [CodecId::None, CodecId::Deflate, CodecId::Bz2, CodecId::Lzma] {
        let codec = get_codec(id);
        let compressed = codec.compress(&data).unwrap();
        c.bench_function(&format!("{}_decompress_1mb", id.name()), |b| {
            b.iter(|| codec.decompress(black_box(&compressed)).unwrap())
        });
    }
}

criterion_group!(benches, bench_compress, bench_decompress);
criterion_main!(benches);
