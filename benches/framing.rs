use criterion::{black_box, criterion_group, criterion_main, Criterion, Throughput};
use commlink::{Checksum, Framer, FramerConfig, LengthWidth};

fn bench_encode(c: &mut Criterion) {
    let mut group = c.benchmark_group("framing");

    for (label, checksum) in [
        ("none", Checksum::None),
        ("xor", Checksum::Xor),
        ("crc16", Checksum::Crc16),
    ] {
        let config = FramerConfig::length_prefixed(LengthWidth::U16, checksum);
        let framer = Framer::new(config).unwrap();
        let payload = vec![0xA5u8; 1024];
        group.throughput(Throughput::Bytes(1024));
        group.bench_function(format!("encode_1kb_{label}"), |b| {
            b.iter(|| {
                black_box(framer.encode(black_box(&payload)).unwrap());
            });
        });
    }

    group.finish();
}

fn bench_decode(c: &mut Criterion) {
    let mut group = c.benchmark_group("framing");

    // 64 CRC frames of 256 bytes fed in one chunk
    let config = FramerConfig::length_prefixed(LengthWidth::U16, Checksum::Crc16);
    let encoder = Framer::new(config.clone()).unwrap();
    let mut stream = Vec::new();
    for _ in 0..64 {
        stream.extend_from_slice(&encoder.encode(&[0x5Au8; 256]).unwrap());
    }
    group.throughput(Throughput::Bytes(stream.len() as u64));
    group.bench_function("decode_64x256b_crc16", |b| {
        let mut framer = Framer::new(config.clone()).unwrap();
        b.iter(|| {
            let frames = framer.feed(black_box(&stream)).count();
            black_box(frames);
        });
    });

    // Text lines split into small reads
    let mut lines = Vec::new();
    for i in 0..128 {
        lines.extend_from_slice(format!("MEAS:VOLT {i}.125\r\n").as_bytes());
    }
    group.throughput(Throughput::Bytes(lines.len() as u64));
    group.bench_function("decode_lines_16b_reads", |b| {
        let mut framer = Framer::new(FramerConfig::lines()).unwrap();
        b.iter(|| {
            let mut frames = 0;
            for chunk in lines.chunks(16) {
                frames += framer.feed(black_box(chunk)).count();
            }
            black_box(frames);
        });
    });

    group.finish();
}

criterion_group!(benches, bench_encode, bench_decode);
criterion_main!(benches);
