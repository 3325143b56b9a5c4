//! Xi 码流分析性能基准测试.
//!
//! 覆盖起始码扫描、RBSP 提取、Exp-Golomb 读取与整段码流分析等热点路径.

use criterion::{Criterion, Throughput, black_box, criterion_group, criterion_main};
use xi::bitstream::scan::insert_emulation_prevention;
use xi::bitstream::{Codec, extract_rbsp, scan_units};
use xi::core::BitReader;
use xi::core::bitwriter::BitWriter;

/// 构造含 n 个单元的 Annex B 码流, 每个单元 `unit_len` 字节
fn make_annex_b(n: usize, unit_len: usize) -> Vec<u8> {
    let mut data = Vec::with_capacity(n * (unit_len + 4));
    for i in 0..n {
        data.extend_from_slice(&[0x00, 0x00, 0x00, 0x01, 0x41]);
        data.extend((1..unit_len).map(|j| ((i * 31 + j * 7) % 251) as u8 | 0x01));
    }
    data
}

/// 构造含大量 00 00 0x 序列的负载
fn make_escaped_payload(len: usize) -> Vec<u8> {
    let rbsp: Vec<u8> = (0..len)
        .map(|i| if i % 5 < 3 { 0x00 } else { (i % 4) as u8 })
        .collect();
    insert_emulation_prevention(&rbsp)
}

fn make_ue_stream(count: u32) -> Vec<u8> {
    let mut bw = BitWriter::new();
    for i in 0..count {
        bw.write_ue(i % 1024);
    }
    bw.write_trailing_bits();
    bw.finish()
}

fn bench_scan_units(c: &mut Criterion) {
    let data = make_annex_b(2000, 512);
    let mut group = c.benchmark_group("scan");
    group.throughput(Throughput::Bytes(data.len() as u64));
    group.bench_function("scan_units_2000x512", |b| {
        b.iter(|| scan_units(black_box(&data)).count());
    });
    group.finish();
}

fn bench_extract_rbsp(c: &mut Criterion) {
    let payload = make_escaped_payload(64 * 1024);
    let mut group = c.benchmark_group("rbsp");
    group.throughput(Throughput::Bytes(payload.len() as u64));
    group.bench_function("extract_rbsp_64k", |b| {
        b.iter(|| extract_rbsp(black_box(&payload)));
    });
    group.finish();
}

fn bench_read_ue(c: &mut Criterion) {
    let data = make_ue_stream(10_000);
    c.bench_function("read_ue_10000", |b| {
        b.iter(|| {
            let mut r = BitReader::new(black_box(&data));
            let mut sum = 0u64;
            for _ in 0..10_000 {
                sum += u64::from(r.ue("v").unwrap());
            }
            sum
        });
    });
}

fn bench_analyze(c: &mut Criterion) {
    let data = make_annex_b(500, 256);
    c.bench_function("analyze_avc_500_units", |b| {
        b.iter(|| xi::analyze(Codec::Avc, black_box(&data)).total_units());
    });
}

criterion_group!(
    benches,
    bench_scan_units,
    bench_extract_rbsp,
    bench_read_ue,
    bench_analyze,
);
criterion_main!(benches);
