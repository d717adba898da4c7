//! Throughput Benchmark for FlashBloom
//!
//! Measures the client-side hot paths that do not need a server: response
//! framing, reply decoding, command serialization and placement.

use criterion::{black_box, criterion_group, criterion_main, Criterion, Throughput};
use flashbloom::protocol::{decode, Command, FrameParser};
use flashbloom::routing::RoutingTable;
use flashbloom::server::ServerHandle;
use flashbloom::ServerAddr;
use std::sync::Arc;

/// Benchmark framing of single-line and block responses
fn bench_parse(c: &mut Criterion) {
    let parser = FrameParser::new();

    let mut group = c.benchmark_group("parse");

    let line = b"Yes\n";
    group.throughput(Throughput::Bytes(line.len() as u64));
    group.bench_function("line_short", |b| {
        b.iter(|| parser.parse(black_box(line)).unwrap());
    });

    let bulk: Vec<u8> = format!("{}\n", vec!["Yes"; 1000].join(" ")).into_bytes();
    group.throughput(Throughput::Bytes(bulk.len() as u64));
    group.bench_function("line_1000_bools", |b| {
        b.iter(|| parser.parse(black_box(&bulk)).unwrap());
    });

    let mut listing = String::from("START\n");
    for i in 0..1000 {
        listing.push_str(&format!("filter{} 0.000100 300046 100000 {}\n", i, i));
    }
    listing.push_str("END\n");
    let listing = listing.into_bytes();
    group.throughput(Throughput::Bytes(listing.len() as u64));
    group.bench_function("list_block_1000", |b| {
        b.iter(|| parser.parse(black_box(&listing)).unwrap());
    });

    group.finish();
}

/// Benchmark decoding frames against their commands
fn bench_decode(c: &mut Criterion) {
    let parser = FrameParser::new();
    let keys: Vec<String> = (0..1000).map(|i| format!("key:{}", i)).collect();
    let command = Command::multi("bench", keys);
    let response = format!("{}\n", vec!["No"; 1000].join(" ")).into_bytes();

    let mut group = c.benchmark_group("decode");
    group.throughput(Throughput::Elements(1000));
    group.bench_function("multi_1000", |b| {
        b.iter(|| {
            let (frame, _) = parser.parse(&response).unwrap().unwrap();
            decode(black_box(&command), frame).unwrap()
        });
    });
    group.finish();
}

/// Benchmark request serialization
fn bench_serialize(c: &mut Criterion) {
    let keys: Vec<String> = (0..1000).map(|i| format!("key:{}", i)).collect();
    let bulk = Command::bulk("bench", keys);
    let set = Command::set("bench", "alice");

    let mut group = c.benchmark_group("serialize");
    group.bench_function("set", |b| {
        let mut buf = Vec::with_capacity(64);
        b.iter(|| {
            buf.clear();
            black_box(&set).serialize_into(&mut buf);
        });
    });
    group.bench_function("bulk_1000", |b| {
        let mut buf = Vec::with_capacity(16 * 1024);
        b.iter(|| {
            buf.clear();
            black_box(&bulk).serialize_into(&mut buf);
        });
    });
    group.finish();
}

/// Benchmark least-loaded placement over a populated table
fn bench_placement(c: &mut Criterion) {
    let servers: Vec<Arc<ServerHandle>> = (0..16)
        .map(|i| Arc::new(ServerHandle::new(ServerAddr::new("10.0.0.1", 8673 + i), None)))
        .collect();

    let mut table = RoutingTable::new(None);
    for i in 0..10_000 {
        let server = &servers[i % servers.len()];
        table.insert(format!("filter{}", i), Arc::clone(server));
    }

    let mut group = c.benchmark_group("placement");
    group.bench_function("place_16_servers_10k_routes", |b| {
        b.iter(|| table.place(black_box(&servers)));
    });
    group.bench_function("lookup", |b| {
        b.iter(|| table.lookup(black_box("filter4242")).is_some());
    });
    group.finish();
}

criterion_group!(
    benches,
    bench_parse,
    bench_decode,
    bench_serialize,
    bench_placement
);
criterion_main!(benches);
