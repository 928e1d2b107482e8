//! Benchmarks for the DNS wire codec.

use criterion::{Criterion, black_box, criterion_group, criterion_main};
use hickory_proto::op::{Message, Query, ResponseCode};
use hickory_proto::rr::{Name, RecordType};
use hickory_proto::serialize::binary::BinEncodable;
use std::net::SocketAddr;
use std::str::FromStr;

use sinkhole::config::AaaaPolicy;
use sinkhole::dns::codec;

fn create_query(domain: &str, query_type: RecordType) -> Vec<u8> {
    let mut query = Query::new();
    query.set_name(Name::from_str(domain).unwrap());
    query.set_query_type(query_type);

    let mut message = Message::new();
    message.set_id(1234).set_recursion_desired(true);
    message.add_query(query);
    message.to_bytes().unwrap()
}

fn bench_decode(c: &mut Criterion) {
    let mut group = c.benchmark_group("decode");
    let source: SocketAddr = "192.168.1.50:40000".parse().unwrap();

    let short = create_query("github.com", RecordType::A);
    group.bench_function("short_name", |b| {
        b.iter(|| codec::decode(black_box(&short), source));
    });

    let long = create_query(
        "a1.b2.c3.d4.pagead2.googlesyndication.com",
        RecordType::AAAA,
    );
    group.bench_function("long_name", |b| {
        b.iter(|| codec::decode(black_box(&long), source));
    });

    group.finish();
}

fn bench_encode(c: &mut Criterion) {
    let mut group = c.benchmark_group("encode");
    let source: SocketAddr = "192.168.1.50:40000".parse().unwrap();
    let query = codec::decode(&create_query("pagead2.googlesyndication.com", RecordType::A), source)
        .unwrap();
    let upstream = create_query("pagead2.googlesyndication.com", RecordType::A);

    group.bench_function("blocked", |b| {
        b.iter(|| codec::encode_blocked(black_box(&query), 300, AaaaPolicy::NullAddress));
    });
    group.bench_function("forwarded", |b| {
        b.iter(|| codec::encode_forwarded_answer(black_box(&query), black_box(&upstream)));
    });
    group.bench_function("servfail", |b| {
        b.iter(|| codec::encode_error(black_box(&query), ResponseCode::ServFail));
    });

    group.finish();
}

criterion_group!(benches, bench_decode, bench_encode);
criterion_main!(benches);
