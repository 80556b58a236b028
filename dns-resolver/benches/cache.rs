use criterion::{black_box, criterion_group, criterion_main, Criterion};
use std::net::Ipv4Addr;

use dns_resolver::cache::Cache;
use dns_types::protocol::types::*;

fn domain(name: &str) -> DomainName {
    DomainName::from_dotted_string(name).unwrap()
}

fn a_record(name: &str, address: Ipv4Addr, ttl: u32) -> ResourceRecord {
    ResourceRecord {
        name: domain(name),
        rtype_with_data: RecordTypeWithData::A { address },
        rclass: RecordClass::IN,
        ttl,
    }
}

#[allow(non_snake_case)]
fn bench__insert(c: &mut Criterion) {
    c.bench_function("cache/insert", |b| {
        b.iter_batched(
            Cache::new,
            |mut cache| {
                for i in 0..1_000u32 {
                    cache.insert(&a_record(
                        &format!("host-{i}.example.com."),
                        Ipv4Addr::new(10, 0, 0, 1),
                        300,
                    ));
                }
                cache
            },
            criterion::BatchSize::SmallInput,
        )
    });
}

#[allow(non_snake_case)]
fn bench__get_hit(c: &mut Criterion) {
    let mut cache = Cache::new();
    for i in 0..1_000u32 {
        cache.insert(&a_record(
            &format!("host-{i}.example.com."),
            Ipv4Addr::new(10, 0, 0, 1),
            300,
        ));
    }
    let name = domain("host-500.example.com.");

    c.bench_function("cache/get/hit", |b| {
        b.iter(|| cache.get(black_box(&name), QueryType::Record(RecordType::A)))
    });
}

#[allow(non_snake_case)]
fn bench__get_miss(c: &mut Criterion) {
    let mut cache = Cache::new();
    for i in 0..1_000u32 {
        cache.insert(&a_record(
            &format!("host-{i}.example.com."),
            Ipv4Addr::new(10, 0, 0, 1),
            300,
        ));
    }
    let name = domain("not-present.example.com.");

    c.bench_function("cache/get/miss", |b| {
        b.iter(|| cache.get(black_box(&name), QueryType::Record(RecordType::A)))
    });
}

#[allow(non_snake_case)]
fn bench__prune(c: &mut Criterion) {
    c.bench_function("cache/prune", |b| {
        b.iter_batched(
            || {
                let mut cache = Cache::with_desired_size(500);
                for i in 0..1_000u32 {
                    cache.insert(&a_record(
                        &format!("host-{i}.example.com."),
                        Ipv4Addr::new(10, 0, 0, 1),
                        300,
                    ));
                }
                cache
            },
            |mut cache| cache.prune(),
            criterion::BatchSize::SmallInput,
        )
    });
}

criterion_group!(
    benches,
    bench__insert,
    bench__get_hit,
    bench__get_miss,
    bench__prune,
);
criterion_main!(benches);
