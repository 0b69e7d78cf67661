use cachet_core::{CacheConfig, EvictionPolicyKind, ManualClock};
use cachet_engine::store::{EntryStore, InsertOptions};
use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion};
use std::hint::black_box;
use std::sync::Arc;

const CAPACITY: usize = 10_000;
const KEY_SPACE: u64 = 40_000;

fn bench_store(eviction: EvictionPolicyKind) -> EntryStore<u64, u64> {
    let config = CacheConfig::new(CAPACITY).with_eviction(eviction);
    let store = EntryStore::new(&config, Arc::new(ManualClock::new()));
    for key in 0..CAPACITY as u64 {
        let version = store.next_version();
        store.insert(key, key, InsertOptions::default(), version);
    }
    store
}

/// Cheap deterministic key stream skewed toward low keys.
fn next_key(state: &mut u64) -> u64 {
    *state ^= *state << 13;
    *state ^= *state >> 7;
    *state ^= *state << 17;
    let raw = *state % KEY_SPACE;
    if raw % 4 == 0 {
        raw
    } else {
        raw % (CAPACITY as u64 / 2)
    }
}

fn bench_eviction_policies(c: &mut Criterion) {
    let policies = [
        EvictionPolicyKind::Lru,
        EvictionPolicyKind::Lfu,
        EvictionPolicyKind::Fifo,
        EvictionPolicyKind::Hybrid,
    ];

    let mut group = c.benchmark_group("eviction/insert_full");
    for policy in policies {
        let store = bench_store(policy);
        let mut key = CAPACITY as u64;
        group.bench_with_input(BenchmarkId::from_parameter(policy), &policy, |b, _| {
            b.iter(|| {
                key += 1;
                let version = store.next_version();
                let outcome = store.insert(black_box(key), key, InsertOptions::default(), version);
                black_box(outcome.evicted.len());
            });
        });
    }
    group.finish();

    let mut group = c.benchmark_group("eviction/mixed_get_put");
    for policy in policies {
        let store = bench_store(policy);
        let mut state = 0x9E37_79B9_7F4A_7C15u64;
        group.bench_with_input(BenchmarkId::from_parameter(policy), &policy, |b, _| {
            b.iter(|| {
                let key = next_key(&mut state);
                if key % 8 == 0 {
                    let version = store.next_version();
                    black_box(store.insert(key, key, InsertOptions::default(), version));
                } else {
                    black_box(store.get(&key));
                }
            });
        });
    }
    group.finish();
}

criterion_group!(benches, bench_eviction_policies);
criterion_main!(benches);
