//! Access-path costs of the resource cache: hot hits and cold cycling.

use std::sync::{Arc, Weak};

use criterion::{criterion_group, criterion_main, Criterion};

use pyr_cache::{CacheBuilder, CacheConfig, CacheVariant, LruCache, VariantMember};

// ---

struct Payload {
    bytes: Vec<u8>,
}

#[derive(Clone)]
enum BenchResource {
    Payload(Arc<Payload>),
}

enum BenchResourceWeak {
    Empty,
    Payload(Weak<Payload>),
}

impl CacheVariant for BenchResource {
    type Weak = BenchResourceWeak;

    fn empty_weak() -> Self::Weak {
        BenchResourceWeak::Empty
    }

    fn downgrade(&self) -> Self::Weak {
        match self {
            Self::Payload(strong) => BenchResourceWeak::Payload(Arc::downgrade(strong)),
        }
    }

    fn upgrade(weak: &Self::Weak) -> Option<Self> {
        match weak {
            BenchResourceWeak::Empty => None,
            BenchResourceWeak::Payload(weak) => weak.upgrade().map(Self::Payload),
        }
    }

    fn size_bytes(&self) -> u64 {
        match self {
            Self::Payload(payload) => payload.bytes.len() as u64,
        }
    }

    fn type_name(&self) -> &'static str {
        "Payload"
    }
}

impl VariantMember<Payload> for BenchResource {
    fn pack(value: Arc<Payload>) -> Self {
        Self::Payload(value)
    }

    fn unpack(self) -> Option<Arc<Payload>> {
        match self {
            Self::Payload(payload) => Some(payload),
        }
    }
}

// ---

const PAYLOAD_SIZE: usize = 64 * 1024;
const NUM_RESOURCES: usize = 64;

fn build_cache(max_bytes: u64) -> (Arc<LruCache<BenchResource>>, Vec<pyr_cache::CacheableId>) {
    let builder = CacheBuilder::<BenchResource>::new(CacheConfig {
        max_bytes,
        loader_thread_count: 1,
    });
    let ids = (0..NUM_RESOURCES)
        .map(|i| {
            builder.register::<Payload>(move |_cache| {
                Ok(Payload {
                    bytes: vec![i as u8; PAYLOAD_SIZE],
                })
            })
        })
        .collect();
    (builder.build(), ids)
}

fn hot_get(c: &mut Criterion) {
    let (cache, ids) = build_cache(u64::MAX);
    let _pinned: Vec<_> = ids.iter().map(|id| cache.get::<Payload>(*id)).collect();

    c.bench_function("hot_get", |b| {
        let mut i = 0;
        b.iter(|| {
            i = (i + 1) % NUM_RESOURCES;
            criterion::black_box(cache.get::<Payload>(ids[i]).unwrap())
        });
    });
}

fn cold_cycle(c: &mut Criterion) {
    // A budget of half the working set forces eviction + reload every pass.
    let (cache, ids) = build_cache((NUM_RESOURCES / 2 * PAYLOAD_SIZE) as u64);

    c.bench_function("cold_cycle", |b| {
        b.iter(|| {
            for id in &ids {
                criterion::black_box(cache.get::<Payload>(*id).unwrap());
            }
        });
    });
}

criterion_group!(benches, hot_get, cold_cycle);
criterion_main!(benches);
