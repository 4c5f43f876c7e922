use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use docnum_guard::{
    validate, AllocatorConfig, CallerId, CircuitBreaker, EndpointClass, InMemoryCounterStore,
    Metrics, NumberScope, Policy, RateKey, RateLimiter, SequenceAllocator, ShardedStorage,
    SystemClock, WindowRegistry, WindowStorage,
};
use std::sync::Arc;
use std::time::Duration;

fn limiter(policy: Policy) -> RateLimiter<WindowStorage> {
    let storage: WindowStorage = Arc::new(ShardedStorage::<RateKey, Policy>::new());
    let registry = WindowRegistry::new(storage, Arc::new(SystemClock::new()), policy);
    RateLimiter::new(registry, Metrics::new(), Arc::new(CircuitBreaker::new()))
}

fn allocator() -> SequenceAllocator {
    SequenceAllocator::new(
        Arc::new(InMemoryCounterStore::new()),
        AllocatorConfig::default(),
        Metrics::new(),
    )
}

/// Benchmark prefix and suffix validation
fn bench_validation(c: &mut Criterion) {
    let mut group = c.benchmark_group("validation");

    group.bench_function("ascii", |b| {
        b.iter(|| validate(black_box("DOC"), black_box("/2025-ABC")))
    });

    group.bench_function("local_script", |b| {
        b.iter(|| validate(black_box("หนังสือสัญญา"), black_box("/ปี_2568")))
    });

    group.finish();
}

/// Benchmark single-threaded admission throughput per policy
fn bench_single_threaded_admission(c: &mut Criterion) {
    let mut group = c.benchmark_group("single_threaded");

    for policy_type in ["token_bucket", "sliding_window", "fixed_window"].iter() {
        let policy = match *policy_type {
            "token_bucket" => Policy::token_bucket(100.0, 10.0),
            "sliding_window" => Policy::sliding_window(100, Duration::from_secs(60)),
            "fixed_window" => Policy::fixed_window(100, Duration::from_secs(60)),
            _ => unreachable!(),
        }
        .unwrap();

        group.throughput(Throughput::Elements(1000));

        group.bench_with_input(
            BenchmarkId::new("admission_decisions", policy_type),
            &policy,
            |b, policy| {
                let limiter = limiter(policy.clone());
                let caller = CallerId::new("alice");
                let endpoint = EndpointClass::new("list");

                b.iter(|| {
                    for _ in 0..1000 {
                        let _ = black_box(limiter.admit_now(black_box(&caller), black_box(&endpoint)));
                    }
                })
            },
        );
    }

    group.finish();
}

/// Benchmark multi-threaded admission, one caller per thread
fn bench_concurrent_admission(c: &mut Criterion) {
    let mut group = c.benchmark_group("concurrent");

    for num_threads in [2, 4, 8].iter() {
        group.throughput(Throughput::Elements((*num_threads as u64) * 1000));

        group.bench_with_input(
            BenchmarkId::new("threads", num_threads),
            num_threads,
            |b, &num_threads| {
                b.iter(|| {
                    let limiter = Arc::new(limiter(Policy::default()));

                    let mut handles = vec![];
                    for i in 0..num_threads {
                        let limiter = Arc::clone(&limiter);
                        let handle = std::thread::spawn(move || {
                            // Each thread uses its own caller to avoid contention
                            let caller = CallerId::new(format!("caller-{}", i));
                            let endpoint = EndpointClass::new("list");
                            for _ in 0..1000 {
                                let _ = black_box(limiter.admit_now(&caller, &endpoint));
                            }
                        });
                        handles.push(handle);
                    }

                    for handle in handles {
                        handle.join().unwrap();
                    }
                })
            },
        );
    }

    group.finish();
}

/// Benchmark number allocation on one hot scope and across many scopes
fn bench_allocation(c: &mut Criterion) {
    let mut group = c.benchmark_group("allocation");
    group.throughput(Throughput::Elements(1000));

    group.bench_function("single_scope", |b| {
        let allocator = allocator();
        let scope = NumberScope::new("DOC", "/2025", "2025").unwrap();

        b.iter(|| {
            for _ in 0..1000 {
                black_box(allocator.allocate(black_box(&scope)).unwrap());
            }
        })
    });

    group.bench_function("100_scopes", |b| {
        let allocator = allocator();
        let scopes: Vec<_> = (0..100)
            .map(|i| NumberScope::new(format!("P{}", i), "", "2025").unwrap())
            .collect();

        b.iter(|| {
            for i in 0..1000 {
                black_box(allocator.allocate(&scopes[i % 100]).unwrap());
            }
        })
    });

    group.finish();
}

criterion_group!(
    benches,
    bench_validation,
    bench_single_threaded_admission,
    bench_concurrent_admission,
    bench_allocation,
);
criterion_main!(benches);
