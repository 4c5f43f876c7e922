use docnum_guard::infrastructure::mocks::FlakyCounterStore;
use docnum_guard::{
    validate, AllocationError, AllocatorConfig, DocumentNumber, GenerateRequest,
    InMemoryCounterStore, Metrics, NumberScope, ScopeKey, SequenceAllocator, ValidationError,
};
use std::collections::HashSet;
use std::sync::{Arc, Barrier};
use std::thread;
use std::time::Duration;

fn allocator(enabled: bool) -> Arc<SequenceAllocator> {
    Arc::new(SequenceAllocator::new(
        Arc::new(InMemoryCounterStore::with_lock_timeout(Duration::from_secs(5))),
        AllocatorConfig {
            enabled,
            ..AllocatorConfig::default()
        },
        Metrics::new(),
    ))
}

#[test]
fn test_concurrent_allocation_is_unique_and_gap_free() {
    let allocator = allocator(false);
    let scope = NumberScope::new("DOC", "/2025", "2025").unwrap();
    let barrier = Arc::new(Barrier::new(16));
    let mut handles = vec![];

    for _ in 0..16 {
        let allocator = Arc::clone(&allocator);
        let scope = scope.clone();
        let barrier = Arc::clone(&barrier);
        handles.push(thread::spawn(move || {
            barrier.wait();
            (0..200)
                .map(|_| allocator.allocate(&scope).unwrap().get())
                .collect::<Vec<_>>()
        }));
    }

    let mut issued: Vec<u64> = handles
        .into_iter()
        .flat_map(|h| h.join().unwrap())
        .collect();
    issued.sort_unstable();

    assert_eq!(issued, (1..=3200).collect::<Vec<_>>());
    assert_eq!(
        allocator.current(scope.key()).unwrap(),
        Some(DocumentNumber::new(3200))
    );
}

#[test]
fn test_each_thread_sees_increasing_numbers() {
    let allocator = allocator(false);
    let scope = NumberScope::new("DOC", "", "").unwrap();
    let mut handles = vec![];

    for _ in 0..4 {
        let allocator = Arc::clone(&allocator);
        let scope = scope.clone();
        handles.push(thread::spawn(move || {
            let numbers: Vec<u64> = (0..100)
                .map(|_| allocator.allocate(&scope).unwrap().get())
                .collect();
            numbers.windows(2).all(|pair| pair[0] < pair[1])
        }));
    }

    for handle in handles {
        assert!(handle.join().unwrap());
    }
}

#[test]
fn test_cross_scope_allocation_is_independent() {
    let allocator = allocator(false);
    let scopes: Vec<NumberScope> = ["DOC", "MOU", "INV", "ใบเสร็จ"]
        .iter()
        .map(|prefix| NumberScope::new(*prefix, "", "2025").unwrap())
        .collect();
    let mut handles = vec![];

    for scope in scopes.clone() {
        let allocator = Arc::clone(&allocator);
        handles.push(thread::spawn(move || {
            for _ in 0..250 {
                allocator.allocate(&scope).unwrap();
            }
        }));
    }
    for handle in handles {
        handle.join().unwrap();
    }

    for scope in &scopes {
        assert_eq!(
            allocator.current(scope.key()).unwrap(),
            Some(DocumentNumber::new(250))
        );
    }
}

#[test]
fn test_periods_are_separate_counters() {
    let allocator = allocator(false);
    let y2024 = NumberScope::new("DOC", "/2024", "2024").unwrap();
    let y2025 = NumberScope::new("DOC", "/2025", "2025").unwrap();

    allocator.allocate(&y2024).unwrap();
    allocator.allocate(&y2024).unwrap();
    assert_eq!(allocator.allocate(&y2025).unwrap(), DocumentNumber::new(1));
    assert_eq!(
        allocator.current(&ScopeKey::new("DOC", "2024").unwrap()).unwrap(),
        Some(DocumentNumber::new(2))
    );
}

#[test]
fn test_validator_grammar() {
    for prefix in ["ABC", "DOC", "เอกสาร", "ฝ่าย_1-ก", "2025", "A-B_C"] {
        assert!(validate(prefix, "").is_ok(), "prefix {prefix:?} should pass");
    }
    for prefix in ["", "ABC ", "ABC@", "DOC/1", "DÖC"] {
        assert!(
            matches!(validate(prefix, ""), Err(ValidationError::InvalidPrefix { .. })),
            "prefix {prefix:?} should fail"
        );
    }

    for suffix in ["", "/2025", "/2025-ABC", "/ปี_2568"] {
        assert!(validate("DOC", suffix).is_ok(), "suffix {suffix:?} should pass");
    }
    for suffix in ["2025 ", "/20#25", "\t"] {
        assert!(
            matches!(validate("DOC", suffix), Err(ValidationError::InvalidSuffix { .. })),
            "suffix {suffix:?} should fail"
        );
    }
}

#[test]
fn test_disabled_generate_never_issues_numbers() {
    let allocator = allocator(false);
    let mut handles = vec![];

    for i in 0..8 {
        let allocator = Arc::clone(&allocator);
        handles.push(thread::spawn(move || {
            let requests = [
                GenerateRequest::new("DOC", "/2025", "2025"),
                GenerateRequest::new(format!("P{i}"), "", ""),
                GenerateRequest::new("bad prefix", "bad suffix", "?"),
            ];
            requests
                .iter()
                .cycle()
                .take(30)
                .all(|request| allocator.generate(request) == Err(AllocationError::AllocationDisabled))
        }));
    }

    for handle in handles {
        assert!(handle.join().unwrap());
    }
    assert_eq!(
        allocator.current(&ScopeKey::new("DOC", "2025").unwrap()).unwrap(),
        None
    );
}

#[test]
fn test_transient_failures_do_not_burn_numbers() {
    let allocator = SequenceAllocator::new(
        Arc::new(FlakyCounterStore::unavailable(3)),
        AllocatorConfig::default(),
        Metrics::new(),
    );
    let scope = NumberScope::new("DOC", "", "").unwrap();

    let mut issued = HashSet::new();
    let mut failures = 0;
    for _ in 0..10 {
        match allocator.allocate(&scope) {
            Ok(number) => {
                issued.insert(number.get());
            }
            Err(error) => {
                assert!(error.is_retryable());
                failures += 1;
            }
        }
    }

    assert_eq!(failures, 3);
    assert_eq!(issued, (1..=7).collect());
}

#[test]
fn test_overflow_is_reported_and_never_wraps() {
    let allocator = SequenceAllocator::new(
        Arc::new(InMemoryCounterStore::new()),
        AllocatorConfig {
            starting_number: u64::MAX - 1,
            ..AllocatorConfig::default()
        },
        Metrics::new(),
    );
    let scope = NumberScope::new("DOC", "", "2025").unwrap();
    let other = NumberScope::new("MOU", "", "2025").unwrap();

    assert_eq!(allocator.allocate(&scope).unwrap().get(), u64::MAX - 1);
    assert_eq!(allocator.allocate(&scope).unwrap().get(), u64::MAX);

    for _ in 0..3 {
        let err = allocator.allocate(&scope).unwrap_err();
        assert_eq!(
            err,
            AllocationError::CounterOverflow {
                scope: scope.key().clone()
            }
        );
        assert!(!err.is_retryable());
    }
    assert_eq!(
        allocator.current(scope.key()).unwrap(),
        Some(DocumentNumber::new(u64::MAX))
    );

    // An exhausted scope does not affect its neighbours
    assert_eq!(allocator.allocate(&other).unwrap().get(), u64::MAX - 1);
}
