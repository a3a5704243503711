use std::{
    collections::HashSet,
    sync::{
        Arc, Barrier,
        atomic::{AtomicBool, Ordering},
    },
    thread,
};

use confmap_engine::{
    EmptyConfigStore, MappingIdentity, MappingProvider, MappingService, Properties, ProviderKey, ProviderRegistry, StaticProvider,
};
use serde_json::json;

const PROVIDERS: usize = 40;
const READERS: usize = 4;

fn indexed_provider(index: usize) -> Arc<StaticProvider> {
    Arc::new(StaticProvider::partial(
        format!("p{index}"),
        Properties::from([(format!("p{index}"), json!(index))]),
    ))
}

fn observed_indices(properties: &Properties) -> Vec<usize> {
    let mut indices: Vec<usize> = properties
        .keys()
        .map(|key| key.trim_start_matches('p').parse().expect("numeric suffix"))
        .collect();
    indices.sort_unstable();
    indices
}

/// A single writer binds p0..pN in order and then unbinds them in the same order,
/// so every state the registry passes through is a prefix `0..k` or a suffix
/// `k..N`. Readers must only ever observe one of those states.
#[test]
fn resolve_observes_only_real_registry_states() {
    let registry = Arc::new(ProviderRegistry::new());
    let service = MappingService::new(Arc::clone(&registry), Arc::new(EmptyConfigStore));
    let done = Arc::new(AtomicBool::new(false));
    let start = Arc::new(Barrier::new(READERS + 1));

    let readers: Vec<_> = (0..READERS)
        .map(|_| {
            let service = service.clone();
            let done = Arc::clone(&done);
            let start = Arc::clone(&start);
            thread::spawn(move || {
                let identity = MappingIdentity::new("ddf.concurrent");
                let mut observations = 0usize;
                start.wait();
                loop {
                    let finished = done.load(Ordering::Acquire);
                    let resolved = service.resolve(&identity).expect("partials never fail");
                    let indices = observed_indices(&resolved);
                    if let (Some(first), Some(last)) = (indices.first(), indices.last()) {
                        assert_eq!(last - first + 1, indices.len(), "gap in observed providers: {indices:?}");
                        assert!(*first == 0 || *last == PROVIDERS - 1, "observed a state that never existed: {indices:?}");
                    }
                    observations += 1;
                    if finished {
                        break;
                    }
                }
                observations
            })
        })
        .collect();

    start.wait();
    for index in 0..PROVIDERS {
        registry.bind(indexed_provider(index));
    }
    for index in 0..PROVIDERS {
        registry.unbind(&ProviderKey::new(format!("p{index}")));
    }
    done.store(true, Ordering::Release);

    for reader in readers {
        let observations = reader.join().expect("reader thread");
        assert!(observations > 0);
    }
    assert!(registry.is_empty());
    assert_eq!(registry.generation(), (PROVIDERS * 2) as u64);
}

/// Several writers churn their own providers while readers snapshot the registry.
/// Every snapshot must hold unique keys in rank/bind order.
#[test]
fn snapshots_stay_consistent_under_concurrent_churn() {
    let registry = Arc::new(ProviderRegistry::new());
    registry.bind(Arc::new(
        StaticProvider::full("base", Properties::from([("base".to_string(), json!(true))])).with_rank(100),
    ));
    let service = MappingService::new(Arc::clone(&registry), Arc::new(EmptyConfigStore));
    let done = Arc::new(AtomicBool::new(false));

    let writers: Vec<_> = (0..4)
        .map(|writer| {
            let registry = Arc::clone(&registry);
            thread::spawn(move || {
                let key = ProviderKey::new(format!("writer-{writer}"));
                for round in 0..200 {
                    let provider: Arc<dyn MappingProvider> = Arc::new(
                        StaticProvider::partial(key.clone(), Properties::from([(key.to_string(), json!(round))]))
                            .with_rank(round % 3),
                    );
                    if round % 2 == 0 {
                        registry.bind(provider);
                    } else {
                        registry.update(&key, Some(provider));
                        registry.unbind(&key);
                    }
                }
            })
        })
        .collect();

    let readers: Vec<_> = (0..READERS)
        .map(|_| {
            let registry = Arc::clone(&registry);
            let service = service.clone();
            let done = Arc::clone(&done);
            thread::spawn(move || {
                let identity = MappingIdentity::new("ddf.churn");
                while !done.load(Ordering::Acquire) {
                    let snapshot = registry.snapshot();
                    let mut seen = HashSet::new();
                    for entry in &snapshot.entries {
                        assert!(seen.insert(entry.key.clone()), "duplicate key {}", entry.key);
                    }
                    for pair in snapshot.entries.windows(2) {
                        let ordered = pair[0].rank > pair[1].rank || (pair[0].rank == pair[1].rank && pair[0].sequence < pair[1].sequence);
                        assert!(ordered, "snapshot out of order: {:?}", snapshot.entries);
                    }

                    let resolved = service.resolve(&identity).expect("resolution succeeds");
                    assert_eq!(resolved.get("base"), Some(&json!(true)));
                }
            })
        })
        .collect();

    for writer in writers {
        writer.join().expect("writer thread");
    }
    done.store(true, Ordering::Release);
    for reader in readers {
        reader.join().expect("reader thread");
    }

    assert_eq!(registry.keys(), vec![ProviderKey::from("base")]);
}

/// A writer keeps replacing one bound partial. Readers must always see the key it
/// contributes, holding either the old value or the new one.
#[test]
fn update_never_leaves_a_gap() {
    const ROUNDS: i64 = 500;
    let key = ProviderKey::from("rules/sts.yaml");
    let registry = Arc::new(ProviderRegistry::new());
    registry.bind(Arc::new(StaticProvider::partial(key.clone(), Properties::from([("k".to_string(), json!(0))]))));
    let service = MappingService::new(Arc::clone(&registry), Arc::new(EmptyConfigStore));
    let done = Arc::new(AtomicBool::new(false));
    let start = Arc::new(Barrier::new(READERS + 1));

    let readers: Vec<_> = (0..READERS)
        .map(|_| {
            let service = service.clone();
            let done = Arc::clone(&done);
            let start = Arc::clone(&start);
            thread::spawn(move || {
                let identity = MappingIdentity::new("ddf.security.sts");
                let mut last = 0i64;
                start.wait();
                loop {
                    let finished = done.load(Ordering::Acquire);
                    let resolved = service.resolve(&identity).expect("partials never fail");
                    let value = resolved
                        .get("k")
                        .and_then(|value| value.as_i64())
                        .unwrap_or_else(|| panic!("replacement left no provider: {resolved:?}"));
                    assert!((0..=ROUNDS).contains(&value));
                    assert!(value >= last, "observed {value} after {last}");
                    last = value;
                    if finished {
                        break;
                    }
                }
                last
            })
        })
        .collect();

    start.wait();
    for round in 1..=ROUNDS {
        let replacement: Arc<dyn MappingProvider> =
            Arc::new(StaticProvider::partial(key.clone(), Properties::from([("k".to_string(), json!(round))])));
        registry.update(&key, Some(replacement));
    }
    done.store(true, Ordering::Release);

    for reader in readers {
        assert_eq!(reader.join().expect("reader thread"), ROUNDS);
    }
    assert_eq!(registry.keys(), vec![key]);
}
