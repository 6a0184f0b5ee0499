//! Ordering and Isolation Tests
//!
//! Validates that concurrent engine construction never cross-assigns
//! instance channels and that replies arrive in request order.

use ipc::ChannelId;
use serde_json::json;
use std::collections::HashSet;
use std::sync::Arc;
use std::thread;
use tests_protocol::{negotiate, test_bootstrap};

/// Test: engines built concurrently each get their own worker instance
///
/// This validates that:
/// 1. Every handshake binds exactly one distinct instance
/// 2. Each engine talks only to the instance bound to its channels
#[test]
fn test_concurrent_construction() {
    let (service, worker) = test_bootstrap();
    let threads: Vec<_> = (0..16i64)
        .map(|n| {
            let service = Arc::clone(&service);
            thread::spawn(move || {
                let mut engine = negotiate(&service).expect("Failed to negotiate");
                engine.execute(&format!("mine = {}", n)).unwrap();
                let value = engine.evaluate("mine").unwrap();
                (engine.id(), n, value)
            })
        })
        .collect();

    let mut ids = HashSet::new();
    for handle in threads {
        let (id, n, value) = handle.join().unwrap();
        assert_eq!(value, json!(n));
        assert!(ids.insert(id));
    }

    let bound: HashSet<ChannelId> = worker.bound_instances().into_iter().collect();
    assert_eq!(bound, ids);
}

/// Test: a sequence of calls observes its own results in order
#[test]
fn test_replies_in_request_order() {
    let (service, _worker) = test_bootstrap();
    let mut engine = negotiate(&service).expect("Failed to negotiate");

    engine.execute("counter = 0").unwrap();
    for expected in 1..=50 {
        let value = engine.evaluate("counter = counter + 1").unwrap();
        assert_eq!(value, json!(expected));
    }
}

/// Test: interleaved engines on separate threads do not see each other's replies
#[test]
fn test_parallel_engines_isolated() {
    let (service, _worker) = test_bootstrap();
    let threads: Vec<_> = (1..=4i64)
        .map(|step| {
            let service = Arc::clone(&service);
            thread::spawn(move || {
                let mut engine = negotiate(&service).expect("Failed to negotiate");
                engine.execute("total = 0").unwrap();
                for i in 1..=25 {
                    let value = engine
                        .evaluate(&format!("total = total + {}", step))
                        .unwrap();
                    assert_eq!(value, json!(i * step));
                }
            })
        })
        .collect();

    for handle in threads {
        handle.join().unwrap();
    }
}
