//! Concurrency tests for queue claims
//!
//! Many workers race to claim the same job; the rename-based transition must
//! hand it to exactly one of them.

use std::sync::{Arc, Barrier};
use std::thread;

use job_coordination::{Bucket, JobPacket, QueueStatus, QueueStore};

const WORKERS: usize = 16;

/// Test: exactly one of many concurrent claims wins
#[test]
fn test_concurrent_claims_single_winner() {
    let dir = tempfile::TempDir::new().expect("Failed to create temp dir");
    let store = QueueStore::open(dir.path().join("queue")).unwrap().shared();
    let id = store.submit(&JobPacket::new("organize")).unwrap();

    let barrier = Arc::new(Barrier::new(WORKERS));
    let handles: Vec<_> = (0..WORKERS)
        .map(|_| {
            let store = Arc::clone(&store);
            let barrier = Arc::clone(&barrier);
            let id = id.clone();
            thread::spawn(move || {
                barrier.wait();
                store.claim(&id)
            })
        })
        .collect();

    let results: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();
    let winners = results.iter().filter(|r| r.is_ok()).count();
    assert_eq!(winners, 1, "exactly one claim should succeed");
    assert!(results
        .iter()
        .filter_map(|r| r.as_ref().err())
        .all(|e| e.is_not_found()));

    assert_eq!(store.current_status(&id).unwrap(), QueueStatus::Processing);
    assert!(store.list(Bucket::New).unwrap().is_empty());
    assert_eq!(store.list(Bucket::Claimed).unwrap(), vec![id]);
}

/// Test: racing claim and hold on one job leave it in exactly one bucket
#[test]
fn test_claim_and_hold_race() {
    let dir = tempfile::TempDir::new().expect("Failed to create temp dir");
    let store = QueueStore::open(dir.path().join("queue")).unwrap().shared();

    for _ in 0..20 {
        let id = store.submit(&JobPacket::new("organize")).unwrap();
        let barrier = Arc::new(Barrier::new(2));

        let claimer = {
            let (store, barrier, id) = (Arc::clone(&store), Arc::clone(&barrier), id.clone());
            thread::spawn(move || {
                barrier.wait();
                store.claim(&id).is_ok()
            })
        };
        let holder = {
            let (store, barrier, id) = (Arc::clone(&store), Arc::clone(&barrier), id.clone());
            thread::spawn(move || {
                barrier.wait();
                store.hold(&id).is_ok()
            })
        };

        let claimed = claimer.join().unwrap();
        let held = holder.join().unwrap();
        assert!(claimed ^ held, "exactly one transition should win");

        let buckets = Bucket::packet_buckets()
            .iter()
            .filter(|b| store.list(**b).unwrap().contains(&id))
            .count();
        assert_eq!(buckets, 1);
    }
}

/// Test: concurrent submits of distinct jobs all land in New
#[test]
fn test_concurrent_submits() {
    let dir = tempfile::TempDir::new().expect("Failed to create temp dir");
    let store = QueueStore::open(dir.path().join("queue")).unwrap().shared();

    let handles: Vec<_> = (0..WORKERS)
        .map(|i| {
            let store = Arc::clone(&store);
            thread::spawn(move || store.submit(&JobPacket::new(format!("organize {}", i))))
        })
        .collect();
    for handle in handles {
        handle.join().unwrap().unwrap();
    }

    let ids = store.list(Bucket::New).unwrap();
    assert_eq!(ids.len(), WORKERS);
    let mut sorted = ids.clone();
    sorted.sort();
    assert_eq!(ids, sorted);
}
