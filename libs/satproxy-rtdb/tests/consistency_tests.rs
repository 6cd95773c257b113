//! Snapshot-isolation tests for RegisterStore
//!
//! Readers must observe either none or all of a committed transaction, and
//! unrelated outstations must make progress independently.

// Allow unwrap() in tests for cleaner test code
#![allow(clippy::disallowed_methods)]

use satproxy_rtdb::{FixedTimeProvider, RegisterStore, Validity};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

fn new_store() -> Arc<RegisterStore> {
    Arc::new(RegisterStore::new(
        Some(Duration::from_secs(900)),
        Arc::new(FixedTimeProvider::new(1_700_000_000_000)),
    ))
}

// ============================================================================
// Atomic publication
// ============================================================================

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_paired_writes_are_never_torn() {
    let store = new_store();
    store.update("A1", |tx| {
        tx.put(0, vec![0], 0.0, 0);
        tx.put(1, vec![0], 0.0, 0);
        tx.put(2, vec![777], 777.0, 0);
        tx.touch_contact(0);
    });

    let done = Arc::new(AtomicBool::new(false));

    let writer = {
        let store = store.clone();
        let done = done.clone();
        tokio::spawn(async move {
            for k in 1..=2_000u16 {
                store.update("A1", |tx| {
                    tx.put(0, vec![k], f64::from(k), i64::from(k));
                    tx.put(1, vec![k], f64::from(k), i64::from(k));
                    tx.touch_contact(i64::from(k));
                });
                if k % 64 == 0 {
                    tokio::task::yield_now().await;
                }
            }
            done.store(true, Ordering::SeqCst);
        })
    };

    let mut readers = Vec::new();
    for _ in 0..3 {
        let store = store.clone();
        let done = done.clone();
        readers.push(tokio::spawn(async move {
            let mut observed = 0u64;
            while !done.load(Ordering::SeqCst) {
                let view = store.view("A1").unwrap();
                let a = view.get(0).unwrap();
                let b = view.get(1).unwrap();
                assert_eq!(a.raw, b.raw, "torn read between index 0 and 1");
                assert_eq!(a.sequence, b.sequence);
                assert_eq!(view.get(2).unwrap().raw, vec![777]);
                observed += 1;
                tokio::task::yield_now().await;
            }
            observed
        }));
    }

    writer.await.unwrap();
    for reader in readers {
        reader.await.unwrap();
    }

    let final_value = store.get("A1", 0).unwrap();
    assert_eq!(final_value.raw, vec![2_000]);
    assert_eq!(final_value.validity, Validity::Valid);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_writers_same_outstation_serialize() {
    let store = new_store();

    let mut handles = Vec::new();
    for writer in 0..4u32 {
        let store = store.clone();
        handles.push(tokio::spawn(async move {
            for i in 0..250u32 {
                let index = writer * 1_000 + i;
                store.update("A1", |tx| tx.put(index, vec![1], 1.0, 1));
            }
        }));
    }
    for handle in handles {
        handle.await.unwrap();
    }

    // No write lost: each transaction saw the previous one's output
    let snapshot = store.snapshot("A1").unwrap();
    assert_eq!(snapshot.value_count(), 1_000);
    assert_eq!(snapshot.generation, 1_000);
    assert_eq!(snapshot.accepted_total, 1_000);
}

// ============================================================================
// Independence across outstations
// ============================================================================

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_outstations_are_independent() {
    let store = new_store();

    let mut handles = Vec::new();
    for id in ["A1", "B2", "C3", "D4"] {
        let store = store.clone();
        handles.push(tokio::spawn(async move {
            for k in 0..500u16 {
                store.update(id, |tx| {
                    tx.put(0, vec![k], f64::from(k), i64::from(k));
                    tx.touch_contact(i64::from(k));
                });
            }
        }));
    }
    for handle in handles {
        handle.await.unwrap();
    }

    let summaries = store.list_outstations();
    assert_eq!(summaries.len(), 4);
    for summary in summaries {
        assert_eq!(summary.generation, 500);
        assert_eq!(summary.last_report_ms, Some(499));
    }
}

#[test]
fn test_long_transaction_does_not_block_readers() {
    let store = new_store();
    store.update("A1", |tx| tx.put(0, vec![1], 1.0, 1));

    std::thread::scope(|scope| {
        let (entered_tx, entered_rx) = std::sync::mpsc::channel();
        let (release_tx, release_rx) = std::sync::mpsc::channel::<()>();

        let writer_store = store.clone();
        scope.spawn(move || {
            writer_store.update("A1", |tx| {
                tx.put(0, vec![2], 2.0, 2);
                entered_tx.send(()).unwrap();
                release_rx.recv().unwrap();
            });
        });

        entered_rx.recv().unwrap();
        // Writer holds the outstation lock; readers still see the last commit
        assert_eq!(store.get("A1", 0).unwrap().raw, vec![1]);
        release_tx.send(()).unwrap();
    });

    assert_eq!(store.get("A1", 0).unwrap().raw, vec![2]);
}
