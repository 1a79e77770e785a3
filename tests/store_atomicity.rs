//! Generation swap atomicity of the local store.
//!
//! Readers must only ever observe one complete generation: the one from the
//! last successful `replace_all_data`, never a mix and never a partial load.

mod common;

use proptest::prelude::*;
use std::path::PathBuf;

use common::{generation, memory_store};
use newsdesk::storage::{LocalStore, NewHeadline, Sentiment};

const READ_ALL: i64 = 2000;

/// Assert the store holds exactly `expected` under `update_id`.
async fn assert_generation(store: &LocalStore, expected: &[NewHeadline], update_id: &str) {
    let rows = store
        .get_headlines("technology", Sentiment::Positive, READ_ALL)
        .await;
    assert_eq!(rows.len(), expected.len());
    assert!(rows.iter().all(|r| r.update_id == update_id));

    let mut stored: Vec<_> = rows.iter().map(|r| r.headline.clone()).collect();
    let mut wanted: Vec<_> = expected.iter().map(|h| h.headline.clone()).collect();
    stored.sort();
    wanted.sort();
    assert_eq!(stored, wanted);

    assert_eq!(store.get_last_update_id().await.as_deref(), Some(update_id));
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(24))]

    /// Any sequence of replaces, some of which fail mid-batch, leaves the
    /// store at the last generation that committed.
    #[test]
    fn prop_reads_reflect_last_committed_generation(
        steps in prop::collection::vec((0usize..130, any::<bool>()), 1..6)
    ) {
        let rt = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .unwrap();

        rt.block_on(async {
            let store = memory_store().await;
            let mut committed: Option<(Vec<NewHeadline>, String)> = None;

            for (i, (size, poisoned)) in steps.into_iter().enumerate() {
                let update_id = format!("U{i}");
                let mut batch = generation(&update_id, size);
                let poisoned = poisoned && size > 0;
                if poisoned {
                    // Out-of-range confidence fails the last insert batch
                    batch[size - 1].confidence = 101.0;
                }

                let result = store.replace_all_data(&batch, &update_id).await;
                if poisoned {
                    assert!(result.is_err());
                } else {
                    assert_eq!(result.unwrap(), size);
                    committed = Some((batch, update_id));
                }

                // Cold read path must agree with the mirror
                for _ in 0..2 {
                    match &committed {
                        Some((rows, id)) => assert_generation(&store, rows, id).await,
                        None => {
                            assert_eq!(store.get_last_update_id().await, None);
                            assert_eq!(store.get_data_stats().await.total_headlines, 0);
                        }
                    }
                    store.evict_cursor_mirror();
                }
            }
        });
    }
}

// ============================================================================
// Concurrent Readers
// ============================================================================

fn scratch_db(name: &str) -> PathBuf {
    let dir = std::env::temp_dir().join(format!("newsdesk_{name}_{}", std::process::id()));
    std::fs::create_dir_all(&dir).unwrap();
    dir.join("store.db")
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_readers_never_observe_partial_generation() {
    let path = scratch_db("atomicity");
    let store = LocalStore::open(path.to_str().unwrap()).await;
    assert!(store.is_available());

    let small = generation("small", 60);
    let large = generation("large", 260);
    store.replace_all_data(&small, "S").await.unwrap();

    let writer = {
        let store = store.clone();
        let small = small.clone();
        let large = large.clone();
        tokio::spawn(async move {
            for round in 0..10 {
                let (rows, id) = if round % 2 == 0 {
                    (&large, "L")
                } else {
                    (&small, "S")
                };
                store.replace_all_data(rows, id).await.unwrap();
            }
        })
    };

    let reader = {
        let store = store.clone();
        tokio::spawn(async move {
            let mut observed = Vec::new();
            for _ in 0..40 {
                let rows = store
                    .get_headlines("technology", Sentiment::Positive, READ_ALL)
                    .await;
                let first = rows.first().map(|r| r.update_id.clone());
                assert!(rows.iter().all(|r| Some(&r.update_id) == first.as_ref()));
                match first.as_deref() {
                    Some("S") => assert_eq!(rows.len(), 60),
                    Some("L") => assert_eq!(rows.len(), 260),
                    other => panic!("unexpected generation {other:?} with {} rows", rows.len()),
                }
                observed.push(rows.len());
                tokio::task::yield_now().await;
            }
            observed
        })
    };

    writer.await.unwrap();
    let observed = reader.await.unwrap();
    assert_eq!(observed.len(), 40);

    // Writer finished on the small generation
    assert_generation(&store, &small, "S").await;

    std::fs::remove_dir_all(path.parent().unwrap()).ok();
}

#[tokio::test]
async fn test_data_survives_reopen() {
    let path = scratch_db("reopen");
    let rows = generation("durable", 12);
    {
        let store = LocalStore::open(path.to_str().unwrap()).await;
        store.replace_all_data(&rows, "U9").await.unwrap();
    }

    let reopened = LocalStore::open(path.to_str().unwrap()).await;
    assert!(reopened.is_available());
    assert_generation(&reopened, &rows, "U9").await;
    let stats = reopened.get_data_stats().await;
    assert!(stats.has_data);
    assert!(stats.last_sync_time.is_some());

    std::fs::remove_dir_all(path.parent().unwrap()).ok();
}
