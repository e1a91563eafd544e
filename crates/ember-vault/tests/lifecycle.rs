//! End-to-end lifecycle properties against the filesystem backend.

use std::io;
use std::path::Path;
use std::time::{Duration, SystemTime};

use bytes::Bytes;
use ember_store::ObjectStore;
use ember_types::RetentionMode;
use ember_vault::{Retrieval, Vault, VaultConfig, VaultError};
use futures::{Stream, StreamExt, TryStreamExt};

const LIMIT: u64 = 64 * 1024;

fn config() -> VaultConfig {
    VaultConfig {
        max_file_size: LIMIT,
        burn_grace_secs: 0,
        ..Default::default()
    }
}

async fn vault() -> (tempfile::TempDir, Vault) {
    let dir = tempfile::tempdir().unwrap();
    let vault = Vault::open_filesystem(dir.path(), config()).await.unwrap();
    (dir, vault)
}

fn payload(data: Vec<u8>, chunk: usize) -> impl Stream<Item = Result<Bytes, io::Error>> + Send {
    let chunks: Vec<Result<Bytes, io::Error>> = data
        .chunks(chunk.max(1))
        .map(|c| Ok(Bytes::copy_from_slice(c)))
        .collect();
    futures::stream::iter(chunks)
}

async fn body(retrieval: Retrieval) -> Vec<u8> {
    let chunks: Vec<Bytes> = retrieval.stream.try_collect().await.unwrap();
    chunks.concat()
}

/// Files directly under `dir`, excluding subdirectories.
fn files_in(dir: &Path) -> usize {
    std::fs::read_dir(dir)
        .unwrap()
        .filter(|e| e.as_ref().unwrap().file_type().unwrap().is_file())
        .count()
}

fn no_artifacts(root: &Path) -> bool {
    files_in(root) == 0 && files_in(&root.join(".incoming")) == 0 && files_in(&root.join(".claimed")) == 0
}

/// Push a stored file's mtime `age` into the past.
fn backdate(path: &Path, age: Duration) {
    std::fs::File::options()
        .write(true)
        .open(path)
        .unwrap()
        .set_modified(SystemTime::now() - age)
        .unwrap();
}

#[tokio::test]
async fn normal_round_trip_is_repeatable() {
    let (_dir, vault) = vault().await;
    let data: Vec<u8> = (0..LIMIT as usize).map(|i| (i % 251) as u8).collect();
    let receipt = vault.ingest(payload(data.clone(), 4096), Some(LIMIT), false).await.unwrap();
    assert_eq!(receipt.mode, RetentionMode::Normal);
    assert_eq!(receipt.size, LIMIT);

    for _ in 0..3 {
        let retrieval = vault.retrieve(&receipt.id.to_string()).await.unwrap();
        assert_eq!(retrieval.size, LIMIT);
        assert_eq!(body(retrieval).await, data);
    }
}

#[tokio::test]
async fn burn_object_is_served_exactly_once() {
    let (dir, vault) = vault().await;
    let receipt = vault.ingest(payload(b"one time pad".to_vec(), 4), None, true).await.unwrap();
    assert_eq!(receipt.mode, RetentionMode::Burn);
    assert!(dir.path().join(format!("{}.burn.bin", receipt.id)).is_file());

    let first = vault.retrieve(&receipt.id.to_string()).await.unwrap();
    assert!(matches!(vault.retrieve(&receipt.id.to_string()).await, Err(VaultError::NotFound)));
    assert_eq!(body(first).await, b"one time pad");

    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(no_artifacts(dir.path()));
    assert!(matches!(vault.retrieve(&receipt.id.to_string()).await, Err(VaultError::NotFound)));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_burn_retrievals_have_one_winner() {
    let (dir, vault) = vault().await;
    let receipt = vault.ingest(payload(vec![7u8; 10_000], 1000), None, true).await.unwrap();
    let id = receipt.id.to_string();

    let handles: Vec<_> = (0..16)
        .map(|_| {
            let vault = vault.clone();
            let id = id.clone();
            tokio::spawn(async move {
                match vault.retrieve(&id).await {
                    Ok(retrieval) => Ok(body(retrieval).await),
                    Err(e) => Err(e),
                }
            })
        })
        .collect();

    let mut successes = 0;
    let mut not_found = 0;
    for handle in handles {
        match handle.await.unwrap() {
            Ok(data) => {
                successes += 1;
                assert_eq!(data, vec![7u8; 10_000]);
            }
            Err(VaultError::NotFound) => not_found += 1,
            Err(e) => panic!("unexpected error: {e}"),
        }
    }
    assert_eq!(successes, 1);
    assert_eq!(not_found, 15);

    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(no_artifacts(dir.path()));
}

#[tokio::test]
async fn oversized_stream_without_declared_length_leaves_nothing() {
    let (dir, vault) = vault().await;
    let err = vault
        .ingest(payload(vec![0u8; LIMIT as usize + 1], 4096), None, false)
        .await
        .unwrap_err();
    assert!(matches!(err, VaultError::TooLarge { limit: LIMIT }));
    assert!(no_artifacts(dir.path()));
}

#[tokio::test]
async fn lying_declared_length_is_caught_on_actual_bytes() {
    let (dir, vault) = vault().await;
    let err = vault
        .ingest(payload(vec![0u8; LIMIT as usize * 2], 8192), Some(10), true)
        .await
        .unwrap_err();
    assert!(matches!(err, VaultError::TooLarge { .. }));
    assert!(no_artifacts(dir.path()));
}

#[tokio::test]
async fn cancelled_upload_leaves_no_artifact() {
    let (dir, vault) = vault().await;
    let stalled = futures::stream::iter(vec![Ok::<_, io::Error>(Bytes::from_static(b"first"))])
        .chain(futures::stream::pending());

    let result = tokio::time::timeout(Duration::from_millis(50), vault.ingest(stalled, None, false)).await;
    assert!(result.is_err(), "upload should still have been pending");
    assert!(no_artifacts(dir.path()));
}

#[tokio::test]
async fn sweep_removes_expired_and_keeps_young_objects() {
    let (dir, vault) = vault().await;
    let old = vault.ingest(payload(b"old".to_vec(), 3), None, false).await.unwrap();
    let old_burn = vault.ingest(payload(b"old burn".to_vec(), 3), None, true).await.unwrap();
    let young = vault.ingest(payload(b"young".to_vec(), 3), None, false).await.unwrap();

    let age = vault.config().expiration() + Duration::from_secs(1);
    for name in [format!("{}.bin", old.id), format!("{}.burn.bin", old_burn.id)] {
        backdate(&dir.path().join(name), age);
    }

    let report = vault.sweep_now().await;
    assert_eq!(report.scanned, 3);
    assert_eq!(report.expired, 2);
    assert_eq!(report.failed, 0);

    assert!(matches!(vault.retrieve(&old.id.to_string()).await, Err(VaultError::NotFound)));
    assert!(matches!(vault.retrieve(&old_burn.id.to_string()).await, Err(VaultError::NotFound)));
    let survivor = vault.retrieve(&young.id.to_string()).await.unwrap();
    assert_eq!(body(survivor).await, b"young");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn burn_retrievals_racing_a_sweep_serve_at_most_once() {
    let (dir, vault) = vault().await;
    let data = vec![9u8; 50_000];
    let receipt = vault.ingest(payload(data.clone(), 5_000), None, true).await.unwrap();
    backdate(
        &dir.path().join(format!("{}.burn.bin", receipt.id)),
        vault.config().expiration() + Duration::from_secs(1),
    );
    let id = receipt.id.to_string();

    let retrievals = futures::future::join_all((0..8).map(|_| {
        let vault = vault.clone();
        let id = id.clone();
        tokio::spawn(async move {
            match vault.retrieve(&id).await {
                Ok(retrieval) => Ok(body(retrieval).await),
                Err(e) => Err(e),
            }
        })
    }));
    let (outcomes, report) = tokio::join!(retrievals, vault.sweep_now());

    let mut successes = 0;
    for outcome in outcomes {
        match outcome.unwrap() {
            Ok(served) => {
                successes += 1;
                assert_eq!(served, data);
            }
            Err(VaultError::NotFound) => {}
            Err(e) => panic!("unexpected error: {e}"),
        }
    }
    assert!(successes <= 1);
    // Either a reader claimed the object or the sweeper deleted it, never both.
    assert!(successes + report.expired <= 1);
    assert_eq!(report.failed, 0);

    vault.wait_for_burn_deletions().await;
    assert_eq!(files_in(&dir.path().join(".claimed")), 0);
    assert!(no_artifacts(dir.path()));
    assert!(matches!(vault.retrieve(&id).await, Err(VaultError::NotFound)));
}

#[tokio::test]
async fn delete_racing_a_sweep_never_errors() {
    let (dir, vault) = vault().await;
    let target = vault.ingest(payload(b"target".to_vec(), 6), None, false).await.unwrap();
    let bystander = vault.ingest(payload(b"bystander".to_vec(), 6), None, false).await.unwrap();
    backdate(
        &dir.path().join(format!("{}.bin", target.id)),
        vault.config().expiration() + Duration::from_secs(1),
    );

    let store = vault.store().clone();
    let (deleted, report) = tokio::join!(
        async {
            let first = store.delete(&target.id).await.unwrap();
            let second = store.delete(&target.id).await.unwrap();
            (first, second)
        },
        vault.sweep_now()
    );
    assert!(!deleted.1);
    assert_eq!(report.failed, 0);
    // Between the two deleters the target was removed exactly once.
    assert_eq!(usize::from(deleted.0) + report.expired, 1);
    assert_eq!(store.exists(&target.id).await.unwrap(), None);
    assert_eq!(store.exists(&bystander.id).await.unwrap(), Some(RetentionMode::Normal));

    let survivor = vault.retrieve(&bystander.id.to_string()).await.unwrap();
    assert_eq!(body(survivor).await, b"bystander");
}

#[tokio::test]
async fn unknown_identifiers_look_like_burned_ones() {
    let (_dir, vault) = vault().await;
    let burned = vault.ingest(payload(b"x".to_vec(), 1), None, true).await.unwrap();
    drop(vault.retrieve(&burned.id.to_string()).await.unwrap());

    let never_issued = ember_types::ObjectId::generate().unwrap().to_string();
    let burned = burned.id.to_string();
    for id in [never_issued.as_str(), burned.as_str(), "not-an-id", "../.claimed"] {
        let err = vault.retrieve(id).await.unwrap_err();
        assert!(matches!(err, VaultError::NotFound));
        assert_eq!(err.to_string(), "object not found");
    }
}

#[tokio::test]
async fn reopening_purges_leftovers_from_a_crash() {
    let dir = tempfile::tempdir().unwrap();
    {
        let vault = Vault::open_filesystem(dir.path(), config()).await.unwrap();
        vault.ingest(payload(b"kept".to_vec(), 4), None, false).await.unwrap();
    }
    std::fs::write(dir.path().join(".incoming").join("orphan.bin.deadbeef"), b"torn").unwrap();
    std::fs::write(dir.path().join(".claimed").join("orphan.cafe"), b"burned").unwrap();

    let _vault = Vault::open_filesystem(dir.path(), config()).await.unwrap();
    assert_eq!(files_in(&dir.path().join(".incoming")), 0);
    assert_eq!(files_in(&dir.path().join(".claimed")), 0);
    assert_eq!(files_in(dir.path()), 1);
}
