//! End-to-end scenarios exercising the storage across tasks and threads:
//! compare-and-swap races, wait-for-change liveness, shutdown and
//! cancellation of blocked waiters.

use std::sync::Arc;

use tempfile::TempDir;
use tokio::time::timeout;
use tokio::time::Duration;
use tokio_util::sync::CancellationToken;

use fskv::Error;
use fskv::FsStorage;
use fskv::Storage;
use fskv::StorageOptions;

async fn make_storage() -> (TempDir, Arc<FsStorage>) {
    let temp_dir = TempDir::new().expect("temp dir");
    let storage = FsStorage::open(StorageOptions {
        base_dir_name: temp_dir.path().join("versionedkv"),
        ..Default::default()
    })
    .await
    .expect("open storage");
    (temp_dir, Arc::new(storage))
}

#[tokio::test(flavor = "multi_thread")]
async fn test_concurrent_cas_updates_have_one_winner() {
    let (_temp_dir, storage) = make_storage().await;

    let v1 = storage
        .create_value("k", "seed")
        .expect("create")
        .expect("version");

    let first = {
        let storage = Arc::clone(&storage);
        let v1 = v1.clone();
        tokio::task::spawn_blocking(move || {
            storage.update_value("k", "a", Some(&v1)).expect("update a")
        })
    };
    let second = {
        let storage = Arc::clone(&storage);
        let v1 = v1.clone();
        tokio::task::spawn_blocking(move || {
            storage.update_value("k", "b", Some(&v1)).expect("update b")
        })
    };

    let first = first.await.expect("first task");
    let second = second.await.expect("second task");

    // Exactly one compare-and-swap may win.
    assert!(first.is_some() != second.is_some());

    let (value, version) = storage.get_value("k").expect("get");
    if let Some(winner) = first {
        assert_eq!(value, "a");
        assert_eq!(version, Some(winner));
    } else {
        assert_eq!(value, "b");
        assert_eq!(version, second);
    }
}

#[tokio::test(flavor = "multi_thread")]
async fn test_wait_for_value_sees_next_update() {
    let (_temp_dir, storage) = make_storage().await;

    let v1 = storage
        .create_value("k", "old")
        .expect("create")
        .expect("version");

    let waiter = {
        let storage = Arc::clone(&storage);
        let v1 = v1.clone();
        tokio::spawn(async move {
            let ctx = CancellationToken::new();
            storage.wait_for_value(&ctx, "k", Some(&v1)).await
        })
    };

    tokio::time::sleep(Duration::from_millis(100)).await;
    let v2 = storage
        .update_value("k", "new", Some(&v1))
        .expect("update")
        .expect("new version");

    let (value, version) = timeout(Duration::from_secs(2), waiter)
        .await
        .expect("waiter returned in time")
        .expect("waiter task")
        .expect("waiter result");
    assert_eq!(value, "new");
    assert_eq!(version, Some(v2));
}

#[tokio::test(flavor = "multi_thread")]
async fn test_wait_for_value_returns_immediately_on_newer_version() {
    let (_temp_dir, storage) = make_storage().await;

    let v1 = storage
        .create_value("k", "current")
        .expect("create")
        .expect("version");

    // The current version already differs from "nothing observed yet".
    let ctx = CancellationToken::new();
    let (value, version) = timeout(
        Duration::from_secs(2),
        storage.wait_for_value(&ctx, "k", None),
    )
    .await
    .expect("no blocking needed")
    .expect("wait result");
    assert_eq!(value, "current");
    assert_eq!(version, Some(v1));
}

#[tokio::test(flavor = "multi_thread")]
async fn test_wait_for_value_wakes_on_delete() {
    let (_temp_dir, storage) = make_storage().await;

    let v1 = storage
        .create_value("k", "doomed")
        .expect("create")
        .expect("version");

    let waiter = {
        let storage = Arc::clone(&storage);
        let v1 = v1.clone();
        tokio::spawn(async move {
            let ctx = CancellationToken::new();
            storage.wait_for_value(&ctx, "k", Some(&v1)).await
        })
    };

    tokio::time::sleep(Duration::from_millis(100)).await;
    assert!(storage.delete_value("k", Some(&v1)).expect("delete"));

    let (value, version) = timeout(Duration::from_secs(2), waiter)
        .await
        .expect("waiter returned in time")
        .expect("waiter task")
        .expect("waiter result");
    assert_eq!(value, "");
    assert_eq!(version, None);
}

#[tokio::test(flavor = "multi_thread")]
async fn test_every_waiter_wakes_on_one_commit() {
    let (_temp_dir, storage) = make_storage().await;

    let v1 = storage
        .create_value("k", "old")
        .expect("create")
        .expect("version");

    let waiters: Vec<_> = (0..3)
        .map(|_| {
            let storage = Arc::clone(&storage);
            let v1 = v1.clone();
            tokio::spawn(async move {
                let ctx = CancellationToken::new();
                storage.wait_for_value(&ctx, "k", Some(&v1)).await
            })
        })
        .collect();

    tokio::time::sleep(Duration::from_millis(100)).await;
    let v2 = storage
        .update_value("k", "new", Some(&v1))
        .expect("update")
        .expect("new version");

    for waiter in waiters {
        let (value, version) = timeout(Duration::from_secs(2), waiter)
            .await
            .expect("waiter returned in time")
            .expect("waiter task")
            .expect("waiter result");
        assert_eq!(value, "new");
        assert_eq!(version, Some(v2.clone()));
    }
}

#[tokio::test(flavor = "multi_thread")]
async fn test_close_releases_blocked_waiters() {
    let (_temp_dir, storage) = make_storage().await;

    let waiter = {
        let storage = Arc::clone(&storage);
        tokio::spawn(async move {
            let ctx = CancellationToken::new();
            storage.wait_for_value(&ctx, "q", None).await
        })
    };

    tokio::time::sleep(Duration::from_millis(300)).await;
    storage.close().expect("close");

    let result = timeout(Duration::from_secs(2), waiter)
        .await
        .expect("waiter returned in time")
        .expect("waiter task");
    assert!(matches!(result, Err(Error::StorageClosed)));
}

#[tokio::test(flavor = "multi_thread")]
async fn test_cancellation_releases_one_waiter() {
    let (_temp_dir, storage) = make_storage().await;

    let ctx = CancellationToken::new();
    let waiter = {
        let storage = Arc::clone(&storage);
        let ctx = ctx.clone();
        tokio::spawn(async move { storage.wait_for_value(&ctx, "k", None).await })
    };

    tokio::time::sleep(Duration::from_millis(100)).await;
    ctx.cancel();

    let result = timeout(Duration::from_secs(2), waiter)
        .await
        .expect("waiter returned in time")
        .expect("waiter task");
    assert!(matches!(result, Err(Error::Cancelled)));

    // The storage stays usable after a caller walks away.
    let version = storage.create_value("k", "v").expect("create");
    assert!(version.is_some());
}

#[tokio::test(flavor = "multi_thread")]
async fn test_wait_then_mutate_from_another_handle_on_same_dir() {
    // Two storages over the same base directory coordinate through the
    // filesystem alone, the way two processes would.
    let temp_dir = TempDir::new().expect("temp dir");
    let base_dir_name = temp_dir.path().join("versionedkv");

    let reader = Arc::new(
        FsStorage::open(StorageOptions {
            base_dir_name: base_dir_name.clone(),
            ..Default::default()
        })
        .await
        .expect("open reader"),
    );
    let writer = FsStorage::open(StorageOptions {
        base_dir_name,
        ..Default::default()
    })
    .await
    .expect("open writer");

    let waiter = {
        let reader = Arc::clone(&reader);
        tokio::spawn(async move {
            let ctx = CancellationToken::new();
            reader.wait_for_value(&ctx, "shared", None).await
        })
    };

    tokio::time::sleep(Duration::from_millis(100)).await;
    let version = writer
        .create_value("shared", "from the other side")
        .expect("create")
        .expect("version");

    let (value, observed) = timeout(Duration::from_secs(2), waiter)
        .await
        .expect("waiter returned in time")
        .expect("waiter task")
        .expect("waiter result");
    assert_eq!(value, "from the other side");
    assert_eq!(observed, Some(version));

    reader.close().expect("close reader");
    writer.close().expect("close writer");
}
