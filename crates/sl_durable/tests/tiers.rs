use std::path::PathBuf;

use sl_core::{CellValue, Dataset, Record, SheetLinkError, Tier};
use sl_durable::{DurableKv, FastKv, PersistenceSnapshot, SnapshotTier, HANDLE_SLOT};
use uuid::Uuid;

fn scratch_dir() -> PathBuf {
    std::env::temp_dir().join(format!("sl_durable_test_{}", Uuid::new_v4()))
}

fn snapshot(rows: usize) -> PersistenceSnapshot {
    let records = (0..rows)
        .map(|i| {
            let mut r = Record::new();
            r.insert("SERVICIO".into(), CellValue::text(format!("S-{i:03}")));
            r.insert("TITULAR".into(), CellValue::text("Ana"));
            r
        })
        .collect();
    PersistenceSnapshot::new(Dataset::new(vec![], records), None, rows as u64)
}

#[tokio::test]
async fn test_fast_kv_quota_exceeded() {
    let dir = scratch_dir();
    let fast = FastKv::open(&dir, 256);
    let err = fast.save(&snapshot(50)).unwrap_err();
    assert!(matches!(err, SheetLinkError::StorageQuotaExceeded { tier: Tier::Fast, .. }));
    // 超额写入不会留下残缺快照
    assert!(fast.load().unwrap().is_none());
    let _ = std::fs::remove_dir_all(dir);
}

#[tokio::test]
async fn test_fast_kv_persists_across_instances() {
    let dir = scratch_dir();
    let snap = snapshot(3);
    FastKv::open(&dir, 1 << 20).save(&snap).unwrap();

    let reopened = FastKv::open(&dir, 1 << 20);
    assert_eq!(reopened.load_snapshot().await.unwrap(), Some(snap));

    reopened.clear().unwrap();
    assert!(reopened.load().unwrap().is_none());
    let _ = std::fs::remove_dir_all(dir);
}

#[tokio::test]
async fn test_disabled_fast_kv_errors_without_panicking() {
    let fast = FastKv::disabled();
    assert!(!fast.is_enabled());
    assert!(fast.save(&snapshot(1)).is_err());
    assert!(fast.load().is_err());
}

#[tokio::test]
async fn test_durable_kv_snapshot_and_handle_slot() {
    let durable = DurableKv::in_memory().await.unwrap();
    assert!(durable.load_snapshot().await.unwrap().is_none());

    let snap = snapshot(4);
    durable.save_snapshot(&snap).await.unwrap();
    assert_eq!(durable.load_snapshot().await.unwrap(), Some(snap));

    assert!(durable.get(HANDLE_SLOT).await.unwrap().is_none());
    durable.put(HANDLE_SLOT, b"token").await.unwrap();
    durable.put(HANDLE_SLOT, b"token-2").await.unwrap();
    assert_eq!(durable.get(HANDLE_SLOT).await.unwrap(), Some(b"token-2".to_vec()));
    durable.delete(HANDLE_SLOT).await.unwrap();
    assert!(durable.get(HANDLE_SLOT).await.unwrap().is_none());
}

#[tokio::test]
async fn test_either_tier_recovers_full_dataset() {
    let dir = scratch_dir();
    let fast = FastKv::open(&dir, 1 << 20);
    let durable = DurableKv::in_memory().await.unwrap();
    let snap = snapshot(5);

    let tiers: [&dyn SnapshotTier; 2] = [&fast, &durable];
    for tier in tiers {
        tier.save_snapshot(&snap).await.unwrap();
    }

    fast.clear().unwrap();
    assert_eq!(durable.load_snapshot().await.unwrap().unwrap().dataset, snap.dataset);

    fast.save(&snap).unwrap();
    durable.clear_snapshot().await.unwrap();
    assert_eq!(fast.load().unwrap().unwrap().dataset, snap.dataset);
    let _ = std::fs::remove_dir_all(dir);
}

#[tokio::test]
async fn test_closed_durable_kv_reports_storage_error() {
    let durable = DurableKv::in_memory().await.unwrap();
    durable.close().await;
    assert!(matches!(durable.save_snapshot(&snapshot(1)).await, Err(SheetLinkError::Storage(_))));
}

#[tokio::test]
async fn test_fast_kv_concurrent_saves_leave_one_complete_snapshot() {
    let dir = scratch_dir();
    let fast = std::sync::Arc::new(FastKv::open(&dir, 1 << 20));

    let writers: Vec<_> = (1..=8)
        .map(|rows| {
            let fast = std::sync::Arc::clone(&fast);
            std::thread::spawn(move || {
                for _ in 0..10 {
                    fast.save(&snapshot(rows)).unwrap();
                }
            })
        })
        .collect();
    for writer in writers {
        writer.join().unwrap();
    }

    let loaded = fast.load().unwrap().unwrap();
    assert_eq!(loaded.dataset.len() as u64, loaded.revision);
    let leftovers: Vec<_> = std::fs::read_dir(&dir)
        .unwrap()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_name().to_string_lossy().ends_with(".tmp"))
        .collect();
    assert!(leftovers.is_empty());
    let _ = std::fs::remove_dir_all(dir);
}
