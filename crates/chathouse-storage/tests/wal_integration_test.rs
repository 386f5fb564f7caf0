//! Append Log Integration Tests
//!
//! End-to-end crash scenarios for the append log: a dropped handle stands in
//! for a process kill, and a reopened log must expose exactly the entries
//! that were synced before the crash.

use chathouse_storage::{MessageWal, WalEntry};
use chrono::Utc;
use std::collections::HashSet;
use tempfile::TempDir;
use uuid::Uuid;

fn entry(content: &str) -> WalEntry {
    WalEntry {
        message_id: Uuid::new_v4(),
        user_id: Uuid::new_v4(),
        content: content.to_string(),
        timestamp: Utc::now(),
    }
}

#[tokio::test]
async fn test_crash_after_append_loses_nothing() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("wal_messages");

    let entries: Vec<WalEntry> = (0..3).map(|i| entry(&format!("m{}", i))).collect();
    {
        let wal = MessageWal::open(&path).await.unwrap();
        for e in &entries {
            wal.append(e).await.unwrap();
        }
        // Crash: drop without compaction.
    }

    let wal = MessageWal::open(&path).await.unwrap();
    assert_eq!(wal.snapshot().await.unwrap(), entries);
}

#[tokio::test]
async fn test_compaction_survives_restart() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("wal_messages");

    let entries: Vec<WalEntry> = (0..4).map(|i| entry(&format!("m{}", i))).collect();
    {
        let wal = MessageWal::open(&path).await.unwrap();
        for e in &entries {
            wal.append(e).await.unwrap();
        }

        // A successful drain compacts the first two entries away.
        let persisted: HashSet<Uuid> =
            entries.iter().take(2).map(|e| e.message_id).collect();
        wal.compact(&persisted).await.unwrap();
    }

    let wal = MessageWal::open(&path).await.unwrap();
    assert_eq!(
        wal.snapshot().await.unwrap(),
        vec![entries[2].clone(), entries[3].clone()]
    );

    // The reopened log keeps accepting appends.
    let extra = entry("post-restart");
    wal.append(&extra).await.unwrap();
    assert_eq!(wal.snapshot().await.unwrap().len(), 3);
}

#[tokio::test]
async fn test_full_drain_cycle_leaves_empty_log() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("wal_messages");
    let wal = MessageWal::open(&path).await.unwrap();

    let entries: Vec<WalEntry> = (0..10).map(|i| entry(&format!("m{}", i))).collect();
    for e in &entries {
        wal.append(e).await.unwrap();
    }

    // Drain: snapshot, pretend the store accepted everything, compact.
    let snapshot = wal.snapshot().await.unwrap();
    assert_eq!(snapshot.len(), 10);
    let persisted: HashSet<Uuid> = snapshot.iter().map(|e| e.message_id).collect();
    wal.compact(&persisted).await.unwrap();

    assert!(wal.snapshot().await.unwrap().is_empty());

    // A retried drain against the empty log is a no-op.
    assert!(wal.snapshot().await.unwrap().is_empty());
}

#[tokio::test]
async fn test_concurrent_appends_all_land() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("wal_messages");
    let wal = std::sync::Arc::new(MessageWal::open(&path).await.unwrap());

    let mut handles = Vec::new();
    for task in 0..4 {
        let wal = wal.clone();
        handles.push(tokio::spawn(async move {
            for i in 0..10 {
                wal.append(&entry(&format!("t{}-{}", task, i))).await.unwrap();
            }
        }));
    }
    for handle in handles {
        handle.await.unwrap();
    }

    assert_eq!(wal.snapshot().await.unwrap().len(), 40);
}
