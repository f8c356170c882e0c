//! Claim exclusivity and ordering against a real on-disk database.

use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use hopper::models::{ItemState, NewItem, Priority};
use hopper::repository::{QueueRepository, RepositoryError, RetryPolicy};

fn new_item(path: &str, fingerprint: &str, priority: Priority) -> NewItem {
    NewItem {
        source_path: PathBuf::from(path),
        origin_path: None,
        fingerprint: fingerprint.to_string(),
        priority,
    }
}

#[test]
fn claims_are_exclusive_across_workers() {
    let dir = tempfile::tempdir().unwrap();
    let db_path = dir.path().join("pipeline.db");
    let queue = QueueRepository::new(&db_path).unwrap();

    for i in 0..3 {
        queue
            .enqueue(&new_item(
                &format!("doc-{}.txt", i),
                &format!("fp-{}", i),
                Priority::Normal,
            ))
            .unwrap();
    }

    // Six claimants race over three items.
    let claimed = Arc::new(Mutex::new(Vec::new()));
    let mut handles = Vec::new();
    for w in 0..6 {
        let queue = QueueRepository::new(&db_path).unwrap();
        let claimed = claimed.clone();
        handles.push(std::thread::spawn(move || {
            if let Some(item) = queue.claim_next(&format!("worker-{}", w)).unwrap() {
                claimed.lock().unwrap().push(item.id);
            }
        }));
    }
    for h in handles {
        h.join().unwrap();
    }

    let claimed = claimed.lock().unwrap();
    assert_eq!(claimed.len(), 3, "every item claimed exactly once");
    let distinct: HashSet<_> = claimed.iter().collect();
    assert_eq!(distinct.len(), 3, "no item claimed twice");

    assert!(queue.claim_next("late-worker").unwrap().is_none());
}

#[test]
fn claimed_item_carries_token_and_worker() {
    let dir = tempfile::tempdir().unwrap();
    let queue = QueueRepository::new(&dir.path().join("pipeline.db")).unwrap();
    queue
        .enqueue(&new_item("doc.txt", "fp", Priority::Normal))
        .unwrap();

    let item = queue.claim_next("worker-0").unwrap().unwrap();
    assert_eq!(item.state, ItemState::Processing);
    assert!(item.claim_token.is_some());
    assert_eq!(item.claimed_by.as_deref(), Some("worker-0"));
    assert!(item.last_attempt_at.is_some());
}

#[test]
fn duplicate_content_is_rejected_while_active() {
    let dir = tempfile::tempdir().unwrap();
    let queue = QueueRepository::new(&dir.path().join("pipeline.db")).unwrap();

    queue
        .enqueue(&new_item("a.txt", "same-fp", Priority::Normal))
        .unwrap();

    // Same fingerprint under a different path is still a duplicate.
    let err = queue
        .enqueue(&new_item("b.txt", "same-fp", Priority::Normal))
        .unwrap_err();
    assert!(matches!(err, RepositoryError::DuplicateItem(_)));

    // Same path is a duplicate too.
    let err = queue
        .enqueue(&new_item("a.txt", "other-fp", Priority::Normal))
        .unwrap_err();
    assert!(matches!(err, RepositoryError::DuplicateItem(_)));
}

#[test]
fn finished_items_do_not_block_reenqueue() {
    let dir = tempfile::tempdir().unwrap();
    let queue = QueueRepository::new(&dir.path().join("pipeline.db")).unwrap();

    queue
        .enqueue(&new_item("a.txt", "fp", Priority::Normal))
        .unwrap();
    let item = queue.claim_next("w").unwrap().unwrap();
    let token = item.claim_token.clone().unwrap();
    assert!(queue.mark_done(item.id, &token).unwrap());

    // Re-submitting the same content after completion is allowed.
    queue
        .enqueue(&new_item("a2.txt", "fp", Priority::Normal))
        .unwrap();
}

#[test]
fn claims_follow_priority_then_arrival_order() {
    let dir = tempfile::tempdir().unwrap();
    let queue = QueueRepository::new(&dir.path().join("pipeline.db")).unwrap();

    let submissions = [
        ("first-low.txt", Priority::Low),
        ("first-high.txt", Priority::High),
        ("only-normal.txt", Priority::Normal),
        ("second-high.txt", Priority::High),
        ("second-low.txt", Priority::Low),
    ];
    for (path, priority) in submissions {
        queue
            .enqueue(&new_item(path, path, priority))
            .unwrap();
    }

    let expected = [
        "first-high.txt",
        "second-high.txt",
        "only-normal.txt",
        "first-low.txt",
        "second-low.txt",
    ];
    for want in expected {
        let item = queue.claim_next("w").unwrap().unwrap();
        assert_eq!(item.source_path, PathBuf::from(want));
    }
}

#[test]
fn dead_items_are_never_claimed() {
    let dir = tempfile::tempdir().unwrap();
    let queue = QueueRepository::new(&dir.path().join("pipeline.db")).unwrap();
    let policy = RetryPolicy {
        max_attempts: 1,
        ..RetryPolicy::default()
    };

    queue
        .enqueue(&new_item("a.txt", "fp", Priority::High))
        .unwrap();
    let item = queue.claim_next("w").unwrap().unwrap();
    let token = item.claim_token.clone().unwrap();
    assert!(queue.mark_failed(item.id, &token, "boom", &policy).unwrap());

    let item = queue.get_item(item.id).unwrap().unwrap();
    assert_eq!(item.state, ItemState::Dead);
    assert!(queue.claim_next("w").unwrap().is_none());
}
