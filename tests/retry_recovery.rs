//! Retry scheduling, dead-letter convergence, and crash recovery.

use std::path::PathBuf;
use std::time::Duration;

use hopper::models::{ItemState, NewItem, Priority};
use hopper::repository::{QueueRepository, RetryPolicy};

fn enqueue_one(queue: &QueueRepository) -> i64 {
    queue
        .enqueue(&NewItem {
            source_path: PathBuf::from("doc.txt"),
            origin_path: None,
            fingerprint: "fp".to_string(),
            priority: Priority::Normal,
        })
        .unwrap()
}

/// Fail-until-dead: with max_attempts = 3 the item passes through
/// failed_retry twice and dies on the third failure.
#[test]
fn failures_converge_to_dead() {
    let dir = tempfile::tempdir().unwrap();
    let queue = QueueRepository::new(&dir.path().join("pipeline.db")).unwrap();
    let policy = RetryPolicy {
        max_attempts: 3,
        base_backoff: Duration::ZERO,
        max_backoff: Duration::ZERO,
    };
    let id = enqueue_one(&queue);

    for attempt in 1..=3u32 {
        let item = queue.claim_next("w").unwrap().unwrap();
        assert_eq!(item.id, id);
        let token = item.claim_token.clone().unwrap();
        assert!(queue
            .mark_failed(id, &token, &format!("failure {}", attempt), &policy)
            .unwrap());

        let item = queue.get_item(id).unwrap().unwrap();
        assert_eq!(item.attempt_count, attempt);
        if attempt < 3 {
            assert_eq!(item.state, ItemState::FailedRetry);
        } else {
            assert_eq!(item.state, ItemState::Dead);
            assert_eq!(item.error_message.as_deref(), Some("failure 3"));
        }
    }

    assert!(queue.claim_next("w").unwrap().is_none());
}

#[test]
fn backoff_gates_the_next_claim() {
    let dir = tempfile::tempdir().unwrap();
    let queue = QueueRepository::new(&dir.path().join("pipeline.db")).unwrap();
    let policy = RetryPolicy::default();
    let id = enqueue_one(&queue);

    let item = queue.claim_next("w").unwrap().unwrap();
    let token = item.claim_token.clone().unwrap();
    queue.mark_failed(id, &token, "transient", &policy).unwrap();

    let item = queue.get_item(id).unwrap().unwrap();
    assert_eq!(item.state, ItemState::FailedRetry);
    assert!(item.next_retry_at.is_some());

    // Default base backoff is a minute; the item is not yet eligible.
    assert!(queue.claim_next("w").unwrap().is_none());
}

#[test]
fn stale_processing_items_return_to_pending() {
    let dir = tempfile::tempdir().unwrap();
    let queue = QueueRepository::new(&dir.path().join("pipeline.db")).unwrap();
    let id = enqueue_one(&queue);

    let item = queue.claim_next("crashed-worker").unwrap().unwrap();
    let stale_token = item.claim_token.clone().unwrap();

    std::thread::sleep(Duration::from_millis(100));
    assert_eq!(queue.recover_stale(Duration::from_millis(10)).unwrap(), 1);

    let item = queue.get_item(id).unwrap().unwrap();
    assert_eq!(item.state, ItemState::Pending);
    assert!(item.claim_token.is_none());

    // The recovered item is claimable again, and the crashed worker's old
    // token can no longer complete it.
    let reclaimed = queue.claim_next("healthy-worker").unwrap().unwrap();
    assert_eq!(reclaimed.id, id);
    assert!(!queue.mark_done(id, &stale_token).unwrap());

    let token = reclaimed.claim_token.clone().unwrap();
    assert!(queue.mark_done(id, &token).unwrap());
}

#[test]
fn fresh_claims_are_not_stale() {
    let dir = tempfile::tempdir().unwrap();
    let queue = QueueRepository::new(&dir.path().join("pipeline.db")).unwrap();
    enqueue_one(&queue);

    queue.claim_next("w").unwrap().unwrap();
    assert_eq!(queue.recover_stale(Duration::from_secs(1800)).unwrap(), 0);
}

#[test]
fn requeued_dead_item_gets_a_fresh_budget() {
    let dir = tempfile::tempdir().unwrap();
    let queue = QueueRepository::new(&dir.path().join("pipeline.db")).unwrap();
    let policy = RetryPolicy {
        max_attempts: 1,
        base_backoff: Duration::ZERO,
        max_backoff: Duration::ZERO,
    };
    let id = enqueue_one(&queue);

    let item = queue.claim_next("w").unwrap().unwrap();
    let token = item.claim_token.clone().unwrap();
    queue.mark_failed(id, &token, "fatal", &policy).unwrap();

    assert!(queue.requeue_dead(id).unwrap());
    let item = queue.get_item(id).unwrap().unwrap();
    assert_eq!(item.state, ItemState::Pending);
    assert_eq!(item.attempt_count, 0);
    assert!(item.error_message.is_none());

    // Requeue only applies to dead items.
    assert!(!queue.requeue_dead(id).unwrap());
}
