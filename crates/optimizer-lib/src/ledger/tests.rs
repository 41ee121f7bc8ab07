use super::*;
use tempfile::tempdir;

async fn exercise_lifecycle(ledger: &dyn Ledger) {
    ledger
        .record_pending("req-1", "sum-a", "resize", "{\"a\":1}", 1.0)
        .await
        .unwrap();

    let pending = ledger.get_by_checksum("sum-a").await.unwrap().unwrap();
    assert_eq!(pending.status, ActionStatus::Pending);
    assert_eq!(pending.action, "resize");
    assert_eq!(pending.payload, "{\"a\":1}");
    assert!(pending.resource_id.is_none());

    ledger.complete("req-1", "res-1").await.unwrap();

    let done = ledger.get("req-1").await.unwrap().unwrap();
    assert_eq!(done.status, ActionStatus::Completed);
    assert_eq!(done.resource_id.as_deref(), Some("res-1"));
    assert!(done.created_at <= done.updated_at);
}

async fn exercise_terminal_states(ledger: &dyn Ledger) {
    ledger.record_pending("req-1", "sum-a", "stop", "{}", 1.0).await.unwrap();
    ledger.complete("req-1", "res-1").await.unwrap();

    assert!(matches!(
        ledger.fail("req-1", "late failure").await,
        Err(LedgerError::InvalidTransition { .. })
    ));
    assert!(matches!(
        ledger.complete("req-1", "res-2").await,
        Err(LedgerError::InvalidTransition { .. })
    ));
    assert!(matches!(
        ledger.complete("req-missing", "res").await,
        Err(LedgerError::NotFound(_))
    ));

    let row = ledger.get("req-1").await.unwrap().unwrap();
    assert_eq!(row.resource_id.as_deref(), Some("res-1"));
}

async fn exercise_checksum_uniqueness(ledger: &dyn Ledger) {
    ledger.record_pending("req-1", "sum-a", "stop", "{}", 1.0).await.unwrap();

    assert!(matches!(
        ledger.record_pending("req-2", "sum-a", "stop", "{}", 1.0).await,
        Err(LedgerError::Conflict(_))
    ));

    // A failed row no longer blocks the checksum
    ledger.fail("req-1", "provider refused").await.unwrap();
    ledger.record_pending("req-2", "sum-a", "stop", "{}", 1.0).await.unwrap();

    let current = ledger.get_by_checksum("sum-a").await.unwrap().unwrap();
    assert_eq!(current.request_id, "req-2");
    assert_eq!(current.status, ActionStatus::Pending);

    let failed = ledger.get("req-1").await.unwrap().unwrap();
    assert_eq!(failed.error.as_deref(), Some("provider refused"));
}

async fn exercise_pending_and_stats(ledger: &dyn Ledger) {
    ledger.record_pending("req-1", "sum-a", "stop", "{}", 1.0).await.unwrap();
    ledger.record_pending("req-2", "sum-b", "stop", "{}", 1.0).await.unwrap();
    ledger.record_pending("req-3", "sum-c", "stop", "{}", 1.0).await.unwrap();
    ledger.complete("req-2", "res-2").await.unwrap();
    ledger.fail("req-3", "boom").await.unwrap();

    let pending = ledger.get_pending_tasks().await.unwrap();
    assert_eq!(pending.len(), 1);
    assert_eq!(pending[0].request_id, "req-1");

    let stats = ledger.stats().await.unwrap();
    assert_eq!(
        stats,
        LedgerStats {
            pending: 1,
            completed: 1,
            failed: 1
        }
    );
    assert_eq!(stats.total(), 3);
    assert!(ledger.get_by_checksum("sum-unknown").await.unwrap().is_none());
}

#[tokio::test]
async fn test_memory_ledger_contract() {
    exercise_lifecycle(&MemoryLedger::new()).await;
    exercise_terminal_states(&MemoryLedger::new()).await;
    exercise_checksum_uniqueness(&MemoryLedger::new()).await;
    exercise_pending_and_stats(&MemoryLedger::new()).await;
}

#[tokio::test]
async fn test_sqlite_ledger_contract() {
    exercise_lifecycle(&SqliteLedger::in_memory().await.unwrap()).await;
    exercise_terminal_states(&SqliteLedger::in_memory().await.unwrap()).await;
    exercise_checksum_uniqueness(&SqliteLedger::in_memory().await.unwrap()).await;
    exercise_pending_and_stats(&SqliteLedger::in_memory().await.unwrap()).await;
}

#[tokio::test]
async fn test_sqlite_ledger_survives_reopen() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("ledger.db");

    let ledger = SqliteLedger::open(&path).await.unwrap();
    ledger
        .record_pending("req-1", "sum-a", "resize", "{\"instance\":\"db-prod-01\"}", 9.8)
        .await
        .unwrap();
    ledger.record_pending("req-2", "sum-b", "stop", "{}", 1.0).await.unwrap();
    ledger.complete("req-2", "res-2").await.unwrap();
    ledger.close().await;
    drop(ledger);

    let reopened = SqliteLedger::open(&path).await.unwrap();
    let pending = reopened.get_pending_tasks().await.unwrap();
    assert_eq!(pending.len(), 1);
    assert_eq!(pending[0].request_id, "req-1");
    assert_eq!(pending[0].payload, "{\"instance\":\"db-prod-01\"}");
    assert_eq!(pending[0].risk, 9.8);

    let completed = reopened.get_by_checksum("sum-b").await.unwrap().unwrap();
    assert_eq!(completed.status, ActionStatus::Completed);
    assert_eq!(completed.resource_id.as_deref(), Some("res-2"));
}

#[test]
fn test_status_parsing() {
    assert_eq!("completed".parse::<ActionStatus>().unwrap(), ActionStatus::Completed);
    assert!(matches!(
        "done".parse::<ActionStatus>(),
        Err(LedgerError::Corrupt(_))
    ));
    assert!(ActionStatus::Pending.is_active());
    assert!(!ActionStatus::Failed.is_active());
}
