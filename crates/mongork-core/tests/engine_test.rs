//! Migration engine behaviour against the in-memory backend.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bson::doc;
use chrono::Utc;
use mongork_core::checksum::fingerprint_parts;
use mongork_core::memory::{MemoryDb, MemoryLock, MemoryStore};
use mongork_core::{
    AppliedFilter, CancellationToken, Direction, Error, ExclusiveLock, LedgerEntry,
    MigrationEngine, MigrationStore, RunOptions, Step, StepRef, StepRegistry,
};

// =============================================================================
// TEST STEPS
// =============================================================================

/// Appends `"{direction}:{version}"` to the `journal` collection.
struct Journaled {
    version: &'static str,
    description: &'static str,
}

#[async_trait]
impl Step<MemoryDb> for Journaled {
    fn version(&self) -> &str {
        self.version
    }

    fn description(&self) -> &str {
        self.description
    }

    async fn apply(&self, db: &MemoryDb) -> anyhow::Result<()> {
        db.insert_one("journal", doc! { "entry": format!("up:{}", self.version) });
        Ok(())
    }

    async fn revert(&self, db: &MemoryDb) -> anyhow::Result<()> {
        db.insert_one("journal", doc! { "entry": format!("down:{}", self.version) });
        Ok(())
    }
}

struct Failing(&'static str);

#[async_trait]
impl Step<MemoryDb> for Failing {
    fn version(&self) -> &str {
        self.0
    }

    fn description(&self) -> &str {
        "always fails"
    }

    async fn apply(&self, db: &MemoryDb) -> anyhow::Result<()> {
        db.insert_one("journal", doc! { "entry": format!("up:{}", self.0) });
        anyhow::bail!("duplicate key on users.email")
    }

    async fn revert(&self, _db: &MemoryDb) -> anyhow::Result<()> {
        anyhow::bail!("cannot revert")
    }
}

/// Writes a ledger entry for another version while applying, as a concurrent
/// process would between plan and execution.
struct Interloper {
    version: &'static str,
    writes: LedgerEntry,
}

#[async_trait]
impl Step<MemoryDb> for Interloper {
    fn version(&self) -> &str {
        self.version
    }

    fn description(&self) -> &str {
        "interloper"
    }

    async fn apply(&self, db: &MemoryDb) -> anyhow::Result<()> {
        db.record_applied(self.writes.clone());
        Ok(())
    }

    async fn revert(&self, _db: &MemoryDb) -> anyhow::Result<()> {
        Ok(())
    }
}

/// Cancels the run's token from inside its body.
struct Canceller {
    version: &'static str,
    token: CancellationToken,
}

#[async_trait]
impl Step<MemoryDb> for Canceller {
    fn version(&self) -> &str {
        self.version
    }

    fn description(&self) -> &str {
        "cancels the run"
    }

    async fn apply(&self, _db: &MemoryDb) -> anyhow::Result<()> {
        self.token.cancel();
        Ok(())
    }

    async fn revert(&self, _db: &MemoryDb) -> anyhow::Result<()> {
        Ok(())
    }
}

struct Hangs(&'static str);

#[async_trait]
impl Step<MemoryDb> for Hangs {
    fn version(&self) -> &str {
        self.0
    }

    fn description(&self) -> &str {
        "never finishes"
    }

    async fn apply(&self, _db: &MemoryDb) -> anyhow::Result<()> {
        std::future::pending::<()>().await;
        Ok(())
    }

    async fn revert(&self, _db: &MemoryDb) -> anyhow::Result<()> {
        Ok(())
    }
}

fn journaled(version: &'static str) -> StepRef<MemoryDb> {
    Arc::new(Journaled {
        version,
        description: "journaled step",
    })
}

fn abc() -> Vec<StepRef<MemoryDb>> {
    vec![
        journaled("20240101_a"),
        journaled("20240102_b"),
        journaled("20240103_c"),
    ]
}

fn build(
    store: MemoryStore,
    lock: Arc<MemoryLock>,
    steps: Vec<StepRef<MemoryDb>>,
) -> MigrationEngine<MemoryStore> {
    let registry = StepRegistry::from_steps(steps).unwrap();
    MigrationEngine::new(store, lock, Arc::new(registry))
}

fn journal(engine: &MigrationEngine<MemoryStore>) -> Vec<String> {
    engine
        .store()
        .db()
        .documents("journal")
        .iter()
        .map(|d| d.get_str("entry").unwrap().to_string())
        .collect()
}

async fn applied_versions(engine: &MigrationEngine<MemoryStore>) -> Vec<String> {
    let mut versions: Vec<String> = engine.store().applied().await.unwrap().into_keys().collect();
    versions.sort();
    versions
}

// =============================================================================
// SCENARIOS
// =============================================================================

#[tokio::test]
async fn test_up_then_down_to_first() {
    let lock = Arc::new(MemoryLock::new());
    let engine = build(MemoryStore::new(), lock.clone(), abc());
    let cancel = CancellationToken::new();

    let report = engine.up(None, &cancel).await.unwrap();
    assert_eq!(
        report.plan.versions,
        vec!["20240101_a", "20240102_b", "20240103_c"]
    );
    assert_eq!(report.executed.len(), 3);
    assert!(report.executed.iter().all(|o| o.atomic));
    assert_eq!(
        journal(&engine),
        vec!["up:20240101_a", "up:20240102_b", "up:20240103_c"]
    );

    let report = engine.down(Some("20240101_a"), &cancel).await.unwrap();
    assert_eq!(report.direction(), Direction::Down);
    assert_eq!(report.plan.versions, vec!["20240103_c", "20240102_b"]);
    assert_eq!(applied_versions(&engine).await, vec!["20240101_a"]);
    assert_eq!(
        journal(&engine)[3..],
        ["down:20240103_c", "down:20240102_b"]
    );

    assert_eq!(lock.acquisitions(), 2);
    assert!(!lock.is_held());
}

#[tokio::test]
async fn test_up_to_target_is_inclusive() {
    let engine = build(MemoryStore::new(), Arc::new(MemoryLock::new()), abc());
    engine
        .up(Some("20240102_b"), &CancellationToken::new())
        .await
        .unwrap();
    assert_eq!(
        applied_versions(&engine).await,
        vec!["20240101_a", "20240102_b"]
    );
}

#[tokio::test]
async fn test_down_without_target_reverts_everything() {
    let engine = build(MemoryStore::new(), Arc::new(MemoryLock::new()), abc());
    let cancel = CancellationToken::new();
    engine.up(None, &cancel).await.unwrap();
    engine.down(None, &cancel).await.unwrap();
    assert!(applied_versions(&engine).await.is_empty());
}

#[tokio::test]
async fn test_unknown_target_rejected_and_lock_released() {
    let lock = Arc::new(MemoryLock::new());
    let engine = build(MemoryStore::new(), lock.clone(), abc());
    let err = engine
        .up(Some("20991231_nope"), &CancellationToken::new())
        .await
        .unwrap_err();
    assert!(matches!(err, Error::MigrationNotFound(_)));
    assert!(!lock.is_held());
}

#[tokio::test]
async fn test_status_covers_every_registered_version() {
    let engine = build(MemoryStore::new(), Arc::new(MemoryLock::new()), abc());
    engine
        .up(Some("20240101_a"), &CancellationToken::new())
        .await
        .unwrap();
    let status = engine.status().await.unwrap();
    assert_eq!(status.len(), 3);
    assert_eq!(
        status.iter().map(|s| s.applied).collect::<Vec<_>>(),
        vec![true, false, false]
    );
    assert!(status[0].applied_at.is_some());
    assert!(!status[0].forced);
}

#[tokio::test]
async fn test_plan_never_mutates_and_reports_empty() {
    let engine = build(MemoryStore::new(), Arc::new(MemoryLock::new()), abc());
    let plan = engine.plan(Direction::Up, None).await.unwrap();
    assert_eq!(plan.len(), 3);
    assert!(journal(&engine).is_empty());

    engine.up(None, &CancellationToken::new()).await.unwrap();
    let plan = engine.plan(Direction::Up, None).await.unwrap();
    assert!(plan.is_empty());
    assert_eq!(plan.to_string(), "No migrations to up.\n");
}

#[tokio::test]
async fn test_dry_run_returns_plan_only() {
    let lock = Arc::new(MemoryLock::new());
    let engine = build(MemoryStore::new(), lock.clone(), abc());
    let report = engine
        .run(
            Direction::Up,
            RunOptions::new().target("20240102_b").dry_run(true),
            &CancellationToken::new(),
        )
        .await
        .unwrap();
    assert!(report.dry_run);
    assert_eq!(report.plan.versions, vec!["20240101_a", "20240102_b"]);
    assert!(report.executed.is_empty());
    assert_eq!(lock.acquisitions(), 0);
    assert!(applied_versions(&engine).await.is_empty());
}

// =============================================================================
// FORCE OPERATIONS
// =============================================================================

#[tokio::test]
async fn test_force_mark_is_idempotent() {
    let engine = build(MemoryStore::new(), Arc::new(MemoryLock::new()), abc());
    assert!(engine.force_mark("20240102_b").await.unwrap());
    assert!(!engine.force_mark("20240102_b").await.unwrap());

    let entries = engine.list_applied(&AppliedFilter::new()).await.unwrap();
    assert_eq!(entries.len(), 1);
    assert!(entries[0].forced);
    assert_eq!(
        entries[0].checksum,
        fingerprint_parts("20240102_b", "journaled step")
    );
    // The step body never ran.
    assert!(journal(&engine).is_empty());
}

#[tokio::test]
async fn test_force_mark_skips_step_on_next_up() {
    let engine = build(MemoryStore::new(), Arc::new(MemoryLock::new()), abc());
    engine.force_mark("20240102_b").await.unwrap();
    engine.up(None, &CancellationToken::new()).await.unwrap();
    assert_eq!(journal(&engine), vec!["up:20240101_a", "up:20240103_c"]);
}

#[tokio::test]
async fn test_force_unlock_clears_any_holder() {
    let lock = Arc::new(MemoryLock::new());
    let engine = build(MemoryStore::new(), lock.clone(), abc());
    lock.acquire().await.unwrap();
    assert!(engine.lock_holder().await.unwrap().is_some());

    engine.force_unlock().await.unwrap();
    assert!(engine.lock_holder().await.unwrap().is_none());
    engine.up(None, &CancellationToken::new()).await.unwrap();
}

// =============================================================================
// LOCKING
// =============================================================================

#[tokio::test]
async fn test_concurrent_acquire_exactly_one_wins() {
    let lock = Arc::new(MemoryLock::new());
    let first = tokio::spawn({
        let lock = lock.clone();
        async move { lock.acquire().await }
    });
    let second = tokio::spawn({
        let lock = lock.clone();
        async move { lock.acquire().await }
    });
    let results = [first.await.unwrap(), second.await.unwrap()];

    assert_eq!(results.iter().filter(|r| r.is_ok()).count(), 1);
    assert_eq!(
        results
            .iter()
            .filter(|r| matches!(r, Err(Error::LockContention)))
            .count(),
        1
    );
}

#[tokio::test]
async fn test_expired_lock_can_be_reacquired() {
    let lock = Arc::new(MemoryLock::new());
    let engine = build(MemoryStore::new(), lock.clone(), abc());

    // A crashed holder left its token behind.
    let stale = lock.acquire().await.unwrap();
    let err = engine.up(None, &CancellationToken::new()).await.unwrap_err();
    assert!(matches!(err, Error::LockContention));

    assert!(lock.sweep(stale.acquired_at + chrono::Duration::seconds(601)));
    engine.up(None, &CancellationToken::new()).await.unwrap();
    assert_eq!(applied_versions(&engine).await.len(), 3);
}

#[tokio::test]
async fn test_lock_released_after_step_failure() {
    let lock = Arc::new(MemoryLock::new());
    let engine = build(
        MemoryStore::new(),
        lock.clone(),
        vec![
            journaled("20240101_a"),
            Arc::new(Failing("20240102_b")),
            journaled("20240103_c"),
        ],
    );

    let err = engine.up(None, &CancellationToken::new()).await.unwrap_err();
    match err {
        Error::StepExecutionFailed {
            version, direction, ..
        } => {
            assert_eq!(version, "20240102_b");
            assert_eq!(direction, Direction::Up);
        }
        other => panic!("unexpected error: {other:?}"),
    }

    // Earlier step committed, failing step rolled back, later step never ran.
    assert_eq!(applied_versions(&engine).await, vec!["20240101_a"]);
    assert_eq!(journal(&engine), vec!["up:20240101_a"]);
    assert!(!lock.is_held());
    assert_eq!(lock.releases(), 1);
}

#[tokio::test]
async fn test_release_failure_does_not_mask_step_error() {
    let lock = Arc::new(MemoryLock::new().with_failing_release());
    let engine = build(
        MemoryStore::new(),
        lock.clone(),
        vec![Arc::new(Failing("20240101_a"))],
    );
    let err = engine.up(None, &CancellationToken::new()).await.unwrap_err();
    assert!(matches!(err, Error::StepExecutionFailed { .. }));
    assert_eq!(lock.releases(), 1);
}

#[tokio::test]
async fn test_lock_released_after_cancellation() {
    let lock = Arc::new(MemoryLock::new());
    let cancel = CancellationToken::new();
    let engine = build(
        MemoryStore::new(),
        lock.clone(),
        vec![
            Arc::new(Canceller {
                version: "20240101_a",
                token: cancel.clone(),
            }),
            journaled("20240102_b"),
        ],
    );

    let err = engine.up(None, &cancel).await.unwrap_err();
    assert!(matches!(err, Error::Cancelled));
    assert_eq!(applied_versions(&engine).await, vec!["20240101_a"]);
    assert!(journal(&engine).is_empty());
    assert!(!lock.is_held());
}

#[tokio::test]
async fn test_cancelled_before_start_takes_no_lock() {
    let lock = Arc::new(MemoryLock::new());
    let engine = build(MemoryStore::new(), lock.clone(), abc());
    let cancel = CancellationToken::new();
    cancel.cancel();
    let err = engine.up(None, &cancel).await.unwrap_err();
    assert!(matches!(err, Error::Cancelled));
    assert_eq!(lock.acquisitions(), 0);
}

#[tokio::test]
async fn test_dropped_run_releases_lock() {
    let lock = Arc::new(MemoryLock::new());
    let engine = build(
        MemoryStore::new(),
        lock.clone(),
        vec![Arc::new(Hangs("20240101_a"))],
    );

    let cancel = CancellationToken::new();
    let outcome = tokio::time::timeout(Duration::from_millis(50), engine.up(None, &cancel)).await;
    assert!(outcome.is_err(), "run should still be pending");

    // The drop guard releases on a detached task.
    for _ in 0..50 {
        if !lock.is_held() {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert!(!lock.is_held());
}

// =============================================================================
// STALE PLANS AND CHECKSUMS
// =============================================================================

#[tokio::test]
async fn test_checksum_drift_on_stale_entry_is_rejected() {
    let drifted = LedgerEntry {
        version: "20240102_b".into(),
        description: "journaled step".into(),
        applied_at: Utc::now(),
        checksum: fingerprint_parts("20240102_b", "an older description"),
        forced: false,
    };
    let engine = build(
        MemoryStore::new(),
        Arc::new(MemoryLock::new()),
        vec![
            Arc::new(Interloper {
                version: "20240101_a",
                writes: drifted,
            }),
            journaled("20240102_b"),
        ],
    );

    let err = engine.up(None, &CancellationToken::new()).await.unwrap_err();
    match err {
        Error::ChecksumMismatch {
            version,
            expected,
            got,
        } => {
            assert_eq!(version, "20240102_b");
            assert_eq!(expected, fingerprint_parts("20240102_b", "an older description"));
            assert_eq!(got, fingerprint_parts("20240102_b", "journaled step"));
        }
        other => panic!("unexpected error: {other:?}"),
    }
    assert!(journal(&engine).is_empty());
}

#[tokio::test]
async fn test_matching_stale_entry_is_skipped() {
    let concurrent = LedgerEntry {
        version: "20240102_b".into(),
        description: "journaled step".into(),
        applied_at: Utc::now(),
        checksum: fingerprint_parts("20240102_b", "journaled step"),
        forced: false,
    };
    let engine = build(
        MemoryStore::new(),
        Arc::new(MemoryLock::new()),
        vec![
            Arc::new(Interloper {
                version: "20240101_a",
                writes: concurrent,
            }),
            journaled("20240102_b"),
        ],
    );

    let report = engine.up(None, &CancellationToken::new()).await.unwrap();
    assert_eq!(report.executed.len(), 1);
    assert_eq!(report.skipped, vec!["20240102_b"]);
    assert!(journal(&engine).is_empty());
}

#[tokio::test]
async fn test_stale_ledger_entries_are_listed_but_never_planned() {
    let engine = build(MemoryStore::new(), Arc::new(MemoryLock::new()), abc());
    engine.store().db().record_applied(LedgerEntry {
        version: "20231201_retired".into(),
        description: "removed from code".into(),
        applied_at: Utc::now(),
        checksum: String::new(),
        forced: false,
    });

    let listed = engine.list_applied(&AppliedFilter::new()).await.unwrap();
    assert_eq!(listed.len(), 1);
    assert_eq!(engine.status().await.unwrap().len(), 3);

    let report = engine.down(None, &CancellationToken::new()).await.unwrap();
    assert!(report.plan.is_empty());
    assert_eq!(applied_versions(&engine).await, vec!["20231201_retired"]);
}

// =============================================================================
// TRANSACTION FALLBACK
// =============================================================================

#[tokio::test]
async fn test_fallback_is_reported_as_not_atomic() {
    let engine = build(
        MemoryStore::without_transactions(),
        Arc::new(MemoryLock::new()),
        abc(),
    );
    let report = engine.up(None, &CancellationToken::new()).await.unwrap();
    assert_eq!(report.executed.len(), 3);
    assert_eq!(report.degraded().count(), 3);
    assert_eq!(applied_versions(&engine).await.len(), 3);
}

#[tokio::test]
async fn test_list_applied_filters_history() {
    let engine = build(MemoryStore::new(), Arc::new(MemoryLock::new()), abc());
    engine.up(None, &CancellationToken::new()).await.unwrap();

    let all = engine.list_applied(&AppliedFilter::new()).await.unwrap();
    assert_eq!(all.len(), 3);

    let one = engine
        .list_applied(&AppliedFilter::new().version("20240102_b"))
        .await
        .unwrap();
    assert_eq!(one.len(), 1);

    let limited = engine
        .list_applied(&AppliedFilter::new().search("JOURNALED").limit(2))
        .await
        .unwrap();
    assert_eq!(limited.len(), 2);
}
