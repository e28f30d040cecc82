//! Migration engine: status, planning, and locked apply/revert runs.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

use crate::applied::AppliedFilter;
use crate::cancel::cancellable;
use crate::checksum;
use crate::defaults;
use crate::error::{Error, Result};
use crate::executor::TransactionalExecutor;
use crate::models::{Direction, LedgerEntry, LockToken, Plan, RunOptions, RunReport, StepStatus};
use crate::plan::compute_plan;
use crate::registry::StepRegistry;
use crate::traits::{ExclusiveLock, MigrationStore};

/// Coordinates the ledger, the lock, and the registered steps.
pub struct MigrationEngine<S: MigrationStore> {
    store: S,
    lock: Arc<dyn ExclusiveLock>,
    registry: Arc<StepRegistry<S::Db>>,
    release_grace: Duration,
}

impl<S: MigrationStore> MigrationEngine<S> {
    pub fn new(store: S, lock: Arc<dyn ExclusiveLock>, registry: Arc<StepRegistry<S::Db>>) -> Self {
        Self {
            store,
            lock,
            registry,
            release_grace: Duration::from_secs(defaults::RELEASE_GRACE_SECS),
        }
    }

    /// Bound on the lock release at the end of a run.
    pub fn with_release_grace(mut self, grace: Duration) -> Self {
        self.release_grace = grace;
        self
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn registry(&self) -> &Arc<StepRegistry<S::Db>> {
        &self.registry
    }

    /// One row per registered step, ascending by version.
    pub async fn status(&self) -> Result<Vec<StepStatus>> {
        let steps = self.registry.all_registered();
        let applied = self.store.applied().await?;

        Ok(steps
            .into_iter()
            .map(|(version, step)| {
                let entry = applied.get(&version);
                StepStatus {
                    description: step.description().to_string(),
                    applied: entry.is_some(),
                    applied_at: entry.map(|e| e.applied_at),
                    forced: entry.is_some_and(|e| e.forced),
                    version,
                }
            })
            .collect())
    }

    /// What a run would do right now. Never mutates.
    pub async fn plan(&self, direction: Direction, target: Option<&str>) -> Result<Plan> {
        let applied = self.store.applied().await?;
        let applied: HashSet<String> = applied.into_keys().collect();
        let versions = compute_plan(direction, &self.registry.versions(), &applied, target)?;
        Ok(Plan {
            direction,
            versions,
        })
    }

    /// Apply pending steps up to and including `target`.
    pub async fn up(&self, target: Option<&str>, cancel: &CancellationToken) -> Result<RunReport> {
        self.run(Direction::Up, run_options(target), cancel).await
    }

    /// Revert applied steps down to, but not including, `target`.
    pub async fn down(&self, target: Option<&str>, cancel: &CancellationToken) -> Result<RunReport> {
        self.run(Direction::Down, run_options(target), cancel).await
    }

    /// Execute a run under the lock.
    ///
    /// With `dry_run` the plan is returned without taking the lock. Otherwise
    /// the plan is recomputed after the lock is held and executed step by step,
    /// stopping at the first failure. Steps completed before a failure stay
    /// committed. The lock is released on every exit path.
    #[instrument(
        skip(self, options, cancel),
        fields(subsystem = "migration", component = "engine", op = "run")
    )]
    pub async fn run(
        &self,
        direction: Direction,
        options: RunOptions,
        cancel: &CancellationToken,
    ) -> Result<RunReport> {
        let target = options.target.as_deref().filter(|t| !t.is_empty());

        if options.dry_run {
            let plan = cancellable(cancel, self.plan(direction, target)).await?;
            info!(plan_len = plan.len(), target_version = ?target, "Dry run, nothing executed");
            return Ok(RunReport {
                plan,
                executed: Vec::new(),
                skipped: Vec::new(),
                dry_run: true,
            });
        }

        let start = Instant::now();
        let token = self.acquire_lock(cancel).await?;
        debug!(owner = %token.owner, "Migration lock acquired");

        let guard = ReleaseGuard::new(Arc::clone(&self.lock), self.release_grace);
        let result = self.execute_plan(direction, target, cancel).await;
        guard.release().await;

        match &result {
            Ok(report) => info!(
                executed = report.executed.len(),
                skipped = report.skipped.len(),
                duration_ms = start.elapsed().as_millis() as u64,
                "Migration run completed"
            ),
            Err(e) => error!(
                error = %e,
                duration_ms = start.elapsed().as_millis() as u64,
                "Migration run failed"
            ),
        }
        result
    }

    /// Record `version` as applied without running it.
    ///
    /// Returns `false` when the version was already in the ledger. Does not
    /// take the lock.
    pub async fn force_mark(&self, version: &str) -> Result<bool> {
        let step = self
            .registry
            .get(version)
            .ok_or_else(|| Error::MigrationNotFound(version.to_string()))?;

        if self.store.find(version).await?.is_some() {
            debug!(version, "Already in ledger, force-mark is a no-op");
            return Ok(false);
        }

        self.store
            .insert(&checksum::forced_entry(step.as_ref()))
            .await
            .map_err(|e| Error::ledger_failed(version, e))?;
        warn!(
            subsystem = "migration",
            component = "engine",
            op = "force_mark",
            version,
            "Migration marked as applied without running"
        );
        Ok(true)
    }

    /// Delete the lock token regardless of holder.
    pub async fn force_unlock(&self) -> Result<()> {
        self.lock.release().await?;
        warn!(
            subsystem = "migration",
            component = "lock",
            op = "force_unlock",
            "Migration lock forcibly released"
        );
        Ok(())
    }

    /// Applied history, most recent first, narrowed by `filter`.
    ///
    /// Entries whose version is no longer registered are included.
    pub async fn list_applied(&self, filter: &AppliedFilter) -> Result<Vec<LedgerEntry>> {
        let entries = self.store.list_applied().await?;
        Ok(filter.apply(entries))
    }

    /// Current lock token, if any run holds it.
    pub async fn lock_holder(&self) -> Result<Option<LockToken>> {
        self.lock.holder().await
    }

    // The insert runs on its own task: if the caller cancels while it is in
    // flight, a lock that lands afterwards is released rather than left to TTL.
    async fn acquire_lock(&self, cancel: &CancellationToken) -> Result<LockToken> {
        if cancel.is_cancelled() {
            return Err(Error::Cancelled);
        }

        let lock = Arc::clone(&self.lock);
        let mut acquiring = tokio::spawn(async move { lock.acquire().await });

        tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                let lock = Arc::clone(&self.lock);
                let grace = self.release_grace;
                tokio::spawn(async move {
                    if let Ok(Ok(_)) = acquiring.await {
                        release_bounded(lock.as_ref(), grace).await;
                    }
                });
                Err(Error::Cancelled)
            }
            joined = &mut acquiring => joined.map_err(std::io::Error::from)?,
        }
    }

    async fn execute_plan(
        &self,
        direction: Direction,
        target: Option<&str>,
        cancel: &CancellationToken,
    ) -> Result<RunReport> {
        let steps = self.registry.all_registered();
        let applied = cancellable(cancel, self.store.applied()).await?;
        let applied: HashSet<String> = applied.into_keys().collect();
        let registered: Vec<&str> = steps.keys().map(String::as_str).collect();
        let versions = compute_plan(direction, &registered, &applied, target)?;

        info!(
            plan_len = versions.len(),
            target_version = ?target,
            "Migration plan computed"
        );

        let executor = TransactionalExecutor::new(&self.store);
        let mut executed = Vec::with_capacity(versions.len());
        let mut skipped = Vec::new();

        for version in &versions {
            let step = steps
                .get(version)
                .ok_or_else(|| Error::MigrationNotFound(version.clone()))?;

            // The plan may be stale by the time this step's turn comes.
            let current = cancellable(cancel, self.store.find(version)).await?;
            match (direction, current) {
                (Direction::Up, Some(entry)) => {
                    checksum::validate(step.as_ref(), &entry)?;
                    debug!(version = %version, "Already applied, skipping");
                    skipped.push(version.clone());
                    continue;
                }
                (Direction::Down, None) => {
                    debug!(version = %version, "No longer applied, skipping");
                    skipped.push(version.clone());
                    continue;
                }
                _ => {}
            }

            info!(version = %version, "Executing migration");
            let step_start = Instant::now();
            let outcome = cancellable(cancel, executor.execute(step.as_ref(), direction)).await?;
            info!(
                version = %version,
                atomic = outcome.atomic,
                duration_ms = step_start.elapsed().as_millis() as u64,
                "Migration executed"
            );
            executed.push(outcome);
        }

        Ok(RunReport {
            plan: Plan {
                direction,
                versions,
            },
            executed,
            skipped,
            dry_run: false,
        })
    }
}

fn run_options(target: Option<&str>) -> RunOptions {
    match target {
        Some(t) => RunOptions::new().target(t),
        None => RunOptions::new(),
    }
}

async fn release_bounded(lock: &dyn ExclusiveLock, grace: Duration) {
    match tokio::time::timeout(grace, lock.release()).await {
        Ok(Ok(())) => debug!("Migration lock released"),
        Ok(Err(e)) => warn!(
            subsystem = "migration",
            component = "lock",
            op = "release",
            error = %e,
            "Failed to release migration lock"
        ),
        Err(_) => warn!(
            subsystem = "migration",
            component = "lock",
            op = "release",
            grace_ms = grace.as_millis() as u64,
            "Timed out releasing migration lock"
        ),
    }
}

/// Releases the lock when the run ends, including when the run future is
/// dropped before reaching [`ReleaseGuard::release`].
struct ReleaseGuard {
    lock: Option<Arc<dyn ExclusiveLock>>,
    grace: Duration,
}

impl ReleaseGuard {
    fn new(lock: Arc<dyn ExclusiveLock>, grace: Duration) -> Self {
        Self {
            lock: Some(lock),
            grace,
        }
    }

    /// Stays armed until the release returns, so dropping this future
    /// mid-release still hands the lock to the `Drop` fallback.
    async fn release(mut self) {
        if let Some(lock) = self.lock.clone() {
            release_bounded(lock.as_ref(), self.grace).await;
        }
        self.lock = None;
    }
}

impl Drop for ReleaseGuard {
    fn drop(&mut self) {
        let Some(lock) = self.lock.take() else {
            return;
        };
        let grace = self.grace;
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                handle.spawn(async move {
                    release_bounded(lock.as_ref(), grace).await;
                });
            }
            Err(_) => warn!("No runtime to release migration lock; it will expire by TTL"),
        }
    }
}
