//! Runs one step and its ledger write as a single unit.
//!
//! The mutation and the ledger insert (or delete) share one transaction when
//! the backend supports it. On topologies without multi-statement
//! transactions the pair runs sequentially instead, and the outcome is
//! reported with `atomic = false`.

use tracing::{debug, warn};

use crate::checksum::new_entry;
use crate::error::{Error, Result};
use crate::models::{Direction, StepOutcome};
use crate::traits::{MigrationStore, Step, UnitOfWork};

/// Executes steps against a [`MigrationStore`].
pub struct TransactionalExecutor<'a, S: MigrationStore> {
    store: &'a S,
}

impl<'a, S: MigrationStore> TransactionalExecutor<'a, S> {
    pub fn new(store: &'a S) -> Self {
        Self { store }
    }

    /// Apply or revert `step` and record the change in the ledger.
    pub async fn execute(&self, step: &dyn Step<S::Db>, direction: Direction) -> Result<StepOutcome> {
        let version = step.version();
        match self.execute_atomic(step, direction).await {
            Ok(()) => Ok(StepOutcome {
                version: version.to_string(),
                atomic: true,
            }),
            Err(e) if e.is_transaction_unsupported() => {
                warn!(
                    subsystem = "migration",
                    component = "executor",
                    version,
                    %direction,
                    reason = %e,
                    "Transactions unavailable, running step without atomicity"
                );
                self.execute_direct(step, direction).await?;
                Ok(StepOutcome {
                    version: version.to_string(),
                    atomic: false,
                })
            }
            Err(e) => Err(e),
        }
    }

    async fn execute_atomic(&self, step: &dyn Step<S::Db>, direction: Direction) -> Result<()> {
        let version = step.version();
        let unit = self.store.begin().await?;

        let result = async {
            run_step(step, unit.db(), direction).await?;
            match direction {
                Direction::Up => unit.insert(&new_entry(step)).await,
                Direction::Down => unit.remove(version).await,
            }
            .map_err(|e| Error::ledger_failed(version, e))
        }
        .await;

        match result {
            Ok(()) => unit
                .commit()
                .await
                .map_err(|e| Error::step_failed(version, direction, e)),
            Err(e) => {
                if let Err(abort_err) = unit.abort().await {
                    debug!(version, error = %abort_err, "Transaction abort failed");
                }
                Err(e)
            }
        }
    }

    async fn execute_direct(&self, step: &dyn Step<S::Db>, direction: Direction) -> Result<()> {
        let version = step.version();
        run_step(step, self.store.db(), direction).await?;
        match direction {
            Direction::Up => self.store.insert(&new_entry(step)).await,
            Direction::Down => self.store.remove(version).await,
        }
        .map_err(|e| Error::ledger_failed(version, e))
    }
}

async fn run_step<D: Send + Sync>(step: &dyn Step<D>, db: &D, direction: Direction) -> Result<()> {
    let result = match direction {
        Direction::Up => step.apply(db).await,
        Direction::Down => step.revert(db).await,
    };
    result.map_err(|e| Error::step_failed(step.version(), direction, e))
}
