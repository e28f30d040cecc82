//! Core traits for mongork abstractions.
//!
//! These traits define the seams between the backend-agnostic engines and a
//! concrete store, enabling the MongoDB backend in `mongork-db` and the
//! in-memory backend in [`crate::memory`].

use std::collections::HashMap;

use async_trait::async_trait;
use bson::Document;

use crate::error::Result;
use crate::models::{LedgerEntry, LockToken};

// =============================================================================
// MIGRATION STEPS
// =============================================================================

/// One schema-evolution step.
///
/// `D` is the backend's handle passed to step bodies. When the engine runs a
/// step inside a transaction, the handle it receives is bound to that
/// transaction.
#[async_trait]
pub trait Step<D>: Send + Sync
where
    D: Send + Sync,
{
    /// Unique, lexicographically sortable version (`YYYYMMDD[_HHMMSS][_slug]`).
    fn version(&self) -> &str;

    /// Human-readable description. Part of the checksum.
    fn description(&self) -> &str;

    /// Forward mutation.
    async fn apply(&self, db: &D) -> anyhow::Result<()>;

    /// Inverse of [`Step::apply`].
    async fn revert(&self, db: &D) -> anyhow::Result<()>;
}

// =============================================================================
// LEDGER
// =============================================================================

/// Persistent record of applied steps.
#[async_trait]
pub trait MigrationStore: Send + Sync {
    /// Handle passed to step bodies.
    type Db: Send + Sync;

    /// Transactional unit opened by [`MigrationStore::begin`].
    type Unit: UnitOfWork<Db = Self::Db>;

    /// All ledger entries keyed by version.
    async fn applied(&self) -> Result<HashMap<String, LedgerEntry>>;

    /// Ledger entry for one version, if applied.
    async fn find(&self, version: &str) -> Result<Option<LedgerEntry>>;

    /// All ledger entries, most recently applied first.
    async fn list_applied(&self) -> Result<Vec<LedgerEntry>>;

    /// Record an applied step outside any transaction.
    async fn insert(&self, entry: &LedgerEntry) -> Result<()>;

    /// Delete the entry for a reverted step outside any transaction.
    async fn remove(&self, version: &str) -> Result<()>;

    /// Non-transactional step handle.
    fn db(&self) -> &Self::Db;

    /// Open a multi-statement transaction.
    ///
    /// Returns [`crate::Error::TransactionUnsupported`] (or a driver error
    /// recognized by [`crate::Error::is_transaction_unsupported`]) when the
    /// backend topology cannot run transactions.
    async fn begin(&self) -> Result<Self::Unit>;
}

/// Open transaction covering a step mutation and its ledger write.
#[async_trait]
pub trait UnitOfWork: Send + Sync {
    type Db: Send + Sync;

    /// Step handle bound to this transaction.
    fn db(&self) -> &Self::Db;

    async fn insert(&self, entry: &LedgerEntry) -> Result<()>;

    async fn remove(&self, version: &str) -> Result<()>;

    async fn commit(self) -> Result<()>;

    async fn abort(self) -> Result<()>;
}

// =============================================================================
// LOCK
// =============================================================================

/// Cross-process mutual exclusion for engine runs.
#[async_trait]
pub trait ExclusiveLock: Send + Sync {
    /// Insert the lock token. Fails with [`crate::Error::LockContention`]
    /// when another holder exists.
    async fn acquire(&self) -> Result<LockToken>;

    /// Delete the lock token, whoever holds it. Idempotent.
    async fn release(&self) -> Result<()>;

    /// Current token, if any.
    async fn holder(&self) -> Result<Option<LockToken>>;
}

// =============================================================================
// CHANGE SOURCE
// =============================================================================

/// Where a change stream is opened.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WatchScope {
    /// Every database in the deployment.
    Deployment,
    /// A single `db.collection`.
    Collection { database: String, collection: String },
}

/// Parameters for opening a change stream.
#[derive(Debug, Clone)]
pub struct WatchRequest {
    pub scope: WatchScope,
    pub pipeline: Vec<Document>,
    /// Look up the current full document for update events.
    pub full_document: bool,
    /// Raw BSON bytes of a previously persisted resume token.
    pub resume_after: Option<Vec<u8>>,
    /// Start at this operation time when not resuming.
    pub start_at: Option<bson::Timestamp>,
}

/// Operation log access.
#[async_trait]
pub trait ChangeSource: Send + Sync {
    /// Query the legacy operation log, newest first.
    async fn query_log(&self, filter: Document, limit: Option<i64>) -> Result<Vec<Document>>;

    /// Open a change stream.
    async fn watch(&self, request: WatchRequest) -> Result<Box<dyn ChangeFeed>>;
}

/// An open change stream.
#[async_trait]
pub trait ChangeFeed: Send {
    /// Next raw change document, or `None` when the stream closes.
    async fn next_change(&mut self) -> Result<Option<Document>>;

    /// Resume token positioned after the last returned change.
    fn resume_token(&self) -> Option<Vec<u8>>;
}

/// Durable storage for the follow-mode resume token.
#[async_trait]
pub trait ResumeTokenStore: Send + Sync {
    /// Previously saved token, if any.
    async fn load(&self) -> Result<Option<Vec<u8>>>;

    /// Persist a token, replacing any previous one.
    async fn save(&self, token: &[u8]) -> Result<()>;
}
