//! In-memory backend for deterministic testing and embedding.
//!
//! Implements every backend seam without a database:
//!
//! - [`MemoryStore`] / [`MemoryDb`]: ledger plus a toy collection namespace
//!   that step bodies can mutate. Transactions stage a private copy of the
//!   state and swap it in on commit.
//! - [`MemoryLock`]: single-slot lock with a simulated TTL sweep.
//! - [`MemoryChangeSource`]: canned oplog entries and change events.
//!
//! ## Usage
//!
//! ```rust
//! use std::sync::Arc;
//! use mongork_core::memory::{MemoryLock, MemoryStore};
//! use mongork_core::{MigrationEngine, StepRegistry};
//!
//! let registry = Arc::new(StepRegistry::new());
//! let engine = MigrationEngine::new(MemoryStore::new(), Arc::new(MemoryLock::new()), registry);
//! assert!(engine.registry().is_empty());
//! ```

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use bson::Document;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::defaults;
use crate::error::{Error, Result};
use crate::models::{LedgerEntry, LockToken};
use crate::traits::{
    ChangeFeed, ChangeSource, ExclusiveLock, MigrationStore, UnitOfWork, WatchRequest,
};

fn guard<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|e| e.into_inner())
}

// =============================================================================
// STORE
// =============================================================================

#[derive(Debug, Clone, Default)]
struct MemoryState {
    collections: BTreeMap<String, Vec<Document>>,
    ledger: BTreeMap<String, LedgerEntry>,
}

/// Step handle over in-memory collections. Clones share state.
#[derive(Debug, Clone, Default)]
pub struct MemoryDb {
    state: Arc<Mutex<MemoryState>>,
}

impl MemoryDb {
    pub fn new() -> Self {
        Self::default()
    }

    fn detached(state: MemoryState) -> Self {
        Self {
            state: Arc::new(Mutex::new(state)),
        }
    }

    fn snapshot(&self) -> MemoryState {
        guard(&self.state).clone()
    }

    fn restore(&self, state: MemoryState) {
        *guard(&self.state) = state;
    }

    /// Returns `false` if the collection already existed.
    pub fn create_collection(&self, name: &str) -> bool {
        let mut state = guard(&self.state);
        if state.collections.contains_key(name) {
            return false;
        }
        state.collections.insert(name.to_string(), Vec::new());
        true
    }

    /// Returns `false` if there was nothing to drop.
    pub fn drop_collection(&self, name: &str) -> bool {
        guard(&self.state).collections.remove(name).is_some()
    }

    pub fn has_collection(&self, name: &str) -> bool {
        guard(&self.state).collections.contains_key(name)
    }

    pub fn collection_names(&self) -> Vec<String> {
        guard(&self.state).collections.keys().cloned().collect()
    }

    /// Insert a document, creating the collection implicitly.
    pub fn insert_one(&self, collection: &str, document: Document) {
        guard(&self.state)
            .collections
            .entry(collection.to_string())
            .or_default()
            .push(document);
    }

    pub fn documents(&self, collection: &str) -> Vec<Document> {
        guard(&self.state)
            .collections
            .get(collection)
            .cloned()
            .unwrap_or_default()
    }

    /// Write a ledger entry directly, as another process would.
    pub fn record_applied(&self, entry: LedgerEntry) {
        guard(&self.state)
            .ledger
            .insert(entry.version.clone(), entry);
    }

    /// Delete a ledger entry directly, as another process would.
    pub fn forget_applied(&self, version: &str) -> bool {
        guard(&self.state).ledger.remove(version).is_some()
    }

    fn ledger_insert(&self, entry: &LedgerEntry) {
        self.record_applied(entry.clone());
    }

    fn ledger_remove(&self, version: &str) {
        self.forget_applied(version);
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TransactionMode {
    Supported,
    Unsupported,
    CommitUnsupported,
}

/// Ledger store over a [`MemoryDb`].
#[derive(Debug, Clone)]
pub struct MemoryStore {
    db: MemoryDb,
    mode: TransactionMode,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryStore {
    pub fn new() -> Self {
        Self {
            db: MemoryDb::new(),
            mode: TransactionMode::Supported,
        }
    }

    /// Store whose `begin` fails like a standalone server.
    pub fn without_transactions() -> Self {
        Self {
            mode: TransactionMode::Unsupported,
            ..Self::new()
        }
    }

    /// Transactions open but the commit reports them unsupported.
    pub fn with_unsupported_commit(mut self) -> Self {
        self.mode = TransactionMode::CommitUnsupported;
        self
    }
}

#[async_trait]
impl MigrationStore for MemoryStore {
    type Db = MemoryDb;
    type Unit = MemoryUnit;

    async fn applied(&self) -> Result<HashMap<String, LedgerEntry>> {
        Ok(guard(&self.db.state)
            .ledger
            .iter()
            .map(|(v, e)| (v.clone(), e.clone()))
            .collect())
    }

    async fn find(&self, version: &str) -> Result<Option<LedgerEntry>> {
        Ok(guard(&self.db.state).ledger.get(version).cloned())
    }

    async fn list_applied(&self) -> Result<Vec<LedgerEntry>> {
        let mut entries: Vec<LedgerEntry> =
            guard(&self.db.state).ledger.values().cloned().collect();
        entries.sort_by(|a, b| {
            b.applied_at
                .cmp(&a.applied_at)
                .then_with(|| b.version.cmp(&a.version))
        });
        Ok(entries)
    }

    async fn insert(&self, entry: &LedgerEntry) -> Result<()> {
        self.db.ledger_insert(entry);
        Ok(())
    }

    async fn remove(&self, version: &str) -> Result<()> {
        self.db.ledger_remove(version);
        Ok(())
    }

    fn db(&self) -> &MemoryDb {
        &self.db
    }

    async fn begin(&self) -> Result<MemoryUnit> {
        if self.mode == TransactionMode::Unsupported {
            return Err(Error::TransactionUnsupported(
                "in-memory store configured without transactions".to_string(),
            ));
        }
        Ok(MemoryUnit {
            target: self.db.clone(),
            staged: MemoryDb::detached(self.db.snapshot()),
            commit_unsupported: self.mode == TransactionMode::CommitUnsupported,
        })
    }
}

/// Staged copy of the store state; swapped in on commit.
#[derive(Debug)]
pub struct MemoryUnit {
    target: MemoryDb,
    staged: MemoryDb,
    commit_unsupported: bool,
}

#[async_trait]
impl UnitOfWork for MemoryUnit {
    type Db = MemoryDb;

    fn db(&self) -> &MemoryDb {
        &self.staged
    }

    async fn insert(&self, entry: &LedgerEntry) -> Result<()> {
        self.staged.ledger_insert(entry);
        Ok(())
    }

    async fn remove(&self, version: &str) -> Result<()> {
        self.staged.ledger_remove(version);
        Ok(())
    }

    async fn commit(self) -> Result<()> {
        if self.commit_unsupported {
            return Err(Error::TransactionUnsupported(
                "commit rejected by in-memory store".to_string(),
            ));
        }
        self.target.restore(self.staged.snapshot());
        Ok(())
    }

    async fn abort(self) -> Result<()> {
        Ok(())
    }
}

// =============================================================================
// LOCK
// =============================================================================

/// Single-slot lock. TTL expiry happens only when [`MemoryLock::sweep`] runs,
/// mirroring a background TTL monitor.
#[derive(Debug)]
pub struct MemoryLock {
    token: Mutex<Option<LockToken>>,
    ttl: chrono::Duration,
    acquisitions: AtomicUsize,
    releases: AtomicUsize,
    fail_release: bool,
}

impl Default for MemoryLock {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryLock {
    pub fn new() -> Self {
        Self {
            token: Mutex::new(None),
            ttl: chrono::Duration::seconds(defaults::LOCK_TTL_SECS as i64),
            acquisitions: AtomicUsize::new(0),
            releases: AtomicUsize::new(0),
            fail_release: false,
        }
    }

    pub fn with_ttl(mut self, ttl: chrono::Duration) -> Self {
        self.ttl = ttl;
        self
    }

    /// Every release attempt fails.
    pub fn with_failing_release(mut self) -> Self {
        self.fail_release = true;
        self
    }

    /// Delete the token if it is older than the TTL at `now`. Returns whether
    /// a token was removed.
    pub fn sweep(&self, now: DateTime<Utc>) -> bool {
        let mut token = guard(&self.token);
        match token.as_ref() {
            Some(t) if t.acquired_at + self.ttl <= now => {
                *token = None;
                true
            }
            _ => false,
        }
    }

    /// Successful acquisitions so far.
    pub fn acquisitions(&self) -> usize {
        self.acquisitions.load(Ordering::SeqCst)
    }

    /// Release calls so far (successful or not).
    pub fn releases(&self) -> usize {
        self.releases.load(Ordering::SeqCst)
    }

    pub fn is_held(&self) -> bool {
        guard(&self.token).is_some()
    }
}

#[async_trait]
impl ExclusiveLock for MemoryLock {
    async fn acquire(&self) -> Result<LockToken> {
        let mut slot = guard(&self.token);
        if slot.is_some() {
            return Err(Error::LockContention);
        }
        let token = LockToken {
            lock_id: defaults::LOCK_ID.to_string(),
            acquired_at: Utc::now(),
            owner: Uuid::new_v4().to_string(),
        };
        *slot = Some(token.clone());
        self.acquisitions.fetch_add(1, Ordering::SeqCst);
        Ok(token)
    }

    async fn release(&self) -> Result<()> {
        self.releases.fetch_add(1, Ordering::SeqCst);
        if self.fail_release {
            return Err(Error::Io(std::io::Error::other("lock store unreachable")));
        }
        *guard(&self.token) = None;
        Ok(())
    }

    async fn holder(&self) -> Result<Option<LockToken>> {
        Ok(guard(&self.token).clone())
    }
}

// =============================================================================
// CHANGE SOURCE
// =============================================================================

/// Canned oplog entries and change-stream events.
///
/// Change events must carry an `_id` document; it doubles as the resume
/// token. `query_log` records its filter but does not evaluate it.
#[derive(Debug, Default)]
pub struct MemoryChangeSource {
    oplog: Vec<Document>,
    changes: Vec<Document>,
    has_oplog: bool,
    hold_open: bool,
    fail_after: Option<usize>,
    queries: Mutex<Vec<(Document, Option<i64>)>>,
    watches: Mutex<Vec<WatchRequest>>,
}

impl MemoryChangeSource {
    pub fn new() -> Self {
        Self {
            has_oplog: true,
            ..Self::default()
        }
    }

    pub fn with_oplog(mut self, entries: Vec<Document>) -> Self {
        self.oplog = entries;
        self
    }

    pub fn with_changes(mut self, events: Vec<Document>) -> Self {
        self.changes = events;
        self
    }

    /// Deployment with no replication log.
    pub fn without_oplog(mut self) -> Self {
        self.has_oplog = false;
        self
    }

    /// Keep streams open after the last event until cancelled.
    pub fn hold_open(mut self) -> Self {
        self.hold_open = true;
        self
    }

    /// Streams fail with [`Error::StreamDisconnected`] after `n` events.
    pub fn fail_after(mut self, n: usize) -> Self {
        self.fail_after = Some(n);
        self
    }

    pub fn last_query(&self) -> Option<(Document, Option<i64>)> {
        guard(&self.queries).last().cloned()
    }

    pub fn last_watch(&self) -> Option<WatchRequest> {
        guard(&self.watches).last().cloned()
    }
}

#[async_trait]
impl ChangeSource for MemoryChangeSource {
    async fn query_log(&self, filter: Document, limit: Option<i64>) -> Result<Vec<Document>> {
        guard(&self.queries).push((filter, limit));
        if !self.has_oplog {
            return Err(Error::OplogSourceNotFound);
        }

        let mut entries = self.oplog.clone();
        entries.sort_by_key(|e| {
            std::cmp::Reverse(
                e.get_timestamp("ts")
                    .map(|ts| (ts.time, ts.increment))
                    .unwrap_or((0, 0)),
            )
        });
        if let Some(limit) = limit.filter(|l| *l > 0) {
            entries.truncate(limit as usize);
        }
        Ok(entries)
    }

    async fn watch(&self, request: WatchRequest) -> Result<Box<dyn ChangeFeed>> {
        guard(&self.watches).push(request.clone());

        let start = match &request.resume_after {
            Some(bytes) => {
                let token: Document = bson::from_slice(bytes)?;
                let position = self
                    .changes
                    .iter()
                    .position(|c| c.get_document("_id").ok() == Some(&token))
                    .ok_or_else(|| {
                        Error::ResumePointLost("resume token not found in history".to_string())
                    })?;
                position + 1
            }
            None => 0,
        };

        Ok(Box::new(MemoryFeed {
            events: self.changes[start..].to_vec(),
            position: 0,
            hold_open: self.hold_open,
            fail_after: self.fail_after,
            token: None,
        }))
    }
}

struct MemoryFeed {
    events: Vec<Document>,
    position: usize,
    hold_open: bool,
    fail_after: Option<usize>,
    token: Option<Vec<u8>>,
}

#[async_trait]
impl ChangeFeed for MemoryFeed {
    async fn next_change(&mut self) -> Result<Option<Document>> {
        if self.fail_after == Some(self.position) {
            return Err(Error::StreamDisconnected("connection reset".to_string()));
        }
        match self.events.get(self.position).cloned() {
            Some(event) => {
                self.position += 1;
                self.token = match event.get_document("_id") {
                    Ok(id) => Some(bson::to_vec(id)?),
                    Err(_) => None,
                };
                Ok(Some(event))
            }
            None if self.hold_open => std::future::pending().await,
            None => Ok(None),
        }
    }

    fn resume_token(&self) -> Option<Vec<u8>> {
        self.token.clone()
    }
}
