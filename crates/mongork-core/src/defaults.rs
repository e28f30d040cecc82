//! Centralized default constants for mongork.
//!
//! Crates reference these instead of defining their own magic numbers.

// =============================================================================
// LEDGER & LOCK
// =============================================================================

/// Collection holding one document per applied step.
pub const MIGRATIONS_COLLECTION: &str = "schema_migrations";

/// Collection holding the single lock document.
pub const LOCK_COLLECTION: &str = "migrations_lock";

/// Fixed id of the lock document.
pub const LOCK_ID: &str = "migration_engine_lock";

/// Seconds after `acquired_at` when the store may reclaim a crashed holder's lock.
pub const LOCK_TTL_SECS: u64 = 600;

/// Bounded time allowed for lock release after a run, independent of caller cancellation.
pub const RELEASE_GRACE_SECS: u64 = 5;

// =============================================================================
// CONNECTION
// =============================================================================

/// Default MongoDB connection string.
pub const MONGO_URL: &str = "mongodb://localhost:27017";

/// Default authentication database.
pub const MONGO_AUTH_SOURCE: &str = "admin";

/// Default maximum connections per pool.
pub const MONGO_MAX_POOL_SIZE: u32 = 10;

/// Default minimum connections per pool.
pub const MONGO_MIN_POOL_SIZE: u32 = 1;

/// Default connect/server-selection timeout in seconds.
pub const MONGO_TIMEOUT_SECS: u64 = 60;

// =============================================================================
// OPLOG
// =============================================================================

/// Database holding the replication log.
pub const OPLOG_DATABASE: &str = "local";

/// Replica-set oplog collection name.
pub const OPLOG_COLLECTION: &str = "oplog.rs";

/// Legacy master/slave oplog collection name.
pub const OPLOG_COLLECTION_LEGACY: &str = "oplog.$main";

/// Default result limit for one-shot oplog queries.
pub const TAIL_LIMIT: i64 = 50;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lock_ttl_outlives_release_grace() {
        assert!(LOCK_TTL_SECS > RELEASE_GRACE_SECS);
    }

    #[test]
    fn test_pool_bounds_ordered() {
        assert!(MONGO_MIN_POOL_SIZE <= MONGO_MAX_POOL_SIZE);
    }
}
