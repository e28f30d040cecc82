//! Step fingerprints recorded in the ledger.

use chrono::Utc;
use sha2::{Digest, Sha256};

use crate::error::{Error, Result};
use crate::models::LedgerEntry;
use crate::traits::Step;

/// Lowercase hex SHA-256 of `"{version}:{description}"`.
pub fn fingerprint_parts(version: &str, description: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(version.as_bytes());
    hasher.update(b":");
    hasher.update(description.as_bytes());
    hex::encode(hasher.finalize())
}

/// Fingerprint of a registered step.
pub fn fingerprint<D: Send + Sync>(step: &dyn Step<D>) -> String {
    fingerprint_parts(step.version(), step.description())
}

/// Fail with [`Error::ChecksumMismatch`] when the recorded checksum no longer
/// matches the step's current definition. `expected` carries the recorded
/// value, `got` the current fingerprint.
pub fn validate<D: Send + Sync>(step: &dyn Step<D>, entry: &LedgerEntry) -> Result<()> {
    let current = fingerprint(step);
    if entry.checksum == current {
        Ok(())
    } else {
        Err(Error::ChecksumMismatch {
            version: step.version().to_string(),
            expected: entry.checksum.clone(),
            got: current,
        })
    }
}

/// Ledger entry for a step that is about to be (or was just) applied.
pub fn new_entry<D: Send + Sync>(step: &dyn Step<D>) -> LedgerEntry {
    LedgerEntry {
        version: step.version().to_string(),
        description: step.description().to_string(),
        applied_at: Utc::now(),
        checksum: fingerprint(step),
        forced: false,
    }
}

/// Ledger entry written by force-mark, without running the step.
pub fn forced_entry<D: Send + Sync>(step: &dyn Step<D>) -> LedgerEntry {
    LedgerEntry {
        forced: true,
        ..new_entry(step)
    }
}
