//! Filtering of the applied-migration history.

use chrono::{DateTime, Utc};
use regex::Regex;

use crate::error::{Error, Result};
use crate::models::LedgerEntry;

/// Criteria for narrowing [`crate::MigrationEngine::list_applied`].
///
/// All criteria are combined with AND. Blank strings are ignored.
#[derive(Debug, Clone, Default)]
pub struct AppliedFilter {
    version: Option<String>,
    search: Option<String>,
    pattern: Option<Regex>,
    from: Option<DateTime<Utc>>,
    to: Option<DateTime<Utc>>,
    limit: Option<usize>,
}

impl AppliedFilter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Exact version match.
    pub fn version(mut self, version: impl Into<String>) -> Self {
        self.version = non_blank(version.into());
        self
    }

    /// Case-insensitive substring of the version or the description.
    pub fn search(mut self, needle: impl Into<String>) -> Self {
        self.search = non_blank(needle.into()).map(|s| s.to_lowercase());
        self
    }

    /// Regular expression matched against `"{version} {description}"`.
    pub fn regex(mut self, pattern: &str) -> Result<Self> {
        self.pattern = if pattern.is_empty() {
            None
        } else {
            Some(Regex::new(pattern).map_err(|e| Error::InvalidPattern(e.to_string()))?)
        };
        Ok(self)
    }

    /// Applied at or after `from`.
    pub fn from(mut self, from: DateTime<Utc>) -> Self {
        self.from = Some(from);
        self
    }

    /// Applied at or before `to`.
    pub fn to(mut self, to: DateTime<Utc>) -> Self {
        self.to = Some(to);
        self
    }

    /// Keep at most `limit` entries; zero means unlimited.
    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = (limit > 0).then_some(limit);
        self
    }

    pub fn matches(&self, entry: &LedgerEntry) -> bool {
        if let Some(version) = &self.version {
            if &entry.version != version {
                return false;
            }
        }
        if self.from.is_some_and(|from| entry.applied_at < from) {
            return false;
        }
        if self.to.is_some_and(|to| entry.applied_at > to) {
            return false;
        }
        if let Some(pattern) = &self.pattern {
            let haystack = format!("{} {}", entry.version, entry.description);
            if !pattern.is_match(&haystack) {
                return false;
            }
        }
        if let Some(needle) = &self.search {
            if !entry.version.to_lowercase().contains(needle.as_str())
                && !entry.description.to_lowercase().contains(needle.as_str())
            {
                return false;
            }
        }
        true
    }

    /// Filter `entries`, preserving their order, then apply the limit.
    pub fn apply(&self, entries: Vec<LedgerEntry>) -> Vec<LedgerEntry> {
        let matched = entries.into_iter().filter(|e| self.matches(e));
        match self.limit {
            Some(limit) => matched.take(limit).collect(),
            None => matched.collect(),
        }
    }
}

fn non_blank(value: String) -> Option<String> {
    let trimmed = value.trim();
    (!trimmed.is_empty()).then(|| trimmed.to_string())
}
