//! Oplog operation kinds and their two spellings.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Kind of replicated write.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OperationKind {
    Insert,
    Update,
    Delete,
    Command,
    Noop,
}

/// The single mapping between oplog codes and change-stream names.
const OPERATIONS: [(OperationKind, &str, &str); 5] = [
    (OperationKind::Insert, "i", "insert"),
    (OperationKind::Update, "u", "update"),
    (OperationKind::Delete, "d", "delete"),
    (OperationKind::Command, "c", "command"),
    (OperationKind::Noop, "n", "noop"),
];

impl OperationKind {
    /// Legacy oplog code (`i`, `u`, `d`, `c`, `n`).
    pub fn code(&self) -> &'static str {
        OPERATIONS
            .iter()
            .find(|(kind, _, _)| kind == self)
            .map(|(_, code, _)| *code)
            .unwrap_or_default()
    }

    /// Change-stream name (`insert`, `update`, ...).
    pub fn name(&self) -> &'static str {
        OPERATIONS
            .iter()
            .find(|(kind, _, _)| kind == self)
            .map(|(_, _, name)| *name)
            .unwrap_or_default()
    }

    pub fn from_code(code: &str) -> Option<Self> {
        OPERATIONS
            .iter()
            .find(|(_, c, _)| *c == code)
            .map(|(kind, _, _)| *kind)
    }

    pub fn from_name(name: &str) -> Option<Self> {
        OPERATIONS
            .iter()
            .find(|(_, _, n)| *n == name)
            .map(|(kind, _, _)| *kind)
    }

    /// Accept either spelling, case-insensitively.
    pub fn parse(input: &str) -> Result<Self> {
        let lowered = input.trim().to_lowercase();
        Self::from_code(&lowered)
            .or_else(|| Self::from_name(&lowered))
            .ok_or_else(|| Error::InvalidOperation(input.trim().to_string()))
    }

    /// Parse a comma-separated list such as `"i,u"` or `"insert, update"`.
    ///
    /// Empty items are skipped and duplicates collapse, keeping first-seen order.
    pub fn parse_list(input: &str) -> Result<Vec<Self>> {
        let mut kinds = Vec::new();
        for item in input.split(',').map(str::trim).filter(|s| !s.is_empty()) {
            let kind = Self::parse(item)?;
            if !kinds.contains(&kind) {
                kinds.push(kind);
            }
        }
        Ok(kinds)
    }

    /// Canonical display name for a raw oplog code; unknown codes pass through.
    pub fn canonical_name(code: &str) -> String {
        Self::from_code(code)
            .map(|k| k.name().to_string())
            .unwrap_or_else(|| code.to_string())
    }
}

impl fmt::Display for OperationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for OperationKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_codes_and_names_round_trip_through_table() {
        for (kind, code, name) in OPERATIONS {
            assert_eq!(kind.code(), code);
            assert_eq!(kind.name(), name);
            assert_eq!(OperationKind::from_code(code), Some(kind));
            assert_eq!(OperationKind::from_name(name), Some(kind));
        }
    }

    #[test]
    fn test_parse_list_spellings_are_equivalent() {
        assert_eq!(
            OperationKind::parse_list("i,u").unwrap(),
            OperationKind::parse_list("insert,update").unwrap()
        );
        assert_eq!(
            OperationKind::parse_list(" I , Update ").unwrap(),
            vec![OperationKind::Insert, OperationKind::Update]
        );
    }

    #[test]
    fn test_parse_list_skips_blanks_and_duplicates() {
        assert_eq!(
            OperationKind::parse_list("d,,delete,").unwrap(),
            vec![OperationKind::Delete]
        );
        assert!(OperationKind::parse_list("").unwrap().is_empty());
    }

    #[test]
    fn test_unknown_operation_rejected() {
        let err = OperationKind::parse_list("i,upsert").unwrap_err();
        assert!(matches!(err, Error::InvalidOperation(op) if op == "upsert"));
    }

    #[test]
    fn test_canonical_name_passes_unknown_through() {
        assert_eq!(OperationKind::canonical_name("i"), "insert");
        assert_eq!(OperationKind::canonical_name("x"), "x");
    }

    #[test]
    fn test_serde_uses_names() {
        assert_eq!(
            serde_json::to_string(&OperationKind::Command).unwrap(),
            "\"command\""
        );
    }
}
