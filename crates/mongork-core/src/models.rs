//! Core data models for the migration ledger, lock, and run reports.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Direction of a migration run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    /// Apply pending steps in ascending version order.
    Up,
    /// Revert applied steps in descending version order.
    Down,
}

impl Direction {
    pub fn as_str(&self) -> &'static str {
        match self {
            Direction::Up => "up",
            Direction::Down => "down",
        }
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One applied step as persisted in the ledger collection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerEntry {
    pub version: String,
    pub description: String,
    pub applied_at: DateTime<Utc>,
    pub checksum: String,
    /// Written by force-mark: recorded without running the step.
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub forced: bool,
}

/// The exclusivity token stored while an engine run is executing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LockToken {
    pub lock_id: String,
    pub acquired_at: DateTime<Utc>,
    /// Diagnostic id of the acquiring run; never used for ownership checks.
    pub owner: String,
}

/// Status row for one registered step.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StepStatus {
    pub version: String,
    pub description: String,
    pub applied: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub applied_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub forced: bool,
}

/// Ordered versions a run intends to act on.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Plan {
    pub direction: Direction,
    pub versions: Vec<String>,
}

impl Plan {
    pub fn is_empty(&self) -> bool {
        self.versions.is_empty()
    }

    pub fn len(&self) -> usize {
        self.versions.len()
    }
}

impl fmt::Display for Plan {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.versions.is_empty() {
            return writeln!(f, "No migrations to {}.", self.direction);
        }
        writeln!(f, "Planned migrations to {}:", self.direction)?;
        for (i, version) in self.versions.iter().enumerate() {
            writeln!(f, "  {:02}. {}", i + 1, version)?;
        }
        Ok(())
    }
}

/// Options for an apply or revert run.
#[derive(Debug, Clone, Default)]
pub struct RunOptions {
    /// Boundary version. Inclusive for apply, exclusive for revert.
    pub target: Option<String>,
    /// Compute and return the plan without taking the lock or executing.
    pub dry_run: bool,
}

impl RunOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn target(mut self, version: impl Into<String>) -> Self {
        let version = version.into();
        self.target = (!version.is_empty()).then_some(version);
        self
    }

    pub fn dry_run(mut self, dry_run: bool) -> Self {
        self.dry_run = dry_run;
        self
    }
}

/// Result of executing one planned step.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StepOutcome {
    pub version: String,
    /// False when the step ran without a transaction (fallback path).
    pub atomic: bool,
}

/// Summary of an apply or revert run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunReport {
    pub plan: Plan,
    pub executed: Vec<StepOutcome>,
    /// Planned versions already in the desired state when their turn came.
    pub skipped: Vec<String>,
    pub dry_run: bool,
}

impl RunReport {
    pub fn direction(&self) -> Direction {
        self.plan.direction
    }

    /// Steps whose mutation and ledger write were not atomic as a pair.
    pub fn degraded(&self) -> impl Iterator<Item = &StepOutcome> {
        self.executed.iter().filter(|o| !o.atomic)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_direction_display() {
        assert_eq!(Direction::Up.to_string(), "up");
        assert_eq!(Direction::Down.to_string(), "down");
    }

    #[test]
    fn test_direction_serde_lowercase() {
        assert_eq!(serde_json::to_string(&Direction::Down).unwrap(), "\"down\"");
    }

    #[test]
    fn test_empty_plan_is_reported_explicitly() {
        let plan = Plan {
            direction: Direction::Up,
            versions: vec![],
        };
        assert_eq!(plan.to_string(), "No migrations to up.\n");
    }

    #[test]
    fn test_plan_display_numbers_versions() {
        let plan = Plan {
            direction: Direction::Down,
            versions: vec!["20240103_c".into(), "20240102_b".into()],
        };
        let text = plan.to_string();
        assert!(text.starts_with("Planned migrations to down:"));
        assert!(text.contains("  01. 20240103_c"));
        assert!(text.contains("  02. 20240102_b"));
    }

    #[test]
    fn test_run_options_empty_target_means_none() {
        assert_eq!(RunOptions::new().target("").target, None);
        assert_eq!(
            RunOptions::new().target("20240101_a").target.as_deref(),
            Some("20240101_a")
        );
    }

    #[test]
    fn test_forced_flag_omitted_when_false() {
        let entry = LedgerEntry {
            version: "20240101_a".into(),
            description: "a".into(),
            applied_at: Utc::now(),
            checksum: "x".into(),
            forced: false,
        };
        let json = serde_json::to_value(&entry).unwrap();
        assert!(json.get("forced").is_none());
    }

    #[test]
    fn test_run_report_degraded_steps() {
        let report = RunReport {
            plan: Plan {
                direction: Direction::Up,
                versions: vec!["20240101_a".into(), "20240102_b".into()],
            },
            executed: vec![
                StepOutcome {
                    version: "20240101_a".into(),
                    atomic: true,
                },
                StepOutcome {
                    version: "20240102_b".into(),
                    atomic: false,
                },
            ],
            skipped: vec![],
            dry_run: false,
        };
        let degraded: Vec<_> = report.degraded().map(|o| o.version.as_str()).collect();
        assert_eq!(degraded, vec!["20240102_b"]);
    }
}
