//! Plan computation: which versions a run acts on, and in what order.

use std::collections::HashSet;

use crate::error::{Error, Result};
use crate::models::Direction;

/// Compute the ordered versions to apply or revert.
///
/// - `Up`: unapplied versions ascending, up to and including `target`.
/// - `Down`: applied versions descending, stopping before `target` (the
///   target stays applied).
///
/// Versions in `applied` that are not registered are never planned. A
/// non-empty target that is not registered fails with
/// [`Error::MigrationNotFound`].
pub fn compute_plan<S: AsRef<str>>(
    direction: Direction,
    registered: &[S],
    applied: &HashSet<String>,
    target: Option<&str>,
) -> Result<Vec<String>> {
    let mut versions: Vec<&str> = registered.iter().map(|v| v.as_ref()).collect();
    versions.sort_unstable();
    versions.dedup();

    let target = target.filter(|t| !t.is_empty());
    if let Some(t) = target {
        if versions.binary_search(&t).is_err() {
            return Err(Error::MigrationNotFound(t.to_string()));
        }
    }

    let plan = match direction {
        Direction::Up => versions
            .into_iter()
            .take_while(|v| target.map_or(true, |t| *v <= t))
            .filter(|v| !applied.contains(*v))
            .map(str::to_string)
            .collect(),
        Direction::Down => versions
            .into_iter()
            .rev()
            .take_while(|v| target.map_or(true, |t| *v > t))
            .filter(|v| applied.contains(*v))
            .map(str::to_string)
            .collect(),
    };
    Ok(plan)
}

#[cfg(test)]
mod tests {
    use super::*;

    const ALL: [&str; 3] = ["20240101_a", "20240102_b", "20240103_c"];

    fn applied(vs: &[&str]) -> HashSet<String> {
        vs.iter().map(|v| v.to_string()).collect()
    }

    #[test]
    fn test_up_with_nothing_applied_is_all_ascending() {
        let plan = compute_plan(Direction::Up, &ALL, &HashSet::new(), None).unwrap();
        assert_eq!(plan, ALL);
    }

    #[test]
    fn test_down_with_all_applied_is_all_descending() {
        let plan = compute_plan(Direction::Down, &ALL, &applied(&ALL), None).unwrap();
        assert_eq!(plan, vec!["20240103_c", "20240102_b", "20240101_a"]);
    }

    #[test]
    fn test_up_target_is_inclusive() {
        let plan = compute_plan(Direction::Up, &ALL, &HashSet::new(), Some("20240102_b")).unwrap();
        assert_eq!(plan, vec!["20240101_a", "20240102_b"]);
    }

    #[test]
    fn test_up_never_exceeds_target() {
        for target in ALL {
            for done in [&[][..], &ALL[..1], &ALL[..2]] {
                let plan = compute_plan(Direction::Up, &ALL, &applied(done), Some(target)).unwrap();
                assert!(plan.iter().all(|v| v.as_str() <= target));
            }
        }
    }

    #[test]
    fn test_up_skips_applied_gaps() {
        let plan =
            compute_plan(Direction::Up, &ALL, &applied(&["20240102_b"]), None).unwrap();
        assert_eq!(plan, vec!["20240101_a", "20240103_c"]);
    }

    #[test]
    fn test_down_target_stays_applied() {
        let plan =
            compute_plan(Direction::Down, &ALL, &applied(&ALL), Some("20240101_a")).unwrap();
        assert_eq!(plan, vec!["20240103_c", "20240102_b"]);
    }

    #[test]
    fn test_down_to_latest_is_empty() {
        let plan =
            compute_plan(Direction::Down, &ALL, &applied(&ALL), Some("20240103_c")).unwrap();
        assert!(plan.is_empty());
    }

    #[test]
    fn test_unknown_target_rejected() {
        let err = compute_plan(Direction::Up, &ALL, &HashSet::new(), Some("20991231_z")).unwrap_err();
        assert!(matches!(err, Error::MigrationNotFound(v) if v == "20991231_z"));
    }

    #[test]
    fn test_empty_target_means_none() {
        let plan = compute_plan(Direction::Up, &ALL, &HashSet::new(), Some("")).unwrap();
        assert_eq!(plan.len(), 3);
    }

    #[test]
    fn test_stale_ledger_entries_never_planned() {
        let plan = compute_plan(
            Direction::Down,
            &ALL[..2],
            &applied(&["20240101_a", "20231231_gone"]),
            None,
        )
        .unwrap();
        assert_eq!(plan, vec!["20240101_a"]);
    }

    #[test]
    fn test_input_order_does_not_matter() {
        let shuffled = ["20240103_c", "20240101_a", "20240102_b"];
        let plan = compute_plan(Direction::Up, &shuffled, &HashSet::new(), None).unwrap();
        assert_eq!(plan, ALL);
    }
}
