//! Step version format: `YYYYMMDD[_HHMMSS][_slug]`.

use chrono::{DateTime, Utc};
use once_cell::sync::Lazy;
use regex::Regex;

use crate::error::{Error, Result};

static VERSION_PATTERN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^\d{8}(?:_\d{3,6})?(?:_[a-z0-9_]+)?$").expect("static version pattern")
});

/// Check a version string against the accepted format.
pub fn validate_version(version: &str) -> Result<()> {
    if VERSION_PATTERN.is_match(version) {
        Ok(())
    } else {
        Err(Error::InvalidVersionFormat(version.to_string()))
    }
}

/// Generate a timestamped version for a new step, e.g.
/// `20240315_142501_add_user_index`.
pub fn generate_version(name: &str, at: DateTime<Utc>) -> String {
    let slug = slugify(name);
    let stamp = at.format("%Y%m%d_%H%M%S");
    if slug.is_empty() {
        stamp.to_string()
    } else {
        format!("{stamp}_{slug}")
    }
}

/// Lower-case, map spaces and hyphens to `_`, drop everything outside `[a-z0-9_]`.
pub fn slugify(name: &str) -> String {
    let mapped: String = name
        .trim()
        .to_lowercase()
        .chars()
        .filter_map(|c| match c {
            ' ' | '-' => Some('_'),
            'a'..='z' | '0'..='9' | '_' => Some(c),
            _ => None,
        })
        .collect();
    mapped.trim_matches('_').to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_valid_versions() {
        for v in [
            "20240101",
            "20240101_a",
            "20240101_001",
            "20240101_120000",
            "20240101_120000_add_users",
            "20240101_add_users_v2",
        ] {
            assert!(validate_version(v).is_ok(), "{v} should be valid");
        }
    }

    #[test]
    fn test_invalid_versions() {
        for v in [
            "",
            "2024010",
            "v20240101",
            "20240101_AddUsers",
            "20240101-a",
            "20240101_a b",
        ] {
            assert!(
                matches!(validate_version(v), Err(Error::InvalidVersionFormat(_))),
                "{v} should be rejected"
            );
        }
    }

    #[test]
    fn test_generate_version_format() {
        let at = Utc.with_ymd_and_hms(2024, 3, 15, 14, 25, 1).unwrap();
        let v = generate_version("Add user-index", at);
        assert_eq!(v, "20240315_142501_add_user_index");
        assert!(validate_version(&v).is_ok());
    }

    #[test]
    fn test_generate_version_drops_symbols() {
        let at = Utc.with_ymd_and_hms(2024, 3, 15, 0, 0, 0).unwrap();
        assert_eq!(generate_version("Users (v2)!", at), "20240315_000000_users_v2");
        assert_eq!(generate_version("!!!", at), "20240315_000000");
    }

    #[test]
    fn test_versions_sort_chronologically() {
        let mut versions = vec!["20240102_a", "20240101_120000_b", "20240101_b"];
        versions.sort();
        assert_eq!(versions[0], "20240101_120000_b");
        assert_eq!(versions[2], "20240102_a");
    }
}
