//! Time bound parsing for ledger and oplog filters.

use chrono::{DateTime, NaiveDate, Utc};

use crate::error::{Error, Result};

/// Parse a time bound given as RFC 3339 or a bare `YYYY-MM-DD` date
/// (interpreted as midnight UTC).
pub fn parse_time(input: &str) -> Result<DateTime<Utc>> {
    let trimmed = input.trim();
    if let Ok(ts) = DateTime::parse_from_rfc3339(trimmed) {
        return Ok(ts.with_timezone(&Utc));
    }
    NaiveDate::parse_from_str(trimmed, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .map(|dt| dt.and_utc())
        .ok_or_else(|| Error::InvalidTimeFormat(input.to_string()))
}

/// Parse an optional bound, treating blank input as absent.
pub fn parse_optional_time(input: Option<&str>) -> Result<Option<DateTime<Utc>>> {
    match input.map(str::trim) {
        None | Some("") => Ok(None),
        Some(s) => parse_time(s).map(Some),
    }
}

/// Convert to a BSON timestamp (seconds precision, increment 0) for oplog `ts` matching.
pub fn to_bson_timestamp(at: DateTime<Utc>) -> bson::Timestamp {
    bson::Timestamp {
        time: at.timestamp().clamp(0, u32::MAX as i64) as u32,
        increment: 0,
    }
}

/// Last oplog timestamp inside the second of `at`, for inclusive upper bounds.
pub fn to_bson_timestamp_ceiling(at: DateTime<Utc>) -> bson::Timestamp {
    bson::Timestamp {
        increment: u32::MAX,
        ..to_bson_timestamp(at)
    }
}

/// Convert a BSON timestamp back to wall-clock time.
pub fn from_bson_timestamp(ts: bson::Timestamp) -> DateTime<Utc> {
    DateTime::from_timestamp(ts.time as i64, 0).unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_parse_rfc3339() {
        let ts = parse_time("2024-03-01T12:30:00Z").unwrap();
        assert_eq!(ts, Utc.with_ymd_and_hms(2024, 3, 1, 12, 30, 0).unwrap());
    }

    #[test]
    fn test_parse_rfc3339_with_offset_normalizes_to_utc() {
        let ts = parse_time("2024-03-01T14:30:00+02:00").unwrap();
        assert_eq!(ts, Utc.with_ymd_and_hms(2024, 3, 1, 12, 30, 0).unwrap());
    }

    #[test]
    fn test_parse_date_is_midnight_utc() {
        let ts = parse_time("2024-03-01").unwrap();
        assert_eq!(ts, Utc.with_ymd_and_hms(2024, 3, 1, 0, 0, 0).unwrap());
    }

    #[test]
    fn test_parse_rejects_other_formats() {
        for bad in ["yesterday", "01/03/2024", "2024-13-01", "20240301"] {
            assert!(
                matches!(parse_time(bad), Err(Error::InvalidTimeFormat(_))),
                "{bad} should be rejected"
            );
        }
    }

    #[test]
    fn test_optional_blank_is_none() {
        assert_eq!(parse_optional_time(None).unwrap(), None);
        assert_eq!(parse_optional_time(Some("  ")).unwrap(), None);
        assert!(parse_optional_time(Some("2024-01-01")).unwrap().is_some());
    }

    #[test]
    fn test_bson_timestamp_conversion() {
        let at = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let ts = to_bson_timestamp(at);
        assert_eq!(ts.time, 1_704_067_200);
        assert_eq!(ts.increment, 0);
        assert_eq!(from_bson_timestamp(ts), at);
    }
}
