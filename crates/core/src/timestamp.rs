//! Serde helpers for timestamps coming from the remote API.
//!
//! The server emits naive ISO-8601 timestamps (no offset); those are read as
//! UTC. Values are always written back as RFC 3339.

use chrono::{DateTime, NaiveDateTime, Utc};
use serde::{Deserialize, Deserializer, Serializer};

/// Parse an RFC 3339 or naive ISO-8601 timestamp, assuming UTC for the latter.
pub fn parse(s: &str) -> Option<DateTime<Utc>> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Some(dt.with_timezone(&Utc));
    }
    NaiveDateTime::parse_from_str(s, "%Y-%m-%dT%H:%M:%S%.f")
        .ok()
        .map(|naive| naive.and_utc())
}

pub fn serialize<S: Serializer>(value: &DateTime<Utc>, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_str(&value.to_rfc3339())
}

pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<DateTime<Utc>, D::Error> {
    let raw = String::deserialize(deserializer)?;
    parse(&raw).ok_or_else(|| serde::de::Error::custom(format!("invalid timestamp '{raw}'")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn naive_server_timestamps_are_utc() {
        let parsed = parse("2024-03-01T10:15:30.123456").unwrap();
        assert_eq!(parsed.date_naive(), Utc.with_ymd_and_hms(2024, 3, 1, 0, 0, 0).unwrap().date_naive());
        assert_eq!(parsed.timestamp(), Utc.with_ymd_and_hms(2024, 3, 1, 10, 15, 30).unwrap().timestamp());
    }

    #[test]
    fn rfc3339_offsets_are_normalised() {
        let parsed = parse("2024-03-01T12:00:00+02:00").unwrap();
        assert_eq!(parsed, Utc.with_ymd_and_hms(2024, 3, 1, 10, 0, 0).unwrap());
    }

    #[test]
    fn garbage_is_rejected() {
        assert!(parse("yesterday").is_none());
    }
}
