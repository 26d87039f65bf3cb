//! Entry codec.
//!
//! Every field value is stored as `{"value": <json>, "timestamp": <epoch-ms>}`.
//! Decoding never fails loudly: corrupt or expired entries simply read as
//! absent, and the caller decides whether to delete them.

use chrono::{DateTime, Duration, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::StoreResult;

/// Default field time-to-live in hours.
pub const FIELD_TTL_HOURS: i64 = 56;

/// A stored value together with the time it was written.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Entry {
    pub value: Value,
    /// Epoch milliseconds
    #[serde(rename = "timestamp")]
    pub written_at: i64,
}

impl Entry {
    pub fn new(value: Value, written_at: DateTime<Utc>) -> Self {
        Self {
            value,
            written_at: written_at.timestamp_millis(),
        }
    }

    pub fn written_at(&self) -> Option<DateTime<Utc>> {
        Utc.timestamp_millis_opt(self.written_at).single()
    }

    /// Milliseconds elapsed since the write, if representable.
    fn age_millis(&self, now: DateTime<Utc>) -> Option<i64> {
        now.timestamp_millis().checked_sub(self.written_at)
    }

    /// True once strictly more than `ttl` has elapsed since the write.
    ///
    /// An age that cannot be computed counts as expired.
    pub fn is_expired(&self, now: DateTime<Utc>, ttl: Duration) -> bool {
        match self.age_millis(now) {
            Some(age) => age > ttl.num_milliseconds(),
            None => true,
        }
    }
}

/// Result of decoding a raw substrate value.
#[derive(Debug, Clone, PartialEq)]
pub enum Decoded {
    Fresh(Entry),
    /// Well-formed but older than the TTL; safe to delete
    Expired,
    /// Not an entry at all; left in place
    Corrupt,
}

impl Decoded {
    /// The entry, if it is still readable.
    pub fn into_fresh(self) -> Option<Entry> {
        match self {
            Decoded::Fresh(entry) => Some(entry),
            Decoded::Expired | Decoded::Corrupt => None,
        }
    }
}

/// Serialize an entry to its wire format.
pub fn encode(entry: &Entry) -> StoreResult<String> {
    Ok(serde_json::to_string(entry)?)
}

/// Decode a raw substrate value, applying the TTL at `now`.
///
/// A timestamp outside the representable date range is corrupt, not expired.
pub fn decode(raw: &str, now: DateTime<Utc>, ttl: Duration) -> Decoded {
    let entry = match serde_json::from_str::<Entry>(raw) {
        Ok(entry) => entry,
        Err(_) => return Decoded::Corrupt,
    };
    if entry.written_at().is_none() || entry.age_millis(now).is_none() {
        return Decoded::Corrupt;
    }
    if entry.is_expired(now, ttl) {
        Decoded::Expired
    } else {
        Decoded::Fresh(entry)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn at(millis: i64) -> DateTime<Utc> {
        Utc.timestamp_millis_opt(millis).single().unwrap()
    }

    #[test]
    fn test_wire_format() {
        let entry = Entry::new(json!({"crew": ["A", "B"]}), at(1_700_000_000_000));
        let raw = encode(&entry).unwrap();

        let parsed: Value = serde_json::from_str(&raw).unwrap();
        assert_eq!(parsed["timestamp"], json!(1_700_000_000_000i64));
        assert_eq!(parsed["value"]["crew"][1], json!("B"));
    }

    #[test]
    fn test_decode_respects_ttl_boundary() {
        let ttl = Duration::hours(FIELD_TTL_HOURS);
        let raw = encode(&Entry::new(json!(42), at(0))).unwrap();

        let at_limit = at(ttl.num_milliseconds());
        assert_eq!(
            decode(&raw, at_limit, ttl).into_fresh().map(|e| e.value),
            Some(json!(42))
        );

        let past_limit = at(ttl.num_milliseconds() + 1);
        assert_eq!(decode(&raw, past_limit, ttl), Decoded::Expired);
    }

    #[test]
    fn test_decode_fails_open() {
        let ttl = Duration::hours(FIELD_TTL_HOURS);
        let now = at(0);

        assert_eq!(decode("{not json", now, ttl), Decoded::Corrupt);
        assert_eq!(decode("\"plain string\"", now, ttl), Decoded::Corrupt);
        assert_eq!(decode(r#"{"value": 1}"#, now, ttl), Decoded::Corrupt);
        assert_eq!(
            decode(r#"{"value": 1, "timestamp": "yesterday"}"#, now, ttl),
            Decoded::Corrupt
        );
    }

    #[test]
    fn test_out_of_range_timestamps_are_corrupt() {
        let ttl = Duration::hours(FIELD_TTL_HOURS);
        let now = at(1_700_000_000_000);

        let min = format!(r#"{{"value": "x", "timestamp": {}}}"#, i64::MIN);
        let max = format!(r#"{{"value": "x", "timestamp": {}}}"#, i64::MAX);
        assert_eq!(decode(&min, now, ttl), Decoded::Corrupt);
        assert_eq!(decode(&max, now, ttl), Decoded::Corrupt);
    }

    #[test]
    fn test_unrepresentable_age_counts_as_expired() {
        let ttl = Duration::hours(FIELD_TTL_HOURS);
        let entry = Entry {
            value: json!("x"),
            written_at: i64::MIN,
        };
        assert!(entry.written_at().is_none());
        assert!(entry.is_expired(at(1_700_000_000_000), ttl));
    }

    #[test]
    fn test_null_is_a_real_value() {
        let ttl = Duration::hours(FIELD_TTL_HOURS);
        let raw = r#"{"value": null, "timestamp": 0}"#;
        assert_eq!(
            decode(raw, at(0), ttl),
            Decoded::Fresh(Entry {
                value: Value::Null,
                written_at: 0
            })
        );
    }
}
