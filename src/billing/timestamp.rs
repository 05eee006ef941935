//! Timestamp Normalization
//!
//! Tenant and subscription documents reach us with times in several shapes
//! depending on which code path wrote them: ISO strings from the browser,
//! epoch milliseconds, the store's own `{seconds, nanoseconds}` timestamp, and
//! the deferred server-timestamp sentinel that has not been stamped yet.
//! Everything funnels through [`normalize`] so call sites never sniff types.

use chrono::{DateTime, NaiveDate, NaiveDateTime, TimeZone, Utc};
use serde::Deserialize;
use serde_json::Value;

/// Largest magnitude (in milliseconds) a browser date can represent
const MAX_EPOCH_MILLIS: f64 = 8.64e15;

/// A time value exactly as it was read from a document
#[derive(Debug, Clone, PartialEq, Default, Deserialize)]
#[serde(from = "Value")]
pub enum RawTimestamp {
    /// ISO-8601 string
    Iso(String),
    /// Milliseconds since the Unix epoch
    EpochMillis(f64),
    /// Native store timestamp (`{seconds, nanoseconds}`)
    StoreTimestamp { seconds: i64, nanos: i64 },
    /// Already-constructed instant
    Native(DateTime<Utc>),
    /// Server-assigned timestamp written but not yet visible to the reader
    ServerPending,
    /// Null, absent, or a shape we do not recognise
    #[default]
    Missing,
}

/// Outcome of normalizing a [`RawTimestamp`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NormalizedTime {
    Resolved(DateTime<Utc>),
    Unresolved,
}

impl NormalizedTime {
    pub fn instant(self) -> Option<DateTime<Utc>> {
        match self {
            Self::Resolved(at) => Some(at),
            Self::Unresolved => None,
        }
    }

    pub fn is_resolved(self) -> bool {
        matches!(self, Self::Resolved(_))
    }
}

impl RawTimestamp {
    /// Decode a raw JSON document field
    pub fn from_value(value: &Value) -> Self {
        match value {
            Value::String(s) => Self::Iso(s.clone()),
            Value::Number(n) => n.as_f64().map(Self::EpochMillis).unwrap_or(Self::Missing),
            Value::Object(map) => {
                let is_pending = map.get("_methodName").and_then(Value::as_str) == Some("serverTimestamp")
                    || map.get(".sv").and_then(Value::as_str) == Some("timestamp");
                if is_pending {
                    return Self::ServerPending;
                }

                let seconds = map.get("seconds").or_else(|| map.get("_seconds")).and_then(Value::as_i64);
                let nanos = map
                    .get("nanoseconds")
                    .or_else(|| map.get("_nanoseconds"))
                    .and_then(Value::as_i64)
                    .unwrap_or(0);
                match seconds {
                    Some(seconds) => Self::StoreTimestamp { seconds, nanos },
                    None => Self::Missing,
                }
            }
            _ => Self::Missing,
        }
    }

    /// True when the value is the deferred server-timestamp sentinel
    pub fn is_server_pending(&self) -> bool {
        matches!(self, Self::ServerPending)
    }

    pub fn normalize(&self) -> NormalizedTime {
        normalize(self)
    }
}

impl From<Value> for RawTimestamp {
    fn from(value: Value) -> Self {
        Self::from_value(&value)
    }
}

impl From<DateTime<Utc>> for RawTimestamp {
    fn from(at: DateTime<Utc>) -> Self {
        Self::Native(at)
    }
}

/// Resolve any raw time value to an instant, or `Unresolved`.
///
/// Never panics. Malformed input is `Unresolved`, never the epoch.
pub fn normalize(raw: &RawTimestamp) -> NormalizedTime {
    let resolved = match raw {
        RawTimestamp::ServerPending | RawTimestamp::Missing => None,
        RawTimestamp::Native(at) => Some(*at),
        RawTimestamp::Iso(s) => parse_iso(s),
        RawTimestamp::EpochMillis(ms) => from_epoch_millis(*ms),
        RawTimestamp::StoreTimestamp { seconds, nanos } => u32::try_from(*nanos)
            .ok()
            .filter(|n| *n < 1_000_000_000)
            .and_then(|n| Utc.timestamp_opt(*seconds, n).single()),
    };

    match resolved {
        Some(at) => NormalizedTime::Resolved(at),
        None => NormalizedTime::Unresolved,
    }
}

fn parse_iso(s: &str) -> Option<DateTime<Utc>> {
    let s = s.trim();
    if s.is_empty() {
        return None;
    }

    if let Ok(at) = DateTime::parse_from_rfc3339(s) {
        return Some(at.with_timezone(&Utc));
    }

    // Offset-less forms are read as UTC
    if let Ok(naive) = NaiveDateTime::parse_from_str(s, "%Y-%m-%dT%H:%M:%S%.f") {
        return Some(Utc.from_utc_datetime(&naive));
    }

    NaiveDate::parse_from_str(s, "%Y-%m-%d")
        .ok()
        .and_then(|date| date.and_hms_opt(0, 0, 0))
        .map(|naive| Utc.from_utc_datetime(&naive))
}

fn from_epoch_millis(ms: f64) -> Option<DateTime<Utc>> {
    if !ms.is_finite() || ms.abs() > MAX_EPOCH_MILLIS {
        return None;
    }
    Utc.timestamp_millis_opt(ms.trunc() as i64).single()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn at(s: &str) -> DateTime<Utc> {
        DateTime::parse_from_rfc3339(s).unwrap().with_timezone(&Utc)
    }

    #[test]
    fn test_iso_with_offset() {
        let raw = RawTimestamp::Iso("2025-03-01T12:00:00+01:00".into());
        assert_eq!(normalize(&raw), NormalizedTime::Resolved(at("2025-03-01T11:00:00Z")));
    }

    #[test]
    fn test_browser_iso_string() {
        let raw = RawTimestamp::Iso("2025-03-01T12:00:00.123Z".into());
        let expected = at("2025-03-01T12:00:00Z") + chrono::Duration::milliseconds(123);
        assert_eq!(normalize(&raw), NormalizedTime::Resolved(expected));
    }

    #[test]
    fn test_naive_and_date_only_strings_are_utc() {
        assert_eq!(
            normalize(&RawTimestamp::Iso("2025-03-01T08:30:00".into())),
            NormalizedTime::Resolved(at("2025-03-01T08:30:00Z"))
        );
        assert_eq!(
            normalize(&RawTimestamp::Iso("2025-03-01".into())),
            NormalizedTime::Resolved(at("2025-03-01T00:00:00Z"))
        );
    }

    #[test]
    fn test_malformed_string_is_unresolved_not_epoch() {
        for s in ["", "   ", "not a date", "2025-13-45", "Invalid Date"] {
            assert_eq!(normalize(&RawTimestamp::Iso(s.into())), NormalizedTime::Unresolved, "{s}");
        }
    }

    #[test]
    fn test_epoch_millis() {
        let raw = RawTimestamp::EpochMillis(1_740_830_400_000.0);
        assert_eq!(normalize(&raw), NormalizedTime::Resolved(at("2025-03-01T12:00:00Z")));
        assert_eq!(normalize(&RawTimestamp::EpochMillis(f64::NAN)), NormalizedTime::Unresolved);
        assert_eq!(normalize(&RawTimestamp::EpochMillis(f64::INFINITY)), NormalizedTime::Unresolved);
        assert_eq!(normalize(&RawTimestamp::EpochMillis(1e20)), NormalizedTime::Unresolved);
    }

    #[test]
    fn test_pending_and_missing_are_unresolved() {
        assert_eq!(normalize(&RawTimestamp::ServerPending), NormalizedTime::Unresolved);
        assert_eq!(normalize(&RawTimestamp::Missing), NormalizedTime::Unresolved);
    }

    #[test]
    fn test_from_value_shapes() {
        assert_eq!(
            RawTimestamp::from_value(&json!("2025-03-01T12:00:00Z")),
            RawTimestamp::Iso("2025-03-01T12:00:00Z".into())
        );
        assert_eq!(RawTimestamp::from_value(&json!(1000)), RawTimestamp::EpochMillis(1000.0));
        assert_eq!(
            RawTimestamp::from_value(&json!({"seconds": 1_740_830_400, "nanoseconds": 0})),
            RawTimestamp::StoreTimestamp { seconds: 1_740_830_400, nanos: 0 }
        );
        assert_eq!(
            RawTimestamp::from_value(&json!({"_seconds": 5, "_nanoseconds": 7})),
            RawTimestamp::StoreTimestamp { seconds: 5, nanos: 7 }
        );
        assert_eq!(
            RawTimestamp::from_value(&json!({"_methodName": "serverTimestamp"})),
            RawTimestamp::ServerPending
        );
        assert_eq!(RawTimestamp::from_value(&json!({".sv": "timestamp"})), RawTimestamp::ServerPending);
        assert_eq!(RawTimestamp::from_value(&json!(null)), RawTimestamp::Missing);
        assert_eq!(RawTimestamp::from_value(&json!({"foo": 1})), RawTimestamp::Missing);
        assert_eq!(RawTimestamp::from_value(&json!(true)), RawTimestamp::Missing);
    }

    #[test]
    fn test_store_timestamp_resolves() {
        let raw = RawTimestamp::from_value(&json!({"seconds": 1_740_830_400, "nanoseconds": 500_000_000}));
        let expected = at("2025-03-01T12:00:00Z") + chrono::Duration::milliseconds(500);
        assert_eq!(normalize(&raw), NormalizedTime::Resolved(expected));

        let bad = RawTimestamp::StoreTimestamp { seconds: 0, nanos: -1 };
        assert_eq!(normalize(&bad), NormalizedTime::Unresolved);
    }
}
