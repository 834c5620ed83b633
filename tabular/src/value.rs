//! FILENAME: tabular/src/value.rs
//! PURPOSE: Defines the scalar value a record field can hold.
//! CONTEXT: Values arrive already deserialized from the caller. Coercions to
//! numbers, dates and display strings live here so every consumer (grouping,
//! aggregation, conditions) agrees on them.

use std::cmp::Ordering;
use std::fmt;

use chrono::{DateTime, NaiveDate, NaiveDateTime};
use serde::{Deserialize, Serialize};

/// A single scalar inside a record.
///
/// Serialized untagged so a JSON record such as
/// `{"region": "North", "amount": 10, "date": "2024-02-01"}` maps directly
/// onto values. Strings shaped like ISO dates deserialize as `Date`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Value {
    Empty,
    Boolean(bool),
    Number(f64),
    Date(NaiveDate),
    Text(String),
}

impl Default for Value {
    fn default() -> Self {
        Value::Empty
    }
}

impl Value {
    pub fn text(s: impl Into<String>) -> Self {
        Value::Text(s.into())
    }

    pub fn is_empty(&self) -> bool {
        matches!(self, Value::Empty)
    }

    /// Numeric view of the value.
    ///
    /// Numbers pass through and numeric text is parsed. Booleans, dates,
    /// empty values and non-finite results are not numbers.
    pub fn as_number(&self) -> Option<f64> {
        let n = match self {
            Value::Number(n) => *n,
            Value::Text(s) => {
                let trimmed = s.trim();
                if trimmed.is_empty() {
                    return None;
                }
                trimmed.parse::<f64>().ok()?
            }
            _ => return None,
        };
        if n.is_finite() {
            Some(n)
        } else {
            None
        }
    }

    /// Calendar date view of the value. Text is parsed with [`parse_date`].
    pub fn as_date(&self) -> Option<NaiveDate> {
        match self {
            Value::Date(d) => Some(*d),
            Value::Text(s) => parse_date(s),
            _ => None,
        }
    }

    /// Display string used for group keys. `None` for empty values.
    pub fn display_string(&self) -> Option<String> {
        match self {
            Value::Empty => None,
            other => Some(other.to_string()),
        }
    }

    /// Total ordering used when sorting group keys and comparing values.
    /// Empty < Number < Date < Text < Boolean.
    pub fn compare(&self, other: &Value) -> Ordering {
        match (self, other) {
            (Value::Empty, Value::Empty) => Ordering::Equal,
            (Value::Empty, _) => Ordering::Less,
            (_, Value::Empty) => Ordering::Greater,

            (Value::Number(a), Value::Number(b)) => a.partial_cmp(b).unwrap_or(Ordering::Equal),
            (Value::Number(_), _) => Ordering::Less,
            (_, Value::Number(_)) => Ordering::Greater,

            (Value::Date(a), Value::Date(b)) => a.cmp(b),
            (Value::Date(_), _) => Ordering::Less,
            (_, Value::Date(_)) => Ordering::Greater,

            (Value::Text(a), Value::Text(b)) => a.cmp(b),
            (Value::Text(_), _) => Ordering::Less,
            (_, Value::Text(_)) => Ordering::Greater,

            (Value::Boolean(a), Value::Boolean(b)) => a.cmp(b),
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Empty => Ok(()),
            Value::Boolean(b) => write!(f, "{}", b),
            Value::Number(n) => write!(f, "{}", n),
            Value::Date(d) => write!(f, "{}", d.format("%Y-%m-%d")),
            Value::Text(s) => f.write_str(s),
        }
    }
}

impl From<f64> for Value {
    fn from(n: f64) -> Self {
        Value::Number(n)
    }
}

impl From<i64> for Value {
    fn from(n: i64) -> Self {
        Value::Number(n as f64)
    }
}

impl From<i32> for Value {
    fn from(n: i32) -> Self {
        Value::Number(n as f64)
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Boolean(b)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::Text(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::Text(s)
    }
}

impl From<NaiveDate> for Value {
    fn from(d: NaiveDate) -> Self {
        Value::Date(d)
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(v: Option<T>) -> Self {
        v.map_or(Value::Empty, Into::into)
    }
}

// ============================================================================
// DATE PARSING
// ============================================================================

const DATE_FORMATS: [&str; 3] = ["%Y-%m-%d", "%Y/%m/%d", "%Y.%m.%d"];

const DATE_TIME_FORMATS: [&str; 4] = [
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y-%m-%d %H:%M:%S%.f",
    "%Y-%m-%dT%H:%M",
    "%Y-%m-%d %H:%M",
];

/// Parses the date part of common textual date representations.
/// Accepts plain dates, local date-times and RFC 3339 timestamps.
pub fn parse_date(s: &str) -> Option<NaiveDate> {
    let s = s.trim();
    if s.is_empty() {
        return None;
    }

    for fmt in DATE_FORMATS {
        if let Ok(d) = NaiveDate::parse_from_str(s, fmt) {
            return Some(d);
        }
    }
    for fmt in DATE_TIME_FORMATS {
        if let Ok(dt) = NaiveDateTime::parse_from_str(s, fmt) {
            return Some(dt.date());
        }
    }
    DateTime::parse_from_rfc3339(s).ok().map(|dt| dt.date_naive())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_numeric_coercion() {
        assert_eq!(Value::Number(4.5).as_number(), Some(4.5));
        assert_eq!(Value::text(" 12 ").as_number(), Some(12.0));
        assert_eq!(Value::text("abc").as_number(), None);
        assert_eq!(Value::text("").as_number(), None);
        assert_eq!(Value::Boolean(true).as_number(), None);
        assert_eq!(Value::Number(f64::NAN).as_number(), None);
        assert_eq!(Value::Empty.as_number(), None);
    }

    #[test]
    fn test_display_strings() {
        assert_eq!(Value::Number(10.0).display_string().as_deref(), Some("10"));
        assert_eq!(Value::Number(2.5).display_string().as_deref(), Some("2.5"));
        assert_eq!(Value::Boolean(false).display_string().as_deref(), Some("false"));
        assert_eq!(Value::Empty.display_string(), None);
        let d = NaiveDate::from_ymd_opt(2024, 2, 1).unwrap();
        assert_eq!(Value::Date(d).display_string().as_deref(), Some("2024-02-01"));
    }

    #[test]
    fn test_parse_date_formats() {
        let expected = NaiveDate::from_ymd_opt(2024, 2, 1);
        assert_eq!(parse_date("2024-02-01"), expected);
        assert_eq!(parse_date("2024/02/01"), expected);
        assert_eq!(parse_date("2024-02-01T13:45:00"), expected);
        assert_eq!(parse_date("2024-02-01 08:00"), expected);
        assert_eq!(parse_date("2024-02-01T23:00:00+00:00"), expected);
        assert_eq!(parse_date("not a date"), None);
        assert_eq!(parse_date("2024-13-01"), None);
    }

    #[test]
    fn test_compare_orders_types() {
        assert_eq!(Value::Empty.compare(&Value::Number(1.0)), Ordering::Less);
        assert_eq!(Value::Number(2.0).compare(&Value::Number(10.0)), Ordering::Less);
        assert_eq!(Value::text("b").compare(&Value::text("a")), Ordering::Greater);
        assert_eq!(Value::Number(1.0).compare(&Value::text("1")), Ordering::Less);
    }

    #[test]
    fn test_untagged_deserialization() {
        let v: Vec<Value> = serde_json::from_str(r#"[null, true, 3, "2024-02-01", "North"]"#).unwrap();
        assert_eq!(v[0], Value::Empty);
        assert_eq!(v[1], Value::Boolean(true));
        assert_eq!(v[2], Value::Number(3.0));
        assert_eq!(v[3], Value::Date(NaiveDate::from_ymd_opt(2024, 2, 1).unwrap()));
        assert_eq!(v[4], Value::text("North"));
    }
}
