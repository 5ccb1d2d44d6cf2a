//! Engine-neutral SQL values.
//!
//! Values read from either engine and values decoded from the intermediate
//! dataset are carried as [`SqlValue`] so that no engine-specific type leaks
//! across stage boundaries.

use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime};

/// Timestamp layouts accepted on input, tried in order.
///
/// SQLite stores DATETIME as text in whatever layout the writer used; the
/// application wrote both the ISO `T` form and the space-separated form.
const TIMESTAMP_FORMATS: &[&str] = &[
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y-%m-%d %H:%M:%S%.f",
    "%Y-%m-%dT%H:%M",
    "%Y-%m-%d %H:%M",
];

/// SQL value with owned data.
#[derive(Debug, Clone, PartialEq)]
pub enum SqlValue {
    /// NULL.
    Null,

    /// Boolean value.
    Bool(bool),

    /// Any integer width.
    Int(i64),

    /// Any floating-point width.
    Float(f64),

    /// Text data.
    Text(String),

    /// Binary data.
    Bytes(Vec<u8>),

    /// Timestamp without timezone.
    Timestamp(NaiveDateTime),

    /// Date without time component.
    Date(NaiveDate),

    /// Time without date component.
    Time(NaiveTime),
}

impl SqlValue {
    /// Check if this value is NULL.
    #[must_use]
    pub fn is_null(&self) -> bool {
        matches!(self, SqlValue::Null)
    }

    /// Integer view (booleans count as 0/1, integral floats are accepted).
    #[must_use]
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            SqlValue::Int(v) => Some(*v),
            SqlValue::Bool(v) => Some(i64::from(*v)),
            SqlValue::Float(v) if v.fract() == 0.0 => Some(*v as i64),
            SqlValue::Text(s) => s.trim().parse().ok(),
            _ => None,
        }
    }

    /// Text view.
    #[must_use]
    pub fn as_str(&self) -> Option<&str> {
        match self {
            SqlValue::Text(s) => Some(s),
            _ => None,
        }
    }

    /// Timestamp view; text is parsed with [`parse_timestamp`] and a date
    /// is taken at midnight.
    #[must_use]
    pub fn as_timestamp(&self) -> Option<NaiveDateTime> {
        match self {
            SqlValue::Timestamp(ts) => Some(*ts),
            SqlValue::Date(d) => d.and_hms_opt(0, 0, 0),
            SqlValue::Text(s) => parse_timestamp(s),
            _ => None,
        }
    }
}

/// Parse a timestamp written by either engine or by the intermediate.
///
/// Accepts ISO-8601 with `T` or space separator, optional fractional
/// seconds, RFC 3339 offsets (converted to UTC) and bare dates.
pub fn parse_timestamp(text: &str) -> Option<NaiveDateTime> {
    let text = text.trim();
    if text.is_empty() {
        return None;
    }

    for format in TIMESTAMP_FORMATS {
        if let Ok(ts) = NaiveDateTime::parse_from_str(text, format) {
            return Some(ts);
        }
    }

    if let Ok(ts) = DateTime::parse_from_rfc3339(text) {
        return Some(ts.naive_utc());
    }

    NaiveDate::parse_from_str(text, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
}

impl From<bool> for SqlValue {
    fn from(v: bool) -> Self {
        SqlValue::Bool(v)
    }
}

impl From<i64> for SqlValue {
    fn from(v: i64) -> Self {
        SqlValue::Int(v)
    }
}

impl From<i32> for SqlValue {
    fn from(v: i32) -> Self {
        SqlValue::Int(i64::from(v))
    }
}

impl From<f64> for SqlValue {
    fn from(v: f64) -> Self {
        SqlValue::Float(v)
    }
}

impl From<String> for SqlValue {
    fn from(v: String) -> Self {
        SqlValue::Text(v)
    }
}

impl From<&str> for SqlValue {
    fn from(v: &str) -> Self {
        SqlValue::Text(v.to_string())
    }
}

impl From<Vec<u8>> for SqlValue {
    fn from(v: Vec<u8>) -> Self {
        SqlValue::Bytes(v)
    }
}

impl From<NaiveDateTime> for SqlValue {
    fn from(v: NaiveDateTime) -> Self {
        SqlValue::Timestamp(v)
    }
}

impl<T: Into<SqlValue>> From<Option<T>> for SqlValue {
    fn from(v: Option<T>) -> Self {
        v.map_or(SqlValue::Null, Into::into)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_timestamp_layouts() {
        let expected = NaiveDate::from_ymd_opt(2024, 3, 5)
            .unwrap()
            .and_hms_opt(14, 30, 0)
            .unwrap();
        assert_eq!(parse_timestamp("2024-03-05T14:30:00"), Some(expected));
        assert_eq!(parse_timestamp("2024-03-05 14:30:00"), Some(expected));
        assert_eq!(parse_timestamp("2024-03-05 14:30"), Some(expected));
        assert_eq!(parse_timestamp("2024-03-05T16:30:00+02:00"), Some(expected));
    }

    #[test]
    fn test_parse_timestamp_fraction_and_date() {
        let ts = parse_timestamp("2024-03-05 14:30:00.123456").unwrap();
        assert_eq!(ts.and_utc().timestamp_subsec_micros(), 123_456);

        let midnight = parse_timestamp("2024-03-05").unwrap();
        assert_eq!(midnight.format("%H:%M:%S").to_string(), "00:00:00");
    }

    #[test]
    fn test_parse_timestamp_rejects_garbage() {
        assert_eq!(parse_timestamp(""), None);
        assert_eq!(parse_timestamp("yesterday"), None);
    }

    #[test]
    fn test_as_i64() {
        assert_eq!(SqlValue::Int(7).as_i64(), Some(7));
        assert_eq!(SqlValue::Bool(true).as_i64(), Some(1));
        assert_eq!(SqlValue::Float(3.0).as_i64(), Some(3));
        assert_eq!(SqlValue::Float(3.5).as_i64(), None);
        assert_eq!(SqlValue::Text(" 12 ".into()).as_i64(), Some(12));
        assert_eq!(SqlValue::Null.as_i64(), None);
    }

    #[test]
    fn test_from_option() {
        assert_eq!(SqlValue::from(None::<i64>), SqlValue::Null);
        assert_eq!(SqlValue::from(Some("x")), SqlValue::Text("x".into()));
    }
}
