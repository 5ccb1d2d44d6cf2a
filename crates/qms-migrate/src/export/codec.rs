//! Scalar encoding between engine values and the JSON intermediate.
//!
//! | kind      | JSON                                      |
//! |-----------|-------------------------------------------|
//! | absent    | `null`                                    |
//! | number    | number (non-finite floats become `null`)  |
//! | boolean   | `true` / `false` for BOOLEAN columns      |
//! | text      | string                                    |
//! | temporal  | ISO-8601 string                           |
//! | bytes     | lowercase hex string                      |
//!
//! The declared column type decides how ambiguous values are read back:
//! a hex string is only turned into bytes for a BLOB column, and an ISO
//! string is only parsed as a timestamp for a date/time column. A byte
//! value in any other column could not be told apart from text, so
//! [`encode_row`] refuses it.
//!
//! Timestamps carry no offset. RFC 3339 input with an offset is converted
//! to UTC and written without it.

use chrono::{NaiveDate, NaiveTime};
use serde_json::{Map, Number, Value};
use tracing::warn;

use crate::core::value::parse_timestamp as parse_any_timestamp;
use crate::core::{ColumnSchema, SqlValue};
use crate::dialect::typemap::{is_binary, is_boolean, is_temporal};
use crate::error::{MigrateError, Result};

const TIMESTAMP_FORMAT: &str = "%Y-%m-%dT%H:%M:%S%.f";
const DATE_FORMAT: &str = "%Y-%m-%d";
const TIME_FORMAT: &str = "%H:%M:%S%.f";

/// Lowercase hex text for `bytes`.
pub fn encode_hex(bytes: &[u8]) -> String {
    hex::encode(bytes)
}

/// Inverse of [`encode_hex`]; accepts either case.
pub fn decode_hex(text: &str) -> Result<Vec<u8>> {
    hex::decode(text).map_err(|e| MigrateError::Intermediate(format!("invalid hex data: {}", e)))
}

/// Parse a timestamp in any layout either engine or the intermediate writes.
pub fn parse_timestamp(text: &str) -> Option<chrono::NaiveDateTime> {
    parse_any_timestamp(text)
}

fn base_type(declared: &str) -> String {
    declared
        .split('(')
        .next()
        .unwrap_or("")
        .trim()
        .to_uppercase()
}

fn encode_temporal(value: &SqlValue, declared: &str) -> Option<String> {
    let base = base_type(declared);
    match value {
        SqlValue::Date(d) => Some(d.format(DATE_FORMAT).to_string()),
        SqlValue::Time(t) => Some(t.format(TIME_FORMAT).to_string()),
        SqlValue::Timestamp(ts) => Some(ts.format(TIMESTAMP_FORMAT).to_string()),
        SqlValue::Text(s) => match base.as_str() {
            "DATE" => NaiveDate::parse_from_str(s.trim(), DATE_FORMAT)
                .ok()
                .or_else(|| parse_any_timestamp(s).map(|ts| ts.date()))
                .map(|d| d.format(DATE_FORMAT).to_string()),
            "TIME" => NaiveTime::parse_from_str(s.trim(), TIME_FORMAT)
                .ok()
                .map(|t| t.format(TIME_FORMAT).to_string()),
            _ => parse_any_timestamp(s).map(|ts| ts.format(TIMESTAMP_FORMAT).to_string()),
        },
        _ => None,
    }
}

/// Encode one value for a column of type `declared`.
pub fn encode(value: &SqlValue, declared: &str) -> Value {
    if is_boolean(declared) {
        match value {
            SqlValue::Bool(b) => return Value::Bool(*b),
            SqlValue::Int(i) => return Value::Bool(*i != 0),
            _ => {}
        }
    }

    if is_temporal(declared) {
        if let Some(text) = encode_temporal(value, declared) {
            return Value::String(text);
        }
        if let SqlValue::Text(s) = value {
            warn!("Unparseable {} value '{}' exported as text", declared, s);
        }
    }

    match value {
        SqlValue::Null => Value::Null,
        SqlValue::Bool(b) => Value::Bool(*b),
        SqlValue::Int(i) => Value::Number((*i).into()),
        SqlValue::Float(f) => match Number::from_f64(*f) {
            Some(n) => Value::Number(n),
            None => {
                warn!("Non-finite float {} exported as null", f);
                Value::Null
            }
        },
        SqlValue::Text(s) => Value::String(s.clone()),
        SqlValue::Bytes(b) => Value::String(encode_hex(b)),
        SqlValue::Timestamp(ts) => Value::String(ts.format(TIMESTAMP_FORMAT).to_string()),
        SqlValue::Date(d) => Value::String(d.format(DATE_FORMAT).to_string()),
        SqlValue::Time(t) => Value::String(t.format(TIME_FORMAT).to_string()),
    }
}

/// Encode a full row keyed by column name, in column order.
pub fn encode_row(columns: &[ColumnSchema], values: &[SqlValue]) -> Result<Map<String, Value>> {
    columns
        .iter()
        .zip(values)
        .map(|(col, v)| {
            if matches!(v, SqlValue::Bytes(_)) && !is_binary(&col.declared_type) {
                return Err(MigrateError::Intermediate(format!(
                    "column {} is declared {} but holds binary data",
                    col.name,
                    if col.declared_type.is_empty() {
                        "without a type"
                    } else {
                        col.declared_type.as_str()
                    }
                )));
            }
            Ok((col.name.clone(), encode(v, &col.declared_type)))
        })
        .collect()
}

/// Decode one JSON scalar for a column of type `declared`.
pub fn decode(value: &Value, declared: &str) -> Result<SqlValue> {
    Ok(match value {
        Value::Null => SqlValue::Null,
        Value::Bool(b) => SqlValue::Bool(*b),
        Value::Number(n) => {
            if let Some(i) = n.as_i64() {
                if is_boolean(declared) {
                    SqlValue::Bool(i != 0)
                } else {
                    SqlValue::Int(i)
                }
            } else if let Some(f) = n.as_f64() {
                SqlValue::Float(f)
            } else {
                return Err(MigrateError::Intermediate(format!(
                    "number out of range: {}",
                    n
                )));
            }
        }
        Value::String(s) if is_binary(declared) => SqlValue::Bytes(decode_hex(s)?),
        Value::String(s) if is_temporal(declared) => match base_type(declared).as_str() {
            "DATE" => NaiveDate::parse_from_str(s, DATE_FORMAT)
                .map(SqlValue::Date)
                .unwrap_or_else(|_| SqlValue::Text(s.clone())),
            "TIME" => NaiveTime::parse_from_str(s, TIME_FORMAT)
                .map(SqlValue::Time)
                .unwrap_or_else(|_| SqlValue::Text(s.clone())),
            _ => parse_any_timestamp(s)
                .map(SqlValue::Timestamp)
                .unwrap_or_else(|| SqlValue::Text(s.clone())),
        },
        Value::String(s) => SqlValue::Text(s.clone()),
        other => SqlValue::Text(other.to_string()),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_bytes_round_trip_bit_exact() {
        let bytes: Vec<u8> = (0..=255).collect();
        let encoded = encode(&SqlValue::Bytes(bytes.clone()), "BLOB");
        let text = encoded.as_str().unwrap();
        assert_eq!(text.len(), 512);
        assert_eq!(text, text.to_lowercase());
        assert_eq!(decode(&encoded, "BLOB").unwrap(), SqlValue::Bytes(bytes));
    }

    #[test]
    fn test_hex_string_in_text_column_stays_text() {
        let value = json!("deadbeef");
        assert_eq!(
            decode(&value, "TEXT").unwrap(),
            SqlValue::Text("deadbeef".into())
        );
        assert!(decode(&json!("zz"), "BLOB").is_err());
    }

    #[test]
    fn test_timestamps_normalised_to_iso() {
        let v = encode(&SqlValue::Text("2024-03-01 10:15:00".into()), "DATETIME");
        assert_eq!(v, json!("2024-03-01T10:15:00"));

        let v = encode(&SqlValue::Text("2024-03-01 10:15:00.250".into()), "TIMESTAMP");
        assert_eq!(v, json!("2024-03-01T10:15:00.250"));

        let v = encode(&SqlValue::Text("2024-03-01".into()), "DATE");
        assert_eq!(v, json!("2024-03-01"));

        let decoded = decode(&json!("2024-03-01T10:15:00"), "DATETIME").unwrap();
        assert_eq!(
            decoded.as_timestamp().unwrap().to_string(),
            "2024-03-01 10:15:00"
        );
    }

    #[test]
    fn test_unparseable_timestamp_kept_as_text() {
        let v = encode(&SqlValue::Text("sometime".into()), "DATETIME");
        assert_eq!(v, json!("sometime"));
        assert_eq!(
            decode(&v, "DATETIME").unwrap(),
            SqlValue::Text("sometime".into())
        );
    }

    #[test]
    fn test_boolean_columns() {
        assert_eq!(encode(&SqlValue::Int(1), "BOOLEAN"), json!(true));
        assert_eq!(encode(&SqlValue::Int(0), "boolean"), json!(false));
        assert_eq!(encode(&SqlValue::Int(1), "INTEGER"), json!(1));
        assert_eq!(decode(&json!(1), "BOOLEAN").unwrap(), SqlValue::Bool(true));
        assert_eq!(decode(&json!(true), "BOOLEAN").unwrap(), SqlValue::Bool(true));
    }

    #[test]
    fn test_non_finite_float_becomes_null() {
        assert_eq!(encode(&SqlValue::Float(f64::NAN), "REAL"), Value::Null);
        assert_eq!(encode(&SqlValue::Float(1.5), "REAL"), json!(1.5));
        assert_eq!(encode(&SqlValue::Null, "TEXT"), Value::Null);
    }

    #[test]
    fn test_offset_timestamps_normalised_to_utc() {
        let v = encode(&SqlValue::Text("2024-03-01T10:15:00+05:30".into()), "DATETIME");
        assert_eq!(v, json!("2024-03-01T04:45:00"));
        assert_eq!(
            decode(&v, "DATETIME").unwrap(),
            SqlValue::Timestamp(parse_timestamp("2024-03-01 04:45:00").unwrap())
        );
    }

    #[test]
    fn test_encode_row_keeps_column_order() {
        let columns: Vec<ColumnSchema> = ["z", "a", "m"]
            .iter()
            .map(|n| ColumnSchema {
                name: n.to_string(),
                declared_type: "TEXT".into(),
                nullable: true,
                default: None,
                is_primary_key: false,
                is_identity: false,
            })
            .collect();
        let row = encode_row(
            &columns,
            &[SqlValue::from("1"), SqlValue::Null, SqlValue::from("3")],
        )
        .unwrap();
        let keys: Vec<_> = row.keys().cloned().collect();
        assert_eq!(keys, vec!["z", "a", "m"]);
    }

    #[test]
    fn test_bytes_outside_blob_column_are_refused() {
        let column = |declared: &str| ColumnSchema {
            name: "notes".into(),
            declared_type: declared.into(),
            nullable: true,
            default: None,
            is_primary_key: false,
            is_identity: false,
        };
        let bytes = SqlValue::Bytes(vec![0xde, 0xad]);

        let err = encode_row(&[column("TEXT")], &[bytes.clone()]).unwrap_err();
        assert!(matches!(err, MigrateError::Intermediate(_)));
        assert!(err.to_string().contains("notes"));

        let row = encode_row(&[column("BLOB")], &[bytes.clone()]).unwrap();
        assert_eq!(decode(&row["notes"], "BLOB").unwrap(), bytes);
    }
}
