//! Conversion between [`SqlValue`] and PostgreSQL wire types.
//!
//! Parameters are bound by the type the server inferred for each
//! placeholder of the prepared statement, so a text timestamp from the
//! intermediate binds to a `timestamp` column and an integer flag binds to a
//! `boolean` one.

use std::str::FromStr;

use chrono::{NaiveDate, NaiveDateTime, NaiveTime, TimeZone, Utc};
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use tokio_postgres::types::{ToSql, Type};
use tokio_postgres::Row;

use crate::core::SqlValue;
use crate::error::{MigrateError, Result};

/// Owned, boxed parameter ready to hand to `tokio_postgres`.
pub type PgParam = Box<dyn ToSql + Sync + Send>;

fn mismatch(value: &SqlValue, ty: &Type) -> MigrateError {
    MigrateError::Intermediate(format!("cannot bind {:?} as {}", value, ty.name()))
}

/// Typed NULL for `ty`.
fn null_for(ty: &Type) -> PgParam {
    match *ty {
        Type::BOOL => Box::new(None::<bool>),
        Type::INT2 => Box::new(None::<i16>),
        Type::INT4 => Box::new(None::<i32>),
        Type::INT8 => Box::new(None::<i64>),
        Type::FLOAT4 => Box::new(None::<f32>),
        Type::FLOAT8 => Box::new(None::<f64>),
        Type::NUMERIC => Box::new(None::<Decimal>),
        Type::TIMESTAMP => Box::new(None::<NaiveDateTime>),
        Type::TIMESTAMPTZ => Box::new(None::<chrono::DateTime<Utc>>),
        Type::DATE => Box::new(None::<NaiveDate>),
        Type::TIME => Box::new(None::<NaiveTime>),
        Type::BYTEA => Box::new(None::<Vec<u8>>),
        Type::JSON | Type::JSONB => Box::new(None::<serde_json::Value>),
        _ => Box::new(None::<String>),
    }
}

fn as_bool(value: &SqlValue) -> Option<bool> {
    match value {
        SqlValue::Bool(b) => Some(*b),
        SqlValue::Int(i) => Some(*i != 0),
        SqlValue::Text(s) => match s.trim().to_lowercase().as_str() {
            "true" | "t" | "1" | "yes" => Some(true),
            "false" | "f" | "0" | "no" => Some(false),
            _ => None,
        },
        _ => None,
    }
}

fn as_f64(value: &SqlValue) -> Option<f64> {
    match value {
        SqlValue::Float(f) => Some(*f),
        SqlValue::Int(i) => Some(*i as f64),
        SqlValue::Text(s) => s.trim().parse().ok(),
        _ => None,
    }
}

fn as_decimal(value: &SqlValue) -> Option<Decimal> {
    match value {
        SqlValue::Int(i) => Some(Decimal::from(*i)),
        SqlValue::Float(f) => Decimal::try_from(*f).ok(),
        SqlValue::Text(s) => Decimal::from_str(s.trim()).ok(),
        _ => None,
    }
}

fn as_text(value: &SqlValue) -> Option<String> {
    match value {
        SqlValue::Text(s) => Some(s.clone()),
        SqlValue::Int(i) => Some(i.to_string()),
        SqlValue::Float(f) => Some(f.to_string()),
        SqlValue::Bool(b) => Some(b.to_string()),
        SqlValue::Timestamp(ts) => Some(ts.format("%Y-%m-%dT%H:%M:%S%.f").to_string()),
        SqlValue::Date(d) => Some(d.format("%Y-%m-%d").to_string()),
        SqlValue::Time(t) => Some(t.format("%H:%M:%S%.f").to_string()),
        SqlValue::Bytes(_) | SqlValue::Null => None,
    }
}

/// Convert `value` into a parameter of the placeholder type `ty`.
pub fn to_pg_param(value: &SqlValue, ty: &Type) -> Result<PgParam> {
    if value.is_null() {
        return Ok(null_for(ty));
    }

    let param: PgParam = match *ty {
        Type::BOOL => Box::new(as_bool(value).ok_or_else(|| mismatch(value, ty))?),
        Type::INT2 => {
            let v = value.as_i64().ok_or_else(|| mismatch(value, ty))?;
            Box::new(i16::try_from(v).map_err(|_| mismatch(value, ty))?)
        }
        Type::INT4 => {
            let v = value.as_i64().ok_or_else(|| mismatch(value, ty))?;
            Box::new(i32::try_from(v).map_err(|_| mismatch(value, ty))?)
        }
        Type::INT8 => Box::new(value.as_i64().ok_or_else(|| mismatch(value, ty))?),
        Type::FLOAT4 => Box::new(as_f64(value).ok_or_else(|| mismatch(value, ty))? as f32),
        Type::FLOAT8 => Box::new(as_f64(value).ok_or_else(|| mismatch(value, ty))?),
        Type::NUMERIC => Box::new(as_decimal(value).ok_or_else(|| mismatch(value, ty))?),
        Type::TIMESTAMP => Box::new(value.as_timestamp().ok_or_else(|| mismatch(value, ty))?),
        Type::TIMESTAMPTZ => {
            let ts = value.as_timestamp().ok_or_else(|| mismatch(value, ty))?;
            Box::new(Utc.from_utc_datetime(&ts))
        }
        Type::DATE => {
            let date = match value {
                SqlValue::Date(d) => Some(*d),
                other => other.as_timestamp().map(|ts| ts.date()),
            };
            Box::new(date.ok_or_else(|| mismatch(value, ty))?)
        }
        Type::TIME => {
            let time = match value {
                SqlValue::Time(t) => Some(*t),
                SqlValue::Text(s) => NaiveTime::parse_from_str(s.trim(), "%H:%M:%S%.f").ok(),
                SqlValue::Timestamp(ts) => Some(ts.time()),
                _ => None,
            };
            Box::new(time.ok_or_else(|| mismatch(value, ty))?)
        }
        Type::BYTEA => match value {
            SqlValue::Bytes(b) => Box::new(b.clone()),
            _ => return Err(mismatch(value, ty)),
        },
        Type::JSON | Type::JSONB => {
            let text = as_text(value).ok_or_else(|| mismatch(value, ty))?;
            let json: serde_json::Value = serde_json::from_str(&text)?;
            Box::new(json)
        }
        _ => Box::new(as_text(value).ok_or_else(|| mismatch(value, ty))?),
    };
    Ok(param)
}

/// Bind every value against the statement's parameter types.
pub fn bind_all(values: &[SqlValue], types: &[Type]) -> Result<Vec<PgParam>> {
    if values.len() != types.len() {
        return Err(MigrateError::Intermediate(format!(
            "statement expects {} parameters, got {}",
            types.len(),
            values.len()
        )));
    }
    values
        .iter()
        .zip(types)
        .map(|(v, ty)| to_pg_param(v, ty))
        .collect()
}

/// Borrow boxed parameters in the form `tokio_postgres` expects.
pub fn as_refs(params: &[PgParam]) -> Vec<&(dyn ToSql + Sync)> {
    params
        .iter()
        .map(|p| p.as_ref() as &(dyn ToSql + Sync))
        .collect()
}

/// Convert a result row into engine-neutral values.
pub fn from_pg_row(row: &Row) -> Result<Vec<SqlValue>> {
    let mut values = Vec::with_capacity(row.len());
    for (idx, column) in row.columns().iter().enumerate() {
        let value = match *column.type_() {
            Type::BOOL => row.try_get::<_, Option<bool>>(idx)?.map(SqlValue::Bool),
            Type::INT2 => row
                .try_get::<_, Option<i16>>(idx)?
                .map(|v| SqlValue::Int(i64::from(v))),
            Type::INT4 => row
                .try_get::<_, Option<i32>>(idx)?
                .map(|v| SqlValue::Int(i64::from(v))),
            Type::INT8 => row.try_get::<_, Option<i64>>(idx)?.map(SqlValue::Int),
            Type::FLOAT4 => row
                .try_get::<_, Option<f32>>(idx)?
                .map(|v| SqlValue::Float(f64::from(v))),
            Type::FLOAT8 => row.try_get::<_, Option<f64>>(idx)?.map(SqlValue::Float),
            Type::NUMERIC => row
                .try_get::<_, Option<Decimal>>(idx)?
                .and_then(|d| d.to_f64())
                .map(SqlValue::Float),
            Type::TIMESTAMP => row
                .try_get::<_, Option<NaiveDateTime>>(idx)?
                .map(SqlValue::Timestamp),
            Type::TIMESTAMPTZ => row
                .try_get::<_, Option<chrono::DateTime<Utc>>>(idx)?
                .map(|ts| SqlValue::Timestamp(ts.naive_utc())),
            Type::DATE => row.try_get::<_, Option<NaiveDate>>(idx)?.map(SqlValue::Date),
            Type::TIME => row.try_get::<_, Option<NaiveTime>>(idx)?.map(SqlValue::Time),
            Type::BYTEA => row.try_get::<_, Option<Vec<u8>>>(idx)?.map(SqlValue::Bytes),
            Type::JSON | Type::JSONB => row
                .try_get::<_, Option<serde_json::Value>>(idx)?
                .map(|v| SqlValue::Text(v.to_string())),
            _ => row
                .try_get::<_, Option<String>>(idx)
                .ok()
                .flatten()
                .map(SqlValue::Text),
        };
        values.push(value.unwrap_or(SqlValue::Null));
    }
    Ok(values)
}

#[cfg(test)]
mod tests {
    use super::*;
    fn debug(param: &PgParam) -> String {
        format!("{:?}", param)
    }

    #[test]
    fn test_null_is_typed_for_column() {
        for ty in [Type::BOOL, Type::INT4, Type::TIMESTAMP, Type::BYTEA, Type::TEXT] {
            let param = to_pg_param(&SqlValue::Null, &ty).unwrap();
            assert_eq!(debug(&param), "None", "type {}", ty);
        }
    }

    #[test]
    fn test_integer_flag_binds_to_boolean() {
        let param = to_pg_param(&SqlValue::Int(1), &Type::BOOL).unwrap();
        assert_eq!(debug(&param), "true");
        let param = to_pg_param(&SqlValue::Text("f".into()), &Type::BOOL).unwrap();
        assert_eq!(debug(&param), "false");
    }

    #[test]
    fn test_out_of_range_integer_is_rejected() {
        assert!(to_pg_param(&SqlValue::Int(i64::from(i32::MAX) + 1), &Type::INT4).is_err());
        assert!(to_pg_param(&SqlValue::Int(42), &Type::INT4).is_ok());
    }

    #[test]
    fn test_text_timestamp_binds_to_timestamp() {
        let value = SqlValue::Text("2024-03-01T10:15:00".into());
        assert!(to_pg_param(&value, &Type::TIMESTAMP).is_ok());
        assert!(to_pg_param(&SqlValue::Text("soon".into()), &Type::TIMESTAMP).is_err());
    }

    #[test]
    fn test_numeric_from_text_and_float() {
        assert!(to_pg_param(&SqlValue::Text("12.50".into()), &Type::NUMERIC).is_ok());
        assert!(to_pg_param(&SqlValue::Float(0.25), &Type::NUMERIC).is_ok());
    }

    #[test]
    fn test_bytes_only_bind_to_bytea() {
        let value = SqlValue::Bytes(vec![0xde, 0xad]);
        let param = to_pg_param(&value, &Type::BYTEA).unwrap();
        assert_eq!(debug(&param), "[222, 173]");
        assert!(to_pg_param(&value, &Type::TEXT).is_err());
    }

    #[test]
    fn test_bind_all_checks_arity() {
        let err = bind_all(&[SqlValue::Int(1)], &[Type::INT4, Type::TEXT]).unwrap_err();
        assert!(matches!(err, MigrateError::Intermediate(_)));
    }
}
