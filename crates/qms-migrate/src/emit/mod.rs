//! Reviewable SQL data artifact for offline loading.
//!
//! The artifact is a single transaction an operator can read before running
//! it with `psql`. Its header carries the export date rather than the wall
//! clock, so emitting the same intermediate twice yields identical files.

use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use serde::Serialize;
use tracing::{info, warn};

use crate::core::identifier::{quote_ident, quote_list, quote_literal};
use crate::core::SqlValue;
use crate::error::Result;
use crate::export::{Intermediate, PARTIAL_SUFFIX};
use crate::plan;

/// Counts reported after emitting.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct EmitSummary {
    pub tables: usize,
    pub rows: u64,
    pub reseeded: usize,
}

/// Render a value as a PostgreSQL literal.
pub fn sql_literal(value: &SqlValue) -> String {
    match value {
        SqlValue::Null => "NULL".to_string(),
        SqlValue::Bool(b) => if *b { "TRUE" } else { "FALSE" }.to_string(),
        SqlValue::Int(n) => n.to_string(),
        SqlValue::Float(f) => {
            if f.is_nan() {
                "'NaN'::float8".to_string()
            } else if f.is_infinite() {
                if f.is_sign_positive() {
                    "'Infinity'::float8".to_string()
                } else {
                    "'-Infinity'::float8".to_string()
                }
            } else {
                f.to_string()
            }
        }
        SqlValue::Text(s) => quote_literal(s),
        SqlValue::Bytes(b) => format!("'\\x{}'::bytea", hex::encode(b)),
        SqlValue::Timestamp(ts) => {
            format!("'{}'::timestamp", ts.format("%Y-%m-%d %H:%M:%S%.f"))
        }
        SqlValue::Date(d) => format!("'{}'::date", d.format("%Y-%m-%d")),
        SqlValue::Time(t) => format!("'{}'::time", t.format("%H:%M:%S%.f")),
    }
}

/// Statement that moves `table`'s sequence past `max(column)`.
///
/// An empty table leaves the sequence un-called so its next value is 1.
pub fn reseed_statement(table: &str, column: &str) -> Result<String> {
    let t = quote_ident(table)?;
    let c = quote_ident(column)?;
    Ok(format!(
        "SELECT setval(pg_get_serial_sequence({}, {}), GREATEST(COALESCE(MAX({c}), 0), 1), COALESCE(MAX({c}), 0) >= 1) FROM {t};",
        quote_literal(&t),
        quote_literal(column),
        c = c,
        t = t
    ))
}

/// Write the data artifact for `intermediate` to `out`.
pub fn emit<W: Write>(intermediate: &Intermediate, out: &mut W) -> Result<EmitSummary> {
    let order = plan::plan(&intermediate.table_names())?;
    for violation in plan::check_edges(&order, &intermediate.foreign_keys()) {
        warn!("{}; rows may need manual reordering", violation);
    }

    let manifest = &intermediate.manifest;
    writeln!(out, "-- Data import for PostgreSQL")?;
    writeln!(out, "-- Source: {}", manifest.source_name)?;
    writeln!(
        out,
        "-- Exported: {}",
        manifest.export_date.format("%Y-%m-%d %H:%M:%S")
    )?;
    writeln!(
        out,
        "-- Tables: {}, rows: {}",
        manifest.tables_exported, manifest.total_rows
    )?;
    writeln!(out, "--")?;
    writeln!(out, "-- Apply the schema file first, then run this file in one session:")?;
    writeln!(out, "--   psql \"$DATABASE_URL\" -v ON_ERROR_STOP=1 -f <this file>")?;
    writeln!(out, "-- Trigger suspension below needs a role allowed to set session_replication_role.")?;
    writeln!(out)?;
    writeln!(out, "SET session_replication_role = replica;")?;
    writeln!(out, "BEGIN;")?;

    let mut summary = EmitSummary::default();
    let mut identities = Vec::new();

    for name in &order {
        let Some(doc) = intermediate.table(name) else {
            continue;
        };
        writeln!(out)?;
        writeln!(out, "-- {} ({} rows)", doc.table, doc.row_count)?;

        let prefix = format!(
            "INSERT INTO {} ({}) VALUES (",
            quote_ident(&doc.table)?,
            quote_list(&doc.columns)?
        );
        for row in doc.decoded_rows()? {
            let values: Vec<String> = row.iter().map(sql_literal).collect();
            writeln!(out, "{}{});", prefix, values.join(", "))?;
            summary.rows += 1;
        }
        summary.tables += 1;

        if let Some(identity) = &doc.identity_column {
            identities.push((doc.table.clone(), identity.clone()));
        }
    }

    if !identities.is_empty() {
        writeln!(out)?;
        writeln!(out, "-- Identity sequences")?;
        for (table, column) in &identities {
            writeln!(out, "{}", reseed_statement(table, column)?)?;
            summary.reseeded += 1;
        }
    }

    writeln!(out)?;
    writeln!(out, "SET session_replication_role = DEFAULT;")?;
    writeln!(out, "COMMIT;")?;
    Ok(summary)
}

/// Emit to `path` through a `.partial` file.
pub fn emit_to_file(intermediate: &Intermediate, path: &Path) -> Result<EmitSummary> {
    let mut tmp = path.as_os_str().to_os_string();
    tmp.push(PARTIAL_SUFFIX);
    let tmp = PathBuf::from(tmp);

    let mut w = BufWriter::new(File::create(&tmp)?);
    let summary = match emit(intermediate, &mut w) {
        Ok(s) => s,
        Err(e) => {
            drop(w);
            let _ = std::fs::remove_file(&tmp);
            return Err(e);
        }
    };
    w.flush()?;
    drop(w);
    std::fs::rename(&tmp, path)?;

    info!(
        "Wrote {} ({} tables, {} rows, {} sequences)",
        path.display(),
        summary.tables,
        summary.rows,
        summary.reseeded
    );
    Ok(summary)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::export::export_all;
    use crate::source::SqliteSource;
    use rusqlite::Connection;

    #[test]
    fn test_sql_literals() {
        assert_eq!(sql_literal(&SqlValue::Null), "NULL");
        assert_eq!(sql_literal(&SqlValue::Bool(true)), "TRUE");
        assert_eq!(sql_literal(&SqlValue::Int(-3)), "-3");
        assert_eq!(sql_literal(&SqlValue::Float(2.5)), "2.5");
        assert_eq!(sql_literal(&SqlValue::Float(f64::NAN)), "'NaN'::float8");
        assert_eq!(
            sql_literal(&SqlValue::Float(f64::NEG_INFINITY)),
            "'-Infinity'::float8"
        );
        assert_eq!(sql_literal(&SqlValue::from("it's")), "'it''s'");
        assert_eq!(
            sql_literal(&SqlValue::Bytes(vec![0xde, 0xad, 0xbe, 0xef])),
            "'\\xdeadbeef'::bytea"
        );
    }

    #[test]
    fn test_reseed_statement() {
        assert_eq!(
            reseed_statement("users", "id").unwrap(),
            "SELECT setval(pg_get_serial_sequence('\"users\"', 'id'), \
             GREATEST(COALESCE(MAX(\"id\"), 0), 1), COALESCE(MAX(\"id\"), 0) >= 1) FROM \"users\";"
        );
    }

    fn intermediate(dir: &Path) -> Intermediate {
        let conn = Connection::open_in_memory().unwrap();
        conn.execute_batch(
            "CREATE TABLE users (id INTEGER PRIMARY KEY, company_id INTEGER REFERENCES companies(id), full_name TEXT);
             CREATE TABLE companies (id INTEGER PRIMARY KEY, name TEXT);
             CREATE TABLE audit_log (entry TEXT);
             INSERT INTO companies VALUES (1, 'Acme');
             INSERT INTO users VALUES (4, 1, 'O''Neil'), (9, 1, NULL);
             INSERT INTO audit_log VALUES ('boot');",
        )
        .unwrap();
        let source = SqliteSource::from_connection(conn, "data.sqlite3");
        let at = chrono::NaiveDate::from_ymd_opt(2024, 2, 29)
            .unwrap()
            .and_hms_opt(23, 59, 0)
            .unwrap();
        export_all(&source, dir, at).unwrap();
        Intermediate::open(dir).unwrap()
    }

    #[test]
    fn test_artifact_structure_and_order() {
        let dir = tempfile::tempdir().unwrap();
        let inter = intermediate(dir.path());
        let mut out = Vec::new();
        let summary = emit(&inter, &mut out).unwrap();
        let sql = String::from_utf8(out).unwrap();

        assert_eq!(
            summary,
            EmitSummary {
                tables: 3,
                rows: 4,
                reseeded: 2
            }
        );
        assert!(sql.contains("-- Exported: 2024-02-29 23:59:00"));

        let pos = |needle: &str| sql.find(needle).unwrap_or_else(|| panic!("missing {}", needle));
        let replica = pos("SET session_replication_role = replica;");
        let begin = pos("BEGIN;");
        let companies = pos("INSERT INTO \"companies\"");
        let users = pos("INSERT INTO \"users\"");
        let audit = pos("INSERT INTO \"audit_log\"");
        let reseed = pos("SELECT setval");
        let restore = pos("SET session_replication_role = DEFAULT;");
        let commit = pos("COMMIT;");
        assert!(replica < begin && begin < companies);
        assert!(companies < users && users < audit);
        assert!(audit < reseed && reseed < restore && restore < commit);

        assert!(sql.contains(
            "INSERT INTO \"users\" (\"id\", \"company_id\", \"full_name\") VALUES (4, 1, 'O''Neil');"
        ));
        assert!(sql.contains("VALUES (9, 1, NULL);"));
        assert_eq!(sql.matches("BEGIN;").count(), 1);
        assert_eq!(sql.matches("COMMIT;").count(), 1);
    }

    #[test]
    fn test_emit_is_deterministic() {
        let dir = tempfile::tempdir().unwrap();
        let inter = intermediate(dir.path());
        let a = dir.path().join("a.sql");
        let b = dir.path().join("b.sql");
        emit_to_file(&inter, &a).unwrap();
        emit_to_file(&inter, &b).unwrap();
        assert_eq!(std::fs::read(&a).unwrap(), std::fs::read(&b).unwrap());
        assert!(!dir.path().join("a.sql.partial").exists());
    }
}
