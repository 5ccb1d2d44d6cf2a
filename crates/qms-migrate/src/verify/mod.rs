//! Post-load verification of a target against its intermediate.
//!
//! Checks, per table: the row count matches the export, and the identity
//! sequence will issue a value above the current maximum. Per foreign key
//! observed in the source: no child row references a missing parent.

use serde::Serialize;
use tracing::{info, warn};

use crate::core::identifier::{quote_ident, quote_literal};
use crate::core::SqlValue;
use crate::drivers::{Dialect, SchemaDriver};
use crate::error::{MigrateError, Result};
use crate::export::Intermediate;
use crate::plan;

/// Row-count and identity check for one table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TableCheck {
    pub table: String,
    pub expected_rows: i64,
    pub actual_rows: Option<i64>,
    pub max_id: Option<i64>,
    pub next_id: Option<i64>,
}

impl TableCheck {
    pub fn rows_match(&self) -> bool {
        self.actual_rows == Some(self.expected_rows)
    }

    /// True when the table has no identity or the next value clears the max.
    pub fn identity_ok(&self) -> bool {
        match (self.max_id, self.next_id) {
            (Some(max), Some(next)) => next > max,
            (Some(_), None) => false,
            (None, _) => true,
        }
    }
}

/// Orphan count for one foreign key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct OrphanCheck {
    pub child: String,
    pub column: String,
    pub parent: String,
    pub orphans: i64,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct VerifyReport {
    pub tables: Vec<TableCheck>,
    pub foreign_keys: Vec<OrphanCheck>,
}

impl VerifyReport {
    /// Human-readable list of every failed check.
    pub fn problems(&self) -> Vec<String> {
        let mut out = Vec::new();
        for t in &self.tables {
            match t.actual_rows {
                None => out.push(format!("{}: table missing on target", t.table)),
                Some(actual) if actual != t.expected_rows => out.push(format!(
                    "{}: expected {} rows, found {}",
                    t.table, t.expected_rows, actual
                )),
                _ => {}
            }
            if !t.identity_ok() {
                out.push(format!(
                    "{}: next identity {:?} does not exceed max {:?}",
                    t.table, t.next_id, t.max_id
                ));
            }
        }
        for fk in &self.foreign_keys {
            if fk.orphans > 0 {
                out.push(format!(
                    "{}.{}: {} rows reference missing {} rows",
                    fk.child, fk.column, fk.orphans, fk.parent
                ));
            }
        }
        out
    }

    pub fn is_ok(&self) -> bool {
        self.problems().is_empty()
    }

    /// Orphans are referential errors; count or identity drift is reported
    /// against the intermediate.
    pub fn error(&self) -> Option<MigrateError> {
        let problems = self.problems();
        if problems.is_empty() {
            None
        } else if self.foreign_keys.iter().any(|fk| fk.orphans > 0) {
            Some(MigrateError::Referential(problems.join("; ")))
        } else {
            Some(MigrateError::Intermediate(format!(
                "target does not match intermediate: {}",
                problems.join("; ")
            )))
        }
    }
}

fn as_count(value: Option<SqlValue>) -> Option<i64> {
    value.and_then(|v| v.as_i64())
}

/// Next value the identity of `table.column` would issue.
async fn next_identity<D: SchemaDriver + ?Sized>(
    driver: &mut D,
    table: &str,
    column: &str,
    max_id: Option<i64>,
) -> Result<Option<i64>> {
    match driver.dialect() {
        Dialect::Postgres => {
            let sql = format!(
                "SELECT pg_get_serial_sequence({}, {})",
                quote_literal(&quote_ident(table)?),
                quote_literal(column)
            );
            let Some(SqlValue::Text(seq)) = driver.query_scalar(&sql, &[]).await? else {
                return Ok(None);
            };
            // seq comes back already quoted where needed
            let rows = driver
                .query(&format!("SELECT last_value, is_called FROM {}", seq), &[])
                .await?;
            Ok(rows.first().and_then(|row| {
                let last = row.first()?.as_i64()?;
                let called = matches!(row.get(1), Some(SqlValue::Bool(true)));
                Some(if called { last + 1 } else { last })
            }))
        }
        Dialect::Sqlite => {
            // rowid tables issue max(rowid, sqlite_sequence.seq) + 1
            let has_sequence_table = as_count(
                driver
                    .query_scalar(
                        "SELECT COUNT(*) FROM sqlite_master \
                         WHERE type = 'table' AND name = 'sqlite_sequence'",
                        &[],
                    )
                    .await?,
            )
            .unwrap_or(0)
                > 0;
            let seq = if has_sequence_table {
                as_count(
                    driver
                        .query_scalar(
                            "SELECT seq FROM sqlite_sequence WHERE name = ?1",
                            &[SqlValue::from(table)],
                        )
                        .await?,
                )
            } else {
                None
            };
            Ok(Some(seq.unwrap_or(0).max(max_id.unwrap_or(0)) + 1))
        }
    }
}

/// Verify `driver`'s database against `intermediate`.
pub async fn verify<D: SchemaDriver + ?Sized>(
    driver: &mut D,
    intermediate: &Intermediate,
) -> Result<VerifyReport> {
    let order = plan::plan(&intermediate.table_names())?;
    let mut report = VerifyReport::default();

    for name in &order {
        let Some(doc) = intermediate.table(name) else {
            continue;
        };
        let mut check = TableCheck {
            table: doc.table.clone(),
            expected_rows: doc.row_count as i64,
            actual_rows: None,
            max_id: None,
            next_id: None,
        };

        if driver.has_table(&doc.table).await? {
            let t = quote_ident(&doc.table)?;
            check.actual_rows = as_count(
                driver
                    .query_scalar(&format!("SELECT COUNT(*) FROM {}", t), &[])
                    .await?,
            );
            if let Some(identity) = &doc.identity_column {
                check.max_id = as_count(
                    driver
                        .query_scalar(
                            &format!("SELECT MAX({}) FROM {}", quote_ident(identity)?, t),
                            &[],
                        )
                        .await?,
                );
                check.next_id = next_identity(driver, &doc.table, identity, check.max_id).await?;
            }
        }
        report.tables.push(check);
    }

    for (child, fk) in intermediate.foreign_keys() {
        if !driver.has_table(&child).await? || !driver.has_table(&fk.ref_table).await? {
            continue;
        }
        let sql = format!(
            "SELECT COUNT(*) FROM {c} WHERE {c}.{col} IS NOT NULL AND NOT EXISTS \
             (SELECT 1 FROM {p} WHERE {p}.{rc} = {c}.{col})",
            c = quote_ident(&child)?,
            col = quote_ident(&fk.column)?,
            p = quote_ident(&fk.ref_table)?,
            rc = quote_ident(&fk.ref_column)?
        );
        let orphans = as_count(driver.query_scalar(&sql, &[]).await?).unwrap_or(0);
        report.foreign_keys.push(OrphanCheck {
            child,
            column: fk.column,
            parent: fk.ref_table,
            orphans,
        });
    }

    let problems = report.problems();
    if problems.is_empty() {
        info!(
            "Verification passed: {} tables, {} foreign keys",
            report.tables.len(),
            report.foreign_keys.len()
        );
    } else {
        for p in &problems {
            warn!("Verification: {}", p);
        }
    }
    Ok(report)
}
