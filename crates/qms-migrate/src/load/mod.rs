//! Direct load of an intermediate into a live PostgreSQL target.
//!
//! Everything runs in one transaction with triggers suspended. Each table
//! gets a savepoint, each batch of up to [`MAX_BATCH_SIZE`] rows another.
//! A failed batch is rolled back and replayed row by row to find the
//! offending rows, which are logged and skipped. A foreign-key violation
//! rolls the whole table back and is reported as referential. A lost
//! connection stops the load without a commit.

pub mod session;

use serde::Serialize;
use tracing::{error, info, warn};

use crate::config::MAX_BATCH_SIZE;
use crate::core::identifier::{quote_ident, quote_list};
use crate::core::SqlValue;
use crate::drivers::Dialect;
use crate::emit::reseed_statement;
use crate::error::{MigrateError, Result};
use crate::export::{Intermediate, TableDocument};
use crate::plan;

pub use session::{FailureKind, LoadSession, PgLoadSession, SessionError, SessionResult};

const TABLE_SAVEPOINT: &str = "load_table";
const BATCH_SAVEPOINT: &str = "load_batch";
const ROW_SAVEPOINT: &str = "load_row";

/// A row the target refused.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RowFailure {
    pub table: String,
    /// Zero-based index of the row in the table's export order.
    pub row_index: usize,
    pub message: String,
}

/// Per-table result.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct TableOutcome {
    pub table: String,
    pub rows_loaded: u64,
    pub rows_rejected: usize,
    /// Set when the table was rolled back for a referential violation.
    pub aborted: Option<String>,
}

/// Summary of a completed load.
#[derive(Debug, Clone, Default, Serialize)]
pub struct LoadReport {
    pub tables: Vec<TableOutcome>,
    pub failures: Vec<RowFailure>,
    pub sequences_reseeded: usize,
}

impl LoadReport {
    pub fn rows_loaded(&self) -> u64 {
        self.tables.iter().map(|t| t.rows_loaded).sum()
    }

    pub fn aborted_tables(&self) -> Vec<&TableOutcome> {
        self.tables.iter().filter(|t| t.aborted.is_some()).collect()
    }

    /// The referential failure to surface, if any table was aborted.
    pub fn referential_error(&self) -> Option<MigrateError> {
        let aborted = self.aborted_tables();
        if aborted.is_empty() {
            return None;
        }
        let detail = aborted
            .iter()
            .map(|t| format!("{} ({})", t.table, t.aborted.as_deref().unwrap_or("")))
            .collect::<Vec<_>>()
            .join("; ");
        Some(MigrateError::Referential(format!(
            "tables rolled back on foreign-key violation: {}",
            detail
        )))
    }
}

/// Loader settings.
#[derive(Debug, Clone)]
pub struct LoadOptions {
    pub batch_size: usize,
}

impl Default for LoadOptions {
    fn default() -> Self {
        Self {
            batch_size: MAX_BATCH_SIZE,
        }
    }
}

impl LoadOptions {
    pub fn with_batch_size(batch_size: usize) -> Self {
        Self {
            batch_size: batch_size.clamp(1, MAX_BATCH_SIZE),
        }
    }
}

/// Multi-row parameterized insert for `rows` rows of `columns`.
pub fn insert_statement(table: &str, columns: &[String], rows: usize) -> Result<String> {
    let width = columns.len();
    let groups: Vec<String> = (0..rows)
        .map(|r| {
            let marks: Vec<String> = (1..=width)
                .map(|c| Dialect::Postgres.placeholder(r * width + c))
                .collect();
            format!("({})", marks.join(", "))
        })
        .collect();
    Ok(format!(
        "INSERT INTO {} ({}) VALUES {}",
        quote_ident(table)?,
        quote_list(columns)?,
        groups.join(", ")
    ))
}

fn savepoint(name: &str) -> String {
    format!("SAVEPOINT {}", name)
}

fn rollback_to(name: &str) -> String {
    format!("ROLLBACK TO SAVEPOINT {}", name)
}

fn release(name: &str) -> String {
    format!("RELEASE SAVEPOINT {}", name)
}

fn connection_lost(table: &str, e: &SessionError) -> MigrateError {
    MigrateError::load(table, format!("connection lost: {}", e.message))
}

/// Run a control statement; only connection loss is tolerated as an error
/// kind here, anything else means the transaction is unusable.
async fn control<S: LoadSession + ?Sized>(session: &mut S, table: &str, sql: &str) -> Result<()> {
    session.execute(sql).await.map_err(|e| match e.kind {
        FailureKind::Connection => connection_lost(table, &e),
        _ => MigrateError::load(table, format!("{} failed: {}", sql, e.message)),
    })
}

enum TableResult {
    Loaded { rows: u64, failures: Vec<RowFailure> },
    Referential(String),
}

async fn load_table<S: LoadSession + ?Sized>(
    session: &mut S,
    doc: &TableDocument,
    batch_size: usize,
) -> Result<TableResult> {
    let rows = doc.decoded_rows()?;
    let mut loaded = 0u64;
    let mut failures = Vec::new();

    for (batch_no, batch) in rows.chunks(batch_size).enumerate() {
        let offset = batch_no * batch_size;
        let sql = insert_statement(&doc.table, &doc.columns, batch.len())?;
        let params: Vec<SqlValue> = batch.iter().flatten().cloned().collect();

        control(session, &doc.table, &savepoint(BATCH_SAVEPOINT)).await?;
        match session.insert(&sql, &params).await {
            Ok(_) => {
                control(session, &doc.table, &release(BATCH_SAVEPOINT)).await?;
                loaded += batch.len() as u64;
                continue;
            }
            Err(e) if e.kind == FailureKind::Connection => {
                return Err(connection_lost(&doc.table, &e));
            }
            Err(e) => {
                warn!(
                    "{}: batch at row {} failed ({}), retrying row by row",
                    doc.table, offset, e.message
                );
                control(session, &doc.table, &rollback_to(BATCH_SAVEPOINT)).await?;
            }
        }

        let single = insert_statement(&doc.table, &doc.columns, 1)?;
        for (i, row) in batch.iter().enumerate() {
            let row_index = offset + i;
            control(session, &doc.table, &savepoint(ROW_SAVEPOINT)).await?;
            match session.insert(&single, row).await {
                Ok(_) => {
                    control(session, &doc.table, &release(ROW_SAVEPOINT)).await?;
                    loaded += 1;
                }
                Err(e) => match e.kind {
                    FailureKind::Connection => return Err(connection_lost(&doc.table, &e)),
                    FailureKind::ForeignKey => {
                        error!("{}: row {} violates a foreign key: {}", doc.table, row_index, e.message);
                        return Ok(TableResult::Referential(format!(
                            "row {}: {}",
                            row_index, e.message
                        )));
                    }
                    FailureKind::Rejected => {
                        warn!("{}: row {} rejected: {}", doc.table, row_index, e.message);
                        control(session, &doc.table, &rollback_to(ROW_SAVEPOINT)).await?;
                        control(session, &doc.table, &release(ROW_SAVEPOINT)).await?;
                        failures.push(RowFailure {
                            table: doc.table.clone(),
                            row_index,
                            message: e.message,
                        });
                    }
                },
            }
        }
        control(session, &doc.table, &release(BATCH_SAVEPOINT)).await?;
    }

    Ok(TableResult::Loaded {
        rows: loaded,
        failures,
    })
}

/// Load every planned table of `intermediate` through `session`.
///
/// Returns the report after `COMMIT`. Aborted tables are listed in the
/// report; use [`LoadReport::referential_error`] to turn them into an error.
pub async fn load<S: LoadSession + ?Sized>(
    session: &mut S,
    intermediate: &Intermediate,
    options: &LoadOptions,
) -> Result<LoadReport> {
    let order = plan::plan(&intermediate.table_names())?;
    for violation in plan::check_edges(&order, &intermediate.foreign_keys()) {
        warn!("{}", violation);
    }
    let batch_size = options.batch_size.clamp(1, MAX_BATCH_SIZE);

    control(session, "", "BEGIN").await?;
    control(session, "", "SET LOCAL session_replication_role = replica").await?;

    let mut report = LoadReport::default();
    let mut identities = Vec::new();

    for name in &order {
        let Some(doc) = intermediate.table(name) else {
            continue;
        };

        control(session, &doc.table, &savepoint(TABLE_SAVEPOINT)).await?;
        let outcome = match load_table(session, doc, batch_size).await {
            Ok(TableResult::Loaded { rows, failures }) => {
                control(session, &doc.table, &release(TABLE_SAVEPOINT)).await?;
                info!(
                    "Loaded {} rows into {} ({} rejected)",
                    rows,
                    doc.table,
                    failures.len()
                );
                if let Some(identity) = &doc.identity_column {
                    identities.push((doc.table.clone(), identity.clone()));
                }
                let outcome = TableOutcome {
                    table: doc.table.clone(),
                    rows_loaded: rows,
                    rows_rejected: failures.len(),
                    aborted: None,
                };
                report.failures.extend(failures);
                outcome
            }
            Ok(TableResult::Referential(reason)) => {
                control(session, &doc.table, &rollback_to(TABLE_SAVEPOINT)).await?;
                control(session, &doc.table, &release(TABLE_SAVEPOINT)).await?;
                error!("{} rolled back: {}", doc.table, reason);
                TableOutcome {
                    table: doc.table.clone(),
                    aborted: Some(reason),
                    ..Default::default()
                }
            }
            Err(e) => {
                // best effort; the connection may already be gone
                let _ = session.execute("ROLLBACK").await;
                return Err(e);
            }
        };
        report.tables.push(outcome);
    }

    for (table, column) in &identities {
        let sql = reseed_statement(table, column)?;
        if let Err(e) = control(session, table, &sql).await {
            let _ = session.execute("ROLLBACK").await;
            return Err(e);
        }
        report.sequences_reseeded += 1;
    }

    control(session, "", "SET LOCAL session_replication_role = DEFAULT").await?;
    control(session, "", "COMMIT").await?;

    info!(
        "Load committed: {} rows in {} tables, {} rejected rows, {} aborted tables",
        report.rows_loaded(),
        report.tables.len(),
        report.failures.len(),
        report.aborted_tables().len()
    );
    Ok(report)
}
