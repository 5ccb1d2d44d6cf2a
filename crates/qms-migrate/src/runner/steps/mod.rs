//! The fixed migration catalog and the helpers its steps share.

mod auth_and_modules;
mod mix_design_images;
mod nullable_cube_batch;
mod pour_activities;
mod qms_extension;
mod safety_nc_scoring;
mod user_account_hardening;

pub use auth_and_modules::{AuthAndModules, CANONICAL_MODULES};
pub use mix_design_images::MixDesignImages;
pub use nullable_cube_batch::NullableCubeBatch;
pub use pour_activities::PourActivities;
pub use qms_extension::QmsExtension;
pub use safety_nc_scoring::{severity_score, NcScores, SafetyNcScoring};
pub use user_account_hardening::UserAccountHardening;

use tracing::{debug, warn};

use super::{Applicability, Migration};
use crate::drivers::SchemaDriver;
use crate::error::Result;

/// Every step, in application order.
pub fn catalog() -> Vec<Box<dyn Migration>> {
    vec![
        Box::new(MixDesignImages),
        Box::new(PourActivities),
        Box::new(UserAccountHardening),
        Box::new(QmsExtension),
        Box::new(NullableCubeBatch),
        Box::new(AuthAndModules),
        Box::new(SafetyNcScoring),
    ]
}

/// Execute one DDL statement, treating "already exists" as a warning.
///
/// The statement runs under its own savepoint so a benign failure does not
/// poison the surrounding step transaction on the server engine.
pub(crate) async fn execute_idempotent(
    db: &mut dyn SchemaDriver,
    step: &str,
    sql: &str,
) -> Result<()> {
    db.execute_batch("SAVEPOINT step_stmt").await?;
    match db.execute_ddl(sql).await {
        Ok(()) => db.execute_batch("RELEASE SAVEPOINT step_stmt").await,
        Err(e) if e.is_duplicate_object() => {
            warn!("[{}] skipped, object already exists: {}", step, e.one_line());
            db.execute_batch("ROLLBACK TO SAVEPOINT step_stmt").await?;
            db.execute_batch("RELEASE SAVEPOINT step_stmt").await
        }
        Err(e) => {
            db.execute_batch("ROLLBACK TO SAVEPOINT step_stmt").await?;
            db.execute_batch("RELEASE SAVEPOINT step_stmt").await?;
            Err(e)
        }
    }
}

/// Add `column` to `table` unless it is already there.
pub(crate) async fn add_column(
    db: &mut dyn SchemaDriver,
    step: &str,
    table: &str,
    column: &str,
    definition: &str,
) -> Result<()> {
    if db.has_column(table, column).await? {
        debug!("[{}] {}.{} already present", step, table, column);
        return Ok(());
    }
    let sql = format!("ALTER TABLE {} ADD COLUMN {} {}", table, column, definition);
    execute_idempotent(db, step, &sql).await
}

pub(crate) async fn create_table(
    db: &mut dyn SchemaDriver,
    step: &str,
    table: &str,
    ddl: &str,
) -> Result<()> {
    if db.has_table(table).await? {
        debug!("[{}] table {} already present", step, table);
        return Ok(());
    }
    execute_idempotent(db, step, ddl).await
}

/// Create `idx_{table}_{column}` unless present.
pub(crate) async fn create_index(
    db: &mut dyn SchemaDriver,
    step: &str,
    table: &str,
    column: &str,
) -> Result<()> {
    let name = index_name(table, column);
    if db.has_index(table, &name).await? {
        return Ok(());
    }
    let sql = format!("CREATE INDEX IF NOT EXISTS {} ON {} ({})", name, table, column);
    execute_idempotent(db, step, &sql).await
}

pub(crate) fn index_name(table: &str, column: &str) -> String {
    format!("idx_{}_{}", table, column)
}

/// Names from `columns` that `table` lacks.
pub(crate) async fn missing_columns(
    db: &mut dyn SchemaDriver,
    table: &str,
    columns: &[&str],
) -> Result<Vec<String>> {
    let present = db.columns(table).await?;
    Ok(columns
        .iter()
        .filter(|c| !present.iter().any(|p| p.name.eq_ignore_ascii_case(c)))
        .map(|c| c.to_string())
        .collect())
}

/// Indexes from `(table, column)` pairs that are not present.
pub(crate) async fn missing_indexes(
    db: &mut dyn SchemaDriver,
    wanted: &[(&str, &str)],
) -> Result<Vec<String>> {
    let mut missing = Vec::new();
    for (table, column) in wanted {
        let name = index_name(table, column);
        if !db.has_index(table, &name).await? {
            missing.push(name);
        }
    }
    Ok(missing)
}

/// `NotApplicable` naming the first absent table, if any.
pub(crate) async fn require_tables(
    db: &mut dyn SchemaDriver,
    tables: &[&str],
) -> Result<Option<Applicability>> {
    for table in tables {
        if !db.has_table(table).await? {
            return Ok(Some(Applicability::NotApplicable(format!(
                "table {} does not exist",
                table
            ))));
        }
    }
    Ok(None)
}

pub(crate) async fn count_rows(db: &mut dyn SchemaDriver, sql: &str) -> Result<i64> {
    Ok(db
        .query_scalar(sql, &[])
        .await?
        .and_then(|v| v.as_i64())
        .unwrap_or(0))
}

/// Pre-migration schema the application itself creates.
#[cfg(test)]
pub(crate) const BASELINE: &str = "
CREATE TABLE companies (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    name VARCHAR(255) NOT NULL,
    created_at DATETIME DEFAULT CURRENT_TIMESTAMP
);
CREATE TABLE users (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    company_id INTEGER REFERENCES companies(id),
    email VARCHAR(255) UNIQUE NOT NULL,
    password_hash VARCHAR(255) NOT NULL,
    full_name VARCHAR(255),
    role VARCHAR(50) DEFAULT 'user',
    is_active BOOLEAN DEFAULT 1
);
CREATE TABLE projects (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    company_id INTEGER NOT NULL REFERENCES companies(id),
    name VARCHAR(255) NOT NULL
);
CREATE TABLE project_memberships (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    project_id INTEGER NOT NULL REFERENCES projects(id),
    user_id INTEGER NOT NULL REFERENCES users(id),
    role VARCHAR(50)
);
CREATE TABLE mix_designs (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    project_id INTEGER NOT NULL REFERENCES projects(id),
    mix_design_id VARCHAR(100) NOT NULL,
    concrete_grade VARCHAR(20),
    created_by INTEGER REFERENCES users(id)
);
CREATE TABLE safety_non_conformances (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    project_id INTEGER NOT NULL REFERENCES projects(id),
    nc_number VARCHAR(50),
    description TEXT,
    severity VARCHAR(20),
    status VARCHAR(20) DEFAULT 'open',
    raised_by INTEGER REFERENCES users(id),
    assigned_to INTEGER REFERENCES users(id),
    raised_at DATETIME,
    closed_at DATETIME
);
INSERT INTO companies (id, name) VALUES (1, 'Acme Builders');
INSERT INTO users (id, company_id, email, password_hash, full_name)
    VALUES (1, 1, 'site@acme.test', 'x', NULL), (2, 1, 'qa@acme.test', 'x', 'Quality Lead');
INSERT INTO projects (id, company_id, name) VALUES (1, 1, 'Tower A');
INSERT INTO mix_designs (id, project_id, mix_design_id, concrete_grade) VALUES (1, 1, 'MD-1', 'M30');
";

#[cfg(test)]
pub(crate) fn baseline_db() -> crate::drivers::SqliteDriver {
    let conn = rusqlite::Connection::open_in_memory().unwrap();
    conn.execute_batch(BASELINE).unwrap();
    crate::drivers::SqliteDriver::from_connection(conn)
}
