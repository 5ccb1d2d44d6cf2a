use async_trait::async_trait;
use tracing::{info, warn};

use super::require_tables;
use crate::core::identifier::quote_list;
use crate::dialect::relax_not_null;
use crate::drivers::{Dialect, SchemaDriver};
use crate::error::{MigrateError, Result};
use crate::runner::{Applicability, Migration};

const TABLE: &str = "cube_test_registers";
const REBUILT: &str = "cube_test_registers_new";
const COLUMN: &str = "batch_id";

/// Cube tests may exist before their batch is registered.
pub struct NullableCubeBatch;

impl NullableCubeBatch {
    /// Table rebuild for the embedded engine, which cannot alter nullability.
    async fn rebuild_sqlite(&self, db: &mut dyn SchemaDriver) -> Result<()> {
        let ddl = db
            .table_ddl(TABLE)
            .await?
            .ok_or_else(|| MigrateError::migration(self.name(), "table definition not found"))?;
        let indexes: Vec<String> = db
            .query(
                "SELECT sql FROM sqlite_master WHERE type = 'index' AND tbl_name = ?1 AND sql IS NOT NULL",
                &[TABLE.into()],
            )
            .await?
            .into_iter()
            .filter_map(|row| row.into_iter().next())
            .filter_map(|v| v.as_str().map(str::to_string))
            .collect();
        let columns = quote_list(
            &db.columns(TABLE)
                .await?
                .into_iter()
                .map(|c| c.name)
                .collect::<Vec<_>>(),
        )?;

        db.execute_batch(&format!("DROP TABLE IF EXISTS {}", REBUILT))
            .await?;
        db.execute_batch(&relax_not_null(&ddl, COLUMN, REBUILT)?)
            .await?;
        let copied = db
            .execute(
                &format!(
                    "INSERT INTO {} ({}) SELECT {} FROM {}",
                    REBUILT, columns, columns, TABLE
                ),
                &[],
            )
            .await?;
        db.execute_batch(&format!("DROP TABLE {}", TABLE)).await?;
        db.execute_batch(&format!("ALTER TABLE {} RENAME TO {}", REBUILT, TABLE))
            .await?;
        for sql in &indexes {
            db.execute_batch(sql).await?;
        }
        info!(
            "[{}] rebuilt {} ({} rows, {} indexes)",
            self.name(),
            TABLE,
            copied,
            indexes.len()
        );

        let violations = db
            .query(&format!("PRAGMA foreign_key_check({})", TABLE), &[])
            .await?;
        if !violations.is_empty() {
            warn!(
                "[{}] {} row(s) in {} reference missing parents",
                self.name(),
                violations.len(),
                TABLE
            );
        }
        Ok(())
    }
}

#[async_trait]
impl Migration for NullableCubeBatch {
    fn id(&self) -> u32 {
        5
    }

    fn name(&self) -> &'static str {
        "nullable_cube_batch"
    }

    fn description(&self) -> &'static str {
        "allow cube_test_registers.batch_id to be NULL"
    }

    async fn check(&self, db: &mut dyn SchemaDriver) -> Result<Applicability> {
        if let Some(na) = require_tables(db, &[TABLE]).await? {
            return Ok(na);
        }
        let columns = db.columns(TABLE).await?;
        match columns.iter().find(|c| c.name.eq_ignore_ascii_case(COLUMN)) {
            None => Ok(Applicability::NotApplicable(format!(
                "column {}.{} does not exist",
                TABLE, COLUMN
            ))),
            Some(c) if c.nullable => Ok(Applicability::UpToDate),
            Some(_) => Ok(Applicability::Pending),
        }
    }

    async fn apply(&self, db: &mut dyn SchemaDriver) -> Result<()> {
        match db.dialect() {
            Dialect::Sqlite => self.rebuild_sqlite(db).await,
            Dialect::Postgres => {
                db.execute_batch(&format!(
                    "ALTER TABLE {} ALTER COLUMN {} DROP NOT NULL",
                    TABLE, COLUMN
                ))
                .await
            }
        }
    }

    fn needs_foreign_keys_off(&self, dialect: Dialect) -> bool {
        dialect == Dialect::Sqlite
    }
}
