//! Live-database access for both engines.
//!
//! The migration runner and the administrative seed talk to a database only
//! through [`SchemaDriver`], so one catalog of steps serves the embedded file
//! engine and the hosted server engine alike.

pub mod postgres;
pub mod sqlite;
pub mod tls;

use async_trait::async_trait;

use crate::core::{CatalogColumn, SqlValue};
use crate::dialect;
use crate::error::Result;

pub use postgres::PgDriver;
pub use sqlite::SqliteDriver;

/// SQL dialect of a live connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dialect {
    /// Embedded single-file engine.
    Sqlite,
    /// Hosted server engine.
    Postgres,
}

impl Dialect {
    /// Short engine name used in logs and CLI flags.
    pub fn name(&self) -> &'static str {
        match self {
            Dialect::Sqlite => "sqlite",
            Dialect::Postgres => "postgres",
        }
    }

    /// Positional parameter marker for the 1-based `index`.
    pub fn placeholder(&self, index: usize) -> String {
        match self {
            Dialect::Sqlite => format!("?{}", index),
            Dialect::Postgres => format!("${}", index),
        }
    }

    /// Rewrite DDL authored in the embedded dialect for this engine.
    pub fn adapt_ddl(&self, sql: &str) -> Result<String> {
        match self {
            Dialect::Sqlite => Ok(sql.to_string()),
            Dialect::Postgres => Ok(dialect::translate_statement(sql)?.sql),
        }
    }
}

impl std::str::FromStr for Dialect {
    type Err = crate::error::MigrateError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "sqlite" | "sqlite3" => Ok(Dialect::Sqlite),
            "postgres" | "postgresql" | "pg" => Ok(Dialect::Postgres),
            other => Err(crate::error::MigrateError::Config(format!(
                "unknown engine '{}', expected sqlite or postgres",
                other
            ))),
        }
    }
}

/// Catalog inspection and statement execution over one exclusive connection.
///
/// Transaction control is explicit so the runner can wrap each step in its
/// own transaction and toggle foreign-key enforcement outside of it.
#[async_trait]
pub trait SchemaDriver: Send {
    /// Dialect of this connection.
    fn dialect(&self) -> Dialect;

    /// User table names, sorted.
    async fn table_names(&mut self) -> Result<Vec<String>>;

    /// Columns of `table` in physical order; empty when the table is absent.
    async fn columns(&mut self, table: &str) -> Result<Vec<CatalogColumn>>;

    /// Index names defined on `table`.
    async fn index_names(&mut self, table: &str) -> Result<Vec<String>>;

    /// Original `CREATE TABLE` text, where the engine keeps it.
    async fn table_ddl(&mut self, table: &str) -> Result<Option<String>>;

    /// Execute one statement with positional parameters.
    async fn execute(&mut self, sql: &str, params: &[SqlValue]) -> Result<u64>;

    /// Execute one or more statements without parameters.
    async fn execute_batch(&mut self, sql: &str) -> Result<()>;

    /// Run a query and return every row.
    async fn query(&mut self, sql: &str, params: &[SqlValue]) -> Result<Vec<Vec<SqlValue>>>;

    async fn begin(&mut self) -> Result<()>;

    async fn commit(&mut self) -> Result<()>;

    async fn rollback(&mut self) -> Result<()>;

    /// Switch foreign-key enforcement. Must be called outside a transaction.
    async fn set_foreign_keys(&mut self, enabled: bool) -> Result<()>;

    /// Execute DDL written in the embedded dialect, translated as needed.
    async fn execute_ddl(&mut self, sql: &str) -> Result<()> {
        let sql = self.dialect().adapt_ddl(sql)?;
        self.execute_batch(&sql).await
    }

    async fn has_table(&mut self, table: &str) -> Result<bool> {
        let tables = self.table_names().await?;
        Ok(tables.iter().any(|t| t.eq_ignore_ascii_case(table)))
    }

    async fn has_column(&mut self, table: &str, column: &str) -> Result<bool> {
        let columns = self.columns(table).await?;
        Ok(columns.iter().any(|c| c.name.eq_ignore_ascii_case(column)))
    }

    async fn has_index(&mut self, table: &str, index: &str) -> Result<bool> {
        let indexes = self.index_names(table).await?;
        Ok(indexes.iter().any(|i| i.eq_ignore_ascii_case(index)))
    }

    /// First column of the first row, if any.
    async fn query_scalar(&mut self, sql: &str, params: &[SqlValue]) -> Result<Option<SqlValue>> {
        let rows = self.query(sql, params).await?;
        Ok(rows.into_iter().next().and_then(|r| r.into_iter().next()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_placeholders() {
        assert_eq!(Dialect::Sqlite.placeholder(2), "?2");
        assert_eq!(Dialect::Postgres.placeholder(2), "$2");
    }

    #[test]
    fn test_dialect_from_str() {
        assert_eq!("SQLite".parse::<Dialect>().unwrap(), Dialect::Sqlite);
        assert_eq!("postgresql".parse::<Dialect>().unwrap(), Dialect::Postgres);
        assert!("oracle".parse::<Dialect>().is_err());
    }

    #[test]
    fn test_adapt_ddl_translates_for_postgres() {
        let ddl = "ALTER TABLE mix_designs ADD COLUMN image_data BLOB";
        assert_eq!(Dialect::Sqlite.adapt_ddl(ddl).unwrap(), ddl);
        assert_eq!(
            Dialect::Postgres.adapt_ddl(ddl).unwrap(),
            "ALTER TABLE mix_designs ADD COLUMN image_data BYTEA"
        );
    }
}
