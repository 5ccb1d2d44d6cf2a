//! Source catalog introspection over the embedded database file.
//!
//! The exporter and the schema artifact both read the source through
//! [`SqliteSource`]: tables come back in a stable lexicographic order and
//! rows are streamed in primary-key order so that two exports of the same
//! file are byte-identical.

use std::path::{Path, PathBuf};

use rusqlite::Connection;
use tracing::debug;

use crate::core::identifier::{quote_ident, quote_list};
use crate::core::{ColumnSchema, ForeignKeyRef, SqlValue, TableSchema};
use crate::drivers::sqlite::{open_existing, value_from_ref};
use crate::error::{MigrateError, Result};

/// Read-side view of a SQLite database.
pub struct SqliteSource {
    conn: Connection,
    path: PathBuf,
}

impl SqliteSource {
    /// Open an existing database file. A missing file is an environment error.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let conn = open_existing(&path)?;
        Ok(Self { conn, path })
    }

    /// Wrap an open connection; `path` is only used as the source name.
    pub fn from_connection(conn: Connection, path: impl Into<PathBuf>) -> Self {
        Self {
            conn,
            path: path.into(),
        }
    }

    /// Short name of the source for artifact headers and the manifest.
    pub fn source_name(&self) -> String {
        self.path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| self.path.display().to_string())
    }

    pub fn connection(&self) -> &Connection {
        &self.conn
    }

    /// User table names, sorted.
    pub fn table_names(&self) -> Result<Vec<String>> {
        let mut stmt = self.conn.prepare(
            "SELECT name FROM sqlite_master \
             WHERE type = 'table' AND name NOT LIKE 'sqlite_%' ORDER BY name",
        )?;
        let names = stmt
            .query_map([], |row| row.get::<_, String>(0))?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(names)
    }

    /// Every user table with full metadata, sorted by name.
    pub fn tables(&self) -> Result<Vec<TableSchema>> {
        self.table_names()?
            .iter()
            .map(|name| self.table(name))
            .collect()
    }

    /// Metadata for a single table.
    pub fn table(&self, name: &str) -> Result<TableSchema> {
        let ddl: String = self
            .conn
            .query_row(
                "SELECT sql FROM sqlite_master WHERE type = 'table' AND name = ?1",
                [name],
                |row| row.get(0),
            )
            .map_err(|e| match e {
                rusqlite::Error::QueryReturnedNoRows => {
                    MigrateError::Environment(format!("table '{}' not found in source", name))
                }
                other => other.into(),
            })?;

        // (cid, name, type, notnull, dflt_value, pk)
        let mut stmt = self.conn.prepare(
            "SELECT name, type, \"notnull\", dflt_value, pk FROM pragma_table_info(?1) ORDER BY cid",
        )?;
        let raw = stmt
            .query_map([name], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, i64>(2)? != 0,
                    row.get::<_, Option<String>>(3)?,
                    row.get::<_, i64>(4)?,
                ))
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;

        let mut pk: Vec<(i64, String)> = raw
            .iter()
            .filter(|c| c.4 > 0)
            .map(|c| (c.4, c.0.clone()))
            .collect();
        pk.sort();
        let primary_key: Vec<String> = pk.into_iter().map(|(_, n)| n).collect();

        let columns = raw
            .into_iter()
            .map(|(col, declared_type, not_null, default, pk_pos)| {
                let is_identity = pk_pos > 0
                    && primary_key.len() == 1
                    && declared_type.eq_ignore_ascii_case("INTEGER");
                ColumnSchema {
                    name: col,
                    declared_type,
                    nullable: !not_null && !is_identity,
                    default,
                    is_primary_key: pk_pos > 0,
                    is_identity,
                }
            })
            .collect();

        let foreign_keys = self.foreign_keys(name)?;
        debug!(
            "Introspected {} ({} primary key columns, {} foreign keys)",
            name,
            primary_key.len(),
            foreign_keys.len()
        );

        Ok(TableSchema {
            name: name.to_string(),
            ddl,
            columns,
            primary_key,
            foreign_keys,
        })
    }

    fn foreign_keys(&self, table: &str) -> Result<Vec<ForeignKeyRef>> {
        let mut stmt = self.conn.prepare(
            "SELECT \"from\", \"table\", \"to\" FROM pragma_foreign_key_list(?1) ORDER BY id, seq",
        )?;
        let fks = stmt
            .query_map([table], |row| {
                Ok(ForeignKeyRef {
                    column: row.get(0)?,
                    ref_table: row.get(1)?,
                    // an omitted target column means the parent's primary key
                    ref_column: row
                        .get::<_, Option<String>>(2)?
                        .unwrap_or_else(|| "id".to_string()),
                })
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(fks)
    }

    /// Number of rows in `table`.
    pub fn row_count(&self, table: &str) -> Result<i64> {
        let sql = format!("SELECT COUNT(*) FROM {}", quote_ident(table)?);
        Ok(self.conn.query_row(&sql, [], |row| row.get(0))?)
    }

    /// Stream every row of `table` in primary-key order (rowid when the
    /// table has no declared key). Values follow `table.columns` order.
    pub fn for_each_row<F>(&self, table: &TableSchema, mut f: F) -> Result<()>
    where
        F: FnMut(Vec<SqlValue>) -> Result<()>,
    {
        let order = if table.primary_key.is_empty() {
            "rowid".to_string()
        } else {
            quote_list(&table.primary_key)?
        };
        let sql = format!(
            "SELECT {} FROM {} ORDER BY {}",
            quote_list(&table.column_names())?,
            quote_ident(&table.name)?,
            order
        );

        let mut stmt = self.conn.prepare(&sql)?;
        let width = table.columns.len();
        let mut rows = stmt.query([])?;
        while let Some(row) = rows.next()? {
            let mut values = Vec::with_capacity(width);
            for i in 0..width {
                values.push(value_from_ref(row.get_ref(i)?));
            }
            f(values)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn source() -> SqliteSource {
        let conn = Connection::open_in_memory().unwrap();
        conn.execute_batch(
            "CREATE TABLE companies (id INTEGER PRIMARY KEY AUTOINCREMENT, name TEXT NOT NULL);
             CREATE TABLE users (
                 id INTEGER PRIMARY KEY,
                 company_id INTEGER REFERENCES companies(id),
                 email VARCHAR(255) NOT NULL,
                 is_active BOOLEAN DEFAULT 1
             );
             CREATE TABLE project_memberships (
                 user_id INTEGER NOT NULL,
                 project_id INTEGER NOT NULL,
                 role TEXT,
                 PRIMARY KEY (user_id, project_id),
                 FOREIGN KEY (user_id) REFERENCES users(id)
             );
             INSERT INTO companies (name) VALUES ('Acme'), ('Beta');
             INSERT INTO users (id, company_id, email) VALUES (5, 2, 'b@x'), (3, 1, 'a@x');",
        )
        .unwrap();
        SqliteSource::from_connection(conn, "/tmp/data.sqlite3")
    }

    #[test]
    fn test_tables_sorted_with_metadata() {
        let src = source();
        let tables = src.tables().unwrap();
        let names: Vec<_> = tables.iter().map(|t| t.name.as_str()).collect();
        assert_eq!(names, vec!["companies", "project_memberships", "users"]);
        assert_eq!(src.source_name(), "data.sqlite3");

        let users = &tables[2];
        assert_eq!(users.column_names(), vec!["id", "company_id", "email", "is_active"]);
        assert_eq!(users.identity_column().unwrap().name, "id");
        assert!(!users.column("email").unwrap().nullable);
        assert_eq!(users.column("is_active").unwrap().default.as_deref(), Some("1"));
        assert_eq!(
            users.foreign_keys,
            vec![ForeignKeyRef {
                column: "company_id".into(),
                ref_table: "companies".into(),
                ref_column: "id".into(),
            }]
        );
        assert!(users.ddl.starts_with("CREATE TABLE users"));
    }

    #[test]
    fn test_composite_key_has_no_identity() {
        let src = source();
        let memberships = src.table("project_memberships").unwrap();
        assert_eq!(memberships.primary_key, vec!["user_id", "project_id"]);
        assert!(memberships.identity_column().is_none());
        assert_eq!(memberships.foreign_keys.len(), 1);
    }

    #[test]
    fn test_rows_stream_in_key_order() {
        let src = source();
        let users = src.table("users").unwrap();
        let mut ids = Vec::new();
        src.for_each_row(&users, |row| {
            ids.push(row[0].as_i64().unwrap());
            Ok(())
        })
        .unwrap();
        assert_eq!(ids, vec![3, 5]);
        assert_eq!(src.row_count("users").unwrap(), 2);
    }

    #[test]
    fn test_missing_table_is_environment_error() {
        let err = source().table("nope").unwrap_err();
        assert!(matches!(err, MigrateError::Environment(_)));
    }
}
