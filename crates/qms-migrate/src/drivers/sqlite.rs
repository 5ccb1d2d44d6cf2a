//! Embedded SQLite driver.

use std::path::Path;

use async_trait::async_trait;
use rusqlite::types::{ToSqlOutput, Value, ValueRef};
use rusqlite::{params_from_iter, Connection, OpenFlags, ToSql};
use tracing::debug;

use super::{Dialect, SchemaDriver};
use crate::core::{CatalogColumn, SqlValue};
use crate::error::{MigrateError, Result};

/// Open an existing database file read-write. A missing file is an
/// environment error rather than a silently created empty database.
pub fn open_existing(path: &Path) -> Result<Connection> {
    if !path.is_file() {
        return Err(MigrateError::Environment(format!(
            "database file not found: {}",
            path.display()
        )));
    }
    let conn = Connection::open_with_flags(
        path,
        OpenFlags::SQLITE_OPEN_READ_WRITE | OpenFlags::SQLITE_OPEN_NO_MUTEX,
    )?;
    debug!("Opened SQLite database {}", path.display());
    Ok(conn)
}

/// Convert a borrowed SQLite cell into an owned value.
pub fn value_from_ref(value: ValueRef<'_>) -> SqlValue {
    match value {
        ValueRef::Null => SqlValue::Null,
        ValueRef::Integer(i) => SqlValue::Int(i),
        ValueRef::Real(f) => SqlValue::Float(f),
        ValueRef::Text(t) => SqlValue::Text(String::from_utf8_lossy(t).into_owned()),
        ValueRef::Blob(b) => SqlValue::Bytes(b.to_vec()),
    }
}

impl ToSql for SqlValue {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        Ok(match self {
            SqlValue::Null => ToSqlOutput::Owned(Value::Null),
            SqlValue::Bool(b) => ToSqlOutput::Owned(Value::Integer(i64::from(*b))),
            SqlValue::Int(i) => ToSqlOutput::Owned(Value::Integer(*i)),
            SqlValue::Float(f) => ToSqlOutput::Owned(Value::Real(*f)),
            SqlValue::Text(s) => ToSqlOutput::Borrowed(ValueRef::Text(s.as_bytes())),
            SqlValue::Bytes(b) => ToSqlOutput::Borrowed(ValueRef::Blob(b)),
            SqlValue::Timestamp(ts) => {
                ToSqlOutput::Owned(Value::Text(ts.format("%Y-%m-%d %H:%M:%S%.f").to_string()))
            }
            SqlValue::Date(d) => ToSqlOutput::Owned(Value::Text(d.format("%Y-%m-%d").to_string())),
            SqlValue::Time(t) => ToSqlOutput::Owned(Value::Text(t.format("%H:%M:%S%.f").to_string())),
        })
    }
}

/// SQLite implementation of [`SchemaDriver`].
pub struct SqliteDriver {
    conn: Connection,
}

impl SqliteDriver {
    /// Open an existing database file.
    pub fn open(path: &Path) -> Result<Self> {
        Ok(Self {
            conn: open_existing(path)?,
        })
    }

    /// Wrap an already open connection.
    pub fn from_connection(conn: Connection) -> Self {
        Self { conn }
    }

    /// Borrow the underlying connection.
    pub fn connection(&self) -> &Connection {
        &self.conn
    }

    /// Give the connection back.
    pub fn into_inner(self) -> Connection {
        self.conn
    }

    fn query_strings(&self, sql: &str, arg: &str) -> Result<Vec<String>> {
        let mut stmt = self.conn.prepare(sql)?;
        let names = stmt
            .query_map([arg], |row| row.get::<_, String>(0))?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(names)
    }
}

#[async_trait]
impl SchemaDriver for SqliteDriver {
    fn dialect(&self) -> Dialect {
        Dialect::Sqlite
    }

    async fn table_names(&mut self) -> Result<Vec<String>> {
        let mut stmt = self.conn.prepare(
            "SELECT name FROM sqlite_master \
             WHERE type = 'table' AND name NOT LIKE 'sqlite_%' ORDER BY name",
        )?;
        let names = stmt
            .query_map([], |row| row.get::<_, String>(0))?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(names)
    }

    async fn columns(&mut self, table: &str) -> Result<Vec<CatalogColumn>> {
        let mut stmt = self.conn.prepare(
            "SELECT name, type, \"notnull\" FROM pragma_table_info(?1) ORDER BY cid",
        )?;
        let columns = stmt
            .query_map([table], |row| {
                Ok(CatalogColumn {
                    name: row.get(0)?,
                    declared_type: row.get(1)?,
                    nullable: row.get::<_, i64>(2)? == 0,
                })
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(columns)
    }

    async fn index_names(&mut self, table: &str) -> Result<Vec<String>> {
        self.query_strings("SELECT name FROM pragma_index_list(?1)", table)
    }

    async fn table_ddl(&mut self, table: &str) -> Result<Option<String>> {
        let ddl = self.query_strings(
            "SELECT sql FROM sqlite_master WHERE type = 'table' AND name = ?1",
            table,
        )?;
        Ok(ddl.into_iter().next())
    }

    async fn execute(&mut self, sql: &str, params: &[SqlValue]) -> Result<u64> {
        let changed = self.conn.execute(sql, params_from_iter(params.iter()))?;
        Ok(changed as u64)
    }

    async fn execute_batch(&mut self, sql: &str) -> Result<()> {
        self.conn.execute_batch(sql)?;
        Ok(())
    }

    async fn query(&mut self, sql: &str, params: &[SqlValue]) -> Result<Vec<Vec<SqlValue>>> {
        let mut stmt = self.conn.prepare(sql)?;
        let width = stmt.column_count();
        let mut rows = stmt.query(params_from_iter(params.iter()))?;
        let mut out = Vec::new();
        while let Some(row) = rows.next()? {
            let mut values = Vec::with_capacity(width);
            for i in 0..width {
                values.push(value_from_ref(row.get_ref(i)?));
            }
            out.push(values);
        }
        Ok(out)
    }

    async fn begin(&mut self) -> Result<()> {
        self.conn.execute_batch("BEGIN")?;
        Ok(())
    }

    async fn commit(&mut self) -> Result<()> {
        self.conn.execute_batch("COMMIT")?;
        Ok(())
    }

    async fn rollback(&mut self) -> Result<()> {
        if !self.conn.is_autocommit() {
            self.conn.execute_batch("ROLLBACK")?;
        }
        Ok(())
    }

    async fn set_foreign_keys(&mut self, enabled: bool) -> Result<()> {
        let pragma = if enabled {
            "PRAGMA foreign_keys = ON"
        } else {
            "PRAGMA foreign_keys = OFF"
        };
        self.conn.execute_batch(pragma)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn driver() -> SqliteDriver {
        let conn = Connection::open_in_memory().unwrap();
        conn.execute_batch(
            "CREATE TABLE projects (id INTEGER PRIMARY KEY, name TEXT NOT NULL, logo BLOB);
             CREATE INDEX idx_projects_name ON projects(name);",
        )
        .unwrap();
        SqliteDriver::from_connection(conn)
    }

    #[test]
    fn test_open_missing_file_is_environment_error() {
        let dir = tempfile::tempdir().unwrap();
        let err = open_existing(&dir.path().join("absent.sqlite3")).unwrap_err();
        assert!(matches!(err, MigrateError::Environment(_)));
        assert!(!dir.path().join("absent.sqlite3").exists());
    }

    #[tokio::test]
    async fn test_catalog_inspection() {
        let mut db = driver();
        assert_eq!(db.table_names().await.unwrap(), vec!["projects"]);
        assert!(db.has_table("PROJECTS").await.unwrap());
        assert!(!db.has_table("users").await.unwrap());

        let columns = db.columns("projects").await.unwrap();
        let names: Vec<_> = columns.iter().map(|c| c.name.as_str()).collect();
        assert_eq!(names, vec!["id", "name", "logo"]);
        assert!(!columns[1].nullable);
        assert!(columns[2].nullable);

        assert!(db.has_index("projects", "idx_projects_name").await.unwrap());
        assert!(db.columns("missing").await.unwrap().is_empty());
        assert!(db.table_ddl("projects").await.unwrap().unwrap().starts_with("CREATE TABLE"));
    }

    #[tokio::test]
    async fn test_execute_and_query_round_trip() {
        let mut db = driver();
        db.execute(
            "INSERT INTO projects (name, logo) VALUES (?1, ?2)",
            &[SqlValue::from("Tower A"), SqlValue::Bytes(vec![0, 255, 16])],
        )
        .await
        .unwrap();

        let rows = db
            .query("SELECT id, name, logo FROM projects", &[])
            .await
            .unwrap();
        assert_eq!(
            rows,
            vec![vec![
                SqlValue::Int(1),
                SqlValue::Text("Tower A".into()),
                SqlValue::Bytes(vec![0, 255, 16]),
            ]]
        );
    }

    #[tokio::test]
    async fn test_rollback_discards_changes() {
        let mut db = driver();
        db.begin().await.unwrap();
        db.execute("INSERT INTO projects (name) VALUES ('x')", &[])
            .await
            .unwrap();
        db.rollback().await.unwrap();
        let count = db
            .query_scalar("SELECT COUNT(*) FROM projects", &[])
            .await
            .unwrap();
        assert_eq!(count, Some(SqlValue::Int(0)));

        // rollback outside a transaction is a no-op
        db.rollback().await.unwrap();
    }
}
