//! Hosted PostgreSQL driver.

pub mod params;

use async_trait::async_trait;
use tokio_postgres::{Client, Config as PgConfig, NoTls};
use tracing::{debug, error, info};

use super::tls::{make_connector, SslMode};
use super::{Dialect, SchemaDriver};
use crate::core::{CatalogColumn, SqlValue};
use crate::error::{MigrateError, Result};

pub use params::{as_refs, bind_all, from_pg_row, to_pg_param, PgParam};

/// PostgreSQL implementation of [`SchemaDriver`] over a single client.
pub struct PgDriver {
    client: Client,
}

impl PgDriver {
    /// Connect using a libpq-style URL or key/value string.
    ///
    /// The connection task is spawned on the current runtime and ends when
    /// the client is dropped.
    pub async fn connect(url: &str, ssl_mode: SslMode) -> Result<Self> {
        let pg_config: PgConfig = url
            .parse()
            .map_err(|e| MigrateError::Environment(format!("invalid DATABASE_URL: {}", e)))?;

        let client = match make_connector(ssl_mode)? {
            Some(tls) => {
                let (client, connection) = pg_config.connect(tls).await?;
                tokio::spawn(async move {
                    if let Err(e) = connection.await {
                        error!("PostgreSQL connection error: {}", e);
                    }
                });
                client
            }
            None => {
                let (client, connection) = pg_config.connect(NoTls).await?;
                tokio::spawn(async move {
                    if let Err(e) = connection.await {
                        error!("PostgreSQL connection error: {}", e);
                    }
                });
                client
            }
        };

        client.simple_query("SELECT 1").await?;
        info!(
            "Connected to PostgreSQL target: {:?}/{}",
            pg_config.get_hosts().first(),
            pg_config.get_dbname().unwrap_or("")
        );

        Ok(Self { client })
    }

    /// Wrap an existing client.
    pub fn from_client(client: Client) -> Self {
        Self { client }
    }

    /// Borrow the underlying client.
    pub fn client(&self) -> &Client {
        &self.client
    }

    async fn text_column(&self, sql: &str, arg: &str) -> Result<Vec<String>> {
        let rows = self.client.query(sql, &[&arg]).await?;
        rows.iter()
            .map(|row| row.try_get::<_, String>(0).map_err(MigrateError::from))
            .collect()
    }
}

#[async_trait]
impl SchemaDriver for PgDriver {
    fn dialect(&self) -> Dialect {
        Dialect::Postgres
    }

    async fn table_names(&mut self) -> Result<Vec<String>> {
        let rows = self
            .client
            .query(
                "SELECT table_name::text FROM information_schema.tables \
                 WHERE table_schema = current_schema() AND table_type = 'BASE TABLE' \
                 ORDER BY table_name",
                &[],
            )
            .await?;
        rows.iter()
            .map(|row| row.try_get::<_, String>(0).map_err(MigrateError::from))
            .collect()
    }

    async fn columns(&mut self, table: &str) -> Result<Vec<CatalogColumn>> {
        let rows = self
            .client
            .query(
                "SELECT column_name::text, data_type::text, is_nullable = 'YES' \
                 FROM information_schema.columns \
                 WHERE table_schema = current_schema() AND table_name = $1::text \
                 ORDER BY ordinal_position",
                &[&table],
            )
            .await?;
        let mut columns = Vec::with_capacity(rows.len());
        for row in rows {
            columns.push(CatalogColumn {
                name: row.try_get(0)?,
                declared_type: row.try_get(1)?,
                nullable: row.try_get(2)?,
            });
        }
        Ok(columns)
    }

    async fn index_names(&mut self, table: &str) -> Result<Vec<String>> {
        self.text_column(
            "SELECT indexname::text FROM pg_indexes \
             WHERE schemaname = current_schema() AND tablename = $1::text",
            table,
        )
        .await
    }

    async fn table_ddl(&mut self, _table: &str) -> Result<Option<String>> {
        Ok(None)
    }

    async fn execute(&mut self, sql: &str, values: &[SqlValue]) -> Result<u64> {
        let stmt = self.client.prepare(sql).await?;
        let bound = bind_all(values, stmt.params())?;
        Ok(self.client.execute(&stmt, &as_refs(&bound)).await?)
    }

    async fn execute_batch(&mut self, sql: &str) -> Result<()> {
        self.client.batch_execute(sql).await?;
        Ok(())
    }

    async fn query(&mut self, sql: &str, values: &[SqlValue]) -> Result<Vec<Vec<SqlValue>>> {
        let stmt = self.client.prepare(sql).await?;
        let bound = bind_all(values, stmt.params())?;
        let rows = self.client.query(&stmt, &as_refs(&bound)).await?;
        rows.iter().map(from_pg_row).collect()
    }

    async fn begin(&mut self) -> Result<()> {
        self.client.batch_execute("BEGIN").await?;
        Ok(())
    }

    async fn commit(&mut self) -> Result<()> {
        self.client.batch_execute("COMMIT").await?;
        Ok(())
    }

    async fn rollback(&mut self) -> Result<()> {
        self.client.batch_execute("ROLLBACK").await?;
        Ok(())
    }

    /// PostgreSQL has no per-session FK switch; trigger suspension via
    /// `session_replication_role` is the closest equivalent.
    async fn set_foreign_keys(&mut self, enabled: bool) -> Result<()> {
        let role = if enabled { "DEFAULT" } else { "replica" };
        debug!("SET session_replication_role = {}", role);
        self.client
            .batch_execute(&format!("SET session_replication_role = {}", role))
            .await?;
        Ok(())
    }
}
