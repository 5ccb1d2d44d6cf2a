//! Target session abstraction for the direct loader.

use async_trait::async_trait;
use tokio_postgres::error::SqlState;

use crate::core::SqlValue;
use crate::drivers::postgres::{as_refs, bind_all, PgDriver};

/// How a statement failed, which decides the loader's reaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    /// The connection is gone; nothing more can be done.
    Connection,
    /// A foreign-key constraint rejected the row.
    ForeignKey,
    /// Any other per-statement rejection (type, constraint, value).
    Rejected,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionError {
    pub kind: FailureKind,
    pub message: String,
}

impl SessionError {
    pub fn new(kind: FailureKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }
}

impl std::fmt::Display for SessionError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.message)
    }
}

pub type SessionResult<T> = std::result::Result<T, SessionError>;

/// Statements the loader needs from a target connection.
#[async_trait]
pub trait LoadSession: Send {
    /// Run a control statement (`BEGIN`, `SAVEPOINT`, `SET`, …).
    async fn execute(&mut self, sql: &str) -> SessionResult<()>;

    /// Run a parameterized insert, returning the affected row count.
    async fn insert(&mut self, sql: &str, params: &[SqlValue]) -> SessionResult<u64>;
}

fn classify(e: &tokio_postgres::Error) -> FailureKind {
    if e.is_closed() {
        return FailureKind::Connection;
    }
    match e.as_db_error() {
        Some(db) if db.code() == &SqlState::FOREIGN_KEY_VIOLATION => FailureKind::ForeignKey,
        Some(_) => FailureKind::Rejected,
        None => FailureKind::Connection,
    }
}

fn pg_error(e: tokio_postgres::Error) -> SessionError {
    let message = match e.as_db_error() {
        Some(db) => match db.detail() {
            Some(detail) => format!("{} ({})", db.message(), detail),
            None => db.message().to_string(),
        },
        None => e.to_string(),
    };
    SessionError::new(classify(&e), message)
}

/// [`LoadSession`] over a live PostgreSQL connection.
pub struct PgLoadSession {
    driver: PgDriver,
}

impl PgLoadSession {
    pub fn new(driver: PgDriver) -> Self {
        Self { driver }
    }
}

#[async_trait]
impl LoadSession for PgLoadSession {
    async fn execute(&mut self, sql: &str) -> SessionResult<()> {
        self.driver.client().batch_execute(sql).await.map_err(pg_error)
    }

    async fn insert(&mut self, sql: &str, params: &[SqlValue]) -> SessionResult<u64> {
        let client = self.driver.client();
        let stmt = client.prepare(sql).await.map_err(pg_error)?;
        let bound = bind_all(params, stmt.params())
            .map_err(|e| SessionError::new(FailureKind::Rejected, e.to_string()))?;
        client.execute(&stmt, &as_refs(&bound)).await.map_err(pg_error)
    }
}
