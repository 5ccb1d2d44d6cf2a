//! # qms-migrate
//!
//! Database evolution and cross-engine data migration for the construction
//! quality-management product.
//!
//! The library covers two independent paths:
//!
//! - **Schema evolution**: a fixed catalog of forward-only, idempotent
//!   migrations that runs against the embedded SQLite file or PostgreSQL
//! - **Data migration**: introspect the SQLite file, export every table to a
//!   checksummed JSON intermediate, then either emit a reviewable SQL artifact
//!   or load PostgreSQL directly in dependency order
//!
//! It also carries the first-run administrator seed and the notification
//! mail renderer.
//!
//! ## Example
//!
//! ```rust,no_run
//! use qms_migrate::{MigrationRunner, SqliteDriver};
//!
//! #[tokio::main]
//! async fn main() -> qms_migrate::Result<()> {
//!     let mut db = SqliteDriver::open(std::path::Path::new("data.sqlite3"))?;
//!     let summary = MigrationRunner::new().run(&mut db).await?;
//!     print!("{}", summary.render());
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod core;
pub mod dialect;
pub mod drivers;
pub mod emit;
pub mod error;
pub mod export;
pub mod load;
pub mod mail;
pub mod plan;
pub mod runner;
pub mod seed;
pub mod source;
pub mod verify;

// Re-exports for convenient access
pub use config::{Config, DATABASE_URL_ENV};
pub use core::{ColumnSchema, ForeignKeyRef, SqlValue, TableSchema};
pub use dialect::{translate_ddl, SchemaArtifact, Translation};
pub use drivers::tls::SslMode;
pub use drivers::{Dialect, PgDriver, SchemaDriver, SqliteDriver};
pub use emit::{emit, emit_to_file, EmitSummary};
pub use error::{MigrateError, Result};
pub use export::{export_all, Intermediate, Manifest};
pub use load::{load, LoadOptions, LoadReport, LoadSession, PgLoadSession};
pub use mail::{MailDefaults, MailRenderer};
pub use plan::plan;
pub use runner::{Applicability, Migration, MigrationRunner, RunSummary};
pub use seed::{seed_admin, AdminSeed, PasswordHasher, PrecomputedHash, SeedOutcome};
pub use source::SqliteSource;
pub use verify::{verify, VerifyReport};
