//! SQLite to PostgreSQL type and DDL translation.
//!
//! - [`typemap`]: the fixed declared-type catalog
//! - [`ddl`]: statement rewriting and the reviewable schema artifact
//!
//! The same translator serves the schema artifact and the migration runner
//! when it targets PostgreSQL, so both produce identical column types.

pub mod ddl;
pub mod typemap;

pub use ddl::{relax_not_null, translate_ddl, translate_statement, SchemaArtifact, Translation};
pub use typemap::{sqlite_to_postgres, TypeMapping};
