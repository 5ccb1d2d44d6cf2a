//! Core types shared by every stage of the pipeline.
//!
//! - [`schema`]: table, column and foreign-key metadata read from a catalog
//! - [`value`]: engine-neutral scalar values
//! - [`identifier`]: identifier validation and quoting

pub mod identifier;
pub mod schema;
pub mod value;

pub use schema::{CatalogColumn, ColumnSchema, ForeignKeyRef, TableSchema};
pub use value::SqlValue;
