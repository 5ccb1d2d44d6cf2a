//! Schema metadata types for tables, columns and foreign keys.
//!
//! These types provide an engine-neutral view of the source catalog used by
//! the translator, the exporter and the load planner.

use serde::{Deserialize, Serialize};

/// Table metadata as read from the source catalog.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TableSchema {
    /// Table name.
    pub name: String,

    /// Original `CREATE TABLE` statement text.
    pub ddl: String,

    /// Columns in physical order.
    pub columns: Vec<ColumnSchema>,

    /// Primary key column names, in key order.
    pub primary_key: Vec<String>,

    /// Outgoing foreign keys.
    pub foreign_keys: Vec<ForeignKeyRef>,
}

impl TableSchema {
    /// Column names in physical order.
    pub fn column_names(&self) -> Vec<String> {
        self.columns.iter().map(|c| c.name.clone()).collect()
    }

    /// The engine-issued integer key, if the table has one.
    pub fn identity_column(&self) -> Option<&ColumnSchema> {
        self.columns.iter().find(|c| c.is_identity)
    }

    /// Look up a column by name (case-insensitive, like both engines).
    pub fn column(&self, name: &str) -> Option<&ColumnSchema> {
        self.columns
            .iter()
            .find(|c| c.name.eq_ignore_ascii_case(name))
    }
}

/// Column metadata.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ColumnSchema {
    /// Column name.
    pub name: String,

    /// Declared type exactly as written in the DDL (may be empty in SQLite).
    pub declared_type: String,

    /// Whether the column allows NULL.
    pub nullable: bool,

    /// Default expression text, if any.
    pub default: Option<String>,

    /// Whether the column is part of the primary key.
    pub is_primary_key: bool,

    /// Whether the engine issues values for this column.
    pub is_identity: bool,
}

/// A single-column foreign-key edge `table.column -> ref_table.ref_column`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ForeignKeyRef {
    /// Referencing column.
    pub column: String,

    /// Referenced table.
    pub ref_table: String,

    /// Referenced column.
    pub ref_column: String,
}

/// Minimal live-catalog view of a column used by migration predicates.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CatalogColumn {
    pub name: String,
    pub declared_type: String,
    pub nullable: bool,
}
