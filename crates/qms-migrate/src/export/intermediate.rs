//! On-disk intermediate: one `{table}.json` per table plus `manifest.json`.
//!
//! [`Intermediate::open`] is the only way downstream stages read an export,
//! and it refuses anything incomplete: a missing manifest, a missing or
//! altered table file, a row count that disagrees with the data, or a row
//! whose keys differ from the table's column list.

use std::collections::BTreeMap;
use std::fs::File;
use std::io::{self, BufReader};
use std::path::{Path, PathBuf};

use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use sha2::{Digest, Sha256};
use tracing::{debug, info};

use super::codec;
use crate::core::{ForeignKeyRef, SqlValue};
use crate::error::{MigrateError, Result};

/// Manifest file name inside the intermediate directory.
pub const MANIFEST_FILE: &str = "manifest.json";

/// Suffix of files still being written.
pub const PARTIAL_SUFFIX: &str = ".partial";

/// Export summary written last.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Manifest {
    pub export_date: NaiveDateTime,
    pub source_name: String,
    pub tables_exported: usize,
    pub total_rows: u64,
    /// Table file names, in export order.
    pub tables: Vec<String>,
    /// SHA-256 of each table file, keyed by file name.
    #[serde(default)]
    pub checksums: BTreeMap<String, String>,
}

/// One exported table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TableDocument {
    pub table: String,
    pub columns: Vec<String>,
    pub row_count: usize,
    #[serde(default)]
    pub column_types: BTreeMap<String, String>,
    #[serde(default)]
    pub identity_column: Option<String>,
    #[serde(default)]
    pub foreign_keys: Vec<ForeignKeyRef>,
    pub data: Vec<Map<String, Value>>,
}

impl TableDocument {
    /// Declared type of `column`, empty when unknown.
    pub fn declared_type(&self, column: &str) -> &str {
        self.column_types
            .get(column)
            .map(String::as_str)
            .unwrap_or("")
    }

    /// Decode every row into values ordered like `columns`.
    pub fn decoded_rows(&self) -> Result<Vec<Vec<SqlValue>>> {
        self.data
            .iter()
            .map(|row| {
                self.columns
                    .iter()
                    .map(|col| {
                        let value = row.get(col).unwrap_or(&Value::Null);
                        codec::decode(value, self.declared_type(col))
                    })
                    .collect()
            })
            .collect()
    }

    /// Check invariant 1: every row has exactly the column list as keys.
    fn check_rows(&self) -> Result<()> {
        if self.row_count != self.data.len() {
            return Err(MigrateError::Intermediate(format!(
                "{}: row_count is {} but data has {} rows",
                self.table,
                self.row_count,
                self.data.len()
            )));
        }
        for (idx, row) in self.data.iter().enumerate() {
            let keys_match = row.len() == self.columns.len()
                && self.columns.iter().all(|c| row.contains_key(c));
            if !keys_match {
                return Err(MigrateError::Intermediate(format!(
                    "{}: row {} keys do not match the column list",
                    self.table, idx
                )));
            }
        }
        Ok(())
    }
}

/// Lowercase hex SHA-256 of a file's contents.
pub fn file_sha256(path: &Path) -> Result<String> {
    let mut file = File::open(path)?;
    let mut hasher = Sha256::new();
    io::copy(&mut file, &mut hasher)?;
    Ok(hex::encode(hasher.finalize()))
}

/// Table file name for `table`.
pub fn table_file_name(table: &str) -> String {
    format!("{}.json", table)
}

/// A validated intermediate directory.
#[derive(Debug)]
pub struct Intermediate {
    pub dir: PathBuf,
    pub manifest: Manifest,
    tables: BTreeMap<String, TableDocument>,
}

impl Intermediate {
    /// Open and validate an intermediate directory.
    pub fn open(dir: impl AsRef<Path>) -> Result<Self> {
        let dir = dir.as_ref().to_path_buf();
        let manifest_path = dir.join(MANIFEST_FILE);
        if !manifest_path.is_file() {
            return Err(MigrateError::Environment(format!(
                "{} has no {}; the export is incomplete or missing",
                dir.display(),
                MANIFEST_FILE
            )));
        }
        let manifest: Manifest =
            serde_json::from_reader(BufReader::new(File::open(&manifest_path)?))?;

        let mut tables = BTreeMap::new();
        let mut total_rows = 0u64;
        for file_name in &manifest.tables {
            let path = dir.join(file_name);
            if !path.is_file() {
                return Err(MigrateError::Intermediate(format!(
                    "{} listed in manifest but missing",
                    file_name
                )));
            }
            if let Some(expected) = manifest.checksums.get(file_name) {
                let actual = file_sha256(&path)?;
                if &actual != expected {
                    return Err(MigrateError::Intermediate(format!(
                        "{} checksum mismatch (expected {}, found {})",
                        file_name, expected, actual
                    )));
                }
            }

            let doc: TableDocument = serde_json::from_reader(BufReader::new(File::open(&path)?))
                .map_err(|e| MigrateError::Intermediate(format!("{}: {}", file_name, e)))?;
            doc.check_rows()?;
            debug!("Validated {} ({} rows)", file_name, doc.row_count);
            total_rows += doc.row_count as u64;
            tables.insert(doc.table.clone(), doc);
        }

        if total_rows != manifest.total_rows {
            return Err(MigrateError::Intermediate(format!(
                "manifest total_rows is {} but table files hold {}",
                manifest.total_rows, total_rows
            )));
        }

        info!(
            "Opened intermediate {} ({} tables, {} rows, exported {})",
            dir.display(),
            tables.len(),
            total_rows,
            manifest.export_date
        );
        Ok(Self {
            dir,
            manifest,
            tables,
        })
    }

    /// Table names present in the export.
    pub fn table_names(&self) -> Vec<String> {
        self.tables.keys().cloned().collect()
    }

    pub fn table(&self, name: &str) -> Option<&TableDocument> {
        self.tables.get(name)
    }

    /// Every foreign key observed in the source, as `(child, fk)` pairs.
    pub fn foreign_keys(&self) -> Vec<(String, ForeignKeyRef)> {
        self.tables
            .values()
            .flat_map(|doc| {
                doc.foreign_keys
                    .iter()
                    .map(move |fk| (doc.table.clone(), fk.clone()))
            })
            .collect()
    }
}
