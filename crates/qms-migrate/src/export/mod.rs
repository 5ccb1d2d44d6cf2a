//! Row export from the embedded database into the JSON intermediate.
//!
//! Each table is streamed into `{table}.json.partial` and renamed into place
//! once complete. The manifest is written last, so a directory without a
//! manifest is by construction an incomplete export.

pub mod codec;
pub mod intermediate;

use std::collections::BTreeMap;
use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use chrono::NaiveDateTime;
use tracing::{error, info};

use crate::core::TableSchema;
use crate::error::{MigrateError, Result};
use crate::source::SqliteSource;

pub use intermediate::{
    file_sha256, table_file_name, Intermediate, Manifest, TableDocument, MANIFEST_FILE,
    PARTIAL_SUFFIX,
};

fn partial_path(path: &Path) -> PathBuf {
    let mut name = path.as_os_str().to_os_string();
    name.push(PARTIAL_SUFFIX);
    PathBuf::from(name)
}

/// Write `bytes` to `path` via a `.partial` file and a rename.
pub fn write_atomic(path: &Path, bytes: &[u8]) -> Result<()> {
    let tmp = partial_path(path);
    fs::write(&tmp, bytes)?;
    fs::rename(&tmp, path)?;
    Ok(())
}

/// Stream one table into `path`; returns the number of rows written.
fn write_table(source: &SqliteSource, table: &TableSchema, path: &Path) -> Result<u64> {
    let expected = source.row_count(&table.name)?;
    let column_types: BTreeMap<&str, &str> = table
        .columns
        .iter()
        .map(|c| (c.name.as_str(), c.declared_type.as_str()))
        .collect();

    let tmp = partial_path(path);
    let mut w = BufWriter::new(File::create(&tmp)?);

    w.write_all(b"{\"table\":")?;
    serde_json::to_writer(&mut w, &table.name)?;
    w.write_all(b",\"columns\":")?;
    serde_json::to_writer(&mut w, &table.column_names())?;
    w.write_all(b",\"row_count\":")?;
    serde_json::to_writer(&mut w, &expected)?;
    w.write_all(b",\"column_types\":")?;
    serde_json::to_writer(&mut w, &column_types)?;
    w.write_all(b",\"identity_column\":")?;
    serde_json::to_writer(&mut w, &table.identity_column().map(|c| &c.name))?;
    w.write_all(b",\"foreign_keys\":")?;
    serde_json::to_writer(&mut w, &table.foreign_keys)?;
    w.write_all(b",\"data\":[")?;

    let mut written = 0i64;
    source.for_each_row(table, |values| {
        if written > 0 {
            w.write_all(b",\n")?;
        } else {
            w.write_all(b"\n")?;
        }
        serde_json::to_writer(&mut w, &codec::encode_row(&table.columns, &values)?)?;
        written += 1;
        Ok(())
    })?;

    w.write_all(b"\n]}\n")?;
    w.flush()?;
    drop(w);

    if written != expected {
        return Err(MigrateError::Intermediate(format!(
            "{}: counted {} rows but read {}; the source changed during export",
            table.name, expected, written
        )));
    }

    fs::rename(&tmp, path)?;
    Ok(written as u64)
}

/// Export every user table of `source` into `output_dir`.
///
/// The export is all-or-nothing: on any failure the partial file is
/// removed, no manifest is written and the error is returned.
pub fn export_all(
    source: &SqliteSource,
    output_dir: &Path,
    export_date: NaiveDateTime,
) -> Result<Manifest> {
    fs::create_dir_all(output_dir)?;

    // a manifest from an earlier run would vouch for files about to change
    let manifest_path = output_dir.join(MANIFEST_FILE);
    if manifest_path.exists() {
        fs::remove_file(&manifest_path)?;
    }

    let tables = source.tables()?;
    let mut manifest = Manifest {
        export_date,
        source_name: source.source_name(),
        tables_exported: 0,
        total_rows: 0,
        tables: Vec::with_capacity(tables.len()),
        checksums: BTreeMap::new(),
    };

    for table in &tables {
        let file_name = table_file_name(&table.name);
        let path = output_dir.join(&file_name);
        let rows = match write_table(source, table, &path) {
            Ok(rows) => rows,
            Err(e) => {
                error!("Export of {} failed: {}", table.name, e);
                let _ = fs::remove_file(partial_path(&path));
                return Err(e);
            }
        };
        info!("Exported {} rows from {}", rows, table.name);

        manifest.checksums.insert(file_name.clone(), file_sha256(&path)?);
        manifest.tables.push(file_name);
        manifest.tables_exported += 1;
        manifest.total_rows += rows;
    }

    write_atomic(&manifest_path, &serde_json::to_vec_pretty(&manifest)?)?;
    info!(
        "Export complete: {} tables, {} rows -> {}",
        manifest.tables_exported,
        manifest.total_rows,
        output_dir.display()
    );
    Ok(manifest)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::SqlValue;
    use rusqlite::Connection;
    use serde_json::json;

    fn export_date() -> NaiveDateTime {
        chrono::NaiveDate::from_ymd_opt(2024, 6, 1)
            .unwrap()
            .and_hms_opt(8, 30, 0)
            .unwrap()
    }

    fn source() -> SqliteSource {
        let conn = Connection::open_in_memory().unwrap();
        conn.execute_batch(
            "CREATE TABLE companies (id INTEGER PRIMARY KEY, name TEXT, created_at DATETIME);
             CREATE TABLE mix_designs (
                 id INTEGER PRIMARY KEY,
                 company_id INTEGER REFERENCES companies(id),
                 image_data BLOB,
                 is_deleted BOOLEAN DEFAULT 0
             );
             INSERT INTO companies VALUES (1, 'O''Brien Ltd', '2024-01-02 03:04:05');
             INSERT INTO mix_designs VALUES (7, 1, X'00FF10', 1), (8, 1, NULL, 0);",
        )
        .unwrap();
        SqliteSource::from_connection(conn, "qms.sqlite3")
    }

    #[test]
    fn test_export_writes_tables_then_manifest() {
        let dir = tempfile::tempdir().unwrap();
        let manifest = export_all(&source(), dir.path(), export_date()).unwrap();

        assert_eq!(manifest.tables, vec!["companies.json", "mix_designs.json"]);
        assert_eq!(manifest.tables_exported, 2);
        assert_eq!(manifest.total_rows, 3);
        assert_eq!(manifest.source_name, "qms.sqlite3");
        assert!(dir.path().join(MANIFEST_FILE).is_file());
        assert!(!dir.path().join("companies.json.partial").exists());

        let raw: serde_json::Value = serde_json::from_str(
            &fs::read_to_string(dir.path().join("mix_designs.json")).unwrap(),
        )
        .unwrap();
        assert_eq!(raw["identity_column"], json!("id"));
        assert_eq!(raw["data"][0]["image_data"], json!("00ff10"));
        assert_eq!(raw["data"][0]["is_deleted"], json!(true));
        assert_eq!(raw["data"][1]["image_data"], json!(null));
        assert_eq!(raw["foreign_keys"][0]["ref_table"], json!("companies"));
    }

    #[test]
    fn test_intermediate_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        export_all(&source(), dir.path(), export_date()).unwrap();

        let intermediate = Intermediate::open(dir.path()).unwrap();
        assert_eq!(intermediate.manifest.export_date, export_date());
        let companies = intermediate.table("companies").unwrap();
        let rows = companies.decoded_rows().unwrap();
        assert_eq!(rows[0][1], SqlValue::Text("O'Brien Ltd".into()));
        assert_eq!(
            rows[0][2].as_timestamp().unwrap().to_string(),
            "2024-01-02 03:04:05"
        );

        let mixes = intermediate.table("mix_designs").unwrap();
        let rows = mixes.decoded_rows().unwrap();
        assert_eq!(rows[0][2], SqlValue::Bytes(vec![0x00, 0xff, 0x10]));
        assert_eq!(rows[0][3], SqlValue::Bool(true));
        assert_eq!(intermediate.foreign_keys().len(), 1);
    }

    #[test]
    fn test_export_is_deterministic() {
        let a = tempfile::tempdir().unwrap();
        let b = tempfile::tempdir().unwrap();
        let src = source();
        let ma = export_all(&src, a.path(), export_date()).unwrap();
        let mb = export_all(&src, b.path(), export_date()).unwrap();
        assert_eq!(ma.checksums, mb.checksums);
    }

    #[test]
    fn test_missing_manifest_is_refused() {
        let dir = tempfile::tempdir().unwrap();
        export_all(&source(), dir.path(), export_date()).unwrap();
        fs::remove_file(dir.path().join(MANIFEST_FILE)).unwrap();
        let err = Intermediate::open(dir.path()).unwrap_err();
        assert!(matches!(err, MigrateError::Environment(_)));
    }

    #[test]
    fn test_tampered_table_is_refused() {
        let dir = tempfile::tempdir().unwrap();
        export_all(&source(), dir.path(), export_date()).unwrap();
        let path = dir.path().join("companies.json");
        let text = fs::read_to_string(&path).unwrap().replace("Brien", "Brian");
        fs::write(&path, text).unwrap();
        let err = Intermediate::open(dir.path()).unwrap_err();
        assert!(err.to_string().contains("checksum mismatch"));
    }

    #[test]
    fn test_row_key_mismatch_is_refused() {
        let dir = tempfile::tempdir().unwrap();
        export_all(&source(), dir.path(), export_date()).unwrap();

        // rewrite without checksums so only the row shape is checked
        let manifest_path = dir.path().join(MANIFEST_FILE);
        let mut manifest: Manifest =
            serde_json::from_str(&fs::read_to_string(&manifest_path).unwrap()).unwrap();
        manifest.checksums.clear();
        fs::write(&manifest_path, serde_json::to_vec(&manifest).unwrap()).unwrap();

        let path = dir.path().join("companies.json");
        let mut doc: TableDocument =
            serde_json::from_str(&fs::read_to_string(&path).unwrap()).unwrap();
        doc.data[0].remove("name");
        fs::write(&path, serde_json::to_vec(&doc).unwrap()).unwrap();

        let err = Intermediate::open(dir.path()).unwrap_err();
        assert!(err.to_string().contains("keys do not match"));
    }

    #[test]
    fn test_binary_cell_in_text_column_fails_export() {
        let conn = Connection::open_in_memory().unwrap();
        conn.execute_batch(
            "CREATE TABLE audit_notes (id INTEGER PRIMARY KEY, body TEXT);
             INSERT INTO audit_notes VALUES (1, 'ok'), (2, X'DEAD');",
        )
        .unwrap();
        let source = SqliteSource::from_connection(conn, "qms.sqlite3");
        let dir = tempfile::tempdir().unwrap();

        let err = export_all(&source, dir.path(), export_date()).unwrap_err();
        assert!(matches!(err, MigrateError::Intermediate(_)));
        assert!(!dir.path().join(MANIFEST_FILE).exists());
        assert!(!dir.path().join("audit_notes.json").exists());
    }

    #[test]
    fn test_failed_export_leaves_no_manifest() {
        let dir = tempfile::tempdir().unwrap();
        export_all(&source(), dir.path(), export_date()).unwrap();

        // a directory squatting on a table file path makes the rename fail
        let blocked = tempfile::tempdir().unwrap();
        fs::create_dir(blocked.path().join("companies.json")).unwrap();
        fs::create_dir(blocked.path().join("companies.json").join("x")).unwrap();
        assert!(export_all(&source(), blocked.path(), export_date()).is_err());
        assert!(!blocked.path().join(MANIFEST_FILE).exists());
        assert!(Intermediate::open(blocked.path()).is_err());
    }
}
