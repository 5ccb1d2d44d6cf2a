//! `CREATE TABLE` / `ALTER TABLE` translation and the schema artifact.

use std::sync::LazyLock;

use chrono::NaiveDateTime;
use regex::{Captures, Regex};

use super::typemap::{self, TypeMapping};
use crate::core::identifier::quote_ident;
use crate::core::TableSchema;
use crate::error::{MigrateError, Result};

static CREATE_TABLE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?is)^\s*CREATE\s+(?:TEMP\s+|TEMPORARY\s+)?TABLE\b").expect("valid regex")
});

static ADD_COLUMN_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?is)^(\s*ALTER\s+TABLE\s+(\S+)\s+ADD\s+(?:COLUMN\s+)?)(.+)$")
        .expect("valid regex")
});

static PRIMARY_KEY_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)\bPRIMARY\s+KEY\b").expect("valid regex"));

static AUTOINCREMENT_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)\s*\bAUTOINCREMENT\b").expect("valid regex"));

static BOOL_DEFAULT_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\bDEFAULT\s+(?:\(\s*'?([01])'?\s*\)|'?([01])\b'?)").expect("valid regex")
});

static NOT_NULL_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)\s+NOT\s+NULL\b").expect("valid regex"));

static DATETIME_NOW_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?i)\bDEFAULT\s+(?:\(\s*datetime\s*\(\s*'now'\s*\)\s*\)|datetime\s*\(\s*'now'\s*\))",
    )
    .expect("valid regex")
});

/// Words that end the type part of a column definition.
const COLUMN_CONSTRAINT_WORDS: &[&str] = &[
    "PRIMARY", "NOT", "NULL", "DEFAULT", "REFERENCES", "UNIQUE", "CHECK", "CONSTRAINT",
    "COLLATE", "GENERATED", "AS",
];

/// Words that open a table-level constraint inside a `CREATE TABLE` body.
const TABLE_CONSTRAINT_WORDS: &[&str] = &["CONSTRAINT", "PRIMARY", "FOREIGN", "UNIQUE", "CHECK"];

/// Translated statement text plus any lossy-mapping warnings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Translation {
    pub sql: String,
    pub warnings: Vec<String>,
}

/// Split `body` on commas that are outside parentheses and quotes.
fn split_top_level(body: &str) -> Vec<String> {
    let mut parts = Vec::new();
    let mut current = String::new();
    let mut depth = 0usize;
    let mut quote: Option<char> = None;

    for ch in body.chars() {
        match quote {
            Some(q) => {
                if ch == q {
                    quote = None;
                }
                current.push(ch);
            }
            None => match ch {
                '\'' | '"' | '`' => {
                    quote = Some(ch);
                    current.push(ch);
                }
                '[' => {
                    quote = Some(']');
                    current.push(ch);
                }
                '(' => {
                    depth += 1;
                    current.push(ch);
                }
                ')' => {
                    depth = depth.saturating_sub(1);
                    current.push(ch);
                }
                ',' if depth == 0 => {
                    parts.push(current.trim().to_string());
                    current.clear();
                }
                _ => current.push(ch),
            },
        }
    }
    if !current.trim().is_empty() {
        parts.push(current.trim().to_string());
    }
    parts
}

/// Byte offset of the parenthesis closing the one at `open`.
fn matching_paren(text: &str, open: usize) -> Option<usize> {
    let mut depth = 0usize;
    let mut quote: Option<char> = None;
    for (i, ch) in text[open..].char_indices() {
        match quote {
            Some(q) if ch == q => quote = None,
            Some(_) => {}
            None => match ch {
                '\'' | '"' | '`' => quote = Some(ch),
                '(' => depth += 1,
                ')' => {
                    depth -= 1;
                    if depth == 0 {
                        return Some(open + i);
                    }
                }
                _ => {}
            },
        }
    }
    None
}

/// Split a column definition into its (possibly quoted) name and the rest.
fn split_name(def: &str) -> (&str, &str) {
    let def = def.trim();
    let close = match def.chars().next() {
        Some('"') => Some('"'),
        Some('`') => Some('`'),
        Some('[') => Some(']'),
        _ => None,
    };
    let end = match close {
        Some(c) => def[1..].find(c).map(|p| p + 2).unwrap_or(def.len()),
        None => def.find(char::is_whitespace).unwrap_or(def.len()),
    };
    (&def[..end], def[end..].trim())
}

fn unquote(name: &str) -> &str {
    name.trim_matches(|c| c == '"' || c == '`' || c == '[' || c == ']')
}

fn first_word(text: &str) -> String {
    text.trim()
        .split(|c: char| !c.is_ascii_alphanumeric() && c != '_')
        .next()
        .unwrap_or("")
        .to_uppercase()
}

/// Split the remainder of a column definition into type text and constraints.
fn split_type(rest: &str) -> (&str, &str) {
    let bytes = rest.as_bytes();
    let mut pos = 0;
    let mut end = 0;
    loop {
        while pos < bytes.len() && bytes[pos].is_ascii_whitespace() {
            pos += 1;
        }
        if pos >= bytes.len() {
            break;
        }
        if bytes[pos] == b'(' {
            if end == 0 {
                break;
            }
            end = matching_paren(rest, pos).map(|p| p + 1).unwrap_or(rest.len());
            break;
        }
        let start = pos;
        while pos < bytes.len() && (bytes[pos].is_ascii_alphanumeric() || bytes[pos] == b'_') {
            pos += 1;
        }
        let word = &rest[start..pos];
        if word.is_empty() || COLUMN_CONSTRAINT_WORDS.contains(&word.to_uppercase().as_str()) {
            break;
        }
        end = pos;
    }
    (rest[..end].trim(), rest[end..].trim())
}

/// Translate one column definition; `table` is used for warning context.
fn translate_column(table: &str, def: &str) -> (String, Option<String>) {
    let (name, rest) = split_name(def);
    let (declared, constraints) = split_type(rest);

    if declared.eq_ignore_ascii_case("INTEGER") && PRIMARY_KEY_RE.is_match(constraints) {
        let constraints = AUTOINCREMENT_RE.replace_all(constraints, "");
        return (join_column(name, "SERIAL", constraints.trim()), None);
    }

    let TypeMapping {
        target_type,
        warning,
        ..
    } = typemap::sqlite_to_postgres(declared);

    let mut constraints = constraints.to_string();
    if typemap::is_boolean(&target_type) {
        constraints = BOOL_DEFAULT_RE
            .replace_all(&constraints, |caps: &Captures| {
                let bit = caps.get(1).or_else(|| caps.get(2)).map(|m| m.as_str());
                if bit == Some("1") {
                    "DEFAULT TRUE"
                } else {
                    "DEFAULT FALSE"
                }
            })
            .into_owned();
    }
    constraints = DATETIME_NOW_RE
        .replace_all(&constraints, "DEFAULT CURRENT_TIMESTAMP")
        .into_owned();

    let warning = warning.map(|w| format!("{}.{}: {}", table, unquote(name), w));
    (join_column(name, &target_type, &constraints), warning)
}

fn join_column(name: &str, target_type: &str, constraints: &str) -> String {
    if constraints.is_empty() {
        format!("{} {}", name, target_type)
    } else {
        format!("{} {} {}", name, target_type, constraints)
    }
}

/// Translate a SQLite `CREATE TABLE` statement to PostgreSQL.
///
/// Column definitions are rewritten one by one; table-level constraints,
/// foreign-key clauses and CHECK expressions are kept verbatim. The result
/// has no trailing semicolon.
pub fn translate_ddl(source_ddl: &str) -> Result<Translation> {
    let ddl = source_ddl.trim().trim_end_matches(';').trim_end();
    if !CREATE_TABLE_RE.is_match(ddl) {
        return Err(MigrateError::Translation(format!(
            "not a CREATE TABLE statement: {}",
            ddl.chars().take(60).collect::<String>()
        )));
    }

    let open = ddl
        .find('(')
        .ok_or_else(|| MigrateError::Translation("CREATE TABLE without column list".into()))?;
    let close = matching_paren(ddl, open)
        .ok_or_else(|| MigrateError::Translation("unbalanced parentheses in CREATE TABLE".into()))?;

    let header = ddl[..open].split_whitespace().collect::<Vec<_>>().join(" ");
    let table = unquote(header.rsplit(' ').next().unwrap_or("")).to_string();

    let mut warnings = Vec::new();
    let trailing = ddl[close + 1..].trim();
    if !trailing.is_empty() {
        warnings.push(format!("{}: table options '{}' dropped", table, trailing));
    }

    let mut items = Vec::new();
    for item in split_top_level(&ddl[open + 1..close]) {
        if TABLE_CONSTRAINT_WORDS.contains(&first_word(&item).as_str()) {
            items.push(item);
            continue;
        }
        let (column, warning) = translate_column(&table, &item);
        warnings.extend(warning);
        items.push(column);
    }

    let sql = format!("{} (\n    {}\n)", header, items.join(",\n    "));
    Ok(Translation { sql, warnings })
}

/// Translate any single DDL statement written in the SQLite dialect.
///
/// `CREATE TABLE` and `ALTER TABLE … ADD COLUMN` are rewritten; every other
/// statement is returned unchanged.
pub fn translate_statement(sql: &str) -> Result<Translation> {
    let trimmed = sql.trim().trim_end_matches(';').trim_end();

    if CREATE_TABLE_RE.is_match(trimmed) {
        return translate_ddl(trimmed);
    }

    if let Some(caps) = ADD_COLUMN_RE.captures(trimmed) {
        let def = &caps[3];
        if !TABLE_CONSTRAINT_WORDS.contains(&first_word(def).as_str()) {
            let (column, warning) = translate_column(unquote(&caps[2]), def);
            return Ok(Translation {
                sql: format!("{}{}", &caps[1], column),
                warnings: warning.into_iter().collect(),
            });
        }
    }

    Ok(Translation {
        sql: trimmed.to_string(),
        warnings: Vec::new(),
    })
}

/// Rewrite a SQLite `CREATE TABLE` under `new_name` with `column` relaxed
/// to accept NULL. Every other definition is kept verbatim.
pub fn relax_not_null(source_ddl: &str, column: &str, new_name: &str) -> Result<String> {
    let ddl = source_ddl.trim().trim_end_matches(';').trim_end();
    let open = ddl
        .find('(')
        .ok_or_else(|| MigrateError::Translation("CREATE TABLE without column list".into()))?;
    let close = matching_paren(ddl, open)
        .ok_or_else(|| MigrateError::Translation("unbalanced parentheses in CREATE TABLE".into()))?;

    let mut found = false;
    let items: Vec<String> = split_top_level(&ddl[open + 1..close])
        .into_iter()
        .map(|item| {
            let is_target = !TABLE_CONSTRAINT_WORDS.contains(&first_word(&item).as_str())
                && unquote(split_name(&item).0).eq_ignore_ascii_case(column);
            if is_target {
                found = true;
                NOT_NULL_RE.replace_all(&item, "").into_owned()
            } else {
                item
            }
        })
        .collect();

    if !found {
        return Err(MigrateError::Translation(format!(
            "column {} not found in table definition",
            column
        )));
    }

    let trailing = ddl[close + 1..].trim();
    let mut sql = format!(
        "CREATE TABLE {} (\n    {}\n)",
        quote_ident(new_name)?,
        items.join(",\n    ")
    );
    if !trailing.is_empty() {
        sql.push(' ');
        sql.push_str(trailing);
    }
    Ok(sql)
}

/// `idx_{table}_{column}`, cut to the length PostgreSQL keeps.
fn fk_index_name(table: &str, column: &str) -> String {
    let mut name = format!("idx_{}_{}", table, column);
    while name.len() > 63 {
        name.pop();
    }
    name
}

/// Reviewable PostgreSQL schema file for a set of source tables.
#[derive(Debug, Clone)]
pub struct SchemaArtifact {
    pub generated_at: NaiveDateTime,
    pub source_name: String,
    /// `(table, translation)` in load-plan order.
    pub tables: Vec<(String, Translation)>,
    /// `(table, column)` pairs that carry a foreign key.
    pub fk_columns: Vec<(String, String)>,
    quoted_tables: Vec<String>,
    index_statements: Vec<String>,
}

impl SchemaArtifact {
    /// Translate `tables`, which must already be in load-plan order.
    pub fn build(
        tables: &[TableSchema],
        source_name: &str,
        generated_at: NaiveDateTime,
    ) -> Result<Self> {
        let mut translated = Vec::with_capacity(tables.len());
        let mut quoted_tables = Vec::with_capacity(tables.len());
        let mut fk_columns = Vec::new();
        let mut index_statements = Vec::new();
        for table in tables {
            translated.push((table.name.clone(), translate_ddl(&table.ddl)?));
            quoted_tables.push(quote_ident(&table.name)?);
            for fk in &table.foreign_keys {
                index_statements.push(format!(
                    "CREATE INDEX IF NOT EXISTS {} ON {} ({});",
                    quote_ident(&fk_index_name(&table.name, &fk.column))?,
                    quote_ident(&table.name)?,
                    quote_ident(&fk.column)?
                ));
                fk_columns.push((table.name.clone(), fk.column.clone()));
            }
        }
        Ok(Self {
            generated_at,
            source_name: source_name.to_string(),
            tables: translated,
            fk_columns,
            quoted_tables,
            index_statements,
        })
    }

    /// Every warning, in table order.
    pub fn warnings(&self) -> Vec<String> {
        self.tables
            .iter()
            .flat_map(|(_, t)| t.warnings.iter().cloned())
            .collect()
    }

    /// Render the artifact as SQL text.
    pub fn render(&self) -> String {
        let mut out = String::new();
        out.push_str("-- PostgreSQL schema translated from SQLite\n");
        out.push_str(&format!("-- Source: {}\n", self.source_name));
        out.push_str(&format!(
            "-- Generated at: {}\n",
            self.generated_at.format("%Y-%m-%d %H:%M:%S")
        ));
        let warnings = self.warnings();
        if warnings.is_empty() {
            out.push_str("-- Translation warnings: none\n");
        } else {
            out.push_str("-- Translation warnings:\n");
            for w in &warnings {
                out.push_str(&format!("--   {}\n", w));
            }
        }
        out.push_str("--\n-- Review before applying. Uncomment the DROP statements to rebuild.\n\n");

        for table in self.quoted_tables.iter().rev() {
            out.push_str(&format!("-- DROP TABLE IF EXISTS {} CASCADE;\n", table));
        }
        out.push('\n');

        for (_, translation) in &self.tables {
            out.push_str(&translation.sql);
            out.push_str(";\n\n");
        }

        if !self.index_statements.is_empty() {
            out.push_str("-- Recommended indexes on foreign-key columns:\n");
            for statement in &self.index_statements {
                out.push_str(&format!("-- {}\n", statement));
            }
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{ColumnSchema, ForeignKeyRef};

    const POUR_DDL: &str = "CREATE TABLE pour_activities (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        project_id INTEGER NOT NULL REFERENCES projects(id),
        pour_date DATETIME NOT NULL,
        is_deleted BOOLEAN DEFAULT 0,
        notes BLOB,
        total NUMERIC(10,2),
        created_at DATETIME DEFAULT (datetime('now')),
        CHECK (total >= 0),
        FOREIGN KEY (project_id) REFERENCES projects(id)
    );";

    #[test]
    fn test_translate_create_table() {
        let t = translate_ddl(POUR_DDL).unwrap();
        assert!(t.warnings.is_empty(), "{:?}", t.warnings);
        assert!(t.sql.starts_with("CREATE TABLE pour_activities (\n"));
        assert!(t.sql.contains("id SERIAL PRIMARY KEY,"));
        assert!(!t.sql.contains("AUTOINCREMENT"));
        assert!(t.sql.contains("project_id INTEGER NOT NULL REFERENCES projects(id)"));
        assert!(t.sql.contains("pour_date TIMESTAMP NOT NULL"));
        assert!(t.sql.contains("is_deleted BOOLEAN DEFAULT FALSE"));
        assert!(t.sql.contains("notes BYTEA"));
        assert!(t.sql.contains("total NUMERIC(10,2)"));
        assert!(t.sql.contains("created_at TIMESTAMP DEFAULT CURRENT_TIMESTAMP"));
        assert!(t.sql.contains("CHECK (total >= 0)"));
        assert!(t.sql.contains("FOREIGN KEY (project_id) REFERENCES projects(id)"));
        assert!(!t.sql.ends_with(';'));
    }

    #[test]
    fn test_word_boundaries() {
        // a column whose name contains a type keyword is not rewritten
        let t = translate_ddl("CREATE TABLE t (blob_name TEXT, datetime_text VARCHAR(20))").unwrap();
        assert!(t.sql.contains("blob_name TEXT"));
        assert!(t.sql.contains("datetime_text VARCHAR(20)"));
    }

    #[test]
    fn test_plain_integer_primary_key_becomes_serial() {
        let t = translate_ddl("create table companies (id integer primary key, name text)").unwrap();
        assert!(t.sql.contains("id SERIAL primary key"));
        assert!(t.sql.contains("name TEXT"));
    }

    #[test]
    fn test_unknown_type_warns() {
        let t = translate_ddl("CREATE TABLE users (id INTEGER PRIMARY KEY, avatar IMAGE, misc)").unwrap();
        assert!(t.sql.contains("avatar TEXT"));
        assert!(t.sql.contains("misc TEXT"));
        assert_eq!(t.warnings.len(), 2);
        assert!(t.warnings[0].starts_with("users.avatar:"));
    }

    #[test]
    fn test_boolean_default_one_and_string_defaults_untouched() {
        let t = translate_ddl(
            "CREATE TABLE x (a BOOLEAN DEFAULT 1, b INTEGER DEFAULT 10, c VARCHAR(20) DEFAULT 'Normal')",
        )
        .unwrap();
        assert!(t.sql.contains("a BOOLEAN DEFAULT TRUE"));
        assert!(t.sql.contains("b INTEGER DEFAULT 10"));
        assert!(t.sql.contains("c VARCHAR(20) DEFAULT 'Normal'"));
    }

    #[test]
    fn test_translate_add_column() {
        let t = translate_statement("ALTER TABLE users ADD COLUMN last_login DATETIME;").unwrap();
        assert_eq!(t.sql, "ALTER TABLE users ADD COLUMN last_login TIMESTAMP");

        let t = translate_statement("ALTER TABLE users ADD COLUMN is_system_admin BOOLEAN DEFAULT 0")
            .unwrap();
        assert_eq!(
            t.sql,
            "ALTER TABLE users ADD COLUMN is_system_admin BOOLEAN DEFAULT FALSE"
        );
    }

    #[test]
    fn test_other_statements_pass_through() {
        let sql = "CREATE INDEX IF NOT EXISTS idx_a ON a(b)";
        assert_eq!(translate_statement(sql).unwrap().sql, sql);
        assert!(translate_ddl(sql).is_err());
    }

    #[test]
    fn test_relax_not_null() {
        let ddl = "CREATE TABLE cube_test_registers (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            project_id INTEGER NOT NULL REFERENCES projects(id),
            batch_id INTEGER NOT NULL REFERENCES batch_registers(id),
            CHECK (batch_id IS NOT NULL OR project_id > 0)
        )";
        let sql = relax_not_null(ddl, "batch_id", "cube_test_registers_new").unwrap();
        assert!(sql.starts_with("CREATE TABLE \"cube_test_registers_new\" ("));
        assert!(sql.contains("batch_id INTEGER REFERENCES batch_registers(id)"));
        assert!(sql.contains("project_id INTEGER NOT NULL REFERENCES projects(id)"));
        assert!(sql.contains("CHECK (batch_id IS NOT NULL OR project_id > 0)"));
        assert!(relax_not_null(ddl, "missing", "x").is_err());
    }

    #[test]
    fn test_schema_artifact_layout() {
        let table = TableSchema {
            name: "projects".into(),
            ddl: "CREATE TABLE projects (id INTEGER PRIMARY KEY, company_id INTEGER REFERENCES companies(id), logo PICTURE)".into(),
            columns: vec![ColumnSchema {
                name: "id".into(),
                declared_type: "INTEGER".into(),
                nullable: false,
                default: None,
                is_primary_key: true,
                is_identity: true,
            }],
            primary_key: vec!["id".into()],
            foreign_keys: vec![ForeignKeyRef {
                column: "company_id".into(),
                ref_table: "companies".into(),
                ref_column: "id".into(),
            }],
        };
        let at = chrono::NaiveDate::from_ymd_opt(2024, 5, 1)
            .unwrap()
            .and_hms_opt(12, 0, 0)
            .unwrap();
        let artifact = SchemaArtifact::build(&[table], "data.sqlite3", at).unwrap();
        let sql = artifact.render();
        assert!(sql.contains("-- Generated at: 2024-05-01 12:00:00"));
        assert!(sql.contains("--   projects.logo: unrecognised type 'PICTURE' mapped to TEXT"));
        assert!(sql.contains("-- DROP TABLE IF EXISTS \"projects\" CASCADE;"));
        assert!(sql.contains("id SERIAL PRIMARY KEY"));
        assert!(sql.contains(
            "-- CREATE INDEX IF NOT EXISTS \"idx_projects_company_id\" ON \"projects\" (\"company_id\");"
        ));
    }
}
