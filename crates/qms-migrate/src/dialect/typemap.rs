//! Declared-type mapping from SQLite to PostgreSQL.
//!
//! SQLite accepts any text as a column type; only the fixed catalog below
//! is recognised. Anything else falls back to `TEXT` with a warning so the
//! operator can review it in the schema artifact.

/// Result of mapping one declared type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TypeMapping {
    /// Target type text.
    pub target_type: String,
    /// Whether the mapping loses type information.
    pub is_lossy: bool,
    /// Warning message for lossy mappings.
    pub warning: Option<String>,
}

impl TypeMapping {
    /// Create a lossless type mapping.
    pub fn lossless(target_type: impl Into<String>) -> Self {
        Self {
            target_type: target_type.into(),
            is_lossy: false,
            warning: None,
        }
    }

    /// Create a lossy type mapping with a warning.
    pub fn lossy(target_type: impl Into<String>, warning: impl Into<String>) -> Self {
        Self {
            target_type: target_type.into(),
            is_lossy: true,
            warning: Some(warning.into()),
        }
    }
}

/// Types passed through unchanged, with or without a length/precision.
const VERBATIM: &[&str] = &[
    "VARCHAR", "CHAR", "NUMERIC", "REAL", "BOOLEAN", "DATE", "TIME", "TEXT", "INTEGER",
    "BIGINT", "SMALLINT", "TIMESTAMP",
];

/// Split `VARCHAR (255)` into (`VARCHAR`, `(255)`).
fn split_type(declared: &str) -> (String, &str) {
    match declared.find('(') {
        Some(pos) => (
            declared[..pos].split_whitespace().collect::<Vec<_>>().join(" "),
            declared[pos..].trim(),
        ),
        None => (declared.split_whitespace().collect::<Vec<_>>().join(" "), ""),
    }
}

/// Map a SQLite declared type to its PostgreSQL equivalent.
///
/// Identity columns (`INTEGER PRIMARY KEY`) are handled at the column
/// definition level by the DDL translator, not here.
pub fn sqlite_to_postgres(declared: &str) -> TypeMapping {
    let declared = declared.trim();
    if declared.is_empty() {
        return TypeMapping::lossy("TEXT", "column has no declared type, mapped to TEXT");
    }

    let (base, args) = split_type(declared);
    let upper = base.to_uppercase();

    match upper.as_str() {
        "DATETIME" if args.is_empty() => TypeMapping::lossless("TIMESTAMP"),
        "BLOB" if args.is_empty() => TypeMapping::lossless("BYTEA"),
        t if VERBATIM.contains(&t) => TypeMapping::lossless(format!("{}{}", upper, args)),
        _ => TypeMapping::lossy(
            "TEXT",
            format!("unrecognised type '{}' mapped to TEXT", declared),
        ),
    }
}

/// Whether `declared` is one of the date/time types stored as ISO text.
pub fn is_temporal(declared: &str) -> bool {
    let (base, _) = split_type(declared);
    matches!(
        base.to_uppercase().as_str(),
        "DATETIME" | "TIMESTAMP" | "DATE" | "TIME"
    )
}

/// Whether `declared` is a boolean flag column.
pub fn is_boolean(declared: &str) -> bool {
    split_type(declared).0.eq_ignore_ascii_case("BOOLEAN")
}

/// Whether `declared` is an opaque byte column.
pub fn is_binary(declared: &str) -> bool {
    split_type(declared).0.eq_ignore_ascii_case("BLOB")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fixed_catalog() {
        assert_eq!(sqlite_to_postgres("DATETIME").target_type, "TIMESTAMP");
        assert_eq!(sqlite_to_postgres("blob").target_type, "BYTEA");
        assert_eq!(sqlite_to_postgres("VARCHAR(255)").target_type, "VARCHAR(255)");
        assert_eq!(sqlite_to_postgres("numeric(10, 2)").target_type, "NUMERIC(10, 2)");
        assert_eq!(sqlite_to_postgres("CHAR(7)").target_type, "CHAR(7)");
        for t in ["REAL", "BOOLEAN", "DATE", "TIME", "TEXT", "INTEGER"] {
            let mapping = sqlite_to_postgres(t);
            assert_eq!(mapping.target_type, t);
            assert!(!mapping.is_lossy);
        }
    }

    #[test]
    fn test_unknown_type_falls_back_to_text() {
        let mapping = sqlite_to_postgres("GEOMETRY");
        assert_eq!(mapping.target_type, "TEXT");
        assert!(mapping.is_lossy);
        assert!(mapping.warning.unwrap().contains("GEOMETRY"));

        let mapping = sqlite_to_postgres("");
        assert_eq!(mapping.target_type, "TEXT");
        assert!(mapping.is_lossy);
    }

    #[test]
    fn test_type_predicates() {
        assert!(is_temporal("datetime"));
        assert!(is_temporal("DATE"));
        assert!(!is_temporal("TEXT"));
        assert!(is_boolean("Boolean"));
        assert!(is_binary("BLOB"));
        assert!(!is_binary("VARCHAR(10)"));
    }
}
