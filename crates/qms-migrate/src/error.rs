//! Error types for the migration library.

use thiserror::Error;
use tokio_postgres::error::SqlState;

/// Main error type for migration operations.
#[derive(Error, Debug)]
pub enum MigrateError {
    /// Configuration error (invalid YAML, out-of-range values, etc.)
    #[error("Configuration error: {0}")]
    Config(String),

    /// Missing database file, environment variable or directory.
    #[error("Environment error: {0}")]
    Environment(String),

    /// Embedded (SQLite) database error
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    /// Target (PostgreSQL) database error
    #[error("PostgreSQL error: {0}")]
    Target(#[from] tokio_postgres::Error),

    /// The intermediate export directory is incomplete or inconsistent
    #[error("Intermediate dataset error: {0}")]
    Intermediate(String),

    /// DDL could not be translated between dialects
    #[error("Schema translation error: {0}")]
    Translation(String),

    /// A migration step failed
    #[error("Migration {step} failed: {message}")]
    Migration { step: String, message: String },

    /// A foreign-key violation surfaced during load
    #[error("Referential integrity violation: {0}")]
    Referential(String),

    /// Loading a specific table failed
    #[error("Load failed for table {table}: {message}")]
    Load { table: String, message: String },

    /// Mail template could not be loaded
    #[error("Template error: {0}")]
    Template(String),

    /// IO error (file operations)
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// YAML serialization/deserialization error
    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// JSON serialization/deserialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl MigrateError {
    /// Create a Migration error for the named step
    pub fn migration(step: impl Into<String>, message: impl Into<String>) -> Self {
        MigrateError::Migration {
            step: step.into(),
            message: message.into(),
        }
    }

    /// Create a Load error
    pub fn load(table: impl Into<String>, message: impl Into<String>) -> Self {
        MigrateError::Load {
            table: table.into(),
            message: message.into(),
        }
    }

    /// Whether the error reports an object that already exists.
    ///
    /// Raised when a predicate raced or was under-specified; the runner
    /// downgrades these to warnings.
    pub fn is_duplicate_object(&self) -> bool {
        match self {
            MigrateError::Sqlite(e) => {
                let msg = e.to_string().to_lowercase();
                msg.contains("duplicate column name") || msg.contains("already exists")
            }
            MigrateError::Target(e) => matches!(
                e.code(),
                Some(c) if *c == SqlState::DUPLICATE_COLUMN
                    || *c == SqlState::DUPLICATE_TABLE
                    || *c == SqlState::DUPLICATE_OBJECT
            ),
            _ => false,
        }
    }

    /// Single-line cause suitable for the last line of CLI output.
    pub fn one_line(&self) -> String {
        self.to_string().lines().next().unwrap_or_default().to_string()
    }

    /// Format error with full details including error chain
    pub fn format_detailed(&self) -> String {
        let mut output = format!("Error: {}\n", self);

        let mut source = std::error::Error::source(self);
        let mut depth = 1;
        while let Some(err) = source {
            output.push_str(&format!("\nCaused by:\n  {}: {}", depth, err));
            source = err.source();
            depth += 1;
        }

        output
    }
}

/// Result type alias for migration operations.
pub type Result<T> = std::result::Result<T, MigrateError>;
