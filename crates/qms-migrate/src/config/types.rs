//! Configuration type definitions.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Root configuration structure.
///
/// Every section has defaults, so an empty YAML document (or no file at all)
/// is a valid configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Embedded source database.
    #[serde(default)]
    pub source: SourceConfig,

    /// Hosted PostgreSQL target.
    #[serde(default)]
    pub target: TargetConfig,

    /// Export (intermediate dataset and artifacts) settings.
    #[serde(default)]
    pub export: ExportConfig,

    /// Direct loader settings.
    #[serde(default)]
    pub load: LoadConfig,

    /// Mail template settings.
    #[serde(default)]
    pub mail: MailConfig,

    /// First-run administrator seed.
    #[serde(default)]
    pub admin: AdminConfig,
}

/// Source database (SQLite) configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceConfig {
    /// Path to the database file (default: data.sqlite3).
    #[serde(default = "default_database_path")]
    pub database_path: PathBuf,
}

impl Default for SourceConfig {
    fn default() -> Self {
        Self {
            database_path: default_database_path(),
        }
    }
}

/// Target database (PostgreSQL) configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TargetConfig {
    /// Connection URL. Normally supplied through `DATABASE_URL`.
    #[serde(default, skip_serializing)]
    pub database_url: Option<String>,

    /// SSL mode: disable, require, verify-ca, verify-full (default: require).
    #[serde(default = "default_require")]
    pub ssl_mode: String,
}

impl Default for TargetConfig {
    fn default() -> Self {
        Self {
            database_url: None,
            ssl_mode: default_require(),
        }
    }
}

/// Export configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExportConfig {
    /// Intermediate dataset directory (default: migration_export).
    #[serde(default = "default_export_dir")]
    pub output_dir: PathBuf,

    /// Schema artifact path (default: schema_postgres.sql).
    #[serde(default = "default_schema_file")]
    pub schema_file: PathBuf,

    /// Data artifact path (default: data_import.sql).
    #[serde(default = "default_data_file")]
    pub data_file: PathBuf,
}

impl Default for ExportConfig {
    fn default() -> Self {
        Self {
            output_dir: default_export_dir(),
            schema_file: default_schema_file(),
            data_file: default_data_file(),
        }
    }
}

/// Direct loader configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoadConfig {
    /// Rows per INSERT batch (1..=100, default: 100).
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
}

impl Default for LoadConfig {
    fn default() -> Self {
        Self {
            batch_size: default_batch_size(),
        }
    }
}

/// Mail template configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MailConfig {
    /// Directory holding `{name}.html` templates (default: templates).
    #[serde(default = "default_templates_dir")]
    pub templates_dir: PathBuf,

    /// Injected as `{{portal_url}}` when the caller does not supply one.
    #[serde(default = "default_portal_url")]
    pub portal_url: String,

    /// Injected as `{{dashboard_url}}` when the caller does not supply one.
    #[serde(default = "default_dashboard_url")]
    pub dashboard_url: String,
}

impl Default for MailConfig {
    fn default() -> Self {
        Self {
            templates_dir: default_templates_dir(),
            portal_url: default_portal_url(),
            dashboard_url: default_dashboard_url(),
        }
    }
}

/// Administrator seed configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AdminConfig {
    /// Designated administrator e-mail.
    #[serde(default = "default_admin_email")]
    pub email: String,

    /// Display name for a freshly created administrator.
    #[serde(default = "default_admin_name")]
    pub full_name: String,

    /// Company created when the database has none.
    #[serde(default = "default_company_name")]
    pub company_name: String,
}

impl Default for AdminConfig {
    fn default() -> Self {
        Self {
            email: default_admin_email(),
            full_name: default_admin_name(),
            company_name: default_company_name(),
        }
    }
}

fn default_database_path() -> PathBuf {
    PathBuf::from("data.sqlite3")
}

fn default_require() -> String {
    "require".to_string()
}

fn default_export_dir() -> PathBuf {
    PathBuf::from("migration_export")
}

fn default_schema_file() -> PathBuf {
    PathBuf::from("schema_postgres.sql")
}

fn default_data_file() -> PathBuf {
    PathBuf::from("data_import.sql")
}

fn default_batch_size() -> usize {
    100
}

fn default_templates_dir() -> PathBuf {
    PathBuf::from("templates")
}

fn default_portal_url() -> String {
    "https://portal.example.com".to_string()
}

fn default_dashboard_url() -> String {
    "https://portal.example.com/dashboard".to_string()
}

fn default_admin_email() -> String {
    "admin@example.com".to_string()
}

fn default_admin_name() -> String {
    "System Administrator".to_string()
}

fn default_company_name() -> String {
    "Default Company".to_string()
}
