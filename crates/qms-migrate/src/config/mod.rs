//! Configuration loading and validation.

mod types;
mod validation;

pub use types::*;
pub use validation::MAX_BATCH_SIZE;

use crate::error::{MigrateError, Result};
use std::path::Path;

/// Environment variable holding the PostgreSQL connection URL.
pub const DATABASE_URL_ENV: &str = "DATABASE_URL";

impl Config {
    /// Load configuration from a YAML file.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_yaml(&content)
    }

    /// Parse configuration from a YAML string.
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        let config: Config = if yaml.trim().is_empty() {
            Config::default()
        } else {
            serde_yaml::from_str(yaml)?
        };
        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<()> {
        validation::validate(self)
    }

    /// Pick up `DATABASE_URL` from the process environment unless already set.
    pub fn with_env(mut self) -> Self {
        if self.target.database_url.is_none() {
            self.target.database_url = std::env::var(DATABASE_URL_ENV)
                .ok()
                .filter(|v| !v.trim().is_empty());
        }
        self
    }
}

impl TargetConfig {
    /// The target URL, or an environment error naming the missing variable.
    pub fn require_url(&self) -> Result<&str> {
        self.database_url.as_deref().ok_or_else(|| {
            MigrateError::Environment(format!(
                "{} is not set; it is required to reach the target database",
                DATABASE_URL_ENV
            ))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_yaml_uses_defaults() {
        let config = Config::from_yaml("").unwrap();
        assert_eq!(config.source.database_path, Path::new("data.sqlite3"));
        assert_eq!(config.load.batch_size, 100);
        assert_eq!(config.target.ssl_mode, "require");
    }

    #[test]
    fn test_partial_yaml_overrides() {
        let yaml = r#"
source:
  database_path: /var/lib/qms/live.sqlite3
load:
  batch_size: 25
mail:
  portal_url: https://qms.example.org
"#;
        let config = Config::from_yaml(yaml).unwrap();
        assert_eq!(
            config.source.database_path,
            Path::new("/var/lib/qms/live.sqlite3")
        );
        assert_eq!(config.load.batch_size, 25);
        assert_eq!(config.mail.portal_url, "https://qms.example.org");
        assert_eq!(config.mail.templates_dir, Path::new("templates"));
    }

    #[test]
    fn test_invalid_yaml_rejected() {
        assert!(Config::from_yaml("load:\n  batch_size: 500\n").is_err());
        assert!(Config::from_yaml("source: [").is_err());
    }

    #[test]
    fn test_require_url_missing() {
        let target = TargetConfig::default();
        let err = target.require_url().unwrap_err();
        assert!(err.to_string().contains("DATABASE_URL"));
    }
}
