//! Configuration validation.

use super::Config;
use crate::drivers::tls::SslMode;
use crate::error::{MigrateError, Result};

/// Largest batch the direct loader will send in one statement.
pub const MAX_BATCH_SIZE: usize = 100;

/// Validate the configuration.
pub fn validate(config: &Config) -> Result<()> {
    if config.source.database_path.as_os_str().is_empty() {
        return Err(MigrateError::Config(
            "source.database_path is required".into(),
        ));
    }

    SslMode::parse(&config.target.ssl_mode)?;

    if config.load.batch_size == 0 || config.load.batch_size > MAX_BATCH_SIZE {
        return Err(MigrateError::Config(format!(
            "load.batch_size must be between 1 and {}, got {}",
            MAX_BATCH_SIZE, config.load.batch_size
        )));
    }

    if config.export.output_dir.as_os_str().is_empty() {
        return Err(MigrateError::Config("export.output_dir is required".into()));
    }

    if !config.admin.email.contains('@') {
        return Err(MigrateError::Config(format!(
            "admin.email is not an e-mail address: '{}'",
            config.admin.email
        )));
    }

    Ok(())
}
