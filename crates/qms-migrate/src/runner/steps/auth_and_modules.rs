use async_trait::async_trait;
use tracing::info;

use super::{add_column, count_rows, create_index, create_table, missing_indexes, require_tables};
use crate::core::identifier::quote_literal;
use crate::drivers::SchemaDriver;
use crate::error::Result;
use crate::runner::{Applicability, Migration};

/// Module list every company is subscribed to unless told otherwise.
pub const CANONICAL_MODULES: &str = r#"["concrete_qms","material_qms","safety","training"]"#;

const TOKENS_DDL: &str = "CREATE TABLE IF NOT EXISTS password_reset_tokens (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    user_id INTEGER NOT NULL REFERENCES users(id),
    token_hash VARCHAR(64) UNIQUE NOT NULL,
    created_at DATETIME DEFAULT CURRENT_TIMESTAMP,
    expires_at DATETIME NOT NULL,
    used BOOLEAN DEFAULT 0
)";

const TOKEN_INDEXES: &[(&str, &str)] = &[
    ("password_reset_tokens", "user_id"),
    ("password_reset_tokens", "token_hash"),
    ("password_reset_tokens", "expires_at"),
];

/// Password reset tokens and per-company module subscriptions.
pub struct AuthAndModules;

#[async_trait]
impl Migration for AuthAndModules {
    fn id(&self) -> u32 {
        6
    }

    fn name(&self) -> &'static str {
        "auth_and_modules"
    }

    fn description(&self) -> &'static str {
        "create password_reset_tokens and add companies.subscribed_modules"
    }

    async fn check(&self, db: &mut dyn SchemaDriver) -> Result<Applicability> {
        if let Some(na) = require_tables(db, &["users", "companies"]).await? {
            return Ok(na);
        }
        if !db.has_table("password_reset_tokens").await?
            || !missing_indexes(db, TOKEN_INDEXES).await?.is_empty()
            || !db.has_column("companies", "subscribed_modules").await?
        {
            return Ok(Applicability::Pending);
        }
        let unset = count_rows(
            db,
            "SELECT COUNT(*) FROM companies WHERE subscribed_modules IS NULL",
        )
        .await?;
        if unset > 0 {
            Ok(Applicability::Pending)
        } else {
            Ok(Applicability::UpToDate)
        }
    }

    async fn apply(&self, db: &mut dyn SchemaDriver) -> Result<()> {
        let step = self.name();
        create_table(db, step, "password_reset_tokens", TOKENS_DDL).await?;
        for (table, column) in TOKEN_INDEXES {
            create_index(db, step, table, column).await?;
        }

        let default = format!("TEXT DEFAULT {}", quote_literal(CANONICAL_MODULES));
        add_column(db, step, "companies", "subscribed_modules", &default).await?;

        let sql = format!(
            "UPDATE companies SET subscribed_modules = {} WHERE subscribed_modules IS NULL",
            db.dialect().placeholder(1)
        );
        let updated = db.execute(&sql, &[CANONICAL_MODULES.into()]).await?;
        info!("[{}] subscribed {} company(ies) to the default modules", step, updated);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::SqlValue;
    use crate::runner::steps::baseline_db;
    use crate::runner::{MigrationRunner, StepOutcome};

    #[test]
    fn test_canonical_modules_is_json_array() {
        let modules: Vec<String> = serde_json::from_str(CANONICAL_MODULES).unwrap();
        assert_eq!(modules, ["concrete_qms", "material_qms", "safety", "training"]);
    }

    #[tokio::test]
    async fn test_creates_tokens_and_backfills_modules() {
        let mut db = baseline_db();
        let summary = MigrationRunner::with_migrations(vec![Box::new(AuthAndModules)])
            .run(&mut db)
            .await
            .unwrap();
        assert_eq!(summary.steps[0].outcome, StepOutcome::Applied);
        assert!(db
            .has_index("password_reset_tokens", "idx_password_reset_tokens_token_hash")
            .await
            .unwrap());

        let modules = db
            .query_scalar("SELECT subscribed_modules FROM companies WHERE id = 1", &[])
            .await
            .unwrap();
        assert_eq!(modules, Some(SqlValue::Text(CANONICAL_MODULES.into())));

        db.execute("INSERT INTO companies (name) VALUES ('Fresh Co')", &[])
            .await
            .unwrap();
        let fresh = db
            .query_scalar(
                "SELECT subscribed_modules FROM companies WHERE name = 'Fresh Co'",
                &[],
            )
            .await
            .unwrap();
        assert_eq!(fresh, Some(SqlValue::Text(CANONICAL_MODULES.into())));
    }

    #[tokio::test]
    async fn test_cleared_modules_make_it_pending() {
        let mut db = baseline_db();
        let runner = MigrationRunner::with_migrations(vec![Box::new(AuthAndModules)]);
        runner.run(&mut db).await.unwrap();
        db.execute("UPDATE companies SET subscribed_modules = NULL", &[])
            .await
            .unwrap();
        assert_eq!(
            AuthAndModules.check(&mut db).await.unwrap(),
            Applicability::Pending
        );
    }
}
