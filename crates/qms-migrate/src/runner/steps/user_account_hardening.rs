use async_trait::async_trait;
use tracing::info;

use super::{add_column, count_rows, missing_columns, require_tables};
use crate::drivers::SchemaDriver;
use crate::error::Result;
use crate::runner::{Applicability, Migration};

const COLUMNS: &[(&str, &str)] = &[
    ("phone", "VARCHAR(20)"),
    ("is_system_admin", "BOOLEAN DEFAULT 0"),
    ("failed_login_attempts", "INTEGER DEFAULT 0"),
    ("last_login", "DATETIME"),
    ("updated_at", "DATETIME"),
    ("created_at", "DATETIME"),
];

pub(crate) const UNNAMED_USER: &str = "Unnamed User";

/// Account lockout and admin columns on `users`, plus placeholder backfill.
pub struct UserAccountHardening;

impl UserAccountHardening {
    async fn rows_needing_backfill(&self, db: &mut dyn SchemaDriver) -> Result<i64> {
        let mut total = count_rows(db, "SELECT COUNT(*) FROM users WHERE phone IS NULL").await?;
        if db.has_column("users", "full_name").await? {
            total += count_rows(db, "SELECT COUNT(*) FROM users WHERE full_name IS NULL").await?;
        }
        Ok(total)
    }
}

#[async_trait]
impl Migration for UserAccountHardening {
    fn id(&self) -> u32 {
        3
    }

    fn name(&self) -> &'static str {
        "user_account_hardening"
    }

    fn description(&self) -> &'static str {
        "add account hardening columns to users and backfill placeholders"
    }

    async fn check(&self, db: &mut dyn SchemaDriver) -> Result<Applicability> {
        if let Some(na) = require_tables(db, &["users"]).await? {
            return Ok(na);
        }
        let names: Vec<&str> = COLUMNS.iter().map(|(c, _)| *c).collect();
        if !missing_columns(db, "users", &names).await?.is_empty() {
            return Ok(Applicability::Pending);
        }
        if self.rows_needing_backfill(db).await? > 0 {
            Ok(Applicability::Pending)
        } else {
            Ok(Applicability::UpToDate)
        }
    }

    async fn apply(&self, db: &mut dyn SchemaDriver) -> Result<()> {
        for (column, definition) in COLUMNS {
            add_column(db, self.name(), "users", column, definition).await?;
        }

        let phones = db
            .execute(
                "UPDATE users SET phone = '+00-' || CAST(id AS TEXT) WHERE phone IS NULL",
                &[],
            )
            .await?;
        let names = if db.has_column("users", "full_name").await? {
            let sql = format!(
                "UPDATE users SET full_name = {} WHERE full_name IS NULL",
                db.dialect().placeholder(1)
            );
            db.execute(&sql, &[UNNAMED_USER.into()]).await?
        } else {
            0
        };
        info!(
            "[{}] backfilled {} phone number(s) and {} name(s)",
            self.name(),
            phones,
            names
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::SqlValue;
    use crate::runner::steps::baseline_db;
    use crate::runner::{MigrationRunner, StepOutcome};

    #[tokio::test]
    async fn test_backfills_placeholders() {
        let mut db = baseline_db();
        let summary = MigrationRunner::with_migrations(vec![Box::new(UserAccountHardening)])
            .run(&mut db)
            .await
            .unwrap();
        assert_eq!(summary.steps[0].outcome, StepOutcome::Applied);

        let rows = db
            .query("SELECT phone, full_name FROM users ORDER BY id", &[])
            .await
            .unwrap();
        assert_eq!(rows[0][0], SqlValue::Text("+00-1".into()));
        assert_eq!(rows[0][1], SqlValue::Text(UNNAMED_USER.into()));
        assert_eq!(rows[1][1], SqlValue::Text("Quality Lead".into()));
    }

    #[tokio::test]
    async fn test_new_null_rows_make_it_pending_again() {
        let mut db = baseline_db();
        let runner = MigrationRunner::with_migrations(vec![Box::new(UserAccountHardening)]);
        runner.run(&mut db).await.unwrap();
        db.execute(
            "INSERT INTO users (email, password_hash) VALUES ('new@acme.test', 'x')",
            &[],
        )
        .await
        .unwrap();
        assert_eq!(
            UserAccountHardening.check(&mut db).await.unwrap(),
            Applicability::Pending
        );
        let summary = runner.run(&mut db).await.unwrap();
        assert_eq!(summary.steps[0].outcome, StepOutcome::Applied);
    }
}
