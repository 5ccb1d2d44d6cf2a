//! First-run administrator seed.
//!
//! Upgrades the designated user to system administrator, or creates it when
//! absent. Only columns present in the live `users` table are written, so
//! the seed works both before and after the account hardening migration.

use chrono::Utc;
use serde::Serialize;
use tracing::{info, warn};

use crate::config::AdminConfig;
use crate::core::SqlValue;
use crate::drivers::SchemaDriver;
use crate::error::{MigrateError, Result};

/// Produces the stored password hash. The key derivation itself lives in the
/// application server.
pub trait PasswordHasher: Send + Sync {
    fn hash_password(&self, plaintext: &str) -> Result<String>;
}

/// An already encoded hash, supplied by the operator.
#[derive(Debug, Clone)]
pub struct PrecomputedHash(String);

impl PrecomputedHash {
    pub fn new(hash: impl Into<String>) -> Result<Self> {
        let hash = hash.into();
        if hash.trim().is_empty() {
            return Err(MigrateError::Config(
                "password hash must not be empty".into(),
            ));
        }
        Ok(Self(hash))
    }
}

impl PasswordHasher for PrecomputedHash {
    fn hash_password(&self, _plaintext: &str) -> Result<String> {
        Ok(self.0.clone())
    }
}

/// Who to seed.
#[derive(Debug, Clone)]
pub struct AdminSeed {
    pub email: String,
    pub full_name: String,
    /// Company created when the database has none.
    pub company_name: String,
    /// Handed to the [`PasswordHasher`]; unused by [`PrecomputedHash`].
    pub password: String,
}

impl From<&AdminConfig> for AdminSeed {
    fn from(c: &AdminConfig) -> Self {
        Self {
            email: c.email.clone(),
            full_name: c.full_name.clone(),
            company_name: c.company_name.clone(),
            password: String::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum SeedOutcome {
    /// An existing user was promoted.
    Upgraded { user_id: i64 },
    /// A new administrator was inserted.
    Created { user_id: i64, company_id: Option<i64> },
}

/// Column assignments filtered to what `users` actually has.
struct Assignments {
    present: Vec<String>,
    pairs: Vec<(&'static str, SqlValue)>,
}

impl Assignments {
    fn new(present: Vec<String>) -> Self {
        Self {
            present,
            pairs: Vec::new(),
        }
    }

    fn set(&mut self, column: &'static str, value: impl Into<SqlValue>) {
        if self.present.iter().any(|c| c.eq_ignore_ascii_case(column)) {
            self.pairs.push((column, value.into()));
        }
    }

    fn into_parts(self) -> (Vec<&'static str>, Vec<SqlValue>) {
        self.pairs.into_iter().unzip()
    }
}

/// Promote or create the administrator described by `seed`.
pub async fn seed_admin(
    db: &mut dyn SchemaDriver,
    seed: &AdminSeed,
    hasher: &dyn PasswordHasher,
) -> Result<SeedOutcome> {
    if !db.has_table("users").await? {
        return Err(MigrateError::Environment(
            "table users does not exist; run migrate first".into(),
        ));
    }
    let email = seed.email.trim();
    if email.is_empty() || !email.contains('@') {
        return Err(MigrateError::Config(format!(
            "invalid administrator e-mail '{}'",
            seed.email
        )));
    }
    let hash = hasher.hash_password(&seed.password)?;

    db.begin().await?;
    match seed_in_transaction(db, seed, email, hash).await {
        Ok(outcome) => {
            db.commit().await?;
            Ok(outcome)
        }
        Err(e) => {
            if let Err(rb) = db.rollback().await {
                warn!("Rollback after failed seed also failed: {}", rb);
            }
            Err(e)
        }
    }
}

async fn seed_in_transaction(
    db: &mut dyn SchemaDriver,
    seed: &AdminSeed,
    email: &str,
    hash: String,
) -> Result<SeedOutcome> {
    let d = db.dialect();
    let present: Vec<String> = db
        .columns("users")
        .await?
        .into_iter()
        .map(|c| c.name)
        .collect();
    let now = SqlValue::Timestamp(Utc::now().naive_utc());

    let existing = db
        .query_scalar(
            &format!(
                "SELECT id FROM users WHERE LOWER(email) = LOWER({}) ORDER BY id",
                d.placeholder(1)
            ),
            &[email.into()],
        )
        .await?
        .and_then(|v| v.as_i64());

    let mut a = Assignments::new(present);
    a.set("password_hash", hash);
    a.set("is_system_admin", true);
    a.set("role", "admin");
    a.set("is_active", true);
    a.set("failed_login_attempts", 0i64);
    a.set("updated_at", now.clone());

    if let Some(user_id) = existing {
        let (columns, mut params) = a.into_parts();
        let sets: Vec<String> = columns
            .iter()
            .enumerate()
            .map(|(i, c)| format!("{} = {}", c, d.placeholder(i + 1)))
            .collect();
        let sql = format!(
            "UPDATE users SET {} WHERE id = {}",
            sets.join(", "),
            d.placeholder(columns.len() + 1)
        );
        params.push(SqlValue::Int(user_id));
        db.execute(&sql, &params).await?;
        info!("Promoted {} (user {}) to system administrator", email, user_id);
        return Ok(SeedOutcome::Upgraded { user_id });
    }

    let company_id = if a.present.iter().any(|c| c.eq_ignore_ascii_case("company_id")) {
        Some(first_company(db, &seed.company_name).await?)
    } else {
        None
    };
    a.set("email", email);
    a.set("full_name", seed.full_name.as_str());
    a.set("created_at", now);
    if let Some(id) = company_id {
        a.set("company_id", id);
    }

    let (columns, params) = a.into_parts();
    let placeholders: Vec<String> = (1..=columns.len()).map(|i| d.placeholder(i)).collect();
    let sql = format!(
        "INSERT INTO users ({}) VALUES ({}) RETURNING id",
        columns.join(", "),
        placeholders.join(", ")
    );
    let user_id = db
        .query_scalar(&sql, &params)
        .await?
        .and_then(|v| v.as_i64())
        .ok_or_else(|| MigrateError::Environment("insert into users returned no id".into()))?;
    info!("Created system administrator {} (user {})", email, user_id);
    Ok(SeedOutcome::Created {
        user_id,
        company_id,
    })
}

/// Lowest company id, creating a company when there is none.
async fn first_company(db: &mut dyn SchemaDriver, name: &str) -> Result<i64> {
    if let Some(id) = db
        .query_scalar("SELECT id FROM companies ORDER BY id LIMIT 1", &[])
        .await?
        .and_then(|v| v.as_i64())
    {
        return Ok(id);
    }
    let sql = format!(
        "INSERT INTO companies (name) VALUES ({}) RETURNING id",
        db.dialect().placeholder(1)
    );
    let id = db
        .query_scalar(&sql, &[name.into()])
        .await?
        .and_then(|v| v.as_i64())
        .ok_or_else(|| MigrateError::Environment("insert into companies returned no id".into()))?;
    info!("Created company '{}' (id {}) for the administrator", name, id);
    Ok(id)
}
