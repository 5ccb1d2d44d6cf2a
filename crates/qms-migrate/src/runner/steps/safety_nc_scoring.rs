use async_trait::async_trait;
use chrono::{Datelike, NaiveDateTime};
use tracing::info;

use super::{add_column, count_rows, create_table, missing_columns, require_tables};
use crate::core::SqlValue;
use crate::drivers::SchemaDriver;
use crate::error::Result;
use crate::runner::{Applicability, Migration};

const TABLE: &str = "safety_non_conformances";

const COLUMNS: &[(&str, &str)] = &[
    ("severity_score", "REAL DEFAULT 0.0"),
    ("score_month", "CHAR(7)"),
    ("score_year", "INTEGER"),
    ("score_week", "CHAR(10)"),
    ("actual_resolution_days", "INTEGER"),
];

const REPORTS_DDL: &str = "CREATE TABLE IF NOT EXISTS safety_nc_score_reports (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    project_id INTEGER NOT NULL REFERENCES projects(id),
    period_type VARCHAR(10) NOT NULL,
    period_label VARCHAR(10) NOT NULL,
    total_ncs INTEGER DEFAULT 0,
    open_ncs INTEGER DEFAULT 0,
    closed_ncs INTEGER DEFAULT 0,
    total_score REAL DEFAULT 0.0,
    avg_resolution_days REAL,
    generated_at DATETIME DEFAULT CURRENT_TIMESTAMP,
    UNIQUE (project_id, period_type, period_label)
)";

/// Weight of a non-conformance by severity label. Unknown labels weigh as minor.
pub fn severity_score(severity: Option<&str>) -> f64 {
    match severity.map(|s| s.trim().to_lowercase()).as_deref() {
        Some("critical") => 1.5,
        Some("major") => 1.0,
        _ => 0.5,
    }
}

/// Derived scoring fields for one non-conformance.
#[derive(Debug, Clone, PartialEq)]
pub struct NcScores {
    pub severity_score: f64,
    /// `YYYY-MM`
    pub score_month: String,
    pub score_year: i32,
    /// ISO-8601 week, `YYYY-Www`
    pub score_week: String,
    pub actual_resolution_days: Option<i64>,
}

impl NcScores {
    pub fn compute(
        severity: Option<&str>,
        raised_at: NaiveDateTime,
        closed_at: Option<NaiveDateTime>,
    ) -> Self {
        Self {
            severity_score: severity_score(severity),
            score_month: raised_at.format("%Y-%m").to_string(),
            score_year: raised_at.year(),
            score_week: raised_at.format("%G-W%V").to_string(),
            actual_resolution_days: closed_at
                .map(|closed| (closed - raised_at).num_seconds().div_euclid(86_400)),
        }
    }
}

/// A row whose scoring fields are missing and can be derived.
struct Backfill {
    id: SqlValue,
    scores: NcScores,
}

/// Severity scoring and period bucketing for safety non-conformances.
pub struct SafetyNcScoring;

impl SafetyNcScoring {
    /// SQL expression for the expected `severity_score` of a row.
    async fn severity_expr(&self, db: &mut dyn SchemaDriver) -> Result<&'static str> {
        if db.has_column(TABLE, "severity").await? {
            Ok("CASE LOWER(TRIM(severity)) WHEN 'critical' THEN 1.5 WHEN 'major' THEN 1.0 ELSE 0.5 END")
        } else {
            Ok("0.5")
        }
    }

    /// Rows whose `severity_score` disagrees with their severity label.
    async fn misscored_rows(&self, db: &mut dyn SchemaDriver) -> Result<i64> {
        let expected = self.severity_expr(db).await?;
        let sql = format!(
            "SELECT COUNT(*) FROM {} WHERE severity_score IS NULL OR severity_score <> {}",
            TABLE, expected
        );
        count_rows(db, &sql).await
    }

    async fn pending_rows(&self, db: &mut dyn SchemaDriver) -> Result<Vec<Backfill>> {
        let severity = if db.has_column(TABLE, "severity").await? {
            "severity"
        } else {
            "NULL"
        };
        let sql = format!(
            "SELECT id, {}, raised_at, closed_at, score_month, actual_resolution_days
             FROM {} WHERE raised_at IS NOT NULL
               AND (score_month IS NULL OR (closed_at IS NOT NULL AND actual_resolution_days IS NULL))
             ORDER BY id",
            severity, TABLE
        );

        let mut out = Vec::new();
        for row in db.query(&sql, &[]).await? {
            let mut cells = row.into_iter();
            let (Some(id), Some(sev), Some(raised), Some(closed), Some(month), Some(days)) = (
                cells.next(),
                cells.next(),
                cells.next(),
                cells.next(),
                cells.next(),
                cells.next(),
            ) else {
                continue;
            };
            // Unparseable timestamps cannot be scored and are left alone.
            let Some(raised) = raised.as_timestamp() else {
                continue;
            };
            let closed = closed.as_timestamp();
            let month_missing = month.is_null();
            let days_missing = closed.is_some() && days.is_null();
            if !month_missing && !days_missing {
                continue;
            }
            out.push(Backfill {
                id,
                scores: NcScores::compute(sev.as_str(), raised, closed),
            });
        }
        Ok(out)
    }
}

#[async_trait]
impl Migration for SafetyNcScoring {
    fn id(&self) -> u32 {
        7
    }

    fn name(&self) -> &'static str {
        "safety_nc_scoring"
    }

    fn description(&self) -> &'static str {
        "add severity scoring to safety non-conformances and backfill it"
    }

    async fn check(&self, db: &mut dyn SchemaDriver) -> Result<Applicability> {
        if let Some(na) = require_tables(db, &[TABLE, "projects"]).await? {
            return Ok(na);
        }
        let names: Vec<&str> = COLUMNS.iter().map(|(c, _)| *c).collect();
        if !missing_columns(db, TABLE, &names).await?.is_empty()
            || !db.has_table("safety_nc_score_reports").await?
        {
            return Ok(Applicability::Pending);
        }
        if self.misscored_rows(db).await? == 0 && self.pending_rows(db).await?.is_empty() {
            Ok(Applicability::UpToDate)
        } else {
            Ok(Applicability::Pending)
        }
    }

    async fn apply(&self, db: &mut dyn SchemaDriver) -> Result<()> {
        let step = self.name();
        for (column, definition) in COLUMNS {
            add_column(db, step, TABLE, column, definition).await?;
        }
        create_table(db, step, "safety_nc_score_reports", REPORTS_DDL).await?;

        // Every row is scored, with or without a usable raised_at.
        let expected = self.severity_expr(db).await?;
        let rescored = db
            .execute(
                &format!(
                    "UPDATE {t} SET severity_score = {e}
                     WHERE severity_score IS NULL OR severity_score <> {e}",
                    t = TABLE,
                    e = expected
                ),
                &[],
            )
            .await?;

        let d = db.dialect();
        let sql = format!(
            "UPDATE {} SET severity_score = {}, score_month = {}, score_year = {},
                 score_week = {}, actual_resolution_days = {} WHERE id = {}",
            TABLE,
            d.placeholder(1),
            d.placeholder(2),
            d.placeholder(3),
            d.placeholder(4),
            d.placeholder(5),
            d.placeholder(6)
        );
        let rows = self.pending_rows(db).await?;
        for Backfill { id, scores } in &rows {
            let days = scores
                .actual_resolution_days
                .map(SqlValue::Int)
                .unwrap_or(SqlValue::Null);
            db.execute(
                &sql,
                &[
                    SqlValue::Float(scores.severity_score),
                    SqlValue::Text(scores.score_month.clone()),
                    SqlValue::Int(i64::from(scores.score_year)),
                    SqlValue::Text(scores.score_week.clone()),
                    days,
                    id.clone(),
                ],
            )
            .await?;
        }
        info!(
            "[{}] rescored {} and bucketed {} non-conformance(s)",
            step,
            rescored,
            rows.len()
        );
        Ok(())
    }
}
