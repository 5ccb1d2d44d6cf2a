//! Forward-only schema migration runner.
//!
//! There is no version table. Every step inspects the live catalog to decide
//! whether it still has work to do, so running the catalog twice is safe and
//! a partially migrated database converges on the next run.

pub mod steps;

use async_trait::async_trait;
use serde::Serialize;
use tracing::{error, info, warn};

use crate::drivers::{Dialect, SchemaDriver};
use crate::error::{MigrateError, Result};

/// What a step's catalog check found.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "state", content = "reason", rename_all = "snake_case")]
pub enum Applicability {
    /// The post-condition does not hold yet.
    Pending,
    /// The post-condition already holds.
    UpToDate,
    /// A table the step extends does not exist.
    NotApplicable(String),
}

/// One idempotent schema evolution step.
#[async_trait]
pub trait Migration: Send + Sync {
    /// Position in the catalog, starting at 1.
    fn id(&self) -> u32;

    /// Stable short name.
    fn name(&self) -> &'static str;

    fn description(&self) -> &'static str;

    /// Inspect the catalog and report whether the step has work to do.
    async fn check(&self, db: &mut dyn SchemaDriver) -> Result<Applicability>;

    /// Apply the step. Runs inside a transaction opened by the runner.
    async fn apply(&self, db: &mut dyn SchemaDriver) -> Result<()>;

    /// Whether foreign-key enforcement must be off while the step runs.
    fn needs_foreign_keys_off(&self, _dialect: Dialect) -> bool {
        false
    }
}

/// Result of one step in a run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", content = "detail", rename_all = "snake_case")]
pub enum StepOutcome {
    Applied,
    UpToDate,
    NotApplicable(String),
    /// Dry run: the step is pending and would be applied.
    WouldApply,
    Failed(String),
    /// Not examined because an earlier step failed.
    NotRun,
}

#[derive(Debug, Clone, Serialize)]
pub struct StepReport {
    pub id: u32,
    pub name: String,
    pub outcome: StepOutcome,
}

/// Summary of a whole run.
#[derive(Debug, Clone, Serialize)]
pub struct RunSummary {
    pub engine: String,
    pub dry_run: bool,
    pub steps: Vec<StepReport>,
}

impl RunSummary {
    fn count(&self, pred: impl Fn(&StepOutcome) -> bool) -> usize {
        self.steps.iter().filter(|s| pred(&s.outcome)).count()
    }

    pub fn applied(&self) -> usize {
        self.count(|o| matches!(o, StepOutcome::Applied))
    }

    pub fn pending(&self) -> usize {
        self.count(|o| matches!(o, StepOutcome::WouldApply))
    }

    pub fn failed(&self) -> Option<&StepReport> {
        self.steps
            .iter()
            .find(|s| matches!(s.outcome, StepOutcome::Failed(_)))
    }

    pub fn is_success(&self) -> bool {
        self.failed().is_none()
    }

    /// The failure as an error, for the caller's exit status.
    pub fn error(&self) -> Option<MigrateError> {
        self.failed().map(|s| match &s.outcome {
            StepOutcome::Failed(msg) => MigrateError::migration(s.name.clone(), msg.clone()),
            _ => MigrateError::migration(s.name.clone(), "failed"),
        })
    }

    /// Plain-text report, one line per step.
    pub fn render(&self) -> String {
        let mut out = format!(
            "Migration summary ({}{})\n",
            self.engine,
            if self.dry_run { ", dry run" } else { "" }
        );
        for step in &self.steps {
            let (label, detail) = match &step.outcome {
                StepOutcome::Applied => ("applied", None),
                StepOutcome::UpToDate => ("up to date", None),
                StepOutcome::NotApplicable(r) => ("not applicable", Some(r.as_str())),
                StepOutcome::WouldApply => ("pending", None),
                StepOutcome::Failed(r) => ("FAILED", Some(r.as_str())),
                StepOutcome::NotRun => ("not run", None),
            };
            out.push_str(&format!("  {:>2}. {:<24} {}", step.id, step.name, label));
            if let Some(d) = detail {
                out.push_str(&format!(" ({})", d));
            }
            out.push('\n');
        }
        if self.is_success() && self.applied() == 0 && self.pending() == 0 {
            out.push_str("Database schema is up to date\n");
        } else if self.dry_run {
            out.push_str(&format!("{} step(s) would be applied\n", self.pending()));
        } else if self.is_success() {
            out.push_str(&format!("{} step(s) applied\n", self.applied()));
        }
        out
    }
}

/// Runs a catalog of migrations in order against one connection.
pub struct MigrationRunner {
    migrations: Vec<Box<dyn Migration>>,
    dry_run: bool,
}

impl Default for MigrationRunner {
    fn default() -> Self {
        Self::new()
    }
}

impl MigrationRunner {
    /// Runner over the built-in catalog.
    pub fn new() -> Self {
        Self::with_migrations(steps::catalog())
    }

    pub fn with_migrations(migrations: Vec<Box<dyn Migration>>) -> Self {
        Self {
            migrations,
            dry_run: false,
        }
    }

    /// Report pending steps without applying them.
    pub fn dry_run(mut self, dry_run: bool) -> Self {
        self.dry_run = dry_run;
        self
    }

    pub fn migrations(&self) -> &[Box<dyn Migration>] {
        &self.migrations
    }

    /// Check every step without changing anything.
    pub async fn status(&self, db: &mut dyn SchemaDriver) -> Result<Vec<(u32, String, Applicability)>> {
        let mut out = Vec::with_capacity(self.migrations.len());
        for m in &self.migrations {
            out.push((m.id(), m.name().to_string(), m.check(&mut *db).await?));
        }
        Ok(out)
    }

    /// Run the catalog. Stops at the first failing step.
    pub async fn run(&self, db: &mut dyn SchemaDriver) -> Result<RunSummary> {
        let mut summary = RunSummary {
            engine: db.dialect().name().to_string(),
            dry_run: self.dry_run,
            steps: Vec::with_capacity(self.migrations.len()),
        };

        let mut stopped = false;
        for m in &self.migrations {
            let outcome = if stopped {
                StepOutcome::NotRun
            } else {
                self.run_step(m.as_ref(), db).await?
            };
            if matches!(outcome, StepOutcome::Failed(_)) {
                stopped = true;
            }
            summary.steps.push(StepReport {
                id: m.id(),
                name: m.name().to_string(),
                outcome,
            });
        }

        if summary.is_success() && summary.applied() == 0 && !self.dry_run {
            info!("Database schema is up to date");
        }
        Ok(summary)
    }

    async fn run_step(&self, m: &dyn Migration, db: &mut dyn SchemaDriver) -> Result<StepOutcome> {
        let check = match m.check(&mut *db).await {
            Ok(c) => c,
            Err(e) => return Ok(StepOutcome::Failed(format!("check failed: {}", e))),
        };
        match check {
            Applicability::UpToDate => {
                info!("[{}] {}: up to date", m.id(), m.name());
                return Ok(StepOutcome::UpToDate);
            }
            Applicability::NotApplicable(reason) => {
                warn!("[{}] {}: not applicable ({})", m.id(), m.name(), reason);
                return Ok(StepOutcome::NotApplicable(reason));
            }
            Applicability::Pending if self.dry_run => {
                info!("[{}] {}: pending (dry run)", m.id(), m.name());
                return Ok(StepOutcome::WouldApply);
            }
            Applicability::Pending => {}
        }

        info!("[{}] {}: applying - {}", m.id(), m.name(), m.description());
        let fk_off = m.needs_foreign_keys_off(db.dialect());
        if fk_off {
            db.set_foreign_keys(false).await?;
        }

        db.begin().await?;
        let applied = match m.apply(&mut *db).await {
            Ok(()) => db.commit().await,
            Err(e) => {
                if let Err(rb) = db.rollback().await {
                    error!("[{}] {}: rollback failed: {}", m.id(), m.name(), rb);
                }
                Err(e)
            }
        };

        if fk_off {
            db.set_foreign_keys(true).await?;
        }

        if let Err(e) = applied {
            error!("[{}] {}: {}", m.id(), m.name(), e);
            return Ok(StepOutcome::Failed(e.one_line()));
        }

        match m.check(&mut *db).await? {
            Applicability::UpToDate => {
                info!("[{}] {}: applied", m.id(), m.name());
                Ok(StepOutcome::Applied)
            }
            other => {
                let msg = format!("post-condition not met after apply ({:?})", other);
                error!("[{}] {}: {}", m.id(), m.name(), msg);
                Ok(StepOutcome::Failed(msg))
            }
        }
    }
}
