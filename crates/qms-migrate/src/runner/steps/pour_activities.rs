use async_trait::async_trait;

use super::{
    add_column, create_index, create_table, missing_columns, missing_indexes, require_tables,
};
use crate::drivers::SchemaDriver;
use crate::error::Result;
use crate::runner::{Applicability, Migration};

pub(crate) const POUR_ACTIVITIES_DDL: &str = "CREATE TABLE IF NOT EXISTS pour_activities (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    project_id INTEGER NOT NULL REFERENCES projects(id),
    pour_id VARCHAR(100) UNIQUE NOT NULL,
    pour_date TIMESTAMP NOT NULL,
    building_name VARCHAR(255),
    floor_level VARCHAR(50),
    zone VARCHAR(100),
    grid_reference VARCHAR(100),
    structural_element_type VARCHAR(100),
    element_id VARCHAR(100),
    location_description TEXT,
    concrete_type VARCHAR(20) DEFAULT 'Normal',
    design_grade VARCHAR(20),
    total_quantity_planned REAL,
    total_quantity_received REAL,
    status VARCHAR(50) DEFAULT 'in_progress',
    started_at DATETIME,
    completed_at DATETIME,
    created_by INTEGER REFERENCES users(id),
    completed_by INTEGER REFERENCES users(id),
    remarks TEXT,
    created_at DATETIME DEFAULT CURRENT_TIMESTAMP,
    updated_at DATETIME DEFAULT CURRENT_TIMESTAMP
)";

/// Tables that gain a link to the pour they belong to.
pub(crate) const LINKED_TABLES: &[&str] = &["batch_registers", "cube_test_registers"];

const LINK_COLUMNS: &[(&str, &str)] = &[
    ("pour_activity_id", "INTEGER REFERENCES pour_activities(id)"),
    ("concrete_type", "VARCHAR(20) DEFAULT 'Normal'"),
];

/// Pour activity tracking, linked from batch and cube registers.
pub struct PourActivities;

#[async_trait]
impl Migration for PourActivities {
    fn id(&self) -> u32 {
        2
    }

    fn name(&self) -> &'static str {
        "pour_activities"
    }

    fn description(&self) -> &'static str {
        "create pour_activities and link batch and cube registers to it"
    }

    async fn check(&self, db: &mut dyn SchemaDriver) -> Result<Applicability> {
        if let Some(na) = require_tables(db, &["projects", "users"]).await? {
            return Ok(na);
        }
        if !db.has_table("pour_activities").await? {
            return Ok(Applicability::Pending);
        }
        let mut wanted = vec![("pour_activities", "project_id"), ("pour_activities", "status")];
        let link_names: Vec<&str> = LINK_COLUMNS.iter().map(|(c, _)| *c).collect();
        for table in LINKED_TABLES {
            if !db.has_table(table).await? {
                continue;
            }
            if !missing_columns(db, table, &link_names).await?.is_empty() {
                return Ok(Applicability::Pending);
            }
            wanted.push((*table, "pour_activity_id"));
        }
        if missing_indexes(db, &wanted).await?.is_empty() {
            Ok(Applicability::UpToDate)
        } else {
            Ok(Applicability::Pending)
        }
    }

    async fn apply(&self, db: &mut dyn SchemaDriver) -> Result<()> {
        let step = self.name();
        create_table(db, step, "pour_activities", POUR_ACTIVITIES_DDL).await?;
        create_index(db, step, "pour_activities", "project_id").await?;
        create_index(db, step, "pour_activities", "status").await?;

        for table in LINKED_TABLES {
            if !db.has_table(table).await? {
                continue;
            }
            for (column, definition) in LINK_COLUMNS {
                add_column(db, step, table, column, definition).await?;
            }
            create_index(db, step, table, "pour_activity_id").await?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runner::steps::baseline_db;
    use crate::runner::{MigrationRunner, StepOutcome};

    #[tokio::test]
    async fn test_creates_table_and_indexes() {
        let mut db = baseline_db();
        let summary = MigrationRunner::with_migrations(vec![Box::new(PourActivities)])
            .run(&mut db)
            .await
            .unwrap();
        assert_eq!(summary.steps[0].outcome, StepOutcome::Applied);
        assert!(db
            .has_index("pour_activities", "idx_pour_activities_status")
            .await
            .unwrap());
        assert_eq!(db.columns("pour_activities").await.unwrap().len(), 23);
    }

    #[tokio::test]
    async fn test_links_existing_registers() {
        let mut db = baseline_db();
        db.execute_batch(
            "CREATE TABLE batch_registers (id INTEGER PRIMARY KEY AUTOINCREMENT, batch_number VARCHAR(100))",
        )
        .await
        .unwrap();
        MigrationRunner::with_migrations(vec![Box::new(PourActivities)])
            .run(&mut db)
            .await
            .unwrap();
        assert!(db
            .has_column("batch_registers", "pour_activity_id")
            .await
            .unwrap());
        assert!(db
            .has_index("batch_registers", "idx_batch_registers_pour_activity_id")
            .await
            .unwrap());
        assert!(!db.has_table("cube_test_registers").await.unwrap());
    }

    #[tokio::test]
    async fn test_requires_projects() {
        let conn = rusqlite::Connection::open_in_memory().unwrap();
        conn.execute_batch("CREATE TABLE users (id INTEGER PRIMARY KEY)").unwrap();
        let mut db = crate::drivers::SqliteDriver::from_connection(conn);
        assert_eq!(
            PourActivities.check(&mut db).await.unwrap(),
            Applicability::NotApplicable("table projects does not exist".into())
        );
    }
}
