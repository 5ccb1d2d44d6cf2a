use async_trait::async_trait;

use super::{
    add_column, create_index, create_table, missing_columns, missing_indexes, require_tables,
};
use crate::drivers::SchemaDriver;
use crate::error::Result;
use crate::runner::{Applicability, Migration};

/// `(table, ddl)` in creation order; parents first.
pub(crate) const TABLES: &[(&str, &str)] = &[
    (
        "material_categories",
        "CREATE TABLE IF NOT EXISTS material_categories (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    company_id INTEGER REFERENCES companies(id),
    category_name VARCHAR(255) NOT NULL,
    description TEXT,
    created_at DATETIME DEFAULT CURRENT_TIMESTAMP
)",
    ),
    (
        "third_party_labs",
        "CREATE TABLE IF NOT EXISTS third_party_labs (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    company_id INTEGER NOT NULL REFERENCES companies(id),
    lab_name VARCHAR(255) NOT NULL,
    accreditation_number VARCHAR(100),
    contact_person VARCHAR(255),
    contact_phone VARCHAR(20),
    address TEXT,
    is_active BOOLEAN DEFAULT 1,
    created_at DATETIME DEFAULT CURRENT_TIMESTAMP
)",
    ),
    (
        "approved_brands",
        "CREATE TABLE IF NOT EXISTS approved_brands (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    company_id INTEGER REFERENCES companies(id),
    category_id INTEGER NOT NULL REFERENCES material_categories(id),
    brand_name VARCHAR(255) NOT NULL,
    manufacturer VARCHAR(255),
    is_active BOOLEAN DEFAULT 1,
    created_at DATETIME DEFAULT CURRENT_TIMESTAMP
)",
    ),
    (
        "rmc_vendors",
        "CREATE TABLE IF NOT EXISTS rmc_vendors (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    project_id INTEGER NOT NULL REFERENCES projects(id),
    vendor_name VARCHAR(255) NOT NULL,
    contact_person VARCHAR(255),
    contact_phone VARCHAR(20),
    contact_email VARCHAR(255),
    address TEXT,
    is_approved BOOLEAN DEFAULT 1,
    created_at DATETIME DEFAULT CURRENT_TIMESTAMP
)",
    ),
    (
        "batch_registers",
        "CREATE TABLE IF NOT EXISTS batch_registers (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    project_id INTEGER NOT NULL REFERENCES projects(id),
    vendor_id INTEGER REFERENCES rmc_vendors(id),
    mix_design_id INTEGER REFERENCES mix_designs(id),
    pour_activity_id INTEGER REFERENCES pour_activities(id),
    batch_number VARCHAR(100) NOT NULL,
    delivery_date DATETIME NOT NULL,
    vehicle_number VARCHAR(50),
    quantity_received REAL,
    slump_value REAL,
    temperature REAL,
    concrete_type VARCHAR(20) DEFAULT 'Normal',
    verification_status VARCHAR(50) DEFAULT 'pending',
    rejection_reason TEXT,
    created_by INTEGER REFERENCES users(id),
    created_at DATETIME DEFAULT CURRENT_TIMESTAMP
)",
    ),
    (
        "cube_test_registers",
        "CREATE TABLE IF NOT EXISTS cube_test_registers (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    project_id INTEGER NOT NULL REFERENCES projects(id),
    batch_id INTEGER NOT NULL REFERENCES batch_registers(id),
    pour_activity_id INTEGER REFERENCES pour_activities(id),
    cube_identifier VARCHAR(100) NOT NULL,
    casting_date DATETIME NOT NULL,
    test_age_days INTEGER NOT NULL,
    test_date DATETIME,
    compressive_strength REAL,
    target_strength REAL,
    concrete_type VARCHAR(20) DEFAULT 'Normal',
    pass_fail VARCHAR(10),
    tested_by INTEGER REFERENCES users(id),
    remarks TEXT,
    created_at DATETIME DEFAULT CURRENT_TIMESTAMP
)",
    ),
    (
        "third_party_cube_tests",
        "CREATE TABLE IF NOT EXISTS third_party_cube_tests (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    cube_test_id INTEGER NOT NULL REFERENCES cube_test_registers(id),
    lab_id INTEGER NOT NULL REFERENCES third_party_labs(id),
    report_number VARCHAR(100),
    test_date DATETIME,
    compressive_strength REAL,
    report_file_name VARCHAR(512),
    report_data BLOB,
    remarks TEXT,
    created_at DATETIME DEFAULT CURRENT_TIMESTAMP
)",
    ),
    (
        "material_test_registers",
        "CREATE TABLE IF NOT EXISTS material_test_registers (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    project_id INTEGER NOT NULL REFERENCES projects(id),
    category_id INTEGER NOT NULL REFERENCES material_categories(id),
    brand_id INTEGER REFERENCES approved_brands(id),
    lab_id INTEGER REFERENCES third_party_labs(id),
    sample_id VARCHAR(100) NOT NULL,
    test_type VARCHAR(100) NOT NULL,
    test_date DATETIME,
    result_value REAL,
    unit VARCHAR(50),
    pass_fail VARCHAR(10),
    tested_by INTEGER REFERENCES users(id),
    remarks TEXT,
    created_at DATETIME DEFAULT CURRENT_TIMESTAMP
)",
    ),
];

const SOFT_DELETE_COLUMNS: &[(&str, &str)] = &[
    ("is_deleted", "BOOLEAN DEFAULT 0"),
    ("deleted_at", "DATETIME"),
    ("deleted_by", "INTEGER REFERENCES users(id)"),
];

const INDEXES: &[(&str, &str)] = &[
    ("batch_registers", "pour_activity_id"),
    ("cube_test_registers", "pour_activity_id"),
];

/// Concrete and material QMS registers plus soft delete on mix designs.
pub struct QmsExtension;

#[async_trait]
impl Migration for QmsExtension {
    fn id(&self) -> u32 {
        4
    }

    fn name(&self) -> &'static str {
        "qms_extension"
    }

    fn description(&self) -> &'static str {
        "create the concrete and material QMS registers"
    }

    async fn check(&self, db: &mut dyn SchemaDriver) -> Result<Applicability> {
        if let Some(na) =
            require_tables(db, &["companies", "projects", "users", "mix_designs"]).await?
        {
            return Ok(na);
        }
        for (table, _) in TABLES {
            if !db.has_table(table).await? {
                return Ok(Applicability::Pending);
            }
        }
        let names: Vec<&str> = SOFT_DELETE_COLUMNS.iter().map(|(c, _)| *c).collect();
        if !missing_columns(db, "mix_designs", &names).await?.is_empty() {
            return Ok(Applicability::Pending);
        }
        if missing_indexes(db, INDEXES).await?.is_empty() {
            Ok(Applicability::UpToDate)
        } else {
            Ok(Applicability::Pending)
        }
    }

    async fn apply(&self, db: &mut dyn SchemaDriver) -> Result<()> {
        let step = self.name();
        for (table, ddl) in TABLES {
            create_table(db, step, table, ddl).await?;
        }
        for (table, column) in INDEXES {
            create_index(db, step, table, column).await?;
        }
        for (column, definition) in SOFT_DELETE_COLUMNS {
            add_column(db, step, "mix_designs", column, definition).await?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dialect::translate_ddl;
    use crate::plan::KNOWN_EDGES;
    use crate::runner::steps::{baseline_db, PourActivities};
    use crate::runner::{MigrationRunner, StepOutcome};

    #[tokio::test]
    async fn test_creates_registers() {
        let mut db = baseline_db();
        let summary = MigrationRunner::with_migrations(vec![
            Box::new(PourActivities),
            Box::new(QmsExtension),
        ])
        .run(&mut db)
        .await
        .unwrap();
        assert_eq!(summary.steps[1].outcome, StepOutcome::Applied);
        for (table, _) in TABLES {
            assert!(db.has_table(table).await.unwrap(), "{}", table);
        }
        assert!(db.has_column("mix_designs", "deleted_by").await.unwrap());
    }

    #[test]
    fn test_register_ddl_translates_cleanly() {
        for (table, ddl) in TABLES {
            let t = translate_ddl(ddl).unwrap();
            assert!(t.warnings.is_empty(), "{}: {:?}", table, t.warnings);
            assert!(t.sql.contains("id SERIAL PRIMARY KEY"), "{}", table);
        }
    }

    #[test]
    fn test_foreign_keys_are_known_edges() {
        for (table, ddl) in TABLES {
            for line in ddl.lines().filter(|l| l.contains("REFERENCES")) {
                let column = line.split_whitespace().next().unwrap();
                let parent = line
                    .split("REFERENCES ")
                    .nth(1)
                    .and_then(|r| r.split('(').next())
                    .unwrap();
                assert!(
                    KNOWN_EDGES.contains(&(*table, column, parent)),
                    "{}.{} -> {}",
                    table,
                    column,
                    parent
                );
            }
        }
    }
}
