use async_trait::async_trait;

use super::{add_column, missing_columns, require_tables};
use crate::drivers::SchemaDriver;
use crate::error::Result;
use crate::runner::{Applicability, Migration};

const COLUMNS: &[(&str, &str)] = &[
    ("image_name", "VARCHAR(512)"),
    ("image_data", "BLOB"),
    ("image_mimetype", "VARCHAR(100)"),
];

/// Image attachment columns on `mix_designs`.
pub struct MixDesignImages;

#[async_trait]
impl Migration for MixDesignImages {
    fn id(&self) -> u32 {
        1
    }

    fn name(&self) -> &'static str {
        "mix_design_images"
    }

    fn description(&self) -> &'static str {
        "add image attachment columns to mix_designs"
    }

    async fn check(&self, db: &mut dyn SchemaDriver) -> Result<Applicability> {
        if let Some(na) = require_tables(db, &["mix_designs"]).await? {
            return Ok(na);
        }
        let names: Vec<&str> = COLUMNS.iter().map(|(c, _)| *c).collect();
        if missing_columns(db, "mix_designs", &names).await?.is_empty() {
            Ok(Applicability::UpToDate)
        } else {
            Ok(Applicability::Pending)
        }
    }

    async fn apply(&self, db: &mut dyn SchemaDriver) -> Result<()> {
        for (column, definition) in COLUMNS {
            add_column(db, self.name(), "mix_designs", column, definition).await?;
        }
        Ok(())
    }
}
