//! Load ordering for the migrated tables.
//!
//! The order is a fixed preamble that is a valid topological order of the
//! product's foreign-key graph; any table outside the preamble is appended
//! lexicographically. The preamble is checked against [`KNOWN_EDGES`]
//! before any plan is produced, and observed source foreign keys can be
//! checked against a plan with [`check_edges`].

use std::collections::HashMap;

use tracing::warn;

use crate::core::ForeignKeyRef;
use crate::error::{MigrateError, Result};

/// Parents before children.
pub const PREAMBLE: &[&str] = &[
    "companies",
    "users",
    "material_categories",
    "projects",
    "third_party_labs",
    "approved_brands",
    "project_memberships",
    "rmc_vendors",
    "mix_designs",
    "pour_activities",
    "batch_registers",
    "cube_test_registers",
    "third_party_cube_tests",
    "material_test_registers",
    "safety_non_conformances",
    "safety_nc_score_reports",
    "password_reset_tokens",
];

/// Known foreign-key edges as `(child, column, parent)`.
pub const KNOWN_EDGES: &[(&str, &str, &str)] = &[
    ("users", "company_id", "companies"),
    ("projects", "company_id", "companies"),
    ("material_categories", "company_id", "companies"),
    ("third_party_labs", "company_id", "companies"),
    ("approved_brands", "category_id", "material_categories"),
    ("approved_brands", "company_id", "companies"),
    ("project_memberships", "project_id", "projects"),
    ("project_memberships", "user_id", "users"),
    ("rmc_vendors", "project_id", "projects"),
    ("mix_designs", "project_id", "projects"),
    ("mix_designs", "created_by", "users"),
    ("mix_designs", "deleted_by", "users"),
    ("pour_activities", "project_id", "projects"),
    ("pour_activities", "created_by", "users"),
    ("pour_activities", "completed_by", "users"),
    ("batch_registers", "project_id", "projects"),
    ("batch_registers", "vendor_id", "rmc_vendors"),
    ("batch_registers", "mix_design_id", "mix_designs"),
    ("batch_registers", "pour_activity_id", "pour_activities"),
    ("batch_registers", "created_by", "users"),
    ("cube_test_registers", "project_id", "projects"),
    ("cube_test_registers", "batch_id", "batch_registers"),
    ("cube_test_registers", "pour_activity_id", "pour_activities"),
    ("cube_test_registers", "tested_by", "users"),
    ("third_party_cube_tests", "cube_test_id", "cube_test_registers"),
    ("third_party_cube_tests", "lab_id", "third_party_labs"),
    ("material_test_registers", "project_id", "projects"),
    ("material_test_registers", "category_id", "material_categories"),
    ("material_test_registers", "brand_id", "approved_brands"),
    ("material_test_registers", "lab_id", "third_party_labs"),
    ("material_test_registers", "tested_by", "users"),
    ("safety_non_conformances", "project_id", "projects"),
    ("safety_non_conformances", "raised_by", "users"),
    ("safety_non_conformances", "assigned_to", "users"),
    ("safety_nc_score_reports", "project_id", "projects"),
    ("password_reset_tokens", "user_id", "users"),
];

/// A foreign key the plan would load child-before-parent.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EdgeViolation {
    pub child: String,
    pub column: String,
    pub parent: String,
}

impl std::fmt::Display for EdgeViolation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{}.{} references {}, which is loaded later",
            self.child, self.column, self.parent
        )
    }
}

fn positions<S: AsRef<str>>(order: &[S]) -> HashMap<&str, usize> {
    order
        .iter()
        .enumerate()
        .map(|(i, t)| (t.as_ref(), i))
        .collect()
}

/// Verify every [`KNOWN_EDGES`] entry against [`PREAMBLE`].
pub fn validate_preamble() -> Result<()> {
    let pos = positions(PREAMBLE);
    for (child, column, parent) in KNOWN_EDGES {
        match (pos.get(child), pos.get(parent)) {
            (Some(c), Some(p)) if p < c => {}
            (Some(_), Some(_)) => {
                return Err(MigrateError::Referential(format!(
                    "preamble loads {} before its parent {} ({}.{})",
                    child, parent, child, column
                )))
            }
            _ => {
                return Err(MigrateError::Referential(format!(
                    "edge {}.{} -> {} names a table outside the preamble",
                    child, column, parent
                )))
            }
        }
    }
    Ok(())
}

/// Order `tables` for loading: preamble tables in preamble order, then the
/// rest sorted by name. Preamble entries not in `tables` are skipped.
pub fn plan<S: AsRef<str>>(tables: &[S]) -> Result<Vec<String>> {
    validate_preamble()?;

    let mut ordered: Vec<String> = PREAMBLE
        .iter()
        .filter(|p| tables.iter().any(|t| t.as_ref() == **p))
        .map(|p| p.to_string())
        .collect();

    let mut rest: Vec<String> = tables
        .iter()
        .map(|t| t.as_ref().to_string())
        .filter(|t| !PREAMBLE.contains(&t.as_str()))
        .collect();
    rest.sort();
    rest.dedup();
    ordered.extend(rest);
    Ok(ordered)
}

/// Report foreign keys in `edges` whose parent is planned after the child.
/// Self references and parents absent from the plan are ignored.
pub fn check_edges<S: AsRef<str>>(
    order: &[S],
    edges: &[(String, ForeignKeyRef)],
) -> Vec<EdgeViolation> {
    let pos = positions(order);
    let mut violations = Vec::new();
    for (child, fk) in edges {
        if child == &fk.ref_table {
            continue;
        }
        if let (Some(c), Some(p)) = (pos.get(child.as_str()), pos.get(fk.ref_table.as_str())) {
            if p > c {
                let v = EdgeViolation {
                    child: child.clone(),
                    column: fk.column.clone(),
                    parent: fk.ref_table.clone(),
                };
                warn!("Load order violation: {}", v);
                violations.push(v);
            }
        }
    }
    violations
}
