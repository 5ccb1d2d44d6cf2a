//! Notification e-mail rendering.
//!
//! Templates are opaque HTML files with `{{key}}` placeholders. Delivery is
//! someone else's job; this module only produces the body.

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::sync::LazyLock;

use chrono::Utc;
use regex::Regex;
use serde::Serialize;
use serde_json::{Map, Value};
use tracing::debug;

use crate::config::MailConfig;
use crate::error::{MigrateError, Result};

static PLACEHOLDER_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\{\{([^{}]+)\}\}").expect("valid regex"));

static TEMPLATE_NAME_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Za-z0-9_-]+$").expect("valid regex"));

/// Values injected into every template unless the caller supplies them.
#[derive(Debug, Clone)]
pub struct MailDefaults {
    pub portal_url: String,
    pub dashboard_url: String,
}

impl From<&MailConfig> for MailDefaults {
    fn from(c: &MailConfig) -> Self {
        Self {
            portal_url: c.portal_url.clone(),
            dashboard_url: c.dashboard_url.clone(),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct TestFailure {
    pub recipient_name: String,
    pub project_name: String,
    pub cube_identifier: String,
    pub test_age_days: i64,
    pub compressive_strength: f64,
    pub target_strength: f64,
    pub tested_on: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct BatchRejection {
    pub recipient_name: String,
    pub project_name: String,
    pub batch_number: String,
    pub vendor_name: String,
    pub rejection_reason: String,
    pub rejected_by: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct SafetyNc {
    pub recipient_name: String,
    pub project_name: String,
    pub nc_number: String,
    pub severity: String,
    pub description: String,
    pub raised_by: String,
    pub due_date: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct PasswordReset {
    pub full_name: String,
    pub reset_url: String,
    pub expires_in_minutes: u32,
}

#[derive(Debug, Clone, Serialize)]
pub struct PasswordResetConfirmation {
    pub full_name: String,
    pub changed_at: String,
}

/// Renders `{templates_dir}/{name}.html`.
#[derive(Debug, Clone)]
pub struct MailRenderer {
    templates_dir: PathBuf,
    defaults: MailDefaults,
}

impl MailRenderer {
    pub fn new(templates_dir: impl Into<PathBuf>, defaults: MailDefaults) -> Self {
        Self {
            templates_dir: templates_dir.into(),
            defaults,
        }
    }

    pub fn templates_dir(&self) -> &Path {
        &self.templates_dir
    }

    fn template_path(&self, name: &str) -> Result<PathBuf> {
        if !TEMPLATE_NAME_RE.is_match(name) {
            return Err(MigrateError::Template(format!(
                "invalid template name '{}'",
                name
            )));
        }
        Ok(self.templates_dir.join(format!("{}.html", name)))
    }

    /// Render template `name` with `data`.
    ///
    /// Every occurrence of the exact text `{{key}}` is replaced for each key in
    /// `data`. Anything else in braces stays in the output; see
    /// [`unresolved_placeholders`].
    pub fn render(&self, name: &str, data: &Map<String, Value>) -> Result<String> {
        let path = self.template_path(name)?;
        let template = std::fs::read_to_string(&path).map_err(|e| {
            MigrateError::Template(format!("cannot read template {}: {}", path.display(), e))
        })?;

        let mut data = data.clone();
        data.entry("timestamp").or_insert_with(|| {
            Value::String(Utc::now().format("%Y-%m-%d %H:%M:%S UTC").to_string())
        });
        data.entry("portal_url")
            .or_insert_with(|| Value::String(self.defaults.portal_url.clone()));
        data.entry("dashboard_url")
            .or_insert_with(|| Value::String(self.defaults.dashboard_url.clone()));

        let mut html = template;
        for (key, value) in &data {
            let placeholder = format!("{{{{{}}}}}", key);
            if html.contains(&placeholder) {
                html = html.replace(&placeholder, &display_value(value));
            }
        }
        debug!("Rendered mail template {} ({} bytes)", name, html.len());
        Ok(html)
    }

    fn render_typed<T: Serialize>(&self, name: &str, fields: &T) -> Result<String> {
        match serde_json::to_value(fields)? {
            Value::Object(map) => self.render(name, &map),
            _ => Err(MigrateError::Template(format!(
                "{}: template data must be an object",
                name
            ))),
        }
    }

    pub fn test_failure(&self, f: &TestFailure) -> Result<String> {
        self.render_typed("test_failure", f)
    }

    pub fn batch_rejection(&self, f: &BatchRejection) -> Result<String> {
        self.render_typed("batch_rejection", f)
    }

    pub fn safety_nc(&self, f: &SafetyNc) -> Result<String> {
        self.render_typed("safety_nc", f)
    }

    pub fn password_reset(&self, f: &PasswordReset) -> Result<String> {
        self.render_typed("password_reset", f)
    }

    pub fn password_reset_confirmation(&self, f: &PasswordResetConfirmation) -> Result<String> {
        self.render_typed("password_reset_confirmation", f)
    }
}

fn display_value(v: &Value) -> String {
    match v {
        Value::String(s) => s.clone(),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

/// Placeholder names still present in rendered output, sorted and deduplicated.
pub fn unresolved_placeholders(html: &str) -> Vec<String> {
    PLACEHOLDER_RE
        .captures_iter(html)
        .map(|c| c[1].to_string())
        .collect::<BTreeSet<_>>()
        .into_iter()
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::TempDir;

    fn defaults() -> MailDefaults {
        MailDefaults {
            portal_url: "https://qms.test".into(),
            dashboard_url: "https://qms.test/dash".into(),
        }
    }

    fn shipped() -> MailRenderer {
        let dir = Path::new(env!("CARGO_MANIFEST_DIR")).join("../../templates");
        MailRenderer::new(dir, defaults())
    }

    fn object(v: Value) -> Map<String, Value> {
        match v {
            Value::Object(m) => m,
            _ => panic!("not an object"),
        }
    }

    #[test]
    fn test_render_substitutes_and_injects() {
        let dir = TempDir::new().unwrap();
        std::fs::write(
            dir.path().join("hello.html"),
            "<p>{{name}} / {{count}} / {{ok}} / {{none}} / {{portal_url}} / {{missing}}</p>",
        )
        .unwrap();
        let renderer = MailRenderer::new(dir.path(), defaults());
        let html = renderer
            .render(
                "hello",
                &object(json!({"name": "Asha", "count": 3, "ok": true, "none": null})),
            )
            .unwrap();
        assert_eq!(
            html,
            "<p>Asha / 3 / true /  / https://qms.test / {{missing}}</p>"
        );
        assert_eq!(unresolved_placeholders(&html), vec!["missing".to_string()]);
    }

    #[test]
    fn test_keys_match_exact_braced_text_only() {
        let dir = TempDir::new().unwrap();
        std::fs::write(
            dir.path().join("codes.html"),
            "<p>{{project-code}}|{{ name }}|{{site.zone}}|{{name}}</p>",
        )
        .unwrap();
        let renderer = MailRenderer::new(dir.path(), defaults());
        let html = renderer
            .render(
                "codes",
                &object(json!({"project-code": "PRJ-1", "name": "Ann", "site.zone": "Z3"})),
            )
            .unwrap();
        assert_eq!(html, "<p>PRJ-1|{{ name }}|Z3|Ann</p>");
        assert_eq!(unresolved_placeholders(&html), vec![" name ".to_string()]);
    }

    #[test]
    fn test_caller_values_win_over_defaults() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("t.html"), "{{portal_url}}|{{timestamp}}").unwrap();
        let renderer = MailRenderer::new(dir.path(), defaults());
        let html = renderer
            .render(
                "t",
                &object(json!({"portal_url": "https://other.test", "timestamp": "now"})),
            )
            .unwrap();
        assert_eq!(html, "https://other.test|now");
    }

    #[test]
    fn test_bad_names_and_missing_files() {
        let renderer = MailRenderer::new("/nonexistent", defaults());
        assert!(matches!(
            renderer.render("../etc/passwd", &Map::new()),
            Err(MigrateError::Template(_))
        ));
        assert!(matches!(
            renderer.render("absent", &Map::new()),
            Err(MigrateError::Template(_))
        ));
    }

    #[test]
    fn test_shipped_templates_render_fully() {
        let r = shipped();
        let outputs = vec![
            r.test_failure(&TestFailure {
                recipient_name: "QA Lead".into(),
                project_name: "Tower A".into(),
                cube_identifier: "C-7".into(),
                test_age_days: 28,
                compressive_strength: 24.5,
                target_strength: 30.0,
                tested_on: "2024-03-29".into(),
            })
            .unwrap(),
            r.batch_rejection(&BatchRejection {
                recipient_name: "QA Lead".into(),
                project_name: "Tower A".into(),
                batch_number: "B-1".into(),
                vendor_name: "Ready Mix Ltd".into(),
                rejection_reason: "Slump out of range".into(),
                rejected_by: "Site Engineer".into(),
            })
            .unwrap(),
            r.safety_nc(&SafetyNc {
                recipient_name: "Safety Officer".into(),
                project_name: "Tower A".into(),
                nc_number: "NC-12".into(),
                severity: "major".into(),
                description: "Missing edge protection".into(),
                raised_by: "Inspector".into(),
                due_date: "2024-04-05".into(),
            })
            .unwrap(),
            r.password_reset(&PasswordReset {
                full_name: "Asha".into(),
                reset_url: "https://qms.test/reset?token=abc".into(),
                expires_in_minutes: 60,
            })
            .unwrap(),
            r.password_reset_confirmation(&PasswordResetConfirmation {
                full_name: "Asha".into(),
                changed_at: "2024-03-29 10:00 UTC".into(),
            })
            .unwrap(),
        ];
        for html in outputs {
            assert!(unresolved_placeholders(&html).is_empty(), "{}", html);
            assert!(html.contains("https://qms.test"));
        }
    }
}
