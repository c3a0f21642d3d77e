//! Static remediation knowledge.
//!
//! Two tables drive the engine's decisions:
//! - [`CauseTable`]: violation type → likely root cause, used by diagnosis
//! - [`FixCatalog`]: violation type → fix type metadata, fix-type ordering
//!   rules, fix type → [`FixHandler`], and failure suggestions
//!
//! The cause table can be replaced by a JSON file at runtime. The catalog is
//! compiled in; tests build custom catalogs through its builder methods.

use std::collections::HashMap;
use std::path::Path;

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::{info, warn};

use super::types::{RiskLevel, Violation};

// ============================================================================
// Cause Table
// ============================================================================

/// Known root cause for a recurring violation type.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CauseEntry {
    /// Most likely explanation for many occurrences of the type
    pub likely_cause: String,
    /// Upstream change that removes the cause
    pub suggested_fix: String,
    /// Share of the group expected to disappear after the upstream fix
    pub expected_impact_percent: f64,
}

impl CauseEntry {
    fn new(likely_cause: &str, suggested_fix: &str, expected_impact_percent: f64) -> Self {
        Self {
            likely_cause: likely_cause.to_string(),
            suggested_fix: suggested_fix.to_string(),
            expected_impact_percent,
        }
    }
}

/// Violation type → root cause lookup.
#[derive(Debug, Clone, Default)]
pub struct CauseTable {
    entries: HashMap<String, CauseEntry>,
}

impl CauseTable {
    /// The built-in table.
    pub fn builtin() -> Self {
        let mut entries = HashMap::new();
        entries.insert(
            "forbidden_color".to_string(),
            CauseEntry::new(
                "Template swatch library contains off-brand colors",
                "Replace the template swatch library with the brand palette",
                80.0,
            ),
        );
        entries.insert(
            "non_brand_color".to_string(),
            CauseEntry::new(
                "Colors picked by hand instead of from brand swatches",
                "Restrict the template to brand swatches",
                70.0,
            ),
        );
        entries.insert(
            "forbidden_font".to_string(),
            CauseEntry::new(
                "Fonts substituted on a machine missing the brand fonts",
                "Package brand fonts with the template",
                75.0,
            ),
        );
        entries.insert(
            "non_brand_font".to_string(),
            CauseEntry::new(
                "Fonts substituted on a machine missing the brand fonts",
                "Package brand fonts with the template",
                75.0,
            ),
        );
        entries.insert(
            "incorrect_type_scale".to_string(),
            CauseEntry::new(
                "Paragraph styles overridden locally",
                "Reapply paragraph styles from the brand style sheet",
                65.0,
            ),
        );
        entries.insert(
            "incorrect_margins".to_string(),
            CauseEntry::new(
                "Pages built on an outdated master page",
                "Rebase pages on the current master page",
                85.0,
            ),
        );
        entries.insert(
            "text_cutoff".to_string(),
            CauseEntry::new(
                "Copy length exceeds fixed frame capacity",
                "Enable auto-sizing text frames in the template",
                60.0,
            ),
        );
        entries.insert(
            "logo_clearspace_violation".to_string(),
            CauseEntry::new(
                "Logo placed without clearspace guides",
                "Add clearspace guides to the logo placeholder",
                70.0,
            ),
        );
        Self { entries }
    }

    /// Parse a table from JSON of the form `{"type": {likely_cause, ...}}`.
    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        let entries: HashMap<String, CauseEntry> = serde_json::from_str(json)?;
        Ok(Self { entries })
    }

    /// Load the table from `path`, or the built-in table when no path is set.
    ///
    /// An unreadable or malformed file yields an empty table so diagnosis
    /// reports no systemic issues instead of failing the session.
    pub fn load(path: Option<&Path>) -> Self {
        let Some(path) = path else {
            return Self::builtin();
        };

        match std::fs::read_to_string(path) {
            Ok(contents) => match Self::from_json(&contents) {
                Ok(table) => {
                    info!(path = %path.display(), entries = table.len(), "Cause table loaded");
                    table
                }
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "Malformed cause table, systemic detection disabled");
                    Self::default()
                }
            },
            Err(e) => {
                warn!(path = %path.display(), error = %e, "Cause table missing, systemic detection disabled");
                Self::default()
            }
        }
    }

    /// Look up the cause for a violation type.
    pub fn get(&self, violation_type: &str) -> Option<&CauseEntry> {
        self.entries.get(violation_type)
    }

    /// Number of known types.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the table has no entries.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

// ============================================================================
// Fix Handlers
// ============================================================================

/// How a fix type is carried out.
#[derive(Debug, Clone, PartialEq)]
pub enum FixHandler {
    /// Applied by the automation backend
    Automation {
        /// Backend operation name
        operation: String,
        /// Static parameters merged into every call
        defaults: Value,
    },
    /// No automation exists; reported for a human
    Manual {
        /// Why the fix cannot be automated
        reason: String,
    },
}

impl FixHandler {
    fn automation(operation: &str, defaults: Value) -> Self {
        FixHandler::Automation {
            operation: operation.to_string(),
            defaults,
        }
    }

    fn manual(reason: &str) -> Self {
        FixHandler::Manual {
            reason: reason.to_string(),
        }
    }

    /// Whether the backend can apply this fix.
    pub fn is_automated(&self) -> bool {
        matches!(self, FixHandler::Automation { .. })
    }

    /// Build backend parameters for a violation.
    ///
    /// Returns `None` for manual handlers.
    pub fn params_for(&self, violation: &Violation) -> Option<Value> {
        match self {
            FixHandler::Automation {
                operation,
                defaults,
            } => {
                let mut params = json!({
                    "operation": operation,
                    "location": violation.location.0,
                    "severity": violation.severity.as_str(),
                });
                if let (Some(target), Some(extra)) = (params.as_object_mut(), defaults.as_object())
                {
                    for (key, value) in extra {
                        target.insert(key.clone(), value.clone());
                    }
                }
                Some(params)
            }
            FixHandler::Manual { .. } => None,
        }
    }
}

// ============================================================================
// Fix Catalog
// ============================================================================

/// Planning metadata for the fix that addresses a violation type.
#[derive(Debug, Clone, PartialEq)]
pub struct FixTypeMeta {
    /// Fix type name
    pub fix_type: String,
    /// Whether the fix type is eligible for automation
    pub automatable: bool,
    /// Base risk before historical adjustment
    pub risk: RiskLevel,
    /// Base duration estimate
    pub base_duration_ms: u64,
}

impl FixTypeMeta {
    /// Create fix type metadata.
    pub fn new(fix_type: &str, automatable: bool, risk: RiskLevel, base_duration_ms: u64) -> Self {
        Self {
            fix_type: fix_type.to_string(),
            automatable,
            risk,
            base_duration_ms,
        }
    }
}

/// Fix type used for violation types the catalog does not know.
pub const MANUAL_REVIEW: &str = "manual_review";

/// Violation → fix mapping, ordering rules, and handler table.
#[derive(Debug, Clone)]
pub struct FixCatalog {
    by_violation_type: HashMap<String, FixTypeMeta>,
    /// `(before, after)` fix-type pairs
    ordering: Vec<(String, String)>,
    handlers: HashMap<String, FixHandler>,
    failure_suggestions: HashMap<String, String>,
}

impl Default for FixCatalog {
    fn default() -> Self {
        Self::builtin()
    }
}

impl FixCatalog {
    /// A catalog with no entries.
    pub fn empty() -> Self {
        Self {
            by_violation_type: HashMap::new(),
            ordering: Vec::new(),
            handlers: HashMap::new(),
            failure_suggestions: HashMap::new(),
        }
    }

    /// The built-in catalog for brand-compliance violations.
    pub fn builtin() -> Self {
        use RiskLevel::*;

        let mut catalog = Self::empty();

        let color = FixTypeMeta::new("color_correction", true, Low, 800);
        for vt in [
            "forbidden_color",
            "non_brand_color",
            "unknown_color",
            "invalid_color_format",
        ] {
            catalog = catalog.with_fix_type(vt, color.clone());
        }
        catalog = catalog.with_fix_type(
            "low_contrast",
            FixTypeMeta::new("contrast_adjustment", true, Medium, 1200),
        );
        let font = FixTypeMeta::new("font_replacement", true, Medium, 1500);
        for vt in ["forbidden_font", "non_brand_font", "wrong_font_usage"] {
            catalog = catalog.with_fix_type(vt, font.clone());
        }
        catalog = catalog
            .with_fix_type(
                "incorrect_type_scale",
                FixTypeMeta::new("type_scale_adjustment", true, Low, 1000),
            )
            .with_fix_type(
                "incorrect_margins",
                FixTypeMeta::new("margin_adjustment", true, Medium, 2000),
            );
        let reflow = FixTypeMeta::new("text_reflow", true, High, 3000);
        for vt in ["text_cutoff", "text_cutoff_risk"] {
            catalog = catalog.with_fix_type(vt, reflow.clone());
        }
        catalog = catalog
            .with_fix_type(
                "logo_clearspace_violation",
                FixTypeMeta::new("logo_reposition", true, High, 2500),
            )
            .with_fix_type(
                "placeholder_metrics",
                FixTypeMeta::new("placeholder_replacement", false, High, 5000),
            )
            .with_fix_type(
                "missing_alt_text",
                FixTypeMeta::new("alt_text_authoring", false, Medium, 5000),
            );

        catalog
            .with_ordering("color_correction", "contrast_adjustment")
            .with_ordering("font_replacement", "type_scale_adjustment")
            .with_ordering("font_replacement", "text_reflow")
            .with_ordering("type_scale_adjustment", "text_reflow")
            .with_ordering("margin_adjustment", "text_reflow")
            .with_ordering("margin_adjustment", "logo_reposition")
            .with_handler(
                "color_correction",
                FixHandler::automation("replace_color", json!({"target": "nearest_brand_swatch"})),
            )
            .with_handler(
                "contrast_adjustment",
                FixHandler::automation("adjust_contrast", json!({"min_ratio": 4.5})),
            )
            .with_handler(
                "font_replacement",
                FixHandler::automation("replace_font", json!({"target": "brand_font_family"})),
            )
            .with_handler(
                "type_scale_adjustment",
                FixHandler::automation("apply_paragraph_style", json!({"source": "brand_styles"})),
            )
            .with_handler(
                "margin_adjustment",
                FixHandler::automation("set_margins", json!({"source": "master_page"})),
            )
            .with_handler(
                "text_reflow",
                FixHandler::automation("fit_frame_to_content", json!({})),
            )
            .with_handler(
                "logo_reposition",
                FixHandler::automation("enforce_clearspace", json!({})),
            )
            .with_handler(
                "placeholder_replacement",
                FixHandler::manual("Replacement copy must be written by an editor"),
            )
            .with_handler(
                "alt_text_authoring",
                FixHandler::manual("Alternative text must be written by an editor"),
            )
            .with_failure_suggestion(
                "color_correction",
                "Add a swatch existence pre-check before applying color corrections",
            )
            .with_failure_suggestion(
                "font_replacement",
                "Verify the replacement font is installed on the automation host",
            )
            .with_failure_suggestion(
                "text_reflow",
                "Check frame overset state before reflowing; large overflows need a copy edit",
            )
            .with_failure_suggestion(
                "margin_adjustment",
                "Confirm the master page is unlocked before adjusting margins",
            )
            .with_failure_suggestion(
                "logo_reposition",
                "Validate clearspace bounds against page edges before repositioning",
            )
    }

    /// Register the fix type used for a violation type.
    pub fn with_fix_type(mut self, violation_type: &str, meta: FixTypeMeta) -> Self {
        self.by_violation_type
            .insert(violation_type.to_string(), meta);
        self
    }

    /// Require fixes of type `before` to precede overlapping fixes of type `after`.
    pub fn with_ordering(mut self, before: &str, after: &str) -> Self {
        self.ordering.push((before.to_string(), after.to_string()));
        self
    }

    /// Register the handler for a fix type.
    pub fn with_handler(mut self, fix_type: &str, handler: FixHandler) -> Self {
        self.handlers.insert(fix_type.to_string(), handler);
        self
    }

    /// Register the suggestion emitted when a fix type fails repeatedly.
    pub fn with_failure_suggestion(mut self, fix_type: &str, suggestion: &str) -> Self {
        self.failure_suggestions
            .insert(fix_type.to_string(), suggestion.to_string());
        self
    }

    /// Metadata for the fix addressing a violation type.
    ///
    /// Unknown types map to a non-automatable `manual_review` fix.
    pub fn meta_for(&self, violation_type: &str) -> FixTypeMeta {
        self.by_violation_type
            .get(violation_type)
            .cloned()
            .unwrap_or_else(|| FixTypeMeta::new(MANUAL_REVIEW, false, RiskLevel::Medium, 5000))
    }

    /// Handler for a fix type.
    pub fn handler(&self, fix_type: &str) -> Option<&FixHandler> {
        self.handlers.get(fix_type)
    }

    /// Whether a fix type has a metadata and handler entry allowing automation.
    pub fn is_automated(&self, meta: &FixTypeMeta) -> bool {
        meta.automatable
            && self
                .handler(&meta.fix_type)
                .map(FixHandler::is_automated)
                .unwrap_or(false)
    }

    /// Whether fixes of type `before` must precede fixes of type `after`.
    pub fn precedes(&self, before: &str, after: &str) -> bool {
        self.ordering
            .iter()
            .any(|(b, a)| b == before && a == after)
    }

    /// Suggestion for a fix type that failed repeatedly in one session.
    pub fn failure_suggestion(&self, fix_type: &str) -> String {
        self.failure_suggestions
            .get(fix_type)
            .cloned()
            .unwrap_or_else(|| {
                format!(
                    "Inspect backend rejections for {} and consider handling it manually",
                    fix_type
                )
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::remediation::types::Severity;
    use std::io::Write;

    #[test]
    fn test_builtin_cause_table_covers_color_types() {
        let table = CauseTable::builtin();
        let entry = table.get("forbidden_color").unwrap();
        assert!(entry.expected_impact_percent > 0.0);
        assert!(table.get("placeholder_metrics").is_none());
    }

    #[test]
    fn test_load_missing_file_yields_empty_table() {
        let table = CauseTable::load(Some(Path::new("/nonexistent/causes.json")));
        assert!(table.is_empty());
    }

    #[test]
    fn test_load_malformed_file_yields_empty_table() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, "{{ not json").unwrap();

        let table = CauseTable::load(Some(file.path()));
        assert!(table.is_empty());
    }

    #[test]
    fn test_load_custom_table() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"{{"bad_bleed": {{"likely_cause": "Export preset", "suggested_fix": "Fix preset", "expected_impact_percent": 90}}}}"#
        )
        .unwrap();

        let table = CauseTable::load(Some(file.path()));
        assert_eq!(table.len(), 1);
        assert_eq!(table.get("bad_bleed").unwrap().likely_cause, "Export preset");
    }

    #[test]
    fn test_unknown_violation_type_maps_to_manual_review() {
        let catalog = FixCatalog::builtin();
        let meta = catalog.meta_for("mystery");
        assert_eq!(meta.fix_type, MANUAL_REVIEW);
        assert!(!catalog.is_automated(&meta));
    }

    #[test]
    fn test_manual_handler_is_not_automated() {
        let catalog = FixCatalog::builtin();
        let meta = catalog.meta_for("placeholder_metrics");
        assert!(!catalog.is_automated(&meta));

        let meta = catalog.meta_for("forbidden_color");
        assert!(catalog.is_automated(&meta));
    }

    #[test]
    fn test_handler_params_merge_defaults() {
        let catalog = FixCatalog::builtin();
        let violation = Violation::new(
            "v1",
            "forbidden_color",
            Severity::Critical,
            "page:1/frame:hero",
            "Pure red",
        );
        let params = catalog
            .handler("color_correction")
            .unwrap()
            .params_for(&violation)
            .unwrap();

        assert_eq!(params["operation"], "replace_color");
        assert_eq!(params["target"], "nearest_brand_swatch");
        assert_eq!(params["location"], "page:1/frame:hero");
    }

    #[test]
    fn test_ordering_rules() {
        let catalog = FixCatalog::builtin();
        assert!(catalog.precedes("color_correction", "contrast_adjustment"));
        assert!(!catalog.precedes("contrast_adjustment", "color_correction"));
    }

    #[test]
    fn test_failure_suggestion_fallback() {
        let catalog = FixCatalog::builtin();
        assert!(catalog
            .failure_suggestion("color_correction")
            .contains("pre-check"));
        assert!(catalog.failure_suggestion("odd_fix").contains("odd_fix"));
    }
}
