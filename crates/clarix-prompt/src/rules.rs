//! Business rules injected verbatim into every prompt
//!
//! The rule set is data: vocabulary mappings, the "today" anchor, join paths
//! and filter conventions. Changing any of it changes the SQL the model
//! writes for every question, so each change must bump `version`.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::path::Path;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum RuleSetError {
    #[error("Failed to read rule set: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to parse rule set YAML: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("Invalid rule set: {0}")]
    Invalid(String),
}

/// User-facing phrases that must be translated to one stored literal
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VocabularyRule {
    /// Qualified column the literal lives in, e.g. `hitcount.action_type`
    pub column: String,
    pub phrases: Vec<String>,
    pub literal: String,
}

/// A join the model must use instead of guessing foreign keys
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JoinPath {
    /// `table.column`
    pub left: String,
    /// `table.column`
    pub right: String,
}

impl JoinPath {
    fn table(side: &str) -> &str {
        side.split('.').next().unwrap_or(side)
    }
}

/// How categorical text filters are to be written
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TextFilterConvention {
    /// `LOWER(TRIM(col)) LIKE LOWER('%value%')`. Tolerates padding and case
    /// noise, but also matches longer values containing the literal.
    #[default]
    Substring,
    /// Plain equality on the stored literal
    Exact,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BusinessRuleSet {
    pub version: String,
    /// Stand-in for "today" in relative time phrases
    pub anchor_date: NaiveDate,
    #[serde(default)]
    pub vocabulary: Vec<VocabularyRule>,
    #[serde(default)]
    pub join_paths: Vec<JoinPath>,
    #[serde(default)]
    pub text_filter: TextFilterConvention,
    #[serde(default = "default_true")]
    pub prefer_qualified_columns: bool,
    #[serde(default)]
    pub notes: Vec<String>,
}

fn default_true() -> bool {
    true
}

const BUILTIN_ANCHOR_DATE: &str = "2025-02-28";

fn builtin_anchor_date() -> NaiveDate {
    BUILTIN_ANCHOR_DATE
        .parse()
        .expect("built-in anchor date is an ISO date")
}

impl BusinessRuleSet {
    /// The rule set shipped with the server
    pub fn builtin() -> Self {
        let action = |phrases: &[&str], literal: &str| VocabularyRule {
            column: "hitcount.action_type".to_string(),
            phrases: phrases.iter().map(|p| p.to_string()).collect(),
            literal: literal.to_string(),
        };

        Self {
            version: "2025.02-1".to_string(),
            anchor_date: builtin_anchor_date(),
            vocabulary: vec![
                action(&["lead", "leads"], "lead"),
                action(&["signup", "signups", "sign up", "sign ups", "sign-ups"], "signup"),
                action(&["registration", "registrations", "register"], "registration"),
                action(&["install", "installs", "installation", "installations"], "install"),
            ],
            join_paths: vec![
                JoinPath {
                    left: "hitcount.segment_code".to_string(),
                    right: "prizm_segments.segment_code".to_string(),
                },
                JoinPath {
                    left: "pred_actual_data_combined.segment_code".to_string(),
                    right: "prizm_segments.segment_code".to_string(),
                },
            ],
            text_filter: TextFilterConvention::Substring,
            prefer_qualified_columns: true,
            notes: vec![
                "In the pred_actual_data_combined table, rows whose value_type is 'actual' are past \
                 data points used to train the rows whose value_type is 'predicted' (future)."
                    .to_string(),
                "Questions comparing predicted and actual figures should read both value types \
                 from pred_actual_data_combined and group by value_type."
                    .to_string(),
            ],
        }
    }

    /// Load a rule set override from YAML
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, RuleSetError> {
        let contents = std::fs::read_to_string(path)?;
        Self::from_yaml_str(&contents)
    }

    pub fn from_yaml_str(contents: &str) -> Result<Self, RuleSetError> {
        let rules: BusinessRuleSet = serde_yaml::from_str(contents)?;
        rules.validate()?;
        Ok(rules)
    }

    pub fn validate(&self) -> Result<(), RuleSetError> {
        if self.version.trim().is_empty() {
            return Err(RuleSetError::Invalid("version must not be blank".to_string()));
        }

        for rule in &self.vocabulary {
            if rule.column.trim().is_empty() || rule.literal.trim().is_empty() {
                return Err(RuleSetError::Invalid(format!(
                    "vocabulary entry {:?} needs both a column and a literal",
                    rule.phrases
                )));
            }
            if rule.phrases.iter().all(|p| p.trim().is_empty()) {
                return Err(RuleSetError::Invalid(format!(
                    "vocabulary entry for '{}' has no phrases",
                    rule.literal
                )));
            }
        }

        for join in &self.join_paths {
            for side in [&join.left, &join.right] {
                let qualified = side
                    .split_once('.')
                    .map(|(t, c)| !t.is_empty() && !c.is_empty())
                    .unwrap_or(false);
                if !qualified {
                    return Err(RuleSetError::Invalid(format!(
                        "join side '{}' must be written table.column",
                        side
                    )));
                }
            }
        }

        Ok(())
    }

    /// Text block embedded verbatim in the prompt
    pub fn render(&self) -> String {
        let mut out = format!("IMPORTANT RULES (version {}):\n", self.version);

        if !self.vocabulary.is_empty() {
            out.push_str("\nCategorical values (the stored literals are case sensitive):\n");
            for rule in &self.vocabulary {
                let phrases: Vec<String> = rule
                    .phrases
                    .iter()
                    .filter(|p| !p.trim().is_empty())
                    .map(|p| format!("\"{}\"", p))
                    .collect();
                out.push_str(&format!(
                    "  - If the request mentions {}, filter {} on the literal '{}'.\n",
                    phrases.join(" or "),
                    rule.column,
                    rule.literal
                ));
            }
        }

        out.push_str(&format!(
            "\nCurrent date:\n  - Treat {} as today. Resolve relative time phrases such as \
             \"last month\", \"next week\" or \"next month\" against this date.\n",
            self.anchor_date.format("%Y-%m-%d")
        ));

        if !self.join_paths.is_empty() {
            out.push_str("\nJoin paths (use these, do not infer other relationships):\n");
            for join in &self.join_paths {
                out.push_str(&format!(
                    "  - Join {} to {} on {} = {}.\n",
                    JoinPath::table(&join.left),
                    JoinPath::table(&join.right),
                    join.left,
                    join.right
                ));
            }
        }

        out.push_str("\nText filters:\n");
        match self.text_filter {
            TextFilterConvention::Substring => out.push_str(
                "  - Stored text may carry stray whitespace or inconsistent casing. Write every \
                 categorical text filter, including the literals above, as \
                 LOWER(TRIM(table.column)) LIKE LOWER('%value%') rather than an equality test.\n",
            ),
            TextFilterConvention::Exact => out.push_str(
                "  - Compare categorical text with exact equality on the stored literal.\n",
            ),
        }

        if self.prefer_qualified_columns {
            out.push_str(
                "\nColumn references:\n  - Always write fully qualified column references \
                 (table.column). Do not introduce table aliases.\n",
            );
        }

        if !self.notes.is_empty() {
            out.push_str("\nNotes:\n");
            for note in &self.notes {
                out.push_str(&format!("  - {}\n", note));
            }
        }

        out
    }

    /// SHA-256 of the rendered block, hex encoded
    pub fn fingerprint(&self) -> String {
        let digest = Sha256::digest(self.render().as_bytes());
        format!("{:x}", digest)
    }
}

impl Default for BusinessRuleSet {
    fn default() -> Self {
        Self::builtin()
    }
}
