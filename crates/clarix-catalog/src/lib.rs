//! Schema catalog for prompting
//!
//! Holds the table/column description the language model is shown and
//! renders it as plain text. The descriptor is loaded once at startup from a
//! JSON or YAML document and is immutable afterwards.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};
use thiserror::Error;

mod drift;

pub use drift::{diff, SchemaDrift};

#[derive(Debug, Error)]
pub enum SchemaLoadError {
    #[error("Failed to read schema file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse JSON schema: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Failed to parse YAML schema: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("Malformed schema: {0}")]
    Malformed(String),
}

/// One column of a table, as shown to the model
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnSpec {
    #[serde(alias = "name")]
    pub column: String,

    #[serde(rename = "type")]
    pub data_type: String,
}

impl ColumnSpec {
    pub fn new(column: impl Into<String>, data_type: impl Into<String>) -> Self {
        Self {
            column: column.into(),
            data_type: data_type.into(),
        }
    }
}

/// Table name -> ordered columns
///
/// Tables are kept sorted by name so that rendering never depends on the
/// order keys happened to appear in the source document. Column order is the
/// document order.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SchemaDescriptor {
    tables: BTreeMap<String, Vec<ColumnSpec>>,
}

impl SchemaDescriptor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add (or replace) a table
    pub fn insert_table(&mut self, name: impl Into<String>, columns: Vec<ColumnSpec>) {
        self.tables.insert(name.into(), columns);
    }

    pub fn table(&self, name: &str) -> Option<&[ColumnSpec]> {
        self.tables.get(name).map(Vec::as_slice)
    }

    pub fn tables(&self) -> impl Iterator<Item = (&str, &[ColumnSpec])> {
        self.tables
            .iter()
            .map(|(name, columns)| (name.as_str(), columns.as_slice()))
    }

    pub fn table_names(&self) -> impl Iterator<Item = &str> {
        self.tables.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.tables.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tables.is_empty()
    }

    /// Check the structural rules a usable schema must satisfy
    pub fn validate(&self) -> Result<(), SchemaLoadError> {
        if self.tables.is_empty() {
            return Err(SchemaLoadError::Malformed("schema defines no tables".to_string()));
        }

        for (table, columns) in &self.tables {
            if table.trim().is_empty() {
                return Err(SchemaLoadError::Malformed("blank table name".to_string()));
            }
            if columns.is_empty() {
                return Err(SchemaLoadError::Malformed(format!(
                    "table '{}' has no columns",
                    table
                )));
            }

            let mut seen = std::collections::HashSet::new();
            for col in columns {
                if col.column.trim().is_empty() {
                    return Err(SchemaLoadError::Malformed(format!(
                        "table '{}' has a column with a blank name",
                        table
                    )));
                }
                if col.data_type.trim().is_empty() {
                    return Err(SchemaLoadError::Malformed(format!(
                        "column '{}.{}' has a blank type",
                        table, col.column
                    )));
                }
                if !seen.insert(col.column.as_str()) {
                    return Err(SchemaLoadError::Malformed(format!(
                        "column '{}.{}' is declared twice",
                        table, col.column
                    )));
                }
            }
        }

        Ok(())
    }
}

/// Plain-text rendering of a [`SchemaDescriptor`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenderedSchema(String);

impl RenderedSchema {
    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Display for RenderedSchema {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Render a descriptor: one block per table, one `name type` line per column
pub fn render(descriptor: &SchemaDescriptor) -> RenderedSchema {
    let blocks: Vec<String> = descriptor
        .tables()
        .map(|(table, columns)| {
            let mut block = format!("Table: {}\n", table);
            for col in columns {
                block.push_str(&format!("  {} {}\n", col.column, col.data_type));
            }
            block
        })
        .collect();

    RenderedSchema(blocks.join("\n"))
}

/// Validated, immutable schema description
#[derive(Debug, Clone)]
pub struct SchemaCatalog {
    descriptor: SchemaDescriptor,
}

impl SchemaCatalog {
    /// Load from a `.json`, `.yaml` or `.yml` document
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, SchemaLoadError> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path).map_err(|source| SchemaLoadError::Io {
            path: path.to_path_buf(),
            source,
        })?;

        let is_yaml = matches!(
            path.extension().and_then(|e| e.to_str()),
            Some("yaml") | Some("yml")
        );

        if is_yaml {
            Self::from_yaml_str(&contents)
        } else {
            Self::from_json_str(&contents)
        }
    }

    pub fn from_json_str(contents: &str) -> Result<Self, SchemaLoadError> {
        let descriptor: SchemaDescriptor = serde_json::from_str(contents)?;
        Self::from_descriptor(descriptor)
    }

    pub fn from_yaml_str(contents: &str) -> Result<Self, SchemaLoadError> {
        let descriptor: SchemaDescriptor = serde_yaml::from_str(contents)?;
        Self::from_descriptor(descriptor)
    }

    pub fn from_descriptor(descriptor: SchemaDescriptor) -> Result<Self, SchemaLoadError> {
        descriptor.validate()?;
        Ok(Self { descriptor })
    }

    pub fn describe(&self) -> &SchemaDescriptor {
        &self.descriptor
    }

    /// Rendered fresh on every call, so the text can never lag the descriptor
    pub fn render(&self) -> RenderedSchema {
        render(&self.descriptor)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"{
        "prizm_segments": [
            {"column": "segment_code", "type": "VARCHAR"},
            {"column": "segment_name", "type": "VARCHAR"}
        ],
        "hitcount": [
            {"column": "hit_date", "type": "DATE"},
            {"name": "action_type", "type": "VARCHAR"},
            {"column": "hits", "type": "INTEGER"}
        ]
    }"#;

    #[test]
    fn test_render_layout() {
        let catalog = SchemaCatalog::from_json_str(SAMPLE).unwrap();
        let text = catalog.render();

        let expected = "Table: hitcount\n  hit_date DATE\n  action_type VARCHAR\n  hits INTEGER\n\n\
                        Table: prizm_segments\n  segment_code VARCHAR\n  segment_name VARCHAR\n";
        assert_eq!(text.as_str(), expected);
    }

    #[test]
    fn test_render_is_deterministic() {
        let catalog = SchemaCatalog::from_json_str(SAMPLE).unwrap();
        let first = catalog.render();
        for _ in 0..10 {
            assert_eq!(catalog.render(), first);
        }

        // Same schema, keys in a different order in the source document
        let reordered = r#"{
            "hitcount": [
                {"column": "hit_date", "type": "DATE"},
                {"column": "action_type", "type": "VARCHAR"},
                {"column": "hits", "type": "INTEGER"}
            ],
            "prizm_segments": [
                {"column": "segment_code", "type": "VARCHAR"},
                {"column": "segment_name", "type": "VARCHAR"}
            ]
        }"#;
        let other = SchemaCatalog::from_json_str(reordered).unwrap();
        assert_eq!(other.render(), first);
    }

    #[test]
    fn test_yaml_document() {
        let yaml = r#"
hitcount:
  - column: hit_date
    type: DATE
  - column: hits
    type: INTEGER
"#;
        let catalog = SchemaCatalog::from_yaml_str(yaml).unwrap();
        assert_eq!(catalog.describe().len(), 1);
        assert_eq!(catalog.describe().table("hitcount").unwrap()[1].data_type, "INTEGER");
    }

    #[test]
    fn test_malformed_documents_rejected() {
        assert!(matches!(
            SchemaCatalog::from_json_str("{}"),
            Err(SchemaLoadError::Malformed(_))
        ));
        assert!(matches!(
            SchemaCatalog::from_json_str(r#"{"t": []}"#),
            Err(SchemaLoadError::Malformed(_))
        ));
        assert!(matches!(
            SchemaCatalog::from_json_str(
                r#"{"t": [{"column": "a", "type": "INT"}, {"column": "a", "type": "INT"}]}"#
            ),
            Err(SchemaLoadError::Malformed(_))
        ));
        assert!(matches!(
            SchemaCatalog::from_json_str(r#"{"t": [{"column": "a", "type": " "}]}"#),
            Err(SchemaLoadError::Malformed(_))
        ));
        assert!(matches!(
            SchemaCatalog::from_json_str(r#"["not", "a", "map"]"#),
            Err(SchemaLoadError::Json(_))
        ));
    }

    #[test]
    fn test_missing_file_fails() {
        let dir = tempfile::tempdir().unwrap();
        let result = SchemaCatalog::load(dir.path().join("nope.json"));
        assert!(matches!(result, Err(SchemaLoadError::Io { .. })));
    }

    #[test]
    fn test_load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("database_schema.json");
        std::fs::write(&path, SAMPLE).unwrap();

        let catalog = SchemaCatalog::load(&path).unwrap();
        let names: Vec<&str> = catalog.describe().table_names().collect();
        assert_eq!(names, vec!["hitcount", "prizm_segments"]);
    }
}
