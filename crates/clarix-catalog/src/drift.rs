//! Differences between the configured schema and what the store holds

use crate::SchemaDescriptor;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SchemaDrift {
    #[error("table '{table}' is described but not present in the store")]
    MissingTable { table: String },

    #[error("column '{table}.{column}' is described but not present in the store")]
    MissingColumn { table: String, column: String },

    #[error("column '{table}.{column}' is described as {expected} but the store has {actual}")]
    TypeMismatch {
        table: String,
        column: String,
        expected: String,
        actual: String,
    },

    #[error("table '{table}' exists in the store but is not described")]
    UndocumentedTable { table: String },
}

/// Compare a configured descriptor against one read back from the store
///
/// Type names are compared case-insensitively.
pub fn diff(configured: &SchemaDescriptor, actual: &SchemaDescriptor) -> Vec<SchemaDrift> {
    let mut drift = Vec::new();

    for (table, columns) in configured.tables() {
        let Some(actual_columns) = actual.table(table) else {
            drift.push(SchemaDrift::MissingTable {
                table: table.to_string(),
            });
            continue;
        };

        for col in columns {
            match actual_columns.iter().find(|c| c.column == col.column) {
                None => drift.push(SchemaDrift::MissingColumn {
                    table: table.to_string(),
                    column: col.column.clone(),
                }),
                Some(found) if !found.data_type.eq_ignore_ascii_case(&col.data_type) => {
                    drift.push(SchemaDrift::TypeMismatch {
                        table: table.to_string(),
                        column: col.column.clone(),
                        expected: col.data_type.clone(),
                        actual: found.data_type.clone(),
                    })
                }
                Some(_) => {}
            }
        }
    }

    for table in actual.table_names() {
        if configured.table(table).is_none() {
            drift.push(SchemaDrift::UndocumentedTable {
                table: table.to_string(),
            });
        }
    }

    drift
}
