//! Read the store's own table/column view
//!
//! Used at startup to compare the configured schema with what was actually
//! materialized.

use clarix_catalog::{ColumnSpec, SchemaDescriptor};
use duckdb::{Connection, Result as DuckResult};

use crate::store::StoreDescriptor;

/// Tables of the `main` schema with their columns in ordinal order
pub fn describe_connection(conn: &Connection) -> DuckResult<SchemaDescriptor> {
    let mut stmt = conn.prepare(
        "SELECT table_name, column_name, data_type
         FROM information_schema.columns
         WHERE table_schema = 'main'
         ORDER BY table_name, ordinal_position",
    )?;

    let columns: Vec<(String, String, String)> = stmt
        .query_map([], |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)))?
        .collect::<DuckResult<Vec<_>>>()?;

    let mut descriptor = SchemaDescriptor::new();
    let mut current: Option<(String, Vec<ColumnSpec>)> = None;

    for (table, column, data_type) in columns {
        match current.as_mut() {
            Some((name, cols)) if *name == table => cols.push(ColumnSpec::new(column, data_type)),
            _ => {
                if let Some((name, cols)) = current.take() {
                    descriptor.insert_table(name, cols);
                }
                current = Some((table, vec![ColumnSpec::new(column, data_type)]));
            }
        }
    }
    if let Some((name, cols)) = current {
        descriptor.insert_table(name, cols);
    }

    Ok(descriptor)
}

pub fn describe_store(store: &StoreDescriptor) -> DuckResult<SchemaDescriptor> {
    let conn = store.open_read_write()?;
    describe_connection(&conn)
}
