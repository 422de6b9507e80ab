//! Materializes tabular source files into the store
//!
//! One file per table, table name = file base name. Each table is replaced
//! wholesale, so loading the same directory twice leaves the store exactly as
//! loading it once. A file that fails to load is reported and skipped.

use duckdb::Connection;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{info, warn};

use crate::store::StoreDescriptor;

#[derive(Debug, Error)]
pub enum LoaderError {
    #[error("Cannot read source directory {path}: {source}")]
    SourceDir {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Cannot open store: {0}")]
    Store(#[from] duckdb::Error),
}

/// One source file that could not be loaded
#[derive(Debug, Clone, Error)]
#[error("Failed to load {path}: {message}")]
pub struct SourceLoadError {
    pub path: PathBuf,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoadedTable {
    pub table: String,
    pub source: PathBuf,
    pub rows: u64,
}

#[derive(Debug, Default)]
pub struct LoadReport {
    pub loaded: Vec<LoadedTable>,
    pub failed: Vec<SourceLoadError>,
}

impl LoadReport {
    pub fn is_complete(&self) -> bool {
        self.failed.is_empty()
    }
}

pub struct CatalogLoader {
    extensions: Vec<String>,
}

impl CatalogLoader {
    pub fn new() -> Self {
        Self {
            extensions: vec!["csv".to_string(), "tsv".to_string()],
        }
    }

    /// Open the store read-write, load every source file, close the store
    pub fn materialize(
        &self,
        source_dir: &Path,
        store: &StoreDescriptor,
    ) -> Result<LoadReport, LoaderError> {
        let conn = store.open_read_write()?;
        self.materialize_into(source_dir, &conn)
    }

    pub fn materialize_into(
        &self,
        source_dir: &Path,
        conn: &Connection,
    ) -> Result<LoadReport, LoaderError> {
        let mut report = LoadReport::default();

        for path in self.source_files(source_dir)? {
            match load_file(conn, &path) {
                Ok(loaded) => {
                    info!(table = %loaded.table, rows = loaded.rows, "Loaded table");
                    report.loaded.push(loaded);
                }
                Err(e) => {
                    warn!("{}", e);
                    report.failed.push(e);
                }
            }
        }

        Ok(report)
    }

    /// Tabular files in `dir`, sorted by file name
    fn source_files(&self, dir: &Path) -> Result<Vec<PathBuf>, LoaderError> {
        let entries = std::fs::read_dir(dir).map_err(|source| LoaderError::SourceDir {
            path: dir.to_path_buf(),
            source,
        })?;

        let mut files: Vec<PathBuf> = entries
            .filter_map(|entry| entry.ok().map(|e| e.path()))
            .filter(|path| path.is_file())
            .filter(|path| {
                let hidden = path
                    .file_name()
                    .and_then(|n| n.to_str())
                    .map(|n| n.starts_with('.'))
                    .unwrap_or(true);
                let tabular = path
                    .extension()
                    .and_then(|e| e.to_str())
                    .map(|e| self.extensions.iter().any(|x| x.eq_ignore_ascii_case(e)))
                    .unwrap_or(false);
                !hidden && tabular
            })
            .collect();

        files.sort();
        Ok(files)
    }
}

impl Default for CatalogLoader {
    fn default() -> Self {
        Self::new()
    }
}

fn is_table_name(name: &str) -> bool {
    let mut chars = name.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

fn load_file(conn: &Connection, path: &Path) -> Result<LoadedTable, SourceLoadError> {
    let fail = |message: String| SourceLoadError {
        path: path.to_path_buf(),
        message,
    };

    let table = path
        .file_stem()
        .and_then(|s| s.to_str())
        .ok_or_else(|| fail("file name is not valid UTF-8".to_string()))?;

    if !is_table_name(table) {
        return Err(fail(format!("'{}' is not usable as a table name", table)));
    }

    let source = path.to_string_lossy().replace('\'', "''");
    let create = format!(
        "CREATE OR REPLACE TABLE \"{}\" AS SELECT * FROM read_csv_auto('{}', header = true)",
        table, source
    );
    conn.execute_batch(&create).map_err(|e| fail(e.to_string()))?;

    let count_query = format!("SELECT COUNT(*) FROM \"{}\"", table);
    let rows: i64 = conn
        .query_row(&count_query, [], |row| row.get(0))
        .map_err(|e| fail(e.to_string()))?;

    Ok(LoadedTable {
        table: table.to_string(),
        source: path.to_path_buf(),
        rows: rows.max(0) as u64,
    })
}
