//! End-to-end store tests: materialize CSV sources, introspect, query
//!
//! Every test works on its own temporary directory and DuckDB file.

use clarix_catalog::{diff, ColumnSpec, SchemaDescriptor};
use clarix_duck::{introspect, CatalogLoader, ExecutionError, QueryExecutor, StoreDescriptor};
use serde_json::json;
use std::path::Path;

fn write_sources(dir: &Path) {
    std::fs::write(
        dir.join("hitcount.csv"),
        "hit_date,site_domain,action_type,segment_code,hits\n\
         2025-01-05,RedCrossBlood.org,signup,01,14\n\
         2025-01-19, redcrossblood.org ,signup,02,9\n\
         2025-01-22,RedCrossBlood.org,lead,01,30\n\
         2025-02-03,example.com,signup,01,4\n",
    )
    .unwrap();
    std::fs::write(
        dir.join("prizm_segments.csv"),
        "segment_code,segment_name\n01,Upper Crust\n02,Networked Neighbors\n",
    )
    .unwrap();
}

fn snapshot(store: &StoreDescriptor) -> (SchemaDescriptor, serde_json::Value) {
    let schema = introspect::describe_store(store).unwrap();
    let rows = QueryExecutor::new(store.clone())
        .execute(
            "SELECT hitcount.site_domain, hitcount.action_type, hitcount.hits \
             FROM hitcount ORDER BY hitcount.hit_date",
        )
        .unwrap()
        .to_json();
    (schema, rows)
}

#[test]
fn test_materialize_is_idempotent() {
    let dir = tempfile::tempdir().unwrap();
    let src = dir.path().join("data");
    std::fs::create_dir(&src).unwrap();
    write_sources(&src);
    let store = StoreDescriptor::new(dir.path().join("clarix.duckdb"));
    let loader = CatalogLoader::new();

    let first = loader.materialize(&src, &store).unwrap();
    assert!(first.is_complete());
    assert_eq!(first.loaded.len(), 2);
    let once = snapshot(&store);

    let second = loader.materialize(&src, &store).unwrap();
    assert_eq!(first.loaded, second.loaded);
    let twice = snapshot(&store);

    assert_eq!(once, twice);
    assert_eq!(once.1["row_count"], 4);
}

#[test]
fn test_materialize_replaces_existing_table() {
    let dir = tempfile::tempdir().unwrap();
    let src = dir.path().join("data");
    std::fs::create_dir(&src).unwrap();
    write_sources(&src);
    let store = StoreDescriptor::new(dir.path().join("clarix.duckdb"));
    let loader = CatalogLoader::new();

    loader.materialize(&src, &store).unwrap();
    std::fs::write(
        src.join("prizm_segments.csv"),
        "segment_code,segment_name\n03,Movers & Shakers\n",
    )
    .unwrap();
    loader.materialize(&src, &store).unwrap();

    let result = QueryExecutor::new(store)
        .execute("SELECT prizm_segments.segment_name FROM prizm_segments")
        .unwrap();
    assert_eq!(result.row_count(), 1);
    assert_eq!(result.rows[0]["segment_name"], json!("Movers & Shakers"));
}

#[test]
fn test_substring_filter_tolerates_padding_and_case() {
    let dir = tempfile::tempdir().unwrap();
    let src = dir.path().join("data");
    std::fs::create_dir(&src).unwrap();
    write_sources(&src);
    let store = StoreDescriptor::new(dir.path().join("clarix.duckdb"));
    CatalogLoader::new().materialize(&src, &store).unwrap();

    let result = QueryExecutor::new(store)
        .execute(
            "SELECT SUM(hitcount.hits) AS signups FROM hitcount \
             WHERE LOWER(TRIM(hitcount.action_type)) LIKE LOWER('%signup%') \
             AND LOWER(TRIM(hitcount.site_domain)) LIKE LOWER('%RedCrossBlood.org%') \
             AND hitcount.hit_date >= DATE '2025-01-01' AND hitcount.hit_date < DATE '2025-02-01'",
        )
        .unwrap();

    assert_eq!(result.columns, vec!["signups"]);
    assert_eq!(result.rows[0]["signups"], json!(23));
}

#[test]
fn test_introspection_drift_against_configured_schema() {
    let dir = tempfile::tempdir().unwrap();
    let src = dir.path().join("data");
    std::fs::create_dir(&src).unwrap();
    write_sources(&src);
    let store = StoreDescriptor::new(dir.path().join("clarix.duckdb"));
    CatalogLoader::new().materialize(&src, &store).unwrap();

    let actual = introspect::describe_store(&store).unwrap();
    let hit_date = &actual.table("hitcount").unwrap()[0];
    assert_eq!(hit_date.column, "hit_date");
    assert_eq!(hit_date.data_type, "DATE");

    let mut configured = SchemaDescriptor::new();
    configured.insert_table(
        "hitcount",
        vec![
            ColumnSpec::new("hit_date", "DATE"),
            ColumnSpec::new("dma_name", "VARCHAR"),
        ],
    );
    let drift = diff(&configured, &actual);
    assert_eq!(drift.len(), 2); // missing dma_name, undocumented prizm_segments
}

#[test]
fn test_date_columns_come_back_as_iso_text() {
    let dir = tempfile::tempdir().unwrap();
    let src = dir.path().join("data");
    std::fs::create_dir(&src).unwrap();
    write_sources(&src);
    let store = StoreDescriptor::new(dir.path().join("clarix.duckdb"));
    CatalogLoader::new().materialize(&src, &store).unwrap();

    let result = QueryExecutor::new(store)
        .execute("SELECT MAX(hitcount.hit_date) AS latest FROM hitcount")
        .unwrap();
    assert_eq!(result.rows[0]["latest"], json!("2025-02-03"));
}

#[test]
fn test_failed_statement_returns_no_rows() {
    let dir = tempfile::tempdir().unwrap();
    let src = dir.path().join("data");
    std::fs::create_dir(&src).unwrap();
    write_sources(&src);
    let store = StoreDescriptor::new(dir.path().join("clarix.duckdb"));
    CatalogLoader::new().materialize(&src, &store).unwrap();

    let err = QueryExecutor::new(store)
        .execute("SELECT hitcount.no_such_column FROM hitcount")
        .unwrap_err();
    match err {
        ExecutionError::Execution { cause } => assert!(!cause.is_empty()),
        other => panic!("expected execution error, got {:?}", other),
    }
}
