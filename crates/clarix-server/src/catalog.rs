//! Startup preparation: schema, business rules and the materialized store

use anyhow::{Context, Result};
use clarix_catalog::{diff, SchemaCatalog};
use clarix_duck::{introspect, CatalogLoader, LoadReport, StoreDescriptor};
use clarix_prompt::BusinessRuleSet;
use std::path::Path;
use tracing::{info, warn};

use crate::config::Config;

/// Load the schema document; the server cannot start without one
pub fn load_schema(config: &Config) -> Result<SchemaCatalog> {
    let catalog = SchemaCatalog::load(&config.schema.path)
        .with_context(|| format!("loading schema from {}", config.schema.path))?;

    info!(
        path = %config.schema.path,
        tables = catalog.describe().len(),
        "Schema loaded"
    );
    Ok(catalog)
}

/// Built-in rule set unless `rules.path` points at an override
pub fn load_rules(config: &Config) -> Result<BusinessRuleSet> {
    let rules = match &config.rules.path {
        Some(path) => BusinessRuleSet::load(path)
            .with_context(|| format!("loading business rules from {}", path))?,
        None => BusinessRuleSet::builtin(),
    };

    info!(
        version = %rules.version,
        fingerprint = %rules.fingerprint(),
        anchor_date = %rules.anchor_date,
        "Business rules loaded"
    );
    Ok(rules)
}

/// Refresh the store from the source directory
pub fn materialize(config: &Config, store: &StoreDescriptor) -> Result<LoadReport> {
    let source_dir = Path::new(&config.store.source_dir);
    let report = CatalogLoader::new()
        .materialize(source_dir, store)
        .with_context(|| format!("materializing {}", source_dir.display()))?;

    if !report.is_complete() {
        let skipped: Vec<String> = report
            .failed
            .iter()
            .map(|f| f.path.display().to_string())
            .collect();
        warn!(skipped = ?skipped, "Some source files were not materialized");
    }
    info!(
        loaded = report.loaded.len(),
        failed = report.failed.len(),
        "Materialization finished"
    );

    Ok(report)
}

/// Warn about every difference between the configured schema and the store
///
/// Returns the number of differences. Drift does not stop the server; the
/// model keeps seeing the configured schema.
pub fn check_drift(catalog: &SchemaCatalog, store: &StoreDescriptor) -> Result<usize> {
    let actual = introspect::describe_store(store).context("introspecting store")?;
    let drift = diff(catalog.describe(), &actual);

    for item in &drift {
        warn!("Schema drift: {}", item);
    }
    if drift.is_empty() {
        info!("Configured schema matches the store");
    }

    Ok(drift.len())
}
