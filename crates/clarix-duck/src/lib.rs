//! DuckDB side of the pipeline
//!
//! - [`CatalogLoader`] materializes tabular source files into the store
//! - [`QueryExecutor`] runs one synthesized statement per connection and
//!   normalizes the rows
//! - [`introspect`] reads the store's own view of its tables

mod executor;
pub mod introspect;
mod loader;
pub mod normalize;
mod store;

pub use executor::{ExecutionBudget, ExecutionError, QueryExecutor, QueryResult, ScopedConnection};
pub use loader::{CatalogLoader, LoadReport, LoadedTable, LoaderError, SourceLoadError};
pub use store::StoreDescriptor;
