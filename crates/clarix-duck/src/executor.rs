//! Runs one synthesized statement against the store

use duckdb::{Connection, InterruptHandle};
use serde::Serialize;
use serde_json::{json, Map, Value};
use std::collections::HashSet;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, warn};

use crate::normalize::normalize;
use crate::store::StoreDescriptor;

#[derive(Debug, Error)]
pub enum ExecutionError {
    /// The store rejected the statement
    #[error("Execution failed: {cause}")]
    Execution { cause: String },

    /// The store could not be reached (or did not answer in time)
    #[error("Store connection failed: {0}")]
    Connection(String),

    #[error("Budget exceeded: {0}")]
    BudgetExceeded(String),
}

impl ExecutionError {
    fn execution(err: duckdb::Error) -> Self {
        ExecutionError::Execution {
            cause: err.to_string(),
        }
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct ExecutionBudget {
    pub max_rows: Option<usize>,
}

/// Rows of one statement; every row carries exactly the keys in `columns`
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct QueryResult {
    pub columns: Vec<String>,
    pub rows: Vec<Map<String, Value>>,
}

impl QueryResult {
    pub fn row_count(&self) -> usize {
        self.rows.len()
    }

    pub fn to_json(&self) -> Value {
        json!({
            "columns": self.columns,
            "rows": self.rows,
            "row_count": self.rows.len()
        })
    }
}

pub struct QueryExecutor {
    store: StoreDescriptor,
    budget: ExecutionBudget,
}

impl QueryExecutor {
    pub fn new(store: StoreDescriptor) -> Self {
        Self {
            store,
            budget: ExecutionBudget::default(),
        }
    }

    pub fn with_budget(mut self, budget: ExecutionBudget) -> Self {
        self.budget = budget;
        self
    }

    pub fn store(&self) -> &StoreDescriptor {
        &self.store
    }

    /// Acquire the connection for one invocation
    pub fn open(&self) -> Result<ScopedConnection, ExecutionError> {
        let conn = self.store.open_for_query().map_err(|e| {
            ExecutionError::Connection(format!("{}: {}", self.store.path().display(), e))
        })?;
        debug!(database = %self.store.path().display(), "store connection opened");

        Ok(ScopedConnection {
            conn,
            budget: self.budget,
        })
    }

    /// Open, execute, drain and close
    pub fn execute(&self, sql: &str) -> Result<QueryResult, ExecutionError> {
        self.open()?.run(sql)
    }
}

/// A connection that lives for exactly one statement
///
/// [`ScopedConnection::run`] consumes the connection and closes it on every
/// path out; dropping it unused closes it as well.
pub struct ScopedConnection {
    conn: Connection,
    budget: ExecutionBudget,
}

impl ScopedConnection {
    /// Handle another thread can use to abort the running statement
    pub fn interrupt_handle(&self) -> Arc<InterruptHandle> {
        self.conn.interrupt_handle()
    }

    pub fn run(self, sql: &str) -> Result<QueryResult, ExecutionError> {
        let result = read_rows(&self.conn, sql, self.budget);
        self.close();
        result
    }

    fn close(self) {
        match self.conn.close() {
            Ok(()) => debug!("store connection closed"),
            Err((_conn, e)) => warn!("store connection did not close cleanly: {}", e),
        }
    }
}

fn read_rows(
    conn: &Connection,
    sql: &str,
    budget: ExecutionBudget,
) -> Result<QueryResult, ExecutionError> {
    let mut stmt = conn.prepare(sql).map_err(ExecutionError::execution)?;
    let mut rows = stmt.query([]).map_err(ExecutionError::execution)?;

    let columns = unique_column_names(
        rows.as_ref()
            .map(|stmt| stmt.column_names())
            .unwrap_or_default(),
    );

    let mut result_rows = Vec::new();
    while let Some(row) = rows.next().map_err(ExecutionError::execution)? {
        if let Some(max_rows) = budget.max_rows {
            if result_rows.len() >= max_rows {
                return Err(ExecutionError::BudgetExceeded(format!(
                    "Max rows ({}) exceeded",
                    max_rows
                )));
            }
        }

        let mut row_obj = Map::with_capacity(columns.len());
        for (i, col_name) in columns.iter().enumerate() {
            let value = row.get_ref(i).map_err(ExecutionError::execution)?;
            row_obj.insert(col_name.clone(), normalize(value));
        }
        result_rows.push(row_obj);
    }

    Ok(QueryResult {
        columns,
        rows: result_rows,
    })
}

/// `id, id` -> `id, id_2`
fn unique_column_names(names: Vec<String>) -> Vec<String> {
    let mut used: HashSet<String> = HashSet::with_capacity(names.len());
    let mut out = Vec::with_capacity(names.len());

    for name in names {
        let mut candidate = name.clone();
        let mut n = 2;
        while used.contains(&candidate) {
            candidate = format!("{}_{}", name, n);
            n += 1;
        }
        used.insert(candidate.clone());
        out.push(candidate);
    }

    out
}
