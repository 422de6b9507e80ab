//! Bounded statement execution from async context
//!
//! DuckDB calls block, so each statement runs on the blocking pool. The
//! caller waits at most `timeout`; on expiry (or when the invocation future
//! is dropped) the running statement is interrupted through its connection's
//! interrupt handle.
//!
//! DuckDB clears a pending interrupt when a query starts, so an interrupt
//! fired between publishing the handle and starting the statement would be
//! lost. The interrupt is therefore repeated until the blocking task reports
//! that it has finished.

use clarix_duck::{ExecutionError, QueryExecutor, QueryResult};
use duckdb::InterruptHandle;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tracing::{debug, warn};

use crate::llm::SynthesizedStatement;

const REINTERRUPT_INTERVAL: Duration = Duration::from_millis(50);
const REINTERRUPT_ATTEMPTS: usize = 200;

#[derive(Default)]
struct CancelState {
    handle: Option<Arc<InterruptHandle>>,
    cancelled: bool,
    finished: bool,
}

type SharedCancel = Arc<Mutex<CancelState>>;

fn lock(state: &SharedCancel) -> MutexGuard<'_, CancelState> {
    state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Interrupts the statement unless disarmed first
struct InterruptOnDrop {
    state: SharedCancel,
    armed: bool,
}

impl InterruptOnDrop {
    fn disarm(&mut self) {
        self.armed = false;
    }
}

impl Drop for InterruptOnDrop {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }

        let mut state = lock(&self.state);
        state.cancelled = true;
        let handle = match state.handle.clone() {
            Some(handle) if !state.finished => handle,
            _ => return,
        };
        drop(state);

        debug!("interrupting running statement");
        handle.interrupt();

        if let Ok(runtime) = tokio::runtime::Handle::try_current() {
            let state = self.state.clone();
            runtime.spawn(async move {
                for _ in 0..REINTERRUPT_ATTEMPTS {
                    tokio::time::sleep(REINTERRUPT_INTERVAL).await;
                    if lock(&state).finished {
                        return;
                    }
                    handle.interrupt();
                }
                warn!("statement still running after repeated interrupts");
            });
        }
    }
}

/// Marks the blocking task as done on every exit path
struct FinishOnDrop {
    state: SharedCancel,
    in_flight: Arc<AtomicUsize>,
}

impl Drop for FinishOnDrop {
    fn drop(&mut self) {
        let mut state = lock(&self.state);
        state.finished = true;
        state.handle = None;
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
    }
}

pub struct StoreGateway {
    executor: Arc<QueryExecutor>,
    timeout: Duration,
    in_flight: Arc<AtomicUsize>,
}

impl StoreGateway {
    pub fn new(executor: QueryExecutor, timeout: Duration) -> Self {
        Self {
            executor: Arc::new(executor),
            timeout,
            in_flight: Arc::default(),
        }
    }

    /// Statements whose blocking task has not returned yet, connection included
    pub fn in_flight(&self) -> usize {
        self.in_flight.load(Ordering::SeqCst)
    }

    pub async fn execute(
        &self,
        statement: &SynthesizedStatement,
    ) -> Result<QueryResult, ExecutionError> {
        let cancel: SharedCancel = Arc::default();
        let mut guard = InterruptOnDrop {
            state: cancel.clone(),
            armed: true,
        };

        self.in_flight.fetch_add(1, Ordering::SeqCst);
        let finish = FinishOnDrop {
            state: cancel.clone(),
            in_flight: self.in_flight.clone(),
        };

        let executor = self.executor.clone();
        let sql = statement.as_str().to_string();
        let task = tokio::task::spawn_blocking(move || {
            let _finish = finish;
            let conn = executor.open()?;
            {
                let mut state = lock(&cancel);
                if state.cancelled {
                    return Err(ExecutionError::Connection(
                        "invocation abandoned before execution".to_string(),
                    ));
                }
                state.handle = Some(conn.interrupt_handle());
            }
            conn.run(&sql)
        });

        match tokio::time::timeout(self.timeout, task).await {
            Ok(joined) => {
                guard.disarm();
                joined.map_err(|e| ExecutionError::Connection(format!("store task failed: {}", e)))?
            }
            Err(_) => {
                warn!(timeout_secs = self.timeout.as_secs_f64(), "statement timed out");
                Err(ExecutionError::Connection(format!(
                    "no result within {}s",
                    self.timeout.as_secs_f64()
                )))
            }
        }
    }
}
