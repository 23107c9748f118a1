//! Chunked parallel scheduling of copy tasks.
//!
//! Tables are processed in chunks of `parallelism` tasks. Every task in a
//! chunk must finish before the next chunk starts, which keeps the number
//! of concurrent source and target connections bounded.

use std::sync::Arc;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::core::TableRef;
use crate::error::{CopyError, Result};
use crate::filter::Filter;
use crate::monitor::Event;
use crate::store::Store;
use crate::task::CopyTask;

/// Tables copied concurrently per chunk.
pub const DEFAULT_PARALLELISM: usize = 5;

/// Runs one [`CopyTask`] per table, `parallelism` at a time.
pub struct Scheduler {
    source: Arc<dyn Store>,
    target: Arc<dyn Store>,
    events: mpsc::Sender<Event>,
    parallelism: usize,
    continue_on_error: bool,
}

impl Scheduler {
    pub fn new(
        source: Arc<dyn Store>,
        target: Arc<dyn Store>,
        events: mpsc::Sender<Event>,
    ) -> Self {
        Self {
            source,
            target,
            events,
            parallelism: DEFAULT_PARALLELISM,
            continue_on_error: true,
        }
    }

    pub fn with_parallelism(mut self, parallelism: usize) -> Self {
        self.parallelism = parallelism.max(1);
        self
    }

    /// When false, a failed table stops the run at the next chunk boundary
    /// instead of letting the remaining tables proceed.
    pub fn with_continue_on_error(mut self, continue_on_error: bool) -> Self {
        self.continue_on_error = continue_on_error;
        self
    }

    /// Copy all `tables`, applying `filter` to each.
    ///
    /// Failed tables never abort tables already running alongside them;
    /// their errors are collected and reported together at the end.
    pub async fn run(
        &self,
        tables: Vec<TableRef>,
        filter: Filter,
        cancel: CancellationToken,
    ) -> Result<()> {
        info!(
            tables = tables.len(),
            parallelism = self.parallelism,
            "starting copy run"
        );

        let mut failures: Vec<(TableRef, CopyError)> = Vec::new();

        for chunk in tables.chunks(self.parallelism) {
            let handles: Vec<_> = chunk
                .iter()
                .map(|table| {
                    let task = CopyTask::new(
                        table.clone(),
                        Arc::clone(&self.source),
                        Arc::clone(&self.target),
                        filter.clone(),
                        self.events.clone(),
                    );
                    (table.clone(), tokio::spawn(task.run(cancel.clone())))
                })
                .collect();

            for (table, handle) in handles {
                let result = handle
                    .await
                    .map_err(|_| CopyError::transfer(table.to_string(), "copy task panicked"))
                    .and_then(|r| r);
                if let Err(e) = result {
                    warn!(table = %table, error = %e, "table copy failed");
                    failures.push((table, e));
                }
            }

            if !failures.is_empty() && !self.continue_on_error {
                break;
            }
        }

        if failures.is_empty() {
            return Ok(());
        }

        let tables = failures
            .iter()
            .map(|(t, _)| t.to_string())
            .collect::<Vec<_>>()
            .join(", ");
        let errors = failures
            .iter()
            .map(|(t, e)| format!("{t}: {e}"))
            .collect::<Vec<_>>()
            .join("; ");
        Err(CopyError::transfer(tables, errors))
    }
}
