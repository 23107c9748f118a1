//! Batched bulk loading.
//!
//! Rows are buffered in memory and shipped to the destination in
//! transaction-sized chunks, so a long copy commits periodically instead of
//! holding one giant transaction open.

use crate::core::Value;
use crate::error::Result;

use async_trait::async_trait;

/// Rows accepted before a batch is committed.
pub const COMMIT_THRESHOLD: usize = 50_000;

/// Destination for one batch of rows.
///
/// A single `load` call is one committed transaction: either every row in
/// the batch lands, or none do.
#[async_trait]
pub trait BulkSink: Send {
    async fn load(&mut self, rows: Vec<Vec<Value>>) -> Result<()>;
}

/// Buffers incoming rows and flushes them through a [`BulkSink`] every
/// [`COMMIT_THRESHOLD`] rows.
pub struct BatchedLoader {
    sink: Box<dyn BulkSink>,
    buffer: Vec<Vec<Value>>,
    threshold: usize,
    accepted: u64,
}

impl BatchedLoader {
    pub fn new(sink: Box<dyn BulkSink>) -> Self {
        Self::with_threshold(sink, COMMIT_THRESHOLD)
    }

    pub fn with_threshold(sink: Box<dyn BulkSink>, threshold: usize) -> Self {
        Self {
            sink,
            buffer: Vec::new(),
            threshold,
            accepted: 0,
        }
    }

    /// Total rows accepted so far, committed or still buffered.
    pub fn accepted(&self) -> u64 {
        self.accepted
    }

    /// Accept one row. Binary values are coerced to text before buffering;
    /// when the buffer reaches the commit threshold it is flushed as one
    /// transaction.
    pub async fn insert(&mut self, row: Vec<Value>) -> Result<()> {
        let row = row.into_iter().map(Value::coerce_bytes_to_text).collect();

        self.buffer.push(row);
        self.accepted += 1;

        if self.buffer.len() >= self.threshold {
            self.flush().await?;
        }
        Ok(())
    }

    /// Commit any buffered remainder. A no-op when the buffer is empty, so
    /// committing right after a threshold flush does not open an empty
    /// transaction.
    pub async fn commit(&mut self) -> Result<()> {
        if self.buffer.is_empty() {
            return Ok(());
        }
        self.flush().await
    }

    /// Discard buffered rows that have not been committed yet.
    pub fn rollback(&mut self) {
        self.buffer.clear();
    }

    async fn flush(&mut self) -> Result<()> {
        let batch = std::mem::take(&mut self.buffer);
        self.sink.load(batch).await
    }
}
