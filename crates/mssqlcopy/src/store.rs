//! Store contract consumed by the copy pipeline.
//!
//! The pipeline never talks to a database driver directly; it goes through
//! [`Store`], which covers schema inspection, row streaming, truncation,
//! foreign key management, and bulk loading for one database instance.

use std::collections::HashMap;
use std::future::Future;

use async_trait::async_trait;
use tokio::sync::Mutex;

use crate::core::{ForeignKey, SchemaDef, TableRef, Value};
use crate::error::Result;
use crate::filter::Filter;
use crate::loader::BatchedLoader;

/// A stream of rows from a `SELECT`. Yields one fixed-width row per call;
/// `None` signals end-of-data.
#[async_trait]
pub trait RowStream: Send {
    async fn next(&mut self) -> Result<Option<Vec<Value>>>;
}

/// Operations the copy pipeline requires from one database instance.
///
/// A store is shared read-only across all concurrently running copy tasks
/// against it, apart from its internal schema cache. Implementations are
/// expected to abort in-flight calls with an error once the job deadline
/// fires.
#[async_trait]
pub trait Store: Send + Sync {
    /// List base table names in `schema` matching a SQL `LIKE` pattern.
    async fn tables_matching(&self, schema: &str, pattern: &str) -> Result<Vec<String>>;

    /// Column definitions for a table, memoized per store for the store's
    /// lifetime.
    async fn schema_of(&self, table: &TableRef) -> Result<SchemaDef>;

    /// Number of rows in the table matching the filter.
    async fn row_count(&self, table: &TableRef, filter: &Filter) -> Result<i64>;

    /// Stream rows for the given columns, in source order.
    async fn select_rows(
        &self,
        table: &TableRef,
        columns: &[String],
        filter: &Filter,
    ) -> Result<Box<dyn RowStream>>;

    /// Remove all rows from the table.
    async fn truncate(&self, table: &TableRef) -> Result<()>;

    /// Foreign keys where `table` is the referenced side.
    async fn referencing_foreign_keys(&self, table: &TableRef) -> Result<Vec<ForeignKey>>;

    /// Foreign keys where `table` is the parent side.
    async fn owned_foreign_keys(&self, table: &TableRef) -> Result<Vec<ForeignKey>>;

    /// Drop one foreign key constraint.
    async fn drop_foreign_key(&self, fk: &ForeignKey) -> Result<()>;

    /// Re-add a foreign key constraint without revalidating existing rows.
    async fn add_foreign_key(&self, fk: &ForeignKey) -> Result<()>;

    /// Open a batched bulk loader for the given columns of a table.
    async fn bulk_loader(&self, table: &TableRef, columns: &[String]) -> Result<BatchedLoader>;
}

/// Read-through, populate-once schema cache keyed by table.
///
/// The lock is held across population so concurrent callers never observe a
/// partially populated entry and the backing query runs at most once per
/// table.
pub struct SchemaCache {
    inner: Mutex<HashMap<TableRef, SchemaDef>>,
}

impl SchemaCache {
    /// Create an empty cache.
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(HashMap::new()),
        }
    }

    /// Return the cached definition for `table`, loading it with `load` on
    /// first access.
    pub async fn get_or_load<F, Fut>(&self, table: &TableRef, load: F) -> Result<SchemaDef>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<SchemaDef>>,
    {
        let mut cached = self.inner.lock().await;

        if let Some(schema) = cached.get(table) {
            return Ok(schema.clone());
        }

        let schema = load().await?;
        cached.insert(table.clone(), schema.clone());
        Ok(schema)
    }
}

impl Default for SchemaCache {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn schema_cache_loads_once() {
        use std::sync::atomic::{AtomicUsize, Ordering};

        let cache = SchemaCache::new();
        let table = TableRef::new("dbo", "t");
        let calls = AtomicUsize::new(0);

        let load = || async {
            calls.fetch_add(1, Ordering::SeqCst);
            let mut schema = SchemaDef::new();
            schema.insert("id".to_string(), "int".to_string());
            Ok(schema)
        };

        let first = cache.get_or_load(&table, load).await.unwrap();
        let second = cache.get_or_load(&table, load).await.unwrap();

        assert_eq!(first, second);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn schema_cache_failed_load_is_not_cached() {
        use crate::error::CopyError;

        let cache = SchemaCache::new();
        let table = TableRef::new("dbo", "t");

        let failed = cache
            .get_or_load(&table, || async {
                Err(CopyError::Schema("unreachable table".into()))
            })
            .await;
        assert!(failed.is_err());

        let ok = cache
            .get_or_load(&table, || async { Ok(SchemaDef::new()) })
            .await;
        assert!(ok.is_ok());
    }
}
