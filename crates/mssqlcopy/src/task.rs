//! Per-table copy task.
//!
//! Each task runs a reader stage and a writer stage connected by a bounded
//! row channel. The reader streams rows out of the source; the writer drops
//! incoming foreign keys, truncates the destination, bulk loads, and then
//! restores the dropped constraints no matter how the load ended.

use std::sync::Arc;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use crate::core::{column_list, compatible, ForeignKey, TableRef};
use crate::error::{CopyError, Result};
use crate::filter::Filter;
use crate::monitor::Event;
use crate::store::Store;

/// Capacity of the reader-to-writer row channel. Bounds memory use and lets
/// a slow writer backpressure the reader.
pub const ROW_CHANNEL_CAPACITY: usize = 1000;

/// Copies one table from a source store to a target store.
pub struct CopyTask {
    table: TableRef,
    source: Arc<dyn Store>,
    target: Arc<dyn Store>,
    filter: Filter,
    events: mpsc::Sender<Event>,
}

impl CopyTask {
    pub fn new(
        table: TableRef,
        source: Arc<dyn Store>,
        target: Arc<dyn Store>,
        filter: Filter,
        events: mpsc::Sender<Event>,
    ) -> Self {
        Self {
            table,
            source,
            target,
            filter,
            events,
        }
    }

    /// Run the copy to completion or until `cancel` fires.
    ///
    /// Exactly one terminal event is emitted per task: `Finished` on
    /// success, `Failed` otherwise. Foreign keys dropped by the writer are
    /// restored on every exit path, including load failures.
    pub async fn run(self, cancel: CancellationToken) -> Result<()> {
        let key = self.table.to_string();
        let _ = self.events.send(Event::Started { table: key.clone() }).await;

        let result = self.copy(&key, cancel).await;

        match &result {
            Ok(rows) => {
                info!(table = %key, rows, "table copied");
                let _ = self.events.send(Event::Finished { table: key }).await;
            }
            Err(e) => {
                error!(table = %key, error = %e, "table copy failed");
                let _ = self
                    .events
                    .send(Event::Failed {
                        table: key,
                        error: e.to_string(),
                    })
                    .await;
            }
        }

        result.map(|_| ())
    }

    async fn copy(&self, key: &str, cancel: CancellationToken) -> Result<u64> {
        // The target schema decides which columns are copied. Source rows
        // are selected in the same lexical column order the loader writes.
        let target_schema = self.target.schema_of(&self.table).await?;
        let columns = column_list(&target_schema);

        let (row_tx, row_rx) = mpsc::channel(ROW_CHANNEL_CAPACITY);

        let reader = tokio::spawn(read_rows(
            self.table.clone(),
            Arc::clone(&self.source),
            target_schema,
            columns.clone(),
            self.filter.clone(),
            self.events.clone(),
            row_tx,
            cancel,
        ));

        let writer = tokio::spawn(write_rows(
            self.table.clone(),
            Arc::clone(&self.target),
            columns,
            self.events.clone(),
            row_rx,
        ));

        let read_result = reader
            .await
            .map_err(|_| CopyError::transfer(key, "reader stage panicked"))?;
        let write_result = writer
            .await
            .map_err(|_| CopyError::transfer(key, "writer stage panicked"))?;

        match (read_result, write_result) {
            (Ok(()), Ok(rows)) => Ok(rows),
            (Err(e), Ok(_)) | (Ok(()), Err(e)) => Err(e),
            (Err(read), Err(write)) => Err(CopyError::transfer(
                key,
                format!("read: {read}; write: {write}"),
            )),
        }
    }
}

/// Reader stage: stream filtered source rows into the channel.
#[allow(clippy::too_many_arguments)]
async fn read_rows(
    table: TableRef,
    source: Arc<dyn Store>,
    target_schema: crate::core::SchemaDef,
    columns: Vec<String>,
    filter: Filter,
    events: mpsc::Sender<Event>,
    row_tx: mpsc::Sender<Vec<crate::core::Value>>,
    cancel: CancellationToken,
) -> Result<()> {
    let key = table.to_string();

    let source_schema = source.schema_of(&table).await?;
    if !compatible(&source_schema, &target_schema) {
        return Err(CopyError::SchemaMismatch { table: key });
    }

    let total = source.row_count(&table, &filter).await?;
    let _ = events
        .send(Event::CountKnown {
            table: key.clone(),
            total,
        })
        .await;
    debug!(table = %key, total, "streaming source rows");

    let mut stream = source.select_rows(&table, &columns, &filter).await?;
    loop {
        let row = tokio::select! {
            _ = cancel.cancelled() => return Err(CopyError::Cancelled),
            row = stream.next() => row?,
        };
        let Some(row) = row else { break };
        if row_tx.send(row).await.is_err() {
            // Writer is gone; it reports its own failure.
            break;
        }
    }
    Ok(())
}

/// Writer stage: on the first incoming row, drop referencing foreign keys
/// and truncate the destination, then bulk load until the channel closes.
/// Dropped constraints are re-added before the stage returns, whatever the
/// load outcome was. An empty source leaves the destination untouched.
async fn write_rows(
    table: TableRef,
    target: Arc<dyn Store>,
    columns: Vec<String>,
    events: mpsc::Sender<Event>,
    mut row_rx: mpsc::Receiver<Vec<crate::core::Value>>,
) -> Result<u64> {
    let key = table.to_string();
    let mut dropped: Vec<ForeignKey> = Vec::new();

    let result = load_rows(
        &table, &*target, &columns, &events, &mut row_rx, &mut dropped,
    )
    .await;

    let mut restore_failures = Vec::new();
    for fk in &dropped {
        if let Err(e) = target.add_foreign_key(fk).await {
            error!(table = %key, constraint = %fk.name, error = %e, "failed to restore foreign key");
            restore_failures.push(format!("{}: {e}", fk.name));
        }
    }

    match (result, restore_failures.is_empty()) {
        (Ok(rows), true) => Ok(rows),
        (Ok(_), false) => Err(CopyError::transfer(
            &key,
            format!("failed to restore foreign keys: {}", restore_failures.join(", ")),
        )),
        (Err(e), _) => Err(e),
    }
}

async fn load_rows(
    table: &TableRef,
    target: &dyn Store,
    columns: &[String],
    events: &mpsc::Sender<Event>,
    row_rx: &mut mpsc::Receiver<Vec<crate::core::Value>>,
    dropped: &mut Vec<ForeignKey>,
) -> Result<u64> {
    let key = table.to_string();

    // An empty source leaves the destination untouched, so no destructive
    // work happens until the first row actually arrives.
    let Some(first) = row_rx.recv().await else {
        return Ok(0);
    };

    for fk in target.referencing_foreign_keys(table).await? {
        debug!(table = %key, constraint = %fk.name, "dropping referencing foreign key");
        target.drop_foreign_key(&fk).await?;
        dropped.push(fk);
    }
    target.truncate(table).await?;

    let mut loader = target.bulk_loader(table, columns).await?;
    let mut row = first;
    loop {
        if let Err(e) = loader.insert(row).await {
            loader.rollback();
            return Err(e);
        }
        let _ = events
            .send(Event::Progress {
                table: key.clone(),
                rows: 1,
            })
            .await;

        match row_rx.recv().await {
            Some(next) => row = next,
            None => break,
        }
    }

    loader.commit().await?;
    Ok(loader.accepted())
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::collections::HashMap;
    use std::sync::Mutex;

    use crate::core::{SchemaDef, Value};
    use crate::store::testing::{MockState, MockStore};

    fn table() -> TableRef {
        TableRef::new("dbo", "test")
    }

    fn schema() -> SchemaDef {
        let mut s = SchemaDef::new();
        s.insert("id".to_string(), "int".to_string());
        s.insert("name".to_string(), "varchar".to_string());
        s
    }

    fn fk(name: &str) -> ForeignKey {
        ForeignKey {
            name: name.to_string(),
            schema: "dbo".to_string(),
            table: "child".to_string(),
            column: "test_id".to_string(),
            referenced_schema: "dbo".to_string(),
            referenced_table: "test".to_string(),
            referenced_column: "id".to_string(),
            no_check: false,
        }
    }

    fn rows(n: i32) -> Vec<Vec<Value>> {
        (0..n)
            .map(|i| vec![Value::I32(i), Value::Text(format!("row {i}"))])
            .collect()
    }

    struct Fixture {
        source: Arc<Mutex<MockState>>,
        target: Arc<Mutex<MockState>>,
        task: CopyTask,
        events: mpsc::Receiver<Event>,
    }

    fn fixture(
        source_rows: Vec<Vec<Value>>,
        target_schema: SchemaDef,
        referencing: Vec<ForeignKey>,
    ) -> Fixture {
        let source = Arc::new(Mutex::new(MockState {
            schemas: HashMap::from([(table(), schema())]),
            rows: HashMap::from([(table(), source_rows)]),
            ..MockState::default()
        }));
        let target = Arc::new(Mutex::new(MockState {
            schemas: HashMap::from([(table(), target_schema)]),
            referencing: HashMap::from([(table(), referencing)]),
            ..MockState::default()
        }));

        let (tx, rx) = mpsc::channel(1000);
        let task = CopyTask::new(
            table(),
            Arc::new(MockStore::new(Arc::clone(&source))),
            Arc::new(MockStore::new(Arc::clone(&target))),
            Filter::default(),
            tx,
        );

        Fixture {
            source,
            target,
            task,
            events: rx,
        }
    }

    fn drain(mut rx: mpsc::Receiver<Event>) -> Vec<Event> {
        let mut events = Vec::new();
        while let Ok(event) = rx.try_recv() {
            events.push(event);
        }
        events
    }

    #[tokio::test]
    async fn copies_all_rows_and_cycles_foreign_keys() {
        let f = fixture(rows(3), schema(), vec![fk("FK_child_test")]);

        f.task.run(CancellationToken::new()).await.unwrap();

        let target = f.target.lock().unwrap();
        assert_eq!(target.loaded[&table()].len(), 3);
        assert_eq!(
            target.ops,
            vec![
                "drop_fk FK_child_test",
                "truncate [dbo].[test]",
                "add_fk FK_child_test",
            ]
        );

        let events = drain(f.events);
        assert!(matches!(events.first(), Some(Event::Started { .. })));
        assert!(matches!(events.last(), Some(Event::Finished { .. })));
        assert!(events
            .iter()
            .any(|e| matches!(e, Event::CountKnown { total: 3, .. })));
        let progress = events
            .iter()
            .filter(|e| matches!(e, Event::Progress { .. }))
            .count();
        assert_eq!(progress, 3);
    }

    #[tokio::test]
    async fn empty_source_leaves_target_untouched() {
        let f = fixture(Vec::new(), schema(), vec![fk("FK_child_test")]);

        f.task.run(CancellationToken::new()).await.unwrap();

        let target = f.target.lock().unwrap();
        assert!(target.ops.is_empty());
        assert!(target.loaded.is_empty());

        let events = drain(f.events);
        assert!(matches!(events.last(), Some(Event::Finished { .. })));
    }

    #[tokio::test]
    async fn schema_mismatch_aborts_before_destructive_ops() {
        let mut other = SchemaDef::new();
        other.insert("id".to_string(), "bigint".to_string());
        other.insert("name".to_string(), "varchar".to_string());
        let f = fixture(rows(2), other, vec![fk("FK_child_test")]);

        let err = f.task.run(CancellationToken::new()).await.unwrap_err();
        assert!(matches!(err, CopyError::SchemaMismatch { .. }));

        let target = f.target.lock().unwrap();
        assert!(target.ops.is_empty());

        let events = drain(f.events);
        assert!(matches!(events.last(), Some(Event::Failed { .. })));
    }

    #[tokio::test]
    async fn load_failure_restores_foreign_keys() {
        let f = fixture(rows(5), schema(), vec![fk("FK_child_test")]);
        f.target.lock().unwrap().fail_transaction = Some(1);

        let mut task = f.task;
        // Commit every 2 rows so the first transaction fails mid-copy.
        task.target = Arc::new(MockStore {
            commit_threshold: 2,
            ..MockStore::new(Arc::clone(&f.target))
        });

        let err = task.run(CancellationToken::new()).await.unwrap_err();
        assert!(matches!(err, CopyError::Transfer { .. }));

        let target = f.target.lock().unwrap();
        assert_eq!(
            target.ops,
            vec![
                "drop_fk FK_child_test",
                "truncate [dbo].[test]",
                "add_fk FK_child_test",
            ]
        );
        assert!(target.loaded.is_empty());

        let events = drain(f.events);
        assert!(matches!(events.last(), Some(Event::Failed { .. })));
    }

    #[tokio::test]
    async fn cancellation_stops_the_copy() {
        let mut f = fixture(rows(50), schema(), Vec::new());
        let cancel = CancellationToken::new();
        cancel.cancel();

        // Slow the stream down so cancellation wins the race.
        f.task.source = Arc::new(MockStore {
            row_delay: std::time::Duration::from_millis(5),
            ..MockStore::new(Arc::clone(&f.source))
        });

        let err = f.task.run(cancel).await.unwrap_err();
        assert!(matches!(err, CopyError::Cancelled));
    }
}
