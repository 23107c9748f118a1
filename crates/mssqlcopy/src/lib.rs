//! # mssqlcopy
//!
//! Table-by-table data copying between two SQL Server databases.
//!
//! The library selects tables by a `LIKE` pattern, streams filtered rows out
//! of the source, and bulk loads them into the target with:
//!
//! - **Bulk transfers** using the TDS bulk load protocol, committed in
//!   50,000-row batches
//! - **Parallel copies** scheduled in fixed-size chunks of tables
//! - **Foreign key handling** that drops referencing constraints before
//!   truncating and restores them afterwards
//! - **Row filtering** with a simple `column OP value` expression language
//! - **Live progress** rendered per table, with a plain append-only mode
//!   for CI logs
//!
//! ## Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//!
//! use mssqlcopy::{CopyConfig, MssqlStore, Scheduler, Store, TableRef};
//! use tokio::sync::mpsc;
//! use tokio_util::sync::CancellationToken;
//!
//! async fn copy(config: CopyConfig) -> mssqlcopy::Result<()> {
//!     let source = Arc::new(MssqlStore::connect(config.source.clone()).await?);
//!     let target = Arc::new(MssqlStore::connect(config.target.clone()).await?);
//!
//!     let tables: Vec<TableRef> = source
//!         .tables_matching(&config.schema, &config.table_filter)
//!         .await?
//!         .into_iter()
//!         .map(|t| TableRef::new(&config.schema, t))
//!         .collect();
//!
//!     let (events, _rx) = mpsc::channel(mssqlcopy::EVENT_CHANNEL_CAPACITY);
//!     Scheduler::new(source, target, events)
//!         .with_parallelism(config.parallel)
//!         .run(tables, config.filter()?, CancellationToken::new())
//!         .await
//! }
//! ```

pub mod config;
pub mod core;
pub mod error;
pub mod filter;
pub mod loader;
pub mod monitor;
pub mod mssql;
pub mod scheduler;
pub mod store;
pub mod task;

// Re-exports for convenient access
pub use config::{CopyConfig, EndpointConfig, DEFAULT_TIMEOUT_SECS};
pub use self::core::{ForeignKey, SchemaDef, TableRef, Value};
pub use error::{CopyError, Result};
pub use filter::Filter;
pub use loader::{BatchedLoader, BulkSink, COMMIT_THRESHOLD};
pub use monitor::{Event, Monitor, EVENT_CHANNEL_CAPACITY};
pub use mssql::MssqlStore;
pub use scheduler::{Scheduler, DEFAULT_PARALLELISM};
pub use store::{RowStream, Store};
pub use task::CopyTask;
