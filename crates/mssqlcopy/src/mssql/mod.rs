//! SQL Server store implementation.
//!
//! Uses Tiberius with bb8 connection pooling. Short-lived catalog queries run
//! on pooled connections; row streaming and bulk loading hold dedicated
//! connections for the lifetime of one table copy.

mod bulk;

use async_trait::async_trait;
use bb8::{Pool, PooledConnection};
use chrono::NaiveDateTime;
use futures::TryStreamExt;
use tiberius::{AuthMethod, Client, Config, EncryptionLevel, Query, QueryItem, Row};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio_util::compat::{Compat, TokioAsyncWriteCompatExt};
use tracing::{debug, info};
use uuid::Uuid;

use crate::config::EndpointConfig;
use crate::core::{quote_ident, ForeignKey, SchemaDef, TableRef, Value};
use crate::error::{CopyError, Result};
use crate::filter::Filter;
use crate::loader::BatchedLoader;
use crate::store::{RowStream, SchemaCache, Store};

use bulk::MssqlBulkSink;

/// Capacity of the per-stream row buffer between the driver task and the
/// consuming reader.
const STREAM_BUFFER: usize = 100;

/// Connection manager for bb8 pool with tiberius.
#[derive(Clone)]
struct ConnectionManager {
    config: EndpointConfig,
}

impl ConnectionManager {
    fn new(config: EndpointConfig) -> Self {
        Self { config }
    }

    fn build_config(&self) -> Config {
        let mut config = Config::new();
        config.host(&self.config.host);
        config.port(self.config.port);
        config.database(&self.config.database);
        config.authentication(AuthMethod::sql_server(&self.config.user, &self.config.password));

        match self.config.encrypt.to_lowercase().as_str() {
            "false" | "no" | "0" | "disable" => {
                config.encryption(EncryptionLevel::NotSupported);
            }
            _ => {
                if self.config.trust_server_cert {
                    config.trust_cert();
                }
                config.encryption(EncryptionLevel::Required);
            }
        }

        config
    }
}

#[async_trait]
impl bb8::ManageConnection for ConnectionManager {
    type Connection = Client<Compat<TcpStream>>;
    type Error = tiberius::error::Error;

    async fn connect(&self) -> std::result::Result<Self::Connection, Self::Error> {
        let config = self.build_config();
        let tcp = TcpStream::connect(config.get_addr())
            .await
            .map_err(|e| tiberius::error::Error::Io {
                kind: e.kind(),
                message: e.to_string(),
            })?;

        tcp.set_nodelay(true).ok();

        Client::connect(config, tcp.compat_write()).await
    }

    async fn is_valid(&self, conn: &mut Self::Connection) -> std::result::Result<(), Self::Error> {
        conn.simple_query("SELECT 1").await?.into_row().await?;
        Ok(())
    }

    fn has_broken(&self, _conn: &mut Self::Connection) -> bool {
        false
    }
}

/// A [`Store`] backed by one SQL Server database.
pub struct MssqlStore {
    pool: Pool<ConnectionManager>,
    schemas: SchemaCache,
}

impl MssqlStore {
    /// Connect to the database and verify the connection.
    pub async fn connect(config: EndpointConfig) -> Result<Self> {
        Self::with_max_connections(config, 8).await
    }

    /// Connect with a specific pool size.
    pub async fn with_max_connections(config: EndpointConfig, max_size: u32) -> Result<Self> {
        let manager = ConnectionManager::new(config.clone());
        let pool = Pool::builder()
            .max_size(max_size)
            .min_idle(Some(1))
            .build(manager)
            .await
            .map_err(|e| CopyError::pool(e.to_string(), "creating connection pool"))?;

        // Test connection
        {
            let mut conn = pool
                .get()
                .await
                .map_err(|e| CopyError::pool(e.to_string(), "testing connection"))?;
            conn.simple_query("SELECT 1").await?.into_row().await?;
        }

        info!(
            "Connected to {}:{}/{} (pool_size={})",
            config.host, config.port, config.database, max_size
        );

        Ok(Self {
            pool,
            schemas: SchemaCache::new(),
        })
    }

    async fn get_client(&self) -> Result<PooledConnection<'_, ConnectionManager>> {
        self.pool
            .get()
            .await
            .map_err(|e| CopyError::pool(e.to_string(), "acquiring connection"))
    }

    async fn load_schema(&self, table: &TableRef) -> Result<SchemaDef> {
        let mut client = self.get_client().await?;

        let mut query = Query::new(
            "SELECT COLUMN_NAME, DATA_TYPE \
             FROM INFORMATION_SCHEMA.COLUMNS \
             WHERE TABLE_SCHEMA = @P1 AND TABLE_NAME = @P2",
        );
        query.bind(table.schema.as_str());
        query.bind(table.table.as_str());

        let rows = query.query(&mut client).await?.into_first_result().await?;

        let mut schema = SchemaDef::new();
        for row in rows {
            let name: &str = row
                .get(0)
                .ok_or_else(|| CopyError::Schema(format!("null column name in {table}")))?;
            let data_type: &str = row
                .get(1)
                .ok_or_else(|| CopyError::Schema(format!("null data type in {table}")))?;
            schema.insert(name.to_string(), data_type.to_string());
        }

        if schema.is_empty() {
            return Err(CopyError::Schema(format!("no columns found for {table}")));
        }
        Ok(schema)
    }

    /// Column names in physical (ordinal) order, as the bulk load protocol
    /// expects them.
    async fn physical_columns(&self, table: &TableRef) -> Result<Vec<String>> {
        let mut client = self.get_client().await?;

        let mut query = Query::new(
            "SELECT COLUMN_NAME \
             FROM INFORMATION_SCHEMA.COLUMNS \
             WHERE TABLE_SCHEMA = @P1 AND TABLE_NAME = @P2 \
             ORDER BY ORDINAL_POSITION",
        );
        query.bind(table.schema.as_str());
        query.bind(table.table.as_str());

        let rows = query.query(&mut client).await?.into_first_result().await?;
        rows.iter()
            .map(|row| {
                row.get::<&str, _>(0)
                    .map(str::to_string)
                    .ok_or_else(|| CopyError::Schema(format!("null column name in {table}")))
            })
            .collect()
    }

    async fn foreign_keys(&self, table: &TableRef, referencing: bool) -> Result<Vec<ForeignKey>> {
        let mut client = self.get_client().await?;

        let side = if referencing {
            "fk.referenced_object_id"
        } else {
            "fk.parent_object_id"
        };
        let sql = format!(
            "SELECT fk.name, \
                    SCHEMA_NAME(po.schema_id) AS parent_schema, \
                    OBJECT_NAME(fk.parent_object_id) AS parent_table, \
                    COL_NAME(fkc.parent_object_id, fkc.parent_column_id) AS parent_column, \
                    SCHEMA_NAME(ro.schema_id) AS referenced_schema, \
                    OBJECT_NAME(fk.referenced_object_id) AS referenced_table, \
                    COL_NAME(fkc.referenced_object_id, fkc.referenced_column_id) AS referenced_column, \
                    fk.is_disabled \
             FROM sys.foreign_keys fk \
             JOIN sys.foreign_key_columns fkc ON fk.object_id = fkc.constraint_object_id \
             JOIN sys.objects po ON po.object_id = fk.parent_object_id \
             JOIN sys.objects ro ON ro.object_id = fk.referenced_object_id \
             WHERE fk.type = 'F' \
               AND OBJECT_NAME({side}) = @P1 \
               AND SCHEMA_NAME((SELECT schema_id FROM sys.objects WHERE object_id = {side})) = @P2"
        );

        let mut query = Query::new(sql);
        query.bind(table.table.as_str());
        query.bind(table.schema.as_str());

        let rows = query.query(&mut client).await?.into_first_result().await?;
        rows.iter()
            .map(|row| {
                let text = |idx: usize| -> Result<String> {
                    row.get::<&str, _>(idx)
                        .map(str::to_string)
                        .ok_or_else(|| {
                            CopyError::Schema(format!("null foreign key metadata for {table}"))
                        })
                };
                Ok(ForeignKey {
                    name: text(0)?,
                    schema: text(1)?,
                    table: text(2)?,
                    column: text(3)?,
                    referenced_schema: text(4)?,
                    referenced_table: text(5)?,
                    referenced_column: text(6)?,
                    no_check: row.get::<bool, _>(7).unwrap_or(false),
                })
            })
            .collect()
    }
}

#[async_trait]
impl Store for MssqlStore {
    async fn tables_matching(&self, schema: &str, pattern: &str) -> Result<Vec<String>> {
        let mut client = self.get_client().await?;

        let mut query = Query::new(
            "SELECT TABLE_NAME FROM INFORMATION_SCHEMA.TABLES \
             WHERE TABLE_SCHEMA = @P1 AND TABLE_NAME LIKE @P2 \
               AND TABLE_TYPE = 'BASE TABLE' \
             ORDER BY TABLE_NAME",
        );
        query.bind(schema);
        query.bind(pattern);

        let rows = query.query(&mut client).await?.into_first_result().await?;
        rows.iter()
            .map(|row| {
                row.get::<&str, _>(0)
                    .map(str::to_string)
                    .ok_or_else(|| CopyError::Schema("null table name in catalog".to_string()))
            })
            .collect()
    }

    async fn schema_of(&self, table: &TableRef) -> Result<SchemaDef> {
        self.schemas
            .get_or_load(table, || self.load_schema(table))
            .await
    }

    async fn row_count(&self, table: &TableRef, filter: &Filter) -> Result<i64> {
        let mut client = self.get_client().await?;

        // The filter is rendered into the statement as-is; its contents are
        // the caller's responsibility.
        let sql = format!("SELECT COUNT_BIG(*) FROM {table} WHERE {filter}");
        let row = client
            .simple_query(sql)
            .await?
            .into_row()
            .await?
            .ok_or_else(|| CopyError::Schema(format!("no count returned for {table}")))?;
        Ok(row.get::<i64, _>(0).unwrap_or(0))
    }

    async fn select_rows(
        &self,
        table: &TableRef,
        columns: &[String],
        filter: &Filter,
    ) -> Result<Box<dyn RowStream>> {
        let schema = self.schema_of(table).await?;
        let col_types: Vec<String> = columns
            .iter()
            .map(|c| {
                schema
                    .get(c)
                    .cloned()
                    .ok_or_else(|| CopyError::Schema(format!("unknown column {c} in {table}")))
            })
            .collect::<Result<_>>()?;

        let column_sql = columns
            .iter()
            .map(|c| quote_ident(c))
            .collect::<Vec<_>>()
            .join(", ");
        let sql = format!("SELECT {column_sql} FROM {table} WHERE {filter}");
        debug!(table = %table, "streaming rows: {sql}");

        let mut client = self
            .pool
            .dedicated_connection()
            .await
            .map_err(|e| CopyError::pool(e.to_string(), "opening streaming connection"))?;

        let (tx, rx) = mpsc::channel::<Result<Vec<Value>>>(STREAM_BUFFER);
        tokio::spawn(async move {
            let mut stream = match client.simple_query(sql).await {
                Ok(stream) => stream,
                Err(e) => {
                    let _ = tx.send(Err(e.into())).await;
                    return;
                }
            };

            loop {
                match stream.try_next().await {
                    Ok(Some(QueryItem::Row(row))) => {
                        let values = (0..col_types.len())
                            .map(|idx| convert_row_value(&row, idx, &col_types[idx]))
                            .collect();
                        if tx.send(Ok(values)).await.is_err() {
                            return;
                        }
                    }
                    Ok(Some(QueryItem::Metadata(_))) => {}
                    Ok(None) => return,
                    Err(e) => {
                        let _ = tx.send(Err(e.into())).await;
                        return;
                    }
                }
            }
        });

        Ok(Box::new(MssqlRowStream { rows: rx }))
    }

    async fn truncate(&self, table: &TableRef) -> Result<()> {
        let mut client = self.get_client().await?;
        debug!(table = %table, "truncating");
        client
            .simple_query(format!("TRUNCATE TABLE {table}"))
            .await?
            .into_results()
            .await?;
        Ok(())
    }

    async fn referencing_foreign_keys(&self, table: &TableRef) -> Result<Vec<ForeignKey>> {
        self.foreign_keys(table, true).await
    }

    async fn owned_foreign_keys(&self, table: &TableRef) -> Result<Vec<ForeignKey>> {
        self.foreign_keys(table, false).await
    }

    async fn drop_foreign_key(&self, fk: &ForeignKey) -> Result<()> {
        let mut client = self.get_client().await?;
        let sql = format!(
            "ALTER TABLE {} DROP CONSTRAINT {}",
            fk.parent(),
            quote_ident(&fk.name)
        );
        client.simple_query(sql).await?.into_results().await?;
        Ok(())
    }

    async fn add_foreign_key(&self, fk: &ForeignKey) -> Result<()> {
        let mut client = self.get_client().await?;
        let check = if fk.no_check { "NOCHECK" } else { "CHECK" };
        let sql = format!(
            "ALTER TABLE {} WITH NOCHECK ADD CONSTRAINT {} \
             FOREIGN KEY ({}) REFERENCES {} ({})",
            fk.parent(),
            quote_ident(&fk.name),
            quote_ident(&fk.column),
            fk.referenced(),
            quote_ident(&fk.referenced_column),
        );
        client.simple_query(sql).await?.into_results().await?;
        // Re-added constraints stay untrusted; restore the enforcement flag.
        let sql = format!(
            "ALTER TABLE {} {} CONSTRAINT {}",
            fk.parent(),
            check,
            quote_ident(&fk.name)
        );
        client.simple_query(sql).await?.into_results().await?;
        Ok(())
    }

    async fn bulk_loader(&self, table: &TableRef, columns: &[String]) -> Result<BatchedLoader> {
        let schema = self.schema_of(table).await?;
        let physical = self.physical_columns(table).await?;

        // Incoming rows carry values in lexical column order; the bulk load
        // protocol wants every column in physical order. Build the mapping
        // from physical position to lexical index once.
        let perm: Vec<usize> = physical
            .iter()
            .map(|name| {
                columns.iter().position(|c| c == name).ok_or_else(|| {
                    CopyError::Schema(format!("column {name} of {table} missing from copy set"))
                })
            })
            .collect::<Result<_>>()?;
        let col_types: Vec<String> = physical
            .iter()
            .map(|name| {
                schema
                    .get(name)
                    .cloned()
                    .ok_or_else(|| CopyError::Schema(format!("unknown column {name} in {table}")))
            })
            .collect::<Result<_>>()?;

        let client = self
            .pool
            .dedicated_connection()
            .await
            .map_err(|e| CopyError::pool(e.to_string(), "opening bulk load connection"))?;

        let sink = MssqlBulkSink::new(client, table.to_string(), col_types, perm);
        Ok(BatchedLoader::new(Box::new(sink)))
    }
}

struct MssqlRowStream {
    rows: mpsc::Receiver<Result<Vec<Value>>>,
}

#[async_trait]
impl RowStream for MssqlRowStream {
    async fn next(&mut self) -> Result<Option<Vec<Value>>> {
        self.rows.recv().await.transpose()
    }
}

fn convert_row_value(row: &Row, idx: usize, data_type: &str) -> Value {
    let dt = data_type.to_lowercase();

    match dt.as_str() {
        "bit" => row.get::<bool, _>(idx).map(Value::Bool).unwrap_or(Value::Null),
        "tinyint" => row
            .get::<u8, _>(idx)
            .map(|v| Value::I16(v as i16))
            .unwrap_or(Value::Null),
        "smallint" => row.get::<i16, _>(idx).map(Value::I16).unwrap_or(Value::Null),
        "int" => row.get::<i32, _>(idx).map(Value::I32).unwrap_or(Value::Null),
        "bigint" => row.get::<i64, _>(idx).map(Value::I64).unwrap_or(Value::Null),
        "real" => row.get::<f32, _>(idx).map(Value::F32).unwrap_or(Value::Null),
        "float" => row.get::<f64, _>(idx).map(Value::F64).unwrap_or(Value::Null),
        "uniqueidentifier" => row.get::<Uuid, _>(idx).map(Value::Uuid).unwrap_or(Value::Null),
        "datetime" | "datetime2" | "smalldatetime" => row
            .get::<NaiveDateTime, _>(idx)
            .map(Value::DateTime)
            .unwrap_or(Value::Null),
        "date" => row
            .get::<NaiveDateTime, _>(idx)
            .map(|dt| Value::Date(dt.date()))
            .unwrap_or(Value::Null),
        "time" => row
            .get::<NaiveDateTime, _>(idx)
            .map(|dt| Value::Time(dt.time()))
            .unwrap_or(Value::Null),
        "binary" | "varbinary" | "image" => row
            .get::<&[u8], _>(idx)
            .map(|v| Value::Bytes(v.to_vec()))
            .unwrap_or(Value::Null),
        "decimal" | "numeric" | "money" | "smallmoney" => row
            .get::<rust_decimal::Decimal, _>(idx)
            .map(Value::Decimal)
            .or_else(|| {
                row.get::<f64, _>(idx).map(|f| {
                    rust_decimal::Decimal::try_from(f)
                        .map(Value::Decimal)
                        .unwrap_or(Value::F64(f))
                })
            })
            .unwrap_or(Value::Null),
        _ => row
            .get::<&str, _>(idx)
            .map(|s| Value::Text(s.to_string()))
            .unwrap_or(Value::Null),
    }
}
