//! Bulk load sink for SQL Server.

use std::borrow::Cow;

use async_trait::async_trait;
use chrono::Timelike;
use tiberius::{Client, ColumnData, TokenRow};
use tokio::net::TcpStream;
use tokio_util::compat::Compat;
use tracing::debug;

use crate::core::Value;
use crate::error::{CopyError, Result};
use crate::loader::BulkSink;

/// Writes row batches through the TDS bulk load protocol. Each `load` call
/// opens one bulk insert, sends every row, and finalizes it, which commits
/// the batch server-side.
pub struct MssqlBulkSink {
    client: Client<Compat<TcpStream>>,
    table: String,
    /// Declared types per physical column position.
    col_types: Vec<String>,
    /// Lexical row index feeding each physical column position.
    perm: Vec<usize>,
}

impl MssqlBulkSink {
    pub fn new(
        client: Client<Compat<TcpStream>>,
        table: String,
        col_types: Vec<String>,
        perm: Vec<usize>,
    ) -> Self {
        Self {
            client,
            table,
            col_types,
            perm,
        }
    }
}

#[async_trait]
impl BulkSink for MssqlBulkSink {
    async fn load(&mut self, rows: Vec<Vec<Value>>) -> Result<()> {
        if rows.is_empty() {
            return Ok(());
        }
        debug!(table = %self.table, rows = rows.len(), "bulk loading batch");

        let mut bulk_load = self.client.bulk_insert(&self.table).await.map_err(|e| {
            CopyError::transfer(&self.table, format!("bulk insert init: {e}"))
        })?;

        for mut row in rows {
            let mut token_row = TokenRow::new();
            for (pos, data_type) in self.col_types.iter().enumerate() {
                let value = std::mem::replace(&mut row[self.perm[pos]], Value::Null);
                token_row.push(value_to_column_data(value, data_type));
            }
            bulk_load.send(token_row).await.map_err(|e| {
                CopyError::transfer(&self.table, format!("bulk insert send: {e}"))
            })?;
        }

        bulk_load.finalize().await.map_err(|e| {
            CopyError::transfer(&self.table, format!("bulk insert finalize: {e}"))
        })?;
        Ok(())
    }
}

/// Typed null for a declared column type. The bulk load protocol needs the
/// variant to match the column even when the value is absent.
fn null_column_data(data_type: &str) -> ColumnData<'static> {
    match data_type.to_lowercase().as_str() {
        "bit" => ColumnData::Bit(None),
        "tinyint" | "smallint" => ColumnData::I16(None),
        "int" => ColumnData::I32(None),
        "bigint" => ColumnData::I64(None),
        "real" => ColumnData::F32(None),
        "float" => ColumnData::F64(None),
        "uniqueidentifier" => ColumnData::Guid(None),
        "datetime" | "datetime2" | "smalldatetime" | "date" => ColumnData::DateTime2(None),
        "time" => ColumnData::Time(None),
        "binary" | "varbinary" | "image" => ColumnData::Binary(None),
        "decimal" | "numeric" | "money" | "smallmoney" => ColumnData::Numeric(None),
        _ => ColumnData::String(None),
    }
}

fn value_to_column_data(value: Value, data_type: &str) -> ColumnData<'static> {
    match value {
        Value::Null => null_column_data(data_type),
        Value::Bool(b) => ColumnData::Bit(Some(b)),
        Value::I16(i) => ColumnData::I16(Some(i)),
        Value::I32(i) => ColumnData::I32(Some(i)),
        Value::I64(i) => ColumnData::I64(Some(i)),
        Value::F32(f) => {
            if f.is_nan() || f.is_infinite() {
                ColumnData::F32(None)
            } else {
                ColumnData::F32(Some(f))
            }
        }
        Value::F64(f) => {
            if f.is_nan() || f.is_infinite() {
                ColumnData::F64(None)
            } else {
                ColumnData::F64(Some(f))
            }
        }
        Value::Text(s) => ColumnData::String(Some(Cow::Owned(s))),
        Value::Bytes(b) => ColumnData::Binary(Some(Cow::Owned(b))),
        Value::Uuid(u) => ColumnData::Guid(Some(u)),
        Value::Decimal(d) => {
            let scale = d.scale() as u8;
            let mantissa = d.mantissa();
            ColumnData::Numeric(Some(tiberius::numeric::Numeric::new_with_scale(
                mantissa, scale,
            )))
        }
        Value::DateTime(dt) => {
            let epoch = chrono::NaiveDate::from_ymd_opt(1, 1, 1).unwrap();
            let days_i64 = (dt.date() - epoch).num_days();
            if days_i64 < 0 || days_i64 > u32::MAX as i64 {
                return ColumnData::DateTime2(None);
            }
            let date = tiberius::time::Date::new(days_i64 as u32);
            let time_val = dt.time();
            let nanos = time_val.num_seconds_from_midnight() as u64 * 1_000_000_000
                + time_val.nanosecond() as u64;
            let time = tiberius::time::Time::new(nanos / 100, 7);
            ColumnData::DateTime2(Some(tiberius::time::DateTime2::new(date, time)))
        }
        Value::Date(d) => {
            let epoch = chrono::NaiveDate::from_ymd_opt(1, 1, 1).unwrap();
            let days_i64 = (d - epoch).num_days();
            if days_i64 < 0 || days_i64 > u32::MAX as i64 {
                return ColumnData::DateTime2(None);
            }
            let date = tiberius::time::Date::new(days_i64 as u32);
            let time = tiberius::time::Time::new(0, 7);
            ColumnData::DateTime2(Some(tiberius::time::DateTime2::new(date, time)))
        }
        Value::Time(t) => {
            let nanos =
                t.num_seconds_from_midnight() as u64 * 1_000_000_000 + t.nanosecond() as u64;
            ColumnData::Time(Some(tiberius::time::Time::new(nanos / 100, 7)))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use chrono::{NaiveDate, NaiveTime};

    #[test]
    fn nulls_are_typed_by_column() {
        assert!(matches!(null_column_data("int"), ColumnData::I32(None)));
        assert!(matches!(null_column_data("VARCHAR"), ColumnData::String(None)));
        assert!(matches!(null_column_data("datetime"), ColumnData::DateTime2(None)));
        assert!(matches!(null_column_data("numeric"), ColumnData::Numeric(None)));
    }

    #[test]
    fn non_finite_floats_become_null() {
        assert!(matches!(
            value_to_column_data(Value::F64(f64::NAN), "float"),
            ColumnData::F64(None)
        ));
        assert!(matches!(
            value_to_column_data(Value::F32(f32::INFINITY), "real"),
            ColumnData::F32(None)
        ));
    }

    #[test]
    fn datetime_out_of_range_becomes_null() {
        let t = NaiveTime::from_hms_opt(0, 0, 0).unwrap();
        let before_epoch = NaiveDate::from_ymd_opt(1, 1, 1)
            .unwrap()
            .pred_opt()
            .unwrap()
            .and_time(t);
        assert!(matches!(
            value_to_column_data(Value::DateTime(before_epoch), "datetime2"),
            ColumnData::DateTime2(None)
        ));
    }

    #[test]
    fn decimal_keeps_scale() {
        let d: rust_decimal::Decimal = "123.45".parse().unwrap();
        match value_to_column_data(Value::Decimal(d), "decimal") {
            ColumnData::Numeric(Some(n)) => {
                assert_eq!(n.scale(), 2);
                assert_eq!(n.value(), 12345);
            }
            other => panic!("unexpected column data: {other:?}"),
        }
    }
}
