//! SQL value types for row transfer between stores.

use chrono::{NaiveDate, NaiveDateTime, NaiveTime};
use rust_decimal::Decimal;
use uuid::Uuid;

/// An owned SQL value as read from a source row.
///
/// Variants cover the types the SQL Server driver yields; anything textual
/// lands in `Text`, raw byte payloads in `Bytes`.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Null,
    Bool(bool),
    I16(i16),
    I32(i32),
    I64(i64),
    F32(f32),
    F64(f64),
    Text(String),
    Bytes(Vec<u8>),
    Decimal(Decimal),
    DateTime(NaiveDateTime),
    Date(NaiveDate),
    Time(NaiveTime),
    Uuid(Uuid),
}

impl Value {
    /// Coerce a raw byte sequence into its text representation; any other
    /// value passes through unchanged. The bulk-load protocol does not accept
    /// byte-sequence payloads for values the source driver read back as
    /// bytes (decimals in particular).
    pub fn coerce_bytes_to_text(self) -> Value {
        match self {
            Value::Bytes(b) => Value::Text(String::from_utf8_lossy(&b).into_owned()),
            other => other,
        }
    }
}
