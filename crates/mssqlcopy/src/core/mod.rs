//! Core types shared across the copy pipeline.

pub mod identifier;
pub mod schema;
pub mod table;
pub mod value;

pub use identifier::{quote_ident, quote_value};
pub use schema::{column_list, compatible, ForeignKey, SchemaDef};
pub use table::TableRef;
pub use value::Value;
