//! Table identity.

use std::fmt;

use serde::{Deserialize, Serialize};

use super::identifier::quote_ident;

/// Identifies a table by (schema, table). The unit of migration and of
/// concurrency partitioning; immutable once constructed.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct TableRef {
    /// Schema name.
    pub schema: String,

    /// Table name.
    pub table: String,
}

impl TableRef {
    /// Create a new table reference.
    pub fn new(schema: impl Into<String>, table: impl Into<String>) -> Self {
        Self {
            schema: schema.into(),
            table: table.into(),
        }
    }
}

impl fmt::Display for TableRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}.{}",
            quote_ident(&self.schema),
            quote_ident(&self.table)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn renders_bracket_quoted() {
        let t = TableRef::new("dbo", "test");
        assert_eq!(t.to_string(), "[dbo].[test]");
    }

    #[test]
    fn rendered_names_sort_lexically() {
        // Rendered order is what the monitor sorts by: the closing bracket
        // sorts after digits, so "test2" renders before "test".
        let a = TableRef::new("dbo", "test").to_string();
        let b = TableRef::new("dbo", "test2").to_string();
        assert!(b < a);
    }
}
