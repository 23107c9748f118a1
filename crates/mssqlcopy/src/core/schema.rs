//! Schema definitions and foreign key metadata.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use super::table::TableRef;

/// Column name to column type mapping for one table, as observed at a point
/// in time. A `BTreeMap` keeps iteration order lexical, so the derived column
/// list and all generated SQL are reproducible across runs.
pub type SchemaDef = BTreeMap<String, String>;

/// Two schema definitions are compatible iff they have identical column-name
/// sets and an identical type per column. Order-independent and symmetric.
pub fn compatible(a: &SchemaDef, b: &SchemaDef) -> bool {
    if a.len() != b.len() {
        return false;
    }

    a.iter().all(|(column, ty)| b.get(column) == Some(ty))
}

/// Derive the ordered column list from a schema definition (lexical order).
pub fn column_list(schema: &SchemaDef) -> Vec<String> {
    schema.keys().cloned().collect()
}

/// A foreign key constraint. Identity is the constraint name within its
/// schema.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ForeignKey {
    /// Constraint name.
    pub name: String,

    /// Schema of the owning (parent) table.
    pub schema: String,

    /// Owning (parent) table name.
    pub table: String,

    /// Constrained column on the owning table.
    pub column: String,

    /// Schema of the referenced table.
    pub referenced_schema: String,

    /// Referenced table name.
    pub referenced_table: String,

    /// Referenced column name.
    pub referenced_column: String,

    /// Whether the constraint was defined as not enforced.
    pub no_check: bool,
}

impl ForeignKey {
    /// The owning (parent) side of the constraint.
    pub fn parent(&self) -> TableRef {
        TableRef::new(self.schema.clone(), self.table.clone())
    }

    /// The referenced side of the constraint.
    pub fn referenced(&self) -> TableRef {
        TableRef::new(self.referenced_schema.clone(), self.referenced_table.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn schema(cols: &[(&str, &str)]) -> SchemaDef {
        cols.iter()
            .map(|(c, t)| (c.to_string(), t.to_string()))
            .collect()
    }

    #[test]
    fn compatible_is_symmetric_and_order_independent() {
        let a = schema(&[("id", "int"), ("name", "varchar")]);
        let b = schema(&[("name", "varchar"), ("id", "int")]);

        assert!(compatible(&a, &b));
        assert!(compatible(&b, &a));
    }

    #[test]
    fn differing_column_counts_are_incompatible() {
        let a = schema(&[("id", "int")]);
        let b = schema(&[("id", "int"), ("name", "varchar")]);

        assert!(!compatible(&a, &b));
        assert!(!compatible(&b, &a));
    }

    #[test]
    fn differing_types_are_incompatible() {
        let a = schema(&[("id", "int")]);
        let b = schema(&[("id", "bigint")]);

        assert!(!compatible(&a, &b));
    }

    #[test]
    fn column_list_is_lexically_sorted() {
        let s = schema(&[("zeta", "int"), ("alpha", "int"), ("mid", "int")]);
        assert_eq!(column_list(&s), vec!["alpha", "mid", "zeta"]);
    }
}
