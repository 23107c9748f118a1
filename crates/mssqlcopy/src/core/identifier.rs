//! T-SQL identifier and literal quoting.
//!
//! SQL identifiers (table names, column names, constraint names) cannot be
//! passed as parameters in prepared statements - only data values can be
//! parameterized. Dynamic SQL therefore wraps identifiers in brackets and
//! escapes embedded closing brackets by doubling them.

/// Quote a SQL Server identifier, escaping closing brackets.
pub fn quote_ident(name: &str) -> String {
    format!("[{}]", name.replace(']', "]]"))
}

/// Quote a string literal, escaping embedded single quotes.
pub fn quote_value(value: &str) -> String {
    format!("'{}'", value.replace('\'', "''"))
}
