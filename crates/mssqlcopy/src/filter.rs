//! Row filter parsing.
//!
//! Turns a user-supplied predicate string such as
//! `"status = 'active' AND amount > 100"` into a structured expression that
//! renders as a `WHERE` clause fragment.
//!
//! The right-hand side of each comparison is passed through verbatim apart
//! from stripping surrounding single quotes; the parser performs no escaping
//! or validation of the value payload beyond standard T-SQL literal quoting
//! on render. Filters are therefore unsuitable for untrusted input.

use std::fmt;

use crate::core::identifier::{quote_ident, quote_value};
use crate::error::{CopyError, Result};

/// Comparison operators accepted between column and value.
const OPERATORS: [&str; 6] = ["=", "<", ">", "<=", ">=", "<>"];

/// One atomic comparison: `column OP value`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Expression {
    column: String,
    operator: String,
    value: String,
}

impl fmt::Display for Expression {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "( {} {} {} )",
            quote_ident(&self.column),
            self.operator.to_uppercase(),
            quote_value(&self.value)
        )
    }
}

/// A parsed filter: atomic expressions interleaved with `AND`/`OR`
/// connectors in their original order. Empty input renders as a tautology.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Filter {
    expressions: Vec<Expression>,
    connectors: Vec<String>,
}

impl Filter {
    /// Parse a predicate string. Empty input yields the empty filter.
    pub fn parse(text: &str) -> Result<Filter> {
        if text.is_empty() {
            return Ok(Filter::default());
        }

        let mut filter = Filter::default();

        for part in split_candidates(text) {
            match part {
                Token::Connector(c) => filter.connectors.push(c),
                Token::Candidate(c) => filter.expressions.push(parse_expression(&c)?),
            }
        }

        Ok(filter)
    }

    /// Whether the filter contains no expressions.
    pub fn is_empty(&self) -> bool {
        self.expressions.is_empty()
    }
}

impl fmt::Display for Filter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.expressions.is_empty() {
            return write!(f, "1=1");
        }

        let mut expressions = self.expressions.iter();
        let mut connectors = self.connectors.iter();
        let mut first = true;

        loop {
            let expression = expressions.next();
            let connector = connectors.next();

            if expression.is_none() && connector.is_none() {
                return Ok(());
            }

            if let Some(e) = expression {
                if !first {
                    write!(f, " ")?;
                }
                write!(f, "{}", e)?;
            }

            if let Some(c) = connector {
                write!(f, " {}", c)?;
            }

            first = false;
        }
    }
}

enum Token {
    Connector(String),
    Candidate(String),
}

/// Split the input on single spaces, emitting connector tokens for
/// case-insensitive `AND`/`OR` and accumulating everything between them
/// into one candidate string.
fn split_candidates(text: &str) -> Vec<Token> {
    let mut tokens = Vec::new();
    let mut candidate = String::new();

    for word in text.split(' ') {
        if word.eq_ignore_ascii_case("AND") || word.eq_ignore_ascii_case("OR") {
            tokens.push(Token::Candidate(candidate.trim().to_string()));
            tokens.push(Token::Connector(word.to_uppercase()));
            candidate.clear();
        } else {
            candidate.push_str(word);
            candidate.push(' ');
        }
    }

    if !candidate.is_empty() {
        tokens.push(Token::Candidate(candidate.trim().to_string()));
    }

    tokens
}

/// Match one candidate against the 3-part pattern: identifier-like prefix,
/// a comparison operator surrounded by single spaces, then a free-form
/// remainder treated as the value.
fn parse_expression(candidate: &str) -> Result<Expression> {
    let words: Vec<&str> = candidate.split(' ').collect();

    let operator_at = words
        .iter()
        .position(|w| OPERATORS.contains(w))
        .filter(|&i| i > 0 && i + 1 < words.len());

    let Some(at) = operator_at else {
        return Err(CopyError::Filter(format!(
            "expression (\"{candidate}\") does not match <column> <operator> <value>"
        )));
    };

    let column_raw = words[..at].join(" ");
    if !is_identifier_like(&column_raw) {
        return Err(CopyError::Filter(format!(
            "expression (\"{candidate}\") has a malformed column name"
        )));
    }

    let column = column_raw
        .trim_matches(|c| matches!(c, '"' | '[' | ']'))
        .to_string();
    let value = words[at + 1..].join(" ").trim_matches('\'').to_string();

    Ok(Expression {
        column,
        operator: words[at].to_string(),
        value,
    })
}

fn is_identifier_like(s: &str) -> bool {
    !s.is_empty()
        && s.chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '"' | '[' | ']' | ' '))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_input_renders_tautology() {
        let filter = Filter::parse("").unwrap();
        assert!(filter.is_empty());
        assert_eq!(filter.to_string(), "1=1");
    }

    #[test]
    fn parses_simple_statement() {
        let filter = Filter::parse("column = 'value'").unwrap();
        assert_eq!(filter.to_string(), "( [column] = 'value' )");
    }

    #[test]
    fn parses_multiple_statements() {
        let filter =
            Filter::parse("column = 'value' AND column2 = 'value2' OR column3 = 'value3'")
                .unwrap();
        assert_eq!(
            filter.to_string(),
            "( [column] = 'value' ) AND ( [column2] = 'value2' ) OR ( [column3] = 'value3' )"
        );
    }

    #[test]
    fn lowercase_connectors_are_uppercased() {
        let filter = Filter::parse("a = 1 and b = 2").unwrap();
        assert_eq!(filter.to_string(), "( [a] = '1' ) AND ( [b] = '2' )");
    }

    #[test]
    fn value_payload_passes_through_verbatim() {
        // Deliberate, documented behaviour: the right-hand side is quoted as
        // a literal but never stripped or rejected.
        let filter = Filter::parse("column1 = ; DROP TABLE users --").unwrap();
        assert_eq!(
            filter.to_string(),
            "( [column1] = '; DROP TABLE users --' )"
        );
    }

    #[test]
    fn bracketed_column_is_unquoted_before_rendering() {
        let filter = Filter::parse("[my column] = 'x'").unwrap();
        assert_eq!(filter.to_string(), "( [my column] = 'x' )");
    }

    #[test]
    fn two_character_operators_parse() {
        let filter = Filter::parse("a >= 10 AND b <> 'y'").unwrap();
        assert_eq!(filter.to_string(), "( [a] >= '10' ) AND ( [b] <> 'y' )");
    }

    #[test]
    fn malformed_candidate_is_an_error() {
        let err = Filter::parse("not-an-expression").unwrap_err();
        assert!(err.to_string().contains("not-an-expression"));
    }

    #[test]
    fn missing_value_is_an_error() {
        assert!(Filter::parse("column =").is_err());
    }
}
