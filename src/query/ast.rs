//! Query tree
//!
//! Leaves keep their raw text; it is analyzed with the target field's
//! analyzer when the query is executed or highlighted.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Operator joining adjacent clauses that have no explicit operator
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MatchOperator {
    And,
    #[default]
    Or,
}

/// Immutable parsed query
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum QueryTree {
    /// A single term
    Term {
        field: String,
        text: String,
        boost: f32,
    },
    /// Terms at adjacent positions
    Phrase {
        field: String,
        text: String,
        boost: f32,
    },
    /// Terms within `distance` edits of `text`
    Fuzzy {
        field: String,
        text: String,
        distance: u8,
        boost: f32,
    },
    And(Box<QueryTree>, Box<QueryTree>),
    Or(Box<QueryTree>, Box<QueryTree>),
    Not(Box<QueryTree>),
}

impl QueryTree {
    pub fn term(field: impl Into<String>, text: impl Into<String>) -> Self {
        QueryTree::Term {
            field: field.into(),
            text: text.into(),
            boost: 1.0,
        }
    }

    pub fn phrase(field: impl Into<String>, text: impl Into<String>) -> Self {
        QueryTree::Phrase {
            field: field.into(),
            text: text.into(),
            boost: 1.0,
        }
    }

    pub fn fuzzy(field: impl Into<String>, text: impl Into<String>, distance: u8) -> Self {
        QueryTree::Fuzzy {
            field: field.into(),
            text: text.into(),
            distance,
            boost: 1.0,
        }
    }

    pub fn and(left: QueryTree, right: QueryTree) -> Self {
        QueryTree::And(Box::new(left), Box::new(right))
    }

    pub fn or(left: QueryTree, right: QueryTree) -> Self {
        QueryTree::Or(Box::new(left), Box::new(right))
    }

    pub fn not(inner: QueryTree) -> Self {
        QueryTree::Not(Box::new(inner))
    }

    /// Set the boost of a leaf; boolean nodes are returned unchanged
    pub fn with_boost(mut self, value: f32) -> Self {
        match &mut self {
            QueryTree::Term { boost, .. }
            | QueryTree::Phrase { boost, .. }
            | QueryTree::Fuzzy { boost, .. } => *boost = value,
            _ => {}
        }
        self
    }

    /// Join two clauses with `operator`
    pub fn join(operator: MatchOperator, left: QueryTree, right: QueryTree) -> Self {
        match operator {
            MatchOperator::And => QueryTree::and(left, right),
            MatchOperator::Or => QueryTree::or(left, right),
        }
    }

    pub fn is_leaf(&self) -> bool {
        matches!(
            self,
            QueryTree::Term { .. } | QueryTree::Phrase { .. } | QueryTree::Fuzzy { .. }
        )
    }

    /// Fields referenced by any leaf, in first-use order
    pub fn fields(&self) -> Vec<&str> {
        let mut fields = Vec::new();
        self.visit_leaves(&mut |leaf| {
            if let Some(field) = leaf.field() {
                if !fields.contains(&field) {
                    fields.push(field);
                }
            }
        });
        fields
    }

    /// Field of a leaf
    pub fn field(&self) -> Option<&str> {
        match self {
            QueryTree::Term { field, .. }
            | QueryTree::Phrase { field, .. }
            | QueryTree::Fuzzy { field, .. } => Some(field),
            _ => None,
        }
    }

    fn visit_leaves<'a>(&'a self, f: &mut impl FnMut(&'a QueryTree)) {
        match self {
            QueryTree::And(l, r) | QueryTree::Or(l, r) => {
                l.visit_leaves(f);
                r.visit_leaves(f);
            }
            QueryTree::Not(inner) => inner.visit_leaves(f),
            leaf => f(leaf),
        }
    }
}

fn write_boost(f: &mut fmt::Formatter<'_>, boost: f32) -> fmt::Result {
    if boost != 1.0 {
        write!(f, "^{}", boost)?;
    }
    Ok(())
}

/// Renders the tree back to fully parenthesized query syntax
impl fmt::Display for QueryTree {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            QueryTree::Term { field, text, boost } => {
                write!(f, "{}:{}", field, text)?;
                write_boost(f, *boost)
            }
            QueryTree::Phrase { field, text, boost } => {
                write!(f, "{}:\"{}\"", field, text.replace('"', "\\\""))?;
                write_boost(f, *boost)
            }
            QueryTree::Fuzzy {
                field,
                text,
                distance,
                boost,
            } => {
                write!(f, "{}:{}~{}", field, text, distance)?;
                write_boost(f, *boost)
            }
            QueryTree::And(l, r) => write!(f, "({} AND {})", l, r),
            QueryTree::Or(l, r) => write!(f, "({} OR {})", l, r),
            QueryTree::Not(inner) => write!(f, "NOT {}", inner),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display() {
        let tree = QueryTree::or(
            QueryTree::and(
                QueryTree::term("body", "quick"),
                QueryTree::not(QueryTree::phrase("title", "lazy dog")),
            ),
            QueryTree::fuzzy("body", "quikc", 2).with_boost(2.5),
        );
        assert_eq!(
            tree.to_string(),
            "((body:quick AND NOT title:\"lazy dog\") OR body:quikc~2^2.5)"
        );
    }

    #[test]
    fn test_fields_in_first_use_order() {
        let tree = QueryTree::and(
            QueryTree::term("title", "a"),
            QueryTree::or(QueryTree::term("body", "b"), QueryTree::term("title", "c")),
        );
        assert_eq!(tree.fields(), vec!["title", "body"]);
    }

    #[test]
    fn test_boost_only_applies_to_leaves() {
        let tree = QueryTree::not(QueryTree::term("body", "x")).with_boost(3.0);
        assert_eq!(tree, QueryTree::not(QueryTree::term("body", "x")));
        assert!(QueryTree::term("body", "x").is_leaf());
    }
}
