//! Recursive descent parser for query strings
//!
//! # Grammar
//!
//! ```text
//! query     := or_expr EOF
//! or_expr   := and_expr ( (OR | <implicit>) and_expr )*
//! and_expr  := not_expr ( AND not_expr )*
//! not_expr  := NOT not_expr | primary
//! primary   := '(' or_expr ')' | field_query | leaf
//! field_query := TERM ':' ( leaf | '(' or_expr ')' )
//! leaf      := (TERM | PHRASE) modifiers
//! modifiers := ('~' distance?)? ('^' boost)?
//! ```
//!
//! Adjacent clauses without an operator are joined with the default
//! operator at the OR level. Binary operators are left-associative.

use super::lexer::{Lexer, Token};
use crate::error::{QuarryError, Result};
use crate::query::ast::{MatchOperator, QueryTree};

/// Default field to search when no field is specified
const DEFAULT_FIELD: &str = "contents";

/// Largest accepted fuzzy edit distance
pub const MAX_EDIT_DISTANCE: u32 = 2;

/// Parse `query`, searching `default_field` for unqualified clauses
pub fn parse(query: &str, default_field: &str) -> Result<QueryTree> {
    QueryParser::new(query)?
        .with_default_field(default_field)
        .parse()
}

/// Parser for Lucene-style query strings
pub struct QueryParser {
    lexer: Lexer,
    current_token: Token,
    /// Field for unqualified clauses
    default_field: String,
    /// Operator between clauses with no explicit operator
    default_operator: MatchOperator,
}

impl QueryParser {
    /// Create a new parser for the given query string
    pub fn new(input: &str) -> Result<Self> {
        let mut lexer = Lexer::new(input);
        let current_token = lexer.next_token()?;

        Ok(Self {
            lexer,
            current_token,
            default_field: DEFAULT_FIELD.to_string(),
            default_operator: MatchOperator::Or,
        })
    }

    /// Set the default field for unqualified terms
    pub fn with_default_field(mut self, field: impl Into<String>) -> Self {
        self.default_field = field.into();
        self
    }

    /// Set the default operator between terms
    pub fn with_default_operator(mut self, operator: MatchOperator) -> Self {
        self.default_operator = operator;
        self
    }

    /// Parse the query string into a query tree
    pub fn parse(mut self) -> Result<QueryTree> {
        if self.current_token == Token::Eof {
            return Err(QuarryError::syntax("empty query"));
        }

        let query = self.parse_or_expr()?;

        match &self.current_token {
            Token::Eof => Ok(query),
            Token::RightParen => Err(QuarryError::syntax("unbalanced ')'")),
            other => Err(QuarryError::syntax(format!(
                "unexpected {}",
                other.describe()
            ))),
        }
    }

    /// Parse: or_expr := and_expr ((OR | implicit) and_expr)*
    fn parse_or_expr(&mut self) -> Result<QueryTree> {
        let mut left = self.parse_and_expr()?;

        loop {
            if self.current_token == Token::Or {
                self.advance()?;
                let right = self.parse_operand("OR")?;
                left = QueryTree::or(left, right);
            } else if self.current_token.starts_clause() {
                let right = self.parse_and_expr()?;
                left = QueryTree::join(self.default_operator, left, right);
            } else {
                return Ok(left);
            }
        }
    }

    /// Parse: and_expr := not_expr (AND not_expr)*
    fn parse_and_expr(&mut self) -> Result<QueryTree> {
        let mut left = self.parse_not_expr()?;

        while self.current_token == Token::And {
            self.advance()?;
            let right = self.parse_operand_not("AND")?;
            left = QueryTree::and(left, right);
        }
        Ok(left)
    }

    /// Right-hand side of OR: a whole and_expr
    fn parse_operand(&mut self, operator: &str) -> Result<QueryTree> {
        self.ensure_operand(operator)?;
        self.parse_and_expr()
    }

    /// Right-hand side of AND: a not_expr
    fn parse_operand_not(&mut self, operator: &str) -> Result<QueryTree> {
        self.ensure_operand(operator)?;
        self.parse_not_expr()
    }

    fn ensure_operand(&self, operator: &str) -> Result<()> {
        if self.current_token.starts_clause() {
            return Ok(());
        }
        Err(QuarryError::syntax(match &self.current_token {
            Token::Eof => format!("dangling {} at end of query", operator),
            Token::And | Token::Or => format!(
                "{} followed by {}",
                operator,
                self.current_token.describe()
            ),
            other => format!("expected a clause after {}, found {}", operator, other.describe()),
        }))
    }

    /// Parse: not_expr := NOT not_expr | primary
    fn parse_not_expr(&mut self) -> Result<QueryTree> {
        if self.current_token == Token::Not {
            self.advance()?;
            let inner = self.parse_operand_not("NOT")?;
            return Ok(QueryTree::not(inner));
        }
        self.parse_primary()
    }

    /// Parse: primary := '(' or_expr ')' | field_query | leaf
    fn parse_primary(&mut self) -> Result<QueryTree> {
        match self.current_token.clone() {
            Token::LeftParen => self.parse_group(),
            Token::Term(text) => {
                self.advance()?;

                if self.current_token == Token::Colon {
                    self.advance()?;
                    return self.parse_field_value(text);
                }
                let field = self.default_field.clone();
                self.parse_term_with_modifiers(field, text)
            }
            Token::Phrase(text) => {
                self.advance()?;
                let field = self.default_field.clone();
                self.parse_phrase_with_modifiers(field, text)
            }
            Token::Eof => Err(QuarryError::syntax("unexpected end of query")),
            Token::RightParen => Err(QuarryError::syntax("unbalanced ')'")),
            Token::Tilde(_) | Token::Caret(_) => Err(QuarryError::syntax(format!(
                "modifier {} without a term",
                self.current_token.describe()
            ))),
            other => Err(QuarryError::syntax(format!(
                "unexpected {}",
                other.describe()
            ))),
        }
    }

    /// Parse a parenthesized group
    fn parse_group(&mut self) -> Result<QueryTree> {
        self.advance()?; // consume '('
        if self.current_token == Token::RightParen {
            return Err(QuarryError::syntax("empty group"));
        }
        if self.current_token == Token::Eof {
            return Err(QuarryError::syntax("unbalanced '('"));
        }

        let expr = self.parse_or_expr()?;
        match self.current_token {
            Token::RightParen => {
                self.advance()?;
                Ok(expr)
            }
            Token::Eof => Err(QuarryError::syntax("unbalanced '('")),
            ref other => Err(QuarryError::syntax(format!(
                "expected ')', found {}",
                other.describe()
            ))),
        }
    }

    /// Parse the value after `field:`
    fn parse_field_value(&mut self, field: String) -> Result<QueryTree> {
        match self.current_token.clone() {
            Token::Term(text) => {
                self.advance()?;
                self.parse_term_with_modifiers(field, text)
            }
            Token::Phrase(text) => {
                self.advance()?;
                self.parse_phrase_with_modifiers(field, text)
            }
            Token::LeftParen => {
                // field:(a OR b) scopes the default field to the group
                let outer = std::mem::replace(&mut self.default_field, field);
                let group = self.parse_group();
                self.default_field = outer;
                group
            }
            other => Err(QuarryError::syntax(format!(
                "expected a value after '{}:', found {}",
                field,
                other.describe()
            ))),
        }
    }

    fn parse_term_with_modifiers(&mut self, field: String, text: String) -> Result<QueryTree> {
        let mut tree = match self.current_token {
            Token::Tilde(distance) => {
                self.advance()?;
                let distance = distance.unwrap_or(MAX_EDIT_DISTANCE);
                if distance > MAX_EDIT_DISTANCE {
                    return Err(QuarryError::syntax(format!(
                        "edit distance {} exceeds {}",
                        distance, MAX_EDIT_DISTANCE
                    )));
                }
                QueryTree::fuzzy(field, text, distance as u8)
            }
            _ => QueryTree::term(field, text),
        };

        if let Some(boost) = self.parse_boost()? {
            tree = tree.with_boost(boost);
        }
        Ok(tree)
    }

    fn parse_phrase_with_modifiers(&mut self, field: String, text: String) -> Result<QueryTree> {
        if text.trim().is_empty() {
            return Err(QuarryError::syntax("empty phrase"));
        }
        if matches!(self.current_token, Token::Tilde(_)) {
            return Err(QuarryError::syntax("'~' is not supported after a phrase"));
        }

        let mut tree = QueryTree::phrase(field, text);
        if let Some(boost) = self.parse_boost()? {
            tree = tree.with_boost(boost);
        }
        Ok(tree)
    }

    fn parse_boost(&mut self) -> Result<Option<f32>> {
        let Token::Caret(boost) = self.current_token else {
            return Ok(None);
        };
        self.advance()?;
        match boost {
            Some(b) if b.is_finite() && b > 0.0 => Ok(Some(b)),
            Some(b) => Err(QuarryError::syntax(format!("boost must be positive, got {}", b))),
            None => Err(QuarryError::syntax("'^' requires a boost value")),
        }
    }

    /// Advance to the next token
    fn advance(&mut self) -> Result<()> {
        self.current_token = self.lexer.next_token()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn p(query: &str) -> QueryTree {
        parse(query, "body").unwrap()
    }

    fn t(text: &str) -> QueryTree {
        QueryTree::term("body", text)
    }

    fn assert_syntax_error(query: &str) {
        match parse(query, "body") {
            Err(QuarryError::QuerySyntax(_)) => {}
            other => panic!("expected syntax error for {:?}, got {:?}", query, other),
        }
    }

    #[test]
    fn test_simple_term() {
        assert_eq!(p("rust"), t("rust"));
    }

    #[test]
    fn test_field_query() {
        assert_eq!(p("title:rust"), QueryTree::term("title", "rust"));
    }

    #[test]
    fn test_precedence_not_and_or() {
        // NOT > AND > OR
        assert_eq!(
            p("a OR b AND NOT c"),
            QueryTree::or(t("a"), QueryTree::and(t("b"), QueryTree::not(t("c"))))
        );
        assert_eq!(
            p("a AND b OR c"),
            QueryTree::or(QueryTree::and(t("a"), t("b")), t("c"))
        );
    }

    #[test]
    fn test_left_associative() {
        assert_eq!(
            p("a AND b AND c"),
            QueryTree::and(QueryTree::and(t("a"), t("b")), t("c"))
        );
        assert_eq!(
            p("a OR b OR c"),
            QueryTree::or(QueryTree::or(t("a"), t("b")), t("c"))
        );
    }

    #[test]
    fn test_implicit_operator() {
        assert_eq!(p("a b"), QueryTree::or(t("a"), t("b")));
        assert_eq!(
            p("a b AND c"),
            QueryTree::or(t("a"), QueryTree::and(t("b"), t("c")))
        );

        let tree = QueryParser::new("a b")
            .unwrap()
            .with_default_field("body")
            .with_default_operator(MatchOperator::And)
            .parse()
            .unwrap();
        assert_eq!(tree, QueryTree::and(t("a"), t("b")));
    }

    #[test]
    fn test_groups() {
        assert_eq!(
            p("(a OR b) AND c"),
            QueryTree::and(QueryTree::or(t("a"), t("b")), t("c"))
        );
        assert_eq!(
            p("title:(a b)"),
            QueryTree::or(QueryTree::term("title", "a"), QueryTree::term("title", "b"))
        );
        // Default field restored after a scoped group
        assert_eq!(
            p("title:(a) c"),
            QueryTree::or(QueryTree::term("title", "a"), t("c"))
        );
    }

    #[test]
    fn test_fuzzy() {
        assert_eq!(p("quikc~2"), QueryTree::fuzzy("body", "quikc", 2));
        assert_eq!(p("quikc~"), QueryTree::fuzzy("body", "quikc", 2));
        assert_eq!(p("quikc~0"), QueryTree::fuzzy("body", "quikc", 0));
        assert_syntax_error("quikc~3");
    }

    #[test]
    fn test_phrase_and_boost() {
        assert_eq!(p("\"lazy dog\""), QueryTree::phrase("body", "lazy dog"));
        assert_eq!(
            p("title:\"lazy dog\"^2"),
            QueryTree::phrase("title", "lazy dog").with_boost(2.0)
        );
        assert_eq!(p("fox~1^0.5"), QueryTree::fuzzy("body", "fox", 1).with_boost(0.5));
    }

    #[test]
    fn test_symbol_operators() {
        assert_eq!(p("a && !b"), QueryTree::and(t("a"), QueryTree::not(t("b"))));
        assert_eq!(p("a || b"), QueryTree::or(t("a"), t("b")));
    }

    #[test]
    fn test_double_not() {
        assert_eq!(p("NOT NOT a"), QueryTree::not(QueryTree::not(t("a"))));
    }

    #[test]
    fn test_syntax_errors() {
        for query in [
            "",
            "   ",
            "\"unterminated",
            "(a OR b",
            "a OR b)",
            "a AND",
            "AND a",
            "a AND AND b",
            "a OR OR b",
            "NOT",
            "\"\"",
            "\"  \"",
            "()",
            "\"a b\"~2",
            "a^",
            "a^0",
            "~2",
            "title:",
            "a:b:c",
        ] {
            assert_syntax_error(query);
        }
    }
}
