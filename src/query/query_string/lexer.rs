//! Lexer for query string syntax
//!
//! Tokenizes Lucene-style query strings into a stream of tokens.

use crate::error::{QuarryError, Result};

/// Token types for query string parsing
#[derive(Debug, Clone, PartialEq)]
pub enum Token {
    /// A term (unquoted word, escapes resolved)
    Term(String),
    /// A double-quoted phrase
    Phrase(String),

    /// `AND` or `&&`
    And,
    /// `OR` or `||`
    Or,
    /// `NOT` or `!`
    Not,
    /// Colon separator (field:value)
    Colon,

    /// Tilde with optional edit distance
    Tilde(Option<u32>),
    /// Caret with optional boost value
    Caret(Option<f32>),

    LeftParen,
    RightParen,

    /// End of input
    Eof,
}

impl Token {
    /// Check if this token can begin a clause
    pub fn starts_clause(&self) -> bool {
        matches!(
            self,
            Token::Term(_) | Token::Phrase(_) | Token::Not | Token::LeftParen
        )
    }

    /// Human-readable form for error messages
    pub fn describe(&self) -> String {
        match self {
            Token::Term(t) => format!("term '{}'", t),
            Token::Phrase(p) => format!("phrase \"{}\"", p),
            Token::And => "AND".to_string(),
            Token::Or => "OR".to_string(),
            Token::Not => "NOT".to_string(),
            Token::Colon => "':'".to_string(),
            Token::Tilde(_) => "'~'".to_string(),
            Token::Caret(_) => "'^'".to_string(),
            Token::LeftParen => "'('".to_string(),
            Token::RightParen => "')'".to_string(),
            Token::Eof => "end of query".to_string(),
        }
    }
}

/// Lexer for tokenizing query strings
pub struct Lexer {
    input: Vec<char>,
    position: usize,
}

impl Lexer {
    /// Create a new lexer for the given input string
    pub fn new(input: &str) -> Self {
        Self {
            input: input.chars().collect(),
            position: 0,
        }
    }

    /// Get the next token from the input
    pub fn next_token(&mut self) -> Result<Token> {
        self.skip_whitespace();

        let Some(ch) = self.current_char() else {
            return Ok(Token::Eof);
        };

        match ch {
            ':' => {
                self.advance();
                Ok(Token::Colon)
            }
            '(' => {
                self.advance();
                Ok(Token::LeftParen)
            }
            ')' => {
                self.advance();
                Ok(Token::RightParen)
            }
            '!' => {
                self.advance();
                Ok(Token::Not)
            }
            '&' if self.peek() == Some('&') => {
                self.position += 2;
                Ok(Token::And)
            }
            '|' if self.peek() == Some('|') => {
                self.position += 2;
                Ok(Token::Or)
            }
            '~' => {
                self.advance();
                let digits = self.read_while(|c| c.is_ascii_digit());
                if digits.is_empty() {
                    return Ok(Token::Tilde(None));
                }
                digits
                    .parse()
                    .map(|d| Token::Tilde(Some(d)))
                    .map_err(|_| QuarryError::syntax(format!("invalid edit distance: {}", digits)))
            }
            '^' => {
                self.advance();
                let number = self.read_while(|c| c.is_ascii_digit() || c == '.');
                if number.is_empty() {
                    return Ok(Token::Caret(None));
                }
                number
                    .parse()
                    .map(|b| Token::Caret(Some(b)))
                    .map_err(|_| QuarryError::syntax(format!("invalid boost: {}", number)))
            }
            '"' => {
                self.advance();
                self.read_phrase()
            }
            _ => self.read_term(),
        }
    }

    /// Peek at the next token without consuming it
    pub fn peek_token(&mut self) -> Result<Token> {
        let saved_position = self.position;
        let token = self.next_token();
        self.position = saved_position;
        token
    }

    /// Check if the lexer has reached the end of input
    pub fn is_eof(&self) -> bool {
        self.position >= self.input.len()
    }

    fn read_term(&mut self) -> Result<Token> {
        let mut term = String::new();

        while let Some(ch) = self.current_char() {
            if ch == '\\' {
                self.advance();
                let escaped = self
                    .current_char()
                    .ok_or_else(|| QuarryError::syntax("dangling escape at end of query"))?;
                term.push(escaped);
                self.advance();
            } else if Self::is_term_char(ch) {
                term.push(ch);
                self.advance();
            } else {
                break;
            }
        }

        // Operators are upper-case only; "and" is an ordinary term
        match term.as_str() {
            "AND" => Ok(Token::And),
            "OR" => Ok(Token::Or),
            "NOT" => Ok(Token::Not),
            _ => Ok(Token::Term(term)),
        }
    }

    fn read_phrase(&mut self) -> Result<Token> {
        let mut s = String::new();

        while let Some(ch) = self.current_char() {
            self.advance();
            match ch {
                '"' => return Ok(Token::Phrase(s)),
                '\\' => match self.current_char() {
                    Some(escaped @ ('"' | '\\')) => {
                        s.push(escaped);
                        self.advance();
                    }
                    _ => s.push('\\'),
                },
                _ => s.push(ch),
            }
        }

        Err(QuarryError::syntax("unterminated quote"))
    }

    fn read_while(&mut self, pred: impl Fn(char) -> bool) -> String {
        let mut s = String::new();
        while let Some(ch) = self.current_char() {
            if !pred(ch) {
                break;
            }
            s.push(ch);
            self.advance();
        }
        s
    }

    fn current_char(&self) -> Option<char> {
        self.input.get(self.position).copied()
    }

    fn peek(&self) -> Option<char> {
        self.input.get(self.position + 1).copied()
    }

    fn advance(&mut self) {
        self.position += 1;
    }

    fn skip_whitespace(&mut self) {
        while self.current_char().is_some_and(char::is_whitespace) {
            self.advance();
        }
    }

    /// Check if a character can be part of a term
    fn is_term_char(ch: char) -> bool {
        !ch.is_whitespace() && !matches!(ch, ':' | '(' | ')' | '"' | '~' | '^')
    }
}
