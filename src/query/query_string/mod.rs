//! Lucene-style query string parser
//!
//! Supports syntax like:
//! - `title:rust AND body:tutorial`
//! - `body:"exact phrase"^2`
//! - `quikc~2` (fuzzy, edit distance 0-2; bare `~` means 2)
//! - `(a OR b) AND NOT c`, also `a && !b || c`
//!
//! # Example
//!
//! ```rust
//! use quarry::query::query_string::QueryParser;
//!
//! let query = QueryParser::new("title:rust AND body:fast")
//!     .unwrap()
//!     .with_default_field("body")
//!     .parse()
//!     .unwrap();
//! assert_eq!(query.fields(), vec!["title", "body"]);
//! ```

pub mod lexer;
pub mod parser;

pub use lexer::{Lexer, Token};
pub use parser::{parse, QueryParser, MAX_EDIT_DISTANCE};
