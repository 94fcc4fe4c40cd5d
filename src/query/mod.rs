//! Query parsing and execution
//!
//! - [`query_string`]: Lucene-style syntax → [`QueryTree`]
//! - [`executor`]: BM25 scoring over a snapshot with a bounded top-k heap
//! - [`fuzzy`]: edit-distance expansion of fuzzy terms

pub mod ast;
pub mod executor;
pub mod fuzzy;
pub mod query_string;
pub mod scorer;

pub use ast::{MatchOperator, QueryTree};
pub use executor::{QueryExecutor, TopK, Weight};
pub use query_string::{parse, QueryParser};
