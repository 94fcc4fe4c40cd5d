//! Embeddable full-text search engine
//!
//! Documents are analyzed per field, buffered in memory and flushed into
//! immutable segments. Commits publish a new generation atomically;
//! searchers hold on to a snapshot and rank matches with BM25.

pub mod analysis;
pub mod config;
pub mod error;
pub mod highlight;
pub mod index;
pub mod models;
pub mod query;
pub mod schema;
pub mod segment;

pub use analysis::{Analyzer, Token};
pub use config::{AnalyzerConfig, AnalyzerKind, IndexConfig, RecoveryMode, WorkloadProfile};
pub use error::{QuarryError, Result};
pub use highlight::{HighlightQuery, Highlighter};
pub use index::{Index, IndexWriter, Searcher, Snapshot};
pub use models::*;
pub use query::{parse, MatchOperator, QueryParser, QueryTree};
pub use schema::{FieldEntry, FieldOptions, Schema};
pub use segment::{Bm25Params, BufferConfig, CancellationToken, MergePolicyConfig};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
