pub mod document;
pub mod search;

pub use document::{current_timestamp, Document, DocumentId, FieldValue, StoredDocument};
pub use search::{ScoredDoc, SearchHit, SearchResponse};
