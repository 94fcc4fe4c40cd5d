use serde::{Deserialize, Serialize};

use super::document::{DocumentId, StoredDocument};

/// A ranked match: document id and relevance score
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct ScoredDoc {
    pub doc_id: DocumentId,
    pub score: f32,
}

/// A ranked match with the document's stored fields
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SearchHit {
    pub doc_id: DocumentId,
    pub score: f32,
    pub fields: StoredDocument,
}

/// Search response with timing information
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SearchResponse {
    pub hits: Vec<SearchHit>,
    pub total_hits: u64,
    pub took_ms: u64,
    pub generation: u64,
}
