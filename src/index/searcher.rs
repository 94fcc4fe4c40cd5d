use std::sync::Arc;

use rayon::prelude::*;

use super::Snapshot;
use crate::config::IndexConfig;
use crate::error::{QuarryError, Result};
use crate::highlight::{HighlightQuery, Highlighter};
use crate::models::{DocumentId, ScoredDoc, SearchHit, StoredDocument};
use crate::query::{QueryExecutor, QueryTree};
use crate::schema::Schema;
use crate::segment::{Bm25Params, Generation};

/// Read handle pinned to one snapshot
///
/// Everything a searcher returns reflects the generation it was created
/// on, regardless of commits that happen afterwards.
#[derive(Clone, Debug)]
pub struct Searcher {
    snapshot: Arc<Snapshot>,
    schema: Arc<Schema>,
    bm25: Bm25Params,
    max_fuzzy_expansions: usize,
}

impl Searcher {
    pub fn new(snapshot: Arc<Snapshot>, schema: Arc<Schema>, config: &IndexConfig) -> Self {
        Self {
            snapshot,
            schema,
            bm25: config.bm25,
            max_fuzzy_expansions: config.max_fuzzy_expansions,
        }
    }

    pub fn generation(&self) -> Generation {
        self.snapshot.generation()
    }

    pub fn snapshot(&self) -> &Arc<Snapshot> {
        &self.snapshot
    }

    pub fn schema(&self) -> &Arc<Schema> {
        &self.schema
    }

    pub fn num_docs(&self) -> u64 {
        self.snapshot.num_docs()
    }

    fn executor(&self) -> QueryExecutor<'_> {
        QueryExecutor::new(
            &self.snapshot,
            &self.schema,
            &self.bm25,
            self.max_fuzzy_expansions,
        )
    }

    /// Top `limit` documents by descending score, ties by ascending id
    pub fn search(&self, tree: &QueryTree, limit: usize) -> Result<Vec<ScoredDoc>> {
        self.executor().top_k(tree, limit)
    }

    /// Number of live documents matching `tree`
    pub fn count(&self, tree: &QueryTree) -> Result<u64> {
        self.executor().count(tree)
    }

    /// Stored fields of a live document
    pub fn doc(&self, doc_id: DocumentId) -> Result<StoredDocument> {
        self.snapshot.doc(doc_id)
    }

    /// Ranked hits with their stored fields loaded
    pub fn search_with_fields(&self, tree: &QueryTree, limit: usize) -> Result<Vec<SearchHit>> {
        let scored = self.search(tree, limit)?;
        scored
            .par_iter()
            .map(|hit| {
                Ok(SearchHit {
                    doc_id: hit.doc_id,
                    score: hit.score,
                    fields: self.doc(hit.doc_id)?,
                })
            })
            .collect()
    }

    /// Best fragment of `field` for each hit, in hit order
    ///
    /// Hits without a stored value for `field` yield an empty string.
    pub fn highlight_hits(
        &self,
        hits: &[ScoredDoc],
        tree: &QueryTree,
        field: &str,
        fragment_size: usize,
        highlighter: &Highlighter,
    ) -> Result<Vec<String>> {
        let entry = self
            .schema
            .field(field)
            .ok_or_else(|| QuarryError::InvalidRequest(format!("unknown field '{}'", field)))?;
        if !entry.is_stored() {
            return Err(QuarryError::InvalidRequest(format!(
                "field '{}' is not stored",
                field
            )));
        }

        let query = HighlightQuery::from_tree(tree, field, highlighter.analyzer());
        hits.par_iter()
            .map(|hit| {
                let doc = self.doc(hit.doc_id)?;
                let text = doc.get_all(field).collect::<Vec<_>>().join("\n");
                Ok(highlighter.best_fragment(&text, &query, fragment_size))
            })
            .collect()
    }

    /// Highlighter using `field`'s analyzer and default tags
    pub fn highlighter(&self, field: &str) -> Result<Highlighter> {
        let analyzer = self
            .schema
            .analyzer(field)
            .ok_or_else(|| QuarryError::InvalidRequest(format!("field '{}' is not indexed", field)))?;
        Ok(Highlighter::new(Arc::clone(analyzer)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Document;
    use crate::query::parse;
    use crate::schema::FieldOptions;
    use crate::Index;

    fn index() -> Index {
        let schema = Schema::builder()
            .add_text_field("body", FieldOptions::TEXT_STORED)
            .add_text_field("tag", FieldOptions::TEXT)
            .build()
            .unwrap();
        let index = Index::create_in_ram(schema, IndexConfig::default());
        let mut writer = index.writer().unwrap();
        writer
            .add_document(
                Document::new()
                    .with_field("body", "the quick brown fox")
                    .with_field("tag", "animal"),
            )
            .unwrap();
        writer
            .add_document(Document::new().with_field("body", "the lazy dog sleeps"))
            .unwrap();
        writer.commit().unwrap();
        drop(writer);
        index
    }

    #[test]
    fn test_search_with_fields_loads_stored_values() {
        let searcher = index().searcher();
        let hits = searcher
            .search_with_fields(&parse("fox", "body").unwrap(), 10)
            .unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].doc_id, 0);
        assert_eq!(hits[0].fields.get("body"), Some("the quick brown fox"));
        assert_eq!(hits[0].fields.get("tag"), None);
    }

    #[test]
    fn test_searcher_is_pinned_to_its_snapshot() {
        let index = index();
        let searcher = index.searcher();
        index
            .add_document(Document::new().with_field("body", "another fox"))
            .unwrap();
        index.commit().unwrap();

        let tree = parse("fox", "body").unwrap();
        assert_eq!(searcher.count(&tree).unwrap(), 1);
        assert_eq!(index.searcher().count(&tree).unwrap(), 2);
        assert_eq!(searcher.generation() + 1, index.generation());
    }

    #[test]
    fn test_highlight_hits_preserves_order() {
        let searcher = index().searcher();
        let tree = parse("fox OR dog", "body").unwrap();
        let hits = searcher.search(&tree, 10).unwrap();
        let highlighter = searcher.highlighter("body").unwrap();
        let fragments = searcher
            .highlight_hits(&hits, &tree, "body", 3, &highlighter)
            .unwrap();

        assert_eq!(fragments.len(), hits.len());
        for (hit, fragment) in hits.iter().zip(&fragments) {
            match hit.doc_id {
                0 => assert_eq!(fragment, "quick brown <b>fox</b>"),
                _ => assert_eq!(fragment, "the lazy <b>dog</b>"),
            }
        }
    }

    #[test]
    fn test_highlight_rejects_unstored_field() {
        let searcher = index().searcher();
        let tree = parse("animal", "tag").unwrap();
        let highlighter = searcher.highlighter("tag").unwrap();
        let err = searcher
            .highlight_hits(&[], &tree, "tag", 5, &highlighter)
            .unwrap_err();
        assert!(matches!(err, QuarryError::InvalidRequest(_)));
    }
}
