//! Index handle: schema, published snapshot and the single writer
//!
//! Readers load the current `Arc<Snapshot>` from an `ArcSwap` and never
//! block. Writers serialize on a mutex; `writer()` fails fast while another
//! writer is live.

mod searcher;
mod snapshot;
mod writer;

pub use searcher::Searcher;
pub use snapshot::Snapshot;
pub use writer::IndexWriter;

use std::path::Path;
use std::sync::Arc;
use std::time::Instant;

use arc_swap::ArcSwap;
use parking_lot::Mutex;
use tracing::info;

use crate::config::IndexConfig;
use crate::error::{QuarryError, Result};
use crate::models::{Document, DocumentId, SearchResponse};
use crate::query::parse;
use crate::schema::Schema;
use crate::segment::{
    CancellationToken, Generation, IndexManifest, ManifestEntry, SegmentId, SegmentStore,
    SegmentView, SegmentWriteResult,
};
use writer::WriterState;

pub(crate) struct IndexInner {
    schema: Arc<Schema>,
    config: IndexConfig,
    /// `None` for RAM-only indexes
    store: Option<SegmentStore>,
    snapshot: ArcSwap<Snapshot>,
    writer: Mutex<WriterState>,
}

impl IndexInner {
    /// Write a new segment to disk (if any) and wrap it without tombstones
    fn persist_segment(&self, result: SegmentWriteResult) -> Result<(ManifestEntry, SegmentView)> {
        let entry = match &self.store {
            Some(store) => store.write_segment(&result)?,
            None => ManifestEntry {
                meta: result.meta().clone(),
                checksums: result.files.checksums(),
            },
        };
        let view = SegmentView::new(Arc::new(result.reader), Arc::default());
        Ok((entry, view))
    }

    fn discard_segment(&self, id: SegmentId) {
        if let Some(store) = &self.store {
            store.discard_segment(id);
        }
    }
}

/// A full-text index
///
/// Cheap to clone; clones share the same snapshot and writer lock.
///
/// ```no_run
/// use quarry::{Document, FieldOptions, Index, IndexConfig, Schema};
///
/// let schema = Schema::builder()
///     .add_text_field("body", FieldOptions::TEXT_STORED)
///     .build()?;
/// let index = Index::create("/tmp/quarry", schema, IndexConfig::default())?;
/// index.add_document(Document::new().with_field("body", "the quick fox"))?;
/// index.commit()?;
///
/// let response = index.search("quick", "body", 10)?;
/// assert_eq!(response.hits.len(), 1);
/// # Ok::<(), quarry::QuarryError>(())
/// ```
#[derive(Clone)]
pub struct Index {
    inner: Arc<IndexInner>,
}

impl Index {
    /// Create a new index in `dir`, which must not already hold one
    pub fn create(dir: impl AsRef<Path>, schema: Schema, config: IndexConfig) -> Result<Self> {
        let store = SegmentStore::open(dir, config.sync_on_commit)?;
        if store.has_meta() || !store.list_generations()?.is_empty() {
            return Err(QuarryError::InvalidRequest(format!(
                "{} already contains an index",
                store.path().display()
            )));
        }
        store.write_meta(&schema.to_json()?)?;
        info!(path = %store.path().display(), fields = schema.fields().len(), "Created index");

        Ok(Self::from_parts(
            schema,
            config,
            Some(store),
            IndexManifest::new(),
            Snapshot::empty(),
        ))
    }

    /// Open an existing index, recovering the newest valid generation
    pub fn open(dir: impl AsRef<Path>, config: IndexConfig) -> Result<Self> {
        let store = SegmentStore::open(dir, config.sync_on_commit)?;
        let schema = Schema::from_json(&store.read_meta()?)
            .map_err(|e| QuarryError::corrupt(format!("unreadable schema: {}", e)))?;

        let (manifest, snapshot) = match store.recover(config.recovery)? {
            Some(loaded) => {
                let snapshot = Snapshot::new(loaded.manifest.generation, loaded.segments);
                (loaded.manifest, snapshot)
            }
            None => (IndexManifest::new(), Snapshot::empty()),
        };
        info!(
            path = %store.path().display(),
            generation = snapshot.generation(),
            docs = snapshot.num_docs(),
            "Opened index"
        );

        Ok(Self::from_parts(schema, config, Some(store), manifest, snapshot))
    }

    /// Open `dir` if it holds an index, create it otherwise
    pub fn open_or_create(dir: impl AsRef<Path>, schema: Schema, config: IndexConfig) -> Result<Self> {
        if dir.as_ref().join(crate::segment::META_FILE).exists() {
            Self::open(dir, config)
        } else {
            Self::create(dir, schema, config)
        }
    }

    /// An index that lives only in memory
    pub fn create_in_ram(schema: Schema, config: IndexConfig) -> Self {
        Self::from_parts(schema, config, None, IndexManifest::new(), Snapshot::empty())
    }

    fn from_parts(
        schema: Schema,
        config: IndexConfig,
        store: Option<SegmentStore>,
        manifest: IndexManifest,
        snapshot: Snapshot,
    ) -> Self {
        Self {
            inner: Arc::new(IndexInner {
                schema: Arc::new(schema),
                config,
                store,
                snapshot: ArcSwap::from_pointee(snapshot),
                writer: Mutex::new(WriterState::new(manifest)),
            }),
        }
    }

    pub fn schema(&self) -> &Arc<Schema> {
        &self.inner.schema
    }

    pub fn config(&self) -> &IndexConfig {
        &self.inner.config
    }

    /// Directory of a persistent index
    pub fn path(&self) -> Option<&Path> {
        self.inner.store.as_ref().map(|s| s.path())
    }

    /// Acquire the writer, failing with `ConcurrentModification` if held
    pub fn writer(&self) -> Result<IndexWriter<'_>> {
        let state = self
            .inner
            .writer
            .try_lock()
            .ok_or(QuarryError::ConcurrentModification)?;
        Ok(IndexWriter::new(&self.inner, state))
    }

    /// Acquire the writer, waiting for the current holder to release it
    pub fn writer_blocking(&self) -> IndexWriter<'_> {
        IndexWriter::new(&self.inner, self.inner.writer.lock())
    }

    /// The published snapshot
    pub fn snapshot(&self) -> Arc<Snapshot> {
        self.inner.snapshot.load_full()
    }

    /// A searcher pinned to the published snapshot
    pub fn searcher(&self) -> Searcher {
        Searcher::new(
            self.snapshot(),
            Arc::clone(&self.inner.schema),
            &self.inner.config,
        )
    }

    pub fn generation(&self) -> Generation {
        self.inner.snapshot.load().generation()
    }

    /// Live documents in the published generation
    pub fn num_docs(&self) -> u64 {
        self.inner.snapshot.load().num_docs()
    }

    pub fn add_document(&self, doc: Document) -> Result<DocumentId> {
        self.writer()?.add_document(doc)
    }

    pub fn delete(&self, doc_id: DocumentId) -> Result<bool> {
        self.writer()?.delete(doc_id)
    }

    pub fn commit(&self) -> Result<Generation> {
        self.writer()?.commit()
    }

    pub fn compact(&self, cancel: &CancellationToken) -> Result<Generation> {
        self.writer()?.compact(cancel)
    }

    /// Parse `query` against `default_field` and return the top `limit`
    /// hits with their stored fields
    pub fn search(&self, query: &str, default_field: &str, limit: usize) -> Result<SearchResponse> {
        let start = Instant::now();
        let tree = parse(query, default_field)?;
        let searcher = self.searcher();

        let hits = searcher.search_with_fields(&tree, limit)?;
        let total_hits = searcher.count(&tree)?;
        Ok(SearchResponse {
            hits,
            total_hits,
            took_ms: start.elapsed().as_millis() as u64,
            generation: searcher.generation(),
        })
    }
}

impl std::fmt::Debug for Index {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Index")
            .field("path", &self.path())
            .field("snapshot", &self.inner.snapshot.load())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::FieldOptions;
    use tempfile::TempDir;

    fn schema() -> Schema {
        Schema::builder()
            .add_text_field("body", FieldOptions::TEXT_STORED)
            .build()
            .unwrap()
    }

    fn doc(text: &str) -> Document {
        Document::new().with_field("body", text)
    }

    #[test]
    fn test_adds_invisible_until_commit() {
        let index = Index::create_in_ram(schema(), IndexConfig::default());
        let id = index.add_document(doc("the quick fox")).unwrap();
        assert_eq!(id, 0);
        assert_eq!(index.num_docs(), 0);

        assert_eq!(index.commit().unwrap(), 1);
        assert_eq!(index.num_docs(), 1);
        assert_eq!(index.snapshot().doc(0).unwrap().get("body"), Some("the quick fox"));
    }

    #[test]
    fn test_commit_without_changes_is_idempotent() {
        let index = Index::create_in_ram(schema(), IndexConfig::default());
        index.add_document(doc("alpha")).unwrap();
        let generation = index.commit().unwrap();
        let segments = index.snapshot().segments().len();

        assert_eq!(index.commit().unwrap(), generation);
        assert_eq!(index.commit().unwrap(), generation);
        assert_eq!(index.snapshot().segments().len(), segments);
    }

    #[test]
    fn test_delete_everywhere() {
        let config = IndexConfig::default().with_buffer(crate::segment::BufferConfig::new(2, 1 << 20));
        let index = Index::create_in_ram(schema(), config);
        let committed = index.add_document(doc("one")).unwrap();
        index.commit().unwrap();

        let mut writer = index.writer().unwrap();
        let flushed = writer.add_document(doc("two")).unwrap();
        writer.add_document(doc("three")).unwrap();
        let buffered = writer.add_document(doc("four")).unwrap();

        assert!(writer.delete(committed).unwrap());
        assert!(!writer.delete(committed).unwrap());
        assert!(writer.delete(flushed).unwrap());
        assert!(writer.delete(buffered).unwrap());
        assert!(!writer.delete(999).unwrap());
        writer.commit().unwrap();
        drop(writer);

        let snapshot = index.snapshot();
        assert_eq!(snapshot.num_docs(), 1);
        assert!(matches!(
            snapshot.doc(committed),
            Err(QuarryError::DocumentNotFound(_))
        ));
    }

    #[test]
    fn test_second_writer_fails_fast() {
        let index = Index::create_in_ram(schema(), IndexConfig::default());
        let _writer = index.writer().unwrap();
        assert!(matches!(
            index.writer(),
            Err(QuarryError::ConcurrentModification)
        ));
        assert!(matches!(
            index.add_document(doc("x")),
            Err(QuarryError::ConcurrentModification)
        ));
    }

    #[test]
    fn test_rollback_discards_pending_work() {
        let dir = TempDir::new().unwrap();
        let config = IndexConfig::default().with_buffer(crate::segment::BufferConfig::new(1, 1 << 20));
        let index = Index::create(dir.path(), schema(), config).unwrap();

        let mut writer = index.writer().unwrap();
        writer.add_document(doc("first")).unwrap();
        assert_eq!(writer.uncommitted_docs(), 1);
        writer.rollback();
        assert!(!writer.has_uncommitted_changes());
        assert_eq!(writer.commit().unwrap(), 0);

        let id = writer.add_document(doc("second")).unwrap();
        assert_eq!(id, 1);
        writer.commit().unwrap();
        drop(writer);

        assert!(!dir.path().join("segment_0").exists());
        assert_eq!(index.num_docs(), 1);
    }

    #[test]
    fn test_reopen_restores_documents_and_allocators() {
        let dir = TempDir::new().unwrap();
        {
            let index = Index::create(dir.path(), schema(), IndexConfig::default()).unwrap();
            index.add_document(doc("persisted text")).unwrap();
            index.add_document(doc("more text")).unwrap();
            index.commit().unwrap();
        }

        let index = Index::open(dir.path(), IndexConfig::default()).unwrap();
        assert_eq!(index.generation(), 1);
        assert_eq!(index.num_docs(), 2);
        assert_eq!(index.snapshot().doc(1).unwrap().get("body"), Some("more text"));
        assert_eq!(index.add_document(doc("third")).unwrap(), 2);
    }

    #[test]
    fn test_create_refuses_existing_index() {
        let dir = TempDir::new().unwrap();
        Index::create(dir.path(), schema(), IndexConfig::default()).unwrap();
        assert!(matches!(
            Index::create(dir.path(), schema(), IndexConfig::default()),
            Err(QuarryError::InvalidRequest(_))
        ));
        assert!(Index::open_or_create(dir.path(), schema(), IndexConfig::default()).is_ok());
    }

    #[test]
    fn test_compact_merges_and_drops_deleted() {
        let config = IndexConfig::default().with_merge_on_commit(false);
        let index = Index::create_in_ram(schema(), config);
        for text in ["a b", "b c", "c d"] {
            index.add_document(doc(text)).unwrap();
            index.commit().unwrap();
        }
        index.delete(1).unwrap();
        index.commit().unwrap();
        assert_eq!(index.snapshot().segments().len(), 2);

        let generation = index.compact(&CancellationToken::new()).unwrap();
        let snapshot = index.snapshot();
        assert_eq!(snapshot.generation(), generation);
        assert_eq!(snapshot.segments().len(), 1);
        assert_eq!(snapshot.total_docs(), 2);
        assert_eq!(snapshot.deleted_docs(), 0);

        // Already compact
        assert_eq!(index.compact(&CancellationToken::new()).unwrap(), generation);
    }

    #[test]
    fn test_cancelled_compaction_keeps_generation() {
        let config = IndexConfig::default().with_merge_on_commit(false);
        let index = Index::create_in_ram(schema(), config);
        for text in ["a", "b"] {
            index.add_document(doc(text)).unwrap();
            index.commit().unwrap();
        }

        let cancel = CancellationToken::new();
        cancel.cancel();
        assert!(matches!(index.compact(&cancel), Err(QuarryError::Cancelled)));
        assert_eq!(index.generation(), 2);
        assert_eq!(index.snapshot().segments().len(), 2);
    }
}
