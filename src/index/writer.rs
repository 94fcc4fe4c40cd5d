//! Single-writer mutation path: buffering, flushing, commits and compaction
//!
//! Commit protocol:
//! 1. Flush the buffer to a pending segment
//! 2. Resolve pending deletes into per-segment tombstones
//! 3. Drop fully deleted segments, run on-commit merges
//! 4. Write tombstones and the `segments_<gen>` manifest
//! 5. Publish the new snapshot, then collect garbage

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::Arc;
use std::time::Instant;

use parking_lot::MutexGuard;
use roaring::RoaringBitmap;
use tracing::{debug, info, warn};

use super::snapshot::Snapshot;
use super::IndexInner;
use crate::error::{QuarryError, Result};
use crate::models::Document;
use crate::schema::Schema;
use crate::segment::{
    AnalyzedDocument, AnalyzedField, CancellationToken, DocNo, DocumentId, Generation,
    IndexManifest, ManifestEntry, MergeInput, MutableBuffer, SegmentId, SegmentView,
    SegmentWriter, TieredMergePolicy,
};

/// Positions skipped between two values of the same field, so phrases
/// never match across value boundaries
const VALUE_POSITION_GAP: u32 = 1;

/// A flushed segment that is not part of any generation yet
pub(crate) struct PendingSegment {
    entry: ManifestEntry,
    view: SegmentView,
}

/// Mutable state owned by whoever holds the writer lock
pub(crate) struct WriterState {
    buffer: MutableBuffer,
    pending: Vec<PendingSegment>,
    /// Deletes of committed documents, applied at commit
    pending_deletes: BTreeSet<DocumentId>,
    /// Manifest of the published generation
    committed: IndexManifest,
    next_doc_id: DocumentId,
    next_segment_id: SegmentId,
    dirty: bool,
}

impl WriterState {
    pub(crate) fn new(committed: IndexManifest) -> Self {
        Self {
            buffer: MutableBuffer::new(),
            pending: Vec::new(),
            pending_deletes: BTreeSet::new(),
            next_doc_id: committed.next_doc_id,
            next_segment_id: committed.next_segment_id,
            committed,
            dirty: false,
        }
    }

    fn allocate_segment_id(&mut self) -> SegmentId {
        let id = self.next_segment_id;
        self.next_segment_id = id.next();
        id
    }

    /// Manifest skeleton of the next generation with current allocators
    fn next_manifest(&self) -> IndexManifest {
        let mut manifest = self.committed.next_generation();
        manifest.next_doc_id = self.next_doc_id;
        manifest.next_segment_id = self.next_segment_id;
        manifest
    }
}

/// Exclusive handle for modifying the index
///
/// Obtained from [`Index::writer`](super::Index::writer). Added documents
/// and deletes become visible to new searchers only after [`commit`].
/// Dropping the writer without committing keeps uncommitted changes for
/// the next writer; call [`rollback`] to discard them.
///
/// [`commit`]: IndexWriter::commit
/// [`rollback`]: IndexWriter::rollback
pub struct IndexWriter<'a> {
    index: &'a IndexInner,
    state: MutexGuard<'a, WriterState>,
}

impl<'a> IndexWriter<'a> {
    pub(crate) fn new(index: &'a IndexInner, state: MutexGuard<'a, WriterState>) -> Self {
        Self { index, state }
    }

    /// Analyze and buffer a document, returning its assigned id
    pub fn add_document(&mut self, doc: Document) -> Result<DocumentId> {
        let analyzed = analyze_document(&self.index.schema, doc)?;

        let doc_id = self.state.next_doc_id;
        self.state.next_doc_id += 1;
        self.state.buffer.index_document(doc_id, analyzed);
        self.state.dirty = true;

        if self.state.buffer.should_flush(&self.index.config.buffer) {
            self.flush()?;
        }
        Ok(doc_id)
    }

    /// Delete a document; true iff it existed and was live
    ///
    /// The document may be buffered, flushed but uncommitted, or committed.
    pub fn delete(&mut self, doc_id: DocumentId) -> Result<bool> {
        let state = &mut *self.state;

        if state.buffer.delete_document(doc_id) {
            state.dirty = true;
            return Ok(true);
        }

        for pending in state.pending.iter_mut() {
            if let Some(docno) = pending.view.live_docno(doc_id) {
                pending.view = pending.view.with_deleted([docno]);
                state.dirty = true;
                return Ok(true);
            }
        }

        if state.pending_deletes.contains(&doc_id) {
            return Ok(false);
        }
        if self.index.snapshot.load().contains(doc_id) {
            state.pending_deletes.insert(doc_id);
            state.dirty = true;
            return Ok(true);
        }
        Ok(false)
    }

    /// Number of uncommitted documents (buffered or in pending segments)
    pub fn uncommitted_docs(&self) -> u64 {
        let pending: u64 = self
            .state
            .pending
            .iter()
            .map(|p| p.view.live_doc_count() as u64)
            .sum();
        pending + self.state.buffer.live_doc_count() as u64
    }

    pub fn has_uncommitted_changes(&self) -> bool {
        self.state.dirty
    }

    /// Write the buffer to a pending segment invisible to readers
    pub fn flush(&mut self) -> Result<()> {
        if self.state.buffer.is_empty() {
            return Ok(());
        }

        let id = self.state.allocate_segment_id();
        let written = SegmentWriter::new(id).write_from_buffer(&self.state.buffer)?;
        if let Some(result) = written {
            let (entry, view) = self.index.persist_segment(result)?;
            self.state.pending.push(PendingSegment { entry, view });
        }
        self.state.buffer.clear();
        Ok(())
    }

    /// Make every change since the last commit durable and visible
    ///
    /// Returns the new generation, or the current one when nothing changed.
    pub fn commit(&mut self) -> Result<Generation> {
        if !self.state.dirty {
            return Ok(self.state.committed.generation);
        }
        let start = Instant::now();

        self.flush()?;

        let snapshot = self.index.snapshot.load_full();
        let mut segments = self.resolve_deletes(&snapshot)?;
        segments.extend(
            self.state
                .pending
                .iter()
                .map(|p| (p.entry.clone(), p.view.clone())),
        );

        let before = segments.len();
        segments.retain(|(_, view)| view.live_doc_count() > 0);
        if segments.len() < before {
            debug!(dropped = before - segments.len(), "Dropped fully deleted segments");
        }

        if self.index.config.merge_on_commit {
            segments = self.run_merges(segments)?;
        }

        let mut manifest = self.state.next_manifest();
        let tombstones: BTreeMap<SegmentId, &RoaringBitmap> = segments
            .iter()
            .map(|(_, view)| (view.id(), view.deletes.as_ref()))
            .collect();
        if let Some(store) = &self.index.store {
            manifest.tombstones = store.write_tombstones(manifest.generation, &tombstones)?;
        }
        manifest.segments = segments.iter().map(|(entry, _)| entry.clone()).collect();

        let views = segments.into_iter().map(|(_, view)| view).collect();
        let generation = self.publish(manifest, views)?;

        let state = &mut *self.state;
        state.pending.clear();
        state.pending_deletes.clear();
        state.dirty = false;

        let snapshot = self.index.snapshot.load();
        info!(
            generation,
            docs = snapshot.num_docs(),
            deleted = snapshot.deleted_docs(),
            segments = snapshot.segments().len(),
            elapsed_ms = start.elapsed().as_millis() as u64,
            "Committed"
        );
        Ok(generation)
    }

    /// Discard every uncommitted add and delete
    ///
    /// Document ids handed out since the last commit are not reused.
    pub fn rollback(&mut self) {
        let state = &mut *self.state;
        let discarded = state.pending.len();
        for pending in state.pending.drain(..) {
            if let Some(store) = &self.index.store {
                store.discard_segment(pending.view.id());
            }
        }
        state.buffer.clear();
        state.pending_deletes.clear();
        state.dirty = false;
        debug!(discarded_segments = discarded, "Rolled back uncommitted changes");
    }

    /// Merge every committed segment into one, dropping tombstoned documents
    ///
    /// Uncommitted changes are left untouched. On cancellation nothing is
    /// written and the published generation stays current.
    pub fn compact(&mut self, cancel: &CancellationToken) -> Result<Generation> {
        let snapshot = self.index.snapshot.load_full();
        let current = self.state.committed.generation;

        let segments = snapshot.segments();
        let nothing_to_do = match segments {
            [] => true,
            [only] => only.deleted_count() == 0,
            _ => false,
        };
        if nothing_to_do {
            return Ok(current);
        }
        cancel.check()?;

        let start = Instant::now();
        let inputs: Vec<MergeInput> = segments.iter().map(MergeInput::from).collect();
        let policy = TieredMergePolicy::new(self.index.config.merge.clone());
        let Some(candidate) = policy.forced_merge(&inputs) else {
            return Ok(current);
        };

        let id = self.state.allocate_segment_id();
        let merged = SegmentWriter::new(id).merge_segments(segments, cancel)?;
        let merged = match merged {
            Some(result) => Some(self.index.persist_segment(result)?),
            None => None,
        };

        if let Err(e) = cancel.check() {
            self.index.discard_segment(id);
            return Err(e);
        }

        let mut manifest = self.state.next_manifest();
        let mut views = Vec::new();
        if let Some((entry, view)) = merged {
            manifest.segments.push(entry);
            views.push(view);
        }

        let generation = match self.publish(manifest, views) {
            Ok(generation) => generation,
            Err(e) => {
                self.index.discard_segment(id);
                return Err(e);
            }
        };

        info!(
            generation,
            merged = candidate.segment_ids.len(),
            docs = self.index.snapshot.load().num_docs(),
            elapsed_ms = start.elapsed().as_millis() as u64,
            "Compacted index"
        );
        Ok(generation)
    }

    /// Committed segments with this commit's deletes applied
    fn resolve_deletes(&self, snapshot: &Snapshot) -> Result<Vec<(ManifestEntry, SegmentView)>> {
        let mut segments = Vec::with_capacity(snapshot.segments().len());
        for view in snapshot.segments() {
            let entry = self
                .state
                .committed
                .get_segment(view.id())
                .cloned()
                .ok_or_else(|| {
                    QuarryError::corrupt(format!("{} missing from the manifest", view.id()))
                })?;

            let meta = view.reader.meta();
            let deleted: Vec<DocNo> = self
                .state
                .pending_deletes
                .range(meta.min_doc_id..=meta.max_doc_id)
                .filter_map(|&doc_id| view.live_docno(doc_id))
                .collect();

            let view = if deleted.is_empty() {
                view.clone()
            } else {
                view.with_deleted(deleted)
            };
            segments.push((entry, view));
        }
        Ok(segments)
    }

    /// Apply the tiered merge policy to the segments of a commit
    fn run_merges(
        &mut self,
        mut segments: Vec<(ManifestEntry, SegmentView)>,
    ) -> Result<Vec<(ManifestEntry, SegmentView)>> {
        let policy = TieredMergePolicy::new(self.index.config.merge.clone());
        let inputs: Vec<MergeInput> = segments.iter().map(|(_, v)| MergeInput::from(v)).collect();
        let cancel = CancellationToken::new();

        for candidate in policy.select_merges(&inputs) {
            let (selected, rest): (Vec<_>, Vec<_>) = segments
                .into_iter()
                .partition(|(_, v)| candidate.segment_ids.contains(&v.id()));
            segments = rest;

            let views: Vec<SegmentView> = selected.into_iter().map(|(_, v)| v).collect();
            let id = self.state.allocate_segment_id();
            if let Some(result) = SegmentWriter::new(id).merge_segments(&views, &cancel)? {
                segments.push(self.index.persist_segment(result)?);
            }
            info!(
                segment = %id,
                inputs = views.len(),
                reason = ?candidate.reason,
                "Merged segments"
            );
        }
        Ok(segments)
    }

    /// Durably write `manifest` and swap in the matching snapshot
    fn publish(&mut self, manifest: IndexManifest, views: Vec<SegmentView>) -> Result<Generation> {
        if let Some(store) = &self.index.store {
            store.write_manifest(&manifest)?;
        }

        let generation = manifest.generation;
        self.index
            .snapshot
            .store(Arc::new(Snapshot::new(generation, views)));
        self.state.committed = manifest;

        if let Some(store) = &self.index.store {
            let pinned: Vec<SegmentId> = self.state.pending.iter().map(|p| p.view.id()).collect();
            if let Err(e) = store.collect_garbage(self.index.config.generations_to_keep, &pinned) {
                warn!(generation, error = %e, "Garbage collection failed");
            }
        }
        Ok(generation)
    }
}

/// Run every field value through its analyzer and split off stored values
pub(crate) fn analyze_document(schema: &Schema, doc: Document) -> Result<AnalyzedDocument> {
    let mut fields: Vec<AnalyzedField> = Vec::new();
    let mut slots: HashMap<String, (usize, u32)> = HashMap::new();
    let mut stored = Vec::new();

    for value in doc.fields {
        let entry = schema
            .field(&value.name)
            .ok_or_else(|| QuarryError::InvalidRequest(format!("unknown field: {}", value.name)))?;

        if entry.is_indexed() {
            let (_, analyzer) = schema.indexed_field(&value.name)?;
            let (slot, base) = *slots.entry(value.name.clone()).or_insert_with(|| {
                fields.push(AnalyzedField {
                    name: value.name.clone(),
                    ..Default::default()
                });
                (fields.len() - 1, 0)
            });

            let field = &mut fields[slot];
            let mut next_base = base;
            for token in analyzer.analyze(&value.text) {
                let position = base + token.position;
                field.terms.entry(token.text).or_default().push(position);
                field.length += 1;
                next_base = position + 1 + VALUE_POSITION_GAP;
            }
            slots.insert(value.name.clone(), (slot, next_base));
        }

        if entry.is_stored() {
            stored.push(value);
        }
    }

    Ok(AnalyzedDocument { fields, stored })
}
