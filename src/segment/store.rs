//! On-disk layout of an index directory
//!
//! ```text
//! meta.json              schema, written once
//! segment_<id>/          postings.bin terms.fst term_meta.bin docno_map.bin stats.bin store.bin
//! tombstones_<gen>.bin   deleted docnos per segment
//! segments_<gen>         JSON manifest of generation <gen>
//! ```

use std::collections::{BTreeMap, HashSet};
use std::fs::{self, File};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use roaring::RoaringBitmap;
use tracing::{debug, info, warn};

use super::manifest::{
    manifest_file_name, parse_manifest_name, tombstones_file_name, IndexManifest, ManifestEntry,
    TombstoneRef,
};
use super::reader::{SegmentReader, SegmentView};
use super::tombstones::{decode_tombstones, encode_tombstones};
use super::types::{Generation, SegmentId};
use super::writer::{crc32, SegmentFiles, SegmentWriteResult, SEGMENT_FILES};
use crate::config::RecoveryMode;
use crate::error::{QuarryError, Result};

pub const META_FILE: &str = "meta.json";
const TMP_SUFFIX: &str = ".tmp";
const DAMAGED_SUFFIX: &str = ".damaged";

/// A generation loaded from disk
pub struct LoadedGeneration {
    pub manifest: IndexManifest,
    pub segments: Vec<SegmentView>,
}

/// Persistent storage for segment files, tombstones and manifests
pub struct SegmentStore {
    base_dir: PathBuf,
    sync: bool,
}

impl SegmentStore {
    pub fn open<P: AsRef<Path>>(base_dir: P, sync: bool) -> Result<Self> {
        fs::create_dir_all(&base_dir)?;
        Ok(Self {
            base_dir: base_dir.as_ref().to_path_buf(),
            sync,
        })
    }

    pub fn path(&self) -> &Path {
        &self.base_dir
    }

    fn segment_dir(&self, id: SegmentId) -> PathBuf {
        self.base_dir.join(id.to_string())
    }

    pub fn has_meta(&self) -> bool {
        self.base_dir.join(META_FILE).exists()
    }

    pub fn write_meta(&self, bytes: &[u8]) -> Result<()> {
        self.write_atomic(&self.base_dir.join(META_FILE), bytes)
    }

    pub fn read_meta(&self) -> Result<Vec<u8>> {
        let path = self.base_dir.join(META_FILE);
        fs::read(&path).map_err(|e| match e.kind() {
            io::ErrorKind::NotFound => QuarryError::InvalidRequest(format!(
                "{} is not an index directory (no {})",
                self.base_dir.display(),
                META_FILE
            )),
            _ => QuarryError::Io(e),
        })
    }

    /// Write every file of a new segment and return its manifest entry
    pub fn write_segment(&self, result: &SegmentWriteResult) -> Result<ManifestEntry> {
        let dir = self.segment_dir(result.reader.id());
        fs::create_dir_all(&dir)?;

        for (name, data) in result.files.entries() {
            self.write_file(&dir.join(name), data)?;
        }
        self.sync_dir(&dir)?;

        Ok(ManifestEntry {
            meta: result.meta().clone(),
            checksums: result.files.checksums(),
        })
    }

    /// Remove the files of a segment that never made it into a manifest
    pub fn discard_segment(&self, id: SegmentId) {
        let dir = self.segment_dir(id);
        if let Err(e) = fs::remove_dir_all(&dir) {
            if e.kind() != io::ErrorKind::NotFound {
                warn!(segment = %id, error = %e, "Failed to remove discarded segment");
            }
        }
    }

    /// Load and verify a segment listed in a manifest
    pub fn read_segment(&self, entry: &ManifestEntry) -> Result<SegmentReader> {
        let dir = self.segment_dir(entry.meta.id);
        let mut contents = Vec::with_capacity(SEGMENT_FILES.len());

        for name in SEGMENT_FILES {
            let expected = entry.checksums.get(name).ok_or_else(|| {
                QuarryError::corrupt(format!("{}: no checksum for {}", entry.meta.id, name))
            })?;
            let data = self.read_required(&dir.join(name))?;
            let actual = crc32(&data);
            if actual != *expected {
                return Err(QuarryError::corrupt(format!(
                    "{}/{}: checksum mismatch (expected {:08x}, found {:08x})",
                    entry.meta.id, name, expected, actual
                )));
            }
            contents.push((name.to_string(), data));
        }

        SegmentFiles::from_entries(contents)?.open_reader(entry.meta.clone())
    }

    pub fn write_tombstones(
        &self,
        generation: Generation,
        deletes: &BTreeMap<SegmentId, &RoaringBitmap>,
    ) -> Result<Option<TombstoneRef>> {
        let deleted_docs: u64 = deletes.values().map(|b| b.len()).sum();
        if deleted_docs == 0 {
            return Ok(None);
        }

        let bytes = encode_tombstones(deletes)?;
        let file = tombstones_file_name(generation);
        self.write_file(&self.base_dir.join(&file), &bytes)?;

        Ok(Some(TombstoneRef {
            file,
            checksum: crc32(&bytes),
            deleted_docs,
        }))
    }

    pub fn read_tombstones(
        &self,
        tombstones: &TombstoneRef,
    ) -> Result<BTreeMap<SegmentId, RoaringBitmap>> {
        let data = self.read_required(&self.base_dir.join(&tombstones.file))?;
        if crc32(&data) != tombstones.checksum {
            return Err(QuarryError::corrupt(format!(
                "{}: checksum mismatch",
                tombstones.file
            )));
        }
        decode_tombstones(&data)
    }

    /// Durably write a manifest: temp file, fsync, rename, fsync directory
    pub fn write_manifest(&self, manifest: &IndexManifest) -> Result<()> {
        let path = self.base_dir.join(manifest_file_name(manifest.generation));
        self.write_atomic(&path, &manifest.to_json()?)
    }

    pub fn read_manifest(&self, generation: Generation) -> Result<IndexManifest> {
        let data = self.read_required(&self.base_dir.join(manifest_file_name(generation)))?;
        let manifest = IndexManifest::from_json(&data)?;
        if manifest.generation != generation {
            return Err(QuarryError::corrupt(format!(
                "{} claims generation {}",
                manifest_file_name(generation),
                manifest.generation
            )));
        }
        Ok(manifest)
    }

    /// Committed generations on disk, newest first
    pub fn list_generations(&self) -> Result<Vec<Generation>> {
        let mut generations = Vec::new();
        for entry in fs::read_dir(&self.base_dir)? {
            let entry = entry?;
            if let Some(generation) = entry.file_name().to_str().and_then(parse_manifest_name) {
                generations.push(generation);
            }
        }
        generations.sort_unstable_by(|a, b| b.cmp(a));
        Ok(generations)
    }

    /// Load every segment and the tombstones of a generation
    pub fn load_generation(&self, generation: Generation) -> Result<LoadedGeneration> {
        let manifest = self.read_manifest(generation)?;

        let mut deletes = match &manifest.tombstones {
            Some(tombstones) => self.read_tombstones(tombstones)?,
            None => BTreeMap::new(),
        };

        let mut segments = Vec::with_capacity(manifest.segments.len());
        for entry in &manifest.segments {
            let reader = self.read_segment(entry)?;
            let bitmap = deletes.remove(&entry.meta.id).unwrap_or_default();
            if bitmap.max().is_some_and(|max| max >= reader.doc_count()) {
                return Err(QuarryError::corrupt(format!(
                    "tombstone beyond the documents of {}",
                    entry.meta.id
                )));
            }
            segments.push(SegmentView::new(Arc::new(reader), Arc::new(bitmap)));
        }

        if let Some(id) = deletes.keys().next() {
            return Err(QuarryError::corrupt(format!(
                "tombstones reference unknown {}",
                id
            )));
        }

        Ok(LoadedGeneration { manifest, segments })
    }

    /// Find the newest loadable generation
    ///
    /// Returns `None` for a directory without any manifest. A damaged
    /// generation (checksum mismatch, unparsable or missing file) has its
    /// manifest set aside under `Rollback` and is reported as
    /// `IndexCorrupt` under `Fail`. I/O errors are returned as they are and
    /// leave every manifest in place.
    pub fn recover(&self, mode: RecoveryMode) -> Result<Option<LoadedGeneration>> {
        self.remove_temp_files();

        let generations = self.list_generations()?;
        if generations.is_empty() {
            return Ok(None);
        }

        for generation in &generations {
            match self.load_generation(*generation) {
                Ok(loaded) => {
                    info!(
                        generation,
                        segments = loaded.segments.len(),
                        "Loaded index generation"
                    );
                    return Ok(Some(loaded));
                }
                Err(QuarryError::Io(e)) => {
                    warn!(generation, error = %e, "I/O error while loading generation");
                    return Err(QuarryError::Io(e));
                }
                Err(e) => {
                    let err = into_corruption(*generation, e);
                    if mode == RecoveryMode::Fail {
                        return Err(err);
                    }
                    warn!(generation, error = %err, "Setting aside damaged generation");
                    self.quarantine_manifest(*generation)?;
                }
            }
        }

        Err(QuarryError::corrupt(format!(
            "no loadable generation among {} manifests",
            generations.len()
        )))
    }

    /// Keep the newest `keep` manifests and delete files none of them reference
    ///
    /// Segments in `pinned` belong to no manifest yet but are still in use
    /// (flushed by a writer ahead of its commit) and are never removed.
    pub fn collect_garbage(&self, keep: usize, pinned: &[SegmentId]) -> Result<()> {
        let generations = self.list_generations()?;
        let (kept, dropped) = generations.split_at(keep.max(1).min(generations.len()));

        for generation in dropped {
            self.remove_manifest(*generation);
        }

        let mut live_segments: HashSet<String> = pinned.iter().map(SegmentId::to_string).collect();
        let mut live_files: HashSet<String> = HashSet::new();
        for generation in kept {
            match self.read_manifest(*generation) {
                Ok(manifest) => {
                    live_segments.extend(manifest.segments.iter().map(|e| e.meta.id.to_string()));
                    if let Some(tombstones) = manifest.tombstones {
                        live_files.insert(tombstones.file);
                    }
                }
                // Unreadable manifests pin nothing; skip collection this round
                Err(e) => {
                    warn!(generation, error = %e, "Skipping garbage collection");
                    return Ok(());
                }
            }
        }

        for entry in fs::read_dir(&self.base_dir)? {
            let entry = entry?;
            let Some(name) = entry.file_name().to_str().map(str::to_string) else {
                continue;
            };

            let removal = if name.starts_with("segment_") && entry.path().is_dir() {
                (!live_segments.contains(&name)).then(|| fs::remove_dir_all(entry.path()))
            } else if name.starts_with("tombstones_") {
                (!live_files.contains(&name)).then(|| fs::remove_file(entry.path()))
            } else {
                None
            };

            match removal {
                Some(Ok(())) => debug!(file = %name, "Removed unreferenced index file"),
                Some(Err(e)) => warn!(file = %name, error = %e, "Failed to remove index file"),
                None => {}
            }
        }
        Ok(())
    }

    fn remove_manifest(&self, generation: Generation) {
        let path = self.base_dir.join(manifest_file_name(generation));
        if let Err(e) = fs::remove_file(&path) {
            if e.kind() != io::ErrorKind::NotFound {
                warn!(generation, error = %e, "Failed to remove manifest");
            }
        }
    }

    /// Rename a damaged manifest so it is no longer listed as a generation
    fn quarantine_manifest(&self, generation: Generation) -> Result<()> {
        let name = manifest_file_name(generation);
        let from = self.base_dir.join(&name);
        let to = self.base_dir.join(format!("{}{}", name, DAMAGED_SUFFIX));
        fs::rename(&from, &to)?;
        self.sync_dir(&self.base_dir)
    }

    fn remove_temp_files(&self) {
        let Ok(entries) = fs::read_dir(&self.base_dir) else {
            return;
        };
        for entry in entries.flatten() {
            let is_tmp = entry
                .file_name()
                .to_str()
                .is_some_and(|name| name.ends_with(TMP_SUFFIX));
            if is_tmp {
                debug!(path = %entry.path().display(), "Removing stray temp file");
                if let Err(e) = fs::remove_file(entry.path()) {
                    warn!(path = %entry.path().display(), error = %e, "Failed to remove temp file");
                }
            }
        }
    }

    fn read_required(&self, path: &Path) -> Result<Vec<u8>> {
        fs::read(path).map_err(|e| match e.kind() {
            io::ErrorKind::NotFound => {
                QuarryError::corrupt(format!("missing file {}", path.display()))
            }
            _ => QuarryError::Io(e),
        })
    }

    fn write_file(&self, path: &Path, data: &[u8]) -> Result<()> {
        let mut file = File::create(path)?;
        file.write_all(data)?;
        if self.sync {
            file.sync_all()?;
        }
        Ok(())
    }

    fn write_atomic(&self, path: &Path, data: &[u8]) -> Result<()> {
        let mut tmp = path.as_os_str().to_owned();
        tmp.push(TMP_SUFFIX);
        let tmp = PathBuf::from(tmp);

        self.write_file(&tmp, data)?;
        fs::rename(&tmp, path)?;
        self.sync_dir(&self.base_dir)
    }

    fn sync_dir(&self, dir: &Path) -> Result<()> {
        // Directories cannot be opened for fsync on every platform
        if self.sync && cfg!(unix) {
            File::open(dir)?.sync_all()?;
        }
        Ok(())
    }
}

fn into_corruption(generation: Generation, err: QuarryError) -> QuarryError {
    match err {
        QuarryError::IndexCorrupt(msg) => {
            QuarryError::corrupt(format!("generation {}: {}", generation, msg))
        }
        other => QuarryError::corrupt(format!("generation {}: {}", generation, other)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::FieldValue;
    use crate::segment::buffer::{AnalyzedDocument, AnalyzedField, MutableBuffer};
    use crate::segment::writer::{SegmentWriter, POSTINGS_FILE, STORE_FILE};
    use std::collections::HashMap;
    use tempfile::TempDir;

    fn write_generation(store: &SegmentStore, manifest: &mut IndexManifest, texts: &[&str]) {
        let mut buffer = MutableBuffer::new();
        for text in texts {
            let mut terms: HashMap<String, Vec<u32>> = HashMap::new();
            for (pos, token) in text.split_whitespace().enumerate() {
                terms.entry(token.to_string()).or_default().push(pos as u32);
            }
            buffer.index_document(
                manifest.next_doc_id,
                AnalyzedDocument {
                    fields: vec![AnalyzedField {
                        name: "body".to_string(),
                        length: terms.values().map(Vec::len).sum::<usize>() as u32,
                        terms,
                    }],
                    stored: vec![FieldValue::new("body", *text)],
                },
            );
            manifest.next_doc_id += 1;
        }

        let mut next = manifest.next_generation();
        next.segments = manifest.segments.clone();
        let id = next.allocate_segment_id();
        let result = SegmentWriter::new(id).write_from_buffer(&buffer).unwrap().unwrap();
        next.segments.push(store.write_segment(&result).unwrap());
        store.write_manifest(&next).unwrap();
        *manifest = next;
    }

    #[test]
    fn test_write_and_recover() {
        let dir = TempDir::new().unwrap();
        let store = SegmentStore::open(dir.path(), true).unwrap();
        assert!(store.recover(RecoveryMode::Rollback).unwrap().is_none());

        let mut manifest = IndexManifest::new();
        write_generation(&store, &mut manifest, &["hello world", "hello there"]);

        let loaded = store.recover(RecoveryMode::Fail).unwrap().unwrap();
        assert_eq!(loaded.manifest.generation, 1);
        assert_eq!(loaded.segments.len(), 1);
        assert_eq!(loaded.segments[0].reader.doc_frequency("body", "hello"), 2);
    }

    #[test]
    fn test_tombstones_roundtrip() {
        let dir = TempDir::new().unwrap();
        let store = SegmentStore::open(dir.path(), false).unwrap();
        let mut manifest = IndexManifest::new();
        write_generation(&store, &mut manifest, &["a", "b", "c"]);

        let bitmap: RoaringBitmap = [1u32].into_iter().collect();
        let deletes = BTreeMap::from([(SegmentId::new(0), &bitmap)]);
        let mut next = manifest.next_generation();
        next.segments = manifest.segments.clone();
        next.tombstones = store.write_tombstones(next.generation, &deletes).unwrap();
        store.write_manifest(&next).unwrap();

        let loaded = store.load_generation(2).unwrap();
        assert_eq!(loaded.manifest.deleted_doc_count(), 1);
        assert!(loaded.segments[0].is_deleted(crate::segment::DocNo(1)));
    }

    #[test]
    fn test_corrupt_latest_generation_rolls_back() {
        let dir = TempDir::new().unwrap();
        let store = SegmentStore::open(dir.path(), false).unwrap();
        let mut manifest = IndexManifest::new();
        write_generation(&store, &mut manifest, &["first"]);
        write_generation(&store, &mut manifest, &["second"]);

        // Flip a byte in the newest segment
        let path = dir.path().join("segment_1").join(POSTINGS_FILE);
        let mut data = fs::read(&path).unwrap();
        data[0] ^= 0xFF;
        fs::write(&path, data).unwrap();

        assert!(matches!(
            store.recover(RecoveryMode::Fail),
            Err(QuarryError::IndexCorrupt(_))
        ));

        let loaded = store.recover(RecoveryMode::Rollback).unwrap().unwrap();
        assert_eq!(loaded.manifest.generation, 1);
        assert_eq!(store.list_generations().unwrap(), vec![1]);
        assert!(dir.path().join("segments_2.damaged").exists());
    }

    #[test]
    fn test_io_error_keeps_generation() {
        let dir = TempDir::new().unwrap();
        let store = SegmentStore::open(dir.path(), false).unwrap();
        let mut manifest = IndexManifest::new();
        write_generation(&store, &mut manifest, &["first"]);
        write_generation(&store, &mut manifest, &["second"]);

        // A directory where a file is expected fails to read without being corrupt
        let path = dir.path().join("segment_1").join(STORE_FILE);
        let data = fs::read(&path).unwrap();
        fs::remove_file(&path).unwrap();
        fs::create_dir(&path).unwrap();

        for mode in [RecoveryMode::Rollback, RecoveryMode::Fail] {
            assert!(matches!(store.recover(mode), Err(QuarryError::Io(_))));
        }
        assert_eq!(store.list_generations().unwrap(), vec![2, 1]);

        fs::remove_dir(&path).unwrap();
        fs::write(&path, data).unwrap();
        let loaded = store.recover(RecoveryMode::Fail).unwrap().unwrap();
        assert_eq!(loaded.manifest.generation, 2);
    }

    #[test]
    fn test_all_generations_corrupt() {
        let dir = TempDir::new().unwrap();
        let store = SegmentStore::open(dir.path(), false).unwrap();
        fs::write(dir.path().join(manifest_file_name(1)), b"not json").unwrap();

        assert!(matches!(
            store.recover(RecoveryMode::Rollback),
            Err(QuarryError::IndexCorrupt(_))
        ));
    }

    #[test]
    fn test_garbage_collection_keeps_recent_generations() {
        let dir = TempDir::new().unwrap();
        let store = SegmentStore::open(dir.path(), false).unwrap();
        let mut manifest = IndexManifest::new();
        write_generation(&store, &mut manifest, &["one"]);

        // Generation 2 replaces segment 0 with segment 1
        let mut next = manifest.next_generation();
        let id = next.allocate_segment_id();
        let mut buffer = MutableBuffer::new();
        buffer.index_document(5, AnalyzedDocument::default());
        let result = SegmentWriter::new(id).write_from_buffer(&buffer).unwrap().unwrap();
        next.segments.push(store.write_segment(&result).unwrap());
        store.write_manifest(&next).unwrap();

        fs::write(dir.path().join("segments_9.tmp"), b"partial").unwrap();

        store.collect_garbage(2, &[]).unwrap();
        assert!(dir.path().join("segment_0").exists());

        store.collect_garbage(1, &[SegmentId::new(0)]).unwrap();
        assert!(dir.path().join("segment_0").exists());

        store.collect_garbage(1, &[]).unwrap();
        assert!(!dir.path().join("segment_0").exists());
        assert!(dir.path().join("segment_1").exists());
        assert_eq!(store.list_generations().unwrap(), vec![2]);

        store.recover(RecoveryMode::Fail).unwrap();
        assert!(!dir.path().join("segments_9.tmp").exists());
    }
}
