use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::error::Result;
use crate::segment::{Bm25Params, BufferConfig, MergePolicyConfig};

/// Token segmentation strategy of an analyzer
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AnalyzerKind {
    /// Unicode word boundaries, alphanumeric runs
    #[default]
    Standard,
    /// Dictionary segmentation for Chinese/Japanese/Korean text
    Cjk,
}

/// Analyzer configuration, fixed per field when the index is created
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct AnalyzerConfig {
    #[serde(default)]
    pub kind: AnalyzerKind,
    pub lowercase: bool,
    pub remove_stopwords: bool,
    pub stem: bool,
    pub min_token_length: usize,
    pub max_token_length: usize,
    pub language: String,
}

impl Default for AnalyzerConfig {
    fn default() -> Self {
        Self {
            kind: AnalyzerKind::Standard,
            lowercase: true,
            remove_stopwords: false,
            stem: false,
            min_token_length: 1,
            max_token_length: 255,
            language: "english".to_string(),
        }
    }
}

impl AnalyzerConfig {
    /// Standard analyzer with default settings
    pub fn standard() -> Self {
        Self::default()
    }

    /// Script-aware analyzer for CJK text
    pub fn cjk() -> Self {
        Self {
            kind: AnalyzerKind::Cjk,
            ..Default::default()
        }
    }

    /// English analyzer with stop-word removal and stemming
    pub fn english() -> Self {
        Self {
            remove_stopwords: true,
            stem: true,
            ..Default::default()
        }
    }

    pub fn with_stopwords(mut self, remove: bool) -> Self {
        self.remove_stopwords = remove;
        self
    }

    pub fn with_stemming(mut self, stem: bool) -> Self {
        self.stem = stem;
        self
    }

    pub fn with_language(mut self, language: impl Into<String>) -> Self {
        self.language = language.into();
        self
    }

    pub fn with_token_length(mut self, min: usize, max: usize) -> Self {
        self.min_token_length = min;
        self.max_token_length = max;
        self
    }
}

/// What `Index::open` does when the newest generation fails validation
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RecoveryMode {
    /// Discard the damaged generation and load the previous one
    #[default]
    Rollback,
    /// Surface `IndexCorrupt` to the caller
    Fail,
}

/// Index-wide configuration
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct IndexConfig {
    #[serde(default)]
    pub buffer: BufferConfig,
    #[serde(default)]
    pub bm25: Bm25Params,
    #[serde(default)]
    pub merge: MergePolicyConfig,
    /// Run the tiered merge policy as part of every commit
    pub merge_on_commit: bool,
    /// Committed generations retained on disk for rollback
    pub generations_to_keep: usize,
    #[serde(default)]
    pub recovery: RecoveryMode,
    /// Upper bound on the number of terms a fuzzy query expands to
    pub max_fuzzy_expansions: usize,
    /// fsync segment files and manifests on commit
    pub sync_on_commit: bool,
}

impl Default for IndexConfig {
    fn default() -> Self {
        Self {
            buffer: BufferConfig::default(),
            bm25: Bm25Params::default(),
            merge: MergePolicyConfig::default(),
            merge_on_commit: true,
            generations_to_keep: 2,
            recovery: RecoveryMode::Rollback,
            max_fuzzy_expansions: 50,
            sync_on_commit: true,
        }
    }
}

impl IndexConfig {
    /// Load configuration from a JSON file
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self> {
        let bytes = std::fs::read(path)?;
        Ok(serde_json::from_slice(&bytes)?)
    }

    /// Apply a workload profile to this configuration
    pub fn with_profile(mut self, profile: WorkloadProfile) -> Self {
        profile.apply_to(&mut self);
        self
    }

    pub fn with_buffer(mut self, buffer: BufferConfig) -> Self {
        self.buffer = buffer;
        self
    }

    pub fn with_bm25(mut self, bm25: Bm25Params) -> Self {
        self.bm25 = bm25;
        self
    }

    pub fn with_merge_policy(mut self, merge: MergePolicyConfig) -> Self {
        self.merge = merge;
        self
    }

    pub fn with_merge_on_commit(mut self, enabled: bool) -> Self {
        self.merge_on_commit = enabled;
        self
    }

    pub fn with_recovery(mut self, recovery: RecoveryMode) -> Self {
        self.recovery = recovery;
        self
    }

    pub fn with_generations_to_keep(mut self, generations: usize) -> Self {
        self.generations_to_keep = generations.max(1);
        self
    }

    pub fn with_max_fuzzy_expansions(mut self, max: usize) -> Self {
        self.max_fuzzy_expansions = max;
        self
    }
}

/// Configuration profiles for different workloads
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum WorkloadProfile {
    /// Small buffers, merge on every commit
    Interactive,
    Balanced,
    /// Large buffers, merges deferred to explicit compaction
    BulkLoad,
}

impl WorkloadProfile {
    /// Buffered documents before a flush to a pending segment
    pub fn buffer_max_docs(&self) -> usize {
        match self {
            WorkloadProfile::Interactive => 1_000,
            WorkloadProfile::Balanced => 10_000,
            WorkloadProfile::BulkLoad => 100_000,
        }
    }

    pub fn merge_on_commit(&self) -> bool {
        !matches!(self, WorkloadProfile::BulkLoad)
    }

    pub fn apply_to(&self, config: &mut IndexConfig) {
        config.buffer.max_docs = self.buffer_max_docs();
        config.merge_on_commit = self.merge_on_commit();
    }
}

impl std::str::FromStr for AnalyzerKind {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "standard" => Ok(AnalyzerKind::Standard),
            "cjk" => Ok(AnalyzerKind::Cjk),
            other => Err(format!("unknown analyzer: {}", other)),
        }
    }
}

impl std::str::FromStr for WorkloadProfile {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "interactive" => Ok(WorkloadProfile::Interactive),
            "balanced" => Ok(WorkloadProfile::Balanced),
            "bulk" | "bulk-load" => Ok(WorkloadProfile::BulkLoad),
            other => Err(format!("unknown workload profile: {}", other)),
        }
    }
}
