//! Field options
//!
//! Each field is independently stored (retrievable verbatim), indexed
//! (searchable), or both.

use serde::{Deserialize, Serialize};

use crate::config::AnalyzerConfig;

/// How a field's values are kept by the index
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldOptions {
    /// Keep the raw text in the stored-field store
    pub stored: bool,
    /// Analyze and add tokens to the inverted index
    pub indexed: bool,
}

impl FieldOptions {
    /// Indexed, not stored
    pub const TEXT: FieldOptions = FieldOptions {
        stored: false,
        indexed: true,
    };

    /// Stored, not indexed
    pub const STORED: FieldOptions = FieldOptions {
        stored: true,
        indexed: false,
    };

    /// Indexed and stored
    pub const TEXT_STORED: FieldOptions = FieldOptions {
        stored: true,
        indexed: true,
    };

    pub fn is_valid(&self) -> bool {
        self.stored || self.indexed
    }
}

/// A declared field
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct FieldEntry {
    pub name: String,
    pub options: FieldOptions,
    /// Analyzer used for indexing, querying and highlighting this field
    #[serde(default)]
    pub analyzer: AnalyzerConfig,
}

impl FieldEntry {
    pub fn new(name: impl Into<String>, options: FieldOptions) -> Self {
        Self {
            name: name.into(),
            options,
            analyzer: AnalyzerConfig::default(),
        }
    }

    pub fn with_analyzer(mut self, analyzer: AnalyzerConfig) -> Self {
        self.analyzer = analyzer;
        self
    }

    pub fn is_indexed(&self) -> bool {
        self.options.indexed
    }

    pub fn is_stored(&self) -> bool {
        self.options.stored
    }
}
