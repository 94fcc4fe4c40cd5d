//! Index schema
//!
//! The schema declares every field a document may carry, with its options
//! and analyzer. It is fixed at index creation and persisted in `meta.json`.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;

use super::field_type::{FieldEntry, FieldOptions};
use crate::analysis::Analyzer;
use crate::config::AnalyzerConfig;
use crate::error::{QuarryError, Result};

#[derive(Serialize, Deserialize)]
struct SchemaDef {
    fields: Vec<FieldEntry>,
}

/// Declared fields plus one analyzer instance per field
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(from = "SchemaDef", into = "SchemaDef")]
pub struct Schema {
    fields: Vec<FieldEntry>,
    by_name: HashMap<String, usize>,
    analyzers: Vec<Arc<Analyzer>>,
}

impl From<SchemaDef> for Schema {
    fn from(def: SchemaDef) -> Self {
        Schema::from_entries(def.fields)
    }
}

impl From<Schema> for SchemaDef {
    fn from(schema: Schema) -> Self {
        SchemaDef {
            fields: schema.fields,
        }
    }
}

impl Schema {
    pub fn builder() -> SchemaBuilder {
        SchemaBuilder::default()
    }

    fn from_entries(fields: Vec<FieldEntry>) -> Self {
        let by_name = fields
            .iter()
            .enumerate()
            .map(|(i, f)| (f.name.clone(), i))
            .collect();
        let analyzers = fields
            .iter()
            .map(|f| Arc::new(Analyzer::from_config(&f.analyzer)))
            .collect();
        Self {
            fields,
            by_name,
            analyzers,
        }
    }

    pub fn fields(&self) -> &[FieldEntry] {
        &self.fields
    }

    pub fn field(&self, name: &str) -> Option<&FieldEntry> {
        self.by_name.get(name).map(|&i| &self.fields[i])
    }

    pub fn analyzer(&self, name: &str) -> Option<&Arc<Analyzer>> {
        self.by_name.get(name).map(|&i| &self.analyzers[i])
    }

    /// Field entry and analyzer of an indexed field, or `InvalidRequest`
    pub fn indexed_field(&self, name: &str) -> Result<(&FieldEntry, &Arc<Analyzer>)> {
        let idx = *self
            .by_name
            .get(name)
            .ok_or_else(|| QuarryError::InvalidRequest(format!("unknown field: {}", name)))?;
        let entry = &self.fields[idx];
        if !entry.is_indexed() {
            return Err(QuarryError::InvalidRequest(format!(
                "field is not indexed: {}",
                name
            )));
        }
        Ok((entry, &self.analyzers[idx]))
    }

    pub fn indexed_fields(&self) -> impl Iterator<Item = &FieldEntry> {
        self.fields.iter().filter(|f| f.is_indexed())
    }

    pub fn to_json(&self) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec_pretty(self)?)
    }

    pub fn from_json(data: &[u8]) -> Result<Self> {
        Ok(serde_json::from_slice(data)?)
    }
}

/// Builder validating field declarations
#[derive(Default)]
pub struct SchemaBuilder {
    fields: Vec<FieldEntry>,
}

impl SchemaBuilder {
    /// Add a field analyzed with the default standard analyzer
    pub fn add_text_field(self, name: impl Into<String>, options: FieldOptions) -> Self {
        self.add_field(FieldEntry::new(name, options))
    }

    /// Add a field with an explicit analyzer
    pub fn add_analyzed_field(
        self,
        name: impl Into<String>,
        options: FieldOptions,
        analyzer: AnalyzerConfig,
    ) -> Self {
        self.add_field(FieldEntry::new(name, options).with_analyzer(analyzer))
    }

    pub fn add_field(mut self, entry: FieldEntry) -> Self {
        self.fields.push(entry);
        self
    }

    pub fn build(self) -> Result<Schema> {
        if self.fields.is_empty() {
            return Err(QuarryError::InvalidRequest(
                "schema must declare at least one field".to_string(),
            ));
        }

        let mut seen = HashMap::new();
        for entry in &self.fields {
            if entry.name.is_empty() || entry.name.contains('\0') {
                return Err(QuarryError::InvalidRequest(format!(
                    "invalid field name: {:?}",
                    entry.name
                )));
            }
            if !entry.options.is_valid() {
                return Err(QuarryError::InvalidRequest(format!(
                    "field {} must be stored, indexed, or both",
                    entry.name
                )));
            }
            if seen.insert(entry.name.clone(), ()).is_some() {
                return Err(QuarryError::InvalidRequest(format!(
                    "duplicate field: {}",
                    entry.name
                )));
            }
        }

        Ok(Schema::from_entries(self.fields))
    }
}
