use serde::{Deserialize, Serialize};

/// Unique document identifier, assigned by the index on insertion
pub type DocumentId = u64;

/// One value of a named field
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldValue {
    pub name: String,
    pub text: String,
}

impl FieldValue {
    pub fn new(name: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            text: text.into(),
        }
    }
}

/// Document supplied by the caller: named field values in insertion order
///
/// A field may be repeated; each value is analyzed and stored separately.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Document {
    pub fields: Vec<FieldValue>,
}

impl Document {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style field addition
    pub fn with_field(mut self, name: impl Into<String>, text: impl Into<String>) -> Self {
        self.add_field(name, text);
        self
    }

    pub fn add_field(&mut self, name: impl Into<String>, text: impl Into<String>) {
        self.fields.push(FieldValue::new(name, text));
    }

    /// First value of a field
    pub fn get(&self, name: &str) -> Option<&str> {
        self.fields
            .iter()
            .find(|f| f.name == name)
            .map(|f| f.text.as_str())
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }
}

/// Stored fields of a committed document, as retrieved from a segment
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredDocument {
    pub fields: Vec<FieldValue>,
}

impl StoredDocument {
    pub fn new(fields: Vec<FieldValue>) -> Self {
        Self { fields }
    }

    /// First stored value of a field
    pub fn get(&self, name: &str) -> Option<&str> {
        self.fields
            .iter()
            .find(|f| f.name == name)
            .map(|f| f.text.as_str())
    }

    /// All stored values of a field
    pub fn get_all<'a>(&'a self, name: &'a str) -> impl Iterator<Item = &'a str> + 'a {
        self.fields
            .iter()
            .filter(move |f| f.name == name)
            .map(|f| f.text.as_str())
    }
}

/// Current Unix timestamp in milliseconds
pub fn current_timestamp() -> u64 {
    chrono::Utc::now().timestamp_millis().max(0) as u64
}
