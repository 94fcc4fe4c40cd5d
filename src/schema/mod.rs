//! Schema and field options
//!
//! - Field options (stored / indexed)
//! - Per-field analyzer selection
//! - Schema validation and persistence

mod field_type;
mod mapping;

pub use field_type::{FieldEntry, FieldOptions};
pub use mapping::{Schema, SchemaBuilder};
