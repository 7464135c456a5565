//! Domain types for the content export engine.
//!
//! # Module Organization
//!
//! - [`record`] - Records, record references and field values
//! - [`field`] - Field metadata (property types, reference targets)
//! - [`schema`] - Kind-level schema (key fields, revisionability, bundles)
//!
//! All public types are re-exported at this module level and at the crate
//! root:
//!
//! ```
//! use ce_core::{FieldDefinition, KindSchema, Record, RecordRef};
//! ```

mod field;
mod record;
mod schema;

// Re-export all public types
pub use field::{FieldDefinition, PropertyType, ReferenceTarget};
pub use record::{FieldItem, FieldValue, ParseRecordRefError, Record, RecordRef, Translation};
pub use schema::{KindKeys, KindSchema};
