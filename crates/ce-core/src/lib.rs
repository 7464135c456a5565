//! Core types, errors, and utilities for the content export tool.
//!
//! This crate provides the foundational types used across the workspace:
//!
//! - Domain types (`Record`, `RecordRef`, `FieldDefinition`, `KindSchema`)
//! - The immutable per-run [`ExportJobConfig`] and the replayable
//!   [`PackageDescriptor`]
//! - Error types for consistent error handling
//! - Type aliases for `FxHashMap`/`FxHashSet` (faster than std)
//! - Natural (numeric-aware) string ordering

#![deny(clippy::all)]
#![warn(missing_docs)]

pub mod config;
pub mod error;
pub mod hash;
pub mod sort;
pub mod types;

pub use config::{
    DEFAULT_DATA_SUBDIR, DEFAULT_FILE_SUBDIR, DEFAULT_GROUP, DEFAULT_HUMAN_NAME,
    DEFAULT_ID_PREFIX, DEFAULT_MODULE_NAME, ExportJobConfig, ExportSettings, PackageDescriptor,
};
pub use error::ConfigError;
pub use hash::{FxBuildHasher, FxHashMap, FxHashSet, fx_hash_map, fx_hash_set};
pub use sort::{natural_cmp, natural_sort};
pub use types::{
    FieldDefinition, FieldItem, FieldValue, KindKeys, KindSchema, ParseRecordRefError,
    PropertyType, Record, RecordRef, ReferenceTarget, Translation,
};
