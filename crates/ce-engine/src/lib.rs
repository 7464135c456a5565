//! The export engine: turns a live content graph into a portable,
//! replayable import package.
//!
//! A run walks the reference closure from the requested seed kinds, writes
//! one JSON snapshot per discovered record, copies the binary assets of
//! exported file records, synthesizes one declarative import-pipeline
//! definition per exported `(kind, bundle)` group and packs everything,
//! plus a replayable package descriptor and a generated entry point, into
//! one gzipped tarball.
//!
//! The engine is driven one unit of work at a time through
//! [`ExportProcessor::process_step`], with all mutable state in an
//! externally persisted [`RunContext`]; [`BatchRunner`] provides the
//! simple run-to-completion loop on top. Access to the content system goes
//! through the [`store`] traits, so the engine never assumes a concrete
//! backend.

#![deny(clippy::all)]
#![warn(missing_docs)]

pub mod archive;
pub mod context;
pub mod definition;
pub mod discovery;
pub mod error;
pub mod processor;
pub mod runner;
pub mod serializer;
pub mod store;
pub mod template;

pub use archive::ArchiveBuilder;
pub use context::{
    ContextStore, DiscoverySet, ExportResult, ExportedIds, JsonContextStore, MemoryContextStore,
    RunContext, Sandbox,
};
pub use definition::{DefinitionSynthesizer, MigrationDefinition};
pub use discovery::Discoverer;
pub use error::ExportError;
pub use processor::{ExportProcessor, LOCK_NAME, Step};
pub use runner::BatchRunner;
pub use serializer::serialize_record;
pub use store::{
    FileAssetStore, FileLockManager, LockManager, MemoryBackend, MemoryLockManager, RecordStore,
    SchemaProvider, StoreError, split_uri,
};
pub use template::{TemplateError, TemplateValues, render_entry_point};
