//! Collaborator seams of the export engine.
//!
//! The engine never talks to a concrete backend. Everything it consumes is
//! behind one of four traits:
//!
//! - [`RecordStore`]: list ids of a kind (access-unchecked) and load records
//! - [`SchemaProvider`]: kind schemas and field definitions
//! - [`FileAssetStore`]: binary content addressed by `scheme://path` URIs
//! - [`LockManager`]: a named advisory lock guaranteeing one export at a time
//!
//! [`MemoryBackend`] implements the first three in memory and backs both the
//! CLI's JSON dataset adapter and the engine's own tests.
//! [`FileLockManager`] and [`MemoryLockManager`] implement the lock seam for
//! cross-process and in-process use respectively.

use std::collections::BTreeMap;
use std::fs;
use std::sync::Mutex;

use camino::Utf8PathBuf;
use ce_core::{FieldDefinition, FxHashSet, KindSchema, Record, RecordRef};

/// Errors produced by collaborator stores.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// The backend failed to answer a query.
    #[error("backend failure: {0}")]
    Backend(String),

    /// A file asset could not be read.
    #[error("asset '{uri}' is not available: {reason}")]
    MissingAsset {
        /// The asset URI.
        uri: String,
        /// Why it is unavailable.
        reason: String,
    },

    /// An I/O error inside a filesystem-backed store.
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl StoreError {
    /// Creates a new [`StoreError::Backend`] error.
    #[inline]
    pub fn backend(message: impl Into<String>) -> Self {
        Self::Backend(message.into())
    }

    /// Creates a new [`StoreError::MissingAsset`] error.
    #[inline]
    pub fn missing_asset(uri: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::MissingAsset {
            uri: uri.into(),
            reason: reason.into(),
        }
    }
}

/// Read access to the record storage backend.
pub trait RecordStore {
    /// Lists every currently visible id of the given kind.
    ///
    /// The listing is access-unchecked: it must return all records of the
    /// kind, not just those visible to some user.
    fn list_ids(&self, kind: &str) -> Result<Vec<String>, StoreError>;

    /// Loads one record by its composite key.
    ///
    /// Returns `Ok(None)` if the record does not exist.
    fn load(&self, record_ref: &RecordRef) -> Result<Option<Record>, StoreError>;
}

/// Read access to the schema / field-metadata service.
pub trait SchemaProvider {
    /// Returns the exportable content kinds, minus configured exclusions.
    fn content_kinds(&self) -> Vec<String>;

    /// Returns the schema of a kind, if the kind exists and is exportable.
    fn kind_schema(&self, kind: &str) -> Option<KindSchema>;

    /// Returns the field definitions of a `(kind, bundle)` group.
    ///
    /// For bundle-less kinds the bundle is `None`.
    fn field_definitions(&self, kind: &str, bundle: Option<&str>) -> Vec<FieldDefinition>;
}

/// Read access to the file-asset store.
pub trait FileAssetStore {
    /// Reads the binary content of an asset by its `scheme://path` URI.
    fn read(&self, uri: &str) -> Result<Vec<u8>, StoreError>;
}

/// Splits a `scheme://path` URI into its scheme and path parts.
///
/// URIs without a scheme separator yield `(None, uri)`.
///
/// # Examples
///
/// ```
/// use ce_engine::store::split_uri;
///
/// assert_eq!(split_uri("public://photos/a.png"), (Some("public"), "photos/a.png"));
/// assert_eq!(split_uri("plain-path.png"), (None, "plain-path.png"));
/// ```
#[must_use]
pub fn split_uri(uri: &str) -> (Option<&str>, &str) {
    match uri.split_once("://") {
        Some((scheme, path)) if !scheme.is_empty() => (Some(scheme), path),
        _ => (None, uri),
    }
}

/// A named advisory lock guaranteeing one concurrent export.
///
/// Acquisition is non-blocking: a second holder fails immediately rather
/// than queuing.
pub trait LockManager {
    /// Attempts to acquire the named lock. Returns `false` if held.
    fn acquire(&self, name: &str) -> bool;

    /// Releases the named lock.
    ///
    /// Releasing a lock that is not held is a no-op.
    fn release(&self, name: &str);

    /// Returns `true` if the named lock could currently be acquired.
    fn may_be_available(&self, name: &str) -> bool;
}

/// Cross-process advisory locking through exclusively created lock files.
///
/// `acquire` creates `<base>/<name>.lock` with `create_new`, which is atomic
/// on every platform the workspace targets. A crashed holder leaves a stale
/// lock file behind; removing it is the documented manual recovery.
#[derive(Debug, Clone)]
pub struct FileLockManager {
    base: Utf8PathBuf,
}

impl FileLockManager {
    /// Creates a lock manager rooted at the given directory.
    pub fn new(base: impl Into<Utf8PathBuf>) -> Self {
        Self { base: base.into() }
    }

    fn lock_path(&self, name: &str) -> Utf8PathBuf {
        self.base.join(format!("{name}.lock"))
    }
}

impl LockManager for FileLockManager {
    fn acquire(&self, name: &str) -> bool {
        if fs::create_dir_all(self.base.as_std_path()).is_err() {
            return false;
        }
        fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(self.lock_path(name).as_std_path())
            .is_ok()
    }

    fn release(&self, name: &str) {
        // Removal failure means the lock was already gone or the directory
        // vanished; either way there is nothing left to hold.
        let _ = fs::remove_file(self.lock_path(name).as_std_path());
    }

    fn may_be_available(&self, name: &str) -> bool {
        !self.lock_path(name).exists()
    }
}

/// In-process lock manager for tests and embedded use.
#[derive(Debug, Default)]
pub struct MemoryLockManager {
    held: Mutex<FxHashSet<String>>,
}

impl MemoryLockManager {
    /// Creates a lock manager with no locks held.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

impl LockManager for MemoryLockManager {
    fn acquire(&self, name: &str) -> bool {
        self.held
            .lock()
            .map(|mut held| held.insert(name.to_owned()))
            .unwrap_or(false)
    }

    fn release(&self, name: &str) {
        if let Ok(mut held) = self.held.lock() {
            held.remove(name);
        }
    }

    fn may_be_available(&self, name: &str) -> bool {
        self.held
            .lock()
            .map(|held| !held.contains(name))
            .unwrap_or(false)
    }
}

/// In-memory record, schema and asset backend.
///
/// Field definitions are stored per kind with optional per-bundle overrides;
/// a lookup falls back to the kind-level definitions when no bundle-specific
/// set was registered.
#[derive(Debug, Default, Clone)]
pub struct MemoryBackend {
    schemas: BTreeMap<String, KindSchema>,
    fields: BTreeMap<String, Vec<FieldDefinition>>,
    records: BTreeMap<String, Record>,
    assets: BTreeMap<String, Vec<u8>>,
    excluded: FxHashSet<String>,
}

impl MemoryBackend {
    /// Creates an empty backend.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a kind schema.
    pub fn insert_schema(&mut self, schema: KindSchema) {
        self.schemas.insert(schema.kind.clone(), schema);
    }

    /// Registers field definitions for a kind or a `(kind, bundle)` group.
    pub fn insert_fields(
        &mut self,
        kind: &str,
        bundle: Option<&str>,
        definitions: Vec<FieldDefinition>,
    ) {
        self.fields.insert(fields_key(kind, bundle), definitions);
    }

    /// Registers a record.
    pub fn insert_record(&mut self, record: Record) {
        self.records
            .insert(record.record_ref().canonical(), record);
    }

    /// Registers a binary asset under its URI.
    pub fn insert_asset(&mut self, uri: impl Into<String>, bytes: Vec<u8>) {
        self.assets.insert(uri.into(), bytes);
    }

    /// Marks a kind as excluded from export.
    pub fn exclude_kind(&mut self, kind: impl Into<String>) {
        self.excluded.insert(kind.into());
    }

    /// Returns the number of registered records.
    #[must_use]
    pub fn record_count(&self) -> usize {
        self.records.len()
    }
}

fn fields_key(kind: &str, bundle: Option<&str>) -> String {
    match bundle {
        Some(bundle) => format!("{kind}:{bundle}"),
        None => kind.to_owned(),
    }
}

impl RecordStore for MemoryBackend {
    fn list_ids(&self, kind: &str) -> Result<Vec<String>, StoreError> {
        Ok(self
            .records
            .values()
            .filter(|r| r.kind == kind)
            .map(|r| r.id.clone())
            .collect())
    }

    fn load(&self, record_ref: &RecordRef) -> Result<Option<Record>, StoreError> {
        Ok(self.records.get(&record_ref.canonical()).cloned())
    }
}

impl SchemaProvider for MemoryBackend {
    fn content_kinds(&self) -> Vec<String> {
        self.schemas
            .keys()
            .filter(|kind| !self.excluded.contains(kind.as_str()))
            .cloned()
            .collect()
    }

    fn kind_schema(&self, kind: &str) -> Option<KindSchema> {
        if self.excluded.contains(kind) {
            return None;
        }
        self.schemas.get(kind).cloned()
    }

    fn field_definitions(&self, kind: &str, bundle: Option<&str>) -> Vec<FieldDefinition> {
        bundle
            .and_then(|b| self.fields.get(&fields_key(kind, Some(b))))
            .or_else(|| self.fields.get(kind))
            .cloned()
            .unwrap_or_default()
    }
}

impl FileAssetStore for MemoryBackend {
    fn read(&self, uri: &str) -> Result<Vec<u8>, StoreError> {
        self.assets
            .get(uri)
            .cloned()
            .ok_or_else(|| StoreError::missing_asset(uri, "not registered"))
    }
}
