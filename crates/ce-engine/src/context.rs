//! The externally owned, serializable run context.
//!
//! A single export can be interrupted by time or memory limits, so no step
//! keeps working state on the stack. Everything mutable lives in a
//! [`RunContext`] that round-trips through serde between step invocations:
//! the per-step scratch space ([`Sandbox`]), the durable accumulator
//! ([`ExportResult`]) and the advisory progress fraction.
//!
//! A [`ContextStore`] owns persistence. The driver loads the context, hands
//! it to the processor for exactly one unit of work, and saves it back.
//! That discipline is what makes a run resumable across short-lived
//! invocations.

use std::collections::BTreeMap;

use camino::Utf8PathBuf;
use ce_core::{FxHashSet, RecordRef, natural_sort};
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::error::ExportError;

/// The discovery algorithm's to-do and done sets.
///
/// `to_export` is the frontier in insertion order (a superset of `checked`);
/// `checked` is the visited set. Discovery is complete when every frontier
/// member has been checked; membership checks make cycles terminate
/// naturally without explicit cycle detection.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DiscoverySet {
    /// Frontier members in insertion order.
    to_export: Vec<RecordRef>,
    /// Frontier membership, for O(1) duplicate checks.
    members: FxHashSet<RecordRef>,
    /// Visited members. Always a subset of `members`.
    checked: FxHashSet<RecordRef>,
}

impl DiscoverySet {
    /// Creates an empty discovery set.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a reference to the frontier.
    ///
    /// Returns `true` if the reference was new.
    pub fn push(&mut self, record_ref: RecordRef) -> bool {
        if self.members.insert(record_ref.clone()) {
            self.to_export.push(record_ref);
            true
        } else {
            false
        }
    }

    /// Returns the first frontier member that has not been checked yet.
    #[must_use]
    pub fn next_unchecked(&self) -> Option<RecordRef> {
        self.to_export
            .iter()
            .find(|r| !self.checked.contains(*r))
            .cloned()
    }

    /// Marks a frontier member as checked.
    pub fn mark_checked(&mut self, record_ref: RecordRef) {
        debug_assert!(self.members.contains(&record_ref));
        self.checked.insert(record_ref);
    }

    /// Returns the frontier size.
    #[must_use]
    pub fn total(&self) -> usize {
        self.to_export.len()
    }

    /// Returns the number of checked members.
    #[must_use]
    pub fn checked_count(&self) -> usize {
        self.checked.len()
    }

    /// Returns `true` when every frontier member has been checked.
    #[must_use]
    pub fn is_complete(&self) -> bool {
        self.checked.len() == self.to_export.len()
    }
}

/// Per-kind exported identifiers: grouped by bundle, or a flat list for
/// bundle-less kinds.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ExportedIds {
    /// `bundle → ordered ids` for kinds with bundles.
    Bundled(BTreeMap<String, Vec<String>>),
    /// Ordered ids for bundle-less kinds.
    Flat(Vec<String>),
}

impl ExportedIds {
    /// Returns every id regardless of bundle, in stored order.
    #[must_use]
    pub fn all_ids(&self) -> Vec<String> {
        match self {
            Self::Bundled(bundles) => bundles.values().flatten().cloned().collect(),
            Self::Flat(ids) => ids.clone(),
        }
    }

    /// Returns the bundles present, or `None` for a flat list.
    #[must_use]
    pub fn bundles(&self) -> Option<Vec<&str>> {
        match self {
            Self::Bundled(bundles) => Some(bundles.keys().map(String::as_str).collect()),
            Self::Flat(_) => None,
        }
    }

    /// Returns `true` if the given bundle holds at least one exported id.
    #[must_use]
    pub fn contains_bundle(&self, bundle: &str) -> bool {
        match self {
            Self::Bundled(bundles) => bundles.contains_key(bundle),
            Self::Flat(_) => false,
        }
    }
}

/// The durable accumulator of one export run.
///
/// Lives inside the persisted context for exactly one run and is discarded
/// after finalize.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ExportResult {
    /// The final closure: sentinel records removed, natural-sorted.
    pub discovered: Vec<RecordRef>,
    /// Exported ids per kind (and bundle, where the kind has them).
    pub exported: BTreeMap<String, ExportedIds>,
    /// Sticky flag: did any visited `user` record reference a file?
    ///
    /// `None` until the first user record is visited. Drives the
    /// required/optional strength of the user→file dependency.
    pub user_has_file_reference: Option<bool>,
    /// IDs of the generated migration definitions, in generation order.
    pub migration_ids: Vec<String>,
}

impl ExportResult {
    /// Records one exported id under its kind (and bundle, if any).
    pub fn record_exported(&mut self, kind: &str, bundle: Option<&str>, id: impl Into<String>) {
        let entry = self.exported.entry(kind.to_owned()).or_insert_with(|| {
            if bundle.is_some() {
                ExportedIds::Bundled(BTreeMap::new())
            } else {
                ExportedIds::Flat(Vec::new())
            }
        });
        match (entry, bundle) {
            (ExportedIds::Bundled(bundles), Some(bundle)) => {
                bundles.entry(bundle.to_owned()).or_default().push(id.into());
            }
            (ExportedIds::Flat(ids), None) => ids.push(id.into()),
            // A kind is either bundled or flat for the whole run; the
            // schema cannot flip mid-export. Keep the entry as-is but make
            // the inconsistent dataset visible.
            (ExportedIds::Bundled(_), None) | (ExportedIds::Flat(_), Some(_)) => {
                let id: String = id.into();
                warn!(
                    kind,
                    bundle,
                    id,
                    "Dropping exported id: bundled/flat shape mismatch for kind"
                );
            }
        }
    }

    /// Returns the exported ids of a kind, if any record of it was written.
    #[must_use]
    pub fn exported_ids(&self, kind: &str) -> Option<&ExportedIds> {
        self.exported.get(kind)
    }

    /// Returns every `(kind, bundle)` group with exported records.
    ///
    /// One migration definition is generated per group.
    #[must_use]
    pub fn groups(&self) -> Vec<(String, Option<String>)> {
        let mut groups = Vec::new();
        for (kind, ids) in &self.exported {
            match ids {
                ExportedIds::Bundled(bundles) => {
                    for bundle in bundles.keys() {
                        groups.push((kind.clone(), Some(bundle.clone())));
                    }
                }
                ExportedIds::Flat(_) => groups.push((kind.clone(), None)),
            }
        }
        groups
    }
}

/// Per-step scratch space, reset between steps.
///
/// Mirrors what each step needs to survive an interruption: the discovery
/// sets during the closure walk, and a position in a precomputed work queue
/// during the write steps.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Sandbox {
    /// Discovery working sets, present only during the discover step.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub discovery: Option<DiscoverySet>,
    /// Precomputed work queue of the current write step.
    ///
    /// Holds canonical record references, file ids or `kind[:bundle]` group
    /// keys depending on the step.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub queue: Option<Vec<String>>,
    /// Units processed so far within the current step.
    pub progress: usize,
    /// Units known so far. May grow while discovery runs.
    pub total: usize,
}

/// The externally owned state of one export run.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RunContext {
    /// Per-step working state.
    pub sandbox: Sandbox,
    /// Durable results surviving across steps.
    pub results: ExportResult,
    /// Advisory completion fraction of the current step, in `0.0..=1.0`.
    ///
    /// The denominator may grow mid-step, so this can move backwards;
    /// true completion is signalled only by reaching `1.0`.
    pub finished: f64,
    /// Human-readable progress message.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl RunContext {
    /// Creates a fresh context.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Clears the per-step scratch space before entering the next step.
    pub fn reset_sandbox(&mut self) {
        self.sandbox = Sandbox::default();
        self.finished = 0.0;
    }

    /// Updates the advisory progress fraction and message.
    pub fn set_progress(&mut self, processed: usize, total: usize, message: impl Into<String>) {
        self.finished = if processed >= total || total == 0 {
            1.0
        } else {
            // Denominators can grow mid-step; the fraction is advisory only.
            #[allow(clippy::cast_precision_loss)]
            {
                processed as f64 / total as f64
            }
        };
        self.message = Some(message.into());
    }

    /// Marks the current step complete.
    pub fn finish_step(&mut self) {
        self.finished = 1.0;
    }

    /// Sorts and deduplicates the discovered closure for deterministic
    /// output, dropping the given sentinel references.
    pub fn seal_discovered(&mut self, sentinels: &[RecordRef]) {
        self.results.discovered.retain(|r| !sentinels.contains(r));
        let mut canonical: Vec<String> = self
            .results
            .discovered
            .iter()
            .map(RecordRef::canonical)
            .collect();
        natural_sort(&mut canonical);
        canonical.dedup();
        self.results.discovered = canonical
            .into_iter()
            .filter_map(|s| s.parse().ok())
            .collect();
    }
}

/// Owns persistence of the run context between step invocations.
pub trait ContextStore {
    /// Loads the persisted context, if one exists.
    fn load(&self) -> Result<Option<RunContext>, ExportError>;

    /// Persists the context.
    fn save(&self, context: &RunContext) -> Result<(), ExportError>;

    /// Discards any persisted context.
    fn clear(&self) -> Result<(), ExportError>;
}

/// File-backed context store writing pretty JSON.
#[derive(Debug, Clone)]
pub struct JsonContextStore {
    path: Utf8PathBuf,
}

impl JsonContextStore {
    /// Creates a store persisting to the given file path.
    pub fn new(path: impl Into<Utf8PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Returns the backing file path.
    #[must_use]
    pub fn path(&self) -> &Utf8PathBuf {
        &self.path
    }
}

impl ContextStore for JsonContextStore {
    fn load(&self) -> Result<Option<RunContext>, ExportError> {
        match std::fs::read(self.path.as_std_path()) {
            Ok(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(ExportError::ContextPersistence(e)),
        }
    }

    fn save(&self, context: &RunContext) -> Result<(), ExportError> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent.as_std_path())
                .map_err(ExportError::ContextPersistence)?;
        }
        let json = serde_json::to_vec_pretty(context)
            .map_err(|e| ExportError::encode("run context", e))?;
        std::fs::write(self.path.as_std_path(), json).map_err(ExportError::ContextPersistence)
    }

    fn clear(&self) -> Result<(), ExportError> {
        match std::fs::remove_file(self.path.as_std_path()) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(ExportError::ContextPersistence(e)),
        }
    }
}

/// In-memory context store that still forces a full serde round-trip.
///
/// Tests use this to prove that no step keeps state outside the context.
#[derive(Debug, Default)]
pub struct MemoryContextStore {
    slot: std::sync::Mutex<Option<String>>,
}

impl MemoryContextStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

impl ContextStore for MemoryContextStore {
    fn load(&self) -> Result<Option<RunContext>, ExportError> {
        let slot = self
            .slot
            .lock()
            .map_err(|_| ExportError::ContextPersistence(std::io::Error::other("slot poisoned")))?;
        match slot.as_deref() {
            Some(json) => Ok(Some(serde_json::from_str(json)?)),
            None => Ok(None),
        }
    }

    fn save(&self, context: &RunContext) -> Result<(), ExportError> {
        let json = serde_json::to_string(context)
            .map_err(|e| ExportError::encode("run context", e))?;
        let mut slot = self
            .slot
            .lock()
            .map_err(|_| ExportError::ContextPersistence(std::io::Error::other("slot poisoned")))?;
        *slot = Some(json);
        Ok(())
    }

    fn clear(&self) -> Result<(), ExportError> {
        let mut slot = self
            .slot
            .lock()
            .map_err(|_| ExportError::ContextPersistence(std::io::Error::other("slot poisoned")))?;
        *slot = None;
        Ok(())
    }
}
