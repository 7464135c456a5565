//! JSON dataset loading.
//!
//! The CLI operates on a self-contained dataset file instead of a live
//! backend: one JSON document declaring the kinds (schema plus field
//! definitions), the records and the binary-asset contents. The dataset is
//! loaded into an in-memory backend implementing every store trait the
//! engine needs.
//!
//! Asset contents are stored as plain strings; the export copies their
//! bytes verbatim.

use std::collections::BTreeMap;

use anyhow::Context as _;
use camino::Utf8Path;
use ce_core::{FieldDefinition, KindSchema, Record};
use ce_engine::MemoryBackend;
use serde::Deserialize;
use tracing::debug;

/// One kind declaration: its schema plus field definitions.
#[derive(Debug, Deserialize)]
struct DatasetKind {
    #[serde(flatten)]
    schema: KindSchema,
    /// Kind-level field definitions, used when no bundle override matches.
    #[serde(default)]
    fields: Vec<FieldDefinition>,
    /// Per-bundle field definition overrides.
    #[serde(default)]
    bundle_fields: BTreeMap<String, Vec<FieldDefinition>>,
}

/// The on-disk dataset document.
#[derive(Debug, Deserialize)]
struct Dataset {
    kinds: Vec<DatasetKind>,
    #[serde(default)]
    records: Vec<Record>,
    /// `scheme://path` URI → asset content.
    #[serde(default)]
    assets: BTreeMap<String, String>,
    /// Kinds present in the dataset but excluded from export.
    #[serde(default)]
    excluded: Vec<String>,
}

/// Loads a dataset file into an in-memory backend.
///
/// # Errors
///
/// Fails when the file cannot be read or is not a valid dataset document.
pub fn load(path: &Utf8Path) -> anyhow::Result<MemoryBackend> {
    let bytes = std::fs::read(path.as_std_path())
        .with_context(|| format!("cannot read dataset '{path}'"))?;
    let dataset: Dataset = serde_json::from_slice(&bytes)
        .with_context(|| format!("dataset '{path}' is not valid JSON"))?;

    let mut backend = MemoryBackend::new();
    for kind in dataset.kinds {
        debug!(kind = %kind.schema.kind, "Registering kind");
        backend.insert_fields(&kind.schema.kind, None, kind.fields);
        for (bundle, definitions) in kind.bundle_fields {
            backend.insert_fields(&kind.schema.kind, Some(&bundle), definitions);
        }
        backend.insert_schema(kind.schema);
    }
    for record in dataset.records {
        backend.insert_record(record);
    }
    for (uri, content) in dataset.assets {
        backend.insert_asset(uri, content.into_bytes());
    }
    for kind in dataset.excluded {
        backend.exclude_kind(kind);
    }
    Ok(backend)
}
