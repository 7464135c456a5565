//! Kind-level schema types.
//!
//! A [`KindSchema`] describes one record kind: its label and the names of
//! its well-known key fields (id, revision, bundle, language). Whether a
//! kind is revisionable or partitioned into bundles is derived from which
//! keys it declares, exactly as the schema service reports them.

use serde::{Deserialize, Serialize};

/// The well-known key fields of a record kind.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct KindKeys {
    /// The identifier key field name, e.g. `nid`.
    pub id: String,
    /// The revision key field name, if the kind is revisionable.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub revision: Option<String>,
    /// The bundle key field name, if the kind has bundles.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bundle: Option<String>,
    /// The language key field name, if the kind is translatable.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub langcode: Option<String>,
}

/// Schema-level description of one record kind.
///
/// # Examples
///
/// ```
/// use ce_core::KindSchema;
///
/// let node = KindSchema::new("node", "Content")
///     .with_id_key("nid")
///     .with_revision_key("vid")
///     .with_bundle_key("type")
///     .with_langcode_key("langcode");
///
/// assert!(node.revisionable());
/// assert!(node.has_bundles());
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KindSchema {
    /// The kind identifier, e.g. `node`.
    pub kind: String,
    /// Human-readable label.
    pub label: String,
    /// The kind's key field names.
    pub keys: KindKeys,
}

impl KindSchema {
    /// Creates a schema for the given kind with an `id` key named `id`.
    pub fn new(kind: impl Into<String>, label: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            label: label.into(),
            keys: KindKeys {
                id: "id".to_owned(),
                ..KindKeys::default()
            },
        }
    }

    /// Sets the identifier key field name.
    #[must_use]
    pub fn with_id_key(mut self, key: impl Into<String>) -> Self {
        self.keys.id = key.into();
        self
    }

    /// Sets the revision key field name, marking the kind revisionable.
    #[must_use]
    pub fn with_revision_key(mut self, key: impl Into<String>) -> Self {
        self.keys.revision = Some(key.into());
        self
    }

    /// Sets the bundle key field name, marking the kind as bundled.
    #[must_use]
    pub fn with_bundle_key(mut self, key: impl Into<String>) -> Self {
        self.keys.bundle = Some(key.into());
        self
    }

    /// Sets the language key field name.
    #[must_use]
    pub fn with_langcode_key(mut self, key: impl Into<String>) -> Self {
        self.keys.langcode = Some(key.into());
        self
    }

    /// Returns `true` if the kind keeps revisions.
    #[inline]
    #[must_use]
    pub fn revisionable(&self) -> bool {
        self.keys.revision.is_some()
    }

    /// Returns `true` if the kind is partitioned into bundles.
    #[inline]
    #[must_use]
    pub fn has_bundles(&self) -> bool {
        self.keys.bundle.is_some()
    }
}
