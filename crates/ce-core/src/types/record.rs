//! Record identity and field-value types.
//!
//! A [`Record`] is one addressable content unit loaded from the record store:
//! a kind, an identifier, an optional bundle, and a map of field values.
//! A [`RecordRef`] is its composite key, canonically rendered as `"kind:id"`,
//! which is the unit of bookkeeping throughout discovery and export.

use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::sort::natural_cmp;

/// A single field item: property name → property value.
///
/// A multi-valued field holds one of these per delta; a scalar field holds
/// exactly one, usually with a single property.
pub type FieldItem = BTreeMap<String, serde_json::Value>;

/// A composite record key: `{kind, id}`.
///
/// The canonical form is `"kind:id"`, which is also the serde representation
/// and the form persisted inside a run context. References order naturally
/// (numeric-aware), so `node:2` sorts before `node:10`.
///
/// # Examples
///
/// ```
/// use ce_core::RecordRef;
///
/// let r: RecordRef = "node:2".parse().unwrap();
/// assert_eq!(r.kind, "node");
/// assert_eq!(r.id, "2");
/// assert_eq!(r.to_string(), "node:2");
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(into = "String", try_from = "String")]
pub struct RecordRef {
    /// The record's type category, e.g. `node` or `user`.
    pub kind: String,
    /// The record's identifier within its kind.
    pub id: String,
}

impl RecordRef {
    /// Creates a reference from a kind and an id.
    #[inline]
    pub fn new(kind: impl Into<String>, id: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            id: id.into(),
        }
    }

    /// Returns the canonical `"kind:id"` string.
    #[inline]
    #[must_use]
    pub fn canonical(&self) -> String {
        format!("{}:{}", self.kind, self.id)
    }

    /// Returns `true` if this reference points at the given kind.
    #[inline]
    #[must_use]
    pub fn is_kind(&self, kind: &str) -> bool {
        self.kind == kind
    }
}

impl fmt::Display for RecordRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.kind, self.id)
    }
}

impl Ord for RecordRef {
    fn cmp(&self, other: &Self) -> Ordering {
        natural_cmp(&self.canonical(), &other.canonical())
    }
}

impl PartialOrd for RecordRef {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl From<RecordRef> for String {
    fn from(r: RecordRef) -> Self {
        r.canonical()
    }
}

impl TryFrom<String> for RecordRef {
    type Error = ParseRecordRefError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        s.parse()
    }
}

impl FromStr for RecordRef {
    type Err = ParseRecordRefError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.split_once(':') {
            Some((kind, id)) if !kind.is_empty() && !id.is_empty() => {
                Ok(Self::new(kind, id))
            }
            _ => Err(ParseRecordRefError(s.to_owned())),
        }
    }
}

/// Error returned when a string is not a valid `"kind:id"` reference.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid record reference '{0}': expected 'kind:id'")]
pub struct ParseRecordRefError(pub String);

/// The value of one field: an ordered list of [`FieldItem`]s.
///
/// An empty list means the field carries no value for this revision.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FieldValue {
    /// The field items, in delta order.
    pub items: Vec<FieldItem>,
}

impl FieldValue {
    /// Creates an empty field value.
    #[inline]
    #[must_use]
    pub fn empty() -> Self {
        Self::default()
    }

    /// Creates a field value with a single item holding one property.
    pub fn scalar(property: impl Into<String>, value: serde_json::Value) -> Self {
        let mut item = FieldItem::new();
        item.insert(property.into(), value);
        Self { items: vec![item] }
    }

    /// Creates a field value from a list of items.
    #[inline]
    #[must_use]
    pub fn from_items(items: Vec<FieldItem>) -> Self {
        Self { items }
    }

    /// Returns `true` if the field carries no value.
    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Returns the number of field items.
    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        self.items.len()
    }

    /// Returns the first field item, if any.
    #[inline]
    #[must_use]
    pub fn first(&self) -> Option<&FieldItem> {
        self.items.first()
    }

    /// Returns the value of `property` in the first item, if present.
    #[must_use]
    pub fn first_property(&self, property: &str) -> Option<&serde_json::Value> {
        self.first().and_then(|item| item.get(property))
    }
}

/// One translation of a record: a language code plus its own field values.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Translation {
    /// The language code of this translation, e.g. `hu`.
    pub langcode: String,
    /// The translated field values.
    pub fields: BTreeMap<String, FieldValue>,
}

/// One addressable content unit loaded from the record store.
///
/// Field values are kept in a `BTreeMap` so that serialization order is
/// deterministic without an extra sorting pass.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Record {
    /// The record's kind, e.g. `node`.
    pub kind: String,
    /// The record's identifier.
    pub id: String,
    /// The bundle (sub-type) of the record, if its kind has bundles.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bundle: Option<String>,
    /// The language code of the default revision.
    pub langcode: String,
    /// Field name → field value of the default-language revision.
    pub fields: BTreeMap<String, FieldValue>,
    /// Non-default-language translations.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub translations: Vec<Translation>,
}

impl Record {
    /// Returns the composite key of this record.
    #[inline]
    #[must_use]
    pub fn record_ref(&self) -> RecordRef {
        RecordRef::new(self.kind.as_str(), self.id.as_str())
    }

    /// Returns the value of the named field, if present.
    #[inline]
    #[must_use]
    pub fn field(&self, name: &str) -> Option<&FieldValue> {
        self.fields.get(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_record_ref_parse_roundtrip() {
        let r: RecordRef = "comment:12".parse().unwrap();
        assert_eq!(r, RecordRef::new("comment", "12"));
        assert_eq!(r.canonical(), "comment:12");
    }

    #[test]
    fn test_record_ref_parse_rejects_malformed() {
        assert!("".parse::<RecordRef>().is_err());
        assert!("node".parse::<RecordRef>().is_err());
        assert!(":1".parse::<RecordRef>().is_err());
        assert!("node:".parse::<RecordRef>().is_err());
    }

    #[test]
    fn test_record_ref_allows_colon_in_id() {
        // Only the first colon separates kind from id.
        let r: RecordRef = "file:public://a.png".parse().unwrap();
        assert_eq!(r.kind, "file");
        assert_eq!(r.id, "public://a.png");
    }

    #[test]
    fn test_record_ref_natural_ordering() {
        let mut refs = vec![
            RecordRef::new("node", "10"),
            RecordRef::new("node", "2"),
            RecordRef::new("comment", "1"),
        ];
        refs.sort();
        assert_eq!(refs[0], RecordRef::new("comment", "1"));
        assert_eq!(refs[1], RecordRef::new("node", "2"));
        assert_eq!(refs[2], RecordRef::new("node", "10"));
    }

    #[test]
    fn test_record_ref_serde_as_string() {
        let r = RecordRef::new("user", "10");
        let json = serde_json::to_string(&r).unwrap();
        assert_eq!(json, "\"user:10\"");
        let back: RecordRef = serde_json::from_str(&json).unwrap();
        assert_eq!(back, r);
    }

    #[test]
    fn test_field_value_scalar() {
        let value = FieldValue::scalar("value", json!("Hello"));
        assert_eq!(value.len(), 1);
        assert_eq!(value.first_property("value"), Some(&json!("Hello")));
        assert_eq!(value.first_property("target_id"), None);
    }

    #[test]
    fn test_field_value_empty() {
        let value = FieldValue::empty();
        assert!(value.is_empty());
        assert!(value.first().is_none());
    }

    #[test]
    fn test_record_ref_helper() {
        let record = Record {
            kind: "node".to_owned(),
            id: "2".to_owned(),
            bundle: Some("article".to_owned()),
            langcode: "en".to_owned(),
            fields: BTreeMap::new(),
            translations: Vec::new(),
        };
        assert_eq!(record.record_ref(), RecordRef::new("node", "2"));
        assert!(record.field("title").is_none());
    }
}
