//! Field metadata types.
//!
//! These types mirror what the schema service knows about a field: its
//! storage arity, property layout, declared property types and, for
//! reference-valued fields, which kind (and bundles) it points at.
//! They drive both the record serializer and the dependency derivation of
//! the definition synthesizer.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// The declared data type of a single field property.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
#[non_exhaustive]
pub enum PropertyType {
    /// Integer-typed property. Serialized values are coerced to integers.
    Integer,
    /// Free-form string property.
    String,
    /// Boolean property.
    Boolean,
    /// Floating point property.
    Float,
}

impl PropertyType {
    /// Returns `true` for integer-typed properties.
    ///
    /// Downstream consumers expect integer-typed properties to follow their
    /// declared type, so the serializer coerces these even when the store
    /// hands back strings.
    #[inline]
    #[must_use]
    pub const fn is_integer(self) -> bool {
        matches!(self, Self::Integer)
    }
}

/// The target of a reference-valued field.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReferenceTarget {
    /// The kind the field's items point at.
    pub target_kind: String,
    /// Bundles the field handler restricts targets to.
    ///
    /// Empty means unrestricted: any bundle of the target kind.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub target_bundles: Vec<String>,
}

impl ReferenceTarget {
    /// Creates an unrestricted reference target.
    pub fn new(target_kind: impl Into<String>) -> Self {
        Self {
            target_kind: target_kind.into(),
            target_bundles: Vec::new(),
        }
    }

    /// Restricts the target to the given bundles.
    #[must_use]
    pub fn with_bundles<S: Into<String>>(mut self, bundles: impl IntoIterator<Item = S>) -> Self {
        self.target_bundles = bundles.into_iter().map(Into::into).collect();
        self
    }
}

/// Schema-level description of one field.
///
/// # Examples
///
/// ```
/// use ce_core::{FieldDefinition, PropertyType, ReferenceTarget};
///
/// let uid = FieldDefinition::new("uid", "entity_reference")
///     .with_main_property("target_id")
///     .with_property("target_id", PropertyType::Integer)
///     .with_reference(ReferenceTarget::new("user"));
///
/// assert!(uid.is_reference());
/// assert_eq!(uid.target_kind(), Some("user"));
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldDefinition {
    /// The field's machine name.
    pub name: String,
    /// The field type identifier, e.g. `string` or `entity_reference`.
    pub field_type: String,
    /// Whether the field is computed rather than stored.
    #[serde(default)]
    pub computed: bool,
    /// Whether field storage allows more than one item.
    #[serde(default)]
    pub multiple: bool,
    /// The main property name, if the field has a single canonical property.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub main_property: Option<String>,
    /// Property name → declared property type.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub properties: BTreeMap<String, PropertyType>,
    /// Reference target, present only for reference-valued fields.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reference: Option<ReferenceTarget>,
}

impl FieldDefinition {
    /// Creates a field definition with the given name and type.
    pub fn new(name: impl Into<String>, field_type: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            field_type: field_type.into(),
            computed: false,
            multiple: false,
            main_property: None,
            properties: BTreeMap::new(),
            reference: None,
        }
    }

    /// Marks the field as computed.
    #[must_use]
    pub fn computed(mut self) -> Self {
        self.computed = true;
        self
    }

    /// Marks the field storage as multi-valued.
    #[must_use]
    pub fn multi_valued(mut self) -> Self {
        self.multiple = true;
        self
    }

    /// Sets the main property name.
    #[must_use]
    pub fn with_main_property(mut self, property: impl Into<String>) -> Self {
        self.main_property = Some(property.into());
        self
    }

    /// Declares a property and its type.
    #[must_use]
    pub fn with_property(mut self, name: impl Into<String>, ty: PropertyType) -> Self {
        self.properties.insert(name.into(), ty);
        self
    }

    /// Declares the field as reference-valued.
    #[must_use]
    pub fn with_reference(mut self, target: ReferenceTarget) -> Self {
        self.reference = Some(target);
        self
    }

    /// Returns `true` if the field holds record references.
    #[inline]
    #[must_use]
    pub fn is_reference(&self) -> bool {
        self.reference.is_some()
    }

    /// Returns the referenced kind, if the field is reference-valued.
    #[inline]
    #[must_use]
    pub fn target_kind(&self) -> Option<&str> {
        self.reference.as_ref().map(|r| r.target_kind.as_str())
    }

    /// Returns the declared type of the given property, if known.
    #[inline]
    #[must_use]
    pub fn property_type(&self, property: &str) -> Option<PropertyType> {
        self.properties.get(property).copied()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_property_type_is_integer() {
        assert!(PropertyType::Integer.is_integer());
        assert!(!PropertyType::String.is_integer());
        assert!(!PropertyType::Boolean.is_integer());
    }

    #[test]
    fn test_field_definition_builder() {
        let field = FieldDefinition::new("field_tags", "entity_reference")
            .multi_valued()
            .with_main_property("target_id")
            .with_property("target_id", PropertyType::Integer)
            .with_reference(ReferenceTarget::new("taxonomy_term").with_bundles(["tags"]));

        assert!(field.multiple);
        assert!(field.is_reference());
        assert_eq!(field.target_kind(), Some("taxonomy_term"));
        assert_eq!(
            field.property_type("target_id"),
            Some(PropertyType::Integer)
        );
        assert_eq!(field.property_type("value"), None);
        let target = field.reference.as_ref().unwrap();
        assert_eq!(target.target_bundles, ["tags"]);
    }

    #[test]
    fn test_non_reference_field() {
        let field = FieldDefinition::new("title", "string")
            .with_main_property("value")
            .with_property("value", PropertyType::String);
        assert!(!field.is_reference());
        assert_eq!(field.target_kind(), None);
    }
}
