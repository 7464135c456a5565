//! Record snapshot serialization.
//!
//! Converts one record (and, when enabled, each of its translations) into a
//! list of per-language value trees honoring the schema's storage arity and
//! property types. The list is what gets pretty-printed into the package as
//! `<data>/<kind>[/<bundle>]/<kind>-<id>.json`.
//!
//! Shape rules, per field:
//!
//! - empty → `null`
//! - multi-valued storage, more than one item, more than one property, or no
//!   main property → the full structured value: a list of property maps
//! - otherwise → the bare scalar of the single main property
//!
//! In both branches, properties declared `integer` are coerced to JSON
//! integers; downstream consumers expect values to follow their declared
//! type even where the store hands back strings.
//!
//! Computed fields are excluded, with a single whitelisted exception: the
//! workflow moderation state travels with the snapshot when present.

use std::collections::BTreeMap;

use ce_core::{FieldDefinition, FieldItem, FieldValue, Record};
use serde_json::Value;

/// The one computed field included in snapshots.
pub const MODERATION_STATE_FIELD: &str = "moderation_state";

/// A single per-language value tree.
pub type ValueTree = BTreeMap<String, Value>;

/// Serializes a record into per-language value trees.
///
/// The first tree is the default-language revision; translations follow in
/// stored order when `include_translations` is set.
#[must_use]
pub fn serialize_record(
    record: &Record,
    definitions: &[FieldDefinition],
    include_translations: bool,
) -> Vec<ValueTree> {
    let mut trees = vec![tree_from_fields(&record.fields, definitions)];
    if include_translations {
        for translation in &record.translations {
            trees.push(tree_from_fields(&translation.fields, definitions));
        }
    }
    trees
}

/// Builds one value tree from a field map.
fn tree_from_fields(
    fields: &BTreeMap<String, FieldValue>,
    definitions: &[FieldDefinition],
) -> ValueTree {
    let mut tree = ValueTree::new();
    for definition in definitions {
        if definition.computed && definition.name != MODERATION_STATE_FIELD {
            continue;
        }
        let value = fields.get(&definition.name);
        if definition.computed && value.is_none() {
            // The whitelisted computed field is included only when present.
            continue;
        }
        tree.insert(definition.name.clone(), field_to_value(value, definition));
    }
    tree
}

/// Converts one field value according to its definition.
fn field_to_value(value: Option<&FieldValue>, definition: &FieldDefinition) -> Value {
    let Some(value) = value else {
        return Value::Null;
    };
    if value.is_empty() {
        // Missing values must be explicit; some destination field types
        // reject absent keys.
        return Value::Null;
    }

    let first_property_count = value.first().map_or(0, FieldItem::len);
    let complex = definition.multiple
        || value.len() > 1
        || first_property_count > 1
        || definition.main_property.is_none();

    if complex {
        let items: Vec<Value> = value
            .items
            .iter()
            .map(|item| {
                let coerced: serde_json::Map<String, Value> = item
                    .iter()
                    .map(|(property, v)| {
                        (property.clone(), coerce_property(v, definition, property))
                    })
                    .collect();
                Value::Object(coerced)
            })
            .collect();
        return Value::Array(items);
    }

    // Simple field: one item, one property, with a known main property.
    let main = definition.main_property.as_deref().unwrap_or_default();
    match value.first_property(main) {
        Some(v) => coerce_property(v, definition, main),
        None => Value::Null,
    }
}

/// Coerces a property value to an integer when its declared type asks for
/// one; everything else passes through untouched.
fn coerce_property(value: &Value, definition: &FieldDefinition, property: &str) -> Value {
    if !definition
        .property_type(property)
        .is_some_and(ce_core::PropertyType::is_integer)
    {
        return value.clone();
    }
    match value {
        Value::Number(n) => n
            .as_i64()
            .or_else(|| n.as_f64().map(|f| f as i64))
            .map_or_else(|| value.clone(), Value::from),
        Value::String(s) => s
            .parse::<i64>()
            .map_or_else(|_| value.clone(), Value::from),
        other => other.clone(),
    }
}
