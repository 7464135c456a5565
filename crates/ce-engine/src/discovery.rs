//! Transitive reference-closure discovery.
//!
//! Starting from the configured seed kinds, discovery walks reference-valued
//! fields until fixpoint: pick an unchecked frontier member, load it, union
//! its direct references into the frontier, mark it checked. Membership
//! checks make cycles terminate naturally; no explicit cycle detection.
//!
//! Each [`Discoverer::step`] call processes exactly one record so the walk
//! can be suspended and resumed between invocations; all working state lives
//! in the run context's [`DiscoverySet`](crate::context::DiscoverySet).
//!
//! While visiting a `user` record the discoverer also derives the sticky
//! `user_has_file_reference` flag consumed later by the dependency-strength
//! rules of the definition synthesizer.

use ce_core::{FieldDefinition, FxHashSet, Record, RecordRef};
use tracing::{debug, warn};

use crate::context::{DiscoverySet, RunContext};
use crate::error::ExportError;
use crate::store::{RecordStore, SchemaProvider};

/// The account kind whose file references decide dependency strength.
pub const USER_KIND: &str = "user";

/// The binary-asset kind.
pub const FILE_KIND: &str = "file";

/// The comment kind; its author dependency is always required.
pub const COMMENT_KIND: &str = "comment";

/// References dropped from the closure after discovery completes.
///
/// The anonymous account exists on every target system already and must
/// never be imported.
pub fn sentinel_refs() -> Vec<RecordRef> {
    vec![RecordRef::new(USER_KIND, "0")]
}

/// Extracts the directly referenced records from one record's
/// reference-valued fields.
///
/// Only the default-language revision is inspected; translation-specific
/// reference values are intentionally not walked.
#[must_use]
pub fn extract_references(record: &Record, definitions: &[FieldDefinition]) -> Vec<RecordRef> {
    let mut refs = Vec::new();
    let mut seen: FxHashSet<RecordRef> = FxHashSet::default();
    for definition in definitions {
        let Some(target_kind) = definition.target_kind() else {
            continue;
        };
        let Some(value) = record.field(&definition.name) else {
            continue;
        };
        let id_property = definition.main_property.as_deref().unwrap_or("target_id");
        for item in &value.items {
            let Some(id) = item.get(id_property).and_then(scalar_to_id) else {
                continue;
            };
            let record_ref = RecordRef::new(target_kind, id);
            if seen.insert(record_ref.clone()) {
                refs.push(record_ref);
            }
        }
    }
    refs
}

/// Renders a reference-property value as a record id.
fn scalar_to_id(value: &serde_json::Value) -> Option<String> {
    match value {
        serde_json::Value::String(s) if !s.is_empty() => Some(s.clone()),
        serde_json::Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

/// Drives the reference-closure walk, one record per step call.
pub struct Discoverer<'a> {
    records: &'a dyn RecordStore,
    schema: &'a dyn SchemaProvider,
    seed_kinds: &'a [String],
}

impl<'a> Discoverer<'a> {
    /// Creates a discoverer over the given stores and seed kinds.
    pub fn new(
        records: &'a dyn RecordStore,
        schema: &'a dyn SchemaProvider,
        seed_kinds: &'a [String],
    ) -> Self {
        Self {
            records,
            schema,
            seed_kinds,
        }
    }

    /// Processes one unit of discovery work.
    ///
    /// The first call seeds the frontier with every record of every seed
    /// kind; each later call visits one frontier member. Progress is
    /// advisory (the total grows while references are found) and the step
    /// is complete once the frontier equals the visited set.
    pub fn step(&self, ctx: &mut RunContext) -> Result<(), ExportError> {
        let content_kinds: FxHashSet<String> = self.schema.content_kinds().into_iter().collect();

        if ctx.sandbox.discovery.is_none() {
            let mut set = DiscoverySet::new();
            for kind in self.seed_kinds {
                if !content_kinds.contains(kind) {
                    debug!(kind = %kind, "Skipping excluded seed kind");
                    continue;
                }
                let ids = self
                    .records
                    .list_ids(kind)
                    .map_err(|e| ExportError::store(format!("listing ids of '{kind}'"), e))?;
                for id in ids {
                    set.push(RecordRef::new(kind.as_str(), id));
                }
            }
            ctx.sandbox.total = set.total();
            ctx.sandbox.progress = 0;
            ctx.sandbox.discovery = Some(set);
            ctx.message = Some("Discovering content references...".to_owned());
        }

        let Some(current) = ctx
            .sandbox
            .discovery
            .as_ref()
            .and_then(DiscoverySet::next_unchecked)
        else {
            // Nothing (left) to visit; seal and finish.
            ctx.seal_discovered(&sentinel_refs());
            ctx.finish_step();
            return Ok(());
        };
        ctx.sandbox.progress += 1;

        let record = self
            .records
            .load(&current)
            .map_err(|e| ExportError::store(format!("loading {current}"), e))?;

        let refs = match record {
            Some(record) => {
                let definitions = self
                    .schema
                    .field_definitions(&record.kind, record.bundle.as_deref());
                extract_references(&record, &definitions)
            }
            None => {
                // Referenced but gone; skip it rather than failing the run.
                warn!(record = %current, "Discovered record cannot be loaded, skipping");
                Vec::new()
            }
        };

        if current.is_kind(USER_KIND) && ctx.results.user_has_file_reference != Some(true) {
            ctx.results.user_has_file_reference =
                Some(refs.iter().any(|r| r.is_kind(FILE_KIND)));
        }

        let Some(discovery) = ctx.sandbox.discovery.as_mut() else {
            // Initialized above; nothing to do if it is somehow gone.
            return Ok(());
        };
        for r in refs {
            // The closure is restricted to content-bearing kinds.
            if content_kinds.contains(&r.kind) {
                discovery.push(r);
            }
        }
        ctx.results.discovered.push(current.clone());
        discovery.mark_checked(current);

        let (processed, total, complete) = {
            let d = &*discovery;
            (ctx.sandbox.progress, d.total(), d.is_complete())
        };
        ctx.sandbox.total = total;

        if complete {
            ctx.seal_discovered(&sentinel_refs());
            ctx.finish_step();
        } else {
            // Not complete, so processed < total and the fraction stays
            // below 1.0.
            ctx.set_progress(
                processed,
                total,
                format!("Discovering content references ({processed}/{total})"),
            );
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ce_core::{FieldValue, KindSchema, PropertyType, ReferenceTarget};
    use serde_json::json;
    use std::collections::BTreeMap;

    use crate::store::MemoryBackend;

    fn reference_field(name: &str, target: &str) -> FieldDefinition {
        FieldDefinition::new(name, "entity_reference")
            .with_main_property("target_id")
            .with_property("target_id", PropertyType::Integer)
            .with_reference(ReferenceTarget::new(target))
    }

    fn record_with_refs(kind: &str, id: &str, refs: &[(&str, &str)]) -> Record {
        let mut fields = BTreeMap::new();
        for (field, value) in refs {
            fields.insert(
                (*field).to_owned(),
                FieldValue::scalar("target_id", json!(value)),
            );
        }
        Record {
            kind: kind.to_owned(),
            id: id.to_owned(),
            bundle: None,
            langcode: "en".to_owned(),
            fields,
            translations: Vec::new(),
        }
    }

    fn cyclic_backend() -> MemoryBackend {
        // a:1 -> b:1 -> a:2 -> a:1 (cycle back)
        let mut backend = MemoryBackend::new();
        backend.insert_schema(KindSchema::new("a", "A"));
        backend.insert_schema(KindSchema::new("b", "B"));
        backend.insert_fields("a", None, vec![reference_field("to_b", "b"), reference_field("to_a", "a")]);
        backend.insert_fields("b", None, vec![reference_field("to_a", "a")]);
        backend.insert_record(record_with_refs("a", "1", &[("to_b", "1")]));
        backend.insert_record(record_with_refs("b", "1", &[("to_a", "2")]));
        backend.insert_record(record_with_refs("a", "2", &[("to_a", "1")]));
        backend
    }

    fn run_discovery(backend: &MemoryBackend, seeds: &[&str]) -> RunContext {
        let seeds: Vec<String> = seeds.iter().map(|s| (*s).to_owned()).collect();
        let discoverer = Discoverer::new(backend, backend, &seeds);
        let mut ctx = RunContext::new();
        while ctx.finished < 1.0 {
            discoverer.step(&mut ctx).unwrap();
        }
        ctx
    }

    fn discovered(ctx: &RunContext) -> Vec<String> {
        ctx.results.discovered.iter().map(RecordRef::canonical).collect()
    }

    #[test]
    fn test_extract_references() {
        let defs = vec![
            reference_field("uid", "user"),
            FieldDefinition::new("title", "string").with_main_property("value"),
        ];
        let record = record_with_refs("node", "2", &[("uid", "10")]);
        let refs = extract_references(&record, &defs);
        assert_eq!(refs, [RecordRef::new("user", "10")]);
    }

    #[test]
    fn test_extract_references_numeric_and_multi() {
        let defs = vec![reference_field("field_tags", "tag")];
        let mut fields = BTreeMap::new();
        let mut item1 = BTreeMap::new();
        item1.insert("target_id".to_owned(), json!(3));
        let mut item2 = BTreeMap::new();
        item2.insert("target_id".to_owned(), json!("7"));
        fields.insert(
            "field_tags".to_owned(),
            FieldValue::from_items(vec![item1, item2]),
        );
        let record = Record {
            kind: "node".to_owned(),
            id: "1".to_owned(),
            bundle: None,
            langcode: "en".to_owned(),
            fields,
            translations: Vec::new(),
        };
        let refs = extract_references(&record, &defs);
        assert_eq!(
            refs,
            [RecordRef::new("tag", "3"), RecordRef::new("tag", "7")]
        );
    }

    #[test]
    fn test_cyclic_graph_terminates_with_exact_closure() {
        let backend = cyclic_backend();
        let ctx = run_discovery(&backend, &["a"]);
        assert_eq!(discovered(&ctx), ["a:1", "a:2", "b:1"]);
    }

    #[test]
    fn test_no_record_visited_twice() {
        let backend = cyclic_backend();
        let seeds = vec!["a".to_owned(), "b".to_owned()];
        let discoverer = Discoverer::new(&backend, &backend, &seeds);
        let mut ctx = RunContext::new();
        let mut visits = 0;
        while ctx.finished < 1.0 {
            discoverer.step(&mut ctx).unwrap();
            visits += 1;
        }
        // 3 records + the final sealing call.
        assert!(visits <= 4, "visited {visits} times");
    }

    #[test]
    fn test_rediscovery_is_idempotent() {
        let backend = cyclic_backend();
        let first = run_discovery(&backend, &["a"]);
        let second = run_discovery(&backend, &["a"]);
        assert_eq!(first.results.discovered, second.results.discovered);
    }

    #[test]
    fn test_sticky_user_file_flag() {
        let mut backend = MemoryBackend::new();
        backend.insert_schema(KindSchema::new("user", "User").with_id_key("uid"));
        backend.insert_schema(KindSchema::new("file", "File").with_id_key("fid"));
        backend.insert_fields("user", None, vec![reference_field("user_picture", "file")]);
        backend.insert_fields("file", None, Vec::new());
        backend.insert_record(record_with_refs("user", "1", &[]));
        backend.insert_record(record_with_refs("user", "2", &[("user_picture", "5")]));
        backend.insert_record(record_with_refs("file", "5", &[]));

        let ctx = run_discovery(&backend, &["user"]);
        // One user carried a file reference; the flag sticks at true even
        // though another user had none.
        assert_eq!(ctx.results.user_has_file_reference, Some(true));
        assert!(discovered(&ctx).contains(&"file:5".to_owned()));
    }

    #[test]
    fn test_flag_false_when_no_user_references_files() {
        let mut backend = MemoryBackend::new();
        backend.insert_schema(KindSchema::new("user", "User").with_id_key("uid"));
        backend.insert_fields("user", None, Vec::new());
        backend.insert_record(record_with_refs("user", "1", &[]));

        let ctx = run_discovery(&backend, &["user"]);
        assert_eq!(ctx.results.user_has_file_reference, Some(false));
    }

    #[test]
    fn test_sentinel_user_zero_is_stripped() {
        let mut backend = MemoryBackend::new();
        backend.insert_schema(KindSchema::new("user", "User").with_id_key("uid"));
        backend.insert_fields("user", None, Vec::new());
        backend.insert_record(record_with_refs("user", "0", &[]));
        backend.insert_record(record_with_refs("user", "10", &[]));

        let ctx = run_discovery(&backend, &["user"]);
        assert_eq!(discovered(&ctx), ["user:10"]);
    }

    #[test]
    fn test_excluded_seed_kind_contributes_nothing() {
        let mut backend = cyclic_backend();
        backend.exclude_kind("b");
        let ctx = run_discovery(&backend, &["a", "b"]);
        // b records are neither seeded nor pulled in through references.
        assert_eq!(discovered(&ctx), ["a:1", "a:2"]);
    }

    #[test]
    fn test_empty_seed_completes_immediately() {
        let backend = MemoryBackend::new();
        let ctx = run_discovery(&backend, &[]);
        assert!(ctx.results.discovered.is_empty());
        assert!((ctx.finished - 1.0).abs() < f64::EPSILON);
    }
}
