//! Migration definition synthesis.
//!
//! One declarative import-pipeline definition is generated per exported
//! `(kind, bundle)` group and serialized as pretty JSON under
//! `migrations/<id>.json` in the package. The definition is self-contained:
//! it names the snapshot files it reads, the typed source identifiers, a
//! process pipeline per field and the migrations it depends on, so a stock
//! migration runner can replay the package without this tool present.

use std::collections::BTreeMap;

use ce_core::{
    ConfigError, ExportJobConfig, FieldDefinition, KindSchema, natural_sort,
};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use smallvec::SmallVec;

use crate::context::ExportResult;
use crate::discovery::{COMMENT_KIND, FILE_KIND, USER_KIND};
use crate::error::ExportError;
use crate::store::SchemaProvider;

/// The paragraph kind needs a revision-aware reference destination.
const PARAGRAPH_KIND: &str = "paragraph";

/// The runtime constant the entry point injects; holds the absolute path of
/// the package's asset directory.
pub const FILE_PATH_CONSTANT: &str = "constants/export_file_path";

/// A complete declarative import-pipeline definition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MigrationDefinition {
    /// Human-readable label, `Import <kind> <bundle>`.
    pub label: String,
    /// The group the migration belongs to.
    pub migration_group: String,
    /// Tags for bulk selection by migration runners.
    pub migration_tags: Vec<String>,
    /// The unique migration ID.
    pub id: String,
    /// Where and how the snapshot data is read.
    pub source: SourceDescriptor,
    /// Field name → process pipeline.
    pub process: BTreeMap<String, ProcessPipeline>,
    /// The destination record kind and options.
    pub destination: Destination,
    /// Migrations that must or should run first.
    pub migration_dependencies: MigrationDependencies,
}

/// The source block of a definition: JSON files read from the package.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceDescriptor {
    /// Fixed source plugin.
    pub plugin: String,
    /// Fixed fetcher: snapshots are local files.
    pub data_fetcher_plugin: String,
    /// Fixed parser: snapshots are JSON.
    pub data_parser_plugin: String,
    /// Item selector within each snapshot file.
    pub item_selector: String,
    /// Migration-relative snapshot paths, natural-sorted.
    pub urls: Vec<String>,
    /// Source identifier fields and their declared types.
    pub ids: BTreeMap<String, IdField>,
    /// Field name → selector within the snapshot.
    pub fields: BTreeMap<String, SourceField>,
}

/// Declared type of one source identifier field.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IdField {
    /// `integer` or `string`.
    #[serde(rename = "type")]
    pub id_type: String,
}

/// One selectable source field.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceField {
    /// The field name.
    pub name: String,
    /// The selector, `/<name>`.
    pub selector: String,
}

/// A per-field process pipeline.
///
/// Most fields map 1:1 from source to destination, which serializes as a
/// bare string. Fields needing transformation carry explicit plugin steps.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ProcessPipeline {
    /// Pass-through: destination field reads the same-named source field.
    Direct(String),
    /// An explicit chain of process plugin invocations.
    Steps(SmallVec<[ProcessStep; 1]>),
}

/// One process plugin invocation with its options.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProcessStep {
    /// The process plugin name.
    pub plugin: String,
    /// Plugin-specific options, flattened next to the plugin name.
    #[serde(flatten)]
    pub options: BTreeMap<String, Value>,
}

impl ProcessStep {
    fn new<const N: usize>(plugin: &str, options: [(&str, Value); N]) -> Self {
        Self {
            plugin: plugin.to_owned(),
            options: options
                .into_iter()
                .map(|(k, v)| (k.to_owned(), v))
                .collect(),
        }
    }
}

/// The destination block of a definition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Destination {
    /// The destination plugin, derived from the kind's schema.
    pub plugin: String,
    /// Whether translations are imported alongside the default language.
    pub translations: bool,
}

/// Required and optional predecessor migrations.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MigrationDependencies {
    /// Migrations that must have run before this one.
    pub required: Vec<String>,
    /// Migrations that should run before this one when present.
    pub optional: Vec<String>,
}

impl MigrationDependencies {
    /// Adds a dependency, keeping insertion order and dropping duplicates.
    fn add(&mut self, required: bool, migration_id: String) {
        let list = if required {
            &mut self.required
        } else {
            &mut self.optional
        };
        if !list.contains(&migration_id) {
            list.push(migration_id);
        }
    }
}

/// Synthesizes migration definitions for exported groups.
pub struct DefinitionSynthesizer<'a> {
    config: &'a ExportJobConfig,
    schema: &'a dyn SchemaProvider,
}

impl<'a> DefinitionSynthesizer<'a> {
    /// Creates a synthesizer over the run's configuration and schema.
    pub fn new(config: &'a ExportJobConfig, schema: &'a dyn SchemaProvider) -> Self {
        Self { config, schema }
    }

    /// Builds the definition of one exported `(kind, bundle)` group.
    ///
    /// # Errors
    ///
    /// Returns [`ExportError::InvalidRequest`] if the kind vanished from the
    /// schema service since discovery ran.
    pub fn synthesize(
        &self,
        kind: &str,
        bundle: Option<&str>,
        results: &ExportResult,
    ) -> Result<MigrationDefinition, ExportError> {
        let schema = self
            .schema
            .kind_schema(kind)
            .ok_or_else(|| ConfigError::UnknownKind(kind.to_owned()))?;
        let definitions = self.schema.field_definitions(kind, bundle);
        let migration_id = self.config.migration_id(kind, bundle);

        let mut source = SourceDescriptor {
            plugin: "url".to_owned(),
            data_fetcher_plugin: "file".to_owned(),
            data_parser_plugin: "json".to_owned(),
            item_selector: "/".to_owned(),
            urls: self.snapshot_urls(kind, bundle, results),
            ids: BTreeMap::new(),
            fields: BTreeMap::new(),
        };
        self.collect_id_fields(&schema, &definitions, &mut source.ids);

        let mut process = BTreeMap::new();
        let mut dependencies = MigrationDependencies::default();
        // Every schema field gets a source mapping and a pass-through step,
        // computed fields included; the snapshot side decides what it emits.
        for definition in &definitions {
            source.fields.insert(
                definition.name.clone(),
                SourceField {
                    name: definition.name.clone(),
                    selector: format!("/{}", definition.name),
                },
            );

            if definition.is_reference() {
                self.collect_reference_dependencies(
                    kind,
                    definition,
                    results,
                    &mut dependencies,
                );
            }

            if kind == FILE_KIND && definition.name == "uri" {
                insert_file_uri_pipeline(&mut process);
            } else {
                process.insert(
                    definition.name.clone(),
                    ProcessPipeline::Direct(definition.name.clone()),
                );
            }
        }

        Ok(MigrationDefinition {
            label: label_for(kind, bundle),
            migration_group: self.config.group.clone(),
            migration_tags: vec!["Content".to_owned(), self.config.human_name.clone()],
            id: migration_id,
            source,
            process,
            destination: Destination {
                plugin: destination_plugin(kind, &schema),
                translations: self.config.include_translations,
            },
            migration_dependencies: dependencies,
        })
    }

    /// Builds the migration-relative snapshot URL list, natural-sorted.
    fn snapshot_urls(
        &self,
        kind: &str,
        bundle: Option<&str>,
        results: &ExportResult,
    ) -> Vec<String> {
        let ids = match (results.exported_ids(kind), bundle) {
            (Some(crate::context::ExportedIds::Bundled(bundles)), Some(bundle)) => {
                bundles.get(bundle).cloned().unwrap_or_default()
            }
            (Some(exported), None) => exported.all_ids(),
            _ => Vec::new(),
        };
        let mut urls: Vec<String> = ids
            .iter()
            .map(|id| format!("../{}", self.config.data_path(kind, bundle, id)))
            .collect();
        natural_sort(&mut urls);
        urls
    }

    /// Adds one typed entry per declared key field of the kind.
    fn collect_id_fields(
        &self,
        schema: &KindSchema,
        definitions: &[FieldDefinition],
        ids: &mut BTreeMap<String, IdField>,
    ) {
        let keys = [
            Some(schema.keys.id.as_str()),
            schema.keys.revision.as_deref(),
            schema.keys.langcode.as_deref(),
        ];
        for key in keys.into_iter().flatten() {
            let id_type = definitions
                .iter()
                .find(|d| d.name == key)
                .filter(|d| d.field_type == "integer")
                .map_or("string", |_| "integer");
            ids.insert(
                key.to_owned(),
                IdField {
                    id_type: id_type.to_owned(),
                },
            );
        }
    }

    /// Derives dependencies contributed by one reference-valued field.
    ///
    /// Only kinds actually exported in this run contribute. Most
    /// dependencies are optional; two pairings import broken without a
    /// preexisting target and are required instead: comment authors, and
    /// user pictures when a visited user actually referenced a file.
    fn collect_reference_dependencies(
        &self,
        kind: &str,
        definition: &FieldDefinition,
        results: &ExportResult,
        dependencies: &mut MigrationDependencies,
    ) {
        let Some(reference) = &definition.reference else {
            return;
        };
        let target_kind = reference.target_kind.as_str();
        let Some(exported) = results.exported_ids(target_kind) else {
            return;
        };

        let required = (kind == COMMENT_KIND && target_kind == USER_KIND)
            || (kind == USER_KIND
                && target_kind == FILE_KIND
                && results.user_has_file_reference == Some(true));

        let target_has_bundles = self
            .schema
            .kind_schema(target_kind)
            .is_some_and(|s| s.has_bundles());
        if target_has_bundles {
            // Handler-declared bundles when present, else every exported
            // bundle of the target kind.
            let target_bundles: Vec<String> = if reference.target_bundles.is_empty() {
                exported
                    .bundles()
                    .unwrap_or_default()
                    .into_iter()
                    .map(str::to_owned)
                    .collect()
            } else {
                reference.target_bundles.clone()
            };
            for target_bundle in &target_bundles {
                if !exported.contains_bundle(target_bundle) {
                    continue;
                }
                dependencies.add(
                    required,
                    self.config.migration_id(target_kind, Some(target_bundle)),
                );
            }
        } else {
            dependencies.add(required, self.config.migration_id(target_kind, None));
        }
    }
}

fn label_for(kind: &str, bundle: Option<&str>) -> String {
    match bundle {
        Some(bundle) => format!("Import {kind} {bundle}"),
        None => format!("Import {kind}"),
    }
}

/// Picks the destination plugin from the kind's schema.
fn destination_plugin(kind: &str, schema: &KindSchema) -> String {
    let base = if kind == PARAGRAPH_KIND {
        "entity_reference_revisions"
    } else if schema.revisionable() {
        "entity_complete"
    } else {
        "entity"
    };
    format!("{base}:{kind}")
}

/// Replaces the pass-through pipeline of the file kind's `uri` field.
///
/// The snapshot stores the original `scheme://path` URI while the copied
/// asset lives under `<file_subdir>/<scheme>/<path>` in the package, so the
/// import has to reassemble an absolute source path before copying:
/// split the URI, skip rows without one, concatenate the runtime asset-root
/// constant with the parts, then `file_copy` back onto the original URI.
fn insert_file_uri_pipeline(process: &mut BTreeMap<String, ProcessPipeline>) {
    let explode_uri = |index: u64| -> SmallVec<[ProcessStep; 1]> {
        smallvec::smallvec![
            ProcessStep::new(
                "explode",
                [("delimiter", json!("://")), ("source", json!("uri"))],
            ),
            ProcessStep::new("extract", [("index", json!([index]))]),
            ProcessStep::new("skip_on_empty", [("method", json!("row"))]),
        ]
    };
    process.insert(
        "source_file_scheme".to_owned(),
        ProcessPipeline::Steps(explode_uri(0)),
    );
    process.insert(
        "source_file_path".to_owned(),
        ProcessPipeline::Steps(explode_uri(1)),
    );
    process.insert(
        "source_full_path".to_owned(),
        ProcessPipeline::Steps(smallvec::smallvec![ProcessStep::new(
            "concat",
            [
                ("delimiter", json!("/")),
                (
                    "source",
                    json!([
                        FILE_PATH_CONSTANT,
                        "@source_file_scheme",
                        "@source_file_path",
                    ]),
                ),
            ],
        )]),
    );
    process.insert(
        "uri".to_owned(),
        ProcessPipeline::Steps(smallvec::smallvec![ProcessStep::new(
            "file_copy",
            [("source", json!(["@source_full_path", "uri"]))],
        )]),
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryBackend;
    use ce_core::{PropertyType, ReferenceTarget};

    fn backend() -> MemoryBackend {
        let mut backend = MemoryBackend::new();
        backend.insert_schema(
            KindSchema::new("node", "Content")
                .with_id_key("nid")
                .with_revision_key("vid")
                .with_bundle_key("type")
                .with_langcode_key("langcode"),
        );
        backend.insert_schema(KindSchema::new("user", "User").with_id_key("uid"));
        backend.insert_schema(KindSchema::new("file", "File").with_id_key("fid"));
        backend.insert_schema(
            KindSchema::new("comment", "Comment")
                .with_id_key("cid")
                .with_langcode_key("langcode"),
        );

        backend.insert_fields(
            "node",
            Some("article"),
            vec![
                FieldDefinition::new("nid", "integer")
                    .with_main_property("value")
                    .with_property("value", PropertyType::Integer),
                FieldDefinition::new("vid", "integer")
                    .with_main_property("value")
                    .with_property("value", PropertyType::Integer),
                FieldDefinition::new("langcode", "language")
                    .with_main_property("value")
                    .with_property("value", PropertyType::String),
                FieldDefinition::new("title", "string")
                    .with_main_property("value")
                    .with_property("value", PropertyType::String),
                FieldDefinition::new("uid", "entity_reference")
                    .with_main_property("target_id")
                    .with_property("target_id", PropertyType::Integer)
                    .with_reference(ReferenceTarget::new("user")),
                FieldDefinition::new("path", "path").computed(),
            ],
        );
        backend.insert_fields(
            "user",
            None,
            vec![
                FieldDefinition::new("uid", "integer")
                    .with_main_property("value")
                    .with_property("value", PropertyType::Integer),
                FieldDefinition::new("name", "string")
                    .with_main_property("value")
                    .with_property("value", PropertyType::String),
                FieldDefinition::new("user_picture", "image")
                    .with_main_property("target_id")
                    .with_property("target_id", PropertyType::Integer)
                    .with_reference(ReferenceTarget::new("file")),
            ],
        );
        backend.insert_fields(
            "file",
            None,
            vec![
                FieldDefinition::new("fid", "integer")
                    .with_main_property("value")
                    .with_property("value", PropertyType::Integer),
                FieldDefinition::new("filename", "string")
                    .with_main_property("value")
                    .with_property("value", PropertyType::String),
                FieldDefinition::new("uri", "file_uri")
                    .with_main_property("value")
                    .with_property("value", PropertyType::String),
            ],
        );
        backend.insert_fields(
            "comment",
            None,
            vec![
                FieldDefinition::new("cid", "integer")
                    .with_main_property("value")
                    .with_property("value", PropertyType::Integer),
                FieldDefinition::new("langcode", "language")
                    .with_main_property("value")
                    .with_property("value", PropertyType::String),
                FieldDefinition::new("uid", "entity_reference")
                    .with_main_property("target_id")
                    .with_property("target_id", PropertyType::Integer)
                    .with_reference(ReferenceTarget::new("user")),
                FieldDefinition::new("entity_id", "entity_reference")
                    .with_main_property("target_id")
                    .with_property("target_id", PropertyType::Integer)
                    .with_reference(ReferenceTarget::new("node").with_bundles(["article"])),
            ],
        );
        backend
    }

    fn results() -> ExportResult {
        let mut results = ExportResult::default();
        results.record_exported("node", Some("article"), "2");
        results.record_exported("node", Some("article"), "10");
        results.record_exported("user", None, "10");
        results.record_exported("user", None, "20");
        results.record_exported("file", None, "5");
        results.record_exported("comment", None, "1");
        results.record_exported("comment", None, "2");
        results
    }

    #[test]
    fn test_node_definition_shape() {
        let backend = backend();
        let config = ExportJobConfig::new(["node"]);
        let synthesizer = DefinitionSynthesizer::new(&config, &backend);
        let definition = synthesizer
            .synthesize("node", Some("article"), &results())
            .unwrap();

        assert_eq!(definition.id, "content_export_node_article");
        assert_eq!(definition.label, "Import node article");
        assert_eq!(definition.migration_group, "content");
        assert_eq!(
            definition.migration_tags,
            ["Content", "Exported content"]
        );
        assert_eq!(definition.destination.plugin, "entity_complete:node");
        assert!(definition.destination.translations);

        // Natural order: node-2 before node-10.
        assert_eq!(
            definition.source.urls,
            [
                "../data/node/article/node-2.json",
                "../data/node/article/node-10.json",
            ]
        );
        assert_eq!(definition.source.ids["nid"].id_type, "integer");
        assert_eq!(definition.source.ids["vid"].id_type, "integer");
        assert_eq!(definition.source.ids["langcode"].id_type, "string");

        // Computed fields are mapped like any other schema field.
        assert_eq!(definition.source.fields["path"].selector, "/path");
        assert_eq!(
            definition.process["path"],
            ProcessPipeline::Direct("path".to_owned())
        );
        assert_eq!(definition.source.fields["title"].selector, "/title");
        assert_eq!(
            definition.process["title"],
            ProcessPipeline::Direct("title".to_owned())
        );
    }

    #[test]
    fn test_flat_kind_destination_and_label() {
        let backend = backend();
        let config = ExportJobConfig::new(["user"]);
        let synthesizer = DefinitionSynthesizer::new(&config, &backend);
        let definition = synthesizer.synthesize("user", None, &results()).unwrap();
        assert_eq!(definition.id, "content_export_user");
        assert_eq!(definition.label, "Import user");
        assert_eq!(definition.destination.plugin, "entity:user");
    }

    #[test]
    fn test_dependency_soundness_per_exported_bundle() {
        // The comment's node reference is restricted to `article`, which was
        // exported: exactly one dependency, and an optional one.
        let backend = backend();
        let config = ExportJobConfig::new(["comment"]);
        let synthesizer = DefinitionSynthesizer::new(&config, &backend);
        let definition = synthesizer.synthesize("comment", None, &results()).unwrap();
        assert_eq!(
            definition.migration_dependencies.optional,
            ["content_export_node_article"]
        );
    }

    #[test]
    fn test_absent_bundle_contributes_nothing() {
        let mut backend = backend();
        backend.insert_fields(
            "comment",
            None,
            vec![FieldDefinition::new("entity_id", "entity_reference")
                .with_main_property("target_id")
                .with_property("target_id", PropertyType::Integer)
                .with_reference(ReferenceTarget::new("node").with_bundles(["page"]))],
        );
        let config = ExportJobConfig::new(["comment"]);
        let synthesizer = DefinitionSynthesizer::new(&config, &backend);
        let definition = synthesizer.synthesize("comment", None, &results()).unwrap();
        assert!(definition.migration_dependencies.optional.is_empty());
        assert!(definition.migration_dependencies.required.is_empty());
    }

    #[test]
    fn test_comment_user_dependency_is_required() {
        let backend = backend();
        let config = ExportJobConfig::new(["comment"]);
        let synthesizer = DefinitionSynthesizer::new(&config, &backend);
        let definition = synthesizer.synthesize("comment", None, &results()).unwrap();
        assert_eq!(
            definition.migration_dependencies.required,
            ["content_export_user"]
        );
    }

    #[test]
    fn test_user_file_dependency_follows_sticky_flag() {
        let backend = backend();
        let config = ExportJobConfig::new(["user"]);
        let synthesizer = DefinitionSynthesizer::new(&config, &backend);

        let mut with_flag = results();
        with_flag.user_has_file_reference = Some(true);
        let definition = synthesizer.synthesize("user", None, &with_flag).unwrap();
        assert_eq!(
            definition.migration_dependencies.required,
            ["content_export_file"]
        );
        assert!(definition.migration_dependencies.optional.is_empty());

        let mut without_flag = results();
        without_flag.user_has_file_reference = Some(false);
        let definition = synthesizer
            .synthesize("user", None, &without_flag)
            .unwrap();
        assert!(definition.migration_dependencies.required.is_empty());
        assert_eq!(
            definition.migration_dependencies.optional,
            ["content_export_file"]
        );
    }

    #[test]
    fn test_unexported_target_contributes_nothing() {
        let backend = backend();
        let config = ExportJobConfig::new(["user"]);
        let synthesizer = DefinitionSynthesizer::new(&config, &backend);
        let mut results = ExportResult::default();
        results.record_exported("user", None, "10");
        let definition = synthesizer.synthesize("user", None, &results).unwrap();
        assert!(definition.migration_dependencies.required.is_empty());
        assert!(definition.migration_dependencies.optional.is_empty());
    }

    #[test]
    fn test_file_uri_pipeline() {
        let backend = backend();
        let config = ExportJobConfig::new(["file"]);
        let synthesizer = DefinitionSynthesizer::new(&config, &backend);
        let definition = synthesizer.synthesize("file", None, &results()).unwrap();

        for key in [
            "source_file_scheme",
            "source_file_path",
            "source_full_path",
            "uri",
        ] {
            assert!(
                matches!(definition.process[key], ProcessPipeline::Steps(_)),
                "{key} must be an explicit pipeline"
            );
        }
        let ProcessPipeline::Steps(steps) = &definition.process["source_file_scheme"] else {
            panic!("expected explicit steps");
        };
        assert_eq!(steps.len(), 3);
        assert_eq!(steps[0].plugin, "explode");
        assert_eq!(steps[1].options["index"], json!([0]));
        assert_eq!(steps[2].plugin, "skip_on_empty");

        let ProcessPipeline::Steps(concat) = &definition.process["source_full_path"] else {
            panic!("expected explicit steps");
        };
        assert_eq!(
            concat[0].options["source"],
            json!([
                FILE_PATH_CONSTANT,
                "@source_file_scheme",
                "@source_file_path",
            ])
        );

        // Referenced pipelines serialize ahead of their consumers.
        let json = serde_json::to_string_pretty(&definition).unwrap();
        let scheme_at = json.find("source_file_scheme").unwrap();
        let full_at = json.find("source_full_path").unwrap();
        assert!(scheme_at < full_at);
    }

    #[test]
    fn test_paragraph_destination_override() {
        let mut backend = backend();
        backend.insert_schema(
            KindSchema::new("paragraph", "Paragraph")
                .with_id_key("id")
                .with_revision_key("revision_id"),
        );
        backend.insert_fields(
            "paragraph",
            Some("quote"),
            vec![FieldDefinition::new("id", "integer")
                .with_main_property("value")
                .with_property("value", PropertyType::Integer)],
        );
        let config = ExportJobConfig::new(["paragraph"]);
        let synthesizer = DefinitionSynthesizer::new(&config, &backend);
        let mut results = ExportResult::default();
        results.record_exported("paragraph", Some("quote"), "1");
        let definition = synthesizer
            .synthesize("paragraph", Some("quote"), &results)
            .unwrap();
        assert_eq!(
            definition.destination.plugin,
            "entity_reference_revisions:paragraph"
        );
    }

    #[test]
    fn test_definition_roundtrip() {
        let backend = backend();
        let config = ExportJobConfig::new(["file"]);
        let synthesizer = DefinitionSynthesizer::new(&config, &backend);
        let definition = synthesizer.synthesize("file", None, &results()).unwrap();
        let json = serde_json::to_string_pretty(&definition).unwrap();
        let back: MigrationDefinition = serde_json::from_str(&json).unwrap();
        assert_eq!(back, definition);
    }

    #[test]
    fn test_unknown_kind_is_rejected() {
        let backend = backend();
        let config = ExportJobConfig::new(["node"]);
        let synthesizer = DefinitionSynthesizer::new(&config, &backend);
        let error = synthesizer
            .synthesize("block", None, &results())
            .unwrap_err();
        assert!(matches!(error, ExportError::InvalidRequest(_)));
    }
}
