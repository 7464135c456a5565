//! The export state machine.
//!
//! An export run is a fixed sequence of steps, each internally chunked so
//! that one `process_step` invocation performs exactly one unit of work
//! (one record, one asset, one definition). All mutable state lives in the
//! externally persisted [`RunContext`]; the processor itself holds only the
//! immutable configuration and its collaborator handles, so a run survives
//! process restarts as long as the context and the staging tree do.
//!
//! A named advisory lock keeps runs mutually exclusive. Any step error
//! releases the lock before propagating; finalize releases it on success.

use std::fmt;

use ce_core::{ExportJobConfig, PackageDescriptor, RecordRef, natural_sort};
use tracing::{debug, info, warn};

use crate::archive::ArchiveBuilder;
use crate::context::RunContext;
use crate::definition::DefinitionSynthesizer;
use crate::discovery::{Discoverer, FILE_KIND};
use crate::error::ExportError;
use crate::serializer::serialize_record;
use crate::store::{
    FileAssetStore, LockManager, RecordStore, SchemaProvider, StoreError, split_uri,
};
use crate::template::{TemplateValues, render_entry_point};

/// The advisory lock name shared by every export run.
pub const LOCK_NAME: &str = "content_export";

/// The steps of an export run, in execution order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Step {
    /// Walk the reference closure from the seed kinds.
    Discover,
    /// Write one snapshot per discovered record.
    WriteRecords,
    /// Copy the binary assets of exported file records.
    WriteAssets,
    /// Synthesize one migration definition per exported group.
    WriteDefinitions,
    /// Write descriptor and entry point, pack, extract, release the lock.
    Finalize,
}

impl Step {
    /// Every step in execution order.
    pub const ALL: [Self; 5] = [
        Self::Discover,
        Self::WriteRecords,
        Self::WriteAssets,
        Self::WriteDefinitions,
        Self::Finalize,
    ];
}

impl fmt::Display for Step {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Discover => "discover",
            Self::WriteRecords => "write_records",
            Self::WriteAssets => "write_assets",
            Self::WriteDefinitions => "write_definitions",
            Self::Finalize => "finalize",
        };
        f.write_str(name)
    }
}

/// Runs export steps against the configured collaborators.
pub struct ExportProcessor<'a> {
    config: ExportJobConfig,
    records: &'a dyn RecordStore,
    schema: &'a dyn SchemaProvider,
    assets: &'a dyn FileAssetStore,
    lock: &'a dyn LockManager,
    archive: ArchiveBuilder,
}

impl<'a> ExportProcessor<'a> {
    /// Creates a processor for one run.
    pub fn new(
        config: ExportJobConfig,
        records: &'a dyn RecordStore,
        schema: &'a dyn SchemaProvider,
        assets: &'a dyn FileAssetStore,
        lock: &'a dyn LockManager,
        archive: ArchiveBuilder,
    ) -> Self {
        Self {
            config,
            records,
            schema,
            assets,
            lock,
            archive,
        }
    }

    /// Returns the run's configuration.
    #[must_use]
    pub fn config(&self) -> &ExportJobConfig {
        &self.config
    }

    /// Returns the archive builder of this run.
    #[must_use]
    pub fn archive(&self) -> &ArchiveBuilder {
        &self.archive
    }

    /// Returns `true` if another run currently holds the export lock.
    #[must_use]
    pub fn already_processing(&self) -> bool {
        !self.lock.may_be_available(LOCK_NAME)
    }

    /// Releases the export lock without finishing the run.
    ///
    /// For drivers that fail outside a step, e.g. while persisting the
    /// context between invocations. Releasing an unheld lock is a no-op.
    pub fn abort(&self) {
        self.lock.release(LOCK_NAME);
    }

    /// Validates the request, takes the lock and clears stale leftovers.
    ///
    /// Returns the ordered steps the driver must run.
    ///
    /// # Errors
    ///
    /// Fails with [`ExportError::InvalidRequest`] before anything is
    /// touched, and [`ExportError::LockContention`] when another run holds
    /// the lock; in both cases nothing has been mutated.
    pub fn initialize(&self) -> Result<Vec<Step>, ExportError> {
        self.config.validate()?;
        if !self.lock.acquire(LOCK_NAME) {
            return Err(ExportError::LockContention);
        }
        // A prior aborted run may have left a staging tree behind.
        if let Err(e) = self.archive.clear() {
            self.lock.release(LOCK_NAME);
            return Err(e);
        }
        info!(
            module = %self.config.module_name,
            kinds = ?self.config.kinds,
            "Export run initialized"
        );
        Ok(Step::ALL.to_vec())
    }

    /// Performs one unit of work of the given step.
    ///
    /// # Errors
    ///
    /// Known [`ExportError`] kinds pass through unchanged; unexpected
    /// lower-level failures are wrapped into [`ExportError::StepFailed`].
    /// Every error releases the lock first.
    pub fn process_step(&self, step: Step, ctx: &mut RunContext) -> Result<(), ExportError> {
        let result = match step {
            Step::Discover => self.discover(ctx),
            Step::WriteRecords => self.write_record(ctx),
            Step::WriteAssets => self.write_asset(ctx),
            Step::WriteDefinitions => self.write_definition(ctx),
            Step::Finalize => self.finalize(ctx),
        };
        result.map_err(|e| {
            self.lock.release(LOCK_NAME);
            e.at_step(step)
        })
    }

    fn discover(&self, ctx: &mut RunContext) -> Result<(), ExportError> {
        Discoverer::new(self.records, self.schema, &self.config.kinds).step(ctx)
    }

    fn write_record(&self, ctx: &mut RunContext) -> Result<(), ExportError> {
        if ctx.sandbox.queue.is_none() {
            let queue: Vec<String> = ctx
                .results
                .discovered
                .iter()
                .map(RecordRef::canonical)
                .collect();
            info!(records = queue.len(), "Writing record snapshots");
            ctx.sandbox.total = queue.len();
            ctx.sandbox.progress = 0;
            ctx.sandbox.queue = Some(queue);
        }
        let Some(current) = self.current_queue_entry(ctx) else {
            ctx.finish_step();
            return Ok(());
        };
        let record_ref: RecordRef = current.parse().map_err(|e| {
            ExportError::store(
                "reading the snapshot queue",
                StoreError::Backend(format!("malformed queue entry '{current}': {e}")),
            )
        })?;

        let record = self
            .records
            .load(&record_ref)
            .map_err(|e| ExportError::store(format!("loading {record_ref}"), e))?
            .ok_or_else(|| ExportError::MissingRecord(record_ref.clone()))?;
        let definitions = self
            .schema
            .field_definitions(&record.kind, record.bundle.as_deref());
        let trees = serialize_record(&record, &definitions, self.config.include_translations);
        let json = serde_json::to_vec_pretty(&trees)
            .map_err(|e| ExportError::encode(format!("snapshot of {record_ref}"), e))?;

        let bundle = record.bundle.as_deref();
        let path = self.config.data_path(&record.kind, bundle, &record.id);
        if self.archive.contains(&path) {
            // Staged by an interrupted invocation whose context was lost.
            debug!(path = %path, "Snapshot already staged, skipping");
        } else {
            self.archive.put(&path, &json, 0o644)?;
        }
        ctx.results
            .record_exported(&record.kind, bundle, record.id.clone());

        ctx.sandbox.progress += 1;
        Self::advance(ctx, "Writing record snapshots");
        Ok(())
    }

    fn write_asset(&self, ctx: &mut RunContext) -> Result<(), ExportError> {
        if ctx.sandbox.queue.is_none() {
            let queue = ctx
                .results
                .exported_ids(FILE_KIND)
                .map(|ids| ids.all_ids())
                .unwrap_or_default();
            info!(assets = queue.len(), "Copying file assets");
            ctx.sandbox.total = queue.len();
            ctx.sandbox.progress = 0;
            ctx.sandbox.queue = Some(queue);
        }
        let Some(file_id) = self.current_queue_entry(ctx) else {
            ctx.finish_step();
            return Ok(());
        };
        let record_ref = RecordRef::new(FILE_KIND, file_id);
        let record = self
            .records
            .load(&record_ref)
            .map_err(|e| ExportError::store(format!("loading {record_ref}"), e))?
            .ok_or_else(|| ExportError::MissingRecord(record_ref.clone()))?;

        let uri = record
            .field("uri")
            .and_then(|v| v.first_property("value"))
            .and_then(serde_json::Value::as_str);
        match uri {
            Some(uri) => {
                let (scheme, path) = split_uri(uri);
                let target = format!("{}/{path}", self.config.file_directory(scheme));
                if self.archive.contains(&target) {
                    debug!(path = %target, "Asset already staged, skipping");
                } else {
                    let bytes = self
                        .assets
                        .read(uri)
                        .map_err(|e| ExportError::store(format!("reading asset '{uri}'"), e))?;
                    self.archive.put(&target, &bytes, 0o644)?;
                }
            }
            None => {
                warn!(record = %record_ref, "File record has no URI, skipping its asset");
            }
        }

        ctx.sandbox.progress += 1;
        Self::advance(ctx, "Copying file assets");
        Ok(())
    }

    fn write_definition(&self, ctx: &mut RunContext) -> Result<(), ExportError> {
        if ctx.sandbox.queue.is_none() {
            let queue: Vec<String> = ctx
                .results
                .groups()
                .into_iter()
                .map(|(kind, bundle)| match bundle {
                    Some(bundle) => format!("{kind}:{bundle}"),
                    None => kind,
                })
                .collect();
            info!(definitions = queue.len(), "Generating migration definitions");
            ctx.sandbox.total = queue.len();
            ctx.sandbox.progress = 0;
            ctx.sandbox.queue = Some(queue);
        }
        let Some(group) = self.current_queue_entry(ctx) else {
            ctx.finish_step();
            return Ok(());
        };
        let (kind, bundle) = match group.split_once(':') {
            Some((kind, bundle)) => (kind, Some(bundle)),
            None => (group.as_str(), None),
        };

        let synthesizer = DefinitionSynthesizer::new(&self.config, self.schema);
        let definition = synthesizer.synthesize(kind, bundle, &ctx.results)?;
        let json = serde_json::to_vec_pretty(&definition)
            .map_err(|e| ExportError::encode(format!("definition '{}'", definition.id), e))?;
        let path = format!("migrations/{}.json", definition.id);
        if self.archive.contains(&path) {
            debug!(path = %path, "Definition already staged, skipping");
        } else {
            self.archive.put(&path, &json, 0o644)?;
        }
        if !ctx.results.migration_ids.contains(&definition.id) {
            ctx.results.migration_ids.push(definition.id);
        }

        ctx.sandbox.progress += 1;
        Self::advance(ctx, "Generating migration definitions");
        Ok(())
    }

    fn finalize(&self, ctx: &mut RunContext) -> Result<(), ExportError> {
        let mut migration_ids = ctx.results.migration_ids.clone();
        natural_sort(&mut migration_ids);
        migration_ids.dedup();

        let descriptor = PackageDescriptor::new(
            self.config.human_name.clone(),
            self.config.to_settings(migration_ids.clone()),
        );
        let descriptor_json = serde_json::to_vec_pretty(&descriptor)
            .map_err(|e| ExportError::encode("package descriptor", e))?;
        let descriptor_path = self.config.descriptor_file_name();
        if !self.archive.contains(&descriptor_path) {
            self.archive.put(&descriptor_path, &descriptor_json, 0o644)?;
        }

        let entry_point = render_entry_point(&TemplateValues {
            human_name: self.config.human_name.clone(),
            machine_name: self.config.module_name.clone(),
            migration_ids,
            file_subdir: self.config.file_subdir.clone(),
        })?;
        let entry_point_path = format!("{}.module", self.config.module_name);
        if !self.archive.contains(&entry_point_path) {
            self.archive
                .put(&entry_point_path, entry_point.as_bytes(), 0o644)?;
        }

        let tarball = self.archive.finish()?;
        info!(archive = %tarball, entries = self.archive.entry_count(), "Package archived");

        if let Some(base) = &self.config.extract_path {
            let target = base.join(&self.config.module_name);
            if target.as_std_path().exists() {
                // A re-export replaces the previously extracted tree.
                std::fs::remove_dir_all(target.as_std_path())
                    .map_err(|e| ExportError::extraction(target.clone(), e))?;
            }
            self.archive.extract_to(&target)?;
            info!(destination = %target, "Package extracted");
        }

        ctx.finish_step();
        ctx.message = Some("Export finished.".to_owned());
        self.lock.release(LOCK_NAME);
        Ok(())
    }

    /// Returns the queue entry at the current progress offset.
    fn current_queue_entry(&self, ctx: &RunContext) -> Option<String> {
        ctx.sandbox
            .queue
            .as_ref()
            .and_then(|queue| queue.get(ctx.sandbox.progress))
            .cloned()
    }

    fn advance(ctx: &mut RunContext, label: &str) {
        let (processed, total) = (ctx.sandbox.progress, ctx.sandbox.total);
        if processed >= total {
            ctx.finish_step();
        } else {
            ctx.set_progress(processed, total, format!("{label} ({processed}/{total})"));
        }
    }
}
