//! Drives a full export run over a persisted context.
//!
//! The runner owns nothing but the loop: initialize, then for every step
//! keep invoking the processor with the reloaded context until the step
//! reports completion, persisting the context after each invocation. That
//! persistence discipline is what makes a run resumable; a driver with its
//! own scheduling (a job queue, a web request budget) can replace this loop
//! and call [`ExportProcessor::process_step`] directly.

use tracing::{debug, info};

use ce_core::ExportJobConfig;

use crate::context::{ContextStore, ExportResult, RunContext};
use crate::error::ExportError;
use crate::processor::ExportProcessor;

/// Runs every step of an export to completion.
pub struct BatchRunner<'a, S: ContextStore> {
    processor: &'a ExportProcessor<'a>,
    store: &'a S,
}

impl<'a, S: ContextStore> BatchRunner<'a, S> {
    /// Creates a runner driving the given processor over the given store.
    pub fn new(processor: &'a ExportProcessor<'a>, store: &'a S) -> Self {
        Self { processor, store }
    }

    /// Returns the configuration of the underlying run.
    #[must_use]
    pub fn config(&self) -> &ExportJobConfig {
        self.processor.config()
    }

    /// Runs the export to completion.
    ///
    /// # Errors
    ///
    /// Propagates the first step error unchanged; the persisted context is
    /// left in place for inspection, and the next run's initialization
    /// starts over from a clean slate.
    pub fn run(&self) -> Result<ExportResult, ExportError> {
        self.run_with_progress(|_| {})
    }

    /// Runs the export, reporting the context after every invocation.
    ///
    /// # Errors
    ///
    /// Same as [`BatchRunner::run`].
    pub fn run_with_progress(
        &self,
        mut on_progress: impl FnMut(&RunContext),
    ) -> Result<ExportResult, ExportError> {
        let steps = self.processor.initialize()?;
        self.persist(&RunContext::new())?;

        for step in steps {
            info!(step = %step, "Starting export step");
            let mut ctx = self.reload()?;
            ctx.reset_sandbox();
            self.persist(&ctx)?;

            loop {
                let mut ctx = self.reload()?;
                self.processor.process_step(step, &mut ctx)?;
                if let Some(message) = &ctx.message {
                    debug!(step = %step, finished = ctx.finished, "{message}");
                }
                let finished = ctx.finished >= 1.0;
                self.persist(&ctx)?;
                on_progress(&ctx);
                if finished {
                    break;
                }
            }
        }

        // Finalize has released the lock, so the remaining store calls need
        // no abort on failure.
        let final_ctx = self.store.load()?.unwrap_or_default();
        self.store.clear()?;
        Ok(final_ctx.results)
    }

    /// Loads the persisted context, releasing the export lock on failure.
    ///
    /// A run that cannot reach its context store anymore is over; the lock
    /// must not outlive it.
    fn reload(&self) -> Result<RunContext, ExportError> {
        match self.store.load() {
            Ok(ctx) => Ok(ctx.unwrap_or_default()),
            Err(e) => {
                self.processor.abort();
                Err(e)
            }
        }
    }

    /// Persists the context, releasing the export lock on failure.
    fn persist(&self, ctx: &RunContext) -> Result<(), ExportError> {
        self.store.save(ctx).inspect_err(|_| self.processor.abort())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::archive::ArchiveBuilder;
    use crate::context::{JsonContextStore, MemoryContextStore};
    use crate::processor::LOCK_NAME;
    use crate::store::{LockManager as _, MemoryBackend, MemoryLockManager};
    use ce_core::{
        FieldDefinition, FieldValue, KindSchema, PropertyType, Record, ReferenceTarget,
    };
    use serde_json::json;

    fn backend() -> MemoryBackend {
        let mut backend = MemoryBackend::new();
        backend.insert_schema(KindSchema::new("user", "User").with_id_key("uid"));
        backend.insert_schema(KindSchema::new("file", "File").with_id_key("fid"));
        backend.insert_fields(
            "user",
            None,
            vec![
                FieldDefinition::new("uid", "integer")
                    .with_main_property("value")
                    .with_property("value", PropertyType::Integer),
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
                FieldDefinition::new("uri", "file_uri")
                    .with_main_property("value")
                    .with_property("value", PropertyType::String),
            ],
        );

        let mut user_fields = std::collections::BTreeMap::new();
        user_fields.insert(
            "uid".to_owned(),
            FieldValue::scalar("value", json!(10)),
        );
        user_fields.insert(
            "user_picture".to_owned(),
            FieldValue::scalar("target_id", json!(5)),
        );
        backend.insert_record(Record {
            kind: "user".to_owned(),
            id: "10".to_owned(),
            bundle: None,
            langcode: "en".to_owned(),
            fields: user_fields,
            translations: Vec::new(),
        });

        let mut file_fields = std::collections::BTreeMap::new();
        file_fields.insert("fid".to_owned(), FieldValue::scalar("value", json!(5)));
        file_fields.insert(
            "uri".to_owned(),
            FieldValue::scalar("value", json!("public://pic.png")),
        );
        backend.insert_record(Record {
            kind: "file".to_owned(),
            id: "5".to_owned(),
            bundle: None,
            langcode: "en".to_owned(),
            fields: file_fields,
            translations: Vec::new(),
        });
        backend.insert_asset("public://pic.png", vec![1, 2, 3]);
        backend
    }

    #[test]
    fn test_run_to_completion_and_clear() {
        let backend = backend();
        let lock = MemoryLockManager::new();
        let dir = tempfile::tempdir().unwrap();
        let base = camino::Utf8PathBuf::from_path_buf(dir.path().to_path_buf()).unwrap();
        let processor = ExportProcessor::new(
            ExportJobConfig::new(["user"]),
            &backend,
            &backend,
            &backend,
            &lock,
            ArchiveBuilder::new(&base, "content_export"),
        );
        let store = MemoryContextStore::new();
        let runner = BatchRunner::new(&processor, &store);

        let results = runner.run().unwrap();
        assert_eq!(results.migration_ids.len(), 2);
        assert!(results.exported.contains_key("user"));
        assert!(results.exported.contains_key("file"));
        assert!(processor.archive().contains("assets/public/pic.png"));
        // The persisted context is gone after a successful run.
        assert!(store.load().unwrap().is_none());
        assert!(lock.may_be_available(LOCK_NAME));
    }

    #[test]
    fn test_progress_is_reported_per_invocation() {
        let backend = backend();
        let lock = MemoryLockManager::new();
        let dir = tempfile::tempdir().unwrap();
        let base = camino::Utf8PathBuf::from_path_buf(dir.path().to_path_buf()).unwrap();
        let processor = ExportProcessor::new(
            ExportJobConfig::new(["user"]),
            &backend,
            &backend,
            &backend,
            &lock,
            ArchiveBuilder::new(&base, "content_export"),
        );
        let store = MemoryContextStore::new();
        let runner = BatchRunner::new(&processor, &store);

        let mut invocations = 0usize;
        runner.run_with_progress(|_| invocations += 1).unwrap();
        // At least one invocation per step.
        assert!(invocations >= 5, "got {invocations} invocations");
    }

    /// Context store whose saves start failing after a set number of calls.
    struct FailingSaveStore {
        inner: MemoryContextStore,
        saves_left: std::sync::Mutex<usize>,
    }

    impl FailingSaveStore {
        fn new(saves_left: usize) -> Self {
            Self {
                inner: MemoryContextStore::new(),
                saves_left: std::sync::Mutex::new(saves_left),
            }
        }
    }

    impl ContextStore for FailingSaveStore {
        fn load(&self) -> Result<Option<RunContext>, ExportError> {
            self.inner.load()
        }

        fn save(&self, context: &RunContext) -> Result<(), ExportError> {
            let mut left = self.saves_left.lock().unwrap();
            if *left == 0 {
                return Err(ExportError::ContextPersistence(std::io::Error::other(
                    "no space left on device",
                )));
            }
            *left -= 1;
            self.inner.save(context)
        }

        fn clear(&self) -> Result<(), ExportError> {
            self.inner.clear()
        }
    }

    #[test]
    fn test_context_save_failure_releases_lock() {
        let backend = backend();
        let lock = MemoryLockManager::new();
        let dir = tempfile::tempdir().unwrap();
        let base = camino::Utf8PathBuf::from_path_buf(dir.path().to_path_buf()).unwrap();
        let processor = ExportProcessor::new(
            ExportJobConfig::new(["user"]),
            &backend,
            &backend,
            &backend,
            &lock,
            ArchiveBuilder::new(&base, "content_export"),
        );
        // The third save lands mid-discovery, well before finalize.
        let store = FailingSaveStore::new(2);
        let runner = BatchRunner::new(&processor, &store);

        let error = runner.run().unwrap_err();
        assert!(matches!(error, ExportError::ContextPersistence(_)));
        // A later run must not hit LockContention.
        assert!(lock.may_be_available(LOCK_NAME));
    }

    #[test]
    fn test_run_with_file_backed_context() {
        let backend = backend();
        let lock = MemoryLockManager::new();
        let dir = tempfile::tempdir().unwrap();
        let base = camino::Utf8PathBuf::from_path_buf(dir.path().to_path_buf()).unwrap();
        let processor = ExportProcessor::new(
            ExportJobConfig::new(["user"]),
            &backend,
            &backend,
            &backend,
            &lock,
            ArchiveBuilder::new(&base, "content_export"),
        );
        let store = JsonContextStore::new(base.join("run-context.json"));
        let runner = BatchRunner::new(&processor, &store);

        let results = runner.run().unwrap();
        assert_eq!(results.discovered.len(), 2);
        assert!(!store.path().as_std_path().exists());
    }
}
