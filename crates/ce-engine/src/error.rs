//! Error types for the export engine.
//!
//! The taxonomy follows the failure modes of an export run:
//!
//! - [`ExportError::LockContention`]: another run is in progress; fatal,
//!   nothing was mutated, retry later.
//! - [`ExportError::InvalidRequest`]: detected before any step runs.
//! - [`ExportError::ArchiveWrite`] / [`ExportError::DuplicateEntry`]: disk
//!   or bookkeeping failure while staging the archive; the lock is released
//!   and prior entries remain pending cleanup at the next run's init.
//! - [`ExportError::Extraction`]: destination tree not writable after the
//!   archive was fully built; the archive remains for manual retry.
//! - [`ExportError::StepFailed`]: an unexpected lower-level failure caught
//!   at the step-dispatch boundary, wrapped once with its cause.
//!
//! Step errors are never auto-retried; a restart clears the previous staging
//! tree during initialization.

use camino::Utf8PathBuf;
use ce_core::{ConfigError, RecordRef};

use crate::processor::Step;
use crate::store::StoreError;

/// Errors that can occur during an export run.
#[derive(Debug, thiserror::Error)]
pub enum ExportError {
    /// Another process is already exporting content.
    ///
    /// Nothing has been mutated; a second concurrent run fails immediately
    /// rather than queuing.
    #[error("another process is already exporting content")]
    LockContention,

    /// The export request is invalid; rejected before any step ran.
    #[error("invalid export request: {0}")]
    InvalidRequest(#[from] ConfigError),

    /// Failed to stage or pack an archive entry.
    #[error("failed to write archive entry '{path}': {source}")]
    ArchiveWrite {
        /// The archive-relative or filesystem path that failed.
        path: Utf8PathBuf,
        /// The underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// An archive entry path was written twice.
    ///
    /// The archive is append-only; every path is written exactly once.
    #[error("archive entry '{0}' was already written")]
    DuplicateEntry(Utf8PathBuf),

    /// The finished archive could not be extracted onto the destination.
    ///
    /// The archive itself is intact and remains available for manual retry.
    #[error("cannot extract the archive to '{destination}': {source}")]
    Extraction {
        /// The destination tree that was not writable.
        destination: Utf8PathBuf,
        /// The underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// A collaborator store failed.
    #[error("store failure while {context}: {source}")]
    Store {
        /// What the engine was doing when the store failed.
        context: String,
        /// The underlying store error.
        #[source]
        source: StoreError,
    },

    /// A record discovered earlier in the run disappeared from the store.
    #[error("record {0} disappeared from the store during export")]
    MissingRecord(RecordRef),

    /// Failed to encode a payload as JSON.
    #[error("failed to encode {context}: {source}")]
    Encode {
        /// What was being encoded.
        context: String,
        /// The underlying serde error.
        #[source]
        source: serde_json::Error,
    },

    /// Failed to render the entry-point template.
    #[error("failed to render the entry point: {0}")]
    Template(#[from] crate::template::TemplateError),

    /// Failed to persist or reload the externally owned run context.
    #[error("failed to persist the run context: {0}")]
    ContextPersistence(#[source] std::io::Error),

    /// An I/O error that has not been given a more specific meaning yet.
    ///
    /// The step dispatcher wraps these into [`ExportError::StepFailed`];
    /// known error kinds pass through unchanged.
    #[error(transparent)]
    Io(#[from] std::io::Error),

    /// A JSON error that has not been given a more specific meaning yet.
    #[error(transparent)]
    Json(#[from] serde_json::Error),

    /// An unexpected lower-level failure, wrapped once at the step boundary.
    #[error("unexpected error while processing step '{step}'")]
    StepFailed {
        /// The step that was being dispatched.
        step: Step,
        /// The underlying failure.
        #[source]
        source: Box<ExportError>,
    },
}

impl ExportError {
    /// Creates a new [`ExportError::ArchiveWrite`] error.
    #[inline]
    pub fn archive(path: impl Into<Utf8PathBuf>, source: std::io::Error) -> Self {
        Self::ArchiveWrite {
            path: path.into(),
            source,
        }
    }

    /// Creates a new [`ExportError::Extraction`] error.
    #[inline]
    pub fn extraction(destination: impl Into<Utf8PathBuf>, source: std::io::Error) -> Self {
        Self::Extraction {
            destination: destination.into(),
            source,
        }
    }

    /// Creates a new [`ExportError::Store`] error.
    #[inline]
    pub fn store(context: impl Into<String>, source: StoreError) -> Self {
        Self::Store {
            context: context.into(),
            source,
        }
    }

    /// Creates a new [`ExportError::Encode`] error.
    #[inline]
    pub fn encode(context: impl Into<String>, source: serde_json::Error) -> Self {
        Self::Encode {
            context: context.into(),
            source,
        }
    }

    /// Returns `true` if this is a lock-contention error.
    #[inline]
    #[must_use]
    pub const fn is_lock_contention(&self) -> bool {
        matches!(self, Self::LockContention)
    }

    /// Wraps an error at the step-dispatch boundary.
    ///
    /// Known error kinds pass through unchanged; only bare I/O and JSON
    /// failures, the "anything lower level" cases, are wrapped into
    /// [`ExportError::StepFailed`] carrying the step and the cause.
    #[must_use]
    pub fn at_step(self, step: Step) -> Self {
        match self {
            e @ (Self::Io(_) | Self::Json(_)) => Self::StepFailed {
                step,
                source: Box::new(e),
            },
            other => other,
        }
    }
}
