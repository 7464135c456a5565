//! Error types for the ce-core crate.
//!
//! This module provides the [`ConfigError`] type for export-job configuration
//! errors that are detectable before any export step runs.

use camino::Utf8PathBuf;

/// Errors that can occur while building or validating an export job.
///
/// Every variant represents a request problem that is caught up front;
/// nothing has been written or locked when one of these is returned.
///
/// # Examples
///
/// ```
/// use ce_core::ConfigError;
///
/// let error = ConfigError::NoKindsSelected;
/// assert!(error.to_string().contains("no record kinds"));
/// ```
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// The request did not select any record kinds to export.
    #[error("no record kinds were selected for export")]
    NoKindsSelected,

    /// A selected kind is unknown to the schema provider or excluded.
    #[error("unknown or excluded record kind: {0}")]
    UnknownKind(String),

    /// The extraction destination is missing or empty.
    #[error("destination of the export package must be provided")]
    MissingDestination,

    /// A fresh export would overwrite an existing package of the same name.
    #[error("a package named '{name}' already exists at {path}; pick a different module name or run an update")]
    NameCollision {
        /// The conflicting module name.
        name: String,
        /// Where the existing package was found.
        path: Utf8PathBuf,
    },

    /// A configuration option has an invalid value.
    #[error("invalid configuration option '{option}': {reason}")]
    InvalidOption {
        /// The name of the invalid option.
        option: String,
        /// Explanation of why the option is invalid.
        reason: String,
    },

    /// An I/O error occurred while reading configuration.
    #[error("failed to read configuration: {0}")]
    Io(#[from] std::io::Error),

    /// Failed to parse a stored package descriptor.
    #[error("failed to parse package descriptor: {0}")]
    Parse(#[from] serde_json::Error),
}

impl ConfigError {
    /// Creates a new [`ConfigError::InvalidOption`] error.
    #[inline]
    pub fn invalid_option(option: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidOption {
            option: option.into(),
            reason: reason.into(),
        }
    }
}
