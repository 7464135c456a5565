//! Export job configuration and the replayable package descriptor.
//!
//! An [`ExportJobConfig`] is built once per run from the merged request,
//! defaults and, for update runs, the settings embedded in a prior
//! package's descriptor. It is immutable for the lifetime of the run and is
//! the only state the processor keeps between step invocations.
//!
//! The [`PackageDescriptor`] is written into every finished package and
//! carries the original request parameters so a later run can replay them.

use camino::Utf8PathBuf;
use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// Default machine name of the generated package.
pub const DEFAULT_MODULE_NAME: &str = "content_export";

/// Default human-readable name of the generated package.
pub const DEFAULT_HUMAN_NAME: &str = "Exported content";

/// Default prefix of generated migration IDs.
pub const DEFAULT_ID_PREFIX: &str = "content_export";

/// Default group of the generated migrations.
pub const DEFAULT_GROUP: &str = "content";

/// Default subdirectory for record data snapshots.
pub const DEFAULT_DATA_SUBDIR: &str = "data";

/// Default subdirectory for copied file assets.
pub const DEFAULT_FILE_SUBDIR: &str = "assets";

/// Immutable per-run export configuration.
///
/// # Examples
///
/// ```
/// use ce_core::ExportJobConfig;
///
/// let config = ExportJobConfig::new(["node", "user"]);
/// assert_eq!(config.migration_id("node", Some("article")), "content_export_node_article");
/// assert_eq!(config.data_path("node", Some("article"), "2"), "data/node/article/node-2.json");
/// config.validate().unwrap();
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExportJobConfig {
    /// Seed kinds requested for export.
    pub kinds: Vec<String>,
    /// Machine name of the generated package.
    pub module_name: String,
    /// Human-readable name of the generated package.
    pub human_name: String,
    /// Prefix of generated migration IDs.
    pub id_prefix: String,
    /// Group assigned to the generated migrations.
    pub group: String,
    /// Package-relative subdirectory for record snapshots.
    pub data_subdir: String,
    /// Package-relative subdirectory for copied file assets.
    pub file_subdir: String,
    /// Where the finished package should be extracted, if anywhere.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub extract_path: Option<Utf8PathBuf>,
    /// Whether record translations are included in the snapshots.
    pub include_translations: bool,
}

impl ExportJobConfig {
    /// Creates a configuration with defaults for everything but the kinds.
    pub fn new<S: Into<String>>(kinds: impl IntoIterator<Item = S>) -> Self {
        Self {
            kinds: kinds.into_iter().map(Into::into).collect(),
            ..Self::default()
        }
    }

    /// Sets the package machine name.
    #[must_use]
    pub fn with_module_name(mut self, name: impl Into<String>) -> Self {
        self.module_name = name.into();
        self
    }

    /// Sets the package human name.
    #[must_use]
    pub fn with_human_name(mut self, name: impl Into<String>) -> Self {
        self.human_name = name.into();
        self
    }

    /// Sets the migration ID prefix.
    #[must_use]
    pub fn with_id_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.id_prefix = prefix.into();
        self
    }

    /// Sets the migration group.
    #[must_use]
    pub fn with_group(mut self, group: impl Into<String>) -> Self {
        self.group = group.into();
        self
    }

    /// Sets the data subdirectory.
    #[must_use]
    pub fn with_data_subdir(mut self, subdir: impl Into<String>) -> Self {
        self.data_subdir = subdir.into();
        self
    }

    /// Sets the file-assets subdirectory.
    #[must_use]
    pub fn with_file_subdir(mut self, subdir: impl Into<String>) -> Self {
        self.file_subdir = subdir.into();
        self
    }

    /// Sets the extraction destination.
    #[must_use]
    pub fn with_extract_path(mut self, path: impl Into<Utf8PathBuf>) -> Self {
        self.extract_path = Some(path.into());
        self
    }

    /// Disables translation snapshots.
    #[must_use]
    pub fn without_translations(mut self) -> Self {
        self.include_translations = false;
        self
    }

    /// Validates the configuration.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] when no kinds are selected or any name is
    /// empty or not a machine name (`[a-z0-9_]`).
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.kinds.is_empty() {
            return Err(ConfigError::NoKindsSelected);
        }
        for (option, value) in [
            ("module", &self.module_name),
            ("id-prefix", &self.id_prefix),
            ("group", &self.group),
        ] {
            if value.is_empty() {
                return Err(ConfigError::invalid_option(option, "must not be empty"));
            }
            if !value
                .chars()
                .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_')
            {
                return Err(ConfigError::invalid_option(
                    option,
                    "must be a machine name of lowercase letters, digits and underscores",
                ));
            }
        }
        for (option, value) in [
            ("data-dir", &self.data_subdir),
            ("file-dir", &self.file_subdir),
        ] {
            if value.is_empty() || value.starts_with('/') || value.contains("..") {
                return Err(ConfigError::invalid_option(
                    option,
                    "must be a non-empty package-relative directory",
                ));
            }
        }
        Ok(())
    }

    /// Returns the migration ID for a `(kind, bundle)` group.
    ///
    /// The ID is `<prefix>_<kind>` or `<prefix>_<kind>_<bundle>` and is
    /// unique per group within a run.
    #[must_use]
    pub fn migration_id(&self, kind: &str, bundle: Option<&str>) -> String {
        match bundle {
            Some(bundle) => format!("{}_{kind}_{bundle}", self.id_prefix),
            None => format!("{}_{kind}", self.id_prefix),
        }
    }

    /// Returns the package-relative directory for a group's snapshots.
    #[must_use]
    pub fn data_directory(&self, kind: &str, bundle: Option<&str>) -> String {
        match bundle {
            Some(bundle) => format!("{}/{kind}/{bundle}", self.data_subdir),
            None => format!("{}/{kind}", self.data_subdir),
        }
    }

    /// Returns the package-relative path of one record's snapshot.
    #[must_use]
    pub fn data_path(&self, kind: &str, bundle: Option<&str>, id: &str) -> String {
        format!("{}/{kind}-{id}.json", self.data_directory(kind, bundle))
    }

    /// Returns the package-relative directory for assets of a URI scheme.
    #[must_use]
    pub fn file_directory(&self, scheme: Option<&str>) -> String {
        match scheme {
            Some(scheme) => format!("{}/{scheme}", self.file_subdir),
            None => self.file_subdir.clone(),
        }
    }

    /// Returns the file name of the package descriptor.
    #[must_use]
    pub fn descriptor_file_name(&self) -> String {
        format!("{}.info.json", self.module_name)
    }

    /// Builds the replayable settings block embedded into the descriptor.
    #[must_use]
    pub fn to_settings(&self, migration_ids: Vec<String>) -> ExportSettings {
        ExportSettings {
            migrations: migration_ids,
            kinds: self.kinds.clone(),
            id_prefix: self.id_prefix.clone(),
            group: self.group.clone(),
            data_dir: self.data_subdir.clone(),
            file_dir: self.file_subdir.clone(),
        }
    }
}

impl Default for ExportJobConfig {
    fn default() -> Self {
        Self {
            kinds: Vec::new(),
            module_name: DEFAULT_MODULE_NAME.to_owned(),
            human_name: DEFAULT_HUMAN_NAME.to_owned(),
            id_prefix: DEFAULT_ID_PREFIX.to_owned(),
            group: DEFAULT_GROUP.to_owned(),
            data_subdir: DEFAULT_DATA_SUBDIR.to_owned(),
            file_subdir: DEFAULT_FILE_SUBDIR.to_owned(),
            extract_path: None,
            include_translations: true,
        }
    }
}

/// The replayable request parameters embedded into a package descriptor.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExportSettings {
    /// IDs of the generated migrations, natural-sorted.
    pub migrations: Vec<String>,
    /// The seed kinds of the run.
    pub kinds: Vec<String>,
    /// Migration ID prefix.
    #[serde(rename = "id-prefix")]
    pub id_prefix: String,
    /// Migration group.
    pub group: String,
    /// Record snapshot subdirectory.
    #[serde(rename = "data-dir")]
    pub data_dir: String,
    /// File asset subdirectory.
    #[serde(rename = "file-dir")]
    pub file_dir: String,
}

/// The descriptor written into every finished package.
///
/// Besides fixed package metadata it embeds the [`ExportSettings`] of the
/// run that produced it, which a later update run replays.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PackageDescriptor {
    /// Human-readable package name.
    pub name: String,
    /// Fixed package type.
    #[serde(rename = "type")]
    pub package_type: String,
    /// Fixed description line.
    pub description: String,
    /// Packages the generated import pipelines depend on.
    pub dependencies: Vec<String>,
    /// The replayable request parameters.
    pub export_settings: ExportSettings,
}

impl PackageDescriptor {
    /// Fixed package type of generated packages.
    pub const PACKAGE_TYPE: &'static str = "module";

    /// Fixed description of generated packages.
    pub const DESCRIPTION: &'static str = "Generated by the content export tool";

    /// Fixed dependencies of generated packages.
    pub const DEPENDENCIES: &'static [&'static str] = &["migrate", "migrate_plus"];

    /// Assembles the descriptor for a finished run.
    #[must_use]
    pub fn new(human_name: impl Into<String>, settings: ExportSettings) -> Self {
        Self {
            name: human_name.into(),
            package_type: Self::PACKAGE_TYPE.to_owned(),
            description: Self::DESCRIPTION.to_owned(),
            dependencies: Self::DEPENDENCIES.iter().map(|&d| d.to_owned()).collect(),
            export_settings: settings,
        }
    }

    /// Rebuilds the job configuration of the run that produced this
    /// descriptor, for update runs replaying a prior export.
    ///
    /// Every stored parameter is reused unchanged; only the kind selection
    /// may be overridden.
    #[must_use]
    pub fn to_config(
        &self,
        module_name: impl Into<String>,
        kinds_override: Option<Vec<String>>,
    ) -> ExportJobConfig {
        let settings = &self.export_settings;
        ExportJobConfig {
            kinds: kinds_override.unwrap_or_else(|| settings.kinds.clone()),
            module_name: module_name.into(),
            human_name: self.name.clone(),
            id_prefix: settings.id_prefix.clone(),
            group: settings.group.clone(),
            data_subdir: settings.data_dir.clone(),
            file_subdir: settings.file_dir.clone(),
            extract_path: None,
            include_translations: true,
        }
    }
}
