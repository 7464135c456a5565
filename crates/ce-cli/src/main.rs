//! CLI entry point for the content export tool.
//!
//! This binary exports a content graph from a JSON dataset into a portable,
//! replayable import package.
//!
//! # Usage
//!
//! ```bash
//! ce-export [OPTIONS] <COMMAND>
//!
//! # Export two kinds (plus everything they reference) into ./out
//! ce-export export --source dataset.json --kinds node,user --destination out
//!
//! # Re-export an existing package with its stored parameters
//! ce-export export --source dataset.json --destination out --update content_export
//!
//! # List the exportable kinds of a dataset
//! ce-export kinds --source dataset.json
//! ```

#![deny(clippy::all)]
#![warn(missing_docs)]

mod dataset;

use std::io::Write as _;

use camino::Utf8PathBuf;
use ce_core::{ConfigError, ExportJobConfig, PackageDescriptor};
use ce_engine::{
    ArchiveBuilder, BatchRunner, ExportProcessor, ExportResult, FileLockManager,
    JsonContextStore, MemoryBackend, SchemaProvider as _,
};
use clap::{Parser, Subcommand};
use tracing::info;
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

// =============================================================================
// CLI ARGUMENT TYPES
// =============================================================================

/// Exports content from a JSON dataset into a replayable import package.
#[derive(Parser)]
#[command(name = "ce-export", version, about, long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    /// Command to execute.
    #[command(subcommand)]
    command: Commands,

    /// Path to the JSON dataset describing kinds, records and assets.
    #[arg(short, long, global = true, env = "CE_EXPORT_SOURCE")]
    source: Option<Utf8PathBuf>,

    /// Directory for lock files, staging trees and run contexts.
    ///
    /// Defaults to the system temporary directory.
    #[arg(long, global = true, env = "CE_EXPORT_TEMP_DIR")]
    temp_dir: Option<Utf8PathBuf>,

    /// Enable verbose logging (debug level).
    #[arg(short, long, global = true)]
    verbose: bool,
}

/// Available subcommands.
#[derive(Subcommand)]
enum Commands {
    /// Export the selected kinds and their reference closure.
    Export {
        /// Kinds to seed the export with.
        #[arg(short, long, value_delimiter = ',')]
        kinds: Vec<String>,

        /// Directory the finished package is extracted into.
        #[arg(short, long)]
        destination: Option<Utf8PathBuf>,

        /// Machine name of the generated package.
        #[arg(long)]
        module: Option<String>,

        /// Human-readable name of the generated package.
        #[arg(long)]
        name: Option<String>,

        /// Prefix of the generated migration IDs.
        #[arg(long)]
        id_prefix: Option<String>,

        /// Group assigned to the generated migrations.
        #[arg(long)]
        group: Option<String>,

        /// Package-relative subdirectory for record snapshots.
        #[arg(long)]
        data_dir: Option<String>,

        /// Package-relative subdirectory for copied assets.
        #[arg(long)]
        file_dir: Option<String>,

        /// Exclude record translations from the snapshots.
        #[arg(long)]
        no_translations: bool,

        /// Re-export an existing package, replaying its stored parameters.
        ///
        /// Only the kind selection may be changed via `--kinds`.
        #[arg(long, value_name = "MODULE")]
        update: Option<String>,
    },

    /// List the exportable kinds of a dataset.
    Kinds,
}

// =============================================================================
// INITIALIZATION
// =============================================================================

/// Initializes the tracing subscriber for logging.
///
/// Respects the `RUST_LOG` environment variable if set. Otherwise, uses
/// `debug` level if `--verbose` is set, or `info` level by default.
fn init_tracing(verbose: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        let level = if verbose { "debug" } else { "info" };
        EnvFilter::new(level)
    });

    tracing_subscriber::registry()
        .with(fmt::layer().with_target(false))
        .with(filter)
        .init();
}

fn source_path(cli: &Cli) -> anyhow::Result<Utf8PathBuf> {
    cli.source
        .clone()
        .ok_or_else(|| anyhow::anyhow!("--source is required; point it at a dataset JSON file"))
}

fn temp_dir(cli: &Cli) -> anyhow::Result<Utf8PathBuf> {
    match &cli.temp_dir {
        Some(dir) => Ok(dir.clone()),
        None => Utf8PathBuf::from_path_buf(std::env::temp_dir())
            .map_err(|p| anyhow::anyhow!("temporary directory is not UTF-8: {}", p.display())),
    }
}

// =============================================================================
// CONFIG ASSEMBLY
// =============================================================================

/// Per-invocation export options collected from the command line.
struct ExportOptions {
    kinds: Vec<String>,
    destination: Option<Utf8PathBuf>,
    module: Option<String>,
    name: Option<String>,
    id_prefix: Option<String>,
    group: Option<String>,
    data_dir: Option<String>,
    file_dir: Option<String>,
    no_translations: bool,
    update: Option<String>,
}

/// Builds the run configuration, validating the request up front.
///
/// A fresh export takes every parameter from the command line; an update
/// loads the prior package's descriptor and replays its stored parameters,
/// allowing only the kind selection to change.
fn build_config(
    options: &ExportOptions,
    backend: &MemoryBackend,
) -> anyhow::Result<ExportJobConfig> {
    let Some(destination) = options.destination.clone() else {
        return Err(ConfigError::MissingDestination.into());
    };

    let config = if let Some(update_module) = &options.update {
        let descriptor_path = destination
            .join(update_module)
            .join(format!("{update_module}.info.json"));
        let bytes = std::fs::read(descriptor_path.as_std_path()).map_err(|e| {
            anyhow::anyhow!("cannot read the descriptor of '{update_module}' at '{descriptor_path}': {e}")
        })?;
        let descriptor: PackageDescriptor = serde_json::from_slice(&bytes)?;
        let kinds_override = (!options.kinds.is_empty()).then(|| options.kinds.clone());
        descriptor
            .to_config(update_module.clone(), kinds_override)
            .with_extract_path(destination)
    } else {
        if options.kinds.is_empty() {
            return Err(ConfigError::NoKindsSelected.into());
        }
        let mut config = ExportJobConfig::new(options.kinds.clone());
        if let Some(module) = &options.module {
            config = config.with_module_name(module.clone());
        }
        if let Some(name) = &options.name {
            config = config.with_human_name(name.clone());
        }
        if let Some(prefix) = &options.id_prefix {
            config = config.with_id_prefix(prefix.clone());
        }
        if let Some(group) = &options.group {
            config = config.with_group(group.clone());
        }
        if let Some(data_dir) = &options.data_dir {
            config = config.with_data_subdir(data_dir.clone());
        }
        if let Some(file_dir) = &options.file_dir {
            config = config.with_file_subdir(file_dir.clone());
        }
        if options.no_translations {
            config = config.without_translations();
        }

        // A fresh export must not silently replace an existing package.
        let target = destination.join(&config.module_name);
        if target.as_std_path().exists() {
            return Err(ConfigError::NameCollision {
                name: config.module_name,
                path: target,
            }
            .into());
        }
        config.with_extract_path(destination)
    };

    let known = backend.content_kinds();
    for kind in &config.kinds {
        if !known.contains(kind) {
            return Err(ConfigError::UnknownKind(kind.clone()).into());
        }
    }
    config.validate()?;
    Ok(config)
}

// =============================================================================
// COMMAND IMPLEMENTATIONS
// =============================================================================

/// Runs an export to completion.
fn run_export(options: &ExportOptions, cli: &Cli) -> anyhow::Result<()> {
    let source = source_path(cli)?;
    let backend = dataset::load(&source)?;
    let config = build_config(options, &backend)?;
    let temp = temp_dir(cli)?;

    info!(module = %config.module_name, kinds = ?config.kinds, "Starting export");

    let lock = FileLockManager::new(temp.clone());
    let archive = ArchiveBuilder::new(&temp, &config.module_name);
    let context_path = temp.join(format!("{}.context.json", config.module_name));
    let module_name = config.module_name.clone();
    let extract_path = config.extract_path.clone();

    let processor = ExportProcessor::new(config, &backend, &backend, &backend, &lock, archive);
    let store = JsonContextStore::new(context_path);
    let runner = BatchRunner::new(&processor, &store);

    let results = runner.run()?;
    print_summary(&module_name, extract_path.as_deref(), &results)?;
    Ok(())
}

/// Lists the exportable kinds of a dataset.
fn run_kinds(cli: &Cli) -> anyhow::Result<()> {
    let source = source_path(cli)?;
    let backend = dataset::load(&source)?;

    let stdout = std::io::stdout();
    let mut handle = stdout.lock();
    for kind in backend.content_kinds() {
        match backend.kind_schema(&kind) {
            Some(schema) => writeln!(handle, "{kind}\t{}", schema.label)?,
            None => writeln!(handle, "{kind}")?,
        }
    }
    Ok(())
}

// =============================================================================
// OUTPUT HELPERS
// =============================================================================

/// Prints the result summary of a finished export.
fn print_summary(
    module_name: &str,
    extract_path: Option<&camino::Utf8Path>,
    results: &ExportResult,
) -> anyhow::Result<()> {
    let stdout = std::io::stdout();
    let mut handle = stdout.lock();

    writeln!(handle)?;
    writeln!(handle, "Export finished")?;
    writeln!(handle, "===============")?;
    writeln!(handle, "Records exported:      {}", results.discovered.len())?;
    writeln!(
        handle,
        "Definitions generated: {}",
        results.migration_ids.len()
    )?;
    for id in &results.migration_ids {
        writeln!(handle, "  {id}")?;
    }
    if let Some(path) = extract_path {
        writeln!(handle, "Package extracted to:  {}", path.join(module_name))?;
    }
    Ok(())
}

// =============================================================================
// MAIN ENTRY POINT
// =============================================================================

/// Application entry point.
fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    match &cli.command {
        Commands::Export {
            kinds,
            destination,
            module,
            name,
            id_prefix,
            group,
            data_dir,
            file_dir,
            no_translations,
            update,
        } => {
            let options = ExportOptions {
                kinds: kinds.clone(),
                destination: destination.clone(),
                module: module.clone(),
                name: name.clone(),
                id_prefix: id_prefix.clone(),
                group: group.clone(),
                data_dir: data_dir.clone(),
                file_dir: file_dir.clone(),
                no_translations: *no_translations,
                update: update.clone(),
            };
            run_export(&options, &cli)
        }
        Commands::Kinds => run_kinds(&cli),
    }
}
