//! Entry-point file rendering.
//!
//! Every package carries one generated entry-point file,
//! `<machine name>.module`, rendered from a fixed template. At import time
//! it tells the migration runner to resolve the `constants/export_file_path`
//! runtime constant to the package's asset directory before the bundled
//! migrations execute.
//!
//! The template has exactly four named placeholders resolved from a typed
//! value record; there is no expression language and nothing is executed
//! while rendering.

use std::fmt::Write as _;

/// The fixed entry-point template.
///
/// Placeholders: `{{human_name}}`, `{{machine_name}}`, `{{migration_ids}}`
/// (rendered as one indented line per id) and `{{file_subdir}}`.
pub const ENTRY_POINT_TEMPLATE: &str = "\
# {{human_name}}
#
# Generated entry point of the '{{machine_name}}' package. Before any of the
# migrations listed below run, the import runner must resolve the source
# constant 'constants/export_file_path' to the absolute path of this
# package's '{{file_subdir}}' directory.

constant: export_file_path
asset-dir: {{file_subdir}}
migrations:
{{migration_ids}}
";

/// Errors that can occur while rendering the entry point.
#[derive(Debug, thiserror::Error)]
pub enum TemplateError {
    /// The template contains a placeholder with no corresponding value.
    #[error("unresolved template token '{0}'")]
    UnresolvedToken(String),

    /// A placeholder is opened but never closed.
    #[error("unterminated template token near offset {0}")]
    UnterminatedToken(usize),
}

/// The typed values the entry-point template is rendered from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TemplateValues {
    /// Human-readable package name.
    pub human_name: String,
    /// Package machine name.
    pub machine_name: String,
    /// Generated migration IDs, natural-sorted by the caller.
    pub migration_ids: Vec<String>,
    /// Package-relative asset subdirectory.
    pub file_subdir: String,
}

impl TemplateValues {
    fn resolve(&self, token: &str) -> Option<String> {
        match token {
            "human_name" => Some(self.human_name.clone()),
            "machine_name" => Some(self.machine_name.clone()),
            "file_subdir" => Some(self.file_subdir.clone()),
            "migration_ids" => {
                let mut rendered = String::new();
                for (i, id) in self.migration_ids.iter().enumerate() {
                    if i > 0 {
                        rendered.push('\n');
                    }
                    let _ = write!(rendered, "  - {id}");
                }
                Some(rendered)
            }
            _ => None,
        }
    }
}

/// Renders the fixed entry-point template with the given values.
///
/// # Errors
///
/// Returns [`TemplateError`] for unknown or unterminated placeholders; with
/// the fixed template this only fires if the template itself is edited.
pub fn render_entry_point(values: &TemplateValues) -> Result<String, TemplateError> {
    render(ENTRY_POINT_TEMPLATE, values)
}

fn render(template: &str, values: &TemplateValues) -> Result<String, TemplateError> {
    let mut output = String::with_capacity(template.len());
    let mut rest = template;
    while let Some(start) = rest.find("{{") {
        output.push_str(&rest[..start]);
        let after_open = &rest[start + 2..];
        let Some(end) = after_open.find("}}") else {
            return Err(TemplateError::UnterminatedToken(template.len() - rest.len() + start));
        };
        let token = &after_open[..end];
        match values.resolve(token) {
            Some(value) => output.push_str(&value),
            None => return Err(TemplateError::UnresolvedToken(token.to_owned())),
        }
        rest = &after_open[end + 2..];
    }
    output.push_str(rest);
    Ok(output)
}
