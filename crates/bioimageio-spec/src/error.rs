use std::path::PathBuf;

use thiserror::Error;

use crate::summary::ValidationSummary;

pub type Result<T, E = SpecError> = std::result::Result<T, E>;

/// Errors surfaced by the library.
///
/// In collecting mode the loader turns validation problems into a returned
/// [`ValidationSummary`]; these variants only escape when the caller asked
/// for strict mode or when the surrounding I/O fails.
#[derive(Debug, Error)]
pub enum SpecError {
    /// Top-level content is not a mapping or lacks `type`/`format_version`.
    #[error("invalid resource description shape: {0}")]
    Shape(String),

    /// Structural validation failed while `raise_errors` was set.
    #[error("{}", .summary.format_errors())]
    Validation { summary: Box<ValidationSummary> },

    /// The registry table violates its construction invariants.
    #[error("invalid registry: {0}")]
    Registry(String),

    /// A migration chain is not strictly ordered.
    #[error("invalid migration chain for {kind}: {reason}")]
    MigrationChain { kind: String, reason: String },

    /// A packaged file would land on a reserved root document name.
    #[error("cannot package `{source_name}` as `{file_name}`: the name is reserved for the resource description")]
    ReservedName {
        file_name: String,
        source_name: String,
    },

    /// Every numeric suffix for a colliding file name is already taken.
    #[error("too many file name clashes for `{0}`")]
    NameClash(String),

    /// A package source could not be produced.
    #[error("failed to package `{source_name}`: {reason}")]
    Packaging { source_name: String, reason: String },

    /// No resource description was found at the given location.
    #[error("no resource description (rdf.yaml or bioimageio.yaml) found in {0}")]
    MissingRootDocument(PathBuf),

    /// A nested resource description could not be read.
    #[error("failed to read {path}: {reason}")]
    Read { path: String, reason: String },

    #[error("yaml error: {0}")]
    Yaml(#[from] serde_yaml_bw::Error),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("zip error: {0}")]
    Zip(#[from] zip::result::ZipError),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl SpecError {
    /// Stable tag used as the `type` of an error entry built from this error.
    pub fn kind(&self) -> &'static str {
        match self {
            SpecError::Shape(_) => "shape_error",
            SpecError::Validation { .. } => "validation_error",
            SpecError::Registry(_) => "registry_error",
            SpecError::MigrationChain { .. } => "migration_chain_error",
            SpecError::ReservedName { .. } => "reserved_name",
            SpecError::NameClash(_) => "name_clash",
            SpecError::Packaging { .. } => "packaging_error",
            SpecError::MissingRootDocument(_) => "missing_root_document",
            SpecError::Read { .. } => "read_error",
            SpecError::Yaml(_) => "yaml_error",
            SpecError::Json(_) => "json_error",
            SpecError::Zip(_) => "zip_error",
            SpecError::Io(_) => "io_error",
        }
    }

    /// The error followed by its chain of sources, outermost first.
    pub fn chain(&self) -> Vec<String> {
        let mut out = vec![self.to_string()];
        let mut source = std::error::Error::source(self);
        while let Some(err) = source {
            out.push(err.to_string());
            source = err.source();
        }
        out
    }
}
