//! Validated resource descriptions and the per-kind structural checks.
//!
//! Descriptions are only ever produced by the loader. A [`ResourceDescr`]
//! keeps the migrated document next to a few typed common fields; anything
//! that failed to get that far ends up as an [`InvalidDescr`]. Both carry
//! exactly one [`ValidationSummary`].

mod collection;
mod generic;
mod model;

use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

use crate::context::{Root, ValidationContext};
use crate::document::Document;
use crate::error::Result;
use crate::issues::Issues;
use crate::registry::DescrKind;
use crate::summary::ValidationSummary;

pub use collection::{EntryReport, entry_report};
pub use model::{WEIGHTS_FORMATS, tensor_ids};

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Author {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub affiliation: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub github_user: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub orcid: Option<String>,
}

/// Fields shared by every kind, read back from a document that passed.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommonFields {
    #[serde(rename = "type")]
    pub resource_type: String,
    pub format_version: String,
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(default)]
    pub authors: Vec<Author>,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub license: Option<String>,
}

impl CommonFields {
    pub fn from_document(document: &Document) -> Result<Self> {
        Ok(serde_json::from_value(JsonValue::Object(document.clone()))?)
    }
}

/// A description that passed structural validation for its kind.
#[derive(Clone, Debug)]
pub struct ResourceDescr {
    kind: DescrKind,
    common: CommonFields,
    content: Document,
    validation_summary: ValidationSummary,
    root: Root,
    file_name: Option<String>,
}

impl ResourceDescr {
    pub(crate) fn new(
        kind: DescrKind,
        common: CommonFields,
        content: Document,
        validation_summary: ValidationSummary,
        ctx: &ValidationContext,
    ) -> Self {
        Self {
            kind,
            common,
            content,
            validation_summary,
            root: ctx.root.clone(),
            file_name: ctx.file_name.clone(),
        }
    }

    pub fn kind(&self) -> DescrKind {
        self.kind
    }

    pub fn resource_type(&self) -> &str {
        &self.common.resource_type
    }

    pub fn format_version(&self) -> &str {
        &self.common.format_version
    }

    pub fn name(&self) -> &str {
        &self.common.name
    }

    pub fn common(&self) -> &CommonFields {
        &self.common
    }

    /// The migrated document.
    pub fn content(&self) -> &Document {
        &self.content
    }

    pub fn validation_summary(&self) -> &ValidationSummary {
        &self.validation_summary
    }

    pub(crate) fn validation_summary_mut(&mut self) -> &mut ValidationSummary {
        &mut self.validation_summary
    }

    /// Where relative file references of this description resolve.
    pub fn root(&self) -> &Root {
        &self.root
    }

    pub fn file_name(&self) -> Option<&str> {
        self.file_name.as_deref()
    }
}

/// Whatever could not be validated into a [`ResourceDescr`].
#[derive(Clone, Debug)]
pub struct InvalidDescr {
    pub resource_type: String,
    pub format_version: String,
    pub content: JsonValue,
    pub validation_summary: ValidationSummary,
}

impl InvalidDescr {
    pub const UNKNOWN: &'static str = "unknown";

    /// Keeps `type`/`format_version` when the content declares them as strings.
    pub(crate) fn new(content: JsonValue, validation_summary: ValidationSummary) -> Self {
        let field = |key: &str| {
            content
                .get(key)
                .and_then(JsonValue::as_str)
                .unwrap_or(Self::UNKNOWN)
                .to_string()
        };
        Self {
            resource_type: field("type"),
            format_version: field("format_version"),
            validation_summary,
            content,
        }
    }
}

#[derive(Clone, Debug)]
pub enum LoadedDescr {
    Resource(ResourceDescr),
    Invalid(InvalidDescr),
}

impl LoadedDescr {
    pub fn validation_summary(&self) -> &ValidationSummary {
        match self {
            LoadedDescr::Resource(descr) => &descr.validation_summary,
            LoadedDescr::Invalid(descr) => &descr.validation_summary,
        }
    }

    pub(crate) fn validation_summary_mut(&mut self) -> &mut ValidationSummary {
        match self {
            LoadedDescr::Resource(descr) => descr.validation_summary_mut(),
            LoadedDescr::Invalid(descr) => &mut descr.validation_summary,
        }
    }

    pub fn passed(&self) -> bool {
        self.validation_summary().passed()
    }

    pub fn resource_type(&self) -> &str {
        match self {
            LoadedDescr::Resource(descr) => descr.resource_type(),
            LoadedDescr::Invalid(descr) => &descr.resource_type,
        }
    }

    pub fn format_version(&self) -> &str {
        match self {
            LoadedDescr::Resource(descr) => descr.format_version(),
            LoadedDescr::Invalid(descr) => &descr.format_version,
        }
    }

    pub fn as_resource(&self) -> Option<&ResourceDescr> {
        match self {
            LoadedDescr::Resource(descr) => Some(descr),
            LoadedDescr::Invalid(_) => None,
        }
    }

    pub fn into_resource(self) -> Option<ResourceDescr> {
        match self {
            LoadedDescr::Resource(descr) => Some(descr),
            LoadedDescr::Invalid(_) => None,
        }
    }
}

/// Run the structural checks of `kind` over a migrated document.
pub(crate) fn validate_structure(
    kind: DescrKind,
    doc: &Document,
    ctx: &ValidationContext,
    issues: &mut Issues,
) -> Result<()> {
    match kind {
        DescrKind::Model04 => model::validate_v0_4(doc, ctx, issues),
        DescrKind::Model05 => model::validate_v0_5(doc, ctx, issues),
        DescrKind::Collection02 | DescrKind::Collection03 => {
            collection::validate(kind, doc, ctx, issues)
        }
        _ => generic::validate(kind, doc, ctx, issues),
    }
}
