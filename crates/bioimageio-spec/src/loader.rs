//! Turning raw content into validated descriptions.
//!
//! Every load goes through the same pipeline: extract `type` and
//! `format_version`, dispatch through the registry, tolerate future patch
//! versions, migrate, run the structural checks once (collecting every
//! diagnostic) and attach one [`ValidationDetail`] to the summary. In
//! collecting mode nothing escapes as an error; with `raise_errors` the
//! first failed stage is returned as a [`SpecError`].

use std::cmp::Ordering;
use std::path::Path;

use serde_json::Value as JsonValue;
use tracing::{debug, info, warn};

use crate::context::ValidationContext;
use crate::descr::{CommonFields, InvalidDescr, LoadedDescr, ResourceDescr, validate_structure};
use crate::document::{Document, Loc, declared_format_version, kind_name, set_format_version};
use crate::error::{Result, SpecError};
use crate::issues::Issues;
use crate::reader::open_bioimageio_yaml;
use crate::registry::{DescrKind, Registry};
use crate::summary::{ErrorEntry, Severity, ValidationDetail, ValidationSummary};
use crate::version::{FormatVersion, RequestedVersion};

const SHAPE_DETAIL: &str = "extract type and format_version";

/// Load raw content with an explicit context.
pub fn build_description(
    content: &JsonValue,
    ctx: &ValidationContext,
    requested: &RequestedVersion,
) -> Result<LoadedDescr> {
    let (doc, resource_type, declared) = match extract_shape(content) {
        Ok(shape) => shape,
        Err(errors) => return invalid_shape(content, ctx, errors),
    };

    let registry = Registry::builtin();
    let (kind, dedicated) = registry.lookup(resource_type, declared);
    debug!(%kind, declared, dedicated, "dispatching resource description");
    let discovered = load_as(doc, kind, (!dedicated).then_some(declared), ctx)?;

    let (target, fallback_for) = match requested {
        RequestedVersion::Discover => return Ok(discovered),
        RequestedVersion::Latest => (registry.latest(resource_type), None),
        RequestedVersion::Exact(version) => {
            let (target, dedicated) = registry.lookup(resource_type, version);
            (target, (!dedicated).then_some(version.as_str()))
        }
    };
    if target == kind || matches!(discovered, LoadedDescr::Invalid(_)) {
        return Ok(discovered);
    }

    debug!(from = %kind, to = %target, "re-validating for the requested format version");
    // a tolerated future patch enters the target chain as the discovered version
    let mut converted = if future_version(doc, kind).is_some() {
        let mut tolerated = doc.clone();
        set_format_version(&mut tolerated, kind.implemented_format_version());
        load_as(&tolerated, target, fallback_for, ctx)?
    } else {
        load_as(doc, target, fallback_for, ctx)?
    };
    converted
        .validation_summary_mut()
        .prepend_details(discovered.validation_summary().details().to_vec());
    Ok(converted)
}

/// Load raw content under the innermost entered context.
pub fn build_in_current_context(
    content: &JsonValue,
    requested: &RequestedVersion,
) -> Result<LoadedDescr> {
    let ctx = ValidationContext::current();
    build_description(content, &ctx, requested)
}

/// Read a resource description from a file, directory or package and load it.
pub fn load_description(
    path: &Path,
    ctx: &ValidationContext,
    requested: &RequestedVersion,
) -> Result<LoadedDescr> {
    let opened = open_bioimageio_yaml(path)?;
    info!(source = %opened.source_name, "loading resource description");
    let ctx = ctx
        .clone()
        .with_root(opened.root)
        .with_file_name(opened.file_name)
        .with_source_name(opened.source_name);
    build_description(&opened.content, &ctx, requested)
}

/// Validate without keeping the description.
pub fn validate_format(
    content: &JsonValue,
    ctx: &ValidationContext,
    requested: &RequestedVersion,
) -> Result<ValidationSummary> {
    let ctx = ctx.clone().with_raise_errors(false);
    let loaded = build_description(content, &ctx, requested)?;
    Ok(loaded.validation_summary().clone())
}

/// Plain document form of a description, ready to be written out again.
pub fn dump_description(descr: &ResourceDescr) -> Document {
    let mut document = descr.content().clone();
    document.remove("rdf_source");
    document
}

type Shape<'a> = (&'a Document, &'a str, &'a str);

fn extract_shape(content: &JsonValue) -> std::result::Result<Shape<'_>, Vec<ErrorEntry>> {
    let Some(doc) = content.as_object() else {
        return Err(vec![ErrorEntry::new(
            Loc::root(),
            format!("Input should be a valid dictionary, got {}", kind_name(content)),
            "dict_type",
        )]);
    };
    let mut errors = Vec::new();
    let resource_type = string_field(doc, "type", &mut errors);
    let format_version = string_field(doc, "format_version", &mut errors);
    match (resource_type, format_version) {
        (Some(resource_type), Some(format_version)) => Ok((doc, resource_type, format_version)),
        _ => Err(errors),
    }
}

fn string_field<'a>(
    doc: &'a Document,
    key: &str,
    errors: &mut Vec<ErrorEntry>,
) -> Option<&'a str> {
    match doc.get(key) {
        Some(JsonValue::String(value)) => Some(value),
        None | Some(JsonValue::Null) => {
            errors.push(ErrorEntry::new(Loc::root().join(key), "Field required", "missing"));
            None
        }
        Some(other) => {
            errors.push(ErrorEntry::new(
                Loc::root().join(key),
                format!("Input should be a valid string, got {}", kind_name(other)),
                "string_type",
            ));
            None
        }
    }
}

fn invalid_shape(
    content: &JsonValue,
    ctx: &ValidationContext,
    errors: Vec<ErrorEntry>,
) -> Result<LoadedDescr> {
    let name = content
        .get("name")
        .and_then(JsonValue::as_str)
        .unwrap_or_default();
    let mut invalid = InvalidDescr::new(
        content.clone(),
        ValidationSummary::new(name, ctx.source_label(), "", ""),
    );
    let summary = &mut invalid.validation_summary;
    summary.resource_type = invalid.resource_type.clone();
    summary.format_version = invalid.format_version.clone();
    summary.add_detail(ValidationDetail::new(
        SHAPE_DETAIL,
        errors,
        Vec::new(),
        Some(ctx.summary()),
    ));
    if ctx.raise_errors {
        return Err(SpecError::Shape(summary.format_errors()));
    }
    Ok(LoadedDescr::Invalid(invalid))
}

/// One pass against one implementation. `fallback_for` names the version
/// that had no registry entry of its own.
fn load_as(
    doc: &Document,
    kind: DescrKind,
    fallback_for: Option<&str>,
    ctx: &ValidationContext,
) -> Result<LoadedDescr> {
    let _guard = ctx.enter();
    let mut issues = Issues::new();
    let fv_loc = Loc::root().join("format_version");

    if let Some(version) = fallback_for {
        issues.warn(
            fv_loc.clone(),
            "unsupported_format_version",
            format!(
                "format_version {version} has no dedicated implementation; validated as {kind}"
            ),
            Severity::Info,
        );
    }

    let mut working = doc.clone();
    if let Some(declared) = future_version(doc, kind) {
        let implemented = kind.implemented_version();
        issues.warn(
            fv_loc,
            "future_format_version",
            format!(
                "format_version {declared} is newer than {implemented}; treated as {implemented}"
            ),
            Severity::Alert,
        );
        set_format_version(&mut working, kind.implemented_format_version());
    }

    let migrated = kind.migration_chain().migrate(&working);
    if !migrated.applied.is_empty() {
        debug!(%kind, steps = migrated.applied.len(), "migrated resource description");
    }
    let document = migrated.document;

    if let Err(err) = validate_structure(kind, &document, ctx, &mut issues) {
        if ctx.raise_errors {
            return Err(err);
        }
        issues.push_error(error_entry(&err));
    }

    let common = if issues.has_errors() {
        None
    } else {
        match CommonFields::from_document(&document) {
            Ok(common) => Some(common),
            Err(err) if ctx.raise_errors => return Err(err),
            Err(err) => {
                issues.push_error(error_entry(&err));
                None
            }
        }
    };

    let (mut errors, warnings, nested) = issues.into_parts();
    let raised = warnings
        .iter()
        .filter(|warning| warning.severity >= ctx.warning_level)
        .count();
    if errors.is_empty() && raised > 0 {
        errors.push(ErrorEntry::new(
            Loc::root(),
            format!(
                "{raised} warning(s) at or above the '{}' warning level",
                ctx.warning_level
            ),
            "warning_threshold",
        ));
    }

    let mut summary = ValidationSummary::new(
        document.get("name").and_then(JsonValue::as_str).unwrap_or_default(),
        ctx.source_label(),
        document.get("type").and_then(JsonValue::as_str).unwrap_or_default(),
        declared_format_version(&document).unwrap_or_default(),
    );
    summary.add_detail(ValidationDetail::new(
        format!("bioimageio.spec format validation {kind}"),
        errors,
        warnings,
        Some(ctx.summary()),
    ));
    for detail in nested {
        summary.add_detail(detail);
    }

    if ctx.log_warnings {
        log_warnings(&summary);
    }

    match common {
        Some(common) if summary.passed() => Ok(LoadedDescr::Resource(ResourceDescr::new(
            kind, common, document, summary, ctx,
        ))),
        _ if ctx.raise_errors => Err(SpecError::Validation {
            summary: Box::new(summary),
        }),
        _ => Ok(LoadedDescr::Invalid(InvalidDescr::new(
            JsonValue::Object(document),
            summary,
        ))),
    }
}

/// The declared version, when it is a newer minor or patch release of the
/// major `kind` implements.
fn future_version(doc: &Document, kind: DescrKind) -> Option<&str> {
    let declared = declared_format_version(doc)?;
    let version = declared.parse::<FormatVersion>().ok()?;
    let implemented = kind.implemented_version();
    (version.major() == implemented.major()
        && version.cmp_minor_patch(&implemented) == Ordering::Greater)
        .then_some(declared)
}

fn error_entry(err: &SpecError) -> ErrorEntry {
    let mut entry = ErrorEntry::new(Loc::root(), err.to_string(), err.kind());
    entry.traceback = err.chain();
    entry
}

fn log_warnings(summary: &ValidationSummary) {
    for detail in summary.details().iter().filter(|detail| detail.loc.is_root()) {
        for warning in &detail.warnings {
            match warning.severity {
                Severity::Info => {
                    debug!(loc = %warning.loc, kind = %warning.kind, "{}", warning.msg)
                }
                severity => warn!(
                    loc = %warning.loc,
                    kind = %warning.kind,
                    %severity,
                    "{}",
                    warning.msg
                ),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::Root;
    use crate::summary::Status;
    use serde_json::json;

    fn offline() -> ValidationContext {
        ValidationContext::default()
            .with_perform_io_checks(false)
            .with_log_warnings(false)
    }

    fn dataset() -> JsonValue {
        json!({
            "type": "dataset",
            "format_version": "0.2.0",
            "name": "cells",
            "description": "nuclei images",
            "authors": ["Jane Doe"]
        })
    }

    #[test]
    fn empty_mapping_reports_both_fields() {
        let loaded =
            build_description(&json!({}), &offline(), &RequestedVersion::Discover).unwrap();
        let LoadedDescr::Invalid(invalid) = loaded else {
            panic!("expected an invalid description");
        };
        assert_eq!(invalid.validation_summary.status(), Status::Failed);
        let kinds: Vec<(String, &str)> = invalid
            .validation_summary
            .errors()
            .map(|e| (e.loc.to_string(), e.kind.as_str()))
            .collect();
        assert_eq!(
            kinds,
            [
                ("type".to_string(), "missing"),
                ("format_version".to_string(), "missing"),
            ]
        );
        assert_eq!(invalid.validation_summary.details()[0].name, SHAPE_DETAIL);
    }

    #[test]
    fn non_mapping_and_non_string_fields() {
        let loaded =
            build_description(&json!([1, 2]), &offline(), &RequestedVersion::Discover).unwrap();
        assert_eq!(loaded.validation_summary().errors().count(), 1);

        let loaded = build_description(
            &json!({"type": "model", "format_version": 0.4}),
            &offline(),
            &RequestedVersion::Discover,
        )
        .unwrap();
        assert_eq!(loaded.resource_type(), "model");
        assert_eq!(loaded.format_version(), InvalidDescr::UNKNOWN);
        let error = loaded.validation_summary().errors().next().unwrap();
        assert_eq!(error.kind, "string_type");
    }

    #[test]
    fn strict_mode_raises_shape_errors() {
        let ctx = offline().with_raise_errors(true);
        let err = build_description(&json!({}), &ctx, &RequestedVersion::Discover).unwrap_err();
        assert!(matches!(err, SpecError::Shape(_)));
    }

    #[test]
    fn old_dataset_is_migrated_and_passes() {
        let loaded =
            build_description(&dataset(), &offline(), &RequestedVersion::Discover).unwrap();
        let descr = loaded.as_resource().expect("dataset should pass");
        assert_eq!(descr.kind(), DescrKind::Dataset02);
        assert_eq!(descr.format_version(), "0.2.4");
        assert_eq!(descr.common().authors[0].name, "Jane Doe");
        assert_eq!(
            descr.validation_summary().details()[0].name,
            "bioimageio.spec format validation dataset 0.2.4"
        );
    }

    #[test]
    fn latest_request_prepends_discovery_details() {
        let loaded = build_description(&dataset(), &offline(), &RequestedVersion::Latest).unwrap();
        let names: Vec<&str> = loaded
            .validation_summary()
            .details()
            .iter()
            .map(|detail| detail.name.as_str())
            .collect();
        assert_eq!(
            names,
            [
                "bioimageio.spec format validation dataset 0.2.4",
                "bioimageio.spec format validation dataset 0.3.0",
            ]
        );
        // 0.3 requires authors, cite and license
        assert!(!loaded.passed());
    }

    #[test]
    fn warning_level_turns_raised_warnings_into_one_error() {
        let ctx = offline().with_warning_level(Severity::Info);
        let loaded = build_description(&dataset(), &ctx, &RequestedVersion::Discover).unwrap();
        let errors: Vec<&ErrorEntry> = loaded.validation_summary().errors().collect();
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].kind, "warning_threshold");
        assert!(!loaded.passed());
    }

    #[test]
    fn strict_mode_returns_the_failed_summary() {
        let ctx = offline().with_raise_errors(true);
        let content = json!({"type": "dataset", "format_version": "0.2.4"});
        let err = build_description(&content, &ctx, &RequestedVersion::Discover).unwrap_err();
        let SpecError::Validation { summary } = err else {
            panic!("expected a validation error");
        };
        assert!(summary.errors().any(|e| e.loc.to_string() == "name"));
    }

    #[test]
    fn context_is_restored_after_loading() {
        let before = ValidationContext::depth();
        let ctx = offline().with_root(Root::Dir("somewhere".into()));
        build_description(&dataset(), &ctx, &RequestedVersion::Discover).unwrap();
        assert_eq!(ValidationContext::depth(), before);
    }

    #[test]
    fn current_context_applies_until_the_guard_drops() {
        let strict_warnings = offline().with_warning_level(Severity::Info);
        {
            let _guard = strict_warnings.enter();
            let loaded = build_in_current_context(&dataset(), &RequestedVersion::Discover).unwrap();
            assert!(!loaded.passed());
        }
        let _guard = offline().enter();
        let loaded = build_in_current_context(&dataset(), &RequestedVersion::Discover).unwrap();
        assert!(loaded.passed(), "{}", loaded.validation_summary());
    }

    #[test]
    fn dump_drops_rdf_source() {
        let mut content = dataset();
        content["rdf_source"] = json!("https://example.com/rdf.yaml");
        let loaded = build_description(&content, &offline(), &RequestedVersion::Discover).unwrap();
        let dumped = dump_description(loaded.as_resource().unwrap());
        assert!(!dumped.contains_key("rdf_source"));
        assert_eq!(dumped["format_version"], "0.2.4");
    }
}
