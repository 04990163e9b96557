use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::path::Path;

use serde_json::Value as JsonValue;

use super::{LoadedDescr, generic};
use crate::context::{Root, ValidationContext};
use crate::document::{Document, Loc, LocItem, parse_yaml};
use crate::error::{Result, SpecError};
use crate::file::FileSource;
use crate::issues::Issues;
use crate::loader::build_description;
use crate::reader::{self, OpenedDocument};
use crate::registry::DescrKind;
use crate::summary::{ErrorEntry, Severity, ValidationSummary};
use crate::version::RequestedVersion;

/// Collections referencing collections stop here.
const MAX_NESTING: usize = 8;

/// Fields an inline entry never inherits from its collection.
const NOT_INHERITED: [&str; 2] = ["collection", "id"];

pub(crate) fn validate(
    kind: DescrKind,
    doc: &Document,
    ctx: &ValidationContext,
    issues: &mut Issues,
) -> Result<()> {
    generic::validate(kind, doc, ctx, issues)?;

    let root = Loc::root();
    let Some(entries) = issues.require_list(doc, &root, "collection", 1) else {
        return Ok(());
    };
    if ValidationContext::depth() > MAX_NESTING {
        issues.error(
            root.join("collection"),
            "recursion_error",
            format!("collections are nested more than {MAX_NESTING} levels deep"),
        );
        return Ok(());
    }

    let source_key = if kind.is_v0_2() { "rdf_source" } else { "entry_source" };
    let mut base = doc.clone();
    for key in NOT_INHERITED {
        base.remove(key);
    }

    let mut ids: BTreeMap<&str, usize> = BTreeMap::new();
    for (idx, entry) in entries.iter().enumerate() {
        let loc = root.join("collection").join(idx);
        let Some(entry) = issues.expect_map(entry, loc.clone()) else {
            continue;
        };
        let id = issues.optional_str(entry, &loc, "id");
        if let Some(id) = id {
            if let Some(first) = ids.get(id) {
                issues.error(
                    loc.join("id"),
                    "value_error",
                    format!("duplicate collection entry id '{id}' (first used by entry {first})"),
                );
            } else {
                ids.insert(id, idx);
            }
        }

        let loaded = match entry.get(source_key).filter(|value| !value.is_null()) {
            Some(source) => load_referenced(source, entry, source_key, &loc, ctx, issues)?,
            None => load_inline(&base, entry, idx, &loc, ctx, issues)?,
        };
        let Some(loaded) = loaded else {
            continue;
        };

        let passed = loaded.passed();
        for detail in loaded.validation_summary().details() {
            issues.nest(detail.clone().nested_under(&loc));
        }
        if !passed {
            let label = id.map_or_else(|| format!("#{idx}"), |id| format!("'{id}'"));
            issues.error(
                loc,
                "collection_entry",
                format!("collection entry {label} failed validation"),
            );
        }
    }
    Ok(())
}

fn load_referenced(
    source: &JsonValue,
    entry: &Document,
    source_key: &str,
    loc: &Loc,
    ctx: &ValidationContext,
    issues: &mut Issues,
) -> Result<Option<LoadedDescr>> {
    let source_loc = loc.join(source_key);
    let Some(reference) = issues.expect_str(source, source_loc.clone()) else {
        return Ok(None);
    };
    let resolved = match FileSource::resolve(reference, &ctx.root) {
        Ok(resolved) => resolved,
        Err(reason) => {
            issues.error(source_loc, "value_error", reason);
            return Ok(None);
        }
    };
    if !ctx.perform_io_checks {
        return Ok(None);
    }
    let opened = match &resolved {
        FileSource::Url(url) => {
            issues.warn(
                source_loc,
                "remote_entry",
                format!("remote collection entry {url} is not validated offline"),
                Severity::Info,
            );
            return Ok(None);
        }
        FileSource::Local(path) => reader::open_bioimageio_yaml(path),
        FileSource::ZipMember { archive, member } => open_zip_member(archive, member),
    };
    let opened = match opened {
        Ok(opened) => opened,
        Err(err) => {
            let mut error = ErrorEntry::new(
                source_loc,
                format!("failed to read collection entry {resolved}: {err}"),
                err.kind(),
            );
            error.traceback = err.chain();
            issues.push_error(error);
            return Ok(None);
        }
    };

    let mut content = opened.content;
    if let JsonValue::Object(map) = &mut content {
        for (key, value) in entry {
            if key != source_key {
                map.insert(key.clone(), value.clone());
            }
        }
    }
    let child = ctx
        .clone()
        .with_root(opened.root)
        .with_file_name(opened.file_name)
        .with_source_name(opened.source_name)
        .with_known_files(BTreeMap::new());
    load_nested(&content, child).map(Some)
}

fn load_inline(
    base: &Document,
    entry: &Document,
    idx: usize,
    loc: &Loc,
    ctx: &ValidationContext,
    issues: &mut Issues,
) -> Result<Option<LoadedDescr>> {
    let mut merged = base.clone();
    for (key, value) in entry {
        merged.insert(key.clone(), value.clone());
    }
    if merged.get("type").and_then(JsonValue::as_str) == Some("collection") {
        issues.error(
            loc.join("type"),
            "value_error",
            "inline collection entries must declare their own type",
        );
        return Ok(None);
    }
    let child = ctx
        .clone()
        .with_source_name(format!("{}#collection[{idx}]", ctx.source_label()));
    load_nested(&JsonValue::Object(merged), child).map(Some)
}

fn load_nested(content: &JsonValue, child: ValidationContext) -> Result<LoadedDescr> {
    let child = child.with_raise_errors(false).with_log_warnings(false);
    build_description(content, &child, &RequestedVersion::Discover)
}

fn open_zip_member(archive: &Path, member: &str) -> Result<OpenedDocument> {
    let bytes = reader::read_zip_member(archive, member)?;
    let source_name = format!("{}/{member}", archive.display());
    let text = String::from_utf8(bytes).map_err(|err| SpecError::Read {
        path: source_name.clone(),
        reason: err.to_string(),
    })?;
    Ok(OpenedDocument {
        content: parse_yaml(&text)?,
        root: Root::Zip(archive.to_path_buf()),
        file_name: member.to_string(),
        source_name,
    })
}

/// How many entries of a collection passed.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct EntryReport {
    pub passed: usize,
    pub total: usize,
}

impl fmt::Display for EntryReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{} collection entries passed", self.passed, self.total)
    }
}

/// Entry counts for a loaded collection; `None` for every other type.
pub fn entry_report(loaded: &LoadedDescr) -> Option<EntryReport> {
    if loaded.resource_type() != "collection" {
        return None;
    }
    let content = match loaded {
        LoadedDescr::Resource(descr) => descr.content(),
        LoadedDescr::Invalid(descr) => descr.content.as_object()?,
    };
    let total = content.get("collection")?.as_array()?.len();
    Some(EntryReport {
        passed: total.saturating_sub(failed_entries(loaded.validation_summary()).len()),
        total,
    })
}

fn failed_entries(summary: &ValidationSummary) -> BTreeSet<usize> {
    summary
        .details()
        .iter()
        .filter(|detail| detail.loc.is_root())
        .flat_map(|detail| detail.errors.iter())
        .filter_map(|error| match error.loc.items() {
            [LocItem::Key(key), LocItem::Index(idx), ..] if key == "collection" => Some(*idx),
            _ => None,
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use indoc::{formatdoc, indoc};
    use std::fs;

    fn collection_yaml(entries: &str) -> String {
        formatdoc! {"
            type: collection
            format_version: 0.2.4
            name: my collection
            description: a few datasets
            collection:
            {entries}
        "}
    }

    fn load_dir(dir: &Path, text: &str) -> LoadedDescr {
        let content = parse_yaml(text).unwrap();
        let ctx = ValidationContext::default()
            .with_root(Root::Dir(dir.to_path_buf()))
            .with_log_warnings(false);
        build_description(&content, &ctx, &RequestedVersion::Discover).unwrap()
    }

    #[test]
    fn inline_entries_inherit_collection_fields() {
        let dir = tempfile::tempdir().unwrap();
        let text = collection_yaml(indoc! {"
              - id: one
                type: dataset
              - id: two
                type: dataset
                name: second
        "});
        let loaded = load_dir(dir.path(), &text);
        assert!(loaded.passed(), "{}", loaded.validation_summary());
        assert_eq!(
            entry_report(&loaded),
            Some(EntryReport { passed: 2, total: 2 })
        );
        let nested: Vec<String> = loaded
            .validation_summary()
            .details()
            .iter()
            .skip(1)
            .map(|detail| detail.loc.to_string())
            .collect();
        assert_eq!(nested, ["collection[0]", "collection[1]"]);
    }

    #[test]
    fn broken_referenced_entry_counts_as_failed() {
        let dir = tempfile::tempdir().unwrap();
        fs::create_dir(dir.path().join("good")).unwrap();
        fs::write(
            dir.path().join("good").join("rdf.yaml"),
            "type: dataset\nformat_version: 0.2.4\nname: good\ndescription: fine\n",
        )
        .unwrap();
        let text = collection_yaml(indoc! {"
              - id: good
                rdf_source: good/rdf.yaml
              - id: broken
                rdf_source: missing/rdf.yaml
        "});
        let loaded = load_dir(dir.path(), &text);
        assert!(!loaded.passed());
        assert_eq!(
            entry_report(&loaded),
            Some(EntryReport { passed: 1, total: 2 })
        );
        let error = loaded
            .validation_summary()
            .errors()
            .find(|error| error.kind == "read_error")
            .unwrap();
        assert_eq!(error.loc.to_string(), "collection[1].rdf_source");
    }

    #[test]
    fn duplicate_ids_and_untyped_inline_entries() {
        let dir = tempfile::tempdir().unwrap();
        let text = collection_yaml(indoc! {"
              - id: same
                type: dataset
              - id: same
        "});
        let loaded = load_dir(dir.path(), &text);
        let locs: Vec<String> = loaded
            .validation_summary()
            .errors()
            .map(|error| error.loc.to_string())
            .collect();
        assert_eq!(locs, ["collection[1].id", "collection[1].type"]);
        assert_eq!(
            entry_report(&loaded),
            Some(EntryReport { passed: 1, total: 2 })
        );
    }

    #[test]
    fn report_is_only_for_collections() {
        let dir = tempfile::tempdir().unwrap();
        let loaded = load_dir(
            dir.path(),
            "type: dataset\nformat_version: 0.2.4\nname: d\ndescription: d\n",
        );
        assert!(entry_report(&loaded).is_none());
    }
}
