//! Ordered, pure migrations between format versions.
//!
//! Every step maps a set of source versions to exactly one destination
//! version. A [`MigrationChain`] runs its steps in order, each at most once,
//! and only when the document currently declares one of the step's source
//! versions. The chain stamps `format_version` after each step, so step
//! functions only describe the structural change.

use std::fmt;

use serde_json::Value as JsonValue;
use tracing::debug;

use crate::document::{Document, declared_format_version, set_format_version};
use crate::version::FormatVersion;

pub mod collection;
pub mod generic;
pub mod model;

pub type MigrateFn = fn(&Document) -> Document;

#[derive(Clone, Copy)]
pub struct MigrationStep {
    pub from: &'static [&'static str],
    pub to: &'static str,
    /// One line describing the structural change.
    pub summary: &'static str,
    pub apply: MigrateFn,
}

impl fmt::Debug for MigrationStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MigrationStep")
            .field("from", &self.from)
            .field("to", &self.to)
            .field("summary", &self.summary)
            .finish()
    }
}

/// Result of running a chain over one document.
#[derive(Clone, Debug)]
pub struct Migrated {
    pub document: Document,
    pub applied: Vec<&'static MigrationStep>,
}

#[derive(Clone, Copy, Debug)]
pub struct MigrationChain {
    steps: &'static [MigrationStep],
}

impl MigrationChain {
    pub const fn new(steps: &'static [MigrationStep]) -> Self {
        Self { steps }
    }

    pub fn steps(&self) -> &'static [MigrationStep] {
        self.steps
    }

    /// Destination of the last step.
    pub fn target(&self) -> Option<&'static str> {
        self.steps.last().map(|step| step.to)
    }

    /// Every version a document may declare and still be carried forward.
    pub fn known_versions(&self) -> impl Iterator<Item = &'static str> {
        self.steps
            .iter()
            .flat_map(|step| step.from.iter().copied().chain(std::iter::once(step.to)))
    }

    /// Steps must move strictly forward and never revisit an earlier version.
    ///
    /// A step sharing the previous step's destination is a parallel entry
    /// into that version: it may start below the destination, but not at or
    /// below the previous step's sources.
    pub fn check(&self) -> Result<(), String> {
        let mut previous: Option<(FormatVersion, FormatVersion)> = None;
        for step in self.steps {
            let to: FormatVersion = step
                .to
                .parse()
                .map_err(|err| format!("invalid destination version `{}`: {err}", step.to))?;
            if step.from.is_empty() {
                return Err(format!("step to {} has no source version", step.to));
            }
            let mut highest_from: Option<FormatVersion> = None;
            for from in step.from {
                let from: FormatVersion = from
                    .parse()
                    .map_err(|err| format!("invalid source version `{from}`: {err}"))?;
                if from >= to {
                    return Err(format!("step {from} -> {to} does not move forward"));
                }
                match &previous {
                    Some((prev_from, prev_to)) if *prev_to == to && from <= *prev_from => {
                        return Err(format!(
                            "step {from} -> {to} starts at or before the sources of the \
                             previous step into {to}"
                        ));
                    }
                    Some((_, prev_to)) if *prev_to != to && from < *prev_to => {
                        return Err(format!(
                            "step {from} -> {to} starts before the previous step's \
                             destination {prev_to}"
                        ));
                    }
                    _ => {}
                }
                if highest_from.as_ref().is_none_or(|highest| from > *highest) {
                    highest_from = Some(from);
                }
            }
            if let Some(highest_from) = highest_from {
                previous = Some((highest_from, to));
            }
        }
        Ok(())
    }

    pub fn migrate(&self, document: &Document) -> Migrated {
        let mut current = document.clone();
        let mut applied = Vec::new();
        for step in self.steps {
            let Some(version) = declared_format_version(&current) else {
                break;
            };
            if !step.from.contains(&version) {
                continue;
            }
            debug!(
                from = %version,
                to = step.to,
                change = step.summary,
                "migrating resource description"
            );
            current = (step.apply)(&current);
            set_format_version(&mut current, step.to);
            applied.push(step);
        }
        Migrated {
            document: current,
            applied,
        }
    }
}

/// Version bump without structural change.
pub(crate) fn bump(document: &Document) -> Document {
    document.clone()
}

pub(crate) fn remove_if_empty(document: &mut Document, key: &str) {
    let empty = match document.get(key) {
        Some(JsonValue::Object(map)) => map.is_empty(),
        Some(JsonValue::Array(items)) => items.is_empty(),
        Some(JsonValue::Null) => true,
        _ => false,
    };
    if empty {
        document.remove(key);
    }
}

/// `["Jane"]` becomes `[{"name": "Jane"}]`; mappings are kept.
pub(crate) fn wrap_name_list(value: &mut JsonValue) {
    if let JsonValue::Array(items) = value {
        for item in items.iter_mut() {
            if let JsonValue::String(name) = item {
                let mut wrapped = Document::new();
                wrapped.insert("name".into(), JsonValue::String(std::mem::take(name)));
                *item = JsonValue::Object(wrapped);
            }
        }
    }
}

const DOI_PREFIXES: [&str; 4] = [
    "https://doi.org/",
    "http://doi.org/",
    "https://dx.doi.org/",
    "http://dx.doi.org/",
];

/// `cite[].doi` without resolver URL prefixes.
pub(crate) fn strip_cite_doi_prefixes(document: &mut Document) {
    let Some(JsonValue::Array(entries)) = document.get_mut("cite") else {
        return;
    };
    for entry in entries.iter_mut() {
        if let Some(JsonValue::String(doi)) = entry.get_mut("doi")
            && let Some(prefix) = DOI_PREFIXES.iter().find(|prefix| doi.starts_with(**prefix))
        {
            *doi = doi[prefix.len()..].to_string();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn doc(value: JsonValue) -> Document {
        value.as_object().cloned().unwrap()
    }

    fn add_marker(document: &Document) -> Document {
        let mut out = document.clone();
        let count = out.get("steps").and_then(JsonValue::as_u64).unwrap_or(0);
        out.insert("steps".into(), json!(count + 1));
        out
    }

    static CHAIN: &[MigrationStep] = &[
        MigrationStep {
            from: &["1.0.0", "1.0.1"],
            to: "1.0.2",
            summary: "first",
            apply: add_marker,
        },
        MigrationStep {
            from: &["1.0.2"],
            to: "1.1.0",
            summary: "second",
            apply: add_marker,
        },
    ];

    #[test]
    fn applies_each_step_once_in_order() {
        let chain = MigrationChain::new(CHAIN);
        chain.check().unwrap();
        let input = doc(json!({"format_version": "1.0.1"}));
        let migrated = chain.migrate(&input);
        assert_eq!(migrated.document["format_version"], "1.1.0");
        assert_eq!(migrated.document["steps"], 2);
        assert_eq!(migrated.applied.len(), 2);
        assert_eq!(input["format_version"], "1.0.1", "input must not change");
    }

    #[test]
    fn current_documents_pass_through() {
        let chain = MigrationChain::new(CHAIN);
        let input = doc(json!({"format_version": "1.1.0", "x": 1}));
        let migrated = chain.migrate(&input);
        assert_eq!(migrated.document, input);
        assert!(migrated.applied.is_empty());
    }

    #[test]
    fn unknown_versions_pass_through() {
        let chain = MigrationChain::new(CHAIN);
        let input = doc(json!({"format_version": "0.9.0"}));
        assert_eq!(chain.migrate(&input).document, input);
    }

    #[test]
    fn check_rejects_backwards_steps() {
        static BAD: &[MigrationStep] = &[
            MigrationStep {
                from: &["1.0.2"],
                to: "1.1.0",
                summary: "",
                apply: bump,
            },
            MigrationStep {
                from: &["1.0.0"],
                to: "1.0.1",
                summary: "",
                apply: bump,
            },
        ];
        assert!(MigrationChain::new(BAD).check().is_err());
    }

    #[test]
    fn parallel_entries_into_one_version_are_ordered_by_source() {
        const RESTRUCTURE: MigrationStep = MigrationStep {
            from: &["1.0.2"],
            to: "1.1.2",
            summary: "restructure",
            apply: add_marker,
        };
        const BUMP: MigrationStep = MigrationStep {
            from: &["1.1.0", "1.1.1"],
            to: "1.1.2",
            summary: "bump",
            apply: bump,
        };
        static PARALLEL: &[MigrationStep] = &[RESTRUCTURE, BUMP];
        static REVERSED: &[MigrationStep] = &[BUMP, RESTRUCTURE];
        let chain = MigrationChain::new(PARALLEL);
        chain.check().unwrap();
        let migrated = chain.migrate(&doc(json!({"format_version": "1.1.1"})));
        assert_eq!(migrated.document["format_version"], "1.1.2");
        assert_eq!(migrated.applied.len(), 1);
        assert!(!migrated.document.contains_key("steps"));

        assert!(MigrationChain::new(REVERSED).check().is_err());
    }

    #[test]
    fn wraps_names_and_strips_doi() {
        let mut value = json!(["Jane", {"name": "Max"}]);
        wrap_name_list(&mut value);
        assert_eq!(value, json!([{"name": "Jane"}, {"name": "Max"}]));

        let mut document = doc(json!({"cite": [{"text": "x", "doi": "https://doi.org/10.1/abc"}]}));
        strip_cite_doi_prefixes(&mut document);
        assert_eq!(document["cite"][0]["doi"], "10.1/abc");
    }
}
