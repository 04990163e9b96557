use serde_json::Value as JsonValue;

use super::MigrationStep;
use super::generic::{
    NICKNAME_TO_ID, STRIP_NAME_SEPARATORS, generic_v0_2_4_to_v0_3_0, wrap_author_names,
};
use crate::document::Document;

/// Per-type entry lists used before `collection` existed.
const LEGACY_ENTRY_LISTS: [&str; 4] = ["application", "model", "dataset", "notebook"];

const MERGE_LEGACY_LISTS: MigrationStep = MigrationStep {
    from: &["0.2.0", "0.2.1"],
    to: "0.2.2",
    summary: "merge per-type entry lists into collection, wrap bare author names",
    apply: merge_legacy_lists,
};

const TO_V0_3: MigrationStep = MigrationStep {
    from: &["0.2.4"],
    to: "0.3.0",
    summary: "attachments as a list, bare DOIs, entry_source instead of rdf_source",
    apply: collection_v0_2_4_to_v0_3_0,
};

pub static COLLECTION_V0_2: &[MigrationStep] =
    &[MERGE_LEGACY_LISTS, STRIP_NAME_SEPARATORS, NICKNAME_TO_ID];

pub static COLLECTION_V0_3: &[MigrationStep] = &[
    MERGE_LEGACY_LISTS,
    STRIP_NAME_SEPARATORS,
    NICKNAME_TO_ID,
    TO_V0_3,
];

fn merge_legacy_lists(document: &Document) -> Document {
    let mut out = wrap_author_names(document);
    let mut merged = match out.remove("collection") {
        Some(JsonValue::Array(entries)) => entries,
        Some(JsonValue::Null) | None => Vec::new(),
        Some(other) => {
            // Leave malformed content for validation to report.
            out.insert("collection".into(), other);
            return out;
        }
    };
    for key in LEGACY_ENTRY_LISTS {
        let Some(JsonValue::Array(entries)) = out.get(key) else {
            continue;
        };
        for entry in entries {
            let mut entry = entry.clone();
            if let JsonValue::Object(map) = &mut entry
                && !map.contains_key("type")
            {
                map.insert("type".into(), JsonValue::String(key.to_string()));
            }
            merged.push(entry);
        }
        out.remove(key);
    }
    if !merged.is_empty() || document.contains_key("collection") {
        out.insert("collection".into(), JsonValue::Array(merged));
    }
    out
}

fn collection_v0_2_4_to_v0_3_0(document: &Document) -> Document {
    let mut out = generic_v0_2_4_to_v0_3_0(document);
    if let Some(JsonValue::Array(entries)) = out.get_mut("collection") {
        for entry in entries.iter_mut() {
            if let JsonValue::Object(map) = entry
                && let Some(source) = map.remove("rdf_source")
            {
                map.insert("entry_source".into(), source);
            }
        }
    }
    out
}
