use serde_json::Value as JsonValue;

use super::{MigrationStep, remove_if_empty, strip_cite_doi_prefixes, wrap_name_list};
use crate::document::Document;

pub(crate) const WRAP_AUTHOR_NAMES: MigrationStep = MigrationStep {
    from: &["0.2.0", "0.2.1"],
    to: "0.2.2",
    summary: "wrap bare author and maintainer names",
    apply: wrap_author_names,
};

pub(crate) const STRIP_NAME_SEPARATORS: MigrationStep = MigrationStep {
    from: &["0.2.2"],
    to: "0.2.3",
    summary: "strip path separators from names",
    apply: strip_name_separators,
};

pub(crate) const NICKNAME_TO_ID: MigrationStep = MigrationStep {
    from: &["0.2.3"],
    to: "0.2.4",
    summary: "move config.bioimageio nickname to id",
    apply: move_nickname_to_id,
};

pub(crate) const TO_V0_3: MigrationStep = MigrationStep {
    from: &["0.2.4"],
    to: "0.3.0",
    summary: "attachments as a list, bare DOIs, string version",
    apply: generic_v0_2_4_to_v0_3_0,
};

pub static GENERIC_V0_2: &[MigrationStep] =
    &[WRAP_AUTHOR_NAMES, STRIP_NAME_SEPARATORS, NICKNAME_TO_ID];

pub static GENERIC_V0_3: &[MigrationStep] = &[
    WRAP_AUTHOR_NAMES,
    STRIP_NAME_SEPARATORS,
    NICKNAME_TO_ID,
    TO_V0_3,
];

pub(crate) fn wrap_author_names(document: &Document) -> Document {
    let mut out = document.clone();
    for key in ["authors", "maintainers"] {
        if let Some(value) = out.get_mut(key) {
            wrap_name_list(value);
        }
    }
    out
}

pub(crate) fn strip_separators(name: &str) -> String {
    name.chars().filter(|c| *c != '/' && *c != '\\').collect()
}

pub(crate) fn strip_name_separators(document: &Document) -> Document {
    let mut out = document.clone();
    if let Some(JsonValue::String(name)) = out.get_mut("name") {
        *name = strip_separators(name);
    }
    for key in ["authors", "maintainers"] {
        let Some(JsonValue::Array(people)) = out.get_mut(key) else {
            continue;
        };
        for person in people.iter_mut() {
            if let Some(JsonValue::String(name)) = person.get_mut("name") {
                *name = strip_separators(name);
            }
        }
    }
    out
}

pub(crate) fn move_nickname_to_id(document: &Document) -> Document {
    let mut out = document.clone();
    let Some(JsonValue::Object(config)) = out.get_mut("config") else {
        return out;
    };
    let Some(JsonValue::Object(bioimageio)) = config.get_mut("bioimageio") else {
        return out;
    };
    let nickname = bioimageio.remove("nickname");
    let icon = bioimageio.remove("nickname_icon");
    remove_if_empty(config, "bioimageio");
    remove_if_empty(&mut out, "config");
    if let Some(nickname) = nickname.filter(|value| !value.is_null()) {
        out.insert("id".into(), nickname);
    }
    if let Some(icon) = icon.filter(|value| !value.is_null()) {
        out.insert("id_emoji".into(), icon);
    }
    out
}

pub(crate) fn generic_v0_2_4_to_v0_3_0(document: &Document) -> Document {
    let mut out = document.clone();

    if let Some(JsonValue::Object(attachments)) = out.get("attachments") {
        let files = match attachments.get("files") {
            Some(JsonValue::Array(files)) => files
                .iter()
                .map(|file| {
                    let mut entry = Document::new();
                    entry.insert("source".into(), file.clone());
                    JsonValue::Object(entry)
                })
                .collect(),
            _ => Vec::new(),
        };
        if files.is_empty() {
            out.remove("attachments");
        } else {
            out.insert("attachments".into(), JsonValue::Array(files));
        }
    }

    strip_cite_doi_prefixes(&mut out);

    if let Some(JsonValue::Number(version)) = out.get("version") {
        let text = version.to_string();
        out.insert("version".into(), JsonValue::String(text));
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::convert::MigrationChain;
    use serde_json::json;

    fn doc(value: JsonValue) -> Document {
        value.as_object().cloned().unwrap()
    }

    #[test]
    fn chains_are_well_ordered() {
        MigrationChain::new(GENERIC_V0_2).check().unwrap();
        MigrationChain::new(GENERIC_V0_3).check().unwrap();
    }

    #[test]
    fn v0_2_0_reaches_v0_2_4() {
        let input = doc(json!({
            "type": "dataset",
            "format_version": "0.2.0",
            "name": "cells/nuclei",
            "authors": ["Jane/Doe", {"name": "Max"}],
            "config": {"bioimageio": {"nickname": "loud-mouse", "nickname_icon": "🐭"}}
        }));
        let migrated = MigrationChain::new(GENERIC_V0_2).migrate(&input);
        let out = migrated.document;
        assert_eq!(out["format_version"], "0.2.4");
        assert_eq!(out["name"], "cellsnuclei");
        assert_eq!(out["authors"], json!([{"name": "JaneDoe"}, {"name": "Max"}]));
        assert_eq!(out["id"], "loud-mouse");
        assert_eq!(out["id_emoji"], "🐭");
        assert!(!out.contains_key("config"));
        assert_eq!(migrated.applied.len(), 3);
    }

    #[test]
    fn other_config_survives_nickname_move() {
        let input = doc(json!({
            "format_version": "0.2.3",
            "config": {"bioimageio": {"nickname": "a", "owners": [1]}, "x": 1}
        }));
        let out = move_nickname_to_id(&input);
        assert_eq!(out["config"], json!({"bioimageio": {"owners": [1]}, "x": 1}));
    }

    #[test]
    fn v0_3_restructures_attachments_doi_and_version() {
        let input = doc(json!({
            "format_version": "0.2.4",
            "attachments": {"files": ["a.txt", "b.txt"], "other": 1},
            "cite": [{"text": "paper", "doi": "https://doi.org/10.5281/zenodo.1"}],
            "version": 1.5
        }));
        let out = MigrationChain::new(GENERIC_V0_3).migrate(&input).document;
        assert_eq!(out["format_version"], "0.3.0");
        assert_eq!(
            out["attachments"],
            json!([{"source": "a.txt"}, {"source": "b.txt"}])
        );
        assert_eq!(out["cite"][0]["doi"], "10.5281/zenodo.1");
        assert_eq!(out["version"], "1.5");
    }
}
