//! Single-pass issue collection for structural validation.
//!
//! Validators never log or bail on the first problem; they push every error
//! and every warning (at any severity) into an [`Issues`] collector, and
//! the loader decides afterwards what the caller gets to see.

use serde_json::Value as JsonValue;

use crate::document::{Document, Loc, kind_name};
use crate::summary::{ErrorEntry, Severity, ValidationDetail, WarningEntry};

#[derive(Clone, Debug, Default)]
pub struct Issues {
    errors: Vec<ErrorEntry>,
    warnings: Vec<WarningEntry>,
    nested: Vec<ValidationDetail>,
}

impl Issues {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn error(&mut self, loc: Loc, kind: &str, msg: impl Into<String>) {
        self.errors.push(ErrorEntry::new(loc, msg, kind));
    }

    pub fn push_error(&mut self, entry: ErrorEntry) {
        self.errors.push(entry);
    }

    pub fn warn(&mut self, loc: Loc, kind: &str, msg: impl Into<String>, severity: Severity) {
        self.warnings
            .push(WarningEntry::new(loc, msg, kind, severity));
    }

    /// Details of a recursive validation, reported next to this pass.
    pub fn nest(&mut self, detail: ValidationDetail) {
        self.nested.push(detail);
    }

    pub fn has_errors(&self) -> bool {
        !self.errors.is_empty()
    }

    pub fn errors(&self) -> &[ErrorEntry] {
        &self.errors
    }

    pub fn warnings(&self) -> &[WarningEntry] {
        &self.warnings
    }

    pub fn into_parts(self) -> (Vec<ErrorEntry>, Vec<WarningEntry>, Vec<ValidationDetail>) {
        (self.errors, self.warnings, self.nested)
    }

    pub fn missing(&mut self, loc: Loc) {
        self.error(loc, "missing", "Field required");
    }

    /// Present and not null.
    pub fn require<'a>(
        &mut self,
        doc: &'a Document,
        loc: &Loc,
        key: &str,
    ) -> Option<&'a JsonValue> {
        match doc.get(key) {
            Some(JsonValue::Null) | None => {
                self.missing(loc.join(key));
                None
            }
            Some(value) => Some(value),
        }
    }

    pub fn expect_str<'a>(&mut self, value: &'a JsonValue, loc: Loc) -> Option<&'a str> {
        match value {
            JsonValue::String(text) => Some(text),
            other => {
                self.error(
                    loc,
                    "string_type",
                    format!("Input should be a valid string, got {}", kind_name(other)),
                );
                None
            }
        }
    }

    pub fn expect_map<'a>(&mut self, value: &'a JsonValue, loc: Loc) -> Option<&'a Document> {
        match value {
            JsonValue::Object(map) => Some(map),
            other => {
                self.error(
                    loc,
                    "dict_type",
                    format!("Input should be a valid dictionary, got {}", kind_name(other)),
                );
                None
            }
        }
    }

    pub fn expect_list<'a>(&mut self, value: &'a JsonValue, loc: Loc) -> Option<&'a [JsonValue]> {
        match value {
            JsonValue::Array(items) => Some(items),
            other => {
                self.error(
                    loc,
                    "list_type",
                    format!("Input should be a valid list, got {}", kind_name(other)),
                );
                None
            }
        }
    }

    pub fn require_str<'a>(&mut self, doc: &'a Document, loc: &Loc, key: &str) -> Option<&'a str> {
        let value = self.require(doc, loc, key)?;
        let text = self.expect_str(value, loc.join(key))?;
        if text.trim().is_empty() {
            self.error(
                loc.join(key),
                "string_too_short",
                "String should have at least 1 character",
            );
            return None;
        }
        Some(text)
    }

    /// Null counts as absent.
    pub fn optional_str<'a>(&mut self, doc: &'a Document, loc: &Loc, key: &str) -> Option<&'a str> {
        match doc.get(key) {
            None | Some(JsonValue::Null) => None,
            Some(value) => self.expect_str(value, loc.join(key)),
        }
    }

    pub fn require_map<'a>(
        &mut self,
        doc: &'a Document,
        loc: &Loc,
        key: &str,
    ) -> Option<&'a Document> {
        let value = self.require(doc, loc, key)?;
        self.expect_map(value, loc.join(key))
    }

    pub fn optional_map<'a>(
        &mut self,
        doc: &'a Document,
        loc: &Loc,
        key: &str,
    ) -> Option<&'a Document> {
        match doc.get(key) {
            None | Some(JsonValue::Null) => None,
            Some(value) => self.expect_map(value, loc.join(key)),
        }
    }

    /// A list with at least `min_len` items.
    pub fn require_list<'a>(
        &mut self,
        doc: &'a Document,
        loc: &Loc,
        key: &str,
        min_len: usize,
    ) -> Option<&'a [JsonValue]> {
        let value = self.require(doc, loc, key)?;
        let items = self.expect_list(value, loc.join(key))?;
        if items.len() < min_len {
            self.error(
                loc.join(key),
                "too_short",
                format!(
                    "List should have at least {min_len} item{} after validation, not {}",
                    if min_len == 1 { "" } else { "s" },
                    items.len()
                ),
            );
        }
        Some(items)
    }

    pub fn optional_list<'a>(
        &mut self,
        doc: &'a Document,
        loc: &Loc,
        key: &str,
    ) -> Option<&'a [JsonValue]> {
        match doc.get(key) {
            None | Some(JsonValue::Null) => None,
            Some(value) => self.expect_list(value, loc.join(key)),
        }
    }

    /// Every item of an optional list must be a string.
    pub fn optional_str_list<'a>(
        &mut self,
        doc: &'a Document,
        loc: &Loc,
        key: &str,
    ) -> Vec<&'a str> {
        let Some(items) = self.optional_list(doc, loc, key) else {
            return Vec::new();
        };
        items
            .iter()
            .enumerate()
            .filter_map(|(idx, item)| self.expect_str(item, loc.join(key).join(idx)))
            .collect()
    }

    /// Required string restricted to `allowed`.
    pub fn literal<'a>(
        &mut self,
        doc: &'a Document,
        loc: &Loc,
        key: &str,
        allowed: &[&str],
    ) -> Option<&'a str> {
        let value = self.require_str(doc, loc, key)?;
        if allowed.contains(&value) {
            return Some(value);
        }
        let expected = allowed
            .iter()
            .map(|item| format!("'{item}'"))
            .collect::<Vec<_>>()
            .join(", ");
        self.error(
            loc.join(key),
            "literal_error",
            format!("Input should be {expected}, got '{value}'"),
        );
        None
    }

    /// Optional sha256 hex digest.
    pub fn optional_sha256<'a>(
        &mut self,
        doc: &'a Document,
        loc: &Loc,
        key: &str,
    ) -> Option<&'a str> {
        let digest = self.optional_str(doc, loc, key)?;
        if is_sha256_hex(digest) {
            Some(digest)
        } else {
            self.error(
                loc.join(key),
                "value_error",
                "sha256 must be 64 hexadecimal characters",
            );
            None
        }
    }
}

pub fn is_sha256_hex(value: &str) -> bool {
    value.len() == 64 && value.bytes().all(|b| b.is_ascii_hexdigit())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::loc;
    use serde_json::json;

    fn doc(value: JsonValue) -> Document {
        value.as_object().cloned().unwrap()
    }

    #[test]
    fn required_fields_report_locations() {
        let content = doc(json!({"name": 3, "tags": ["a", 1], "empty": ""}));
        let mut issues = Issues::new();
        assert!(issues.require_str(&content, &loc![], "description").is_none());
        assert!(issues.require_str(&content, &loc![], "name").is_none());
        assert!(issues.require_str(&content, &loc![], "empty").is_none());
        assert_eq!(issues.optional_str_list(&content, &loc![], "tags"), ["a"]);

        let rendered: Vec<(String, &str)> = issues
            .errors()
            .iter()
            .map(|e| (e.loc.to_string(), e.kind.as_str()))
            .collect();
        assert_eq!(
            rendered,
            [
                ("description".to_string(), "missing"),
                ("name".to_string(), "string_type"),
                ("empty".to_string(), "string_too_short"),
                ("tags[1]".to_string(), "string_type"),
            ]
        );
    }

    #[test]
    fn null_is_absent_for_optional_fields() {
        let content = doc(json!({"config": null, "covers": null}));
        let mut issues = Issues::new();
        assert!(issues.optional_map(&content, &loc![], "config").is_none());
        assert!(issues.optional_list(&content, &loc![], "covers").is_none());
        assert!(!issues.has_errors());
    }

    #[test]
    fn literal_and_list_length() {
        let content = doc(json!({"type": "modle", "authors": []}));
        let mut issues = Issues::new();
        assert!(issues.literal(&content, &loc![], "type", &["model"]).is_none());
        assert!(issues.require_list(&content, &loc![], "authors", 1).is_some());
        assert_eq!(issues.errors()[0].kind, "literal_error");
        assert_eq!(issues.errors()[1].kind, "too_short");
    }

    #[test]
    fn warnings_keep_severity() {
        let mut issues = Issues::new();
        issues.warn(loc!["license"], "license", "deprecated", Severity::Alert);
        assert!(!issues.has_errors());
        assert_eq!(issues.warnings()[0].severity, Severity::Alert);
    }

    #[test]
    fn sha256_shape() {
        assert!(is_sha256_hex(&"a".repeat(64)));
        assert!(!is_sha256_hex("abc"));
        assert!(!is_sha256_hex(&"g".repeat(64)));
    }
}
