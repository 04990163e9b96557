//! Loosely typed resource description content.
//!
//! Raw YAML is parsed into an order-preserving JSON value tree so that
//! migrations can rewrite it freely and re-serialization keeps the author's
//! key order.

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::{Map as JsonMap, Value as JsonValue};

use crate::error::Result;

/// A mapping-shaped resource description.
pub type Document = JsonMap<String, JsonValue>;

/// One step of a field location: a mapping key or a sequence index.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum LocItem {
    Key(String),
    Index(usize),
}

impl From<&str> for LocItem {
    fn from(value: &str) -> Self {
        LocItem::Key(value.to_string())
    }
}

impl From<String> for LocItem {
    fn from(value: String) -> Self {
        LocItem::Key(value)
    }
}

impl From<usize> for LocItem {
    fn from(value: usize) -> Self {
        LocItem::Index(value)
    }
}

/// Field path inside a document, outermost key first.
#[derive(Clone, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Loc(Vec<LocItem>);

impl Loc {
    pub fn root() -> Self {
        Self(Vec::new())
    }

    pub fn is_root(&self) -> bool {
        self.0.is_empty()
    }

    pub fn items(&self) -> &[LocItem] {
        &self.0
    }

    /// A new location one step deeper.
    pub fn join(&self, item: impl Into<LocItem>) -> Self {
        let mut items = self.0.clone();
        items.push(item.into());
        Self(items)
    }

    /// `prefix` followed by every item of `self`.
    pub fn prefixed(&self, prefix: &Loc) -> Self {
        let mut items = prefix.0.clone();
        items.extend(self.0.iter().cloned());
        Self(items)
    }
}

impl<I: Into<LocItem>> FromIterator<I> for Loc {
    fn from_iter<T: IntoIterator<Item = I>>(iter: T) -> Self {
        Self(iter.into_iter().map(Into::into).collect())
    }
}

/// Renders `weights.pytorch_state_dict.source` / `inputs[0].axes`.
impl fmt::Display for Loc {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.0.is_empty() {
            return f.write_str("(root)");
        }
        for (idx, item) in self.0.iter().enumerate() {
            match item {
                LocItem::Key(key) if idx == 0 => write!(f, "{key}")?,
                LocItem::Key(key) => write!(f, ".{key}")?,
                LocItem::Index(index) => write!(f, "[{index}]")?,
            }
        }
        Ok(())
    }
}

#[macro_export]
macro_rules! loc {
    () => { $crate::document::Loc::root() };
    ($($item:expr),+ $(,)?) => {
        $crate::document::Loc::root()$(.join($item))+
    };
}

/// Parse YAML text into a JSON value tree.
pub fn parse_yaml(text: &str) -> Result<JsonValue> {
    let value: JsonValue = serde_yaml_bw::from_str(text)?;
    Ok(value)
}

/// Serialize a document to YAML text.
pub fn to_yaml_string(document: &Document) -> Result<String> {
    Ok(serde_yaml_bw::to_string(document)?)
}

/// Human readable name of a value's YAML kind, used in shape diagnostics.
pub fn kind_name(value: &JsonValue) -> &'static str {
    match value {
        JsonValue::Null => "null",
        JsonValue::Bool(_) => "bool",
        JsonValue::Number(number) if number.is_f64() => "float",
        JsonValue::Number(_) => "int",
        JsonValue::String(_) => "str",
        JsonValue::Array(_) => "list",
        JsonValue::Object(_) => "dict",
    }
}

/// `format_version` as declared by the document, if it is a string.
pub fn declared_format_version(document: &Document) -> Option<&str> {
    document.get("format_version").and_then(JsonValue::as_str)
}

/// Set `format_version` on a document.
pub fn set_format_version(document: &mut Document, version: &str) {
    document.insert(
        "format_version".to_string(),
        JsonValue::String(version.to_string()),
    );
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn renders_dotted_and_bracketed_paths() {
        let loc = loc!["weights", "pytorch_state_dict", "source"];
        assert_eq!(loc.to_string(), "weights.pytorch_state_dict.source");
        let loc = loc!["inputs", 0usize, "axes"];
        assert_eq!(loc.to_string(), "inputs[0].axes");
        assert_eq!(Loc::root().to_string(), "(root)");
    }

    #[test]
    fn yaml_keeps_key_order() {
        let value = parse_yaml("zeta: 1\nalpha: 2\nmid: [a, b]\n").unwrap();
        let doc = value.as_object().unwrap();
        let keys: Vec<&str> = doc.keys().map(String::as_str).collect();
        assert_eq!(keys, ["zeta", "alpha", "mid"]);
        let text = to_yaml_string(doc).unwrap();
        assert!(text.find("zeta").unwrap() < text.find("alpha").unwrap());
    }

    #[test]
    fn loc_serializes_as_flat_list() {
        let loc = loc!["collection", 2usize, "id"];
        let json = serde_json::to_string(&loc).unwrap();
        assert_eq!(json, r#"["collection",2,"id"]"#);
    }
}
