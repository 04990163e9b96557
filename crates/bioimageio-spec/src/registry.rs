//! Dispatch from `(type, format_version)` to a description implementation.
//!
//! The table is a two level map. The outer key is a known resource type, or
//! `None` for everything else (the generic bucket); the inner key is a
//! `major.minor` string, or `None` for the bucket's default. Lookups never
//! fail: an unknown minor version falls back to the bucket default.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use std::sync::LazyLock;

use serde::{Deserialize, Serialize};

use crate::convert::{MigrationChain, collection, generic, model};
use crate::error::{Result, SpecError};
use crate::version::{FormatVersion, RequestedVersion, is_major_minor, normalize_major_minor};

/// Resource types with a dedicated implementation.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResourceType {
    Application,
    Collection,
    Dataset,
    Model,
    Notebook,
}

impl ResourceType {
    pub const ALL: [ResourceType; 5] = [
        ResourceType::Application,
        ResourceType::Collection,
        ResourceType::Dataset,
        ResourceType::Model,
        ResourceType::Notebook,
    ];

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "application" => Some(ResourceType::Application),
            "collection" => Some(ResourceType::Collection),
            "dataset" => Some(ResourceType::Dataset),
            "model" => Some(ResourceType::Model),
            "notebook" => Some(ResourceType::Notebook),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ResourceType::Application => "application",
            ResourceType::Collection => "collection",
            ResourceType::Dataset => "dataset",
            ResourceType::Model => "model",
            ResourceType::Notebook => "notebook",
        }
    }
}

impl fmt::Display for ResourceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ResourceType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        ResourceType::parse(s).ok_or_else(|| format!("unknown resource type `{s}`"))
    }
}

/// One concrete description implementation.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum DescrKind {
    Generic02,
    Generic03,
    Application02,
    Application03,
    Collection02,
    Collection03,
    Dataset02,
    Dataset03,
    Notebook02,
    Notebook03,
    Model04,
    Model05,
}

impl DescrKind {
    pub const ALL: [DescrKind; 12] = [
        DescrKind::Generic02,
        DescrKind::Generic03,
        DescrKind::Application02,
        DescrKind::Application03,
        DescrKind::Collection02,
        DescrKind::Collection03,
        DescrKind::Dataset02,
        DescrKind::Dataset03,
        DescrKind::Notebook02,
        DescrKind::Notebook03,
        DescrKind::Model04,
        DescrKind::Model05,
    ];

    /// `None` for the generic implementations.
    pub fn resource_type(self) -> Option<ResourceType> {
        match self {
            DescrKind::Generic02 | DescrKind::Generic03 => None,
            DescrKind::Application02 | DescrKind::Application03 => Some(ResourceType::Application),
            DescrKind::Collection02 | DescrKind::Collection03 => Some(ResourceType::Collection),
            DescrKind::Dataset02 | DescrKind::Dataset03 => Some(ResourceType::Dataset),
            DescrKind::Notebook02 | DescrKind::Notebook03 => Some(ResourceType::Notebook),
            DescrKind::Model04 | DescrKind::Model05 => Some(ResourceType::Model),
        }
    }

    pub fn implemented_type(self) -> &'static str {
        self.resource_type().map_or("generic", ResourceType::as_str)
    }

    pub fn implemented_format_version(self) -> &'static str {
        match self {
            DescrKind::Generic02
            | DescrKind::Application02
            | DescrKind::Collection02
            | DescrKind::Dataset02
            | DescrKind::Notebook02 => "0.2.4",
            DescrKind::Generic03
            | DescrKind::Application03
            | DescrKind::Collection03
            | DescrKind::Dataset03
            | DescrKind::Notebook03 => "0.3.0",
            DescrKind::Model04 => "0.4.10",
            DescrKind::Model05 => "0.5.3",
        }
    }

    pub fn implemented_version(self) -> FormatVersion {
        match self.implemented_format_version() {
            "0.2.4" => FormatVersion::new(0, 2, 4),
            "0.3.0" => FormatVersion::new(0, 3, 0),
            "0.4.10" => FormatVersion::new(0, 4, 10),
            _ => FormatVersion::new(0, 5, 3),
        }
    }

    /// Whether this implementation belongs to the 0.2 generation of the generic family.
    pub fn is_v0_2(self) -> bool {
        self.implemented_format_version() == "0.2.4"
    }

    pub fn migration_chain(self) -> MigrationChain {
        match self {
            DescrKind::Generic02
            | DescrKind::Application02
            | DescrKind::Dataset02
            | DescrKind::Notebook02 => MigrationChain::new(generic::GENERIC_V0_2),
            DescrKind::Generic03
            | DescrKind::Application03
            | DescrKind::Dataset03
            | DescrKind::Notebook03 => MigrationChain::new(generic::GENERIC_V0_3),
            DescrKind::Collection02 => MigrationChain::new(collection::COLLECTION_V0_2),
            DescrKind::Collection03 => MigrationChain::new(collection::COLLECTION_V0_3),
            DescrKind::Model04 => MigrationChain::new(model::MODEL_V0_4),
            DescrKind::Model05 => MigrationChain::new(model::MODEL_V0_5),
        }
    }

    /// Whether a document declaring `major_minor` is served by this implementation,
    /// either directly or through its migration chain.
    pub fn serves(self, major_minor: &str) -> bool {
        self.implemented_version().major_minor() == major_minor
            || self
                .migration_chain()
                .known_versions()
                .any(|version| normalize_major_minor(version).as_deref() == Some(major_minor))
    }
}

impl fmt::Display for DescrKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} {}",
            self.implemented_type(),
            self.implemented_format_version()
        )
    }
}

type Bucket = BTreeMap<Option<String>, DescrKind>;

#[derive(Clone, Debug)]
pub struct Registry {
    buckets: BTreeMap<Option<ResourceType>, Bucket>,
}

static BUILTIN: LazyLock<Registry> = LazyLock::new(|| {
    Registry::new(builtin_entries())
        .unwrap_or_else(|err| panic!("built-in description registry is inconsistent: {err}"))
});

fn builtin_entries() -> Vec<(Option<ResourceType>, Option<&'static str>, DescrKind)> {
    use DescrKind::*;
    use ResourceType::*;
    vec![
        (None, Some("0.2"), Generic02),
        (None, Some("0.3"), Generic03),
        (None, None, Generic03),
        (Some(Application), Some("0.2"), Application02),
        (Some(Application), Some("0.3"), Application03),
        (Some(Application), None, Application03),
        (Some(Collection), Some("0.2"), Collection02),
        (Some(Collection), Some("0.3"), Collection03),
        (Some(Collection), None, Collection03),
        (Some(Dataset), Some("0.2"), Dataset02),
        (Some(Dataset), Some("0.3"), Dataset03),
        (Some(Dataset), None, Dataset03),
        (Some(Notebook), Some("0.2"), Notebook02),
        (Some(Notebook), Some("0.3"), Notebook03),
        (Some(Notebook), None, Notebook03),
        (Some(Model), Some("0.3"), Model04),
        (Some(Model), Some("0.4"), Model04),
        (Some(Model), Some("0.5"), Model05),
        (Some(Model), None, Model05),
    ]
}

impl Registry {
    /// Build a registry, checking every table invariant up front.
    pub fn new<'a>(
        entries: impl IntoIterator<Item = (Option<ResourceType>, Option<&'a str>, DescrKind)>,
    ) -> Result<Self> {
        let mut buckets: BTreeMap<Option<ResourceType>, Bucket> = BTreeMap::new();
        for (resource_type, key, kind) in entries {
            let label = resource_type.map_or("generic", ResourceType::as_str);
            if kind.resource_type() != resource_type {
                return Err(SpecError::Registry(format!(
                    "{kind} registered under the {label} bucket"
                )));
            }
            if let Some(key) = key {
                if !is_major_minor(key) {
                    return Err(SpecError::Registry(format!(
                        "{label} key `{key}` is not a major.minor version"
                    )));
                }
                if !kind.serves(key) {
                    return Err(SpecError::Registry(format!(
                        "{kind} cannot serve {label} {key} documents"
                    )));
                }
            }
            let bucket = buckets.entry(resource_type).or_default();
            if bucket.insert(key.map(str::to_string), kind).is_some() {
                return Err(SpecError::Registry(format!(
                    "duplicate {label} key {}",
                    key.unwrap_or("<default>")
                )));
            }
        }

        if !buckets.contains_key(&None) {
            return Err(SpecError::Registry("missing the generic bucket".into()));
        }
        for (resource_type, bucket) in &buckets {
            let label = resource_type.map_or("generic", ResourceType::as_str);
            if !bucket.contains_key(&None) {
                return Err(SpecError::Registry(format!(
                    "{label} has no default implementation"
                )));
            }
            for kind in bucket.values() {
                let chain = kind.migration_chain();
                chain.check().map_err(|reason| SpecError::MigrationChain {
                    kind: kind.to_string(),
                    reason,
                })?;
                if let Some(target) = chain.target()
                    && target != kind.implemented_format_version()
                {
                    return Err(SpecError::MigrationChain {
                        kind: kind.to_string(),
                        reason: format!("chain ends at {target}"),
                    });
                }
            }
        }
        Ok(Self { buckets })
    }

    /// The table shipped with this crate.
    pub fn builtin() -> &'static Registry {
        &BUILTIN
    }

    fn bucket(&self, resource_type: &str) -> &Bucket {
        ResourceType::parse(resource_type)
            .and_then(|known| self.buckets.get(&Some(known)))
            .or_else(|| self.buckets.get(&None))
            .unwrap_or_else(|| unreachable!("registry construction guarantees a generic bucket"))
    }

    /// Resolve with normalization and fallback to the bucket default.
    pub fn resolve(&self, resource_type: &str, format_version: &str) -> DescrKind {
        self.lookup(resource_type, format_version).0
    }

    /// Like [`Registry::resolve`], also telling whether a dedicated entry matched.
    pub fn lookup(&self, resource_type: &str, format_version: &str) -> (DescrKind, bool) {
        let bucket = self.bucket(resource_type);
        let default = bucket[&None];
        match normalize_major_minor(format_version) {
            Some(key) => match bucket.get(&Some(key)) {
                Some(kind) => (*kind, true),
                None => (default, false),
            },
            None => (default, false),
        }
    }

    pub fn latest(&self, resource_type: &str) -> DescrKind {
        self.bucket(resource_type)[&None]
    }

    /// Resolve the implementation a caller asked for.
    pub fn resolve_requested(
        &self,
        resource_type: &str,
        requested: &RequestedVersion,
        declared: &str,
    ) -> DescrKind {
        match requested {
            RequestedVersion::Discover => self.resolve(resource_type, declared),
            RequestedVersion::Latest => self.latest(resource_type),
            RequestedVersion::Exact(version) => self.resolve(resource_type, version),
        }
    }

    /// Registered `(type, key, kind)` rows, generic bucket first.
    pub fn entries(&self) -> impl Iterator<Item = (Option<ResourceType>, Option<&str>, DescrKind)> {
        self.buckets.iter().flat_map(|(resource_type, bucket)| {
            bucket
                .iter()
                .map(move |(key, kind)| (*resource_type, key.as_deref(), *kind))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builtin_registry_is_consistent() {
        let registry = Registry::builtin();
        assert!(registry.entries().count() >= 19);
    }

    #[test]
    fn normalizes_and_falls_back() {
        let registry = Registry::builtin();
        assert_eq!(registry.resolve("model", "0.4.10"), DescrKind::Model04);
        assert_eq!(registry.resolve("model", "0.4"), DescrKind::Model04);
        assert_eq!(registry.resolve("model", "0.3.6"), DescrKind::Model04);
        assert_eq!(registry.resolve("model", "9.9"), DescrKind::Model05);
        assert_eq!(registry.resolve("model", "not a version"), DescrKind::Model05);
        assert_eq!(registry.resolve("dataset", "0.2.0"), DescrKind::Dataset02);
        assert_eq!(registry.resolve("dataset", "0"), DescrKind::Dataset03);
        assert_eq!(registry.resolve("workflow", "0.2.1"), DescrKind::Generic02);
        assert_eq!(registry.resolve("generic", "0.3.0"), DescrKind::Generic03);
        assert!(!registry.lookup("model", "9.9").1);
        assert!(registry.lookup("model", "0.5.0").1);
    }

    #[test]
    fn requested_versions() {
        let registry = Registry::builtin();
        assert_eq!(
            registry.resolve_requested("model", &RequestedVersion::Discover, "0.4.9"),
            DescrKind::Model04
        );
        assert_eq!(
            registry.resolve_requested("model", &RequestedVersion::Latest, "0.4.9"),
            DescrKind::Model05
        );
        assert_eq!(
            registry.resolve_requested("dataset", &"0.2".into(), "0.3.0"),
            DescrKind::Dataset02
        );
    }

    #[test]
    fn rejects_bucket_without_default() {
        let err = Registry::new([
            (None, None, DescrKind::Generic03),
            (Some(ResourceType::Model), Some("0.5"), DescrKind::Model05),
        ])
        .unwrap_err();
        assert!(err.to_string().contains("model has no default"));
    }

    #[test]
    fn rejects_malformed_and_mismatched_keys() {
        let err = Registry::new([(None, Some("0.3.0"), DescrKind::Generic03)]).unwrap_err();
        assert!(err.to_string().contains("not a major.minor"));

        let err = Registry::new([(
            Some(ResourceType::Model),
            Some("0.2"),
            DescrKind::Model05,
        )])
        .unwrap_err();
        assert!(err.to_string().contains("cannot serve"));

        let err = Registry::new([(Some(ResourceType::Model), None, DescrKind::Dataset03)])
            .unwrap_err();
        assert!(err.to_string().contains("bucket"));
    }

    #[test]
    fn rejects_duplicate_keys() {
        let err = Registry::new([
            (None, None, DescrKind::Generic03),
            (None, None, DescrKind::Generic02),
        ])
        .unwrap_err();
        assert!(err.to_string().contains("duplicate"));
    }

    #[test]
    fn kinds_describe_themselves() {
        assert_eq!(DescrKind::Model04.to_string(), "model 0.4.10");
        assert_eq!(DescrKind::Generic02.implemented_type(), "generic");
        for kind in DescrKind::ALL {
            assert_eq!(
                kind.implemented_version().to_string(),
                kind.implemented_format_version()
            );
        }
    }
}
