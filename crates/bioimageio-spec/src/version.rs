use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;

use semver::Version;
use serde::{Deserialize, Serialize};

pub const DISCOVER: &str = "discover";
pub const LATEST: &str = "latest";

/// A concrete `MAJOR.MINOR.PATCH` format version.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct FormatVersion(Version);

impl FormatVersion {
    pub fn new(major: u64, minor: u64, patch: u64) -> Self {
        Self(Version::new(major, minor, patch))
    }

    pub fn major(&self) -> u64 {
        self.0.major
    }

    pub fn minor(&self) -> u64 {
        self.0.minor
    }

    pub fn patch(&self) -> u64 {
        self.0.patch
    }

    /// `"{major}.{minor}"`, the registry key for this version.
    pub fn major_minor(&self) -> String {
        format!("{}.{}", self.0.major, self.0.minor)
    }

    /// Compare only minor and patch; used by the future-patch tolerance rule.
    pub fn cmp_minor_patch(&self, other: &FormatVersion) -> Ordering {
        (self.0.minor, self.0.patch).cmp(&(other.0.minor, other.0.patch))
    }
}

impl FromStr for FormatVersion {
    type Err = semver::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let version = Version::parse(s.trim())?;
        Ok(Self(Version::new(version.major, version.minor, version.patch)))
    }
}

impl fmt::Display for FormatVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}.{}", self.0.major, self.0.minor, self.0.patch)
    }
}

/// The format version a caller asks the loader to produce.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum RequestedVersion {
    /// Validate against whatever the document declares.
    #[default]
    Discover,
    /// Validate against the newest implementation of the document's type.
    Latest,
    /// Validate against the implementation serving this `X.Y` or `X.Y.Z`.
    Exact(String),
}

impl From<&str> for RequestedVersion {
    fn from(value: &str) -> Self {
        match value.trim() {
            DISCOVER => RequestedVersion::Discover,
            LATEST => RequestedVersion::Latest,
            other => RequestedVersion::Exact(other.to_string()),
        }
    }
}

impl From<String> for RequestedVersion {
    fn from(value: String) -> Self {
        RequestedVersion::from(value.as_str())
    }
}

impl From<RequestedVersion> for String {
    fn from(value: RequestedVersion) -> Self {
        value.to_string()
    }
}

impl fmt::Display for RequestedVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RequestedVersion::Discover => f.write_str(DISCOVER),
            RequestedVersion::Latest => f.write_str(LATEST),
            RequestedVersion::Exact(version) => f.write_str(version),
        }
    }
}

/// Normalize a format version to the `"major.minor"` registry key.
///
/// A bare major gains `.0`, a full `major.minor.patch` loses its patch and
/// `major.minor` is kept. Anything that is not made of numeric components
/// yields `None`, which callers treat as "use the type's default".
pub fn normalize_major_minor(version: &str) -> Option<String> {
    let version = version.trim();
    let parts: Vec<&str> = version.split('.').collect();
    if parts.iter().any(|part| part.is_empty() || !part.bytes().all(|b| b.is_ascii_digit())) {
        return None;
    }
    match parts.len() {
        1 => Some(format!("{}.0", parts[0])),
        2 => Some(version.to_string()),
        3 => Some(format!("{}.{}", parts[0], parts[1])),
        _ => None,
    }
}

/// Whether `key` is a well-formed `"major.minor"` registry key.
pub fn is_major_minor(key: &str) -> bool {
    let mut parts = key.split('.');
    let well_formed = |part: Option<&str>| {
        part.is_some_and(|p| !p.is_empty() && p.bytes().all(|b| b.is_ascii_digit()))
    };
    well_formed(parts.next()) && well_formed(parts.next()) && parts.next().is_none()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalizes_by_dot_count() {
        assert_eq!(normalize_major_minor("0").as_deref(), Some("0.0"));
        assert_eq!(normalize_major_minor("0.4").as_deref(), Some("0.4"));
        assert_eq!(normalize_major_minor("0.4.10").as_deref(), Some("0.4"));
        assert_eq!(normalize_major_minor("0.4.10.1"), None);
        assert_eq!(normalize_major_minor("zero.four"), None);
        assert_eq!(normalize_major_minor(""), None);
    }

    #[test]
    fn major_minor_keys() {
        assert!(is_major_minor("0.5"));
        assert!(!is_major_minor("0.5.1"));
        assert!(!is_major_minor("5"));
        assert!(!is_major_minor("a.b"));
    }

    #[test]
    fn requested_version_parses_sentinels() {
        assert_eq!(RequestedVersion::from("discover"), RequestedVersion::Discover);
        assert_eq!(RequestedVersion::from("latest"), RequestedVersion::Latest);
        assert_eq!(
            RequestedVersion::from("0.4"),
            RequestedVersion::Exact("0.4".into())
        );
    }

    #[test]
    fn minor_patch_ordering_ignores_major() {
        let implemented: FormatVersion = "0.4.10".parse().unwrap();
        let declared: FormatVersion = "0.4.11".parse().unwrap();
        assert_eq!(declared.cmp_minor_patch(&implemented), Ordering::Greater);
        assert_eq!(implemented.to_string(), "0.4.10");
        assert_eq!(implemented.major_minor(), "0.4");
    }
}
