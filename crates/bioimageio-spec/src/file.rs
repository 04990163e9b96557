//! File references inside resource descriptions.

use std::fmt;
use std::fs;
use std::path::{Component, Path, PathBuf};

use serde_json::Value as JsonValue;
use sha2::{Digest, Sha256};
use url::Url;

use crate::context::{Root, ValidationContext};
use crate::document::Loc;
use crate::error::{Result, SpecError};
use crate::issues::Issues;
use crate::reader;

/// A file reference resolved against the document root.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum FileSource {
    Url(Url),
    Local(PathBuf),
    ZipMember { archive: PathBuf, member: String },
}

impl FileSource {
    pub fn resolve(reference: &str, root: &Root) -> std::result::Result<FileSource, String> {
        let reference = reference.trim();
        if reference.is_empty() {
            return Err("file reference is empty".to_string());
        }
        if let Some(url) = parse_remote(reference)? {
            return Ok(FileSource::Url(url));
        }
        let path = Path::new(reference);
        if path.is_absolute() {
            return Ok(FileSource::Local(path.to_path_buf()));
        }
        match root {
            Root::Dir(dir) => Ok(FileSource::Local(dir.join(path))),
            Root::Url(base) => {
                let mut base = Url::parse(base)
                    .map_err(|err| format!("invalid root URL `{base}`: {err}"))?;
                if !base.path().ends_with('/') {
                    let directory = format!("{}/", base.path());
                    base.set_path(&directory);
                }
                base.join(&relative_posix(path)?)
                    .map(FileSource::Url)
                    .map_err(|err| format!("cannot resolve `{reference}` against {base}: {err}"))
            }
            Root::Zip(archive) => Ok(FileSource::ZipMember {
                archive: archive.clone(),
                member: relative_posix(path)?,
            }),
        }
    }

    /// Last path segment, used as the archive name when packaging.
    pub fn file_name(&self) -> Option<String> {
        let name = match self {
            FileSource::Url(url) => url
                .path_segments()?
                .filter(|segment| !segment.is_empty())
                .next_back()?
                .to_string(),
            FileSource::Local(path) => path.file_name()?.to_string_lossy().into_owned(),
            FileSource::ZipMember { member, .. } => member.rsplit('/').next()?.to_string(),
        };
        (!name.is_empty()).then_some(name)
    }

    pub fn exists(&self) -> Result<bool> {
        match self {
            FileSource::Url(_) => Ok(true),
            FileSource::Local(path) => Ok(path.is_file()),
            FileSource::ZipMember { archive, member } => reader::zip_has_member(archive, member),
        }
    }

    /// Bytes of a local file or zip member; remote sources go through a [`SourceFetcher`].
    pub fn read_bytes(&self, fetcher: &dyn SourceFetcher) -> Result<Vec<u8>> {
        match self {
            FileSource::Url(url) => fetcher.fetch(url),
            FileSource::Local(path) => fs::read(path).map_err(|err| SpecError::Read {
                path: path.display().to_string(),
                reason: err.to_string(),
            }),
            FileSource::ZipMember { archive, member } => reader::read_zip_member(archive, member),
        }
    }
}

impl fmt::Display for FileSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FileSource::Url(url) => f.write_str(url.as_str()),
            FileSource::Local(path) => write!(f, "{}", path.display()),
            FileSource::ZipMember { archive, member } => {
                write!(f, "{}/{member}", archive.display())
            }
        }
    }
}

/// Download collaborator for remote sources.
pub trait SourceFetcher {
    fn fetch(&self, url: &Url) -> Result<Vec<u8>>;
}

/// Fetcher for offline use; every remote source is an error.
#[derive(Clone, Copy, Debug, Default)]
pub struct OfflineFetcher;

impl SourceFetcher for OfflineFetcher {
    fn fetch(&self, url: &Url) -> Result<Vec<u8>> {
        Err(SpecError::Packaging {
            source_name: url.to_string(),
            reason: "remote sources cannot be fetched offline".to_string(),
        })
    }
}

/// Whether `reference` is an http(s) URL with a host.
pub fn is_url(reference: &str) -> bool {
    matches!(parse_remote(reference), Ok(Some(_)))
}

/// `Ok(None)` for anything that is not meant as a remote reference, an error
/// for http(s) references that do not parse or lack a host.
fn parse_remote(reference: &str) -> std::result::Result<Option<Url>, String> {
    match Url::parse(reference) {
        Ok(url) if matches!(url.scheme(), "http" | "https") => {
            if url.host_str().is_none_or(str::is_empty) {
                Err(format!("URL `{reference}` has no host"))
            } else {
                Ok(Some(url))
            }
        }
        Err(err) if reference.contains("://") => Err(format!("invalid URL `{reference}`: {err}")),
        Ok(_) | Err(_) => Ok(None),
    }
}

pub fn sha256_hex(bytes: &[u8]) -> String {
    hex::encode(Sha256::digest(bytes))
}

fn relative_posix(path: &Path) -> std::result::Result<String, String> {
    let mut segments = Vec::new();
    for comp in path.components() {
        match comp {
            Component::Normal(seg) => segments.push(seg.to_string_lossy().replace('\\', "/")),
            Component::CurDir => continue,
            _ => return Err(format!("path traversal is not permitted: {}", path.display())),
        }
    }
    Ok(segments.join("/"))
}

/// Validate a file-valued field.
///
/// The reference has to resolve against the context root. With I/O checks
/// enabled a local file or zip member must exist, and a declared sha256 must
/// match; `known_files` is consulted before any file is read. Remote URLs are
/// accepted as they are.
pub fn check_file(
    issues: &mut Issues,
    ctx: &ValidationContext,
    loc: Loc,
    value: &JsonValue,
    sha256: Option<&str>,
) -> Option<FileSource> {
    let reference = issues.expect_str(value, loc.clone())?;
    let source = match FileSource::resolve(reference, &ctx.root) {
        Ok(source) => source,
        Err(reason) => {
            issues.error(loc, "value_error", reason);
            return None;
        }
    };
    if !ctx.perform_io_checks || matches!(source, FileSource::Url(_)) {
        return Some(source);
    }

    let known = ctx.known_files.get(reference).or_else(|| {
        source
            .file_name()
            .and_then(|name| ctx.known_files.get(&name))
    });
    if let Some(known) = known {
        if let Some(expected) = sha256
            && !known.eq_ignore_ascii_case(expected)
        {
            issues.error(
                loc,
                "sha256_mismatch",
                format!("sha256 mismatch for {reference}: expected {expected}, known {known}"),
            );
        }
        return Some(source);
    }

    match source.exists() {
        Ok(true) => {}
        Ok(false) => {
            issues.error(loc, "file_not_found", format!("{source} does not exist"));
            return Some(source);
        }
        Err(err) => {
            issues.error(loc, err.kind(), err.to_string());
            return Some(source);
        }
    }

    if let Some(expected) = sha256 {
        match source.read_bytes(&OfflineFetcher) {
            Ok(bytes) => {
                let actual = sha256_hex(&bytes);
                if !actual.eq_ignore_ascii_case(expected) {
                    issues.error(
                        loc,
                        "sha256_mismatch",
                        format!(
                            "sha256 mismatch for {reference}: expected {expected}, found {actual}"
                        ),
                    );
                }
            }
            Err(err) => issues.error(loc, err.kind(), err.to_string()),
        }
    }
    Some(source)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::loc;
    use std::collections::BTreeMap;
    use tempfile::tempdir;

    #[test]
    fn resolves_against_each_root_kind() {
        let dir = Root::Dir(PathBuf::from("/data"));
        assert_eq!(
            FileSource::resolve("weights.pt", &dir).unwrap(),
            FileSource::Local(PathBuf::from("/data/weights.pt"))
        );
        let url = Root::Url("https://example.com/models/".into());
        assert_eq!(
            FileSource::resolve("./docs/README.md", &url).unwrap(),
            FileSource::Url(Url::parse("https://example.com/models/docs/README.md").unwrap())
        );
        let zip = Root::Zip(PathBuf::from("/tmp/pkg.zip"));
        assert_eq!(
            FileSource::resolve("cover.png", &zip).unwrap(),
            FileSource::ZipMember {
                archive: PathBuf::from("/tmp/pkg.zip"),
                member: "cover.png".into()
            }
        );
        assert!(FileSource::resolve("../escape.png", &zip).is_err());
        assert!(FileSource::resolve("  ", &dir).is_err());
    }

    #[test]
    fn file_names_drop_queries() {
        let url = Url::parse("https://zenodo.org/files/weights.pt?download=1").unwrap();
        let source = FileSource::Url(url);
        assert_eq!(source.file_name().as_deref(), Some("weights.pt"));
        let source = FileSource::Local(PathBuf::from("/a/b/cover.png"));
        assert_eq!(source.file_name().as_deref(), Some("cover.png"));
    }

    #[test]
    fn urls_need_a_valid_host_and_a_file_segment() {
        assert!(is_url("https://zenodo.org/records/1/files/a.zip"));
        assert!(!is_url("https://"));
        assert!(!is_url("https://exa mple.com/a b"));
        assert!(!is_url("weights.pt"));
        assert!(!is_url("C:/models/weights.pt"));

        let dir = Root::Dir(PathBuf::from("/data"));
        assert!(FileSource::resolve("https://", &dir).is_err());
        assert!(FileSource::resolve("https://exa mple.com/a", &dir).is_err());

        let bare_host = FileSource::resolve("https://example.com", &dir).unwrap();
        assert_eq!(bare_host.file_name(), None);
        let directory = FileSource::resolve("https://example.com/files/", &dir).unwrap();
        assert_eq!(directory.file_name().as_deref(), Some("files"));
    }

    #[test]
    fn url_root_without_trailing_slash_is_a_directory() {
        let root = Root::Url("https://example.com/models/unet".into());
        assert_eq!(
            FileSource::resolve("weights.pt", &root).unwrap().to_string(),
            "https://example.com/models/unet/weights.pt"
        );
        let broken = Root::Url("not a url".into());
        assert!(FileSource::resolve("weights.pt", &broken).is_err());
    }

    #[test]
    fn missing_files_and_hash_mismatch_are_errors() {
        let temp = tempdir().unwrap();
        fs::write(temp.path().join("weights.pt"), b"weights").unwrap();
        let ctx = ValidationContext::default().with_root(Root::Dir(temp.path().to_path_buf()));
        let mut issues = Issues::new();

        check_file(&mut issues, &ctx, loc!["a"], &JsonValue::from("weights.pt"), None);
        assert!(!issues.has_errors());

        check_file(&mut issues, &ctx, loc!["b"], &JsonValue::from("nope.pt"), None);
        let wrong = "0".repeat(64);
        check_file(
            &mut issues,
            &ctx,
            loc!["c"],
            &JsonValue::from("weights.pt"),
            Some(&wrong),
        );
        let kinds: Vec<&str> = issues.errors().iter().map(|e| e.kind.as_str()).collect();
        assert_eq!(kinds, ["file_not_found", "sha256_mismatch"]);

        let right = sha256_hex(b"weights");
        let mut issues = Issues::new();
        check_file(
            &mut issues,
            &ctx,
            loc!["d"],
            &JsonValue::from("weights.pt"),
            Some(&right),
        );
        assert!(!issues.has_errors());
    }

    #[test]
    fn known_files_skip_io() {
        let digest = "a".repeat(64);
        let ctx = ValidationContext::default()
            .with_root(Root::Dir(PathBuf::from("/does/not/exist")))
            .with_known_files(BTreeMap::from([("weights.pt".to_string(), digest.clone())]));
        let mut issues = Issues::new();
        check_file(
            &mut issues,
            &ctx,
            loc!["w"],
            &JsonValue::from("weights.pt"),
            Some(&digest),
        );
        assert!(!issues.has_errors());
    }

    #[test]
    fn io_checks_can_be_disabled() {
        let ctx = ValidationContext::default()
            .with_root(Root::Dir(PathBuf::from("/does/not/exist")))
            .with_perform_io_checks(false);
        let mut issues = Issues::new();
        let source = check_file(&mut issues, &ctx, loc!["x"], &JsonValue::from("x.png"), None);
        assert!(source.is_some());
        assert!(!issues.has_errors());
    }

    #[test]
    fn offline_fetcher_refuses() {
        let url = Url::parse("https://example.com/x").unwrap();
        let err = OfflineFetcher.fetch(&url).unwrap_err();
        assert_eq!(err.kind(), "packaging_error");
    }
}
