use std::fs::{self, File};
use std::io::{Read, Seek};
use std::path::{Component, Path, PathBuf};

use serde_json::Value as JsonValue;
use tracing::debug;
use zip::ZipArchive;

use crate::context::Root;
use crate::document::parse_yaml;
use crate::error::{Result, SpecError};
use crate::registry::ResourceType;

#[cfg(test)]
const MAX_ARCHIVE_BYTES: u64 = 256 * 1024;
#[cfg(not(test))]
const MAX_ARCHIVE_BYTES: u64 = 4 * 1024 * 1024 * 1024;

#[cfg(test)]
const MAX_DOCUMENT_BYTES: u64 = 64 * 1024;
#[cfg(not(test))]
const MAX_DOCUMENT_BYTES: u64 = 16 * 1024 * 1024;

/// Canonical root document names, in lookup order.
pub const ROOT_DOCUMENT_NAMES: [&str; 2] = ["bioimageio.yaml", "rdf.yaml"];

/// Whether `name` identifies a resource's own root description.
pub fn is_root_document_name(name: &str) -> bool {
    if ROOT_DOCUMENT_NAMES.contains(&name) {
        return true;
    }
    name.strip_suffix(".bioimageio.yaml")
        .is_some_and(|prefix| prefix == "generic" || ResourceType::parse(prefix).is_some())
}

/// A raw resource description together with where it was found.
#[derive(Clone, Debug)]
pub struct OpenedDocument {
    pub content: JsonValue,
    pub root: Root,
    pub file_name: String,
    pub source_name: String,
}

/// Open a YAML file, a directory holding a root document, or a zipped package.
pub fn open_bioimageio_yaml(path: &Path) -> Result<OpenedDocument> {
    if path.is_dir() {
        let file_name = find_root_document_in_dir(path)?;
        let full = path.join(&file_name);
        debug!(path = %full.display(), "reading resource description");
        let content = parse_yaml(&read_document_text(&full)?)?;
        return Ok(OpenedDocument {
            content,
            root: Root::Dir(path.to_path_buf()),
            source_name: full.display().to_string(),
            file_name,
        });
    }

    if is_zip_file(path)? {
        let mut archive = open_archive(path)?;
        let members = list_archive_members(&mut archive)
            .map_err(|reason| read_error(path.display(), reason))?;
        let file_name = pick_root_document(members.iter().map(String::as_str))
            .ok_or_else(|| SpecError::MissingRootDocument(path.to_path_buf()))?;
        debug!(
            archive = %path.display(),
            member = %file_name,
            "reading packaged resource description"
        );
        let bytes = read_member(&mut archive, &file_name, Some(MAX_DOCUMENT_BYTES))
            .map_err(|reason| read_error(format!("{}/{file_name}", path.display()), reason))?;
        let text = String::from_utf8(bytes)
            .map_err(|err| read_error(format!("{}/{file_name}", path.display()), err))?;
        return Ok(OpenedDocument {
            content: parse_yaml(&text)?,
            root: Root::Zip(path.to_path_buf()),
            source_name: path.display().to_string(),
            file_name,
        });
    }

    debug!(path = %path.display(), "reading resource description");
    let content = parse_yaml(&read_document_text(path)?)?;
    let root = path
        .parent()
        .filter(|parent| !parent.as_os_str().is_empty())
        .map(Path::to_path_buf)
        .unwrap_or_else(|| PathBuf::from("."));
    let file_name = path
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_else(|| "rdf.yaml".to_string());
    Ok(OpenedDocument {
        content,
        root: Root::Dir(root),
        source_name: path.display().to_string(),
        file_name,
    })
}

/// Read one member of a zip archive.
pub fn read_zip_member(archive_path: &Path, member: &str) -> Result<Vec<u8>> {
    let mut archive = open_archive(archive_path)?;
    read_member(&mut archive, member, None)
        .map_err(|reason| read_error(format!("{}/{member}", archive_path.display()), reason))
}

pub fn zip_has_member(archive_path: &Path, member: &str) -> Result<bool> {
    let mut archive = open_archive(archive_path)?;
    let members = list_archive_members(&mut archive)
        .map_err(|reason| read_error(archive_path.display(), reason))?;
    Ok(members.iter().any(|name| name == member))
}

/// Member names of a zip archive after the archive safety checks.
pub fn archive_members(archive_path: &Path) -> Result<Vec<String>> {
    let mut archive = open_archive(archive_path)?;
    list_archive_members(&mut archive).map_err(|reason| read_error(archive_path.display(), reason))
}

fn open_archive(path: &Path) -> Result<ZipArchive<File>> {
    let file = File::open(path).map_err(|err| read_error(path.display(), err))?;
    Ok(ZipArchive::new(file)?)
}

fn is_zip_file(path: &Path) -> Result<bool> {
    if path
        .extension()
        .is_some_and(|ext| ext.eq_ignore_ascii_case("zip"))
    {
        return Ok(true);
    }
    let mut magic = [0u8; 4];
    let mut file = File::open(path).map_err(|err| read_error(path.display(), err))?;
    match file.read_exact(&mut magic) {
        Ok(()) => Ok(magic == *b"PK\x03\x04"),
        Err(_) => Ok(false),
    }
}

fn find_root_document_in_dir(dir: &Path) -> Result<String> {
    let mut names = Vec::new();
    for entry in fs::read_dir(dir).map_err(|err| read_error(dir.display(), err))? {
        let entry = entry?;
        if entry.file_type()?.is_file() {
            names.push(entry.file_name().to_string_lossy().into_owned());
        }
    }
    names.sort();
    pick_root_document(names.iter().map(String::as_str))
        .ok_or_else(|| SpecError::MissingRootDocument(dir.to_path_buf()))
}

/// Prefer `bioimageio.yaml`, then `rdf.yaml`, then any `<type>.bioimageio.yaml`.
fn pick_root_document<'a>(names: impl Iterator<Item = &'a str> + Clone) -> Option<String> {
    for preferred in ROOT_DOCUMENT_NAMES {
        if names.clone().any(|name| name == preferred) {
            return Some(preferred.to_string());
        }
    }
    names
        .filter(|name| !name.contains('/') && is_root_document_name(name))
        .min()
        .map(str::to_string)
}

fn read_document_text(path: &Path) -> Result<String> {
    let meta = fs::metadata(path).map_err(|err| read_error(path.display(), err))?;
    if meta.len() > MAX_DOCUMENT_BYTES {
        return Err(read_error(
            path.display(),
            format!("document exceeds maximum allowed size of {MAX_DOCUMENT_BYTES} bytes"),
        ));
    }
    fs::read_to_string(path).map_err(|err| read_error(path.display(), err))
}

fn list_archive_members<R: Read + Seek>(
    archive: &mut ZipArchive<R>,
) -> std::result::Result<Vec<String>, String> {
    let mut members = Vec::new();
    let mut total = 0u64;

    for idx in 0..archive.len() {
        let entry = archive
            .by_index(idx)
            .map_err(|err| format!("failed to read entry #{idx}: {err}"))?;

        if entry.is_dir() {
            continue;
        }
        if let Some(mode) = entry.unix_mode() {
            let file_type = mode & 0o170000;
            if file_type != 0 && file_type != 0o100000 {
                return Err(format!(
                    "unsupported file type for entry {}; only regular files are allowed",
                    entry.name()
                ));
            }
        }

        let enclosed = entry
            .enclosed_name()
            .ok_or_else(|| format!("archive entry contains unsafe path: {}", entry.name()))?;
        let logical = normalize_entry_path(&enclosed)?;
        if members.contains(&logical) {
            return Err(format!("duplicate entry detected: {logical}"));
        }

        total = total
            .checked_add(entry.size())
            .ok_or_else(|| "archive size overflow".to_string())?;
        if total > MAX_ARCHIVE_BYTES {
            return Err(format!(
                "archive exceeds maximum allowed size ({MAX_ARCHIVE_BYTES} bytes)"
            ));
        }
        members.push(logical);
    }

    Ok(members)
}

fn read_member<R: Read + Seek>(
    archive: &mut ZipArchive<R>,
    member: &str,
    limit: Option<u64>,
) -> std::result::Result<Vec<u8>, String> {
    let mut entry = archive
        .by_name(member)
        .map_err(|err| format!("member not found: {err}"))?;
    if let Some(limit) = limit
        && entry.size() > limit
    {
        return Err(format!(
            "entry {member} exceeds maximum allowed size of {limit} bytes"
        ));
    }
    let mut buf = Vec::with_capacity(entry.size().min(MAX_DOCUMENT_BYTES) as usize);
    entry
        .read_to_end(&mut buf)
        .map_err(|err| format!("failed to read {member}: {err}"))?;
    Ok(buf)
}

fn normalize_entry_path(path: &Path) -> std::result::Result<String, String> {
    if path.is_absolute() {
        return Err(format!("archive entry uses absolute path: {}", path.display()));
    }

    let mut normalized = Vec::new();
    for comp in path.components() {
        match comp {
            Component::Normal(seg) => {
                let segment = seg
                    .to_str()
                    .ok_or_else(|| "entry contains non-utf8 segment".to_string())?;
                normalized.push(segment.replace('\\', "/"));
            }
            Component::CurDir => continue,
            _ => {
                return Err(format!(
                    "archive entry contains invalid path segments: {}",
                    path.display()
                ));
            }
        }
    }
    if normalized.is_empty() {
        return Err("archive entry has an empty path".to_string());
    }
    Ok(normalized.join("/"))
}

fn read_error(path: impl std::fmt::Display, reason: impl std::fmt::Display) -> SpecError {
    SpecError::Read {
        path: path.to_string(),
        reason: reason.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::tempdir;
    use zip::write::SimpleFileOptions;

    fn write_zip(path: &Path, entries: &[(&str, &[u8])]) {
        let mut writer = zip::ZipWriter::new(File::create(path).unwrap());
        for (name, bytes) in entries {
            writer
                .start_file(*name, SimpleFileOptions::default())
                .unwrap();
            writer.write_all(bytes).unwrap();
        }
        writer.finish().unwrap();
    }

    #[test]
    fn root_document_names() {
        assert!(is_root_document_name("rdf.yaml"));
        assert!(is_root_document_name("bioimageio.yaml"));
        assert!(is_root_document_name("model.bioimageio.yaml"));
        assert!(!is_root_document_name("weights.bioimageio.yaml"));
        assert!(!is_root_document_name("README.md"));
    }

    #[test]
    fn opens_directory_preferring_bioimageio_yaml() {
        let temp = tempdir().unwrap();
        fs::write(temp.path().join("rdf.yaml"), "type: dataset\n").unwrap();
        fs::write(temp.path().join("bioimageio.yaml"), "type: model\n").unwrap();
        let opened = open_bioimageio_yaml(temp.path()).unwrap();
        assert_eq!(opened.file_name, "bioimageio.yaml");
        assert_eq!(opened.content["type"], "model");
        assert_eq!(opened.root, Root::Dir(temp.path().to_path_buf()));
    }

    #[test]
    fn empty_directory_has_no_root_document() {
        let temp = tempdir().unwrap();
        let err = open_bioimageio_yaml(temp.path()).unwrap_err();
        assert!(matches!(err, SpecError::MissingRootDocument(_)));
    }

    #[test]
    fn opens_zip_package() {
        let temp = tempdir().unwrap();
        let archive = temp.path().join("package.zip");
        write_zip(
            &archive,
            &[("rdf.yaml", b"type: dataset\n"), ("cover.png", b"png")],
        );
        let opened = open_bioimageio_yaml(&archive).unwrap();
        assert_eq!(opened.file_name, "rdf.yaml");
        assert_eq!(opened.root, Root::Zip(archive.clone()));
        assert_eq!(read_zip_member(&archive, "cover.png").unwrap(), b"png");
        assert!(zip_has_member(&archive, "cover.png").unwrap());
        assert!(!zip_has_member(&archive, "missing.png").unwrap());
    }

    #[test]
    fn oversized_archives_are_rejected() {
        let temp = tempdir().unwrap();
        let archive = temp.path().join("big.zip");
        let blob = vec![0u8; (MAX_ARCHIVE_BYTES + 1) as usize];
        write_zip(&archive, &[("rdf.yaml", b"type: model\n"), ("blob.bin", &blob)]);
        let err = open_bioimageio_yaml(&archive).unwrap_err();
        assert!(err.to_string().contains("maximum allowed size"));
    }

    #[test]
    fn rejects_parent_segments() {
        assert!(normalize_entry_path(Path::new("../evil")).is_err());
        assert_eq!(
            normalize_entry_path(Path::new("./a/b.txt")).unwrap(),
            "a/b.txt"
        );
    }
}
