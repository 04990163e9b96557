//! Bundling a description and the files it references into one zip.
//!
//! Packaging walks the file-valued fields of the validated document, gives
//! every referenced file a unique archive name and rewrites the field to
//! that name. The rewritten root document is always stored last under
//! `rdf.yaml`.

use std::fmt;
use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};

use indexmap::IndexMap;
use serde_json::Value as JsonValue;
use tracing::{debug, info};
use url::Url;
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, DateTime as ZipDateTime, ZipWriter};

use crate::descr::ResourceDescr;
use crate::document::{Document, to_yaml_string};
use crate::error::{Result, SpecError};
use crate::file::{FileSource, SourceFetcher};
use crate::loader::dump_description;
use crate::reader::{self, is_root_document_name};
use crate::registry::{DescrKind, ResourceType};

/// Archive name of the packaged root document.
pub const PACKAGE_DOCUMENT_NAME: &str = "rdf.yaml";

/// Highest numeric suffix tried for a clashing file name.
const MAX_NAME_SUFFIX: usize = 19;

/// Where one archive entry comes from.
#[derive(Clone, Debug, PartialEq)]
pub enum PackageSource {
    Url(Url),
    Local(PathBuf),
    ZipMember { archive: PathBuf, member: String },
    Yaml(Document),
}

impl From<FileSource> for PackageSource {
    fn from(source: FileSource) -> Self {
        match source {
            FileSource::Url(url) => PackageSource::Url(url),
            FileSource::Local(path) => PackageSource::Local(path),
            FileSource::ZipMember { archive, member } => {
                PackageSource::ZipMember { archive, member }
            }
        }
    }
}

impl fmt::Display for PackageSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PackageSource::Url(url) => f.write_str(url.as_str()),
            PackageSource::Local(path) => write!(f, "{}", path.display()),
            PackageSource::ZipMember { archive, member } => {
                write!(f, "{}/{member}", archive.display())
            }
            PackageSource::Yaml(_) => f.write_str("<resource description>"),
        }
    }
}

impl PackageSource {
    fn bytes(&self, fetcher: &dyn SourceFetcher) -> Result<Vec<u8>> {
        match self {
            PackageSource::Url(url) => fetcher.fetch(url),
            PackageSource::Local(path) => fs::read(path).map_err(|err| SpecError::Packaging {
                source_name: path.display().to_string(),
                reason: err.to_string(),
            }),
            PackageSource::ZipMember { archive, member } => {
                reader::read_zip_member(archive, member)
            }
            PackageSource::Yaml(document) => Ok(to_yaml_string(document)?.into_bytes()),
        }
    }
}

/// Collects archive names while the document is rewritten.
#[derive(Clone, Debug, Default)]
pub struct Packager {
    files: IndexMap<String, PackageSource>,
}

impl Packager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `source` under `file_name` or the first free `_N` variant.
    ///
    /// A name already claimed by the same source is reused.
    pub fn add(&mut self, file_name: &str, source: PackageSource) -> Result<String> {
        if is_root_document_name(file_name) {
            return Err(SpecError::ReservedName {
                file_name: file_name.to_string(),
                source_name: source.to_string(),
            });
        }
        let (stem, extension) = match file_name.rfind('.') {
            Some(dot) if dot > 0 => file_name.split_at(dot),
            _ => (file_name, ""),
        };
        for attempt in 1..=MAX_NAME_SUFFIX {
            let candidate = if attempt == 1 {
                file_name.to_string()
            } else {
                format!("{stem}_{attempt}{extension}")
            };
            match self.files.get(&candidate) {
                None => {
                    debug!(name = %candidate, source = %source, "adding file to package");
                    self.files.insert(candidate.clone(), source);
                    return Ok(candidate);
                }
                Some(existing) if *existing == source => return Ok(candidate),
                Some(_) => {}
            }
        }
        Err(SpecError::NameClash(file_name.to_string()))
    }

    /// Close the manifest with the root document.
    pub fn finish(mut self, document: Document) -> PackageContent {
        self.files
            .insert(PACKAGE_DOCUMENT_NAME.to_string(), PackageSource::Yaml(document));
        PackageContent { files: self.files }
    }
}

/// Archive name to source, root document last.
#[derive(Clone, Debug)]
pub struct PackageContent {
    files: IndexMap<String, PackageSource>,
}

impl PackageContent {
    pub fn len(&self) -> usize {
        self.files.len()
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }

    pub fn get(&self, name: &str) -> Option<&PackageSource> {
        self.files.get(name)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.files.keys().map(String::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &PackageSource)> {
        self.files.iter().map(|(name, source)| (name.as_str(), source))
    }

    /// The rewritten root document.
    pub fn document(&self) -> Option<&Document> {
        match self.files.get(PACKAGE_DOCUMENT_NAME) {
            Some(PackageSource::Yaml(document)) => Some(document),
            _ => None,
        }
    }
}

#[derive(Clone, Copy, Debug)]
enum Segment {
    Key(&'static str),
    /// Every item of a list.
    Each,
    /// Every value of a mapping.
    Values,
}

/// How a file reference is embedded in its field.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Style {
    Plain,
    /// `conda:<file>` or `pip:<file>`.
    Env,
    /// `<file>:<callable>`; module imports are left alone.
    Callable,
}

use Segment::{Each, Key, Values};

type FieldPattern = (&'static [Segment], Style);

const COMMON_FIELDS: &[FieldPattern] = &[
    (&[Key("documentation")], Style::Plain),
    (&[Key("covers"), Each], Style::Plain),
];

const LEGACY_ATTACHMENTS: FieldPattern = (&[Key("attachments"), Key("files"), Each], Style::Plain);
const ATTACHMENTS: FieldPattern = (&[Key("attachments"), Each, Key("source")], Style::Plain);
const SOURCE: FieldPattern = (&[Key("source")], Style::Plain);

const MODEL_V0_4_FIELDS: &[FieldPattern] = &[
    (&[Key("test_inputs"), Each], Style::Plain),
    (&[Key("test_outputs"), Each], Style::Plain),
    (&[Key("sample_inputs"), Each], Style::Plain),
    (&[Key("sample_outputs"), Each], Style::Plain),
    (&[Key("weights"), Values, Key("source")], Style::Plain),
    (&[Key("weights"), Values, Key("architecture")], Style::Callable),
    (&[Key("weights"), Values, Key("dependencies")], Style::Env),
];

const MODEL_V0_5_FIELDS: &[FieldPattern] = &[
    (&[Key("inputs"), Each, Key("test_tensor"), Key("source")], Style::Plain),
    (&[Key("inputs"), Each, Key("sample_tensor"), Key("source")], Style::Plain),
    (&[Key("outputs"), Each, Key("test_tensor"), Key("source")], Style::Plain),
    (&[Key("outputs"), Each, Key("sample_tensor"), Key("source")], Style::Plain),
    (&[Key("weights"), Values, Key("source")], Style::Plain),
    (&[Key("weights"), Values, Key("architecture"), Key("source")], Style::Plain),
    (&[Key("weights"), Values, Key("dependencies"), Key("source")], Style::Plain),
];

fn field_patterns(kind: DescrKind) -> Vec<FieldPattern> {
    let mut patterns = COMMON_FIELDS.to_vec();
    let legacy = kind.is_v0_2() || kind == DescrKind::Model04;
    patterns.push(if legacy { LEGACY_ATTACHMENTS } else { ATTACHMENTS });
    match kind.resource_type() {
        Some(ResourceType::Application | ResourceType::Notebook) => patterns.push(SOURCE),
        Some(ResourceType::Model) if kind == DescrKind::Model04 => {
            patterns.extend_from_slice(MODEL_V0_4_FIELDS)
        }
        Some(ResourceType::Model) => patterns.extend_from_slice(MODEL_V0_5_FIELDS),
        _ => {}
    }
    patterns
}

/// The manifest of a package for `descr`, with rewritten file references.
pub fn get_package_content(descr: &ResourceDescr) -> Result<PackageContent> {
    let mut packager = Packager::new();
    let mut document = dump_description(descr);
    for (path, style) in field_patterns(descr.kind()) {
        let Some((Key(key), rest)) = path.split_first() else {
            continue;
        };
        if let Some(field) = document.get_mut(*key).filter(|field| !field.is_null()) {
            visit(field, rest, &mut |value: &mut JsonValue| {
                package_field(value, style, descr, &mut packager)
            })?;
        }
    }
    Ok(packager.finish(document))
}

fn visit(
    value: &mut JsonValue,
    path: &[Segment],
    on_field: &mut dyn FnMut(&mut JsonValue) -> Result<()>,
) -> Result<()> {
    let Some((head, rest)) = path.split_first() else {
        return on_field(value);
    };
    match (head, value) {
        (Key(key), JsonValue::Object(map)) => {
            if let Some(child) = map.get_mut(*key).filter(|child| !child.is_null()) {
                visit(child, rest, on_field)?;
            }
        }
        (Each, JsonValue::Array(items)) => {
            for item in items {
                visit(item, rest, on_field)?;
            }
        }
        (Values, JsonValue::Object(map)) => {
            for child in map.values_mut() {
                visit(child, rest, on_field)?;
            }
        }
        _ => {}
    }
    Ok(())
}

fn package_field(
    value: &mut JsonValue,
    style: Style,
    descr: &ResourceDescr,
    packager: &mut Packager,
) -> Result<()> {
    let Some(text) = value.as_str() else {
        return Ok(());
    };
    let (prefix, reference, suffix) = match style {
        Style::Plain => ("", text, ""),
        Style::Env => match text.split_once(':') {
            Some((env @ ("conda" | "pip"), file)) => (env, file, ""),
            _ => return Ok(()),
        },
        Style::Callable => match text.rsplit_once(':') {
            Some((location, callable)) if location.ends_with(".py") || location.contains('/') => {
                ("", location, callable)
            }
            _ => return Ok(()),
        },
    };

    let source = FileSource::resolve(reference, descr.root()).map_err(|reason| {
        SpecError::Packaging {
            source_name: reference.to_string(),
            reason,
        }
    })?;
    let file_name = source.file_name().ok_or_else(|| SpecError::Packaging {
        source_name: reference.to_string(),
        reason: "cannot derive a file name".to_string(),
    })?;
    let name = packager.add(&file_name, source.into())?;

    let rewritten = match style {
        Style::Plain => name,
        Style::Env => format!("{prefix}:{name}"),
        Style::Callable => format!("{name}:{suffix}"),
    };
    *value = JsonValue::String(rewritten);
    Ok(())
}

/// Write the package of `descr` to `out`.
///
/// Entries appear in manifest order with a fixed timestamp, so packaging the
/// same description twice yields identical archives.
pub fn write_package(
    descr: &ResourceDescr,
    out: &Path,
    fetcher: &dyn SourceFetcher,
) -> Result<PathBuf> {
    let content = get_package_content(descr)?;
    if let Some(parent) = out.parent().filter(|parent| !parent.as_os_str().is_empty()) {
        fs::create_dir_all(parent)?;
    }

    let file = File::create(out)?;
    let mut writer = ZipWriter::new(file);
    let options = SimpleFileOptions::default()
        .compression_method(CompressionMethod::Deflated)
        .last_modified_time(zip_timestamp())
        .unix_permissions(0o644)
        .large_file(false);

    for (name, source) in content.iter() {
        let bytes = source.bytes(fetcher)?;
        writer.start_file(name, options)?;
        writer.write_all(&bytes)?;
    }
    writer.finish()?;

    info!(path = %out.display(), entries = content.len(), "wrote package");
    Ok(out.to_path_buf())
}

fn zip_timestamp() -> ZipDateTime {
    ZipDateTime::from_date_and_time(1980, 1, 1, 0, 0, 0).unwrap_or_else(|_| ZipDateTime::default())
}
