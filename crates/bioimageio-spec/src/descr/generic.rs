use serde_json::Value as JsonValue;

use crate::context::ValidationContext;
use crate::document::{Document, Loc};
use crate::error::Result;
use crate::file::{check_file, is_url};
use crate::issues::Issues;
use crate::registry::{DescrKind, ResourceType};
use crate::summary::Severity;

const KNOWN_LICENSES: &[&str] = &[
    "0BSD",
    "AGPL-3.0-only",
    "AGPL-3.0-or-later",
    "Apache-2.0",
    "Artistic-2.0",
    "BSD-2-Clause",
    "BSD-3-Clause",
    "BSL-1.0",
    "CC-BY-3.0",
    "CC-BY-4.0",
    "CC-BY-NC-3.0",
    "CC-BY-NC-4.0",
    "CC-BY-NC-ND-4.0",
    "CC-BY-NC-SA-4.0",
    "CC-BY-ND-4.0",
    "CC-BY-SA-3.0",
    "CC-BY-SA-4.0",
    "CC0-1.0",
    "EPL-2.0",
    "EUPL-1.2",
    "GPL-2.0-only",
    "GPL-2.0-or-later",
    "GPL-3.0-only",
    "GPL-3.0-or-later",
    "ISC",
    "LGPL-2.1-only",
    "LGPL-2.1-or-later",
    "LGPL-3.0-only",
    "LGPL-3.0-or-later",
    "MIT",
    "MPL-2.0",
    "OFL-1.1",
    "PSF-2.0",
    "Unlicense",
    "WTFPL",
    "Zlib",
];

const DEPRECATED_LICENSES: &[&str] = &[
    "AGPL-1.0",
    "AGPL-3.0",
    "BSD-2-Clause-FreeBSD",
    "BSD-2-Clause-NetBSD",
    "GFDL-1.1",
    "GFDL-1.2",
    "GFDL-1.3",
    "GPL-2.0",
    "GPL-2.0+",
    "GPL-3.0",
    "GPL-3.0+",
    "LGPL-2.0",
    "LGPL-2.0+",
    "LGPL-2.1",
    "LGPL-2.1+",
    "LGPL-3.0",
    "LGPL-3.0+",
    "eCos-2.0",
    "wxWindows",
];

const COVER_EXTENSIONS: [&str; 5] = ["gif", "jpeg", "jpg", "png", "svg"];

pub(crate) const NAME_WARN_LEN: usize = 64;
pub(crate) const NAME_MAX_LEN: usize = 128;

/// Which of the shared fields a kind requires and how strictly.
#[derive(Clone, Copy, Debug)]
pub(crate) struct CommonRules {
    /// 0.2-style attachments (`{files: [..]}`) and lenient documentation suffix.
    pub legacy: bool,
    pub authors_required: bool,
    pub cite_required: bool,
    pub license_required: bool,
    pub documentation_required: bool,
}

impl CommonRules {
    pub fn for_kind(kind: DescrKind) -> Self {
        match kind {
            DescrKind::Model04 => Self {
                legacy: true,
                authors_required: true,
                cite_required: true,
                license_required: true,
                documentation_required: true,
            },
            DescrKind::Model05 => Self {
                legacy: false,
                authors_required: true,
                cite_required: true,
                license_required: true,
                documentation_required: true,
            },
            kind if kind.is_v0_2() => Self {
                legacy: true,
                authors_required: false,
                cite_required: false,
                license_required: false,
                documentation_required: false,
            },
            _ => Self {
                legacy: false,
                authors_required: true,
                cite_required: true,
                license_required: true,
                documentation_required: false,
            },
        }
    }
}

/// Checks for generic, application, dataset and notebook descriptions.
pub(crate) fn validate(
    kind: DescrKind,
    doc: &Document,
    ctx: &ValidationContext,
    issues: &mut Issues,
) -> Result<()> {
    validate_common(kind, doc, ctx, issues, CommonRules::for_kind(kind));

    let root = Loc::root();
    match kind.resource_type() {
        Some(ResourceType::Application) => {
            if let Some(source) = doc.get("source").filter(|value| !value.is_null()) {
                check_file(issues, ctx, root.join("source"), source, None);
            }
        }
        Some(ResourceType::Notebook) => {
            if let Some(source) = issues.require(doc, &root, "source") {
                let checked = check_file(issues, ctx, root.join("source"), source, None);
                if checked.is_some()
                    && !kind.is_v0_2()
                    && source.as_str().is_some_and(|s| !s.ends_with(".ipynb"))
                {
                    issues.error(
                        root.join("source"),
                        "value_error",
                        "notebook source must be an .ipynb file",
                    );
                }
            }
        }
        Some(ResourceType::Dataset) => {
            if let Some(source) = issues.optional_str(doc, &root, "source")
                && !is_url(source)
            {
                issues.error(
                    root.join("source"),
                    "url_parsing",
                    "dataset source must be an http(s) URL",
                );
            }
        }
        _ => {}
    }
    Ok(())
}

/// Fields every resource description shares.
pub(crate) fn validate_common(
    kind: DescrKind,
    doc: &Document,
    ctx: &ValidationContext,
    issues: &mut Issues,
    rules: CommonRules,
) {
    let root = Loc::root();

    match kind.resource_type() {
        Some(resource_type) => {
            issues.literal(doc, &root, "type", &[resource_type.as_str()]);
        }
        None => {
            issues.require_str(doc, &root, "type");
        }
    }
    issues.literal(doc, &root, "format_version", &[kind.implemented_format_version()]);

    check_name(doc, issues);
    issues.require_str(doc, &root, "description");

    check_people(doc, issues, "authors", rules.authors_required, false);
    check_people(doc, issues, "maintainers", false, !rules.legacy);
    check_cite(doc, issues, rules);
    check_covers(doc, ctx, issues);
    check_documentation(doc, ctx, issues, rules);
    check_attachments(doc, ctx, issues, rules);
    check_license(doc, issues, rules.license_required);

    issues.optional_str_list(doc, &root, "tags");
    issues.optional_str_list(doc, &root, "links");
    issues.optional_str(doc, &root, "id");
    issues.optional_str(doc, &root, "id_emoji");
    issues.optional_str(doc, &root, "icon");
    issues.optional_map(doc, &root, "config");

    if let Some(repo) = issues.optional_str(doc, &root, "git_repo")
        && !is_url(repo)
    {
        issues.error(
            root.join("git_repo"),
            "url_parsing",
            "git_repo must be an http(s) URL",
        );
    }

    match doc.get("version") {
        None | Some(JsonValue::Null) => {}
        Some(JsonValue::String(_)) => {}
        Some(JsonValue::Number(_)) if rules.legacy => {}
        Some(other) => {
            issues.expect_str(other, root.join("version"));
        }
    }

    if let Some(badges) = issues.optional_list(doc, &root, "badges") {
        for (idx, badge) in badges.iter().enumerate() {
            let loc = root.join("badges").join(idx);
            if let Some(badge) = issues.expect_map(badge, loc.clone()) {
                issues.require_str(badge, &loc, "label");
                issues.require_str(badge, &loc, "url");
            }
        }
    }

    if !rules.legacy
        && let Some(uploader) = issues.optional_map(doc, &root, "uploader")
    {
        issues.require_str(uploader, &root.join("uploader"), "email");
    }
}

fn check_name(doc: &Document, issues: &mut Issues) {
    let root = Loc::root();
    let Some(name) = issues.require_str(doc, &root, "name") else {
        return;
    };
    if name.contains('/') || name.contains('\\') {
        issues.error(
            root.join("name"),
            "value_error",
            "name must not contain '/' or '\\'",
        );
    }
    let len = name.chars().count();
    if len > NAME_MAX_LEN {
        issues.error(
            root.join("name"),
            "string_too_long",
            format!("String should have at most {NAME_MAX_LEN} characters"),
        );
    } else if len > NAME_WARN_LEN {
        issues.warn(
            root.join("name"),
            "name_length",
            format!("name is longer than {NAME_WARN_LEN} characters"),
            Severity::Warning,
        );
    }
}

fn check_people(
    doc: &Document,
    issues: &mut Issues,
    key: &str,
    required: bool,
    github_user_required: bool,
) {
    let root = Loc::root();
    let people = if required {
        issues.require_list(doc, &root, key, 1)
    } else {
        issues.optional_list(doc, &root, key)
    };
    let Some(people) = people else {
        return;
    };
    for (idx, person) in people.iter().enumerate() {
        let loc = root.join(key).join(idx);
        let Some(person) = issues.expect_map(person, loc.clone()) else {
            continue;
        };
        if key == "authors" {
            if let Some(name) = issues.require_str(person, &loc, "name")
                && (name.contains('/') || name.contains('\\'))
            {
                issues.error(
                    loc.join("name"),
                    "value_error",
                    "name must not contain '/' or '\\'",
                );
            }
        } else {
            issues.optional_str(person, &loc, "name");
        }
        if github_user_required {
            issues.require_str(person, &loc, "github_user");
        } else {
            issues.optional_str(person, &loc, "github_user");
        }
        issues.optional_str(person, &loc, "affiliation");
        issues.optional_str(person, &loc, "email");
        if let Some(orcid) = issues.optional_str(person, &loc, "orcid")
            && !is_orcid(orcid)
        {
            issues.error(
                loc.join("orcid"),
                "value_error",
                format!("'{orcid}' is not a valid ORCID iD"),
            );
        }
    }
}

/// `0000-0002-1825-0097` style identifier with a valid ISO 7064 checksum.
fn is_orcid(value: &str) -> bool {
    let digits: Vec<char> = value.chars().filter(|c| *c != '-').collect();
    if value.len() != 19 || digits.len() != 16 {
        return false;
    }
    let mut total = 0u32;
    for c in &digits[..15] {
        let Some(digit) = c.to_digit(10) else {
            return false;
        };
        total = (total + digit) * 2;
    }
    let check = (12 - total % 11) % 11;
    let expected = if check == 10 {
        'X'
    } else {
        char::from_digit(check, 10).unwrap_or('?')
    };
    digits[15] == expected
}

fn check_cite(doc: &Document, issues: &mut Issues, rules: CommonRules) {
    let root = Loc::root();
    let entries = if rules.cite_required {
        issues.require_list(doc, &root, "cite", 1)
    } else {
        issues.optional_list(doc, &root, "cite")
    };
    let Some(entries) = entries else {
        return;
    };
    for (idx, entry) in entries.iter().enumerate() {
        let loc = root.join("cite").join(idx);
        let Some(entry) = issues.expect_map(entry, loc.clone()) else {
            continue;
        };
        issues.require_str(entry, &loc, "text");
        let doi = issues.optional_str(entry, &loc, "doi");
        let url = issues.optional_str(entry, &loc, "url");
        if doi.is_none() && url.is_none() {
            issues.error(loc.clone(), "value_error", "Either 'doi' or 'url' is required");
        }
        if let Some(doi) = doi
            && !rules.legacy
            && is_url(doi)
        {
            issues.error(
                loc.join("doi"),
                "value_error",
                "doi must be given without a resolver URL prefix",
            );
        }
        if let Some(url) = url
            && !is_url(url)
        {
            issues.error(loc.join("url"), "url_parsing", "url must be an http(s) URL");
        }
    }
}

fn check_covers(doc: &Document, ctx: &ValidationContext, issues: &mut Issues) {
    let root = Loc::root();
    let covers = issues.optional_list(doc, &root, "covers").unwrap_or_default();
    if covers.is_empty() {
        issues.warn(
            root.join("covers"),
            "missing_covers",
            "consider adding cover images to make the resource more appealing",
            Severity::Info,
        );
        return;
    }
    for (idx, cover) in covers.iter().enumerate() {
        let loc = root.join("covers").join(idx);
        if check_file(issues, ctx, loc.clone(), cover, None).is_none() {
            continue;
        }
        if let Some(cover) = cover.as_str()
            && !has_extension(cover, &COVER_EXTENSIONS)
        {
            issues.error(
                loc,
                "value_error",
                format!(
                    "cover image must have one of the extensions {}",
                    COVER_EXTENSIONS.join(", ")
                ),
            );
        }
    }
}

fn check_documentation(
    doc: &Document,
    ctx: &ValidationContext,
    issues: &mut Issues,
    rules: CommonRules,
) {
    let root = Loc::root();
    let value = if rules.documentation_required {
        issues.require(doc, &root, "documentation")
    } else {
        doc.get("documentation").filter(|value| !value.is_null())
    };
    let Some(value) = value else {
        return;
    };
    let loc = root.join("documentation");
    if check_file(issues, ctx, loc.clone(), value, None).is_none() {
        return;
    }
    if let Some(path) = value.as_str()
        && !has_extension(path, &["md"])
    {
        if rules.legacy {
            issues.warn(
                loc,
                "documentation_format",
                "documentation should be a markdown (.md) file",
                Severity::Warning,
            );
        } else {
            issues.error(loc, "value_error", "documentation must be a markdown (.md) file");
        }
    }
}

fn check_attachments(
    doc: &Document,
    ctx: &ValidationContext,
    issues: &mut Issues,
    rules: CommonRules,
) {
    let root = Loc::root();
    let loc = root.join("attachments");
    if rules.legacy {
        let Some(attachments) = issues.optional_map(doc, &root, "attachments") else {
            return;
        };
        let Some(files) = issues.optional_list(attachments, &loc, "files") else {
            return;
        };
        for (idx, file) in files.iter().enumerate() {
            check_file(issues, ctx, loc.join("files").join(idx), file, None);
        }
    } else {
        let Some(attachments) = issues.optional_list(doc, &root, "attachments") else {
            return;
        };
        for (idx, attachment) in attachments.iter().enumerate() {
            let entry_loc = loc.join(idx);
            let Some(attachment) = issues.expect_map(attachment, entry_loc.clone()) else {
                continue;
            };
            let sha256 = issues.optional_sha256(attachment, &entry_loc, "sha256");
            if let Some(source) = issues.require(attachment, &entry_loc, "source") {
                check_file(issues, ctx, entry_loc.join("source"), source, sha256);
            }
        }
    }
}

fn check_license(doc: &Document, issues: &mut Issues, required: bool) {
    let root = Loc::root();
    let license = if required {
        issues.require_str(doc, &root, "license")
    } else {
        issues.optional_str(doc, &root, "license")
    };
    let Some(license) = license else {
        return;
    };
    if DEPRECATED_LICENSES.contains(&license) {
        issues.warn(
            root.join("license"),
            "deprecated_license",
            format!("'{license}' is a deprecated SPDX license identifier"),
            Severity::Alert,
        );
    } else if !KNOWN_LICENSES.contains(&license) {
        issues.warn(
            root.join("license"),
            "unknown_license",
            format!("'{license}' is not a known SPDX license identifier"),
            Severity::Warning,
        );
    }
}

pub(crate) fn has_extension(path: &str, extensions: &[&str]) -> bool {
    let path = path.split(['?', '#']).next().unwrap_or(path);
    path.rsplit_once('.').is_some_and(|(_, ext)| {
        extensions
            .iter()
            .any(|candidate| candidate.eq_ignore_ascii_case(ext))
    })
}
