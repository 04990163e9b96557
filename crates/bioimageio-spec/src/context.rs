//! Call-scoped validation configuration.
//!
//! Loader functions take the context explicitly. Entering a context also
//! makes it the ambient one for the current thread so that nested
//! collaborators can reach it through [`ValidationContext::current`]. Scopes
//! nest like a stack and the guard restores the previous context on drop.

use std::cell::RefCell;
use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::settings::Settings;
use crate::summary::Severity;

thread_local! {
    static CONTEXT_STACK: RefCell<Vec<Arc<ValidationContext>>> = const { RefCell::new(Vec::new()) };
}

/// Where relative file references of a document resolve to.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "location", rename_all = "lowercase")]
pub enum Root {
    Dir(PathBuf),
    Url(String),
    Zip(PathBuf),
}

impl Default for Root {
    fn default() -> Self {
        Root::Dir(PathBuf::from("."))
    }
}

impl fmt::Display for Root {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Root::Dir(path) | Root::Zip(path) => write!(f, "{}", path.display()),
            Root::Url(url) => f.write_str(url),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ValidationContext {
    pub root: Root,
    /// Name of the root document inside `root`, when known.
    pub file_name: Option<String>,
    pub perform_io_checks: bool,
    pub warning_level: Severity,
    /// File name to sha256 hex digest; consulted before reading a file.
    pub known_files: BTreeMap<String, String>,
    pub raise_errors: bool,
    pub log_warnings: bool,
    pub source_name: Option<String>,
}

impl Default for ValidationContext {
    fn default() -> Self {
        Self::from_settings(&Settings::default())
    }
}

impl ValidationContext {
    pub fn from_settings(settings: &Settings) -> Self {
        Self {
            root: Root::default(),
            file_name: None,
            perform_io_checks: settings.perform_io_checks,
            warning_level: settings.warning_level,
            known_files: BTreeMap::new(),
            raise_errors: false,
            log_warnings: settings.log_warnings,
            source_name: None,
        }
    }

    /// The innermost entered context, or one built from the environment.
    pub fn current() -> Arc<ValidationContext> {
        CONTEXT_STACK
            .with(|stack| stack.borrow().last().cloned())
            .unwrap_or_else(|| Arc::new(Self::from_settings(&Settings::from_env())))
    }

    /// Number of contexts entered on this thread.
    pub fn depth() -> usize {
        CONTEXT_STACK.with(|stack| stack.borrow().len())
    }

    /// Make this context the current one until the guard is dropped.
    #[must_use = "the context is left as soon as the guard is dropped"]
    pub fn enter(&self) -> ContextGuard {
        let depth = CONTEXT_STACK.with(|stack| {
            let mut stack = stack.borrow_mut();
            stack.push(Arc::new(self.clone()));
            stack.len()
        });
        ContextGuard { depth }
    }

    pub fn with_root(mut self, root: Root) -> Self {
        self.root = root;
        self
    }

    pub fn with_file_name(mut self, file_name: impl Into<String>) -> Self {
        self.file_name = Some(file_name.into());
        self
    }

    pub fn with_perform_io_checks(mut self, perform_io_checks: bool) -> Self {
        self.perform_io_checks = perform_io_checks;
        self
    }

    pub fn with_warning_level(mut self, level: Severity) -> Self {
        self.warning_level = level;
        self
    }

    pub fn with_known_files(mut self, known_files: BTreeMap<String, String>) -> Self {
        self.known_files = known_files;
        self
    }

    pub fn with_raise_errors(mut self, raise_errors: bool) -> Self {
        self.raise_errors = raise_errors;
        self
    }

    pub fn with_log_warnings(mut self, log_warnings: bool) -> Self {
        self.log_warnings = log_warnings;
        self
    }

    pub fn with_source_name(mut self, source_name: impl Into<String>) -> Self {
        self.source_name = Some(source_name.into());
        self
    }

    /// Context for a document located at `path` (its parent directory becomes the root).
    pub fn for_file(self, path: &Path) -> Self {
        let parent = path
            .parent()
            .filter(|parent| !parent.as_os_str().is_empty())
            .map(Path::to_path_buf)
            .unwrap_or_else(|| PathBuf::from("."));
        let file_name = path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned());
        let mut ctx = self.with_root(Root::Dir(parent));
        ctx.file_name = file_name;
        ctx.source_name = Some(path.display().to_string());
        ctx
    }

    /// Label used in summaries for the validated source.
    pub fn source_label(&self) -> String {
        if let Some(name) = &self.source_name {
            return name.clone();
        }
        match (&self.root, &self.file_name) {
            (Root::Url(url), Some(file)) => format!("{}/{file}", url.trim_end_matches('/')),
            (Root::Dir(dir), Some(file)) | (Root::Zip(dir), Some(file)) => {
                dir.join(file).display().to_string()
            }
            (root, None) => root.to_string(),
        }
    }

    pub fn summary(&self) -> ValidationContextSummary {
        ValidationContextSummary {
            root: self.root.to_string(),
            file_name: self.file_name.clone(),
            perform_io_checks: self.perform_io_checks,
            warning_level: self.warning_level,
            known_files: self.known_files.clone(),
        }
    }
}

/// Leaves the entered context when dropped.
#[derive(Debug)]
pub struct ContextGuard {
    depth: usize,
}

impl Drop for ContextGuard {
    fn drop(&mut self) {
        CONTEXT_STACK.with(|stack| {
            let mut stack = stack.borrow_mut();
            // Guards drop in reverse order of creation, so anything deeper
            // than this guard belongs to a scope that has already unwound.
            stack.truncate(self.depth.saturating_sub(1));
        });
    }
}

/// Serializable snapshot of the context a detail was produced under.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidationContextSummary {
    pub root: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_name: Option<String>,
    pub perform_io_checks: bool,
    pub warning_level: Severity,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub known_files: BTreeMap<String, String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn nested_scopes_restore_previous_context() {
        let outer = ValidationContext::default().with_source_name("outer");
        let before = ValidationContext::depth();
        {
            let _outer = outer.enter();
            assert_eq!(
                ValidationContext::current().source_name.as_deref(),
                Some("outer")
            );
            {
                let inner = ValidationContext::current()
                    .as_ref()
                    .clone()
                    .with_source_name("inner")
                    .with_warning_level(Severity::Info);
                let _inner = inner.enter();
                let current = ValidationContext::current();
                assert_eq!(current.source_name.as_deref(), Some("inner"));
                assert_eq!(current.warning_level, Severity::Info);
                assert_eq!(ValidationContext::depth(), before + 2);
            }
            assert_eq!(
                ValidationContext::current().source_name.as_deref(),
                Some("outer")
            );
        }
        assert_eq!(ValidationContext::depth(), before);
    }

    #[test]
    fn scope_is_left_on_panic() {
        let before = ValidationContext::depth();
        let result = std::panic::catch_unwind(|| {
            let _guard = ValidationContext::default()
                .with_source_name("doomed")
                .enter();
            panic!("boom");
        });
        assert!(result.is_err());
        assert_eq!(ValidationContext::depth(), before);
    }

    #[test]
    fn replace_copies_other_fields() {
        let base = ValidationContext::default()
            .with_perform_io_checks(false)
            .with_source_name("base");
        let replaced = base.clone().with_warning_level(Severity::Info);
        assert!(!replaced.perform_io_checks);
        assert_eq!(replaced.source_name, base.source_name);
        assert_eq!(replaced.warning_level, Severity::Info);
        assert_eq!(base.warning_level, Severity::Error);
    }

    #[test]
    fn for_file_sets_root_and_name() {
        let ctx = ValidationContext::default().for_file(Path::new("/data/model/rdf.yaml"));
        assert_eq!(ctx.root, Root::Dir(PathBuf::from("/data/model")));
        assert_eq!(ctx.file_name.as_deref(), Some("rdf.yaml"));
        assert_eq!(ctx.source_label(), "/data/model/rdf.yaml");
    }
}
