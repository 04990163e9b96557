//! Structured validation diagnostics.
//!
//! A [`ValidationSummary`] only accumulates [`ValidationDetail`]s; its status
//! is derived from them and never set directly.

use std::fmt::{self, Write as _};
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::context::ValidationContextSummary;
use crate::document::Loc;

/// Ordinal severity of an issue, also used as the warning threshold.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Info = 20,
    Warning = 30,
    Alert = 35,
    Error = 50,
}

impl Severity {
    pub fn as_str(self) -> &'static str {
        match self {
            Severity::Info => "info",
            Severity::Warning => "warning",
            Severity::Alert => "alert",
            Severity::Error => "error",
        }
    }

    pub fn value(self) -> u8 {
        self as u8
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Severity {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "info" | "20" => Ok(Severity::Info),
            "warning" | "30" => Ok(Severity::Warning),
            "alert" | "35" => Ok(Severity::Alert),
            "error" | "50" => Ok(Severity::Error),
            other => Err(format!("unknown severity `{other}`")),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Status {
    Passed,
    Failed,
}

impl Status {
    pub fn as_str(self) -> &'static str {
        match self {
            Status::Passed => "passed",
            Status::Failed => "failed",
        }
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorEntry {
    pub loc: Loc,
    pub msg: String,
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub traceback: Vec<String>,
}

impl ErrorEntry {
    pub fn new(loc: Loc, msg: impl Into<String>, kind: impl Into<String>) -> Self {
        Self {
            loc,
            msg: msg.into(),
            kind: kind.into(),
            traceback: Vec::new(),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct WarningEntry {
    pub loc: Loc,
    pub msg: String,
    #[serde(rename = "type")]
    pub kind: String,
    pub severity: Severity,
}

impl WarningEntry {
    pub fn new(
        loc: Loc,
        msg: impl Into<String>,
        kind: impl Into<String>,
        severity: Severity,
    ) -> Self {
        Self {
            loc,
            msg: msg.into(),
            kind: kind.into(),
            severity: severity.min(Severity::Alert),
        }
    }
}

/// One named validation pass.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ValidationDetail {
    pub name: String,
    pub status: Status,
    #[serde(default, skip_serializing_if = "Loc::is_root")]
    pub loc: Loc,
    #[serde(default)]
    pub errors: Vec<ErrorEntry>,
    #[serde(default)]
    pub warnings: Vec<WarningEntry>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub context: Option<ValidationContextSummary>,
}

impl ValidationDetail {
    /// Build a detail whose status follows from `errors`.
    pub fn new(
        name: impl Into<String>,
        errors: Vec<ErrorEntry>,
        warnings: Vec<WarningEntry>,
        context: Option<ValidationContextSummary>,
    ) -> Self {
        let status = if errors.is_empty() {
            Status::Passed
        } else {
            Status::Failed
        };
        Self {
            name: name.into(),
            status,
            loc: Loc::root(),
            errors,
            warnings,
            context,
        }
    }

    pub fn passed(name: impl Into<String>) -> Self {
        Self::new(name, Vec::new(), Vec::new(), None)
    }

    /// The same detail reported under a nested location.
    pub fn nested_under(mut self, prefix: &Loc) -> Self {
        self.loc = self.loc.prefixed(prefix);
        self
    }
}

/// Report attached to every loaded description.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct ValidationSummary {
    pub name: String,
    pub source_name: String,
    #[serde(rename = "type")]
    pub resource_type: String,
    pub format_version: String,
    status: Status,
    details: Vec<ValidationDetail>,
}

impl ValidationSummary {
    pub fn new(
        name: impl Into<String>,
        source_name: impl Into<String>,
        resource_type: impl Into<String>,
        format_version: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            source_name: source_name.into(),
            resource_type: resource_type.into(),
            format_version: format_version.into(),
            status: Status::Passed,
            details: Vec::new(),
        }
    }

    pub fn status(&self) -> Status {
        self.status
    }

    pub fn passed(&self) -> bool {
        self.status == Status::Passed
    }

    pub fn details(&self) -> &[ValidationDetail] {
        &self.details
    }

    pub fn add_detail(&mut self, detail: ValidationDetail) {
        self.details.push(detail);
        self.refresh_status();
    }

    /// Insert details ahead of the existing ones, keeping their order.
    pub fn prepend_details(&mut self, details: Vec<ValidationDetail>) {
        self.details.splice(0..0, details);
        self.refresh_status();
    }

    pub fn take_details(&mut self) -> Vec<ValidationDetail> {
        let details = std::mem::take(&mut self.details);
        self.refresh_status();
        details
    }

    pub fn errors(&self) -> impl Iterator<Item = &ErrorEntry> {
        self.details.iter().flat_map(|detail| detail.errors.iter())
    }

    pub fn warnings(&self) -> impl Iterator<Item = &WarningEntry> {
        self.details.iter().flat_map(|detail| detail.warnings.iter())
    }

    pub fn warnings_at_least(&self, level: Severity) -> impl Iterator<Item = &WarningEntry> {
        self.warnings().filter(move |warning| warning.severity >= level)
    }

    fn refresh_status(&mut self) {
        self.status = if self.details.iter().any(|detail| !detail.errors.is_empty()) {
            Status::Failed
        } else {
            Status::Passed
        };
    }

    /// Render every detail, listing all warnings.
    pub fn display(&self) -> String {
        self.format_with_level(Severity::Info)
    }

    /// Render the report, listing warnings at or above `level` only.
    pub fn format_with_level(&self, level: Severity) -> String {
        let mut out = String::new();
        let title = if self.name.is_empty() {
            "bioimageio validation".to_string()
        } else {
            format!("\"{}\"", self.name)
        };
        let _ = writeln!(out, "{title}: {}", self.status.as_str().to_uppercase());
        let _ = writeln!(out, "  source: {}", self.source_name);
        let _ = writeln!(
            out,
            "  type: {}  format_version: {}",
            self.resource_type, self.format_version
        );
        for detail in &self.details {
            let marker = match detail.status {
                Status::Passed => "[PASS]",
                Status::Failed => "[FAIL]",
            };
            if detail.loc.is_root() {
                let _ = writeln!(out, "{marker} {}", detail.name);
            } else {
                let _ = writeln!(out, "{marker} {} ({})", detail.name, detail.loc);
            }
            for error in &detail.errors {
                let _ = writeln!(out, "    error: {}: {}", error.loc, error.msg);
            }
            for warning in detail.warnings.iter().filter(|w| w.severity >= level) {
                let _ = writeln!(
                    out,
                    "    {}: {}: {}",
                    warning.severity, warning.loc, warning.msg
                );
            }
        }
        out
    }

    /// One line per error, used when a failed summary becomes an error value.
    pub fn format_errors(&self) -> String {
        let mut lines: Vec<String> = self
            .errors()
            .map(|error| format!("{}: {}", error.loc, error.msg))
            .collect();
        if lines.is_empty() {
            lines.push(format!("{} validation {}", self.source_name, self.status));
        }
        lines.join("\n")
    }
}

impl fmt::Display for ValidationSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.display())
    }
}
