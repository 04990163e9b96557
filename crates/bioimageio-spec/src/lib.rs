#![forbid(unsafe_code)]

pub mod context;
pub mod convert;
pub mod descr;
pub mod document;
pub mod error;
pub mod file;
pub mod issues;
pub mod loader;
pub mod package;
pub mod reader;
pub mod registry;
pub mod settings;
pub mod summary;
pub mod version;

pub use context::{ContextGuard, Root, ValidationContext};
pub use descr::{InvalidDescr, LoadedDescr, ResourceDescr, entry_report};
pub use error::{Result, SpecError};
pub use loader::{build_description, dump_description, load_description, validate_format};
pub use package::{get_package_content, write_package};
pub use registry::{DescrKind, Registry, ResourceType};
pub use summary::{Severity, Status, ValidationSummary};
pub use version::RequestedVersion;
