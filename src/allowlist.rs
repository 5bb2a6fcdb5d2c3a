//! Allow-list guard for configuration filenames.
//!
//! The registry is built once per process and never mutated during a request
//! cycle. Matching is exact and case-sensitive; names carrying path
//! separators or parent-directory segments are rejected outright since they
//! can never be canonical registry members, which also keeps every resolved
//! path inside the configuration root.
use crate::error::FileError;
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

/// Files the agent may stage or overwrite when no explicit list is given.
pub const DEFAULT_ALLOWED_FILES: &[&str] = &[
    "automations.yaml",
    "scripts.yaml",
    "scenes.yaml",
    "sensors.yaml",
    "binary_sensors.yaml",
    "switches.yaml",
    "groups.yaml",
    "input_booleans.yaml",
    "input_numbers.yaml",
    "input_selects.yaml",
    "input_texts.yaml",
    "input_datetimes.yaml",
];

/// Immutable set of canonical filenames plus the configuration root they
/// resolve against.
#[derive(Debug, Clone)]
pub struct AllowedFiles {
    names: BTreeSet<String>,
    config_root: PathBuf,
}

impl AllowedFiles {
    pub fn new<I, S>(config_root: &Path, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let names = names
            .into_iter()
            .map(Into::into)
            .map(|name| name.trim().to_string())
            .filter(|name| !name.is_empty())
            .collect();
        AllowedFiles {
            names,
            config_root: config_root.to_path_buf(),
        }
    }

    pub fn with_defaults(config_root: &Path) -> Self {
        Self::new(config_root, DEFAULT_ALLOWED_FILES.iter().copied())
    }

    pub fn config_root(&self) -> &Path {
        &self.config_root
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.names.iter().map(String::as_str)
    }

    /// Pure membership predicate, used when filtering a whole set.
    pub fn is_allowed(&self, filename: &str) -> bool {
        !has_traversal(filename) && self.names.contains(filename)
    }

    /// Resolve an allow-listed filename to its live path under the
    /// configuration root; fails with `AccessDenied` for anything else.
    pub fn resolve(&self, filename: &str) -> Result<PathBuf, FileError> {
        if !self.is_allowed(filename) {
            return Err(FileError::access_denied(filename));
        }
        Ok(self.config_root.join(filename))
    }
}

fn has_traversal(filename: &str) -> bool {
    filename.contains('/')
        || filename.contains('\\')
        || filename == ".."
        || filename.starts_with("../")
}
