//! Raw documentation loading with per-path memoization.
//!
//! The server delivers a small fixed set of documents — coding rules,
//! development skills, and steering instructions — loaded from Markdown
//! files on disk. [`DocumentStore`] memoizes each file for the lifetime of
//! the process; content only changes through an explicit
//! [`clear`](DocumentStore::clear). A missing file is a hard error here
//! (unlike the cache layer, where absence is a soft miss).

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::config::Config;

/// Logical name of a deliverable document.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum DocName {
    /// Professional coding rules and standards.
    Rules,
    /// Development skills and best practices.
    Skills,
    /// AI agent steering instructions.
    Steering,
}

impl DocName {
    /// All document names, in canonical order.
    pub const ALL: [DocName; 3] = [DocName::Rules, DocName::Skills, DocName::Steering];

    /// The lowercase identifier used in cache bundles and CLI arguments.
    pub fn as_str(&self) -> &'static str {
        match self {
            DocName::Rules => "rules",
            DocName::Skills => "skills",
            DocName::Steering => "steering",
        }
    }
}

impl std::fmt::Display for DocName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DocName {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "rules" => Ok(DocName::Rules),
            "skills" => Ok(DocName::Skills),
            "steering" => Ok(DocName::Steering),
            other => Err(format!(
                "unknown document '{other}' (expected rules, skills, or steering)"
            )),
        }
    }
}

/// The full document set, loaded once for cache builds and guidance calls.
#[derive(Debug, Clone)]
pub struct DocSet {
    pub rules: String,
    pub skills: String,
    pub steering: String,
}

impl DocSet {
    /// Content of one document by logical name.
    pub fn get(&self, name: DocName) -> &str {
        match name {
            DocName::Rules => &self.rules,
            DocName::Skills => &self.skills,
            DocName::Steering => &self.steering,
        }
    }

    /// Combined size of all documents in bytes.
    pub fn total_size(&self) -> usize {
        DocName::ALL.iter().map(|n| self.get(*n).len()).sum()
    }
}

/// Loads and memoizes documentation files by path.
///
/// Owned by the server value and passed by reference to request handlers;
/// never module-level state, so multiple servers or test fixtures do not
/// interfere.
#[derive(Debug, Default)]
pub struct DocumentStore {
    cache: HashMap<PathBuf, String>,
}

impl DocumentStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Load a documentation file, memoizing by path.
    ///
    /// Returns `Err` when the file does not exist or cannot be read — for
    /// direct document loads, a missing file is a hard failure.
    pub fn load(&mut self, path: &Path) -> Result<String, String> {
        if let Some(content) = self.cache.get(path) {
            return Ok(content.clone());
        }

        let content = std::fs::read_to_string(path)
            .map_err(|e| format!("Documentation file not found: {}: {e}", path.display()))?;

        self.cache.insert(path.to_path_buf(), content.clone());
        Ok(content)
    }

    /// Load a document by logical name using the configured paths.
    pub fn load_named(&mut self, name: DocName, config: &Config) -> Result<String, String> {
        self.load(&config.doc_path(name))
    }

    /// Load the entire document set.
    pub fn load_all(&mut self, config: &Config) -> Result<DocSet, String> {
        Ok(DocSet {
            rules: self.load_named(DocName::Rules, config)?,
            skills: self.load_named(DocName::Skills, config)?,
            steering: self.load_named(DocName::Steering, config)?,
        })
    }

    /// Drop one memoized entry, or everything when `path` is `None`.
    pub fn clear(&mut self, path: Option<&Path>) {
        match path {
            Some(p) => {
                self.cache.remove(p);
            }
            None => self.cache.clear(),
        }
    }
}
