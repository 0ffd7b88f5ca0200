//! Server configuration loaded from a TOML file.
//!
//! Every field has a default, and a missing config file yields the default
//! configuration rather than an error — only a present-but-unparsable file
//! fails. Handlers receive the config by reference from the server value.

use std::path::{Path, PathBuf};

use serde::Deserialize;
use tracing::debug;

use crate::docs::DocName;

/// Top-level configuration.
#[derive(Deserialize, Debug, Clone, Default)]
#[serde(default)]
pub struct Config {
    pub server: ServerConfig,
    pub documentation: DocumentationConfig,
    pub guidance: GuidanceConfig,
    pub optimization: OptimizationConfig,
    pub storage: StorageConfig,
}

/// Server identity, surfaced in cache manifests and reports.
#[derive(Deserialize, Debug, Clone)]
#[serde(default)]
pub struct ServerConfig {
    pub name: String,
    pub version: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            name: "Development Guidelines Server".to_string(),
            version: "1.0.0".to_string(),
        }
    }
}

/// Paths to the deliverable documentation files.
#[derive(Deserialize, Debug, Clone)]
#[serde(default)]
pub struct DocumentationConfig {
    pub rules_path: PathBuf,
    pub skills_path: PathBuf,
    pub steering_path: PathBuf,
}

impl Default for DocumentationConfig {
    fn default() -> Self {
        Self {
            rules_path: PathBuf::from("docs/rules.md"),
            skills_path: PathBuf::from("docs/skills.md"),
            steering_path: PathBuf::from("docs/steering.md"),
        }
    }
}

/// Settings for the external guidance model.
#[derive(Deserialize, Debug, Clone)]
#[serde(default)]
pub struct GuidanceConfig {
    /// Model identifier passed to the chat completions API.
    pub model: String,
    /// Maximum tokens per guidance response.
    pub max_tokens: u32,
    /// Sampling temperature.
    pub temperature: f32,
}

impl Default for GuidanceConfig {
    fn default() -> Self {
        Self {
            model: "anthropic/claude-sonnet-4".to_string(),
            max_tokens: 4000,
            temperature: 0.7,
        }
    }
}

/// Response-size optimization settings.
#[derive(Deserialize, Debug, Clone, Default)]
#[serde(default)]
pub struct OptimizationConfig {
    /// Token ceiling applied to document responses. `None` disables
    /// truncation entirely.
    pub max_response_tokens: Option<usize>,
}

/// Directories for persisted state and derived reports.
#[derive(Deserialize, Debug, Clone)]
#[serde(default)]
pub struct StorageConfig {
    pub cache_dir: PathBuf,
    pub feedback_dir: PathBuf,
    pub analytics_dir: PathBuf,
    pub reports_dir: PathBuf,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            cache_dir: PathBuf::from("cache"),
            feedback_dir: PathBuf::from("feedback"),
            analytics_dir: PathBuf::from("analytics"),
            reports_dir: PathBuf::from("reports"),
        }
    }
}

impl Config {
    /// Load configuration from a TOML file.
    ///
    /// A missing file is not an error: the default configuration is returned
    /// and the rest of the system runs normally. A file that exists but
    /// fails to parse is an error — silently ignoring a typo'd config is
    /// worse than refusing to start.
    pub fn load(path: &Path) -> Result<Self, String> {
        if !path.exists() {
            debug!("no config file at {}, using defaults", path.display());
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(path)
            .map_err(|e| format!("failed to read config '{}': {e}", path.display()))?;
        toml::from_str(&content)
            .map_err(|e| format!("failed to parse config '{}': {e}", path.display()))
    }

    /// Path of a document by logical name.
    pub fn doc_path(&self, name: DocName) -> PathBuf {
        match name {
            DocName::Rules => self.documentation.rules_path.clone(),
            DocName::Skills => self.documentation.skills_path.clone(),
            DocName::Steering => self.documentation.steering_path.clone(),
        }
    }
}
