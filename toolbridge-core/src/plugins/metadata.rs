//! Plugin metadata, lifecycle states and instances

use chrono::{DateTime, Utc};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::{Arc, LazyLock};

use super::error::PluginError;
use crate::tools::CatalogProvider;

static NAME_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^[A-Za-z0-9_-]+$").unwrap());

// https://semver.org/#is-there-a-suggested-regular-expression-regex-to-check-a-semver-string
static SEMVER_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"^(0|[1-9]\d*)\.(0|[1-9]\d*)\.(0|[1-9]\d*)(?:-((?:0|[1-9]\d*|\d*[a-zA-Z-][0-9a-zA-Z-]*)(?:\.(?:0|[1-9]\d*|\d*[a-zA-Z-][0-9a-zA-Z-]*))*))?(?:\+([0-9a-zA-Z-]+(?:\.[0-9a-zA-Z-]+)*))?$",
    )
    .unwrap()
});

/// Whether `name` is a valid plugin name (no empty names or path separators)
pub fn is_valid_plugin_name(name: &str) -> bool {
    NAME_RE.is_match(name)
}

/// Whether `version` is a valid semantic version
pub fn is_valid_semver(version: &str) -> bool {
    SEMVER_RE.is_match(version)
}

/// Category of functionality a plugin provides
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum PluginCapability {
    Tools,
    Resources,
    Prompts,
    Other(String),
}

impl PluginCapability {
    /// Capability tag as written in descriptors
    pub fn as_str(&self) -> &str {
        match self {
            PluginCapability::Tools => "tools",
            PluginCapability::Resources => "resources",
            PluginCapability::Prompts => "prompts",
            PluginCapability::Other(tag) => tag,
        }
    }
}

impl From<String> for PluginCapability {
    fn from(tag: String) -> Self {
        match tag.trim().to_lowercase().as_str() {
            "tools" => PluginCapability::Tools,
            "resources" => PluginCapability::Resources,
            "prompts" => PluginCapability::Prompts,
            other => PluginCapability::Other(other.to_string()),
        }
    }
}

impl From<&str> for PluginCapability {
    fn from(tag: &str) -> Self {
        Self::from(tag.to_string())
    }
}

impl From<PluginCapability> for String {
    fn from(capability: PluginCapability) -> Self {
        capability.as_str().to_string()
    }
}

impl std::fmt::Display for PluginCapability {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Descriptive metadata for a plugin
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PluginMetadata {
    /// Unique plugin name
    pub name: String,

    /// Semantic version
    pub version: String,

    /// Optional description
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,

    /// Declared capabilities (must be non-empty)
    #[serde(default)]
    pub capabilities: Vec<PluginCapability>,
}

impl PluginMetadata {
    /// Create metadata with no capabilities
    pub fn new(name: impl Into<String>, version: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            version: version.into(),
            description: None,
            capabilities: Vec::new(),
        }
    }

    /// Set the description
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    /// Declare a capability
    pub fn with_capability(mut self, capability: impl Into<PluginCapability>) -> Self {
        let capability = capability.into();
        if !self.capabilities.contains(&capability) {
            self.capabilities.push(capability);
        }
        self
    }

    /// Whether the plugin declares `capability`
    pub fn has_capability(&self, capability: &PluginCapability) -> bool {
        self.capabilities.contains(capability)
    }

    /// Check name, version and capabilities
    pub fn validate(&self) -> Result<(), PluginError> {
        if !is_valid_plugin_name(&self.name) {
            return Err(PluginError::InvalidName(self.name.clone()));
        }
        if !is_valid_semver(&self.version) {
            return Err(PluginError::InvalidVersion {
                name: self.name.clone(),
                version: self.version.clone(),
            });
        }
        if self.capabilities.is_empty() {
            return Err(PluginError::NoCapabilities(self.name.clone()));
        }
        if self.capabilities.iter().any(|c| c.as_str().is_empty()) {
            return Err(PluginError::EmptyCapability {
                name: self.name.clone(),
            });
        }
        Ok(())
    }
}

/// Lifecycle state of a plugin
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PluginState {
    Unloaded,
    Loading,
    Loaded,
    Active,
    Disabled,
    Error,
}

impl PluginState {
    /// State name as used in statistics
    pub fn as_str(&self) -> &'static str {
        match self {
            PluginState::Unloaded => "unloaded",
            PluginState::Loading => "loading",
            PluginState::Loaded => "loaded",
            PluginState::Active => "active",
            PluginState::Disabled => "disabled",
            PluginState::Error => "error",
        }
    }

    /// Whether a plugin in this state serves its tools and resources
    pub fn is_serving(&self) -> bool {
        matches!(self, PluginState::Loaded | PluginState::Active)
    }
}

impl std::fmt::Display for PluginState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A registered plugin
#[derive(Clone, Serialize, Deserialize)]
pub struct PluginInstance {
    pub metadata: PluginMetadata,

    pub state: PluginState,

    /// When the plugin was (last) loaded
    pub loaded_at: DateTime<Utc>,

    /// Directory the plugin was discovered in, if any
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<PathBuf>,

    /// Last lifecycle error
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,

    #[serde(skip)]
    pub(crate) handler: Option<Arc<dyn CatalogProvider>>,
}

impl PluginInstance {
    pub(crate) fn new(metadata: PluginMetadata, source: Option<PathBuf>) -> Self {
        Self {
            metadata,
            state: PluginState::Unloaded,
            loaded_at: Utc::now(),
            source,
            error: None,
            handler: None,
        }
    }

    /// Plugin name
    pub fn name(&self) -> &str {
        &self.metadata.name
    }

    /// Handler serving this plugin's tools and resources
    pub fn handler(&self) -> Option<&Arc<dyn CatalogProvider>> {
        self.handler.as_ref()
    }
}

impl std::fmt::Debug for PluginInstance {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PluginInstance")
            .field("metadata", &self.metadata)
            .field("state", &self.state)
            .field("loaded_at", &self.loaded_at)
            .field("source", &self.source)
            .field("error", &self.error)
            .field("has_handler", &self.handler.is_some())
            .finish()
    }
}
