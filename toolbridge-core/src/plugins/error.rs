use std::path::PathBuf;

use super::metadata::PluginState;

/// Plugin validation and lifecycle errors
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum PluginError {
    /// Name is empty or contains characters outside `[A-Za-z0-9_-]`
    #[error("Invalid plugin name: '{0}'")]
    InvalidName(String),

    /// Version is not a semantic version
    #[error("Invalid version '{version}' for plugin '{name}'")]
    InvalidVersion { name: String, version: String },

    /// No capabilities declared
    #[error("Plugin '{0}' declares no capabilities")]
    NoCapabilities(String),

    /// A declared capability tag is blank
    #[error("Plugin '{name}' declares an empty capability tag")]
    EmptyCapability { name: String },

    /// A plugin with this name is already registered
    #[error("Plugin already registered: {0}")]
    DuplicateName(String),

    #[error("Plugin not found: {0}")]
    PluginNotFound(String),

    /// Operation is not valid from the plugin's current state
    #[error("Plugin '{name}' cannot move from {from} to {to}")]
    InvalidTransition {
        name: String,
        from: PluginState,
        to: PluginState,
    },

    /// The registered handler failed its load-time catalog probe
    #[error("Plugin '{name}' handler failed: {message}")]
    Handler { name: String, message: String },

    /// Descriptor could not be read or parsed
    #[error("Invalid plugin descriptor {}: {message}", path.display())]
    Descriptor { path: PathBuf, message: String },
}

impl PluginError {
    /// Name of the plugin the error is about, when known
    pub fn plugin_name(&self) -> Option<&str> {
        match self {
            PluginError::InvalidName(name)
            | PluginError::NoCapabilities(name)
            | PluginError::DuplicateName(name)
            | PluginError::PluginNotFound(name)
            | PluginError::InvalidVersion { name, .. }
            | PluginError::EmptyCapability { name }
            | PluginError::InvalidTransition { name, .. }
            | PluginError::Handler { name, .. } => Some(name),
            PluginError::Descriptor { .. } => None,
        }
    }
}
